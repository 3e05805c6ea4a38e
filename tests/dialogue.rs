//! WebSocket dialogue client against an in-process backend

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use parley_gateway::dialogue::{ClientMessage, ServerMessage};
use parley_gateway::{DialogueClient, Error, Result, WebSocketDialogueClient};

const TIMEOUT: Duration = Duration::from_secs(2);

/// Requests as `(connection index, message)`
type Received = Arc<Mutex<Vec<(usize, ClientMessage)>>>;

/// Scripted backend
///
/// Turn text picks the reply: "fail" errors after one delta, "hang" sends
/// one delta and never finishes, anything else is echoed back in two
/// deltas around a message type the client does not know.
#[derive(Clone, Default)]
struct Backend {
    rejected: Vec<String>,
    received: Received,
    connections: Arc<AtomicUsize>,
}

impl Backend {
    fn rejecting(persona: &str) -> Self {
        Self {
            rejected: vec![persona.to_string()],
            ..Self::default()
        }
    }

    async fn start(&self) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let backend = self.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let backend = backend.clone();
                tokio::spawn(async move { backend.serve(stream).await });
            }
        });
        format!("ws://{addr}")
    }

    async fn serve(self, stream: TcpStream) {
        let connection = self.connections.fetch_add(1, Ordering::SeqCst);
        let Ok(mut ws) = accept_async(stream).await else {
            return;
        };

        while let Some(Ok(msg)) = ws.next().await {
            let Message::Text(text) = msg else {
                continue;
            };
            let request: ClientMessage = serde_json::from_str(text.as_str()).unwrap();
            self.received
                .lock()
                .unwrap()
                .push((connection, request.clone()));

            for reply in self.answer(&request) {
                if ws.send(Message::Text(reply.into())).await.is_err() {
                    return;
                }
            }
        }
    }

    fn answer(&self, request: &ClientMessage) -> Vec<String> {
        let json = |msg: ServerMessage| serde_json::to_string(&msg).unwrap();
        let typing = r#"{"type":"typing"}"#.to_string();

        match request {
            ClientMessage::SwitchPersona { persona } if self.rejected.contains(persona) => {
                vec![json(ServerMessage::Error {
                    message: format!("unknown persona {persona}"),
                })]
            }
            ClientMessage::SwitchPersona { persona } => vec![
                typing,
                json(ServerMessage::PersonaSwitched {
                    persona: persona.clone(),
                }),
            ],
            ClientMessage::Turn { text } => match text.as_str() {
                "fail" => vec![
                    json(ServerMessage::Delta {
                        text: "Par".to_string(),
                    }),
                    json(ServerMessage::Error {
                        message: "overloaded".to_string(),
                    }),
                ],
                "hang" => vec![json(ServerMessage::Delta {
                    text: "Thinking".to_string(),
                })],
                _ => vec![
                    json(ServerMessage::Delta {
                        text: "echo: ".to_string(),
                    }),
                    typing,
                    json(ServerMessage::Delta { text: text.clone() }),
                    json(ServerMessage::End),
                ],
            },
            ClientMessage::ListPersonas => vec![json(ServerMessage::Personas {
                personas: vec!["astro".to_string(), "helios".to_string()],
            })],
        }
    }

    fn received(&self) -> Vec<(usize, ClientMessage)> {
        self.received.lock().unwrap().clone()
    }

    fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

fn switch(persona: &str) -> ClientMessage {
    ClientMessage::SwitchPersona {
        persona: persona.to_string(),
    }
}

fn turn_message(text: &str) -> ClientMessage {
    ClientMessage::Turn {
        text: text.to_string(),
    }
}

/// Submit a turn and concatenate the reply
async fn turn(client: &mut WebSocketDialogueClient, text: &str) -> Result<String> {
    let mut stream = client.submit_turn(text).await?;
    let mut reply = String::new();
    while let Some(increment) = stream.next().await {
        reply.push_str(&increment?);
    }
    Ok(reply)
}

#[tokio::test]
async fn test_turn_streams_increments_until_end() {
    let backend = Backend::default();
    let mut client = WebSocketDialogueClient::new(backend.start().await, TIMEOUT);

    let mut stream = client.submit_turn("hello").await.unwrap();
    let mut increments = Vec::new();
    while let Some(increment) = stream.next().await {
        increments.push(increment.unwrap());
    }
    drop(stream);

    assert_eq!(increments, vec!["echo: ", "hello"]);
    assert!(client.is_connected());
    assert_eq!(client.selected_persona(), None);
    assert_eq!(backend.received(), vec![(0, turn_message("hello"))]);
}

#[tokio::test]
async fn test_backend_error_ends_reply() {
    let backend = Backend::default();
    let mut client = WebSocketDialogueClient::new(backend.start().await, TIMEOUT);

    let mut stream = client.submit_turn("fail").await.unwrap();
    assert_eq!(stream.next().await.unwrap().unwrap(), "Par");
    let err = stream.next().await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Dialogue(ref m) if m == "overloaded"));
    assert!(stream.next().await.is_none());
    drop(stream);

    // The request completed, so the connection is reused
    assert_eq!(turn(&mut client, "again").await.unwrap(), "echo: again");
    assert_eq!(backend.connections(), 1);
}

#[tokio::test]
async fn test_switch_waits_for_acknowledgement() {
    let backend = Backend::rejecting("ghost");
    let mut client = WebSocketDialogueClient::new(backend.start().await, TIMEOUT);

    client.switch_persona("astro").await.unwrap();
    assert_eq!(client.selected_persona(), Some("astro"));

    let err = client.switch_persona("ghost").await.unwrap_err();
    assert!(matches!(err, Error::Dialogue(ref m) if m.contains("ghost")));
    assert_eq!(client.selected_persona(), Some("astro"));

    assert_eq!(turn(&mut client, "hi").await.unwrap(), "echo: hi");
    assert_eq!(
        backend.received(),
        vec![(0, switch("astro")), (0, switch("ghost")), (0, turn_message("hi"))]
    );
}

#[tokio::test]
async fn test_abandoned_turn_reconnects_and_restores_persona() {
    let backend = Backend::default();
    let mut client = WebSocketDialogueClient::new(backend.start().await, TIMEOUT);
    client.switch_persona("astro").await.unwrap();

    let mut stream = client.submit_turn("hang").await.unwrap();
    assert_eq!(stream.next().await.unwrap().unwrap(), "Thinking");
    drop(stream);

    assert_eq!(turn(&mut client, "hello").await.unwrap(), "echo: hello");
    assert_eq!(backend.connections(), 2);
    assert_eq!(client.selected_persona(), Some("astro"));

    let second: Vec<ClientMessage> = backend
        .received()
        .into_iter()
        .filter(|(connection, _)| *connection == 1)
        .map(|(_, msg)| msg)
        .collect();
    assert_eq!(second, vec![switch("astro"), turn_message("hello")]);
}

#[tokio::test]
async fn test_initial_persona_restored_before_first_turn() {
    let backend = Backend::default();
    let mut client = WebSocketDialogueClient::new(backend.start().await, TIMEOUT)
        .with_initial_persona(Some("helios".to_string()));

    assert_eq!(turn(&mut client, "hi").await.unwrap(), "echo: hi");
    assert_eq!(client.selected_persona(), Some("helios"));
    assert_eq!(
        backend.received(),
        vec![(0, switch("helios")), (0, turn_message("hi"))]
    );
}

#[tokio::test]
async fn test_refused_restore_fails_turn() {
    let backend = Backend::rejecting("ghost");
    let mut client = WebSocketDialogueClient::new(backend.start().await, TIMEOUT)
        .with_initial_persona(Some("ghost".to_string()));

    let err = turn(&mut client, "hello").await.unwrap_err();
    assert!(matches!(err, Error::Dialogue(_)));
    assert_eq!(client.selected_persona(), None);

    // Nothing reached the default persona
    assert_eq!(backend.received(), vec![(0, switch("ghost"))]);
}

#[tokio::test]
async fn test_list_personas() {
    let backend = Backend::default();
    let mut client = WebSocketDialogueClient::new(backend.start().await, TIMEOUT);

    assert_eq!(client.list_personas().await.unwrap(), vec!["astro", "helios"]);
}

#[tokio::test]
async fn test_unreachable_backend_is_a_connection_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);

    let mut client = WebSocketDialogueClient::new(url, TIMEOUT);
    let err = turn(&mut client, "hello").await.unwrap_err();
    assert!(err.is_connection_failure(), "{err}");
    assert!(!client.is_connected());
}
