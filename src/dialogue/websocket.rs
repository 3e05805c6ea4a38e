//! WebSocket transport for the dialogue backend

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::{ClientMessage, DialogueClient, ServerMessage};
use crate::{Error, Result};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dialogue client over a persistent WebSocket connection
///
/// Connects lazily. A transport failure, or a request abandoned before its
/// reply completed, drops the connection and the next request reconnects.
/// Before a turn on a fresh connection the previously selected persona is
/// restored; if the backend refuses it the turn fails instead of reaching
/// the backend's default persona.
pub struct WebSocketDialogueClient {
    url: String,
    connect_timeout: Duration,
    socket: Option<Socket>,
    selected: Option<String>,
    in_flight: bool,
}

impl WebSocketDialogueClient {
    /// Create a client for the backend at `url`
    #[must_use]
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
            socket: None,
            selected: None,
            in_flight: false,
        }
    }

    /// Persona to restore when the connection is first established
    #[must_use]
    pub fn with_initial_persona(mut self, persona: Option<String>) -> Self {
        self.selected = persona;
        self
    }

    /// Whether a connection is currently open
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    async fn connect(&mut self, restore: bool) -> Result<()> {
        if self.in_flight {
            tracing::debug!("previous request abandoned, reconnecting");
            self.socket = None;
            self.in_flight = false;
        }
        if self.socket.is_some() {
            return Ok(());
        }

        let (socket, _response) = tokio::time::timeout(self.connect_timeout, connect_async(&self.url))
            .await
            .map_err(|_| Error::Timeout(format!("connecting to {}", self.url)))?
            .map_err(|e| Error::Connection(format!("{}: {e}", self.url)))?;
        tracing::info!(url = %self.url, "dialogue backend connected");
        self.socket = Some(socket);

        // A fresh session starts on the backend's default persona
        let Some(persona) = self.selected.take() else {
            return Ok(());
        };
        if !restore {
            return Ok(());
        }

        let restored = tokio::time::timeout(self.connect_timeout, self.request_switch(&persona)).await;
        match restored {
            Ok(Ok(())) => {
                tracing::debug!(persona, "restored persona");
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::warn!(persona, error = %e, "could not restore persona");
                if e.is_connection_failure() {
                    self.selected = Some(persona);
                }
                Err(e)
            }
            Err(_) => {
                self.socket = None;
                self.in_flight = false;
                let err = Error::Timeout(format!("restoring persona {persona}"));
                self.selected = Some(persona);
                Err(err)
            }
        }
    }

    async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        let text = serde_json::to_string(message)?;
        let socket = self
            .socket
            .as_mut()
            .ok_or_else(|| Error::Connection("not connected".to_string()))?;

        if let Err(e) = socket.send(Message::Text(text.into())).await {
            self.socket = None;
            return Err(e.into());
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<ServerMessage> {
        let socket = self
            .socket
            .as_mut()
            .ok_or_else(|| Error::Connection("not connected".to_string()))?;

        match next_message(socket).await {
            Ok(msg) => Ok(msg),
            Err(e) => {
                self.socket = None;
                self.in_flight = false;
                Err(e)
            }
        }
    }

    async fn request_switch(&mut self, persona: &str) -> Result<()> {
        self.in_flight = true;
        self.send(&ClientMessage::SwitchPersona {
            persona: persona.to_string(),
        })
        .await?;

        loop {
            match self.recv().await? {
                ServerMessage::PersonaSwitched { persona: switched } => {
                    self.in_flight = false;
                    tracing::info!(persona = %switched, "persona switched");
                    self.selected = Some(switched);
                    return Ok(());
                }
                ServerMessage::Error { message } => {
                    self.in_flight = false;
                    return Err(Error::Dialogue(message));
                }
                other => tracing::trace!(?other, "skipping message while switching persona"),
            }
        }
    }
}

/// Read the next protocol message, skipping control frames and unknown types
async fn next_message(socket: &mut Socket) -> Result<ServerMessage> {
    loop {
        let msg = socket
            .next()
            .await
            .ok_or_else(|| Error::Connection("dialogue backend closed the connection".to_string()))??;

        let text = match msg {
            Message::Text(text) => text.to_string(),
            Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(_) => continue,
            },
            Message::Close(_) => {
                return Err(Error::Connection(
                    "dialogue backend closed the connection".to_string(),
                ));
            }
            _ => continue,
        };

        match serde_json::from_str::<ServerMessage>(&text) {
            Ok(ServerMessage::Unknown) | Err(_) => {
                tracing::trace!(text, "skipping unrecognized dialogue message");
            }
            Ok(msg) => return Ok(msg),
        }
    }
}

#[async_trait]
impl DialogueClient for WebSocketDialogueClient {
    fn selected_persona(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    async fn switch_persona(&mut self, persona: &str) -> Result<()> {
        self.connect(false).await?;
        self.request_switch(persona).await
    }

    async fn submit_turn<'a>(
        &'a mut self,
        text: &str,
    ) -> Result<BoxStream<'a, Result<String>>> {
        self.connect(true).await?;
        self.in_flight = true;
        self.send(&ClientMessage::Turn {
            text: text.to_string(),
        })
        .await?;

        tracing::debug!(chars = text.len(), "turn submitted");

        Ok(stream::unfold(Some(self), |client| async move {
            let client = client?;
            loop {
                match client.recv().await {
                    Ok(ServerMessage::Delta { text }) => return Some((Ok(text), Some(client))),
                    Ok(ServerMessage::End) => {
                        client.in_flight = false;
                        return None;
                    }
                    Ok(ServerMessage::Error { message }) => {
                        client.in_flight = false;
                        return Some((Err(Error::Dialogue(message)), None));
                    }
                    Ok(ServerMessage::PersonaSwitched { persona }) => {
                        client.selected = Some(persona);
                    }
                    Ok(_) => {}
                    Err(e) => return Some((Err(e), None)),
                }
            }
        })
        .boxed())
    }

    async fn list_personas(&mut self) -> Result<Vec<String>> {
        self.connect(false).await?;
        self.in_flight = true;
        self.send(&ClientMessage::ListPersonas).await?;

        loop {
            match self.recv().await? {
                ServerMessage::Personas { personas } => {
                    self.in_flight = false;
                    return Ok(personas);
                }
                ServerMessage::Error { message } => {
                    self.in_flight = false;
                    return Err(Error::Dialogue(message));
                }
                _ => {}
            }
        }
    }
}
