//! Dialogue backend client
//!
//! The backend hosts one conversation per persona. A client selects a
//! persona, submits a turn of text, and reads the reply as a sequence of
//! text increments terminated by an end marker.

mod websocket;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::Result;

pub use websocket::WebSocketDialogueClient;

/// Client to a persona-addressed dialogue backend
#[async_trait]
pub trait DialogueClient: Send {
    /// Persona the backend currently routes turns to
    fn selected_persona(&self) -> Option<&str>;

    /// Select a persona, returning once the backend acknowledged it
    ///
    /// # Errors
    ///
    /// Returns error if the backend rejects the persona or the connection fails
    async fn switch_persona(&mut self, persona: &str) -> Result<()>;

    /// Submit one turn and stream the reply
    ///
    /// The stream yields text increments and ends after the backend's end
    /// marker. A backend error or transport failure is yielded as the last
    /// item.
    ///
    /// # Errors
    ///
    /// Returns error if the turn cannot be sent
    async fn submit_turn<'a>(&'a mut self, text: &str)
    -> Result<BoxStream<'a, Result<String>>>;

    /// Personas the backend offers
    ///
    /// # Errors
    ///
    /// Returns error if the request fails
    async fn list_personas(&mut self) -> Result<Vec<String>>;
}

/// Message sent to the dialogue backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Route following turns to a persona
    SwitchPersona { persona: String },
    /// One user turn
    Turn { text: String },
    /// Request the persona catalog
    ListPersonas,
}

/// Message received from the dialogue backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Persona switch acknowledged
    PersonaSwitched { persona: String },
    /// Reply increment
    Delta { text: String },
    /// Reply complete
    End,
    /// Request failed
    Error { message: String },
    /// Persona catalog
    Personas { personas: Vec<String> },
    /// Anything this client does not understand
    #[serde(other)]
    Unknown,
}
