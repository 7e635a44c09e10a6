//! Live channel wire types.
//!
//! Frames are JSON text messages shaped `{"event": <name>, "data": <payload>}`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::models::OutgoingMessage;

/// Scope of a channel: everything for one user, or one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Room {
    User(String),
    Conversation(String),
}

impl Room {
    pub fn id(&self) -> &str {
        match self {
            Self::User(id) | Self::Conversation(id) => id,
        }
    }

    pub(crate) fn join(&self) -> ClientEvent {
        match self {
            Self::User(id) => ClientEvent::JoinUser(id.clone()),
            Self::Conversation(id) => ClientEvent::JoinConversation(id.clone()),
        }
    }
}

/// Events sent FROM the client TO the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinUser(String),
    JoinConversation(String),
    SendMessage(OutgoingMessage),
}

/// Named events the server pushes into a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventName {
    NewMessage,
    NewAppointment,
    NewActivity,
    NewAnalysis,
    NewPrescription,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewMessage => "new-message",
            Self::NewAppointment => "new-appointment",
            Self::NewActivity => "new-activity",
            Self::NewAnalysis => "new-analysis",
            Self::NewPrescription => "new-prescription",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "new-message" => Some(Self::NewMessage),
            "new-appointment" => Some(Self::NewAppointment),
            "new-activity" => Some(Self::NewActivity),
            "new-analysis" => Some(Self::NewAnalysis),
            "new-prescription" => Some(Self::NewPrescription),
            _ => None,
        }
    }
}

/// Raw inbound frame, before the event name is resolved.
#[derive(Debug, Clone, Deserialize)]
struct Frame {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// An inbound event. The payload stays untyped until a handler asks for it,
/// so a handler that only triggers a re-fetch never depends on its shape.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveEvent {
    pub name: EventName,
    pub data: serde_json::Value,
}

impl LiveEvent {
    pub fn new(name: EventName, data: impl Serialize) -> Self {
        Self {
            name,
            data: serde_json::to_value(data).unwrap_or_default(),
        }
    }

    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }

    /// Parse a text frame. Unknown event names yield `Ok(None)`.
    pub fn decode(text: &str) -> Result<Option<Self>, serde_json::Error> {
        let frame: Frame = serde_json::from_str(text)?;
        Ok(EventName::parse(&frame.event).map(|name| Self {
            name,
            data: frame.data,
        }))
    }

    pub fn encode(&self) -> String {
        serde_json::json!({ "event": self.name.as_str(), "data": self.data }).to_string()
    }
}
