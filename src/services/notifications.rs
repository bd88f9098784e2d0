//! Frontend status messages
//!
//! Messages are keyed by id and updated in place: writing an id that already
//! exists replaces its content. Subscribers receive every update and removal
//! so a UI can mirror the current set.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Kind of frontend message, used by the UI for styling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Status,
    Warning,
    Error,
}

/// A message shown in the frontend until it is removed or times out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontendMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub code: String,
    pub message: String,
    /// Seconds before the UI hides the message; 0 keeps it until removed.
    pub timeout: u64,
}

impl FrontendMessage {
    /// Persistent status message whose code matches its id.
    pub fn status(id: impl Into<String>, message: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            code: id.clone(),
            id,
            message_type: MessageType::Status,
            message: message.into(),
            timeout: 0,
        }
    }

    pub fn warning(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message_type: MessageType::Warning,
            ..Self::status(id, message)
        }
    }
}

/// Event broadcast when the message set changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FrontendMessageEvent {
    Updated(FrontendMessage),
    Removed { id: String },
}

/// Configuration for [FrontendMessages]
#[derive(Debug, Clone)]
pub struct FrontendMessagesConfig {
    /// Broadcast channel capacity
    pub channel_capacity: usize,
}

impl Default for FrontendMessagesConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
        }
    }
}

/// Sink for messages displayed by the web frontend.
pub struct FrontendMessages {
    items: RwLock<BTreeMap<String, FrontendMessage>>,
    event_tx: broadcast::Sender<FrontendMessageEvent>,
}

impl FrontendMessages {
    pub fn new(config: FrontendMessagesConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.channel_capacity);
        Self {
            items: RwLock::new(BTreeMap::new()),
            event_tx,
        }
    }

    /// Insert or replace the message with the same id.
    pub fn update(&self, message: FrontendMessage) {
        self.items
            .write()
            .insert(message.id.clone(), message.clone());
        let _ = self.event_tx.send(FrontendMessageEvent::Updated(message));
    }

    /// Remove a message. Returns whether it was present.
    pub fn remove_item(&self, id: &str) -> bool {
        let removed = self.items.write().remove(id).is_some();
        if removed {
            debug!(message_id = %id, "Removed frontend message");
            let _ = self.event_tx.send(FrontendMessageEvent::Removed { id: id.to_string() });
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<FrontendMessage> {
        self.items.read().get(id).cloned()
    }

    pub fn all(&self) -> Vec<FrontendMessage> {
        self.items.read().values().cloned().collect()
    }

    /// Subscribe to message updates and removals
    pub fn subscribe(&self) -> broadcast::Receiver<FrontendMessageEvent> {
        self.event_tx.subscribe()
    }
}

impl Default for FrontendMessages {
    fn default() -> Self {
        Self::new(FrontendMessagesConfig::default())
    }
}
