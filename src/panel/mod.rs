//! Control panel: the user-facing half of the relay
//!
//! Owns the chat history, forwards typed messages to the page agent and turns
//! agent events into chat lines. Every change to the history is written back
//! to the [`HistoryStore`] immediately.

mod history;
mod render;

pub use history::{ChatMessage, HistoryError, HistoryStore, Sender};
pub use render::{plain_line, render_line};

use tracing::{debug, info, warn};

use crate::bus::AgentHandle;
use crate::protocol::{Ack, BridgeMessage};

pub const CLEARED_NOTICE: &str = "Chat cleared.";
pub const SEND_FAILED: &str = "Error: Could not send message to the page.";

pub struct ControlPanel {
    store: HistoryStore,
    agent: AgentHandle,
    history: Vec<ChatMessage>,
    transcript: Vec<ChatMessage>,
    unseen: usize,
}

impl ControlPanel {
    /// Open the panel, restoring the persisted history
    pub fn open(store: HistoryStore, agent: AgentHandle) -> Result<Self, HistoryError> {
        let history = store.load()?;
        debug!("Restored {} chat lines from {}", history.len(), store.path().display());
        Ok(Self {
            store,
            agent,
            transcript: history.clone(),
            unseen: history.len(),
            history,
        })
    }

    /// Recorded history, without display-only notices
    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Everything currently on screen
    pub fn transcript(&self) -> &[ChatMessage] {
        &self.transcript
    }

    /// Lines added since the last call
    pub fn take_unseen(&mut self) -> Vec<ChatMessage> {
        let start = self.transcript.len() - self.unseen;
        self.unseen = 0;
        self.transcript[start..].to_vec()
    }

    /// Send a typed line to the page
    ///
    /// Blank input is ignored entirely. Returns the agent's acknowledgement
    /// when the request was delivered.
    pub async fn submit(&mut self, input: &str) -> Option<Ack> {
        let text = input.trim();
        if text.is_empty() {
            return None;
        }

        self.push(ChatMessage::new(text, Sender::User));
        let request = BridgeMessage::SendChatMessage {
            text: text.to_string(),
        };
        match self.agent.request(request).await {
            Ok(ack) => {
                if ack.is_error() {
                    debug!("Page agent rejected message: {}", ack.status);
                }
                Some(ack)
            }
            Err(e) => {
                warn!("Could not deliver message: {}", e);
                self.push(ChatMessage::new(SEND_FAILED, Sender::Error));
                None
            }
        }
    }

    /// Liveness check against the page agent
    pub async fn ping(&self) -> bool {
        let hello = BridgeMessage::PopupHello {
            payload: "hello from the control panel".to_string(),
        };
        self.agent.request(hello).await.is_ok_and(|ack| !ack.is_error())
    }

    /// Wipe the history on screen and on disk
    pub fn clear(&mut self) {
        self.history.clear();
        self.transcript.clear();
        self.unseen = 0;
        self.persist();
        info!("Chat history cleared");
        self.push(ChatMessage::new(CLEARED_NOTICE, Sender::System));
    }

    /// Turn an agent event into a chat line
    pub fn handle_event(&mut self, event: BridgeMessage) {
        let line = match event {
            BridgeMessage::ChatbotResponse { text } => ChatMessage::new(text, Sender::Bot),
            BridgeMessage::ContentScriptError { message } => {
                ChatMessage::new(format!("Error: {message}"), Sender::Error)
            }
            BridgeMessage::NoConfigFound { host } => ChatMessage::new(
                format!("Error: No chat configuration found for {host}."),
                Sender::Error,
            ),
            other => {
                debug!("Panel ignoring {}", other.kind());
                return;
            }
        };
        self.push(line);
    }

    fn push(&mut self, message: ChatMessage) {
        let recorded = message.sender != Sender::System;
        if recorded {
            self.history.push(message.clone());
        }
        self.transcript.push(message);
        self.unseen += 1;
        if recorded {
            self.persist();
        }
    }

    fn persist(&self) {
        if let Err(e) = self.store.save(&self.history) {
            warn!("{}", e);
        }
    }
}
