//! Messages exchanged between the control panel and the page agent

use serde::{Deserialize, Serialize};

/// Tagged message travelling over the relay bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BridgeMessage {
    /// Panel → agent: type `text` into the page and submit it
    SendChatMessage { text: String },
    /// Agent → panel: a finished bot reply
    ChatbotResponse { text: String },
    /// Agent → panel: something went wrong inside the page
    ContentScriptError { message: String },
    /// Agent → panel: no usable configuration for the page's host
    NoConfigFound { host: String },
    /// Panel → agent liveness check
    PopupHello {
        #[serde(default)]
        payload: String,
    },
}

impl BridgeMessage {
    /// Wire name of the message type
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeMessage::SendChatMessage { .. } => "SEND_CHAT_MESSAGE",
            BridgeMessage::ChatbotResponse { .. } => "CHATBOT_RESPONSE",
            BridgeMessage::ContentScriptError { .. } => "CONTENT_SCRIPT_ERROR",
            BridgeMessage::NoConfigFound { .. } => "NO_CONFIG_FOUND",
            BridgeMessage::PopupHello { .. } => "POPUP_HELLO",
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        BridgeMessage::ContentScriptError {
            message: message.into(),
        }
    }
}

/// Receipt returned by a request handler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_type: Option<String>,
}

impl Ack {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            text: None,
            request_type: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_request_type(mut self, kind: impl Into<String>) -> Self {
        self.request_type = Some(kind.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.status.starts_with("Error")
    }
}
