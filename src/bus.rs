//! Channels connecting the control panel and the page agent
//!
//! Requests (panel → agent) carry a oneshot so the handler can acknowledge
//! receipt asynchronously. Events (agent → panel) are fire-and-forget.

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::protocol::{Ack, BridgeMessage};

#[derive(Error, Debug)]
pub enum BusError {
    #[error("Page agent is not running")]
    AgentGone,

    #[error("Page agent dropped the request without acknowledging it")]
    NoAck,
}

/// A request together with its acknowledgement channel
#[derive(Debug)]
pub struct Envelope {
    pub message: BridgeMessage,
    reply: oneshot::Sender<Ack>,
}

impl Envelope {
    pub fn new(message: BridgeMessage) -> (Self, oneshot::Receiver<Ack>) {
        let (reply, rx) = oneshot::channel();
        (Self { message, reply }, rx)
    }

    pub fn respond(self, ack: Ack) {
        if self.reply.send(ack).is_err() {
            debug!("Requester went away before the acknowledgement arrived");
        }
    }
}

/// Panel-side handle for sending requests to a page agent
#[derive(Debug, Clone)]
pub struct AgentHandle {
    tx: mpsc::Sender<Envelope>,
}

impl AgentHandle {
    pub async fn request(&self, message: BridgeMessage) -> Result<Ack, BusError> {
        let (envelope, ack) = Envelope::new(message);
        self.tx.send(envelope).await.map_err(|_| BusError::AgentGone)?;
        ack.await.map_err(|_| BusError::NoAck)
    }
}

/// Agent-side sender for events addressed to the panel
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<BridgeMessage>,
}

impl Outbox {
    pub fn emit(&self, message: BridgeMessage) {
        let kind = message.kind();
        if self.tx.send(message).is_err() {
            warn!("No control panel listening; dropped {}", kind);
        }
    }
}

pub type EventStream = mpsc::UnboundedReceiver<BridgeMessage>;

/// Request channel with room for `capacity` pending requests
pub fn request_channel(capacity: usize) -> (AgentHandle, mpsc::Receiver<Envelope>) {
    let (tx, rx) = mpsc::channel(capacity);
    (AgentHandle { tx }, rx)
}

pub fn event_channel() -> (Outbox, EventStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Outbox { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn requests_are_acknowledged() {
        let (handle, mut requests) = request_channel(4);
        tokio::spawn(async move {
            while let Some(envelope) = requests.recv().await {
                let kind = envelope.message.kind();
                envelope.respond(Ack::new("ok").with_request_type(kind));
            }
        });
        let ack = handle
            .request(BridgeMessage::PopupHello { payload: String::new() })
            .await
            .unwrap();
        assert_eq!(ack.request_type.as_deref(), Some("POPUP_HELLO"));
    }

    #[tokio::test]
    async fn dropped_agent_is_reported() {
        let (handle, requests) = request_channel(1);
        drop(requests);
        let err = handle
            .request(BridgeMessage::SendChatMessage { text: "hi".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::AgentGone));
    }
}
