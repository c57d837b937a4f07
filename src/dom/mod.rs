//! Page access seam for the agent
//!
//! Everything the page agent needs from a live document goes through the
//! [`PageDom`] trait: selector queries, text extraction, input writes, event
//! dispatch and mutation observers. Mutation records are not returned from
//! trait calls; they arrive asynchronously on the [`MutationStream`] handed out
//! when a DOM backend is attached.
//!
//! Two backends exist:
//! - [`CdpDom`] drives a real Chrome page through an injected runtime script
//! - [`MemoryDom`] is an in-process element tree used by tests and dry runs

mod cdp;
mod memory;

pub use cdp::CdpDom;
pub use memory::{DomWrite, MemoryDom};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Opaque handle to an element inside a page
pub type NodeId = u64;

/// Handle to an attached mutation observer
pub type ObserverId = u64;

/// Receiving half of the mutation channel for one page
pub type MutationStream = mpsc::UnboundedReceiver<MutationBatch>;

/// What a mutation observer reports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObserveOptions {
    pub child_list: bool,
    pub subtree: bool,
    /// Report changes of the `class` attribute only
    pub class_attribute: bool,
}

impl ObserveOptions {
    /// Child insertions anywhere below the target
    pub fn child_list_subtree() -> Self {
        Self {
            child_list: true,
            subtree: true,
            class_attribute: false,
        }
    }

    /// Child insertions and class changes anywhere below the target
    pub fn child_list_and_class() -> Self {
        Self {
            child_list: true,
            subtree: true,
            class_attribute: true,
        }
    }
}

/// One record of a mutation batch
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum MutationRecord {
    #[serde(rename = "childList")]
    ChildList {
        target: NodeId,
        #[serde(default)]
        added: Vec<NodeId>,
    },
    #[serde(rename = "attributes")]
    Attribute { target: NodeId, attribute: String },
}

impl MutationRecord {
    /// Nodes this record touched: added children, or the attribute target
    pub fn mutated_nodes(&self) -> &[NodeId] {
        match self {
            MutationRecord::ChildList { added, .. } => added,
            MutationRecord::Attribute { target, .. } => std::slice::from_ref(target),
        }
    }
}

/// All records delivered by one observer callback
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MutationBatch {
    pub observer: ObserverId,
    pub records: Vec<MutationRecord>,
}

/// Synthetic events the submission driver dispatches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    Input,
    Change,
    Blur,
    Focus,
    KeyDown(&'static str),
    KeyUp(&'static str),
}

impl InputEvent {
    /// DOM event type name
    pub fn event_type(&self) -> &'static str {
        match self {
            InputEvent::Input => "input",
            InputEvent::Change => "change",
            InputEvent::Blur => "blur",
            InputEvent::Focus => "focus",
            InputEvent::KeyDown(_) => "keydown",
            InputEvent::KeyUp(_) => "keyup",
        }
    }

    /// Key name for keyboard events
    pub fn key(&self) -> Option<&'static str> {
        match self {
            InputEvent::KeyDown(key) | InputEvent::KeyUp(key) => Some(*key),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum DomError {
    #[error("Page script error: {0}")]
    Script(String),

    #[error("Stale node handle: {0}")]
    StaleNode(NodeId),

    #[error("Unknown observer: {0}")]
    UnknownObserver(ObserverId),

    #[error("Invalid selector '{0}'")]
    InvalidSelector(String),

    #[error("Page has no URL with a hostname")]
    NoHostname,

    #[error("Failed to decode page response: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type DomResult<T> = Result<T, DomError>;

/// Operations the agent performs on a page
///
/// `scope: None` means the whole document. Implementations must deliver
/// mutation batches for observers created through [`PageDom::observe`] on the
/// stream returned when the backend was attached, and must stop delivering for
/// an observer once [`PageDom::disconnect`] returns.
#[async_trait]
pub trait PageDom: Send + Sync {
    async fn hostname(&self) -> DomResult<String>;

    async fn query(&self, scope: Option<NodeId>, selector: &str) -> DomResult<Option<NodeId>>;

    async fn query_all(&self, scope: Option<NodeId>, selector: &str) -> DomResult<Vec<NodeId>>;

    async fn matches(&self, node: NodeId, selector: &str) -> DomResult<bool>;

    /// Rendered text of the node (`innerText`, falling back to `textContent`)
    async fn text(&self, node: NodeId) -> DomResult<String>;

    /// Write `value` through the element prototype's native setter
    async fn set_value(&self, node: NodeId, value: &str) -> DomResult<()>;

    async fn dispatch(&self, node: NodeId, event: InputEvent) -> DomResult<()>;

    async fn click(&self, node: NodeId) -> DomResult<()>;

    async fn observe(&self, target: NodeId, options: ObserveOptions) -> DomResult<ObserverId>;

    async fn disconnect(&self, observer: ObserverId) -> DomResult<()>;
}
