//! [`PageDom`] over a live Chrome page
//!
//! Injects a small runtime script that keeps a registry of element handles and
//! bridges `MutationObserver` callbacks back to Rust through a CDP runtime
//! binding. Each callback becomes one [`MutationBatch`] on the stream returned
//! by [`CdpDom::attach`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::cdp::js_protocol::runtime::{AddBindingParams, EnableParams, EventBindingCalled};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::{
    DomError, DomResult, InputEvent, MutationBatch, MutationStream, NodeId, ObserveOptions,
    ObserverId, PageDom,
};

const RUNTIME_JS: &str = include_str!("runtime.js");
const BINDING_NAME: &str = "__chatRelayEmit";

pub struct CdpDom {
    page: Page,
    forwarder: JoinHandle<()>,
}

impl CdpDom {
    /// Install the runtime on `page` and start forwarding mutation batches
    ///
    /// The runtime is registered for future documents as well, so the handle
    /// survives reloads of the same tab (element handles do not).
    pub async fn attach(page: Page) -> Result<(Self, MutationStream)> {
        page.execute(EnableParams::default())
            .await
            .context("Failed to enable CDP runtime domain")?;
        page.execute(AddBindingParams::new(BINDING_NAME))
            .await
            .context("Failed to register mutation binding")?;

        let mut events = page
            .event_listener::<EventBindingCalled>()
            .await
            .context("Failed to subscribe to binding events")?;

        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(RUNTIME_JS))
            .await
            .context("Failed to register page runtime for new documents")?;
        page.evaluate(RUNTIME_JS)
            .await
            .context("Failed to install page runtime")?;

        let (tx, rx) = mpsc::unbounded_channel();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if event.name != BINDING_NAME {
                    continue;
                }
                match serde_json::from_str::<MutationBatch>(&event.payload) {
                    Ok(batch) => {
                        trace!("Mutation batch from observer {}", batch.observer);
                        if tx.send(batch).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Dropping malformed mutation payload: {}", e),
                }
            }
            debug!("Mutation forwarder finished");
        });

        Ok((Self { page, forwarder }, rx))
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, args: &[serde_json::Value]) -> DomResult<T> {
        let args = args
            .iter()
            .map(serde_json::Value::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        let expression = format!("window.__chatRelay.{method}({args})");
        let result = self
            .page
            .evaluate(expression)
            .await
            .map_err(|e| DomError::Script(e.to_string()))?;
        // CDP omits `value` for a JS null
        let value = result.value().cloned().unwrap_or(serde_json::Value::Null);
        Ok(serde_json::from_value(value)?)
    }
}

impl Drop for CdpDom {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

fn scope_arg(scope: Option<NodeId>) -> serde_json::Value {
    scope.map_or(serde_json::Value::Null, serde_json::Value::from)
}

#[async_trait]
impl PageDom for CdpDom {
    async fn hostname(&self) -> DomResult<String> {
        let url = self
            .page
            .url()
            .await
            .map_err(|e| DomError::Script(e.to_string()))?
            .ok_or(DomError::NoHostname)?;
        url::Url::parse(&url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .ok_or(DomError::NoHostname)
    }

    async fn query(&self, scope: Option<NodeId>, selector: &str) -> DomResult<Option<NodeId>> {
        self.call("query", &[scope_arg(scope), selector.into()]).await
    }

    async fn query_all(&self, scope: Option<NodeId>, selector: &str) -> DomResult<Vec<NodeId>> {
        self.call("queryAll", &[scope_arg(scope), selector.into()]).await
    }

    async fn matches(&self, node: NodeId, selector: &str) -> DomResult<bool> {
        self.call("matches", &[node.into(), selector.into()]).await
    }

    async fn text(&self, node: NodeId) -> DomResult<String> {
        let text: String = self.call("text", &[node.into()]).await?;
        if !text.trim().is_empty() {
            return Ok(text);
        }
        // Hidden or not-yet-laid-out nodes report empty innerText
        let html: String = self.call("html", &[node.into()]).await?;
        Ok(html2md::parse_html(&html))
    }

    async fn set_value(&self, node: NodeId, value: &str) -> DomResult<()> {
        self.call::<bool>("setValue", &[node.into(), value.into()]).await?;
        Ok(())
    }

    async fn dispatch(&self, node: NodeId, event: InputEvent) -> DomResult<()> {
        let key = event.key().map_or(serde_json::Value::Null, serde_json::Value::from);
        self.call::<bool>("dispatch", &[node.into(), event.event_type().into(), key])
            .await?;
        Ok(())
    }

    async fn click(&self, node: NodeId) -> DomResult<()> {
        self.call::<bool>("click", &[node.into()]).await?;
        Ok(())
    }

    async fn observe(&self, target: NodeId, options: ObserveOptions) -> DomResult<ObserverId> {
        let options = serde_json::to_value(options)?;
        self.call("observe", &[target.into(), options]).await
    }

    async fn disconnect(&self, observer: ObserverId) -> DomResult<()> {
        let found: bool = self.call("disconnect", &[observer.into()]).await?;
        if found {
            Ok(())
        } else {
            Err(DomError::UnknownObserver(observer))
        }
    }
}
