//! Per-reply completion tracking
//!
//! Each reply container moves through a small state machine:
//!
//! ```text
//! inserted ──marker present──────────────────────────────▶ Emitted
//!    │
//!    └─observe─▶ AwaitingCompletion ──marker seen────────▶ Emitted
//!                        │
//!                        └──deadline passed──────────────▶ Expired
//! ```
//!
//! The observer is always disconnected before text is extracted, so a reply
//! is emitted at most once no matter how many batches are still in flight.
//! Finished entries are kept for [`FINISHED_REPLY_RETENTION_MS`] to absorb
//! repeated container reports, then forgotten on the next sweep.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use super::AgentError;
use crate::bus::Outbox;
use crate::constants::FINISHED_REPLY_RETENTION_MS;
use crate::dom::{MutationBatch, NodeId, ObserveOptions, ObserverId, PageDom};
use crate::protocol::BridgeMessage;
use crate::sites::SiteSelectors;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyPhase {
    AwaitingCompletion { observer: ObserverId },
    Emitted,
    Expired,
}

#[derive(Debug)]
struct Reply {
    phase: ReplyPhase,
    /// Insertion time while awaiting completion, then the time it finished
    since: Instant,
}

/// Everything a reply transition needs from the agent
pub struct ReplyScope<'a, D: PageDom + ?Sized> {
    pub dom: &'a D,
    pub site: &'a SiteSelectors,
    pub outbox: &'a Outbox,
}

#[derive(Debug)]
pub struct ReplyBook {
    replies: HashMap<NodeId, Reply>,
    observers: HashMap<ObserverId, NodeId>,
    timeout: Option<Duration>,
    retention: Duration,
}

impl ReplyBook {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            replies: HashMap::new(),
            observers: HashMap::new(),
            timeout,
            retention: Duration::from_millis(FINISHED_REPLY_RETENTION_MS),
        }
    }

    pub fn phase(&self, container: NodeId) -> Option<ReplyPhase> {
        self.replies.get(&container).map(|r| r.phase)
    }

    /// Replies still waiting for their completion marker
    pub fn pending(&self) -> usize {
        self.observers.len()
    }

    /// A reply container appeared in the stream
    ///
    /// Already-known containers are ignored.
    pub async fn on_container_inserted<D: PageDom + ?Sized>(
        &mut self,
        scope: &ReplyScope<'_, D>,
        container: NodeId,
    ) -> Result<ReplyPhase, AgentError> {
        if let Some(reply) = self.replies.get(&container) {
            trace!("Reply container {} already tracked", container);
            return Ok(reply.phase);
        }

        if marker_present(scope, container, &[]).await? {
            debug!("Reply {} arrived complete", container);
            self.track(container, ReplyPhase::Emitted);
            finish(scope, container).await?;
            return Ok(ReplyPhase::Emitted);
        }

        let observer = scope
            .dom
            .observe(container, ObserveOptions::child_list_and_class())
            .await?;
        self.track(container, ReplyPhase::AwaitingCompletion { observer });
        self.observers.insert(observer, container);
        debug!("Watching reply {} with observer {}", container, observer);

        // The marker may have landed between the first check and observe()
        if marker_present(scope, container, &[]).await? {
            return self.complete(scope, container, observer).await;
        }
        Ok(ReplyPhase::AwaitingCompletion { observer })
    }

    /// Mutation batch from one of the reply observers
    ///
    /// Returns `None` when the observer is not one of ours (already
    /// disconnected, or belonging to the stream watcher).
    pub async fn on_mutations<D: PageDom + ?Sized>(
        &mut self,
        scope: &ReplyScope<'_, D>,
        batch: &MutationBatch,
    ) -> Result<Option<ReplyPhase>, AgentError> {
        let Some(&container) = self.observers.get(&batch.observer) else {
            return Ok(None);
        };

        let touched: Vec<NodeId> = batch
            .records
            .iter()
            .flat_map(|r| r.mutated_nodes().iter().copied())
            .collect();

        if marker_present(scope, container, &touched).await? {
            return self.complete(scope, container, batch.observer).await.map(Some);
        }
        Ok(Some(ReplyPhase::AwaitingCompletion {
            observer: batch.observer,
        }))
    }

    /// Drop observers of replies that exceeded the completion deadline
    ///
    /// Also forgets replies that finished longer ago than the retention
    /// period. Returns the number of replies expired by this call.
    pub async fn expire_overdue<D: PageDom + ?Sized>(
        &mut self,
        scope: &ReplyScope<'_, D>,
        now: Instant,
    ) -> usize {
        let retention = self.retention;
        self.replies.retain(|container, reply| {
            let keep = matches!(reply.phase, ReplyPhase::AwaitingCompletion { .. })
                || now.saturating_duration_since(reply.since) < retention;
            if !keep {
                trace!("Forgetting finished reply {}", container);
            }
            keep
        });

        let Some(timeout) = self.timeout else {
            return 0;
        };

        let overdue: Vec<(ObserverId, NodeId)> = self
            .observers
            .iter()
            .filter(|(_, container)| {
                self.replies
                    .get(*container)
                    .is_some_and(|r| now.saturating_duration_since(r.since) >= timeout)
            })
            .map(|(observer, container)| (*observer, *container))
            .collect();

        for (observer, container) in &overdue {
            self.observers.remove(observer);
            if let Some(reply) = self.replies.get_mut(container) {
                reply.phase = ReplyPhase::Expired;
                reply.since = now;
            }
            if let Err(e) = scope.dom.disconnect(*observer).await {
                warn!("Failed to disconnect observer {}: {}", observer, e);
            }
            warn!("Reply {} did not complete within {:?}", container, timeout);
            scope.outbox.emit(BridgeMessage::error(format!(
                "Reply did not complete within {:?} (completion marker '{}' never appeared)",
                timeout,
                scope.site.completion_marker()
            )));
        }
        overdue.len()
    }

    fn track(&mut self, container: NodeId, phase: ReplyPhase) {
        self.replies.insert(
            container,
            Reply {
                phase,
                since: Instant::now(),
            },
        );
    }

    async fn complete<D: PageDom + ?Sized>(
        &mut self,
        scope: &ReplyScope<'_, D>,
        container: NodeId,
        observer: ObserverId,
    ) -> Result<ReplyPhase, AgentError> {
        self.observers.remove(&observer);
        if let Some(reply) = self.replies.get_mut(&container) {
            reply.phase = ReplyPhase::Emitted;
            reply.since = Instant::now();
        }
        if let Err(e) = scope.dom.disconnect(observer).await {
            warn!("Failed to disconnect observer {}: {}", observer, e);
        }
        finish(scope, container).await?;
        Ok(ReplyPhase::Emitted)
    }
}

async fn marker_present<D: PageDom + ?Sized>(
    scope: &ReplyScope<'_, D>,
    container: NodeId,
    touched: &[NodeId],
) -> Result<bool, AgentError> {
    let marker = scope.site.completion_marker();
    if scope.dom.matches(container, marker).await? {
        return Ok(true);
    }
    if scope.dom.query(Some(container), marker).await?.is_some() {
        return Ok(true);
    }
    for node in touched {
        // Nodes can be detached again before the batch is processed
        match scope.dom.matches(*node, marker).await {
            Ok(true) => return Ok(true),
            Ok(false) => {}
            Err(e) => trace!("Skipping mutated node {}: {}", node, e),
        }
    }
    Ok(false)
}

async fn finish<D: PageDom + ?Sized>(scope: &ReplyScope<'_, D>, container: NodeId) -> Result<(), AgentError> {
    let Some(node) = scope.dom.query(Some(container), scope.site.message_text()).await? else {
        debug!("Reply {} has no message text node; dropping", container);
        return Ok(());
    };
    let text = scope.dom.text(node).await?;
    let text = text.trim();
    if text.is_empty() {
        debug!("Reply {} finished with empty text; dropping", container);
        return Ok(());
    }
    info!("Reply {} complete ({} chars)", container, text.chars().count());
    scope.outbox.emit(BridgeMessage::ChatbotResponse {
        text: text.to_string(),
    });
    Ok(())
}
