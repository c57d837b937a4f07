//! Page agent: the in-page half of the relay
//!
//! Resolves the site configuration for the page's host, finds the reply
//! stream, watches it for reply containers and drives submissions requested by
//! the control panel. All state lives on the [`PageAgent`]; one agent serves
//! one page for the lifetime of that page.

mod context;
mod discovery;
mod probe;
mod reply;
mod submit;

pub use context::{AgentContext, SiteResolution};
pub use discovery::ContainerSearch;
pub use probe::{ProbeResult, probe_selectors};
pub use reply::{ReplyBook, ReplyPhase, ReplyScope};
pub use submit::{SUBMIT_KEY, submit_text};

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::Config;
use crate::bus::{Envelope, Outbox};
use crate::dom::{DomError, MutationBatch, MutationRecord, MutationStream, NodeId, ObserveOptions, ObserverId, PageDom};
use crate::protocol::{Ack, BridgeMessage};
use crate::sites::SiteConfigStore;

/// Error type for agent operations
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Page error: {0}")]
    Dom(#[from] DomError),

    #[error("{role} not found using selector '{selector}'")]
    ElementNotFound { role: &'static str, selector: String },

    #[error("Reply container '{selector}' not found after {attempts} attempts")]
    ContainerNotFound { selector: String, attempts: u32 },
}

/// Timing knobs for one agent
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub poll_interval: Duration,
    pub max_attempts: u32,
    pub completion_timeout: Option<Duration>,
    pub sweep_interval: Duration,
}

impl AgentSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.discovery.poll_interval(),
            max_attempts: config.discovery.max_attempts,
            completion_timeout: config.completion.timeout(),
            sweep_interval: config.completion.sweep_interval(),
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Where the agent is with the reply stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    AwaitingContainer,
    Watching { container: NodeId, observer: ObserverId },
    Failed,
}

pub struct PageAgent<D: PageDom> {
    dom: Arc<D>,
    context: AgentContext,
    settings: AgentSettings,
    stream: StreamPhase,
    search: ContainerSearch,
    replies: ReplyBook,
}

impl<D: PageDom> PageAgent<D> {
    /// Bind an agent to a page
    ///
    /// Reads the page hostname and resolves its configuration; nothing on the
    /// page is modified.
    pub async fn start(
        dom: Arc<D>,
        sites: &SiteConfigStore,
        outbox: Outbox,
        settings: AgentSettings,
    ) -> Result<Self, AgentError> {
        let host = dom.hostname().await?;
        let context = AgentContext::resolve(&host, sites, outbox);
        let replies = ReplyBook::new(settings.completion_timeout);
        let search = ContainerSearch::new(settings.max_attempts);
        Ok(Self {
            dom,
            context,
            settings,
            stream: StreamPhase::AwaitingContainer,
            search,
            replies,
        })
    }

    pub fn context(&self) -> &AgentContext {
        &self.context
    }

    pub fn stream_phase(&self) -> StreamPhase {
        self.stream
    }

    pub fn replies(&self) -> &ReplyBook {
        &self.replies
    }

    /// Locate the reply stream and start watching it
    ///
    /// Returns `false` without touching the page when there is no usable
    /// configuration; reports an error and moves to [`StreamPhase::Failed`]
    /// when the container never shows up.
    pub async fn discover(&mut self) -> bool {
        while self.searching() {
            self.poll_stream().await;
            if self.searching() {
                tokio::time::sleep(self.settings.poll_interval).await;
            }
        }
        matches!(self.stream, StreamPhase::Watching { .. })
    }

    fn searching(&self) -> bool {
        self.stream == StreamPhase::AwaitingContainer && self.context.site().is_some()
    }

    /// One discovery attempt
    async fn poll_stream(&mut self) {
        let Some(site) = self.context.site() else {
            return;
        };
        let found = match self.search.poll(&*self.dom, site.reply_stream()).await {
            Ok(Some(container)) => self
                .dom
                .observe(container, ObserveOptions::child_list_subtree())
                .await
                .map(|observer| (container, observer))
                .map_err(AgentError::from),
            Ok(None) => return,
            Err(e) => Err(e),
        };

        match found {
            Ok((container, observer)) => {
                info!("Observing reply stream {} on {}", container, self.context.host());
                self.stream = StreamPhase::Watching { container, observer };
            }
            Err(e) => {
                self.context.report(&e);
                self.stream = StreamPhase::Failed;
            }
        }
    }

    /// Handle one panel request and produce its acknowledgement
    pub async fn handle_request(&mut self, message: &BridgeMessage) -> Ack {
        match message {
            BridgeMessage::SendChatMessage { text } => {
                let site = match self.context.resolution() {
                    SiteResolution::Ready(site) => site,
                    SiteResolution::Missing => {
                        self.context.announce_unusable_config();
                        return Ack::new("Error: No site configuration loaded.").with_text(text.as_str());
                    }
                    SiteResolution::Incomplete { error, .. } => {
                        self.context.announce_unusable_config();
                        return Ack::new(format!("Error: {error}")).with_text(text.as_str());
                    }
                };
                if text.trim().is_empty() {
                    return Ack::new("Error: Empty message.").with_text(text.as_str());
                }
                match submit_text(&*self.dom, site, text).await {
                    Ok(()) => Ack::new("Chat message sent").with_text(text.as_str()),
                    Err(e) => {
                        self.context.report(&e);
                        Ack::new(format!("Error: {e}")).with_text(text.as_str())
                    }
                }
            }
            BridgeMessage::PopupHello { .. } => {
                Ack::new("Message received").with_request_type(message.kind())
            }
            other => {
                debug!("Ignoring {} sent to the page agent", other.kind());
                Ack::new("Unknown message type").with_request_type(other.kind())
            }
        }
    }

    /// Route a mutation batch to the stream watcher or the owning reply
    pub async fn handle_mutations(&mut self, batch: MutationBatch) {
        let Some(site) = self.context.site() else {
            return;
        };
        let scope = ReplyScope {
            dom: &*self.dom,
            site,
            outbox: self.context.outbox(),
        };

        if let StreamPhase::Watching { observer, .. } = self.stream
            && batch.observer == observer
        {
            for record in &batch.records {
                let MutationRecord::ChildList { added, .. } = record else {
                    continue;
                };
                for node in added {
                    if let Err(e) = on_stream_insert(&mut self.replies, &scope, *node).await {
                        self.context.report(&e);
                    }
                }
            }
            return;
        }

        match self.replies.on_mutations(&scope, &batch).await {
            Ok(Some(phase)) => trace!("Observer {} batch processed: {:?}", batch.observer, phase),
            Ok(None) => trace!("Dropping batch from released observer {}", batch.observer),
            Err(e) => self.context.report(&e),
        }
    }

    /// Expire replies whose completion deadline passed
    pub async fn sweep(&mut self, now: Instant) -> usize {
        let Some(site) = self.context.site() else {
            return 0;
        };
        let scope = ReplyScope {
            dom: &*self.dom,
            site,
            outbox: self.context.outbox(),
        };
        self.replies.expire_overdue(&scope, now).await
    }

    /// Serve panel requests and page mutations until either side goes away
    ///
    /// Reply-stream discovery runs on its own tick, so requests are answered
    /// while the container is still being looked for.
    pub async fn run(mut self, mut requests: mpsc::Receiver<Envelope>, mut mutations: MutationStream) {
        let mut discovery = tokio::time::interval(self.settings.poll_interval);
        discovery.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sweep = tokio::time::interval(self.settings.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = discovery.tick(), if self.searching() => {
                    self.poll_stream().await;
                }
                request = requests.recv() => {
                    let Some(envelope) = request else {
                        info!("Control panel closed; stopping page agent");
                        break;
                    };
                    let ack = self.handle_request(&envelope.message).await;
                    envelope.respond(ack);
                }
                batch = mutations.recv() => {
                    let Some(batch) = batch else {
                        warn!("Page mutation stream ended; stopping page agent");
                        break;
                    };
                    self.handle_mutations(batch).await;
                }
                _ = sweep.tick() => {
                    self.sweep(Instant::now()).await;
                }
            }
        }
    }
}

/// A node was added somewhere under the reply stream
async fn on_stream_insert<D: PageDom + ?Sized>(
    replies: &mut ReplyBook,
    scope: &ReplyScope<'_, D>,
    node: NodeId,
) -> Result<(), AgentError> {
    let selector = scope.site.reply_container();
    let containers = if scope.dom.matches(node, selector).await? {
        vec![node]
    } else {
        scope.dom.query_all(Some(node), selector).await?
    };
    for container in containers {
        replies.on_container_inserted(scope, container).await?;
    }
    Ok(())
}
