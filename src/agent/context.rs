//! Session context for one page agent

use tracing::{error, info, warn};

use super::AgentError;
use crate::bus::Outbox;
use crate::protocol::BridgeMessage;
use crate::sites::{SiteConfigError, SiteConfigStore, SiteSelectors};

/// Outcome of looking up the configuration for a host
#[derive(Debug, Clone)]
pub enum SiteResolution {
    Missing,
    Incomplete { key: String, error: SiteConfigError },
    Ready(SiteSelectors),
}

/// Host, resolved configuration and the panel outbox for one page session
#[derive(Debug, Clone)]
pub struct AgentContext {
    host: String,
    site: SiteResolution,
    outbox: Outbox,
}

impl AgentContext {
    /// Resolve the configuration for `host`
    ///
    /// A missing entry is announced with `NO_CONFIG_FOUND`; an entry with blank
    /// selectors is reported as a content-script error naming the field. In
    /// both cases the context carries no selectors and the agent never touches
    /// the page.
    pub fn resolve(host: &str, sites: &SiteConfigStore, outbox: Outbox) -> Self {
        let site = match sites.lookup(host) {
            None => {
                warn!("No configuration found for {}", host);
                SiteResolution::Missing
            }
            Some((key, config)) => match config.clone().validate() {
                Ok(selectors) => {
                    info!("Using site configuration '{}' for {}", key, host);
                    SiteResolution::Ready(selectors)
                }
                Err(error) => {
                    error!("Site configuration '{}' rejected: {}", key, error);
                    SiteResolution::Incomplete {
                        key: key.to_string(),
                        error,
                    }
                }
            },
        };

        let context = Self {
            host: host.to_string(),
            site,
            outbox,
        };
        context.announce_unusable_config();
        context
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn site(&self) -> Option<&SiteSelectors> {
        match &self.site {
            SiteResolution::Ready(selectors) => Some(selectors),
            _ => None,
        }
    }

    pub fn resolution(&self) -> &SiteResolution {
        &self.site
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Tell the panel why there are no usable selectors
    ///
    /// A missing entry becomes `NO_CONFIG_FOUND`, an incomplete one a
    /// content-script error naming the blank field. Nothing is sent when the
    /// configuration is ready.
    pub fn announce_unusable_config(&self) {
        match &self.site {
            SiteResolution::Missing => self.outbox.emit(BridgeMessage::NoConfigFound {
                host: self.host.clone(),
            }),
            SiteResolution::Incomplete { key, error } => self.outbox.emit(BridgeMessage::error(
                format!("Site configuration for {key} is incomplete: {error}"),
            )),
            SiteResolution::Ready(_) => {}
        }
    }

    /// Surface an agent error to the panel
    pub fn report(&self, err: &AgentError) {
        error!("{}", err);
        self.outbox.emit(BridgeMessage::error(err.to_string()));
    }
}
