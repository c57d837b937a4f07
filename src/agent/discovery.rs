//! Reply-stream container discovery
//!
//! Chat pages often render their message list after the load event. The
//! container is looked up at a fixed interval for a capped number of attempts,
//! waiting at most `interval * (max_attempts - 1)`. Each lookup is a separate
//! [`ContainerSearch::poll`] so the agent can keep serving requests between
//! attempts.

use tracing::{debug, trace};

use super::AgentError;
use crate::dom::{DomError, NodeId, PageDom};

#[derive(Debug, Clone)]
pub struct ContainerSearch {
    attempts: u32,
    max_attempts: u32,
}

impl ContainerSearch {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempts: 0,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Run one lookup
    ///
    /// `Ok(None)` means the container is not there yet and another attempt is
    /// allowed. The last failed attempt and invalid selectors are errors.
    pub async fn poll<D: PageDom + ?Sized>(
        &mut self,
        dom: &D,
        selector: &str,
    ) -> Result<Option<NodeId>, AgentError> {
        self.attempts += 1;
        let attempt = self.attempts;

        match dom.query(None, selector).await {
            Ok(Some(node)) => {
                debug!("Found reply stream '{}' on attempt {}", selector, attempt);
                return Ok(Some(node));
            }
            Ok(None) => trace!("Reply stream '{}' not present (attempt {})", selector, attempt),
            Err(DomError::InvalidSelector(s)) => return Err(DomError::InvalidSelector(s).into()),
            Err(e) => debug!("Lookup of '{}' failed on attempt {}: {}", selector, attempt, e),
        }

        if attempt >= self.max_attempts {
            return Err(AgentError::ContainerNotFound {
                selector: selector.to_string(),
                attempts: self.max_attempts,
            });
        }
        Ok(None)
    }
}
