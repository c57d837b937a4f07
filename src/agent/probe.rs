//! Selector health check for a site configuration

use crate::dom::{DomError, PageDom};
use crate::sites::SiteConfig;

/// Outcome of resolving one selector against a page
#[derive(Debug)]
pub struct ProbeResult {
    pub field: &'static str,
    pub selector: String,
    pub matches: Result<usize, DomError>,
}

impl ProbeResult {
    pub fn resolved(&self) -> bool {
        matches!(self.matches, Ok(n) if n > 0)
    }
}

/// Count the elements each configured selector matches
///
/// Blank selectors are reported as zero matches without querying the page.
pub async fn probe_selectors<D: PageDom + ?Sized>(dom: &D, config: &SiteConfig) -> Vec<ProbeResult> {
    let mut results = Vec::with_capacity(6);
    for (field, selector) in config.fields() {
        let matches = if selector.trim().is_empty() {
            Ok(0)
        } else {
            dom.query_all(None, selector).await.map(|nodes| nodes.len())
        };
        results.push(ProbeResult {
            field,
            selector: selector.to_string(),
            matches,
        });
    }
    results
}
