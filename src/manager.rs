//! Lazily launched, health-checked browser shared by the CLI commands
//!
//! Browser operations are async, so the handle sits behind a
//! `tokio::sync::Mutex` rather than a sync lock.

use chromiumoxide::page::Page;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::BrowserConfig;
use crate::browser::{BrowserResult, BrowserWrapper, launch_browser};

pub struct BrowserManager {
    config: BrowserConfig,
    browser: Mutex<Option<BrowserWrapper>>,
}

impl BrowserManager {
    /// The browser is launched on first use
    pub fn new(config: BrowserConfig) -> Self {
        Self {
            config,
            browser: Mutex::new(None),
        }
    }

    /// Open `url` in the shared browser, launching or relaunching it as needed
    ///
    /// A browser that no longer answers `Browser.getVersion` is closed and
    /// replaced.
    pub async fn open_page(&self, url: &str) -> BrowserResult<Page> {
        let mut guard = self.browser.lock().await;

        if let Some(wrapper) = guard.as_ref() {
            match wrapper.browser().version().await {
                Ok(_) => debug!("Browser health check passed"),
                Err(e) => {
                    warn!("Browser health check failed: {}; relaunching", e);
                    if let Some(mut crashed) = guard.take() {
                        crashed.close().await;
                    }
                }
            }
        }

        let wrapper = match guard.take() {
            Some(wrapper) => wrapper,
            None => launch_browser(&self.config).await?,
        };
        let page = wrapper.open_page(url).await;
        *guard = Some(wrapper);
        page
    }

    /// Close the browser if one is running; later calls are no-ops
    pub async fn shutdown(&self) {
        if let Some(mut wrapper) = self.browser.lock().await.take() {
            info!("Shutting down browser");
            wrapper.close().await;
        }
    }
}
