//! Owned browser handle with its CDP event handler task

use chromiumoxide::browser::Browser;
use chromiumoxide::page::Page;
use std::path::PathBuf;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::{BrowserError, BrowserResult};
use crate::BrowserConfig;

/// Browser, its handler task and the throwaway profile it runs on
///
/// The handler is aborted on drop. Call [`BrowserWrapper::close`] first to
/// stop Chrome and remove the profile.
pub struct BrowserWrapper {
    browser: Browser,
    handler: JoinHandle<()>,
    throwaway_profile: Option<PathBuf>,
}

impl BrowserWrapper {
    pub(crate) fn new(browser: Browser, handler: JoinHandle<()>, throwaway_profile: Option<PathBuf>) -> Self {
        Self {
            browser,
            handler,
            throwaway_profile,
        }
    }

    pub(crate) fn browser(&self) -> &Browser {
        &self.browser
    }

    /// Open `url` in a new tab and wait for it to load
    pub async fn open_page(&self, url: &str) -> BrowserResult<Page> {
        let parsed = url::Url::parse(url).map_err(|_| BrowserError::InvalidUrl(url.to_string()))?;
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::PageCreationFailed(e.to_string()))?;
        page.goto(parsed.as_str())
            .await
            .map_err(|e| BrowserError::NavigationFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        page.wait_for_navigation()
            .await
            .map_err(|e| BrowserError::NavigationFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        info!("Opened {}", parsed);
        Ok(page)
    }

    /// Close Chrome, wait for the process to exit and drop the throwaway profile
    pub async fn close(&mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("Failed to close browser cleanly: {}", e);
        }
        if let Err(e) = self.browser.wait().await {
            warn!("Failed to wait for browser exit: {}", e);
        }
        if let Some(path) = self.throwaway_profile.take() {
            info!("Removing profile {}", path.display());
            if let Err(e) = std::fs::remove_dir_all(&path) {
                warn!("Failed to remove profile {}: {}", path.display(), e);
            }
        }
    }
}

impl Drop for BrowserWrapper {
    fn drop(&mut self) {
        self.handler.abort();
        if let Some(path) = &self.throwaway_profile {
            warn!(
                "Browser dropped without close(); profile left at {}",
                path.display()
            );
        }
    }
}

/// Launch Chrome according to `config`
pub async fn launch_browser(config: &BrowserConfig) -> BrowserResult<BrowserWrapper> {
    let (browser, handler, profile) = crate::browser_setup::launch_browser(config)
        .await
        .map_err(|e| BrowserError::LaunchFailed(format!("{e:#}")))?;
    Ok(BrowserWrapper::new(browser, handler, profile))
}
