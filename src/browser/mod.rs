//! Browser lifecycle: launching Chrome and opening chat pages

mod wrapper;

pub use wrapper::{BrowserWrapper, launch_browser};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("Failed to launch browser: {0}")]
    LaunchFailed(String),

    #[error("Failed to create page: {0}")]
    PageCreationFailed(String),

    #[error("Navigation to {url} failed: {reason}")]
    NavigationFailed { url: String, reason: String },

    #[error("Invalid URL '{0}'")]
    InvalidUrl(String),
}

pub type BrowserResult<T> = Result<T, BrowserError>;
