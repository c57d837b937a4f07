//! Per-hostname selector configuration
//!
//! A [`SiteConfig`] describes where the chat UI lives on one site. It is stored
//! as written by the user and only becomes usable after
//! [`SiteConfig::validate`] turns it into [`SiteSelectors`].

mod defaults;
mod store;

pub use defaults::default_sites;
pub use store::SiteConfigStore;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How the submission driver triggers sending
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmitMode {
    /// Synthesized Enter keydown/keyup on the input
    #[default]
    Enter,
    /// Click the send control
    Click,
}

/// Selector bundle for one hostname, as stored on disk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteConfig {
    #[serde(default)]
    pub input_selector: String,
    #[serde(default)]
    pub send_button_selector: String,
    #[serde(default)]
    pub response_container_selector: String,
    #[serde(default)]
    pub bot_reply_container_selector: String,
    #[serde(default)]
    pub bot_message_text_selector: String,
    #[serde(default)]
    pub completion_indicator_selector: String,
    #[serde(default, skip_serializing_if = "is_default_submit")]
    pub submit: SubmitMode,
}

fn is_default_submit(mode: &SubmitMode) -> bool {
    *mode == SubmitMode::Enter
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SiteConfigError {
    #[error("Site configuration is missing required selector '{0}'")]
    MissingField(&'static str),
}

impl SiteConfig {
    /// Required selectors keyed by their on-disk names
    pub fn fields(&self) -> [(&'static str, &str); 6] {
        [
            ("inputSelector", &self.input_selector),
            ("sendButtonSelector", &self.send_button_selector),
            ("responseContainerSelector", &self.response_container_selector),
            ("botReplyContainerSelector", &self.bot_reply_container_selector),
            ("botMessageTextSelector", &self.bot_message_text_selector),
            ("completionIndicatorSelector", &self.completion_indicator_selector),
        ]
    }

    /// Check every required selector is present and non-blank
    pub fn validate(self) -> Result<SiteSelectors, SiteConfigError> {
        if let Some((name, _)) = self.fields().iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(SiteConfigError::MissingField(*name));
        }
        Ok(SiteSelectors(self))
    }
}

/// A [`SiteConfig`] whose required selectors are all present
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteSelectors(SiteConfig);

impl SiteSelectors {
    pub fn input(&self) -> &str {
        &self.0.input_selector
    }

    pub fn send_control(&self) -> &str {
        &self.0.send_button_selector
    }

    pub fn reply_stream(&self) -> &str {
        &self.0.response_container_selector
    }

    pub fn reply_container(&self) -> &str {
        &self.0.bot_reply_container_selector
    }

    pub fn message_text(&self) -> &str {
        &self.0.bot_message_text_selector
    }

    pub fn completion_marker(&self) -> &str {
        &self.0.completion_indicator_selector
    }

    pub fn submit_mode(&self) -> SubmitMode {
        self.0.submit
    }
}
