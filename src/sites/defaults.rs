//! Built-in site configurations installed on first run

use std::collections::BTreeMap;

use super::{SiteConfig, SubmitMode};

/// Selector sets shipped with the relay, keyed by hostname
pub fn default_sites() -> BTreeMap<String, SiteConfig> {
    let mut sites = BTreeMap::new();
    sites.insert(
        "monica.im".to_string(),
        SiteConfig {
            input_selector: r#"textarea.ant-input[data-input_node="monica-chat-input"]"#.to_string(),
            send_button_selector: r#"div[class^="input-msg-btn"]"#.to_string(),
            response_container_selector: "#monica-chat-scroll-box".to_string(),
            bot_reply_container_selector: r#"div[class*="chat-message--"][class*="chat-reply--"]"#
                .to_string(),
            bot_message_text_selector: r#"div[class*="markdown--"]"#.to_string(),
            completion_indicator_selector: r#"div[class*="message-toolbar--"][class*="show--"]"#
                .to_string(),
            submit: SubmitMode::Enter,
        },
    );
    sites
}
