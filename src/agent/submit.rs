//! Submission driver: push text into the page's own input and send it
//!
//! The value is written through the element prototype's native setter so
//! framework-managed inputs (React, Vue) pick up the change, then the same
//! event sequence a real edit produces is replayed. Sending uses a synthesized
//! Enter key by default; clicking the send control triggers page-specific side
//! effects on some sites and is only used when the site asks for it.

use tracing::{debug, info};

use super::AgentError;
use crate::dom::{InputEvent, PageDom};
use crate::sites::{SiteSelectors, SubmitMode};

/// Key used to trigger submission
pub const SUBMIT_KEY: &str = "Enter";

/// Events dispatched after the value write, in order
const EDIT_EVENTS: [InputEvent; 4] = [
    InputEvent::Input,
    InputEvent::Change,
    InputEvent::Blur,
    InputEvent::Focus,
];

/// Type `text` into the site's input and trigger submission once
pub async fn submit_text<D: PageDom + ?Sized>(
    dom: &D,
    site: &SiteSelectors,
    text: &str,
) -> Result<(), AgentError> {
    let input = dom
        .query(None, site.input())
        .await?
        .ok_or_else(|| AgentError::ElementNotFound {
            role: "chat input",
            selector: site.input().to_string(),
        })?;

    // Resolve the send control before touching the page so a miss leaves it untouched
    let button = match site.submit_mode() {
        SubmitMode::Enter => None,
        SubmitMode::Click => Some(dom.query(None, site.send_control()).await?.ok_or_else(|| {
            AgentError::ElementNotFound {
                role: "send control",
                selector: site.send_control().to_string(),
            }
        })?),
    };

    dom.set_value(input, text).await?;
    for event in EDIT_EVENTS {
        dom.dispatch(input, event).await?;
    }

    match button {
        None => {
            dom.dispatch(input, InputEvent::KeyDown(SUBMIT_KEY)).await?;
            dom.dispatch(input, InputEvent::KeyUp(SUBMIT_KEY)).await?;
        }
        Some(button) => {
            debug!("Clicking send control {}", button);
            dom.click(button).await?;
        }
    }

    info!("Submitted {} chars", text.chars().count());
    Ok(())
}
