//! Terminal rendering of chat lines

use super::history::{ChatMessage, Sender};

const RESET: &str = "\x1b[0m";

fn style(sender: Sender) -> (&'static str, &'static str) {
    match sender {
        Sender::User => ("\x1b[36m", "you"),
        Sender::Bot => ("\x1b[32m", "bot"),
        Sender::Error => ("\x1b[31m", "error"),
        Sender::System => ("\x1b[90m", "--"),
    }
}

/// One colored line, continuation lines indented under the label
pub fn render_line(message: &ChatMessage) -> String {
    let (color, label) = style(message.sender);
    let indent = " ".repeat(label.len() + 2);
    let body = message.text.lines().collect::<Vec<_>>().join(&format!("\n{indent}"));
    format!("{color}{label}{RESET}  {body}")
}

/// Same as [`render_line`] without escape codes, for non-terminal output
pub fn plain_line(message: &ChatMessage) -> String {
    let (_, label) = style(message.sender);
    format!("[{label}] {}", message.text)
}
