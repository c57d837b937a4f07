//! Defaults shared by the config layer, the browser launcher and the agent

/// Chrome user agent string for the launched browser
///
/// Updated: 2026-09 to Chrome 140 (current stable)
pub const CHROME_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/140.0.7339.128 Safari/537.36";

/// Directory name under the platform config/data dirs
pub const APP_DIR_NAME: &str = "chat-relay";

/// Fixed delay between reply-stream container lookups
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Lookups before container discovery gives up (20 * 500ms = 10s)
pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;

/// How long a reply may stay unfinished before its observer is dropped
pub const DEFAULT_COMPLETION_TIMEOUT_MS: u64 = 120_000;

/// How long finished replies are remembered so a re-reported container is not
/// emitted twice
pub const FINISHED_REPLY_RETENTION_MS: u64 = 600_000;

/// How often the agent checks for overdue replies
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 1_000;

/// Pending panel requests the agent will queue
pub const REQUEST_QUEUE_CAPACITY: usize = 32;
