//! Application-wide constants for tuning and configuration
//!
//! Centralizes magic numbers to make them discoverable and configurable.

/// Replies are drafted for emails at most this many days old.
pub const DEFAULT_DAYS_THRESHOLD: i64 = 4;

/// Fetch window in days. Wider than the threshold so the threshold
/// filter always sees every candidate.
pub const DEFAULT_LOOKBACK_DAYS: i64 = 7;

/// Maximum number of messages listed from the provider per scan.
pub const DEFAULT_MAX_EMAILS_PER_SCAN: usize = 100;

/// Number of most recent drafts inspected by the duplicate detector.
pub const DEFAULT_DRAFT_SCAN_LIMIT: usize = 50;

/// Maximum number of replies fetched when looking for an existing reply.
/// Only emptiness matters, so this stays small.
pub const REPLY_LOOKUP_LIMIT: usize = 5;

/// Maximum training examples rendered into a prompt.
pub const MAX_CONTEXT_EXAMPLES: usize = 5;

/// Maximum response templates rendered into a prompt.
pub const MAX_CONTEXT_TEMPLATES: usize = 3;

/// Sampling temperature for draft generation. Fixed, not a per-call knob.
pub const DRAFT_TEMPERATURE: f32 = 0.7;

/// Sampling temperature for the email-type classifier.
pub const CLASSIFIER_TEMPERATURE: f32 = 0.3;

/// Output budget for the classifier. A single label is expected.
pub const CLASSIFIER_MAX_TOKENS: u32 = 10;

/// Default output budget for draft generation.
pub const DEFAULT_DRAFT_MAX_TOKENS: u32 = 500;

/// Default interval between scheduled scans.
pub const DEFAULT_SCAN_INTERVAL_MINUTES: u64 = 15;

/// Timeout for a single HTTP request to Graph or the completion API.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;

/// Access tokens are refreshed this many seconds before they expire.
pub const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;
