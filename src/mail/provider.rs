//! Mailbox capability consumed by the triage pipeline.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use super::types::{DraftRequest, DraftSummary, Email, MessageRef};

#[derive(Debug, Error)]
pub enum MailboxError {
    /// The handle could not be authenticated. Terminal for a scan.
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("mailbox request failed: {0}")]
    Request(String),
    #[error("unexpected mailbox response: {0}")]
    Decode(String),
}

impl MailboxError {
    pub fn is_authentication(&self) -> bool {
        matches!(self, MailboxError::Authentication(_))
    }
}

pub type MailboxResult<T> = std::result::Result<T, MailboxError>;

/// A pre-authenticated mailbox.
///
/// Implementations own authentication, paging and timeouts. The pipeline
/// never retries a failed call.
#[async_trait]
pub trait MailboxProvider: Send + Sync {
    /// Obtain (or refresh) credentials. Called once at the start of each scan.
    async fn authenticate(&self) -> MailboxResult<()>;

    /// Messages in the scan folder received at or after `since`, newest first,
    /// at most `limit` of them.
    async fn list_recent_messages(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> MailboxResult<Vec<Email>>;

    /// The `limit` most recent drafts, newest first.
    async fn list_drafts(&self, limit: usize) -> MailboxResult<Vec<DraftSummary>>;

    /// Messages whose subject equals any of `subjects` and that were received
    /// strictly after `after`.
    async fn list_messages_matching_subject(
        &self,
        subjects: &[String],
        after: DateTime<Utc>,
        limit: usize,
    ) -> MailboxResult<Vec<MessageRef>>;

    async fn create_draft(&self, draft: &DraftRequest) -> MailboxResult<()>;

    async fn mark_as_read(&self, id: &str) -> MailboxResult<()>;
}
