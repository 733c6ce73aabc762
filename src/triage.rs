//! Decides which emails still need a drafted reply.
//!
//! - Intake: recency window over provider-listed messages
//! - Duplicate/reply detection: subject matching against drafts and later mail
//! - Domain gate: sender domain allow-list

use chrono::{DateTime, TimeDelta, Utc};

use crate::config::TriageConfig;
use crate::constants::REPLY_LOOKUP_LIMIT;
use crate::mail::provider::{MailboxProvider, MailboxResult};
use crate::mail::types::{DraftSummary, Email};

/// `now` minus `days`, saturating at the earliest representable time
pub fn days_before(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    TimeDelta::try_days(days)
        .and_then(|delta| now.checked_sub_signed(delta))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Earliest receipt time still eligible for a draft.
/// A threshold of 0 days means "since the start of today" (UTC).
pub fn threshold_cutoff(now: DateTime<Utc>, days_threshold: i64) -> DateTime<Utc> {
    if days_threshold <= 0 {
        now.date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|midnight| midnight.and_utc())
            .unwrap_or(now)
    } else {
        days_before(now, days_threshold)
    }
}

/// Keep emails received in `[cutoff, now]`, preserving order
pub fn within_threshold(
    emails: Vec<Email>,
    cutoff: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Vec<Email> {
    emails
        .into_iter()
        .filter(|e| e.received_at >= cutoff && e.received_at <= now)
        .collect()
}

/// Fetch the lookback window and keep what falls inside the threshold window.
/// Order is the provider's (newest first).
pub async fn fetch_candidates(
    mailbox: &dyn MailboxProvider,
    settings: &TriageConfig,
    now: DateTime<Utc>,
) -> MailboxResult<Vec<Email>> {
    let lookback_days = settings.lookback_days.max(settings.days_threshold).max(1);
    let since = days_before(now, lookback_days);
    let fetched = mailbox
        .list_recent_messages(since, settings.max_emails)
        .await?;
    let fetched_count = fetched.len();

    let candidates = within_threshold(
        fetched,
        threshold_cutoff(now, settings.days_threshold),
        now,
    );
    tracing::debug!(
        "Intake: {} fetched, {} within {} days",
        fetched_count,
        candidates.len(),
        settings.days_threshold
    );
    Ok(candidates)
}

/// The first draft that corresponds to the email with identifier `email_id`
pub fn matching_draft<'a>(drafts: &'a [DraftSummary], email_id: &str) -> Option<&'a DraftSummary> {
    let reply_pattern = format!("Re: {}", email_id);
    drafts.iter().find(|draft| {
        draft.subject.contains(email_id)
            || draft.subject.contains(&reply_pattern)
            || draft.in_reply_to.as_deref() == Some(email_id)
    })
}

/// Subjects a reply to `email_id` would carry
pub fn reply_subjects(email_id: &str) -> Vec<String> {
    vec![format!("Re: {}", email_id), format!("RE: {}", email_id)]
}

/// Outcome of duplicate/reply detection for one email
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplyStatus {
    pub has_draft: bool,
    pub has_replies: bool,
}

/// Looks for existing drafts and replies. Failures count as "nothing found".
pub struct ReplyDetector<'a> {
    mailbox: &'a dyn MailboxProvider,
    draft_scan_limit: usize,
}

impl<'a> ReplyDetector<'a> {
    pub fn new(mailbox: &'a dyn MailboxProvider, draft_scan_limit: usize) -> Self {
        Self {
            mailbox,
            draft_scan_limit,
        }
    }

    pub async fn has_draft(&self, email: &Email) -> bool {
        match self.mailbox.list_drafts(self.draft_scan_limit).await {
            Ok(drafts) => match matching_draft(&drafts, &email.id) {
                Some(draft) => {
                    tracing::debug!("Draft {} already answers {}", draft.id, email.id);
                    true
                }
                None => false,
            },
            Err(e) => {
                tracing::warn!("Error checking for draft responses: {}", e);
                false
            }
        }
    }

    pub async fn has_replies(&self, email: &Email) -> bool {
        let subjects = reply_subjects(&email.id);
        match self
            .mailbox
            .list_messages_matching_subject(&subjects, email.received_at, REPLY_LOOKUP_LIMIT)
            .await
        {
            Ok(replies) => match replies.first() {
                Some(reply) => {
                    tracing::debug!(
                        "Reply {} received {} already answers {}",
                        reply.id,
                        reply.received_at,
                        email.id
                    );
                    true
                }
                None => false,
            },
            Err(e) => {
                tracing::warn!("Error checking for replies: {}", e);
                false
            }
        }
    }

    /// Draft check first; the reply search is skipped once a draft is found
    pub async fn status(&self, email: &Email) -> ReplyStatus {
        if self.has_draft(email).await {
            return ReplyStatus {
                has_draft: true,
                has_replies: false,
            };
        }
        ReplyStatus {
            has_draft: false,
            has_replies: self.has_replies(email).await,
        }
    }
}

/// Sender-domain allow-list. Empty accepts everyone.
#[derive(Debug, Clone, Default)]
pub struct DomainGate {
    allowed: Vec<String>,
}

impl DomainGate {
    pub fn new(allowed: Vec<String>) -> Self {
        Self { allowed }
    }

    /// Case-sensitive exact match on the sender's domain
    pub fn allows(&self, email: &Email) -> bool {
        if self.allowed.is_empty() {
            return true;
        }
        let domain = email.sender_domain();
        self.allowed.iter().any(|d| d == domain)
    }
}
