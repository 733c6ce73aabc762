//! One scan: intake, triage, compose, create drafts.
//!
//! The pipeline is an explicitly constructed value holding its collaborators.
//! Emails are handled one at a time in intake order; a failure on one email
//! is recorded and the scan moves on.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::ai::Composer;
use crate::config::TriageConfig;
use crate::mail::provider::MailboxProvider;
use crate::mail::types::{DraftRequest, Email};
use crate::triage::{self, DomainGate, ReplyDetector};

/// Outcome of a single scan. `success` means the scan ran to completion,
/// not that every email got a draft.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ProcessingResult {
    pub success: bool,
    pub processed_count: usize,
    pub errors: Vec<String>,
    pub message: String,
}

/// Why an email was passed over without drafting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Skip {
    Domain,
    HasDraft,
    HasReplies,
}

pub struct Pipeline {
    mailbox: Arc<dyn MailboxProvider>,
    composer: Arc<dyn Composer>,
    triage: TriageConfig,
    gate: DomainGate,
    mark_as_read: bool,
}

impl Pipeline {
    pub fn new(
        mailbox: Arc<dyn MailboxProvider>,
        composer: Arc<dyn Composer>,
        triage: TriageConfig,
        mark_as_read: bool,
    ) -> Self {
        let gate = DomainGate::new(triage.allowed_domains());
        Self {
            mailbox,
            composer,
            triage,
            gate,
            mark_as_read,
        }
    }

    pub fn composer_name(&self) -> &'static str {
        self.composer.name()
    }

    pub async fn process_emails(&self) -> ProcessingResult {
        self.process_emails_at(Utc::now()).await
    }

    pub async fn process_emails_at(&self, now: DateTime<Utc>) -> ProcessingResult {
        let mut result = ProcessingResult::default();
        tracing::info!("Starting email processing cycle");

        if let Err(e) = self.mailbox.authenticate().await {
            tracing::error!("Mailbox authentication failed: {}", e);
            result.message = format!("Failed to authenticate with mailbox: {}", e);
            return result;
        }

        let candidates =
            match triage::fetch_candidates(self.mailbox.as_ref(), &self.triage, now).await {
                Ok(candidates) => candidates,
                Err(e) if e.is_authentication() => {
                    tracing::error!("Mailbox authentication failed: {}", e);
                    result.message = format!("Failed to authenticate with mailbox: {}", e);
                    return result;
                }
                Err(e) => {
                    tracing::warn!("Error fetching emails: {}", e);
                    result.errors.push(format!("Failed to fetch emails: {}", e));
                    Vec::new()
                }
            };

        result.success = true;
        if candidates.is_empty() {
            result.message = "No emails found needing replies".to_string();
            tracing::info!("{}", result.message);
            return result;
        }

        let detector = ReplyDetector::new(self.mailbox.as_ref(), self.triage.draft_scan_limit);
        for email in &candidates {
            if let Some(skip) = self.skip_reason(&detector, email).await {
                match skip {
                    Skip::Domain => tracing::info!(
                        "Skipping email from {} (domain {} not in allowed list)",
                        email.sender,
                        email.sender_domain()
                    ),
                    Skip::HasDraft => {
                        tracing::debug!("Skipping '{}': draft already exists", email.subject)
                    }
                    Skip::HasReplies => {
                        tracing::debug!("Skipping '{}': already replied", email.subject)
                    }
                }
                continue;
            }

            match self.draft_reply(email, now).await {
                Ok(()) => {
                    result.processed_count += 1;
                    tracing::info!("Successfully processed email: {}", email.subject);
                }
                Err(message) => {
                    tracing::error!("{}", message);
                    result.errors.push(message);
                }
            }
        }

        result.message = format!(
            "Email processing cycle completed. Processed {} emails.",
            result.processed_count
        );
        tracing::info!(
            "{} ({} candidates, {} errors)",
            result.message,
            candidates.len(),
            result.errors.len()
        );
        result
    }

    /// The domain gate is checked first since it needs no provider calls
    async fn skip_reason(&self, detector: &ReplyDetector<'_>, email: &Email) -> Option<Skip> {
        if !self.gate.allows(email) {
            return Some(Skip::Domain);
        }
        let status = detector.status(email).await;
        if status.has_draft {
            Some(Skip::HasDraft)
        } else if status.has_replies {
            Some(Skip::HasReplies)
        } else {
            None
        }
    }

    /// Compose and store one draft. The error is the message recorded in the
    /// scan result.
    async fn draft_reply(&self, email: &Email, now: DateTime<Utc>) -> Result<(), String> {
        let text = self.composer.compose(email, now).await.map_err(|e| {
            tracing::warn!("Composer '{}' failed: {:#}", self.composer.name(), e);
            format!(
                "Failed to generate draft response for email: {}",
                email.subject
            )
        })?;

        let draft = DraftRequest::reply_to(email, &text);
        self.mailbox.create_draft(&draft).await.map_err(|e| {
            tracing::warn!("Draft creation failed: {}", e);
            format!("Failed to create draft for email: {}", email.subject)
        })?;

        if self.mark_as_read
            && !email.is_read
            && let Err(e) = self.mailbox.mark_as_read(&email.id).await
        {
            tracing::warn!("Failed to mark email as read: {}", e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::fake::FakeCompletion;
    use crate::ai::{DefaultComposer, EmailClassifier, TrainedComposer};
    use crate::mail::provider::fake::FakeMailbox;
    use crate::mail::types::BodyType;
    use crate::training::TrainingSet;
    use crate::training::tests::example;
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::Ordering;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap()
    }

    fn make_email(id: &str, subject: &str, sender: &str, age: Duration) -> Email {
        Email {
            id: id.to_string(),
            subject: subject.to_string(),
            sender: sender.to_string(),
            body: format!("Body of {}", subject),
            body_type: BodyType::Text,
            received_at: now() - age,
            is_read: false,
        }
    }

    fn pipeline(
        mailbox: Arc<FakeMailbox>,
        provider: Arc<FakeCompletion>,
        triage: TriageConfig,
    ) -> Pipeline {
        Pipeline::new(
            mailbox,
            Arc::new(DefaultComposer::new(provider, 500)),
            triage,
            false,
        )
    }

    #[tokio::test]
    async fn test_authentication_failure_is_terminal() {
        let mailbox = Arc::new(FakeMailbox::with_messages(vec![make_email(
            "AAMk1",
            "Hello",
            "x@a.com",
            Duration::hours(1),
        )]));
        mailbox.fail_auth.store(true, Ordering::SeqCst);
        let provider = Arc::new(FakeCompletion::replying("Hi"));

        let result = pipeline(mailbox.clone(), provider.clone(), TriageConfig::default())
            .process_emails_at(now())
            .await;

        assert!(!result.success);
        assert_eq!(result.processed_count, 0);
        assert!(result.message.contains("authenticate"));
        assert_eq!(provider.call_count(), 0);
        assert_eq!(mailbox.created_count(), 0);
    }

    #[tokio::test]
    async fn test_intake_failure_degrades_to_empty_scan() {
        let mailbox = Arc::new(FakeMailbox::default());
        mailbox.fail_listing.store(true, Ordering::SeqCst);
        let provider = Arc::new(FakeCompletion::replying("Hi"));

        let result = pipeline(mailbox, provider, TriageConfig::default())
            .process_emails_at(now())
            .await;

        assert!(result.success);
        assert_eq!(result.processed_count, 0);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.message, "No emails found needing replies");
    }

    #[tokio::test]
    async fn test_same_day_email_without_training_data() {
        let email = make_email("AAMk1", "Quick question", "x@a.com", Duration::hours(2));
        let mailbox = Arc::new(FakeMailbox::with_messages(vec![email]));
        let provider = Arc::new(FakeCompletion::replying("\n  Happy to help.\nBest  \n\n"));

        let result = pipeline(mailbox.clone(), provider.clone(), TriageConfig::default())
            .process_emails_at(now())
            .await;

        assert!(result.success);
        assert_eq!(result.processed_count, 1);
        assert!(result.errors.is_empty());

        let request = provider.last_request().unwrap();
        assert!(request.user.contains("received today"));
        assert!(!request.user.contains("Apologizes"));

        let created = mailbox.created.lock().unwrap();
        assert_eq!(created[0].subject, "Re: Quick question");
        assert_eq!(created[0].recipients, vec!["x@a.com".to_string()]);
        assert_eq!(created[0].html_body, "Happy to help.<br>\nBest");
        assert_eq!(created[0].in_reply_to.as_deref(), Some("AAMk1"));
    }

    #[tokio::test]
    async fn test_three_day_old_email_gets_delay_apology() {
        let email = make_email(
            "AAMk1",
            "Contract review",
            "x@a.com",
            Duration::days(3) + Duration::hours(2),
        );
        let mailbox = Arc::new(FakeMailbox::with_messages(vec![email]));
        let provider = Arc::new(FakeCompletion::replying("Sorry for the wait."));
        let triage = TriageConfig {
            days_threshold: 4,
            ..TriageConfig::default()
        };

        let result = pipeline(mailbox, provider.clone(), triage)
            .process_emails_at(now())
            .await;

        assert_eq!(result.processed_count, 1);
        let request = provider.last_request().unwrap();
        assert!(request.user.contains("Apologizes for the 3 days delay"));
    }

    #[tokio::test]
    async fn test_one_generation_failure_among_three() {
        let mailbox = Arc::new(FakeMailbox::with_messages(vec![
            make_email("AAMk1", "First", "x@a.com", Duration::hours(1)),
            make_email("AAMk2", "Second", "x@a.com", Duration::hours(2)),
            make_email("AAMk3", "Third", "x@a.com", Duration::hours(3)),
        ]));
        let provider = Arc::new(FakeCompletion::new(|request| {
            if request.user.contains("Subject: Second") {
                Err(anyhow::anyhow!("rate limited"))
            } else {
                Ok("Thanks".to_string())
            }
        }));

        let result = pipeline(mailbox.clone(), provider, TriageConfig::default())
            .process_emails_at(now())
            .await;

        assert!(result.success);
        assert_eq!(result.processed_count, 2);
        assert_eq!(
            result.errors,
            vec!["Failed to generate draft response for email: Second".to_string()]
        );
        assert_eq!(mailbox.created_count(), 2);
        assert_eq!(
            result.message,
            "Email processing cycle completed. Processed 2 emails."
        );
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let mailbox = Arc::new(FakeMailbox::with_messages(vec![
            make_email("AAMk1", "First", "x@a.com", Duration::hours(1)),
            make_email("AAMk2", "Second", "y@b.com", Duration::days(1)),
        ]));
        let provider = Arc::new(FakeCompletion::replying("Thanks"));
        let pipeline = pipeline(mailbox.clone(), provider, TriageConfig::default());

        let first = pipeline.process_emails_at(now()).await;
        assert_eq!(first.processed_count, 2);

        let second = pipeline.process_emails_at(now()).await;
        assert!(second.success);
        assert_eq!(second.processed_count, 0);
        assert!(second.errors.is_empty());
        assert_eq!(mailbox.created_count(), 2);
    }

    #[tokio::test]
    async fn test_existing_draft_or_reply_skips_generation() {
        let received = Duration::days(1);
        let mailbox = Arc::new(FakeMailbox::with_messages(vec![
            make_email("AAMk1", "Drafted", "x@a.com", received),
            make_email("AAMk2", "Answered", "x@a.com", received),
            // The reply itself comes from outside the allow-list
            make_email("AAMk9", "RE: AAMk2", "me@c.com", Duration::hours(1)),
        ]));
        mailbox.add_draft("Re: AAMk1", None);
        let provider = Arc::new(FakeCompletion::replying("Thanks"));
        let triage = TriageConfig {
            allowed_domains: "a.com".to_string(),
            ..TriageConfig::default()
        };

        let result = pipeline(mailbox.clone(), provider.clone(), triage)
            .process_emails_at(now())
            .await;

        assert!(result.success);
        assert_eq!(result.processed_count, 0);
        assert!(result.errors.is_empty());
        assert_eq!(provider.call_count(), 0);
        assert_eq!(mailbox.created_count(), 0);
    }

    #[tokio::test]
    async fn test_domain_gate_and_threshold_window() {
        let mailbox = Arc::new(FakeMailbox::with_messages(vec![
            make_email("AAMk1", "Allowed", "x@a.com", Duration::hours(1)),
            make_email("AAMk2", "Blocked", "x@c.com", Duration::hours(1)),
            make_email("AAMk3", "Edge", "x@b.com", Duration::days(4)),
            make_email("AAMk4", "Stale", "x@a.com", Duration::days(4) + Duration::minutes(1)),
        ]));
        let provider = Arc::new(FakeCompletion::replying("Thanks"));
        let triage = TriageConfig {
            allowed_domains: "a.com, b.com".to_string(),
            ..TriageConfig::default()
        };

        let result = pipeline(mailbox.clone(), provider, triage)
            .process_emails_at(now())
            .await;

        assert_eq!(result.processed_count, 2);
        let subjects: Vec<String> = mailbox
            .created
            .lock()
            .unwrap()
            .iter()
            .map(|d| d.subject.clone())
            .collect();
        assert_eq!(subjects, vec!["Re: Allowed", "Re: Edge"]);
    }

    #[tokio::test]
    async fn test_draft_creation_failure_is_recorded() {
        let mailbox = Arc::new(FakeMailbox::with_messages(vec![make_email(
            "AAMk1",
            "Invoice",
            "x@a.com",
            Duration::hours(1),
        )]));
        mailbox.fail_create.store(true, Ordering::SeqCst);
        let provider = Arc::new(FakeCompletion::replying("Thanks"));

        let result = pipeline(mailbox, provider, TriageConfig::default())
            .process_emails_at(now())
            .await;

        assert!(result.success);
        assert_eq!(result.processed_count, 0);
        assert_eq!(
            result.errors,
            vec!["Failed to create draft for email: Invoice".to_string()]
        );
    }

    #[tokio::test]
    async fn test_mark_as_read_after_draft() {
        let mailbox = Arc::new(FakeMailbox::with_messages(vec![make_email(
            "AAMk1",
            "Invoice",
            "x@a.com",
            Duration::hours(1),
        )]));
        let provider = Arc::new(FakeCompletion::replying("Thanks"));
        let pipeline = Pipeline::new(
            mailbox.clone(),
            Arc::new(DefaultComposer::new(provider, 500)),
            TriageConfig::default(),
            true,
        );

        pipeline.process_emails_at(now()).await;
        assert_eq!(*mailbox.marked_read.lock().unwrap(), vec!["AAMk1".to_string()]);
    }

    #[tokio::test]
    async fn test_already_read_email_is_not_marked_again() {
        let read = Email {
            is_read: true,
            ..make_email("AAMk2", "Seen already", "x@a.com", Duration::hours(2))
        };
        let mailbox = Arc::new(FakeMailbox::with_messages(vec![
            make_email("AAMk1", "Invoice", "x@a.com", Duration::hours(1)),
            read,
        ]));
        let provider = Arc::new(FakeCompletion::replying("Thanks"));
        let pipeline = Pipeline::new(
            mailbox.clone(),
            Arc::new(DefaultComposer::new(provider, 500)),
            TriageConfig::default(),
            true,
        );

        let result = pipeline.process_emails_at(now()).await;
        assert_eq!(result.processed_count, 2);
        assert_eq!(*mailbox.marked_read.lock().unwrap(), vec!["AAMk1".to_string()]);
    }

    #[tokio::test]
    async fn test_trained_composer_in_pipeline() {
        let mailbox = Arc::new(FakeMailbox::with_messages(vec![make_email(
            "AAMk1",
            "Where is my order",
            "x@a.com",
            Duration::days(2),
        )]));
        let provider = Arc::new(FakeCompletion::new(|request| {
            if request.system.is_none() {
                Ok("complaint".to_string())
            } else {
                Ok("We are sorry.".to_string())
            }
        }));
        let composer = TrainedComposer::new(
            provider.clone(),
            EmailClassifier::new(provider.clone()),
            TrainingSet::new(vec![example("complaint", "professional", "late")], Vec::new()),
            "professional".to_string(),
            500,
        );
        let pipeline = Pipeline::new(
            mailbox.clone(),
            Arc::new(composer),
            TriageConfig::default(),
            false,
        );
        assert_eq!(pipeline.composer_name(), "trained");

        let result = pipeline.process_emails_at(now()).await;
        assert_eq!(result.processed_count, 1);
        let request = provider.last_request().unwrap();
        assert!(request.user.contains("original late"));
        assert!(request.user.contains("Email Age: 2 days old"));
    }

    #[test]
    fn test_result_serializes_as_json() {
        let result = ProcessingResult {
            success: true,
            processed_count: 2,
            errors: vec!["Failed to create draft for email: X".to_string()],
            message: "done".to_string(),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["processed_count"], 2);
        assert_eq!(json["errors"][0], "Failed to create draft for email: X");
    }
}
