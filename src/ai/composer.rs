//! Reply composers.
//!
//! [`DefaultComposer`] uses fixed instructions. [`TrainedComposer`] adds the
//! user's examples and templates and falls back to the fixed instructions when
//! the training data has nothing relevant. Which one runs is decided once at
//! startup from configuration.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::classifier::EmailClassifier;
use super::prompts::{self, EmailView};
use super::{CompletionProvider, CompletionRequest};
use crate::constants::DRAFT_TEMPERATURE;
use crate::mail::types::Email;
use crate::training::TrainingSet;

/// Turns an email into drafted reply text.
///
/// An `Err` means no draft was produced for this email.
#[async_trait]
pub trait Composer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn compose(&self, email: &Email, now: DateTime<Utc>) -> Result<String>;
}

/// Send one drafting request and return the trimmed text
async fn generate(
    provider: &dyn CompletionProvider,
    system: &str,
    user: String,
    max_tokens: u32,
) -> Result<String> {
    let request = CompletionRequest {
        system: Some(system.to_string()),
        user,
        max_tokens,
        temperature: DRAFT_TEMPERATURE,
    };
    let text = provider.complete(&request).await?;
    let text = text.trim();
    if text.is_empty() {
        anyhow::bail!("Completion returned empty text");
    }
    Ok(text.to_string())
}

pub struct DefaultComposer {
    provider: Arc<dyn CompletionProvider>,
    max_tokens: u32,
}

impl DefaultComposer {
    pub fn new(provider: Arc<dyn CompletionProvider>, max_tokens: u32) -> Self {
        Self {
            provider,
            max_tokens,
        }
    }
}

#[async_trait]
impl Composer for DefaultComposer {
    fn name(&self) -> &'static str {
        "default"
    }

    async fn compose(&self, email: &Email, now: DateTime<Utc>) -> Result<String> {
        let view = EmailView::new(email, now);
        let draft = generate(
            self.provider.as_ref(),
            prompts::DEFAULT_DRAFT_SYSTEM,
            prompts::default_reply_prompt(&view),
            self.max_tokens,
        )
        .await?;
        tracing::info!(
            "Generated response for {}-day-old email: {}",
            view.age_days,
            email.subject
        );
        Ok(draft)
    }
}

pub struct TrainedComposer {
    provider: Arc<dyn CompletionProvider>,
    classifier: EmailClassifier,
    training: TrainingSet,
    tone: String,
    max_tokens: u32,
}

impl TrainedComposer {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        classifier: EmailClassifier,
        training: TrainingSet,
        tone: String,
        max_tokens: u32,
    ) -> Self {
        Self {
            provider,
            classifier,
            training,
            tone,
            max_tokens,
        }
    }

    /// Draft a reply for an explicit type and tone.
    ///
    /// When neither examples nor templates match, the fixed instructions are
    /// used instead (with the same-day / delayed branch).
    pub async fn compose_with(
        &self,
        email: &Email,
        now: DateTime<Utc>,
        email_type: Option<&str>,
        tone: Option<&str>,
    ) -> Result<String> {
        let view = EmailView::new(email, now);
        let context = self.training.context(email_type, tone);

        if context.is_empty() {
            tracing::debug!(
                "No training data for type {:?} / tone {:?}, using default instructions",
                email_type,
                tone
            );
            return generate(
                self.provider.as_ref(),
                prompts::DEFAULT_DRAFT_SYSTEM,
                prompts::default_reply_prompt(&view),
                self.max_tokens,
            )
            .await;
        }

        let prompt = prompts::trained_reply_prompt(
            &view,
            &context.examples,
            &context.templates,
            email_type.unwrap_or("general"),
            tone.unwrap_or("professional"),
        );
        generate(
            self.provider.as_ref(),
            prompts::TRAINED_DRAFT_SYSTEM,
            prompt,
            self.max_tokens,
        )
        .await
    }
}

#[async_trait]
impl Composer for TrainedComposer {
    fn name(&self) -> &'static str {
        "trained"
    }

    async fn compose(&self, email: &Email, now: DateTime<Utc>) -> Result<String> {
        let email_type = self.classifier.classify(&email.prompt_body()).await;
        let draft = self
            .compose_with(email, now, Some(email_type.as_str()), Some(&self.tone))
            .await?;
        tracing::info!(
            "Generated customized response for {}-day-old {} email: {}",
            email.age_days(now),
            email_type,
            email.subject
        );
        Ok(draft)
    }
}
