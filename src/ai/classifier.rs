//! Best-effort email-type classification.
//!
//! The label comes from a model call and is never trusted: anything outside
//! the known set, and any failure, becomes [`EmailType::General`].

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::{CompletionProvider, CompletionRequest, prompts};
use crate::constants::{CLASSIFIER_MAX_TOKENS, CLASSIFIER_TEMPERATURE};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum EmailType {
    Inquiry,
    Complaint,
    FollowUp,
    Request,
    #[default]
    General,
}

impl EmailType {
    pub const ALL: [EmailType; 5] = [
        EmailType::Inquiry,
        EmailType::Complaint,
        EmailType::FollowUp,
        EmailType::Request,
        EmailType::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EmailType::Inquiry => "inquiry",
            EmailType::Complaint => "complaint",
            EmailType::FollowUp => "follow-up",
            EmailType::Request => "request",
            EmailType::General => "general",
        }
    }

    /// Interpret raw model output. Tolerates case, surrounding whitespace,
    /// quotes and trailing punctuation; anything else is unrecognized.
    pub fn from_model_output(raw: &str) -> Option<Self> {
        let cleaned = raw
            .trim()
            .trim_matches(|c: char| c == '"' || c == '\'' || c == '.' || c == '`')
            .trim()
            .to_lowercase();
        cleaned.parse().ok()
    }
}

impl fmt::Display for EmailType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmailType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EmailType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown email type: {}", s))
    }
}

/// Classifies email bodies with a constrained completion call
pub struct EmailClassifier {
    provider: Arc<dyn CompletionProvider>,
}

impl EmailClassifier {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self { provider }
    }

    pub async fn classify(&self, content: &str) -> EmailType {
        let request = CompletionRequest {
            system: None,
            user: prompts::classification_prompt(content),
            max_tokens: CLASSIFIER_MAX_TOKENS,
            temperature: CLASSIFIER_TEMPERATURE,
        };

        match self.provider.complete(&request).await {
            Ok(raw) => EmailType::from_model_output(&raw).unwrap_or_else(|| {
                tracing::debug!("Unrecognized email type '{}', using general", raw.trim());
                EmailType::General
            }),
            Err(e) => {
                tracing::warn!("Error analyzing email type: {}", e);
                EmailType::General
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::fake::FakeCompletion;

    #[test]
    fn test_parse_model_output() {
        assert_eq!(EmailType::from_model_output("inquiry"), Some(EmailType::Inquiry));
        assert_eq!(
            EmailType::from_model_output("  Follow-Up.\n"),
            Some(EmailType::FollowUp)
        );
        assert_eq!(
            EmailType::from_model_output("\"complaint\""),
            Some(EmailType::Complaint)
        );
        assert_eq!(EmailType::from_model_output("spam"), None);
        assert_eq!(EmailType::from_model_output("type: request"), None);
    }

    #[test]
    fn test_display_round_trips_labels() {
        for t in EmailType::ALL {
            assert_eq!(t.to_string().parse::<EmailType>(), Ok(t));
        }
    }

    #[tokio::test]
    async fn test_classify_uses_constrained_request() {
        let provider = Arc::new(FakeCompletion::replying("Request"));
        let classifier = EmailClassifier::new(provider.clone());

        assert_eq!(classifier.classify("Please send the file").await, EmailType::Request);

        let request = provider.last_request().unwrap();
        assert_eq!(request.max_tokens, CLASSIFIER_MAX_TOKENS);
        assert_eq!(request.temperature, CLASSIFIER_TEMPERATURE);
        assert!(request.user.contains("Please send the file"));
    }

    #[tokio::test]
    async fn test_unrecognized_output_defaults_to_general() {
        let classifier =
            EmailClassifier::new(Arc::new(FakeCompletion::replying("I think it's a question")));
        assert_eq!(classifier.classify("hello").await, EmailType::General);
    }

    #[tokio::test]
    async fn test_failure_defaults_to_general() {
        let classifier = EmailClassifier::new(Arc::new(FakeCompletion::failing()));
        assert_eq!(classifier.classify("hello").await, EmailType::General);
    }
}
