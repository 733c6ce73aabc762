//! System prompts and prompt builders

use chrono::{DateTime, Utc};

use crate::mail::types::Email;

/// System prompt for drafting without training data
pub const DEFAULT_DRAFT_SYSTEM: &str = "You are a professional email assistant that writes clear, polite, and professional email responses.";

/// System prompt for drafting guided by training examples and templates
pub const TRAINED_DRAFT_SYSTEM: &str = "You are a professional email assistant that learns from training examples and templates.";

/// Email fields shared by every drafting prompt
pub struct EmailView<'a> {
    pub sender: &'a str,
    pub subject: &'a str,
    pub received_at: DateTime<Utc>,
    pub body: String,
    pub age_days: i64,
}

impl<'a> EmailView<'a> {
    pub fn new(email: &'a Email, now: DateTime<Utc>) -> Self {
        Self {
            sender: &email.sender,
            subject: &email.subject,
            received_at: email.received_at,
            body: email.prompt_body(),
            age_days: email.age_days(now),
        }
    }

    fn received(&self) -> String {
        self.received_at.format("%Y-%m-%d %H:%M").to_string()
    }
}

/// Prompt used when no training context is available.
/// Same-day emails get no apology; older ones apologize for the exact delay.
pub fn default_reply_prompt(email: &EmailView<'_>) -> String {
    if email.age_days == 0 {
        format!(
            r#"You are a professional email assistant. Generate a polite and professional response to the following email that was received today.

Original Email:
From: {}
Subject: {}
Received: {}

Content:
{}

Please generate a response that:
1. Acknowledges the email promptly
2. Addresses any questions or concerns raised in the original email
3. Maintains a professional and courteous tone
4. Is concise but comprehensive
5. Includes a proper greeting and closing

Response:"#,
            email.sender,
            email.subject,
            email.received(),
            email.body
        )
    } else {
        let days = day_count(email.age_days);
        format!(
            r#"You are a professional email assistant. Generate a polite and professional response to the following email that was received {days} ago.

Original Email:
From: {}
Subject: {}
Received: {}
Age: {days} old

Content:
{}

Please generate a response that:
1. Acknowledges the delay in responding (since the email is {days} old)
2. Apologizes for the {days} delay in responding
3. Addresses any questions or concerns raised in the original email
4. Maintains a professional and courteous tone
5. Is concise but comprehensive
6. Includes a proper greeting and closing

Response:"#,
            email.sender,
            email.subject,
            email.received(),
            email.body
        )
    }
}

/// Prompt combining the email with training examples and templates
pub fn trained_reply_prompt(
    email: &EmailView<'_>,
    examples_block: &str,
    templates_block: &str,
    email_type: &str,
    tone: &str,
) -> String {
    format!(
        r#"You are a professional email assistant. Generate a response to the following email.

{examples_block}
{templates_block}
Original Email:
From: {}
Subject: {}
Received: {}

Content:
{}

Email Age: {} old
Email Type: {email_type}
Desired Tone: {tone}

Please generate a response that:
1. Acknowledges the delay if the email is old, in proportion to its age
2. Addresses the content appropriately
3. Matches the tone and style of the training examples
4. Uses templates as guidance when applicable
5. Is professional and courteous

Response:"#,
        email.sender,
        email.subject,
        email.received(),
        email.body,
        day_count(email.age_days),
    )
}

/// Prompt asking for a single email-type label
pub fn classification_prompt(content: &str) -> String {
    format!(
        r#"Analyze this email and classify it into one of these types:
- inquiry (asking for information)
- complaint (expressing dissatisfaction)
- follow-up (checking on previous communication)
- request (asking for action)
- general (general communication)

Email content:
{}

Respond with just the type (e.g., "inquiry"):"#,
        content
    )
}

fn day_count(days: i64) -> String {
    if days == 1 {
        "1 day".to_string()
    } else {
        format!("{} days", days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn view(age_days: i64) -> EmailView<'static> {
        EmailView {
            sender: "jane@a.com",
            subject: "Contract renewal",
            received_at: Utc.with_ymd_and_hms(2024, 5, 10, 9, 15, 0).unwrap(),
            body: "Are we renewing?".to_string(),
            age_days,
        }
    }

    #[test]
    fn test_same_day_prompt_has_no_apology() {
        let prompt = default_reply_prompt(&view(0));
        assert!(prompt.contains("received today"));
        assert!(prompt.contains("From: jane@a.com"));
        assert!(prompt.contains("Received: 2024-05-10 09:15"));
        assert!(prompt.contains("Are we renewing?"));
        assert!(!prompt.contains("Apologizes"));
    }

    #[test]
    fn test_old_email_prompt_states_exact_delay() {
        let prompt = default_reply_prompt(&view(3));
        assert!(prompt.contains("received 3 days ago"));
        assert!(prompt.contains("Apologizes for the 3 days delay"));
        assert!(!prompt.contains("received today"));

        let prompt = default_reply_prompt(&view(1));
        assert!(prompt.contains("received 1 day ago"));
    }

    #[test]
    fn test_trained_prompt_includes_context_blocks() {
        let prompt = trained_reply_prompt(
            &view(2),
            "Based on these training examples",
            "Use these response templates",
            "inquiry",
            "friendly",
        );
        assert!(prompt.contains("Based on these training examples"));
        assert!(prompt.contains("Use these response templates"));
        assert!(prompt.contains("Email Age: 2 days old"));
        assert!(prompt.contains("Email Type: inquiry"));
        assert!(prompt.contains("Desired Tone: friendly"));
        assert!(prompt.contains("Subject: Contract renewal"));
    }

    #[test]
    fn test_classification_prompt_lists_labels() {
        let prompt = classification_prompt("Where is my order?");
        for label in ["inquiry", "complaint", "follow-up", "request", "general"] {
            assert!(prompt.contains(label));
        }
        assert!(prompt.contains("Where is my order?"));
    }
}
