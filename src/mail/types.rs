use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Content type of an email body as reported by the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyType {
    #[default]
    Text,
    Html,
}

/// A message fetched from the mailbox. Immutable for the duration of a scan.
#[derive(Debug, Clone)]
pub struct Email {
    /// Provider-assigned opaque identifier
    pub id: String,
    pub subject: String,
    pub sender: String,
    pub body: String,
    pub body_type: BodyType,
    pub received_at: DateTime<Utc>,
    pub is_read: bool,
}

impl Email {
    /// Substring after the last `@` of the sender address
    pub fn sender_domain(&self) -> &str {
        self.sender.rsplit('@').next().unwrap_or_default()
    }

    /// Whole days elapsed between receipt and `now`, never negative
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.received_at).num_days().max(0)
    }

    /// Body suitable for a prompt.
    /// HTML bodies are rendered to plain text, text bodies pass through untouched.
    pub fn prompt_body(&self) -> String {
        match self.body_type {
            BodyType::Text => self.body.clone(),
            BodyType::Html => strip_html_tags(&self.body),
        }
    }

    /// Subject for a draft replying to this email
    pub fn reply_subject(&self) -> String {
        format!("Re: {}", self.subject)
    }
}

/// Convert HTML to readable plain text
fn strip_html_tags(html: &str) -> String {
    html2text::from_read(html.as_bytes(), 100).unwrap_or_else(|_| html.to_string())
}

/// An existing draft as seen by the duplicate detector
#[derive(Debug, Clone)]
pub struct DraftSummary {
    pub id: String,
    pub subject: String,
    /// Identifier of the message this draft was created for, when the
    /// provider stored one
    pub in_reply_to: Option<String>,
}

/// Minimal view of a message returned by subject searches
#[derive(Debug, Clone)]
pub struct MessageRef {
    pub id: String,
    pub received_at: DateTime<Utc>,
}

/// A reply draft to be persisted by the provider
#[derive(Debug, Clone)]
pub struct DraftRequest {
    pub subject: String,
    pub html_body: String,
    pub recipients: Vec<String>,
    /// Identifier of the email being answered, stored with the draft
    pub in_reply_to: Option<String>,
}

impl DraftRequest {
    /// Build the reply draft for `original` from generated plain text
    pub fn reply_to(original: &Email, text: &str) -> Self {
        Self {
            subject: original.reply_subject(),
            html_body: text_to_html(text),
            recipients: vec![original.sender.clone()],
            in_reply_to: Some(original.id.clone()),
        }
    }
}

/// Escape plain text and keep its line structure in HTML
pub fn text_to_html(text: &str) -> String {
    let mut html = String::with_capacity(text.len() + 16);
    for (i, line) in text.lines().enumerate() {
        if i > 0 {
            html.push_str("<br>\n");
        }
        for c in line.chars() {
            match c {
                '&' => html.push_str("&amp;"),
                '<' => html.push_str("&lt;"),
                '>' => html.push_str("&gt;"),
                '"' => html.push_str("&quot;"),
                _ => html.push(c),
            }
        }
    }
    html
}
