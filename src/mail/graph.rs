//! Microsoft Graph mailbox using the OAuth2 client-credentials flow

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::sync::Mutex;

use super::provider::{MailboxError, MailboxProvider, MailboxResult};
use super::types::{BodyType, DraftRequest, DraftSummary, Email, MessageRef};
use crate::config::MailboxConfig;
use crate::constants::TOKEN_EXPIRY_MARGIN_SECS;

const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";
const GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";

/// Internet-header named property holding the id of the answered message.
/// Lets the duplicate detector recognize our own drafts without relying on
/// the subject line.
const CORRELATION_PROPERTY: &str =
    "String {00020386-0000-0000-C000-000000000046} Name X-Redraft-Source";

const MESSAGE_FIELDS: &str = "id,subject,from,body,receivedDateTime,isRead";

/// Error bodies are cut to this many characters before logging
const MAX_ERROR_BODY_LEN: usize = 200;

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

#[derive(Deserialize)]
struct TokenError {
    error: String,
    error_description: Option<String>,
}

#[derive(Deserialize)]
struct GraphList<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphMessage {
    id: String,
    subject: Option<String>,
    from: Option<GraphRecipient>,
    body: Option<GraphBody>,
    received_date_time: Option<String>,
    #[serde(default)]
    is_read: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphRecipient {
    email_address: GraphEmailAddress,
}

#[derive(Deserialize)]
struct GraphEmailAddress {
    address: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphBody {
    content_type: Option<String>,
    content: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphDraft {
    id: String,
    subject: Option<String>,
    #[serde(default)]
    single_value_extended_properties: Vec<GraphExtendedProperty>,
}

#[derive(Deserialize)]
struct GraphExtendedProperty {
    id: String,
    value: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphMessageRef {
    id: String,
    received_date_time: String,
}

/// Graph client for a single mailbox
pub struct GraphClient {
    client: Client,
    tenant_id: String,
    client_id: String,
    client_secret: String,
    /// `me` or `users/{upn}`
    mailbox_path: String,
    folder: String,
    token: Mutex<Option<AccessToken>>,
}

impl GraphClient {
    pub fn new(config: &MailboxConfig, timeout: std::time::Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        let mailbox_path = match config.user.as_deref().map(str::trim) {
            Some(user) if !user.is_empty() => format!("users/{}", user),
            _ => "me".to_string(),
        };

        Ok(Self {
            client,
            tenant_id: config.tenant_id.clone().unwrap_or_default(),
            client_id: config.client_id.clone().unwrap_or_default(),
            client_secret: config.client_secret.clone().unwrap_or_default(),
            mailbox_path,
            folder: config.folder.clone(),
            token: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}/{}", GRAPH_API_BASE, self.mailbox_path, path)
    }

    async fn fetch_token(&self) -> MailboxResult<AccessToken> {
        let token_url = format!(
            "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
            self.tenant_id
        );

        let response = self
            .client
            .post(&token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", GRAPH_SCOPE),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await
            .map_err(|e| MailboxError::Authentication(format!("token request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| MailboxError::Authentication(format!("token response unreadable: {}", e)))?;

        if !status.is_success() {
            let reason = serde_json::from_str::<TokenError>(&body)
                .map(|e| e.error_description.unwrap_or(e.error))
                .unwrap_or_else(|_| truncate(&body).to_string());
            return Err(MailboxError::Authentication(format!("{}: {}", status, reason)));
        }

        let payload: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| MailboxError::Authentication(format!("invalid token response: {}", e)))?;

        Ok(AccessToken {
            value: payload.access_token,
            expires_at: Utc::now()
                + Duration::seconds(payload.expires_in.saturating_sub(TOKEN_EXPIRY_MARGIN_SECS)),
        })
    }

    /// Cached token, refreshed when it is about to expire
    async fn access_token(&self) -> MailboxResult<String> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref()
            && token.expires_at > Utc::now()
        {
            return Ok(token.value.clone());
        }

        let fresh = self.fetch_token().await?;
        let value = fresh.value.clone();
        *guard = Some(fresh);
        Ok(value)
    }

    async fn send(&self, request: RequestBuilder) -> MailboxResult<String> {
        let token = self.access_token().await?;
        let response = request
            .bearer_auth(token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| MailboxError::Request(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status == StatusCode::UNAUTHORIZED {
            // Force a fresh token on the next call
            *self.token.lock().await = None;
            return Err(MailboxError::Authentication(format!(
                "Graph rejected token: {}",
                truncate(&body)
            )));
        }
        if !status.is_success() {
            return Err(MailboxError::Request(format!(
                "Graph returned {}: {}",
                status,
                truncate(&body)
            )));
        }
        Ok(body)
    }

    async fn get_list<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> MailboxResult<Vec<T>> {
        let body = self.send(request).await?;
        let list: GraphList<T> =
            serde_json::from_str(&body).map_err(|e| MailboxError::Decode(e.to_string()))?;
        Ok(list.value)
    }
}

#[async_trait]
impl MailboxProvider for GraphClient {
    async fn authenticate(&self) -> MailboxResult<()> {
        self.access_token().await?;
        tracing::info!("Authenticated with Microsoft Graph");
        Ok(())
    }

    async fn list_recent_messages(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> MailboxResult<Vec<Email>> {
        let url = self.url(&format!("mailFolders/{}/messages", self.folder));
        let request = self.client.get(url).query(&[
            ("$filter", format!("receivedDateTime ge {}", odata_datetime(since))),
            ("$select", MESSAGE_FIELDS.to_string()),
            ("$orderby", "receivedDateTime desc".to_string()),
            ("$top", limit.to_string()),
        ]);

        let messages: Vec<GraphMessage> = self.get_list(request).await?;
        let emails: Vec<Email> = messages
            .into_iter()
            .filter_map(|message| match map_message(message) {
                Ok(email) => Some(email),
                Err(e) => {
                    tracing::warn!("Skipping unreadable message: {}", e);
                    None
                }
            })
            .collect();

        tracing::info!("Retrieved {} emails from {}", emails.len(), self.folder);
        Ok(emails)
    }

    async fn list_drafts(&self, limit: usize) -> MailboxResult<Vec<DraftSummary>> {
        let request = self.client.get(self.url("mailFolders/Drafts/messages")).query(&[
            ("$select", "id,subject".to_string()),
            ("$orderby", "lastModifiedDateTime desc".to_string()),
            ("$top", limit.to_string()),
            (
                "$expand",
                format!(
                    "singleValueExtendedProperties($filter=id eq {})",
                    odata_quote(CORRELATION_PROPERTY)
                ),
            ),
        ]);

        let drafts: Vec<GraphDraft> = self.get_list(request).await?;
        Ok(drafts
            .into_iter()
            .map(|draft| DraftSummary {
                in_reply_to: draft
                    .single_value_extended_properties
                    .into_iter()
                    .find(|p| p.id.eq_ignore_ascii_case(CORRELATION_PROPERTY))
                    .and_then(|p| p.value),
                id: draft.id,
                subject: draft.subject.unwrap_or_default(),
            })
            .collect())
    }

    async fn list_messages_matching_subject(
        &self,
        subjects: &[String],
        after: DateTime<Utc>,
        limit: usize,
    ) -> MailboxResult<Vec<MessageRef>> {
        let request = self.client.get(self.url("messages")).query(&[
            ("$filter", subject_filter(subjects, after)),
            ("$select", "id,receivedDateTime".to_string()),
            ("$top", limit.to_string()),
        ]);

        let refs: Vec<GraphMessageRef> = self.get_list(request).await?;
        refs.into_iter()
            .map(|r| {
                Ok(MessageRef {
                    received_at: parse_datetime(&r.received_date_time)?,
                    id: r.id,
                })
            })
            .collect()
    }

    async fn create_draft(&self, draft: &DraftRequest) -> MailboxResult<()> {
        let mut payload = json!({
            "subject": draft.subject,
            "body": {
                "contentType": "HTML",
                "content": draft.html_body,
            },
            "toRecipients": draft
                .recipients
                .iter()
                .map(|address| json!({ "emailAddress": { "address": address } }))
                .collect::<Vec<_>>(),
        });
        if let Some(source_id) = &draft.in_reply_to {
            payload["singleValueExtendedProperties"] = json!([
                { "id": CORRELATION_PROPERTY, "value": source_id }
            ]);
        }

        self.send(self.client.post(self.url("messages")).json(&payload))
            .await?;
        tracing::info!("Created draft email: {}", draft.subject);
        Ok(())
    }

    async fn mark_as_read(&self, id: &str) -> MailboxResult<()> {
        let request = self
            .client
            .patch(self.url(&format!("messages/{}", id)))
            .json(&json!({ "isRead": true }));
        self.send(request).await?;
        tracing::debug!("Marked email {} as read", id);
        Ok(())
    }
}

fn map_message(message: GraphMessage) -> MailboxResult<Email> {
    let sender = message
        .from
        .and_then(|f| f.email_address.address)
        .ok_or_else(|| MailboxError::Decode(format!("message {} has no sender", message.id)))?;
    let received_at = message
        .received_date_time
        .as_deref()
        .ok_or_else(|| MailboxError::Decode(format!("message {} has no receipt time", message.id)))
        .and_then(parse_datetime)?;
    let (body, body_type) = match message.body {
        Some(body) => {
            let body_type = match body.content_type.as_deref() {
                Some(kind) if kind.eq_ignore_ascii_case("html") => BodyType::Html,
                _ => BodyType::Text,
            };
            (body.content.unwrap_or_default(), body_type)
        }
        None => (String::new(), BodyType::Text),
    };

    Ok(Email {
        id: message.id,
        subject: message.subject.unwrap_or_else(|| "No Subject".to_string()),
        sender,
        body,
        body_type,
        received_at,
        is_read: message.is_read,
    })
}

fn parse_datetime(value: &str) -> MailboxResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| MailboxError::Decode(format!("bad timestamp '{}': {}", value, e)))
}

/// Instants before the Unix epoch are clamped to it
fn odata_datetime(dt: DateTime<Utc>) -> String {
    dt.max(DateTime::UNIX_EPOCH)
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Quote a string literal for an OData filter
fn odata_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn subject_filter(subjects: &[String], after: DateTime<Utc>) -> String {
    let subject_clause = subjects
        .iter()
        .map(|s| format!("subject eq {}", odata_quote(s)))
        .collect::<Vec<_>>()
        .join(" or ");
    format!(
        "({}) and (receivedDateTime gt {})",
        subject_clause,
        odata_datetime(after)
    )
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(MAX_ERROR_BODY_LEN) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
