//! User-authored training data: reply examples and response templates.
//!
//! This module is split into:
//! - `mod.rs` - Record types, the in-memory `TrainingSet` and context selection
//! - `store.rs` - Durable storage (JSON files or SQLite)

mod store;

pub use store::{DATABASE_FILE, JsonTrainingStore, SqliteTrainingStore, TrainingStore};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::constants::{MAX_CONTEXT_EXAMPLES, MAX_CONTEXT_TEMPLATES};

/// A past email and the reply the user wrote for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingExample {
    pub original_email: String,
    #[serde(rename = "your_response")]
    pub response: String,
    /// inquiry, complaint, follow-up, request, general (open-ended)
    pub email_type: String,
    /// professional, friendly, formal, casual (open-ended)
    pub tone: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default = "Utc::now", with = "timestamp")]
    pub created_date: DateTime<Utc>,
}

impl TrainingExample {
    pub fn new(
        original_email: impl Into<String>,
        response: impl Into<String>,
        email_type: impl Into<String>,
        tone: impl Into<String>,
        key_points: Vec<String>,
    ) -> Self {
        Self {
            original_email: original_email.into(),
            response: response.into(),
            email_type: email_type.into(),
            tone: tone.into(),
            key_points,
            created_date: Utc::now(),
        }
    }
}

/// A reusable reply skeleton with `{placeholder}` slots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseTemplate {
    pub name: String,
    pub email_type: String,
    pub tone: String,
    #[serde(rename = "template")]
    pub body: String,
    #[serde(rename = "variables", default)]
    pub placeholders: Vec<String>,
    #[serde(default = "Utc::now", with = "timestamp")]
    pub created_date: DateTime<Utc>,
}

impl ResponseTemplate {
    pub fn new(
        name: impl Into<String>,
        email_type: impl Into<String>,
        tone: impl Into<String>,
        body: impl Into<String>,
        placeholders: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            email_type: email_type.into(),
            tone: tone.into(),
            body: body.into(),
            placeholders,
            created_date: Utc::now(),
        }
    }

    /// Names written as `{name}` in a template body, in order of first use
    pub fn placeholders_in(body: &str) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        let mut rest = body;
        while let Some(start) = rest.find('{') {
            rest = &rest[start + 1..];
            let Some(end) = rest.find('}') else { break };
            let name = rest[..end].trim();
            if !name.is_empty()
                && name.chars().all(|c| c.is_alphanumeric() || c == '_')
                && !names.iter().any(|n| n == name)
            {
                names.push(name.to_string());
            }
            rest = &rest[end + 1..];
        }
        names
    }
}

/// Rendered context handed to the composer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrainingContext {
    pub examples: String,
    pub templates: String,
}

impl TrainingContext {
    pub fn is_empty(&self) -> bool {
        self.examples.is_empty() && self.templates.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrainingStats {
    pub total_examples: usize,
    pub total_templates: usize,
    pub email_types: BTreeMap<String, usize>,
    pub tones: BTreeMap<String, usize>,
}

/// In-memory training collections, loaded once and appended to by authoring
/// calls. Read-only during a scan.
#[derive(Debug, Clone, Default)]
pub struct TrainingSet {
    examples: Vec<TrainingExample>,
    templates: Vec<ResponseTemplate>,
}

impl TrainingSet {
    pub fn new(examples: Vec<TrainingExample>, templates: Vec<ResponseTemplate>) -> Self {
        Self {
            examples,
            templates,
        }
    }

    /// Load both collections. A collection that cannot be loaded starts empty.
    pub async fn load(store: &dyn TrainingStore) -> Self {
        let examples = store.load_examples().await.unwrap_or_else(|e| {
            tracing::error!("Error loading training data: {:#}", e);
            Vec::new()
        });
        let templates = store.load_templates().await.unwrap_or_else(|e| {
            tracing::error!("Error loading templates: {:#}", e);
            Vec::new()
        });
        tracing::debug!(
            "Loaded {} training examples and {} templates",
            examples.len(),
            templates.len()
        );
        Self::new(examples, templates)
    }

    #[cfg(test)]
    pub fn examples(&self) -> &[TrainingExample] {
        &self.examples
    }

    #[cfg(test)]
    pub fn templates(&self) -> &[ResponseTemplate] {
        &self.templates
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty() && self.templates.is_empty()
    }

    /// Append an example and persist the whole collection.
    /// The example stays in memory even when persisting fails.
    pub async fn add_example(
        &mut self,
        store: &dyn TrainingStore,
        example: TrainingExample,
    ) -> Result<()> {
        tracing::info!(
            "Added training example for {} email with {} tone",
            example.email_type,
            example.tone
        );
        self.examples.push(example);
        store.save_examples(&self.examples).await?;
        tracing::info!("Saved {} training examples", self.examples.len());
        Ok(())
    }

    /// Append a template and persist the whole collection
    pub async fn add_template(
        &mut self,
        store: &dyn TrainingStore,
        template: ResponseTemplate,
    ) -> Result<()> {
        tracing::info!("Added response template: {}", template.name);
        self.templates.push(template);
        store.save_templates(&self.templates).await?;
        tracing::info!("Saved {} response templates", self.templates.len());
        Ok(())
    }

    /// Examples matching every given tag, first matches in storage order.
    /// No fallback to unfiltered examples when nothing matches.
    pub fn select_examples(
        &self,
        email_type: Option<&str>,
        tone: Option<&str>,
    ) -> Vec<&TrainingExample> {
        self.examples
            .iter()
            .filter(|e| email_type.is_none_or(|t| e.email_type == t))
            .filter(|e| tone.is_none_or(|t| e.tone == t))
            .take(MAX_CONTEXT_EXAMPLES)
            .collect()
    }

    /// Templates matching the type. Tone is not considered for templates.
    pub fn select_templates(&self, email_type: Option<&str>) -> Vec<&ResponseTemplate> {
        self.templates
            .iter()
            .filter(|t| email_type.is_none_or(|ty| t.email_type == ty))
            .take(MAX_CONTEXT_TEMPLATES)
            .collect()
    }

    pub fn examples_block(&self, email_type: Option<&str>, tone: Option<&str>) -> String {
        let selected = self.select_examples(email_type, tone);
        if selected.is_empty() {
            return String::new();
        }

        let mut block = String::from("Based on these training examples, generate similar responses:\n\n");
        for (i, example) in selected.iter().enumerate() {
            block.push_str(&format!(
                "Example {}:\nOriginal Email: {}\nYour Response: {}\nType: {}, Tone: {}\nKey Points: {}\n\n",
                i + 1,
                example.original_email,
                example.response,
                example.email_type,
                example.tone,
                example.key_points.join(", ")
            ));
        }
        block
    }

    pub fn templates_block(&self, email_type: Option<&str>) -> String {
        let selected = self.select_templates(email_type);
        if selected.is_empty() {
            return String::new();
        }

        let mut block = String::from("Use these response templates as guidance:\n\n");
        for template in selected {
            block.push_str(&format!(
                "Template: {}\nType: {}, Tone: {}\nBody: {}\nPlaceholders: {}\n\n",
                template.name,
                template.email_type,
                template.tone,
                template.body,
                template.placeholders.join(", ")
            ));
        }
        block
    }

    pub fn context(&self, email_type: Option<&str>, tone: Option<&str>) -> TrainingContext {
        TrainingContext {
            examples: self.examples_block(email_type, tone),
            templates: self.templates_block(email_type),
        }
    }

    pub fn stats(&self) -> TrainingStats {
        let mut stats = TrainingStats {
            total_examples: self.examples.len(),
            total_templates: self.templates.len(),
            ..Default::default()
        };
        for example in &self.examples {
            *stats.email_types.entry(example.email_type.clone()).or_default() += 1;
            *stats.tones.entry(example.tone.clone()).or_default() += 1;
        }
        stats
    }
}

/// RFC 3339 timestamps; also reads the naive `YYYY-MM-DD HH:MM:SS[.f]`
/// form (local time) found in older data files.
mod timestamp {
    use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw)))
    }

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        NAIVE_FORMATS.iter().find_map(|fmt| {
            let naive = NaiveDateTime::parse_from_str(raw, fmt).ok()?;
            Some(
                Local
                    .from_local_datetime(&naive)
                    .earliest()
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|| naive.and_utc()),
            )
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub fn example(email_type: &str, tone: &str, tag: &str) -> TrainingExample {
        TrainingExample::new(
            format!("original {}", tag),
            format!("response {}", tag),
            email_type,
            tone,
            vec![format!("point {}", tag)],
        )
    }

    pub fn template(name: &str, email_type: &str, tone: &str) -> ResponseTemplate {
        ResponseTemplate::new(
            name,
            email_type,
            tone,
            "Hi {sender_name}, {delay_apology}",
            vec!["sender_name".into(), "delay_apology".into()],
        )
    }

    #[test]
    fn test_select_examples_caps_at_five_in_storage_order() {
        let mut examples: Vec<TrainingExample> = (1..=6)
            .map(|i| example("inquiry", "professional", &i.to_string()))
            .collect();
        examples.insert(2, example("complaint", "professional", "c"));
        examples.push(example("inquiry", "casual", "x"));
        let set = TrainingSet::new(examples, Vec::new());

        let selected = set.select_examples(Some("inquiry"), Some("professional"));
        let tags: Vec<&str> = selected.iter().map(|e| e.original_email.as_str()).collect();
        assert_eq!(
            tags,
            vec!["original 1", "original 2", "original 3", "original 4", "original 5"]
        );
    }

    #[test]
    fn test_no_match_yields_empty_block_without_fallback() {
        let set = TrainingSet::new(
            vec![example("inquiry", "professional", "1")],
            vec![template("Inquiry reply", "inquiry", "professional")],
        );

        assert!(set.select_examples(Some("complaint"), None).is_empty());
        assert_eq!(set.examples_block(Some("complaint"), None), "");
        assert_eq!(set.templates_block(Some("complaint")), "");
        assert!(set.context(Some("complaint"), None).is_empty());
    }

    #[test]
    fn test_unfiltered_selection() {
        let set = TrainingSet::new(
            vec![example("inquiry", "formal", "1"), example("request", "casual", "2")],
            Vec::new(),
        );
        assert_eq!(set.select_examples(None, None).len(), 2);
        assert_eq!(set.select_examples(None, Some("casual")).len(), 1);
    }

    #[test]
    fn test_templates_ignore_tone_and_cap_at_three() {
        let templates = vec![
            template("a", "inquiry", "formal"),
            template("b", "inquiry", "casual"),
            template("c", "request", "formal"),
            template("d", "inquiry", "friendly"),
            template("e", "inquiry", "formal"),
        ];
        let set = TrainingSet::new(Vec::new(), templates);

        let names: Vec<&str> = set
            .select_templates(Some("inquiry"))
            .iter()
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(names, vec!["a", "b", "d"]);
    }

    #[test]
    fn test_blocks_render_records() {
        let set = TrainingSet::new(
            vec![example("inquiry", "friendly", "1")],
            vec![template("Quick answer", "inquiry", "friendly")],
        );
        let context = set.context(Some("inquiry"), Some("friendly"));

        assert!(context.examples.starts_with("Based on these training examples"));
        assert!(context.examples.contains("Example 1:\nOriginal Email: original 1\n"));
        assert!(context.examples.contains("Your Response: response 1\n"));
        assert!(context.examples.contains("Type: inquiry, Tone: friendly\n"));
        assert!(context.examples.contains("Key Points: point 1\n"));

        assert!(context.templates.starts_with("Use these response templates as guidance"));
        assert!(context.templates.contains("Template: Quick answer\n"));
        assert!(context.templates.contains("Body: Hi {sender_name}, {delay_apology}\n"));
        assert!(context.templates.contains("Placeholders: sender_name, delay_apology\n"));
    }

    #[test]
    fn test_stats() {
        let set = TrainingSet::new(
            vec![
                example("inquiry", "formal", "1"),
                example("inquiry", "casual", "2"),
                example("complaint", "formal", "3"),
            ],
            vec![template("t", "inquiry", "formal")],
        );
        let stats = set.stats();
        assert_eq!(stats.total_examples, 3);
        assert_eq!(stats.total_templates, 1);
        assert_eq!(stats.email_types.get("inquiry"), Some(&2));
        assert_eq!(stats.email_types.get("complaint"), Some(&1));
        assert_eq!(stats.tones.get("formal"), Some(&2));
    }

    #[test]
    fn test_placeholders_in() {
        assert_eq!(
            ResponseTemplate::placeholders_in("Hi {name}, about {topic}: {name} {not valid} {}"),
            vec!["name".to_string(), "topic".to_string()]
        );
        assert!(ResponseTemplate::placeholders_in("no slots {unclosed").is_empty());
    }

    #[test]
    fn test_reads_legacy_record_format() {
        let raw = r#"{
            "original_email": "When will it ship?",
            "your_response": "Tomorrow.",
            "email_type": "inquiry",
            "tone": "friendly",
            "key_points": ["date"],
            "created_date": "2024-03-01 14:22:05.123456"
        }"#;
        let example: TrainingExample = serde_json::from_str(raw).unwrap();
        assert_eq!(example.response, "Tomorrow.");
        assert_eq!(example.key_points, vec!["date".to_string()]);

        let raw = r#"{
            "name": "Thanks",
            "email_type": "general",
            "tone": "casual",
            "template": "Thanks {name}!",
            "variables": ["name"],
            "created_date": "2024-03-01T14:22:05+00:00"
        }"#;
        let template: ResponseTemplate = serde_json::from_str(raw).unwrap();
        assert_eq!(template.body, "Thanks {name}!");
        assert_eq!(template.placeholders, vec!["name".to_string()]);
        assert_eq!(template.created_date.to_rfc3339(), "2024-03-01T14:22:05+00:00");
    }

    #[test]
    fn test_rejects_garbage_timestamp() {
        assert!(timestamp::parse("yesterday").is_none());
    }
}
