//! Interactive training session (`redraft train`).
//!
//! Reads answers line by line from any `BufRead` and writes prompts to any
//! `Write`, so the whole menu can be driven from a test.

use anyhow::Result;
use chrono::{TimeDelta, Utc};
use std::io::{BufRead, Write};
use std::sync::Arc;

use crate::ai::{CompletionProvider, EmailClassifier, TrainedComposer};
use crate::mail::types::{BodyType, Email};
use crate::training::{ResponseTemplate, TrainingExample, TrainingSet, TrainingStore};

/// Completion clients used by the "test a response" option
pub struct SessionModels {
    pub drafting: Arc<dyn CompletionProvider>,
    pub classifier: Arc<dyn CompletionProvider>,
    pub max_tokens: u32,
}

pub struct TrainingSession<R, W> {
    input: R,
    output: W,
    store: Arc<dyn TrainingStore>,
    training: TrainingSet,
    models: Option<SessionModels>,
    default_tone: String,
}

impl<R: BufRead, W: Write> TrainingSession<R, W> {
    pub fn new(
        input: R,
        output: W,
        store: Arc<dyn TrainingStore>,
        training: TrainingSet,
        models: Option<SessionModels>,
        default_tone: String,
    ) -> Self {
        Self {
            input,
            output,
            store,
            training,
            models,
            default_tone,
        }
    }

    #[cfg(test)]
    pub fn training(&self) -> &TrainingSet {
        &self.training
    }

    /// Run the menu until the user exits or input ends
    pub async fn run(&mut self) -> Result<()> {
        writeln!(self.output, "Redraft Training")?;
        writeln!(self.output, "================")?;

        loop {
            writeln!(self.output)?;
            writeln!(self.output, "Options:")?;
            writeln!(self.output, "1. Add training example")?;
            writeln!(self.output, "2. Add response template")?;
            writeln!(self.output, "3. View training stats")?;
            writeln!(self.output, "4. Test customized response")?;
            writeln!(self.output, "5. Exit")?;

            let Some(choice) = self.ask("\nSelect option (1-5): ")? else {
                return Ok(());
            };
            match choice.as_str() {
                "1" => self.add_example().await?,
                "2" => self.add_template().await?,
                "3" => self.show_stats()?,
                "4" => self.test_response().await?,
                "5" => {
                    writeln!(self.output, "Goodbye!")?;
                    return Ok(());
                }
                _ => writeln!(self.output, "Invalid option. Please select 1-5.")?,
            }
        }
    }

    /// Prompt and read one trimmed line. `None` at end of input.
    fn ask(&mut self, label: &str) -> Result<Option<String>> {
        write!(self.output, "{}", label)?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    fn ask_or_empty(&mut self, label: &str) -> Result<String> {
        Ok(self.ask(label)?.unwrap_or_default())
    }

    async fn add_example(&mut self) -> Result<()> {
        writeln!(self.output, "\nAdding Training Example")?;
        let original = self.ask_or_empty("Original email content: ")?;
        let response = self.ask_or_empty("Your response: ")?;
        let email_type =
            self.ask_or_empty("Email type (inquiry/complaint/follow-up/request/general): ")?;
        let tone = self.ask_or_empty("Tone (professional/friendly/formal/casual): ")?;
        let key_points = split_list(&self.ask_or_empty("Key points (comma-separated): ")?);

        if original.is_empty() || response.is_empty() {
            writeln!(self.output, "Email and response are required, nothing added.")?;
            return Ok(());
        }

        let example = TrainingExample::new(original, response, email_type, tone, key_points);
        match self.training.add_example(self.store.as_ref(), example).await {
            Ok(()) => writeln!(self.output, "Training example added!")?,
            Err(e) => writeln!(self.output, "Example kept for this session but not saved: {:#}", e)?,
        }
        Ok(())
    }

    async fn add_template(&mut self) -> Result<()> {
        writeln!(self.output, "\nAdding Response Template")?;
        let name = self.ask_or_empty("Template name: ")?;
        let email_type = self.ask_or_empty("Email type: ")?;
        let tone = self.ask_or_empty("Tone: ")?;
        let body = self.ask_or_empty("Template (use {variables}): ")?;
        let mut placeholders =
            split_list(&self.ask_or_empty("Variables (comma-separated, Enter to detect): ")?);
        if placeholders.is_empty() {
            placeholders = ResponseTemplate::placeholders_in(&body);
        }

        if name.is_empty() || body.is_empty() {
            writeln!(self.output, "Name and template are required, nothing added.")?;
            return Ok(());
        }

        let template = ResponseTemplate::new(name, email_type, tone, body, placeholders);
        match self.training.add_template(self.store.as_ref(), template).await {
            Ok(()) => writeln!(self.output, "Response template added!")?,
            Err(e) => writeln!(self.output, "Template kept for this session but not saved: {:#}", e)?,
        }
        Ok(())
    }

    fn show_stats(&mut self) -> Result<()> {
        let stats = self.training.stats();
        writeln!(self.output, "\nTraining Statistics")?;
        writeln!(self.output, "Total examples: {}", stats.total_examples)?;
        writeln!(self.output, "Total templates: {}", stats.total_templates)?;
        writeln!(self.output, "Email types: {}", format_counts(&stats.email_types))?;
        writeln!(self.output, "Tones: {}", format_counts(&stats.tones))?;
        Ok(())
    }

    async fn test_response(&mut self) -> Result<()> {
        writeln!(self.output, "\nTest Customized Response")?;
        let content = self.ask_or_empty("Email content to respond to: ")?;
        let email_type = self.ask_or_empty("Email type (or press Enter to auto-detect): ")?;
        let tone = self.ask_or_empty("Desired tone (or press Enter for default): ")?;
        let days_old = self.ask_or_empty("Days old (or press Enter for 0): ")?;

        let Some(models) = &self.models else {
            writeln!(self.output, "No completion API configured (set OPENAI_API_KEY).")?;
            return Ok(());
        };
        let days_old: i64 = match days_old.as_str() {
            "" => 0,
            raw => match raw.parse() {
                Ok(days) if days >= 0 => days,
                _ => {
                    writeln!(self.output, "Days old must be a whole number.")?;
                    return Ok(());
                }
            },
        };

        let classifier = EmailClassifier::new(models.classifier.clone());
        let email_type = if email_type.is_empty() {
            let detected = classifier.classify(&content).await;
            writeln!(self.output, "Auto-detected email type: {}", detected)?;
            detected.to_string()
        } else {
            email_type
        };
        let tone = if tone.is_empty() {
            self.default_tone.clone()
        } else {
            tone
        };

        let now = Utc::now();
        let Some(received_at) =
            TimeDelta::try_days(days_old).and_then(|d| now.checked_sub_signed(d))
        else {
            writeln!(self.output, "Days old is out of range.")?;
            return Ok(());
        };
        let email = Email {
            id: "training-test".to_string(),
            subject: "Test Email".to_string(),
            sender: "test@example.com".to_string(),
            body: content,
            body_type: BodyType::Text,
            received_at,
            is_read: false,
        };
        let composer = TrainedComposer::new(
            models.drafting.clone(),
            classifier,
            self.training.clone(),
            tone.clone(),
            models.max_tokens,
        );

        match composer
            .compose_with(&email, now, Some(&email_type), Some(&tone))
            .await
        {
            Ok(draft) => writeln!(self.output, "\nGenerated Response:\n{}", draft)?,
            Err(e) => {
                tracing::warn!("Test response failed: {:#}", e);
                writeln!(self.output, "Failed to generate response")?
            }
        }
        Ok(())
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn format_counts(counts: &std::collections::BTreeMap<String, usize>) -> String {
    if counts.is_empty() {
        return "none".to_string();
    }
    counts
        .iter()
        .map(|(k, v)| format!("{}: {}", k, v))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::fake::FakeCompletion;
    use crate::training::JsonTrainingStore;
    use std::io::Cursor;

    async fn drive(
        script: &str,
        store: Arc<dyn TrainingStore>,
        models: Option<SessionModels>,
    ) -> (String, TrainingSet) {
        let training = TrainingSet::load(store.as_ref()).await;
        let mut output = Vec::new();
        let training = {
            let mut session = TrainingSession::new(
                Cursor::new(script.to_string()),
                &mut output,
                store,
                training,
                models,
                "professional".to_string(),
            );
            session.run().await.unwrap();
            session.training().clone()
        };
        (String::from_utf8(output).unwrap(), training)
    }

    #[tokio::test]
    async fn test_add_example_and_template_persist() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn TrainingStore> = Arc::new(JsonTrainingStore::new(dir.path()));
        let script = "1\nWhere is my invoice?\nAttached, sorry for the wait.\ninquiry\nformal\nattach invoice, apologize\n\
                      2\nLate reply\ngeneral\nfriendly\nHi {sender_name}, {delay_apology}\n\n\
                      3\n5\n";

        let (output, training) = drive(script, store.clone(), None).await;

        assert!(output.contains("Training example added!"));
        assert!(output.contains("Response template added!"));
        assert!(output.contains("Total examples: 1"));
        assert!(output.contains("Email types: inquiry: 1"));
        assert!(output.contains("Goodbye!"));

        assert_eq!(
            training.examples()[0].key_points,
            vec!["attach invoice".to_string(), "apologize".to_string()]
        );
        assert_eq!(
            training.templates()[0].placeholders,
            vec!["sender_name".to_string(), "delay_apology".to_string()]
        );

        let reloaded = TrainingSet::load(store.as_ref()).await;
        assert_eq!(reloaded.examples().len(), 1);
        assert_eq!(reloaded.templates().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_option_and_end_of_input() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn TrainingStore> = Arc::new(JsonTrainingStore::new(dir.path()));

        let (output, training) = drive("9\n", store, None).await;
        assert!(output.contains("Invalid option. Please select 1-5."));
        assert!(training.is_empty());
    }

    #[tokio::test]
    async fn test_response_auto_detects_type() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn TrainingStore> = Arc::new(JsonTrainingStore::new(dir.path()));
        let provider = Arc::new(FakeCompletion::new(|request| {
            if request.system.is_none() {
                Ok("complaint".to_string())
            } else {
                Ok("  We are on it.  ".to_string())
            }
        }));
        let models = SessionModels {
            drafting: provider.clone(),
            classifier: provider.clone(),
            max_tokens: 300,
        };

        let (output, _) = drive("4\nThis is broken\n\n\n2\n5\n", store, Some(models)).await;

        assert!(output.contains("Auto-detected email type: complaint"));
        assert!(output.contains("Generated Response:\nWe are on it."));
        let request = provider.last_request().unwrap();
        assert!(request.user.contains("received 2 days ago"));
        assert_eq!(request.max_tokens, 300);
    }

    #[tokio::test]
    async fn test_response_rejects_out_of_range_days() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn TrainingStore> = Arc::new(JsonTrainingStore::new(dir.path()));
        let provider = Arc::new(FakeCompletion::replying("unused"));
        let models = SessionModels {
            drafting: provider.clone(),
            classifier: provider.clone(),
            max_tokens: 300,
        };

        let (output, _) = drive(
            "4\nHello\ninquiry\n\n100000000000\n4\nHello\ninquiry\n\n-3\n5\n",
            store,
            Some(models),
        )
        .await;

        assert!(output.contains("Days old is out of range."));
        assert!(output.contains("Days old must be a whole number."));
        assert!(output.contains("Goodbye!"));
        assert!(provider.last_request().is_none());
    }

    #[tokio::test]
    async fn test_response_without_api_key() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn TrainingStore> = Arc::new(JsonTrainingStore::new(dir.path()));

        let (output, _) = drive("4\nHello\ninquiry\n\n\n5\n", store, None).await;
        assert!(output.contains("No completion API configured"));
    }
}
