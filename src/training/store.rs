//! Durable training data storage.
//!
//! Both backends keep "load all, append one, persist all" semantics: every
//! save replaces the stored collection with the given ordered slice.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs;

use super::{ResponseTemplate, TrainingExample, timestamp};

pub const EXAMPLES_FILE: &str = "training_data.json";
pub const TEMPLATES_FILE: &str = "response_templates.json";
pub const DATABASE_FILE: &str = "training.db";

#[async_trait]
pub trait TrainingStore: Send + Sync {
    async fn load_examples(&self) -> Result<Vec<TrainingExample>>;
    async fn save_examples(&self, examples: &[TrainingExample]) -> Result<()>;
    async fn load_templates(&self) -> Result<Vec<ResponseTemplate>>;
    async fn save_templates(&self, templates: &[ResponseTemplate]) -> Result<()>;
}

/// Two pretty-printed JSON arrays in a directory
pub struct JsonTrainingStore {
    examples_path: PathBuf,
    templates_path: PathBuf,
}

impl JsonTrainingStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            examples_path: dir.join(EXAMPLES_FILE),
            templates_path: dir.join(TEMPLATES_FILE),
        }
    }

    async fn read<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
        let exists = fs::try_exists(path)
            .await
            .with_context(|| format!("Failed to check {}", path.display()))?;
        if !exists {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Write through a temporary file so a crash never leaves half a file
    async fn write<T: serde::Serialize>(path: &Path, records: &[T]) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        let content = serde_json::to_string_pretty(records).context("Failed to serialize records")?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .await
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl TrainingStore for JsonTrainingStore {
    async fn load_examples(&self) -> Result<Vec<TrainingExample>> {
        Self::read(&self.examples_path).await
    }

    async fn save_examples(&self, examples: &[TrainingExample]) -> Result<()> {
        Self::write(&self.examples_path, examples).await
    }

    async fn load_templates(&self) -> Result<Vec<ResponseTemplate>> {
        Self::read(&self.templates_path).await
    }

    async fn save_templates(&self, templates: &[ResponseTemplate]) -> Result<()> {
        Self::write(&self.templates_path, templates).await
    }
}

/// SQLite-backed store. List fields are kept as JSON arrays, row order is
/// insertion order.
pub struct SqliteTrainingStore {
    pool: SqlitePool,
}

impl SqliteTrainingStore {
    pub async fn open(path: &Path) -> Result<Self> {
        let db_url = format!("sqlite:{}?mode=rwc", path.display());

        let options = SqliteConnectOptions::from_str(&db_url)?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .context("Failed to create training connection pool")?;

        Self::init_schema(&pool).await?;

        Ok(Self { pool })
    }

    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to create in-memory connection pool")?;

        Self::init_schema(&pool).await?;

        Ok(Self { pool })
    }

    async fn init_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS training_examples (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                original_email TEXT NOT NULL,
                response TEXT NOT NULL,
                email_type TEXT NOT NULL,
                tone TEXT NOT NULL,
                key_points TEXT NOT NULL DEFAULT '[]',
                created_date TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS response_templates (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                email_type TEXT NOT NULL,
                tone TEXT NOT NULL,
                body TEXT NOT NULL,
                placeholders TEXT NOT NULL DEFAULT '[]',
                created_date TEXT NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }
}

fn decode_list(raw: &str) -> Result<Vec<String>> {
    serde_json::from_str(raw).context("Malformed list column")
}

fn decode_timestamp(raw: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    timestamp::parse(raw).with_context(|| format!("Malformed timestamp column: {}", raw))
}

#[async_trait]
impl TrainingStore for SqliteTrainingStore {
    async fn load_examples(&self) -> Result<Vec<TrainingExample>> {
        let rows = sqlx::query(
            r#"
            SELECT original_email, response, email_type, tone, key_points, created_date
            FROM training_examples
            ORDER BY seq
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(TrainingExample {
                    original_email: row.get("original_email"),
                    response: row.get("response"),
                    email_type: row.get("email_type"),
                    tone: row.get("tone"),
                    key_points: decode_list(row.get("key_points"))?,
                    created_date: decode_timestamp(row.get("created_date"))?,
                })
            })
            .collect()
    }

    async fn save_examples(&self, examples: &[TrainingExample]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM training_examples")
            .execute(&mut *tx)
            .await?;
        for example in examples {
            sqlx::query(
                r#"
                INSERT INTO training_examples
                (original_email, response, email_type, tone, key_points, created_date)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&example.original_email)
            .bind(&example.response)
            .bind(&example.email_type)
            .bind(&example.tone)
            .bind(serde_json::to_string(&example.key_points)?)
            .bind(example.created_date.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn load_templates(&self) -> Result<Vec<ResponseTemplate>> {
        let rows = sqlx::query(
            r#"
            SELECT name, email_type, tone, body, placeholders, created_date
            FROM response_templates
            ORDER BY seq
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(ResponseTemplate {
                    name: row.get("name"),
                    email_type: row.get("email_type"),
                    tone: row.get("tone"),
                    body: row.get("body"),
                    placeholders: decode_list(row.get("placeholders"))?,
                    created_date: decode_timestamp(row.get("created_date"))?,
                })
            })
            .collect()
    }

    async fn save_templates(&self, templates: &[ResponseTemplate]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM response_templates")
            .execute(&mut *tx)
            .await?;
        for template in templates {
            sqlx::query(
                r#"
                INSERT INTO response_templates
                (name, email_type, tone, body, placeholders, created_date)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&template.name)
            .bind(&template.email_type)
            .bind(&template.tone)
            .bind(&template.body)
            .bind(serde_json::to_string(&template.placeholders)?)
            .bind(template.created_date.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
