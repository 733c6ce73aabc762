//! Language-model features: completion client, email-type classifier and
//! reply composers.
//!
//! The composers only see the [`CompletionProvider`] trait, so the HTTP
//! client can be swapped for a fake in tests.

mod classifier;
mod client;
mod composer;
mod prompts;

use anyhow::Result;
use async_trait::async_trait;

pub use classifier::EmailClassifier;
pub use client::OpenAiClient;
pub use composer::{Composer, DefaultComposer, TrainedComposer};

/// A single chat completion call
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub user: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Text-completion capability
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}
