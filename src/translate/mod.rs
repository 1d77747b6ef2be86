// Translation engines
//
// Two upstream engines are reached through one client:
// - NMT: the conventional neural translation endpoint
// - LLM: the preview endpoint with a model deployment per target
// Both return the same result shape; LLM responses are normalized on the way in.

pub mod client;
pub mod retry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::Config;
use crate::error::{Result, TandemError};

pub use client::TranslatorClient;
pub use retry::RetryPolicy;

/// Reference translations accepted per LLM request item
pub const MAX_REFERENCE_TRANSLATIONS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Translation {
    pub text: String,
    /// Target language. The LLM engine calls this field `language`.
    #[serde(alias = "language")]
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_family: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedLanguage {
    pub language: String,
    pub score: f64,
}

/// Per-input-text result holding one translation per target language
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_language: Option<DetectedLanguage>,
    #[serde(default)]
    pub translations: Vec<Translation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_family: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslateRequest {
    pub texts: Vec<String>,
    pub targets: Vec<String>,
    /// Auto-detected by the engine when absent
    pub source_language: Option<String>,
}

impl TranslateRequest {
    pub fn single(text: &str, target: &str, source_language: Option<&str>) -> Self {
        Self {
            texts: vec![text.to_string()],
            targets: vec![target.to_string()],
            source_language: source_language.map(str::to_string),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.texts.is_empty() {
            return Err(TandemError::Validation("No text to translate".to_string()));
        }
        if self.targets.is_empty() {
            return Err(TandemError::Validation("No target language given".to_string()));
        }
        Ok(())
    }
}

/// Options for the LLM engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmOptions {
    /// Model deployment name, e.g. `gpt-4o-mini`
    pub model: String,
    pub tone: Option<String>,
    pub gender: Option<String>,
    pub reference_translations: Vec<String>,
}

impl LlmOptions {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            tone: None,
            gender: None,
            reference_translations: Vec::new(),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate with the conventional engine.
    async fn translate(&self, request: &TranslateRequest) -> Result<Vec<TranslationResult>>;

    /// Translate with the LLM engine. Results have the same shape as `translate`.
    async fn translate_with_llm(
        &self,
        request: &TranslateRequest,
        options: &LlmOptions,
    ) -> Result<Vec<TranslationResult>>;
}

/// Text of the first translation of the first result.
pub fn first_translation(results: &[TranslationResult]) -> Result<String> {
    results
        .first()
        .and_then(|result| result.translations.first())
        .map(|translation| translation.text.clone())
        .ok_or_else(|| TandemError::Translation("Response contained no translation".to_string()))
}

pub struct TranslatorFactory;

impl TranslatorFactory {
    pub fn create_translator(config: &Config) -> Result<Arc<dyn Translator>> {
        Ok(Arc::new(TranslatorClient::new(config)?))
    }
}
