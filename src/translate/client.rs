use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    LlmOptions, RetryPolicy, TranslateRequest, TranslationResult, Translator,
    MAX_REFERENCE_TRANSLATIONS,
};
use crate::config::Config;
use crate::error::{Result, TandemError};

const KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
const REGION_HEADER: &str = "Ocp-Apim-Subscription-Region";

/// HTTP client for the translator service
pub struct TranslatorClient {
    client: Client,
    base_url: String,
    api_version: String,
    preview_api_version: String,
    key: String,
    region: String,
    llm_key: String,
    llm_region: String,
    retry: RetryPolicy,
}

impl TranslatorClient {
    pub fn new(config: &Config) -> Result<Self> {
        let translator = &config.translator;
        let client = Client::builder()
            .timeout(Duration::from_secs(translator.timeout_secs))
            .build()?;

        if translator.key.is_empty() {
            warn!("No translator key configured; requests will be rejected upstream");
        }

        Ok(Self {
            client,
            base_url: config.translator_base_url().to_string(),
            api_version: translator.api_version.clone(),
            preview_api_version: translator.preview_api_version.clone(),
            key: translator.key.clone(),
            region: translator.region.clone(),
            llm_key: translator
                .llm_key
                .clone()
                .unwrap_or_else(|| translator.key.clone()),
            llm_region: translator.llm_region.clone(),
            retry: RetryPolicy::from_config(translator),
        })
    }

    fn nmt_query(&self, request: &TranslateRequest) -> Vec<(&'static str, String)> {
        let mut query = vec![("api-version", self.api_version.clone())];
        query.extend(request.targets.iter().map(|t| ("to", t.clone())));
        if let Some(from) = &request.source_language {
            query.push(("from", from.clone()));
        }
        query
    }

    fn llm_query(&self, request: &TranslateRequest) -> Vec<(&'static str, String)> {
        let mut query = vec![("api-version", self.preview_api_version.clone())];
        if let Some(from) = &request.source_language {
            query.push(("from", from.clone()));
        }
        query
    }

    async fn post_translate(
        &self,
        label: &str,
        query: Vec<(&'static str, String)>,
        body: Value,
        key: &str,
        region: &str,
    ) -> Result<Vec<TranslationResult>> {
        let url = format!("{}/translate", self.base_url);
        let (url, query, body) = (&url, &query, &body);
        let client = &self.client;

        debug!("{} request to {}", label, url);
        self.retry
            .run(label, move || async move {
                let response = client
                    .post(url)
                    .query(query)
                    .header(KEY_HEADER, key)
                    .header(REGION_HEADER, region)
                    .json(body)
                    .send()
                    .await?;

                let status = response.status();
                if status == StatusCode::TOO_MANY_REQUESTS {
                    return Err(TandemError::RateLimited(format!("{} returned 429", label)));
                }
                if !status.is_success() {
                    let detail = response.text().await.unwrap_or_default();
                    if status.is_server_error() {
                        return Err(TandemError::Unavailable(format!(
                            "{} error {}: {}",
                            label, status, detail
                        )));
                    }
                    return Err(TandemError::Translation(format!(
                        "{} error {}: {}",
                        label, status, detail
                    )));
                }

                Ok(response.json::<Vec<TranslationResult>>().await?)
            })
            .await
    }
}

#[async_trait]
impl Translator for TranslatorClient {
    async fn translate(&self, request: &TranslateRequest) -> Result<Vec<TranslationResult>> {
        request.validate()?;
        info!(
            "Translating {} text(s) to {} language(s)",
            request.texts.len(),
            request.targets.len()
        );
        self.post_translate(
            "NMT",
            self.nmt_query(request),
            nmt_body(request),
            &self.key,
            &self.region,
        )
        .await
    }

    async fn translate_with_llm(
        &self,
        request: &TranslateRequest,
        options: &LlmOptions,
    ) -> Result<Vec<TranslationResult>> {
        request.validate()?;
        info!(
            "Translating {} text(s) with {} to {} language(s)",
            request.texts.len(),
            options.model,
            request.targets.len()
        );
        let mut results = self
            .post_translate(
                "LLM",
                self.llm_query(request),
                llm_body(request, options),
                &self.llm_key,
                &self.llm_region,
            )
            .await?;
        normalize_llm_results(&mut results);
        Ok(results)
    }
}

fn nmt_body(request: &TranslateRequest) -> Value {
    Value::Array(request.texts.iter().map(|text| json!({ "Text": text })).collect())
}

/// Each target names the model deployment; that is what routes the request to the LLM.
fn llm_body(request: &TranslateRequest, options: &LlmOptions) -> Value {
    let targets: Vec<Value> = request
        .targets
        .iter()
        .map(|language| {
            let mut target = json!({
                "language": language,
                "deploymentName": options.model,
            });
            if let Some(tone) = &options.tone {
                target["tone"] = json!(tone);
            }
            if let Some(gender) = &options.gender {
                target["gender"] = json!(gender);
            }
            target
        })
        .collect();

    let references: Vec<&String> = options
        .reference_translations
        .iter()
        .take(MAX_REFERENCE_TRANSLATIONS)
        .collect();

    Value::Array(
        request
            .texts
            .iter()
            .map(|text| {
                let mut item = json!({ "text": text, "targets": targets });
                if !references.is_empty() {
                    item["referenceTranslations"] = json!(references);
                }
                item
            })
            .collect(),
    )
}

/// Carry response-level model metadata onto each translation.
fn normalize_llm_results(results: &mut [TranslationResult]) {
    for result in results.iter_mut() {
        for translation in result.translations.iter_mut() {
            if translation.model_version.is_none() {
                translation.model_version = result.model_version.clone();
            }
            if translation.model_family.is_none() {
                translation.model_family = result.model_family.clone();
            }
        }
    }
}
