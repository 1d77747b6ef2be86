use std::sync::Arc;
use tracing::{debug, info, warn};

use super::work_item::WorkItem;
use super::{LLM_PREFIX, NMT_PREFIX};
use crate::annotate::annotate;
use crate::error::Result;
use crate::storage::ObjectStore;
use crate::translate::{first_translation, LlmOptions, TranslateRequest, Translator};

/// What happened to one source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// Both translations were written
    Translated { nmt_blob: String, llm_blob: String },
    /// The NMT translation was written; the LLM leg failed
    NmtOnly { nmt_blob: String, reason: String },
    /// Source was empty or whitespace; nothing was translated
    Empty,
}

/// Translate one source file through both engines and store the results.
///
/// NMT runs first and its output is written before the LLM call, so an LLM failure never
/// loses the NMT result. Output writes are overwrites, so redelivered work is idempotent.
pub struct FilePipeline {
    store: Arc<dyn ObjectStore>,
    translator: Arc<dyn Translator>,
    llm: LlmOptions,
}

impl FilePipeline {
    pub fn new(store: Arc<dyn ObjectStore>, translator: Arc<dyn Translator>, llm: LlmOptions) -> Self {
        Self {
            store,
            translator,
            llm,
        }
    }

    /// Errors mean the file was not translated at all.
    pub async fn translate_file(&self, item: &WorkItem) -> Result<FileOutcome> {
        let content = self
            .store
            .read_blob(&item.source_container, &item.source_blob)
            .await?;
        if content.trim().is_empty() {
            warn!("Empty file: {}", item.source_blob);
            return Ok(FileOutcome::Empty);
        }

        let text = annotate(&content, item.dictionary.as_ref());
        let request = TranslateRequest::single(
            &text,
            &item.target_language,
            item.source_language.as_deref(),
        );
        let base = item.base_name();

        let nmt_results = self.translator.translate(&request).await?;
        let nmt_text = first_translation(&nmt_results)?;
        let nmt_blob = format!("{}{}", NMT_PREFIX, base);
        self.store
            .write_blob(&item.target_container, &nmt_blob, &nmt_text, true)
            .await?;
        debug!("NMT translation saved: {}", nmt_blob);

        let llm_blob = format!("{}{}", LLM_PREFIX, base);
        match self.translate_llm(&request, &item.target_container, &llm_blob).await {
            Ok(()) => {
                info!("Translated {} ({} and {})", item.source_blob, nmt_blob, llm_blob);
                Ok(FileOutcome::Translated { nmt_blob, llm_blob })
            }
            Err(e) => {
                warn!("LLM translation failed for {}: {}", item.source_blob, e);
                Ok(FileOutcome::NmtOnly {
                    nmt_blob,
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn translate_llm(
        &self,
        request: &TranslateRequest,
        container: &str,
        blob: &str,
    ) -> Result<()> {
        let results = self.translator.translate_with_llm(request, &self.llm).await?;
        let text = first_translation(&results)?;
        self.store.write_blob(container, blob, &text, true).await?;
        debug!("LLM translation saved: {}", blob);
        Ok(())
    }
}
