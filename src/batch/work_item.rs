use serde::{Deserialize, Serialize};

use crate::annotate::Dictionary;
use crate::error::Result;

/// One source file of a batch, carried as a queue message payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub job_id: String,
    pub source_container: String,
    pub target_container: String,
    pub source_blob: String,
    pub target_language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dictionary: Option<Dictionary>,
}

impl WorkItem {
    pub fn from_json(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// File name of the source blob without its directory part
    pub fn base_name(&self) -> &str {
        base_name(&self.source_blob)
    }
}

pub fn base_name(blob_name: &str) -> &str {
    blob_name.rsplit('/').next().unwrap_or(blob_name)
}
