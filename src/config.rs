use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, TandemError};
use crate::translate::MAX_REFERENCE_TRANSLATIONS;

// Default values for fields that older config files may omit
fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_text_extension() -> String {
    "txt".to_string()
}

fn default_error_backoff_secs() -> u64 {
    10
}

fn default_max_delivery_count() -> u32 {
    5
}

fn default_cleanup_max_age_hours() -> u64 {
    24
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for the job database, queue database and logs
    pub data_dir: PathBuf,
    pub translator: TranslatorConfig,
    pub storage: StorageConfig,
    pub queue: QueueConfig,
    pub jobs: JobsConfig,
    pub batch: BatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslatorConfig {
    /// Translator API endpoint, shared by the NMT and LLM engines
    pub endpoint: String,
    /// API version for conventional (NMT) translation
    pub api_version: String,
    /// API version for the LLM-backed translation endpoint
    pub preview_api_version: String,
    /// Subscription key for NMT requests
    pub key: String,
    /// Subscription region for NMT requests
    pub region: String,
    /// Subscription key for LLM requests
    pub llm_key: Option<String>,
    /// Subscription region for LLM requests
    pub llm_region: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Maximum attempts per upstream call, including the first
    pub max_retries: u32,
    /// Upper bound on total time spent retrying one call
    pub max_retry_time_secs: u64,
    /// First backoff delay; doubles after each failed attempt
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory of the filesystem object store; each subdirectory is a container
    pub root: PathBuf,
    /// Only blobs with this extension are listed
    #[serde(default = "default_text_extension")]
    pub text_extension: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queue name
    pub name: String,
    /// Lease duration for received messages; must cover two translation calls for one file
    pub visibility_timeout_secs: u64,
    /// Maximum messages received per poll
    pub batch_size: usize,
    /// Sleep between polls that return no messages
    pub poll_interval_secs: u64,
    /// Sleep after a failed poll
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,
    /// Deliveries before a message is moved to the `<name>-poison` queue
    #[serde(default = "default_max_delivery_count")]
    pub max_delivery_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Table name for job records
    pub table: String,
    /// Finished jobs older than this are removed by `cleanup`
    #[serde(default = "default_cleanup_max_age_hours")]
    pub cleanup_max_age_hours: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Enqueue one work item per file instead of translating inline
    pub use_queue: bool,
    /// LLM deployment used for the second translation of each file
    pub llm_model: String,
    /// Optional tone variant for LLM translation (formal, informal, neutral)
    pub tone: Option<String>,
    /// Optional gender variant for LLM translation (male, female, neutral)
    pub gender: Option<String>,
    /// Example translations passed to the LLM to steer terminology and style
    #[serde(default)]
    pub reference_translations: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".tandem"),
            translator: TranslatorConfig {
                endpoint: "https://api.cognitive.microsofttranslator.com".to_string(),
                api_version: "3.0".to_string(),
                preview_api_version: "2025-05-01-preview".to_string(),
                key: String::new(),
                region: "westeurope".to_string(),
                llm_key: None,
                llm_region: "swedencentral".to_string(),
                timeout_secs: 30,
                max_retries: 3,
                max_retry_time_secs: 30,
                initial_backoff_ms: default_initial_backoff_ms(),
            },
            storage: StorageConfig {
                root: PathBuf::from(".tandem/blobs"),
                text_extension: default_text_extension(),
            },
            queue: QueueConfig {
                name: "translation-jobs".to_string(),
                visibility_timeout_secs: 600,
                batch_size: 1,
                poll_interval_secs: 5,
                error_backoff_secs: default_error_backoff_secs(),
                max_delivery_count: default_max_delivery_count(),
            },
            jobs: JobsConfig {
                table: "translationjobs".to_string(),
                cleanup_max_age_hours: default_cleanup_max_age_hours(),
            },
            batch: BatchConfig {
                use_queue: true,
                llm_model: "gpt-4o-mini".to_string(),
                tone: None,
                gender: None,
                reference_translations: Vec::new(),
            },
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TandemError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| TandemError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| TandemError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| TandemError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Overlay secrets and deployment-specific settings from `TANDEM_*` environment variables.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("TANDEM_TRANSLATOR_KEY") {
            self.translator.key = key;
        }
        if let Some(region) = lookup("TANDEM_TRANSLATOR_REGION") {
            self.translator.region = region;
        }
        if let Some(endpoint) = lookup("TANDEM_TRANSLATOR_ENDPOINT") {
            self.translator.endpoint = endpoint;
        }
        if let Some(key) = lookup("TANDEM_LLM_KEY") {
            self.translator.llm_key = Some(key);
        }
        if let Some(region) = lookup("TANDEM_LLM_REGION") {
            self.translator.llm_region = region;
        }
        if let Some(dir) = lookup("TANDEM_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(root) = lookup("TANDEM_STORAGE_ROOT") {
            self.storage.root = PathBuf::from(root);
        }
        if let Some(flag) = lookup("TANDEM_USE_QUEUE") {
            self.batch.use_queue = match flag.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                other => {
                    return Err(TandemError::Config(format!(
                        "TANDEM_USE_QUEUE must be a boolean, got '{}'",
                        other
                    )))
                }
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.translator.endpoint.trim().is_empty() {
            return Err(TandemError::Config("translator.endpoint must not be empty".to_string()));
        }
        if self.translator.timeout_secs == 0 {
            return Err(TandemError::Config("translator.timeout_secs must be positive".to_string()));
        }
        if self.translator.max_retries == 0 {
            return Err(TandemError::Config("translator.max_retries must be at least 1".to_string()));
        }
        if self.queue.batch_size == 0 {
            return Err(TandemError::Config("queue.batch_size must be at least 1".to_string()));
        }
        if self.queue.max_delivery_count == 0 {
            return Err(TandemError::Config(
                "queue.max_delivery_count must be at least 1".to_string(),
            ));
        }
        if self.queue.visibility_timeout_secs == 0 {
            return Err(TandemError::Config(
                "queue.visibility_timeout_secs must be positive".to_string(),
            ));
        }
        if self.batch.reference_translations.len() > MAX_REFERENCE_TRANSLATIONS {
            return Err(TandemError::Config(format!(
                "batch.reference_translations accepts at most {} entries",
                MAX_REFERENCE_TRANSLATIONS
            )));
        }
        Ok(())
    }

    /// Translator base URL without a trailing slash
    pub fn translator_base_url(&self) -> &str {
        self.translator.endpoint.trim_end_matches('/')
    }

    pub fn jobs_db_path(&self) -> PathBuf {
        self.data_dir.join("jobs.db")
    }

    pub fn queue_db_path(&self) -> PathBuf {
        self.data_dir.join("queue.db")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("log")
    }
}

impl QueueConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }
}
