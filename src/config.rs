use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::bert_engine::ModelConfig;
use crate::language::NormalizerConfig;

#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Server host to bind to
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Server port to bind to
    #[arg(long, env = "PORT", default_value = "8000")]
    pub port: u16,

    /// Model ID from Hugging Face Hub
    #[arg(long, env = "MODEL_ID")]
    pub model_id: Option<String>,

    /// Local path to model directory
    #[arg(long, env = "MODEL_PATH")]
    pub model_path: Option<PathBuf>,

    /// Model revision/branch on Hugging Face
    #[arg(long, env = "MODEL_REVISION", default_value = "main")]
    pub model_revision: String,

    /// Use PyTorch weights instead of safetensors
    #[arg(long, env = "USE_PTH")]
    pub use_pth: bool,

    /// Run on CPU instead of GPU
    #[arg(long, env = "CPU_ONLY")]
    pub cpu_only: bool,

    /// Maximum sequence length; longer inputs are truncated
    #[arg(long, env = "MAX_SEQUENCE_LENGTH", default_value = "512")]
    pub max_sequence_length: usize,

    /// Labels mapping in format "0=Improdutivo,1=Produtivo"
    #[arg(long, env = "ID2LABEL")]
    pub id2label: Option<String>,

    /// Load the model at startup instead of on the first request
    #[arg(long, env = "PRELOAD_MODEL")]
    pub preload_model: bool,

    /// Upper bound for a single inference call, in seconds
    #[arg(long, env = "INFERENCE_TIMEOUT_SECS", default_value = "30")]
    pub inference_timeout_secs: u64,

    /// Language the classifier expects (ISO 639-1)
    #[arg(long, env = "TARGET_LANGUAGE", default_value = "pt")]
    pub target_language: String,

    /// Language assumed when detection fails or the text is too short
    #[arg(long, env = "FALLBACK_LANGUAGE", default_value = "en")]
    pub fallback_language: String,

    /// Texts shorter than this many characters skip language detection
    #[arg(long, env = "MIN_DETECTION_CHARS", default_value = "10")]
    pub min_detection_chars: usize,

    /// Google Translate API key; translation is disabled without it
    #[arg(long, env = "GOOGLE_TRANSLATE_API_KEY", hide_env_values = true)]
    pub translate_api_key: Option<String>,

    /// Translation endpoint
    #[arg(
        long,
        env = "TRANSLATE_URL",
        default_value = "https://translation.googleapis.com/language/translate/v2"
    )]
    pub translate_url: String,

    /// Timeout for translation calls, in seconds
    #[arg(long, env = "TRANSLATION_TIMEOUT_SECS", default_value = "10")]
    pub translation_timeout_secs: u64,

    /// Maximum number of cached translations
    #[arg(long, env = "TRANSLATION_CACHE_SIZE", default_value = "10000")]
    pub translation_cache_size: usize,

    /// Translate replies back into the sender's language
    #[arg(long, env = "BACK_TRANSLATE")]
    pub back_translate: bool,

    /// Signature appended to suggested replies
    #[arg(long, env = "REPLY_SIGNATURE", default_value = "Equipe de Atendimento")]
    pub reply_signature: String,

    /// CSV file receiving one line per classification
    #[arg(long, env = "HISTORY_FILE")]
    pub history_file: Option<PathBuf>,

    /// Maximum accepted upload size, in bytes
    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value = "10485760")]
    pub max_upload_bytes: usize,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,
}

impl From<&Config> for ModelConfig {
    fn from(config: &Config) -> Self {
        Self {
            model_id: config.model_id.clone(),
            model_path: config.model_path.clone(),
            revision: config.model_revision.clone(),
            use_pth: config.use_pth,
            cpu: config.cpu_only,
            max_sequence_length: config.max_sequence_length,
            id2label: config.parse_id2label(),
        }
    }
}

impl From<&Config> for NormalizerConfig {
    fn from(config: &Config) -> Self {
        Self {
            target_language: config.target_language.clone(),
            fallback_language: config.fallback_language.clone(),
            min_detection_chars: config.min_detection_chars,
            translation_timeout: Duration::from_secs(config.translation_timeout_secs),
        }
    }
}

impl Config {
    pub fn parse_id2label(&self) -> Option<HashMap<u32, String>> {
        self.id2label.as_deref().map(parse_id2label)
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.inference_timeout_secs)
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_id2label(labels: &str) -> HashMap<u32, String> {
    labels
        .split(',')
        .filter_map(|pair| {
            let mut parts = pair.split('=');
            let id = parts.next()?.trim().parse().ok()?;
            let label = parts.next()?.trim().to_string();
            Some((id, label))
        })
        .collect()
}
