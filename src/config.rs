use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

pub const DEFAULT_ADVISOR_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const DEFAULT_ADVISOR_MODEL: &str = "tngtech/deepseek-r1t2-chimera:free";

/// Plant leaf disease scanner
#[derive(Parser, Debug, Clone)]
#[command(name = "agrishield")]
#[command(version)]
#[command(about = "Classifies plant leaf photos and explains the diagnosis")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 5000)]
    pub port: u16,

    /// Host to bind to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Maximum upload size in megabytes (1 to 1024)
    #[arg(long, env = "BODY_LIMIT_MB", default_value_t = 10,
          value_parser = clap::value_parser!(u64).range(1..=1024))]
    pub body_limit_mb: u64,

    /// Frozen TensorFlow graph of the classifier
    #[arg(long, env = "MODEL_PATH", default_value = "../model/plant_disease_model.pb")]
    pub model_path: PathBuf,

    /// Where to fetch the model from when MODEL_PATH does not exist
    #[arg(long, env = "MODEL_URL")]
    pub model_url: Option<String>,

    /// Name of the graph's input operation
    #[arg(long, env = "MODEL_INPUT_OP", default_value = "x")]
    pub model_input_op: String,

    /// Name of the graph's output operation
    #[arg(long, env = "MODEL_OUTPUT_OP", default_value = "Identity")]
    pub model_output_op: String,

    /// Newline separated class labels, in the model's output order
    #[arg(long, env = "CLASS_LIST_PATH")]
    pub class_list_path: Option<PathBuf>,

    /// Directory served under /static; uploads are stored in its uploads/ subfolder
    #[arg(long, env = "STATIC_DIR", default_value = "static")]
    pub static_dir: PathBuf,

    #[arg(long, env = "OPENROUTER_API_KEY", hide_env_values = true)]
    pub openrouter_api_key: Option<String>,

    #[arg(long, env = "OPENROUTER_URL", default_value = DEFAULT_ADVISOR_URL)]
    pub openrouter_url: String,

    #[arg(long, env = "OPENROUTER_MODEL", default_value = DEFAULT_ADVISOR_MODEL)]
    pub openrouter_model: String,

    /// Timeout for a single call to the knowledge API, in seconds
    #[arg(long, env = "ADVISOR_TIMEOUT_SECS", default_value_t = 30)]
    pub advisor_timeout_secs: u64,

    /// Retries on transport errors or 5xx replies (0 or 1)
    #[arg(long, env = "ADVISOR_MAX_RETRIES", default_value_t = 0,
          value_parser = clap::value_parser!(u8).range(0..=1))]
    pub advisor_max_retries: u8,
}

impl Config {
    /// Reads `.env` if present, then flags and environment.
    pub fn load() -> Self {
        dotenv::dotenv().ok();
        Config::parse()
    }

    pub fn body_limit_bytes(&self) -> usize {
        self.body_limit_mb as usize * 1024 * 1024
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.static_dir.join("uploads")
    }

    pub fn advisor_timeout(&self) -> Duration {
        Duration::from_secs(self.advisor_timeout_secs)
    }

    /// Empty keys count as unset.
    pub fn api_key(&self) -> Option<String> {
        self.openrouter_api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(String::from)
    }
}
