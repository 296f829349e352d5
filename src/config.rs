use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::completion::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::engine::GenerationParams;
use crate::relay::RelayConfig;

pub const TOKEN_ENV: &str = "HUGGINGFACEHUB_API_TOKEN";

#[derive(Debug, Clone, Parser)]
#[command(author, version, about = "Classify customer comments by category and sentiment", long_about = None)]
pub struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Serve tool calls over stdin/stdout
    Worker(WorkerConfig),
    /// Connect to a worker, analyze one comment, disconnect
    Smoke(ControllerConfig),
    /// Analyze a single comment
    Analyze {
        comment: String,
        #[command(flatten)]
        controller: ControllerConfig,
    },
    /// Analyze comments from a file (one per line) or a sample set
    Batch(BatchConfig),
    /// Print statistics for a JSON file of analysis results
    Stats {
        #[arg(long)]
        input: PathBuf,
        #[command(flatten)]
        controller: ControllerConfig,
    },
    /// Print the built-in sample comments
    Samples {
        #[arg(default_value = "all")]
        set: String,
    },
    /// Run the HTTP API
    Serve(ServerConfig),
}

#[derive(Debug, Clone, Args)]
pub struct WorkerConfig {
    /// Access token for the completion service
    #[arg(long, env = TOKEN_ENV, hide_env_values = true)]
    pub api_token: Option<String>,

    /// Base URL of an OpenAI-compatible chat-completions endpoint
    #[arg(long, env = "COMPLETION_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Model identifier sent with every request
    #[arg(long, env = "COMPLETION_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Maximum tokens generated per classification
    #[arg(long, env = "MAX_TOKENS", default_value = "200")]
    pub max_tokens: u32,

    /// Sampling temperature
    #[arg(long, env = "TEMPERATURE", default_value = "0.1")]
    pub temperature: f32,

    /// HTTP timeout for completion requests, in seconds
    #[arg(long, env = "COMPLETION_TIMEOUT_SECS", default_value = "30")]
    pub completion_timeout_secs: u64,

    /// Directory holding classification.txt and sentiment.txt; built-in prompts otherwise
    #[arg(long, env = "PROMPTS_DIR")]
    pub prompts_dir: Option<PathBuf>,
}

impl WorkerConfig {
    pub fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.completion_timeout_secs)
    }
}

#[derive(Debug, Clone, Args)]
pub struct ControllerConfig {
    /// Worker executable; defaults to this binary
    #[arg(long, env = "WORKER_COMMAND")]
    pub worker_command: Option<PathBuf>,

    /// Extra arguments passed to the worker after `worker`
    #[arg(
        long = "worker-arg",
        env = "WORKER_ARGS",
        value_delimiter = ' ',
        allow_hyphen_values = true
    )]
    pub worker_args: Vec<String>,

    /// Seconds to wait for the worker handshake
    #[arg(long, env = "HANDSHAKE_TIMEOUT_SECS", default_value = "30")]
    pub handshake_timeout_secs: u64,

    /// Seconds to wait for each tool call
    #[arg(long, env = "CALL_TIMEOUT_SECS", default_value = "120")]
    pub call_timeout_secs: u64,
}

impl ControllerConfig {
    pub fn relay_config(&self) -> std::io::Result<RelayConfig> {
        let program = match &self.worker_command {
            Some(program) => program.clone(),
            None => std::env::current_exe()?,
        };
        let mut config = RelayConfig::new(program)
            .handshake_timeout(Duration::from_secs(self.handshake_timeout_secs))
            .call_timeout(Duration::from_secs(self.call_timeout_secs));
        if self.worker_command.is_none() {
            config = config.arg("worker");
        }
        for arg in &self.worker_args {
            config = config.arg(arg);
        }
        Ok(config)
    }
}

#[derive(Debug, Clone, Args)]
pub struct BatchConfig {
    /// File with one comment per line; blank lines are ignored
    #[arg(long, conflicts_with = "sample")]
    pub input: Option<PathBuf>,

    /// Built-in sample set: travel, accommodation, food, mixed, all
    #[arg(long)]
    pub sample: Option<String>,

    /// Write results as JSON to this file
    #[arg(long)]
    pub output: Option<PathBuf>,

    #[command(flatten)]
    pub controller: ControllerConfig,
}

#[derive(Debug, Clone, Args)]
pub struct ServerConfig {
    /// Server host to bind to
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Server port to bind to
    #[arg(long, env = "PORT", default_value = "8000")]
    pub port: u16,

    /// Connect to the worker at startup instead of waiting for POST /connect
    #[arg(long, env = "CONNECT_ON_START")]
    pub connect_on_start: bool,

    #[command(flatten)]
    pub controller: ControllerConfig,
}

impl ServerConfig {
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Non-empty, trimmed lines.
pub fn split_comments(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
