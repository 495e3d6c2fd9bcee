//! CLI argument definitions for the docchat replay tool.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::PathBuf;

/// docchat: replay a recorded answer stream through the conversation
/// controller and print the resulting conversation.
#[derive(Parser, Debug)]
#[command(name = "docchat", version, about)]
pub struct CliArgs {
    /// The question to send.
    pub question: String,

    /// File holding the recorded event stream (`data:{...}` events).
    #[arg(short = 't', long = "transcript")]
    pub transcript: PathBuf,

    /// Stored conversation (JSON) to continue from.
    #[arg(long = "conversation")]
    pub conversation: Option<PathBuf>,

    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Feed the transcript to the controller in chunks of this many bytes.
    #[arg(long = "chunk-size", default_value_t = 64)]
    pub chunk_size: usize,

    /// Stop after this many chunks, as if the connection dropped.
    #[arg(long = "fail-after")]
    pub fail_after: Option<usize>,

    /// Id of a document uploaded with the question. Repeatable.
    #[arg(short = 'd', long = "document")]
    pub documents: Vec<String>,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > DOCCHAT_CONFIG env var > platform default (~/.docchat/config.toml).
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("DOCCHAT_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the log level.
    ///
    /// Priority: --log-level flag > config file value.
    pub fn resolve_log_level(&self, config_level: &str) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config_level.to_string())
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".docchat").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".docchat").join("config.toml");
    }
    PathBuf::from("config.toml")
}
