//! CLI argument definitions for the triage binary.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use triage_core::config::TriageConfig;
use triage_core::error::TriageError;

/// Env var naming the config file when `--config` is absent.
pub const ENV_CONFIG: &str = "TRIAGE_CONFIG";

/// Support ticket triage: k-NN classification over an Endee vector index.
#[derive(Parser, Debug)]
#[command(name = "triage", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// API server port.
    #[arg(short = 'p', long = "port", global = true)]
    pub port: Option<u16>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the HTTP API (the default).
    Serve,
    /// Create the configured index. Safe to re-run.
    SetupIndex,
    /// Embed and index a JSON array of labeled tickets.
    IndexTickets {
        /// File holding `[{id, text, category, priority}, ...]`.
        file: PathBuf,
    },
    /// Classify one ticket and print the result as JSON.
    Classify {
        text: String,
        /// Neighbors to vote over; the configured value when absent.
        #[arg(short = 'k', long = "top-k")]
        top_k: Option<usize>,
    },
    /// Delete the configured index and its stored labels.
    DeleteIndex,
}

impl CliArgs {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }

    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > TRIAGE_CONFIG env var > ./triage.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var(ENV_CONFIG) {
            return PathBuf::from(p);
        }
        PathBuf::from("triage.toml")
    }

    /// Apply flag overrides on top of file and env settings.
    pub fn apply_to(&self, config: &mut TriageConfig) {
        if let Some(port) = self.port {
            config.general.port = port;
        }
        if let Some(ref level) = self.log_level {
            config.general.log_level = level.clone();
        }
    }

    /// Log filter directive.
    ///
    /// Priority: --log-level flag > RUST_LOG > config file value.
    pub fn resolve_log_filter(&self, rust_log: Option<String>, config_level: &str) -> String {
        if let Some(ref level) = self.log_level {
            return level.clone();
        }
        rust_log
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| config_level.to_string())
    }
}

/// Read the config file without logging, so the caller can report failures
/// once the subscriber is up.
///
/// A missing file yields defaults. An unreadable or malformed file is an error.
pub fn load_config(path: &Path) -> Result<TriageConfig, TriageError> {
    if path.exists() {
        TriageConfig::load(path)
    } else {
        Ok(TriageConfig::default())
    }
}
