//! CLI argument definitions for the Nadhir application.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Nadhir — a semantic knowledge store for civil and weather alerts.
#[derive(Parser, Debug)]
#[command(name = "nadhir", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Data directory for the SQLite database and feed snapshots.
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Ingest a feed snapshot into the store.
    Ingest {
        /// Path to the GeoJSON feed file. Defaults to feed.json in the
        /// data directory.
        #[arg(long = "feed")]
        feed: Option<PathBuf>,
    },
    /// Query the store with free text and print ranked alerts.
    Query {
        /// The question or search phrase.
        text: String,

        /// Number of alerts to return (defaults to the configured value).
        #[arg(short = 'k', long = "k")]
        k: Option<usize>,

        /// Restrict governorate matches to this region id.
        #[arg(long = "region")]
        region: Option<String>,
    },
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > NADHIR_CONFIG env var > ~/.nadhir/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("NADHIR_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the data directory path.
    ///
    /// Priority: --data-dir flag > config file value.
    /// Returns `None` if not overridden (use config default).
    pub fn resolve_data_dir(&self) -> Option<String> {
        self.data_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
    }

    /// Resolve the log level.
    ///
    /// Priority: --log-level flag > config file value.
    pub fn resolve_log_level(&self) -> Option<String> {
        self.log_level.clone()
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".nadhir").join("config.toml");
    }
    PathBuf::from("config.toml")
}
