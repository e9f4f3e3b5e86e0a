//! `dmc` configuration file.
//!
//! ```toml
//! [client]
//! heartbeat_interval_secs = 20
//! reconnect_delay_ms = 1000
//!
//! [output]
//! types = ["chat", "gift"]
//! show_raw = false
//! ```

use danmaku::{ClientConfig, MessageType};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

use crate::cli::Args;
use crate::error::{AppError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub client: ClientConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Message types to print. Empty prints everything.
    pub types: Vec<String>,
    /// Append the raw notification JSON to pretty output.
    pub show_raw: bool,
}

impl AppConfig {
    /// Load from `path`, or from the default location when it exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path().filter(|p| p.is_file()) {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };

        debug!("Loading config from {}", path.display());
        let content = std::fs::read_to_string(&path)?;
        Self::parse(&content, path)
    }

    fn parse(content: &str, path: PathBuf) -> Result<Self> {
        toml::from_str(content).map_err(|source| AppError::Config { path, source })
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("dmc").join("config.toml"))
    }

    /// Apply command line overrides and validate the result.
    pub fn merge_args(mut self, args: &Args) -> Result<Self> {
        if let Some(secs) = args.heartbeat {
            self.client.heartbeat_interval_secs = secs;
        }
        if let Some(ms) = args.reconnect_delay {
            self.client.reconnect_delay_ms = ms;
        }
        if !args.types.is_empty() {
            self.output.types = args.types.clone();
        }
        self.client.validate()?;
        Ok(self)
    }

    pub fn type_filter(&self) -> Result<Vec<MessageType>> {
        self.output
            .types
            .iter()
            .map(|t| {
                MessageType::from_str(t)
                    .map_err(|_| AppError::InvalidInput(format!("unknown message type: {}", t)))
            })
            .collect()
    }
}
