//! Exchange configuration
//!
//! Loaded from a JSON file. Every field except `data_dir` has a default.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::encoding::TextOptions;
use crate::errors::{ExchangeError, ExchangeResult};
use crate::observability::Severity;

/// Configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Data directory (required)
    pub data_dir: String,

    /// Directory under `data_dir` holding every result namespace
    #[serde(default = "default_cache_dir_name")]
    pub cache_dir_name: String,

    /// Field delimiter for text transfers
    #[serde(default = "default_text_delimiter")]
    pub text_delimiter: char,

    /// NULL marker for text transfers
    #[serde(default = "default_null_token")]
    pub null_token: String,

    /// Use binary transfers when every column supports them
    #[serde(default = "default_binary_transfer")]
    pub binary_transfer: bool,

    /// Size of copy data chunks sent by the peer service
    #[serde(default = "default_copy_chunk_size")]
    pub copy_chunk_size: usize,

    /// Largest wire message accepted from a peer
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Address the peer service listens on
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Connection establishment timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Minimum severity written to the structured log
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_cache_dir_name() -> String {
    "result_cache".to_string()
}
fn default_text_delimiter() -> char {
    '\t'
}
fn default_null_token() -> String {
    "\\N".to_string()
}
fn default_binary_transfer() -> bool {
    true
}
fn default_copy_chunk_size() -> usize {
    65536
} // 64KiB
fn default_max_message_size() -> usize {
    67108864
} // 64MiB
fn default_listen_address() -> String {
    "127.0.0.1:5544".to_string()
}
fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl ExchangeConfig {
    /// Configuration with every default and the given data directory
    pub fn with_data_dir(data_dir: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            cache_dir_name: default_cache_dir_name(),
            text_delimiter: default_text_delimiter(),
            null_token: default_null_token(),
            binary_transfer: default_binary_transfer(),
            copy_chunk_size: default_copy_chunk_size(),
            max_message_size: default_max_message_size(),
            listen_address: default_listen_address(),
            connect_timeout_ms: default_connect_timeout_ms(),
            log_level: default_log_level(),
        }
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> ExchangeResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            ExchangeError::config_invalid(format!("failed to read config: {}", e))
        })?;

        let config: ExchangeConfig = serde_json::from_str(&content).map_err(|e| {
            ExchangeError::config_invalid(format!("invalid config JSON: {}", e))
        })?;

        config.validate()?;

        Ok(config)
    }

    /// Validate field values
    pub fn validate(&self) -> ExchangeResult<()> {
        if self.data_dir.is_empty() {
            return Err(ExchangeError::config_invalid("data_dir must not be empty"));
        }

        if self.cache_dir_name.is_empty()
            || self.cache_dir_name.contains('/')
            || self.cache_dir_name == ".."
        {
            return Err(ExchangeError::config_invalid(format!(
                "invalid cache_dir_name: '{}'",
                self.cache_dir_name
            )));
        }

        if !self.text_delimiter.is_ascii() {
            return Err(ExchangeError::config_invalid(format!(
                "text_delimiter must be a single ASCII character, got {:?}",
                self.text_delimiter
            )));
        }

        self.text_options()
            .validate()
            .map_err(ExchangeError::config_invalid)?;

        if self.copy_chunk_size == 0 {
            return Err(ExchangeError::config_invalid("copy_chunk_size must be > 0"));
        }

        if self.max_message_size < self.copy_chunk_size {
            return Err(ExchangeError::config_invalid(
                "max_message_size must be >= copy_chunk_size",
            ));
        }

        if self.connect_timeout_ms == 0 {
            return Err(ExchangeError::config_invalid("connect_timeout_ms must be > 0"));
        }

        self.log_severity()?;

        Ok(())
    }

    /// Root directory holding every namespace
    pub fn namespace_root(&self) -> PathBuf {
        Path::new(&self.data_dir).join(&self.cache_dir_name)
    }

    /// Text encoding options
    pub fn text_options(&self) -> TextOptions {
        TextOptions {
            delimiter: self.text_delimiter as u8,
            null_token: self.null_token.clone(),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn log_severity(&self) -> ExchangeResult<Severity> {
        self.log_level.parse().map_err(ExchangeError::config_invalid)
    }
}
