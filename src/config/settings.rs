//! Configuration structures for logtail

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top level configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Reader pipeline settings
    pub reader: ReaderConfig,
    /// Harvester settings
    pub harvester: HarvesterConfig,
}

/// Settings for one reader pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Encoding name, empty for plain
    pub encoding: String,
    /// Size of a single raw read
    pub buffer_size: usize,
    /// Maximum number of bytes a single event may hold
    pub max_bytes: usize,
    /// Tailing behaviour
    pub tail: TailConfig,
    /// Multiline grouping, disabled when absent
    pub multiline: Option<MultilineConfig>,
    /// JSON unwrapping, disabled when absent
    pub json: Option<JsonConfig>,
}

/// Backoff and close conditions of the tailing reader
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TailConfig {
    /// Initial wait after reaching end of file, in milliseconds
    pub backoff_ms: u64,
    /// Multiplier applied to the wait after every empty read
    pub backoff_factor: u32,
    /// Upper bound of the wait, in milliseconds
    pub max_backoff_ms: u64,
    /// Close the source after this many seconds without new data, 0 disables
    pub close_inactive_secs: u64,
    /// Close when the path no longer exists
    pub close_removed: bool,
    /// Close when the path points at a different file
    pub close_renamed: bool,
    /// Close as soon as end of file is reached
    pub close_eof: bool,
}

/// Multiline grouping settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MultilineConfig {
    /// Regular expression deciding line continuation
    pub pattern: String,
    /// Invert the pattern match
    pub negate: bool,
    /// Match against the current line (`after`) or the previous one (`before`)
    #[serde(rename = "match")]
    pub match_mode: String,
    /// Maximum number of lines folded into one event
    pub max_lines: usize,
    /// Pattern that ends the current event immediately
    pub flush_pattern: Option<String>,
    /// Flush a pending event after this many milliseconds without input, 0 disables
    pub timeout_ms: u64,
}

/// JSON unwrapping settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonConfig {
    /// Key whose string value replaces the content
    pub message_key: String,
    /// Place decoded keys at the top of the fields instead of under `json`
    pub keys_under_root: bool,
    /// Let decoded keys replace fields that already exist
    pub overwrite_keys: bool,
    /// Attach an `error` field when decoding fails
    pub add_error_key: bool,
}

/// Harvester settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvesterConfig {
    /// Maximum number of concurrently running harvesters, 0 for unlimited
    pub harvester_limit: usize,
    /// Capacity of the event channel towards the publisher
    pub channel_size: usize,
    /// Publish only events matching one of these patterns, empty for all
    pub include_lines: Vec<String>,
    /// Drop events matching any of these patterns
    pub exclude_lines: Vec<String>,
    /// Stop a harvester after this many seconds regardless of activity, 0 disables
    pub close_timeout_secs: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            encoding: "plain".to_string(),
            buffer_size: 16 * 1024,
            max_bytes: 10 * 1024 * 1024, // 10MB
            tail: TailConfig::default(),
            multiline: None,
            json: None,
        }
    }
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            backoff_ms: 1000,
            backoff_factor: 2,
            max_backoff_ms: 10_000,
            close_inactive_secs: 300,
            close_removed: true,
            close_renamed: false,
            close_eof: false,
        }
    }
}

impl Default for MultilineConfig {
    fn default() -> Self {
        Self {
            pattern: String::new(),
            negate: false,
            match_mode: "after".to_string(),
            max_lines: 500,
            flush_pattern: None,
            timeout_ms: 5000,
        }
    }
}

impl Default for HarvesterConfig {
    fn default() -> Self {
        Self {
            harvester_limit: 0,
            channel_size: 1024,
            include_lines: Vec::new(),
            exclude_lines: Vec::new(),
            close_timeout_secs: 0,
        }
    }
}

impl TailConfig {
    /// Initial backoff
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    /// Backoff ceiling
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Inactivity limit, if enabled
    pub fn close_inactive(&self) -> Option<Duration> {
        (self.close_inactive_secs > 0).then(|| Duration::from_secs(self.close_inactive_secs))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.backoff_ms == 0 {
            return Err(Error::Config("backoff must be greater than zero".to_string()));
        }
        if self.backoff_factor == 0 {
            return Err(Error::Config("backoff_factor must be at least 1".to_string()));
        }
        if self.max_backoff_ms < self.backoff_ms {
            return Err(Error::Config("max_backoff cannot be smaller than backoff".to_string()));
        }
        Ok(())
    }
}

impl MultilineConfig {
    /// Flush timeout, if enabled
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

impl HarvesterConfig {
    /// Lifetime limit of a harvester, if enabled
    pub fn close_timeout(&self) -> Option<Duration> {
        (self.close_timeout_secs > 0).then(|| Duration::from_secs(self.close_timeout_secs))
    }
}

impl ReaderConfig {
    /// Validate configuration.
    ///
    /// Encoding names and multiline patterns are checked when a pipeline is built.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(Error::Config("buffer_size must be greater than zero".to_string()));
        }
        if self.max_bytes == 0 {
            return Err(Error::Config("max_bytes must be greater than zero".to_string()));
        }
        if let Some(multiline) = &self.multiline {
            if multiline.pattern.is_empty() {
                return Err(Error::Config("multiline pattern cannot be empty".to_string()));
            }
        }
        self.tail.validate()
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.harvester.channel_size == 0 {
            return Err(Error::Config("channel_size must be greater than zero".to_string()));
        }
        self.reader.validate()
    }
}
