// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::errors::ConfigError;

/// Maximum size of one serialized record. The runtime caps a line well below this.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1_000_000;
/// Largest `max_frame_size` accepted. The decoder allocates up to this much per stream.
pub const MAX_FRAME_SIZE_CEILING: usize = 64 * 1024 * 1024;
pub const DEFAULT_INITIAL_BUFFER_SIZE: usize = 2048;
pub const DEFAULT_MAX_READ_RETRIES: usize = 20_000;
pub const DEFAULT_BASE_DIR: &str = "/data/output";
pub const DEFAULT_PRIMARY_SOURCE: &str = "stdout";
pub const DEFAULT_SECONDARY_SOURCE: &str = "stderr";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Limits applied by a [`crate::decoder::FrameDecoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderConfig {
    /// Frames whose length header exceeds this are rejected and the stream abandoned.
    pub max_frame_size: usize,
    /// Scratch buffer size the decoder starts with and shrinks back to.
    pub initial_buffer_size: usize,
    /// How many times a read that hit end-of-stream mid-frame is retried.
    pub max_read_retries: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            initial_buffer_size: DEFAULT_INITIAL_BUFFER_SIZE,
            max_read_retries: DEFAULT_MAX_READ_RETRIES,
        }
    }
}

/// What a consumer does after a decode error other than end-of-stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeErrorPolicy {
    /// Log the error and stop consuming the stream.
    #[default]
    Terminate,
    /// Drop the decoder state and keep reading from the current position. There is no
    /// guarantee the stream is still on a frame boundary.
    Rebind,
}

impl FromStr for DecodeErrorPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "terminate" => Ok(DecodeErrorPolicy::Terminate),
            "rebind" => Ok(DecodeErrorPolicy::Rebind),
            other => Err(ConfigError::Invalid(format!(
                "Invalid decode error policy '{}'. Must be one of: terminate, rebind",
                other
            ))),
        }
    }
}

/// Configuration for the log driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Root directory for per-container log files
    pub base_dir: PathBuf,
    pub decoder: DecoderConfig,
    /// Source tag routed to the primary sink
    pub primary_source: String,
    /// Source tag routed to the secondary sink
    pub secondary_source: String,
    pub decode_error_policy: DecodeErrorPolicy,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from(DEFAULT_BASE_DIR),
            decoder: DecoderConfig::default(),
            primary_source: DEFAULT_PRIMARY_SOURCE.to_string(),
            secondary_source: DEFAULT_SECONDARY_SOURCE.to_string(),
            decode_error_policy: DecodeErrorPolicy::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_dir = env::var("LOGDRIVER_BASE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_BASE_DIR));
        let max_frame_size = env::var("LOGDRIVER_MAX_FRAME_SIZE")
            .ok()
            .and_then(|val| val.parse::<usize>().ok())
            .unwrap_or(DEFAULT_MAX_FRAME_SIZE);
        let max_read_retries = env::var("LOGDRIVER_MAX_READ_RETRIES")
            .ok()
            .and_then(|val| val.parse::<usize>().ok())
            .unwrap_or(DEFAULT_MAX_READ_RETRIES);
        let primary_source = env::var("LOGDRIVER_PRIMARY_SOURCE")
            .unwrap_or_else(|_| DEFAULT_PRIMARY_SOURCE.to_string());
        let secondary_source = env::var("LOGDRIVER_SECONDARY_SOURCE")
            .unwrap_or_else(|_| DEFAULT_SECONDARY_SOURCE.to_string());
        let decode_error_policy = match env::var("LOGDRIVER_ON_DECODE_ERROR") {
            Ok(val) => val.parse()?,
            Err(_) => DecodeErrorPolicy::default(),
        };
        let log_level = env::var("LOGDRIVER_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or_else(|_| "info".to_string());

        let config = Self {
            base_dir,
            decoder: DecoderConfig {
                max_frame_size,
                initial_buffer_size: DEFAULT_INITIAL_BUFFER_SIZE,
                max_read_retries,
            },
            primary_source,
            secondary_source,
            decode_error_policy,
            log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.decoder.max_frame_size == 0 {
            return Err(ConfigError::Invalid(
                "Maximum frame size must be greater than 0".to_string(),
            ));
        }

        if self.decoder.max_frame_size > MAX_FRAME_SIZE_CEILING {
            return Err(ConfigError::Invalid(format!(
                "Maximum frame size {} exceeds the limit of {} bytes",
                self.decoder.max_frame_size, MAX_FRAME_SIZE_CEILING
            )));
        }

        if self.decoder.max_read_retries == 0 {
            return Err(ConfigError::Invalid(
                "Read retry budget must be greater than 0".to_string(),
            ));
        }

        if self.primary_source.trim().is_empty() || self.secondary_source.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "Source tags cannot be empty".to_string(),
            ));
        }

        if self.primary_source == self.secondary_source {
            return Err(ConfigError::Invalid(format!(
                "Primary and secondary sources must differ, both are '{}'",
                self.primary_source
            )));
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }
}
