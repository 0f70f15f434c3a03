// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Destinations for decoded log messages.
//!
//! Every stream gets a [`SinkPair`]: one sink for the primary source tag (stdout) and one
//! for the secondary tag (stderr). Sinks are provisioned per stream by a [`SinkFactory`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::config::{DEFAULT_PRIMARY_SOURCE, DEFAULT_SECONDARY_SOURCE};
use crate::entry::LogMessage;
use crate::errors::SinkError;
use crate::registry::StreamInfo;

/// Append-only destination for one channel of a stream.
#[async_trait]
pub trait Sink: Send {
    async fn write_entry(&mut self, msg: &LogMessage) -> Result<(), SinkError>;

    /// Flushes and releases the sink. Writing after close is an error.
    async fn close(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Creates the sinks for a newly started stream.
#[async_trait]
pub trait SinkFactory: Send + Sync {
    async fn provision(&self, info: &StreamInfo) -> Result<SinkPair, SinkError>;
}

/// Source tags that select the primary and secondary sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRouting {
    pub primary: String,
    pub secondary: String,
}

impl SourceRouting {
    pub fn new(primary: impl Into<String>, secondary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            secondary: secondary.into(),
        }
    }
}

impl Default for SourceRouting {
    fn default() -> Self {
        Self::new(DEFAULT_PRIMARY_SOURCE, DEFAULT_SECONDARY_SOURCE)
    }
}

/// The primary and secondary sinks of one stream.
pub struct SinkPair {
    pub primary: Box<dyn Sink>,
    pub secondary: Box<dyn Sink>,
}

impl SinkPair {
    pub fn new(primary: Box<dyn Sink>, secondary: Box<dyn Sink>) -> Self {
        Self { primary, secondary }
    }

    /// Selects the sink for `source`, or `None` when the tag matches neither.
    pub fn route(&mut self, source: &str, routing: &SourceRouting) -> Option<&mut dyn Sink> {
        if source == routing.primary {
            Some(self.primary.as_mut())
        } else if source == routing.secondary {
            Some(self.secondary.as_mut())
        } else {
            None
        }
    }

    /// Closes both sinks, reporting the first failure.
    pub async fn close(&mut self) -> Result<(), SinkError> {
        let primary = self.primary.close().await;
        let secondary = self.secondary.close().await;
        primary.and(secondary)
    }
}

/// Appends raw message lines to a file.
///
/// Lines are written exactly as decoded: complete lines already carry their terminator and
/// partial chunks are written back to back.
pub struct FileSink {
    path: PathBuf,
    file: Option<fs::File>,
}

impl FileSink {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            file: Some(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Sink for FileSink {
    async fn write_entry(&mut self, msg: &LogMessage) -> Result<(), SinkError> {
        let file = self.file.as_mut().ok_or(SinkError::Closed)?;
        file.write_all(&msg.line).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_data().await?;
        }
        Ok(())
    }
}

/// Provisions `<base_dir>/<container_id>/stdout` and `<base_dir>/<container_id>/stderr`.
pub struct FileSinkFactory {
    base_dir: PathBuf,
}

impl FileSinkFactory {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn log_dir(&self, info: &StreamInfo) -> PathBuf {
        self.base_dir.join(&info.container_id)
    }
}

#[async_trait]
impl SinkFactory for FileSinkFactory {
    async fn provision(&self, info: &StreamInfo) -> Result<SinkPair, SinkError> {
        if info.container_id.is_empty() || info.container_id.contains(['/', '\\']) {
            return Err(SinkError::Rejected(format!(
                "invalid container id {:?}",
                info.container_id
            )));
        }

        let log_dir = self.log_dir(info);
        fs::create_dir_all(&log_dir).await?;
        debug!("Provisioning log files in {}", log_dir.display());

        let stdout = FileSink::open(log_dir.join("stdout")).await?;
        let stderr = FileSink::open(log_dir.join("stderr")).await?;
        Ok(SinkPair::new(Box::new(stdout), Box::new(stderr)))
    }
}

#[cfg(test)]
pub(crate) mod testing;
