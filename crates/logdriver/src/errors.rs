// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for decoding, sinks, the stream registry and configuration.

use std::io;

/// Failure to pull one message out of a log stream.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The writer closed its end at a frame boundary. Not a failure.
    #[error("end of stream")]
    EndOfStream,

    #[error("could not read a size header: stream ended after {read} of 4 bytes")]
    TruncatedHeader { read: usize },

    #[error("log message is too large ({len} > {max})")]
    TooLarge { len: usize, max: usize },

    /// A previous frame exceeded the size limit; this decoder must not be used further.
    #[error("decoder abandoned after an oversized frame")]
    Poisoned,

    #[error("could not read a log entry (size={expected}): got {read} bytes after {attempts} attempts")]
    ShortRead {
        expected: usize,
        read: usize,
        attempts: usize,
    },

    #[error("error reading log stream: {0}")]
    Io(#[from] io::Error),

    #[error("error unmarshalling log entry (size={len}): {source}")]
    Corrupt {
        len: usize,
        #[source]
        source: prost::DecodeError,
    },
}

impl DecodeError {
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, DecodeError::EndOfStream)
    }

    /// Malformed or oversized length header.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            DecodeError::TruncatedHeader { .. } | DecodeError::TooLarge { .. } | DecodeError::Poisoned
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("sink I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("sink is closed")]
    Closed,

    #[error("sink rejected entry: {0}")]
    Rejected(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("logger for {0:?} already exists")]
    Duplicate(String),

    #[error("error opening log stream {id:?}: {source}")]
    Open {
        id: String,
        #[source]
        source: io::Error,
    },

    #[error("error provisioning sinks for {id:?}: {source}")]
    Provision {
        id: String,
        #[source]
        source: SinkError,
    },

    #[error("logger for {0:?} was stopped while starting")]
    StoppedWhileStarting(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
