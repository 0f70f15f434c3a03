// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wire schema of a container log record and the decoded message handed to sinks.
//!
//! The record layout must match what the container runtime writes into the log FIFO:
//!
//! ```text
//! message LogEntry {
//!     string source = 1;
//!     int64 time_nano = 2;
//!     bytes line = 3;
//!     bool partial = 4;
//!     PartialLogEntryMetadata partial_log_metadata = 5;
//! }
//!
//! message PartialLogEntryMetadata {
//!     bool last = 1;
//!     string id = 2;
//!     int32 ordinal = 3;
//! }
//! ```

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use prost::Message;

/// Size in bytes of the big-endian length header that precedes every record.
pub const FRAME_HEADER_LEN: usize = 4;

/// One serialized log record as written by the runtime.
#[derive(Clone, PartialEq, prost::Message)]
pub struct LogEntry {
    #[prost(string, tag = "1")]
    pub source: String,
    #[prost(int64, tag = "2")]
    pub time_nano: i64,
    #[prost(bytes = "vec", tag = "3")]
    pub line: Vec<u8>,
    #[prost(bool, tag = "4")]
    pub partial: bool,
    #[prost(message, optional, tag = "5")]
    pub partial_log_metadata: Option<PartialLogEntryMetadata>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PartialLogEntryMetadata {
    #[prost(bool, tag = "1")]
    pub last: bool,
    #[prost(string, tag = "2")]
    pub id: String,
    #[prost(int32, tag = "3")]
    pub ordinal: i32,
}

/// Chunk information for a line that the producer split across several records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialMetadata {
    pub id: String,
    pub ordinal: i32,
    pub last: bool,
}

/// A decoded log record, ready to be written to a sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    /// Channel the line was emitted on, e.g. `stdout` or `stderr`.
    pub source: String,
    /// Line content. Complete lines carry a trailing `\n`; partial chunks are left as-is.
    pub line: Vec<u8>,
    /// Nanoseconds since the Unix epoch, as reported by the producer.
    pub timestamp_nanos: i64,
    pub partial: Option<PartialMetadata>,
}

impl LogMessage {
    /// Converts a decoded record into a message, moving the line out of `entry`.
    ///
    /// A complete line always gets one `\n` terminator appended. Partial chunks are never
    /// terminated; joining them is up to the sink.
    pub fn from_entry(entry: &mut LogEntry) -> Self {
        let partial = if entry.partial || entry.partial_log_metadata.is_some() {
            let md = entry.partial_log_metadata.take().unwrap_or_default();
            Some(PartialMetadata {
                id: md.id,
                ordinal: md.ordinal,
                last: md.last,
            })
        } else {
            None
        };

        let mut line = std::mem::take(&mut entry.line);
        if partial.is_none() {
            line.push(b'\n');
        }

        Self {
            source: std::mem::take(&mut entry.source),
            line,
            timestamp_nanos: entry.time_nano,
            partial,
        }
    }

    pub fn is_partial(&self) -> bool {
        self.partial.is_some()
    }

    /// Wall-clock time of the record. Pre-epoch timestamps are kept rather than clamped.
    pub fn timestamp(&self) -> SystemTime {
        let magnitude = Duration::from_nanos(self.timestamp_nanos.unsigned_abs());
        if self.timestamp_nanos >= 0 {
            UNIX_EPOCH + magnitude
        } else {
            UNIX_EPOCH - magnitude
        }
    }
}

/// Appends `entry` to `out` as one frame: a 4 byte big-endian length followed by the
/// protobuf encoding of the record.
pub fn encode_frame(entry: &LogEntry, out: &mut Vec<u8>) {
    let body = entry.encode_to_vec();
    out.reserve(FRAME_HEADER_LEN + body.len());
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(&body);
}
