// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![allow(dead_code)]

pub mod mocks;

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use logdriver::entry::{encode_frame, LogEntry, PartialLogEntryMetadata};
use tokio::io::{AsyncRead, ReadBuf};

pub fn entry(source: &str, line: &[u8], time_nano: i64) -> LogEntry {
    LogEntry {
        source: source.to_string(),
        time_nano,
        line: line.to_vec(),
        partial: false,
        partial_log_metadata: None,
    }
}

pub fn partial_entry(source: &str, line: &[u8], id: &str, ordinal: i32, last: bool) -> LogEntry {
    LogEntry {
        partial: true,
        partial_log_metadata: Some(PartialLogEntryMetadata {
            last,
            id: id.to_string(),
            ordinal,
        }),
        ..entry(source, line, 0)
    }
}

pub fn frames(entries: &[LogEntry]) -> Vec<u8> {
    frames_with_boundaries(entries).0
}

/// Encodes `entries` and returns the offset where each frame ends.
pub fn frames_with_boundaries(entries: &[LogEntry]) -> (Vec<u8>, Vec<usize>) {
    let mut out = Vec::new();
    let mut boundaries = Vec::new();
    for e in entries {
        encode_frame(e, &mut out);
        boundaries.push(out.len());
    }
    (out, boundaries)
}

/// Delivers `data` in the given chunk sizes, cycling through `sizes`. Optionally reports a
/// spurious end-of-stream after every chunk that does not end on a frame boundary, the way a
/// FIFO reader can while the writer is mid-frame.
pub struct ChunkedReader {
    data: VecDeque<u8>,
    sizes: Vec<usize>,
    next_size: usize,
    consumed: usize,
    frame_boundaries: Option<Vec<usize>>,
    eof_pending: bool,
}

impl ChunkedReader {
    pub fn new(data: Vec<u8>, sizes: Vec<usize>) -> Self {
        Self {
            data: data.into(),
            sizes: if sizes.is_empty() { vec![1] } else { sizes },
            next_size: 0,
            consumed: 0,
            frame_boundaries: None,
            eof_pending: false,
        }
    }

    pub fn with_spurious_eof(mut self, frame_boundaries: Vec<usize>) -> Self {
        self.frame_boundaries = Some(frame_boundaries);
        self
    }
}

impl AsyncRead for ChunkedReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.eof_pending {
            self.eof_pending = false;
            return Poll::Ready(Ok(()));
        }

        let size = self.sizes[self.next_size % self.sizes.len()].max(1);
        self.next_size += 1;
        let n = size.min(buf.remaining()).min(self.data.len());
        let chunk: Vec<u8> = self.data.drain(..n).collect();
        buf.put_slice(&chunk);
        self.consumed += n;
        let mid_frame = match &self.frame_boundaries {
            Some(boundaries) => !boundaries.contains(&self.consumed),
            None => false,
        };
        if mid_frame && !self.data.is_empty() {
            self.eof_pending = true;
        }
        Poll::Ready(Ok(()))
    }
}

/// Creates a named pipe at `path`.
#[cfg(unix)]
pub fn mkfifo(path: &std::path::Path) {
    let status = std::process::Command::new("mkfifo")
        .arg(path)
        .status()
        .expect("failed to run mkfifo");
    assert!(status.success(), "mkfifo {} failed", path.display());
}
