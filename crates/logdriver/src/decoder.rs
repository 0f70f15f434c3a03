// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Length-prefixed frame decoder for container log streams.
//!
//! A stream is a sequence of frames, each a 4 byte big-endian length followed by that many
//! bytes of a serialized [`LogEntry`]. FIFO readers can observe a transient end-of-stream
//! while the writer is mid-frame, so reads that stop short are retried from the current
//! offset up to a fixed budget before the frame is given up on.

use prost::Message;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, trace};

use crate::config::DecoderConfig;
use crate::entry::{LogEntry, LogMessage, FRAME_HEADER_LEN};
use crate::errors::DecodeError;

/// Consecutive zero-length reads tolerated mid-frame. A writer that went away for good
/// returns end-of-stream on every read, so this bounds how long a dead stream is polled
/// independently of the overall retry budget.
pub const MAX_CONSECUTIVE_EMPTY_READS: usize = 16;

enum FillError {
    /// End-of-stream before any byte of the requested range arrived.
    Eof,
    Short { read: usize, attempts: usize },
    Io(std::io::Error),
}

/// Decodes [`LogMessage`]s one at a time from an async byte stream.
///
/// The scratch buffer grows to fit the largest frame seen and shrinks back to
/// `initial_buffer_size` once a frame that fits the default size is decoded. Progress is
/// recorded after every completed read, so a `decode` future may be dropped (for example
/// by `tokio::select!`) and the next call resumes where it stopped.
pub struct FrameDecoder<R> {
    reader: R,
    config: DecoderConfig,
    entry: LogEntry,
    buf: Vec<u8>,
    // bytes of the current header or body already in `buf`
    offset: usize,
    // length of the next body; `None` means a header must be read first
    pending_len: Option<usize>,
    poisoned: bool,
}

impl<R> FrameDecoder<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R, config: DecoderConfig) -> Self {
        let initial = Self::initial_size(&config);
        Self {
            reader,
            config,
            entry: LogEntry::default(),
            buf: vec![0; initial],
            offset: 0,
            pending_len: None,
            poisoned: false,
        }
    }

    fn initial_size(config: &DecoderConfig) -> usize {
        config.initial_buffer_size.max(FRAME_HEADER_LEN)
    }

    /// Reads exactly one frame and converts it into a message.
    ///
    /// Returns [`DecodeError::EndOfStream`] when the writer closed the stream on a frame
    /// boundary. A frame larger than `max_frame_size` is rejected before its body is read and
    /// poisons the decoder: every later call fails until [`Self::reset`] or [`Self::rebind`].
    pub async fn decode(&mut self) -> Result<LogMessage, DecodeError> {
        if self.poisoned {
            return Err(DecodeError::Poisoned);
        }

        let len = match self.pending_len {
            Some(len) => len,
            None => {
                let len = self.read_size_header().await?;
                if len > self.config.max_frame_size {
                    self.poisoned = true;
                    return Err(DecodeError::TooLarge {
                        len,
                        max: self.config.max_frame_size,
                    });
                }
                self.fit_buffer(len);
                self.pending_len = Some(len);
                len
            }
        };

        self.fill(len).await.map_err(|e| match e {
            FillError::Eof => DecodeError::ShortRead {
                expected: len,
                read: 0,
                attempts: 1,
            },
            FillError::Short { read, attempts } => DecodeError::ShortRead {
                expected: len,
                read,
                attempts,
            },
            FillError::Io(e) => DecodeError::Io(e),
        })?;
        self.pending_len = None;

        self.entry.clear();
        self.entry
            .merge(&self.buf[..len])
            .map_err(|source| DecodeError::Corrupt { len, source })?;
        trace!("Decoded log entry of {} bytes", len);

        Ok(LogMessage::from_entry(&mut self.entry))
    }

    /// Binds the decoder to a new stream, discarding pending framing state and buffered bytes.
    /// Returns the previously bound stream.
    pub fn reset(&mut self, reader: R) -> R {
        let previous = std::mem::replace(&mut self.reader, reader);
        self.rebind();
        previous
    }

    /// Discards pending framing state but keeps reading from the same stream.
    pub fn rebind(&mut self) {
        let initial = Self::initial_size(&self.config);
        self.entry.clear();
        self.buf.clear();
        self.buf.resize(initial, 0);
        self.buf.shrink_to(initial);
        self.offset = 0;
        self.pending_len = None;
        self.poisoned = false;
    }

    /// Releases the scratch buffer and hands the stream back.
    pub fn close(self) -> R {
        self.reader
    }

    pub fn buffer_capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// True when a header has been read and its body is still outstanding.
    pub fn has_pending_frame(&self) -> bool {
        self.pending_len.is_some()
    }

    async fn read_size_header(&mut self) -> Result<usize, DecodeError> {
        self.fill(FRAME_HEADER_LEN).await.map_err(|e| match e {
            FillError::Eof => DecodeError::EndOfStream,
            FillError::Short { read, .. } => DecodeError::TruncatedHeader { read },
            FillError::Io(e) => DecodeError::Io(e),
        })?;

        let mut header = [0u8; FRAME_HEADER_LEN];
        header.copy_from_slice(&self.buf[..FRAME_HEADER_LEN]);
        Ok(u32::from_be_bytes(header) as usize)
    }

    fn fit_buffer(&mut self, len: usize) {
        let initial = Self::initial_size(&self.config);
        if self.buf.len() < len {
            debug!("Growing decode buffer from {} to {} bytes", self.buf.len(), len);
            self.buf.resize(len, 0);
        } else if len <= initial && self.buf.len() > initial {
            self.buf.truncate(initial);
            self.buf.shrink_to(initial);
        }
    }

    /// Fills `buf[..size]`, continuing from `offset`.
    ///
    /// A zero-length read before any byte of the range arrived is a clean end-of-stream and is
    /// not retried. A zero-length read after that means the writer is slow or reopening, and
    /// is retried up to `max_read_retries` times in total, but never more than
    /// [`MAX_CONSECUTIVE_EMPTY_READS`] times without progress in between.
    async fn fill(&mut self, size: usize) -> Result<(), FillError> {
        let mut attempts = 0;
        let mut empty_in_a_row = 0;
        while self.offset < size {
            let n = self
                .reader
                .read(&mut self.buf[self.offset..size])
                .await
                .map_err(FillError::Io)?;
            if n == 0 {
                if self.offset == 0 {
                    return Err(FillError::Eof);
                }
                attempts += 1;
                empty_in_a_row += 1;
                if attempts >= self.config.max_read_retries
                    || empty_in_a_row >= MAX_CONSECUTIVE_EMPTY_READS
                {
                    return Err(FillError::Short {
                        read: self.offset,
                        attempts,
                    });
                }
                tokio::task::yield_now().await;
                continue;
            }
            empty_in_a_row = 0;
            self.offset += n;
        }
        self.offset = 0;
        Ok(())
    }
}
