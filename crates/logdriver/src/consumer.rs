// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-stream consumption loop.
//!
//! A [`StreamConsumer`] owns one decoder and one sink pair. It pulls messages until the
//! writer closes the stream, the stream is stopped, or an unrecoverable error occurs, and
//! routes every message to the sink matching its source tag.

use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::config::{Config, DecodeErrorPolicy};
use crate::decoder::FrameDecoder;
use crate::entry::LogMessage;
use crate::errors::{DecodeError, SinkError};
use crate::sink::{SinkPair, SourceRouting};

/// Why a consumer stopped.
#[derive(Debug)]
pub enum ConsumerExit {
    /// The writer closed the stream.
    EndOfStream,
    /// The stream was stopped through its cancellation token.
    Cancelled,
    DecodeFailed(DecodeError),
    SinkFailed(SinkError),
}

impl ConsumerExit {
    pub fn is_clean(&self) -> bool {
        matches!(self, ConsumerExit::EndOfStream | ConsumerExit::Cancelled)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerStats {
    pub written: u64,
    pub dropped: u64,
    pub rebinds: u64,
}

pub struct StreamConsumer<R> {
    id: String,
    decoder: FrameDecoder<R>,
    sinks: SinkPair,
    routing: SourceRouting,
    policy: DecodeErrorPolicy,
    cancel_token: CancellationToken,
    stats: ConsumerStats,
}

impl<R> StreamConsumer<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new(
        id: impl Into<String>,
        reader: R,
        sinks: SinkPair,
        config: &Config,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            id: id.into(),
            decoder: FrameDecoder::new(reader, config.decoder),
            sinks,
            routing: SourceRouting::new(&config.primary_source, &config.secondary_source),
            policy: config.decode_error_policy,
            cancel_token,
            stats: ConsumerStats::default(),
        }
    }

    /// Consumes the stream to completion, then closes the sinks and the stream.
    pub async fn run(mut self) -> ConsumerExit {
        debug!(stream_id = %self.id, "Log consumer started");
        let exit = self.consume().await;

        if let Err(e) = self.sinks.close().await {
            warn!(stream_id = %self.id, "Failed to close sinks: {}", e);
        }
        drop(self.decoder.close());

        let stats = self.stats;
        match &exit {
            ConsumerExit::EndOfStream => debug!(
                stream_id = %self.id,
                written = stats.written,
                dropped = stats.dropped,
                "Log stream closed by writer"
            ),
            ConsumerExit::Cancelled => debug!(
                stream_id = %self.id,
                written = stats.written,
                dropped = stats.dropped,
                "Log stream stopped"
            ),
            ConsumerExit::DecodeFailed(e) => error!(
                stream_id = %self.id,
                written = stats.written,
                "Abandoning log stream after decode error: {}",
                e
            ),
            ConsumerExit::SinkFailed(e) => error!(
                stream_id = %self.id,
                written = stats.written,
                "Abandoning log stream after sink write error: {}",
                e
            ),
        }
        exit
    }

    async fn consume(&mut self) -> ConsumerExit {
        loop {
            let decoded = tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => return ConsumerExit::Cancelled,
                decoded = self.decoder.decode() => decoded,
            };

            let msg = match decoded {
                Ok(msg) => msg,
                Err(DecodeError::EndOfStream) => return ConsumerExit::EndOfStream,
                Err(e) if self.should_rebind(&e) => {
                    warn!(stream_id = %self.id, "Discarding undecodable log entry: {}", e);
                    self.decoder.rebind();
                    self.stats.rebinds += 1;
                    continue;
                }
                Err(e) => return ConsumerExit::DecodeFailed(e),
            };

            if let Err(e) = self.dispatch(&msg).await {
                return ConsumerExit::SinkFailed(e);
            }
        }
    }

    // Oversized frames are never resumed past, and I/O errors would repeat forever.
    fn should_rebind(&self, e: &DecodeError) -> bool {
        self.policy == DecodeErrorPolicy::Rebind
            && matches!(
                e,
                DecodeError::Corrupt { .. }
                    | DecodeError::ShortRead { .. }
                    | DecodeError::TruncatedHeader { .. }
            )
    }

    async fn dispatch(&mut self, msg: &LogMessage) -> Result<(), SinkError> {
        match self.sinks.route(&msg.source, &self.routing) {
            Some(sink) => {
                sink.write_entry(msg).await?;
                self.stats.written += 1;
            }
            None => {
                trace!(stream_id = %self.id, "Dropping entry with unknown source {:?}", msg.source);
                self.stats.dropped += 1;
            }
        }
        Ok(())
    }
}
