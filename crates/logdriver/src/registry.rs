// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Table of running log streams.
//!
//! The registry maps a stream id (usually the FIFO path handed over by the container
//! runtime) to its consumer task. Starting an id that is already registered fails without
//! side effects. Stopping cancels the consumer, which interrupts a blocked read, closes the
//! sinks and drops the stream.

use std::collections::HashMap;
use std::future::Future;
use std::io;
#[cfg(unix)]
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::AsyncRead;
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::consumer::{ConsumerExit, StreamConsumer};
use crate::errors::RegistryError;
use crate::sink::{SinkFactory, SinkPair};
#[cfg(unix)]
use crate::source::open_fifo;

/// Metadata about the container a stream belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamInfo {
    pub container_id: String,
    pub container_name: Option<String>,
    /// Free-form driver options and labels passed along by the runtime.
    pub metadata: HashMap<String, String>,
}

impl StreamInfo {
    pub fn new(container_id: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.container_name = Some(name.into());
        self
    }
}

struct StreamEntry {
    generation: u64,
    info: StreamInfo,
    cancel_token: CancellationToken,
}

enum Slot {
    // id reserved while the stream is opened and its sinks provisioned
    Starting { generation: u64 },
    Active(StreamEntry),
}

impl Slot {
    fn generation(&self) -> u64 {
        match self {
            Slot::Starting { generation } => *generation,
            Slot::Active(entry) => entry.generation,
        }
    }
}

struct Inner {
    streams: TokioMutex<HashMap<String, Slot>>,
    next_generation: AtomicU64,
    sink_factory: Arc<dyn SinkFactory>,
    config: Config,
    tracker: TaskTracker,
}

impl Inner {
    async fn release(&self, id: &str, generation: u64) {
        let mut streams = self.streams.lock().await;
        if streams.get(id).map(Slot::generation) == Some(generation) {
            streams.remove(id);
        }
    }
}

/// Handle to a started stream's consumer task.
pub struct StreamTask {
    id: String,
    join: JoinHandle<ConsumerExit>,
}

impl StreamTask {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Waits for the consumer to finish. `None` if the task panicked or was aborted.
    pub async fn join(self) -> Option<ConsumerExit> {
        match self.join.await {
            Ok(exit) => Some(exit),
            Err(e) => {
                error!(stream_id = %self.id, "Log consumer task failed: {}", e);
                None
            }
        }
    }
}

/// Concurrency-safe registry of active log streams. Cheap to clone.
#[derive(Clone)]
pub struct StreamRegistry {
    inner: Arc<Inner>,
}

impl StreamRegistry {
    pub fn new(sink_factory: Arc<dyn SinkFactory>, config: Config) -> Self {
        Self {
            inner: Arc::new(Inner {
                streams: TokioMutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
                sink_factory,
                config,
                tracker: TaskTracker::new(),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Starts consuming the stream returned by `open` under `id`.
    ///
    /// Fails with [`RegistryError::Duplicate`] without calling `open` if `id` is already
    /// registered, including while another `start` for it is still in progress. Sinks are
    /// provisioned and the stream opened outside the lock; if either fails the reservation is
    /// released and whatever was already created is dropped.
    pub async fn start<F, Fut, R>(
        &self,
        id: impl Into<String>,
        info: StreamInfo,
        open: F,
    ) -> Result<StreamTask, RegistryError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = io::Result<R>>,
        R: AsyncRead + Unpin + Send + 'static,
    {
        let id = id.into();
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);

        {
            let mut streams = self.inner.streams.lock().await;
            if streams.contains_key(&id) {
                return Err(RegistryError::Duplicate(id));
            }
            streams.insert(id.clone(), Slot::Starting { generation });
        }

        let (reader, mut sinks) = match self.prepare(&id, &info, open).await {
            Ok(prepared) => prepared,
            Err(e) => {
                self.inner.release(&id, generation).await;
                return Err(e);
            }
        };

        let cancel_token = CancellationToken::new();
        let activated = {
            let mut streams = self.inner.streams.lock().await;
            match streams.get(&id) {
                Some(Slot::Starting { generation: g }) if *g == generation => {
                    streams.insert(
                        id.clone(),
                        Slot::Active(StreamEntry {
                            generation,
                            info: info.clone(),
                            cancel_token: cancel_token.clone(),
                        }),
                    );
                    true
                }
                _ => false,
            }
        };

        if !activated {
            debug!(stream_id = %id, "Log stream stopped before it started");
            if let Err(e) = sinks.close().await {
                warn!(stream_id = %id, "Failed to close sinks: {}", e);
            }
            drop(reader);
            return Err(RegistryError::StoppedWhileStarting(id));
        }

        let consumer =
            StreamConsumer::new(id.clone(), reader, sinks, &self.inner.config, cancel_token);
        let inner = Arc::clone(&self.inner);
        let task_id = id.clone();
        let join = self.inner.tracker.spawn(async move {
            let exit = consumer.run().await;
            inner.release(&task_id, generation).await;
            exit
        });

        info!(
            stream_id = %id,
            container_id = %info.container_id,
            "Started consuming log stream"
        );
        Ok(StreamTask { id, join })
    }

    /// Opens the FIFO at `path` and starts consuming it, keyed by the path.
    #[cfg(unix)]
    pub async fn start_fifo(
        &self,
        path: impl Into<PathBuf>,
        info: StreamInfo,
    ) -> Result<StreamTask, RegistryError> {
        let path = path.into();
        let id = path.display().to_string();
        self.start(id, info, move || async move { open_fifo(path) }).await
    }

    async fn prepare<F, Fut, R>(
        &self,
        id: &str,
        info: &StreamInfo,
        open: F,
    ) -> Result<(R, SinkPair), RegistryError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = io::Result<R>>,
    {
        let mut sinks = self
            .inner
            .sink_factory
            .provision(info)
            .await
            .map_err(|source| RegistryError::Provision {
                id: id.to_string(),
                source,
            })?;

        match open().await {
            Ok(reader) => Ok((reader, sinks)),
            Err(source) => {
                if let Err(e) = sinks.close().await {
                    warn!(stream_id = %id, "Failed to close sinks: {}", e);
                }
                Err(RegistryError::Open {
                    id: id.to_string(),
                    source,
                })
            }
        }
    }

    /// Stops the stream registered under `id`. Unknown ids are ignored.
    pub async fn stop(&self, id: &str) -> Result<(), RegistryError> {
        let removed = self.inner.streams.lock().await.remove(id);
        match removed {
            Some(Slot::Active(entry)) => {
                entry.cancel_token.cancel();
                info!(stream_id = %id, "Stopped log stream");
            }
            Some(Slot::Starting { .. }) => {
                debug!(stream_id = %id, "Stopped log stream while it was starting");
            }
            None => {
                debug!(stream_id = %id, "No log stream to stop");
            }
        }
        Ok(())
    }

    /// Stops every stream and waits for all consumers to finish.
    pub async fn shutdown(&self) {
        let removed: Vec<(String, Slot)> = self.inner.streams.lock().await.drain().collect();
        debug!("Shutting down {} log streams", removed.len());
        for (_, slot) in removed {
            if let Slot::Active(entry) = slot {
                entry.cancel_token.cancel();
            }
        }

        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        self.inner.tracker.reopen();
    }

    /// True if `id` is registered, including streams still starting.
    pub async fn contains(&self, id: &str) -> bool {
        self.inner.streams.lock().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.inner.streams.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn info(&self, id: &str) -> Option<StreamInfo> {
        match self.inner.streams.lock().await.get(id) {
            Some(Slot::Active(entry)) => Some(entry.info.clone()),
            _ => None,
        }
    }
}
