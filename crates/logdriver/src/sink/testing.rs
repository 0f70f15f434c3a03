// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory sinks for exercising consumers and the registry without touching disk.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{Sink, SinkFactory, SinkPair};
use crate::entry::LogMessage;
use crate::errors::SinkError;
use crate::registry::StreamInfo;

/// Messages captured by a [`MemorySink`], shared with whoever inspects them.
pub type SharedMessages = Arc<Mutex<Vec<LogMessage>>>;

/// Keeps every message in memory. Can be switched to fail writes.
pub struct MemorySink {
    messages: SharedMessages,
    fail_writes: bool,
    closed: bool,
}

impl MemorySink {
    pub fn new(messages: SharedMessages) -> Self {
        Self {
            messages,
            fail_writes: false,
            closed: false,
        }
    }

    pub fn failing(messages: SharedMessages) -> Self {
        Self {
            fail_writes: true,
            ..Self::new(messages)
        }
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn write_entry(&mut self, msg: &LogMessage) -> Result<(), SinkError> {
        if self.closed {
            return Err(SinkError::Closed);
        }
        if self.fail_writes {
            return Err(SinkError::Rejected("memory sink configured to fail".to_string()));
        }
        self.messages
            .lock()
            .map_err(|_| SinkError::Rejected("memory sink lock poisoned".to_string()))?
            .push(msg.clone());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        self.closed = true;
        Ok(())
    }
}

/// Hands every provisioned stream the same pair of in-memory buffers.
#[derive(Clone, Default)]
pub struct MemorySinkFactory {
    pub primary: SharedMessages,
    pub secondary: SharedMessages,
    fail_writes: bool,
    fail_provision: bool,
    provisioned: Arc<Mutex<Vec<String>>>,
}

impl MemorySinkFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sinks created by this factory reject every write.
    pub fn with_failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    /// `provision` itself fails.
    pub fn with_failing_provision(mut self) -> Self {
        self.fail_provision = true;
        self
    }

    pub fn primary_messages(&self) -> Vec<LogMessage> {
        self.primary.lock().map(|m| m.clone()).unwrap_or_default()
    }

    pub fn secondary_messages(&self) -> Vec<LogMessage> {
        self.secondary.lock().map(|m| m.clone()).unwrap_or_default()
    }

    /// Container ids of every successful `provision` call, in order.
    pub fn provisioned(&self) -> Vec<String> {
        self.provisioned.lock().map(|p| p.clone()).unwrap_or_default()
    }

    fn sink(&self, messages: &SharedMessages) -> Box<dyn Sink> {
        if self.fail_writes {
            Box::new(MemorySink::failing(Arc::clone(messages)))
        } else {
            Box::new(MemorySink::new(Arc::clone(messages)))
        }
    }
}

#[async_trait]
impl SinkFactory for MemorySinkFactory {
    async fn provision(&self, info: &StreamInfo) -> Result<SinkPair, SinkError> {
        if self.fail_provision {
            return Err(SinkError::Rejected("provisioning disabled".to_string()));
        }
        if let Ok(mut provisioned) = self.provisioned.lock() {
            provisioned.push(info.container_id.clone());
        }
        Ok(SinkPair::new(
            self.sink(&self.primary),
            self.sink(&self.secondary),
        ))
    }
}
