// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock sinks that record messages in memory

use std::sync::{Arc, Mutex};

use logdriver::entry::LogMessage;
use logdriver::errors::SinkError;
use logdriver::registry::StreamInfo;
use logdriver::sink::{Sink, SinkFactory, SinkPair};

type SharedMessages = Arc<Mutex<Vec<LogMessage>>>;

/// Mock sink that appends to a shared buffer, or rejects every write
pub struct MockSink {
    messages: SharedMessages,
    fail_writes: bool,
}

#[async_trait::async_trait]
impl Sink for MockSink {
    async fn write_entry(&mut self, msg: &LogMessage) -> Result<(), SinkError> {
        if self.fail_writes {
            return Err(SinkError::Rejected("mock sink rejects writes".to_string()));
        }
        self.messages
            .lock()
            .expect("mock sink lock poisoned")
            .push(msg.clone());
        Ok(())
    }
}

/// Mock factory handing every stream the same pair of in-memory buffers
#[derive(Clone, Default)]
pub struct MemorySinkFactory {
    primary: SharedMessages,
    secondary: SharedMessages,
    fail_writes: bool,
    provisioned: Arc<Mutex<Vec<String>>>,
}

impl MemorySinkFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub fn primary_messages(&self) -> Vec<LogMessage> {
        self.primary.lock().expect("lock poisoned").clone()
    }

    pub fn secondary_messages(&self) -> Vec<LogMessage> {
        self.secondary.lock().expect("lock poisoned").clone()
    }

    pub fn provisioned(&self) -> Vec<String> {
        self.provisioned.lock().expect("lock poisoned").clone()
    }

    fn sink(&self, messages: &SharedMessages) -> Box<dyn Sink> {
        Box::new(MockSink {
            messages: Arc::clone(messages),
            fail_writes: self.fail_writes,
        })
    }
}

#[async_trait::async_trait]
impl SinkFactory for MemorySinkFactory {
    async fn provision(&self, info: &StreamInfo) -> Result<SinkPair, SinkError> {
        self.provisioned
            .lock()
            .expect("lock poisoned")
            .push(info.container_id.clone());
        Ok(SinkPair::new(
            self.sink(&self.primary),
            self.sink(&self.secondary),
        ))
    }
}
