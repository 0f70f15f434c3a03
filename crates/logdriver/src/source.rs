// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io;
use std::path::Path;

use tokio::net::unix::pipe::{OpenOptions, Receiver};

/// Opens the read end of a log FIFO.
///
/// The pipe is opened non-blocking and driven by the runtime's reactor, so an idle stream
/// holds no thread and dropping a pending read releases it. Until a writer attaches, reads
/// stay pending. Once the writer closes its end, reads return end of stream. Fails with
/// `InvalidInput` if `path` is not a FIFO.
///
/// Must be called from within a tokio runtime.
pub fn open_fifo(path: impl AsRef<Path>) -> io::Result<Receiver> {
    OpenOptions::new().open_receiver(path.as_ref())
}
