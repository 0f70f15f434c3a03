// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use logdriver::{
    config::Config,
    registry::{StreamInfo, StreamRegistry},
    sink::FileSinkFactory,
};

#[tokio::main]
pub async fn main() {
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading log driver configuration: {e}");
            return;
        }
    };

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(&config.log_level)
                .expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let fifos: Vec<PathBuf> = env::args_os().skip(1).map(PathBuf::from).collect();
    if fifos.is_empty() {
        error!("No log FIFOs given. Usage: logdriver-plugin <fifo>...");
        return;
    }

    let sink_factory = Arc::new(FileSinkFactory::new(&config.base_dir));
    let registry = StreamRegistry::new(sink_factory, config);

    for fifo in fifos {
        let info = StreamInfo::new(container_id_for(&fifo));
        match registry.start_fifo(&fifo, info).await {
            Ok(task) => info!("log-driver: consuming {}", task.id()),
            Err(e) => error!("Error starting logger for {}: {e}", fifo.display()),
        }
    }

    wait_for_shutdown_signal().await;
    info!("log-driver: shutting down");
    registry.shutdown().await;
}

/// Container id from a FIFO path such as `/run/docker/logging/<id>` or `<id>.fifo`.
fn container_id_for(fifo: &Path) -> String {
    fifo.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to install SIGTERM handler: {e}");
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {e}");
            }
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => debug!("Received SIGTERM"),
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                error!("Failed to listen for Ctrl-C: {e}");
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {e}");
    }
}
