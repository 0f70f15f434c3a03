// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Decoding and dispatch engine for container log streams.
//!
//! A container runtime hands a logging plugin one FIFO per container. Each FIFO carries
//! length-prefixed protobuf log records. This crate decodes those records
//! ([`decoder::FrameDecoder`]), routes them by source tag to a pair of sinks
//! ([`consumer::StreamConsumer`]), and keeps track of the running streams so they can be
//! started and stopped concurrently ([`registry::StreamRegistry`]).

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod consumer;
pub mod decoder;
pub mod entry;
pub mod errors;
pub mod registry;
pub mod sink;
#[cfg(unix)]
pub mod source;
