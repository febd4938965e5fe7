// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! engine: Media graph management and stream state machines for mediagraph.
//!
//! A [`Backend`] is the context object applications hold. It creates nodes,
//! validates topology changes and forwards everything else to a single engine
//! actor, which owns every stream's pair of [`MediaGraph`]s and drives the
//! native engine behind the [`NativeBackend`] trait.

use opentelemetry::global;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;

// --- Public Modules ---

pub mod backend;
pub mod config;
pub mod constants;
pub mod graph;
pub mod handle;
pub mod native;
pub mod node;
pub mod pipeline;
pub mod stream;
pub mod topology;
pub mod wire;

#[cfg(feature = "sim")]
pub mod sim;

mod actor;
mod messages;

#[cfg(test)]
mod tests;

// Re-exports
pub use backend::{Backend, CloseTimeoutHook, MediaObject, ObjectArgs};
pub use config::{EngineConfig, EnginePerfProfile};
pub use graph::MediaGraph;
pub use handle::EngineHandle;
pub use native::{
    DeviceInfo, GraphKey, NativeBackend, NativeError, NativeEvent, NativeGraph, NativeStatus,
};
pub use node::{BackendNode, OutputState};
pub use pipeline::{Pipeline, PipelineError};
pub use stream::StreamSnapshot;
pub use wire::{RewireBatch, WireCall, WireOp};

use actor::MediaEngine;
use stream::StreamContext;

/// Starts the engine actor in the background, returning a handle to it.
pub(crate) fn spawn_engine(
    native: Arc<dyn NativeBackend>,
    config: Arc<EngineConfig>,
) -> EngineHandle {
    let (control_tx, control_rx) = mpsc::channel(config.control_capacity.max(1));
    let (native_tx, native_rx) = mpsc::unbounded_channel();
    let (timer_tx, timer_rx) = mpsc::unbounded_channel();

    tracing::info!(
        native = native.name(),
        control_capacity = config.control_capacity,
        subscriber_capacity = config.subscriber_capacity,
        pulse_interval_ms = config.pulse_interval_ms,
        buffering_poll_ms = config.buffering_poll_ms,
        preload_time_ms = config.preload_time_ms,
        "Starting media engine actor"
    );

    let meter = global::meter("mediagraph_engine");
    let ctx = StreamContext {
        config,
        timer_tx,
        native_tx,
        state_transitions: meter
            .u64_counter("stream.state_transitions")
            .with_description("Stream transport state transitions")
            .build(),
    };
    let engine = MediaEngine {
        native,
        control_rx,
        native_rx,
        timer_rx,
        ctx,
        streams: HashMap::new(),
        kept_alive: VecDeque::new(),
        streams_active_gauge: meter
            .u64_gauge("engine.streams.active")
            .with_description("Number of live media object streams")
            .build(),
        engine_operations_counter: meter
            .u64_counter("engine.operations")
            .with_description("Engine control operations")
            .build(),
        rewire_calls_counter: meter
            .u64_counter("engine.rewire.calls")
            .with_description("Rewire calls applied to stream graphs")
            .build(),
    };

    let engine_task = tokio::spawn(engine.run());
    EngineHandle::new(control_tx, engine_task)
}
