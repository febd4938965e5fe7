// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Engine actor.
//!
//! The [`MediaEngine`] is the single writer of every stream, graph and native
//! graph of a backend context. Façade calls, native callbacks and timers all
//! reach it as messages and are handled one at a time.

use crate::constants::KEEP_ALIVE_SWEEP_INTERVAL_MS;
use crate::messages::{EngineMessage, QueryMessage, StreamCommand, TimerFired};
use crate::native::{NativeBackend, NativeEventReceiver};
use crate::node::BackendNode;
use crate::stream::{StreamContext, StreamStateMachine};
use crate::wire::{RewireBatch, WireOp};
use mediagraph_core::NodeId;
use opentelemetry::KeyValue;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// The state of the long-running engine actor.
pub(crate) struct MediaEngine {
    pub(crate) native: Arc<dyn NativeBackend>,
    pub(crate) control_rx: mpsc::Receiver<EngineMessage>,
    pub(crate) native_rx: NativeEventReceiver,
    pub(crate) timer_rx: mpsc::UnboundedReceiver<TimerFired>,
    pub(crate) ctx: StreamContext,
    pub(crate) streams: HashMap<NodeId, StreamStateMachine>,
    /// Nodes referenced by applied rewire batches, with their release deadline.
    pub(crate) kept_alive: VecDeque<(Instant, Vec<Arc<BackendNode>>)>,
    // Metrics
    pub(crate) streams_active_gauge: opentelemetry::metrics::Gauge<u64>,
    pub(crate) engine_operations_counter: opentelemetry::metrics::Counter<u64>,
    pub(crate) rewire_calls_counter: opentelemetry::metrics::Counter<u64>,
}

impl MediaEngine {
    /// The main actor loop.
    pub(crate) async fn run(mut self) {
        tracing::info!(native = self.native.name(), "Media engine actor started");
        let mut sweep = tokio::time::interval(Duration::from_millis(KEEP_ALIVE_SWEEP_INTERVAL_MS));
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                msg = self.control_rx.recv() => {
                    let Some(msg) = msg else {
                        tracing::debug!("All engine handles dropped");
                        break;
                    };
                    if !self.handle_message(msg).await {
                        break;
                    }
                },
                Some((key, event)) = self.native_rx.recv() => {
                    if let Some(stream) = self.streams.get_mut(&key.stream) {
                        stream.on_native_event(key, event).await;
                        stream.publish();
                    } else {
                        tracing::trace!(graph = %key, ?event, "Event for unknown stream");
                    }
                },
                Some(fired) = self.timer_rx.recv() => {
                    if let Some(stream) = self.streams.get_mut(&fired.stream) {
                        stream.on_timer(fired).await;
                        stream.publish();
                    }
                },
                _ = sweep.tick() => self.sweep_kept_alive(Instant::now()),
            }
        }

        for (_, mut stream) in self.streams.drain() {
            stream.teardown();
            stream.publish();
        }
        self.kept_alive.clear();
        self.streams_active_gauge.record(0, &[]);
        tracing::info!("Media engine actor shutting down");
    }

    fn record_operation(&self, operation: &'static str) {
        self.engine_operations_counter.add(1, &[KeyValue::new("operation", operation)]);
    }

    fn record_streams(&self) {
        self.streams_active_gauge.record(self.streams.len() as u64, &[]);
    }

    /// Returns `false` when the actor should stop.
    async fn handle_message(&mut self, msg: EngineMessage) -> bool {
        match msg {
            EngineMessage::CreateStream { node, snapshot_tx } => {
                self.record_operation("create_stream");
                let stream =
                    StreamStateMachine::new(&node, self.native.as_ref(), snapshot_tx, self.ctx.clone());
                tracing::info!(stream = %node.id(), "Stream created");
                self.streams.insert(node.id(), stream);
                self.record_streams();
            },
            EngineMessage::DestroyStream { stream, response_tx } => {
                self.record_operation("destroy_stream");
                if let Some(mut removed) = self.streams.remove(&stream) {
                    removed.teardown();
                    removed.publish();
                    tracing::info!(%stream, "Stream destroyed");
                }
                self.record_streams();
                if let Some(tx) = response_tx {
                    let _ = tx.send(()).await;
                }
            },
            EngineMessage::Stream { stream, command } => {
                self.record_operation(command.name());
                let Some(target) = self.streams.get_mut(&stream) else {
                    tracing::warn!(%stream, command = command.name(), "Command for unknown stream");
                    return true;
                };
                Self::dispatch(target, command).await;
                target.publish();
            },
            EngineMessage::Rewire(batch) => {
                self.record_operation("rewire");
                self.apply_rewire(batch);
            },
            EngineMessage::ReleaseNode { node } => {
                self.record_operation("release_node");
                for stream in self.streams.values_mut() {
                    stream.remove_node(node);
                }
            },
            EngineMessage::Query(query) => self.handle_query(query).await,
            EngineMessage::Shutdown => {
                tracing::info!("Received shutdown signal");
                return false;
            },
        }
        true
    }

    async fn dispatch(stream: &mut StreamStateMachine, command: StreamCommand) {
        match command {
            StreamCommand::SetSource(source, waiter) => stream.set_source(source, waiter).await,
            StreamCommand::SetNextSource(source) => stream.set_next_source(source).await,
            StreamCommand::Enqueue(sources) => stream.enqueue(sources).await,
            StreamCommand::ClearQueue => stream.clear_queue(),
            StreamCommand::Play => stream.play().await,
            StreamCommand::Pause => stream.pause(),
            StreamCommand::Stop => stream.stop(),
            StreamCommand::Seek { ms, ticket } => stream.seek(ms, &ticket),
            StreamCommand::SetTransitionTime(ms) => stream.set_transition_time(ms),
            StreamCommand::SetPrefinishMark(ms) => stream.set_prefinish_mark(ms),
            StreamCommand::SetTickInterval(ms) => stream.set_tick_interval(ms),
            StreamCommand::Suspend => stream.suspend(),
            StreamCommand::Resume => stream.resume().await,
        }
    }

    /// Applies a committed connection change in one turn.
    fn apply_rewire(&mut self, batch: RewireBatch) {
        tracing::debug!(
            calls = batch.calls.len(),
            streams = batch.endpoints.len(),
            "Applying rewire batch"
        );
        for call in &batch.calls {
            let op = match call.op {
                WireOp::Connect => "connect",
                WireOp::Disconnect => "disconnect",
            };
            self.rewire_calls_counter.add(1, &[KeyValue::new("op", op)]);
            let Some(stream) = call.stream.and_then(|id| self.streams.get_mut(&id)) else {
                tracing::trace!(?call, "Rewire call outside any stream");
                continue;
            };
            stream.apply_wire(call);
        }
        for (stream, outputs) in batch.endpoints {
            if let Some(stream) = self.streams.get_mut(&stream) {
                stream.set_endpoints(outputs);
                stream.publish();
            }
        }
        if !batch.keep_alive.is_empty() {
            let deadline = Instant::now() + self.ctx.config.keep_reference();
            self.kept_alive.push_back((deadline, batch.keep_alive));
        }
    }

    fn sweep_kept_alive(&mut self, now: Instant) {
        let before = self.kept_alive.len();
        while self.kept_alive.front().is_some_and(|(deadline, _)| *deadline <= now) {
            self.kept_alive.pop_front();
        }
        let released = before - self.kept_alive.len();
        if released > 0 {
            tracing::trace!(released, "Dropped kept-alive node references");
        }
    }

    /// Handles query messages for reading stream information.
    async fn handle_query(&mut self, query: QueryMessage) {
        match query {
            QueryMessage::HasVideo { stream, response_tx } => {
                if let Some(stream) = self.streams.get(&stream) {
                    let _ = response_tx.send(stream.has_video()).await;
                }
            },
            QueryMessage::IsSeekable { stream, response_tx } => {
                if let Some(stream) = self.streams.get(&stream) {
                    let _ = response_tx.send(stream.is_seekable()).await;
                }
            },
            QueryMessage::Subscribe { stream, response_tx } => {
                if let Some(stream) = self.streams.get_mut(&stream) {
                    let _ = response_tx.send(stream.subscribe()).await;
                }
            },
        }
    }
}
