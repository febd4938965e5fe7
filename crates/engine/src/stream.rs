// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Per-media-object transport state machine.
//!
//! A [`StreamStateMachine`] owns two [`MediaGraph`]s: the current one and the
//! one the next source is preloaded into. Gapless switches, crossfades and
//! timed gaps between sources are all expressed as moves between the two.
//! Every method runs on the engine actor.

use crate::config::EngineConfig;
use crate::constants::END_OF_STREAM_TOLERANCE_MS;
use crate::graph::MediaGraph;
use crate::messages::{TimerFired, TimerKind};
use crate::native::{GraphKey, NativeBackend, NativeError, NativeEvent, NativeEventSender, NativeStatus};
use crate::node::BackendNode;
use crate::wire::{WireCall, WireOp};
use mediagraph_core::{
    ErrorKind, EventBus, MediaEvent, MediaSource, MetaData, NodeId, ObjectClass, TerminusHandle,
    TransportState,
};
use opentelemetry::metrics::Counter;
use opentelemetry::KeyValue;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Last published view of a stream, readable from the façade without a round trip.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamSnapshot {
    pub state: TransportState,
    pub current_time: i64,
    pub total_time: i64,
    pub seekable: bool,
    pub has_video: bool,
    pub error_kind: ErrorKind,
    pub error_message: String,
    pub metadata: MetaData,
    pub current_source: MediaSource,
    pub queue_len: usize,
    pub transition_time: i64,
    pub prefinish_mark: i64,
    pub tick_interval: u64,
}

/// Engine-wide resources every stream needs.
#[derive(Clone)]
pub struct StreamContext {
    pub config: Arc<EngineConfig>,
    pub timer_tx: mpsc::UnboundedSender<TimerFired>,
    pub native_tx: NativeEventSender,
    pub state_transitions: Counter<u64>,
}

#[derive(Default)]
struct TimerSlot {
    generation: u64,
    token: Option<CancellationToken>,
}

/// Generation-tagged timers of one stream.
struct Timers {
    stream: NodeId,
    tx: mpsc::UnboundedSender<TimerFired>,
    slots: HashMap<TimerKind, TimerSlot>,
}

impl Timers {
    fn new(stream: NodeId, tx: mpsc::UnboundedSender<TimerFired>) -> Self {
        Self { stream, tx, slots: HashMap::new() }
    }

    fn arm(&mut self, kind: TimerKind) -> (TimerFired, CancellationToken) {
        self.stop(kind);
        let slot = self.slots.entry(kind).or_default();
        let token = CancellationToken::new();
        slot.token = Some(token.clone());
        (TimerFired { stream: self.stream, kind, generation: slot.generation }, token)
    }

    fn start_periodic(&mut self, kind: TimerKind, period: Duration) {
        let (fired, token) = self.arm(kind);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = interval.tick() => {
                        if tx.send(fired).is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    fn start_once(&mut self, kind: TimerKind, delay: Duration) {
        let (fired, token) = self.arm(kind);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {},
                () = tokio::time::sleep(delay) => {
                    let _ = tx.send(fired);
                }
            }
        });
    }

    fn stop(&mut self, kind: TimerKind) {
        if let Some(slot) = self.slots.get_mut(&kind) {
            if let Some(token) = slot.token.take() {
                token.cancel();
            }
            slot.generation += 1;
        }
    }

    fn stop_all(&mut self) {
        for kind in [TimerKind::Pulse, TimerKind::BufferingPoll, TimerKind::Transition] {
            self.stop(kind);
        }
    }

    fn is_current(&self, fired: &TimerFired) -> bool {
        self.slots
            .get(&fired.kind)
            .is_some_and(|slot| slot.token.is_some() && slot.generation == fired.generation)
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        self.stop_all();
    }
}

pub struct StreamStateMachine {
    id: NodeId,
    graphs: [MediaGraph; 2],
    current: usize,
    state: TransportState,

    outputs: Vec<Arc<BackendNode>>,
    stream_dirty: [bool; 2],

    source: MediaSource,
    next_source: MediaSource,
    queue: VecDeque<MediaSource>,

    transition_time: i64,
    prefinish_mark: i64,
    tick_interval: u64,
    last_tick: Option<i64>,

    about_to_finish_emitted: bool,
    prefinish_emitted: bool,
    crossfading: bool,
    transition_pending: bool,
    awaiting_position: bool,

    current_time: i64,
    total_time: i64,
    seekable: bool,
    has_video: bool,
    error_kind: ErrorKind,
    error_message: String,
    metadata: MetaData,

    suspended: Option<(TransportState, i64)>,

    events: EventBus,
    snapshot_tx: watch::Sender<StreamSnapshot>,
    timers: Timers,
    ctx: StreamContext,
}

impl StreamStateMachine {
    pub fn new(
        node: &BackendNode,
        native: &dyn NativeBackend,
        snapshot_tx: watch::Sender<StreamSnapshot>,
        ctx: StreamContext,
    ) -> Self {
        let id = node.id();
        let graph = |index| {
            let key = GraphKey { stream: id, index };
            MediaGraph::new(key, native.create_graph(key, ctx.native_tx.clone()))
        };
        let graphs = [graph(0), graph(1)];
        let timers = Timers::new(id, ctx.timer_tx.clone());
        let stream = Self {
            id,
            graphs,
            current: 0,
            state: TransportState::Stopped,
            outputs: Vec::new(),
            stream_dirty: [true, true],
            source: MediaSource::Invalid,
            next_source: MediaSource::Invalid,
            queue: VecDeque::new(),
            transition_time: 0,
            prefinish_mark: 0,
            tick_interval: 0,
            last_tick: None,
            about_to_finish_emitted: false,
            prefinish_emitted: false,
            crossfading: false,
            transition_pending: false,
            awaiting_position: false,
            current_time: 0,
            total_time: -1,
            seekable: false,
            has_video: false,
            error_kind: ErrorKind::NoError,
            error_message: String::new(),
            metadata: MetaData::new(),
            suspended: None,
            events: EventBus::new(),
            snapshot_tx,
            timers,
            ctx,
        };
        stream.publish();
        stream
    }

    pub const fn id(&self) -> NodeId {
        self.id
    }

    pub const fn state(&self) -> TransportState {
        self.state
    }

    pub const fn has_video(&self) -> bool {
        self.has_video
    }

    pub const fn is_seekable(&self) -> bool {
        self.seekable
    }

    pub const fn current_index(&self) -> usize {
        self.current
    }

    pub fn graph(&self, index: usize) -> Option<&MediaGraph> {
        self.graphs.get(index)
    }

    pub fn subscribe(&mut self) -> mpsc::Receiver<MediaEvent> {
        self.events.subscribe(self.ctx.config.subscriber_capacity)
    }

    const fn other(&self) -> usize {
        1 - self.current
    }

    fn next_loaded(&self) -> bool {
        self.next_source.is_valid() && self.graphs[self.other()].is_loaded()
    }

    /// Pushes the current view to the façade.
    pub fn publish(&self) {
        self.snapshot_tx.send_replace(StreamSnapshot {
            state: self.state,
            current_time: self.current_time,
            total_time: self.total_time,
            seekable: self.seekable,
            has_video: self.has_video,
            error_kind: self.error_kind,
            error_message: self.error_message.clone(),
            metadata: self.metadata.clone(),
            current_source: self.source.clone(),
            queue_len: self.queue.len(),
            transition_time: self.transition_time,
            prefinish_mark: self.prefinish_mark,
            tick_interval: self.tick_interval,
        });
    }

    fn emit(&mut self, event: MediaEvent) {
        tracing::trace!(stream = %self.id, event = event.name(), "Stream event");
        self.events.emit(&event);
    }

    fn set_state(&mut self, new: TransportState) {
        let old = self.state;
        if old == new {
            return;
        }
        self.state = new;
        self.ctx.state_transitions.add(1, &[KeyValue::new("state", new.name())]);
        tracing::info!(stream = %self.id, ?old, ?new, "Stream state changed");
        self.emit(MediaEvent::StateChanged { old, new });
    }

    fn fail(&mut self, kind: ErrorKind, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(stream = %self.id, ?kind, %message, "Stream failed");
        self.timers.stop_all();
        self.transition_pending = false;
        self.crossfading = false;
        self.awaiting_position = false;
        for graph in &mut self.graphs {
            graph.cleanup();
        }
        self.next_source = MediaSource::Invalid;
        self.error_kind = kind;
        self.error_message.clone_from(&message);
        self.set_state(TransportState::Error);
        self.emit(MediaEvent::Error { kind, message });
    }

    fn reset_flags(&mut self) {
        self.about_to_finish_emitted = false;
        self.prefinish_emitted = false;
        self.crossfading = false;
        self.last_tick = None;
    }

    fn termini(&self) -> Vec<TerminusHandle> {
        self.outputs.iter().filter_map(|node| node.terminus().cloned()).collect()
    }

    fn ensure_stream(&mut self, index: usize) -> Result<(), NativeError> {
        if self.stream_dirty[index] || !self.graphs[index].has_stream() {
            let termini = self.termini();
            self.graphs[index].create_stream(&termini)?;
            self.stream_dirty[index] = false;
        }
        Ok(())
    }

    /// Gains of every audio output as (current, other).
    fn set_gains(&self, current: f32, other: f32) {
        let mut gains = [0.0; 2];
        gains[self.current] = current;
        gains[self.other()] = other;
        for output in &self.outputs {
            if output.class() == ObjectClass::AudioOutput {
                output.set_gains(gains);
            }
        }
    }

    fn present_current_graph(&self) {
        for output in &self.outputs {
            if output.class() == ObjectClass::VideoOutput {
                output.set_active_graph(self.current);
            }
        }
        self.set_gains(1.0, 0.0);
    }

    fn start_pulse(&mut self) {
        self.timers.start_periodic(TimerKind::Pulse, self.ctx.config.pulse_interval());
    }

    /// Reads duration, seekability, video presence and metadata off the current graph.
    fn refresh_info(&mut self, announce_seekable: bool) {
        let graph = &self.graphs[self.current];
        let total = graph.total_time();
        let seekable = graph.is_seekable();
        let has_video = graph.has_video();
        let metadata = graph.metadata();

        self.total_time = total;
        self.emit(MediaEvent::TotalTimeChanged(total));
        if announce_seekable || seekable != self.seekable {
            self.seekable = seekable;
            self.emit(MediaEvent::SeekableChanged(seekable));
        }
        if has_video != self.has_video {
            self.has_video = has_video;
            self.emit(MediaEvent::HasVideoChanged(has_video));
        }
        self.metadata = metadata.clone();
        self.emit(MediaEvent::MetaDataChanged(metadata));
    }

    // --- Sources ---

    pub async fn set_source(
        &mut self,
        source: MediaSource,
        waiter: Option<mpsc::Sender<TransportState>>,
    ) {
        self.timers.stop_all();
        self.transition_pending = false;
        self.awaiting_position = false;
        for graph in &mut self.graphs {
            graph.stop();
            graph.cleanup();
        }
        self.next_source = MediaSource::Invalid;
        self.set_gains(1.0, 0.0);
        self.reset_flags();
        self.error_kind = ErrorKind::NoError;
        self.error_message.clear();
        self.current_time = 0;

        if source.is_valid() {
            self.set_state(TransportState::Loading);
            self.source = source.clone();
            match self.graphs[self.current].load_source(&source).await {
                Ok(()) => {
                    tracing::info!(stream = %self.id, %source, "Source loaded");
                    self.set_state(TransportState::Stopped);
                    self.refresh_info(true);
                    self.emit(MediaEvent::CurrentSourceChanged(source));
                },
                Err(e) => self.fail(e.kind(), e.to_string()),
            }
        } else {
            self.source = MediaSource::Invalid;
            self.total_time = -1;
            self.seekable = false;
            if self.has_video {
                self.has_video = false;
                self.emit(MediaEvent::HasVideoChanged(false));
            }
            self.set_state(TransportState::Stopped);
            self.emit(MediaEvent::CurrentSourceChanged(MediaSource::Invalid));
        }

        if let Some(waiter) = waiter {
            self.publish();
            let _ = waiter.send(self.state).await;
        }
    }

    pub async fn set_next_source(&mut self, source: MediaSource) {
        if matches!(self.state, TransportState::Stopped | TransportState::Error) {
            self.set_source(source, None).await;
            return;
        }
        self.load_next(source).await;
    }

    /// Loads `source` into the other graph.
    async fn load_next(&mut self, source: MediaSource) -> bool {
        let other = self.other();
        if self.crossfading {
            tracing::debug!(stream = %self.id, "Replacing next source during a crossfade");
            self.crossfading = false;
            self.set_gains(1.0, 0.0);
        }
        self.graphs[other].cleanup();
        self.next_source = MediaSource::Invalid;
        match self.graphs[other].load_source(&source).await {
            Ok(()) => {
                tracing::debug!(stream = %self.id, %source, graph = other, "Next source preloaded");
                self.next_source = source;
                true
            },
            Err(e) => {
                tracing::warn!(stream = %self.id, %source, error = %e, "Failed to preload next source");
                false
            },
        }
    }

    /// Preloads queue entries until one opens or the queue is empty.
    async fn preload_from_queue(&mut self) {
        while !self.next_loaded() {
            let Some(source) = self.queue.pop_front() else {
                break;
            };
            self.load_next(source).await;
        }
    }

    pub async fn enqueue(&mut self, sources: Vec<MediaSource>) {
        self.queue.extend(sources.into_iter().filter(MediaSource::is_valid));
        if self.about_to_finish_emitted && self.state.is_active() {
            self.preload_from_queue().await;
        }
    }

    pub fn clear_queue(&mut self) {
        self.queue.clear();
    }

    pub fn set_transition_time(&mut self, ms: i64) {
        self.transition_time = ms;
    }

    pub fn set_prefinish_mark(&mut self, ms: i64) {
        self.prefinish_mark = ms;
        self.prefinish_emitted = false;
    }

    pub fn set_tick_interval(&mut self, ms: u64) {
        self.tick_interval = ms;
        self.last_tick = None;
    }

    // --- Transport ---

    pub async fn play(&mut self) {
        if matches!(
            self.state,
            TransportState::Playing | TransportState::Error | TransportState::Loading
        ) {
            return;
        }
        if self.transition_pending {
            self.transition_pending = false;
            self.timers.stop(TimerKind::Transition);
            self.switch_to_next().await;
            return;
        }
        if self.outputs.is_empty() {
            self.fail(ErrorKind::FatalError, "no valid audio or video outputs");
            return;
        }
        if !self.source.is_valid() {
            self.fail(ErrorKind::NormalError, "no media source");
            return;
        }

        let resuming = self.state == TransportState::Paused;
        let current = self.current;
        if self.graphs[current].native_status() == NativeStatus::Idle {
            let source = self.source.clone();
            tracing::debug!(stream = %self.id, %source, "Reopening idle source");
            if let Err(e) = self.graphs[current].load_source(&source).await {
                self.fail(e.kind(), e.to_string());
                return;
            }
        }
        if let Err(e) = self.ensure_stream(current) {
            tracing::warn!(stream = %self.id, error = %e, "Native stream creation failed");
            self.fail(ErrorKind::FatalError, "failed to create a stream");
            return;
        }
        if let Err(e) = self.graphs[current].play() {
            self.fail(e.kind(), e.to_string());
            return;
        }
        if self.crossfading {
            let other = self.other();
            if let Err(e) = self.graphs[other].play() {
                tracing::warn!(stream = %self.id, error = %e, "Failed to resume incoming graph");
            }
        }
        self.start_pulse();

        if resuming || self.graphs[current].position().is_some() {
            self.set_state(TransportState::Playing);
        } else {
            self.awaiting_position = true;
            self.set_state(TransportState::Buffering);
            self.timers.start_periodic(TimerKind::BufferingPoll, self.ctx.config.buffering_poll());
        }
    }

    pub fn pause(&mut self) {
        if !matches!(
            self.state,
            TransportState::Playing | TransportState::Buffering | TransportState::Stopped
        ) {
            return;
        }
        self.timers.stop(TimerKind::Pulse);
        self.timers.stop(TimerKind::BufferingPoll);
        self.timers.stop(TimerKind::Transition);
        self.awaiting_position = false;

        let current = self.current;
        if self.graphs[current].is_loaded() && !self.transition_pending {
            if !self.outputs.is_empty() {
                if let Err(e) = self.ensure_stream(current) {
                    tracing::warn!(stream = %self.id, error = %e, "Native stream creation failed");
                    self.fail(ErrorKind::FatalError, "failed to create a stream");
                    return;
                }
            }
            if let Err(e) = self.graphs[current].pause() {
                self.fail(e.kind(), e.to_string());
                return;
            }
        }
        if self.crossfading {
            let other = self.other();
            if let Err(e) = self.graphs[other].pause() {
                tracing::warn!(stream = %self.id, error = %e, "Failed to pause incoming graph");
            }
        }
        self.set_state(TransportState::Paused);
    }

    pub fn stop(&mut self) {
        if !matches!(
            self.state,
            TransportState::Playing | TransportState::Buffering | TransportState::Paused
        ) {
            return;
        }
        self.timers.stop_all();
        self.transition_pending = false;
        self.awaiting_position = false;

        let current = self.current;
        self.graphs[current].stop();
        let other = self.other();
        if self.crossfading || self.graphs[other].native_status() == NativeStatus::Playing {
            self.graphs[other].stop();
            self.set_gains(1.0, 0.0);
        }
        self.reset_flags();
        self.current_time = 0;
        self.set_state(TransportState::Stopped);
    }

    pub fn seek(&mut self, ms: i64, ticket: &AtomicBool) {
        if !ticket.load(Ordering::Acquire) {
            tracing::debug!(stream = %self.id, ms, "Dropping superseded seek");
            return;
        }
        if !self.seekable
            || matches!(
                self.state,
                TransportState::Stopped | TransportState::Error | TransportState::Loading
            )
        {
            tracing::debug!(stream = %self.id, ms, state = ?self.state, "Seek ignored");
            return;
        }
        let current = self.current;
        if let Err(e) = self.graphs[current].seek(ms) {
            tracing::warn!(stream = %self.id, ms, error = %e, "Seek failed");
            return;
        }
        let position = self.graphs[current].position().unwrap_or(ms);
        self.current_time = position;
        self.last_tick = None;

        if self.total_time > 0 {
            let remaining = self.total_time - position;
            let fade = (-self.transition_time).max(0);
            if remaining > self.ctx.config.preload_time_ms + fade {
                self.about_to_finish_emitted = false;
            }
            if remaining > self.prefinish_mark {
                self.prefinish_emitted = false;
            }
            if self.crossfading && remaining > fade {
                tracing::debug!(stream = %self.id, "Crossfade cancelled by seek");
                let other = self.other();
                self.graphs[other].stop();
                self.crossfading = false;
                self.set_gains(1.0, 0.0);
            }
        }
    }

    /// Records the transport state and stops for an open connection change.
    pub fn suspend(&mut self) {
        if self.suspended.is_some() || !self.state.is_active() {
            return;
        }
        let position = self.graphs[self.current].position().unwrap_or(self.current_time);
        tracing::debug!(stream = %self.id, state = ?self.state, position, "Suspending stream");
        self.suspended = Some((self.state, position));
        self.stop();
    }

    pub async fn resume(&mut self) {
        let Some((state, position)) = self.suspended.take() else {
            return;
        };
        if self.state == TransportState::Error {
            return;
        }
        tracing::debug!(stream = %self.id, ?state, position, "Resuming stream");
        if self.seekable && position > 0 {
            let current = self.current;
            if let Err(e) = self.graphs[current].seek(position) {
                tracing::warn!(stream = %self.id, error = %e, "Failed to restore position");
            }
            self.current_time = position;
        }
        match state {
            TransportState::Paused => self.pause(),
            _ => self.play().await,
        }
    }

    // --- Timers ---

    pub async fn on_timer(&mut self, fired: TimerFired) {
        if !self.timers.is_current(&fired) {
            return;
        }
        match fired.kind {
            TimerKind::Pulse => self.on_pulse().await,
            TimerKind::BufferingPoll => self.on_buffering_poll(),
            TimerKind::Transition => {
                self.timers.stop(TimerKind::Transition);
                if self.transition_pending {
                    self.transition_pending = false;
                    self.switch_to_next().await;
                }
            },
        }
    }

    fn on_buffering_poll(&mut self) {
        if self.state != TransportState::Buffering || !self.awaiting_position {
            self.timers.stop(TimerKind::BufferingPoll);
            return;
        }
        let graph = &self.graphs[self.current];
        if graph.native_status() == NativeStatus::Idle {
            self.timers.stop(TimerKind::BufferingPoll);
            self.awaiting_position = false;
            self.set_state(TransportState::Stopped);
        } else if let Some(position) = graph.position() {
            self.timers.stop(TimerKind::BufferingPoll);
            self.awaiting_position = false;
            self.current_time = position;
            self.set_state(TransportState::Playing);
        }
    }

    fn maybe_tick(&mut self, position: i64) {
        let Ok(interval) = i64::try_from(self.tick_interval) else {
            return;
        };
        if interval == 0 {
            return;
        }
        let bucket = position / interval;
        if self.last_tick.is_some_and(|last| last / interval == bucket) {
            return;
        }
        self.last_tick = Some(position);
        self.emit(MediaEvent::Tick(position));
    }

    async fn on_pulse(&mut self) {
        if self.state != TransportState::Playing {
            return;
        }
        let Some(position) = self.graphs[self.current].position() else {
            return;
        };
        self.current_time = position;
        self.maybe_tick(position);
        if self.total_time <= 0 {
            return;
        }

        let remaining = self.total_time - position;
        let fade = (-self.transition_time).max(0);
        if !self.about_to_finish_emitted && remaining <= self.ctx.config.preload_time_ms + fade {
            self.about_to_finish_emitted = true;
            self.emit(MediaEvent::AboutToFinish);
            self.preload_from_queue().await;
        }
        if self.prefinish_mark > 0 && !self.prefinish_emitted && remaining <= self.prefinish_mark {
            self.prefinish_emitted = true;
            self.emit(MediaEvent::PrefinishMarkReached(remaining));
        }
        if fade > 0 && remaining <= fade && self.next_loaded() {
            self.crossfade_step(remaining, fade);
        }
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    fn crossfade_step(&mut self, remaining: i64, fade: i64) {
        let other = self.other();
        if !self.crossfading {
            if let Err(e) = self.ensure_stream(other) {
                tracing::warn!(stream = %self.id, error = %e, "Cannot bind incoming graph");
                return;
            }
            if let Err(e) = self.graphs[other].play() {
                tracing::warn!(stream = %self.id, error = %e, "Cannot start incoming graph");
                return;
            }
            tracing::debug!(stream = %self.id, remaining, "Crossfade started");
            self.crossfading = true;
        }
        let progress = (1.0 - remaining.max(0) as f64 / fade as f64).clamp(0.0, 1.0) as f32;
        let previous = self
            .outputs
            .iter()
            .find(|output| output.class() == ObjectClass::AudioOutput)
            .map_or(0.0, |output| output.crossfade_gains()[other]);
        let progress = progress.max(previous);
        self.set_gains(1.0 - progress, progress);
    }

    // --- Native events ---

    pub async fn on_native_event(&mut self, key: GraphKey, event: NativeEvent) {
        if key.index != self.current {
            tracing::trace!(stream = %self.id, graph = key.index, ?event, "Ignoring event from idle graph");
            return;
        }
        match event {
            NativeEvent::EndOfStream => self.on_end_of_stream().await,
            NativeEvent::Buffering(percent) => self.on_buffering(percent),
            NativeEvent::Error { kind, reason } => {
                if self.state != TransportState::Error {
                    self.fail(kind, reason);
                }
            },
            NativeEvent::MetaDataChanged(metadata) => {
                self.metadata = metadata.clone();
                self.emit(MediaEvent::MetaDataChanged(metadata));
            },
            NativeEvent::LengthChanged(ms) => {
                if ms != self.total_time {
                    self.total_time = ms;
                    self.emit(MediaEvent::TotalTimeChanged(ms));
                }
            },
        }
    }

    fn on_buffering(&mut self, percent: u8) {
        let percent = percent.min(100);
        self.emit(MediaEvent::BufferStatus(percent));
        if percent < 100 && self.state == TransportState::Playing {
            self.set_state(TransportState::Buffering);
        } else if percent == 100 && self.state == TransportState::Buffering && !self.awaiting_position
        {
            self.set_state(TransportState::Playing);
        }
    }

    async fn on_end_of_stream(&mut self) {
        if !matches!(self.state, TransportState::Playing | TransportState::Buffering) {
            return;
        }
        let graph = &self.graphs[self.current];
        let total = graph.total_time();
        if let (true, Some(position)) = (total > 0, graph.position()) {
            if position < total - END_OF_STREAM_TOLERANCE_MS {
                tracing::debug!(stream = %self.id, position, total, "Ignoring stale end of stream");
                return;
            }
        }
        if total > 0 {
            self.current_time = total;
        }

        self.preload_from_queue().await;
        if !self.next_loaded() {
            if self.prefinish_mark > 0 && !self.prefinish_emitted {
                self.prefinish_emitted = true;
                self.emit(MediaEvent::PrefinishMarkReached(0));
            }
            self.timers.stop_all();
            self.awaiting_position = false;
            let current = self.current;
            self.graphs[current].stop();
            self.reset_flags();
            self.set_state(TransportState::Stopped);
            self.emit(MediaEvent::Finished);
            return;
        }

        match self.transition_time.cmp(&0) {
            std::cmp::Ordering::Equal => self.switch_to_next().await,
            std::cmp::Ordering::Greater => {
                let current = self.current;
                self.graphs[current].stop();
                self.timers.stop(TimerKind::Pulse);
                self.transition_pending = true;
                let gap = Duration::from_millis(self.transition_time.unsigned_abs());
                tracing::debug!(stream = %self.id, gap_ms = self.transition_time, "Waiting before next source");
                self.timers.start_once(TimerKind::Transition, gap);
            },
            std::cmp::Ordering::Less => {
                self.set_gains(0.0, 1.0);
                self.switch_to_next().await;
            },
        }
    }

    /// Makes the preloaded graph current.
    async fn switch_to_next(&mut self) {
        let old = self.current;
        self.current = self.other();
        let current = self.current;
        tracing::info!(stream = %self.id, from = old, to = current, "Switching to next source");

        self.present_current_graph();
        if self.graphs[current].native_status() != NativeStatus::Playing {
            if let Err(e) = self.ensure_stream(current) {
                tracing::warn!(stream = %self.id, error = %e, "Native stream creation failed");
                self.fail(ErrorKind::FatalError, "failed to create a stream");
                return;
            }
            if let Err(e) = self.graphs[current].play() {
                self.fail(e.kind(), e.to_string());
                return;
            }
        }
        self.graphs[old].cleanup();

        self.source = std::mem::take(&mut self.next_source);
        self.current_time = self.graphs[current].position().unwrap_or(0);
        self.refresh_info(false);
        self.emit(MediaEvent::CurrentSourceChanged(self.source.clone()));
        self.reset_flags();
        self.awaiting_position = false;
        self.timers.stop(TimerKind::BufferingPoll);
        self.start_pulse();
        self.set_state(TransportState::Playing);
    }

    // --- Topology ---

    /// Applies one rewire call to both graphs.
    pub fn apply_wire(&mut self, call: &WireCall) -> bool {
        let mut applied = true;
        for graph in &mut self.graphs {
            let done = match call.op {
                WireOp::Connect => {
                    graph.grab_node(&call.source);
                    graph.grab_node(&call.sink);
                    graph.connect_nodes(&call.source, &call.sink)
                },
                WireOp::Disconnect => graph.disconnect_nodes(&call.source, &call.sink),
            };
            if !done {
                tracing::warn!(stream = %self.id, graph = %graph.key(), ?call, "Rewire call had no effect");
            }
            applied &= done;
        }
        applied
    }

    /// Replaces the terminal consumers the native streams bind to.
    pub fn set_endpoints(&mut self, outputs: Vec<Arc<BackendNode>>) {
        let unchanged = outputs.len() == self.outputs.len()
            && outputs.iter().zip(&self.outputs).all(|(a, b)| a.id() == b.id());
        if unchanged {
            return;
        }
        tracing::debug!(stream = %self.id, outputs = outputs.len(), "Stream endpoints changed");
        self.outputs = outputs;
        self.stream_dirty = [true, true];
        self.present_current_graph();
    }

    pub fn remove_node(&mut self, node: NodeId) {
        for graph in &mut self.graphs {
            graph.remove_node(node);
        }
        let before = self.outputs.len();
        self.outputs.retain(|output| output.id() != node);
        if self.outputs.len() != before {
            self.stream_dirty = [true, true];
        }
    }

    /// Stops everything and releases both graphs.
    pub fn teardown(&mut self) {
        self.timers.stop_all();
        for graph in &mut self.graphs {
            graph.cleanup();
        }
        self.outputs.clear();
        tracing::debug!(stream = %self.id, "Stream torn down");
    }
}

#[cfg(all(test, feature = "sim"))]
mod tests {
    use super::*;
    use crate::sim::{SimBackend, SimMedia};
    use mediagraph_core::NodeDescriptor;

    fn machine(backend: &SimBackend) -> (StreamStateMachine, mpsc::Receiver<MediaEvent>) {
        let (timer_tx, _timer_rx) = mpsc::unbounded_channel();
        let (native_tx, _native_rx) = mpsc::unbounded_channel();
        let ctx = StreamContext {
            config: Arc::new(EngineConfig::default()),
            timer_tx,
            native_tx,
            state_transitions: opentelemetry::global::meter("mediagraph_engine_test")
                .u64_counter("stream.state_transitions")
                .build(),
        };
        let node =
            BackendNode::new(NodeId(1), NodeDescriptor::for_class(ObjectClass::MediaSource), None);
        let (snapshot_tx, _) = watch::channel(StreamSnapshot::default());
        let mut stream = StreamStateMachine::new(&node, backend, snapshot_tx, ctx);
        let events = stream.subscribe();
        (stream, events)
    }

    fn drain(events: &mut mpsc::Receiver<MediaEvent>) -> Vec<MediaEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = events.try_recv() {
            drained.push(event);
        }
        drained
    }

    fn output(id: u32) -> Arc<BackendNode> {
        Arc::new(BackendNode::new(
            NodeId(id),
            NodeDescriptor::for_class(ObjectClass::AudioOutput),
            None,
        ))
    }

    #[tokio::test]
    async fn test_stop_is_noop_in_error_and_loading() {
        let backend = SimBackend::new();
        let (mut stream, mut events) = machine(&backend);

        for state in [TransportState::Error, TransportState::Loading] {
            stream.state = state;
            stream.stop();
            assert_eq!(stream.state(), state);
        }
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test]
    async fn test_repeated_pause_changes_state_once() {
        let source = MediaSource::url("sim://song");
        let backend = SimBackend::new().with_media(&source, SimMedia::audio(5000));
        let (mut stream, mut events) = machine(&backend);

        stream.set_source(source.clone(), None).await;
        assert_eq!(stream.state(), TransportState::Stopped);
        let loaded = drain(&mut events);
        assert!(loaded.contains(&MediaEvent::TotalTimeChanged(5000)));
        assert!(loaded.contains(&MediaEvent::CurrentSourceChanged(source)));

        stream.pause();
        stream.pause();
        let changes: Vec<_> = drain(&mut events)
            .into_iter()
            .filter(|event| matches!(event, MediaEvent::StateChanged { .. }))
            .collect();
        assert_eq!(changes, vec![MediaEvent::StateChanged {
            old: TransportState::Stopped,
            new: TransportState::Paused,
        }]);
    }

    #[tokio::test]
    async fn test_play_requires_outputs_and_source() {
        let source = MediaSource::url("sim://song");
        let backend = SimBackend::new().with_media(&source, SimMedia::audio(5000));
        let (mut stream, _events) = machine(&backend);

        stream.set_source(source, None).await;
        stream.play().await;
        assert_eq!(stream.state(), TransportState::Error);
        assert_eq!(stream.error_kind, ErrorKind::FatalError);
        assert_eq!(stream.error_message, "no valid audio or video outputs");

        stream.set_source(MediaSource::Invalid, None).await;
        assert_eq!(stream.error_kind, ErrorKind::NoError);
        stream.set_endpoints(vec![output(2)]);
        stream.play().await;
        assert_eq!(stream.error_kind, ErrorKind::NormalError);
        assert_eq!(stream.error_message, "no media source");

        // Error is terminal for transport calls.
        stream.play().await;
        stream.pause();
        assert_eq!(stream.state(), TransportState::Error);
    }

    #[tokio::test]
    async fn test_open_failure_keeps_reason() {
        let source = MediaSource::url("sim://broken");
        let media = SimMedia { fail: Some("codec not found".to_string()), ..SimMedia::audio(1000) };
        let backend = SimBackend::new().with_media(&source, media);
        let (mut stream, mut events) = machine(&backend);

        stream.set_source(source, None).await;
        assert_eq!(stream.state(), TransportState::Error);
        let events = drain(&mut events);
        assert!(events.contains(&MediaEvent::Error {
            kind: ErrorKind::NormalError,
            message: "codec not found".to_string(),
        }));
        assert!(events.contains(&MediaEvent::StateChanged {
            old: TransportState::Stopped,
            new: TransportState::Loading,
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_seek_rearms_about_to_finish() {
        let source = MediaSource::url("sim://song");
        let backend = SimBackend::new().with_media(&source, SimMedia::audio(10_000));
        let (mut stream, mut events) = machine(&backend);
        stream.set_endpoints(vec![output(2)]);
        stream.set_source(source, None).await;
        stream.play().await;
        assert_eq!(stream.state(), TransportState::Playing);

        let ticket = AtomicBool::new(true);
        stream.seek(9000, &ticket);
        stream.on_pulse().await;
        assert!(stream.about_to_finish_emitted);
        assert!(drain(&mut events).contains(&MediaEvent::AboutToFinish));

        stream.seek(1000, &ticket);
        assert!(!stream.about_to_finish_emitted);

        let stale = AtomicBool::new(false);
        stream.seek(9500, &stale);
        assert_eq!(stream.current_time, 1000);
    }
}
