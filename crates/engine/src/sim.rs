// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Software reference engine.
//!
//! Media are described rather than decoded: a catalog maps source locations to
//! [`SimMedia`] entries (duration, stream kinds, seekability, startup delay,
//! metadata, failure). Byte-stream sources carry their descriptor as a single
//! JSON line at the start of the stream. Playback is driven by the tokio clock,
//! so tests running with paused time are fully deterministic.

use crate::native::{
    DeviceInfo, GraphKey, NativeBackend, NativeError, NativeEvent, NativeEventSender,
    NativeGraph, NativeStatus,
};
use crate::pipeline::{FilterId, FilterRole, Pipeline, PortRef};
use async_trait::async_trait;
use mediagraph_core::types::{MajorType, MediaFormat};
use mediagraph_core::{
    ByteStream, MediaSource, MetaData, PortSpec, Terminus, TerminusHandle, TerminusKind,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const fn default_true() -> bool {
    true
}

/// Upper bound on the descriptor line of a byte-stream source.
const DESCRIPTOR_MAX_BYTES: usize = 4096;

/// Description of one simulated medium.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimMedia {
    /// Duration in milliseconds; zero or negative for an unknown length.
    #[serde(default)]
    pub duration_ms: i64,
    #[serde(default = "default_true")]
    pub audio: bool,
    #[serde(default)]
    pub video: bool,
    #[serde(default = "default_true")]
    pub seekable: bool,
    /// Whether the container goes through a demultiplexer. Audio-only media
    /// without one are handled by a single parsing filter.
    #[serde(default = "default_true")]
    pub demux: bool,
    /// Time between starting to run and the first reported position.
    #[serde(default)]
    pub startup_delay_ms: u64,
    #[serde(default)]
    pub metadata: MetaData,
    /// Open failure reported verbatim by [`NativeGraph::open`].
    #[serde(default)]
    pub fail: Option<String>,
    /// Makes binding the rendering side fail.
    #[serde(default)]
    pub fail_stream: bool,
    /// Blocks the calling thread this long when the source is closed,
    /// like a native engine that hangs while releasing its graph.
    #[serde(default)]
    pub close_stall_ms: u64,
}

impl Default for SimMedia {
    fn default() -> Self {
        Self {
            duration_ms: 0,
            audio: true,
            video: false,
            seekable: true,
            demux: true,
            startup_delay_ms: 0,
            metadata: MetaData::new(),
            fail: None,
            fail_stream: false,
            close_stall_ms: 0,
        }
    }
}

impl SimMedia {
    pub fn audio(duration_ms: i64) -> Self {
        Self { duration_ms, ..Self::default() }
    }

    pub fn audio_video(duration_ms: i64) -> Self {
        Self { duration_ms, video: true, ..Self::default() }
    }

    fn duration(&self) -> Option<i64> {
        (self.duration_ms > 0).then_some(self.duration_ms)
    }
}

type Catalog = Arc<RwLock<HashMap<String, SimMedia>>>;

/// A simulated output device.
pub struct SimTerminus {
    kind: TerminusKind,
    name: String,
    released: Arc<AtomicUsize>,
}

impl Terminus for SimTerminus {
    fn kind(&self) -> TerminusKind {
        self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for SimTerminus {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct ProbeState {
    seeks: Mutex<Vec<(GraphKey, i64)>>,
    bound: Mutex<HashMap<GraphKey, Vec<String>>>,
    events: Mutex<Option<NativeEventSender>>,
    opened_termini: AtomicUsize,
    released_termini: Arc<AtomicUsize>,
    stream_readers: Arc<AtomicUsize>,
}

/// Counts a byte-stream reader for as long as its task holds it.
struct ReaderSlot(Arc<AtomicUsize>);

impl ReaderSlot {
    fn claim(count: &Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self(count.clone())
    }
}

impl Drop for ReaderSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Observation and injection point into the simulated engine.
#[derive(Clone, Default)]
pub struct SimProbe {
    state: Arc<ProbeState>,
}

impl SimProbe {
    /// Every seek applied by a native graph, in order.
    pub fn seeks(&self) -> Vec<(GraphKey, i64)> {
        self.state.seeks.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Names of the termini the graph is currently rendering to.
    pub fn bound_termini(&self, key: GraphKey) -> Vec<String> {
        self.state
            .bound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()
            .unwrap_or_default()
    }

    pub fn opened_termini(&self) -> usize {
        self.state.opened_termini.load(Ordering::SeqCst)
    }

    pub fn released_termini(&self) -> usize {
        self.state.released_termini.load(Ordering::SeqCst)
    }

    /// Byte-stream reader tasks that have not finished yet.
    pub fn stream_readers(&self) -> usize {
        self.state.stream_readers.load(Ordering::SeqCst)
    }

    /// Injects a native event as if the graph had raised it.
    pub fn emit(&self, key: GraphKey, event: NativeEvent) -> bool {
        self.state
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|tx| tx.send((key, event)).is_ok())
    }

    fn record_seek(&self, key: GraphKey, position_ms: i64) {
        self.state.seeks.lock().unwrap_or_else(PoisonError::into_inner).push((key, position_ms));
    }

    fn set_bound(&self, key: GraphKey, names: Option<Vec<String>>) {
        let mut bound = self.state.bound.lock().unwrap_or_else(PoisonError::into_inner);
        match names {
            Some(names) => bound.insert(key, names),
            None => bound.remove(&key),
        };
    }
}

/// [`NativeBackend`] implementation backed by a media catalog.
#[derive(Clone, Default)]
pub struct SimBackend {
    catalog: Catalog,
    probe: SimProbe,
    audio_devices: usize,
    video_devices: usize,
}

impl SimBackend {
    pub fn new() -> Self {
        Self { audio_devices: 2, video_devices: 1, ..Self::default() }
    }

    /// Registers a medium under the display form of `source`.
    #[must_use]
    pub fn with_media(self, source: &MediaSource, media: SimMedia) -> Self {
        self.insert(source, media);
        self
    }

    pub fn insert(&self, source: &MediaSource, media: SimMedia) {
        self.catalog
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(source.to_string(), media);
    }

    pub fn probe(&self) -> SimProbe {
        self.probe.clone()
    }

    fn devices(&self, kind: TerminusKind) -> Vec<DeviceInfo> {
        let (count, prefix) = match kind {
            TerminusKind::Audio => (self.audio_devices, "audio"),
            TerminusKind::Video => (self.video_devices, "video"),
        };
        (0..count)
            .map(|index| DeviceInfo {
                index,
                name: format!("sim-{prefix}-{index}"),
                description: format!("Simulated {prefix} output {index}"),
                kind,
            })
            .collect()
    }
}

impl NativeBackend for SimBackend {
    fn name(&self) -> &str {
        "sim"
    }

    fn create_graph(&self, key: GraphKey, events: NativeEventSender) -> Box<dyn NativeGraph> {
        self.probe
            .state
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_or_insert_with(|| events.clone());
        Box::new(SimGraph::new(key, events, self.catalog.clone(), self.probe.clone()))
    }

    fn audio_devices(&self) -> Vec<DeviceInfo> {
        self.devices(TerminusKind::Audio)
    }

    fn video_devices(&self) -> Vec<DeviceInfo> {
        self.devices(TerminusKind::Video)
    }

    fn open_terminus(
        &self,
        kind: TerminusKind,
        device: usize,
    ) -> Result<Arc<dyn Terminus>, NativeError> {
        let info = self
            .devices(kind)
            .into_iter()
            .find(|d| d.index == device)
            .ok_or_else(|| NativeError::Unsupported(format!("no {kind:?} device {device}")))?;
        self.probe.state.opened_termini.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(SimTerminus {
            kind,
            name: info.name,
            released: self.probe.state.released_termini.clone(),
        }))
    }
}

/// Playback clock. `anchor` is the instant at which `base_ms` was (or will be) current.
#[derive(Debug, Default)]
struct Clock {
    base_ms: i64,
    anchor: Option<Instant>,
}

pub struct SimGraph {
    key: GraphKey,
    events: NativeEventSender,
    catalog: Catalog,
    probe: SimProbe,
    media: Option<SimMedia>,
    byte_stream: Option<Arc<ByteStream>>,
    status: NativeStatus,
    bound: Option<Vec<TerminusHandle>>,
    clock: Clock,
    run_token: Option<CancellationToken>,
    source_token: Option<CancellationToken>,
    reader: Option<JoinHandle<()>>,
    /// Reader of the previous source, joined before the next one starts.
    retired_reader: Option<JoinHandle<()>>,
}

impl SimGraph {
    fn new(key: GraphKey, events: NativeEventSender, catalog: Catalog, probe: SimProbe) -> Self {
        Self {
            key,
            events,
            catalog,
            probe,
            media: None,
            byte_stream: None,
            status: NativeStatus::Idle,
            bound: None,
            clock: Clock::default(),
            run_token: None,
            source_token: None,
            reader: None,
            retired_reader: None,
        }
    }

    async fn describe(&self, source: &MediaSource) -> Result<SimMedia, NativeError> {
        if let MediaSource::Stream(stream) = source {
            let stream = stream.0.clone();
            let line = tokio::task::spawn_blocking(move || {
                stream.read_until(b'\n', DESCRIPTOR_MAX_BYTES)
            })
            .await
            .map_err(|e| NativeError::open(format!("descriptor reader failed: {e}")))?
            .map_err(|e| NativeError::open(format!("cannot read stream descriptor: {e}")))?;
            return serde_json::from_slice(&line)
                .map_err(|e| NativeError::open(format!("invalid stream descriptor: {e}")));
        }

        self.catalog
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&source.to_string())
            .cloned()
            .ok_or_else(|| NativeError::open(format!("Cannot open {source}: no such media")))
    }

    /// Adds the filters the engine would use to render `media` by default.
    fn build_filters(pipeline: &mut Pipeline, media: &SimMedia) -> Result<(), NativeError> {
        let container = MediaFormat::encoded(MajorType::Stream, "container");
        let source = pipeline.add_filter(
            "sim-source",
            FilterRole::Native,
            &[],
            &[PortSpec::new("out", vec![container.clone()])],
        );

        let mut kinds: Vec<(MajorType, &str)> = Vec::new();
        if media.audio {
            kinds.push((MajorType::Audio, "vorbis"));
        }
        if media.video {
            kinds.push((MajorType::Video, "theora"));
        }

        let link = |pipeline: &mut Pipeline, from: FilterId, index: usize, to: FilterId| {
            pipeline
                .connect(PortRef::output(from, index), PortRef::input(to, 0), None)
                .map(|_| ())
                .map_err(|e| NativeError::open(format!("cannot build graph: {e}")))
        };

        if !media.demux && media.audio && !media.video {
            let parser = pipeline.add_filter(
                "sim-parser",
                FilterRole::Native,
                &[PortSpec::new("in", vec![container])],
                &[PortSpec::raw("out", MajorType::Audio)],
            );
            link(pipeline, source, 0, parser)?;
            let renderer = Self::add_renderer(pipeline, MajorType::Audio);
            return link(pipeline, parser, 0, renderer);
        }

        let demux_outputs: Vec<PortSpec> = kinds
            .iter()
            .map(|(major, codec)| {
                let name = format!("{major:?}").to_lowercase();
                PortSpec::new(name, vec![MediaFormat::encoded(*major, *codec)])
            })
            .collect();
        let demux = pipeline.add_filter(
            "sim-demux",
            FilterRole::Native,
            &[PortSpec::new("in", vec![container])],
            &demux_outputs,
        );
        link(pipeline, source, 0, demux)?;

        for (index, (major, codec)) in kinds.iter().enumerate() {
            let decoder = pipeline.add_filter(
                format!("sim-{codec}-decoder"),
                FilterRole::Native,
                &[PortSpec::new("in", vec![MediaFormat::encoded(*major, *codec)])],
                &[PortSpec::raw("out", *major)],
            );
            link(pipeline, demux, index, decoder)?;
            let renderer = Self::add_renderer(pipeline, *major);
            link(pipeline, decoder, 0, renderer)?;
        }
        Ok(())
    }

    fn add_renderer(pipeline: &mut Pipeline, major: MajorType) -> FilterId {
        pipeline.add_filter(
            format!("sim-default-{major:?}-renderer").to_lowercase(),
            FilterRole::Native,
            &[PortSpec::raw("in", major)],
            &[],
        )
    }

    /// Keeps consuming the byte stream so that a starved reader raises buffering.
    fn watch_byte_stream(&mut self, stream: Arc<ByteStream>) {
        let token = CancellationToken::new();
        let mut buffering = stream.watch_buffering();
        let reader = stream.clone();
        let slot = ReaderSlot::claim(&self.probe.state.stream_readers);
        self.reader = Some(tokio::task::spawn_blocking(move || {
            let _slot = slot;
            let mut chunk = vec![0; DESCRIPTOR_MAX_BYTES];
            while reader.read(&mut chunk) > 0 {}
        }));

        let events = self.events.clone();
        let key = self.key;
        let cancel = token.clone();
        tokio::spawn(async move {
            if *buffering.borrow_and_update() {
                let _ = events.send((key, NativeEvent::Buffering(0)));
            }
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    changed = buffering.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let starved = *buffering.borrow_and_update();
                        let level = if starved { 0 } else { 100 };
                        if events.send((key, NativeEvent::Buffering(level))).is_err() {
                            break;
                        }
                    },
                }
            }
        });
        self.source_token = Some(token);
        self.byte_stream = Some(stream);
    }

    fn cancel_run(&mut self) {
        if let Some(token) = self.run_token.take() {
            token.cancel();
        }
    }

    /// Schedules the end-of-stream notification for the current clock.
    fn schedule_end(&mut self) {
        self.cancel_run();
        let (Some(duration), Some(anchor)) =
            (self.media.as_ref().and_then(SimMedia::duration), self.clock.anchor)
        else {
            return;
        };
        let remaining = u64::try_from((duration - self.clock.base_ms).max(0)).unwrap_or(0);
        let deadline = anchor + Duration::from_millis(remaining);
        let token = CancellationToken::new();
        let cancel = token.clone();
        let events = self.events.clone();
        let key = self.key;
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {},
                () = tokio::time::sleep_until(deadline) => {
                    tracing::trace!(graph = %key, "Simulated end of stream");
                    let _ = events.send((key, NativeEvent::EndOfStream));
                },
            }
        });
        self.run_token = Some(token);
    }

    fn clamp(&self, position: i64) -> i64 {
        let position = position.max(0);
        self.media.as_ref().and_then(SimMedia::duration).map_or(position, |d| position.min(d))
    }
}

#[async_trait]
impl NativeGraph for SimGraph {
    async fn open(
        &mut self,
        pipeline: &mut Pipeline,
        source: &MediaSource,
    ) -> Result<(), NativeError> {
        self.close();
        if let Some(reader) = self.retired_reader.take() {
            if let Err(e) = reader.await {
                if !e.is_cancelled() {
                    tracing::warn!(graph = %self.key, error = %e, "Byte-stream reader failed");
                }
            }
        }
        let media = self.describe(source).await?;
        if let Some(reason) = &media.fail {
            return Err(NativeError::open(reason.clone()));
        }
        Self::build_filters(pipeline, &media)?;
        if let MediaSource::Stream(stream) = source {
            self.watch_byte_stream(stream.0.clone());
        }
        tracing::debug!(
            graph = %self.key,
            %source,
            duration_ms = media.duration_ms,
            "Opened simulated media"
        );
        self.media = Some(media);
        self.clock = Clock::default();
        self.status = NativeStatus::Stopped;
        Ok(())
    }

    fn close(&mut self) {
        if let Some(stall) = self.media.as_ref().map(|m| m.close_stall_ms).filter(|ms| *ms > 0) {
            tracing::warn!(graph = %self.key, stall_ms = stall, "Simulated engine stalls on close");
            std::thread::sleep(Duration::from_millis(stall));
        }
        self.cancel_run();
        if let Some(token) = self.source_token.take() {
            token.cancel();
        }
        if let Some(stream) = self.byte_stream.take() {
            stream.stop();
        }
        if let Some(reader) = self.reader.take() {
            // Only cancels a reader that has not started; a running one
            // returns once the stream is stopped.
            reader.abort();
            self.retired_reader = Some(reader);
        }
        self.dispose_stream();
        self.media = None;
        self.clock = Clock::default();
        self.status = NativeStatus::Idle;
    }

    fn create_stream(&mut self, termini: &[TerminusHandle]) -> Result<(), NativeError> {
        if self.media.as_ref().is_some_and(|m| m.fail_stream) {
            return Err(NativeError::Transport("cannot bind renderers".to_string()));
        }
        let names = termini.iter().map(|t| t.name().to_string()).collect();
        self.probe.set_bound(self.key, Some(names));
        self.bound = Some(termini.to_vec());
        Ok(())
    }

    fn has_stream(&self) -> bool {
        self.bound.is_some()
    }

    fn dispose_stream(&mut self) {
        if self.bound.take().is_some() {
            self.probe.set_bound(self.key, None);
        }
    }

    fn status(&self) -> NativeStatus {
        self.status
    }

    fn run(&mut self) -> Result<(), NativeError> {
        let media = self
            .media
            .as_ref()
            .ok_or_else(|| NativeError::Transport("nothing to run".to_string()))?;
        match self.status {
            NativeStatus::Playing => return Ok(()),
            NativeStatus::Stopped => {
                let delay = Duration::from_millis(media.startup_delay_ms);
                self.clock.anchor = Some(Instant::now() + delay);
            },
            NativeStatus::Paused | NativeStatus::Idle => {
                self.clock.anchor = Some(Instant::now());
            },
        }
        self.status = NativeStatus::Playing;
        self.schedule_end();
        Ok(())
    }

    fn pause(&mut self) -> Result<(), NativeError> {
        if self.media.is_none() {
            return Err(NativeError::Transport("nothing to pause".to_string()));
        }
        if self.status == NativeStatus::Playing {
            self.clock.base_ms = self.position().unwrap_or(self.clock.base_ms);
            self.clock.anchor = None;
            self.cancel_run();
        }
        self.status = NativeStatus::Paused;
        Ok(())
    }

    fn stop(&mut self) {
        self.cancel_run();
        self.clock = Clock::default();
        if self.media.is_some() {
            self.status = NativeStatus::Stopped;
        }
    }

    fn seek(&mut self, position_ms: i64) -> Result<(), NativeError> {
        let media = self
            .media
            .as_ref()
            .ok_or_else(|| NativeError::Transport("nothing to seek".to_string()))?;
        if !media.seekable {
            return Err(NativeError::Unsupported("media is not seekable".to_string()));
        }
        let target = self.clamp(position_ms);
        self.probe.record_seek(self.key, target);
        self.clock.base_ms = target;
        if self.status == NativeStatus::Playing {
            let now = Instant::now();
            self.clock.anchor = Some(self.clock.anchor.map_or(now, |a| a.max(now)));
            self.schedule_end();
        }
        Ok(())
    }

    fn position(&self) -> Option<i64> {
        self.media.as_ref()?;
        match (self.status, self.clock.anchor) {
            (NativeStatus::Idle, _) => None,
            (NativeStatus::Playing, Some(anchor)) => {
                let now = Instant::now();
                if now < anchor {
                    return None;
                }
                let elapsed = i64::try_from((now - anchor).as_millis()).unwrap_or(i64::MAX);
                Some(self.clamp(self.clock.base_ms.saturating_add(elapsed)))
            },
            _ => Some(self.clock.base_ms),
        }
    }

    fn duration(&self) -> Option<i64> {
        self.media.as_ref().and_then(SimMedia::duration)
    }

    fn is_seekable(&self) -> bool {
        self.media.as_ref().is_some_and(|m| m.seekable)
    }

    fn metadata(&self) -> MetaData {
        self.media.as_ref().map(|m| m.metadata.clone()).unwrap_or_default()
    }
}

impl Drop for SimGraph {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediagraph_core::NodeId;
    use tokio::sync::mpsc;

    fn key() -> GraphKey {
        GraphKey { stream: NodeId(1), index: 0 }
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_and_end_of_stream() {
        let source = MediaSource::url("sim://a");
        let backend = SimBackend::new().with_media(&source, SimMedia {
            startup_delay_ms: 100,
            ..SimMedia::audio(1000)
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut graph = backend.create_graph(key(), tx);
        let mut pipeline = Pipeline::new();

        assert!(graph.open(&mut pipeline, &source).await.is_ok());
        assert_eq!(graph.status(), NativeStatus::Stopped);
        assert!(graph.run().is_ok());
        assert_eq!(graph.position(), None);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(graph.position(), Some(500));

        assert!(graph.pause().is_ok());
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(graph.position(), Some(500));

        assert!(graph.run().is_ok());
        let event = rx.recv().await;
        assert_eq!(event, Some((key(), NativeEvent::EndOfStream)));
        assert_eq!(graph.position(), Some(1000));
    }

    #[tokio::test]
    async fn test_open_failures_carry_reason() {
        let broken = MediaSource::url("sim://broken");
        let media = SimMedia { fail: Some("codec missing".into()), ..SimMedia::default() };
        let backend = SimBackend::new().with_media(&broken, media);
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut graph = backend.create_graph(key(), tx);
        let mut pipeline = Pipeline::new();

        assert_eq!(
            graph.open(&mut pipeline, &broken).await,
            Err(NativeError::open("codec missing"))
        );
        assert!(graph.open(&mut pipeline, &MediaSource::url("sim://nope")).await.is_err());
        assert_eq!(graph.status(), NativeStatus::Idle);
    }

    fn described_stream(duration_ms: i64) -> MediaSource {
        let (stream, _requests) = ByteStream::new();
        stream.write_data(format!("{{\"duration_ms\":{duration_ms}}}\n").into());
        stream.write_data(vec![0_u8; 16].into());
        MediaSource::stream(stream)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reopen_joins_previous_reader() {
        let backend = SimBackend::new();
        let probe = backend.probe();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut graph = backend.create_graph(key(), tx);

        let first = described_stream(1000);
        assert!(graph.open(&mut Pipeline::new(), &first).await.is_ok());
        assert_eq!(graph.duration(), Some(1000));
        assert_eq!(probe.stream_readers(), 1);

        let second = described_stream(2000);
        assert!(graph.open(&mut Pipeline::new(), &second).await.is_ok());
        assert_eq!(graph.duration(), Some(2000));
        assert_eq!(probe.stream_readers(), 1);

        graph.close();
        assert!(graph.open(&mut Pipeline::new(), &MediaSource::url("sim://none")).await.is_err());
        assert_eq!(probe.stream_readers(), 0);
    }

    #[test]
    fn test_termini_count_releases() {
        let backend = SimBackend::new();
        let probe = backend.probe();
        let terminus = backend.open_terminus(TerminusKind::Audio, 1);
        assert!(terminus.is_ok());
        assert!(backend.open_terminus(TerminusKind::Video, 3).is_err());
        assert_eq!(probe.opened_termini(), 1);
        drop(terminus);
        assert_eq!(probe.released_termini(), 1);
    }
}
