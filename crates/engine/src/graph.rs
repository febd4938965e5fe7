// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! One playable slot of a stream.
//!
//! A [`MediaGraph`] owns a [`Pipeline`] together with the native graph that
//! renders it. Before a source is loaded the media object is represented by a
//! placeholder source with dynamic outputs, so that sinks can be wired at any
//! time. Loading a source asks the native engine to build its default graph,
//! keeps the source/demultiplexer/decoder part of it and rewires the decoders to
//! the registered sinks.

use crate::native::{GraphKey, NativeError, NativeGraph, NativeStatus};
use crate::node::BackendNode;
use crate::pipeline::{Filter, FilterId, FilterRole, Pipeline, Port, PortRef, RunState};
use indexmap::IndexSet;
use mediagraph_core::types::{Encoding, MajorType, MediaFormat};
use mediagraph_core::{MediaSource, MetaData, NodeId, PortSpec, TerminusHandle};
use std::collections::BTreeSet;

pub struct MediaGraph {
    key: GraphKey,
    pipeline: Pipeline,
    native: Box<dyn NativeGraph>,
    fake_source: FilterId,
    real_source: Option<FilterId>,
    demux: Option<FilterId>,
    decoders: Vec<FilterId>,
    /// Filters between source, demultiplexer and decoders.
    chain: Vec<FilterId>,
    /// Sinks connected directly to the media object, in connection order.
    sink_connections: IndexSet<NodeId>,
    dirty: bool,
    unused_filters: BTreeSet<FilterId>,
    has_audio: bool,
    has_video: bool,
    media_source: MediaSource,
}

impl MediaGraph {
    pub fn new(key: GraphKey, native: Box<dyn NativeGraph>) -> Self {
        let mut pipeline = Pipeline::new();
        let fake_source = pipeline.add_filter(
            "fake-source",
            FilterRole::FakeSource,
            &[],
            &[PortSpec::new("out", vec![
                MediaFormat::raw(MajorType::Audio),
                MediaFormat::raw(MajorType::Video),
                MediaFormat::raw(MajorType::Subtitle),
            ])
            .dynamic()],
        );
        Self {
            key,
            pipeline,
            native,
            fake_source,
            real_source: None,
            demux: None,
            decoders: Vec::new(),
            chain: Vec::new(),
            sink_connections: IndexSet::new(),
            dirty: false,
            unused_filters: BTreeSet::new(),
            has_audio: false,
            has_video: false,
            media_source: MediaSource::Invalid,
        }
    }

    pub const fn key(&self) -> GraphKey {
        self.key
    }

    pub const fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub const fn fake_source(&self) -> FilterId {
        self.fake_source
    }

    pub const fn real_source(&self) -> Option<FilterId> {
        self.real_source
    }

    pub const fn demux(&self) -> Option<FilterId> {
        self.demux
    }

    pub fn decoders(&self) -> &[FilterId] {
        &self.decoders
    }

    pub const fn sink_connections(&self) -> &IndexSet<NodeId> {
        &self.sink_connections
    }

    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub const fn is_loaded(&self) -> bool {
        self.real_source.is_some()
    }

    pub const fn media_source(&self) -> &MediaSource {
        &self.media_source
    }

    pub const fn has_audio(&self) -> bool {
        self.has_audio
    }

    pub const fn has_video(&self) -> bool {
        self.has_video
    }

    pub fn tee_count(&self) -> usize {
        self.pipeline.count_role(|role| role == FilterRole::Tee)
    }

    pub fn native_status(&self) -> NativeStatus {
        self.native.status()
    }

    pub fn is_unused(&self, filter: FilterId) -> bool {
        self.unused_filters.contains(&filter)
    }

    // --- Node wiring ---

    /// Materializes `node` in this graph, or re-attaches its filter. Idempotent.
    pub fn grab_node(&mut self, node: &BackendNode) -> bool {
        if node.is_media_source() {
            return node.id() == self.key.stream;
        }
        if let Some(filter) = self.pipeline.node_filter(node.id()) {
            if self.unused_filters.remove(&filter) || !self.pipeline.is_attached(filter) {
                let _ = self.pipeline.attach(filter);
            }
            return true;
        }
        let Some(template) = node.descriptor().template.as_ref() else {
            return false;
        };
        let filter = self.pipeline.add_filter(
            format!("{}:{}", template.name, node.id()),
            FilterRole::Node(node.id()),
            &template.inputs,
            &template.outputs,
        );
        tracing::trace!(graph = %self.key, node = %node.id(), %filter, "Node grabbed");
        true
    }

    /// Drops the node's filter from this graph.
    pub fn remove_node(&mut self, node: NodeId) {
        if let Some(filter) = self.pipeline.node_filter(node) {
            self.unused_filters.remove(&filter);
            let _ = self.pipeline.remove_filter(filter);
        }
        if self.sink_connections.shift_remove(&node) {
            self.dirty = true;
        }
        self.prune_tees();
    }

    /// Outputs of `filter`, unconnected ones first.
    fn outputs_of(&self, filter: FilterId) -> Vec<PortRef> {
        let mut outputs = self.pipeline.outputs(filter);
        outputs.sort_by_key(|port| self.pipeline.peer(*port).is_some());
        outputs
    }

    fn decoder_outputs(&self) -> Vec<PortRef> {
        self.decoders.iter().flat_map(|d| self.outputs_of(*d)).collect()
    }

    fn feeding_outputs(&self) -> Vec<PortRef> {
        if self.decoders.is_empty() {
            self.outputs_of(self.fake_source)
        } else {
            self.decoder_outputs()
        }
    }

    fn role(&self, filter: FilterId) -> Option<FilterRole> {
        self.pipeline.filter(filter).map(Filter::role)
    }

    /// Connects `output` to `input`, inserting a Tee if `output` is already in use.
    fn try_connect(&mut self, output: PortRef, input: PortRef) -> bool {
        let Some(peer) = self.pipeline.peer(output) else {
            return match self.pipeline.connect(output, input, None) {
                Ok(_) => true,
                Err(e) => {
                    tracing::trace!(graph = %self.key, error = %e, "Connection attempt refused");
                    false
                },
            };
        };

        if self.role(peer.filter) == Some(FilterRole::Tee) {
            let tee = peer.filter;
            let format = self
                .pipeline
                .port(PortRef::input(tee, 0))
                .and_then(|port| port.negotiated_format().cloned());
            let free: Vec<PortRef> = self
                .outputs_of(tee)
                .into_iter()
                .filter(|port| self.pipeline.peer(*port).is_none())
                .collect();
            return free
                .into_iter()
                .any(|port| self.pipeline.connect(port, input, format.as_ref()).is_ok());
        }

        self.insert_tee(output, peer, input)
    }

    fn insert_tee(&mut self, output: PortRef, old_input: PortRef, new_input: PortRef) -> bool {
        let format =
            self.pipeline.port(output).and_then(|port| port.negotiated_format().cloned());
        if self.pipeline.disconnect(output, old_input).is_err() {
            return false;
        }

        let tee = self.pipeline.add_filter(
            "tee",
            FilterRole::Tee,
            &[PortSpec::new("in", vec![MediaFormat::any()])],
            &[PortSpec::new("out", vec![MediaFormat::any()]).dynamic()],
        );
        let linked = self.pipeline.connect(output, PortRef::input(tee, 0), format.as_ref()).is_ok()
            && self.pipeline.connect(PortRef::output(tee, 0), old_input, format.as_ref()).is_ok()
            && self.pipeline.connect(PortRef::output(tee, 1), new_input, format.as_ref()).is_ok();
        if linked {
            tracing::debug!(graph = %self.key, %tee, "Inserted tee for fan-out");
            return true;
        }

        let _ = self.pipeline.remove_filter(tee);
        if let Err(e) = self.pipeline.connect(output, old_input, format.as_ref()) {
            tracing::warn!(
                graph = %self.key,
                error = %e,
                "Failed to restore connection after tee rollback"
            );
        }
        false
    }

    /// Disconnects `input` if it is fed by one of `candidates`, directly or through a Tee.
    fn try_disconnect(&mut self, candidates: &[PortRef], input: PortRef) -> bool {
        let Some(peer) = self.pipeline.peer(input) else {
            return false;
        };
        if candidates.contains(&peer) {
            return self.pipeline.disconnect(peer, input).is_ok();
        }

        if self.role(peer.filter) != Some(FilterRole::Tee) {
            return false;
        }
        let tee = peer.filter;
        let fed_by_candidate = self
            .pipeline
            .peer(PortRef::input(tee, 0))
            .is_some_and(|upstream| candidates.contains(&upstream));
        if !fed_by_candidate || self.pipeline.disconnect(peer, input).is_err() {
            return false;
        }
        if self.pipeline.filter(tee).is_some_and(|f| f.connected_output_count() == 0) {
            tracing::debug!(graph = %self.key, %tee, "Removing tee without consumers");
            let _ = self.pipeline.remove_filter(tee);
        }
        true
    }

    /// Removes Tees that lost their producer or every consumer.
    fn prune_tees(&mut self) {
        let orphans: Vec<FilterId> = self
            .pipeline
            .filter_ids()
            .filter(|id| {
                self.pipeline.filter(*id).is_some_and(|f| {
                    f.role() == FilterRole::Tee
                        && (f.connected_output_count() == 0
                            || !f.inputs().first().is_some_and(Port::is_connected))
                })
            })
            .collect();
        for tee in orphans {
            let _ = self.pipeline.remove_filter(tee);
        }
    }

    /// Wires `source` to `sink` inside this graph.
    ///
    /// For the media object the sink is also registered, so that the next
    /// [`ensure_source_connected`](Self::ensure_source_connected) moves it onto
    /// the decoders.
    pub fn connect_nodes(&mut self, source: &BackendNode, sink: &BackendNode) -> bool {
        let from_media = source.id() == self.key.stream;
        if !self.grab_node(sink) || (!from_media && !self.grab_node(source)) {
            return false;
        }
        let Some(sink_filter) = self.pipeline.node_filter(sink.id()) else {
            return false;
        };
        let source_filter = if from_media {
            Some(self.fake_source)
        } else {
            self.pipeline.node_filter(source.id())
        };
        let Some(source_filter) = source_filter else {
            return false;
        };

        let mut connected = false;
        for input in self.pipeline.inputs(sink_filter) {
            if self.pipeline.peer(input).is_some() {
                continue;
            }
            for output in self.outputs_of(source_filter) {
                if self.try_connect(output, input) {
                    connected = true;
                    break;
                }
            }
        }

        if from_media {
            self.sink_connections.insert(sink.id());
            self.dirty = true;
        }
        tracing::trace!(
            graph = %self.key,
            source = %source.id(),
            sink = %sink.id(),
            connected,
            "Nodes connected"
        );
        connected
    }

    pub fn disconnect_nodes(&mut self, source: &BackendNode, sink: &BackendNode) -> bool {
        let from_media = source.id() == self.key.stream;
        let candidates = if from_media {
            let mut ports = self.pipeline.outputs(self.fake_source);
            ports.extend(self.decoder_outputs());
            ports
        } else {
            self.pipeline
                .node_filter(source.id())
                .map(|f| self.pipeline.outputs(f))
                .unwrap_or_default()
        };

        let mut disconnected = false;
        if let Some(sink_filter) = self.pipeline.node_filter(sink.id()) {
            for input in self.pipeline.inputs(sink_filter) {
                disconnected |= self.try_disconnect(&candidates, input);
            }
        }

        if from_media && self.sink_connections.shift_remove(&sink.id()) {
            self.dirty = true;
        }
        disconnected
    }

    fn disconnect_sinks(&mut self) {
        let mut candidates = self.pipeline.outputs(self.fake_source);
        candidates.extend(self.decoder_outputs());
        let sinks: Vec<NodeId> = self.sink_connections.iter().copied().collect();
        for sink in sinks {
            let Some(filter) = self.pipeline.node_filter(sink) else {
                continue;
            };
            for input in self.pipeline.inputs(filter) {
                self.try_disconnect(&candidates, input);
            }
        }
    }

    /// Moves every registered sink onto the decoders (or the placeholder source
    /// when nothing is loaded). A no-op unless the wiring changed or `force` is set.
    pub fn ensure_source_connected(&mut self, force: bool) {
        if !self.dirty && !force {
            return;
        }
        self.restore_unused_filters();
        self.disconnect_sinks();

        let sinks: Vec<NodeId> = self.sink_connections.iter().copied().collect();
        for sink in sinks {
            let Some(filter) = self.pipeline.node_filter(sink) else {
                continue;
            };
            for input in self.pipeline.inputs(filter) {
                if self.pipeline.peer(input).is_some() {
                    continue;
                }
                let outputs = self.feeding_outputs();
                if !outputs.into_iter().any(|output| self.try_connect(output, input)) {
                    tracing::trace!(graph = %self.key, %sink, ?input, "No producer for sink input");
                }
            }
        }

        for decoder in self.decoders.clone() {
            let unconnected =
                self.pipeline.filter(decoder).is_some_and(|f| f.connected_output_count() == 0);
            if unconnected && self.pipeline.detach(decoder, true).is_ok() {
                tracing::debug!(graph = %self.key, %decoder, "Parking decoder without consumers");
                self.unused_filters.insert(decoder);
            }
        }
        self.dirty = false;
    }

    /// Detaches every filter unreachable from the active source.
    fn remove_unused_filters(&mut self) {
        let root = self.real_source.unwrap_or(self.fake_source);
        let mut reachable = self.pipeline.connected_filters(root);
        reachable.insert(root);
        let unreachable: Vec<FilterId> = self
            .pipeline
            .attached_filters()
            .into_iter()
            .filter(|id| !reachable.contains(id))
            .collect();
        for filter in unreachable {
            if self.pipeline.detach(filter, true).is_ok() {
                self.unused_filters.insert(filter);
            }
        }
    }

    fn restore_unused_filters(&mut self) {
        for filter in std::mem::take(&mut self.unused_filters) {
            let _ = self.pipeline.attach(filter);
        }
    }

    // --- Source lifecycle ---

    /// Opens `source` and keeps the part of the native graph needed to feed the sinks.
    ///
    /// # Errors
    ///
    /// Returns the native engine's failure. The graph is cleaned up on failure.
    pub async fn load_source(&mut self, source: &MediaSource) -> Result<(), NativeError> {
        self.cleanup();
        if !source.is_valid() {
            return Err(NativeError::open("invalid media source"));
        }

        let before: BTreeSet<FilterId> = self.pipeline.filter_ids().collect();
        if let Err(e) = self.native.open(&mut self.pipeline, source).await {
            tracing::debug!(graph = %self.key, %source, error = %e, "Native open failed");
            self.cleanup();
            return Err(e);
        }
        let added: Vec<FilterId> =
            self.pipeline.filter_ids().filter(|id| !before.contains(id)).collect();

        self.classify(&added);
        if self.decoders.is_empty() {
            if let Some(demux) = self.demux {
                if self.pipeline.outputs(demux).len() == 1 {
                    self.decoders.push(demux);
                    self.note_output_types(demux);
                }
            }
        }

        let Some(real_source) = self.real_source else {
            self.cleanup();
            return Err(NativeError::open(format!("no source filter for {source}")));
        };

        let mut keep: BTreeSet<FilterId> = self.decoders.iter().copied().collect();
        keep.insert(real_source);
        let upstream = self.demux.unwrap_or(real_source);
        if let Some(demux) = self.demux {
            keep.insert(demux);
            self.chain.extend(self.pipeline.filter_chain(real_source, demux));
        }
        for decoder in self.decoders.clone() {
            if decoder != upstream {
                self.chain.extend(self.pipeline.filter_chain(upstream, decoder));
            }
        }
        keep.extend(self.chain.iter().copied());

        for filter in added.into_iter().filter(|id| !keep.contains(id)) {
            let _ = self.pipeline.remove_filter(filter);
        }

        self.media_source = source.clone();
        self.ensure_source_connected(true);
        tracing::debug!(
            graph = %self.key,
            %source,
            decoders = self.decoders.len(),
            has_audio = self.has_audio,
            has_video = self.has_video,
            "Source loaded"
        );
        Ok(())
    }

    fn note_output_types(&mut self, filter: FilterId) {
        let Some(f) = self.pipeline.filter(filter) else {
            return;
        };
        for port in f.outputs() {
            let format = port.negotiated_format().or_else(|| port.spec().formats.first());
            match format.map(|fmt| fmt.major) {
                Some(MajorType::Audio) => self.has_audio = true,
                Some(MajorType::Video) => self.has_video = true,
                _ => {},
            }
        }
    }

    fn classify(&mut self, added: &[FilterId]) {
        for id in added {
            let Some(filter) = self.pipeline.filter(*id) else {
                continue;
            };
            let inputs = filter.inputs();
            if inputs.is_empty() {
                if self.real_source.is_none() {
                    self.real_source = Some(*id);
                }
                continue;
            }
            if inputs.len() != 1 {
                continue;
            }
            let Some(input_format) =
                inputs[0].negotiated_format().or_else(|| inputs[0].spec().formats.first())
            else {
                continue;
            };

            if input_format.major == MajorType::Stream {
                if !filter.outputs().is_empty() && self.demux.is_none() {
                    self.demux = Some(*id);
                }
                continue;
            }

            let decodes = input_format.is_encoded()
                && filter.outputs().iter().any(|port| {
                    port.negotiated_format().is_some_and(|out| {
                        out.major == input_format.major && out.encoding == Encoding::Raw
                    })
                });
            if decodes {
                match input_format.major {
                    MajorType::Audio => self.has_audio = true,
                    MajorType::Video => self.has_video = true,
                    _ => {},
                }
                self.decoders.push(*id);
            }
        }
    }

    /// Tears down the loaded source and puts the sinks back on the placeholder.
    /// Idempotent.
    pub fn cleanup(&mut self) {
        self.native.stop();
        self.pipeline.set_run_state(RunState::Stopped);
        self.restore_unused_filters();
        self.disconnect_sinks();

        let mut owned: BTreeSet<FilterId> = self.decoders.drain(..).collect();
        owned.extend(self.demux.take());
        owned.extend(self.real_source.take());
        owned.extend(self.chain.drain(..));
        for filter in owned {
            let _ = self.pipeline.remove_filter(filter);
        }
        let leftovers: Vec<FilterId> = self
            .pipeline
            .filter_ids()
            .filter(|id| self.role(*id) == Some(FilterRole::Native))
            .collect();
        for filter in leftovers {
            let _ = self.pipeline.remove_filter(filter);
        }
        self.prune_tees();

        self.native.close();
        self.has_audio = false;
        self.has_video = false;
        self.media_source = MediaSource::Invalid;
        self.ensure_source_connected(true);
    }

    // --- Transport ---

    pub fn create_stream(&mut self, termini: &[TerminusHandle]) -> Result<(), NativeError> {
        self.native.dispose_stream();
        self.native.create_stream(termini)
    }

    pub fn has_stream(&self) -> bool {
        self.native.has_stream()
    }

    pub fn play(&mut self) -> Result<(), NativeError> {
        self.ensure_source_connected(false);
        self.remove_unused_filters();
        self.native.run()?;
        self.pipeline.set_run_state(RunState::Running);
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), NativeError> {
        self.ensure_source_connected(false);
        self.remove_unused_filters();
        self.native.pause()?;
        self.pipeline.set_run_state(RunState::Paused);
        Ok(())
    }

    pub fn stop(&mut self) {
        self.native.stop();
        self.pipeline.set_run_state(RunState::Stopped);
        self.restore_unused_filters();
    }

    pub fn seek(&mut self, position_ms: i64) -> Result<(), NativeError> {
        self.native.seek(position_ms)
    }

    /// Native position, `None` while it cannot be reported.
    pub fn position(&self) -> Option<i64> {
        self.native.position()
    }

    /// Duration in milliseconds, or -1 when unknown.
    pub fn total_time(&self) -> i64 {
        self.native.duration().unwrap_or(-1)
    }

    /// Position in milliseconds, falling back to [`total_time`](Self::total_time).
    pub fn current_time(&self) -> i64 {
        self.position().unwrap_or_else(|| self.total_time())
    }

    pub fn is_seekable(&self) -> bool {
        self.native.is_seekable()
    }

    pub fn metadata(&self) -> MetaData {
        self.native.metadata()
    }

    pub fn connected_filters(&self, root: FilterId) -> BTreeSet<FilterId> {
        self.pipeline.connected_filters(root)
    }

    pub fn filter_chain(&self, from: FilterId, to: FilterId) -> Vec<FilterId> {
        self.pipeline.filter_chain(from, to)
    }

    /// Filter feeding `node`'s first input, if any.
    pub fn upstream_of(&self, node: NodeId) -> Option<FilterId> {
        let filter = self.pipeline.node_filter(node)?;
        self.pipeline.peer(PortRef::input(filter, 0)).map(|port| port.filter)
    }
}

#[cfg(all(test, feature = "sim"))]
mod tests {
    use super::*;
    use crate::native::NativeBackend;
    use crate::sim::{SimBackend, SimMedia};
    use mediagraph_core::{NodeDescriptor, ObjectClass};
    use tokio::sync::mpsc;

    const STREAM: NodeId = NodeId(1);

    fn node(id: u32, class: ObjectClass) -> BackendNode {
        BackendNode::new(NodeId(id), NodeDescriptor::for_class(class), None)
    }

    fn graph(backend: &SimBackend) -> MediaGraph {
        let key = GraphKey { stream: STREAM, index: 0 };
        let (tx, _rx) = mpsc::unbounded_channel();
        MediaGraph::new(key, backend.create_graph(key, tx))
    }

    #[tokio::test]
    async fn test_load_keeps_decoders_and_feeds_sinks() {
        let source = MediaSource::url("sim://movie");
        let backend = SimBackend::new().with_media(&source, SimMedia::audio_video(5000));
        let mut g = graph(&backend);
        let media = node(1, ObjectClass::MediaSource);
        let speaker = node(2, ObjectClass::AudioOutput);

        assert!(g.connect_nodes(&media, &speaker));
        assert!(g.load_source(&source).await.is_ok());

        assert!(g.is_loaded());
        assert!(g.demux().is_some());
        assert_eq!(g.decoders().len(), 2);
        assert!(g.has_audio() && g.has_video());
        assert_eq!(g.total_time(), 5000);

        // The audio decoder feeds the speaker; the video decoder has no consumer.
        let feeding = g.upstream_of(NodeId(2));
        assert!(feeding.is_some_and(|f| g.decoders().contains(&f)));
        assert_eq!(g.decoders().iter().filter(|d| g.is_unused(**d)).count(), 1);

        // Default renderers were discarded.
        let native_count = g.pipeline().count_role(|r| r == FilterRole::Native);
        assert_eq!(native_count + g.decoders().iter().filter(|d| g.is_unused(**d)).count(), 4);
    }

    #[tokio::test]
    async fn test_demux_with_single_output_acts_as_decoder() {
        let source = MediaSource::file("/music/a.mp3");
        let media_desc = SimMedia { demux: false, ..SimMedia::audio(3000) };
        let backend = SimBackend::new().with_media(&source, media_desc);
        let mut g = graph(&backend);

        assert!(g.load_source(&source).await.is_ok());
        assert_eq!(g.decoders().len(), 1);
        assert_eq!(g.demux(), Some(g.decoders()[0]));
        assert!(g.has_audio());
        assert!(!g.has_video());
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let source = MediaSource::url("sim://a");
        let backend = SimBackend::new().with_media(&source, SimMedia::audio(1000));
        let mut g = graph(&backend);
        let media = node(1, ObjectClass::MediaSource);
        let speaker = node(2, ObjectClass::AudioOutput);
        assert!(g.connect_nodes(&media, &speaker));
        assert!(g.load_source(&source).await.is_ok());

        g.cleanup();
        let filters: Vec<FilterId> = g.pipeline().filter_ids().collect();
        let feeding = g.upstream_of(NodeId(2));

        g.cleanup();
        assert_eq!(g.pipeline().filter_ids().collect::<Vec<_>>(), filters);
        assert_eq!(g.upstream_of(NodeId(2)), feeding);
        assert_eq!(feeding, Some(g.fake_source()));
        assert!(!g.is_loaded());
        assert_eq!(g.total_time(), -1);
        assert_eq!(g.native_status(), NativeStatus::Idle);
    }

    #[tokio::test]
    async fn test_fan_out_inserts_and_removes_one_tee() {
        let backend = SimBackend::new();
        let mut g = graph(&backend);
        let fader = node(2, ObjectClass::VolumeFader);
        let left = node(3, ObjectClass::AudioOutput);
        let right = node(4, ObjectClass::AudioOutput);

        assert!(g.connect_nodes(&fader, &left));
        assert_eq!(g.tee_count(), 0);
        assert!(g.connect_nodes(&fader, &right));
        assert_eq!(g.tee_count(), 1);

        let third = node(5, ObjectClass::AudioDataTap);
        assert!(g.connect_nodes(&fader, &third));
        assert_eq!(g.tee_count(), 1);

        assert!(g.disconnect_nodes(&fader, &left));
        assert!(g.disconnect_nodes(&fader, &right));
        assert_eq!(g.tee_count(), 1);
        assert!(g.disconnect_nodes(&fader, &third));
        assert_eq!(g.tee_count(), 0);
    }

    #[tokio::test]
    async fn test_decoder_fan_out_after_load() {
        let source = MediaSource::url("sim://a");
        let backend = SimBackend::new().with_media(&source, SimMedia::audio(1000));
        let mut g = graph(&backend);
        let media = node(1, ObjectClass::MediaSource);
        let left = node(2, ObjectClass::AudioOutput);
        let right = node(3, ObjectClass::AudioOutput);

        assert!(g.connect_nodes(&media, &left));
        assert!(g.connect_nodes(&media, &right));
        assert_eq!(g.tee_count(), 0);

        assert!(g.load_source(&source).await.is_ok());
        assert_eq!(g.tee_count(), 1);

        assert!(g.disconnect_nodes(&media, &left));
        assert!(g.disconnect_nodes(&media, &right));
        assert_eq!(g.tee_count(), 0);
        assert!(g.sink_connections().is_empty());
    }

    #[tokio::test]
    async fn test_play_detaches_unreachable_filters() {
        let source = MediaSource::url("sim://a");
        let backend = SimBackend::new().with_media(&source, SimMedia::audio(1000));
        let mut g = graph(&backend);
        let media = node(1, ObjectClass::MediaSource);
        let speaker = node(2, ObjectClass::AudioOutput);
        let stray = node(3, ObjectClass::AudioOutput);

        assert!(g.connect_nodes(&media, &speaker));
        assert!(g.grab_node(&stray));
        assert!(g.load_source(&source).await.is_ok());
        assert!(g.create_stream(&[]).is_ok());
        assert!(g.play().is_ok());

        let stray_filter = g.pipeline().node_filter(NodeId(3));
        assert!(stray_filter.is_some_and(|f| g.is_unused(f)));
        assert!(g.is_unused(g.fake_source()));

        g.stop();
        assert!(stray_filter.is_some_and(|f| !g.is_unused(f) && g.pipeline().is_attached(f)));
    }
}
