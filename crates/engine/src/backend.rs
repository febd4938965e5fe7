// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Public façade of a backend context.
//!
//! A [`Backend`] owns the node topology and the handle to its engine actor.
//! Topology mutations are validated here, synchronously, and shipped to the
//! engine as rewire batches; transport calls on a [`MediaObject`] are plain
//! messages. Nothing on this side touches a graph.

use crate::config::EngineConfig;
use crate::handle::EngineHandle;
use crate::messages::{EngineMessage, StreamCommand};
use crate::native::{DeviceInfo, NativeBackend};
use crate::node::BackendNode;
use crate::stream::StreamSnapshot;
use crate::topology::{Commit, Topology};
use mediagraph_core::{
    DeferredReleaser, ErrorKind, MediaEvent, MediaGraphError, MediaSource, MetaData,
    NodeDescriptor, NodeId, ObjectClass, Result, TerminusHandle, TerminusKind, TerminusPool,
    TransportState,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Creation arguments for [`Backend::create_object`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObjectArgs {
    /// Device index for outputs, as listed by the native backend. Defaults to 0.
    pub device: Option<usize>,
}

type SeekTicket = Arc<Mutex<Option<Arc<AtomicBool>>>>;

/// Called when a stream is not torn down within the close timeout.
///
/// The engine actor is presumed deadlocked at that point. The default hook
/// aborts the process; a hook that returns makes `close` fail instead.
pub type CloseTimeoutHook = Arc<dyn Fn(NodeId) + Send + Sync>;

fn abort_on_close_timeout(stream: NodeId) {
    tracing::error!(%stream, "Media engine is unresponsive, aborting");
    std::process::abort();
}

#[derive(Clone)]
struct StreamEntry {
    snapshot: watch::Receiver<StreamSnapshot>,
    last_seek: SeekTicket,
}

struct BackendInner {
    native: Arc<dyn NativeBackend>,
    config: Arc<EngineConfig>,
    engine: EngineHandle,
    topology: Mutex<Topology>,
    termini: TerminusPool<(TerminusKind, usize)>,
    streams: Mutex<HashMap<NodeId, StreamEntry>>,
    reaper: CancellationToken,
    on_close_timeout: CloseTimeoutHook,
}

impl Drop for BackendInner {
    fn drop(&mut self) {
        self.reaper.cancel();
    }
}

/// A backend context: node factory, topology and engine.
#[derive(Clone)]
pub struct Backend {
    inner: Arc<BackendInner>,
}

impl Backend {
    /// Starts the engine actor and the terminus reaper.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(native: Arc<dyn NativeBackend>, config: EngineConfig) -> Self {
        Self::with_close_timeout_hook(native, config, Arc::new(abort_on_close_timeout))
    }

    /// Like [`Backend::new`], replacing what happens when a stream teardown
    /// exceeds `close_timeout_ms`.
    pub fn with_close_timeout_hook(
        native: Arc<dyn NativeBackend>,
        config: EngineConfig,
        on_close_timeout: CloseTimeoutHook,
    ) -> Self {
        let config = Arc::new(config.resolved());
        let engine = crate::spawn_engine(native.clone(), config.clone());

        let releaser = DeferredReleaser::new(config.release_grace());
        let reaper = CancellationToken::new();
        releaser.spawn(config.reaper_interval(), reaper.clone());

        tracing::info!(native = native.name(), "Backend context created");
        Self {
            inner: Arc::new(BackendInner {
                native,
                config,
                engine,
                topology: Mutex::new(Topology::new()),
                termini: TerminusPool::new(releaser),
                streams: Mutex::new(HashMap::new()),
                reaper,
                on_close_timeout,
            }),
        }
    }

    fn topology(&self) -> MutexGuard<'_, Topology> {
        self.inner.topology.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn streams(&self) -> MutexGuard<'_, HashMap<NodeId, StreamEntry>> {
        self.inner.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.inner.engine
    }

    pub fn audio_devices(&self) -> Vec<DeviceInfo> {
        self.inner.native.audio_devices()
    }

    pub fn video_devices(&self) -> Vec<DeviceInfo> {
        self.inner.native.video_devices()
    }

    pub fn null_sink(&self) -> NodeId {
        self.topology().null_sink()
    }

    pub fn node(&self, id: NodeId) -> Option<Arc<BackendNode>> {
        self.topology().node(id)
    }

    /// Downstream nodes of `id`, in connection order.
    pub fn sinks_of(&self, id: NodeId) -> Vec<NodeId> {
        self.topology().sinks(id)
    }

    pub fn source_of(&self, id: NodeId) -> Option<NodeId> {
        self.topology().source_of(id)
    }

    /// Media object whose graph `id` currently belongs to.
    pub fn stream_of(&self, id: NodeId) -> Option<NodeId> {
        self.topology().stream_of(id)
    }

    fn open_terminus(&self, kind: TerminusKind, device: usize) -> Result<TerminusHandle> {
        self.inner
            .termini
            .get_or_open(&(kind, device), || self.inner.native.open_terminus(kind, device))
            .map_err(|e| MediaGraphError::Configuration(e.to_string()))
    }

    /// Creates a node of `class`.
    ///
    /// # Errors
    ///
    /// Fails for [`ObjectClass::NullSink`], which the backend owns, when an
    /// output's device cannot be opened, and when the engine has shut down.
    pub async fn create_object(&self, class: ObjectClass, args: ObjectArgs) -> Result<NodeId> {
        let device = args.device.unwrap_or(0);
        let terminus = match class {
            ObjectClass::NullSink => {
                return Err(MediaGraphError::Configuration(
                    "the null sink is created by the backend".to_string(),
                ));
            },
            ObjectClass::MediaSource => return Ok(self.create_media_object().await?.id()),
            ObjectClass::AudioOutput => Some(self.open_terminus(TerminusKind::Audio, device)?),
            ObjectClass::VideoOutput => Some(self.open_terminus(TerminusKind::Video, device)?),
            _ => None,
        };

        let id = {
            let mut topology = self.topology();
            let id = topology.allocate_id();
            topology.insert(Arc::new(BackendNode::new(
                id,
                NodeDescriptor::for_class(class),
                terminus,
            )));
            id
        };
        tracing::debug!(node = %id, class = class.name(), "Node created");
        Ok(id)
    }

    /// Creates a media object, already wired to the NullSink.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine has shut down.
    pub async fn create_media_object(&self) -> Result<MediaObject> {
        let node = {
            let mut topology = self.topology();
            let id = topology.allocate_id();
            let node = Arc::new(BackendNode::new(
                id,
                NodeDescriptor::for_class(ObjectClass::MediaSource),
                None,
            ));
            topology.insert(node.clone());
            node
        };
        let id = node.id();

        let (snapshot_tx, snapshot_rx) = watch::channel(StreamSnapshot::default());
        self.inner.engine.send(EngineMessage::CreateStream { node, snapshot_tx }).await?;
        let entry = StreamEntry { snapshot: snapshot_rx, last_seek: SeekTicket::default() };
        self.streams().insert(id, entry.clone());

        self.change(&[id], |_| Ok(())).await?;
        tracing::debug!(node = %id, "Media object created");
        Ok(MediaObject { id, backend: self.clone(), entry })
    }

    /// Handle to an existing media object.
    pub fn media_object(&self, id: NodeId) -> Option<MediaObject> {
        let entry = self.streams().get(&id).cloned()?;
        Some(MediaObject { id, backend: self.clone(), entry })
    }

    /// Sets the volume of a volume-fader node.
    ///
    /// # Errors
    ///
    /// Fails when `id` is not a volume fader.
    pub fn set_volume(&self, id: NodeId, volume: f32) -> Result<()> {
        let node = self
            .node(id)
            .filter(|node| node.class() == ObjectClass::VolumeFader)
            .ok_or_else(|| MediaGraphError::Topology(format!("{id} is not a volume fader")))?;
        node.set_volume(volume);
        Ok(())
    }

    async fn suspend(&self, streams: &[NodeId]) -> Result<()> {
        for stream in streams {
            self.inner.engine.command(*stream, StreamCommand::Suspend).await?;
        }
        Ok(())
    }

    async fn apply(&self, commit: Commit) -> Result<()> {
        if !commit.batch.is_empty() {
            self.inner.engine.send(EngineMessage::Rewire(commit.batch)).await?;
        }
        for stream in commit.resume {
            self.inner.engine.command(stream, StreamCommand::Resume).await?;
        }
        Ok(())
    }

    /// Runs `op` inside the open transaction, or inside an implicit one.
    async fn change<F>(&self, nodes: &[NodeId], op: F) -> Result<()>
    where
        F: FnOnce(&mut Topology) -> Result<()>,
    {
        let (implicit, suspend) = {
            let mut topology = self.topology();
            (!topology.in_transaction(), topology.begin(nodes))
        };
        self.suspend(&suspend).await?;
        if !implicit {
            return op(&mut self.topology());
        }

        let (result, commit) = {
            let mut topology = self.topology();
            let result = op(&mut topology);
            (result, topology.commit(nodes))
        };
        self.apply(commit?).await?;
        result
    }

    /// Opens a connection change over `nodes`.
    ///
    /// Streams rooted at any of them are stopped until the change ends, then
    /// restored to their previous state and position.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine has shut down.
    pub async fn start_connection_change(&self, nodes: &[NodeId]) -> Result<()> {
        let suspend = self.topology().begin(nodes);
        self.suspend(&suspend).await
    }

    /// Commits the open connection change and ships the rewire batch.
    ///
    /// # Errors
    ///
    /// Fails when no change is open or the engine has shut down.
    pub async fn end_connection_change(&self, nodes: &[NodeId]) -> Result<()> {
        let commit = self.topology().commit(nodes)?;
        self.apply(commit).await
    }

    /// Relates `source` to `sink`.
    ///
    /// # Errors
    ///
    /// Fails when the relation is not allowed; see [`Topology::connect`].
    pub async fn connect_nodes(&self, source: NodeId, sink: NodeId) -> Result<()> {
        self.change(&[source, sink], |topology| topology.connect(source, sink)).await
    }

    /// Removes the relation between `source` and `sink`.
    ///
    /// # Errors
    ///
    /// Fails when the relation does not exist.
    pub async fn disconnect_nodes(&self, source: NodeId, sink: NodeId) -> Result<()> {
        self.change(&[source, sink], |topology| topology.disconnect(source, sink)).await
    }

    /// Releases a node: its relations are removed and its filters leave every graph.
    ///
    /// Releasing a media object also destroys its stream.
    ///
    /// # Errors
    ///
    /// Fails for unknown nodes, for the NullSink, and when the engine has shut down.
    pub async fn release_node(&self, id: NodeId) -> Result<()> {
        self.release(id, None).await
    }

    async fn release(&self, id: NodeId, response_tx: Option<mpsc::Sender<()>>) -> Result<()> {
        let is_media = self
            .node(id)
            .ok_or_else(|| MediaGraphError::Topology(format!("unknown node {id}")))?
            .is_media_source();
        self.change(&[id], |topology| topology.remove(id).map(drop)).await?;
        self.inner.engine.send(EngineMessage::ReleaseNode { node: id }).await?;
        if is_media {
            self.streams().remove(&id);
            self.inner.engine.send(EngineMessage::DestroyStream { stream: id, response_tx }).await?;
        }
        tracing::debug!(node = %id, "Node released");
        Ok(())
    }

    /// Stops the engine. Every stream is torn down.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine does not stop in time or panicked.
    pub async fn shutdown(&self) -> Result<()> {
        let result = self.inner.engine.shutdown_and_wait().await;
        self.inner.reaper.cancel();
        result
    }
}

/// Handle to a media object: the transport surface of one stream.
#[derive(Clone)]
pub struct MediaObject {
    id: NodeId,
    backend: Backend,
    entry: StreamEntry,
}

impl MediaObject {
    pub const fn id(&self) -> NodeId {
        self.id
    }

    async fn command(&self, command: StreamCommand) -> Result<()> {
        self.backend.inner.engine.command(self.id, command).await
    }

    /// Replaces the current source. Loading completes asynchronously.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine has shut down.
    pub async fn set_source(&self, source: MediaSource) -> Result<()> {
        self.command(StreamCommand::SetSource(source, None)).await
    }

    /// Replaces the current source and waits until loading has settled.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine has shut down or drops the request.
    pub async fn set_source_and_wait(&self, source: MediaSource) -> Result<TransportState> {
        let (tx, mut rx) = mpsc::channel(1);
        self.command(StreamCommand::SetSource(source, Some(tx))).await?;
        rx.recv().await.ok_or(MediaGraphError::Shutdown)
    }

    /// Preloads the source played after the current one.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine has shut down.
    pub async fn set_next_source(&self, source: MediaSource) -> Result<()> {
        self.command(StreamCommand::SetNextSource(source)).await
    }

    /// Appends sources to the play queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine has shut down.
    pub async fn enqueue(&self, sources: Vec<MediaSource>) -> Result<()> {
        self.command(StreamCommand::Enqueue(sources)).await
    }

    /// # Errors
    ///
    /// Returns an error if the engine has shut down.
    pub async fn clear_queue(&self) -> Result<()> {
        self.command(StreamCommand::ClearQueue).await
    }

    /// # Errors
    ///
    /// Returns an error if the engine has shut down.
    pub async fn play(&self) -> Result<()> {
        self.command(StreamCommand::Play).await
    }

    /// # Errors
    ///
    /// Returns an error if the engine has shut down.
    pub async fn pause(&self) -> Result<()> {
        self.command(StreamCommand::Pause).await
    }

    /// # Errors
    ///
    /// Returns an error if the engine has shut down.
    pub async fn stop(&self) -> Result<()> {
        self.command(StreamCommand::Stop).await
    }

    /// Seeks to `ms`. Any seek still queued for this stream is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine has shut down.
    pub async fn seek(&self, ms: i64) -> Result<()> {
        let ticket = Arc::new(AtomicBool::new(true));
        let previous = self
            .entry
            .last_seek
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(ticket.clone());
        if let Some(previous) = previous {
            previous.store(false, Ordering::Release);
        }
        self.command(StreamCommand::Seek { ms, ticket }).await
    }

    /// Gap (> 0) or crossfade (< 0) between consecutive sources, in milliseconds.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine has shut down.
    pub async fn set_transition_time(&self, ms: i64) -> Result<()> {
        self.command(StreamCommand::SetTransitionTime(ms)).await
    }

    /// # Errors
    ///
    /// Returns an error if the engine has shut down.
    pub async fn set_prefinish_mark(&self, ms: i64) -> Result<()> {
        self.command(StreamCommand::SetPrefinishMark(ms)).await
    }

    /// # Errors
    ///
    /// Returns an error if the engine has shut down.
    pub async fn set_tick_interval(&self, ms: u64) -> Result<()> {
        self.command(StreamCommand::SetTickInterval(ms)).await
    }

    /// Subscribes to this stream's notifications.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine has shut down.
    pub async fn subscribe(&self) -> Result<mpsc::Receiver<MediaEvent>> {
        self.backend.inner.engine.subscribe(self.id).await
    }

    /// Receiver of published snapshots, for awaiting changes.
    pub fn watch(&self) -> watch::Receiver<StreamSnapshot> {
        self.entry.snapshot.clone()
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        self.entry.snapshot.borrow().clone()
    }

    pub fn state(&self) -> TransportState {
        self.entry.snapshot.borrow().state
    }

    pub fn current_time(&self) -> i64 {
        self.entry.snapshot.borrow().current_time
    }

    pub fn total_time(&self) -> i64 {
        self.entry.snapshot.borrow().total_time
    }

    pub fn metadata(&self) -> MetaData {
        self.entry.snapshot.borrow().metadata.clone()
    }

    pub fn current_source(&self) -> MediaSource {
        self.entry.snapshot.borrow().current_source.clone()
    }

    pub fn error_kind(&self) -> ErrorKind {
        self.entry.snapshot.borrow().error_kind
    }

    pub fn error_string(&self) -> String {
        self.entry.snapshot.borrow().error_message.clone()
    }

    /// Asks the engine, falling back to the last snapshot after a short wait.
    pub async fn has_video(&self) -> bool {
        let wait = self.backend.inner.config.stream_info_wait();
        match tokio::time::timeout(wait, self.backend.inner.engine.has_video(self.id)).await {
            Ok(Ok(has_video)) => has_video,
            _ => self.entry.snapshot.borrow().has_video,
        }
    }

    /// Asks the engine, falling back to the last snapshot after a short wait.
    pub async fn is_seekable(&self) -> bool {
        let wait = self.backend.inner.config.stream_info_wait();
        match tokio::time::timeout(wait, self.backend.inner.engine.is_seekable(self.id)).await {
            Ok(Ok(seekable)) => seekable,
            _ => self.entry.snapshot.borrow().seekable,
        }
    }

    /// Releases the media object and waits for its stream to be torn down.
    ///
    /// A teardown that outlives the configured close timeout is escalated to
    /// the backend's [`CloseTimeoutHook`], which aborts the process by default.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine has shut down, or after a timeout when
    /// the hook returns.
    pub async fn close(self) -> Result<()> {
        let (tx, mut rx) = mpsc::channel(1);
        self.backend.release(self.id, Some(tx)).await?;
        let timeout = self.backend.inner.config.close_timeout();
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(())) => Ok(()),
            Ok(None) => Err(MediaGraphError::Shutdown),
            Err(_) => {
                tracing::error!(stream = %self.id, ?timeout, "Stream teardown timed out");
                (self.backend.inner.on_close_timeout)(self.id);
                Err(MediaGraphError::Engine(format!("timed out tearing down {}", self.id)))
            },
        }
    }
}
