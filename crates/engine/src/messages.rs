// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Internal message types for the engine actor.

use crate::node::BackendNode;
use crate::stream::StreamSnapshot;
use crate::wire::RewireBatch;
use mediagraph_core::{MediaEvent, MediaSource, NodeId, TransportState};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Control messages sent by the façade to the engine actor.
pub enum EngineMessage {
    /// Registers a media object and its two graphs.
    CreateStream { node: Arc<BackendNode>, snapshot_tx: watch::Sender<StreamSnapshot> },
    /// Tears a media object down. The response is sent once both graphs are cleaned up.
    DestroyStream { stream: NodeId, response_tx: Option<mpsc::Sender<()>> },
    Stream { stream: NodeId, command: StreamCommand },
    /// Applies a committed connection change.
    Rewire(RewireBatch),
    /// Removes a released node's filters from every graph.
    ReleaseNode { node: NodeId },
    Query(QueryMessage),
    Shutdown,
}

/// Commands addressed to one stream.
pub enum StreamCommand {
    /// Loads a source into the current graph. The optional sender receives the
    /// state reached once loading settles.
    SetSource(MediaSource, Option<mpsc::Sender<TransportState>>),
    SetNextSource(MediaSource),
    Enqueue(Vec<MediaSource>),
    ClearQueue,
    Play,
    Pause,
    Stop,
    /// A seek is dropped when its ticket has been cleared by a newer seek.
    Seek { ms: i64, ticket: Arc<AtomicBool> },
    SetTransitionTime(i64),
    SetPrefinishMark(i64),
    SetTickInterval(u64),
    /// Sent while a connection change touching the stream is open.
    Suspend,
    Resume,
}

impl StreamCommand {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SetSource(..) => "set_source",
            Self::SetNextSource(_) => "set_next_source",
            Self::Enqueue(_) => "enqueue",
            Self::ClearQueue => "clear_queue",
            Self::Play => "play",
            Self::Pause => "pause",
            Self::Stop => "stop",
            Self::Seek { .. } => "seek",
            Self::SetTransitionTime(_) => "set_transition_time",
            Self::SetPrefinishMark(_) => "set_prefinish_mark",
            Self::SetTickInterval(_) => "set_tick_interval",
            Self::Suspend => "suspend",
            Self::Resume => "resume",
        }
    }
}

/// Query messages for reading stream information without modifying it.
pub enum QueryMessage {
    HasVideo { stream: NodeId, response_tx: mpsc::Sender<bool> },
    IsSeekable { stream: NodeId, response_tx: mpsc::Sender<bool> },
    Subscribe { stream: NodeId, response_tx: mpsc::Sender<mpsc::Receiver<MediaEvent>> },
}

/// Timers armed by a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Periodic while playing: ticks, about-to-finish, prefinish and crossfade.
    Pulse,
    /// Periodic while waiting for a freshly started stream to report a position.
    BufferingPoll,
    /// One-shot gap between two sources for a positive transition time.
    Transition,
}

/// Delivered to the actor when a timer fires.
///
/// Firings carrying a generation older than the stream's current one for that
/// timer are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub stream: NodeId,
    pub kind: TimerKind,
    pub generation: u64,
}
