// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Abstraction over the platform media framework.
//!
//! A [`NativeBackend`] produces one [`NativeGraph`] per playable slot. Native
//! graphs are owned and driven exclusively by the engine actor; their
//! asynchronous notifications flow back through a [`NativeEventSender`] tagged
//! with the [`GraphKey`] of the graph that raised them.

use crate::pipeline::Pipeline;
use async_trait::async_trait;
use mediagraph_core::{
    ErrorKind, MediaSource, MetaData, NodeId, Terminus, TerminusHandle, TerminusKind,
};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Identifies one of the two graphs of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GraphKey {
    pub stream: NodeId,
    pub index: usize,
}

impl fmt::Display for GraphKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.stream, self.index)
    }
}

/// Transport status as reported by the native graph itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NativeStatus {
    /// Nothing is open.
    #[default]
    Idle,
    Stopped,
    Paused,
    Playing,
}

/// Asynchronous notifications raised by a native graph.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeEvent {
    EndOfStream,
    /// Fill level of the input buffer in percent.
    Buffering(u8),
    Error { kind: ErrorKind, reason: String },
    MetaDataChanged(MetaData),
    /// The duration became known or changed, in milliseconds.
    LengthChanged(i64),
}

pub type NativeEventSender = mpsc::UnboundedSender<(GraphKey, NativeEvent)>;
pub type NativeEventReceiver = mpsc::UnboundedReceiver<(GraphKey, NativeEvent)>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NativeError {
    /// The source could not be opened. The reason is the engine's own text.
    #[error("{reason}")]
    Open { reason: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl NativeError {
    pub fn open(reason: impl Into<String>) -> Self {
        Self::Open { reason: reason.into() }
    }

    /// How severe the failure is for the stream that hit it.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Open { .. } | Self::Unsupported(_) => ErrorKind::NormalError,
            Self::Transport(_) => ErrorKind::FatalError,
        }
    }
}

/// An output device the native backend can bind a terminus to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub index: usize,
    pub name: String,
    pub description: String,
    pub kind: TerminusKind,
}

/// One native pipeline instance.
#[async_trait]
pub trait NativeGraph: Send {
    /// Opens `source`, adding the engine's own filters to `pipeline`.
    ///
    /// Filters are created attached and connected the way the engine would
    /// render the source by default; the caller prunes what it does not need.
    async fn open(&mut self, pipeline: &mut Pipeline, source: &MediaSource)
        -> Result<(), NativeError>;

    /// Releases the open source. Idempotent.
    fn close(&mut self);

    /// Binds the rendering side of the graph to `termini`.
    fn create_stream(&mut self, termini: &[TerminusHandle]) -> Result<(), NativeError>;

    fn has_stream(&self) -> bool;

    fn dispose_stream(&mut self);

    fn status(&self) -> NativeStatus;

    fn run(&mut self) -> Result<(), NativeError>;

    fn pause(&mut self) -> Result<(), NativeError>;

    fn stop(&mut self);

    fn seek(&mut self, position_ms: i64) -> Result<(), NativeError>;

    /// Current position, or `None` while the engine cannot report one yet.
    fn position(&self) -> Option<i64>;

    fn duration(&self) -> Option<i64>;

    fn is_seekable(&self) -> bool;

    fn metadata(&self) -> MetaData;
}

/// Factory for native graphs, devices and termini.
pub trait NativeBackend: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn create_graph(&self, key: GraphKey, events: NativeEventSender) -> Box<dyn NativeGraph>;

    fn audio_devices(&self) -> Vec<DeviceInfo>;

    fn video_devices(&self) -> Vec<DeviceInfo>;

    /// Opens the terminus for an output device.
    ///
    /// # Errors
    ///
    /// Fails when the device does not exist or cannot be opened.
    fn open_terminus(
        &self,
        kind: TerminusKind,
        device: usize,
    ) -> Result<Arc<dyn Terminus>, NativeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let open = NativeError::open("Cannot render the file");
        assert_eq!(open.to_string(), "Cannot render the file");
        assert_eq!(open.kind(), ErrorKind::NormalError);
        assert_eq!(NativeError::Transport("device lost".into()).kind(), ErrorKind::FatalError);
    }
}
