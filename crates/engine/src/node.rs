// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Backend-side node objects shared between the façade and the engine actor.

use mediagraph_core::{NodeDescriptor, NodeId, ObjectClass, StreamTypes, TerminusHandle};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Mutable rendering parameters of an output node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputState {
    /// Per-graph gain, indexed by the graph slot feeding the output.
    pub gains: [f32; 2],
    pub volume: f32,
    /// Graph slot whose frames a video output presents.
    pub active_graph: usize,
}

impl Default for OutputState {
    fn default() -> Self {
        Self { gains: [1.0, 0.0], volume: 1.0, active_graph: 0 }
    }
}

/// A node of a backend context.
///
/// Held by the topology arena and, through strong references, by rewire
/// batches in flight, so it outlives its removal from the arena until the
/// engine has applied every call that mentions it.
#[derive(Debug)]
pub struct BackendNode {
    id: NodeId,
    descriptor: NodeDescriptor,
    terminus: Option<TerminusHandle>,
    output: Mutex<OutputState>,
}

impl BackendNode {
    pub fn new(id: NodeId, descriptor: NodeDescriptor, terminus: Option<TerminusHandle>) -> Self {
        Self { id, descriptor, terminus, output: Mutex::new(OutputState::default()) }
    }

    pub const fn id(&self) -> NodeId {
        self.id
    }

    pub const fn class(&self) -> ObjectClass {
        self.descriptor.class
    }

    pub const fn descriptor(&self) -> &NodeDescriptor {
        &self.descriptor
    }

    pub const fn terminus(&self) -> Option<&TerminusHandle> {
        self.terminus.as_ref()
    }

    pub fn input_stream_types(&self) -> StreamTypes {
        self.descriptor.capabilities.input_stream_types()
    }

    pub fn output_stream_types(&self) -> StreamTypes {
        self.descriptor.capabilities.output_stream_types()
    }

    pub const fn is_source(&self) -> bool {
        self.descriptor.capabilities.is_source()
    }

    pub const fn is_sink(&self) -> bool {
        self.descriptor.capabilities.is_sink()
    }

    pub fn is_media_source(&self) -> bool {
        self.class() == ObjectClass::MediaSource
    }

    pub fn is_null_sink(&self) -> bool {
        self.class() == ObjectClass::NullSink
    }

    /// A terminal consumer: sink-only and not the placeholder.
    pub fn is_endpoint(&self) -> bool {
        self.is_sink() && !self.is_source() && !self.is_null_sink()
    }

    fn output(&self) -> MutexGuard<'_, OutputState> {
        self.output.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn output_state(&self) -> OutputState {
        *self.output()
    }

    pub fn crossfade_gains(&self) -> [f32; 2] {
        self.output().gains
    }

    pub fn set_gains(&self, gains: [f32; 2]) {
        self.output().gains = gains;
    }

    pub fn set_volume(&self, volume: f32) {
        self.output().volume = volume.clamp(0.0, 1.0);
    }

    pub fn set_active_graph(&self, index: usize) {
        self.output().active_graph = index;
    }
}
