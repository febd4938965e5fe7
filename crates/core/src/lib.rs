// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! mediagraph core - data model shared by media graph backends.
//!
//! ## Core Modules
//!
//! - [`types`]: Stream-type masks, port formats, media source descriptors, metadata
//! - [`node`]: Node identity, object classes and source/sink capabilities
//! - [`pins`]: Port declarations and allocator negotiation defaults
//! - [`state`]: Transport states and error kinds
//! - [`events`]: Notifications emitted by streams, and their fan-out bus
//! - [`terminus`]: Reference-counted terminus handles with deferred release
//! - [`byte_stream`]: Push-style byte stream for application-supplied media
//! - [`error`]: Error types and handling

pub mod byte_stream;
pub mod error;
pub mod events;
pub mod node;
pub mod pins;
pub mod state;
pub mod terminus;
pub mod types;

pub use byte_stream::{ByteStream, StreamRequest};
pub use error::{MediaGraphError, Result};
pub use events::{EventBus, MediaEvent};
pub use node::{
    FilterTemplate, NodeCapabilities, NodeDescriptor, NodeId, ObjectClass, SinkCapability,
    SourceCapability,
};
pub use pins::{AllocatorProps, PortCardinality, PortDirection, PortSpec};
pub use state::{ErrorKind, TransportState};
pub use terminus::{DeferredReleaser, Terminus, TerminusHandle, TerminusKind, TerminusPool};
pub use types::{MajorType, MediaFormat, MediaSource, MetaData, StreamTypes};
