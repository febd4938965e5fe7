// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Port declarations for filter templates.
//!
//! A filter template declares its input and output ports up front. Live ports
//! (with peers and negotiated formats) are created from these declarations when
//! a filter is materialized in a pipeline.
//!
//! ## Key concepts:
//! - [`PortDirection`]: input or output
//! - [`PortSpec`]: accepted formats plus [`PortCardinality`]
//! - [`AllocatorProps`]: buffer negotiation result stored on both ends of a link

use crate::types::{MajorType, MediaFormat};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Default size in bytes of each buffer of a freshly created allocator.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Default number of buffers of a freshly created allocator.
pub const DEFAULT_BUFFER_COUNT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortDirection {
    Input,
    Output,
}

/// How many instances of a declared port a filter exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortCardinality {
    /// Exactly one port.
    One,
    /// Ports are created on demand: one unconnected instance always exists.
    /// Only valid for outputs (adapters and placeholder sources).
    Dynamic,
}

/// Declaration of one port on a filter template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    pub name: String,
    /// Formats in order of preference.
    pub formats: Vec<MediaFormat>,
    pub cardinality: PortCardinality,
}

impl PortSpec {
    pub fn new(name: impl Into<String>, formats: Vec<MediaFormat>) -> Self {
        Self { name: name.into(), formats, cardinality: PortCardinality::One }
    }

    pub fn raw(name: impl Into<String>, major: MajorType) -> Self {
        Self::new(name, vec![MediaFormat::raw(major)])
    }

    #[must_use]
    pub const fn dynamic(mut self) -> Self {
        self.cardinality = PortCardinality::Dynamic;
        self
    }

    /// Whether any declared format can carry `offered`.
    pub fn accepts(&self, offered: &MediaFormat) -> bool {
        self.formats.iter().any(|f| f.matches(offered))
    }
}

/// Inline storage for the port list of a filter; almost every filter has one or two.
pub type PortSpecs = SmallVec<[PortSpec; 2]>;

/// Buffer negotiation result shared by both ends of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorProps {
    pub buffer_size: usize,
    pub buffer_count: usize,
}

impl Default for AllocatorProps {
    fn default() -> Self {
        Self { buffer_size: DEFAULT_BUFFER_SIZE, buffer_count: DEFAULT_BUFFER_COUNT }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_spec_accepts() {
        let spec = PortSpec::raw("in", MajorType::Audio);
        assert!(spec.accepts(&MediaFormat::raw(MajorType::Audio)));
        assert!(!spec.accepts(&MediaFormat::raw(MajorType::Video)));
        assert_eq!(spec.cardinality, PortCardinality::One);

        let tee_out = PortSpec::new("out", vec![MediaFormat::any()]).dynamic();
        assert!(tee_out.accepts(&MediaFormat::encoded(MajorType::Video, "h264")));
        assert_eq!(tee_out.cardinality, PortCardinality::Dynamic);
    }

    #[test]
    fn test_default_allocator() {
        let props = AllocatorProps::default();
        assert_eq!(props.buffer_size, DEFAULT_BUFFER_SIZE);
        assert_eq!(props.buffer_count, DEFAULT_BUFFER_COUNT);
    }
}
