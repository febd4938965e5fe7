// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Node identity, classes and capabilities.
//!
//! A node is a source, a sink, or both (a filter). Rather than modelling this
//! with an inheritance hierarchy, a node carries an optional
//! [`SourceCapability`] and an optional [`SinkCapability`]; filters simply have
//! both.

use crate::pins::{PortSpec, PortSpecs};
use crate::types::{MajorType, MediaFormat, StreamTypes};
use serde::{Deserialize, Serialize};
use smallvec::smallvec;
use std::fmt;

/// Index of a node in the context's node arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Object classes the backend factory can create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObjectClass {
    MediaSource,
    AudioOutput,
    VideoOutput,
    Effect,
    VolumeFader,
    AudioDataTap,
    VideoDataTap,
    Visualization,
    /// Placeholder sink owned by the backend context; never created by clients.
    NullSink,
}

impl ObjectClass {
    pub const fn name(self) -> &'static str {
        match self {
            Self::MediaSource => "media-source",
            Self::AudioOutput => "audio-output",
            Self::VideoOutput => "video-output",
            Self::Effect => "effect",
            Self::VolumeFader => "volume-fader",
            Self::AudioDataTap => "audio-data-tap",
            Self::VideoDataTap => "video-data-tap",
            Self::Visualization => "visualization",
            Self::NullSink => "null-sink",
        }
    }
}

/// The node produces streams of these types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCapability {
    pub output_types: StreamTypes,
}

/// The node consumes streams of these types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkCapability {
    pub input_types: StreamTypes,
}

/// Composition of the two capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeCapabilities {
    pub source: Option<SourceCapability>,
    pub sink: Option<SinkCapability>,
}

impl NodeCapabilities {
    pub const fn source(output_types: StreamTypes) -> Self {
        Self { source: Some(SourceCapability { output_types }), sink: None }
    }

    pub const fn sink(input_types: StreamTypes) -> Self {
        Self { source: None, sink: Some(SinkCapability { input_types }) }
    }

    pub const fn filter(input_types: StreamTypes, output_types: StreamTypes) -> Self {
        Self {
            source: Some(SourceCapability { output_types }),
            sink: Some(SinkCapability { input_types }),
        }
    }

    pub const fn is_source(&self) -> bool {
        self.source.is_some()
    }

    pub const fn is_sink(&self) -> bool {
        self.sink.is_some()
    }

    pub fn output_stream_types(&self) -> StreamTypes {
        self.source.map_or(StreamTypes::NONE, |s| s.output_types)
    }

    pub fn input_stream_types(&self) -> StreamTypes {
        self.sink.map_or(StreamTypes::NONE, |s| s.input_types)
    }
}

/// Port layout used to materialize a node's filter inside a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterTemplate {
    pub name: String,
    pub inputs: PortSpecs,
    pub outputs: PortSpecs,
}

/// Static description of a node: class, capabilities and filter layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub class: ObjectClass,
    pub capabilities: NodeCapabilities,
    /// `None` for media sources, whose graphs provide the placeholder filter.
    pub template: Option<FilterTemplate>,
}

impl NodeDescriptor {
    /// Default descriptor for an object class.
    pub fn for_class(class: ObjectClass) -> Self {
        let audio_in = || PortSpec::raw("audio_in", MajorType::Audio);
        let template = |inputs: PortSpecs, outputs: PortSpecs| {
            Some(FilterTemplate { name: class.name().to_string(), inputs, outputs })
        };

        let (capabilities, template) = match class {
            ObjectClass::MediaSource => (
                NodeCapabilities::source(
                    StreamTypes::AUDIO | StreamTypes::VIDEO | StreamTypes::SUBTITLE,
                ),
                None,
            ),
            ObjectClass::AudioOutput | ObjectClass::AudioDataTap => (
                NodeCapabilities::sink(StreamTypes::AUDIO),
                template(smallvec![audio_in()], PortSpecs::new()),
            ),
            ObjectClass::VideoOutput | ObjectClass::VideoDataTap => (
                NodeCapabilities::sink(StreamTypes::VIDEO),
                template(smallvec![PortSpec::raw("video_in", MajorType::Video)], PortSpecs::new()),
            ),
            ObjectClass::Effect | ObjectClass::VolumeFader => (
                NodeCapabilities::filter(StreamTypes::AUDIO, StreamTypes::AUDIO),
                template(
                    smallvec![audio_in()],
                    smallvec![PortSpec::raw("audio_out", MajorType::Audio)],
                ),
            ),
            ObjectClass::Visualization => (
                NodeCapabilities::filter(StreamTypes::AUDIO, StreamTypes::VIDEO),
                template(
                    smallvec![audio_in()],
                    smallvec![PortSpec::raw("video_out", MajorType::Video)],
                ),
            ),
            ObjectClass::NullSink => (
                NodeCapabilities::sink(StreamTypes::ALL),
                template(
                    smallvec![
                        PortSpec::new("audio_in", vec![MediaFormat::any_of(MajorType::Audio)]),
                        PortSpec::new("video_in", vec![MediaFormat::any_of(MajorType::Video)]),
                        PortSpec::new(
                            "subtitle_in",
                            vec![MediaFormat::any_of(MajorType::Subtitle)]
                        ),
                    ],
                    PortSpecs::new(),
                ),
            ),
        };

        Self { class, capabilities, template }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_composition() {
        let effect = NodeDescriptor::for_class(ObjectClass::Effect);
        assert!(effect.capabilities.is_source());
        assert!(effect.capabilities.is_sink());

        let output = NodeDescriptor::for_class(ObjectClass::AudioOutput);
        assert!(!output.capabilities.is_source());
        assert_eq!(output.capabilities.input_stream_types(), StreamTypes::AUDIO);
        assert_eq!(output.capabilities.output_stream_types(), StreamTypes::NONE);
    }

    #[test]
    fn test_media_source_has_no_template() {
        let source = NodeDescriptor::for_class(ObjectClass::MediaSource);
        assert!(source.template.is_none());
        assert!(source.capabilities.output_stream_types().contains(StreamTypes::VIDEO));
    }

    #[test]
    fn test_null_sink_accepts_everything() {
        let null = NodeDescriptor::for_class(ObjectClass::NullSink);
        let Some(template) = null.template else {
            panic!("null sink must have a filter template");
        };
        assert_eq!(template.inputs.len(), 3);
        assert!(template.inputs[0].accepts(&MediaFormat::encoded(MajorType::Audio, "mp3")));
    }
}
