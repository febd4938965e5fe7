// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Core data types shared by graphs, nodes and streams.
//!
//! - [`StreamTypes`]: bitmask of stream kinds a node consumes or produces
//! - [`MediaFormat`]: port-level format descriptor used for negotiation
//! - [`MediaSource`]: what a stream plays (URL, file, disc or pushed bytes)
//! - [`MetaData`]: multi-valued metadata map reported by the native engine

use crate::byte_stream::ByteStream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{BitAnd, BitOr};
use std::path::PathBuf;
use std::sync::Arc;

/// Bitmask over the stream kinds a node can accept or produce.
///
/// The mask of a node is fixed at construction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamTypes(u8);

impl StreamTypes {
    pub const NONE: Self = Self(0);
    pub const AUDIO: Self = Self(1);
    pub const VIDEO: Self = Self(1 << 1);
    pub const SUBTITLE: Self = Self(1 << 2);
    pub const STILL: Self = Self(1 << 3);
    pub const ALL: Self = Self(0b1111);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for StreamTypes {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitAnd for StreamTypes {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Debug for StreamTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (Self::AUDIO, "audio"),
            (Self::VIDEO, "video"),
            (Self::SUBTITLE, "subtitle"),
            (Self::STILL, "still"),
        ]
        .iter()
        .filter(|(bit, _)| self.contains(*bit))
        .map(|(_, name)| *name)
        .collect();
        write!(f, "StreamTypes({})", names.join("|"))
    }
}

/// Major media type of a port format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MajorType {
    Audio,
    Video,
    Subtitle,
    Still,
    /// Undemultiplexed container bytes.
    Stream,
    /// Wildcard used by adapters and placeholder sinks.
    Any,
}

impl MajorType {
    /// Stream-type bit for this major type. `Stream` and `Any` map to no single kind.
    pub const fn stream_types(self) -> StreamTypes {
        match self {
            Self::Audio => StreamTypes::AUDIO,
            Self::Video => StreamTypes::VIDEO,
            Self::Subtitle => StreamTypes::SUBTITLE,
            Self::Still => StreamTypes::STILL,
            Self::Stream => StreamTypes::NONE,
            Self::Any => StreamTypes::ALL,
        }
    }
}

/// Encoding of the samples carried over a port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    /// Decoded samples, ready for rendering.
    Raw,
    /// Compressed samples of the named codec.
    Encoded(String),
    /// Wildcard.
    Any,
}

/// Format descriptor negotiated between two ports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaFormat {
    pub major: MajorType,
    pub encoding: Encoding,
}

impl MediaFormat {
    pub const fn raw(major: MajorType) -> Self {
        Self { major, encoding: Encoding::Raw }
    }

    pub fn encoded(major: MajorType, codec: impl Into<String>) -> Self {
        Self { major, encoding: Encoding::Encoded(codec.into()) }
    }

    /// Any format of the given major type.
    pub const fn any_of(major: MajorType) -> Self {
        Self { major, encoding: Encoding::Any }
    }

    pub const fn any() -> Self {
        Self { major: MajorType::Any, encoding: Encoding::Any }
    }

    pub const fn is_encoded(&self) -> bool {
        matches!(self.encoding, Encoding::Encoded(_))
    }

    pub const fn is_wildcard(&self) -> bool {
        matches!(self.major, MajorType::Any) || matches!(self.encoding, Encoding::Any)
    }

    /// Whether a port declaring `self` can carry `offered`.
    pub fn matches(&self, offered: &Self) -> bool {
        let major_ok = self.major == MajorType::Any || self.major == offered.major;
        let encoding_ok = self.encoding == Encoding::Any || self.encoding == offered.encoding;
        major_ok && encoding_ok
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.encoding {
            Encoding::Raw => write!(f, "{:?}/raw", self.major),
            Encoding::Encoded(codec) => write!(f, "{:?}/{codec}", self.major),
            Encoding::Any => write!(f, "{:?}/*", self.major),
        }
    }
}

/// Optical disc kinds a source may point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscKind {
    Cd,
    Dvd,
    Vcd,
}

/// Shared handle to an application-fed byte stream used as a media source.
#[derive(Clone)]
pub struct StreamSource(pub Arc<ByteStream>);

impl PartialEq for StreamSource {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for StreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StreamSource").field(&self.0.id()).finish()
    }
}

/// Descriptor of what a stream should play.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum MediaSource {
    #[default]
    Invalid,
    Url(String),
    LocalFile(PathBuf),
    Disc { kind: DiscKind, device: String },
    Stream(StreamSource),
}

impl MediaSource {
    pub fn url(url: impl Into<String>) -> Self {
        Self::Url(url.into())
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::LocalFile(path.into())
    }

    pub fn stream(stream: Arc<ByteStream>) -> Self {
        Self::Stream(StreamSource(stream))
    }

    pub const fn is_valid(&self) -> bool {
        !matches!(self, Self::Invalid)
    }
}

impl fmt::Display for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid => write!(f, "invalid"),
            Self::Url(url) => write!(f, "{url}"),
            Self::LocalFile(path) => write!(f, "{}", path.display()),
            Self::Disc { kind, device } => write!(f, "disc:{kind:?}:{device}"),
            Self::Stream(stream) => write!(f, "stream:{}", stream.0.id()),
        }
    }
}

/// Multi-valued metadata, keyed by upper-case field names.
pub type MetaData = BTreeMap<String, Vec<String>>;

pub mod metadata_keys {
    pub const ARTIST: &str = "ARTIST";
    pub const TITLE: &str = "TITLE";
    pub const ALBUM: &str = "ALBUM";
    pub const DESCRIPTION: &str = "DESCRIPTION";
    pub const COPYRIGHT: &str = "COPYRIGHT";
    pub const MOREINFO: &str = "MOREINFO";
}
