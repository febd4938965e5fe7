// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Transport state machine vocabulary.
//!
//! ## State Machine
//!
//! ```text
//!     Loading ──→ Stopped ──→ Buffering ⇄ Playing ⇄ Paused
//!                    ↑            │          │         │
//!                    └────────────┴──────────┴─────────┘
//!
//!     any state ──→ Error   (left only through a new source)
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Transport state of a stream. Exactly one holds at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportState {
    /// A source is being opened.
    Loading,
    /// Idle with a source loaded (or nothing loaded yet).
    #[default]
    Stopped,
    /// Playback requested but no position is available yet, or the network
    /// source is refilling.
    Buffering,
    Playing,
    Paused,
    /// Terminal until a new source is set.
    Error,
}

impl TransportState {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Stopped => "stopped",
            Self::Buffering => "buffering",
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::Error => "error",
        }
    }

    /// States in which the native pipeline is (or is about to be) flowing.
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Playing | Self::Buffering | Self::Paused)
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Severity of the last error reported for a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    #[default]
    NoError,
    /// Recoverable: a fresh source may be set on the same stream.
    NormalError,
    /// The stream object cannot be used for playback at all.
    FatalError,
}
