// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Canonical default values for engine timing and channel sizing.
//!
//! [`EngineConfig`](crate::EngineConfig) and the player configuration reference
//! these constants so that defaults stay consistent across the workspace.

// === Channel Capacities ===

/// Default buffer size for the engine control channel.
///
/// Carries transport commands, topology rewire batches and queries from every
/// façade handle. Commands are small; the capacity mostly absorbs bursts such as
/// a playlist being enqueued.
pub const DEFAULT_ENGINE_CONTROL_CAPACITY: usize = 128;

/// Default buffer size for each event subscriber channel.
///
/// Ticks are the most frequent event; at a 100ms tick interval the default holds
/// roughly 25 seconds of ticks for a subscriber that stopped reading.
pub const DEFAULT_SUBSCRIBER_CHANNEL_CAPACITY: usize = 256;

// === Stream Timing ===

/// Period of the stream pulse timer while playing, in milliseconds.
///
/// Ticks, prefinish checks and crossfade gain updates are all evaluated on this
/// pulse, so it bounds their resolution.
pub const DEFAULT_PULSE_INTERVAL_MS: u64 = 25;

/// Lead time before the transition point at which "about to finish" fires.
///
/// The façade has at least this long to supply the next source.
pub const DEFAULT_PRELOAD_TIME_MS: i64 = 2000;

/// Poll period while waiting for a freshly started stream to report a position.
pub const DEFAULT_BUFFERING_POLL_MS: u64 = 50;

/// Upper bound for a façade waiting on stream information (has-video, seekable).
///
/// After this the last published snapshot is returned instead.
pub const DEFAULT_STREAM_INFO_WAIT_MS: u64 = 80;

/// Distance from the end within which an end-of-stream event is trusted.
///
/// End-of-stream notifications queued before a seek or a pause are recognised
/// as stale by comparing the clock against the duration.
pub const END_OF_STREAM_TOLERANCE_MS: i64 = 250;

// === Resource Lifetimes ===

/// Grace period before an unreferenced terminus is released.
pub const DEFAULT_RELEASE_GRACE_MS: u64 = 2000;

/// Period of the terminus reaper.
pub const DEFAULT_REAPER_INTERVAL_MS: u64 = 250;

/// How long nodes touched by a rewire batch are kept alive after it is applied.
pub const DEFAULT_KEEP_REFERENCE_MS: u64 = 10_000;

/// Bound on the synchronous teardown of a stream.
///
/// An engine that does not answer within this window is considered deadlocked.
pub const DEFAULT_CLOSE_TIMEOUT_MS: u64 = 10_000;

/// Period of the engine's sweep over expired keep-alive entries.
pub const KEEP_ALIVE_SWEEP_INTERVAL_MS: u64 = 1000;
