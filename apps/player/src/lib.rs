// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! mgplay: plays a configured playlist through a mediagraph backend.
//!
//! The player runs on the software reference engine, whose catalog comes from
//! the `[[media]]` entries of the configuration file.

pub mod cli;
pub mod config;
pub mod logging;
pub mod playback;

pub use config::Config;
