// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Scenario tests for the engine crate.

#[cfg(feature = "sim")]
mod null_sink;

#[cfg(feature = "sim")]
use crate::sim::{SimBackend, SimMedia, SimProbe};
#[cfg(feature = "sim")]
use crate::{Backend, EngineConfig, MediaObject, StreamSnapshot};
#[cfg(feature = "sim")]
use std::sync::Arc;
#[cfg(feature = "sim")]
use std::time::Duration;

#[cfg(feature = "sim")]
fn backend_with(media: &[(&str, SimMedia)]) -> (Backend, SimProbe) {
    let sim = SimBackend::new();
    for (url, entry) in media {
        sim.insert(&mediagraph_core::MediaSource::url(*url), entry.clone());
    }
    let probe = sim.probe();
    (Backend::new(Arc::new(sim), EngineConfig::default()), probe)
}

#[cfg(feature = "sim")]
async fn wait_until(media: &MediaObject, pred: impl FnMut(&StreamSnapshot) -> bool) -> bool {
    let mut rx = media.watch();
    let waited = tokio::time::timeout(Duration::from_secs(30), rx.wait_for(pred)).await;
    matches!(waited, Ok(Ok(_)))
}
