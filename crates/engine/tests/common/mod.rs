// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

#![allow(dead_code, clippy::expect_used)]

use mediagraph_core::{MediaEvent, MediaSource, NodeId, ObjectClass};
use mediagraph_engine::sim::{SimBackend, SimMedia, SimProbe};
use mediagraph_engine::{Backend, EngineConfig, MediaObject, ObjectArgs};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// A backend with one media object already wired to an audio output.
pub struct Player {
    pub backend: Backend,
    pub probe: SimProbe,
    pub media: MediaObject,
    pub output: NodeId,
}

pub async fn player(catalog: &[(&str, SimMedia)]) -> Player {
    player_with(catalog, EngineConfig::default()).await
}

pub async fn player_with(catalog: &[(&str, SimMedia)], config: EngineConfig) -> Player {
    init_tracing();
    let sim = SimBackend::new();
    for (url, media) in catalog {
        sim.insert(&MediaSource::url(*url), media.clone());
    }
    let probe = sim.probe();
    let backend = Backend::new(Arc::new(sim), config);
    let media = backend.create_media_object().await.expect("media object");
    let output = backend
        .create_object(ObjectClass::AudioOutput, ObjectArgs::default())
        .await
        .expect("audio output");
    backend.connect_nodes(media.id(), output).await.expect("connect output");
    Player { backend, probe, media, output }
}

/// Receives events until `done` matches one, recording when each arrived.
pub async fn collect_until(
    events: &mut mpsc::Receiver<MediaEvent>,
    within: Duration,
    mut done: impl FnMut(&MediaEvent) -> bool,
) -> Vec<(Instant, MediaEvent)> {
    let mut seen = Vec::new();
    let deadline = Instant::now() + within;
    while let Ok(Some(event)) = tokio::time::timeout_at(deadline, events.recv()).await {
        let finished = done(&event);
        seen.push((Instant::now(), event));
        if finished {
            break;
        }
    }
    seen
}

pub fn only_events(seen: &[(Instant, MediaEvent)]) -> Vec<MediaEvent> {
    seen.iter().map(|(_, event)| event.clone()).collect()
}

/// Waits for a published snapshot satisfying `pred`.
pub async fn wait_for(
    media: &MediaObject,
    pred: impl FnMut(&mediagraph_engine::StreamSnapshot) -> bool,
) -> bool {
    let mut rx = media.watch();
    let ok = matches!(tokio::time::timeout(Duration::from_secs(30), rx.wait_for(pred)).await, Ok(Ok(_)));
    ok
}
