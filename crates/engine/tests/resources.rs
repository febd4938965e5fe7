// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Output devices and application-fed byte streams.

mod common;

use bytes::Bytes;
use common::{collect_until, init_tracing, only_events, player, player_with, wait_for};
use mediagraph_core::{
    ByteStream, MediaEvent, MediaGraphError, MediaSource, NodeId, ObjectClass, TransportState,
};
use mediagraph_engine::sim::{SimBackend, SimMedia};
use mediagraph_engine::{Backend, EngineConfig, ObjectArgs};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

#[tokio::test(start_paused = true)]
#[allow(clippy::expect_used)]
async fn test_outputs_share_device_and_release_after_grace() {
    let config = EngineConfig { keep_reference_ms: 100, ..EngineConfig::default() };
    let p = player_with(&[], config).await;
    assert_eq!(p.probe.opened_termini(), 1);

    let second = p
        .backend
        .create_object(ObjectClass::AudioOutput, ObjectArgs { device: Some(0) })
        .await
        .expect("second output");
    let other_device = p
        .backend
        .create_object(ObjectClass::AudioOutput, ObjectArgs { device: Some(1) })
        .await
        .expect("other device");
    assert_eq!(p.probe.opened_termini(), 2);

    p.backend.release_node(second).await.expect("release second");
    p.backend.release_node(other_device).await.expect("release other");
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(p.probe.released_termini(), 0, "released before the grace period");

    tokio::time::sleep(Duration::from_millis(3000)).await;
    assert_eq!(p.probe.released_termini(), 1);

    p.backend.release_node(p.output).await.expect("release output");
    tokio::time::sleep(Duration::from_millis(5000)).await;
    assert_eq!(p.probe.released_termini(), 2);

    p.backend.shutdown().await.expect("shutdown");
}

#[tokio::test(start_paused = true)]
#[allow(clippy::expect_used)]
async fn test_play_without_outputs_fails() {
    let p = player(&[("sim://song", SimMedia::audio(5000))]).await;
    p.backend.disconnect_nodes(p.media.id(), p.output).await.expect("disconnect");
    assert_eq!(p.backend.sinks_of(p.media.id()), vec![p.backend.null_sink()]);

    p.media.set_source_and_wait(MediaSource::url("sim://song")).await.expect("load");
    p.media.play().await.expect("play");
    assert!(wait_for(&p.media, |s| s.state == TransportState::Error).await);
    assert_eq!(p.media.error_string(), "no valid audio or video outputs");
    p.backend.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[allow(clippy::expect_used)]
async fn test_byte_stream_source() {
    init_tracing();
    let p = player(&[]).await;
    let mut events = p.media.subscribe().await.expect("subscribe");

    let (stream, _requests) = ByteStream::new();
    stream.set_pause_for_buffering(true);
    stream.write_data(Bytes::from_static(b"{\"duration_ms\":4000,\"video\":true}\n"));
    stream.write_data(Bytes::from_static(b"payload"));

    let state = p
        .media
        .set_source_and_wait(MediaSource::stream(stream.clone()))
        .await
        .expect("load stream");
    assert_eq!(state, TransportState::Stopped);
    assert_eq!(p.media.total_time(), 4000);
    assert!(p.media.has_video().await);

    let starved = only_events(
        &collect_until(&mut events, Duration::from_secs(5), |e| {
            *e == MediaEvent::BufferStatus(0)
        })
        .await,
    );
    assert_eq!(starved.last(), Some(&MediaEvent::BufferStatus(0)));

    stream.write_data(Bytes::from(vec![0_u8; 8192]));
    let refilled = only_events(
        &collect_until(&mut events, Duration::from_secs(5), |e| {
            *e == MediaEvent::BufferStatus(100)
        })
        .await,
    );
    assert_eq!(refilled.last(), Some(&MediaEvent::BufferStatus(100)));

    stream.end_of_data();
    p.media.close().await.expect("close");
    p.backend.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[allow(clippy::expect_used)]
async fn test_truncated_byte_stream_fails_to_open() {
    let p = player(&[]).await;
    let (stream, _requests) = ByteStream::new();
    stream.write_data(Bytes::from_static(b"{\"duration_ms\":"));
    stream.error("connection reset");

    let state = p
        .media
        .set_source_and_wait(MediaSource::stream(stream))
        .await
        .expect("load stream");
    assert_eq!(state, TransportState::Error);
    assert!(p.media.error_string().contains("connection reset"));
    p.backend.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[allow(clippy::expect_used)]
async fn test_close_timeout_escalates() {
    init_tracing();
    let source = MediaSource::url("sim://wedged");
    let sim = SimBackend::new()
        .with_media(&source, SimMedia { close_stall_ms: 500, ..SimMedia::audio(5000) });
    let escalated: Arc<Mutex<Vec<NodeId>>> = Arc::default();
    let seen = escalated.clone();
    let config = EngineConfig { close_timeout_ms: 50, ..EngineConfig::default() };
    let on_timeout = move |stream: NodeId| {
        seen.lock().unwrap_or_else(PoisonError::into_inner).push(stream);
    };
    let backend = Backend::with_close_timeout_hook(Arc::new(sim), config, Arc::new(on_timeout));

    let media = backend.create_media_object().await.expect("media object");
    let id = media.id();
    let state = media.set_source_and_wait(source).await.expect("load");
    assert_eq!(state, TransportState::Stopped);

    let result = media.close().await;
    assert!(matches!(result, Err(MediaGraphError::Engine(_))), "{result:?}");
    assert_eq!(*escalated.lock().unwrap_or_else(PoisonError::into_inner), vec![id]);

    // Let the stalled teardown finish before stopping the engine.
    tokio::time::sleep(Duration::from_millis(600)).await;
    backend.shutdown().await.expect("shutdown");
}
