// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Transport control, seeking, buffering and failure reporting.

mod common;

use common::{collect_until, only_events, player, wait_for};
use mediagraph_core::{ErrorKind, MediaEvent, MediaSource, ObjectClass, TransportState};
use mediagraph_engine::sim::SimMedia;
use mediagraph_engine::{GraphKey, NativeEvent, ObjectArgs};
use std::time::Duration;

#[tokio::test(start_paused = true)]
#[allow(clippy::expect_used)]
async fn test_rapid_seeks_coalesce() {
    let p = player(&[("sim://long", SimMedia::audio(10_000))]).await;
    p.media.set_source_and_wait(MediaSource::url("sim://long")).await.expect("load");
    p.media.play().await.expect("play");
    assert!(wait_for(&p.media, |s| s.state == TransportState::Playing).await);

    p.media.seek(1000).await.expect("first seek");
    p.media.seek(2000).await.expect("second seek");
    assert!(wait_for(&p.media, |s| s.current_time >= 2000).await);

    let key = GraphKey { stream: p.media.id(), index: 0 };
    assert_eq!(p.probe.seeks(), vec![(key, 2000)]);
    p.backend.shutdown().await.expect("shutdown");
}

#[tokio::test(start_paused = true)]
#[allow(clippy::expect_used)]
async fn test_seek_is_ignored_when_stopped_or_unseekable() {
    let fixed = SimMedia { seekable: false, ..SimMedia::audio(10_000) };
    let p = player(&[("sim://seekable", SimMedia::audio(10_000)), ("sim://live", fixed)]).await;

    p.media.set_source_and_wait(MediaSource::url("sim://seekable")).await.expect("load");
    p.media.seek(4000).await.expect("seek while stopped");

    p.media.set_source_and_wait(MediaSource::url("sim://live")).await.expect("load live");
    assert!(!p.media.is_seekable().await);
    p.media.play().await.expect("play");
    assert!(wait_for(&p.media, |s| s.state == TransportState::Playing).await);
    p.media.seek(4000).await.expect("seek unseekable");
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(p.probe.seeks().is_empty());
    assert!(p.media.current_time() < 4000);
    p.backend.shutdown().await.expect("shutdown");
}

#[tokio::test(start_paused = true)]
#[allow(clippy::expect_used)]
async fn test_pause_resume_keeps_position() {
    let p = player(&[("sim://song", SimMedia::audio(10_000))]).await;
    p.media.set_source_and_wait(MediaSource::url("sim://song")).await.expect("load");
    p.media.play().await.expect("play");
    tokio::time::sleep(Duration::from_millis(1500)).await;

    p.media.pause().await.expect("pause");
    assert!(wait_for(&p.media, |s| s.state == TransportState::Paused).await);
    let paused_at = p.media.current_time();
    tokio::time::sleep(Duration::from_millis(2000)).await;

    p.media.play().await.expect("resume");
    assert!(wait_for(&p.media, |s| s.state == TransportState::Playing).await);
    tokio::time::sleep(Duration::from_millis(500)).await;
    let resumed = p.media.current_time();
    assert!(resumed >= paused_at && resumed < paused_at + 1000, "{paused_at} -> {resumed}");

    p.media.stop().await.expect("stop");
    assert!(wait_for(&p.media, |s| s.state == TransportState::Stopped && s.current_time == 0).await);
    p.backend.shutdown().await.expect("shutdown");
}

#[tokio::test(start_paused = true)]
#[allow(clippy::expect_used)]
async fn test_startup_delay_reports_buffering() {
    let slow = SimMedia { startup_delay_ms: 400, ..SimMedia::audio(5000) };
    let p = player(&[("sim://slow", slow)]).await;
    let mut events = p.media.subscribe().await.expect("subscribe");
    p.media.set_source_and_wait(MediaSource::url("sim://slow")).await.expect("load");
    p.media.play().await.expect("play");

    let events = only_events(
        &collect_until(&mut events, Duration::from_secs(5), |e| {
            matches!(e, MediaEvent::StateChanged { new: TransportState::Playing, .. })
        })
        .await,
    );
    assert!(events.contains(&MediaEvent::StateChanged {
        old: TransportState::Stopped,
        new: TransportState::Buffering,
    }));
    assert_eq!(events.last(), Some(&MediaEvent::StateChanged {
        old: TransportState::Buffering,
        new: TransportState::Playing,
    }));
    p.backend.shutdown().await.expect("shutdown");
}

#[tokio::test(start_paused = true)]
#[allow(clippy::expect_used)]
async fn test_native_buffering_toggles_state() {
    let p = player(&[("sim://net", SimMedia::audio(60_000))]).await;
    let mut events = p.media.subscribe().await.expect("subscribe");
    p.media.set_source_and_wait(MediaSource::url("sim://net")).await.expect("load");
    p.media.play().await.expect("play");
    assert!(wait_for(&p.media, |s| s.state == TransportState::Playing).await);

    let key = GraphKey { stream: p.media.id(), index: 0 };
    let idle = GraphKey { stream: p.media.id(), index: 1 };
    assert!(p.probe.emit(idle, NativeEvent::Buffering(10)));
    assert!(p.probe.emit(key, NativeEvent::Buffering(40)));
    assert!(wait_for(&p.media, |s| s.state == TransportState::Buffering).await);
    assert!(p.probe.emit(key, NativeEvent::Buffering(100)));
    assert!(wait_for(&p.media, |s| s.state == TransportState::Playing).await);

    let events = only_events(
        &collect_until(&mut events, Duration::from_secs(1), |e| {
            *e == MediaEvent::BufferStatus(100)
        })
        .await,
    );
    let statuses: Vec<_> =
        events.iter().filter(|e| matches!(e, MediaEvent::BufferStatus(_))).cloned().collect();
    assert_eq!(statuses, vec![MediaEvent::BufferStatus(40), MediaEvent::BufferStatus(100)]);
    p.backend.shutdown().await.expect("shutdown");
}

#[tokio::test(start_paused = true)]
#[allow(clippy::expect_used)]
async fn test_failures_are_reported() {
    let unbindable = SimMedia { fail_stream: true, ..SimMedia::audio(5000) };
    let p = player(&[("sim://ok", SimMedia::audio(5000)), ("sim://unbindable", unbindable)]).await;

    let state = p.media.set_source_and_wait(MediaSource::url("sim://missing")).await.expect("load");
    assert_eq!(state, TransportState::Error);
    assert_eq!(p.media.error_kind(), ErrorKind::NormalError);
    assert!(p.media.error_string().contains("no such media"));

    p.media.set_source_and_wait(MediaSource::url("sim://unbindable")).await.expect("load");
    assert_eq!(p.media.error_kind(), ErrorKind::NoError);
    p.media.play().await.expect("play");
    assert!(wait_for(&p.media, |s| s.state == TransportState::Error).await);
    assert_eq!(p.media.error_kind(), ErrorKind::FatalError);
    assert_eq!(p.media.error_string(), "failed to create a stream");

    p.media.set_source_and_wait(MediaSource::url("sim://ok")).await.expect("load");
    p.media.play().await.expect("play");
    assert!(wait_for(&p.media, |s| s.state == TransportState::Playing).await);
    let key = GraphKey { stream: p.media.id(), index: 0 };
    p.probe.emit(key, NativeEvent::Error {
        kind: ErrorKind::FatalError,
        reason: "device lost".to_string(),
    });
    assert!(wait_for(&p.media, |s| s.state == TransportState::Error).await);
    assert_eq!(p.media.error_string(), "device lost");

    p.backend.shutdown().await.expect("shutdown");
}

#[tokio::test(start_paused = true)]
#[allow(clippy::expect_used)]
async fn test_stream_information() {
    let mut clip = SimMedia::audio_video(8000);
    clip.metadata.insert("TITLE".to_string(), vec!["Clip".to_string()]);
    let p = player(&[("sim://clip", clip)]).await;
    let video = p
        .backend
        .create_object(ObjectClass::VideoOutput, ObjectArgs::default())
        .await
        .expect("video output");
    p.backend.connect_nodes(p.media.id(), video).await.expect("connect video");

    p.media.set_source_and_wait(MediaSource::url("sim://clip")).await.expect("load");
    assert!(p.media.has_video().await);
    assert!(p.media.is_seekable().await);
    assert_eq!(p.media.total_time(), 8000);
    assert_eq!(p.media.metadata().get("TITLE"), Some(&vec!["Clip".to_string()]));

    p.media.set_source(MediaSource::Invalid).await.expect("clear source");
    assert!(wait_for(&p.media, |s| s.current_source == MediaSource::Invalid).await);
    assert_eq!(p.media.state(), TransportState::Stopped);
    assert!(!p.media.has_video().await);

    p.backend.shutdown().await.expect("shutdown");
}
