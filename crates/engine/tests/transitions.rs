// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Source-to-source transitions on the simulated engine: gapless, timed gaps
//! and crossfades.

mod common;

use common::{collect_until, only_events, player};
use mediagraph_core::{MediaEvent, MediaSource, TransportState};
use mediagraph_engine::sim::SimMedia;
use std::time::Duration;
use tokio::time::Instant;

fn playlist() -> [(&'static str, SimMedia); 2] {
    [("sim://a", SimMedia::audio(3000)), ("sim://b", SimMedia::audio(3000))]
}

fn is_stopped(event: &MediaEvent) -> bool {
    matches!(event, MediaEvent::StateChanged { new: TransportState::Stopped, .. })
}

#[tokio::test(start_paused = true)]
#[allow(clippy::expect_used)]
async fn test_gapless_switch_keeps_playing() {
    let p = player(&playlist()).await;
    let mut events = p.media.subscribe().await.expect("subscribe");

    p.media.set_source_and_wait(MediaSource::url("sim://a")).await.expect("load");
    p.media.enqueue(vec![MediaSource::url("sim://b")]).await.expect("enqueue");
    let started = Instant::now();
    p.media.play().await.expect("play");

    let seen = collect_until(&mut events, Duration::from_secs(20), |e| {
        matches!(e, MediaEvent::Finished)
    })
    .await;
    let events = only_events(&seen);

    let switch = events
        .iter()
        .position(|e| *e == MediaEvent::CurrentSourceChanged(MediaSource::url("sim://b")))
        .expect("switched to b");
    assert!(!events[..switch].iter().any(is_stopped), "stopped before switching: {events:?}");
    let switched_at = seen[switch].0 - started;
    assert!(switched_at >= Duration::from_millis(3000));
    assert!(switched_at < Duration::from_millis(3100), "switch was late: {switched_at:?}");

    assert_eq!(events.iter().filter(|e| **e == MediaEvent::AboutToFinish).count(), 2);
    assert_eq!(events.last(), Some(&MediaEvent::Finished));
    assert!(events[switch..].iter().any(is_stopped));
    assert_eq!(p.media.state(), TransportState::Stopped);
    assert_eq!(p.media.current_source(), MediaSource::url("sim://b"));

    p.backend.shutdown().await.expect("shutdown");
}

#[tokio::test(start_paused = true)]
#[allow(clippy::expect_used)]
async fn test_positive_transition_time_inserts_gap() {
    let p = player(&playlist()).await;
    let mut events = p.media.subscribe().await.expect("subscribe");

    p.media.set_transition_time(500).await.expect("transition time");
    p.media.set_source_and_wait(MediaSource::url("sim://a")).await.expect("load");
    p.media.enqueue(vec![MediaSource::url("sim://b")]).await.expect("enqueue");
    let started = Instant::now();
    p.media.play().await.expect("play");

    let seen = collect_until(&mut events, Duration::from_secs(20), |e| {
        *e == MediaEvent::CurrentSourceChanged(MediaSource::url("sim://b"))
    })
    .await;
    let (switched, last) = seen.last().expect("events");
    assert_eq!(*last, MediaEvent::CurrentSourceChanged(MediaSource::url("sim://b")));
    assert!(*switched - started >= Duration::from_millis(3500));
    assert!(!only_events(&seen).iter().any(is_stopped));
    assert_eq!(p.media.state(), TransportState::Playing);

    p.backend.shutdown().await.expect("shutdown");
}

#[tokio::test(start_paused = true)]
#[allow(clippy::expect_used)]
async fn test_crossfade_gains_are_monotonic() {
    let p = player(&playlist()).await;
    let mut events = p.media.subscribe().await.expect("subscribe");
    let output = p.backend.node(p.output).expect("output node");

    p.media.set_transition_time(-1000).await.expect("transition time");
    p.media.set_source_and_wait(MediaSource::url("sim://a")).await.expect("load");
    p.media.enqueue(vec![MediaSource::url("sim://b")]).await.expect("enqueue");
    p.media.play().await.expect("play");
    assert_eq!(output.crossfade_gains(), [1.0, 0.0]);

    let mut samples = Vec::new();
    let mut switched = false;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        samples.push(output.crossfade_gains());
        while let Ok(event) = events.try_recv() {
            switched |= event == MediaEvent::CurrentSourceChanged(MediaSource::url("sim://b"));
        }
        if switched {
            break;
        }
    }
    assert!(switched, "never switched to b");

    for pair in samples.windows(2) {
        assert!(pair[1][1] >= pair[0][1], "incoming gain went down: {samples:?}");
        assert!(pair[1][0] <= pair[0][0], "outgoing gain went up: {samples:?}");
    }
    assert!(
        samples.iter().any(|g| g[1] > 0.0 && g[1] < 1.0),
        "no intermediate gains: {samples:?}"
    );
    assert_eq!(output.crossfade_gains(), [0.0, 1.0]);
    assert_eq!(p.media.state(), TransportState::Playing);

    p.backend.shutdown().await.expect("shutdown");
}

#[tokio::test(start_paused = true)]
#[allow(clippy::expect_used)]
async fn test_prefinish_mark_and_ticks() {
    let p = player(&[("sim://a", SimMedia::audio(3000))]).await;
    let mut events = p.media.subscribe().await.expect("subscribe");

    p.media.set_prefinish_mark(1000).await.expect("prefinish");
    p.media.set_tick_interval(1000).await.expect("tick interval");
    p.media.set_source_and_wait(MediaSource::url("sim://a")).await.expect("load");
    p.media.play().await.expect("play");

    let events = only_events(
        &collect_until(&mut events, Duration::from_secs(10), |e| {
            matches!(e, MediaEvent::Finished)
        })
        .await,
    );

    let marks: Vec<i64> = events
        .iter()
        .filter_map(|e| match e {
            MediaEvent::PrefinishMarkReached(remaining) => Some(*remaining),
            _ => None,
        })
        .collect();
    assert_eq!(marks.len(), 1);
    assert!(marks[0] <= 1000 && marks[0] > 0);

    let ticks: Vec<i64> = events
        .iter()
        .filter_map(|e| match e {
            MediaEvent::Tick(ms) => Some(*ms),
            _ => None,
        })
        .collect();
    assert!(ticks.len() >= 2, "ticks: {ticks:?}");
    assert!(ticks.windows(2).all(|w| w[1] / 1000 > w[0] / 1000));

    p.backend.shutdown().await.expect("shutdown");
}
