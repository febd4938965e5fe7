// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Playlist playback on the software reference engine.

use anyhow::{bail, Context};
use mediagraph_core::{MediaEvent, MediaSource, ObjectClass, TransportState};
use mediagraph_engine::sim::SimBackend;
use mediagraph_engine::{Backend, MediaObject, ObjectArgs};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;

/// How a playlist run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Finished { played: Vec<String> },
    Failed { source: String, message: String },
    Interrupted,
}

/// Builds the simulated engine's catalog from the `[[media]]` entries.
pub fn sim_backend(config: &Config) -> SimBackend {
    let sim = SimBackend::new();
    for entry in &config.media {
        sim.insert(&entry.source(), entry.to_sim_media());
    }
    sim
}

/// The sources to play: the named ones, or the whole catalog in order.
///
/// # Errors
///
/// Fails when nothing is configured or a named source is not in the catalog.
pub fn playlist(config: &Config, requested: &[String]) -> anyhow::Result<Vec<MediaSource>> {
    if config.media.is_empty() {
        bail!("no [[media]] entries configured");
    }
    if requested.is_empty() {
        return Ok(config.media.iter().map(crate::config::MediaEntry::source).collect());
    }
    requested
        .iter()
        .map(|url| {
            config
                .media
                .iter()
                .find(|entry| entry.url == *url)
                .map(crate::config::MediaEntry::source)
                .with_context(|| format!("{url} is not in the media catalog"))
        })
        .collect()
}

/// Creates the media object and wires it to its outputs.
async fn build(backend: &Backend, config: &Config) -> anyhow::Result<MediaObject> {
    let media = backend.create_media_object().await?;
    let audio = backend
        .create_object(ObjectClass::AudioOutput, ObjectArgs {
            device: Some(config.playback.audio_device),
        })
        .await
        .context("cannot open audio output")?;
    let fader = backend.create_object(ObjectClass::VolumeFader, ObjectArgs::default()).await?;

    let mut nodes = vec![media.id(), fader, audio];
    let video = if config.media.iter().any(|entry| entry.video) {
        let video =
            backend.create_object(ObjectClass::VideoOutput, ObjectArgs::default()).await?;
        nodes.push(video);
        Some(video)
    } else {
        None
    };

    backend.start_connection_change(&nodes).await?;
    backend.connect_nodes(media.id(), fader).await?;
    backend.connect_nodes(fader, audio).await?;
    if let Some(video) = video {
        backend.connect_nodes(media.id(), video).await?;
    }
    backend.end_connection_change(&nodes).await?;

    media.set_transition_time(config.playback.transition_time_ms).await?;
    media.set_tick_interval(config.playback.tick_interval_ms).await?;
    media.set_prefinish_mark(config.playback.prefinish_mark_ms).await?;
    Ok(media)
}

fn log_event(media: &MediaObject, event: &MediaEvent) {
    match event {
        MediaEvent::Tick(ms) => debug!(position_ms = ms, "Tick"),
        MediaEvent::CurrentSourceChanged(source) => {
            let metadata = media.metadata();
            let title = metadata.get("TITLE").and_then(|v| v.first()).map_or("", String::as_str);
            info!(%source, title, total_ms = media.total_time(), "Now playing");
        },
        MediaEvent::StateChanged { old, new } => info!(?old, ?new, "State changed"),
        MediaEvent::AboutToFinish | MediaEvent::PrefinishMarkReached(_) => {
            debug!(event = event.name(), "Approaching end of source");
        },
        other => debug!(event = ?other, "Stream event"),
    }
}

async fn drive(
    media: &MediaObject,
    events: &mut mpsc::Receiver<MediaEvent>,
    sources: &[MediaSource],
) -> anyhow::Result<Outcome> {
    let mut played = Vec::new();
    let (first, rest) = sources.split_first().context("empty playlist")?;

    let state = media.set_source_and_wait(first.clone()).await?;
    if state == TransportState::Error {
        return Ok(Outcome::Failed { source: first.to_string(), message: media.error_string() });
    }
    media.enqueue(rest.to_vec()).await?;
    media.play().await?;

    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                return Ok(Outcome::Interrupted);
            },
        };
        let Some(event) = event else {
            bail!("event stream closed before the playlist finished");
        };
        log_event(media, &event);
        match event {
            MediaEvent::CurrentSourceChanged(source) if source.is_valid() => {
                played.push(source.to_string());
            },
            MediaEvent::Finished => return Ok(Outcome::Finished { played }),
            MediaEvent::Error { message, .. } => {
                return Ok(Outcome::Failed { source: media.current_source().to_string(), message });
            },
            _ => {},
        }
    }
}

/// Plays `sources` to the end on a fresh backend.
///
/// # Errors
///
/// Returns an error when the backend cannot be set up or stops unexpectedly.
pub async fn run(config: &Config, sources: &[MediaSource]) -> anyhow::Result<Outcome> {
    let backend = Backend::new(Arc::new(sim_backend(config)), config.engine.to_engine_config());
    for device in backend.audio_devices() {
        debug!(index = device.index, name = %device.name, "Audio device");
    }

    let media = build(&backend, config).await?;
    let mut events = media.subscribe().await?;
    let outcome = drive(&media, &mut events, sources).await;

    if let Err(e) = media.close().await {
        warn!(error = %e, "Failed to close media object");
    }
    backend.shutdown().await?;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MediaEntry;

    fn entry(url: &str, duration_ms: i64) -> MediaEntry {
        MediaEntry {
            url: url.to_string(),
            duration_ms,
            video: false,
            seekable: true,
            startup_delay_ms: 0,
            title: None,
            artist: None,
            fail: None,
        }
    }

    fn config(entries: Vec<MediaEntry>) -> Config {
        Config { media: entries, ..Config::default() }
    }

    #[test]
    fn test_playlist_selection() {
        let config = config(vec![entry("sim://a", 1000), entry("sim://b", 1000)]);
        assert_eq!(
            playlist(&config, &[]).ok(),
            Some(vec![MediaSource::url("sim://a"), MediaSource::url("sim://b")])
        );
        assert_eq!(
            playlist(&config, &["sim://b".to_string()]).ok(),
            Some(vec![MediaSource::url("sim://b")])
        );
        assert!(playlist(&config, &["sim://c".to_string()]).is_err());
        assert!(playlist(&Config::default(), &[]).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_plays_whole_playlist() {
        let config = config(vec![entry("sim://a", 3000), entry("sim://b", 2000)]);
        let sources = playlist(&config, &[]).unwrap_or_default();
        let outcome = run(&config, &sources).await.ok();
        assert_eq!(
            outcome,
            Some(Outcome::Finished { played: vec!["sim://a".to_string(), "sim://b".to_string()] })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reports_open_failure() {
        let broken = MediaEntry { fail: Some("unsupported codec".to_string()), ..entry("sim://x", 0) };
        let config = config(vec![broken]);
        let sources = playlist(&config, &[]).unwrap_or_default();
        let outcome = run(&config, &sources).await.ok();
        assert_eq!(
            outcome,
            Some(Outcome::Failed {
                source: "sim://x".to_string(),
                message: "unsupported codec".to_string(),
            })
        );
    }
}
