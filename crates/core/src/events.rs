// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Notifications a stream emits towards its façade.
//!
//! Events are delivered best-effort: the engine actor never blocks on a slow
//! subscriber. A subscriber whose channel is momentarily full loses that event;
//! a subscriber whose receiver was dropped is removed.

use crate::state::{ErrorKind, TransportState};
use crate::types::{MediaSource, MetaData};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    StateChanged { old: TransportState, new: TransportState },
    /// Current playback position in milliseconds.
    Tick(i64),
    Finished,
    AboutToFinish,
    /// Remaining time in milliseconds when the prefinish mark was crossed.
    PrefinishMarkReached(i64),
    TotalTimeChanged(i64),
    MetaDataChanged(MetaData),
    BufferStatus(u8),
    SeekableChanged(bool),
    HasVideoChanged(bool),
    CurrentSourceChanged(MediaSource),
    Error { kind: ErrorKind, message: String },
}

impl MediaEvent {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "state_changed",
            Self::Tick(_) => "tick",
            Self::Finished => "finished",
            Self::AboutToFinish => "about_to_finish",
            Self::PrefinishMarkReached(_) => "prefinish_mark_reached",
            Self::TotalTimeChanged(_) => "total_time_changed",
            Self::MetaDataChanged(_) => "meta_data_changed",
            Self::BufferStatus(_) => "buffer_status",
            Self::SeekableChanged(_) => "seekable_changed",
            Self::HasVideoChanged(_) => "has_video_changed",
            Self::CurrentSourceChanged(_) => "current_source_changed",
            Self::Error { .. } => "error",
        }
    }
}

/// Fan-out of [`MediaEvent`]s to any number of subscribers.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Vec<mpsc::Sender<MediaEvent>>,
}

impl EventBus {
    pub const fn new() -> Self {
        Self { subscribers: Vec::new() }
    }

    /// Registers a new subscriber and returns its receiving end.
    pub fn subscribe(&mut self, capacity: usize) -> mpsc::Receiver<MediaEvent> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.subscribers.push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn emit(&mut self, event: &MediaEvent) {
        self.subscribers.retain(|subscriber| match subscriber.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(event = event.name(), "Event subscriber lagging, event dropped");
                true
            },
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_reaches_all_subscribers() {
        let mut bus = EventBus::new();
        let mut a = bus.subscribe(4);
        let mut b = bus.subscribe(4);

        bus.emit(&MediaEvent::Tick(40));

        assert_eq!(a.recv().await, Some(MediaEvent::Tick(40)));
        assert_eq!(b.recv().await, Some(MediaEvent::Tick(40)));
    }

    #[tokio::test]
    async fn test_closed_subscriber_is_removed() {
        let mut bus = EventBus::new();
        let rx = bus.subscribe(1);
        let mut kept = bus.subscribe(1);
        drop(rx);

        bus.emit(&MediaEvent::Finished);
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(kept.recv().await, Some(MediaEvent::Finished));

        // Full channel keeps the subscriber.
        bus.emit(&MediaEvent::Finished);
        bus.emit(&MediaEvent::AboutToFinish);
        assert_eq!(bus.subscriber_count(), 1);
    }
}
