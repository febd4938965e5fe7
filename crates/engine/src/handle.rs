// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Client handle for a running engine actor.

use crate::messages::{EngineMessage, QueryMessage, StreamCommand};
use mediagraph_core::{MediaEvent, MediaGraphError, NodeId, Result};
use std::sync::Arc;
use tokio::sync::mpsc;

/// A handle to communicate with a running engine actor.
#[derive(Clone)]
pub struct EngineHandle {
    control_tx: mpsc::Sender<EngineMessage>,
    engine_task: Arc<tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl EngineHandle {
    pub(crate) fn new(
        control_tx: mpsc::Sender<EngineMessage>,
        engine_task: tokio::task::JoinHandle<()>,
    ) -> Self {
        Self { control_tx, engine_task: Arc::new(tokio::sync::Mutex::new(Some(engine_task))) }
    }

    /// Sends a message to the engine.
    ///
    /// # Errors
    ///
    /// Returns [`MediaGraphError::Shutdown`] if the engine actor has shut down.
    pub(crate) async fn send(&self, msg: EngineMessage) -> Result<()> {
        self.control_tx.send(msg).await.map_err(|_| MediaGraphError::Shutdown)
    }

    pub(crate) async fn command(&self, stream: NodeId, command: StreamCommand) -> Result<()> {
        self.send(EngineMessage::Stream { stream, command }).await
    }

    async fn query<T>(
        &self,
        build: impl FnOnce(mpsc::Sender<T>) -> QueryMessage,
    ) -> Result<T> {
        let (response_tx, mut response_rx) = mpsc::channel(1);
        self.send(EngineMessage::Query(build(response_tx))).await?;
        response_rx.recv().await.ok_or_else(|| {
            MediaGraphError::Engine("Failed to receive response from engine".to_string())
        })
    }

    /// Asks the engine whether `stream` currently carries video.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine actor has shut down or does not know the stream.
    pub async fn has_video(&self, stream: NodeId) -> Result<bool> {
        self.query(|response_tx| QueryMessage::HasVideo { stream, response_tx }).await
    }

    /// Asks the engine whether `stream` is seekable.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine actor has shut down or does not know the stream.
    pub async fn is_seekable(&self, stream: NodeId) -> Result<bool> {
        self.query(|response_tx| QueryMessage::IsSeekable { stream, response_tx }).await
    }

    /// Subscribes to the notifications of `stream`.
    /// Returns a receiver that will receive all subsequent events.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine actor has shut down or does not know the stream.
    pub async fn subscribe(&self, stream: NodeId) -> Result<mpsc::Receiver<MediaEvent>> {
        self.query(|response_tx| QueryMessage::Subscribe { stream, response_tx }).await
    }

    /// Sends a shutdown signal to the engine and waits for it to complete.
    /// Every stream is torn down before the actor exits.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The engine fails to shut down within 10 seconds
    /// - The engine task panicked during shutdown
    #[allow(clippy::cognitive_complexity)]
    pub async fn shutdown_and_wait(&self) -> Result<()> {
        // The actor may already be gone; joining below still reports how it ended.
        let _ = self.send(EngineMessage::Shutdown).await;

        let join_handle = {
            let mut task_guard = self.engine_task.lock().await;
            task_guard.take()
        };

        let Some(handle) = join_handle else {
            tracing::warn!("shutdown_and_wait called multiple times, engine already shut down");
            return Ok(());
        };

        match tokio::time::timeout(std::time::Duration::from_secs(10), handle).await {
            Ok(Ok(())) => {
                tracing::debug!("Engine shut down gracefully");
                Ok(())
            },
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Engine task panicked during shutdown");
                Err(MediaGraphError::Engine(format!("Engine task panicked: {e}")))
            },
            Err(_) => {
                tracing::warn!("Engine did not shut down within 10s timeout");
                Err(MediaGraphError::Engine("Engine shutdown timeout".to_string()))
            },
        }
    }
}
