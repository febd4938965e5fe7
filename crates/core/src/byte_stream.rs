// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Push-style byte stream used when the application supplies the media bytes.
//!
//! The producer (façade side) pushes chunks with [`ByteStream::write_data`] and
//! never blocks. The consumer is the native engine's read callback, which runs
//! on a blocking thread and waits on a condition variable until enough data is
//! buffered, the producer signals end of data, or the stream is stopped.
//!
//! Requests towards the producer (more data wanted, seek to an offset) are
//! delivered on the [`StreamRequest`] channel returned by [`ByteStream::new`].

use bytes::{Buf, Bytes};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// Requests sent from the consumer side to the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamRequest {
    /// A reader is waiting for more bytes.
    NeedData,
    /// Data must continue from this absolute offset.
    Seek(u64),
}

#[derive(Debug, Default)]
struct Inner {
    buffers: VecDeque<Bytes>,
    buffered: usize,
    /// Absolute offset of the first buffered byte.
    position: u64,
    size: Option<u64>,
    seekable: bool,
    eod: bool,
    stopped: bool,
    error: Option<String>,
    pause_for_buffering: bool,
    need_data_sent: bool,
}

impl Inner {
    fn take_into(&mut self, out: &mut [u8]) -> usize {
        let mut written = 0;
        while written < out.len() {
            let Some(front) = self.buffers.front_mut() else {
                break;
            };
            let n = front.len().min(out.len() - written);
            out[written..written + n].copy_from_slice(&front[..n]);
            front.advance(n);
            if front.is_empty() {
                self.buffers.pop_front();
            }
            written += n;
        }
        self.buffered -= written;
        self.position += written as u64;
        written
    }

    fn discard(&mut self, mut count: usize) {
        self.buffered -= count;
        self.position += count as u64;
        while count > 0 {
            let Some(front) = self.buffers.front_mut() else {
                break;
            };
            let n = front.len().min(count);
            front.advance(n);
            if front.is_empty() {
                self.buffers.pop_front();
            }
            count -= n;
        }
    }

    fn find(&self, delimiter: u8) -> Option<usize> {
        self.buffers.iter().flat_map(|b| b.iter()).position(|&byte| byte == delimiter)
    }
}

/// Application-fed byte stream shared between a producer and a native reader.
#[derive(Debug)]
pub struct ByteStream {
    id: u64,
    inner: Mutex<Inner>,
    data_ready: Condvar,
    requests: mpsc::UnboundedSender<StreamRequest>,
    buffering: watch::Sender<bool>,
}

impl ByteStream {
    /// Creates a stream and the channel on which it reports requests to the producer.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<StreamRequest>) {
        let (requests, rx) = mpsc::unbounded_channel();
        let (buffering, _) = watch::channel(false);
        let stream = Self {
            id: NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed),
            inner: Mutex::new(Inner::default()),
            data_ready: Condvar::new(),
            requests,
            buffering,
        };
        (Arc::new(stream), rx)
    }

    pub const fn id(&self) -> u64 {
        self.id
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn request(&self, request: StreamRequest) {
        // A producer that stopped listening simply no longer gets requests.
        let _ = self.requests.send(request);
    }

    // --- Producer side ---

    pub fn write_data(&self, data: Bytes) {
        if data.is_empty() {
            return;
        }
        let mut inner = self.lock();
        if inner.stopped || inner.eod {
            tracing::debug!(stream = self.id, "Dropping data written after end of stream");
            return;
        }
        inner.buffered += data.len();
        inner.buffers.push_back(data);
        inner.need_data_sent = false;
        drop(inner);
        self.buffering.send_if_modified(|b| std::mem::replace(b, false));
        self.data_ready.notify_all();
    }

    pub fn end_of_data(&self) {
        self.lock().eod = true;
        self.data_ready.notify_all();
    }

    /// Ends the stream with a producer-side failure so readers return promptly.
    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(stream = self.id, error = %message, "Byte stream producer failed");
        let mut inner = self.lock();
        inner.error = Some(message);
        inner.eod = true;
        drop(inner);
        self.data_ready.notify_all();
    }

    pub fn set_stream_size(&self, size: u64) {
        self.lock().size = Some(size);
    }

    pub fn set_stream_seekable(&self, seekable: bool) {
        self.lock().seekable = seekable;
    }

    /// When enabled, a reader that runs dry flags the stream as buffering.
    pub fn set_pause_for_buffering(&self, enabled: bool) {
        self.lock().pause_for_buffering = enabled;
    }

    // --- Consumer side ---

    pub fn size(&self) -> Option<u64> {
        self.lock().size
    }

    pub fn is_seekable(&self) -> bool {
        self.lock().seekable
    }

    pub fn position(&self) -> u64 {
        self.lock().position
    }

    pub fn buffered(&self) -> usize {
        self.lock().buffered
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    /// Observes the buffering flag raised by starved readers.
    pub fn watch_buffering(&self) -> watch::Receiver<bool> {
        self.buffering.subscribe()
    }

    /// Wakes every blocked reader; subsequent reads return 0 bytes.
    pub fn stop(&self) {
        self.lock().stopped = true;
        self.data_ready.notify_all();
    }

    fn wait<'a>(&'a self, mut inner: MutexGuard<'a, Inner>) -> MutexGuard<'a, Inner> {
        if !inner.need_data_sent {
            inner.need_data_sent = true;
            self.request(StreamRequest::NeedData);
        }
        if inner.pause_for_buffering {
            self.buffering.send_if_modified(|b| !std::mem::replace(b, true));
        }
        self.data_ready.wait(inner).unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks until `out` can be filled, end of data, or stop.
    ///
    /// Returns the number of bytes copied; 0 after [`stop`](Self::stop) or at the
    /// end of the stream.
    pub fn read(&self, out: &mut [u8]) -> usize {
        let mut inner = self.lock();
        loop {
            if inner.stopped {
                return 0;
            }
            if inner.buffered >= out.len() || inner.eod {
                return inner.take_into(out);
            }
            inner = self.wait(inner);
        }
    }

    /// Blocks until a `delimiter` byte is buffered and returns everything up to and
    /// including it.
    ///
    /// # Errors
    ///
    /// - `Interrupted` when the stream is stopped while waiting
    /// - `UnexpectedEof` when the data ends before the delimiter
    /// - `InvalidData` when `max` bytes pass without a delimiter
    pub fn read_until(&self, delimiter: u8, max: usize) -> io::Result<Vec<u8>> {
        let mut inner = self.lock();
        loop {
            if inner.stopped {
                return Err(io::Error::new(io::ErrorKind::Interrupted, "byte stream stopped"));
            }
            if let Some(index) = inner.find(delimiter) {
                let mut line = vec![0; index + 1];
                inner.take_into(&mut line);
                return Ok(line);
            }
            if inner.buffered >= max {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "delimiter not found"));
            }
            if inner.eod {
                let reason = inner.error.clone().unwrap_or_else(|| "end of data".to_string());
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, reason));
            }
            inner = self.wait(inner);
        }
    }

    /// Moves the read position to `offset`.
    ///
    /// Seeking inside the buffered window discards bytes; otherwise the buffer is
    /// cleared and the producer is asked to continue from `offset`.
    ///
    /// # Errors
    ///
    /// Returns `Unsupported` when the target is outside the buffer and the
    /// producer declared the stream non-seekable.
    pub fn seek(&self, offset: u64) -> io::Result<u64> {
        let mut inner = self.lock();
        let window_end = inner.position + inner.buffered as u64;
        if offset >= inner.position && offset <= window_end {
            let skip = usize::try_from(offset - inner.position)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
            inner.discard(skip);
            return Ok(offset);
        }
        if !inner.seekable {
            return Err(io::Error::new(io::ErrorKind::Unsupported, "byte stream is not seekable"));
        }
        inner.buffers.clear();
        inner.buffered = 0;
        inner.position = offset;
        inner.eod = false;
        inner.need_data_sent = false;
        drop(inner);
        tracing::debug!(stream = self.id, offset, "Requesting producer seek");
        self.request(StreamRequest::Seek(offset));
        Ok(offset)
    }
}
