//! # Audio Sink
//!
//! Append-only hand-off between the scheduler (producer) and whatever drains
//! audio for output (consumer, usually another thread).
//!
//! ```text
//! ┌───────────┐ append ┌─────────────────┐ drain ┌──────────────┐
//! │ Scheduler │───────►│ SharedAudioSink │──────►│ Output device│
//! └───────────┘        └─────────────────┘       └──────────────┘
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::chunk::AudioFormat;

/// Receives decoded audio in host byte order, channels interleaved.
pub trait AudioSink: Send {
    /// Start a stream. `buffer_bytes` bounds how much may be queued.
    fn open_stream(&mut self, format: AudioFormat, buffer_bytes: usize);

    fn is_active(&self) -> bool;

    fn append(&mut self, samples: &[i16]);

    fn close_stream(&mut self);
}

// ============================================================================
// SharedAudioSink
// ============================================================================

#[derive(Debug, Default)]
struct SinkState {
    format: Option<AudioFormat>,
    queue: VecDeque<i16>,
    capacity: usize,
}

#[derive(Debug, Default)]
struct SinkInner {
    state: Mutex<SinkState>,
    ready: Condvar,
    appended: AtomicU64,
    dropped: AtomicU64,
}

/// Cloneable sink: clones share one queue.
#[derive(Debug, Clone, Default)]
pub struct SharedAudioSink {
    inner: Arc<SinkInner>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkStats {
    pub queued: usize,
    pub total_appended: u64,
    /// Samples discarded because the queue was full
    pub total_dropped: u64,
}

impl SharedAudioSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn format(&self) -> Option<AudioFormat> {
        self.inner.state.lock().format
    }

    /// Move up to `out.len()` queued samples into `out`.
    pub fn drain(&self, out: &mut [i16]) -> usize {
        let mut state = self.inner.state.lock();
        let n = out.len().min(state.queue.len());
        for (slot, sample) in out.iter_mut().zip(state.queue.drain(..n)) {
            *slot = sample;
        }
        n
    }

    /// Like [`drain`](Self::drain), waiting up to `timeout` for data.
    pub fn drain_blocking(&self, out: &mut [i16], timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while state.queue.is_empty() && state.format.is_some() {
            if self.inner.ready.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        let n = out.len().min(state.queue.len());
        for (slot, sample) in out.iter_mut().zip(state.queue.drain(..n)) {
            *slot = sample;
        }
        n
    }

    pub fn stats(&self) -> SinkStats {
        SinkStats {
            queued: self.inner.state.lock().queue.len(),
            total_appended: self.inner.appended.load(Ordering::Relaxed),
            total_dropped: self.inner.dropped.load(Ordering::Relaxed),
        }
    }
}

impl AudioSink for SharedAudioSink {
    fn open_stream(&mut self, format: AudioFormat, buffer_bytes: usize) {
        let mut state = self.inner.state.lock();
        state.format = Some(format);
        state.capacity = (buffer_bytes / 2).max(1);
        state.queue.clear();
        tracing::info!(
            "Audio stream opened: {} Hz, {} channel(s), {} byte buffer",
            format.sample_rate,
            format.channels,
            buffer_bytes
        );
    }

    fn is_active(&self) -> bool {
        self.inner.state.lock().format.is_some()
    }

    fn append(&mut self, samples: &[i16]) {
        let mut state = self.inner.state.lock();
        if state.format.is_none() {
            return;
        }
        state.queue.extend(samples.iter().copied());
        let overflow = state.queue.len().saturating_sub(state.capacity);
        if overflow > 0 {
            state.queue.drain(..overflow);
            self.inner.dropped.fetch_add(overflow as u64, Ordering::Relaxed);
            tracing::warn!("Audio queue full, dropped {} samples", overflow);
        }
        self.inner.appended.fetch_add(samples.len() as u64, Ordering::Relaxed);
        self.inner.ready.notify_all();
    }

    fn close_stream(&mut self) {
        let mut state = self.inner.state.lock();
        if state.format.take().is_some() {
            state.queue.clear();
            tracing::debug!("Audio stream closed");
        }
        self.inner.ready.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const STEREO: AudioFormat = AudioFormat {
        sample_rate: 22050,
        channels: 2,
    };

    #[test]
    fn ignores_appends_without_stream() {
        let mut sink = SharedAudioSink::new();
        sink.append(&[1, 2, 3]);
        assert!(!sink.is_active());
        assert_eq!(sink.stats().queued, 0);
    }

    #[test]
    fn drains_in_order() {
        let mut sink = SharedAudioSink::new();
        sink.open_stream(STEREO, 1000);
        sink.append(&[1, 2, 3]);
        sink.append(&[4, 5]);

        let mut out = [0i16; 4];
        assert_eq!(sink.drain(&mut out), 4);
        assert_eq!(out, [1, 2, 3, 4]);
        assert_eq!(sink.drain(&mut out), 1);
        assert_eq!(out[0], 5);
        assert_eq!(sink.stats().total_appended, 5);
    }

    #[test]
    fn drops_oldest_when_full() {
        let mut sink = SharedAudioSink::new();
        sink.open_stream(STEREO, 8); // 4 samples
        sink.append(&[1, 2, 3, 4, 5, 6]);

        let mut out = [0i16; 8];
        assert_eq!(sink.drain(&mut out), 4);
        assert_eq!(&out[..4], &[3, 4, 5, 6]);
        assert_eq!(sink.stats().total_dropped, 2);
    }

    #[test]
    fn feeds_another_thread() {
        let mut producer = SharedAudioSink::new();
        producer.open_stream(STEREO, 1 << 16);
        let consumer = producer.clone();

        let handle = thread::spawn(move || {
            let mut total = 0;
            let mut buf = [0i16; 64];
            while total < 300 {
                total += consumer.drain_blocking(&mut buf, Duration::from_secs(2));
            }
            total
        });

        for chunk in vec![7i16; 300].chunks(50) {
            producer.append(chunk);
        }
        assert_eq!(handle.join().unwrap(), 300);
    }

    #[test]
    fn close_discards_queue() {
        let mut sink = SharedAudioSink::new();
        sink.open_stream(STEREO, 100);
        sink.append(&[1, 2]);
        sink.close_stream();
        assert!(!sink.is_active());
        assert_eq!(sink.stats().queued, 0);
        assert_eq!(sink.drain_blocking(&mut [0i16; 2], Duration::from_millis(10)), 0);
    }
}
