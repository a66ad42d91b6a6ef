//! Outbound buffer - holds envelopes produced while the log server connection is down.
//!
//! The buffer is bounded by time, not by count: once the grace window armed at
//! disconnection runs out, everything held is discarded in one swap. Envelopes
//! offered while no grace window is armed are declined, so in steady connected
//! state nothing round-trips through storage.
//!
//! Control flow:
//! 1. Connection lost -> `arm_grace()` starts the grace timer.
//! 2. Envelopes arrive -> `enqueue()` appends them in arrival order.
//! 3. a. Reconnected before expiry -> `cancel_grace()` then `drain_and_clear()`;
//!    the drained backlog is sent before any live envelope.
//!    b. Timer fires first -> the held envelopes are dropped and the buffer
//!    stops accepting until the next disconnection arms it again.

// Local crates
use crate::metrics::metrics::{
    BUFFER_DEPTH, BUFFER_DISCARDS_TOTAL, ENVELOPES_BUFFERED_TOTAL, ENVELOPES_DROPPED_TOTAL,
};
use crate::models::envelope::Envelope;

// External crates
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Outcome of [`OutboundBuffer::enqueue`].
#[derive(Debug, PartialEq)]
pub enum Enqueued {
    /// Held until the next drain.
    Buffered,
    /// No grace window armed; the caller decides what to do with it.
    Declined(Envelope),
}

#[derive(Debug, Default)]
struct BufferState {
    pending: VecDeque<Envelope>,
    grace: Option<CancellationToken>,
}

/// Shared, clonable handle to the outbound buffer. All operations take the
/// same lock, so a grace expiry and a concurrent enqueue are strictly ordered.
#[derive(Debug, Clone)]
pub struct OutboundBuffer {
    inner: Arc<Mutex<BufferState>>,
    grace_period: Duration,
}

impl OutboundBuffer {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BufferState::default())),
            grace_period,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append in arrival order while a grace window is armed.
    pub fn enqueue(&self, envelope: Envelope) -> Enqueued {
        let mut state = self.lock();
        if state.grace.is_none() {
            return Enqueued::Declined(envelope);
        }

        state.pending.push_back(envelope);
        ENVELOPES_BUFFERED_TOTAL.inc();
        BUFFER_DEPTH.set(state.pending.len() as i64);
        Enqueued::Buffered
    }

    /// Put a partially transmitted backlog back at the head of the buffer,
    /// ahead of anything enqueued since it was drained.
    pub fn requeue_front(&self, envelopes: Vec<Envelope>) {
        if envelopes.is_empty() {
            return;
        }

        let mut state = self.lock();
        for envelope in envelopes.into_iter().rev() {
            state.pending.push_front(envelope);
        }
        BUFFER_DEPTH.set(state.pending.len() as i64);
    }

    /// Take everything held, oldest first, leaving the buffer empty.
    pub fn drain_and_clear(&self) -> Vec<Envelope> {
        let mut state = self.lock();
        let drained: Vec<Envelope> = std::mem::take(&mut state.pending).into();
        BUFFER_DEPTH.set(0);
        drained
    }

    /// Start the grace timer. A no-op when a window is already armed, so the
    /// original disconnection time bounds how long data is held.
    ///
    /// Must be called from within a tokio runtime.
    #[instrument(name = "pipeline::buffer::arm_grace", skip_all, level = "debug")]
    pub fn arm_grace(&self) {
        let token = {
            let mut state = self.lock();
            if state.grace.is_some() {
                return;
            }
            let token = CancellationToken::new();
            state.grace = Some(token.clone());
            token
        };

        debug!(grace_period = ?self.grace_period, "Grace window armed");

        let inner = Arc::clone(&self.inner);
        let grace_period = self.grace_period;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(grace_period) => {
                    let mut state = inner.lock().unwrap_or_else(PoisonError::into_inner);
                    // a cancel racing the timer wins if it took the lock first
                    if token.is_cancelled() {
                        return;
                    }
                    let discarded = std::mem::take(&mut state.pending).len();
                    state.grace = None;
                    BUFFER_DEPTH.set(0);
                    BUFFER_DISCARDS_TOTAL.inc();
                    ENVELOPES_DROPPED_TOTAL.inc_by(discarded as u64);
                    info!(discarded, "Grace window expired, outbound buffer discarded");
                }
            }
        });
    }

    /// Stop the grace timer without touching held envelopes.
    pub fn cancel_grace(&self) {
        let mut state = self.lock();
        if let Some(token) = state.grace.take() {
            token.cancel();
            debug!(held = state.pending.len(), "Grace window cancelled");
        }
    }

    pub fn is_armed(&self) -> bool {
        self.lock().grace.is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRACE: Duration = Duration::from_secs(120);

    fn line(n: usize) -> Envelope {
        Envelope::Line {
            timestamp: n as i64,
            line: format!("line {n}"),
            file: "/var/log/app.log".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn declines_when_no_grace_window_is_armed() {
        let buffer = OutboundBuffer::new(GRACE);

        assert_eq!(buffer.enqueue(line(1)), Enqueued::Declined(line(1)));
        assert!(buffer.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn drain_preserves_order_and_later_enqueues_follow() {
        let buffer = OutboundBuffer::new(GRACE);
        buffer.arm_grace();

        for n in 0..3 {
            assert_eq!(buffer.enqueue(line(n)), Enqueued::Buffered);
        }
        let first = buffer.drain_and_clear();
        buffer.enqueue(line(3));
        let second = buffer.drain_and_clear();

        assert_eq!(first, vec![line(0), line(1), line(2)]);
        assert_eq!(second, vec![line(3)]);
        assert!(buffer.drain_and_clear().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_discards_everything_held() {
        let buffer = OutboundBuffer::new(GRACE);
        buffer.arm_grace();
        buffer.enqueue(line(1));
        buffer.enqueue(line(2));

        tokio::time::sleep(GRACE + Duration::from_secs(1)).await;

        assert!(!buffer.is_armed());
        assert!(buffer.drain_and_clear().is_empty());
        assert!(matches!(buffer.enqueue(line(3)), Enqueued::Declined(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_expiry_keeps_envelopes() {
        let buffer = OutboundBuffer::new(GRACE);
        buffer.arm_grace();
        buffer.enqueue(line(1));
        buffer.enqueue(line(2));

        tokio::time::sleep(GRACE / 2).await;
        buffer.cancel_grace();
        tokio::time::sleep(GRACE * 2).await;

        assert_eq!(buffer.drain_and_clear(), vec![line(1), line(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_does_not_extend_the_window() {
        let buffer = OutboundBuffer::new(GRACE);
        buffer.arm_grace();
        buffer.enqueue(line(1));

        tokio::time::sleep(GRACE - Duration::from_secs(10)).await;
        buffer.arm_grace();
        tokio::time::sleep(Duration::from_secs(11)).await;

        assert!(buffer.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn requeued_backlog_goes_ahead_of_newer_envelopes() {
        let buffer = OutboundBuffer::new(GRACE);
        buffer.arm_grace();
        buffer.enqueue(line(0));
        buffer.enqueue(line(1));

        let mut backlog = buffer.drain_and_clear();
        let unsent = backlog.split_off(1);
        buffer.enqueue(line(2));
        buffer.requeue_front(unsent);

        assert_eq!(buffer.drain_and_clear(), vec![line(1), line(2)]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_enqueues_are_neither_lost_nor_duplicated() {
        let buffer = OutboundBuffer::new(GRACE);
        buffer.arm_grace();

        let mut handles = Vec::new();
        for producer in 0..4 {
            let buffer = buffer.clone();
            handles.push(tokio::spawn(async move {
                for n in 0..250 {
                    buffer.enqueue(line(producer * 1000 + n));
                    tokio::task::yield_now().await;
                }
            }));
        }

        let mut drained = Vec::new();
        while handles.iter().any(|h| !h.is_finished()) {
            drained.extend(buffer.drain_and_clear());
            tokio::task::yield_now().await;
        }
        for handle in handles {
            handle.await.unwrap();
        }
        drained.extend(buffer.drain_and_clear());

        assert_eq!(drained.len(), 1000);
        for producer in 0..4 {
            let own: Vec<i64> = drained
                .iter()
                .map(Envelope::timestamp)
                .filter(|ts| *ts / 1000 == producer)
                .collect();
            assert!(own.windows(2).all(|w| w[0] < w[1]), "producer {producer} out of order");
            assert_eq!(own.len(), 250);
        }
    }
}
