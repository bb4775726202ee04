//! Outbound delivery queues
//!
//! Encoded signaling messages are not handed to the application while the
//! signaling channel is reconnecting. Each [`OutboundQueue`] buffers them and
//! releases them in FIFO order, exactly once, once the shared
//! [`ReconnectGate`] opens again. Released messages go to an unbounded
//! [`OutboundSink`]; a message the sink refuses stays buffered.
//!
//! Two policies exist. Control messages use [`DeliveryPolicy::Backoff`]: while
//! the gate is closed a timer re-checks it with exponentially growing delays.
//! State-sync messages use [`DeliveryPolicy::Passive`]: nothing happens until
//! the next enqueue or an explicit [`OutboundQueue::flush`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Where released messages go; the receiving half belongs to the application
pub type OutboundSink = mpsc::UnboundedSender<Bytes>;

/// Which outbound queue a message belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryClass {
    /// Session control: connect, offers, candidates, renegotiation requests
    Control,
    /// High-frequency state sync: metadata, bitrates, variant requests
    StateSync,
}

/// Configuration for the retry timer of a backoff queue
///
/// The n-th retry waits `initial_delay * backoff_multiplier^(2 * attempt)`,
/// where `attempt` doubles on every retry (0, 1, 2, 4, ...), capped at
/// `max_delay`.
///
/// ```rust
/// use meshroom_client_core::RetryConfig;
/// use std::time::Duration;
///
/// let config = RetryConfig { use_jitter: false, ..RetryConfig::default() };
/// assert_eq!(config.delay_for(0), Duration::from_millis(100));
/// assert_eq!(config.delay_for(1), Duration::from_millis(400));
/// assert_eq!(config.delay_for(2), Duration::from_millis(1600));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay before the first re-check
    pub initial_delay: Duration,
    /// Maximum delay between re-checks
    pub max_delay: Duration,
    /// Base of the exponential growth
    pub backoff_multiplier: f64,
    /// Whether to add ±10% jitter to delays
    pub use_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Delay before the re-check following `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_mul(2)).unwrap_or(i32::MAX);
        let millis = self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);

        let actual = if self.use_jitter {
            let jitter = (rand::random::<f64>() - 0.5) * 0.2;
            capped * (1.0 + jitter)
        } else {
            capped
        };
        Duration::from_millis(actual.max(0.0) as u64)
    }
}

/// Delivery behavior while the gate is closed
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryPolicy {
    Backoff(RetryConfig),
    Passive,
}

/// Shared "signaling is reconnecting" flag
#[derive(Debug, Clone, Default)]
pub struct ReconnectGate(Arc<AtomicBool>);

impl ReconnectGate {
    pub fn is_reconnecting(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set_reconnecting(&self, reconnecting: bool) {
        self.0.store(reconnecting, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct QueueState {
    buffer: VecDeque<Bytes>,
    retry_scheduled: bool,
    attempt: u32,
}

/// FIFO buffer of encoded outbound messages
pub struct OutboundQueue {
    name: &'static str,
    policy: DeliveryPolicy,
    gate: ReconnectGate,
    sink: OutboundSink,
    state: Mutex<QueueState>,
    this: Weak<OutboundQueue>,
}

impl OutboundQueue {
    pub fn new(
        name: &'static str,
        policy: DeliveryPolicy,
        gate: ReconnectGate,
        sink: OutboundSink,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            name,
            policy,
            gate,
            sink,
            state: Mutex::new(QueueState::default()),
            this: this.clone(),
        })
    }

    /// Append a message and try to deliver everything buffered
    pub fn enqueue(&self, payload: Bytes) {
        let mut state = self.lock_state();
        state.buffer.push_back(payload);
        self.drain(&mut state);
    }

    /// Re-drive delivery without adding anything
    pub fn flush(&self) {
        let mut state = self.lock_state();
        self.drain(&mut state);
    }

    /// Number of messages waiting for delivery
    pub fn buffered(&self) -> usize {
        self.lock_state().buffer.len()
    }

    /// Drop everything buffered
    pub fn clear(&self) {
        let mut state = self.lock_state();
        state.buffer.clear();
        state.attempt = 0;
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn drain(&self, state: &mut QueueState) {
        if state.buffer.is_empty() {
            return;
        }

        if self.gate.is_reconnecting() {
            debug!(queue = self.name, buffered = state.buffer.len(), "Deferring delivery while reconnecting");
            self.schedule_retry(state);
            return;
        }

        while let Some(payload) = state.buffer.pop_front() {
            if let Err(mpsc::error::SendError(payload)) = self.sink.send(payload) {
                warn!(queue = self.name, "Outbound receiver is gone, keeping messages buffered");
                state.buffer.push_front(payload);
                return;
            }
        }
        state.attempt = 0;
    }

    fn schedule_retry(&self, state: &mut QueueState) {
        let DeliveryPolicy::Backoff(retry) = &self.policy else {
            return;
        };
        if state.retry_scheduled {
            return;
        }
        let Ok(handle) = Handle::try_current() else {
            warn!(queue = self.name, "No runtime available, waiting for an explicit flush");
            return;
        };

        let delay = retry.delay_for(state.attempt);
        state.attempt = state.attempt.saturating_mul(2).max(1);
        state.retry_scheduled = true;

        let queue = self.this.clone();
        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(queue) = queue.upgrade() {
                queue.on_retry_timer();
            }
        });
    }

    fn on_retry_timer(&self) {
        let mut state = self.lock_state();
        state.retry_scheduled = false;
        self.drain(&mut state);
    }
}

impl std::fmt::Debug for OutboundQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundQueue")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("buffered", &self.buffered())
            .finish()
    }
}
