//! Underrun notification
//!
//! Raised by the audio thread when a channel buffer cannot supply a full
//! cycle. Raising never blocks: the occurrence counter is bumped, then each
//! subscriber gets a `try_send`. If the subscriber list is being modified
//! at that moment the notification is skipped, the counter is not.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::RwLock;

/// Pending notifications a subscriber can hold before new ones are dropped
pub const UNDERRUN_QUEUE_DEPTH: usize = 16;

/// Payload-free underrun occurrence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Underrun;

#[derive(Debug)]
struct Subscriber {
    tx: Sender<Underrun>,
    /// Set by `raise` once the receiver is gone
    gone: AtomicBool,
}

#[derive(Debug, Default)]
pub struct UnderrunSignal {
    count: AtomicU64,
    dropped: AtomicU64,
    subscribers: RwLock<Vec<Subscriber>>,
}

impl UnderrunSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Audio-thread safe
    pub fn raise(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);

        let Some(subscribers) = self.subscribers.try_read() else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };
        for sub in subscribers.iter() {
            match sub.tx.try_send(Underrun) {
                Ok(()) => {}
                Err(TrySendError::Disconnected(_)) => sub.gone.store(true, Ordering::Relaxed),
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    /// New observer. Forgets subscribers a previous `raise` found
    /// disconnected. Not for the audio thread.
    pub fn subscribe(&self) -> Receiver<Underrun> {
        let (tx, rx) = bounded(UNDERRUN_QUEUE_DEPTH);
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|s| !s.gone.load(Ordering::Relaxed));
        subscribers.push(Subscriber {
            tx,
            gone: AtomicBool::new(false),
        });
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Total underruns since creation
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Notifications that could not be delivered
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
