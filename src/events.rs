use crate::sensor::RangeReading;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;

pub type ChannelId = i32;

/// The single ranging channel this driver exposes.
pub const PROXIMITY_CHANNEL: ChannelId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistanceEvent {
    pub channel: ChannelId,
    pub distance: u16,
    /// Monotonic time since the emitter was created.
    pub timestamp: Duration,
    /// 1-based count of samples emitted so far on this channel.
    pub sequence: u64,
}

pub type EventReceiver = watch::Receiver<Option<DistanceEvent>>;

/// Producer side of the distance channel: a single-slot mailbox that always
/// holds the newest sample, so a slow consumer only ever sees the latest one.
#[derive(Debug)]
pub struct EventEmitter {
    channel: ChannelId,
    tx: watch::Sender<Option<DistanceEvent>>,
    sequence: AtomicU64,
    epoch: Instant,
}

impl EventEmitter {
    pub fn new(channel: ChannelId) -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            channel,
            tx,
            sequence: AtomicU64::new(0),
            epoch: Instant::now(),
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.tx.subscribe()
    }

    pub fn emit(&self, reading: RangeReading) -> DistanceEvent {
        let event = DistanceEvent {
            channel: self.channel,
            distance: reading.value(),
            timestamp: self.epoch.elapsed(),
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed) + 1,
        };
        // No subscriber is not an error: the sample simply is not observed.
        self.tx.send_replace(Some(event));
        event
    }

    pub fn emitted(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    pub fn latest(&self) -> Option<DistanceEvent> {
        *self.tx.borrow()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(PROXIMITY_CHANNEL)
    }
}
