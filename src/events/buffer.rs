//! Bounded in-process event log.
//!
//! Repositories publish; the operational endpoints poll. Each event gets a
//! monotonically increasing sequence number, so a poller passes back the
//! last sequence it saw and receives only what it missed. A reader that
//! lags past the buffer's capacity simply resumes from the oldest retained
//! event; nothing blocks on slow readers.

use std::collections::VecDeque;
use std::sync::RwLock;
use tokio::sync::watch;

use crate::events::DomainEvent;

/// Sequence number assigned to a published event. Starts at 1; 0 is the
/// "nothing seen yet" cursor.
pub type EventSeq = u64;

struct Log {
    entries: VecDeque<(EventSeq, DomainEvent)>,
    next_seq: EventSeq,
    capacity: usize,
}

/// Fixed-capacity event log with sequence-cursor reads.
pub struct EventBuffer {
    log: RwLock<Log>,
    latest: watch::Sender<EventSeq>,
}

impl EventBuffer {
    pub fn new(capacity: usize) -> Self {
        let (latest, _) = watch::channel(0);
        Self {
            log: RwLock::new(Log {
                entries: VecDeque::with_capacity(capacity),
                next_seq: 1,
                capacity,
            }),
            latest,
        }
    }

    /// Publish an event, evicting the oldest entry at capacity.
    ///
    /// Returns the sequence number assigned to the event.
    pub fn publish(&self, event: DomainEvent) -> EventSeq {
        let seq = {
            let mut log = self.log.write().expect("event log lock poisoned");
            let seq = log.next_seq;
            log.next_seq += 1;
            while log.entries.len() >= log.capacity {
                log.entries.pop_front();
            }
            log.entries.push_back((seq, event));
            seq
        };
        let _ = self.latest.send(seq);
        seq
    }

    /// Events published after `cursor`, oldest first, up to `limit`.
    ///
    /// Returns the events plus the cursor to pass on the next poll. A
    /// cursor older than the buffer's retention yields the oldest events
    /// still held, so lagged readers recover with a gap instead of an
    /// error.
    pub fn since(&self, cursor: EventSeq, limit: usize) -> (Vec<DomainEvent>, EventSeq) {
        let log = self.log.read().expect("event log lock poisoned");
        let mut next_cursor = cursor;
        let events: Vec<DomainEvent> = log
            .entries
            .iter()
            .filter(|(seq, _)| *seq > cursor)
            .take(limit)
            .map(|(seq, event)| {
                next_cursor = *seq;
                event.clone()
            })
            .collect();
        (events, next_cursor)
    }

    /// The most recent events, oldest first, up to `limit`.
    pub fn tail(&self, limit: usize) -> Vec<DomainEvent> {
        let log = self.log.read().expect("event log lock poisoned");
        let skip = log.entries.len().saturating_sub(limit);
        log.entries
            .iter()
            .skip(skip)
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// Sequence of the newest published event (0 when empty).
    pub fn latest_seq(&self) -> EventSeq {
        *self.latest.borrow()
    }

    /// Watch channel carrying the latest sequence; moves on every publish.
    pub fn watch(&self) -> watch::Receiver<EventSeq> {
        self.latest.subscribe()
    }
}
