//! Reliable delivery bookkeeping.
//!
//! [`ReliabilityTracker`] holds every unacknowledged reliable wire packet and
//! decides when to resend or give up. [`OrderedBuffer`] holds ordered packets
//! that arrived ahead of a gap until the gap fills or is declared lost.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// An unacknowledged reliable wire packet.
#[derive(Debug, Clone)]
pub struct ReliableEntry {
    pub sequence: u32,
    pub bytes: Vec<u8>,
    pub packet_type: u16,
    pub priority: bool,
    pub sent_at: Instant,
    pub retries: u32,
}

/// A wire packet due for resending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retransmit {
    pub sequence: u32,
    pub bytes: Vec<u8>,
    /// Retry count after this resend
    pub retries: u32,
}

/// A reliable packet that ran out of retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exhausted {
    pub sequence: u32,
    pub packet_type: u16,
}

#[derive(Debug, Default)]
pub struct RetransmitPoll {
    /// Priority entries first, then by sequence
    pub resend: Vec<Retransmit>,
    pub exhausted: Vec<Exhausted>,
}

/// Send-side reliability state for one connection.
#[derive(Debug)]
pub struct ReliabilityTracker {
    entries: BTreeMap<u32, ReliableEntry>,
    retransmit_interval: Duration,
    max_retries: u32,
}

impl ReliabilityTracker {
    pub fn new(retransmit_interval: Duration, max_retries: u32) -> Self {
        Self {
            entries: BTreeMap::new(),
            retransmit_interval,
            max_retries,
        }
    }

    /// Remember a reliable wire packet sent at `now`.
    pub fn track(
        &mut self,
        sequence: u32,
        bytes: Vec<u8>,
        packet_type: u16,
        priority: bool,
        now: Instant,
    ) {
        self.entries.insert(
            sequence,
            ReliableEntry {
                sequence,
                bytes,
                packet_type,
                priority,
                sent_at: now,
                retries: 0,
            },
        );
    }

    /// Drop the entry for `sequence`. Unknown sequences are ignored.
    pub fn acknowledge(&mut self, sequence: u32) -> bool {
        let removed = self.entries.remove(&sequence).is_some();
        if removed {
            trace!(sequence, "Reliable packet acknowledged");
        }
        removed
    }

    /// Collect due resends and entries that hit the retry ceiling.
    pub fn poll_retransmits(&mut self, now: Instant) -> RetransmitPoll {
        let mut urgent = Vec::new();
        let mut normal = Vec::new();
        let mut exhausted = Vec::new();

        for entry in self.entries.values_mut() {
            if now.saturating_duration_since(entry.sent_at) < self.retransmit_interval {
                continue;
            }

            if entry.retries >= self.max_retries {
                exhausted.push(Exhausted {
                    sequence: entry.sequence,
                    packet_type: entry.packet_type,
                });
                continue;
            }

            entry.retries += 1;
            entry.sent_at = now;
            let resend = Retransmit {
                sequence: entry.sequence,
                bytes: entry.bytes.clone(),
                retries: entry.retries,
            };
            if entry.priority {
                urgent.push(resend);
            } else {
                normal.push(resend);
            }
        }

        for gone in &exhausted {
            self.entries.remove(&gone.sequence);
            debug!(
                sequence = gone.sequence,
                packet_type = gone.packet_type,
                "Retransmission attempts exhausted"
            );
        }

        urgent.extend(normal);
        RetransmitPoll {
            resend: urgent,
            exhausted,
        }
    }

    pub fn get(&self, sequence: u32) -> Option<&ReliableEntry> {
        self.entries.get(&sequence)
    }

    pub fn pending(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[derive(Debug)]
struct Held<T> {
    items: Vec<T>,
    held_since: Instant,
}

/// Ordered packets waiting for the gap in front of them to fill.
///
/// Entries are keyed by the highest wire sequence they depend on. An entry is
/// releasable once every sequence up to its key has been received or skipped.
#[derive(Debug)]
pub struct OrderedBuffer<T> {
    held: BTreeMap<u32, Held<T>>,
    count: usize,
    release_timeout: Duration,
    max_held: usize,
}

impl<T> OrderedBuffer<T> {
    pub fn new(release_timeout: Duration, max_held: usize) -> Self {
        Self {
            held: BTreeMap::new(),
            count: 0,
            release_timeout,
            max_held,
        }
    }

    pub fn hold(&mut self, key: u32, items: Vec<T>, now: Instant) {
        self.count += items.len();
        self.held
            .entry(key)
            .or_insert_with(|| Held {
                items: Vec::new(),
                held_since: now,
            })
            .items
            .extend(items);
    }

    /// Remove and return, in key order, everything keyed below `next_expected`.
    pub fn release_ready(&mut self, next_expected: u32) -> Vec<T> {
        let mut released = Vec::new();
        while let Some(entry) = self.held.first_entry() {
            if *entry.key() >= next_expected {
                break;
            }
            let held = entry.remove();
            self.count -= held.items.len();
            released.extend(held.items);
        }
        released
    }

    /// Remove and return, in key order, everything keyed at or below `key`.
    pub fn release_through(&mut self, key: u32) -> Vec<T> {
        let mut released = Vec::new();
        while let Some(entry) = self.held.first_entry() {
            if *entry.key() > key {
                break;
            }
            let held = entry.remove();
            self.count -= held.items.len();
            released.extend(held.items);
        }
        released
    }

    /// Key through which the gap should be declared lost, if any.
    ///
    /// Over capacity this is the lowest key. Otherwise it is the highest key
    /// that has waited at least the release timeout.
    pub fn overdue_key(&self, now: Instant) -> Option<u32> {
        if self.count > self.max_held {
            return self.held.keys().next().copied();
        }
        self.held
            .iter()
            .rev()
            .find(|(_, held)| now.saturating_duration_since(held.held_since) >= self.release_timeout)
            .map(|(key, _)| *key)
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn clear(&mut self) {
        self.held.clear();
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn test_resend_then_exhaust() {
        let start = Instant::now();
        let mut tracker = ReliabilityTracker::new(ms(500), 5);
        tracker.track(10, b"PING".to_vec(), 1, false, start);

        assert!(tracker.poll_retransmits(start + ms(499)).resend.is_empty());

        for step in 1..=5u32 {
            let poll = tracker.poll_retransmits(start + ms(500 * step as u64));
            assert_eq!(poll.resend.len(), 1, "resend at step {step}");
            assert_eq!(poll.resend[0].sequence, 10);
            assert_eq!(poll.resend[0].retries, step);
            assert!(poll.exhausted.is_empty());
        }

        let poll = tracker.poll_retransmits(start + ms(3000));
        assert!(poll.resend.is_empty());
        assert_eq!(
            poll.exhausted,
            vec![Exhausted {
                sequence: 10,
                packet_type: 1
            }]
        );
        assert_eq!(tracker.pending(), 0);
    }

    #[test]
    fn test_acknowledge_is_idempotent() {
        let start = Instant::now();
        let mut tracker = ReliabilityTracker::new(ms(100), 3);
        tracker.track(1, vec![1], 0, false, start);
        assert!(tracker.acknowledge(1));
        assert!(!tracker.acknowledge(1));
        assert!(!tracker.acknowledge(999));
        assert!(tracker.poll_retransmits(start + ms(1000)).resend.is_empty());
    }

    #[test]
    fn test_priority_resent_first() {
        let start = Instant::now();
        let mut tracker = ReliabilityTracker::new(ms(100), 3);
        tracker.track(1, vec![1], 0, false, start);
        tracker.track(2, vec![2], 0, true, start);
        tracker.track(3, vec![3], 0, false, start);

        let order: Vec<u32> = tracker
            .poll_retransmits(start + ms(100))
            .resend
            .iter()
            .map(|r| r.sequence)
            .collect();
        assert_eq!(order, vec![2, 1, 3]);
    }

    #[test]
    fn test_zero_retries_exhausts_immediately() {
        let start = Instant::now();
        let mut tracker = ReliabilityTracker::new(ms(100), 0);
        tracker.track(4, vec![], 2, false, start);
        let poll = tracker.poll_retransmits(start + ms(100));
        assert!(poll.resend.is_empty());
        assert_eq!(poll.exhausted.len(), 1);
    }

    #[test]
    fn test_ordered_release_in_key_order() {
        let start = Instant::now();
        let mut buffer = OrderedBuffer::new(ms(1000), 16);
        buffer.hold(3, vec!["c"], start);
        buffer.hold(2, vec!["b"], start);
        assert!(buffer.release_ready(2).is_empty());
        assert_eq!(buffer.release_ready(4), vec!["b", "c"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_overdue_by_timeout() {
        let start = Instant::now();
        let mut buffer = OrderedBuffer::new(ms(1000), 16);
        buffer.hold(5, vec![5], start);
        buffer.hold(8, vec![8], start + ms(600));
        assert_eq!(buffer.overdue_key(start + ms(999)), None);
        assert_eq!(buffer.overdue_key(start + ms(1000)), Some(5));
        assert_eq!(buffer.overdue_key(start + ms(1600)), Some(8));
    }

    #[test]
    fn test_overdue_by_capacity() {
        let start = Instant::now();
        let mut buffer = OrderedBuffer::new(ms(1000), 2);
        buffer.hold(9, vec![9], start);
        buffer.hold(7, vec![7], start);
        assert_eq!(buffer.overdue_key(start), None);
        buffer.hold(8, vec![8], start);
        assert_eq!(buffer.overdue_key(start), Some(7));
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_release_through_drains_highest_key() {
        let start = Instant::now();
        let mut buffer = OrderedBuffer::new(ms(10), 16);
        buffer.hold(u32::MAX, vec!["last"], start);
        buffer.hold(4, vec!["four"], start);
        buffer.hold(9, vec!["nine"], start);

        assert_eq!(buffer.release_through(4), vec!["four"]);
        assert_eq!(buffer.overdue_key(start + ms(10)), Some(u32::MAX));
        assert_eq!(buffer.release_through(u32::MAX), vec!["nine", "last"]);
        assert!(buffer.is_empty());
        assert_eq!(buffer.overdue_key(start + ms(10)), None);
    }
}
