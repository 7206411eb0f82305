//! Per-event timeout bookkeeping.
//!
//! Each arm of a session's read/write registration carries an independent
//! timeout that renews on every re-arm. `mio` 0.6 has no native per-fd
//! timeout primitive, so the reactor keeps its own min-heap of deadlines and
//! checks it after every `poll`. Each session's read and write registrations
//! carry an `arm_stamp` (bumped by `Session::bump_arm_stamp` every time
//! `Reactor::add_event` re-arms them); a heap entry is only acted on if its
//! recorded stamp still matches the session's current stamp for that event,
//! which is what makes "re-arming resets the timer" correct without having
//! to find and remove the old heap entry.
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

use crate::session::EventKind;
use crate::sid::Sid;

/// One scheduled timeout.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct TimerEntry {
    pub deadline: Instant,
    pub sid: Sid,
    pub kind: EventKind,
    pub arm_stamp: u64,
}

// Reverse ordering so the heap is a min-heap on `deadline`.
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.deadline.cmp(&self.deadline)
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-heap of pending per-event deadlines.
#[derive(Default)]
pub struct TimerWheel {
    heap: BinaryHeap<TimerEntry>,
}

impl TimerWheel {
    /// Create an empty wheel.
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
        }
    }

    /// Schedule (or reschedule) a timeout. Any earlier entry for the same
    /// `(sid, kind)` is left in the heap but will be discarded as stale once
    /// popped, since `arm_stamp` will no longer match.
    pub fn schedule(&mut self, deadline: Instant, sid: Sid, kind: EventKind, arm_stamp: u64) {
        self.heap.push(TimerEntry {
            deadline,
            sid,
            kind,
            arm_stamp,
        });
    }

    /// How long until the earliest deadline, if any. Used to bound the next
    /// `poll` call so a timeout fires even with no I/O activity.
    pub fn next_timeout(&self, now: Instant) -> Option<std::time::Duration> {
        self.heap
            .peek()
            .map(|entry| entry.deadline.saturating_duration_since(now))
    }

    /// Pop every entry whose deadline has passed, in deadline order.
    ///
    /// Returns raw entries including `arm_stamp`; the caller (the reactor,
    /// which owns the registry) is responsible for checking each entry's
    /// `arm_stamp` against the session's current one before acting on it —
    /// kept as a separate step rather than an internal closure because an
    /// `FnMut` here would need to borrow the reactor's registry from inside
    /// a method that already borrows `self.timers` mutably.
    pub fn pop_expired(&mut self, now: Instant) -> Vec<TimerEntry> {
        let mut fired = Vec::new();
        while let Some(entry) = self.heap.peek() {
            if entry.deadline > now {
                break;
            }
            fired.push(self.heap.pop().expect("peeked Some above"));
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::Token;
    use std::time::Duration;

    fn sid(n: usize) -> Sid {
        Sid::new(Token(n), 0)
    }

    #[test]
    fn fires_in_deadline_order() {
        let mut wheel = TimerWheel::new();
        let now = Instant::now();
        wheel.schedule(now + Duration::from_millis(20), sid(2), EventKind::Read, 1);
        wheel.schedule(now + Duration::from_millis(5), sid(1), EventKind::Read, 1);

        let fired = wheel.pop_expired(now + Duration::from_millis(10));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].sid, sid(1));

        let fired = wheel.pop_expired(now + Duration::from_millis(30));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].sid, sid(2));
    }

    #[test]
    fn stale_arm_stamp_is_left_to_the_caller() {
        let mut wheel = TimerWheel::new();
        let now = Instant::now();
        wheel.schedule(now, sid(1), EventKind::Write, 1);

        // pop_expired itself does not know about re-arms; the reactor is
        // expected to compare arm_stamp against the session's current one
        // and discard stale entries itself.
        let fired = wheel.pop_expired(now + Duration::from_millis(1));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].arm_stamp, 1);
    }

    #[test]
    fn next_timeout_reflects_earliest_entry() {
        let mut wheel = TimerWheel::new();
        let now = Instant::now();
        assert!(wheel.next_timeout(now).is_none());
        wheel.schedule(now + Duration::from_secs(1), sid(1), EventKind::Read, 1);
        let remaining = wheel.next_timeout(now).unwrap();
        assert!(remaining <= Duration::from_secs(1));
    }
}
