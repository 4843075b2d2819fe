use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;
use tracing::trace;

/// Identifies one scheduled (possibly repeating) timer. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

/// A timer entry that came due.
#[derive(Debug, Clone, PartialEq)]
pub struct Fired<E> {
    pub handle: TimerHandle,
    pub deadline: u64,
    pub payload: E,
}

struct Entry<E> {
    interval: Option<u64>,
    payload: E,
}

/// Deadline-ordered queue of one-shot and repeating timers on a nanosecond
/// timeline. Nothing fires on its own: the owner drains due entries with
/// [`TimerQueue::pop_due`] from its single control thread.
pub struct TimerQueue<E> {
    // (deadline, sequence, handle id)
    heap: BinaryHeap<Reverse<(u64, u64, u64)>>,
    entries: HashMap<u64, Entry<E>>,
    next_seq: u64,
    next_id: u64,
}

impl<E: Clone> TimerQueue<E> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            entries: HashMap::new(),
            next_seq: 0,
            next_id: 0,
        }
    }

    /// Fires once, `delay` after `now`.
    pub fn schedule(&mut self, now: u64, delay: Duration, payload: E) -> TimerHandle {
        self.insert(now.saturating_add(delay.as_nanos() as u64), None, payload)
    }

    /// Fires every `interval`, first at `now + interval`, until cancelled.
    pub fn schedule_repeating(&mut self, now: u64, interval: Duration, payload: E) -> TimerHandle {
        let step = (interval.as_nanos() as u64).max(1);
        self.insert(now.saturating_add(step), Some(step), payload)
    }

    /// Returns whether the handle was still pending.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        self.entries.remove(&handle.0).is_some()
    }

    pub fn is_pending(&self, handle: TimerHandle) -> bool {
        self.entries.contains_key(&handle.0)
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn next_deadline(&mut self) -> Option<u64> {
        self.discard_cancelled();
        self.heap.peek().map(|Reverse((deadline, _, _))| *deadline)
    }

    /// Removes and returns the earliest entry due at or before `now`.
    /// Repeating entries are re-armed at `deadline + interval`; an entry that
    /// is overdue by whole intervals skips them and fires once, so a stalled
    /// owner never gets a burst of back-to-back repeats.
    pub fn pop_due(&mut self, now: u64) -> Option<Fired<E>> {
        self.discard_cancelled();
        let Reverse((deadline, _, id)) = *self.heap.peek()?;
        if deadline > now {
            return None;
        }
        self.heap.pop();

        let entry = self.entries.get(&id)?;
        let payload = entry.payload.clone();
        match entry.interval {
            Some(step) => {
                let mut next = deadline.saturating_add(step);
                if next <= now {
                    let missed = (now - next) / step + 1;
                    next = next.saturating_add(missed.saturating_mul(step));
                    trace!(id, missed, "repeating timer overdue, periods skipped");
                }
                let seq = self.bump_seq();
                self.heap.push(Reverse((next, seq, id)));
            }
            None => {
                self.entries.remove(&id);
            }
        }
        trace!(deadline, id, "timer fired");
        Some(Fired {
            handle: TimerHandle(id),
            deadline,
            payload,
        })
    }

    fn insert(&mut self, deadline: u64, interval: Option<u64>, payload: E) -> TimerHandle {
        let id = self.next_id;
        self.next_id += 1;
        let seq = self.bump_seq();
        self.entries.insert(id, Entry { interval, payload });
        self.heap.push(Reverse((deadline, seq, id)));
        TimerHandle(id)
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn discard_cancelled(&mut self) {
        while let Some(Reverse((_, _, id))) = self.heap.peek() {
            if self.entries.contains_key(id) {
                break;
            }
            self.heap.pop();
        }
    }
}

impl<E: Clone> Default for TimerQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}
