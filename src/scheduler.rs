//! Monotonic-time timer wheel driving the CPU and card timers.
//!
//! Mirrors the protocol described for the disk controller's re-entrant
//! `advanceState` wrapper in `original_source/src/IoCardDisk_Controller.cpp`:
//! timers may be created, fired, and re-created within the same drain, in
//! `(deadline, insertion order)` order, with no real wall-clock sleeping.
//!
//! A literal `fn(arg)` callback pointer (as in `spec.md`'s data model) is
//! awkward in Rust once the callback needs mutable access to card or CPU
//! state that outlives the `Scheduler` itself. Instead, each timer carries a
//! small `Copy` event payload; `Scheduler::tick` invokes a caller-supplied
//! dispatcher with `&mut Scheduler<E>` so the dispatcher can reschedule.

use crate::ticks::Ticks;

/// Opaque handle to a scheduled timer, usable with `Scheduler::cancel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

struct TimerEntry<E> {
    id: u64,
    deadline: Ticks,
    seq: u64,
    event: E,
}

/// A timer wheel parameterized over the event payload type it dispatches.
pub struct Scheduler<E> {
    now: Ticks,
    next_id: u64,
    next_seq: u64,
    timers: Vec<TimerEntry<E>>,
}

impl<E: Copy> Default for Scheduler<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Copy> Scheduler<E> {
    #[must_use]
    pub fn new() -> Self {
        Scheduler {
            now: Ticks::ZERO,
            next_id: 0,
            next_seq: 0,
            timers: Vec::new(),
        }
    }

    #[must_use]
    pub fn now(&self) -> Ticks {
        self.now
    }

    /// Schedule a one-shot timer `delay` ticks from now.
    pub fn create_timer(&mut self, delay: Ticks, event: E) -> TimerHandle {
        let id = self.next_id;
        self.next_id += 1;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.timers.push(TimerEntry {
            id,
            deadline: self.now + delay,
            seq,
            event,
        });
        TimerHandle(id)
    }

    /// Cancel a timer. Safe to call on an already-fired or unknown handle.
    pub fn cancel(&mut self, handle: TimerHandle) {
        self.timers.retain(|t| t.id != handle.0);
    }

    /// Advance simulated time by `by` ticks, firing every timer whose
    /// deadline is now due, in `(deadline, insertion order)` order.
    /// `on_fire` may call `create_timer`/`cancel` on the scheduler it is
    /// given; timers it schedules due immediately fire within this call.
    pub fn tick(&mut self, by: Ticks, mut on_fire: impl FnMut(E, &mut Scheduler<E>)) {
        self.now += by;
        loop {
            let due = self
                .timers
                .iter()
                .enumerate()
                .filter(|(_, t)| t.deadline <= self.now)
                .min_by_key(|(_, t)| (t.deadline, t.seq));
            let Some((idx, _)) = due else { break };
            let entry = self.timers.remove(idx);
            on_fire(entry.event, self);
        }
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.timers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_in_deadline_then_insertion_order() {
        let mut sched: Scheduler<u32> = Scheduler::new();
        sched.create_timer(Ticks(10), 1);
        sched.create_timer(Ticks(5), 2);
        sched.create_timer(Ticks(5), 3);

        let mut fired = Vec::new();
        sched.tick(Ticks(100), |e, _| fired.push(e));
        assert_eq!(fired, vec![2, 3, 1]);
    }

    #[test]
    fn callback_can_reschedule_immediate_timer_in_same_drain() {
        let mut sched: Scheduler<u32> = Scheduler::new();
        sched.create_timer(Ticks(1), 1);

        let mut fired = Vec::new();
        sched.tick(Ticks(1), |e, s| {
            fired.push(e);
            if e == 1 {
                s.create_timer(Ticks(0), 2);
            }
        });
        assert_eq!(fired, vec![1, 2]);
    }

    #[test]
    fn cancel_is_safe_on_unknown_handle() {
        let mut sched: Scheduler<u32> = Scheduler::new();
        let h = sched.create_timer(Ticks(1), 1);
        sched.cancel(h);
        sched.cancel(h);
        let mut fired = Vec::new();
        sched.tick(Ticks(10), |e, _| fired.push(e));
        assert!(fired.is_empty());
    }

    #[test]
    fn not_yet_due_timers_stay_pending() {
        let mut sched: Scheduler<u32> = Scheduler::new();
        sched.create_timer(Ticks(100), 1);
        let mut fired = Vec::new();
        sched.tick(Ticks(5), |e, _| fired.push(e));
        assert!(fired.is_empty());
        assert_eq!(sched.pending_count(), 1);
    }
}
