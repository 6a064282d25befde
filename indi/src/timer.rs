//! One-shot and periodic timers for the driver event loop, plus the idle
//! work procs it runs when nothing else is ready.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Handle returned when a timer is armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

#[derive(Debug)]
struct Timer {
    id: TimerId,
    deadline: Instant,
    period: Option<Duration>,
}

/// Pending timers ordered by deadline, then by arming order.
#[derive(Debug, Default)]
pub struct TimerQueue {
    next_id: u64,
    timers: Vec<Timer>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, timer: Timer) {
        let pos = self
            .timers
            .partition_point(|t| (t.deadline, t.id) <= (timer.deadline, timer.id));
        self.timers.insert(pos, timer);
    }

    /// Arm a timer `delay` after `now`, repeating every `period` if set.
    pub fn add(&mut self, now: Instant, delay: Duration, period: Option<Duration>) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.insert(Timer {
            id,
            deadline: now + delay,
            period,
        });
        id
    }

    /// Cancel a pending timer. Unknown or already fired ids are ignored.
    pub fn remove(&mut self, id: TimerId) -> bool {
        match self.timers.iter().position(|t| t.id == id) {
            Some(i) => {
                self.timers.remove(i);
                true
            }
            None => false,
        }
    }

    /// Time left before `id` fires.
    pub fn remaining(&self, id: TimerId, now: Instant) -> Option<Duration> {
        self.timers
            .iter()
            .find(|t| t.id == id)
            .map(|t| t.deadline.saturating_duration_since(now))
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.first().map(|t| t.deadline)
    }

    /// Remove and return every timer due at `now`, in firing order.
    /// Periodic timers are re-armed from their previous deadline.
    pub fn take_due(&mut self, now: Instant) -> Vec<TimerId> {
        let due = self.timers.partition_point(|t| t.deadline <= now);
        let fired: Vec<Timer> = self.timers.drain(..due).collect();
        let ids = fired.iter().map(|t| t.id).collect();
        for timer in fired {
            if let Some(period) = timer.period {
                let mut deadline = timer.deadline + period;
                if deadline <= now {
                    deadline = now + period;
                }
                self.insert(Timer {
                    id: timer.id,
                    deadline,
                    period: Some(period),
                });
            }
        }
        ids
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

/// Handle returned when a work proc is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkProcId(u64);

/// Work procs taken round-robin, one per idle loop pass.
#[derive(Debug, Default)]
pub struct WorkQueue {
    next_id: u64,
    procs: VecDeque<WorkProcId>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self) -> WorkProcId {
        self.next_id += 1;
        let id = WorkProcId(self.next_id);
        self.procs.push_back(id);
        id
    }

    pub fn remove(&mut self, id: WorkProcId) -> bool {
        match self.procs.iter().position(|p| *p == id) {
            Some(i) => {
                self.procs.remove(i);
                true
            }
            None => false,
        }
    }

    /// Next proc to run. It moves to the back of the queue.
    pub fn next(&mut self) -> Option<WorkProcId> {
        let id = self.procs.pop_front()?;
        self.procs.push_back(id);
        Some(id)
    }

    pub fn len(&self) -> usize {
        self.procs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procs.is_empty()
    }
}
