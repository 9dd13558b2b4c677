//! Timers and counting barriers
//!
//! Timers are tokio sleeps that post [`LoopEvent::TimerFired`] back to the
//! loop; the action itself stays here and runs on the loop. A barrier counts
//! arrivals and releases its continuation once, when the count reaches zero.

use super::context::Context;
use super::session::ConnectionId;
use super::LoopEvent;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::trace;

/// Deferred work executed on the loop
pub type Work = Box<dyn FnOnce(&mut Context<'_>) + Send>;

/// Handle to a scheduled timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

/// Handle to a counting barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BarrierId(u64);

/// What a timer does when it fires
pub(crate) enum TimerAction {
    Work(Work),
    Retry(ConnectionId),
}

struct Timer {
    action: TimerAction,
    task: JoinHandle<()>,
}

struct Barrier {
    remaining: usize,
    then: Option<Work>,
}

#[derive(Default)]
pub(crate) struct Scheduler {
    timers: HashMap<TimerId, Timer>,
    barriers: HashMap<BarrierId, Barrier>,
    next_timer: u64,
    next_barrier: u64,
}

impl Scheduler {
    pub(crate) fn schedule(
        &mut self,
        delay: Duration,
        action: TimerAction,
        tx: &UnboundedSender<LoopEvent>,
    ) -> TimerId {
        self.next_timer += 1;
        let id = TimerId(self.next_timer);
        let tx = tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(LoopEvent::TimerFired(id));
        });
        trace!(timer = %id, delay_ms = delay.as_millis() as u64, "Timer scheduled");
        self.timers.insert(id, Timer { action, task });
        id
    }

    /// Cancel a pending timer; false if it already fired or never existed
    pub(crate) fn cancel(&mut self, id: TimerId) -> bool {
        match self.timers.remove(&id) {
            Some(timer) => {
                timer.task.abort();
                trace!(timer = %id, "Timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Claim the action of a fired timer; `None` if it was cancelled
    pub(crate) fn fire(&mut self, id: TimerId) -> Option<TimerAction> {
        self.timers.remove(&id).map(|timer| timer.action)
    }

    pub(crate) fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// Cancel every timer and forget every barrier
    pub(crate) fn clear(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.task.abort();
        }
        self.barriers.clear();
    }

    pub(crate) fn barrier(&mut self, count: usize) -> BarrierId {
        self.next_barrier += 1;
        let id = BarrierId(self.next_barrier);
        self.barriers.insert(
            id,
            Barrier {
                remaining: count,
                then: None,
            },
        );
        id
    }

    /// Count one arrival; returns the continuation if this released the barrier
    pub(crate) fn arrive(&mut self, id: BarrierId) -> Option<Work> {
        let barrier = self.barriers.get_mut(&id)?;
        barrier.remaining = barrier.remaining.saturating_sub(1);
        if barrier.remaining == 0 && barrier.then.is_some() {
            return self.barriers.remove(&id).and_then(|b| b.then);
        }
        None
    }

    /// Attach the continuation; returned at once if the count is already zero
    pub(crate) fn set_continuation(&mut self, id: BarrierId, work: Work) -> Option<Work> {
        let barrier = self.barriers.get_mut(&id)?;
        if barrier.remaining == 0 {
            self.barriers.remove(&id);
            return Some(work);
        }
        barrier.then = Some(work);
        None
    }
}
