//! Timer Service
//!
//! Nodes never sleep. Every delayed step (election timeout, heartbeat,
//! liveness check, watchdog) is a timer whose expiry is fed back to the node
//! as a [`TimerFired`] input. The node remembers the [`TimerId`] of each live
//! timer, so a fire that arrives after cancellation is recognised as stale.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Handle of a scheduled timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// What a timer is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Delay before the first election
    Startup,
    /// End of the vote-solicitation window
    ElectionRound,
    /// Grace period for an answering peer to claim victory
    ElectionFollowUp,
    /// Master heartbeat broadcast
    Heartbeat,
    /// Follower check on the tracked master
    MasterLiveness,
    /// Periodic "do we have a master" check
    Watchdog,
}

/// Timer expiry delivered to the node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub id: TimerId,
    pub kind: TimerKind,
}

/// One-shot and repeating timers, each cancellable
pub trait TimerService: Send {
    /// Current time as seen by this service
    fn now(&self) -> Instant;

    /// Fire once after `delay`
    fn schedule_once(&mut self, kind: TimerKind, delay: Duration) -> TimerId;

    /// Fire every `period`, first after one period
    fn schedule_repeating(&mut self, kind: TimerKind, period: Duration) -> TimerId;

    /// Cancel a timer. Unknown or already-finished ids are ignored.
    fn cancel(&mut self, id: TimerId);

    /// Cancel every outstanding timer
    fn cancel_all(&mut self);
}

/// Timers backed by tokio tasks.
///
/// Fires are sent to the receiver returned by [`TokioTimers::new`]. With the
/// tokio clock paused, time advances instantly and deterministically.
pub struct TokioTimers {
    next_id: u64,
    tasks: HashMap<TimerId, JoinHandle<()>>,
    fired: mpsc::UnboundedSender<TimerFired>,
}

impl TokioTimers {
    /// Create a timer service and the channel its fires arrive on
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerFired>) {
        let (fired, rx) = mpsc::unbounded_channel();
        let timers = Self {
            next_id: 0,
            tasks: HashMap::new(),
            fired,
        };
        (timers, rx)
    }

    fn allocate(&mut self) -> TimerId {
        self.next_id += 1;
        TimerId(self.next_id)
    }

    /// Number of timers not yet cancelled
    pub fn outstanding(&self) -> usize {
        self.tasks.len()
    }
}

impl TimerService for TokioTimers {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn schedule_once(&mut self, kind: TimerKind, delay: Duration) -> TimerId {
        let id = self.allocate();
        let fired = self.fired.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = fired.send(TimerFired { id, kind });
        });
        self.tasks.insert(id, task);
        id
    }

    fn schedule_repeating(&mut self, kind: TimerKind, period: Duration) -> TimerId {
        let id = self.allocate();
        let fired = self.fired.clone();
        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if fired.send(TimerFired { id, kind }).is_err() {
                    break;
                }
            }
        });
        self.tasks.insert(id, task);
        id
    }

    fn cancel(&mut self, id: TimerId) {
        if let Some(task) = self.tasks.remove(&id) {
            task.abort();
        }
    }

    fn cancel_all(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }
}

impl Drop for TokioTimers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[derive(Debug, Clone, Copy)]
struct ManualTimer {
    kind: TimerKind,
    due: Instant,
    period: Option<Duration>,
}

/// Hand-driven timers for synchronous tests.
///
/// Time only moves when [`ManualTimers::pop_due`] or
/// [`ManualTimers::set_now`] is called.
#[derive(Debug)]
pub struct ManualTimers {
    now: Instant,
    next_id: u64,
    pending: BTreeMap<TimerId, ManualTimer>,
}

impl ManualTimers {
    pub fn new() -> Self {
        Self {
            now: Instant::now(),
            next_id: 0,
            pending: BTreeMap::new(),
        }
    }

    /// Pop the earliest timer due at or before `until`, moving the clock to
    /// its due time. Repeating timers are re-armed one period later.
    pub fn pop_due(&mut self, until: Instant) -> Option<TimerFired> {
        let id = self
            .pending
            .iter()
            .filter(|(_, timer)| timer.due <= until)
            .min_by_key(|(id, timer)| (timer.due, **id))
            .map(|(id, _)| *id)?;

        let timer = *self.pending.get(&id)?;
        self.now = self.now.max(timer.due);

        match timer.period {
            Some(period) => {
                if let Some(entry) = self.pending.get_mut(&id) {
                    entry.due += period;
                }
            }
            None => {
                self.pending.remove(&id);
            }
        }
        Some(TimerFired { id, kind: timer.kind })
    }

    /// Move the clock forward (never backwards)
    pub fn set_now(&mut self, now: Instant) {
        self.now = self.now.max(now);
    }

    /// Number of timers of `kind` still scheduled
    pub fn scheduled(&self, kind: TimerKind) -> usize {
        self.pending.values().filter(|t| t.kind == kind).count()
    }

    /// Number of timers still scheduled
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    fn insert(&mut self, kind: TimerKind, delay: Duration, period: Option<Duration>) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.pending.insert(
            id,
            ManualTimer {
                kind,
                due: self.now + delay,
                period,
            },
        );
        id
    }
}

impl Default for ManualTimers {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerService for ManualTimers {
    fn now(&self) -> Instant {
        self.now
    }

    fn schedule_once(&mut self, kind: TimerKind, delay: Duration) -> TimerId {
        self.insert(kind, delay, None)
    }

    fn schedule_repeating(&mut self, kind: TimerKind, period: Duration) -> TimerId {
        self.insert(kind, period, Some(period))
    }

    fn cancel(&mut self, id: TimerId) {
        self.pending.remove(&id);
    }

    fn cancel_all(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_timers_fire_in_order() {
        let mut timers = ManualTimers::new();
        let start = timers.now();
        let slow = timers.schedule_once(TimerKind::ElectionRound, Duration::from_millis(500));
        let fast = timers.schedule_once(TimerKind::Startup, Duration::from_millis(100));

        let until = start + Duration::from_secs(1);
        assert_eq!(timers.pop_due(until).map(|f| f.id), Some(fast));
        assert_eq!(timers.now(), start + Duration::from_millis(100));
        assert_eq!(timers.pop_due(until).map(|f| f.id), Some(slow));
        assert!(timers.pop_due(until).is_none());
    }

    #[test]
    fn test_manual_repeating_rearms() {
        let mut timers = ManualTimers::new();
        let start = timers.now();
        let id = timers.schedule_repeating(TimerKind::Heartbeat, Duration::from_millis(300));

        let until = start + Duration::from_millis(1000);
        let mut fires = 0;
        while let Some(fired) = timers.pop_due(until) {
            assert_eq!(fired.id, id);
            fires += 1;
        }
        assert_eq!(fires, 3);

        timers.cancel(id);
        assert_eq!(timers.outstanding(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_timers_fire_and_cancel() {
        let (mut timers, mut fired) = TokioTimers::new();
        let once = timers.schedule_once(TimerKind::ElectionRound, Duration::from_millis(500));
        let cancelled = timers.schedule_once(TimerKind::ElectionFollowUp, Duration::from_millis(100));
        timers.cancel(cancelled);

        let first = fired.recv().await.unwrap();
        assert_eq!(first, TimerFired { id: once, kind: TimerKind::ElectionRound });
        assert_eq!(timers.outstanding(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_repeating_timer() {
        let (mut timers, mut fired) = TokioTimers::new();
        let start = tokio::time::Instant::now();
        let id = timers.schedule_repeating(TimerKind::Watchdog, Duration::from_millis(200));

        for _ in 0..3 {
            assert_eq!(fired.recv().await.unwrap().id, id);
        }
        assert!(start.elapsed() >= Duration::from_millis(600));

        timers.cancel_all();
        assert_eq!(timers.outstanding(), 0);
    }
}
