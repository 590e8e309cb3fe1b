//! Timers.
//!
//! The controllers never sleep themselves; they hand closures to a
//! [`Scheduler`]. [`ThreadScheduler`] runs each timer on its own thread using
//! crossbeam's `after`/`tick` channels, [`ManualScheduler`] runs them against
//! a [`ManualClock`] so timer-driven behavior can be stepped deterministically.

use crate::clock::{millis, Clock, ManualClock};
use crate::utils::CancellationToken;
use crossbeam_channel::{after, select, tick, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

pub type OnceTask = Box<dyn FnOnce() + Send + 'static>;
pub type RepeatTask = Box<dyn FnMut() + Send + 'static>;

pub trait Scheduler: Send + Sync {
    /// Runs `task` once after `delay`.
    fn once(&self, delay: Duration, task: OnceTask) -> TimerHandle;

    /// Runs `task` every `period`, first after one full period.
    fn repeat(&self, period: Duration, task: RepeatTask) -> TimerHandle;
}

/// Cancels a pending timer. Dropping the handle detaches the timer; it keeps
/// running until it fires (once) or forever (repeat).
pub struct TimerHandle {
    token: CancellationToken,
    wake: Option<Sender<()>>,
}

impl TimerHandle {
    fn new(token: CancellationToken, wake: Option<Sender<()>>) -> Self {
        Self { token, wake }
    }

    pub fn cancel(&self) {
        self.token.cancel();
        if let Some(wake) = &self.wake {
            let _ = wake.try_send(());
        }
    }
}

// ── Thread-backed scheduler ──────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadScheduler;

impl ThreadScheduler {
    fn cancel_channel() -> (Sender<()>, Receiver<()>) {
        crossbeam_channel::bounded(1)
    }
}

impl Scheduler for ThreadScheduler {
    fn once(&self, delay: Duration, task: OnceTask) -> TimerHandle {
        let token = CancellationToken::new();
        let (wake_tx, wake_rx) = Self::cancel_channel();
        let thread_token = token.clone();
        // Held by the thread so dropping the handle never disconnects the channel.
        let keepalive = wake_tx.clone();

        thread::spawn(move || {
            let _keepalive = keepalive;
            select! {
                recv(wake_rx) -> _ => {}
                recv(after(delay)) -> _ => {
                    if !thread_token.is_cancelled() {
                        task();
                    }
                }
            }
        });

        TimerHandle::new(token, Some(wake_tx))
    }

    fn repeat(&self, period: Duration, mut task: RepeatTask) -> TimerHandle {
        let token = CancellationToken::new();
        let (wake_tx, wake_rx) = Self::cancel_channel();
        let thread_token = token.clone();
        let keepalive = wake_tx.clone();

        thread::spawn(move || {
            let _keepalive = keepalive;
            let ticker = tick(period);
            loop {
                select! {
                    recv(wake_rx) -> _ => return,
                    recv(ticker) -> _ => {
                        if thread_token.is_cancelled() {
                            return;
                        }
                        task();
                    }
                }
            }
        });

        TimerHandle::new(token, Some(wake_tx))
    }
}

// ── Virtual-time scheduler ───────────────────────────────────────────────────

struct Entry {
    seq: u64,
    due_ms: u64,
    period_ms: Option<u64>,
    token: CancellationToken,
    task: Job,
}

enum Job {
    Once(OnceTask),
    Repeat(RepeatTask),
}

#[derive(Default)]
struct Queue {
    next_seq: u64,
    entries: Vec<Entry>,
}

/// Runs timers in virtual time. Time only moves through [`ManualScheduler::advance`],
/// which fires every due timer in deadline order, moving the shared clock to
/// each deadline before running its task.
#[derive(Clone)]
pub struct ManualScheduler {
    clock: ManualClock,
    queue: Arc<Mutex<Queue>>,
}

impl ManualScheduler {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            queue: Arc::new(Mutex::new(Queue::default())),
        }
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    /// Number of live (not cancelled) timers.
    pub fn pending(&self) -> usize {
        self.lock()
            .entries
            .iter()
            .filter(|e| !e.token.is_cancelled())
            .count()
    }

    /// Moves time forward by `by`, running everything that falls due.
    pub fn advance(&self, by: Duration) {
        let target = self.clock.now_ms().saturating_add(millis(by));

        while let Some(entry) = self.pop_due(target) {
            let Entry {
                seq,
                due_ms,
                period_ms,
                token,
                task,
            } = entry;
            self.clock.set(due_ms.max(self.clock.now_ms()));

            match task {
                Job::Once(task) => task(),
                Job::Repeat(mut task) => {
                    task();
                    if let (false, Some(period)) = (token.is_cancelled(), period_ms) {
                        self.lock().entries.push(Entry {
                            seq,
                            due_ms: due_ms + period.max(1),
                            period_ms,
                            token,
                            task: Job::Repeat(task),
                        });
                    }
                }
            }
        }

        self.clock.set(target.max(self.clock.now_ms()));
    }

    fn pop_due(&self, target: u64) -> Option<Entry> {
        let mut queue = self.lock();
        queue.entries.retain(|e| !e.token.is_cancelled());
        let index = queue
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.due_ms <= target)
            .min_by_key(|(_, e)| (e.due_ms, e.seq))
            .map(|(i, _)| i)?;
        Some(queue.entries.swap_remove(index))
    }

    fn push(&self, delay: Duration, period_ms: Option<u64>, task: Job) -> TimerHandle {
        let token = CancellationToken::new();
        let mut queue = self.lock();
        let seq = queue.next_seq;
        queue.next_seq += 1;
        queue.entries.push(Entry {
            seq,
            due_ms: self.clock.now_ms().saturating_add(millis(delay)),
            period_ms,
            token: token.clone(),
            task,
        });
        TimerHandle::new(token, None)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Scheduler for ManualScheduler {
    fn once(&self, delay: Duration, task: OnceTask) -> TimerHandle {
        self.push(delay, None, Job::Once(task))
    }

    fn repeat(&self, period: Duration, task: RepeatTask) -> TimerHandle {
        let period_ms = millis(period);
        self.push(period, Some(period_ms), Job::Repeat(task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> usize) {
        let count = Arc::new(AtomicUsize::new(0));
        let read = Arc::clone(&count);
        (count, move || read.load(Ordering::SeqCst))
    }

    #[test]
    fn test_once_fires_at_deadline_only() {
        let sched = ManualScheduler::new(ManualClock::new(0));
        let (count, read) = counter();
        sched.once(
            Duration::from_secs(5),
            Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }),
        );

        sched.advance(Duration::from_millis(4_999));
        assert_eq!(read(), 0);
        sched.advance(Duration::from_millis(1));
        assert_eq!(read(), 1);
        sched.advance(Duration::from_secs(60));
        assert_eq!(read(), 1);
        assert_eq!(sched.pending(), 0);
    }

    #[test]
    fn test_repeat_fires_every_period() {
        let sched = ManualScheduler::new(ManualClock::new(0));
        let (count, read) = counter();
        sched.repeat(
            Duration::from_secs(10),
            Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }),
        );

        sched.advance(Duration::from_secs(35));
        assert_eq!(read(), 3);
        assert_eq!(sched.clock().now_ms(), 35_000);
    }

    #[test]
    fn test_cancelled_timer_never_fires() {
        let sched = ManualScheduler::new(ManualClock::new(0));
        let (count, read) = counter();
        let handle = sched.once(
            Duration::from_secs(1),
            Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }),
        );
        handle.cancel();
        sched.advance(Duration::from_secs(2));
        assert_eq!(read(), 0);
    }

    #[test]
    fn test_task_sees_its_own_deadline_and_can_reschedule() {
        let clock = ManualClock::new(100);
        let sched = ManualScheduler::new(clock.clone());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let inner_sched = sched.clone();
        let inner_seen = Arc::clone(&seen);
        let inner_clock = clock.clone();
        sched.once(
            Duration::from_millis(50),
            Box::new(move || {
                inner_seen.lock().unwrap().push(inner_clock.now_ms());
                let nested_seen = Arc::clone(&inner_seen);
                let nested_clock = inner_clock.clone();
                inner_sched.once(
                    Duration::from_millis(25),
                    Box::new(move || nested_seen.lock().unwrap().push(nested_clock.now_ms())),
                );
            }),
        );

        sched.advance(Duration::from_millis(100));
        assert_eq!(*seen.lock().unwrap(), vec![150, 175]);
        assert_eq!(clock.now_ms(), 200);
    }

    #[test]
    fn test_thread_scheduler_once_runs() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let _handle = ThreadScheduler.once(
            Duration::from_millis(10),
            Box::new(move || {
                let _ = tx.send(());
            }),
        );
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_thread_scheduler_cancel_stops_repeat() {
        let (count, read) = counter();
        let handle = ThreadScheduler.repeat(
            Duration::from_millis(5),
            Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }),
        );
        thread::sleep(Duration::from_millis(60));
        handle.cancel();
        thread::sleep(Duration::from_millis(20));
        let after_cancel = read();
        thread::sleep(Duration::from_millis(60));
        assert_eq!(read(), after_cancel);
    }
}
