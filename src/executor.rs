//! Bindings for the `Executor` and `Ticker` collaborators.
//!
//! Only a single-threaded cooperative scheduler and a monotonic clock are
//! required; how they are obtained is left open.
//! `ReactorExecutor`/`MonotonicTicker` bind them onto the repository's own
//! `tokio_core::reactor::Handle` + `tokio_timer::Timer` pair (the same pair
//! `balancer::endpoint::Endpoint::connect` already uses for its backoff
//! sleeps). `ManualExecutor`/`ManualTicker` are deterministic test doubles,
//! in the spirit of the repository's `tests/mocks`.

use futures::{Async, Future, Poll};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};
use tokio_core::reactor::Handle;
use tokio_timer::{Sleep, Timer};

/// Converts a nanosecond count, as stored by `WindowScheduler` and
/// `RampingUpStrategyParams`, into a `Duration` without `from_nanos`.
pub fn duration_from_nanos(nanos: u64) -> Duration {
    Duration::new(nanos / 1_000_000_000, (nanos % 1_000_000_000) as u32)
}

/// A cancellable periodic (or one-shot) schedule.
///
/// Cancellation is idempotent: calling `cancel` more than once is a safe
/// no-op, which matters because both "entry emptied" and "group closed"
/// can race to cancel the same handle in a single-threaded event loop.
#[derive(Clone)]
pub struct ScheduledHandle {
    cancelled: Rc<Cell<bool>>,
}

impl ScheduledHandle {
    fn new() -> (ScheduledHandle, Rc<Cell<bool>>) {
        let flag = Rc::new(Cell::new(false));
        (
            ScheduledHandle {
                cancelled: flag.clone(),
            },
            flag,
        )
    }

    pub fn cancel(&self) {
        self.cancelled.set(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }
}

/// The single-threaded cooperative scheduler collaborator.
///
/// Takes boxed closures rather than generic `F` parameters so that a
/// `RampExecutor` can be held as `Rc<RampExecutor>` by the selector and its
/// window entries alike, the way the repository shares a single
/// `tokio_core::reactor::Handle` across `Dispatcher`/`Task`/`Endpoint`.
pub trait RampExecutor {
    /// Enqueues `task` for serial execution. Never blocks the caller.
    fn execute(&self, task: Box<FnOnce()>);

    /// Schedules `task` to run once after `initial_delay`, then every
    /// `period` thereafter, until the returned handle is cancelled.
    fn schedule_at_fixed_rate(
        &self,
        initial_delay: Duration,
        period: Duration,
        task: Box<FnMut()>,
    ) -> ScheduledHandle;
}

/// The monotonic clock collaborator.
pub trait Ticker {
    fn now_nanos(&self) -> u64;
}

/// Binds `RampExecutor` onto a `tokio_core` reactor and a `tokio_timer`
/// timer wheel, the pairing used throughout the repository's balancer.
#[derive(Clone)]
pub struct ReactorExecutor {
    handle: Handle,
    timer: Timer,
}

impl ReactorExecutor {
    pub fn new(handle: Handle, timer: Timer) -> ReactorExecutor {
        ReactorExecutor { handle, timer }
    }
}

impl RampExecutor for ReactorExecutor {
    fn execute(&self, task: Box<FnOnce()>) {
        self.handle.spawn(::futures::lazy(move || {
            task();
            Ok(())
        }));
    }

    fn schedule_at_fixed_rate(
        &self,
        initial_delay: Duration,
        period: Duration,
        task: Box<FnMut()>,
    ) -> ScheduledHandle {
        let (handle, flag) = ScheduledHandle::new();
        let timer = self.timer.clone();
        let driver = timer.sleep(initial_delay).map_err(|_| ()).and_then(move |_| {
            FixedRate {
                timer,
                period,
                task,
                flag,
                pending: None,
            }
        });
        self.handle.spawn(driver);
        handle
    }
}

/// Drives a `schedule_at_fixed_rate` task to completion (which, absent
/// cancellation, is never: this future is only ever dropped by cancelling
/// its `ScheduledHandle`).
struct FixedRate {
    timer: Timer,
    period: Duration,
    task: Box<FnMut()>,
    flag: Rc<Cell<bool>>,
    pending: Option<Sleep>,
}

impl Future for FixedRate {
    type Item = ();
    type Error = ();

    fn poll(&mut self) -> Poll<(), ()> {
        loop {
            if self.flag.get() {
                return Ok(Async::Ready(()));
            }
            match self.pending.take() {
                None => {
                    (self.task)();
                    self.pending = Some(self.timer.sleep(self.period));
                }
                Some(mut sleep) => match sleep.poll() {
                    Ok(Async::Ready(())) => continue,
                    Ok(Async::NotReady) => {
                        self.pending = Some(sleep);
                        return Ok(Async::NotReady);
                    }
                    Err(_) => return Ok(Async::Ready(())),
                },
            }
        }
    }
}

/// A process-start-relative monotonic clock.
#[derive(Clone)]
pub struct MonotonicTicker {
    start: Instant,
}

impl MonotonicTicker {
    pub fn new() -> MonotonicTicker {
        MonotonicTicker { start: Instant::now() }
    }
}

impl Default for MonotonicTicker {
    fn default() -> MonotonicTicker {
        MonotonicTicker::new()
    }
}

impl Ticker for MonotonicTicker {
    fn now_nanos(&self) -> u64 {
        let d = Instant::now().duration_since(self.start);
        d.as_secs() * 1_000_000_000 + u64::from(d.subsec_nanos())
    }
}

/// A test double that runs `execute` synchronously and lets tests fire
/// `schedule_at_fixed_rate` tasks on demand instead of waiting on real
/// timers.
#[derive(Clone)]
pub struct ManualExecutor {
    schedules: Rc<RefCell<Vec<ManualSchedule>>>,
}

struct ManualSchedule {
    task: Box<FnMut()>,
    cancelled: Rc<Cell<bool>>,
}

impl ManualExecutor {
    pub fn new() -> ManualExecutor {
        ManualExecutor {
            schedules: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Fires every still-active schedule once, simulating one `period`
    /// elapsing for each of them, then drops any that were cancelled
    /// during the fire.
    pub fn fire_all(&self) {
        let mut schedules = self.schedules.borrow_mut();
        for s in schedules.iter_mut() {
            if !s.cancelled.get() {
                (s.task)();
            }
        }
        schedules.retain(|s| !s.cancelled.get());
    }

    /// Number of schedules that have not been cancelled.
    pub fn active_count(&self) -> usize {
        self.schedules
            .borrow()
            .iter()
            .filter(|s| !s.cancelled.get())
            .count()
    }
}

impl Default for ManualExecutor {
    fn default() -> ManualExecutor {
        ManualExecutor::new()
    }
}

impl RampExecutor for ManualExecutor {
    fn execute(&self, task: Box<FnOnce()>) {
        task();
    }

    fn schedule_at_fixed_rate(
        &self,
        _initial_delay: Duration,
        _period: Duration,
        task: Box<FnMut()>,
    ) -> ScheduledHandle {
        let (handle, flag) = ScheduledHandle::new();
        self.schedules.borrow_mut().push(ManualSchedule {
            task,
            cancelled: flag,
        });
        handle
    }
}

/// A clock a test can move forward explicitly.
#[derive(Clone)]
pub struct ManualTicker {
    nanos: Rc<Cell<u64>>,
}

impl ManualTicker {
    pub fn new(start_nanos: u64) -> ManualTicker {
        ManualTicker {
            nanos: Rc::new(Cell::new(start_nanos)),
        }
    }

    pub fn advance(&self, nanos: u64) {
        self.nanos.set(self.nanos.get() + nanos);
    }

    pub fn set(&self, nanos: u64) {
        self.nanos.set(nanos);
    }
}

impl Ticker for ManualTicker {
    fn now_nanos(&self) -> u64 {
        self.nanos.get()
    }
}
