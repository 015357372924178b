//! Parallel Task Fan-Out
//!
//! Engines parallelise their intra-stage work through a [`Fanout`]: a fixed
//! worker budget draining a pull-based work iterator. The operating mode is
//! encoded as an integer level, mirroring the configuration surface:
//!
//! - `0` runs the work inline on the calling thread (synchronous).
//! - a negative level defers single-threaded execution (lazy).
//! - a positive level `n` uses `n` OS worker threads, capped to
//!   [`MAX_WORKERS`] (asynchronous).
//!
//! Workers pull items from the shared cursor (guarded by an internal mutex)
//! until it is exhausted, so cancellation is cooperative: make the cursor
//! return `None`. The observed result is the *worst* status over all
//! processed items: the lowest numeric code, so any fault wins, else the
//! minimum non-negative code.
//!
//! Asynchronous workers are scoped: they are spawned and joined within the
//! fan-out call, and [`Fanout::wait`] reports the stored fold.

pub mod matcher;
pub mod tiled;

use parking_lot::Mutex;

use crate::errors::Status;
use crate::zone::Zone;

/// Hard cap on per-fan-out worker threads.
pub const MAX_WORKERS: usize = 16;

/// Operating mode of a fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Run inline on the calling thread.
    Sync,
    /// Deferred single-threaded execution.
    Lazy,
    /// `n` parallel workers.
    Async(usize),
}

impl Mode {
    /// Decodes an integer level: 0 = sync, negative = lazy, positive = the
    /// worker count (capped to [`MAX_WORKERS`]).
    #[must_use]
    pub fn from_level(level: i32) -> Self {
        match level {
            0 => Self::Sync,
            n if n < 0 => Self::Lazy,
            n => Self::Async((n as usize).min(MAX_WORKERS)),
        }
    }

    #[must_use]
    pub const fn workers(self) -> usize {
        match self {
            Self::Sync | Self::Lazy => 1,
            Self::Async(n) => n,
        }
    }
}

fn fold(acc: Option<Status>, status: Status) -> Option<Status> {
    Some(match acc {
        Some(prev) => prev.worst(status),
        None => status,
    })
}

/// A reusable fan-out with a fixed mode.
#[derive(Debug)]
pub struct Fanout {
    mode: Mode,
    status: Mutex<Status>,
}

impl Fanout {
    #[must_use]
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            status: Mutex::new(Status::Ok),
        }
    }

    /// Convenience constructor from an integer level.
    #[must_use]
    pub fn with_level(level: i32) -> Self {
        Self::new(Mode::from_level(level))
    }

    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    /// Runs one unit of work and stores the worst result. The work runs
    /// once in sync/lazy mode and once per worker in async mode.
    pub fn launch(&self, work: impl Fn() -> Status + Sync) -> Status {
        let folded = match self.mode {
            Mode::Sync | Mode::Lazy => work(),
            Mode::Async(n) => std::thread::scope(|scope| {
                let handles: Vec<_> = (0..n).map(|_| scope.spawn(&work)).collect();
                let mut acc = None;
                for handle in handles {
                    let status = handle
                        .join()
                        .unwrap_or(Status::Fault(crate::errors::Fault::Unknown));
                    acc = fold(acc, status);
                }
                acc.unwrap_or(Status::Ok)
            }),
        };
        *self.status.lock() = folded;
        folded
    }

    /// Drains `next` through `process` across the worker budget.
    ///
    /// Exactly one `process` call happens per yielded item. A worker that
    /// observes a fault stops pulling; the remaining workers keep going.
    pub fn run<I, N, P>(&self, next: N, process: P) -> Status
    where
        I: Send,
        N: FnMut() -> Option<I> + Send,
        P: Fn(I) -> Status + Sync,
    {
        let cursor = Mutex::new(next);

        let worker = || {
            let mut acc = None;
            loop {
                let item = {
                    let mut pull = cursor.lock();
                    pull()
                };
                let Some(item) = item else {
                    return acc.unwrap_or(Status::Ok);
                };
                let status = process(item);
                if status.is_fault() {
                    return status;
                }
                acc = fold(acc, status);
            }
        };

        let folded = match self.mode {
            Mode::Sync | Mode::Lazy => worker(),
            Mode::Async(n) => std::thread::scope(|scope| {
                let handles: Vec<_> = (0..n).map(|_| scope.spawn(&worker)).collect();
                let mut acc = None;
                for handle in handles {
                    let status = handle
                        .join()
                        .unwrap_or(Status::Fault(crate::errors::Fault::Unknown));
                    acc = fold(acc, status);
                }
                acc.unwrap_or(Status::Ok)
            }),
        };
        *self.status.lock() = folded;
        folded
    }

    /// The stored result of the last fan-out.
    #[must_use]
    pub fn wait(&self) -> Status {
        *self.status.lock()
    }
}

/// Fans `process` out over the zones of a slice, one call per zone.
///
/// Distinct mutable borrows are handed to the workers through the shared
/// iterator cursor, so zones can be mutated in parallel without touching
/// each other.
pub fn for_zones(
    fanout: &Fanout,
    zones: &mut [Zone],
    process: impl Fn(&mut Zone) -> Status + Sync,
) -> Status {
    let mut iter = zones.iter_mut();
    fanout.run(move || iter.next(), process)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Fault;
    use crate::geometry::Rect;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn mode_decoding() {
        assert_eq!(Mode::from_level(0), Mode::Sync);
        assert_eq!(Mode::from_level(-1), Mode::Lazy);
        assert_eq!(Mode::from_level(4), Mode::Async(4));
        assert_eq!(Mode::from_level(64), Mode::Async(MAX_WORKERS));
    }

    #[test]
    fn sync_run_processes_every_item_inline() {
        let fanout = Fanout::new(Mode::Sync);
        let calls = AtomicUsize::new(0);
        let mut items = (0..7).collect::<Vec<_>>().into_iter();

        let status = fanout.run(
            move || items.next(),
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Status::Ok
            },
        );
        assert_eq!(status, Status::Ok);
        assert_eq!(calls.load(Ordering::SeqCst), 7);
        assert_eq!(fanout.wait(), Status::Ok);
    }

    #[test]
    fn async_run_still_processes_each_item_once() {
        let fanout = Fanout::new(Mode::Async(4));
        let calls = AtomicUsize::new(0);
        let mut items = (0..100).collect::<Vec<_>>().into_iter();

        fanout.run(
            move || items.next(),
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Status::Ok
            },
        );
        assert_eq!(calls.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn worst_status_is_the_lowest_code() {
        let fanout = Fanout::new(Mode::Sync);
        let mut items = vec![Status::Retry, Status::Ok, Status::NotReady].into_iter();
        let status = fanout.run(move || items.next(), |s| s);
        assert_eq!(status, Status::Ok);

        let mut items = vec![Status::Retry, Status::NotReady].into_iter();
        let status = fanout.run(move || items.next(), |s| s);
        assert_eq!(status, Status::Retry);
    }

    #[test]
    fn faults_win_the_fold() {
        let fanout = Fanout::new(Mode::Async(2));
        let mut items = (0..10).collect::<Vec<i32>>().into_iter();
        let status = fanout.run(
            move || items.next(),
            |i| {
                if i == 3 {
                    Status::Fault(Fault::Undefined)
                } else {
                    Status::Ok
                }
            },
        );
        assert_eq!(status, Status::Fault(Fault::Undefined));
        assert_eq!(fanout.wait(), Status::Fault(Fault::Undefined));
    }

    #[test]
    fn launch_runs_once_per_worker() {
        let calls = AtomicUsize::new(0);
        let fanout = Fanout::new(Mode::Async(3));
        fanout.launch(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Status::Ok
        });
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let calls = AtomicUsize::new(0);
        let fanout = Fanout::new(Mode::Sync);
        fanout.launch(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Status::Ok
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zones_can_be_mutated_in_parallel() {
        let mut zones: Vec<Zone> = (0..20)
            .map(|i| Zone::new(Rect::new(i * 10, 0, 10, 10)))
            .collect();
        let fanout = Fanout::new(Mode::Async(4));
        let status = for_zones(&fanout, &mut zones, |zone| {
            zone.tag += 1;
            Status::Ok
        });
        assert_eq!(status, Status::Ok);
        assert!(zones.iter().all(|z| z.tag == 1));
    }
}
