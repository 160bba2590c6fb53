//! Execution context injected into long-running matching passes.
//!
//! An [`Executor`] either owns a rayon pool or runs everything on the
//! calling thread. [`TaskContext`] adds the caller's progress callback and
//! cancellation flag.

use rayon::prelude::*;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::error::{MatchError, MatchResult};

pub struct Executor {
    pool: Option<rayon::ThreadPool>,
}

impl Executor {
    /// Runs work items one after another on the calling thread.
    pub fn sequential() -> Self {
        Self { pool: None }
    }

    /// A dedicated pool; `threads == 0` sizes it from the available
    /// hardware parallelism.
    pub fn parallel(threads: usize) -> anyhow::Result<Self> {
        let threads = if threads == 0 {
            std::thread::available_parallelism().map_or(1, |n| n.get())
        } else {
            threads
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("class-matcher-{i}"))
            .build()?;
        Ok(Self { pool: Some(pool) })
    }

    pub fn threads(&self) -> usize {
        self.pool.as_ref().map_or(1, |p| p.current_num_threads())
    }

    /// Applies `f` to every item, stopping at the first error. Item order
    /// is unspecified when running on a pool.
    pub fn try_for_each<T, E, F>(&self, items: &[T], f: F) -> Result<(), E>
    where
        T: Sync,
        E: Send,
        F: Fn(&T) -> Result<(), E> + Sync + Send,
    {
        match &self.pool {
            Some(pool) => pool.install(|| items.par_iter().try_for_each(&f)),
            None => items.iter().try_for_each(f),
        }
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor").field("threads", &self.threads()).finish()
    }
}

/// Progress callback: fraction in `[0, 1]`, negative when indeterminate.
pub type ProgressFn<'p> = dyn Fn(f64) + Sync + 'p;

/// Executor, progress callback and cancellation flag for one job.
///
/// Each context owns a span of the job's overall progress. Nested passes
/// get a narrower span through [`TaskContext::subrange`], so reports seen
/// by the callback never move backwards across passes.
pub struct TaskContext<'a> {
    pub executor: &'a Executor,
    pub progress: &'a ProgressFn<'a>,
    pub cancel: Arc<AtomicBool>,
    span: (f64, f64),
}

impl<'a> TaskContext<'a> {
    pub fn new(executor: &'a Executor, progress: &'a ProgressFn<'a>, cancel: Arc<AtomicBool>) -> Self {
        Self {
            executor,
            progress,
            cancel,
            span: (0.0, 1.0),
        }
    }

    // exact at both ends so adjacent spans share their boundary
    fn position(&self, fraction: f64) -> f64 {
        let (lo, hi) = self.span;
        if fraction >= 1.0 {
            hi
        } else {
            (lo + (hi - lo) * fraction.max(0.0)).min(hi)
        }
    }

    /// Context reporting into `[start, end]` of this context's span.
    pub fn subrange(&self, start: f64, end: f64) -> TaskContext<'a> {
        TaskContext {
            executor: self.executor,
            progress: self.progress,
            cancel: Arc::clone(&self.cancel),
            span: (self.position(start), self.position(end)),
        }
    }

    /// Reports `fraction` of this context's span.
    pub fn report(&self, fraction: f64) {
        (self.progress)(self.position(fraction));
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub fn check_cancelled(&self) -> MatchResult<()> {
        if self.is_cancelled() {
            return Err(MatchError::Cancelled);
        }
        Ok(())
    }
}

fn no_progress(_: f64) {}

/// Context without progress reporting or outside cancellation.
pub fn quiet(executor: &Executor) -> TaskContext<'_> {
    TaskContext::new(executor, &no_progress, Arc::new(AtomicBool::new(false)))
}

/// Counts finished work items and reports progress roughly every
/// `total / 100` items.
pub struct ProgressTracker<'a> {
    done: AtomicUsize,
    // highest count handed to the callback; workers race on the counter
    reported: Mutex<usize>,
    total: usize,
    step: usize,
    ctx: &'a TaskContext<'a>,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(total: usize, ctx: &'a TaskContext<'a>) -> Self {
        Self {
            done: AtomicUsize::new(0),
            reported: Mutex::new(0),
            total,
            step: (total / 100).max(1),
            ctx,
        }
    }

    pub fn advance(&self) {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        if done % self.step != 0 && done != self.total {
            return;
        }
        let mut reported = self.reported.lock().unwrap_or_else(|e| e.into_inner());
        if done > *reported {
            *reported = done;
            self.ctx.report(done as f64 / self.total.max(1) as f64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_stops_at_first_error() {
        let executor = Executor::sequential();
        let seen = Mutex::new(Vec::new());
        let result = executor.try_for_each(&[1, 2, 3, 4], |&i| {
            seen.lock().unwrap().push(i);
            if i == 2 { Err(i) } else { Ok(()) }
        });
        assert_eq!(result, Err(2));
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn parallel_visits_every_item() {
        let executor = Executor::parallel(2).unwrap();
        assert_eq!(executor.threads(), 2);
        let sum = AtomicUsize::new(0);
        executor
            .try_for_each(&(1..=100).collect::<Vec<usize>>(), |&i| {
                sum.fetch_add(i, Ordering::Relaxed);
                Ok::<(), ()>(())
            })
            .unwrap();
        assert_eq!(sum.load(Ordering::Relaxed), 5050);
    }

    #[test]
    fn progress_is_reported_coarsely_and_reaches_one() {
        let reports = Mutex::new(Vec::new());
        {
            let executor = Executor::sequential();
            let record = |p: f64| reports.lock().unwrap().push(p);
            let ctx = TaskContext::new(&executor, &record, Arc::new(AtomicBool::new(false)));
            let tracker = ProgressTracker::new(250, &ctx);
            for _ in 0..250 {
                tracker.advance();
            }
        }
        let reports = reports.into_inner().unwrap();
        assert!(reports.len() <= 126);
        assert_eq!(reports.last().copied(), Some(1.0));
        assert!(reports.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn parallel_progress_never_moves_backwards() {
        let reports = Mutex::new(Vec::new());
        {
            let executor = Executor::parallel(4).unwrap();
            let record = |p: f64| reports.lock().unwrap().push(p);
            let ctx = TaskContext::new(&executor, &record, Arc::new(AtomicBool::new(false)));
            let tracker = ProgressTracker::new(1000, &ctx);
            executor
                .try_for_each(&(0..1000).collect::<Vec<usize>>(), |_| {
                    tracker.advance();
                    Ok::<(), ()>(())
                })
                .unwrap();
        }
        let reports = reports.into_inner().unwrap();
        assert!(reports.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(reports.last().copied(), Some(1.0));
    }

    #[test]
    fn subranges_map_into_parent_span() {
        let reports = Mutex::new(Vec::new());
        {
            let executor = Executor::sequential();
            let record = |p: f64| reports.lock().unwrap().push(p);
            let ctx = TaskContext::new(&executor, &record, Arc::new(AtomicBool::new(false)));
            let stage = ctx.subrange(0.5, 1.0);
            stage.report(0.0);
            stage.subrange(0.5, 1.0).report(0.5);
            stage.report(2.0);
        }
        assert_eq!(reports.into_inner().unwrap(), vec![0.5, 0.875, 1.0]);
    }

    #[test]
    fn cancellation_flag_is_observed() {
        let executor = Executor::sequential();
        let ctx = quiet(&executor);
        assert!(ctx.check_cancelled().is_ok());
        ctx.cancel.store(true, Ordering::Relaxed);
        assert!(matches!(ctx.check_cancelled(), Err(MatchError::Cancelled)));
    }
}
