//! Worker pool for per-voxel evaluation.
//!
//! Backends receive a [`WorkerPool`] handle instead of reaching for hidden
//! global state. [`WorkerPool::shared`] returns a process-wide pool that is
//! built lazily and rebuilt only when a different size is requested; tests
//! inject [`WorkerPool::single_threaded`] for deterministic scheduling.

use std::sync::{Arc, Mutex, OnceLock};

use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};

/// Cheaply clonable handle to a rayon thread pool.
#[derive(Clone)]
pub struct WorkerPool {
    pool: Arc<ThreadPool>,
    requested_threads: usize,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.pool.current_num_threads())
            .finish()
    }
}

static SHARED: OnceLock<Mutex<Option<WorkerPool>>> = OnceLock::new();

impl WorkerPool {
    /// Pool with at most `max_threads` workers, 0 = all hardware threads.
    pub fn new(max_threads: usize) -> Result<Self, ThreadPoolBuildError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(max_threads)
            .thread_name(|i| format!("rd-worker-{}", i))
            .build()?;
        Ok(Self {
            pool: Arc::new(pool),
            requested_threads: max_threads,
        })
    }

    pub fn single_threaded() -> Result<Self, ThreadPoolBuildError> {
        Self::new(1)
    }

    /// Process-wide pool sized to `max_threads` (0 = all hardware threads).
    pub fn shared(max_threads: usize) -> Result<Self, ThreadPoolBuildError> {
        let slot = SHARED.get_or_init(|| Mutex::new(None));
        let mut guard = match slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match guard.as_ref() {
            Some(pool) if pool.requested_threads == max_threads => Ok(pool.clone()),
            _ => {
                let pool = Self::new(max_threads)?;
                log::debug!("Shared worker pool sized to {} threads", pool.num_threads());
                *guard = Some(pool.clone());
                Ok(pool)
            }
        }
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `op` inside this pool; rayon parallel iterators in `op` use its workers.
    pub fn install<OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(op)
    }
}
