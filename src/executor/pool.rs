//! Named worker pools for running continuations.

use core::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};

use crate::tracing_compat::{debug, warn};

/// Default idle timeout before retiring threads above the floor.
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration options for a [`ContinuationPool`].
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// How long a thread above the floor may sit idle before retiring.
    pub idle_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

/// Error returned when work is submitted to a pool that has shut down.
#[derive(Debug, thiserror::Error)]
#[error("pool `{name}` is shut down")]
pub struct PoolClosed {
    /// The pool that rejected the submission.
    pub name: String,
}

/// A named pool of OS threads executing submitted closures in FIFO
/// order.
///
/// Threads grow lazily up to the ceiling and retire down to the floor
/// when idle. Dropping the pool shuts it down and drains in-flight work.
pub struct ContinuationPool {
    inner: Arc<PoolInner>,
}

/// A cloneable handle to a [`ContinuationPool`].
///
/// Handles share the pool's state; they do not keep worker threads alive
/// past the owning pool's shutdown.
#[derive(Clone)]
pub struct PoolHandle {
    inner: Arc<PoolInner>,
}

/// Completion handle for one submitted closure.
pub struct SpawnHandle {
    completion: Arc<Completion>,
}

struct PoolInner {
    name: String,
    min_threads: usize,
    max_threads: usize,
    /// Threads currently alive.
    live: AtomicUsize,
    /// Threads currently executing a job.
    busy: AtomicUsize,
    /// Jobs queued but not yet picked up.
    pending: AtomicUsize,
    /// Monotonic worker name suffix.
    worker_seq: AtomicUsize,
    queue: SegQueue<Job>,
    shutdown: AtomicBool,
    /// Pairs with `condvar` for thread parking.
    park: Mutex<()>,
    condvar: Condvar,
    idle_timeout: Duration,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

struct Job {
    run: Box<dyn FnOnce() + Send>,
    completion: Arc<Completion>,
}

struct Completion {
    done: AtomicBool,
    lock: Mutex<()>,
    condvar: Condvar,
}

impl Completion {
    fn new() -> Self {
        Self {
            done: AtomicBool::new(false),
            lock: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }

    fn signal(&self) {
        self.done.store(true, Ordering::Release);
        let _guard = self.lock.lock();
        self.condvar.notify_all();
    }

    fn wait(&self) {
        let mut guard = self.lock.lock();
        while !self.done.load(Ordering::Acquire) {
            self.condvar.wait(&mut guard);
        }
    }

    fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock.lock();
        while !self.done.load(Ordering::Acquire) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            self.condvar.wait_for(&mut guard, remaining);
        }
        true
    }
}

impl SpawnHandle {
    /// Returns `true` once the closure has run.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.completion.done.load(Ordering::Acquire)
    }

    /// Blocks the calling thread until the closure has run.
    pub fn wait(&self) {
        self.completion.wait();
    }

    /// Blocks until the closure has run or `timeout` elapses; returns
    /// `true` on completion.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.completion.wait_timeout(timeout)
    }
}

impl fmt::Debug for SpawnHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpawnHandle")
            .field("done", &self.is_done())
            .finish()
    }
}

impl ContinuationPool {
    /// Creates a pool named `name` with the given thread floor and
    /// ceiling.
    ///
    /// # Panics
    ///
    /// Panics if `max_threads` is 0.
    #[must_use]
    pub fn new(name: impl Into<String>, min_threads: usize, max_threads: usize) -> Self {
        Self::with_options(name, min_threads, max_threads, PoolOptions::default())
    }

    /// Creates a pool with explicit [`PoolOptions`].
    #[must_use]
    pub fn with_options(
        name: impl Into<String>,
        min_threads: usize,
        max_threads: usize,
        options: PoolOptions,
    ) -> Self {
        assert!(max_threads > 0, "max_threads must be at least 1");
        let inner = Arc::new(PoolInner {
            name: name.into(),
            min_threads,
            max_threads: max_threads.max(min_threads),
            live: AtomicUsize::new(0),
            busy: AtomicUsize::new(0),
            pending: AtomicUsize::new(0),
            worker_seq: AtomicUsize::new(0),
            queue: SegQueue::new(),
            shutdown: AtomicBool::new(false),
            park: Mutex::new(()),
            condvar: Condvar::new(),
            idle_timeout: options.idle_timeout,
            handles: Mutex::new(Vec::new()),
        });

        for _ in 0..min_threads {
            spawn_worker(&inner);
        }
        Self { inner }
    }

    /// Returns the pool's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns a cloneable handle to this pool.
    #[must_use]
    pub fn handle(&self) -> PoolHandle {
        PoolHandle {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Submits a closure for execution.
    ///
    /// # Errors
    ///
    /// [`PoolClosed`] once [`shutdown`](Self::shutdown) has been called.
    pub fn spawn(&self, f: impl FnOnce() + Send + 'static) -> Result<SpawnHandle, PoolClosed> {
        submit(&self.inner, Box::new(f))
    }

    /// Returns the number of live worker threads.
    #[must_use]
    pub fn live_threads(&self) -> usize {
        self.inner.live.load(Ordering::Relaxed)
    }

    /// Returns the number of queued, not-yet-started jobs.
    #[must_use]
    pub fn pending_jobs(&self) -> usize {
        self.inner.pending.load(Ordering::Relaxed)
    }

    /// Returns `true` once shutdown has begun.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Begins shutdown: no new submissions are accepted, queued jobs
    /// still run.
    pub fn shutdown(&self) {
        self.inner.begin_shutdown();
    }

    /// Shuts down and waits up to `timeout` for workers to drain and
    /// exit. Returns `true` when every thread exited in time.
    pub fn shutdown_and_wait(&self, timeout: Duration) -> bool {
        self.inner.shutdown_and_wait(timeout)
    }
}

impl Drop for ContinuationPool {
    fn drop(&mut self) {
        let _ = self.inner.shutdown_and_wait(Duration::from_secs(5));
    }
}

impl fmt::Debug for ContinuationPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContinuationPool")
            .field("name", &self.inner.name)
            .field("min_threads", &self.inner.min_threads)
            .field("max_threads", &self.inner.max_threads)
            .field("live", &self.inner.live.load(Ordering::Relaxed))
            .field("pending", &self.inner.pending.load(Ordering::Relaxed))
            .finish()
    }
}

impl PoolHandle {
    /// Returns the pool's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Submits a closure for execution.
    ///
    /// # Errors
    ///
    /// [`PoolClosed`] once the pool has shut down.
    pub fn spawn(&self, f: impl FnOnce() + Send + 'static) -> Result<SpawnHandle, PoolClosed> {
        submit(&self.inner, Box::new(f))
    }

    /// Returns `true` once the pool has begun shutting down.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    pub(crate) fn shutdown_and_wait(&self, timeout: Duration) -> bool {
        self.inner.shutdown_and_wait(timeout)
    }
}

impl fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolHandle")
            .field("name", &self.inner.name)
            .field("live", &self.inner.live.load(Ordering::Relaxed))
            .finish()
    }
}

impl PoolInner {
    fn begin_shutdown(&self) {
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            debug!(pool = %self.name, "pool shutting down");
        }
        let _guard = self.park.lock();
        self.condvar.notify_all();
    }

    fn shutdown_and_wait(&self, timeout: Duration) -> bool {
        self.begin_shutdown();
        let deadline = Instant::now() + timeout;

        // Workers decrement `live` as they exit the loop.
        while self.live.load(Ordering::Acquire) > 0 {
            if Instant::now() >= deadline {
                warn!(pool = %self.name, "pool drain timed out");
                return false;
            }
            {
                let _guard = self.park.lock();
                self.condvar.notify_all();
            }
            thread::sleep(Duration::from_millis(5));
        }

        for handle in self.handles.lock().drain(..) {
            let _ = handle.join();
        }
        true
    }
}

fn submit(inner: &Arc<PoolInner>, run: Box<dyn FnOnce() + Send>) -> Result<SpawnHandle, PoolClosed> {
    if inner.shutdown.load(Ordering::Acquire) {
        return Err(PoolClosed {
            name: inner.name.clone(),
        });
    }

    let completion = Arc::new(Completion::new());
    inner.queue.push(Job {
        run,
        completion: Arc::clone(&completion),
    });
    inner.pending.fetch_add(1, Ordering::Relaxed);

    // Grow if every live thread is busy and there is headroom.
    let live = inner.live.load(Ordering::Acquire);
    if live < inner.max_threads && inner.busy.load(Ordering::Acquire) >= live {
        spawn_worker(inner);
    }
    {
        let _guard = inner.park.lock();
        inner.condvar.notify_one();
    }

    Ok(SpawnHandle { completion })
}

fn spawn_worker(inner: &Arc<PoolInner>) {
    let seq = inner.worker_seq.fetch_add(1, Ordering::Relaxed);
    let name = format!("{}-worker-{seq}", inner.name);
    inner.live.fetch_add(1, Ordering::AcqRel);

    let worker_inner = Arc::clone(inner);
    let spawned = thread::Builder::new().name(name).spawn(move || {
        worker_loop(&worker_inner);
        worker_inner.live.fetch_sub(1, Ordering::AcqRel);
    });

    match spawned {
        Ok(handle) => inner.handles.lock().push(handle),
        Err(err) => {
            inner.live.fetch_sub(1, Ordering::AcqRel);
            warn!(pool = %inner.name, error = %err, "failed to spawn worker thread");
        }
    }
}

fn worker_loop(inner: &Arc<PoolInner>) {
    loop {
        if let Some(job) = inner.queue.pop() {
            inner.pending.fetch_sub(1, Ordering::Relaxed);
            inner.busy.fetch_add(1, Ordering::AcqRel);
            run_job(inner, job);
            inner.busy.fetch_sub(1, Ordering::AcqRel);
            continue;
        }

        if inner.shutdown.load(Ordering::Acquire) {
            return;
        }

        // Park until woken or the idle timeout elapses.
        let timed_out = {
            let mut guard = inner.park.lock();
            // Re-check under the lock: a submit may have raced the park.
            if !inner.queue.is_empty() || inner.shutdown.load(Ordering::Acquire) {
                false
            } else {
                inner
                    .condvar
                    .wait_for(&mut guard, inner.idle_timeout)
                    .timed_out()
            }
        };

        if timed_out
            && inner.queue.is_empty()
            && inner.live.load(Ordering::Acquire) > inner.min_threads
        {
            // Retire: above the floor and nothing to do.
            return;
        }
    }
}

fn run_job(inner: &Arc<PoolInner>, job: Job) {
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job.run));
    if outcome.is_err() {
        warn!(pool = %inner.name, "continuation panicked");
    }
    job.completion.signal();
}
