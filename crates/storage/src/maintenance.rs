//! Background maintenance runner
//!
//! One worker thread drains a FIFO of cleanup closures (compaction passes,
//! segment recompression) and optionally fires a periodic tick (the
//! snapshot schedule) when the queue stays quiet for the tick interval.
//!
//! Work submitted here must never block the commit path: the rotation
//! callback only enqueues, and task failures are the task's own problem to
//! log.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::debug;

/// A queued maintenance task.
pub type Task = Box<dyn FnOnce() + Send>;

/// The periodic tick body.
pub type PeriodicTask = Box<dyn Fn() + Send + Sync>;

/// Error returned when submitting to a runner that has shut down.
#[derive(Debug)]
pub struct MaintenanceClosed;

impl std::fmt::Display for MaintenanceClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "maintenance runner has shut down")
    }
}

impl std::error::Error for MaintenanceClosed {}

struct RunnerInner {
    queue: Mutex<VecDeque<Task>>,
    work_ready: Condvar,
    drained: Condvar,
    shutdown: AtomicBool,
    queue_depth: AtomicUsize,
    active: AtomicUsize,
}

/// Single-worker background task runner with an optional periodic tick.
pub struct MaintenanceRunner {
    inner: Arc<RunnerInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MaintenanceRunner {
    /// Start the worker thread. With `periodic`, the given closure runs
    /// whenever the queue has been idle for the interval.
    pub fn start(periodic: Option<(Duration, PeriodicTask)>) -> Self {
        let inner = Arc::new(RunnerInner {
            queue: Mutex::new(VecDeque::new()),
            work_ready: Condvar::new(),
            drained: Condvar::new(),
            shutdown: AtomicBool::new(false),
            queue_depth: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
        });

        let worker_inner = Arc::clone(&inner);
        let handle = std::thread::Builder::new()
            .name("hearth-maintenance".to_string())
            .spawn(move || worker_loop(&worker_inner, periodic))
            .expect("failed to spawn maintenance worker thread");

        MaintenanceRunner {
            inner,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Enqueue a task. Fails once the runner has shut down.
    pub fn submit(&self, task: Task) -> Result<(), MaintenanceClosed> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(MaintenanceClosed);
        }
        {
            let mut queue = self.inner.queue.lock();
            queue.push_back(task);
            self.inner.queue_depth.fetch_add(1, Ordering::Release);
        }
        self.inner.work_ready.notify_one();
        Ok(())
    }

    /// Block until every queued and in-flight task has finished. The worker
    /// keeps running afterwards.
    pub fn drain(&self) {
        let mut queue = self.inner.queue.lock();
        while self.inner.queue_depth.load(Ordering::Acquire) > 0
            || self.inner.active.load(Ordering::Acquire) > 0
        {
            self.inner.drained.wait(&mut queue);
        }
    }

    /// Signal shutdown and join the worker. Remaining queued tasks are
    /// drained first; the periodic tick no longer fires.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        {
            // Holding the queue lock while notifying closes the window where
            // the worker checked the flag but has not yet entered wait()
            let _queue = self.inner.queue.lock();
            self.inner.work_ready.notify_all();
        }

        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        debug!(target: "hearth::maintenance", "Maintenance runner stopped");
    }
}

impl Drop for MaintenanceRunner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

enum Next {
    Task(Task),
    Periodic,
    Exit,
}

fn worker_loop(inner: &RunnerInner, periodic: Option<(Duration, PeriodicTask)>) {
    loop {
        let next = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(task) = queue.pop_front() {
                    inner.queue_depth.fetch_sub(1, Ordering::Release);
                    inner.active.fetch_add(1, Ordering::Release);
                    break Next::Task(task);
                }
                if inner.shutdown.load(Ordering::Acquire) {
                    break Next::Exit;
                }
                match &periodic {
                    Some((interval, _)) => {
                        if inner.work_ready.wait_for(&mut queue, *interval).timed_out() {
                            if inner.shutdown.load(Ordering::Acquire) {
                                break Next::Exit;
                            }
                            break Next::Periodic;
                        }
                    }
                    None => inner.work_ready.wait(&mut queue),
                }
            }
        };

        match next {
            Next::Task(task) => {
                task();
                let _queue = inner.queue.lock();
                inner.active.fetch_sub(1, Ordering::Release);
                inner.drained.notify_all();
            }
            Next::Periodic => {
                if let Some((_, tick)) = &periodic {
                    tick();
                }
            }
            Next::Exit => return,
        }
    }
}
