//! Fixed-size worker pool implementing [`TaskDispatcher`].
//!
//! Workers share one FIFO queue guarded by a mutex and condition variable.
//! The pool is resized by spawning workers or by queueing stop markers, so a
//! shrinking pool still finishes the work queued ahead of the markers.
use std::{
    any::Any,
    collections::VecDeque,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};

use crate::ports::{
    dispatcher::{Rejected, TaskDispatcher},
    task::ServiceTask,
};

enum Job {
    Run(Box<dyn ServiceTask>),
    Stop,
}

#[derive(Default)]
struct PoolState {
    jobs: VecDeque<Job>,
    /// Workers that have not been told to stop
    target: usize,
    /// Workers whose loop has not returned yet
    alive: usize,
    shut_down: bool,
}

#[derive(Default)]
struct Shared {
    state: Mutex<PoolState>,
    job_ready: Condvar,
    worker_exited: Condvar,
}

pub struct ThreadedTaskDispatcher {
    shared: Arc<Shared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    next_worker_id: AtomicUsize,
}

impl ThreadedTaskDispatcher {
    /// An empty pool; call [`TaskDispatcher::set_thread_count`] to start workers.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            handles: Mutex::new(Vec::new()),
            next_worker_id: AtomicUsize::new(0),
        }
    }

    pub fn with_threads(count: usize) -> Self {
        let pool = Self::new();
        pool.set_thread_count(count);
        pool
    }

    /// Workers currently expected to be running.
    pub fn thread_count(&self) -> usize {
        self.shared.state.lock().target
    }

    /// Tasks waiting for a worker.
    pub fn queued(&self) -> usize {
        self.shared
            .state
            .lock()
            .jobs
            .iter()
            .filter(|job| matches!(job, Job::Run(_)))
            .count()
    }

    fn spawn_worker(&self) -> std::io::Result<()> {
        let id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name(format!("gantry-worker-{id}"))
            .spawn(move || worker_loop(&shared, id))?;

        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
        Ok(())
    }
}

impl Default for ThreadedTaskDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskDispatcher for ThreadedTaskDispatcher {
    fn set_thread_count(&self, count: usize) {
        let to_spawn = {
            let mut state = self.shared.state.lock();
            if state.shut_down {
                return;
            }
            if count < state.target {
                for _ in count..state.target {
                    state.jobs.push_back(Job::Stop);
                }
                self.shared.job_ready.notify_all();
                state.target = count;
                0
            } else {
                let missing = count - state.target;
                state.target = count;
                state.alive += missing;
                missing
            }
        };

        for _ in 0..to_spawn {
            if let Err(e) = self.spawn_worker() {
                tracing::error!("Failed to start worker thread: {}", e);
                let mut state = self.shared.state.lock();
                state.target -= 1;
                state.alive -= 1;
            }
        }
        tracing::debug!("Worker pool resized to {} threads", count);
    }

    fn submit(&self, task: Box<dyn ServiceTask>) -> Result<(), Rejected> {
        let mut state = self.shared.state.lock();
        if state.shut_down {
            return Err(Rejected(task));
        }
        state.jobs.push_back(Job::Run(task));
        self.shared.job_ready.notify_one();
        Ok(())
    }

    fn shutdown(&self, cancel_pending: bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;

        let cancelled = {
            let mut state = self.shared.state.lock();
            state.shut_down = true;

            let cancelled: Vec<Box<dyn ServiceTask>> = if cancel_pending {
                state
                    .jobs
                    .drain(..)
                    .filter_map(|job| match job {
                        Job::Run(task) => Some(task),
                        Job::Stop => None,
                    })
                    .collect()
            } else {
                Vec::new()
            };

            // Workers already told to stop keep their markers; the rest get one each.
            let pending_stops = state.jobs.iter().filter(|j| matches!(j, Job::Stop)).count();
            let live_without_marker = state.alive.saturating_sub(pending_stops);
            for _ in 0..live_without_marker {
                state.jobs.push_back(Job::Stop);
            }
            state.target = 0;
            self.shared.job_ready.notify_all();
            cancelled
        };

        if !cancelled.is_empty() {
            tracing::info!("Cancelling {} queued tasks", cancelled.len());
        }
        for task in cancelled {
            task.cancel();
        }

        let mut state = self.shared.state.lock();
        while state.alive > 0 {
            if self
                .shared
                .worker_exited
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                break;
            }
        }
        let clean = state.alive == 0;
        drop(state);

        if clean {
            for handle in self.handles.lock().drain(..) {
                let _ = handle.join();
            }
        } else {
            tracing::warn!("Worker pool did not stop within {:?}", timeout);
        }
        clean
    }
}

fn worker_loop(shared: &Shared, id: usize) {
    tracing::trace!(worker = id, "Worker started");
    loop {
        let job = {
            let mut state = shared.state.lock();
            loop {
                if let Some(job) = state.jobs.pop_front() {
                    break job;
                }
                shared.job_ready.wait(&mut state);
            }
        };

        match job {
            Job::Stop => break,
            Job::Run(task) => {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| task.service())) {
                    tracing::error!(worker = id, "Task panicked: {}", panic_message(&*payload));
                }
            }
        }
    }

    let mut state = shared.state.lock();
    state.alive -= 1;
    shared.worker_exited.notify_all();
    tracing::trace!(worker = id, "Worker stopped");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic payload"
    }
}
