//! Bounded worker pool for CPU-bound tasks (content hashing).
//!
//! Workers are long-lived threads, each draining its own clone of the work
//! channel's receiver. A task that panics takes its worker down: the worker
//! is replaced and the task is resubmitted once before being reported as
//! [`PoolError::WorkerCrashed`]. Waiters enforce a per-task timeout measured
//! from the moment a worker picks the task up; a hung worker is abandoned and
//! a replacement spawned, and the hung thread retires itself if it ever
//! returns.

use crate::cancel::CancelToken;
use crate::error::PoolError;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

type Deliver = Arc<dyn Fn() + Send + Sync>;
type Fail = Arc<dyn Fn(PoolError) + Send + Sync>;

struct Envelope {
    id: u64,
    attempt: u32,
    run: Deliver,
    fail: Fail,
}

struct Shared {
    sender: Mutex<Option<Sender<Envelope>>>,
    receiver: Receiver<Envelope>,
    in_flight: Mutex<HashMap<u64, Instant>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    target: AtomicUsize,
    live: AtomicUsize,
    crashes: AtomicUsize,
    next_task: AtomicU64,
    next_worker: AtomicUsize,
}

impl Shared {
    fn started_at(&self, id: u64) -> Option<Instant> {
        self.in_flight.lock().unwrap().get(&id).copied()
    }

    fn enqueue(&self, envelope: Envelope) {
        let guard = self.sender.lock().unwrap();
        let rejected = match guard.as_ref() {
            Some(sender) => sender.send(envelope).err().map(|e| e.0),
            None => Some(envelope),
        };
        drop(guard);
        if let Some(envelope) = rejected {
            (envelope.fail)(PoolError::ShutDown);
        }
    }

    /// Give up on a hung task and restore capacity with an extra worker.
    fn abandon(self: &Arc<Self>, id: u64) {
        self.in_flight.lock().unwrap().remove(&id);
        warn!("Task {} timed out, spawning a replacement worker", id);
        spawn_worker(self);
    }

    /// Retire this worker if replacements pushed the pool above its target.
    fn should_retire(&self) -> bool {
        let target = self.target.load(Ordering::SeqCst);
        let live = self.live.load(Ordering::SeqCst);
        live > target
            && self
                .live
                .compare_exchange(live, live - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
    }
}

fn spawn_worker(shared: &Arc<Shared>) {
    let index = shared.next_worker.fetch_add(1, Ordering::SeqCst);
    shared.live.fetch_add(1, Ordering::SeqCst);
    let worker_shared = Arc::clone(shared);
    let rx = shared.receiver.clone();
    let spawned = thread::Builder::new()
        .name(format!("archiver-worker-{}", index))
        .spawn(move || worker_loop(worker_shared, rx, index));
    match spawned {
        Ok(handle) => shared.handles.lock().unwrap().push(handle),
        Err(e) => {
            shared.live.fetch_sub(1, Ordering::SeqCst);
            error!("Failed to spawn worker {}: {}", index, e);
        }
    }
}

fn worker_loop(shared: Arc<Shared>, rx: Receiver<Envelope>, index: usize) {
    for envelope in rx.iter() {
        shared
            .in_flight
            .lock()
            .unwrap()
            .insert(envelope.id, Instant::now());
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (envelope.run)()));
        shared.in_flight.lock().unwrap().remove(&envelope.id);

        if outcome.is_err() {
            shared.crashes.fetch_add(1, Ordering::SeqCst);
            warn!(
                "Worker {} crashed on task {} (attempt {})",
                index, envelope.id, envelope.attempt
            );
            if envelope.attempt == 0 {
                shared.enqueue(Envelope {
                    attempt: 1,
                    ..envelope
                });
            } else {
                (envelope.fail)(PoolError::WorkerCrashed);
            }
            shared.live.fetch_sub(1, Ordering::SeqCst);
            spawn_worker(&shared);
            return;
        }

        // a worker coming back from an abandoned task is surplus
        if shared.should_retire() {
            debug!("Worker {} retiring", index);
            return;
        }
    }
    shared.live.fetch_sub(1, Ordering::SeqCst);
}

/// Pending result of a single submitted task.
pub struct TaskHandle<T> {
    id: u64,
    rx: Receiver<Result<T, PoolError>>,
    shared: Arc<Shared>,
    timeout: Duration,
}

impl<T> TaskHandle<T> {
    /// Block until the task finishes, fails, or runs past the pool timeout.
    pub fn wait(self) -> Result<T, PoolError> {
        loop {
            match self.rx.recv_timeout(POLL_INTERVAL) {
                Ok(result) => return result,
                Err(RecvTimeoutError::Timeout) => {
                    let hung = self
                        .shared
                        .started_at(self.id)
                        .is_some_and(|started| started.elapsed() >= self.timeout);
                    if hung {
                        self.shared.abandon(self.id);
                        return Err(PoolError::Timeout(self.timeout));
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return Err(PoolError::ShutDown),
            }
        }
    }
}

pub struct WorkerPool {
    shared: Arc<Shared>,
    task_timeout: Duration,
}

impl WorkerPool {
    pub fn new(workers: usize, task_timeout: Duration) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let workers = workers.max(1);
        let shared = Arc::new(Shared {
            sender: Mutex::new(Some(sender)),
            receiver,
            in_flight: Mutex::new(HashMap::new()),
            handles: Mutex::new(Vec::new()),
            target: AtomicUsize::new(workers),
            live: AtomicUsize::new(0),
            crashes: AtomicUsize::new(0),
            next_task: AtomicU64::new(1),
            next_worker: AtomicUsize::new(0),
        });
        for _ in 0..workers {
            spawn_worker(&shared);
        }
        debug!("Worker pool started with {} workers", workers);
        Self {
            shared,
            task_timeout,
        }
    }

    pub fn from_config(config: &crate::AppConfig) -> Self {
        Self::new(config.worker_count(), config.task_timeout())
    }

    pub fn worker_count(&self) -> usize {
        self.shared.target.load(Ordering::SeqCst)
    }

    /// Number of tasks that have taken down a worker since startup.
    pub fn crash_count(&self) -> usize {
        self.shared.crashes.load(Ordering::SeqCst)
    }

    fn dispatch<T, F, R>(&self, task: F, reply: R, cancel: Option<CancelToken>) -> u64
    where
        T: Send + 'static,
        F: Fn() -> T + Send + Sync + 'static,
        R: Fn(Result<T, PoolError>) + Send + Sync + 'static,
    {
        let id = self.shared.next_task.fetch_add(1, Ordering::SeqCst);
        let reply = Arc::new(reply);
        let run_reply = Arc::clone(&reply);
        let run: Deliver = Arc::new(move || {
            if cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
                run_reply(Err(PoolError::Cancelled));
                return;
            }
            run_reply(Ok(task()));
        });
        let fail: Fail = Arc::new(move |err| reply(Err(err)));
        self.shared.enqueue(Envelope {
            id,
            attempt: 0,
            run,
            fail,
        });
        id
    }

    pub fn submit<T, F>(&self, task: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let id = self.dispatch(
            task,
            move |result| {
                let _ = tx.try_send(result);
            },
            None,
        );
        TaskHandle {
            id,
            rx,
            shared: Arc::clone(&self.shared),
            timeout: self.task_timeout,
        }
    }

    /// Run a batch and collect results in submission order. `on_progress`
    /// fires in completion order with `(completed, total, index, result)`.
    /// Tasks still queued when `cancel` trips are skipped, and the batch
    /// returns [`PoolError::Cancelled`].
    pub fn submit_batch_with_progress<T, F, P>(
        &self,
        tasks: Vec<F>,
        cancel: &CancelToken,
        mut on_progress: P,
    ) -> Result<Vec<Result<T, PoolError>>, PoolError>
    where
        T: Send + 'static,
        F: Fn() -> T + Send + Sync + 'static,
        P: FnMut(usize, usize, usize, &Result<T, PoolError>),
    {
        let total = tasks.len();
        let (tx, rx) = crossbeam_channel::unbounded::<(usize, Result<T, PoolError>)>();
        let ids: Vec<u64> = tasks
            .into_iter()
            .enumerate()
            .map(|(index, task)| {
                let tx = tx.clone();
                self.dispatch(
                    task,
                    move |result| {
                        let _ = tx.send((index, result));
                    },
                    Some(cancel.clone()),
                )
            })
            .collect();
        drop(tx);

        let mut results: Vec<Option<Result<T, PoolError>>> = (0..total).map(|_| None).collect();
        let mut completed = 0;

        while completed < total {
            if cancel.is_cancelled() {
                return Err(PoolError::Cancelled);
            }
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok((index, result)) => {
                    if results[index].is_none() {
                        completed += 1;
                        on_progress(completed, total, index, &result);
                        results[index] = Some(result);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    for (index, id) in ids.iter().enumerate() {
                        if results[index].is_some() {
                            continue;
                        }
                        let hung = self
                            .shared
                            .started_at(*id)
                            .is_some_and(|started| started.elapsed() >= self.task_timeout);
                        if hung {
                            self.shared.abandon(*id);
                            let result = Err(PoolError::Timeout(self.task_timeout));
                            completed += 1;
                            on_progress(completed, total, index, &result);
                            results[index] = Some(result);
                        }
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        Ok(results
            .into_iter()
            .map(|r| r.unwrap_or(Err(PoolError::ShutDown)))
            .collect())
    }

    /// Stop accepting work, let workers drain the queue, and join them.
    /// Blocks on any worker still stuck in a hung task.
    pub fn shutdown(&self) {
        let sender = self.shared.sender.lock().unwrap().take();
        if sender.is_none() {
            return;
        }
        drop(sender);
        loop {
            let handles: Vec<JoinHandle<()>> =
                std::mem::take(&mut *self.shared.handles.lock().unwrap());
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                let _ = handle.join();
            }
        }
        debug!("Worker pool shut down");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
