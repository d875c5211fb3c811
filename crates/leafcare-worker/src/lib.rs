//! Inference pool for leafcare classifiers.
//!
//! [`InferencePool`] runs a [`ClassifierPort`] on a fixed set of worker
//! threads fed by a bounded job queue. Each call waits at most a fixed
//! timeout for its reply. [`PooledClassifier`] wraps a pool back into a
//! [`ClassifierPort`], so the cascade does not know it is there.
//!
//! A call that times out cancels its job: a queued job is removed from
//! the queue, freeing its slot and its tensor at once, and a running
//! job's tensor is released as soon as the model returns. A full queue
//! refuses new calls immediately with [`ClassifierError::Overloaded`].

use std::collections::VecDeque;
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use leafcare_pipeline::{ClassifierError, ClassifierPort, InputTensor};

/// Sizing and timeout for an [`InferencePool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of worker threads.
    pub workers: usize,
    /// Jobs that may wait while every worker is busy. Zero means a call
    /// is accepted only if a worker is idle.
    pub queue_capacity: usize,
    /// Longest time a call waits for its reply.
    pub timeout: Duration,
}

impl PoolConfig {
    /// Default number of worker threads.
    pub const DEFAULT_WORKERS: usize = 2;
    /// Default queue capacity.
    pub const DEFAULT_QUEUE_CAPACITY: usize = 8;
    /// Default per-call timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: Self::DEFAULT_WORKERS,
            queue_capacity: Self::DEFAULT_QUEUE_CAPACITY,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }
}

/// Errors raised while starting a pool.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// `workers` was zero.
    #[error("inference pool needs at least one worker")]
    NoWorkers,

    /// `timeout` was zero.
    #[error("inference timeout must be positive")]
    ZeroTimeout,

    /// The OS refused to start a worker thread.
    #[error("failed to spawn inference worker: {0}")]
    Spawn(#[from] std::io::Error),
}

type Reply = Result<Vec<f32>, ClassifierError>;

/// One submitted call. `input` is `None` once the job is cancelled or
/// a worker has taken it.
struct Job {
    input: Mutex<Option<InputTensor>>,
    reply: SyncSender<Reply>,
}

impl Job {
    fn take_input(&self) -> Option<InputTensor> {
        self.input
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

#[derive(Default)]
struct Queue {
    jobs: VecDeque<Arc<Job>>,
    /// Workers blocked waiting for a job.
    idle: usize,
    closed: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    ready: Condvar,
    capacity: usize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }
}

/// Worker threads serving one classifier.
pub struct InferencePool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    timeout: Duration,
}

impl InferencePool {
    /// Start `config.workers` threads serving `model`.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError`] if the configuration is unusable or a
    /// thread cannot be spawned.
    pub fn new(model: Arc<dyn ClassifierPort>, config: PoolConfig) -> Result<Self, PoolError> {
        if config.workers == 0 {
            return Err(PoolError::NoWorkers);
        }
        if config.timeout.is_zero() {
            return Err(PoolError::ZeroTimeout);
        }

        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue::default()),
            ready: Condvar::new(),
            capacity: config.queue_capacity,
        });
        let mut workers = Vec::with_capacity(config.workers);
        for id in 0..config.workers {
            let model = Arc::clone(&model);
            let worker_shared = Arc::clone(&shared);
            let spawned = std::thread::Builder::new()
                .name(format!("leafcare-infer-{id}"))
                .spawn(move || worker_loop(id, model.as_ref(), &worker_shared));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    shared.close();
                    return Err(e.into());
                }
            }
        }
        log::info!(
            "inference pool started: workers={} queue={} timeout={:?}",
            config.workers,
            config.queue_capacity,
            config.timeout,
        );

        Ok(Self {
            shared,
            workers,
            timeout: config.timeout,
        })
    }

    /// Per-call timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Jobs waiting for a worker.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.shared.lock().jobs.len()
    }

    /// Run one prediction with the pool's timeout.
    ///
    /// # Errors
    ///
    /// See [`submit_with_timeout`](Self::submit_with_timeout).
    pub fn submit(&self, input: &InputTensor) -> Result<Vec<f32>, ClassifierError> {
        self.submit_with_timeout(input, self.timeout)
    }

    /// Run one prediction, waiting at most `timeout` for the reply.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifierError::Overloaded`] if the queue is full,
    /// [`ClassifierError::Timeout`] if no reply arrives in time,
    /// [`ClassifierError::Unavailable`] once the pool is shut down, or
    /// whatever the model itself returned.
    pub fn submit_with_timeout(
        &self,
        input: &InputTensor,
        timeout: Duration,
    ) -> Result<Vec<f32>, ClassifierError> {
        let (reply, response) = mpsc::sync_channel(1);
        let job = Arc::new(Job {
            input: Mutex::new(Some(input.clone())),
            reply,
        });

        {
            let mut queue = self.shared.lock();
            if queue.closed {
                return Err(ClassifierError::Unavailable(
                    "inference pool is shut down".to_string(),
                ));
            }
            // Idle workers absorb queued jobs before they count against
            // the capacity.
            if queue.jobs.len() >= self.shared.capacity + queue.idle {
                log::warn!("inference queue full; refusing call");
                return Err(ClassifierError::Overloaded);
            }
            queue.jobs.push_back(Arc::clone(&job));
        }
        self.shared.ready.notify_one();

        match response.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                self.cancel(&job);
                log::warn!("inference call timed out after {timeout:?}");
                Err(ClassifierError::Timeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(ClassifierError::Failed(
                "inference worker exited without replying".to_string(),
            )),
        }
    }

    /// Withdraw a job from the queue and release its tensor. A job a
    /// worker already holds keeps running; its reply is discarded.
    fn cancel(&self, job: &Arc<Job>) {
        self.shared.lock().jobs.retain(|queued| !Arc::ptr_eq(queued, job));
        drop(job.take_input());
    }

    /// Stop accepting calls and wait for every worker to finish its
    /// current job.
    pub fn shutdown(mut self) {
        self.shared.close();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::warn!("inference worker panicked");
            }
        }
    }
}

impl Drop for InferencePool {
    /// Closes the queue. Workers exit after their current job; a hung
    /// model call is not waited for.
    fn drop(&mut self) {
        self.shared.close();
    }
}

fn worker_loop(id: usize, model: &dyn ClassifierPort, shared: &Shared) {
    loop {
        let job = {
            let mut queue = shared.lock();
            queue.idle += 1;
            let mut queue = shared
                .ready
                .wait_while(queue, |q| q.jobs.is_empty() && !q.closed)
                .unwrap_or_else(PoisonError::into_inner);
            queue.idle -= 1;
            if queue.closed {
                break;
            }
            queue.jobs.pop_front()
        };
        let Some(job) = job else {
            continue;
        };

        let Some(input) = job.take_input() else {
            log::debug!("worker {id}: skipping cancelled job");
            continue;
        };
        let result = model.predict(&input);
        drop(input);
        if job.reply.send(result).is_err() {
            log::debug!("worker {id}: caller gave up; discarding result");
        }
    }
    log::debug!("worker {id}: queue closed, exiting");
}

/// A [`ClassifierPort`] served by an [`InferencePool`].
pub struct PooledClassifier {
    pool: InferencePool,
    labels: Option<Vec<String>>,
}

impl PooledClassifier {
    /// Start a pool for `model`, keeping the labels it declares.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError`] if the pool cannot start.
    pub fn new(model: Arc<dyn ClassifierPort>, config: PoolConfig) -> Result<Self, PoolError> {
        let labels = model.labels();
        Ok(Self {
            pool: InferencePool::new(model, config)?,
            labels,
        })
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &InferencePool {
        &self.pool
    }
}

impl ClassifierPort for PooledClassifier {
    fn predict(&self, input: &InputTensor) -> Result<Vec<f32>, ClassifierError> {
        self.pool.submit(input)
    }

    fn labels(&self) -> Option<Vec<String>> {
        self.labels.clone()
    }
}
