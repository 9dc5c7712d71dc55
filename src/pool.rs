//! Fixed-size worker pool with a bounded job queue.
//!
//! The orchestrator owns one pool and reuses it across frames. Jobs are
//! plain closures; workers never submit further jobs. Backed by a
//! `rayon::ThreadPool` for the threads themselves, with a pre-filled
//! bounded `crossbeam_channel` acting as the queue semaphore so that
//! `submit` blocks once `queue_size + nb_threads` jobs are in flight.

use std::sync::{Arc, Condvar, Mutex};

use crossbeam_channel::{Receiver, Sender, bounded};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size thread pool with blocking submit and a completion barrier.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    /// Pre-filled token channel: one token per free queue slot.
    slot_tx: Sender<()>,
    slot_rx: Receiver<()>,
    /// Pending-job counter plus the condvar `wait_all` parks on.
    state: Arc<(Mutex<usize>, Condvar)>,
    nb_threads: usize,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("nb_threads", &self.nb_threads)
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Creates a pool of `nb_threads` workers with `queue_size` queue slots.
    ///
    /// Returns `None` when either argument is zero or the OS refuses to
    /// spawn the threads.
    pub fn new(nb_threads: usize, queue_size: usize) -> Option<Self> {
        if nb_threads < 1 || queue_size < 1 {
            return None;
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(nb_threads)
            .build()
            .ok()?;

        let capacity = queue_size + nb_threads;
        let (slot_tx, slot_rx) = bounded(capacity);
        for _ in 0..capacity {
            slot_tx.send(()).ok()?;
        }

        Some(Self {
            pool,
            slot_tx,
            slot_rx,
            state: Arc::new((Mutex::new(0), Condvar::new())),
            nb_threads,
        })
    }

    /// Number of worker threads.
    pub fn nb_threads(&self) -> usize {
        self.nb_threads
    }

    /// Enqueues a job, blocking while the queue is full.
    pub fn submit(&self, job: Job) {
        // Wait for a free slot; tokens return when jobs finish.
        self.slot_rx.recv().expect("worker pool slot channel closed");

        {
            let (lock, _cvar) = &*self.state;
            *lock.lock().unwrap() += 1;
        }

        let state = Arc::clone(&self.state);
        let slot_tx = self.slot_tx.clone();
        self.pool.spawn(move || {
            job();

            let (lock, cvar) = &*state;
            let mut pending = lock.lock().unwrap();
            *pending -= 1;
            if *pending == 0 {
                cvar.notify_all();
            }
            let _ = slot_tx.send(());
        });
    }

    /// Blocks until every submitted job has completed.
    ///
    /// Does not shut the pool down; further jobs may be submitted after.
    pub fn wait_all(&self) {
        let (lock, cvar) = &*self.state;
        let mut pending = lock.lock().unwrap();
        while *pending > 0 {
            pending = cvar.wait(pending).unwrap();
        }
    }

    /// Runs `f` inside the pool so scoped `rayon` operations (the parallel
    /// match-table build) execute on these workers.
    pub fn install<R: Send>(&self, f: impl FnOnce() -> R + Send) -> R {
        self.pool.install(f)
    }

    /// Borrow the underlying rayon pool.
    pub(crate) fn rayon_pool(&self) -> &rayon::ThreadPool {
        &self.pool
    }
}

impl Drop for WorkerPool {
    /// Drains outstanding jobs, then joins the workers. Dropping an idle
    /// pool is immediate; dropping twice cannot happen by construction.
    fn drop(&mut self) {
        self.wait_all();
    }
}
