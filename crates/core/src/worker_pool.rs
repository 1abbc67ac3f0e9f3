// crates/core/src/worker_pool.rs
//
// Fixed-width parallel-for pool, a direct port of
// `original_source/sources/thread_pool.{h,cpp}`: workers dequeue
// `LOCAL_SIZE`-sized chunks of a shared index counter under one mutex,
// sleep on a condvar when the counter is exhausted, and a second condvar
// signals the dispatcher when all work (and all in-flight workers) has
// drained. Kept as a hand-rolled scheduler rather than `rayon` (used
// elsewhere in the teacher's dependency stack) because §4.4's exact
// counter/condvar invariants are themselves part of the spec's testable
// surface, not an implementation detail `rayon`'s work-stealing would
// preserve.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

const LOCAL_SIZE: usize = 8;

/// A kernel invoked once per index in `[0, block_dim)`, receiving
/// `(thread_index, block_dim)`.
pub type Kernel = dyn Fn(usize, usize) + Send + Sync;

struct Shared {
    kernel: Option<Arc<Kernel>>,
    block_dim: usize,
    tasks_waiting: usize,
    active_workers: usize,
    terminating: bool,
}

struct Pool {
    state: Mutex<Shared>,
    queue_check: Condvar,
    empty_queue: Condvar,
}

pub struct WorkerPool {
    pool: Arc<Pool>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// `min(num_cpus::get() - 1, max_worker_count)`, floor 1 (§5).
    pub fn new(max_worker_count: usize) -> Self {
        let cores = num_cpus::get();
        let count = if cores > 1 { cores - 1 } else { 1 };
        Self::with_worker_count(count.min(max_worker_count.max(1)))
    }

    pub fn with_worker_count(count: usize) -> Self {
        let pool = Arc::new(Pool {
            state: Mutex::new(Shared {
                kernel: None,
                block_dim: 0,
                tasks_waiting: 0,
                active_workers: 0,
                terminating: false,
            }),
            queue_check: Condvar::new(),
            empty_queue: Condvar::new(),
        });

        let workers = (0..count.max(1))
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || worker_loop(pool))
            })
            .collect();

        Self { pool, workers }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Blocks until every index in `[0, block_dim)` has run `kernel`
    /// exactly once. Only one call may be in flight at a time, enforced
    /// by taking `&mut self`.
    pub fn parallel_for<F>(&mut self, kernel: F, block_dim: usize)
    where
        F: Fn(usize, usize) + Send + Sync + 'static,
    {
        let kernel: Arc<Kernel> = Arc::new(kernel);
        {
            let mut state = self.pool.state.lock().unwrap();
            if state.terminating {
                return;
            }
            state.kernel = Some(kernel);
            state.block_dim = block_dim;
            state.tasks_waiting = 0;
            self.pool.queue_check.notify_all();
        }

        let mut state = self.pool.state.lock().unwrap();
        while !(state.tasks_waiting == state.block_dim && state.active_workers == 0) {
            if state.terminating {
                return;
            }
            state = self.pool.empty_queue.wait(state).unwrap();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        {
            let mut state = self.pool.state.lock().unwrap();
            state.tasks_waiting = 0;
            state.block_dim = 0;
            state.terminating = true;
            self.pool.queue_check.notify_all();
        }
        for worker in self.workers.drain(..) {
            self.pool.queue_check.notify_all();
            let _ = worker.join();
        }
    }
}

/// Pops up to `LOCAL_SIZE` consecutive indices, advancing the shared
/// counter. Returns `None` once the pool is terminating with nothing left
/// to hand out.
fn pop_chunk(pool: &Pool) -> Option<usize> {
    let mut state = pool.state.lock().unwrap();
    if state.tasks_waiting == state.block_dim {
        if state.terminating {
            return None;
        }
        state = pool.queue_check.wait(state).unwrap();
        if state.terminating && state.tasks_waiting == state.block_dim {
            return None;
        }
    }
    state.active_workers += 1;
    let task = state.tasks_waiting;
    state.tasks_waiting = (state.tasks_waiting + LOCAL_SIZE).min(state.block_dim);
    Some(task)
}

fn worker_loop(pool: Arc<Pool>) {
    loop {
        let terminating_now = pool.state.lock().unwrap().terminating;
        if terminating_now {
            return;
        }

        let task = match pop_chunk(&pool) {
            Some(t) => t,
            None => {
                let state = pool.state.lock().unwrap();
                if state.terminating {
                    drop(state);
                    pool.empty_queue.notify_all();
                    return;
                }
                // Spurious wake with no terminating signal: loop and retry.
                continue;
            }
        };

        let (block_dim, kernel) = {
            let mut state = pool.state.lock().unwrap();
            if state.terminating {
                state.active_workers -= 1;
                pool.empty_queue.notify_all();
                return;
            }
            (state.block_dim, state.kernel.clone())
        };

        if let Some(kernel) = kernel {
            for i in task..(task + LOCAL_SIZE).min(block_dim) {
                kernel(i, block_dim);
            }
        }

        let mut state = pool.state.lock().unwrap();
        state.active_workers -= 1;
        if state.active_workers == 0 && state.tasks_waiting == state.block_dim {
            pool.empty_queue.notify_all();
        }
    }
}
