//! Fixed-size worker pool for per-block codec work.
//!
//! Blocks of one chunk are independent, so the pipeline fans them out over a
//! rayon pool sized to the tuned thread count and collects results through a
//! channel. The pool itself never re-enters the tuner; only the pipeline
//! thread does.

use crossbeam_channel::unbounded;
use rayon::ThreadPool as RayonPool;

pub struct WorkerPool {
    pool: RayonPool,
    nthreads: usize,
}

impl WorkerPool {
    /// Builds a pool with `nthreads` workers (at least one). Returns `None`
    /// if the underlying pool cannot be created.
    pub fn new(nthreads: usize) -> Option<WorkerPool> {
        let nthreads = nthreads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(nthreads)
            .build()
            .ok()?;
        Some(WorkerPool { pool, nthreads })
    }

    pub fn nthreads(&self) -> usize {
        self.nthreads
    }

    /// Runs `f(0), f(1), .., f(njobs-1)` on the pool and returns the results
    /// in job order. Blocks until every job has finished.
    pub fn map_indexed<R, F>(&self, njobs: usize, f: F) -> Vec<R>
    where
        R: Send,
        F: Fn(usize) -> R + Sync,
    {
        let (tx, rx) = unbounded();
        self.pool.scope(|scope| {
            for i in 0..njobs {
                let tx = tx.clone();
                let f = &f;
                scope.spawn(move |_| {
                    let _ = tx.send((i, f(i)));
                });
            }
        });
        drop(tx);

        let mut slots: Vec<Option<R>> = (0..njobs).map(|_| None).collect();
        for (i, r) in rx.iter() {
            slots[i] = Some(r);
        }
        slots
            .into_iter()
            .map(|s| s.expect("worker result missing"))
            .collect()
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn results_keep_job_order() {
        let pool = WorkerPool::new(4).expect("pool");
        let out = pool.map_indexed(64, |i| i * i);
        for (i, v) in out.iter().enumerate() {
            assert_eq!(*v, i * i);
        }
    }

    #[test]
    fn single_thread_pool_works() {
        let pool = WorkerPool::new(1).expect("pool");
        assert_eq!(pool.nthreads(), 1);
        assert_eq!(pool.map_indexed(3, |i| i + 1), vec![1, 2, 3]);
    }

    #[test]
    fn zero_jobs_is_empty() {
        let pool = WorkerPool::new(2).expect("pool");
        let out: Vec<usize> = pool.map_indexed(0, |i| i);
        assert!(out.is_empty());
    }
}
