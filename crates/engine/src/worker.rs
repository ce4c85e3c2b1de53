//! Background execution: cancellation checkpoints and the cover worker pool.

use tokio::runtime::{Builder, Runtime};
pub use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};

/// Turns a fired [`CancellationToken`] into [`Error::Cancelled`] at the
/// points where long-running work may stop.
pub trait CancelCheck {
    fn check(&self) -> Result<()>;
}

impl CancelCheck for CancellationToken {
    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Runs blocking cover work on at most `threads` threads of a dedicated
/// runtime. Jobs still queued when the pool is dropped are discarded.
pub struct WorkerPool {
    runtime: Runtime,
    threads: usize,
}

impl WorkerPool {
    pub fn new(threads: usize) -> std::io::Result<Self> {
        let threads = threads.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(threads)
            .thread_name("comicshelf-worker")
            .build()?;
        debug!(threads, "started cover workers");
        Ok(Self { runtime, threads })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Queues a blocking job. A panicking job only loses its own result.
    pub fn spawn(&self, job: impl FnOnce() + Send + 'static) {
        drop(self.runtime.spawn_blocking(job));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, mpsc};
    use std::time::Duration;

    #[test]
    fn token_clones_share_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(token.check().unwrap_err().is_cancelled());
    }

    #[test]
    fn pool_runs_every_job_within_its_thread_bound() {
        let pool = WorkerPool::new(3).unwrap();
        assert_eq!(pool.threads(), 3);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();
        for job in 0..20 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let tx = tx.clone();
            pool.spawn(move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(2));
                running.fetch_sub(1, Ordering::SeqCst);
                tx.send(job).unwrap();
            });
        }
        let done: HashSet<i32> = (0..20)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(done.len(), 20);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn panicking_job_does_not_kill_the_pool() {
        let (tx, rx) = mpsc::channel();
        let pool = WorkerPool::new(1).unwrap();
        pool.spawn(|| panic!("boom"));
        pool.spawn(move || tx.send(7).unwrap());
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
    }
}
