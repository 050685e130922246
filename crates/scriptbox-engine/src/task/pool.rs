//! Shared worker pool

use crate::settings::EngineSettings;
use crossbeam::channel::{self, Sender};
use once_cell::sync::Lazy;
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send + 'static>;

static GLOBAL: Lazy<WorkerPool> =
    Lazy::new(|| WorkerPool::new(EngineSettings::default().effective_worker_threads()));

/// Fixed set of threads draining one job channel
///
/// Dropping the pool closes the channel and joins every worker after the
/// queued jobs ran.
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.handles.len())
            .finish()
    }
}

impl WorkerPool {
    /// Spawn `threads` workers named `scriptbox-worker-N`
    pub fn new(threads: usize) -> Self {
        let (sender, receiver) = channel::unbounded::<Job>();
        let mut handles = Vec::with_capacity(threads);
        for i in 0..threads.max(1) {
            let receiver = receiver.clone();
            let spawned = thread::Builder::new()
                .name(format!("scriptbox-worker-{}", i))
                .spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        job();
                    }
                });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => error!(worker = i, error = %e, "failed to spawn worker thread"),
            }
        }
        debug!(threads = handles.len(), "started worker pool");
        Self {
            sender: Some(sender),
            handles,
        }
    }

    /// Process-wide pool, sized from the default settings
    pub fn global() -> &'static WorkerPool {
        &GLOBAL
    }

    /// Number of running workers
    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Queue a job; runs it inline when no worker could be spawned
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        let job: Job = Box::new(job);
        if self.handles.is_empty() {
            job();
            return;
        }
        if let Some(sender) = &self.sender {
            if let Err(rejected) = sender.send(job) {
                (rejected.into_inner())();
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.sender.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        debug!("stopped worker pool");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_drop_runs_queued_jobs() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let pool = WorkerPool::new(2);
            assert_eq!(pool.size(), 2);
            for _ in 0..16 {
                let counter = counter.clone();
                pool.submit(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn test_workers_are_named() {
        let pool = WorkerPool::new(1);
        let (tx, rx) = channel::bounded(1);
        pool.submit(move || {
            let _ = tx.send(thread::current().name().map(str::to_string));
        });
        assert_eq!(rx.recv().unwrap().as_deref(), Some("scriptbox-worker-0"));
    }
}
