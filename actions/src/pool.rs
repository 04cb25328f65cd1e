//! Fixed-size worker pool for server-side request handling.

use ipc::IpcError;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A bounded pool of OS threads draining one shared job queue.
///
/// Replaces fire-and-forget per-request threads: concurrency is capped at
/// the worker count, and dropping the pool closes the queue, drains what was
/// already submitted, and joins every worker.
pub struct WorkerPool {
    sender: Option<mpsc::Sender<Job>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `size` workers (at least one) named `<name>-<index>`.
    ///
    /// Fails with [`IpcError::SharedMemory`] if the OS refuses a thread; an
    /// already-constructed partial pool is joined on the error path.
    pub fn new(name: &str, size: usize) -> Result<Self, IpcError> {
        let size = size.max(1);
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(size);
        for index in 0..size {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || loop {
                    // Holding the lock only for the dequeue keeps the other
                    // workers runnable while a job executes.
                    let job = {
                        let guard = receiver.lock().expect("worker queue lock poisoned");
                        guard.recv()
                    };
                    match job {
                        Ok(job) => job(),
                        // Queue closed: the pool is shutting down.
                        Err(_) => break,
                    }
                })
                .map_err(|err| {
                    IpcError::shared_memory(format!("unable to spawn pool worker: {err}"))
                });
            match handle {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    drop(sender);
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(err);
                }
            }
        }

        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    /// Queues one job. Jobs run in submission order per worker, with no
    /// ordering across workers.
    pub fn spawn(&self, job: impl FnOnce() + Send + 'static) {
        if let Some(sender) = &self.sender {
            // Send fails only after shutdown began, when the job is moot.
            let _ = sender.send(Box::new(job));
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel lets each worker drain and exit.
        drop(self.sender.take());
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}
