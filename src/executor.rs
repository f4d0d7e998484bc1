//! Owning-thread executors.
//!
//! The sampler measures how long a trivial callback waits in the UI thread's
//! queue. Anything that can run callbacks on one thread in strict post order
//! can stand in for that queue:
//!
//! - [`MainThreadQueue`]: a dedicated, named OS thread draining a
//!   crossbeam channel. The binary uses it as the synthetic UI thread.
//! - [`ManualExecutor`]: queues callbacks until a test drains them, which
//!   makes the time between post and execution fully controllable.

use anyhow::{Context, Result};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, warn};

/// Unit of work posted to an owning thread.
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Capability to run callbacks on a single owning thread.
///
/// Implementations must run callbacks in FIFO order, on the same thread,
/// and never re-enter: a callback that posts another callback only enqueues it.
pub trait OwningThreadExecutor: Send + Sync {
    /// Enqueue `callback`. Returns `false` when the queue no longer accepts work.
    fn post(&self, callback: Callback) -> bool;
}

enum Job {
    Run(Callback),
    Shutdown,
}

/// A dedicated thread that executes posted callbacks one after another.
pub struct MainThreadQueue {
    sender: Sender<Job>,
    thread: Option<JoinHandle<()>>,
}

/// Cloneable posting handle for a [`MainThreadQueue`].
#[derive(Clone)]
pub struct MainThreadHandle {
    sender: Sender<Job>,
}

impl MainThreadQueue {
    /// Spawn the owning thread.
    pub fn spawn(name: &str) -> Result<Self> {
        let (sender, receiver) = channel::unbounded();
        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || Self::run(receiver))
            .with_context(|| format!("failed to spawn owning thread '{}'", name))?;

        debug!("Owning thread '{}' started", name);
        Ok(Self {
            sender,
            thread: Some(thread),
        })
    }

    fn run(receiver: Receiver<Job>) {
        while let Ok(job) = receiver.recv() {
            match job {
                Job::Run(callback) => callback(),
                Job::Shutdown => break,
            }
        }
    }

    pub fn handle(&self) -> MainThreadHandle {
        MainThreadHandle {
            sender: self.sender.clone(),
        }
    }

    /// Run the callbacks already queued, then stop the thread and join it.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.sender.send(Job::Shutdown);
            if thread.join().is_err() {
                warn!("Owning thread panicked before shutdown");
            }
        }
    }
}

impl Drop for MainThreadQueue {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

impl OwningThreadExecutor for MainThreadQueue {
    fn post(&self, callback: Callback) -> bool {
        self.sender.send(Job::Run(callback)).is_ok()
    }
}

impl OwningThreadExecutor for MainThreadHandle {
    fn post(&self, callback: Callback) -> bool {
        self.sender.send(Job::Run(callback)).is_ok()
    }
}

/// Deterministic executor: callbacks run only when [`ManualExecutor::run_pending`] is called.
#[derive(Default, Clone)]
pub struct ManualExecutor {
    queue: Arc<Mutex<VecDeque<Callback>>>,
}

impl ManualExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Run queued callbacks in FIFO order until the queue is empty.
    ///
    /// The lock is released while each callback runs, so callbacks may post.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.queue.lock().pop_front();
            match next {
                Some(callback) => {
                    callback();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    /// Drop queued callbacks without running them.
    pub fn discard_pending(&self) -> usize {
        let mut queue = self.queue.lock();
        let dropped = queue.len();
        queue.clear();
        dropped
    }
}

impl OwningThreadExecutor for ManualExecutor {
    fn post(&self, callback: Callback) -> bool {
        self.queue.lock().push_back(callback);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_main_thread_queue_runs_in_post_order_on_one_thread() {
        let queue = MainThreadQueue::spawn("ui-test").unwrap();
        let (tx, rx) = mpsc::channel();

        for i in 0..50 {
            let tx = tx.clone();
            assert!(queue.post(Box::new(move || {
                let name = std::thread::current().name().map(str::to_string);
                tx.send((i, name)).unwrap();
            })));
        }
        queue.shutdown();

        let seen: Vec<(i32, Option<String>)> = rx.try_iter().collect();
        assert_eq!(seen.len(), 50);
        for (expected, (i, name)) in seen.into_iter().enumerate() {
            assert_eq!(i, expected as i32);
            assert_eq!(name.as_deref(), Some("ui-test"));
        }
    }

    #[test]
    fn test_handle_rejects_after_shutdown() {
        let queue = MainThreadQueue::spawn("ui-closed").unwrap();
        let handle = queue.handle();
        queue.shutdown();
        assert!(!handle.post(Box::new(|| {})));
    }

    #[test]
    fn test_manual_executor_is_fifo_and_not_reentrant() {
        let executor = ManualExecutor::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let inner_exec = executor.clone();
        let o = order.clone();
        executor.post(Box::new(move || {
            o.lock().push(1);
            let o2 = o.clone();
            inner_exec.post(Box::new(move || o2.lock().push(3)));
        }));
        let o = order.clone();
        executor.post(Box::new(move || o.lock().push(2)));

        assert_eq!(executor.pending(), 2);
        assert_eq!(executor.run_pending(), 3);
        assert_eq!(*order.lock(), vec![1, 2, 3]);
        assert_eq!(executor.pending(), 0);
    }

    #[test]
    fn test_manual_executor_discard() {
        let executor = ManualExecutor::new();
        executor.post(Box::new(|| panic!("must not run")));
        assert_eq!(executor.discard_pending(), 1);
        assert_eq!(executor.run_pending(), 0);
    }
}
