//! Per-key task queue
//!
//! Tasks that share a key run one after another in submission order; tasks
//! with different keys run concurrently. The reconciler keys by message id
//! so that an async lookup started by one event commits before any later
//! event for the same message is handled.
//!
//! A barrier task waits for everything queued before it, and everything
//! queued after it waits for the barrier, whatever the key.

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// FIFO per key on a tokio runtime.
#[derive(Clone)]
pub struct KeyedTaskQueue {
    runtime: Handle,
    tails: Arc<Mutex<Tails>>,
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

#[derive(Default)]
struct Tails {
    by_key: HashMap<String, JoinHandle<()>>,
    barrier: Option<Shared<BoxFuture<'static, ()>>>,
}

impl Tails {
    fn prune(&mut self) {
        self.by_key.retain(|_, handle| !handle.is_finished());
        if self.barrier.as_ref().is_some_and(|barrier| barrier.peek().is_some()) {
            self.barrier = None;
        }
    }
}

struct PendingGuard {
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

impl KeyedTaskQueue {
    /// Queue spawning onto `runtime`.
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            tails: Arc::new(Mutex::new(Tails::default())),
            pending: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
        }
    }

    /// Queue on the runtime the caller is running in.
    ///
    /// Must be called from within a tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    /// Run `task` after every task previously pushed under `key`.
    ///
    /// Safe to call from synchronous callbacks.
    pub fn push(&self, key: impl Into<String>, task: BoxFuture<'static, ()>) {
        let key = key.into();
        let guard = self.guard();

        let mut tails = self.tails.lock();
        tails.prune();
        let previous = tails.by_key.remove(&key);
        let barrier = tails.barrier.clone();
        let handle = self.runtime.spawn(async move {
            let _guard = guard;
            if let Some(barrier) = barrier {
                barrier.await;
            }
            if let Some(previous) = previous {
                // A panicked predecessor must not stall the key.
                let _ = previous.await;
            }
            task.await;
        });
        tails.by_key.insert(key, handle);
    }

    /// Run `task` once every task pushed so far has finished. Tasks pushed
    /// afterwards, under any key, start only after `task` finishes.
    pub fn push_barrier(&self, task: BoxFuture<'static, ()>) {
        let guard = self.guard();

        let mut tails = self.tails.lock();
        tails.prune();
        let previous: Vec<JoinHandle<()>> = tails.by_key.drain().map(|(_, handle)| handle).collect();
        let earlier = tails.barrier.take();
        let handle = self.runtime.spawn(async move {
            let _guard = guard;
            if let Some(earlier) = earlier {
                earlier.await;
            }
            futures::future::join_all(previous).await;
            task.await;
        });
        let done: BoxFuture<'static, ()> = Box::pin(async move {
            let _ = handle.await;
        });
        tails.barrier = Some(done.shared());
    }

    fn guard(&self) -> PendingGuard {
        self.pending.fetch_add(1, Ordering::AcqRel);
        PendingGuard {
            pending: self.pending.clone(),
            idle: self.idle.clone(),
        }
    }

    /// Number of tasks not yet finished.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Wait until every pushed task has finished.
    pub async fn settled(&self) {
        loop {
            let idle = self.idle.notified();
            if self.pending() == 0 {
                return;
            }
            idle.await;
        }
    }
}

impl std::fmt::Debug for KeyedTaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedTaskQueue")
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_runs_in_order() {
        let queue = KeyedTaskQueue::current();
        let log = Arc::new(Mutex::new(Vec::new()));

        for (i, delay) in [(1, 30), (2, 0), (3, 10)] {
            let log = log.clone();
            queue.push(
                "m1",
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    log.lock().push(i);
                }),
            );
        }
        queue.settled().await;

        assert_eq!(*log.lock(), vec![1, 2, 3]);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn test_other_keys_do_not_wait() {
        let queue = KeyedTaskQueue::current();
        let gate = Arc::new(Notify::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let (blocked_gate, blocked_log) = (gate.clone(), log.clone());
        queue.push(
            "slow",
            Box::pin(async move {
                blocked_gate.notified().await;
                blocked_log.lock().push("slow");
            }),
        );
        let fast_log = log.clone();
        queue.push("fast", Box::pin(async move { fast_log.lock().push("fast") }));

        while log.lock().is_empty() {
            tokio::task::yield_now().await;
        }
        gate.notify_one();
        queue.settled().await;

        assert_eq!(*log.lock(), vec!["fast", "slow"]);
    }

    #[tokio::test]
    async fn test_barrier_splits_the_queue() {
        let queue = KeyedTaskQueue::current();
        let gate = Arc::new(Notify::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let (before_gate, before_log) = (gate.clone(), log.clone());
        queue.push(
            "m1",
            Box::pin(async move {
                before_gate.notified().await;
                before_log.lock().push("before");
            }),
        );
        let barrier_log = log.clone();
        queue.push_barrier(Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            barrier_log.lock().push("barrier");
        }));
        let after_log = log.clone();
        queue.push("m2", Box::pin(async move { after_log.lock().push("after") }));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(log.lock().is_empty());
        gate.notify_one();
        queue.settled().await;

        assert_eq!(*log.lock(), vec!["before", "barrier", "after"]);
        assert_eq!(queue.pending(), 0);
    }
}
