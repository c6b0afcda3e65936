//! Single-worker priority queue serialising the work of one repository.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::error::{GitOpsError, Result};

/// Priority of a queued task. Higher runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Ticker = 10,
    Normal = 25,
    Delete = 50,
    Cleanup = 100,
}

type Job = BoxFuture<'static, ()>;

struct Queued {
    priority: Priority,
    seq: u64,
    job: Job,
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        // Earlier submissions win ties.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Eq for Queued {}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

struct Inner {
    heap: Mutex<BinaryHeap<Queued>>,
    notify: Notify,
    seq: AtomicU64,
    closed: AtomicBool,
}

/// Priority queue drained by exactly one worker task.
pub struct WorkQueue {
    name: String,
    inner: Arc<Inner>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl WorkQueue {
    /// Creates the queue and spawns its worker.
    pub fn start(name: impl Into<String>) -> Self {
        let name = name.into();
        let inner = Arc::new(Inner {
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            seq: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });
        let cancel = CancellationToken::new();

        let worker = tokio::spawn(run_worker(
            name.clone(),
            Arc::clone(&inner),
            cancel.clone(),
        ));

        Self {
            name,
            inner,
            cancel,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queues `job` at `priority`.
    pub fn submit<F>(&self, priority: Priority, job: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.inner.closed.load(AtomicOrdering::Acquire) {
            return Err(GitOpsError::QueueClosed);
        }

        let seq = self.inner.seq.fetch_add(1, AtomicOrdering::Relaxed);
        {
            let mut heap = lock(&self.inner.heap);
            heap.push(Queued {
                priority,
                seq,
                job: job.boxed(),
            });
        }
        self.inner.notify.notify_one();

        log::trace!("{}: queued {:?} task #{}", self.name, priority, seq);
        Ok(())
    }

    /// Number of tasks waiting to run.
    pub fn len(&self) -> usize {
        lock(&self.inner.heap).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Refuses further submissions and tells the worker to exit after the
    /// task it is running. Queued tasks are dropped. Does not wait.
    pub fn shutdown(&self) {
        self.inner.closed.store(true, AtomicOrdering::Release);
        self.cancel.cancel();
    }

    /// Shuts down and waits for the in-flight task to finish.
    ///
    /// Must not be awaited from a task running on this queue.
    pub async fn stop(&self) {
        self.shutdown();
        let handle = lock(&self.worker).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::error!("{}: queue worker panicked: {}", self.name, e);
            }
        }
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn run_worker(name: String, inner: Arc<Inner>, cancel: CancellationToken) {
    log::debug!("{}: queue worker started", name);

    loop {
        // Drain everything queued before waiting again.
        loop {
            if cancel.is_cancelled() {
                log::debug!("{}: queue worker stopped", name);
                return;
            }
            let next = lock(&inner.heap).pop();
            match next {
                Some(queued) => queued.job.await,
                None => break,
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                log::debug!("{}: queue worker stopped", name);
                return;
            }
            _ = inner.notify.notified() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_priority_then_fifo() {
        let queue = WorkQueue::start("test");
        let order = Arc::new(Mutex::new(Vec::new()));

        // Hold the worker so everything below queues up behind it.
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let (started_tx, started_rx) = oneshot::channel::<()>();
        queue
            .submit(Priority::Normal, async move {
                let _ = started_tx.send(());
                let _ = release_rx.await;
            })
            .unwrap();
        started_rx.await.unwrap();

        for (priority, label) in [
            (Priority::Ticker, "tick-1"),
            (Priority::Normal, "normal-1"),
            (Priority::Cleanup, "cleanup"),
            (Priority::Ticker, "tick-2"),
            (Priority::Delete, "delete"),
            (Priority::Normal, "normal-2"),
        ] {
            let order = Arc::clone(&order);
            queue
                .submit(priority, async move {
                    order.lock().unwrap().push(label);
                })
                .unwrap();
        }

        release_tx.send(()).unwrap();

        let (done_tx, done_rx) = oneshot::channel::<()>();
        queue
            .submit(Priority::Ticker, async move {
                let _ = done_tx.send(());
            })
            .unwrap();
        done_rx.await.unwrap();

        assert_eq!(
            *order.lock().unwrap(),
            vec!["cleanup", "delete", "normal-1", "normal-2", "tick-1", "tick-2"]
        );
        queue.stop().await;
    }

    #[tokio::test]
    async fn test_tasks_never_overlap() {
        let queue = WorkQueue::start("serial");
        let running = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let running = Arc::clone(&running);
            let max_seen = Arc::clone(&max_seen);
            let finished = Arc::clone(&finished);
            queue
                .submit(Priority::Normal, async move {
                    let now = running.fetch_add(1, AtomicOrdering::SeqCst) + 1;
                    max_seen.fetch_max(now, AtomicOrdering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    running.fetch_sub(1, AtomicOrdering::SeqCst);
                    finished.fetch_add(1, AtomicOrdering::SeqCst);
                })
                .unwrap();
        }

        while finished.load(AtomicOrdering::SeqCst) < 8 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(max_seen.load(AtomicOrdering::SeqCst), 1);
        queue.stop().await;
    }

    #[tokio::test]
    async fn test_stop_waits_for_in_flight_task() {
        let queue = WorkQueue::start("stop");
        let finished = Arc::new(AtomicBool::new(false));
        let (started_tx, started_rx) = oneshot::channel::<()>();

        let flag = Arc::clone(&finished);
        queue
            .submit(Priority::Normal, async move {
                let _ = started_tx.send(());
                tokio::time::sleep(Duration::from_millis(50)).await;
                flag.store(true, AtomicOrdering::SeqCst);
            })
            .unwrap();
        started_rx.await.unwrap();

        queue.stop().await;
        assert!(finished.load(AtomicOrdering::SeqCst));
        assert!(matches!(
            queue.submit(Priority::Cleanup, async {}),
            Err(GitOpsError::QueueClosed)
        ));
    }
}
