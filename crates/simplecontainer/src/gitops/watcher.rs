//! Reconcile loop of one tracked repository.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Notify};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::context::EngineContext;
use super::definitions::{definitions_dir, read_definitions};
use super::error::{GitOpsError, Result};
use super::events::{GitopsEvent, GitopsEventKind};
use super::git::{fetch, is_checkout};
use super::queue::{Priority, WorkQueue};
use super::reconcile;
use super::runtime::GitopsRuntimeState;
use super::status::{Category, Pending, StatusState};
use super::syncer;
use super::tracked::Gitops;

/// Work pushed to a watcher from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkItem {
    Reconcile,
    Delete,
}

/// What cleanup does once the loop is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    /// Delete child definitions, replicated state and the checkout.
    Delete,
    /// Node shutdown: stop locally, leave children and replicated state.
    Drain,
}

/// Drives one repository: owns its tickers, work channel and queue.
pub struct Watcher {
    ctx: Arc<EngineContext>,
    gitops: Arc<Gitops>,
    queue: WorkQueue,
    work: mpsc::UnboundedSender<WorkItem>,
    cancel: CancellationToken,
    teardown: Mutex<Teardown>,
    /// Set once deletion was requested; cleanup then always deletes.
    delete_requested: AtomicBool,
    done: AtomicBool,
    rearm: Notify,
    finished: AtomicBool,
    finished_notify: Notify,
}

impl Watcher {
    /// Spawns the loop. Nothing runs until work is pushed or a ticker fires.
    pub fn start(ctx: Arc<EngineContext>, gitops: Arc<Gitops>) -> Arc<Self> {
        let (work, work_rx) = mpsc::unbounded_channel();
        let deleting = gitops.status().pending == Pending::Delete;
        let watcher = Arc::new(Self {
            queue: WorkQueue::start(format!("gitops.{}", gitops.key())),
            ctx,
            gitops,
            work,
            cancel: CancellationToken::new(),
            teardown: Mutex::new(Teardown::Delete),
            delete_requested: AtomicBool::new(deleting),
            done: AtomicBool::new(false),
            rearm: Notify::new(),
            finished: AtomicBool::new(false),
            finished_notify: Notify::new(),
        });

        tokio::spawn(Arc::clone(&watcher).run(work_rx));
        watcher
    }

    pub fn gitops(&self) -> &Arc<Gitops> {
        &self.gitops
    }

    /// True once the loop stopped accepting work.
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Pushes work onto the watcher's channel.
    pub fn push(&self, item: WorkItem) -> Result<()> {
        if self.is_done() {
            return Err(GitOpsError::QueueClosed);
        }
        self.work.send(item).map_err(|_| GitOpsError::QueueClosed)
    }

    /// Cancels the loop; cleanup follows `teardown` unless a delete was
    /// requested.
    pub fn shutdown(&self, teardown: Teardown) {
        *self.teardown_mode() = teardown;
        self.cancel.cancel();
    }

    /// Requests deletion of the repository and its children. Overrides a
    /// drain that has not reached cleanup yet.
    ///
    /// Returns false if a delete or drain was already pending.
    pub fn delete(&self) -> Result<bool> {
        self.delete_requested.store(true, Ordering::Release);
        let already = self.gitops.update_status(|s| {
            let already = s.pending == Pending::Delete;
            s.pending = Pending::Delete;
            already
        });
        if already {
            return Ok(false);
        }
        self.push(WorkItem::Delete)?;
        Ok(true)
    }

    /// Moves the repository to PENDING_DELETE without deleting its children.
    ///
    /// A pending delete is left as it is.
    pub fn drain(&self) -> Result<()> {
        {
            // Held until the mode is set so cleanup cannot read it in between.
            let mut teardown = self.teardown_mode();
            let already = self.gitops.update_status(|s| {
                let already = s.pending == Pending::Delete;
                s.pending = Pending::Delete;
                already
            });
            if already {
                return Ok(());
            }
            *teardown = Teardown::Drain;
        }
        self.push(WorkItem::Delete)
    }

    fn teardown_mode(&self) -> MutexGuard<'_, Teardown> {
        self.teardown
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Teardown cleanup will run with.
    pub fn teardown(&self) -> Teardown {
        if self.delete_requested.load(Ordering::Acquire) {
            return Teardown::Delete;
        }
        *self.teardown_mode()
    }

    /// Waits for cleanup to complete. Returns false on timeout.
    pub async fn wait_finished(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.finished_notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.is_finished() {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    /// Drains and waits for the queue worker to exit.
    pub async fn stop(&self) {
        self.shutdown(Teardown::Drain);
        if !self.wait_finished(Duration::from_secs(30)).await {
            log::warn!("gitops {}: cleanup did not finish in time", self.gitops.key());
        }
        self.queue.stop().await;
    }

    async fn run(self: Arc<Self>, mut work_rx: mpsc::UnboundedReceiver<WorkItem>) {
        let key = self.gitops.key();
        let default_poll = self.ctx.settings.default_polling_interval;

        let reconcile_period = self.ctx.settings.reconcile_interval;
        let mut reconcile_ticker = interval_at(Instant::now() + reconcile_period, reconcile_period);
        reconcile_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut poll_period = self.gitops.polling_interval(default_poll);
        let mut poll_ticker = interval_at(Instant::now() + poll_period, poll_period);
        poll_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        log::debug!("gitops {}: watcher started", key);

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                item = work_rx.recv() => match item {
                    Some(WorkItem::Reconcile) => self.submit_step(Priority::Normal),
                    Some(WorkItem::Delete) => self.submit_step(Priority::Delete),
                    None => break,
                },

                _ = reconcile_ticker.tick() => {
                    let status = self.gitops.status();
                    if !status.reconciling
                        && status.category() != Category::End
                        && self.queue.is_empty()
                    {
                        self.submit_step(Priority::Ticker);
                    }
                }

                _ = poll_ticker.tick() => {
                    log::debug!("gitops {}: poll interval elapsed", key);
                    self.gitops.signals().request_poll();
                    reconcile_ticker.reset_immediately();
                }

                _ = self.rearm.notified() => {
                    reconcile_ticker.reset();
                    let period = self.gitops.polling_interval(default_poll);
                    if period != poll_period {
                        log::debug!("gitops {}: polling every {:?}", key, period);
                        poll_period = period;
                        poll_ticker = interval_at(Instant::now() + period, period);
                        poll_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    }
                }
            }
        }

        drop(reconcile_ticker);
        drop(poll_ticker);
        self.done.store(true, Ordering::Release);
        work_rx.close();

        let teardown = self.teardown();
        log::info!("gitops {}: watcher stopped, cleanup ({:?})", key, teardown);

        let watcher = Arc::clone(&self);
        if let Err(e) = self
            .queue
            .submit(Priority::Cleanup, async move { watcher.cleanup(teardown).await })
        {
            log::warn!("gitops {}: cleanup not scheduled: {}", key, e);
            self.finish();
        }
    }

    fn submit_step(self: &Arc<Self>, priority: Priority) {
        let watcher = Arc::clone(self);
        if let Err(e) = self
            .queue
            .submit(priority, async move { watcher.reconcile_once().await })
        {
            log::debug!("gitops {}: step not queued: {}", self.gitops.key(), e);
        }
    }

    async fn reconcile_once(self: Arc<Self>) {
        if self.is_done() {
            return;
        }

        let outcome = reconcile::step(&self.ctx, &self.gitops).await;
        if outcome.skipped {
            return;
        }

        if outcome.terminate {
            self.cancel.cancel();
        } else if outcome.again {
            self.submit_step(Priority::Normal);
        } else {
            self.rearm.notify_one();
        }
    }

    async fn cleanup(self: Arc<Self>, teardown: Teardown) {
        let group = self.gitops.group().to_string();
        let name = self.gitops.name().to_string();

        let checkout = {
            let mut runtime = self.gitops.runtime().lock().await;

            if teardown == Teardown::Delete {
                if runtime.definitions.is_empty() {
                    self.load_definitions(&mut runtime).await;
                }

                let owner = self.ctx.owner(&group, &name);
                if let Err(e) = syncer::delete_all(
                    self.ctx.control_plane.as_ref(),
                    &owner,
                    &runtime.definitions,
                )
                .await
                {
                    log::warn!("gitops {}/{}: deleting definitions failed: {}", group, name, e);
                    self.gitops
                        .journal()
                        .error(&format!("deleting definitions failed: {}", e));
                }
            }
            runtime.checkout.clone()
        };

        match teardown {
            Teardown::Delete => {
                if let Err(e) = self.ctx.registry.remove(&group, &name).await {
                    log::warn!("gitops {}/{}: removing state failed: {}", group, name, e);
                }
                if checkout.exists() {
                    if let Err(e) = tokio::fs::remove_dir_all(&checkout).await {
                        log::warn!(
                            "gitops {}/{}: removing {} failed: {}",
                            group,
                            name,
                            checkout.display(),
                            e
                        );
                    }
                }
                self.gitops.journal().info("deleted");
                self.ctx.events.emit(GitopsEvent::new(
                    GitopsEventKind::Deleted,
                    &group,
                    &name,
                    Some(StatusState::PendingDelete),
                ));
            }
            Teardown::Drain => {
                self.ctx.registry.forget(&group, &name);
                self.gitops.journal().info("drained");
            }
        }

        self.queue.shutdown();
        self.finish();
    }

    /// Reads the definitions back for deletion, cloning first when this
    /// node never fetched the repository.
    async fn load_definitions(&self, runtime: &mut GitopsRuntimeState) {
        let key = self.gitops.key();
        let spec = self.gitops.definition().spec;

        if !is_checkout(&runtime.checkout) {
            if runtime.credentials.is_none() {
                if let Some(source) = spec.auth_source() {
                    match self.ctx.control_plane.fetch_credentials(&source).await {
                        Ok(credentials) => runtime.credentials = Some(Arc::new(credentials)),
                        Err(e) => {
                            log::warn!("gitops {}: no credentials to read definitions: {}", key, e);
                            return;
                        }
                    }
                }
            }

            runtime.force_poll = true;
            let interval = spec.polling_interval_or(self.ctx.settings.default_polling_interval);
            if let Err(e) = fetch(self.ctx.scm.as_ref(), &spec, interval, runtime, Utc::now()).await {
                log::warn!("gitops {}: fetching definitions for deletion failed: {}", key, e);
                return;
            }
        }

        match definitions_dir(&runtime.checkout, &spec.directory_path)
            .and_then(|dir| read_definitions(&dir))
        {
            Ok(outcome) => runtime.definitions = outcome.requests,
            Err(e) => log::warn!("gitops {}: reading definitions for deletion failed: {}", key, e),
        }
    }

    fn finish(&self) {
        self.finished.store(true, Ordering::Release);
        self.finished_notify.notify_waiters();
        log::debug!("gitops {}: cleanup finished", self.gitops.key());
    }
}
