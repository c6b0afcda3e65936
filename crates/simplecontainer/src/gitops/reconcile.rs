//! One reconcile step: decide the next state from the current one.

use std::path::{Component, Path};
use std::sync::Arc;

use chrono::Utc;
use tracing::Instrument;

use super::context::EngineContext;
use super::definitions::{definitions_dir, read_definitions};
use super::error::{ErrorKind, GitOpsError, Result};
use super::events::{GitopsEvent, GitopsEventKind};
use super::git::fetch;
use super::runtime::GitopsRuntimeState;
use super::status::{Pending, StatusState};
use super::syncer;
use super::tracked::Gitops;

/// Next state chosen by a step.
#[derive(Debug)]
pub struct Decision {
    pub next: StatusState,
    /// Run another step right away.
    pub again: bool,
    pub error: Option<GitOpsError>,
}

impl Decision {
    fn go(next: StatusState) -> Self {
        Self {
            next,
            again: true,
            error: None,
        }
    }

    fn rest(next: StatusState) -> Self {
        Self {
            next,
            again: false,
            error: None,
        }
    }

    fn fail(next: StatusState, error: GitOpsError) -> Self {
        Self {
            next,
            again: false,
            error: Some(error),
        }
    }
}

/// What the watcher should do after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepOutcome {
    pub state: StatusState,
    /// Another step is wanted immediately.
    pub again: bool,
    /// The repository reached PENDING_DELETE; cleanup should start.
    pub terminate: bool,
    /// A step was already running; nothing was done.
    pub skipped: bool,
}

/// Runs one reconcile step for `gitops`.
pub async fn step(ctx: &EngineContext, gitops: &Gitops) -> StepOutcome {
    let span = tracing::info_span!("reconcile", group = %gitops.group(), name = %gitops.name());
    run_step(ctx, gitops).instrument(span).await
}

async fn run_step(ctx: &EngineContext, gitops: &Gitops) -> StepOutcome {
    if !gitops.update_status(|s| s.begin_reconcile()) {
        return StepOutcome {
            state: gitops.status().state,
            again: false,
            terminate: false,
            skipped: true,
        };
    }

    let mut runtime = gitops.runtime().lock().await;
    runtime.absorb(gitops.signals());

    let status = gitops.status();
    let decision = if status.pending == Pending::Delete {
        Decision::rest(StatusState::PendingDelete)
    } else {
        decide(ctx, gitops, &mut runtime, status.state).await
    };

    let moved = gitops.transition(decision.next);
    let (state, leaving) = gitops.update_status(|s| {
        s.end_reconcile();
        match &decision.error {
            Some(e) => s.last_error = Some(e.to_string()),
            None if s.state == StatusState::InSync => s.last_error = None,
            None => {}
        }
        (s.state, s.pending == Pending::Delete)
    });

    if let Some(e) = &decision.error {
        log::warn!(
            "gitops {}/{}: {} -> {}: {}",
            gitops.group(),
            gitops.name(),
            status.state,
            decision.next,
            e
        );
        gitops.journal().error(&e.to_string());
    }

    gitops.record_head(&runtime);
    drop(runtime);

    // A repository on its way out keeps its last live snapshot.
    if !leaving && state != StatusState::PendingDelete {
        persist(ctx, gitops).await;
    }

    if moved && state != status.state {
        ctx.events.emit(GitopsEvent::new(
            GitopsEventKind::Transition,
            gitops.group(),
            gitops.name(),
            Some(state),
        ));
    }

    StepOutcome {
        state,
        again: moved && decision.again && state.category() != super::status::Category::End,
        terminate: state == StatusState::PendingDelete,
        skipped: false,
    }
}

/// Writes the snapshot to the replicated store.
pub async fn persist(ctx: &EngineContext, gitops: &Gitops) {
    let key = ctx.state_key(gitops.group(), gitops.name());
    let body = match serde_json::to_vec(&gitops.snapshot()) {
        Ok(body) => body,
        Err(e) => {
            log::error!("gitops {}: failed to serialize state: {}", gitops.key(), e);
            return;
        }
    };

    if let Err(e) = ctx.control_plane.persist_state(&key, &body).await {
        log::warn!("gitops {}: failed to persist state: {}", gitops.key(), e);
    }
}

/// Per-state decision.
pub async fn decide(
    ctx: &EngineContext,
    gitops: &Gitops,
    runtime: &mut GitopsRuntimeState,
    state: StatusState,
) -> Decision {
    let resource = gitops.definition();
    let spec = &resource.spec;

    match state {
        StatusState::Created => {
            if !runtime.auth_resolved {
                if let Some(source) = spec.auth_source() {
                    match ctx.control_plane.fetch_credentials(&source).await {
                        Ok(credentials) => runtime.credentials = Some(Arc::new(credentials)),
                        Err(e) => {
                            // Retry on the next poll, not on every tick.
                            runtime.force_poll = false;
                            return Decision::fail(StatusState::InvalidGit, e);
                        }
                    }
                }
                runtime.auth_resolved = true;
            }
            Decision::go(StatusState::CloningGit)
        }

        StatusState::CloningGit => {
            let wanted = resource.checkout_path(&ctx.settings.data_dir);
            if runtime.checkout != wanted {
                if runtime.checkout.exists() {
                    if let Err(e) = tokio::fs::remove_dir_all(&runtime.checkout).await {
                        log::warn!(
                            "gitops {}: removing old checkout {} failed: {}",
                            gitops.key(),
                            runtime.checkout.display(),
                            e
                        );
                    }
                }
                runtime.checkout = wanted;
            }

            let interval = spec.polling_interval_or(ctx.settings.default_polling_interval);
            match fetch(ctx.scm.as_ref(), spec, interval, runtime, Utc::now()).await {
                Ok(outcome) => {
                    log::info!(
                        "gitops {}/{}: at {}{}",
                        gitops.group(),
                        gitops.name(),
                        outcome.commit,
                        if outcome.changed { " (new)" } else { "" }
                    );
                    Decision::go(StatusState::ClonedGit)
                }
                Err(e) if matches!(e.kind(), ErrorKind::NoChange | ErrorKind::IntervalNotElapsed) => {
                    if runtime.definitions_stale() {
                        Decision::go(StatusState::ClonedGit)
                    } else {
                        Decision::go(StatusState::Inspecting)
                    }
                }
                Err(e) => {
                    runtime.force_poll = false;
                    gitops.update_status(|s| {
                        if s.pending == Pending::Sync {
                            s.pending = Pending::None;
                        }
                    });
                    Decision::fail(StatusState::InvalidGit, e)
                }
            }
        }

        StatusState::ClonedGit => {
            let outcome = definitions_dir(&runtime.checkout, &spec.directory_path)
                .and_then(|dir| read_definitions(&dir));
            match outcome {
                Ok(outcome) => {
                    runtime.definitions = outcome.requests;
                    runtime.definitions_commit = runtime.commit.clone();
                    gitops.update_status(|s| s.warnings = outcome.warnings);

                    if spec.automatic_sync || runtime.force_sync {
                        Decision::go(StatusState::Syncing)
                    } else {
                        Decision::go(StatusState::Inspecting)
                    }
                }
                Err(e) => {
                    runtime.definitions.clear();
                    runtime.definitions_commit = None;
                    Decision::fail(StatusState::InvalidDefinitions, e)
                }
            }
        }

        StatusState::Inspecting => {
            // Nothing fetched yet in this process, e.g. after a restore.
            if runtime.force_poll || runtime.commit.is_none() {
                return Decision::go(StatusState::CloningGit);
            }
            if runtime.definitions_stale() || runtime.definitions.is_empty() {
                return Decision::go(StatusState::ClonedGit);
            }
            if runtime.force_sync {
                return Decision::go(StatusState::Syncing);
            }

            let owner = ctx.owner(gitops.group(), gitops.name());
            let result = syncer::drift(ctx.control_plane.as_ref(), &owner, &runtime.definitions).await;
            runtime.force_inspect = false;

            match result {
                Ok(report) => {
                    gitops.update_status(|s| s.in_sync = !report.is_drifted());
                    ctx.events.emit(GitopsEvent::new(
                        GitopsEventKind::Inspect,
                        gitops.group(),
                        gitops.name(),
                        None,
                    ));
                    if report.is_drifted() {
                        gitops.journal().warn(&format!(
                            "drifted: {}",
                            report.drifted.join(", ")
                        ));
                        // Auto-sync continues from DRIFTED right away.
                        Decision {
                            next: StatusState::Drifted,
                            again: spec.automatic_sync,
                            error: None,
                        }
                    } else {
                        Decision::rest(StatusState::InSync)
                    }
                }
                Err(e) => match e.kind() {
                    ErrorKind::Rejected | ErrorKind::Invalid => {
                        Decision::fail(StatusState::InvalidDefinitions, e)
                    }
                    _ => Decision::fail(StatusState::Inspecting, e),
                },
            }
        }

        StatusState::Drifted => {
            if spec.automatic_sync || runtime.force_sync {
                Decision::go(StatusState::Syncing)
            } else if runtime.commit_request.is_some() {
                Decision::go(StatusState::CommitGit)
            } else if runtime.force_poll || runtime.force_inspect {
                Decision::go(StatusState::Inspecting)
            } else {
                Decision::rest(StatusState::Drifted)
            }
        }

        StatusState::Syncing => {
            // Only apply definitions read from the current commit.
            if runtime.definitions_stale() || runtime.definitions.is_empty() {
                runtime.force_sync = true;
                return Decision::go(StatusState::CloningGit);
            }
            runtime.force_sync = false;
            let owner = ctx.owner(gitops.group(), gitops.name());
            let result = syncer::sync(ctx.control_plane.as_ref(), &owner, &runtime.definitions).await;

            match result {
                Ok(applied) => {
                    let commit = runtime.definitions_commit.clone();
                    gitops.update_status(|s| {
                        s.in_sync = true;
                        s.last_synced_commit = commit;
                        s.failures = 0;
                        if s.pending == Pending::Sync {
                            s.pending = Pending::None;
                        }
                    });
                    gitops
                        .journal()
                        .info(&format!("synced {} definitions", applied));
                    Decision::rest(StatusState::InSync)
                }
                // Control plane down: retry the same sync next tick.
                Err(e) if e.kind() == ErrorKind::Unreachable => {
                    runtime.force_sync = true;
                    Decision::fail(StatusState::Syncing, e)
                }
                Err(e) => {
                    let threshold = ctx.settings.backoff_threshold;
                    let failures = gitops.update_status(|s| {
                        s.failures += 1;
                        s.in_sync = false;
                        if s.pending == Pending::Sync {
                            s.pending = Pending::None;
                        }
                        s.failures
                    });
                    if failures >= threshold {
                        Decision::fail(StatusState::Backoff, e)
                    } else {
                        Decision::fail(StatusState::InvalidDefinitions, e)
                    }
                }
            }
        }

        StatusState::InSync => {
            if runtime.force_poll {
                Decision::go(StatusState::CloningGit)
            } else if runtime.commit_request.is_some() {
                Decision::go(StatusState::CommitGit)
            } else {
                Decision::go(StatusState::Inspecting)
            }
        }

        StatusState::InvalidGit => {
            if !runtime.force_poll {
                return Decision::rest(StatusState::InvalidGit);
            }
            if runtime.auth_resolved {
                Decision::go(StatusState::CloningGit)
            } else {
                Decision::go(StatusState::Created)
            }
        }

        StatusState::InvalidDefinitions => Decision::go(StatusState::CloningGit),

        StatusState::CommitGit => match runtime.commit_request.take() {
            Some(request) => match commit_back(ctx, spec, runtime, &request).await {
                Ok(commit) => {
                    gitops.journal().info(&format!(
                        "committed {} ({})",
                        request.path.display(),
                        commit.as_deref().unwrap_or("no changes")
                    ));
                    runtime.force_poll = true;
                    Decision::go(StatusState::CloningGit)
                }
                Err(e) => Decision::fail(StatusState::InvalidGit, e),
            },
            None => Decision::go(StatusState::CloningGit),
        },

        StatusState::PendingDelete | StatusState::Backoff => Decision::rest(state),
    }
}

/// Writes the requested file under the definitions directory, commits and pushes.
async fn commit_back(
    ctx: &EngineContext,
    spec: &super::resource::GitopsSpec,
    runtime: &GitopsRuntimeState,
    request: &super::runtime::CommitRequest,
) -> Result<Option<String>> {
    if request.path.as_os_str().is_empty()
        || request
            .path
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(GitOpsError::PathTraversal(
            request.path.display().to_string(),
        ));
    }

    let relative = Path::new(spec.directory_path.trim_start_matches('/')).join(&request.path);
    let target = runtime.checkout.join(&relative);
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&target, &request.content).await?;

    let credentials = runtime.credentials.as_deref();
    ctx.scm
        .commit_and_push(
            &runtime.checkout,
            &spec.revision,
            &request.message,
            &[relative.as_path()],
            credentials,
        )
        .await
}
