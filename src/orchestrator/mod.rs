//! End-to-end delivery of one work item.
//!
//! The orchestrator is the only component that knows the whole pipeline:
//!
//! 1. publish the branch (fatal on failure)
//! 2. open the request, reusing an existing one for the same branch
//! 3. apply labels and request reviewers (best-effort)
//! 4. without auto-merge, mark the work item in-review and stop
//! 5. wait for verification, re-running failed checks a bounded number of times
//! 6. merge
//! 7. delete the remote branch and the workspace (best-effort)
//! 8. mark the work item done and report newly ready dependents
//!
//! Verification and merge problems escalate: the request stays open and
//! `deliver` returns normally. Anything else that goes wrong is fatal: the
//! workspace is kept and a failure record is written.

mod best_effort;
mod report;

use std::sync::Arc;

use futures::future::join_all;
use tracing::{error, info, info_span, warn, Instrument};

pub(crate) use best_effort::non_blocking;
pub use report::{DeliveryOutcome, DeliveryReport, RequestDescription};

use crate::config::DeliverySettings;
use crate::dependency;
use crate::error::DeliveryError;
use crate::escalation::{Escalation, EscalationKind};
use crate::failure::{FailureRecord, FailureStore};
use crate::git::GitCli;
use crate::host::{HostError, NewRequest, RepositoryHost, RequestHandle};
use crate::ledger::{StatusLedger, WorkItemStatus};
use crate::merge::MergeExecutor;
use crate::timeout::{CancelSignal, Clock, TokioClock, WaitConfig};
use crate::verification::{VerificationMonitor, VerificationVerdict};
use crate::workspace::WorkspaceManager;

const COMPONENT: &str = "orchestrator";

/// Default maximum merge commit message length.
pub const DEFAULT_COMMIT_MESSAGE_LIMIT: usize = 1000;

/// Sequences the delivery pipeline for one work item at a time.
pub struct DeliveryOrchestrator {
    host: Arc<dyn RepositoryHost>,
    workspaces: Arc<dyn WorkspaceManager>,
    ledger: Arc<StatusLedger>,
    failures: FailureStore,
    git: Option<GitCli>,
    clock: Arc<dyn Clock>,
    settings: DeliverySettings,
    wait: WaitConfig,
    commit_message_limit: usize,
}

impl DeliveryOrchestrator {
    pub fn new(
        host: Arc<dyn RepositoryHost>,
        workspaces: Arc<dyn WorkspaceManager>,
        ledger: Arc<StatusLedger>,
        failures: FailureStore,
        settings: DeliverySettings,
        wait: WaitConfig,
    ) -> Self {
        Self {
            host,
            workspaces,
            ledger,
            failures,
            git: None,
            clock: Arc::new(TokioClock),
            settings,
            wait,
            commit_message_limit: DEFAULT_COMMIT_MESSAGE_LIMIT,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Local git used as a fallback when the host cannot delete a branch.
    pub fn with_git(mut self, git: GitCli) -> Self {
        self.git = Some(git);
        self
    }

    pub fn with_commit_message_limit(mut self, limit: usize) -> Self {
        self.commit_message_limit = limit;
        self
    }

    /// Deliver `branch` for the work item `work_item_key`.
    ///
    /// Escalations return `Ok` with [`DeliveryOutcome::Escalated`]. Fatal
    /// failures write a failure record, keep the workspace and return `Err`.
    /// Cancellation returns [`DeliveryError::Cancelled`] without a record.
    pub async fn deliver(
        &self,
        branch: &str,
        work_item_key: &str,
        description: &RequestDescription,
        cancel: &CancelSignal,
    ) -> Result<DeliveryReport, DeliveryError> {
        let span = info_span!("deliver", work_item = work_item_key, branch);
        async {
            let result = self.run(branch, work_item_key, description, cancel).await;
            if let Err(err) = &result {
                self.handle_fatal(branch, work_item_key, err);
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        branch: &str,
        key: &str,
        description: &RequestDescription,
        cancel: &CancelSignal,
    ) -> Result<DeliveryReport, DeliveryError> {
        let mut cancel = cancel.clone();
        if cancel.is_cancelled() {
            return Err(DeliveryError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DeliveryError::Cancelled),
            pushed = self.workspaces.push(key, branch) => {
                pushed.map_err(|source| DeliveryError::Publish {
                    branch: branch.to_string(),
                    source,
                })?;
            }
        }

        let mut request = self.open_request(branch, key, description).await?;

        self.apply_labels(key, request.number).await;
        if !self.settings.reviewers.is_empty() {
            non_blocking(
                COMPONENT,
                key,
                "request reviewers",
                self.host
                    .request_reviewers(request.number, &self.settings.reviewers),
            )
            .await;
        }

        if !self.settings.auto_merge {
            self.ledger.update_status(key, WorkItemStatus::InReview)?;
            info!(
                component = COMPONENT,
                work_item = key,
                number = request.number,
                url = %request.url,
                "auto-merge disabled, request left for review"
            );
            return Ok(DeliveryReport {
                request,
                outcome: DeliveryOutcome::InReview,
            });
        }

        if let Some(escalation) = self.verify(key, &request, &mut cancel).await? {
            return Ok(self.escalate(request, escalation));
        }

        let executor = MergeExecutor::new(
            self.host.clone(),
            self.clock.clone(),
            self.wait.mergeability_recheck,
            self.commit_message_limit,
        );
        let outcome = executor.merge(&request, self.settings.merge_method).await;
        let merge_reference = match (outcome.success, outcome.merge_reference) {
            (true, Some(reference)) => reference,
            _ => {
                let kind = if outcome.has_conflict {
                    EscalationKind::MergeConflict
                } else {
                    EscalationKind::MergeFailed
                };
                let detail = outcome
                    .error_detail
                    .unwrap_or_else(|| "merge did not complete".to_string());
                let escalation =
                    Escalation::new(kind, key, request.number, request.url.clone(), detail);
                return Ok(self.escalate(request, escalation));
            }
        };
        request.mark_merged();

        self.teardown(key, branch).await;

        self.ledger.update_status(key, WorkItemStatus::Done)?;
        let snapshot = self.ledger.snapshot()?;
        let resolution = dependency::resolve(&snapshot, key);
        for ready in &resolution.ready_keys {
            info!(
                component = COMPONENT,
                work_item = key,
                ready = %ready,
                "dependent work item is ready"
            );
        }

        info!(
            component = COMPONENT,
            work_item = key,
            number = request.number,
            merge_reference = %merge_reference,
            ready = resolution.ready_keys.len(),
            "delivery complete"
        );
        Ok(DeliveryReport {
            request,
            outcome: DeliveryOutcome::Merged {
                merge_reference,
                resolution,
            },
        })
    }

    /// Create the request, or adopt the open one if the host says it exists.
    async fn open_request(
        &self,
        branch: &str,
        key: &str,
        description: &RequestDescription,
    ) -> Result<RequestHandle, DeliveryError> {
        let new_request = NewRequest {
            title: description.title.clone(),
            body: description.body.clone(),
            head: branch.to_string(),
            base: self.settings.base_branch.clone(),
        };
        let create_error = |source: HostError| DeliveryError::CreateRequest {
            branch: branch.to_string(),
            source,
        };

        match self.host.create_request(&new_request).await {
            Ok(request) => {
                info!(
                    component = COMPONENT,
                    work_item = key,
                    number = request.number,
                    url = %request.url,
                    "request created"
                );
                Ok(request)
            }
            Err(HostError::AlreadyExists(detail)) => {
                info!(
                    component = COMPONENT,
                    work_item = key,
                    detail = %detail,
                    "request already exists, looking it up by branch"
                );
                match self.host.find_open_request(branch).await.map_err(create_error)? {
                    Some(request) => {
                        info!(
                            component = COMPONENT,
                            work_item = key,
                            number = request.number,
                            "reusing open request"
                        );
                        Ok(request)
                    }
                    None => Err(DeliveryError::ExistingRequestMissing {
                        branch: branch.to_string(),
                    }),
                }
            }
            Err(err) => Err(create_error(err)),
        }
    }

    /// Create missing labels, then apply all configured labels.
    async fn apply_labels(&self, key: &str, number: u64) {
        let labels = &self.settings.labels;
        if labels.is_empty() {
            return;
        }

        if let Some(existing) =
            non_blocking(COMPONENT, key, "list labels", self.host.list_labels()).await
        {
            for label in labels {
                if existing.iter().any(|e| e.eq_ignore_ascii_case(label)) {
                    continue;
                }
                non_blocking(
                    COMPONENT,
                    key,
                    "create label",
                    self.host.create_label(label, &self.settings.label_color),
                )
                .await;
            }
        }

        non_blocking(
            COMPONENT,
            key,
            "add labels",
            self.host.add_labels(number, labels),
        )
        .await;
    }

    /// Wait for checks, re-running failed ones up to the retry limit.
    /// Returns the escalation to raise, or `None` once checks pass.
    async fn verify(
        &self,
        key: &str,
        request: &RequestHandle,
        cancel: &mut CancelSignal,
    ) -> Result<Option<Escalation>, DeliveryError> {
        let monitor = VerificationMonitor::new(self.host.clone(), self.clock.clone());
        let git_ref = request.source_branch.as_str();
        let mut retries = 0u32;

        loop {
            let snapshot = monitor
                .wait_for(git_ref, self.wait.poll_interval, self.wait.max_wait, cancel)
                .await
                .map_err(|_| DeliveryError::Cancelled)?;

            match snapshot.verdict() {
                VerificationVerdict::Passed => {
                    info!(
                        component = "verification",
                        work_item = key,
                        summary = %snapshot.summary(),
                        "verification passed"
                    );
                    return Ok(None);
                }
                VerificationVerdict::TimedOut => {
                    let detail = format!(
                        "checks did not complete within {}s ({})",
                        self.wait.max_wait.as_secs(),
                        snapshot.summary()
                    );
                    return Ok(Some(Escalation::new(
                        EscalationKind::VerificationTimeout,
                        key,
                        request.number,
                        request.url.clone(),
                        detail,
                    )));
                }
                VerificationVerdict::Failed => {
                    let failed = snapshot.failed_checks();
                    let names: Vec<String> = failed.iter().map(|c| c.name.clone()).collect();

                    if retries >= self.wait.max_retries {
                        let detail = format!(
                            "checks still failing after {} re-runs: {}",
                            retries,
                            names.join(", ")
                        );
                        return Ok(Some(
                            Escalation::new(
                                EscalationKind::VerificationFailed,
                                key,
                                request.number,
                                request.url.clone(),
                                detail,
                            )
                            .with_failed_checks(names),
                        ));
                    }

                    retries += 1;
                    info!(
                        component = "verification",
                        work_item = key,
                        attempt = retries,
                        max_retries = self.wait.max_retries,
                        checks = %names.join(", "),
                        "re-running failed checks"
                    );
                    join_all(failed.iter().map(|check| {
                        non_blocking(
                            "verification",
                            key,
                            "re-run check",
                            self.host.rerun_check(check.id),
                        )
                    }))
                    .await;

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(DeliveryError::Cancelled),
                        _ = self.clock.sleep(self.wait.retry_delay) => {}
                    }
                }
            }
        }
    }

    /// Leave the request open, move the work item to in-review and log the event.
    fn escalate(&self, request: RequestHandle, escalation: Escalation) -> DeliveryReport {
        if let Err(err) = self
            .ledger
            .update_status(&escalation.work_item_key, WorkItemStatus::InReview)
        {
            warn!(
                component = COMPONENT,
                work_item = %escalation.work_item_key,
                tier = "best_effort",
                error = %err,
                "could not mark escalated work item in-review"
            );
        }
        escalation.emit();
        DeliveryReport {
            request,
            outcome: DeliveryOutcome::Escalated(escalation),
        }
    }

    /// Remove the remote branch and the workspace after a merge.
    async fn teardown(&self, key: &str, branch: &str) {
        if self.settings.delete_remote_branch {
            let deleted = non_blocking(
                "workspace",
                key,
                "delete remote branch",
                self.host.delete_branch(branch),
            )
            .await;
            if deleted.is_none() {
                if let Some(git) = &self.git {
                    non_blocking(
                        "workspace",
                        key,
                        "delete remote branch with git",
                        git.delete_remote_branch(&self.settings.remote, branch),
                    )
                    .await;
                }
            }
        }

        non_blocking(
            "workspace",
            key,
            "destroy workspace",
            self.workspaces.destroy(key),
        )
        .await;
    }

    /// Log a fatal failure and persist its record. The workspace is left alone.
    fn handle_fatal(&self, branch: &str, key: &str, err: &DeliveryError) {
        if !err.is_recordable() {
            warn!(
                component = COMPONENT,
                work_item = key,
                "delivery cancelled, workspace preserved"
            );
            return;
        }

        let workspace = self.workspaces.describe(key, branch);
        error!(
            component = COMPONENT,
            work_item = key,
            tier = %err.tier(),
            stage = err.stage(),
            error = %err.chain().join(": "),
            workspace = %workspace.path.display(),
            "delivery failed, workspace preserved"
        );

        let record = FailureRecord::from_error(key, err, Some(workspace));
        if let Err(store_err) = self.failures.record(&record) {
            error!(
                component = "failure",
                work_item = key,
                error = %store_err,
                "could not write failure record"
            );
        }
    }
}
