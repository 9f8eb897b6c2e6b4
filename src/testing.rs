//! Scripted in-memory doubles for the host and workspace seams.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::git::GitError;
use crate::host::{
    HostError, HostResult, MergeCommit, NewRequest, ProtectionSummary, RepositoryHost,
    RequestHandle, RequestState,
};
use crate::verification::VerificationCheck;
use crate::workspace::{WorkspaceDescriptor, WorkspaceError, WorkspaceManager};

const FIRST_REQUEST_NUMBER: u64 = 50;

pub(crate) fn request_handle(number: u64, branch: &str) -> RequestHandle {
    RequestHandle {
        number,
        url: format!("https://github.test/acme/app/pull/{}", number),
        title: "Story".to_string(),
        body: String::new(),
        source_branch: branch.to_string(),
        target_branch: "main".to_string(),
        state: RequestState::Open,
        auto_merge_requested: false,
    }
}

#[derive(Default)]
struct HostState {
    requests: Vec<RequestHandle>,
    drop_next_create_response: bool,
    duplicate_without_request: bool,

    check_script: VecDeque<Vec<VerificationCheck>>,
    last_checks: Vec<VerificationCheck>,
    check_latency: Duration,
    failing_fetches: usize,
    check_fetches: usize,
    reruns: Vec<u64>,

    mergeability: VecDeque<Option<bool>>,
    mergeability_fetches: usize,
    merge_sha: Option<String>,
    merge_error: Option<HostError>,
    merges: Vec<(u64, MergeCommit)>,

    labels: Vec<String>,
    created_labels: Vec<String>,
    applied_labels: Vec<(u64, Vec<String>)>,
    label_error: Option<HostError>,
    reviewer_requests: Vec<(u64, Vec<String>)>,
    reviewer_error: Option<HostError>,

    deleted_branches: Vec<String>,
    delete_error: Option<HostError>,
}

/// Repository host whose responses are scripted by the test.
///
/// Check sets are served in order and the last one repeats. Mergeability
/// is served in order and defaults to mergeable once the script runs out.
#[derive(Default)]
pub(crate) struct ScriptedHost {
    state: Mutex<HostState>,
}

impl ScriptedHost {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub(crate) fn script_checks(&self, script: Vec<Vec<VerificationCheck>>) {
        self.state().check_script = script.into();
    }

    pub(crate) fn set_check_latency(&self, latency: Duration) {
        self.state().check_latency = latency;
    }

    pub(crate) fn fail_next_check_fetches(&self, count: usize) {
        self.state().failing_fetches = count;
    }

    pub(crate) fn script_mergeability(&self, script: Vec<Option<bool>>) {
        self.state().mergeability = script.into();
    }

    pub(crate) fn set_merge_sha(&self, sha: &str) {
        self.state().merge_sha = Some(sha.to_string());
    }

    pub(crate) fn set_merge_error(&self, err: HostError) {
        self.state().merge_error = Some(err);
    }

    /// The next create succeeds on the host but the caller sees an error.
    pub(crate) fn drop_next_create_response(&self) {
        self.state().drop_next_create_response = true;
    }

    /// Creates report a duplicate although no request is open.
    pub(crate) fn report_duplicate_without_request(&self) {
        self.state().duplicate_without_request = true;
    }

    pub(crate) fn fail_labels(&self, err: HostError) {
        self.state().label_error = Some(err);
    }

    pub(crate) fn fail_reviewers(&self, err: HostError) {
        self.state().reviewer_error = Some(err);
    }

    pub(crate) fn fail_branch_delete(&self, err: HostError) {
        self.state().delete_error = Some(err);
    }

    pub(crate) fn open_requests(&self) -> Vec<RequestHandle> {
        self.state()
            .requests
            .iter()
            .filter(|r| r.state == RequestState::Open)
            .cloned()
            .collect()
    }

    pub(crate) fn check_fetches(&self) -> usize {
        self.state().check_fetches
    }

    pub(crate) fn reruns(&self) -> Vec<u64> {
        self.state().reruns.clone()
    }

    pub(crate) fn mergeability_fetches(&self) -> usize {
        self.state().mergeability_fetches
    }

    pub(crate) fn merges(&self) -> Vec<(u64, MergeCommit)> {
        self.state().merges.clone()
    }

    pub(crate) fn created_labels(&self) -> Vec<String> {
        self.state().created_labels.clone()
    }

    pub(crate) fn applied_labels(&self) -> Vec<(u64, Vec<String>)> {
        self.state().applied_labels.clone()
    }

    pub(crate) fn reviewer_requests(&self) -> Vec<(u64, Vec<String>)> {
        self.state().reviewer_requests.clone()
    }

    pub(crate) fn deleted_branches(&self) -> Vec<String> {
        self.state().deleted_branches.clone()
    }
}

#[async_trait]
impl RepositoryHost for ScriptedHost {
    async fn create_request(&self, request: &NewRequest) -> HostResult<RequestHandle> {
        let mut state = self.state();
        let duplicate = state.duplicate_without_request
            || state
                .requests
                .iter()
                .any(|r| r.source_branch == request.head && r.state == RequestState::Open);
        if duplicate {
            return Err(HostError::AlreadyExists(format!(
                "A pull request already exists for acme:{}.",
                request.head
            )));
        }

        let number = FIRST_REQUEST_NUMBER + state.requests.len() as u64;
        let mut handle = request_handle(number, &request.head);
        handle.title = request.title.clone();
        handle.body = request.body.clone();
        handle.target_branch = request.base.clone();
        state.requests.push(handle.clone());

        if state.drop_next_create_response {
            state.drop_next_create_response = false;
            return Err(HostError::Transport("connection reset by peer".to_string()));
        }
        Ok(handle)
    }

    async fn find_open_request(&self, branch: &str) -> HostResult<Option<RequestHandle>> {
        Ok(self
            .state()
            .requests
            .iter()
            .find(|r| r.source_branch == branch && r.state == RequestState::Open)
            .cloned())
    }

    async fn list_labels(&self) -> HostResult<Vec<String>> {
        let state = self.state();
        match &state.label_error {
            Some(err) => Err(err.clone()),
            None => Ok(state.labels.clone()),
        }
    }

    async fn create_label(&self, name: &str, _color: &str) -> HostResult<()> {
        let mut state = self.state();
        if let Some(err) = &state.label_error {
            return Err(err.clone());
        }
        state.labels.push(name.to_string());
        state.created_labels.push(name.to_string());
        Ok(())
    }

    async fn add_labels(&self, number: u64, labels: &[String]) -> HostResult<()> {
        let mut state = self.state();
        if let Some(err) = &state.label_error {
            return Err(err.clone());
        }
        state.applied_labels.push((number, labels.to_vec()));
        Ok(())
    }

    async fn request_reviewers(&self, number: u64, reviewers: &[String]) -> HostResult<()> {
        let mut state = self.state();
        if let Some(err) = &state.reviewer_error {
            return Err(err.clone());
        }
        state.reviewer_requests.push((number, reviewers.to_vec()));
        Ok(())
    }

    async fn list_checks(&self, _git_ref: &str) -> HostResult<Vec<VerificationCheck>> {
        let latency = {
            let mut state = self.state();
            state.check_fetches += 1;
            state.check_latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state();
        if state.failing_fetches > 0 {
            state.failing_fetches -= 1;
            return Err(HostError::Transport("connection reset by peer".to_string()));
        }
        if let Some(next) = state.check_script.pop_front() {
            state.last_checks = next;
        }
        Ok(state.last_checks.clone())
    }

    async fn rerun_check(&self, check_id: u64) -> HostResult<()> {
        self.state().reruns.push(check_id);
        Ok(())
    }

    async fn mergeability(&self, _number: u64) -> HostResult<Option<bool>> {
        let mut state = self.state();
        state.mergeability_fetches += 1;
        Ok(state.mergeability.pop_front().unwrap_or(Some(true)))
    }

    async fn branch_protection(&self, _branch: &str) -> HostResult<Option<ProtectionSummary>> {
        Err(HostError::Forbidden("Resource not accessible by integration".to_string()))
    }

    async fn merge(&self, number: u64, commit: &MergeCommit) -> HostResult<String> {
        let mut state = self.state();
        state.merges.push((number, commit.clone()));
        if let Some(err) = &state.merge_error {
            return Err(err.clone());
        }
        if let Some(request) = state.requests.iter_mut().find(|r| r.number == number) {
            request.mark_merged();
        }
        Ok(state
            .merge_sha
            .clone()
            .unwrap_or_else(|| "0123456789abcdef".to_string()))
    }

    async fn delete_branch(&self, branch: &str) -> HostResult<()> {
        let mut state = self.state();
        if let Some(err) = &state.delete_error {
            return Err(err.clone());
        }
        state.deleted_branches.push(branch.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct WorkspaceState {
    push_error: Option<String>,
    pushes: Vec<(String, String)>,
    destroyed: Vec<String>,
}

/// Workspace manager that records calls instead of running git.
#[derive(Default)]
pub(crate) struct ScriptedWorkspace {
    state: Mutex<WorkspaceState>,
}

impl ScriptedWorkspace {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, WorkspaceState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub(crate) fn fail_push(&self, stderr: &str) {
        self.state().push_error = Some(stderr.to_string());
    }

    pub(crate) fn pushes(&self) -> Vec<(String, String)> {
        self.state().pushes.clone()
    }

    pub(crate) fn destroyed(&self) -> Vec<String> {
        self.state().destroyed.clone()
    }
}

#[async_trait]
impl WorkspaceManager for ScriptedWorkspace {
    fn describe(&self, key: &str, branch: &str) -> WorkspaceDescriptor {
        WorkspaceDescriptor {
            work_item_key: key.to_string(),
            path: PathBuf::from(format!("/work/.worktrees/{}", key)),
            branch: branch.to_string(),
        }
    }

    async fn push(&self, key: &str, branch: &str) -> Result<(), WorkspaceError> {
        let mut state = self.state();
        if let Some(stderr) = &state.push_error {
            return Err(WorkspaceError::Git(GitError::Failed {
                command: format!("git push --set-upstream origin {}", branch),
                status: 1,
                stderr: stderr.clone(),
            }));
        }
        state.pushes.push((key.to_string(), branch.to_string()));
        Ok(())
    }

    async fn destroy(&self, key: &str) -> Result<(), WorkspaceError> {
        self.state().destroyed.push(key.to_string());
        Ok(())
    }
}
