//! GitHub implementation of [`RepositoryHost`] over octocrab.

use async_trait::async_trait;
use octocrab::Octocrab;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{
    HostError, HostResult, MergeCommit, NewRequest, ProtectionSummary, RepositoryHost,
    RequestHandle, RequestState,
};
use crate::config::GitHubSettings;
use crate::verification::{CheckConclusion, CheckStatus, VerificationCheck};

/// Client for one GitHub repository.
#[derive(Clone)]
pub struct GitHubHost {
    client: Octocrab,
    owner: String,
    repo: String,
}

impl std::fmt::Debug for GitHubHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubHost")
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .finish_non_exhaustive()
    }
}

impl GitHubHost {
    pub fn new(client: Octocrab, owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            client,
            owner: owner.into(),
            repo: repo.into(),
        }
    }

    /// Build a client from settings, reading the token from the configured
    /// environment variable.
    pub fn from_settings(settings: &GitHubSettings) -> HostResult<Self> {
        let token = std::env::var(&settings.token_env).map_err(|_| {
            HostError::Forbidden(format!(
                "environment variable {} is not set",
                settings.token_env
            ))
        })?;

        let mut builder = Octocrab::builder().personal_token(token);
        if let Some(api_url) = &settings.api_url {
            builder = builder
                .base_uri(api_url.as_str())
                .map_err(|e| HostError::Transport(format!("invalid api_url {}: {}", api_url, e)))?;
        }
        let client = builder.build().map_err(map_error)?;

        Ok(Self::new(client, &settings.owner, &settings.repo))
    }

    fn route(&self, path: &str) -> String {
        format!("/repos/{}/{}/{}", self.owner, self.repo, path)
    }
}

#[async_trait]
impl RepositoryHost for GitHubHost {
    async fn create_request(&self, request: &NewRequest) -> HostResult<RequestHandle> {
        let body = CreatePullBody {
            title: &request.title,
            body: &request.body,
            head: &request.head,
            base: &request.base,
        };
        let pull: PullPayload = self
            .client
            .post(self.route("pulls"), Some(&body))
            .await
            .map_err(map_error)?;
        Ok(pull.into_handle())
    }

    async fn find_open_request(&self, branch: &str) -> HostResult<Option<RequestHandle>> {
        let route = self.route(&format!(
            "pulls?state=open&head={}:{}",
            encode(&self.owner),
            encode(branch)
        ));
        let pulls: Vec<PullPayload> = self
            .client
            .get(route, None::<&()>)
            .await
            .map_err(map_error)?;
        Ok(pulls
            .into_iter()
            .find(|p| p.head.name == branch)
            .map(PullPayload::into_handle))
    }

    async fn list_labels(&self) -> HostResult<Vec<String>> {
        let labels: Vec<LabelPayload> = self
            .client
            .get(self.route("labels?per_page=100"), None::<&()>)
            .await
            .map_err(map_error)?;
        Ok(labels.into_iter().map(|l| l.name).collect())
    }

    async fn create_label(&self, name: &str, color: &str) -> HostResult<()> {
        let body = serde_json::json!({ "name": name, "color": color });
        let _: serde_json::Value = self
            .client
            .post(self.route("labels"), Some(&body))
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn add_labels(&self, number: u64, labels: &[String]) -> HostResult<()> {
        let body = serde_json::json!({ "labels": labels });
        let _: serde_json::Value = self
            .client
            .post(self.route(&format!("issues/{}/labels", number)), Some(&body))
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn request_reviewers(&self, number: u64, reviewers: &[String]) -> HostResult<()> {
        let body = serde_json::json!({ "reviewers": reviewers });
        let _: serde_json::Value = self
            .client
            .post(
                self.route(&format!("pulls/{}/requested_reviewers", number)),
                Some(&body),
            )
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn list_checks(&self, git_ref: &str) -> HostResult<Vec<VerificationCheck>> {
        let mut checks = Vec::new();
        let mut page = 1u32;
        loop {
            let route = self.route(&format!(
                "commits/{}/check-runs?per_page={}&page={}",
                encode(git_ref),
                CHECK_RUNS_PER_PAGE,
                page
            ));
            let payload: CheckRunsPayload = self
                .client
                .get(route, None::<&()>)
                .await
                .map_err(map_error)?;
            let fetched = payload.check_runs.len();
            checks.extend(payload.check_runs.into_iter().map(CheckRunPayload::into_check));

            if !has_more_check_runs(fetched, checks.len(), payload.total_count) {
                debug!(git_ref, total = payload.total_count, pages = page, "fetched check runs");
                return Ok(checks);
            }
            page += 1;
        }
    }

    async fn rerun_check(&self, check_id: u64) -> HostResult<()> {
        let route = self.route(&format!("check-runs/{}/rerequest", check_id));
        let response = self
            .client
            ._post(route, None::<&()>)
            .await
            .map_err(map_error)?;
        octocrab::map_github_error(response)
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn mergeability(&self, number: u64) -> HostResult<Option<bool>> {
        let pull: PullPayload = self
            .client
            .get(self.route(&format!("pulls/{}", number)), None::<&()>)
            .await
            .map_err(map_error)?;
        Ok(pull.mergeable)
    }

    async fn branch_protection(&self, branch: &str) -> HostResult<Option<ProtectionSummary>> {
        let route = self.route(&format!("branches/{}/protection", encode(branch)));
        let result: Result<ProtectionPayload, _> = self.client.get(route, None::<&()>).await;
        match result.map_err(map_error) {
            Ok(payload) => Ok(Some(payload.into_summary())),
            Err(HostError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn merge(&self, number: u64, commit: &MergeCommit) -> HostResult<String> {
        let body = MergeBody {
            commit_title: &commit.title,
            commit_message: &commit.message,
            merge_method: commit.method.as_str(),
        };
        let merged: MergePayload = self
            .client
            .put(self.route(&format!("pulls/{}/merge", number)), Some(&body))
            .await
            .map_err(map_error)?;
        match (merged.merged, merged.sha) {
            (true, Some(sha)) => Ok(sha),
            _ => Err(HostError::NotMergeable(merged.message)),
        }
    }

    async fn delete_branch(&self, branch: &str) -> HostResult<()> {
        let route = self.route(&format!("git/refs/heads/{}", branch));
        let response = self
            .client
            ._delete(route, None::<&()>)
            .await
            .map_err(map_error)?;
        octocrab::map_github_error(response)
            .await
            .map_err(map_error)?;
        Ok(())
    }
}

/// Map an octocrab error onto the host error vocabulary.
fn map_error(err: octocrab::Error) -> HostError {
    match err {
        octocrab::Error::GitHub { source, .. } => {
            let mut message = source.message.clone();
            for detail in source.errors.iter().flatten() {
                if let Some(text) = detail.get("message").and_then(|m| m.as_str()) {
                    message.push_str(": ");
                    message.push_str(text);
                }
            }
            HostError::from_status(source.status_code.as_u16(), message)
        }
        octocrab::Error::Serde { source, .. } => HostError::Decode(source.to_string()),
        octocrab::Error::Json { source, .. } => HostError::Decode(source.to_string()),
        other => HostError::Transport(other.to_string()),
    }
}

/// Percent-encode the characters that would break a path segment or query value.
fn encode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            '&' => out.push_str("%26"),
            ' ' => out.push_str("%20"),
            '+' => out.push_str("%2B"),
            _ => out.push(ch),
        }
    }
    out
}

#[derive(Serialize)]
struct CreatePullBody<'a> {
    title: &'a str,
    body: &'a str,
    head: &'a str,
    base: &'a str,
}

#[derive(Serialize)]
struct MergeBody<'a> {
    commit_title: &'a str,
    commit_message: &'a str,
    merge_method: &'a str,
}

#[derive(Deserialize)]
struct BranchRefPayload {
    #[serde(rename = "ref")]
    name: String,
}

#[derive(Deserialize)]
struct PullPayload {
    number: u64,
    html_url: String,
    title: String,
    #[serde(default)]
    body: Option<String>,
    state: String,
    #[serde(default)]
    merged_at: Option<String>,
    #[serde(default)]
    mergeable: Option<bool>,
    #[serde(default)]
    auto_merge: Option<serde_json::Value>,
    head: BranchRefPayload,
    base: BranchRefPayload,
}

impl PullPayload {
    fn into_handle(self) -> RequestHandle {
        let state = if self.merged_at.is_some() {
            RequestState::Merged
        } else if self.state == "closed" {
            RequestState::Closed
        } else {
            RequestState::Open
        };
        RequestHandle {
            number: self.number,
            url: self.html_url,
            title: self.title,
            body: self.body.unwrap_or_default(),
            source_branch: self.head.name,
            target_branch: self.base.name,
            state,
            auto_merge_requested: self.auto_merge.is_some_and(|v| !v.is_null()),
        }
    }
}

#[derive(Deserialize)]
struct LabelPayload {
    name: String,
}

const CHECK_RUNS_PER_PAGE: usize = 100;

/// Whether another page of check runs is needed after one returned
/// `fetched` runs, bringing the total seen to `seen`.
fn has_more_check_runs(fetched: usize, seen: usize, total_count: u64) -> bool {
    fetched == CHECK_RUNS_PER_PAGE && (seen as u64) < total_count
}

#[derive(Deserialize)]
struct CheckRunsPayload {
    #[serde(default)]
    total_count: u64,
    #[serde(default)]
    check_runs: Vec<CheckRunPayload>,
}

#[derive(Deserialize)]
struct CheckRunPayload {
    id: u64,
    name: String,
    status: String,
    #[serde(default)]
    conclusion: Option<String>,
}

impl CheckRunPayload {
    fn into_check(self) -> VerificationCheck {
        let status = CheckStatus::parse(&self.status);
        let conclusion = match status {
            CheckStatus::Completed => {
                let parsed = self.conclusion.as_deref().and_then(CheckConclusion::parse);
                if parsed.is_none() {
                    warn!(
                        component = "verification",
                        check = %self.name,
                        conclusion = self.conclusion.as_deref().unwrap_or("<none>"),
                        "unrecognized check conclusion, treating check as failing"
                    );
                }
                Some(parsed.unwrap_or(CheckConclusion::Unrecognized))
            }
            _ => None,
        };
        VerificationCheck {
            id: self.id,
            name: self.name,
            status,
            conclusion,
        }
    }
}

#[derive(Deserialize)]
struct ProtectionPayload {
    #[serde(default)]
    required_status_checks: Option<RequiredChecksPayload>,
    #[serde(default)]
    required_pull_request_reviews: Option<RequiredReviewsPayload>,
    #[serde(default)]
    enforce_admins: Option<EnabledPayload>,
}

#[derive(Deserialize)]
struct RequiredChecksPayload {
    #[serde(default)]
    contexts: Vec<String>,
}

#[derive(Deserialize)]
struct RequiredReviewsPayload {
    #[serde(default)]
    required_approving_review_count: u32,
}

#[derive(Deserialize)]
struct EnabledPayload {
    enabled: bool,
}

impl ProtectionPayload {
    fn into_summary(self) -> ProtectionSummary {
        ProtectionSummary {
            required_checks: self
                .required_status_checks
                .map(|c| c.contexts)
                .unwrap_or_default(),
            required_approvals: self
                .required_pull_request_reviews
                .map_or(0, |r| r.required_approving_review_count),
            enforce_admins: self.enforce_admins.is_some_and(|e| e.enabled),
        }
    }
}

#[derive(Deserialize)]
struct MergePayload {
    #[serde(default)]
    sha: Option<String>,
    #[serde(default)]
    merged: bool,
    #[serde(default)]
    message: String,
}
