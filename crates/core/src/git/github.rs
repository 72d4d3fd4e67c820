//! GitHub REST API client.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::ProposalHost;
use crate::errors::GitHubError;
use crate::models::ProposalCandidate;

/// GitHub caps `per_page` at this value.
const MAX_PER_PAGE: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub state: String,
    pub head: PullRequestRef,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub merged: Option<bool>,
    #[serde(default)]
    pub merged_at: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestRef {
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub sha: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
}

impl From<PullRequest> for ProposalCandidate {
    fn from(pr: PullRequest) -> Self {
        // The list endpoint omits `merged`; `merged_at` is always present.
        let merged = pr.merged.unwrap_or(false) || pr.merged_at.is_some();
        Self {
            number: pr.number,
            title: pr.title,
            head_sha: pr.head.sha,
            labels: pr.labels.into_iter().map(|l| l.name).collect(),
            state: pr.state,
            merged,
            created_at: pr.created_at,
        }
    }
}

/// Asynchronous GitHub REST API client bound to one repository.
#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    repo: String,
    token: String,
}

impl GitHubClient {
    pub fn new(
        api_url: impl Into<String>,
        repo: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self, GitHubError> {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        let repo = repo.into();
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("mergestage/0.1"));
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;
        info!(api_url = %api_url, repo = %repo, "created GitHubClient");
        Ok(Self {
            http,
            api_url,
            repo,
            token: token.into(),
        })
    }

    /// `GET /repos/{repo}/pulls` for open pull requests, oldest first.
    #[instrument(skip(self), fields(repo = %self.repo))]
    pub async fn list_open_pull_requests(
        &self,
        limit: usize,
    ) -> Result<Vec<PullRequest>, GitHubError> {
        let url = format!("{}/repos/{}/pulls", self.api_url, self.repo);
        let per_page = limit.clamp(1, MAX_PER_PAGE).to_string();
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .query(&[
                ("state", "open"),
                ("sort", "created"),
                ("direction", "asc"),
                ("per_page", per_page.as_str()),
            ])
            .send()
            .await?;
        self.check_response(&resp)?;
        let prs: Vec<PullRequest> = resp
            .json()
            .await
            .map_err(|e| GitHubError::ParseError(e.to_string()))?;
        debug!(count = prs.len(), "fetched open pull requests");
        Ok(prs)
    }

    fn labels_url(&self, number: u64) -> String {
        format!("{}/repos/{}/issues/{}/labels", self.api_url, self.repo, number)
    }

    /// `DELETE .../labels/{name}` with the label name percent-encoded.
    fn label_url(&self, number: u64, label: &str) -> Result<Url, GitHubError> {
        let mut url = Url::parse(&self.labels_url(number))
            .map_err(|e| GitHubError::ParseError(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| GitHubError::ParseError("API URL cannot be a base".into()))?
            .push(label);
        Ok(url)
    }

    fn check_response(&self, resp: &reqwest::Response) -> Result<(), GitHubError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(GitHubError::AuthenticationFailed(format!(
                "HTTP {}",
                status
            )));
        }
        if status.as_u16() == 404 {
            return Err(GitHubError::NotFound(resp.url().path().to_string()));
        }
        if status.as_u16() == 429 {
            let reset = resp
                .headers()
                .get("x-ratelimit-reset")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("unknown")
                .to_string();
            return Err(GitHubError::RateLimited { reset_at: reset });
        }
        Err(GitHubError::ApiError {
            status: status.as_u16(),
            body: format!("HTTP {}", status),
        })
    }
}

#[async_trait]
impl ProposalHost for GitHubClient {
    async fn list_open_proposals(
        &self,
        limit: usize,
    ) -> Result<Vec<ProposalCandidate>, GitHubError> {
        let prs = self.list_open_pull_requests(limit).await?;
        Ok(prs.into_iter().map(ProposalCandidate::from).collect())
    }

    #[instrument(skip(self), fields(repo = %self.repo))]
    async fn add_label(&self, number: u64, label: &str) -> Result<(), GitHubError> {
        let payload = serde_json::json!({ "labels": [label] });
        let resp = self
            .http
            .post(self.labels_url(number))
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;
        self.check_response(&resp)?;
        info!(number, label, "added label");
        Ok(())
    }

    #[instrument(skip(self), fields(repo = %self.repo))]
    async fn remove_label(&self, number: u64, label: &str) -> Result<(), GitHubError> {
        let resp = self
            .http
            .delete(self.label_url(number, label)?)
            .bearer_auth(&self.token)
            .send()
            .await?;
        match self.check_response(&resp) {
            Ok(()) => {
                info!(number, label, "removed label");
                Ok(())
            }
            Err(GitHubError::NotFound(_)) => {
                debug!(number, label, "label not present");
                Ok(())
            }
            Err(e) => {
                warn!(number, label, error = %e, "failed to remove label");
                Err(e)
            }
        }
    }
}
