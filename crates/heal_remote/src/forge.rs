//! Review-request APIs: GitHub pull requests and GitLab merge requests.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{RemoteError, RemoteResult};

/// A hosting service that can open review requests for pushed branches.
#[async_trait]
pub trait Forge: Send + Sync {
    fn name(&self) -> &'static str;

    /// Open a review request from `branch` into `base`. Returns its web URL.
    async fn open_review(
        &self,
        branch: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> RemoteResult<String>;
}

async fn send_json<T: serde::de::DeserializeOwned>(
    service: &'static str,
    builder: reqwest::RequestBuilder,
) -> RemoteResult<T> {
    let response = builder
        .send()
        .await
        .map_err(|e| RemoteError::from_reqwest(service, e))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RemoteError::Http {
            service,
            status: status.as_u16(),
            body,
        });
    }
    response.json().await.map_err(|e| RemoteError::InvalidResponse {
        service,
        message: e.to_string(),
    })
}

pub const GITHUB_API_URL: &str = "https://api.github.com";

/// GitHub pull requests via the REST API.
pub struct GitHubForge {
    api_url: String,
    owner: String,
    repo: String,
    token: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl GitHubForge {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            api_url: GITHUB_API_URL.to_string(),
            owner: owner.into(),
            repo: repo.into(),
            token: token.into(),
            timeout: Duration::from_secs(30),
            client: reqwest::Client::new(),
        }
    }

    /// Derive owner and repository from a remote URL.
    pub fn from_remote_url(url: &str, token: impl Into<String>) -> RemoteResult<Self> {
        let (owner, repo) =
            parse_repo_slug(url).ok_or_else(|| RemoteError::InvalidRemote(url.to_string()))?;
        Ok(Self::new(owner, repo, token))
    }

    /// Use a GitHub Enterprise or test endpoint.
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

#[derive(Debug, Serialize)]
struct PullRequest<'a> {
    title: &'a str,
    head: &'a str,
    base: &'a str,
    body: &'a str,
}

#[derive(Debug, Deserialize)]
struct PullRequestCreated {
    html_url: String,
    #[serde(default)]
    number: Option<u64>,
}

#[async_trait]
impl Forge for GitHubForge {
    fn name(&self) -> &'static str {
        "GitHub"
    }

    async fn open_review(
        &self,
        branch: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> RemoteResult<String> {
        let url = format!("{}/repos/{}/{}/pulls", self.api_url, self.owner, self.repo);
        let builder = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "heal")
            .timeout(self.timeout)
            .json(&PullRequest {
                title,
                head: branch,
                base,
                body,
            });

        let created: PullRequestCreated = send_json(self.name(), builder).await?;
        info!(repo = %self.slug(), number = ?created.number, url = %created.html_url, "Pull request opened");
        Ok(created.html_url)
    }
}

/// GitLab merge requests via the v4 API.
pub struct GitLabForge {
    base_url: String,
    project_id: String,
    token: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl GitLabForge {
    /// `project_id` is either the numeric id or the `group/project` path.
    pub fn new(
        base_url: impl Into<String>,
        project_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            project_id: project_id.into(),
            token: token.into(),
            timeout: Duration::from_secs(30),
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/api/v4/projects/{}/merge_requests",
            self.base_url,
            encode_path_segment(&self.project_id)
        )
    }
}

#[derive(Debug, Serialize)]
struct MergeRequest<'a> {
    source_branch: &'a str,
    target_branch: &'a str,
    title: &'a str,
    description: &'a str,
    remove_source_branch: bool,
}

#[derive(Debug, Deserialize)]
struct MergeRequestCreated {
    web_url: String,
    #[serde(default)]
    iid: Option<u64>,
}

#[async_trait]
impl Forge for GitLabForge {
    fn name(&self) -> &'static str {
        "GitLab"
    }

    async fn open_review(
        &self,
        branch: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> RemoteResult<String> {
        let builder = self
            .client
            .post(self.endpoint())
            .header("PRIVATE-TOKEN", &self.token)
            .timeout(self.timeout)
            .json(&MergeRequest {
                source_branch: branch,
                target_branch: base,
                title,
                description: body,
                remove_source_branch: false,
            });

        let created: MergeRequestCreated = send_json(self.name(), builder).await?;
        info!(project = %self.project_id, iid = ?created.iid, url = %created.web_url, "Merge request opened");
        Ok(created.web_url)
    }
}

/// Percent-encode characters that are not unreserved in a URL path segment.
fn encode_path_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

/// Owner and repository name from an https or ssh remote URL.
///
/// Accepts `https://host/owner/repo(.git)`, `ssh://git@host/owner/repo.git`
/// and `git@host:owner/repo.git`.
pub fn parse_repo_slug(url: &str) -> Option<(String, String)> {
    let url = url.trim();
    let path = if let Some((_, rest)) = url.split_once("://") {
        // Drop the authority (user@host:port).
        rest.split_once('/')?.1
    } else if let Some((host, rest)) = url.split_once(':') {
        if !host.contains('@') && !host.contains('.') {
            return None;
        }
        rest
    } else {
        return None;
    };

    let path = path.trim_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    let (owner, repo) = path.rsplit_once('/')?;
    if owner.is_empty() || repo.is_empty() {
        return None;
    }
    Some((owner.to_string(), repo.to_string()))
}
