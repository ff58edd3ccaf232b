//! SonarQube issue tracker client.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use heal_core::{Issue, IssueTracker, IssueType, Severity, TrackerError};

use crate::error::{RemoteError, RemoteResult};

const SERVICE: &str = "SonarQube";
const ACTIVE_STATUSES: &str = "OPEN,CONFIRMED,REOPENED";
const DEFAULT_PAGE_SIZE: u32 = 100;
/// `api/issues/search` refuses to page past this many results.
const MAX_RESULTS: u32 = 10_000;

/// Client for the SonarQube web API.
///
/// The token is sent as the basic-auth username with an empty password.
pub struct SonarQubeClient {
    base_url: String,
    token: String,
    page_size: u32,
    timeout: Duration,
    client: reqwest::Client,
}

impl SonarQubeClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            page_size: DEFAULT_PAGE_SIZE,
            timeout: Duration::from_secs(30),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, 500);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> RemoteResult<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, ?query, "SonarQube API call");

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.token, Some(""))
            .header("Accept", "application/json")
            .query(query)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| RemoteError::from_reqwest(SERVICE, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Http {
                service: SERVICE,
                status: status.as_u16(),
                body,
            });
        }
        response.json().await.map_err(|e| RemoteError::InvalidResponse {
            service: SERVICE,
            message: e.to_string(),
        })
    }

    /// Server status as reported by `/api/system/status` (e.g. `UP`).
    pub async fn status(&self) -> RemoteResult<String> {
        let status: SystemStatus = self.get("/api/system/status", &[]).await?;
        info!(
            status = %status.status,
            version = status.version.as_deref().unwrap_or("unknown"),
            "SonarQube status"
        );
        Ok(status.status)
    }

    /// All active issues of `project_key` matching the filters, across pages.
    pub async fn search_issues(
        &self,
        project_key: &str,
        severities: &[Severity],
        types: &[IssueType],
    ) -> RemoteResult<Vec<Issue>> {
        let mut issues = Vec::new();
        let mut seen = HashSet::new();
        let mut page = 1u32;

        loop {
            let mut query = vec![
                ("componentKeys", project_key.to_string()),
                ("statuses", ACTIVE_STATUSES.to_string()),
                ("ps", self.page_size.to_string()),
                ("p", page.to_string()),
            ];
            if !severities.is_empty() {
                query.push(("severities", join(severities.iter().map(|s| s.as_str()))));
            }
            if !types.is_empty() {
                query.push(("types", join(types.iter().map(|t| t.as_str()))));
            }

            let response: SearchResponse = self.get("/api/issues/search", &query).await?;
            let count = response.issues.len();
            let total = response
                .paging
                .as_ref()
                .map(|p| p.total)
                .or(response.total)
                .unwrap_or(0);
            debug!(page, count, total, "Fetched issues page");

            for raw in response.issues {
                if !seen.insert(raw.key.clone()) {
                    continue;
                }
                if let Some(issue) = convert_issue(raw, project_key) {
                    issues.push(issue);
                }
            }

            let fetched = page.saturating_mul(self.page_size);
            if count == 0 || fetched >= total || fetched >= MAX_RESULTS {
                break;
            }
            page += 1;
        }

        info!(project = project_key, count = issues.len(), "Fetched issues");
        Ok(issues)
    }
}

#[async_trait]
impl IssueTracker for SonarQubeClient {
    fn prefix(&self) -> String {
        "sonar".to_string()
    }

    async fn validate_connection(&self) -> Result<bool, TrackerError> {
        let status = self.status().await?;
        Ok(status.eq_ignore_ascii_case("UP"))
    }

    async fn fetch_issues(
        &self,
        project_key: &str,
        severities: &[Severity],
        types: &[IssueType],
    ) -> Result<Vec<Issue>, TrackerError> {
        Ok(self.search_issues(project_key, severities, types).await?)
    }
}

fn join<'a>(values: impl Iterator<Item = &'a str>) -> String {
    values.collect::<Vec<_>>().join(",")
}

/// Repository-relative path of a component key such as `proj:src/A.java`.
pub fn component_path(component: &str, project_key: &str) -> String {
    let prefix = format!("{}:", project_key);
    match component.strip_prefix(&prefix) {
        Some(rest) => rest.to_string(),
        None => match component.split_once(':') {
            Some((_, rest)) => rest.to_string(),
            None => component.to_string(),
        },
    }
}

fn convert_issue(raw: RawIssue, project_key: &str) -> Option<Issue> {
    let severity = match raw.severity.as_deref().map(str::parse::<Severity>) {
        Some(Ok(s)) => s,
        _ => {
            warn!(key = %raw.key, severity = ?raw.severity, "Skipping issue with unknown severity");
            return None;
        }
    };
    let issue_type = match raw.issue_type.as_deref().map(str::parse::<IssueType>) {
        Some(Ok(t)) => t,
        _ => {
            warn!(key = %raw.key, issue_type = ?raw.issue_type, "Skipping issue with unknown type");
            return None;
        }
    };

    let issue = Issue::new(
        raw.key,
        severity,
        issue_type,
        component_path(&raw.component, project_key),
        raw.line.unwrap_or(0),
        raw.message,
    );
    Some(match raw.rule {
        Some(rule) if !rule.is_empty() => issue.with_rule(rule),
        _ => issue,
    })
}

#[derive(Debug, Deserialize)]
struct SystemStatus {
    status: String,
    #[serde(default)]
    version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    total: Option<u32>,
    #[serde(default)]
    paging: Option<Paging>,
    #[serde(default)]
    issues: Vec<RawIssue>,
}

#[derive(Debug, Deserialize)]
struct Paging {
    total: u32,
}

#[derive(Debug, Deserialize)]
struct RawIssue {
    key: String,
    #[serde(default)]
    rule: Option<String>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(rename = "type", default)]
    issue_type: Option<String>,
    component: String,
    #[serde(default)]
    line: Option<u32>,
    #[serde(default)]
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(key: &str, severity: &str, issue_type: &str) -> RawIssue {
        RawIssue {
            key: key.to_string(),
            rule: Some("java:S2095".into()),
            severity: Some(severity.into()),
            issue_type: Some(issue_type.into()),
            component: "demo:src/main/java/A.java".into(),
            line: Some(10),
            message: "Close this stream".into(),
        }
    }

    #[test]
    fn test_component_path() {
        assert_eq!(component_path("demo:src/A.java", "demo"), "src/A.java");
        assert_eq!(component_path("org:demo:src/A.java", "org:demo"), "src/A.java");
        assert_eq!(component_path("other:B.java", "demo"), "B.java");
        assert_eq!(component_path("C.java", "demo"), "C.java");
    }

    #[test]
    fn test_convert_issue() {
        let issue = convert_issue(raw("AX1", "BLOCKER", "BUG"), "demo").unwrap();
        assert_eq!(issue.severity, Severity::Blocker);
        assert_eq!(issue.issue_type, IssueType::Bug);
        assert_eq!(issue.file.to_str(), Some("src/main/java/A.java"));
        assert_eq!(issue.rule.as_deref(), Some("java:S2095"));
        assert_eq!(issue.line, 10);
    }

    #[test]
    fn test_unknown_values_are_skipped() {
        assert!(convert_issue(raw("AX1", "URGENT", "BUG"), "demo").is_none());
        assert!(convert_issue(raw("AX2", "MAJOR", "SECURITY_HOTSPOT"), "demo").is_none());

        let mut no_line = raw("AX3", "MINOR", "CODE_SMELL");
        no_line.line = None;
        assert_eq!(convert_issue(no_line, "demo").unwrap().line, 0);
    }
}
