//! Tracker, forge and repository clients against a local HTTP stub and a
//! throwaway git remote.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use heal_core::{
    GitIdentity, GitOps, IssueTracker, IssueType, Severity, TrackerError, VcsClient, VcsError,
};
use heal_remote::{Forge, GitHubForge, GitLabForge, RemoteResult, RepositoryClient, SonarQubeClient};

/// Serves canned responses in order, one per connection, recording requests.
struct Stub {
    url: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl Stub {
    async fn start(responses: Vec<(u16, String)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = requests.clone();

        tokio::spawn(async move {
            for (status, body) in responses {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let request = read_request(&mut socket).await;
                recorded.lock().push(request);
                let response = format!(
                    "HTTP/1.1 {} Stub\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        Self { url, requests }
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let Ok(n) = socket.read(&mut chunk).await else {
            break;
        };
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&buf).to_string();
        if let Some(split) = text.find("\r\n\r\n") {
            let length = text[..split]
                .lines()
                .filter_map(|l| l.split_once(':'))
                .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= split + 4 + length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

fn issue_json(key: &str, severity: &str, issue_type: &str, line: u32) -> String {
    format!(
        r#"{{"key":"{key}","rule":"java:S1481","severity":"{severity}","type":"{issue_type}","component":"demo:src/A.java","line":{line},"message":"Remove this unused local variable.","status":"OPEN"}}"#
    )
}

// ---- SonarQube ----

#[tokio::test]
async fn test_sonar_status_up() {
    let stub = Stub::start(vec![(200, r#"{"id":"x","version":"10.4","status":"UP"}"#.into())]).await;
    let client = SonarQubeClient::new(&stub.url, "squ_token");

    assert_eq!(client.validate_connection().await, Ok(true));
    let request = stub.requests()[0].to_ascii_lowercase();
    assert!(request.starts_with("get /api/system/status"));
    // Token as username, empty password: base64("squ_token:")
    assert!(request.contains("authorization: basic c3f1x3rva2vuog=="));
}

#[tokio::test]
async fn test_sonar_status_not_up() {
    let stub = Stub::start(vec![(200, r#"{"status":"STARTING"}"#.into())]).await;
    let client = SonarQubeClient::new(&stub.url, "t");
    assert_eq!(client.validate_connection().await, Ok(false));
}

#[tokio::test]
async fn test_sonar_bad_token() {
    let stub = Stub::start(vec![(401, String::new())]).await;
    let client = SonarQubeClient::new(&stub.url, "wrong");
    assert!(matches!(
        client.validate_connection().await,
        Err(TrackerError::Auth(_))
    ));
}

#[tokio::test]
async fn test_sonar_paginates_and_filters() {
    let page1 = format!(
        r#"{{"paging":{{"pageIndex":1,"pageSize":2,"total":3}},"issues":[{},{}]}}"#,
        issue_json("AX1", "MAJOR", "CODE_SMELL", 5),
        issue_json("AX2", "BLOCKER", "BUG", 9)
    );
    let page2 = format!(
        r#"{{"paging":{{"pageIndex":2,"pageSize":2,"total":3}},"issues":[{}]}}"#,
        issue_json("AX3", "SEVERE", "BUG", 11)
    );
    let stub = Stub::start(vec![(200, page1), (200, page2)]).await;
    let client = SonarQubeClient::new(&stub.url, "t").with_page_size(2);

    let issues = client
        .fetch_issues("demo", &[Severity::Blocker, Severity::Major], &[])
        .await
        .unwrap();

    // AX3 carries an unknown severity and is dropped
    let keys: Vec<_> = issues.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(keys, vec!["AX1", "AX2"]);
    assert_eq!(issues[1].file, PathBuf::from("src/A.java"));
    assert_eq!(issues[1].issue_type, IssueType::Bug);

    let requests = stub.requests();
    assert_eq!(requests.len(), 2);
    let first = requests[0].lines().next().unwrap_or_default().to_string();
    assert!(first.starts_with("GET /api/issues/search?"));
    assert!(first.contains("componentKeys=demo"));
    assert!(first.contains("statuses=OPEN%2CCONFIRMED%2CREOPENED"));
    assert!(first.contains("severities=BLOCKER%2CMAJOR"));
    assert!(first.contains("ps=2"));
    assert!(first.contains("p=1"));
    assert!(!first.contains("types="));
    assert!(requests[1].contains("&p=2"));
}

#[tokio::test]
async fn test_sonar_server_error_is_transient() {
    let stub = Stub::start(vec![(503, "maintenance".into())]).await;
    let client = SonarQubeClient::new(&stub.url, "t");
    assert!(matches!(
        client.fetch_issues("demo", &[], &[]).await,
        Err(TrackerError::Unreachable(_))
    ));
}

// ---- Forges ----

#[tokio::test]
async fn test_github_pull_request() {
    let stub = Stub::start(vec![(
        201,
        r#"{"number":7,"html_url":"https://github.com/acme/billing/pull/7"}"#.into(),
    )])
    .await;
    let forge = GitHubForge::new("acme", "billing", "ghp_x").with_api_url(&stub.url);

    let url = forge
        .open_review("fix/sonar-ax1-remove", "main", "fix(sonar): resolve", "body")
        .await
        .unwrap();
    assert_eq!(url, "https://github.com/acme/billing/pull/7");

    let request = &stub.requests()[0];
    assert!(request.starts_with("POST /repos/acme/billing/pulls"));
    assert!(request.contains(r#""head":"fix/sonar-ax1-remove""#));
    assert!(request.contains(r#""base":"main""#));
    assert!(request.to_ascii_lowercase().contains("authorization: bearer ghp_x"));
}

#[tokio::test]
async fn test_gitlab_merge_request() {
    let stub = Stub::start(vec![(
        201,
        r#"{"iid":3,"web_url":"https://gitlab.example.com/acme/billing/-/merge_requests/3"}"#.into(),
    )])
    .await;
    let forge = GitLabForge::new(&stub.url, "acme/billing", "glpat");

    let url = forge
        .open_review("fix/sonar-ax1", "develop", "title", "desc")
        .await
        .unwrap();
    assert!(url.ends_with("/merge_requests/3"));

    let request = &stub.requests()[0];
    assert!(request.starts_with("POST /api/v4/projects/acme%2Fbilling/merge_requests"));
    assert!(request.contains(r#""source_branch":"fix/sonar-ax1""#));
    assert!(request.contains(r#""target_branch":"develop""#));
    assert!(request.contains(r#""remove_source_branch":false"#));
    assert!(request.to_ascii_lowercase().contains("private-token: glpat"));
}

#[tokio::test]
async fn test_forge_auth_failure_maps_to_vcs_auth() {
    let stub = Stub::start(vec![(401, r#"{"message":"Bad credentials"}"#.into())]).await;
    let forge = GitHubForge::new("acme", "billing", "bad").with_api_url(&stub.url);

    let err = forge.open_review("b", "main", "t", "d").await.unwrap_err();
    assert!(matches!(VcsError::from(err), VcsError::Auth(_)));
}

// ---- Repository client ----

struct RecordingForge {
    calls: Mutex<Vec<(String, String)>>,
}

#[async_trait::async_trait]
impl Forge for RecordingForge {
    fn name(&self) -> &'static str {
        "Recording"
    }

    async fn open_review(
        &self,
        branch: &str,
        base: &str,
        _title: &str,
        _body: &str,
    ) -> RemoteResult<String> {
        self.calls.lock().push((branch.to_string(), base.to_string()));
        Ok(format!("https://forge.example.com/{}", branch))
    }
}

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(["-c", "user.name=Heal Bot", "-c", "user.email=heal@example.com"])
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(output.status.success(), "git {:?}: {}", args, String::from_utf8_lossy(&output.stderr));
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// A clone on `main` with one commit and a bare `origin`.
fn clone_with_origin() -> Option<(TempDir, PathBuf, PathBuf)> {
    if !GitOps::is_git_available() {
        println!("Git not available, skipping test");
        return None;
    }
    let temp = TempDir::new().unwrap();
    let origin = temp.path().join("origin.git");
    let work = temp.path().join("work");
    std::fs::create_dir_all(&origin).unwrap();
    std::fs::create_dir_all(&work).unwrap();

    git(&origin, &["init", "--bare"]);
    git(&work, &["init"]);
    git(&work, &["checkout", "-b", "main"]);
    std::fs::write(work.join("A.java"), "class A {}\n").unwrap();
    git(&work, &["add", "A.java"]);
    git(&work, &["commit", "-m", "initial"]);
    git(&work, &["remote", "add", "origin", origin.to_str().unwrap()]);
    Some((temp, work, origin))
}

fn client(work: &Path, forge: Arc<RecordingForge>) -> RepositoryClient {
    let ops = GitOps::new(work).with_identity(GitIdentity {
        name: "Heal Bot".into(),
        email: "heal@example.com".into(),
    });
    RepositoryClient::new(ops, "main").with_forge(forge)
}

#[tokio::test]
async fn test_repository_publish_flow() {
    let Some((_temp, work, origin)) = clone_with_origin() else { return };
    let forge = Arc::new(RecordingForge {
        calls: Mutex::new(Vec::new()),
    });
    let repo = client(&work, forge.clone());

    repo.ensure_ready("main").await.unwrap();
    std::fs::write(work.join("A.java"), "final class A {}\n").unwrap();

    repo.create_branch("fix/sonar-ax1", "main").await.unwrap();
    assert!(matches!(
        repo.create_branch("fix/sonar-ax1", "main").await,
        Err(VcsError::BranchExists(_))
    ));

    let hash = repo
        .commit("fix/sonar-ax1", "fix(sonar): finalize A", &[PathBuf::from("A.java")])
        .await
        .unwrap();
    assert_eq!(hash.len(), 40);

    let url = repo
        .open_merge_request("fix/sonar-ax1", "title", "body")
        .await
        .unwrap();
    assert_eq!(url, "https://forge.example.com/fix/sonar-ax1");
    assert_eq!(
        forge.calls.lock().clone(),
        vec![("fix/sonar-ax1".to_string(), "main".to_string())]
    );
    // Pushed before the review request
    assert_eq!(git(&origin, &["rev-parse", "refs/heads/fix/sonar-ax1"]), hash);

    repo.checkout("main").await.unwrap();
    assert_eq!(std::fs::read_to_string(work.join("A.java")).unwrap(), "class A {}\n");
}

#[tokio::test]
async fn test_repository_missing_base_is_unavailable() {
    let Some((_temp, work, _origin)) = clone_with_origin() else { return };
    let repo = client(
        &work,
        Arc::new(RecordingForge {
            calls: Mutex::new(Vec::new()),
        }),
    );
    assert!(matches!(
        repo.ensure_ready("develop").await,
        Err(VcsError::Unavailable(_))
    ));
}

#[tokio::test]
async fn test_repository_refuses_uncommitted_changes() {
    let Some((_temp, work, _origin)) = clone_with_origin() else { return };
    let repo = RepositoryClient::new(GitOps::new(&work), "main");

    std::fs::write(work.join("Notes.txt"), "scratch\n").unwrap();
    repo.ensure_ready("main").await.unwrap();

    std::fs::write(work.join("A.java"), "class A { int x; }\n").unwrap();
    match repo.ensure_ready("main").await {
        Err(VcsError::Unavailable(message)) => assert!(message.contains("A.java"), "{}", message),
        other => panic!("expected unavailable, got {:?}", other),
    }
}

#[tokio::test]
async fn test_not_a_repository() {
    let temp = TempDir::new().unwrap();
    let repo = RepositoryClient::new(GitOps::new(temp.path()), "main");
    assert!(matches!(
        repo.ensure_ready("main").await,
        Err(VcsError::Unavailable(_))
    ));
}

#[tokio::test]
async fn test_merge_request_without_forge() {
    let Some((_temp, work, _origin)) = clone_with_origin() else { return };
    let repo = RepositoryClient::new(GitOps::new(&work), "main");
    assert!(matches!(
        repo.open_merge_request("main", "t", "b").await,
        Err(VcsError::Unavailable(_))
    ));
}
