//! End-to-end API tests over the in-process router.
//!
//! The agent-protocol tests drive the full pipeline: a throwaway upstream
//! git repository, a registered node with a real token, and package
//! download through the HTTP surface.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use drover_api::config::Config;
use drover_api::server::Server;

const ADMIN_KEY: &str = "test-admin-key";

struct Harness {
    router: Router,
    _repos_root: tempfile::TempDir,
}

fn harness() -> Harness {
    let repos_root = tempfile::tempdir().expect("tempdir");
    let config = Config {
        repos_root: repos_root.path().to_path_buf(),
        admin_api_key: Some(ADMIN_KEY.to_string()),
        debug: true,
        ..Config::default()
    };
    Harness {
        router: Server::new(config).test_router(),
        _repos_root: repos_root,
    }
}

struct Upstream {
    _dir: tempfile::TempDir,
    path: PathBuf,
}

impl Upstream {
    fn new(files: &[(&str, &str)]) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("upstream");
        std::fs::create_dir_all(&path).unwrap();
        git(&path, &["init", "--quiet", "-b", "main"]);
        git(&path, &["config", "user.email", "ci@example.com"]);
        git(&path, &["config", "user.name", "ci"]);
        for (rel, contents) in files {
            let file = path.join(rel);
            std::fs::create_dir_all(file.parent().unwrap()).unwrap();
            std::fs::write(file, contents).unwrap();
        }
        git(&path, &["add", "-A"]);
        git(&path, &["commit", "--quiet", "-m", "initial"]);
        Self { _dir: dir, path }
    }

    fn url(&self) -> String {
        format!("file://{}", self.path.display())
    }
}

fn git(workdir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(workdir)
        .status()
        .expect("spawn git");
    assert!(status.success(), "git {args:?} failed");
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = router.clone().oneshot(request).await.expect("infallible");
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body.to_vec())
}

async fn send_json(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = send(router, request).await;
    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(Value::Null)
    };
    (status, value)
}

fn admin(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-admin-api-key", ADMIN_KEY);
    match body {
        Some(value) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(value.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

fn agent(method: Method, uri: &str, name: &str, token: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-node-name", name)
        .header("x-node-token", token);
    match body {
        Some(value) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(value.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// Registers a repository + policy + node and assigns the policy.
/// Returns (node name, plaintext token, policy id).
async fn provision(router: &Router, repo_url: &str) -> (String, String, String) {
    let (status, repo) = send_json(
        router,
        admin(
            Method::POST,
            "/api/v1/repositories",
            Some(json!({"name": "configs", "url": repo_url, "default_branch": "main"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let repo_id = repo["id"].as_str().unwrap().to_string();

    let (status, policy) = send_json(
        router,
        admin(
            Method::POST,
            "/api/v1/policies",
            Some(json!({
                "name": "web-base",
                "repository_id": repo_id,
                "config_path": "nodes/web-01.ps1",
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let policy_id = policy["id"].as_str().unwrap().to_string();

    let (status, node) = send_json(
        router,
        admin(
            Method::POST,
            "/api/v1/nodes",
            Some(json!({"name": "web-01"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let node_id = node["node"]["id"].as_str().unwrap().to_string();
    let token = node["token"].as_str().unwrap().to_string();

    let (status, _) = send_json(
        router,
        admin(
            Method::PUT,
            &format!("/api/v1/nodes/{node_id}/policy"),
            Some(json!({"policy_id": policy_id})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    ("web-01".to_string(), token, policy_id)
}

#[tokio::test]
async fn health_is_open() {
    let h = harness();
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send_json(&h.router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn admin_routes_require_the_key() {
    let h = harness();

    let request = Request::builder()
        .uri("/api/v1/nodes")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send_json(&h.router, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let request = Request::builder()
        .uri("/api/v1/nodes")
        .header("x-admin-api-key", "wrong-key")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send_json(&h.router, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn node_registration_returns_token_once() {
    let h = harness();
    let (status, body) = send_json(
        &h.router,
        admin(
            Method::POST,
            "/api/v1/nodes",
            Some(json!({"name": "web-01"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body["token"].as_str().unwrap().len() >= 43);
    assert_eq!(body["node"]["last_status"], "registered");

    // The stored record never exposes the token or its hash.
    let (status, list) = send_json(&h.router, admin(Method::GET, "/api/v1/nodes", None)).await;
    assert_eq!(status, StatusCode::OK);
    let rendered = list.to_string();
    assert!(!rendered.contains("token"));
}

#[tokio::test]
async fn duplicate_node_name_conflicts() {
    let h = harness();
    let req = || {
        admin(
            Method::POST,
            "/api/v1/nodes",
            Some(json!({"name": "web-01"})),
        )
    };
    let (status, _) = send_json(&h.router, req()).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, body) = send_json(&h.router, req()).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");
}

#[tokio::test]
async fn policy_with_traversal_path_is_rejected() {
    let h = harness();
    let (status, repo) = send_json(
        &h.router,
        admin(
            Method::POST,
            "/api/v1/repositories",
            Some(json!({
                "name": "configs",
                "url": "https://example.com/configs.git",
                "default_branch": "main",
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send_json(
        &h.router,
        admin(
            Method::POST,
            "/api/v1/policies",
            Some(json!({
                "name": "evil",
                "repository_id": repo["id"],
                "config_path": "../../etc/passwd",
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn agent_auth_distinguishes_unknown_node_from_bad_token() {
    let h = harness();
    let upstream = Upstream::new(&[("nodes/web-01.ps1", "configuration Web01 {}")]);
    let (name, _token, _) = provision(&h.router, &upstream.url()).await;

    let request = agent(
        Method::GET,
        "/api/v1/agents/desired-state",
        "ghost",
        "whatever",
        None,
    );
    let (status, _) = send_json(&h.router, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let request = agent(
        Method::GET,
        "/api/v1/agents/desired-state",
        &name,
        "wrong-token",
        None,
    );
    let (status, _) = send_json(&h.router, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn desired_state_reflects_assignment_lifecycle() {
    let h = harness();
    let upstream = Upstream::new(&[("nodes/web-01.ps1", "configuration Web01 {}")]);
    let (name, token, policy_id) = provision(&h.router, &upstream.url()).await;

    let (status, body) = send_json(
        &h.router,
        agent(Method::GET, "/api/v1/agents/desired-state", &name, &token, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["assigned"], true);
    assert_eq!(body["policy"]["config_path"], "nodes/web-01.ps1");
    assert_eq!(body["policy"]["branch"], "main");
    assert_eq!(body["package_url"], "/api/v1/agents/package");

    // Deleting the policy leaves the node with a dangling reference, which
    // resolves to "nothing assigned".
    let (status, _) = send_json(
        &h.router,
        admin(Method::DELETE, &format!("/api/v1/policies/{policy_id}"), None),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send_json(
        &h.router,
        agent(Method::GET, "/api/v1/agents/desired-state", &name, &token, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["assigned"], false);
    assert!(body.get("policy").is_none());
    assert!(body.get("package_url").is_none());
}

#[tokio::test]
async fn package_download_delivers_archive_with_provenance() {
    let h = harness();
    let upstream = Upstream::new(&[
        ("nodes/web-01.ps1", "configuration Web01 {}"),
        ("modules/helper.psm1", "module"),
    ]);
    let (name, token, _) = provision(&h.router, &upstream.url()).await;

    let request = agent(Method::GET, "/api/v1/agents/package", &name, &token, None);
    let response = h.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let headers = response.headers().clone();
    assert_eq!(headers[header::CONTENT_TYPE], "application/gzip");
    let commit = headers["x-commit-hash"].to_str().unwrap().to_string();
    let digest = headers["x-package-digest"].to_str().unwrap();
    assert_eq!(digest.len(), 16);
    let disposition = headers[header::CONTENT_DISPOSITION].to_str().unwrap();
    assert!(disposition.contains(&format!("config-web-01-{}", &commit[..8])));

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let decoder = flate2::read::GzDecoder::new(bytes.as_ref());
    let mut archive = tar::Archive::new(decoder);
    let mut names = Vec::new();
    let mut manifest = String::new();
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        let name = entry.path().unwrap().to_string_lossy().into_owned();
        if name == "_drover_meta.txt" {
            entry.read_to_string(&mut manifest).unwrap();
        }
        names.push(name);
    }
    assert!(names.contains(&"nodes/web-01.ps1".to_string()));
    assert!(names.contains(&"modules/helper.psm1".to_string()));
    assert!(manifest.contains(&format!("commit={commit}")));
    assert!(manifest.contains("config_path=nodes/web-01.ps1"));
}

#[tokio::test]
async fn package_without_assignment_is_unbuildable() {
    let h = harness();
    let (status, node) = send_json(
        &h.router,
        admin(
            Method::POST,
            "/api/v1/nodes",
            Some(json!({"name": "web-01"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let token = node["token"].as_str().unwrap();

    let request = agent(Method::GET, "/api/v1/agents/package", "web-01", token, None);
    let (status, body) = send_json(&h.router, request).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "NO_POLICY_ASSIGNED");
}

#[tokio::test]
async fn run_report_updates_node_and_history() {
    let h = harness();
    let upstream = Upstream::new(&[("nodes/web-01.ps1", "configuration Web01 {}")]);
    let (name, token, policy_id) = provision(&h.router, &upstream.url()).await;

    let (status, body) = send_json(
        &h.router,
        agent(
            Method::POST,
            "/api/v1/agents/runs",
            &name,
            &token,
            Some(json!({
                "policy_id": policy_id,
                "status": "failed",
                "git_commit": "abc123",
                "summary": "resource Xyz failed to converge",
                // Clients cannot set the finish time; it is stamped at receipt.
                "finished_at": "1999-01-01T00:00:00Z",
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    let run_id = body["run_id"].as_str().unwrap().to_string();

    let (status, run) = send_json(
        &h.router,
        admin(Method::GET, &format!("/api/v1/runs/{run_id}"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(run["status"], "failed");
    assert_eq!(run["git_commit"], "abc123");
    let finished = run["finished_at"].as_str().unwrap();
    assert!(!finished.starts_with("1999"));

    let (status, nodes) = send_json(&h.router, admin(Method::GET, "/api/v1/nodes", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(nodes["nodes"][0]["last_status"], "failed");

    let (status, runs) = send_json(&h.router, admin(Method::GET, "/api/v1/runs", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(runs["runs"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn run_report_lands_without_a_current_assignment() {
    let h = harness();

    let (status, repo) = send_json(
        &h.router,
        admin(
            Method::POST,
            "/api/v1/repositories",
            Some(json!({
                "name": "configs",
                "url": "https://example.com/configs.git",
                "default_branch": "main",
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, policy) = send_json(
        &h.router,
        admin(
            Method::POST,
            "/api/v1/policies",
            Some(json!({
                "name": "web-base",
                "repository_id": repo["id"],
                "config_path": "nodes/web-01.ps1",
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, node) = send_json(
        &h.router,
        admin(
            Method::POST,
            "/api/v1/nodes",
            Some(json!({"name": "web-01"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let token = node["token"].as_str().unwrap();

    // No assignment was made; the report still lands because the policy it
    // names exists.
    let (status, body) = send_json(
        &h.router,
        agent(
            Method::POST,
            "/api/v1/agents/runs",
            "web-01",
            token,
            Some(json!({"policy_id": policy["id"], "status": "success"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn run_report_naming_an_unknown_policy_is_rejected() {
    let h = harness();
    let upstream = Upstream::new(&[("nodes/web-01.ps1", "x")]);
    let (name, token, _) = provision(&h.router, &upstream.url()).await;

    let (status, body) = send_json(
        &h.router,
        agent(
            Method::POST,
            "/api/v1/agents/runs",
            &name,
            &token,
            Some(json!({
                "policy_id": "00000000-0000-0000-0000-000000000000",
                "status": "success",
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(
        body["message"]
            .as_str()
            .unwrap()
            .contains("00000000-0000-0000-0000-000000000000")
    );
}

#[tokio::test]
async fn heartbeat_touches_last_seen() {
    let h = harness();
    let upstream = Upstream::new(&[("nodes/web-01.ps1", "x")]);
    let (name, token, _) = provision(&h.router, &upstream.url()).await;

    let (status, body) = send_json(
        &h.router,
        agent(Method::POST, "/api/v1/agents/heartbeat", &name, &token, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["node_name"], "web-01");

    let (status, nodes) = send_json(&h.router, admin(Method::GET, "/api/v1/nodes", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(nodes["nodes"][0]["last_seen_at"].is_string());
}

#[tokio::test]
async fn regenerated_token_invalidates_the_old_one() {
    let h = harness();
    let upstream = Upstream::new(&[("nodes/web-01.ps1", "x")]);
    let (name, old_token, _) = provision(&h.router, &upstream.url()).await;

    let (status, nodes) = send_json(&h.router, admin(Method::GET, "/api/v1/nodes", None)).await;
    assert_eq!(status, StatusCode::OK);
    let node_id = nodes["nodes"][0]["id"].as_str().unwrap().to_string();

    let (status, body) = send_json(
        &h.router,
        admin(Method::POST, &format!("/api/v1/nodes/{node_id}/token"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let new_token = body["token"].as_str().unwrap().to_string();
    assert_ne!(new_token, old_token);

    let (status, _) = send_json(
        &h.router,
        agent(Method::POST, "/api/v1/agents/heartbeat", &name, &old_token, None),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send_json(
        &h.router,
        agent(Method::POST, "/api/v1/agents/heartbeat", &name, &new_token, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn repository_sync_and_status_round_trip() {
    let h = harness();
    let upstream = Upstream::new(&[("nodes/web-01.ps1", "x")]);

    let (status, repo) = send_json(
        &h.router,
        admin(
            Method::POST,
            "/api/v1/repositories",
            Some(json!({"name": "configs", "url": upstream.url(), "default_branch": "main"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let repo_id = repo["id"].as_str().unwrap().to_string();

    let (status, body) = send_json(
        &h.router,
        admin(
            Method::GET,
            &format!("/api/v1/repositories/{repo_id}/status"),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["synchronized"], false);

    let (status, body) = send_json(
        &h.router,
        admin(
            Method::POST,
            &format!("/api/v1/repositories/{repo_id}/sync"),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changed"], true);
    let commit = body["commit"].as_str().unwrap().to_string();

    let (status, body) = send_json(
        &h.router,
        admin(
            Method::GET,
            &format!("/api/v1/repositories/{repo_id}/status"),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["synchronized"], true);
    assert_eq!(body["commit"], commit);
    assert_eq!(body["branch"], "main");

    // Deleting the repository also removes the checkout.
    let (status, _) = send_json(
        &h.router,
        admin(Method::DELETE, &format!("/api/v1/repositories/{repo_id}"), None),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send_json(
        &h.router,
        admin(
            Method::GET,
            &format!("/api/v1/repositories/{repo_id}/status"),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unsyncable_repository_is_unprocessable() {
    let h = harness();
    let (status, repo) = send_json(
        &h.router,
        admin(
            Method::POST,
            "/api/v1/repositories",
            Some(json!({
                "name": "broken",
                "url": "file:///nonexistent/invalid-repo",
                "default_branch": "main",
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let repo_id = repo["id"].as_str().unwrap().to_string();

    let (status, body) = send_json(
        &h.router,
        admin(
            Method::POST,
            &format!("/api/v1/repositories/{repo_id}/sync"),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "GIT_SYNC_FAILED");
}
