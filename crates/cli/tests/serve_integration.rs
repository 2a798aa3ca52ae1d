//! Integration tests for the `bugflow serve` HTTP API.
//!
//! Each test starts the server as a child process on a unique port with an
//! in-memory store, makes raw HTTP/1.1 requests, and verifies the responses.
//! Tests that need issue creation point the tracker at a fake GitHub API
//! served from a thread in the test process.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tempfile::TempDir;

use bugflow_storage::{
    now_unix_ms, Classification, ClassificationRecord, NewReport, ReportStore, SqliteReportStore,
};

/// Atomic port counter to avoid port conflicts between parallel tests.
/// Base port is derived from process ID so separate test binaries don't
/// collide on the same port range.
static NEXT_PORT: AtomicU16 = AtomicU16::new(0);
static PORT_INIT: std::sync::Once = std::sync::Once::new();

fn next_port() -> u16 {
    PORT_INIT.call_once(|| {
        let base = 20000 + (std::process::id() as u16 % 20000);
        NEXT_PORT.store(base, Ordering::SeqCst);
    });
    NEXT_PORT.fetch_add(1, Ordering::SeqCst)
}

const OPERATOR_KEY: &str = "op-key-123";
const WEBHOOK_SECRET: &str = "whsec-456";

/// A running `bugflow serve` child, killed on drop.
struct Server {
    child: Child,
    port: u16,
    _dir: TempDir,
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Start the server with the given config file body and extra environment.
fn start_server(config_toml: &str, env: &[(&str, &str)]) -> Server {
    let dir = TempDir::new().expect("temp dir");
    launch(dir, config_toml, env, &["--memory"])
}

/// Start the server in `dir`, using whatever store the config names.
fn launch(dir: TempDir, config_toml: &str, env: &[(&str, &str)], extra_args: &[&str]) -> Server {
    std::fs::write(dir.path().join("bugflow.toml"), config_toml).expect("write config");
    let port = next_port();

    let mut cmd = Command::new(env!("CARGO_BIN_EXE_bugflow"));
    cmd.current_dir(dir.path());
    cmd.args(["serve", "--port", &port.to_string()]);
    cmd.args(extra_args);
    for var in [
        "GITHUB_TOKEN",
        "GITHUB_REPO",
        "ANTHROPIC_API_KEY",
        "BUGFLOW_API_KEY",
        "BUGFLOW_WEBHOOK_SECRET",
        "BUGFLOW_RATE_LIMIT",
    ] {
        cmd.env_remove(var);
    }
    cmd.env("RUST_LOG", "warn");
    for (k, v) in env {
        cmd.env(k, v);
    }
    cmd.stdout(Stdio::null());
    cmd.stderr(Stdio::null());

    let child = cmd.spawn().expect("failed to start bugflow serve");
    // Wait for server to be ready by polling the port
    for _ in 0..50 {
        if TcpStream::connect(format!("127.0.0.1:{}", port)).is_ok() {
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    Server {
        child,
        port,
        _dir: dir,
    }
}

fn secured_server(config_toml: &str) -> Server {
    start_server(
        config_toml,
        &[
            ("BUGFLOW_API_KEY", OPERATOR_KEY),
            ("BUGFLOW_WEBHOOK_SECRET", WEBHOOK_SECRET),
        ],
    )
}

// ── HTTP helpers ─────────────────────────────────────────────────────────────

/// Make an HTTP request and return (status, body).
fn http(
    port: u16,
    method: &str,
    path: &str,
    headers: &[(&str, &str)],
    body: Option<&str>,
) -> (u16, String) {
    let mut stream = TcpStream::connect(format!("127.0.0.1:{}", port)).expect("failed to connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();

    let mut request = format!(
        "{} {} HTTP/1.1\r\nHost: localhost:{}\r\nConnection: close\r\n",
        method, path, port
    );
    for (name, value) in headers {
        request.push_str(&format!("{}: {}\r\n", name, value));
    }
    match body {
        Some(body) => request.push_str(&format!(
            "Content-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        )),
        None => request.push_str("\r\n"),
    }
    stream.write_all(request.as_bytes()).expect("failed to write");

    let mut response = String::new();
    let _ = stream.read_to_string(&mut response);
    parse_http_response(&response)
}

fn get(port: u16, path: &str) -> (u16, String) {
    http(port, "GET", path, &[], None)
}

fn post(port: u16, path: &str, body: &str) -> (u16, String) {
    http(port, "POST", path, &[], Some(body))
}

fn operator_get(port: u16, path: &str) -> (u16, String) {
    let auth = format!("Bearer {}", OPERATOR_KEY);
    http(port, "GET", path, &[("Authorization", &auth)], None)
}

fn operator_post(port: u16, path: &str, body: &str) -> (u16, String) {
    http(port, "POST", path, &[("X-API-Key", OPERATOR_KEY)], Some(body))
}

fn webhook(port: u16, event: &str, body: &str, secret: Option<&str>) -> (u16, String) {
    let signature = secret.map(|s| {
        let mut mac = Hmac::<Sha256>::new_from_slice(s.as_bytes()).unwrap();
        mac.update(body.as_bytes());
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    });
    let mut headers = vec![("X-GitHub-Event", event)];
    if let Some(sig) = &signature {
        headers.push(("X-Hub-Signature-256", sig.as_str()));
    }
    http(port, "POST", "/api/webhooks/github", &headers, Some(body))
}

/// Parse an HTTP response into (status_code, body).
fn parse_http_response(response: &str) -> (u16, String) {
    let (head, body) = response.split_once("\r\n\r\n").unwrap_or((response, ""));
    let status = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(0);
    let chunked = head
        .lines()
        .any(|l| l.to_ascii_lowercase() == "transfer-encoding: chunked");
    let body = if chunked {
        decode_chunked(body)
    } else {
        body.to_string()
    };
    (status, body)
}

/// Decode chunked transfer encoding.
fn decode_chunked(mut data: &str) -> String {
    let mut out = String::new();
    while let Some((size_line, rest)) = data.split_once("\r\n") {
        let size = match usize::from_str_radix(size_line.trim(), 16) {
            Ok(0) | Err(_) => break,
            Ok(s) => s,
        };
        if size > rest.len() {
            out.push_str(rest);
            break;
        }
        out.push_str(&rest[..size]);
        data = rest[size..].strip_prefix("\r\n").unwrap_or(&rest[size..]);
    }
    out
}

fn json(body: &str) -> serde_json::Value {
    serde_json::from_str(body).unwrap_or_else(|e| panic!("invalid JSON {:?}: {}", body, e))
}

/// Submit a report and return its id.
fn submit(port: u16, notes: &str) -> String {
    let body = serde_json::json!({ "notes": notes, "severity": "high" }).to_string();
    let (status, body) = post(port, "/api/bugs", &body);
    assert_eq!(status, 201, "submit failed: {}", body);
    let receipt = json(&body);
    assert_eq!(receipt["status"], "submitted");
    receipt["id"].as_str().unwrap().to_string()
}

/// Poll the public status endpoint until the report reaches `want`.
fn wait_for_status(port: u16, id: &str, want: &str) -> serde_json::Value {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let (status, body) = get(port, &format!("/api/bugs/{}", id));
        assert_eq!(status, 200, "status read failed: {}", body);
        let view = json(&body);
        if view["status"] == want {
            return view;
        }
        assert!(
            Instant::now() < deadline,
            "report {} never reached {}; last view {}",
            id,
            want,
            view
        );
        std::thread::sleep(Duration::from_millis(50));
    }
}

// ── Fake GitHub API ──────────────────────────────────────────────────────────

/// Minimal GitHub issues endpoint: every POST creates issue N+1.
struct FakeGithub {
    port: u16,
    created: Arc<AtomicU64>,
}

impl FakeGithub {
    fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake github");
        let port = listener.local_addr().unwrap().port();
        let created = Arc::new(AtomicU64::new(0));
        let counter = created.clone();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                let _ = serve_issue(stream, n);
            }
        });
        FakeGithub { port, created }
    }

    fn config(&self) -> String {
        format!(
            "[tracker]\nrepo = \"acme/shop\"\ntoken = \"ghp_test\"\napi_base = \"http://127.0.0.1:{}\"\n",
            self.port
        )
    }

    fn created(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }
}

fn serve_issue(stream: TcpStream, n: u64) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 || line == "\r\n" {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body)?;

    let response_body = format!(
        r#"{{"html_url":"https://github.com/acme/shop/issues/{n}","number":{n}}}"#
    );
    let mut stream = stream;
    write!(
        stream,
        "HTTP/1.1 201 Created\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        response_body.len(),
        response_body
    )?;
    stream.flush()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[test]
fn health_is_public() {
    let server = secured_server("");
    let (status, body) = get(server.port, "/health");
    assert_eq!(status, 200);
    let parsed = json(&body);
    assert_eq!(parsed["status"], "ok");
    assert!(parsed["version"].is_string());
}

#[test]
fn unknown_route_is_json_404() {
    let server = start_server("", &[]);
    let (status, body) = get(server.port, "/nope");
    assert_eq!(status, 404);
    assert_eq!(json(&body)["error"], "not found");
}

#[test]
fn submission_validation() {
    let server = start_server("", &[]);
    let (status, body) = post(server.port, "/api/bugs", r#"{"notes":"   "}"#);
    assert_eq!(status, 400);
    assert!(json(&body)["error"]
        .as_str()
        .unwrap()
        .contains("notes must not be empty"));

    let (status, _) = post(server.port, "/api/bugs", r#"{"notes":"x","severity":"dire"}"#);
    assert_eq!(status, 400);

    let (status, body) = get(server.port, "/api/bugs/does-not-exist");
    assert_eq!(status, 404);
    assert!(json(&body)["error"].as_str().unwrap().contains("not found"));
}

#[test]
fn report_without_tracker_fails_and_can_be_retried() {
    let server = secured_server("");
    let id = submit(server.port, "Checkout button does nothing");

    let view = wait_for_status(server.port, &id, "failed");
    assert!(view["github_issue_url"].is_null());
    assert!(view["failure_reason"]
        .as_str()
        .unwrap()
        .contains("not configured"));

    // Operator routes need the key.
    let path = format!("/api/bugs/{}/retry", id);
    let (status, _) = post(server.port, &path, "{}");
    assert_eq!(status, 401);
    let (status, _) = http(
        server.port,
        "POST",
        &path,
        &[("X-API-Key", "wrong")],
        Some("{}"),
    );
    assert_eq!(status, 403);

    let (status, body) = operator_post(server.port, &path, "{}");
    assert_eq!(status, 200, "retry failed: {}", body);
    assert_eq!(json(&body)["status"], "failed");

    let (status, _) = get(server.port, "/api/bugs?status=failed");
    assert_eq!(status, 401);
    let (status, body) = operator_get(server.port, "/api/bugs?status=failed");
    assert_eq!(status, 200);
    let listed = json(&body);
    assert_eq!(listed["count"], 1);
    assert_eq!(listed["reports"][0]["id"], id.as_str());

    let (status, _) = operator_get(server.port, "/api/bugs?status=exploded");
    assert_eq!(status, 400);
}

#[test]
fn retry_of_sent_report_conflicts() {
    let github = FakeGithub::start();
    let server = secured_server(&github.config());
    let id = submit(server.port, "Cart total is wrong");
    wait_for_status(server.port, &id, "sent");

    let (status, body) = operator_post(server.port, &format!("/api/bugs/{}/retry", id), "{}");
    assert_eq!(status, 409, "{}", body);
    assert_eq!(github.created(), 1);
}

#[test]
fn full_lifecycle_through_webhooks_and_callback() {
    let github = FakeGithub::start();
    let server = secured_server(&github.config());
    let port = server.port;
    let id = submit(port, "Login page crashes after password reset");

    let view = wait_for_status(port, &id, "sent");
    let issue_url = view["github_issue_url"].as_str().unwrap();
    assert!(issue_url.starts_with("https://github.com/acme/shop/issues/"));
    assert_eq!(github.created(), 1, "exactly one issue per report");

    let branch = format!("fix/bug-{}", id);
    let pr_opened = serde_json::json!({
        "action": "opened",
        "pull_request": {
            "html_url": "https://github.com/acme/shop/pull/12",
            "merged": false,
            "head": {"ref": branch}
        }
    })
    .to_string();

    // Unsigned and mis-signed deliveries are rejected.
    let (status, _) = webhook(port, "pull_request", &pr_opened, None);
    assert_eq!(status, 401);
    let (status, _) = webhook(port, "pull_request", &pr_opened, Some("wrong-secret"));
    assert_eq!(status, 401);

    let (status, body) = webhook(port, "pull_request", &pr_opened, Some(WEBHOOK_SECRET));
    assert_eq!(status, 200, "{}", body);
    assert_eq!(json(&body)["outcome"], "applied");
    let view = wait_for_status(port, &id, "pr_created");
    assert_eq!(view["github_pr_url"], "https://github.com/acme/shop/pull/12");

    let deployed = serde_json::json!({
        "deployment_status": {
            "state": "success",
            "environment_url": "https://preview-12.shop.example"
        },
        "deployment": {"ref": branch}
    })
    .to_string();
    let (status, _) = webhook(port, "deployment_status", &deployed, Some(WEBHOOK_SECRET));
    assert_eq!(status, 200);
    let view = wait_for_status(port, &id, "preview_ready");
    assert_eq!(view["preview_url"], "https://preview-12.shop.example");

    // A late duplicate of an earlier stage is acknowledged and ignored.
    let (status, body) = webhook(port, "pull_request", &pr_opened, Some(WEBHOOK_SECRET));
    assert_eq!(status, 200);
    assert_eq!(json(&body)["outcome"], "ignored");

    // The automation callback is operator-only.
    let callback = serde_json::json!({ "report_id": id, "new_status": "shipped" }).to_string();
    let (status, _) = post(port, "/api/automation/callback", &callback);
    assert_eq!(status, 401);
    let (status, body) = operator_post(port, "/api/automation/callback", &callback);
    assert_eq!(status, 200, "{}", body);
    assert_eq!(json(&body)["outcome"], "applied");
    wait_for_status(port, &id, "shipped");

    let backwards = serde_json::json!({ "report_id": id, "new_status": "sent" }).to_string();
    let (status, body) = operator_post(port, "/api/automation/callback", &backwards);
    assert_eq!(status, 200);
    assert_eq!(json(&body)["outcome"], "ignored");

    let (_, body) = get(port, &format!("/api/bugs/{}", id));
    assert_eq!(json(&body)["status"], "shipped");
    assert_eq!(github.created(), 1);
}

#[test]
fn unsigned_webhook_requires_operator_key_without_secret() {
    let github = FakeGithub::start();
    let server = start_server(&github.config(), &[("BUGFLOW_API_KEY", OPERATOR_KEY)]);
    let port = server.port;
    let id = submit(port, "Coupon field ignores input");
    wait_for_status(port, &id, "sent");

    let merged = serde_json::json!({
        "action": "closed",
        "pull_request": {
            "html_url": "https://github.com/acme/shop/pull/31",
            "merged": true,
            "head": {"ref": format!("fix/bug-{}", id)}
        }
    })
    .to_string();

    let (status, _) = webhook(port, "pull_request", &merged, None);
    assert_eq!(status, 401);
    let (_, body) = get(port, &format!("/api/bugs/{}", id));
    assert_eq!(json(&body)["status"], "sent");

    let (status, body) = http(
        port,
        "POST",
        "/api/webhooks/github",
        &[("X-GitHub-Event", "pull_request"), ("X-API-Key", OPERATOR_KEY)],
        Some(&merged),
    );
    assert_eq!(status, 200, "{}", body);
    assert_eq!(json(&body)["outcome"], "applied");

    // The merge skipped `pr_created`; its PR URL is still recorded.
    let view = wait_for_status(port, &id, "shipped");
    assert_eq!(view["github_pr_url"], "https://github.com/acme/shop/pull/31");
}

#[test]
fn unrelated_webhook_events_are_ignored() {
    let server = secured_server("");
    let (status, body) = webhook(server.port, "ping", "{}", Some(WEBHOOK_SECRET));
    assert_eq!(status, 200);
    assert_eq!(json(&body)["outcome"], "pong");

    let push = r#"{"ref":"refs/heads/main"}"#;
    let (status, body) = webhook(server.port, "push", push, Some(WEBHOOK_SECRET));
    assert_eq!(status, 200);
    assert_eq!(json(&body)["outcome"], "ignored");
}

#[test]
fn callback_rejects_bad_payloads() {
    let server = start_server("", &[]);
    let port = server.port;
    let (status, _) = post(port, "/api/automation/callback", r#"{"report_id":"x"}"#);
    assert_eq!(status, 400);

    let bad_url = r#"{"report_id":"x","new_status":"pr_created","url":"javascript:alert(1)"}"#;
    let (status, body) = post(port, "/api/automation/callback", bad_url);
    assert_eq!(status, 400, "{}", body);

    let unknown = r#"{"report_id":"missing","new_status":"pr_created"}"#;
    let (status, _) = post(port, "/api/automation/callback", unknown);
    assert_eq!(status, 404);
}

#[test]
fn rate_limit_returns_429() {
    let server = start_server("", &[("BUGFLOW_RATE_LIMIT", "3")]);
    for _ in 0..3 {
        let (status, _) = get(server.port, "/health");
        assert_eq!(status, 200);
    }
    let (status, body) = get(server.port, "/health");
    assert_eq!(status, 429);
    let parsed = json(&body);
    assert_eq!(parsed["error"], "rate limit exceeded");
    assert!(parsed["retry_after"].as_u64().unwrap() <= 60);
}

/// Store a classified, escalated report whose dispatch claim was just taken
/// by a worker that will never finish it.
fn seed_abandoned_claim(db: &std::path::Path) -> String {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let store = SqliteReportStore::open(db).unwrap();
        let report = store
            .insert_report(NewReport::new("Worker died while filing this"))
            .await
            .unwrap();
        store
            .record_classification(
                &report.id,
                ClassificationRecord {
                    classification: Classification::Bug,
                    confidence: 0.9,
                    escalate: true,
                },
            )
            .await
            .unwrap();
        assert!(store
            .claim_dispatch(&report.id, "crashed-worker", now_unix_ms(), 0)
            .await
            .unwrap());
        report.id.as_str().to_string()
    })
}

#[test]
fn claim_abandoned_before_startup_is_retaken_after_lease() {
    let github = FakeGithub::start();
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("reports.db");
    let id = seed_abandoned_claim(&db);

    let config = format!(
        "{}claim_lease_secs = 1\n\n[storage]\npath = \"{}\"\n",
        github.config(),
        db.display()
    );
    let server = launch(dir, &config, &[], &[]);

    // The claim is fresh at startup, so the first sweep leaves it alone.
    let view = wait_for_status(server.port, &id, "sent");
    assert!(view["github_issue_url"]
        .as_str()
        .unwrap()
        .starts_with("https://github.com/acme/shop/issues/"));
    assert_eq!(github.created(), 1);
}
