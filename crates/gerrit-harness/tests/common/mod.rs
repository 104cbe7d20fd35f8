//! Shared fixtures: local stand-ins for the service's listeners and
//! recording fakes for the protocol clients.

#![allow(dead_code)]

use async_trait::async_trait;
use command_runner::{CommandOutput, ExitStatus};
use container_runtime::fake::FakeRuntime;
use gerrit_harness::error::{HttpError, SshError};
use gerrit_harness::setup::{AccountApi, HttpConnector, SshConnector, SshSession};
use gerrit_harness::{
    Config, Endpoint, HTTP_PORT, Instance, KeyMaterial, Orchestrator, RunContext, SSH_PORT,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Install a test subscriber once; honours `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Is `program` missing? Logs the skip so a green run shows what did not run
pub fn missing(program: &str) -> bool {
    let missing = command_runner::find_in_path(program).is_none();
    if missing {
        eprintln!("Skipping test: {} not found in PATH", program);
    }
    missing
}

/// A TCP port that accepts connections and does nothing with them
pub struct OpenPort {
    pub port: u16,
    task: tokio::task::JoinHandle<()>,
}

impl OpenPort {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                drop(stream);
            }
        });
        Self { port, task }
    }
}

impl Drop for OpenPort {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// One request the fake service received
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub path: String,
    /// Lower-cased header names
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

pub const XSRF_TOKEN: &str = "xsrf-token-1";
pub const GENERATED_PASSWORD: &str = "generated-secret";

#[derive(Default)]
struct ServerState {
    requests: Vec<Request>,
    failing: Option<(String, u16)>,
    root_status: u16,
}

/// Minimal HTTP server answering the handful of REST calls setup makes
pub struct FakeGerrit {
    pub port: u16,
    state: Arc<Mutex<ServerState>>,
    task: tokio::task::JoinHandle<()>,
}

impl FakeGerrit {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(Mutex::new(ServerState {
            root_status: 200,
            ..Default::default()
        }));

        let shared = Arc::clone(&state);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = Arc::clone(&shared);
                tokio::spawn(async move {
                    let _ = handle(stream, state).await;
                });
            }
        });

        Self { port, state, task }
    }

    /// Answer `path` with `status` from now on
    pub fn fail(&self, path: &str, status: u16) {
        self.state.lock().unwrap().failing = Some((path.to_string(), status));
    }

    /// Status `GET /` answers with
    pub fn set_root_status(&self, status: u16) {
        self.state.lock().unwrap().root_status = status;
    }

    /// Requests received so far, excluding readiness probes of `/`
    pub fn requests(&self) -> Vec<Request> {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|r| r.path != "/")
            .cloned()
            .collect()
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new("localhost", self.port)
    }
}

impl Drop for FakeGerrit {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn handle(mut stream: TcpStream, state: Arc<Mutex<ServerState>>) -> std::io::Result<()> {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&data[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let path = request_line.next().unwrap_or_default().to_string();
    let headers: BTreeMap<String, String> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    let length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    while data.len() < header_end + length {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
    }
    let body = String::from_utf8_lossy(&data[header_end..]).to_string();

    let request = Request {
        method,
        path,
        headers,
        body,
    };
    let (status, extra_headers, body) = respond(&request, &state);
    state.lock().unwrap().requests.push(request);

    let mut response = format!("HTTP/1.1 {} X\r\nconnection: close\r\n", status);
    for header in extra_headers {
        response.push_str(&header);
        response.push_str("\r\n");
    }
    response.push_str(&format!("content-length: {}\r\n\r\n{}", body.len(), body));
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

fn respond(request: &Request, state: &Mutex<ServerState>) -> (u16, Vec<String>, String) {
    let state = state.lock().unwrap();
    if let Some((path, status)) = &state.failing {
        if *path == request.path {
            return (*status, Vec::new(), "injected failure".into());
        }
    }

    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/") => (state.root_status, Vec::new(), "ok".into()),
        ("GET", "/login/") => (
            200,
            vec![format!("set-cookie: XSRF_TOKEN={}; Path=/", XSRF_TOKEN)],
            String::new(),
        ),
        ("POST", "/a/accounts/self/sshkeys") => (201, Vec::new(), ")]}'\n{\"seq\":1}".into()),
        ("PUT", "/a/accounts/self/password.http") => {
            let password = if request.body.contains("\"generate\":true") {
                GENERATED_PASSWORD.to_string()
            } else {
                let value: serde_json::Value =
                    serde_json::from_str(&request.body).unwrap_or_default();
                value["http_password"].as_str().unwrap_or_default().to_string()
            };
            (200, Vec::new(), format!(")]}}'\n\"{}\"", password))
        }
        _ => (404, Vec::new(), "not found".into()),
    }
}

/// Shared, ordered log of what the fakes were asked to do
#[derive(Debug, Clone, Default)]
pub struct Events(Arc<Mutex<Vec<String>>>);

impl Events {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Account API that records calls and optionally fails one of them
#[derive(Debug, Clone, Default)]
pub struct FakeAccounts {
    pub events: Events,
    pub fail_on: Option<&'static str>,
}

pub struct FakeAccountApi {
    events: Events,
    fail_on: Option<&'static str>,
    username: String,
}

impl FakeAccountApi {
    fn call(&self, name: &str) -> Result<(), HttpError> {
        self.events.push(name);
        if self.fail_on == Some(name) {
            return Err(HttpError::UnexpectedStatus {
                method: "GET".into(),
                url: format!("http://localhost/{name}"),
                status: 500,
                expected: 200,
                body: "injected".into(),
            });
        }
        Ok(())
    }
}

impl HttpConnector for FakeAccounts {
    type Api = FakeAccountApi;

    fn connect(&self, _endpoint: &Endpoint, username: &str) -> Result<FakeAccountApi, HttpError> {
        if self.fail_on == Some("connect") {
            return Err(HttpError::InvalidUrl("injected".into()));
        }
        Ok(FakeAccountApi {
            events: self.events.clone(),
            fail_on: self.fail_on,
            username: username.to_string(),
        })
    }
}

#[async_trait]
impl AccountApi for FakeAccountApi {
    async fn create_account(&mut self) -> Result<String, HttpError> {
        self.call("create_account")?;
        Ok(self.username.clone())
    }

    async fn login(&mut self) -> Result<(), HttpError> {
        self.call("login")
    }

    async fn insert_public_key(&mut self, _public_key: &str) -> Result<(), HttpError> {
        self.call("insert_public_key")
    }

    async fn set_password(&mut self, _password: &str) -> Result<(), HttpError> {
        self.call("set_password")
    }

    async fn generate_password(&mut self) -> Result<String, HttpError> {
        self.call("generate_password")?;
        Ok(GENERATED_PASSWORD.to_string())
    }
}

/// SSH connector whose sessions answer `gerrit version` without a network
#[derive(Debug, Clone, Default)]
pub struct FakeSsh {
    pub events: Events,
}

pub struct FakeSshSession {
    events: Events,
}

#[async_trait]
impl SshConnector for FakeSsh {
    type Session = FakeSshSession;

    async fn connect(
        &self,
        endpoint: &Endpoint,
        username: &str,
        key: &KeyMaterial,
    ) -> Result<FakeSshSession, SshError> {
        assert!(key.private_key_path.exists(), "key used after removal");
        self.events
            .push(format!("ssh_connect {}@{}", username, endpoint));
        Ok(FakeSshSession {
            events: self.events.clone(),
        })
    }
}

#[async_trait]
impl SshSession for FakeSshSession {
    async fn run(&self, command: &str) -> Result<CommandOutput, SshError> {
        self.events.push(format!("ssh_run {}", command));
        Ok(CommandOutput {
            status: ExitStatus {
                code: Some(0),
                signal: None,
            },
            stdout: "gerrit version 2.14.3\n".into(),
            stderr: String::new(),
        })
    }

    async fn close(self) -> Result<(), SshError> {
        self.events.push("ssh_close");
        Ok(())
    }
}

/// Listeners standing in for a running container's SSH and HTTP ports
pub struct Listeners {
    pub ssh: OpenPort,
    pub http: FakeGerrit,
}

impl Listeners {
    pub async fn start() -> Self {
        Self {
            ssh: OpenPort::start().await,
            http: FakeGerrit::start().await,
        }
    }

    /// A fake runtime that "publishes" the container on these listeners
    pub fn runtime(&self) -> FakeRuntime {
        FakeRuntime::new()
            .publish_as(HTTP_PORT, self.http.port)
            .publish_as(SSH_PORT, self.ssh.port)
    }
}

/// Config with a short start timeout suitable for local fakes
pub fn quick_config() -> Config {
    Config::default()
        .with_image("example/gerrit:test")
        .with_start_timeout(Duration::from_secs(10))
}

/// Start an instance on a fake runtime backed by `listeners`
pub async fn ready_instance(listeners: &Listeners) -> (Orchestrator<FakeRuntime>, Instance) {
    let orchestrator = Orchestrator::new(listeners.runtime());
    let instance = orchestrator
        .start(&quick_config(), &RunContext::new())
        .await
        .expect("instance should become ready");
    (orchestrator, instance)
}
