#![allow(dead_code)]

use serde_json::Value;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use uuid::Uuid;

pub type TestResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// A `serve` process on a free port with its own data directory.
pub struct ControlPlaneHarness {
    child: Child,
    pub api_port: u16,
    pub api_base: String,
    data_dir: LocalTempDir,
    client: reqwest::Client,
}

impl ControlPlaneHarness {
    pub async fn spawn() -> TestResult<Self> {
        let api_port = find_free_port()?;
        let data_dir = LocalTempDir::new("ingest-control-e2e")?;
        let log_file = std::fs::File::create(data_dir.path().join("serve.log"))?;
        let log_file_err = log_file.try_clone()?;

        let child = Command::new(env!("CARGO_BIN_EXE_ingest-control"))
            .arg("serve")
            .arg("--api-host")
            .arg("127.0.0.1")
            .arg("--api-port")
            .arg(api_port.to_string())
            .env("INGEST_CONTROL_DATA_DIR", data_dir.path())
            .env("RUST_LOG", "debug")
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(log_file_err))
            .spawn()?;

        let mut harness = Self {
            child,
            api_port,
            api_base: format!("http://127.0.0.1:{}", api_port),
            data_dir,
            client: reqwest::Client::new(),
        };
        harness.wait_until_ready().await?;
        Ok(harness)
    }

    pub fn data_dir(&self) -> &Path {
        self.data_dir.path()
    }

    pub fn server_log(&self) -> String {
        std::fs::read_to_string(self.data_dir.path().join("serve.log")).unwrap_or_default()
    }

    async fn wait_until_ready(&mut self) -> TestResult<()> {
        for _ in 0..80 {
            if let Some(status) = self.child.try_wait()? {
                return Err(format!(
                    "control plane exited early with status {}:\n{}",
                    status,
                    self.server_log()
                )
                .into());
            }
            let res = self
                .client
                .get(format!("{}/api/scheduling/enabled", self.api_base))
                .timeout(Duration::from_millis(700))
                .send()
                .await;
            if let Ok(resp) = res
                && resp.status().is_success()
            {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
        Err("Timed out waiting for control plane readiness".into())
    }

    /// Sends a request and returns the status code with the parsed body.
    pub async fn request_json(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> TestResult<(u16, Value)> {
        let mut req = self
            .client
            .request(method, format!("{}{}", self.api_base, path))
            .timeout(Duration::from_secs(10));
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req.send().await?;
        let status = resp.status().as_u16();
        let body = resp.json::<Value>().await.unwrap_or(Value::Null);
        Ok((status, body))
    }
}

impl Drop for ControlPlaneHarness {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn find_free_port() -> TestResult<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

pub fn ensure_success(value: &Value, action: &str) -> TestResult<()> {
    if value.get("success").and_then(Value::as_bool) == Some(true) {
        return Ok(());
    }
    Err(format!("{} failed: {}", action, value).into())
}

struct LocalTempDir {
    path: PathBuf,
}

impl LocalTempDir {
    fn new(prefix: &str) -> TestResult<Self> {
        let path = std::env::temp_dir().join(format!("{}-{}", prefix, Uuid::new_v4().simple()));
        std::fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LocalTempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}
