//! Shared utilities for the workspace hot-reload tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Rewrites the configuration file in place.
pub fn write_config(path: &Path, yaml: &str) {
    std::fs::write(path, yaml).expect("failed to write config file");
}

/// Creates `observe.yaml` in `dir`.
pub fn create_config(dir: &Path, yaml: &str) -> PathBuf {
    let path = dir.join("observe.yaml");
    write_config(&path, yaml);
    path
}

/// Configuration with diagnostics on an ephemeral port.
pub fn config_yaml(sampling: &str, token: &str) -> String {
    format!(
        r#"service:
  name: checkout
exporters:
  otlp:
    protocol: http
    endpoint: "http://127.0.0.1:9"
    timeout: 500
    retry:
      enabled: false
sampling:
{sampling}
diagnostics:
  http_addr: "127.0.0.1:0"
  auth_token: "{token}"
"#
    )
}

/// Polls `condition` until it holds or `timeout` passes.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> Result<(), String>
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    Err(format!("condition not met within {timeout:?}"))
}

/// Whether anything accepts connections on `addr`.
pub async fn is_listening(addr: SocketAddr) -> bool {
    tokio::net::TcpStream::connect(addr).await.is_ok()
}

/// Fetches the diagnostics status, returning the HTTP status and JSON body.
pub async fn status(addr: SocketAddr, token: Option<&str>) -> (u16, serde_json::Value) {
    let mut request = reqwest::Client::new().get(format!("http://{addr}/observe/status"));
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }
    let response = request.send().await.expect("diagnostics request failed");
    let code = response.status().as_u16();
    let body = response.json().await.unwrap_or(serde_json::Value::Null);
    (code, body)
}
