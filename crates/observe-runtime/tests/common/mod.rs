//! Shared helpers for observe-runtime integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

/// Collector endpoint nothing listens on.
pub const UNREACHABLE_ENDPOINT: &str = "http://127.0.0.1:9";

/// Writes `observe.yaml` into `dir` and returns its path.
pub fn write_config(dir: &Path, yaml: &str) -> PathBuf {
    let path = dir.join("observe.yaml");
    std::fs::write(&path, yaml).expect("failed to write config file");
    path
}

/// A YAML configuration exporting over HTTP to an unreachable collector.
pub fn config_yaml(sampling: &str, diagnostics: &str) -> String {
    format!(
        r#"service:
  name: checkout
  version: "1.0.0"
exporters:
  otlp:
    protocol: http
    endpoint: "{UNREACHABLE_ENDPOINT}"
    timeout: 500
    retry:
      enabled: false
sampling:
{sampling}
diagnostics:
{diagnostics}
"#
    )
}
