//! Helper-process transport.
//!
//! Each request spawns the TLS-impersonating helper script with five
//! positional arguments: url, method, payload JSON (or `null`), headers JSON
//! and the proxy URL (or an empty string). The helper prints one JSON object
//! on stdout.

use async_trait::async_trait;
use core_logic::NetworkError;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{Transport, TransportRequest, TransportResponse};

const HELPER_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct HelperOutput {
    #[serde(default)]
    status_code: u16,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    json: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CommandTransport {
    interpreter: String,
    script: PathBuf,
}

impl CommandTransport {
    pub fn new(interpreter: impl Into<String>, script: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            script: script.into(),
        }
    }

    fn args(request: &TransportRequest) -> Vec<String> {
        let payload = request
            .payload
            .as_ref()
            .map(Value::to_string)
            .unwrap_or_else(|| "null".to_string());
        let headers = serde_json::to_string(&request.headers).unwrap_or_else(|_| "{}".to_string());
        vec![
            request.endpoint.clone(),
            request.method.to_string(),
            payload,
            headers,
            request.proxy.clone().unwrap_or_default(),
        ]
    }
}

/// Turns the helper's stdout into a response.
pub fn parse_helper_output(stdout: &str) -> TransportResponse {
    let line = stdout.trim();
    let output: HelperOutput = match serde_json::from_str(line) {
        Ok(o) => o,
        Err(e) => {
            return NetworkError::HelperFailed {
                reason: format!("invalid JSON on stdout: {}", e),
            }
            .into();
        }
    };

    if let Some(err) = output.error {
        return TransportResponse::failure(err);
    }

    let json = output
        .json
        .filter(|v| !v.is_null())
        .or_else(|| serde_json::from_str(&output.text).ok());

    TransportResponse {
        status_code: output.status_code,
        json,
        raw_text: output.text,
        headers: output
            .headers
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect(),
    }
}

#[async_trait]
impl Transport for CommandTransport {
    async fn invoke(&self, request: TransportRequest) -> TransportResponse {
        debug!("{} {} via helper", request.method, request.endpoint);

        let child = Command::new(&self.interpreter)
            .arg(&self.script)
            .args(Self::args(&request))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(c) => c,
            Err(e) => {
                warn!("Failed to spawn helper {}: {}", self.script.display(), e);
                return NetworkError::HelperFailed {
                    reason: format!("spawn failed: {}", e),
                }
                .into();
            }
        };

        let output = match tokio::time::timeout(HELPER_TIMEOUT, child.wait_with_output()).await {
            Ok(Ok(o)) => o,
            Ok(Err(e)) => {
                return NetworkError::HelperFailed {
                    reason: format!("I/O error: {}", e),
                }
                .into();
            }
            Err(_) => {
                return NetworkError::Timeout {
                    timeout_ms: HELPER_TIMEOUT.as_millis() as u64,
                    endpoint: request.endpoint,
                }
                .into();
            }
        };

        if !output.status.success() && output.stdout.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return NetworkError::HelperFailed {
                reason: format!("exited with {}: {}", output.status, stderr.trim()),
            }
            .into();
        }

        parse_helper_output(&String::from_utf8_lossy(&output.stdout))
    }
}
