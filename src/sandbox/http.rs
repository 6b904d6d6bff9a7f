//! HTTP client for an E2B-compatible sandbox platform.
//!
//! Lifecycle calls go to the control-plane REST API. Commands and directory
//! listings go to the in-sandbox agent using the Connect protocol with JSON
//! payloads, and code runs through the code interpreter's `/execute` stream.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::{CodeExecution, CommandOutput, FileInfo, SandboxError, SandboxHandle, SandboxPlatform};
use crate::config::{PlatformConfig, Secret};

/// Port of the in-sandbox agent (process and filesystem services).
const AGENT_PORT: u16 = 49983;
/// Port of the code interpreter.
const INTERPRETER_PORT: u16 = 49999;
/// User that commands run as inside the sandbox.
const SANDBOX_USER: &str = "user";

/// Connect envelope flag marking the trailing end-of-stream message.
const END_STREAM_FLAG: u8 = 0x02;

/// Talks to the platform over HTTPS.
pub(crate) struct HttpPlatform {
    client: reqwest::Client,
    api_url: String,
    domain: String,
    api_key: Secret,
    template: String,
    sandbox_timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SandboxInfo {
    #[serde(rename = "sandboxID")]
    sandbox_id: String,
    #[serde(default)]
    envd_access_token: Option<String>,
}

impl HttpPlatform {
    pub fn new(config: &PlatformConfig) -> Result<Self, SandboxError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            domain: config.domain.clone(),
            api_key: config.api_key.clone(),
            template: config.template.clone(),
            sandbox_timeout_secs: config.sandbox_timeout_secs,
        })
    }

    fn control(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.api_url))
            .header("X-API-Key", self.api_key.expose())
    }

    fn sandbox_url(&self, handle: &SandboxHandle, port: u16, path: &str) -> String {
        format!(
            "https://{port}-{}.{}{path}",
            handle.sandbox_id(),
            self.domain
        )
    }

    /// Request to a service running inside the sandbox.
    fn in_sandbox(&self, handle: &SandboxHandle, port: u16, path: &str) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .post(self.sandbox_url(handle, port, path))
            .header(
                "Authorization",
                format!("Basic {}", STANDARD.encode(format!("{SANDBOX_USER}:"))),
            );
        if let Some(token) = handle.access_token() {
            request = request.header("X-Access-Token", token);
        }
        request
    }

    async fn sandbox_info(
        &self,
        response: reqwest::Response,
        sandbox_id: Option<&str>,
    ) -> Result<SandboxHandle, SandboxError> {
        let response = check_status(response, sandbox_id).await?;
        let info: SandboxInfo = response.json().await?;
        Ok(SandboxHandle::new(info.sandbox_id, info.envd_access_token))
    }
}

#[async_trait]
impl SandboxPlatform for HttpPlatform {
    async fn create(&self) -> Result<SandboxHandle, SandboxError> {
        debug!("Creating sandbox from template {}", self.template);
        let response = self
            .control(reqwest::Method::POST, "/sandboxes")
            .json(&json!({
                "templateID": self.template,
                "timeout": self.sandbox_timeout_secs,
            }))
            .send()
            .await?;
        self.sandbox_info(response, None).await
    }

    async fn connect(&self, sandbox_id: &str) -> Result<SandboxHandle, SandboxError> {
        debug!("Connecting to sandbox {}", sandbox_id);
        let response = self
            .control(
                reqwest::Method::POST,
                &format!("/sandboxes/{sandbox_id}/connect"),
            )
            .json(&json!({ "timeout": self.sandbox_timeout_secs }))
            .send()
            .await?;
        self.sandbox_info(response, Some(sandbox_id)).await
    }

    async fn pause(&self, handle: &SandboxHandle) -> Result<(), SandboxError> {
        let id = handle.sandbox_id();
        let response = self
            .control(reqwest::Method::POST, &format!("/sandboxes/{id}/pause"))
            .send()
            .await?;
        check_status(response, Some(id)).await.map(drop)
    }

    async fn kill(&self, handle: &SandboxHandle) -> Result<(), SandboxError> {
        let id = handle.sandbox_id();
        let response = self
            .control(reqwest::Method::DELETE, &format!("/sandboxes/{id}"))
            .send()
            .await?;
        check_status(response, Some(id)).await.map(drop)
    }

    async fn run_command(
        &self,
        handle: &SandboxHandle,
        command: &str,
    ) -> Result<CommandOutput, SandboxError> {
        let request = json!({
            "process": {
                "cmd": "/bin/bash",
                "args": ["-l", "-c", command],
                "envs": {},
            }
        });
        let body = encode_envelope(&serde_json::to_vec(&request).map_err(decode_error)?);

        let response = self
            .in_sandbox(handle, AGENT_PORT, "/process.Process/Start")
            .header("Content-Type", "application/connect+json")
            .header("Connect-Protocol-Version", "1")
            .body(body)
            .send()
            .await?;
        let response = check_status(response, Some(handle.sandbox_id())).await?;
        let bytes = response.bytes().await?;
        parse_process_stream(&bytes)
    }

    async fn run_code(
        &self,
        handle: &SandboxHandle,
        source: &str,
        language: &str,
    ) -> Result<CodeExecution, SandboxError> {
        let response = self
            .in_sandbox(handle, INTERPRETER_PORT, "/execute")
            .json(&json!({ "code": source, "language": language }))
            .send()
            .await?;
        let response = check_status(response, Some(handle.sandbox_id())).await?;
        let text = response.text().await?;
        parse_execution_stream(&text)
    }

    async fn list_directory(
        &self,
        handle: &SandboxHandle,
        path: &str,
    ) -> Result<Vec<FileInfo>, SandboxError> {
        let response = self
            .in_sandbox(handle, AGENT_PORT, "/filesystem.Filesystem/ListDir")
            .header("Connect-Protocol-Version", "1")
            .json(&json!({ "path": path, "depth": 1 }))
            .send()
            .await?;
        let response = check_status(response, Some(handle.sandbox_id())).await?;
        let listing: ListDirResponse = response.json().await?;
        Ok(listing
            .entries
            .into_iter()
            .map(|entry| FileInfo::new(entry.name, file_kind(&entry.kind)))
            .collect())
    }
}

/// Maps non-success responses to typed errors.
async fn check_status(
    response: reqwest::Response,
    sandbox_id: Option<&str>,
) -> Result<reqwest::Response, SandboxError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == reqwest::StatusCode::NOT_FOUND {
        if let Some(id) = sandbox_id {
            return Err(SandboxError::not_found(id));
        }
    }
    let body = response.text().await.unwrap_or_default();
    Err(SandboxError::api(status.as_u16(), error_message(&body)))
}

/// Extracts `message` from a JSON error body, or returns the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
        .unwrap_or_else(|| body.trim().to_string())
}

fn decode_error(err: serde_json::Error) -> SandboxError {
    SandboxError::request(format!("malformed payload: {err}"))
}

// -----------------------------------------------------------------------------
// Connect protocol framing
// -----------------------------------------------------------------------------

/// Wraps one message in a Connect envelope: flags byte, big-endian length.
fn encode_envelope(payload: &[u8]) -> Vec<u8> {
    let len = u32::try_from(payload.len()).unwrap_or(u32::MAX);
    let mut frame = Vec::with_capacity(payload.len() + 5);
    frame.push(0);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Splits a response body into `(flags, payload)` envelopes.
fn decode_envelopes(mut bytes: &[u8]) -> Result<Vec<(u8, &[u8])>, SandboxError> {
    let mut frames = Vec::new();
    while !bytes.is_empty() {
        if bytes.len() < 5 {
            return Err(SandboxError::request("truncated stream envelope"));
        }
        let flags = bytes[0];
        let len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
        let rest = &bytes[5..];
        if rest.len() < len {
            return Err(SandboxError::request("truncated stream message"));
        }
        frames.push((flags, &rest[..len]));
        bytes = &rest[len..];
    }
    Ok(frames)
}

#[derive(Debug, Deserialize)]
struct ProcessMessage {
    event: ProcessEvent,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessEvent {
    #[serde(default)]
    data: Option<ProcessData>,
    #[serde(default)]
    end: Option<ProcessEnd>,
}

#[derive(Debug, Default, Deserialize)]
struct ProcessData {
    #[serde(default)]
    stdout: Option<String>,
    #[serde(default)]
    stderr: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessEnd {
    #[serde(default)]
    exit_code: i32,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EndOfStream {
    #[serde(default)]
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Collects stdout, stderr and the exit code from a process event stream.
fn parse_process_stream(bytes: &[u8]) -> Result<CommandOutput, SandboxError> {
    let mut output = CommandOutput::default();
    let mut ended = false;

    for (flags, payload) in decode_envelopes(bytes)? {
        if flags & END_STREAM_FLAG != 0 {
            let trailer: EndOfStream = serde_json::from_slice(payload).map_err(decode_error)?;
            if let Some(err) = trailer.error {
                return Err(SandboxError::request(format!(
                    "{}: {}",
                    err.code, err.message
                )));
            }
            continue;
        }

        let message: ProcessMessage = serde_json::from_slice(payload).map_err(decode_error)?;
        if let Some(data) = message.event.data {
            if let Some(chunk) = data.stdout {
                output.stdout.push_str(&decode_chunk(&chunk)?);
            }
            if let Some(chunk) = data.stderr {
                output.stderr.push_str(&decode_chunk(&chunk)?);
            }
        }
        if let Some(end) = message.event.end {
            output.exit_code = end.exit_code;
            if output.stderr.is_empty() {
                if let Some(error) = end.error {
                    output.stderr = error;
                }
            }
            ended = true;
        }
    }

    if !ended {
        return Err(SandboxError::request("process stream ended without exit status"));
    }
    Ok(output)
}

fn decode_chunk(chunk: &str) -> Result<String, SandboxError> {
    let bytes = STANDARD
        .decode(chunk)
        .map_err(|e| SandboxError::request(format!("invalid output chunk: {e}")))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

// -----------------------------------------------------------------------------
// Code interpreter stream
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ExecutionEvent {
    Stdout {
        text: String,
    },
    Stderr {
        text: String,
    },
    Result {
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        is_main_result: bool,
    },
    Error {
        name: String,
        value: String,
    },
    #[serde(other)]
    Other,
}

/// Folds newline-delimited interpreter events into one execution result.
///
/// An `error` event marks the execution as failed with exit code 1.
fn parse_execution_stream(body: &str) -> Result<CodeExecution, SandboxError> {
    let mut execution = CodeExecution::default();

    for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let event: ExecutionEvent = serde_json::from_str(line).map_err(decode_error)?;
        match event {
            ExecutionEvent::Stdout { text } => execution.stdout.push_str(&text),
            ExecutionEvent::Stderr { text } => execution.stderr.push_str(&text),
            ExecutionEvent::Result {
                text,
                is_main_result,
            } => {
                if is_main_result || execution.text.is_none() {
                    execution.text = text;
                }
            }
            ExecutionEvent::Error { name, value } => {
                execution.exit_code = 1;
                if !execution.stderr.is_empty() && !execution.stderr.ends_with('\n') {
                    execution.stderr.push('\n');
                }
                execution.stderr.push_str(&format!("{name}: {value}"));
            }
            ExecutionEvent::Other => {}
        }
    }

    Ok(execution)
}

// -----------------------------------------------------------------------------
// Filesystem listing
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ListDirResponse {
    #[serde(default)]
    entries: Vec<ListDirEntry>,
}

#[derive(Debug, Deserialize)]
struct ListDirEntry {
    name: String,
    #[serde(rename = "type", default)]
    kind: String,
}

fn file_kind(raw: &str) -> &'static str {
    match raw {
        "FILE_TYPE_DIRECTORY" => "dir",
        "FILE_TYPE_FILE" => "file",
        _ => "unknown",
    }
}
