//! Remote sandbox platform interface.
//!
//! The harness only talks to sandboxes through [`SandboxPlatform`]. The HTTP
//! adapter drives a real platform; tests use the in-memory mock.

mod error;
mod http;
#[cfg(test)]
pub(crate) mod mock;

pub(crate) use error::SandboxError;
pub(crate) use http::HttpPlatform;

use async_trait::async_trait;
use serde::Serialize;

/// Caller-side reference to one remote sandbox.
///
/// Not `Clone`. Reconnecting produces a new handle that replaces this one.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct SandboxHandle {
    sandbox_id: String,
    access_token: Option<String>,
}

impl SandboxHandle {
    pub fn new(sandbox_id: impl Into<String>, access_token: Option<String>) -> Self {
        Self {
            sandbox_id: sandbox_id.into(),
            access_token,
        }
    }

    /// Handle usable for control-plane calls only (pause, kill, connect).
    pub fn detached(sandbox_id: impl Into<String>) -> Self {
        Self::new(sandbox_id, None)
    }

    pub fn sandbox_id(&self) -> &str {
        &self.sandbox_id
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }
}

/// A directory entry captured from the sandbox filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct FileInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl FileInfo {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
        }
    }
}

/// Output of a shell command run inside a sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Output of a program run through the sandbox code interpreter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct CodeExecution {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Main result value rendered as text, if the program produced one.
    pub text: Option<String>,
}

impl CodeExecution {
    /// The simplest non-empty rendering of what the program produced.
    pub fn output_text(&self) -> String {
        match self.text.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => text.to_string(),
            _ => self.stdout.trim().to_string(),
        }
    }
}

/// Operations the harness needs from a remote sandbox platform.
#[async_trait]
pub(crate) trait SandboxPlatform: Send + Sync {
    /// Provisions a new sandbox.
    async fn create(&self) -> Result<SandboxHandle, SandboxError>;

    /// Obtains a fresh handle for an existing (possibly paused) sandbox.
    async fn connect(&self, sandbox_id: &str) -> Result<SandboxHandle, SandboxError>;

    /// Suspends the sandbox so it can be resumed by `connect`.
    async fn pause(&self, handle: &SandboxHandle) -> Result<(), SandboxError>;

    /// Terminates the sandbox.
    async fn kill(&self, handle: &SandboxHandle) -> Result<(), SandboxError>;

    /// Runs a shell command. A non-zero exit is reported, not raised.
    async fn run_command(
        &self,
        handle: &SandboxHandle,
        command: &str,
    ) -> Result<CommandOutput, SandboxError>;

    /// Runs source code through the code interpreter.
    async fn run_code(
        &self,
        handle: &SandboxHandle,
        source: &str,
        language: &str,
    ) -> Result<CodeExecution, SandboxError>;

    /// Lists the entries of a directory.
    async fn list_directory(
        &self,
        handle: &SandboxHandle,
        path: &str,
    ) -> Result<Vec<FileInfo>, SandboxError>;
}
