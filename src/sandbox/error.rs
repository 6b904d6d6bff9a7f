//! Domain-specific error types for sandbox operations.
//!
//! Typed errors enable callers to match on specific failure modes
//! rather than parsing error message strings.

use std::time::Duration;

/// Errors that can occur during remote sandbox operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SandboxError {
    /// The platform answered with a non-success status.
    #[error("Sandbox API returned {status}: {message}")]
    Api { status: u16, message: String },

    /// The sandbox id is unknown to the platform (already killed or expired).
    #[error("Sandbox not found: {sandbox_id}")]
    NotFound { sandbox_id: String },

    /// The request never produced a response (connect, TLS, decode).
    #[error("Sandbox request failed: {message}")]
    Request { message: String },

    /// A shell command or program inside the sandbox exited non-zero.
    #[error("Command exited with code {exit_code}: {stderr}")]
    CommandFailed { exit_code: i32, stderr: String },

    /// A step did not complete before its deadline.
    #[error("Operation timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// A round finished but its results broke an expected invariant.
    #[error("Invariant violated: {message}")]
    InvariantViolated { message: String },
}

impl SandboxError {
    /// Creates an `Api` error.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Creates a `NotFound` error.
    pub fn not_found(sandbox_id: impl Into<String>) -> Self {
        Self::NotFound {
            sandbox_id: sandbox_id.into(),
        }
    }

    /// Creates a `Request` error.
    pub fn request(message: impl Into<String>) -> Self {
        Self::Request {
            message: message.into(),
        }
    }

    /// Creates a `CommandFailed` error.
    pub fn command_failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self::CommandFailed {
            exit_code,
            stderr: stderr.into(),
        }
    }

    /// Creates a `Timeout` error from a `Duration`.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout {
            timeout_secs: duration.as_secs(),
        }
    }

    /// Creates an `InvariantViolated` error.
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolated {
            message: message.into(),
        }
    }

    /// Returns true if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns true if the sandbox no longer exists on the platform.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if a command inside the sandbox exited non-zero.
    pub fn is_command_failure(&self) -> bool {
        matches!(self, Self::CommandFailed { .. })
    }
}

impl From<reqwest::Error> for SandboxError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::request(format!("request timed out: {err}"));
        }
        Self::request(err.to_string())
    }
}
