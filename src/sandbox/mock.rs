//! Mock sandbox platform for testing.
//!
//! Keeps sandbox state in memory, tracks every call for assertions and
//! injects faults on chosen operations without touching a real platform.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{CodeExecution, CommandOutput, FileInfo, SandboxError, SandboxHandle, SandboxPlatform};

/// Operations the mock can count and fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Op {
    Create,
    Connect,
    Pause,
    Kill,
    Mount,
    Unmount,
    List,
    RunCode,
}

/// How an injected fault manifests.
#[derive(Debug, Clone)]
pub(crate) enum Fault {
    /// The call itself returns an error with this message.
    Error(String),
    /// The remote command or program exits with this code and stderr.
    Exit(i32, String),
    /// The program succeeds but writes nothing.
    NoEffect,
}

#[derive(Debug, Clone)]
struct FaultRule {
    op: Op,
    /// Sandbox the rule applies to, or every sandbox.
    sandbox_id: Option<String>,
    /// 1-based call number for that sandbox and op, or every call.
    call: Option<usize>,
    fault: Fault,
}

#[derive(Debug, Default)]
struct SandboxState {
    paused: bool,
    killed: bool,
    calls: HashMap<Op, usize>,
}

#[derive(Debug, Default)]
struct MockState {
    sandboxes: HashMap<String, SandboxState>,
    /// Files in the shared bucket, as seen through any mount.
    bucket: Vec<FileInfo>,
    /// Every call in order: (sandbox id, op).
    log: Vec<(String, Op)>,
    totals: HashMap<Op, usize>,
}

/// An in-memory platform whose sandboxes share one bucket.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockPlatform {
    state: Arc<Mutex<MockState>>,
    rules: Arc<Mutex<Vec<FaultRule>>>,
    next_id: Arc<AtomicUsize>,
    latency: Duration,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps this long before acting.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fails `op` on every call, for every sandbox.
    pub fn fail_always(self, op: Op, fault: Fault) -> Self {
        self.push_rule(op, None, None, fault)
    }

    /// Fails the `call`-th invocation of `op` on `sandbox_id`.
    pub fn fail_on(self, op: Op, sandbox_id: &str, call: usize, fault: Fault) -> Self {
        self.push_rule(op, Some(sandbox_id.to_string()), Some(call), fault)
    }

    /// Fails the first `count` kill calls with a transient error.
    pub fn fail_kills(self, count: usize) -> Self {
        for call in 1..=count {
            self.rules.lock().unwrap().push(FaultRule {
                op: Op::Kill,
                sandbox_id: None,
                call: Some(call),
                fault: Fault::Error(format!("kill attempt {call} rejected")),
            });
        }
        self
    }

    fn push_rule(self, op: Op, sandbox_id: Option<String>, call: Option<usize>, fault: Fault) -> Self {
        self.rules.lock().unwrap().push(FaultRule {
            op,
            sandbox_id,
            call,
            fault,
        });
        self
    }

    /// Total calls of `op` across all sandboxes.
    pub fn count(&self, op: Op) -> usize {
        self.state
            .lock()
            .unwrap()
            .totals
            .get(&op)
            .copied()
            .unwrap_or(0)
    }

    /// Ops issued against one sandbox, in order.
    pub fn ops_for(&self, sandbox_id: &str) -> Vec<Op> {
        self.state
            .lock()
            .unwrap()
            .log
            .iter()
            .filter(|(id, _)| id == sandbox_id)
            .map(|(_, op)| *op)
            .collect()
    }

    pub fn is_killed(&self, sandbox_id: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .sandboxes
            .get(sandbox_id)
            .is_some_and(|s| s.killed)
    }

    /// Seeds the shared bucket with an existing file.
    pub fn seed_file(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .bucket
            .push(FileInfo::new(name, "file"));
    }

    /// Records a call and returns the fault to apply, if any.
    async fn record(&self, sandbox_id: &str, op: Op) -> Result<Option<Fault>, SandboxError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut state = self.state.lock().unwrap();
        state.log.push((sandbox_id.to_string(), op));
        *state.totals.entry(op).or_insert(0) += 1;

        let sandbox = state
            .sandboxes
            .get_mut(sandbox_id)
            .ok_or_else(|| SandboxError::not_found(sandbox_id))?;
        let call = {
            let n = sandbox.calls.entry(op).or_insert(0);
            *n += 1;
            *n
        };

        let fault = self
            .rules
            .lock()
            .unwrap()
            .iter()
            .find(|r| {
                r.op == op
                    && r.sandbox_id.as_deref().map_or(true, |id| id == sandbox_id)
                    && r.call.map_or(true, |c| c == call)
            })
            .map(|r| r.fault.clone());

        if let Some(Fault::Error(message)) = &fault {
            return Err(SandboxError::api(500, message.clone()));
        }

        if sandbox.killed {
            return Err(SandboxError::not_found(sandbox_id));
        }
        if sandbox.paused && !matches!(op, Op::Connect | Op::Kill) {
            return Err(SandboxError::api(409, format!("sandbox {sandbox_id} is paused")));
        }

        Ok(fault)
    }
}

#[async_trait]
impl SandboxPlatform for MockPlatform {
    async fn create(&self) -> Result<SandboxHandle, SandboxError> {
        let id = format!("mock-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.state
            .lock()
            .unwrap()
            .sandboxes
            .insert(id.clone(), SandboxState::default());
        self.record(&id, Op::Create).await?;
        Ok(SandboxHandle::new(id, Some("token".to_string())))
    }

    async fn connect(&self, sandbox_id: &str) -> Result<SandboxHandle, SandboxError> {
        self.record(sandbox_id, Op::Connect).await?;
        if let Some(sandbox) = self.state.lock().unwrap().sandboxes.get_mut(sandbox_id) {
            sandbox.paused = false;
        }
        Ok(SandboxHandle::new(sandbox_id, Some("token".to_string())))
    }

    async fn pause(&self, handle: &SandboxHandle) -> Result<(), SandboxError> {
        self.record(handle.sandbox_id(), Op::Pause).await?;
        if let Some(sandbox) = self.state.lock().unwrap().sandboxes.get_mut(handle.sandbox_id()) {
            sandbox.paused = true;
        }
        Ok(())
    }

    async fn kill(&self, handle: &SandboxHandle) -> Result<(), SandboxError> {
        self.record(handle.sandbox_id(), Op::Kill).await?;
        if let Some(sandbox) = self.state.lock().unwrap().sandboxes.get_mut(handle.sandbox_id()) {
            sandbox.killed = true;
        }
        Ok(())
    }

    async fn run_command(
        &self,
        handle: &SandboxHandle,
        command: &str,
    ) -> Result<CommandOutput, SandboxError> {
        let op = if command.contains("s3fs") {
            Op::Mount
        } else {
            Op::Unmount
        };
        match self.record(handle.sandbox_id(), op).await? {
            Some(Fault::Exit(exit_code, stderr)) => Ok(CommandOutput {
                exit_code,
                stdout: String::new(),
                stderr,
            }),
            _ => Ok(CommandOutput::default()),
        }
    }

    async fn run_code(
        &self,
        handle: &SandboxHandle,
        source: &str,
        _language: &str,
    ) -> Result<CodeExecution, SandboxError> {
        match self.record(handle.sandbox_id(), Op::RunCode).await? {
            Some(Fault::Exit(exit_code, stderr)) => Ok(CodeExecution {
                exit_code,
                stderr,
                ..Default::default()
            }),
            Some(Fault::NoEffect) => Ok(CodeExecution::default()),
            _ => {
                let name = written_file_name(source)
                    .unwrap_or_else(|| format!("file-{}.txt", uuid::Uuid::new_v4()));
                self.state
                    .lock()
                    .unwrap()
                    .bucket
                    .push(FileInfo::new(&name, "file"));
                Ok(CodeExecution {
                    stdout: format!("created {name}\n"),
                    ..Default::default()
                })
            }
        }
    }

    async fn list_directory(
        &self,
        handle: &SandboxHandle,
        _path: &str,
    ) -> Result<Vec<FileInfo>, SandboxError> {
        self.record(handle.sandbox_id(), Op::List).await?;
        Ok(self.state.lock().unwrap().bucket.clone())
    }
}

/// Pulls the target file name out of a generated program's `FILE_NAME = "..."`.
fn written_file_name(source: &str) -> Option<String> {
    source.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("FILE_NAME = ")?;
        Some(rest.trim_matches('"').to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_assigns_sequential_ids() {
        let platform = MockPlatform::new();
        let a = platform.create().await.unwrap();
        let b = platform.create().await.unwrap();
        assert_eq!(a.sandbox_id(), "mock-1");
        assert_eq!(b.sandbox_id(), "mock-2");
        assert_eq!(platform.count(Op::Create), 2);
    }

    #[tokio::test]
    async fn test_mock_rejects_work_while_paused() {
        let platform = MockPlatform::new();
        let handle = platform.create().await.unwrap();
        platform.pause(&handle).await.unwrap();

        let err = platform.list_directory(&handle, "/").await.unwrap_err();
        assert!(err.to_string().contains("paused"));

        let handle = platform.connect("mock-1").await.unwrap();
        assert!(platform.list_directory(&handle, "/").await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_killed_sandbox_is_gone() {
        let platform = MockPlatform::new();
        let handle = platform.create().await.unwrap();
        platform.kill(&handle).await.unwrap();
        assert!(platform.is_killed("mock-1"));
        assert!(platform.kill(&handle).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_mock_fault_targets_one_call() {
        let platform = MockPlatform::new().fail_on(
            Op::RunCode,
            "mock-1",
            2,
            Fault::Exit(1, "boom".to_string()),
        );
        let handle = platform.create().await.unwrap();
        let first = platform.run_code(&handle, "", "python").await.unwrap();
        let second = platform.run_code(&handle, "", "python").await.unwrap();
        let third = platform.run_code(&handle, "", "python").await.unwrap();
        assert_eq!(first.exit_code, 0);
        assert_eq!(second.exit_code, 1);
        assert_eq!(second.stderr, "boom");
        assert_eq!(third.exit_code, 0);
    }

    #[tokio::test]
    async fn test_mock_run_code_writes_named_file() {
        let platform = MockPlatform::new();
        let handle = platform.create().await.unwrap();
        let source = "FILE_NAME = \"probe.txt\"\nprint(FILE_NAME)\n";
        platform.run_code(&handle, source, "python").await.unwrap();
        let files = platform.list_directory(&handle, "/").await.unwrap();
        assert_eq!(files, vec![FileInfo::new("probe.txt", "file")]);
    }

    #[test]
    fn test_mock_platform_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MockPlatform>();
    }
}
