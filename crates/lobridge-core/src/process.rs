use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Unique identifier for a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(pub u32);

impl From<u32> for ProcessId {
    fn from(pid: u32) -> Self {
        Self(pid)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a process
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessStatus {
    /// Process exited with status information
    Exited(std::process::ExitStatus),
    /// Process is gone without an exit status we could collect
    Terminated,
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessStatus::Exited(status) => write!(f, "{status}"),
            ProcessStatus::Terminated => f.write_str("terminated"),
        }
    }
}

/// Result of a process termination operation
#[derive(Debug, Clone, PartialEq)]
pub enum TerminationResult {
    /// Process was successfully terminated
    Success,
    /// Process was not found (already exited)
    ProcessNotFound,
    /// Insufficient privileges
    AccessDenied,
    /// Operation failed with specific error message
    Failed(String),
}

impl TerminationResult {
    /// Success or nothing left to terminate
    pub fn is_gone(&self) -> bool {
        matches!(
            self,
            TerminationResult::Success | TerminationResult::ProcessNotFound
        )
    }
}

/// One row of the OS process table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedProcess {
    pub pid: ProcessId,
    pub command_line: String,
}

/// Error types for process operations
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Failed to spawn process: {0}")]
    SpawnFailed(String),
    #[error("Process exited early: {0}")]
    ExitedEarly(ProcessStatus),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Core trait for process lifecycle management
#[async_trait]
pub trait ProcessLifecycle: Send + Sync {
    /// Spawn a new process with the given command and arguments
    async fn spawn_process(
        &self,
        command: &Path,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Box<dyn ProcessHandle>, ProcessError>;

    /// Enumerate the process table, as far as the platform's listing command
    /// reports it
    async fn list_processes(&self) -> Result<Vec<ListedProcess>>;

    /// Wait for a process to exit with optional timeout.
    ///
    /// Returns `Ok(None)` when the timeout elapsed with the process still
    /// running.
    async fn wait_for_exit(
        &self,
        handle: &mut dyn ProcessHandle,
        timeout: Option<Duration>,
    ) -> Result<Option<ProcessStatus>> {
        match timeout {
            Some(duration) => match tokio::time::timeout(duration, handle.wait()).await {
                Ok(status) => status.map(Some),
                Err(_) => Ok(None),
            },
            None => handle.wait().await.map(Some),
        }
    }
}

/// Trait for process termination including process trees
#[async_trait]
pub trait ProcessTermination: Send + Sync {
    /// Terminate a single process gracefully (SIGTERM on Unix)
    async fn terminate_gracefully(&self, handle: &mut dyn ProcessHandle) -> TerminationResult;

    /// Force kill a single process (SIGKILL on Unix)
    async fn force_kill(&self, handle: &mut dyn ProcessHandle) -> TerminationResult;

    /// Find all child processes of a given process
    async fn find_child_processes(&self, pid: ProcessId) -> Result<Vec<ProcessId>>;

    /// Terminate an entire process tree we hold no handle for (parent and all
    /// descendants)
    async fn terminate_process_tree(&self, root_pid: ProcessId, grace: Duration)
    -> TerminationResult;

    /// Stop a process we launched together with everything it started.
    ///
    /// The root gets a graceful termination, escalated to a force kill when
    /// it is still alive after `grace`. Descendants are collected up front:
    /// a launcher may exit on request while its children keep running, so
    /// each of them is then terminated by PID.
    async fn terminate_completely(
        &self,
        handle: &mut dyn ProcessHandle,
        grace: Duration,
    ) -> TerminationResult {
        let Some(pid) = handle.get_pid() else {
            return TerminationResult::ProcessNotFound;
        };

        let descendants = match self.find_child_processes(pid).await {
            Ok(descendants) => descendants,
            Err(e) => {
                warn!(pid = pid.0, error = %e, "Failed to find child processes");
                Vec::new()
            }
        };

        let result = match self.terminate_gracefully(handle).await {
            TerminationResult::Success => {
                match tokio::time::timeout(grace, handle.wait()).await {
                    Ok(_) => TerminationResult::Success,
                    Err(_) => self.force_kill(handle).await,
                }
            }
            TerminationResult::ProcessNotFound => TerminationResult::Success,
            _ => self.force_kill(handle).await,
        };

        for descendant in descendants {
            let swept = self.terminate_process_tree(descendant, grace).await;
            if swept.is_gone() {
                debug!(pid = descendant.0, "Descendant process gone");
            } else {
                warn!(pid = descendant.0, result = ?swept, "Failed to terminate descendant process");
            }
        }

        result
    }
}

/// Trait representing a handle to a running process
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    /// Get the process ID (None if process has exited)
    fn get_pid(&self) -> Option<ProcessId>;

    /// Check if the process is still running (non-blocking)
    async fn is_running(&self) -> bool;

    /// Try to get exit status without blocking
    async fn try_wait(&mut self) -> Result<Option<ProcessStatus>>;

    /// Wait for the process to exit
    async fn wait(&mut self) -> Result<ProcessStatus>;

    /// Kill the process (platform-specific implementation)
    async fn kill(&mut self) -> Result<()>;
}

/// Process manager combining lifecycle and termination
pub trait ProcessManager: ProcessLifecycle + ProcessTermination {}

/// Factory trait for creating platform-specific process managers
pub trait ProcessManagerFactory {
    /// The type of process manager this factory creates
    type Manager: ProcessManager;

    /// Create a process manager for the current platform
    fn create_process_manager() -> Self::Manager;

    /// Get the platform name for logging and debugging
    fn platform_name() -> &'static str;
}

#[async_trait]
impl ProcessHandle for Box<dyn ProcessHandle> {
    fn get_pid(&self) -> Option<ProcessId> {
        (**self).get_pid()
    }

    async fn is_running(&self) -> bool {
        (**self).is_running().await
    }

    async fn try_wait(&mut self) -> Result<Option<ProcessStatus>> {
        (**self).try_wait().await
    }

    async fn wait(&mut self) -> Result<ProcessStatus> {
        (**self).wait().await
    }

    async fn kill(&mut self) -> Result<()> {
        (**self).kill().await
    }
}
