use anyhow::{Context, Result};
use async_trait::async_trait;
use lobridge_core::discovery::{ListingFormat, parse_listing};
use lobridge_core::{
    EngineStream, ListedProcess, ProcessError, ProcessHandle, ProcessId, ProcessLifecycle,
    ProcessManager, ProcessStatus, ProcessTermination, TerminationResult, forward_lines,
};
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid as NixPid;
    use sysinfo::System;
    use tokio::process::{Child, Command};
    use tracing::{debug, info, warn};

    /// Unix-specific process handle implementation
    pub struct UnixProcessHandle {
        child: Child,
    }

    impl UnixProcessHandle {
        pub fn new(child: Child) -> Self {
            Self { child }
        }
    }

    #[async_trait]
    impl ProcessHandle for UnixProcessHandle {
        fn get_pid(&self) -> Option<ProcessId> {
            self.child.id().map(ProcessId::from)
        }

        async fn is_running(&self) -> bool {
            match self.get_pid() {
                // Signal 0 only checks that the process exists
                Some(pid) => signal::kill(NixPid::from_raw(pid.0 as i32), None).is_ok(),
                None => {
                    debug!("Unix process handle has no PID - process has exited");
                    false
                }
            }
        }

        async fn try_wait(&mut self) -> Result<Option<ProcessStatus>> {
            Ok(self.child.try_wait()?.map(ProcessStatus::Exited))
        }

        async fn wait(&mut self) -> Result<ProcessStatus> {
            let status = self.child.wait().await?;
            Ok(ProcessStatus::Exited(status))
        }

        async fn kill(&mut self) -> Result<()> {
            self.child
                .kill()
                .await
                .map_err(|e| anyhow::anyhow!("Failed to kill process: {}", e))
        }
    }

    // Emergency cleanup when a live engine handle is dropped without being
    // terminated; Drop cannot await, so signal the group and move on.
    impl Drop for UnixProcessHandle {
        fn drop(&mut self) {
            if !matches!(self.child.try_wait(), Ok(None)) {
                return;
            }
            if let Some(pid) = self.child.id() {
                warn!(pid, "Process handle dropped while running - attempting emergency cleanup");
                if let Err(e) = signal::killpg(NixPid::from_raw(pid as i32), Signal::SIGTERM) {
                    warn!(pid, error = %e, "Emergency cleanup failed");
                }
            }
        }
    }

    /// Unix-specific process manager with process tree management
    pub struct UnixProcessManager {
        system: std::sync::Mutex<System>,
    }

    impl Default for UnixProcessManager {
        fn default() -> Self {
            Self::new()
        }
    }

    impl UnixProcessManager {
        pub fn new() -> Self {
            info!("Initializing Unix process manager");
            Self {
                system: std::sync::Mutex::new(System::new()),
            }
        }
    }

    #[async_trait]
    impl ProcessLifecycle for UnixProcessManager {
        async fn spawn_process(
            &self,
            command: &Path,
            args: &[String],
            env: &HashMap<String, String>,
        ) -> Result<Box<dyn ProcessHandle>, ProcessError> {
            let mut cmd = Command::new(command);
            cmd.args(args)
                .envs(env)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());

            // Own process group so the whole engine tree can be signalled
            cmd.process_group(0);

            let mut child = cmd
                .spawn()
                .map_err(|e| ProcessError::SpawnFailed(format!("{}: {e}", command.display())))?;

            let pid = child.id().unwrap_or_default();
            info!(pid, command = %command.display(), "Spawned Unix process");

            if let Some(stdout) = child.stdout.take() {
                tokio::spawn(forward_lines(stdout, pid, EngineStream::Stdout));
            }
            if let Some(stderr) = child.stderr.take() {
                tokio::spawn(forward_lines(stderr, pid, EngineStream::Stderr));
            }

            Ok(Box::new(UnixProcessHandle::new(child)))
        }

        async fn list_processes(&self) -> Result<Vec<ListedProcess>> {
            let output = Command::new("ps")
                .args(["-e", "-o", "pid,args"])
                .stdin(Stdio::null())
                .output()
                .await
                .context("Failed to run ps")?;

            if !output.status.success() {
                anyhow::bail!("ps exited with {}", output.status);
            }

            let listing = String::from_utf8_lossy(&output.stdout);
            Ok(parse_listing(&listing, ListingFormat::Posix))
        }
    }

    #[async_trait]
    impl ProcessTermination for UnixProcessManager {
        /// SIGTERM to the process group the handle's process leads
        async fn terminate_gracefully(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
            let Some(pid) = handle.get_pid() else {
                return TerminationResult::ProcessNotFound;
            };
            match signal::killpg(NixPid::from_raw(pid.0 as i32), Signal::SIGTERM) {
                Ok(()) => {
                    info!(pgid = pid.0, "Sent SIGTERM to process group");
                    TerminationResult::Success
                }
                // Not a group leader after all
                Err(_) => send_signal(pid, Signal::SIGTERM),
            }
        }

        async fn force_kill(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
            let Some(pid) = handle.get_pid() else {
                return TerminationResult::ProcessNotFound;
            };

            // Take the helpers of the process group down with it
            let _ = signal::killpg(NixPid::from_raw(pid.0 as i32), Signal::SIGKILL);

            let result = send_signal(pid, Signal::SIGKILL);
            if result == TerminationResult::Success {
                // Reap the child
                if let Err(e) = handle.kill().await {
                    debug!(pid = pid.0, error = %e, "Handle kill cleanup failed");
                }
            }
            result
        }

        async fn find_child_processes(&self, parent_pid: ProcessId) -> Result<Vec<ProcessId>> {
            let mut system = self
                .system
                .lock()
                .map_err(|_| anyhow::anyhow!("process table lock poisoned"))?;
            system.refresh_processes_specifics(
                sysinfo::ProcessesToUpdate::All,
                true,
                sysinfo::ProcessRefreshKind::default(),
            );

            let mut children = Vec::new();
            Self::find_children_recursive(&system, parent_pid.0, &mut children);

            Ok(children.into_iter().map(ProcessId::from).collect())
        }

        async fn terminate_process_tree(
            &self,
            root_pid: ProcessId,
            grace: Duration,
        ) -> TerminationResult {
            info!(root_pid = root_pid.0, "Terminating process tree");

            let children = match self.find_child_processes(root_pid).await {
                Ok(children) => children,
                Err(e) => {
                    warn!(root_pid = root_pid.0, error = %e, "Failed to find child processes");
                    Vec::new()
                }
            };

            // Children first (bottom-up)
            for child_pid in children {
                let result = self.terminate_single_process(child_pid, grace).await;
                if !result.is_gone() {
                    warn!(pid = child_pid.0, result = ?result, "Failed to terminate child process");
                }
            }

            self.terminate_single_process(root_pid, grace).await
        }
    }

    impl UnixProcessManager {
        /// Terminate a single process by PID with escalation
        async fn terminate_single_process(&self, pid: ProcessId, grace: Duration) -> TerminationResult {
            match send_signal(pid, Signal::SIGTERM) {
                TerminationResult::Success => {
                    let deadline = tokio::time::Instant::now() + grace;
                    while tokio::time::Instant::now() < deadline {
                        if signal::kill(NixPid::from_raw(pid.0 as i32), None).is_err() {
                            return TerminationResult::Success;
                        }
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }

                    match send_signal(pid, Signal::SIGKILL) {
                        TerminationResult::Success => {
                            wait_gone(pid, grace).await;
                            TerminationResult::Success
                        }
                        TerminationResult::ProcessNotFound => TerminationResult::Success,
                        other => other,
                    }
                }
                TerminationResult::ProcessNotFound => TerminationResult::Success,
                other => other,
            }
        }

        /// Recursively find all child processes, deepest first
        fn find_children_recursive(system: &System, parent_pid: u32, result: &mut Vec<u32>) {
            for (pid, process) in system.processes() {
                if process.parent().is_some_and(|ppid| ppid.as_u32() == parent_pid) {
                    let child_pid = pid.as_u32();
                    Self::find_children_recursive(system, child_pid, result);
                    result.push(child_pid);
                }
            }
        }
    }

    /// Poll until `pid` no longer exists, for at most `limit`. A zombie
    /// nobody reaps still counts as existing, hence the limit.
    async fn wait_gone(pid: ProcessId, limit: Duration) {
        let deadline = tokio::time::Instant::now() + limit;
        while tokio::time::Instant::now() < deadline {
            if signal::kill(NixPid::from_raw(pid.0 as i32), None).is_err() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn send_signal(pid: ProcessId, sig: Signal) -> TerminationResult {
        match signal::kill(NixPid::from_raw(pid.0 as i32), sig) {
            Ok(()) => {
                info!(pid = pid.0, signal = %sig, "Sent signal to process");
                TerminationResult::Success
            }
            Err(nix::errno::Errno::ESRCH) => {
                debug!(pid = pid.0, "Process not found (already terminated)");
                TerminationResult::ProcessNotFound
            }
            Err(nix::errno::Errno::EPERM) => {
                warn!(pid = pid.0, signal = %sig, "Permission denied to signal process");
                TerminationResult::AccessDenied
            }
            Err(e) => {
                warn!(pid = pid.0, signal = %sig, error = %e, "Failed to signal process");
                TerminationResult::Failed(format!("{sig} failed: {e}"))
            }
        }
    }

    impl ProcessManager for UnixProcessManager {}
}

// Re-export the Unix implementation when on Unix systems
#[cfg(unix)]
pub use unix_impl::{UnixProcessHandle, UnixProcessManager};

// Provide stub implementations for non-Unix systems
#[cfg(not(unix))]
pub struct UnixProcessHandle;

#[cfg(not(unix))]
pub struct UnixProcessManager;

#[cfg(not(unix))]
impl UnixProcessManager {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(not(unix))]
impl Default for UnixProcessManager {
    fn default() -> Self {
        Self::new()
    }
}
