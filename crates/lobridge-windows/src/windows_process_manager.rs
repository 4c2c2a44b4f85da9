use anyhow::{Context, Result};
use async_trait::async_trait;
use lobridge_core::discovery::{ListingFormat, parse_listing};
use lobridge_core::*;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use sysinfo::System;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// CREATE_NO_WINDOW: no console window pops up for the engine
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// Windows-specific process handle implementation
pub struct WindowsProcessHandle {
    child: Child,
}

impl WindowsProcessHandle {
    pub fn new(child: Child) -> Self {
        Self { child }
    }
}

#[async_trait]
impl ProcessHandle for WindowsProcessHandle {
    fn get_pid(&self) -> Option<ProcessId> {
        self.child.id().map(ProcessId::from)
    }

    async fn is_running(&self) -> bool {
        match self.get_pid() {
            Some(pid) => process_exists(pid),
            None => {
                debug!("Windows process handle has no PID - process has exited");
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
// terminated; Drop cannot await, so fall back to a blocking taskkill.
impl Drop for WindowsProcessHandle {
    fn drop(&mut self) {
        if !matches!(self.child.try_wait(), Ok(None)) {
            return;
        }
        if let Some(pid) = self.child.id() {
            warn!(pid, "Process handle dropped while running - attempting emergency cleanup");
            if let Err(e) = std::process::Command::new("taskkill")
                .args(["/F", "/T", "/PID", &pid.to_string()])
                .output()
            {
                warn!(pid, error = %e, "Emergency cleanup failed");
            }
        }
    }
}

fn process_exists(pid: ProcessId) -> bool {
    let mut system = System::new();
    system.refresh_processes(
        sysinfo::ProcessesToUpdate::Some(&[sysinfo::Pid::from_u32(pid.0)]),
        true,
    );
    system.process(sysinfo::Pid::from_u32(pid.0)).is_some()
}

/// Windows-specific process manager with process tree management
pub struct WindowsProcessManager {
    system: std::sync::Mutex<System>,
}

impl Default for WindowsProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowsProcessManager {
    pub fn new() -> Self {
        info!("Initializing Windows process manager");
        Self {
            system: std::sync::Mutex::new(System::new()),
        }
    }
}

#[async_trait]
impl ProcessLifecycle for WindowsProcessManager {
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

        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);

        let mut child = cmd
            .spawn()
            .map_err(|e| ProcessError::SpawnFailed(format!("{}: {e}", command.display())))?;

        let pid = child.id().unwrap_or_default();
        info!(pid, command = %command.display(), "Spawned Windows process");

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, pid, EngineStream::Stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, pid, EngineStream::Stderr));
        }

        Ok(Box::new(WindowsProcessHandle::new(child)))
    }

    async fn list_processes(&self) -> Result<Vec<ListedProcess>> {
        let mut cmd = Command::new("cmd");
        cmd.args([
            "/c",
            "wmic process where \"name like 'soffice%'\" get commandline,processid",
        ])
        .stdin(Stdio::null());

        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);

        let output = cmd.output().await.context("Failed to run wmic")?;
        if !output.status.success() {
            anyhow::bail!("wmic exited with {}", output.status);
        }

        let listing = String::from_utf8_lossy(&output.stdout);
        Ok(parse_listing(&listing, ListingFormat::Windows))
    }
}

#[async_trait]
impl ProcessTermination for WindowsProcessManager {
    async fn terminate_gracefully(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
        let Some(pid) = handle.get_pid() else {
            return TerminationResult::ProcessNotFound;
        };

        // /T: the launcher's children get the request too
        match self.taskkill(pid.0, false, true).await {
            Ok(true) => {
                info!(pid = pid.0, "Sent graceful termination to process tree");
                TerminationResult::Success
            }
            Ok(false) => {
                debug!(pid = pid.0, "Process not found for graceful termination");
                TerminationResult::ProcessNotFound
            }
            Err(e) => {
                warn!(pid = pid.0, error = %e, "Failed to gracefully terminate process");
                TerminationResult::Failed(format!("Graceful termination failed: {e}"))
            }
        }
    }

    async fn force_kill(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
        let Some(pid) = handle.get_pid() else {
            return TerminationResult::ProcessNotFound;
        };

        match self.taskkill(pid.0, true, true).await {
            Ok(true) => {
                info!(pid = pid.0, "Force killed process tree");
                if let Err(e) = handle.kill().await {
                    debug!(pid = pid.0, error = %e, "Handle kill cleanup failed");
                }
                TerminationResult::Success
            }
            Ok(false) => TerminationResult::ProcessNotFound,
            Err(e) => {
                warn!(pid = pid.0, error = %e, "Failed to force kill process");
                TerminationResult::Failed(format!("Force kill failed: {e}"))
            }
        }
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

        // /T only finds descendants while the root is alive
        let descendants = self.find_child_processes(root_pid).await.unwrap_or_default();

        // Ask politely first, then force
        if let Ok(true) = self.taskkill(root_pid.0, false, true).await {
            let deadline = tokio::time::Instant::now() + grace;
            while tokio::time::Instant::now() < deadline {
                if !process_exists(root_pid) && !descendants.iter().any(|pid| process_exists(*pid)) {
                    return TerminationResult::Success;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }

        let result = match self.taskkill(root_pid.0, true, true).await {
            Ok(true) => TerminationResult::Success,
            Ok(false) if !process_exists(root_pid) => TerminationResult::ProcessNotFound,
            Ok(false) => TerminationResult::Failed(format!("taskkill refused {root_pid}")),
            Err(e) => TerminationResult::Failed(format!("Force kill failed: {e}")),
        };

        // Whatever outlived the root
        for pid in descendants.into_iter().filter(|pid| process_exists(*pid)) {
            if let Err(e) = self.taskkill(pid.0, true, false).await {
                warn!(pid = pid.0, error = %e, "Failed to terminate child process");
            }
        }

        result
    }
}

impl WindowsProcessManager {
    /// Run taskkill on `pid`; `tree` adds /T, `force` adds /F
    async fn taskkill(&self, pid: u32, force: bool, tree: bool) -> Result<bool> {
        let pid_string = pid.to_string();
        let mut args = vec!["/PID", pid_string.as_str()];
        if force {
            args.push("/F");
        }
        if tree {
            args.push("/T");
        }

        let mut cmd = Command::new("taskkill");
        cmd.args(&args);

        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);

        let output = cmd.output().await?;
        Ok(output.status.success())
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

impl ProcessManager for WindowsProcessManager {}
