//! Ownership of the engine's OS process.
//!
//! One [`ProcessSupervisor`] per endpoint. It either adopts an engine that is
//! already accepting on the endpoint or launches a new one, and it is the only
//! place that terminates it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use lobridge_core::discovery::find_engine;
use lobridge_core::{
    ConverterConfig, ConverterError, EndpointAddress, ProcessError, ProcessHandle, ProcessId,
    ProcessManager, TerminationResult,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const ENGINE_FLAGS: [&str; 8] = [
    "--headless",
    "--invisible",
    "--nocrashreport",
    "--nodefault",
    "--nofirststartwizard",
    "--nolockcheck",
    "--nologo",
    "--norestore",
];

/// Lifecycle of the engine bound to one endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    NotStarted,
    Starting,
    Running,
    Terminated,
}

/// Counter fencing bridge connections: it advances whenever the engine goes
/// away, and a connection made under an older value is dead.
#[derive(Debug, Clone, Default)]
pub struct EngineGeneration(Arc<AtomicU64>);

impl EngineGeneration {
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

struct EngineSlot {
    state: EngineState,
    /// Engine we spawned ourselves
    handle: Option<Box<dyn ProcessHandle>>,
    /// Engine found already running on the endpoint
    adopted: Option<ProcessId>,
}

pub struct ProcessSupervisor<M: ProcessManager> {
    config: ConverterConfig,
    endpoint: EndpointAddress,
    manager: Arc<M>,
    slot: Mutex<EngineSlot>,
    generation: EngineGeneration,
}

impl<M: ProcessManager> ProcessSupervisor<M> {
    pub fn new(config: ConverterConfig, manager: Arc<M>) -> Self {
        let endpoint = config.endpoint();
        Self {
            config,
            endpoint,
            manager,
            slot: Mutex::new(EngineSlot {
                state: EngineState::NotStarted,
                handle: None,
                adopted: None,
            }),
            generation: EngineGeneration::default(),
        }
    }

    pub fn endpoint(&self) -> &EndpointAddress {
        &self.endpoint
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    pub fn generation(&self) -> &EngineGeneration {
        &self.generation
    }

    pub async fn state(&self) -> EngineState {
        self.slot.lock().await.state
    }

    /// PID of the engine currently owned or adopted
    pub async fn pid(&self) -> Option<ProcessId> {
        let slot = self.slot.lock().await;
        match &slot.handle {
            Some(handle) => handle.get_pid(),
            None => slot.adopted,
        }
    }

    /// Command line arguments the engine is launched with
    pub fn launch_arguments(&self) -> Result<Vec<String>, ConverterError> {
        let profile_dir = self.config.profile_dir();
        let profile_uri = url::Url::from_directory_path(&profile_dir)
            .or_else(|_| url::Url::from_file_path(&profile_dir))
            .map_err(|_| {
                ConverterError::configuration_error(format!(
                    "profile directory {} is not absolute",
                    profile_dir.display()
                ))
            })?;

        let mut args = Vec::with_capacity(ENGINE_FLAGS.len() + 2);
        args.push(self.endpoint.accept_argument());
        args.extend(ENGINE_FLAGS.iter().map(|flag| flag.to_string()));
        args.push(format!(
            "-env:UserInstallation={}",
            profile_uri.as_str().trim_end_matches('/')
        ));
        Ok(args)
    }

    /// Make sure an engine is running on the endpoint: keep ours, adopt one
    /// that is already accepting there, or launch a new one.
    pub async fn ensure_started(&self) -> Result<(), ConverterError> {
        let mut slot = self.slot.lock().await;

        if slot.state == EngineState::Running {
            if self.slot_alive(&mut slot).await {
                debug!(port = self.endpoint.port(), "Engine already running");
                return Ok(());
            }
            warn!(port = self.endpoint.port(), "Engine exited on its own");
            self.release(&mut slot);
        }

        if let Some(pid) = self.find_listed_engine().await {
            info!(port = self.endpoint.port(), pid = %pid, "Adopting running engine");
            slot.adopted = Some(pid);
            slot.state = EngineState::Running;
            return Ok(());
        }

        slot.state = EngineState::Starting;
        let executable = self.config.executable();
        let args = match self.launch_arguments() {
            Ok(args) => args,
            Err(e) => {
                slot.state = EngineState::NotStarted;
                return Err(e);
            }
        };

        info!(
            port = self.endpoint.port(),
            executable = %executable.display(),
            "Launching engine"
        );

        match self
            .manager
            .spawn_process(&executable, &args, &self.config.env)
            .await
        {
            Ok(handle) => {
                info!(port = self.endpoint.port(), pid = ?handle.get_pid(), "Engine launched");
                slot.handle = Some(handle);
                slot.state = EngineState::Running;
                Ok(())
            }
            Err(e) => {
                slot.state = EngineState::NotStarted;
                Err(ConverterError::launch_failure(e))
            }
        }
    }

    /// Give a freshly launched engine `wait` to settle. Fails when it exits
    /// in the meantime, which no amount of retrying will fix.
    pub async fn wait_for_readiness(&self, wait: Duration) -> Result<(), ConverterError> {
        let mut slot = self.slot.lock().await;
        let Some(handle) = slot.handle.as_mut() else {
            return Ok(());
        };

        let exited = if wait.is_zero() {
            handle.try_wait().await?
        } else {
            self.manager.wait_for_exit(handle.as_mut(), Some(wait)).await?
        };

        match exited {
            Some(status) => {
                warn!(port = self.endpoint.port(), status = %status, "Engine exited during startup");
                self.release(&mut slot);
                Err(ConverterError::launch_failure(format!(
                    "engine on port {}: {}",
                    self.endpoint.port(),
                    ProcessError::ExitedEarly(status)
                )))
            }
            None => Ok(()),
        }
    }

    /// Whether an engine accepting on the endpoint shows up in the process
    /// table
    pub async fn is_alive(&self) -> bool {
        self.find_listed_engine().await.is_some()
    }

    /// Stop the engine and every process it started: gracefully first,
    /// forcibly once the grace period is over. A no-op when nothing is owned.
    pub async fn terminate(&self) {
        let mut slot = self.slot.lock().await;
        let grace = self.config.termination_grace();

        let handle = slot.handle.take();
        let adopted = slot.adopted.take();
        if handle.is_none() && adopted.is_none() {
            debug!(port = self.endpoint.port(), "No engine to terminate");
            return;
        }

        if let Some(mut handle) = handle {
            let pid = handle.get_pid();
            let result = self.manager.terminate_completely(&mut handle, grace).await;
            log_termination(self.endpoint.port(), pid, &result);
        }

        if let Some(pid) = adopted {
            let result = self.manager.terminate_process_tree(pid, grace).await;
            log_termination(self.endpoint.port(), Some(pid), &result);
        }

        slot.state = EngineState::Terminated;
        let generation = self.generation.advance();
        debug!(port = self.endpoint.port(), generation, "Engine generation advanced");
    }

    async fn slot_alive(&self, slot: &mut EngineSlot) -> bool {
        if let Some(handle) = slot.handle.as_mut() {
            return matches!(handle.try_wait().await, Ok(None));
        }
        match slot.adopted {
            Some(pid) => self.find_listed_engine().await == Some(pid),
            None => false,
        }
    }

    fn release(&self, slot: &mut EngineSlot) {
        slot.handle = None;
        slot.adopted = None;
        slot.state = EngineState::Terminated;
        self.generation.advance();
    }

    async fn find_listed_engine(&self) -> Option<ProcessId> {
        match self.manager.list_processes().await {
            Ok(processes) => find_engine(&processes, &self.endpoint).map(|p| p.pid),
            Err(e) => {
                warn!(port = self.endpoint.port(), error = %e, "Failed to list processes");
                None
            }
        }
    }
}

fn log_termination(port: u16, pid: Option<ProcessId>, result: &TerminationResult) {
    if result.is_gone() {
        info!(port, pid = ?pid, "Engine terminated");
    } else {
        warn!(port, pid = ?pid, result = ?result, "Failed to terminate engine");
    }
}
