//! In-memory stand-ins for the OS process table and the office engine.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lobridge::{
    ABOUT_COMMAND, BridgeConnector, BridgeError, BridgeSession, ConnectRetryConfig, ConverterConfig, Desktop,
    DispatchHelper, Document, DocumentFamily, EndpointAddress, FrameRef, ListedProcess,
    ProcessError, ProcessHandle, ProcessId, ProcessLifecycle, ProcessManager, ProcessStatus,
    ProcessTermination, PropertyData, PropertyValue, TerminationResult,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_file(true)
        .with_thread_ids(false)
        .with_target(false)
        .with_line_number(true)
        .with_test_writer()
        .try_init();
}

/// Converter config for tests: no waiting between attempts
pub fn test_config(port: u16, profile_root: &Path, max_attempts: u32) -> ConverterConfig {
    ConverterConfig::builder()
        .port(port)
        .office_home("/opt/fake-office/program/soffice")
        .profile_root(profile_root.to_path_buf())
        .retry_config(ConnectRetryConfig {
            max_attempts,
            delay_ms: 0,
            readiness_wait_ms: 0,
            probe_timeout_ms: 200,
        })
        .termination_grace_ms(10u64)
        .build()
        .unwrap()
}

// ---------------------------------------------------------------------------
// Process table

#[derive(Default)]
struct ProcessTable {
    processes: HashMap<u32, FakeProcess>,
    next_pid: u32,
    spawned: Vec<u32>,
}

struct FakeProcess {
    command_line: String,
    alive: bool,
}

/// Process manager over an in-memory process table
#[derive(Clone, Default)]
pub struct FakeProcessManager {
    table: Arc<Mutex<ProcessTable>>,
    fail_spawn: Arc<AtomicBool>,
    exit_on_spawn: Arc<AtomicBool>,
}

impl FakeProcessManager {
    pub fn new() -> Self {
        let manager = Self::default();
        manager.table.lock().unwrap().next_pid = 4000;
        manager
    }

    pub fn fail_spawn(&self, fail: bool) {
        self.fail_spawn.store(fail, Ordering::SeqCst);
    }

    /// Spawned processes die right away, as an engine with a broken profile
    /// does
    pub fn exit_on_spawn(&self, exit: bool) {
        self.exit_on_spawn.store(exit, Ordering::SeqCst);
    }

    pub fn spawn_count(&self) -> usize {
        self.table.lock().unwrap().spawned.len()
    }

    pub fn spawned(&self) -> Vec<u32> {
        self.table.lock().unwrap().spawned.clone()
    }

    pub fn command_line(&self, pid: u32) -> Option<String> {
        self.table
            .lock()
            .unwrap()
            .processes
            .get(&pid)
            .map(|p| p.command_line.clone())
    }

    pub fn is_alive(&self, pid: u32) -> bool {
        self.table
            .lock()
            .unwrap()
            .processes
            .get(&pid)
            .is_some_and(|p| p.alive)
    }

    /// A process this manager did not start
    pub fn add_external(&self, pid: u32, command_line: &str) {
        self.table.lock().unwrap().processes.insert(
            pid,
            FakeProcess {
                command_line: command_line.to_string(),
                alive: true,
            },
        );
    }

    pub fn kill_externally(&self, pid: u32) {
        mark_dead(&self.table, pid);
    }
}

/// Returns whether the process was alive
fn mark_dead(table: &Mutex<ProcessTable>, pid: u32) -> bool {
    match table.lock().unwrap().processes.get_mut(&pid) {
        Some(process) if process.alive => {
            process.alive = false;
            true
        }
        _ => false,
    }
}

pub struct FakeHandle {
    pid: u32,
    table: Arc<Mutex<ProcessTable>>,
}

impl FakeHandle {
    fn alive(&self) -> bool {
        self.table
            .lock()
            .unwrap()
            .processes
            .get(&self.pid)
            .is_some_and(|p| p.alive)
    }
}

#[async_trait]
impl ProcessHandle for FakeHandle {
    fn get_pid(&self) -> Option<ProcessId> {
        Some(ProcessId(self.pid))
    }

    async fn is_running(&self) -> bool {
        self.alive()
    }

    async fn try_wait(&mut self) -> anyhow::Result<Option<ProcessStatus>> {
        Ok((!self.alive()).then_some(ProcessStatus::Terminated))
    }

    async fn wait(&mut self) -> anyhow::Result<ProcessStatus> {
        while self.alive() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok(ProcessStatus::Terminated)
    }

    async fn kill(&mut self) -> anyhow::Result<()> {
        mark_dead(&self.table, self.pid);
        Ok(())
    }
}

#[async_trait]
impl ProcessLifecycle for FakeProcessManager {
    async fn spawn_process(
        &self,
        command: &Path,
        args: &[String],
        _env: &HashMap<String, String>,
    ) -> Result<Box<dyn ProcessHandle>, ProcessError> {
        if self.fail_spawn.load(Ordering::SeqCst) {
            return Err(ProcessError::SpawnFailed(format!(
                "{}: No such file or directory",
                command.display()
            )));
        }

        let mut table = self.table.lock().unwrap();
        table.next_pid += 1;
        let pid = table.next_pid;
        table.spawned.push(pid);
        table.processes.insert(
            pid,
            FakeProcess {
                command_line: format!("{} {}", command.display(), args.join(" ")),
                alive: !self.exit_on_spawn.load(Ordering::SeqCst),
            },
        );

        Ok(Box::new(FakeHandle {
            pid,
            table: self.table.clone(),
        }))
    }

    async fn list_processes(&self) -> anyhow::Result<Vec<ListedProcess>> {
        let table = self.table.lock().unwrap();
        let mut listed: Vec<_> = table
            .processes
            .iter()
            .filter(|(_, process)| process.alive)
            .map(|(pid, process)| ListedProcess {
                pid: ProcessId(*pid),
                command_line: process.command_line.clone(),
            })
            .collect();
        listed.sort_by_key(|p| p.pid);
        Ok(listed)
    }
}

#[async_trait]
impl ProcessTermination for FakeProcessManager {
    async fn terminate_gracefully(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
        match handle.get_pid() {
            Some(pid) if mark_dead(&self.table, pid.0) => TerminationResult::Success,
            _ => TerminationResult::ProcessNotFound,
        }
    }

    async fn force_kill(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
        self.terminate_gracefully(handle).await
    }

    async fn find_child_processes(&self, _pid: ProcessId) -> anyhow::Result<Vec<ProcessId>> {
        Ok(Vec::new())
    }

    async fn terminate_process_tree(
        &self,
        root_pid: ProcessId,
        _grace: Duration,
    ) -> TerminationResult {
        if mark_dead(&self.table, root_pid.0) {
            TerminationResult::Success
        } else {
            TerminationResult::ProcessNotFound
        }
    }
}

impl ProcessManager for FakeProcessManager {}

// ---------------------------------------------------------------------------
// Engine

/// What the fake engine was asked to do
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Loaded { document: usize, url: String, properties: Vec<PropertyValue> },
    Stored { document: usize, url: String, properties: Vec<PropertyValue> },
    Closed { document: usize },
    Dispatched { frame: Option<String>, command: String, arguments: Vec<PropertyValue> },
    Disposed,
}

#[derive(Default)]
pub struct EngineState {
    events: Mutex<Vec<EngineEvent>>,
    next_document: AtomicUsize,
    /// Services reported by documents whose extension says nothing
    default_services: Mutex<Vec<String>>,
    block_store: AtomicBool,
    fail_store: AtomicBool,
    fail_close: AtomicBool,
    sever_on_store: AtomicBool,
    hang_next_liveness_check: AtomicBool,
    down: AtomicBool,
}

/// Scriptable engine reached through [`FakeConnector`]
#[derive(Clone, Default)]
pub struct FakeEngine {
    state: Arc<EngineState>,
}

impl FakeEngine {
    pub fn new() -> Self {
        let engine = Self::default();
        engine.set_default_services(&["com.sun.star.text.GenericTextDocument"]);
        engine
    }

    pub fn connector(&self) -> FakeConnector {
        FakeConnector {
            engine: self.clone(),
            attempts: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.state.events.lock().unwrap().clone()
    }

    pub fn stored(&self) -> Vec<(String, Vec<PropertyValue>)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                EngineEvent::Stored { url, properties, .. } => Some((url, properties)),
                _ => None,
            })
            .collect()
    }

    pub fn closed(&self) -> Vec<usize> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                EngineEvent::Closed { document } => Some(document),
                _ => None,
            })
            .collect()
    }

    pub fn loaded(&self) -> Vec<usize> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                EngineEvent::Loaded { document, .. } => Some(document),
                _ => None,
            })
            .collect()
    }

    pub fn set_default_services(&self, services: &[&str]) {
        *self.state.default_services.lock().unwrap() =
            services.iter().map(|s| s.to_string()).collect();
    }

    /// Stores never complete, as with a document that hangs the engine
    pub fn block_store(&self, block: bool) {
        self.state.block_store.store(block, Ordering::SeqCst);
    }

    pub fn fail_store(&self, fail: bool) {
        self.state.fail_store.store(fail, Ordering::SeqCst);
    }

    /// The engine goes away in the middle of the next store
    pub fn sever_on_store(&self, sever: bool) {
        self.state.sever_on_store.store(sever, Ordering::SeqCst);
    }

    /// The next liveness check never gets an answer, as with an engine that
    /// hung between two tasks
    pub fn hang_next_liveness_check(&self) {
        self.state.hang_next_liveness_check.store(true, Ordering::SeqCst);
    }

    pub fn fail_close(&self, fail: bool) {
        self.state.fail_close.store(fail, Ordering::SeqCst);
    }

    /// Refuse connections and report calls on existing ones as disposed
    pub fn set_down(&self, down: bool) {
        self.state.down.store(down, Ordering::SeqCst);
    }

    fn record(&self, event: EngineEvent) {
        self.state.events.lock().unwrap().push(event);
    }

    fn check_up(&self) -> Result<(), BridgeError> {
        if self.state.down.load(Ordering::SeqCst) {
            Err(BridgeError::Disposed)
        } else {
            Ok(())
        }
    }

    fn services_for(&self, path: &Path) -> HashSet<String> {
        let by_extension: &[&str] = match path.extension().and_then(|e| e.to_str()) {
            Some("odt" | "doc" | "docx" | "rtf" | "txt") => {
                &["com.sun.star.text.GenericTextDocument", "com.sun.star.text.TextDocument"]
            }
            Some("html" | "htm") => {
                &["com.sun.star.text.WebDocument", "com.sun.star.text.GenericTextDocument"]
            }
            Some("ods" | "xls" | "xlsx" | "csv") => &["com.sun.star.sheet.SpreadsheetDocument"],
            Some("odp" | "ppt" | "pptx") => &["com.sun.star.presentation.PresentationDocument"],
            Some("odg") => &["com.sun.star.drawing.DrawingDocument"],
            _ => &[],
        };

        if by_extension.is_empty() {
            self.state
                .default_services
                .lock()
                .unwrap()
                .iter()
                .cloned()
                .collect()
        } else {
            by_extension.iter().map(|s| s.to_string()).collect()
        }
    }
}

/// Connector counting its attempts
#[derive(Clone)]
pub struct FakeConnector {
    engine: FakeEngine,
    attempts: Arc<AtomicU32>,
}

impl FakeConnector {
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BridgeConnector for FakeConnector {
    async fn connect(
        &self,
        _endpoint: &EndpointAddress,
    ) -> Result<Box<dyn BridgeSession>, BridgeError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.engine.state.down.load(Ordering::SeqCst) {
            return Err(BridgeError::Io(std::io::Error::from(
                std::io::ErrorKind::ConnectionRefused,
            )));
        }
        Ok(Box::new(FakeSession {
            engine: self.engine.clone(),
        }))
    }
}

struct FakeSession {
    engine: FakeEngine,
}

#[async_trait]
impl BridgeSession for FakeSession {
    async fn desktop(&self, _service: &str) -> Result<Arc<dyn Desktop>, BridgeError> {
        self.engine.check_up()?;
        Ok(Arc::new(FakeDesktop {
            engine: self.engine.clone(),
        }))
    }

    async fn dispatch_helper(&self, _service: &str) -> Result<Arc<dyn DispatchHelper>, BridgeError> {
        self.engine.check_up()?;
        Ok(Arc::new(FakeDispatcher {
            engine: self.engine.clone(),
        }))
    }

    async fn dispose(&self) -> Result<(), BridgeError> {
        self.engine.record(EngineEvent::Disposed);
        Ok(())
    }
}

struct FakeDesktop {
    engine: FakeEngine,
}

#[async_trait]
impl Desktop for FakeDesktop {
    async fn load_component_from_url(
        &self,
        url: &str,
        _target_frame: &str,
        properties: &[PropertyValue],
    ) -> Result<Arc<dyn Document>, BridgeError> {
        self.engine.check_up()?;
        let path = url_to_path(url)?;
        let content = std::fs::read(&path)
            .map_err(|e| BridgeError::remote(format!("cannot load {url}: {e}")))?;

        let id = self.engine.state.next_document.fetch_add(1, Ordering::SeqCst);
        self.engine.record(EngineEvent::Loaded {
            document: id,
            url: url.to_string(),
            properties: properties.to_vec(),
        });

        Ok(Arc::new(FakeDocument {
            id,
            content,
            services: self.engine.services_for(&path),
            engine: self.engine.clone(),
        }))
    }

    async fn current_frame(&self) -> Result<Option<FrameRef>, BridgeError> {
        self.engine.check_up()?;
        Ok(None)
    }
}

struct FakeDispatcher {
    engine: FakeEngine,
}

#[async_trait]
impl DispatchHelper for FakeDispatcher {
    async fn execute_dispatch(
        &self,
        frame: Option<&FrameRef>,
        command: &str,
        _target_frame: &str,
        _search_flags: i32,
        arguments: &[PropertyValue],
    ) -> Result<(), BridgeError> {
        self.engine.check_up()?;
        if command == ABOUT_COMMAND
            && self
                .engine
                .state
                .hang_next_liveness_check
                .swap(false, Ordering::SeqCst)
        {
            std::future::pending::<()>().await;
        }
        self.engine.record(EngineEvent::Dispatched {
            frame: frame.map(|f| f.name.clone()),
            command: command.to_string(),
            arguments: arguments.to_vec(),
        });
        Ok(())
    }
}

pub struct FakeDocument {
    id: usize,
    content: Vec<u8>,
    services: HashSet<String>,
    engine: FakeEngine,
}

impl FakeDocument {
    pub fn with_services(id: usize, services: &[&str]) -> Self {
        Self {
            id,
            content: Vec::new(),
            services: services.iter().map(|s| s.to_string()).collect(),
            engine: FakeEngine::new(),
        }
    }
}

#[async_trait]
impl Document for FakeDocument {
    async fn supports_service(&self, service: &str) -> Result<bool, BridgeError> {
        self.engine.check_up()?;
        Ok(self.services.contains(service))
    }

    async fn frame(&self) -> Result<FrameRef, BridgeError> {
        self.engine.check_up()?;
        Ok(FrameRef {
            name: format!("frame-{}", self.id),
        })
    }

    async fn store_to_url(
        &self,
        url: &str,
        properties: &[PropertyValue],
    ) -> Result<(), BridgeError> {
        self.engine.check_up()?;
        if self.engine.state.block_store.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.engine.state.sever_on_store.load(Ordering::SeqCst) {
            self.engine.set_down(true);
            return Err(BridgeError::Disposed);
        }
        if self.engine.state.fail_store.load(Ordering::SeqCst) {
            return Err(BridgeError::remote("filter rejected the document"));
        }

        // Every format keeps the text as is
        std::fs::write(url_to_path(url)?, &self.content)?;
        self.engine.record(EngineEvent::Stored {
            document: self.id,
            url: url.to_string(),
            properties: properties.to_vec(),
        });
        Ok(())
    }

    async fn close(&self) -> Result<(), BridgeError> {
        self.engine.check_up()?;
        if self.engine.state.fail_close.load(Ordering::SeqCst) {
            return Err(BridgeError::remote("document is locked"));
        }
        self.engine.record(EngineEvent::Closed { document: self.id });
        Ok(())
    }
}

fn url_to_path(url: &str) -> Result<PathBuf, BridgeError> {
    url::Url::parse(url)
        .ok()
        .and_then(|url| url.to_file_path().ok())
        .ok_or_else(|| BridgeError::remote(format!("not a file URL: {url}")))
}

/// Look a property up by name
pub fn property<'a>(properties: &'a [PropertyValue], name: &str) -> Option<&'a PropertyData> {
    properties
        .iter()
        .find(|property| property.name == name)
        .map(|property| &property.value)
}

pub fn family_services(family: DocumentFamily) -> &'static str {
    DocumentFamily::DETECTION_ORDER
        .iter()
        .find(|(f, _)| *f == family)
        .map(|(_, service)| *service)
        .unwrap()
}
