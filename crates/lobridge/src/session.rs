//! One conversion or comparison task at a time against a supervised engine.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use lobridge_core::{
    BridgeConnector, BridgeError, COMPARE_DOCUMENTS_COMMAND, ConverterConfig, ConverterError,
    Document, DocumentFamily, FormatRegistry, OptionMap, ProcessManager, PropertyValue, Stage, pdf,
};
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::connection::{BridgeConnection, ConnectionManager};
use crate::supervisor::ProcessSupervisor;
use crate::watchdog::Watchdog;

/// Filter the comparison result is saved with
const COMPARE_RESULT_FILTER: &str = "MS Word 2007 XML";

/// Where a document to convert comes from
pub enum DocumentSource {
    Path(PathBuf),
    /// Bytes of a document; staged to a temporary file for the engine to load
    Stream(Box<dyn AsyncRead + Send + Unpin>),
}

impl DocumentSource {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Stream(Box::new(std::io::Cursor::new(bytes.into())))
    }
}

impl From<PathBuf> for DocumentSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<&Path> for DocumentSource {
    fn from(path: &Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}

/// Progress of the latest task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    EngineReady,
    DocumentOpen,
    Comparing,
    Saved,
    Closed,
    Failed,
}

#[derive(Debug)]
struct StateCell(std::sync::Mutex<TaskState>);

impl StateCell {
    fn get(&self) -> TaskState {
        *self.0.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn set(&self, state: TaskState) {
        let mut current = self.0.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        debug!(from = ?*current, to = ?state, "Task state");
        *current = state;
    }
}

pub struct ConversionSession<C: BridgeConnector, M: ProcessManager> {
    supervisor: Arc<ProcessSupervisor<M>>,
    connections: ConnectionManager<C, M>,
    registry: Arc<FormatRegistry>,
    watchdog_timeout: Duration,
    max_attempts: u32,
    /// One task per connection: its "current document" slot is shared
    task_lock: Mutex<()>,
    state: StateCell,
}

impl<C: BridgeConnector, M: ProcessManager + 'static> ConversionSession<C, M> {
    pub fn new(
        config: ConverterConfig,
        manager: Arc<M>,
        connector: C,
        registry: Arc<FormatRegistry>,
    ) -> Result<Self, ConverterError> {
        config
            .validate()
            .map_err(|e| ConverterError::configuration_error(format!("Invalid config: {e}")))?;

        let watchdog_timeout = config.watchdog_timeout();
        let max_attempts = config.retry_config.max_attempts;
        let supervisor = Arc::new(ProcessSupervisor::new(config, manager));
        let connections = ConnectionManager::new(connector, supervisor.clone());

        Ok(Self {
            supervisor,
            connections,
            registry,
            watchdog_timeout,
            max_attempts,
            task_lock: Mutex::new(()),
            state: StateCell(std::sync::Mutex::new(TaskState::Idle)),
        })
    }

    pub fn supervisor(&self) -> &Arc<ProcessSupervisor<M>> {
        &self.supervisor
    }

    pub fn connections(&self) -> &ConnectionManager<C, M> {
        &self.connections
    }

    pub fn registry(&self) -> &FormatRegistry {
        &self.registry
    }

    pub fn task_state(&self) -> TaskState {
        self.state.get()
    }

    /// Convert `source` into `target`, the format given by the target's
    /// extension. Non-empty `overrides` replace the registry's options.
    pub async fn convert(
        &self,
        source: DocumentSource,
        target: &Path,
        overrides: &HashMap<String, String>,
    ) -> Result<(), ConverterError> {
        let target_extension = extension_of(target);
        if !self.registry.is_supported_extension(&target_extension) {
            return Err(ConverterError::unsupported(format!(
                "unsupported file format: {}",
                target.display()
            )));
        }

        let _task = self.task_lock.lock().await;
        let connection = self.prepare().await?;

        let task = ConvertTask {
            connection: &connection,
            state: &self.state,
            registry: &self.registry,
            target,
            target_extension: &target_extension,
            overrides,
        };
        self.guarded(&connection, target, task.run(source)).await?;

        info!(target = %target.display(), "Conversion completed");
        Ok(())
    }

    /// Compare `first` against `second` and save the result, with changes
    /// tracked, to `result`
    pub async fn compare_and_save(
        &self,
        first: &Path,
        second: &Path,
        result: &Path,
    ) -> Result<(), ConverterError> {
        let _task = self.task_lock.lock().await;
        let connection = self.prepare().await?;

        let task = CompareTask {
            connection: &connection,
            state: &self.state,
            first,
            second,
            result,
        };
        self.guarded(&connection, result, task.run()).await?;

        info!(result = %result.display(), "Comparison completed");
        Ok(())
    }

    /// Close the bridge and stop the engine
    pub async fn shutdown(&self) {
        info!(
            port = self.supervisor.endpoint().port(),
            "Closing connection and terminating engine"
        );
        self.connections.close_connection().await;
        self.supervisor.terminate().await;
    }

    async fn prepare(&self) -> Result<Arc<BridgeConnection>, ConverterError> {
        self.state.set(TaskState::Idle);
        let connection = async {
            self.supervisor.ensure_started().await?;
            self.connections.ensure_connected(self.max_attempts).await
        }
        .await
        .inspect_err(|_| self.state.set(TaskState::Failed))?;
        self.state.set(TaskState::EngineReady);
        Ok(connection)
    }

    /// Run `task` under the watchdog, then make sure the document slot is
    /// released whatever happened.
    async fn guarded(
        &self,
        connection: &BridgeConnection,
        target: &Path,
        task: impl Future<Output = Result<(), ConverterError>>,
    ) -> Result<(), ConverterError> {
        let supervisor = self.supervisor.clone();
        let watchdog = Watchdog::arm(self.watchdog_timeout, move || async move {
            supervisor.terminate().await;
        });

        let outcome = tokio::select! {
            outcome = task => outcome,
            _ = watchdog.fired() => Err(ConverterError::WatchdogTermination(watchdog.timeout())),
        };

        let outcome = match outcome {
            Err(e) if watchdog.has_fired() && !matches!(e, ConverterError::WatchdogTermination(_)) => {
                debug!(error = %e, "Task failed after the watchdog fired");
                Err(ConverterError::WatchdogTermination(watchdog.timeout()))
            }
            other => other,
        };
        watchdog.disarm();

        let closed = connection.close_current().await;
        let result = finish(outcome, closed, target);
        self.state.set(if result.is_ok() {
            TaskState::Closed
        } else {
            TaskState::Failed
        });
        result
    }
}

/// Combine the task outcome with the result of closing its document. A close
/// failure never hides the task's own error.
fn finish(
    outcome: Result<(), ConverterError>,
    closed: Result<bool, BridgeError>,
    target: &Path,
) -> Result<(), ConverterError> {
    match (outcome, closed) {
        (Err(e), Err(close_error)) => {
            warn!(error = %close_error, "Failed to close document after a failed task");
            Err(e)
        }
        (Err(e), Ok(_)) => Err(e),
        (Ok(()), Ok(_)) => Ok(()),
        (Ok(()), Err(close_error)) => {
            // The output is already written
            warn!(
                target = %target.display(),
                stage = %Stage::Close,
                error = %close_error,
                "Failed to close document"
            );
            Ok(())
        }
    }
}

struct ConvertTask<'a> {
    connection: &'a BridgeConnection,
    state: &'a StateCell,
    registry: &'a FormatRegistry,
    target: &'a Path,
    target_extension: &'a str,
    overrides: &'a HashMap<String, String>,
}

impl ConvertTask<'_> {
    async fn run(self, source: DocumentSource) -> Result<(), ConverterError> {
        let (document, source_extension) = match source {
            DocumentSource::Path(path) => {
                let document = open_document(self.connection, &path, self.target).await?;
                (document, Some(extension_of(&path)))
            }
            DocumentSource::Stream(reader) => {
                let staged = stage_stream(reader).await?;
                let document = open_document(self.connection, staged.path(), self.target).await;
                if let Err(e) = staged.close() {
                    warn!(error = %e, "Failed to delete staged document");
                }
                (document?, None)
            }
        };
        self.state.set(TaskState::DocumentOpen);

        let family = match source_extension
            .as_deref()
            .and_then(|extension| self.registry.family_for_extension(extension))
        {
            Some(family) => Some(family),
            None => detect_family(document.as_ref())
                .await
                .map_err(|e| ConverterError::from_stage(Stage::Detect, self.target, e))?,
        };
        debug!(family = ?family, target_extension = self.target_extension, "Resolving store options");

        let options = if self.overrides.is_empty() {
            self.registry.options_for(family, self.target_extension)?
        } else {
            pdf::override_options(self.target_extension, family, self.overrides)
        };

        store(document.as_ref(), self.target, &options).await?;
        self.state.set(TaskState::Saved);
        Ok(())
    }
}

struct CompareTask<'a> {
    connection: &'a BridgeConnection,
    state: &'a StateCell,
    first: &'a Path,
    second: &'a Path,
    result: &'a Path,
}

impl CompareTask<'_> {
    async fn run(self) -> Result<(), ConverterError> {
        let document = open_document(self.connection, self.first, self.result).await?;
        self.state.set(TaskState::DocumentOpen);

        let second_url = file_url(self.second)?;
        let frame = document
            .frame()
            .await
            .map_err(|e| ConverterError::from_stage(Stage::Compare, self.result, e))?;
        self.state.set(TaskState::Comparing);
        debug!(frame = %frame.name, second = %second_url, "Comparing documents");
        self.connection
            .dispatch(
                &frame,
                COMPARE_DOCUMENTS_COMMAND,
                &[PropertyValue::new("URL", second_url)],
            )
            .await
            .map_err(|e| ConverterError::from_stage(Stage::Compare, self.result, e))?;

        let options = OptionMap::new().with("FilterName", COMPARE_RESULT_FILTER);
        store(document.as_ref(), self.result, &options).await?;
        self.state.set(TaskState::Saved);
        Ok(())
    }
}

async fn open_document(
    connection: &BridgeConnection,
    path: &Path,
    target: &Path,
) -> Result<Arc<dyn Document>, ConverterError> {
    let url = file_url(path)?;
    let properties = [
        PropertyValue::new("UpdateDocMode", 0),
        PropertyValue::new("Hidden", true),
    ];
    debug!(url = %url, "Opening document");
    connection
        .open(&url, &properties)
        .await
        .map_err(|e| ConverterError::from_stage(Stage::Open, target, e))
}

async fn store(
    document: &dyn Document,
    target: &Path,
    options: &OptionMap,
) -> Result<(), ConverterError> {
    let url = file_url(target)?;
    debug!(url = %url, "Storing document");
    document
        .store_to_url(&url, &options.to_properties())
        .await
        .map_err(|e| ConverterError::from_stage(Stage::Save, target, e))
}

/// Family of a loaded document from the services it supports
pub async fn detect_family(document: &dyn Document) -> Result<Option<DocumentFamily>, BridgeError> {
    let mut supported = Vec::new();
    for (_, service) in DocumentFamily::DETECTION_ORDER {
        if document.supports_service(service).await? {
            supported.push(service);
        }
    }
    Ok(DocumentFamily::detect(|service| {
        supported.iter().any(|candidate| *candidate == service)
    }))
}

async fn stage_stream(
    mut reader: Box<dyn AsyncRead + Send + Unpin>,
) -> Result<NamedTempFile, ConverterError> {
    let staged = tempfile::Builder::new()
        .prefix("lobridge-")
        .suffix("-document-from-stream")
        .tempfile()?;

    let mut file = tokio::fs::File::from_std(staged.reopen()?);
    tokio::io::copy(&mut reader, &mut file).await?;
    file.flush().await?;
    debug!(path = %staged.path().display(), "Staged document stream");
    Ok(staged)
}

fn file_url(path: &Path) -> Result<String, ConverterError> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    url::Url::from_file_path(&absolute)
        .map(String::from)
        .map_err(|_| {
            ConverterError::configuration_error(format!(
                "cannot build a file URL for {}",
                path.display()
            ))
        })
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|extension| extension.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase()
}
