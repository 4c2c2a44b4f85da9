use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use backon::{ConstantBuilder, Retryable};
use lobridge_core::{
    BridgeConnector, BridgeError, BridgeSession, Capabilities, ConverterError, Document, FrameRef,
    ProcessManager, PropertyValue,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::supervisor::{EngineGeneration, ProcessSupervisor};

/// Target frame documents are loaded into
const BLANK_FRAME: &str = "_blank";

/// An established bridge to a running engine.
///
/// Carries the "current document" slot of the task running on it: opening a
/// document replaces the slot, closing releases whatever the slot holds. Two
/// tasks interleaving on one connection therefore close each other's
/// documents, which is why tasks are serialized above this layer.
pub struct BridgeConnection {
    session: Box<dyn BridgeSession>,
    capabilities: Capabilities,
    generation: u64,
    fence: EngineGeneration,
    current: std::sync::Mutex<Option<Arc<dyn Document>>>,
}

impl BridgeConnection {
    fn new(
        session: Box<dyn BridgeSession>,
        capabilities: Capabilities,
        fence: EngineGeneration,
        generation: u64,
    ) -> Self {
        Self {
            session,
            capabilities,
            generation,
            fence,
            current: std::sync::Mutex::new(None),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the engine this connection was made to is still the current one
    pub fn is_current(&self) -> bool {
        self.fence.current() == self.generation
    }

    fn check(&self) -> Result<(), BridgeError> {
        if self.is_current() {
            Ok(())
        } else {
            Err(BridgeError::Disposed)
        }
    }

    /// The "is this endpoint answering" check
    pub async fn probe(&self) -> Result<(), BridgeError> {
        self.check()?;
        self.capabilities.probe().await
    }

    /// Load a document into a new hidden frame and make it the current one
    pub async fn open(
        &self,
        url: &str,
        properties: &[PropertyValue],
    ) -> Result<Arc<dyn Document>, BridgeError> {
        self.check()?;
        let document = self
            .capabilities
            .desktop
            .load_component_from_url(url, BLANK_FRAME, properties)
            .await?;
        *self.slot() = Some(document.clone());
        Ok(document)
    }

    pub fn current_document(&self) -> Option<Arc<dyn Document>> {
        self.slot().clone()
    }

    /// Close whatever document the slot holds. Returns false when the slot
    /// was empty.
    pub async fn close_current(&self) -> Result<bool, BridgeError> {
        let Some(document) = self.slot().take() else {
            return Ok(false);
        };
        self.check()?;
        document.close().await?;
        Ok(true)
    }

    pub async fn dispatch(
        &self,
        frame: &FrameRef,
        command: &str,
        arguments: &[PropertyValue],
    ) -> Result<(), BridgeError> {
        self.check()?;
        self.capabilities
            .dispatcher
            .execute_dispatch(Some(frame), command, &frame.name, 0, arguments)
            .await
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Arc<dyn Document>>> {
        // The slot holds no invariant a panicking holder could break
        self.current
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    async fn dispose(&self) {
        if let Err(e) = self.session.dispose().await {
            debug!(error = %e, "Bridge dispose failed");
        }
    }
}

/// Owns the bridge to one endpoint
pub struct ConnectionManager<C: BridgeConnector, M: ProcessManager> {
    connector: C,
    supervisor: Arc<ProcessSupervisor<M>>,
    connection: Mutex<Option<Arc<BridgeConnection>>>,
}

impl<C: BridgeConnector, M: ProcessManager> ConnectionManager<C, M> {
    pub fn new(connector: C, supervisor: Arc<ProcessSupervisor<M>>) -> Self {
        Self {
            connector,
            supervisor,
            connection: Mutex::new(None),
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// The established connection, if any, without checking it
    pub async fn current(&self) -> Option<Arc<BridgeConnection>> {
        self.connection.lock().await.clone()
    }

    /// Return a live connection, establishing one in at most `max_attempts`
    /// rounds of readiness wait, connect and probe.
    ///
    /// An existing connection whose probe gets no answer within the probe
    /// timeout means a hung engine: it is terminated and a fresh one started
    /// before connecting again.
    pub async fn ensure_connected(
        &self,
        max_attempts: u32,
    ) -> Result<Arc<BridgeConnection>, ConverterError> {
        let mut connection = self.connection.lock().await;
        let port = self.supervisor.endpoint().port();
        let retry_config = &self.supervisor.config().retry_config;
        let probe_timeout = retry_config.probe_timeout();

        if let Some(existing) = connection.take() {
            match tokio::time::timeout(probe_timeout, existing.probe()).await {
                Ok(Ok(())) => {
                    debug!(port, "Engine already connected");
                    *connection = Some(existing.clone());
                    return Ok(existing);
                }
                Ok(Err(e)) => {
                    info!(port, error = %e, "Existing connection is dead, reconnecting");
                    self.discard(&existing).await;
                }
                Err(_) => {
                    warn!(port, timeout = ?probe_timeout, "Engine stopped answering, recycling it");
                    self.discard(&existing).await;
                    self.supervisor.terminate().await;
                    self.supervisor.ensure_started().await?;
                }
            }
        }

        let max_attempts = max_attempts.max(1);
        let counter = AtomicU32::new(0);
        let attempts = &counter;

        let attempt = || async move {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(port, attempt, max_attempts, "Connecting to engine");

            self.supervisor
                .wait_for_readiness(retry_config.readiness_wait())
                .await?;

            tokio::time::timeout(probe_timeout, self.connect_once())
                .await
                .unwrap_or_else(|_| Err(BridgeError::Timeout(probe_timeout)))
                .map_err(|e| ConverterError::EngineUnreachable {
                    port,
                    attempts: attempt,
                    last_error: Some(e),
                })
        };

        let strategy = ConstantBuilder::default()
            .with_delay(retry_config.delay())
            .with_max_times(max_attempts as usize - 1);

        let established = attempt
            .retry(strategy)
            .when(|e: &ConverterError| matches!(e, ConverterError::EngineUnreachable { .. }))
            .notify(|e: &ConverterError, delay| {
                debug!(port, error = %e, delay = ?delay, "Engine not answering yet");
            })
            .await;

        match established {
            Ok(established) => {
                info!(
                    port,
                    attempts = attempts.load(Ordering::SeqCst),
                    "Connection to engine established"
                );
                *connection = Some(established.clone());
                Ok(established)
            }
            Err(e) => {
                warn!(port, error = %e, "Failed to connect to engine");
                Err(e)
            }
        }
    }

    /// Dispose the bridge, if any. Never fails.
    pub async fn close_connection(&self) {
        if let Some(existing) = self.connection.lock().await.take() {
            self.discard(&existing).await;
            info!(
                port = self.supervisor.endpoint().port(),
                "Connection to engine closed"
            );
        }
    }

    /// Dispose a connection without waiting on an engine that may be hung
    async fn discard(&self, connection: &BridgeConnection) {
        let limit = self.supervisor.config().retry_config.probe_timeout();
        if tokio::time::timeout(limit, connection.dispose()).await.is_err() {
            debug!(port = self.supervisor.endpoint().port(), "Bridge dispose timed out");
        }
    }

    async fn connect_once(&self) -> Result<Arc<BridgeConnection>, BridgeError> {
        let generation = self.supervisor.generation().current();
        let session = self.connector.connect(self.supervisor.endpoint()).await?;

        let capabilities = match Capabilities::acquire(session.as_ref()).await {
            Ok(capabilities) => capabilities,
            Err(e) => {
                let _ = session.dispose().await;
                return Err(e);
            }
        };

        let connection = BridgeConnection::new(
            session,
            capabilities,
            self.supervisor.generation().clone(),
            generation,
        );

        // Same check a pooled connection has to pass
        if let Err(e) = connection.probe().await {
            connection.dispose().await;
            return Err(e);
        }

        Ok(Arc::new(connection))
    }
}
