use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use lobridge_core::{
    ConverterConfig, ConverterError, FormatRegistry, ProcessManagerFactory, ProtocolNegotiator,
};
use tracing::info;

use crate::factory::{PlatformProcessManager, PlatformProcessManagerFactory};
use crate::session::{ConversionSession, DocumentSource};
use crate::socket::SocketConnector;

/// Document converter bound to one engine on the local machine.
///
/// The engine is launched (or adopted) on first use and recycled whenever a
/// task overruns its deadline. Tasks are serialized; use one converter per
/// port for parallel work.
pub struct OfficeConverter<N: ProtocolNegotiator> {
    session: ConversionSession<SocketConnector<N>, PlatformProcessManager>,
}

impl<N: ProtocolNegotiator> OfficeConverter<N> {
    pub fn new(config: ConverterConfig, negotiator: N) -> Result<Self, ConverterError> {
        Self::with_registry(config, negotiator, FormatRegistry::builtin())
    }

    pub fn with_registry(
        config: ConverterConfig,
        negotiator: N,
        registry: FormatRegistry,
    ) -> Result<Self, ConverterError> {
        info!(
            port = config.port,
            platform = PlatformProcessManagerFactory::platform_name(),
            "Creating office converter"
        );
        let manager = Arc::new(PlatformProcessManagerFactory::create_process_manager());
        let session = ConversionSession::new(
            config,
            manager,
            SocketConnector::new(negotiator),
            Arc::new(registry),
        )?;
        Ok(Self { session })
    }

    pub fn session(&self) -> &ConversionSession<SocketConnector<N>, PlatformProcessManager> {
        &self.session
    }

    /// Convert a file, options picked from the format registry
    pub async fn convert(&self, source: &Path, target: &Path) -> Result<(), ConverterError> {
        self.session
            .convert(source.into(), target, &HashMap::new())
            .await
    }

    pub async fn convert_with_options(
        &self,
        source: DocumentSource,
        target: &Path,
        overrides: &HashMap<String, String>,
    ) -> Result<(), ConverterError> {
        self.session.convert(source, target, overrides).await
    }

    pub async fn compare(
        &self,
        first: &Path,
        second: &Path,
        result: &Path,
    ) -> Result<(), ConverterError> {
        self.session.compare_and_save(first, second, result).await
    }

    /// Close the connection and terminate the engine
    pub async fn shutdown(self) {
        self.session.shutdown().await;
    }
}
