//! Document conversion through a supervised LibreOffice engine.
//!
//! [`ProcessSupervisor`] owns the `soffice` process, [`ConnectionManager`]
//! owns the bridge to it and [`ConversionSession`] runs one task at a time
//! under a [`Watchdog`]. [`OfficeConverter`] wires them up for the current
//! platform.

mod connection;
mod converter;
mod factory;
mod session;
mod socket;
mod supervisor;
mod watchdog;

pub use connection::{BridgeConnection, ConnectionManager};
pub use converter::OfficeConverter;
pub use factory::{PlatformProcessManager, PlatformProcessManagerFactory};
pub use session::{ConversionSession, DocumentSource, TaskState, detect_family};
pub use socket::SocketConnector;
pub use supervisor::{EngineGeneration, EngineState, ProcessSupervisor};
pub use watchdog::Watchdog;

// Re-export core functionality
pub use lobridge_core::*;

/// Install a `tracing` subscriber honouring `RUST_LOG` (default `info`).
///
/// Set `LOBRIDGE_LOG_FORMAT=json` for JSON lines. Does nothing when a global
/// subscriber is already installed.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOBRIDGE_LOG_FORMAT").is_ok_and(|format| format == "json");

    let result = if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };

    if result.is_err() {
        tracing::debug!("Global tracing subscriber already installed");
    }
}
