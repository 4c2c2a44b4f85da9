use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::BridgeError;

/// Step of a conversion task, carried by errors for diagnosis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Open,
    Detect,
    Compare,
    Save,
    Close,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Open => "open",
            Stage::Detect => "detect",
            Stage::Compare => "compare",
            Stage::Save => "save",
            Stage::Close => "close",
        };
        f.write_str(name)
    }
}

/// Error types for converter operations
#[derive(Error, Debug)]
pub enum ConverterError {
    #[error("Failed to launch office engine: {0}")]
    LaunchFailure(String),

    #[error("Office engine on port {port} unreachable after {attempts} attempts")]
    EngineUnreachable {
        port: u16,
        attempts: u32,
        #[source]
        last_error: Option<BridgeError>,
    },

    #[error("Bridge to office engine lost during {stage}")]
    BridgeLost {
        stage: Stage,
        #[source]
        source: Option<BridgeError>,
    },

    #[error("Unsupported conversion: {0}")]
    UnsupportedConversion(String),

    #[error("Conversion failed during {stage} of {}: {source}", target.display())]
    ConversionFailure {
        stage: Stage,
        target: PathBuf,
        #[source]
        source: BridgeError,
    },

    #[error("Task aborted by watchdog after {0:?}")]
    WatchdogTermination(Duration),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl ConverterError {
    pub fn launch_failure(msg: impl ToString) -> Self {
        Self::LaunchFailure(msg.to_string())
    }

    pub fn unsupported(msg: impl ToString) -> Self {
        Self::UnsupportedConversion(msg.to_string())
    }

    pub fn configuration_error(msg: impl ToString) -> Self {
        Self::ConfigurationError(msg.to_string())
    }

    pub fn bridge_lost(stage: Stage) -> Self {
        Self::BridgeLost {
            stage,
            source: None,
        }
    }

    /// Map a bridge failure of a task stage onto the taxonomy: a disposed
    /// bridge means the engine went away, anything else is the document's
    /// fault.
    pub fn from_stage(stage: Stage, target: impl Into<PathBuf>, error: BridgeError) -> Self {
        if error.is_disposed() {
            Self::BridgeLost {
                stage,
                source: Some(error),
            }
        } else {
            Self::ConversionFailure {
                stage,
                target: target.into(),
                source: error,
            }
        }
    }

    /// Whether the caller may reasonably retry the whole task; the next call
    /// restarts and reconnects the engine as needed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConverterError::EngineUnreachable { .. }
                | ConverterError::BridgeLost { .. }
                | ConverterError::WatchdogTermination(_)
        )
    }

    /// Check if this error indicates a caller error that will never succeed
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ConverterError::UnsupportedConversion(_) | ConverterError::ConfigurationError(_)
        )
    }
}
