use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::EndpointAddress;

/// Configuration for the bounded connection retry loop.
///
/// The engine is not accept-ready right after it is spawned, so connecting is
/// retried a fixed number of times with a fixed delay between attempts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRetryConfig {
    /// Total number of connection attempts (1 means a single attempt, no retries)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between two attempts (in milliseconds)
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,

    /// How long each attempt waits for a freshly launched engine to settle
    /// before connecting (in milliseconds)
    #[serde(default = "default_readiness_wait_ms")]
    pub readiness_wait_ms: u64,

    /// Deadline for one liveness probe or connection attempt; an engine that
    /// does not answer within it counts as hung (in milliseconds)
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

impl Default for ConnectRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_delay_ms(),
            readiness_wait_ms: default_readiness_wait_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

impl ConnectRetryConfig {
    /// Validate the configuration and return errors if invalid
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_attempts == 0 {
            return Err(anyhow::anyhow!("max_attempts must be at least 1"));
        }

        if self.max_attempts > 100 {
            return Err(anyhow::anyhow!(
                "max_attempts should not exceed 100 to avoid hanging on a dead engine"
            ));
        }

        if self.delay_ms > 60_000 {
            return Err(anyhow::anyhow!("delay_ms should not exceed 60 seconds"));
        }

        if self.readiness_wait_ms > 60_000 {
            return Err(anyhow::anyhow!(
                "readiness_wait_ms should not exceed 60 seconds"
            ));
        }

        if self.probe_timeout_ms == 0 || self.probe_timeout_ms > 60_000 {
            return Err(anyhow::anyhow!(
                "probe_timeout_ms must be between 1 ms and 60 seconds"
            ));
        }

        Ok(())
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn readiness_wait(&self) -> Duration {
        Duration::from_millis(self.readiness_wait_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Main converter configuration, one per engine endpoint
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[builder(setter(into, strip_option))]
#[serde(rename_all = "camelCase")]
pub struct ConverterConfig {
    /// Port the engine accepts bridge connections on
    pub port: u16,

    /// Either the `soffice` executable itself or the installation root
    #[builder(default = "default_office_home()")]
    #[serde(default = "default_office_home")]
    pub office_home: PathBuf,

    /// Directory holding the per-endpoint user profiles, the system temp
    /// directory when unset
    #[builder(default)]
    #[serde(default)]
    pub profile_root: Option<PathBuf>,

    #[builder(default)]
    #[serde(default)]
    pub retry_config: ConnectRetryConfig,

    /// Deadline of a single conversion task (in milliseconds)
    #[builder(default = "default_watchdog_timeout_ms()")]
    #[serde(default = "default_watchdog_timeout_ms")]
    pub watchdog_timeout_ms: u64,

    /// Time a gracefully terminated engine gets before it is force killed
    #[builder(default = "default_termination_grace_ms()")]
    #[serde(default = "default_termination_grace_ms")]
    pub termination_grace_ms: u64,

    #[builder(default)]
    #[builder(setter(custom))]
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl ConverterConfig {
    pub fn builder() -> ConverterConfigBuilder {
        ConverterConfigBuilder::default()
    }

    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.port == 0 {
            return Err(anyhow::anyhow!("port must be a fixed, non-zero port"));
        }
        if self.watchdog_timeout_ms == 0 {
            return Err(anyhow::anyhow!("watchdog_timeout_ms must be positive"));
        }
        self.retry_config.validate()
    }

    pub fn endpoint(&self) -> EndpointAddress {
        EndpointAddress::new(self.port)
    }

    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog_timeout_ms)
    }

    pub fn termination_grace(&self) -> Duration {
        Duration::from_millis(self.termination_grace_ms)
    }

    /// Resolve the engine executable.
    ///
    /// A directory is treated as an installation root and resolved to
    /// `program/soffice` (`program/soffice.exe` on Windows); anything else is
    /// used verbatim.
    pub fn executable(&self) -> PathBuf {
        resolve_executable(&self.office_home, cfg!(windows))
    }

    pub fn profile_dir(&self) -> PathBuf {
        let root = self
            .profile_root
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        root.join(format!(".{}", self.endpoint().fingerprint()))
    }
}

impl ConverterConfigBuilder {
    pub fn env<T: ToString>(&mut self, key: T, value: T) -> &mut Self {
        let map = self.env.get_or_insert_with(HashMap::new);
        map.insert(key.to_string(), value.to_string());

        self
    }
}

pub(crate) fn resolve_executable(office_home: &std::path::Path, windows: bool) -> PathBuf {
    if !office_home.is_dir() {
        return office_home.to_path_buf();
    }

    let binary = if windows { "soffice.exe" } else { "soffice" };
    office_home.join("program").join(binary)
}

// Default value functions for serde
fn default_max_attempts() -> u32 {
    10
}
fn default_delay_ms() -> u64 {
    1_000
}
fn default_readiness_wait_ms() -> u64 {
    1_000
}
fn default_probe_timeout_ms() -> u64 {
    10_000
}
fn default_watchdog_timeout_ms() -> u64 {
    120_000
}
fn default_termination_grace_ms() -> u64 {
    1_000
}

fn default_office_home() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from("C:/Program Files/LibreOffice")
    } else if cfg!(target_os = "macos") {
        PathBuf::from("/Applications/LibreOffice.app/Contents")
    } else {
        PathBuf::from("/usr/lib/libreoffice")
    }
}
