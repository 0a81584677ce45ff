//! Static engine configuration.
//!
//! Everything that is resolved once at startup lives here: the operation,
//! the default device, retry and admission settings. Per-request values
//! (address, write value, device key) stay expressions and are resolved by
//! the parameter builder on every invocation.
//!
//! ```yaml
//! operation: read_holding_registers
//! device: "192.168.1.40:502"
//! address: "0"
//! count: 4
//! retry:
//!   mode: bounded
//!   max_retries: 10
//! admission: counting_drop
//! capacity: 5
//! attempt_timeout: 500ms
//! ```

use crate::admission::{AdmissionController, AdmissionPolicy};
use crate::engine::{Engine, ErrorLatch, OutputSink, RejectMode};
use crate::params::{ExprEvaluator, ParamBuilder};
use crate::protocol::Operation;
use crate::retry::RetryPolicy;
use crate::transport::{Connect, DeviceKey};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// The configuration could not be loaded.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("cannot read configuration file '{path}'")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Parse(#[from] serde_yaml::Error),
}

fn default_address_expr() -> String {
    String::from("0")
}

fn default_admission_policy() -> AdmissionPolicy {
    AdmissionPolicy::CountingDrop
}

fn default_capacity() -> usize {
    AdmissionController::DEFAULT_CAPACITY
}

/// Startup configuration for one engine instance.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// The operation this engine issues.
    pub operation: Operation,
    /// Default device key, e.g. `"192.168.1.40:502"` or `"/dev/ttyUSB0"`.
    pub device: String,
    /// Optional expression resolving the device key per request.
    #[serde(default)]
    pub device_expr: Option<String>,
    /// Expression yielding the starting address.
    #[serde(default = "default_address_expr")]
    pub address: String,
    /// Expression yielding the write value; required by write operations.
    #[serde(default)]
    pub value: Option<String>,
    /// Number of coils/registers to read.
    #[serde(default)]
    pub count: Option<u16>,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "default_admission_policy")]
    pub admission: AdmissionPolicy,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default)]
    pub reject_mode: RejectMode,
    /// Cap on the duration of a single wire exchange.
    #[serde(default, with = "humantime_serde::option")]
    pub attempt_timeout: Option<Duration>,
    /// When set, a tripped error latch clears itself after this long.
    #[serde(default, with = "humantime_serde::option")]
    pub latch_cooldown: Option<Duration>,
}

impl EngineConfig {
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    /// Assembles an engine from this configuration, using the default
    /// expression evaluator.
    pub fn build_engine(&self, connector: Arc<dyn Connect>, sink: Arc<dyn OutputSink>) -> Engine {
        let mut builder = ParamBuilder::new(
            self.operation,
            DeviceKey::from(self.device.clone()),
            Arc::new(ExprEvaluator),
        )
        .address_expr(self.address.clone());
        if let Some(expr) = &self.value {
            builder = builder.value_expr(expr.clone());
        }
        if let Some(count) = self.count {
            builder = builder.count(count);
        }
        if let Some(expr) = &self.device_expr {
            builder = builder.device_expr(expr.clone());
        }

        let latch = Arc::new(match self.latch_cooldown {
            Some(cooldown) => ErrorLatch::with_cooldown(cooldown),
            None => ErrorLatch::new(),
        });
        let admission = AdmissionController::new(self.admission, self.capacity);

        let mut engine = Engine::new(builder, connector, self.retry, admission, latch, sink)
            .with_reject_mode(self.reject_mode);
        if let Some(timeout) = self.attempt_timeout {
            engine = engine.with_attempt_timeout(timeout);
        }
        engine
    }
}
