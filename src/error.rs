//! Error types shared across the execution engine.
//!
//! The taxonomy separates failures that must never be retried (parameter
//! preparation) from failures that drive the reconnect/retry machinery
//! (connection establishment and wire exchanges).

use crate::transport::DeviceKey;

/// A request could not be turned into wire parameters.
///
/// Preparation failures are terminal for the affected operation: retrying
/// would re-evaluate the same invalid input, so the engine logs and drops the
/// operation without touching the network.
#[derive(thiserror::Error, Debug)]
pub enum PreparationError {
    /// The address expression did not evaluate to an integer in `0..=65535`.
    #[error("address needs to evaluate to a non-negative integer: {0}")]
    InvalidAddress(String),

    /// The value expression failed to evaluate or produced the wrong shape
    /// for the operation (scalar where a sequence is needed, or vice versa).
    #[error("failed to prepare write value: {0}")]
    InvalidValue(String),

    /// A configured read count of zero.
    #[error("count must be a positive integer, got {0}")]
    InvalidCount(u16),

    /// The device expression failed to evaluate to a usable device key.
    #[error("failed to resolve device key: {0}")]
    InvalidDevice(String),
}

/// An expression could not be evaluated against the current request.
#[derive(thiserror::Error, Debug)]
#[error("{0}")]
pub struct EvalError(pub String);

/// A transport to the device could not be established.
#[derive(thiserror::Error, Debug)]
#[error("cannot connect to device '{key}'")]
pub struct ConnectionError {
    pub key: DeviceKey,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

impl ConnectionError {
    pub fn new(
        key: DeviceKey,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            key,
            source: source.into(),
        }
    }
}

/// A wire exchange failed after the connection was established.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    /// I/O failure on the underlying transport.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Any other failure reported by the device driver.
    #[error("driver error: {0}")]
    Driver(String),
}

/// A single execution attempt failed.
///
/// Both variants are transient from the retry controller's point of view; the
/// assumed cause is a stale transport, so the controller reconnects before
/// the next attempt.
#[derive(thiserror::Error, Debug)]
pub enum AttemptError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// A bounded retry policy ran out of attempts.
#[derive(thiserror::Error, Debug)]
#[error("out of retries after {attempts} attempts")]
pub struct RetriesExhausted {
    pub attempts: u32,
    #[source]
    pub last: AttemptError,
}

/// An operation was refused by the admission controller.
#[derive(thiserror::Error, Debug)]
#[error("concurrency capacity exhausted")]
pub struct AdmissionRejected;
