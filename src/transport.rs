//! The seam between the engine and the device driver.
//!
//! The engine never touches the Modbus frame format; it calls one
//! [`Transport`] method per wire function code and leaves the encoding to
//! the driver behind it. [`Connect`] abstracts how a transport for a given
//! [`DeviceKey`] is established, so the pool can recreate connections without
//! knowing whether the other end is a TCP socket or a serial line.
//!
//! Production implementations backed by `tokio-modbus` live in
//! [`crate::tokio_transport`]; tests substitute scripted mocks.

use crate::error::{ConnectionError, TransportError};
use std::fmt;

/// Identity of a device endpoint, e.g. `"192.168.1.40:502"` or
/// `"/dev/ttyUSB0"`. Used as the pool key selecting the connection an
/// operation runs on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(transparent)
)]
pub struct DeviceKey(String);

impl DeviceKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceKey {
    fn from(key: &str) -> Self {
        Self(key.to_owned())
    }
}

impl From<String> for DeviceKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// The data carried by a device response.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize), serde(rename_all = "snake_case"))]
pub enum Payload {
    /// Coil or discrete-input bits.
    Coils(Vec<bool>),
    /// Holding or input register words.
    Registers(Vec<u16>),
    /// A write acknowledgement; carries no data.
    Ack,
    /// No data; seen when the device answers with an exception.
    Empty,
}

impl Payload {
    /// An empty payload carries nothing worth emitting downstream.
    pub fn is_empty(&self) -> bool {
        match self {
            Payload::Coils(bits) => bits.is_empty(),
            Payload::Registers(words) => words.is_empty(),
            Payload::Ack => false,
            Payload::Empty => true,
        }
    }
}

/// A successfully completed wire exchange.
///
/// A device-level protocol exception is still a response; only transport
/// failures surface as [`TransportError`].
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub payload: Payload,
    pub exception_code: Option<u8>,
}

impl Response {
    pub fn with_payload(payload: Payload) -> Self {
        Self {
            payload,
            exception_code: None,
        }
    }

    pub fn ack() -> Self {
        Self::with_payload(Payload::Ack)
    }

    pub fn exception(code: u8) -> Self {
        Self {
            payload: Payload::Empty,
            exception_code: Some(code),
        }
    }

    /// True when the device acknowledged nothing: no data and no exception.
    /// Such responses produce no downstream output.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty() && self.exception_code.is_none()
    }
}

/// One live connection to a device, one method per wire function code.
#[async_trait::async_trait]
pub trait Transport: Send {
    async fn read_coils(&mut self, address: u16, count: u16) -> Result<Response, TransportError>;

    async fn read_discrete_inputs(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Response, TransportError>;

    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Response, TransportError>;

    async fn read_input_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Response, TransportError>;

    async fn write_single_coil(
        &mut self,
        address: u16,
        value: bool,
    ) -> Result<Response, TransportError>;

    async fn write_multiple_coils(
        &mut self,
        address: u16,
        values: &[bool],
    ) -> Result<Response, TransportError>;

    async fn write_single_register(
        &mut self,
        address: u16,
        value: u16,
    ) -> Result<Response, TransportError>;

    async fn write_multiple_registers(
        &mut self,
        address: u16,
        values: &[u16],
    ) -> Result<Response, TransportError>;

    /// Close the underlying transport. Failures are reported but callers
    /// treat them as non-fatal; device drivers' disconnects are themselves
    /// unreliable.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Establishes a fresh [`Transport`] for a device key.
#[async_trait::async_trait]
pub trait Connect: Send + Sync {
    async fn connect(&self, key: &DeviceKey) -> Result<Box<dyn Transport>, ConnectionError>;
}
