//! `tokio-modbus` backed transports.
//!
//! [`ModbusTransport`] adapts a `tokio-modbus` client context to the
//! [`Transport`] trait; [`TcpConnector`] and [`SerialConnector`] establish
//! contexts for the pool. A device-level Modbus exception is mapped to a
//! response carrying its exception code, not to an error, so that it flows
//! to the output with a description attached instead of triggering retries.

use crate::error::{ConnectionError, TransportError};
use crate::transport::{Connect, DeviceKey, Payload, Response, Transport};
use log::debug;
use tokio_modbus::client::{Client, Reader, Writer};
use tokio_modbus::Slave;

/// One live `tokio-modbus` connection.
pub struct ModbusTransport {
    ctx: tokio_modbus::client::Context,
}

impl ModbusTransport {
    pub fn new(ctx: tokio_modbus::client::Context) -> Self {
        Self { ctx }
    }
}

/// Maps the nested `tokio-modbus` result: the outer error is a transport
/// failure, the inner error a device-reported exception.
fn map_bits(result: tokio_modbus::Result<Vec<bool>>) -> Result<Response, TransportError> {
    match result {
        Ok(Ok(bits)) => Ok(Response::with_payload(Payload::Coils(bits))),
        Ok(Err(code)) => Ok(Response::exception(u8::from(code))),
        Err(err) => Err(map_error(err)),
    }
}

fn map_words(result: tokio_modbus::Result<Vec<u16>>) -> Result<Response, TransportError> {
    match result {
        Ok(Ok(words)) => Ok(Response::with_payload(Payload::Registers(words))),
        Ok(Err(code)) => Ok(Response::exception(u8::from(code))),
        Err(err) => Err(map_error(err)),
    }
}

fn map_write(result: tokio_modbus::Result<()>) -> Result<Response, TransportError> {
    match result {
        Ok(Ok(())) => Ok(Response::ack()),
        Ok(Err(code)) => Ok(Response::exception(u8::from(code))),
        Err(err) => Err(map_error(err)),
    }
}

fn map_error(err: tokio_modbus::Error) -> TransportError {
    match err {
        tokio_modbus::Error::Transport(err) => TransportError::Io(err),
        other => TransportError::Driver(other.to_string()),
    }
}

#[async_trait::async_trait]
impl Transport for ModbusTransport {
    async fn read_coils(&mut self, address: u16, count: u16) -> Result<Response, TransportError> {
        map_bits(self.ctx.read_coils(address, count).await)
    }

    async fn read_discrete_inputs(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Response, TransportError> {
        map_bits(self.ctx.read_discrete_inputs(address, count).await)
    }

    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Response, TransportError> {
        map_words(self.ctx.read_holding_registers(address, count).await)
    }

    async fn read_input_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Response, TransportError> {
        map_words(self.ctx.read_input_registers(address, count).await)
    }

    async fn write_single_coil(
        &mut self,
        address: u16,
        value: bool,
    ) -> Result<Response, TransportError> {
        map_write(self.ctx.write_single_coil(address, value).await)
    }

    async fn write_multiple_coils(
        &mut self,
        address: u16,
        values: &[bool],
    ) -> Result<Response, TransportError> {
        map_write(self.ctx.write_multiple_coils(address, values).await)
    }

    async fn write_single_register(
        &mut self,
        address: u16,
        value: u16,
    ) -> Result<Response, TransportError> {
        map_write(self.ctx.write_single_register(address, value).await)
    }

    async fn write_multiple_registers(
        &mut self,
        address: u16,
        values: &[u16],
    ) -> Result<Response, TransportError> {
        map_write(self.ctx.write_multiple_registers(address, values).await)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.ctx
            .disconnect()
            .await
            .map_err(|err| TransportError::Driver(err.to_string()))
    }
}

/// Connects to Modbus TCP devices. The device key is the socket address,
/// e.g. `"192.168.1.40:502"`.
#[cfg(feature = "tcp")]
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector {
    slave: Option<u8>,
}

#[cfg(feature = "tcp")]
impl TcpConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Addresses every request at this unit id, for gateways that front a
    /// serial bus.
    pub fn with_slave(slave: u8) -> Self {
        Self { slave: Some(slave) }
    }
}

#[cfg(feature = "tcp")]
#[async_trait::async_trait]
impl Connect for TcpConnector {
    async fn connect(&self, key: &DeviceKey) -> Result<Box<dyn Transport>, ConnectionError> {
        let socket_addr: std::net::SocketAddr = key
            .as_str()
            .parse()
            .map_err(|err: std::net::AddrParseError| ConnectionError::new(key.clone(), err))?;
        debug!("connecting to modbus tcp device at {socket_addr}");
        let ctx = match self.slave {
            Some(unit) => {
                tokio_modbus::client::tcp::connect_slave(socket_addr, Slave(unit)).await
            }
            None => tokio_modbus::client::tcp::connect(socket_addr).await,
        }
        .map_err(|err| ConnectionError::new(key.clone(), err))?;
        debug!("successfully connected to modbus tcp device at {socket_addr}");
        Ok(Box::new(ModbusTransport::new(ctx)))
    }
}

/// The parity used for serial communication.
#[cfg(feature = "rtu")]
pub const PARITY: tokio_serial::Parity = tokio_serial::Parity::None;
/// The number of stop bits used for serial communication.
#[cfg(feature = "rtu")]
pub const STOP_BITS: tokio_serial::StopBits = tokio_serial::StopBits::One;
/// The number of data bits used for serial communication.
#[cfg(feature = "rtu")]
pub const DATA_BITS: tokio_serial::DataBits = tokio_serial::DataBits::Eight;

/// Creates a `tokio_serial::SerialPortBuilder` with the line parameters
/// used on the RS485 bus.
#[cfg(feature = "rtu")]
pub fn serial_port_builder(device: &str, baud_rate: u32) -> tokio_serial::SerialPortBuilder {
    tokio_serial::new(device, baud_rate)
        .parity(PARITY)
        .stop_bits(STOP_BITS)
        .data_bits(DATA_BITS)
        .flow_control(tokio_serial::FlowControl::None)
}

/// Connects to Modbus RTU devices. The device key is the serial port path,
/// e.g. `"/dev/ttyUSB0"`; baud rate and slave address are fixed per
/// connector.
#[cfg(feature = "rtu")]
#[derive(Debug, Clone, Copy)]
pub struct SerialConnector {
    baud_rate: u32,
    slave: u8,
}

#[cfg(feature = "rtu")]
impl SerialConnector {
    pub fn new(baud_rate: u32, slave: u8) -> Self {
        Self { baud_rate, slave }
    }
}

#[cfg(feature = "rtu")]
#[async_trait::async_trait]
impl Connect for SerialConnector {
    async fn connect(&self, key: &DeviceKey) -> Result<Box<dyn Transport>, ConnectionError> {
        debug!(
            "connecting to modbus rtu device {key} at {} baud",
            self.baud_rate
        );
        let builder = serial_port_builder(key.as_str(), self.baud_rate);
        let port = tokio_serial::SerialStream::open(&builder)
            .map_err(|err| ConnectionError::new(key.clone(), err))?;
        let ctx = tokio_modbus::client::rtu::attach_slave(port, Slave(self.slave));
        debug!("successfully connected to modbus rtu device {key}");
        Ok(Box::new(ModbusTransport::new(ctx)))
    }
}
