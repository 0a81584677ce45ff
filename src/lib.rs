//! A library for executing logical Modbus read/write operations against
//! remote devices.
//!
//! The crate turns a logical operation (read coils, write register, ...)
//! plus per-request dynamic input into wire-level calls, executed through a
//! pooled per-device connection with bounded concurrency and a configurable
//! retry/backoff strategy. Wire encoding itself is delegated to
//! `tokio-modbus` behind the [`transport::Transport`] trait.
//!
//! ## Features
//!
//! - **Parameter preparation**: address, write value and even the target
//!   device are expressions resolved against each request; invalid input
//!   drops the single affected operation without touching the network.
//! - **Connection pooling**: one lazily created connection per device key,
//!   recreated on demand after failures, serialized so that at most one wire
//!   exchange is in flight per device.
//! - **Admission control**: a capacity bound on concurrent operations,
//!   either rejecting or queuing the excess.
//! - **Retry/backoff**: failed exchanges reconnect and re-attempt with a
//!   growing delay; bounded, unbounded and no-retry policies.
//! - **Response interpretation**: Modbus exception codes are annotated with
//!   their standard descriptions before results are emitted.
//!
//! ## Quick Start
//!
//! ```no_run
//! use modbus_exec_lib::admission::{AdmissionController, AdmissionPolicy};
//! use modbus_exec_lib::engine::{Engine, ErrorLatch, OutputSink};
//! use modbus_exec_lib::params::{ExprEvaluator, ParamBuilder, Request};
//! use modbus_exec_lib::protocol::Operation;
//! use modbus_exec_lib::response::OperationOutcome;
//! use modbus_exec_lib::retry::RetryPolicy;
//! use modbus_exec_lib::tokio_transport::TcpConnector;
//! use modbus_exec_lib::transport::DeviceKey;
//! use std::sync::Arc;
//!
//! struct PrintSink;
//!
//! impl OutputSink for PrintSink {
//!     fn notify(&self, outcomes: Vec<OperationOutcome>) {
//!         for outcome in outcomes {
//!             println!("{outcome:?}");
//!         }
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let builder = ParamBuilder::new(
//!         Operation::ReadHoldingRegisters,
//!         DeviceKey::from("192.168.1.40:502"),
//!         Arc::new(ExprEvaluator),
//!     )
//!     .count(4);
//!
//!     let engine = Engine::new(
//!         builder,
//!         Arc::new(TcpConnector::new()),
//!         RetryPolicy::default(),
//!         AdmissionController::new(AdmissionPolicy::CountingDrop, 5),
//!         Arc::new(ErrorLatch::new()),
//!         Arc::new(PrintSink),
//!     );
//!
//!     engine.process(&[Request::new()]).await;
//!     engine.shutdown().await;
//! }
//! ```

pub mod admission;
pub mod engine;
pub mod error;
pub mod params;
pub mod pool;
pub mod protocol;
pub mod response;
pub mod retry;
pub mod transport;

#[cfg_attr(docsrs, doc(cfg(feature = "serde")))]
#[cfg(feature = "serde")]
pub mod config;

#[cfg_attr(docsrs, doc(cfg(any(feature = "tcp", feature = "rtu"))))]
#[cfg(any(feature = "tcp", feature = "rtu"))]
pub mod tokio_transport;

#[cfg(test)]
pub(crate) mod testutil;
