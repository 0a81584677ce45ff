//! Scripted transport, connector and sink doubles shared by the unit tests.

use crate::engine::{EngineStatus, OutputSink};
use crate::error::{ConnectionError, TransportError};
use crate::response::OperationOutcome;
use crate::transport::{Connect, DeviceKey, Payload, Response, Transport};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// One scripted wire exchange.
#[derive(Debug, Clone)]
pub(crate) enum Step {
    /// Answer with this response.
    Respond(Response),
    /// Fail the exchange with an I/O error.
    Fail,
}

struct ScriptedTransport {
    steps: VecDeque<Step>,
    default_ok: bool,
    wire_calls: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedTransport {
    fn next(&mut self, call: String, default: Response) -> Result<Response, TransportError> {
        self.calls.lock().unwrap().push(call);
        self.wire_calls.fetch_add(1, Ordering::SeqCst);
        match self.steps.pop_front() {
            Some(Step::Respond(response)) => Ok(response),
            Some(Step::Fail) => Err(wire_failure()),
            None if self.default_ok => Ok(default),
            None => Err(wire_failure()),
        }
    }
}

fn wire_failure() -> TransportError {
    TransportError::Io(std::io::Error::new(
        std::io::ErrorKind::ConnectionReset,
        "scripted wire failure",
    ))
}

#[async_trait::async_trait]
impl Transport for ScriptedTransport {
    async fn read_coils(&mut self, address: u16, count: u16) -> Result<Response, TransportError> {
        self.next(
            format!("read_coils addr={address} count={count}"),
            Response::with_payload(Payload::Coils(vec![true])),
        )
    }

    async fn read_discrete_inputs(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Response, TransportError> {
        self.next(
            format!("read_discrete_inputs addr={address} count={count}"),
            Response::with_payload(Payload::Coils(vec![true])),
        )
    }

    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Response, TransportError> {
        self.next(
            format!("read_holding_registers addr={address} count={count}"),
            Response::with_payload(Payload::Registers(vec![0])),
        )
    }

    async fn read_input_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Response, TransportError> {
        self.next(
            format!("read_input_registers addr={address} count={count}"),
            Response::with_payload(Payload::Registers(vec![0])),
        )
    }

    async fn write_single_coil(
        &mut self,
        address: u16,
        value: bool,
    ) -> Result<Response, TransportError> {
        self.next(
            format!("write_single_coil addr={address} value={value}"),
            Response::ack(),
        )
    }

    async fn write_multiple_coils(
        &mut self,
        address: u16,
        values: &[bool],
    ) -> Result<Response, TransportError> {
        self.next(
            format!("write_multiple_coils addr={address} n={}", values.len()),
            Response::ack(),
        )
    }

    async fn write_single_register(
        &mut self,
        address: u16,
        value: u16,
    ) -> Result<Response, TransportError> {
        self.next(
            format!("write_single_register addr={address} value={value}"),
            Response::ack(),
        )
    }

    async fn write_multiple_registers(
        &mut self,
        address: u16,
        values: &[u16],
    ) -> Result<Response, TransportError> {
        self.next(
            format!("write_multiple_registers addr={address} n={}", values.len()),
            Response::ack(),
        )
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Connector producing [`ScriptedTransport`]s and counting connects, wire
/// calls and closes across all of them.
pub(crate) struct MockConnector {
    default_ok: bool,
    scripts: Mutex<VecDeque<Vec<Step>>>,
    fail_first: AtomicUsize,
    fail_after_first: AtomicUsize,
    connect_attempts: AtomicUsize,
    connects: AtomicUsize,
    wire_calls: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockConnector {
    /// Transports whose unscripted exchanges succeed.
    pub(crate) fn ok() -> Self {
        Self::with_default(true)
    }

    /// Transports whose unscripted exchanges fail.
    pub(crate) fn failing() -> Self {
        Self::with_default(false)
    }

    fn with_default(default_ok: bool) -> Self {
        Self {
            default_ok,
            scripts: Mutex::new(VecDeque::new()),
            fail_first: AtomicUsize::new(0),
            fail_after_first: AtomicUsize::new(0),
            connect_attempts: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
            wire_calls: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Scripts the next created transport's first exchanges; later
    /// exchanges fall back to the connector default.
    pub(crate) fn with_script(self, steps: Vec<Step>) -> Self {
        self.scripts.lock().unwrap().push_back(steps);
        self
    }

    /// Fails the first `n` connect attempts.
    pub(crate) fn with_connect_failures(self, n: usize) -> Self {
        self.fail_first.store(n, Ordering::SeqCst);
        self
    }

    /// Lets the first connect succeed and fails the `n` attempts after it.
    pub(crate) fn with_connect_failures_after_first(self, n: usize) -> Self {
        self.fail_after_first.store(n, Ordering::SeqCst);
        self
    }

    /// Successful connects so far.
    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Wire exchanges over all transports created by this connector.
    pub(crate) fn wire_calls(&self) -> usize {
        self.wire_calls.load(Ordering::SeqCst)
    }

    /// Transports closed so far.
    pub(crate) fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// The wire calls made, in order, as `"name key=value .."` strings.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn take_failure(&self, attempt: usize) -> bool {
        if take_one(&self.fail_first) {
            return true;
        }
        attempt > 0 && take_one(&self.fail_after_first)
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait::async_trait]
impl Connect for MockConnector {
    async fn connect(&self, key: &DeviceKey) -> Result<Box<dyn Transport>, ConnectionError> {
        let attempt = self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if self.take_failure(attempt) {
            return Err(ConnectionError::new(
                key.clone(),
                std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "scripted refusal"),
            ));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        let steps = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();
        Ok(Box::new(ScriptedTransport {
            steps: steps.into(),
            default_ok: self.default_ok,
            wire_calls: Arc::clone(&self.wire_calls),
            closed: Arc::clone(&self.closed),
            calls: Arc::clone(&self.calls),
        }))
    }
}

/// Sink recording everything the engine emits.
#[derive(Default)]
pub(crate) struct CollectSink {
    batches: Mutex<Vec<Vec<OperationOutcome>>>,
    statuses: Mutex<Vec<EngineStatus>>,
}

impl CollectSink {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn batches(&self) -> Vec<Vec<OperationOutcome>> {
        self.batches.lock().unwrap().clone()
    }

    pub(crate) fn statuses(&self) -> Vec<EngineStatus> {
        self.statuses.lock().unwrap().clone()
    }
}

impl OutputSink for CollectSink {
    fn notify(&self, outcomes: Vec<OperationOutcome>) {
        self.batches.lock().unwrap().push(outcomes);
    }

    fn notify_status(&self, status: EngineStatus) {
        self.statuses.lock().unwrap().push(status);
    }
}
