//! The execution engine tying the pieces together.
//!
//! For every request in a batch the engine builds wire parameters, acquires
//! an admission slot, runs the operation through the retry controller and
//! interprets the response. Results are handed to the [`OutputSink`] at most
//! once per batch, and only when there is something to emit.
//!
//! Under a bounded retry policy an exhausted operation trips the
//! [`ErrorLatch`]: the engine refuses all further operations until the latch
//! is reset (explicitly, or automatically after an optional cool-down). The
//! latch is shared state passed in by the host; a supervisor can observe and
//! clear it from outside.

use crate::admission::AdmissionController;
use crate::params::{ParamBuilder, Request};
use crate::pool::ConnectionPool;
use crate::protocol::Operation;
use crate::response::{interpret, OperationOutcome};
use crate::retry::{RetryingExecutor, RetryPolicy};
use crate::transport::{Connect, DeviceKey};
use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Process-wide latch, set when a bounded-retry operation runs out of
/// attempts. Once tripped the engine skips every operation without
/// attempting execution.
#[derive(Debug, Default)]
pub struct ErrorLatch {
    tripped: AtomicBool,
    tripped_at: Mutex<Option<Instant>>,
    cooldown: Option<Duration>,
}

impl ErrorLatch {
    /// A latch that only clears on an explicit [`reset`](Self::reset).
    pub fn new() -> Self {
        Self::default()
    }

    /// A latch that additionally clears itself once `cooldown` has elapsed
    /// since it was tripped.
    pub fn with_cooldown(cooldown: Duration) -> Self {
        Self {
            cooldown: Some(cooldown),
            ..Self::default()
        }
    }

    pub fn trip(&self) {
        self.tripped.store(true, Ordering::SeqCst);
        if let Ok(mut tripped_at) = self.tripped_at.lock() {
            *tripped_at = Some(Instant::now());
        }
    }

    pub fn reset(&self) {
        self.tripped.store(false, Ordering::SeqCst);
        if let Ok(mut tripped_at) = self.tripped_at.lock() {
            *tripped_at = None;
        }
    }

    pub fn is_tripped(&self) -> bool {
        if !self.tripped.load(Ordering::SeqCst) {
            return false;
        }
        if let (Some(cooldown), Ok(tripped_at)) = (self.cooldown, self.tripped_at.lock()) {
            if tripped_at.map_or(false, |at| at.elapsed() >= cooldown) {
                drop(tripped_at);
                self.reset();
                info!("error latch cool-down elapsed, resuming operations");
                return false;
            }
        }
        true
    }
}

/// Operator-visible engine state changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineStatus {
    /// A bounded-retry operation exhausted its attempts; the engine is now
    /// latched and skips all further operations.
    RetriesExhausted { device: DeviceKey, error: String },
}

/// Downstream consumer of execution results.
pub trait OutputSink: Send + Sync {
    /// Called at most once per processed batch, with at least one outcome.
    fn notify(&self, outcomes: Vec<OperationOutcome>);

    /// Called for operator-visible state changes. The default ignores them.
    fn notify_status(&self, status: EngineStatus) {
        let _ = status;
    }
}

/// What becomes of operations the admission controller rejects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum RejectMode {
    /// Log and drop, producing no output.
    #[default]
    Silent,
    /// Emit an error-shaped outcome so downstream sees the skip.
    ErrorOutput,
}

/// Orchestrates parameter preparation, admission, retried execution and
/// response interpretation. All methods take `&self`; the engine is shared
/// freely between concurrent callers.
pub struct Engine {
    builder: ParamBuilder,
    pool: Arc<ConnectionPool>,
    executor: RetryingExecutor,
    admission: AdmissionController,
    latch: Arc<ErrorLatch>,
    sink: Arc<dyn OutputSink>,
    reject_mode: RejectMode,
}

impl Engine {
    pub fn new(
        builder: ParamBuilder,
        connector: Arc<dyn Connect>,
        policy: RetryPolicy,
        admission: AdmissionController,
        latch: Arc<ErrorLatch>,
        sink: Arc<dyn OutputSink>,
    ) -> Self {
        let pool = Arc::new(ConnectionPool::new(connector));
        let executor = RetryingExecutor::new(Arc::clone(&pool), policy);
        Self {
            builder,
            pool,
            executor,
            admission,
            latch,
            sink,
            reject_mode: RejectMode::default(),
        }
    }

    pub fn with_reject_mode(mut self, mode: RejectMode) -> Self {
        self.reject_mode = mode;
        self
    }

    /// Caps the duration of each wire exchange.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.executor = self.executor.with_attempt_timeout(timeout);
        self
    }

    pub fn operation(&self) -> Operation {
        self.builder.operation()
    }

    pub fn latch(&self) -> &Arc<ErrorLatch> {
        &self.latch
    }

    /// Processes one batch of requests. Preparation failures drop the single
    /// affected operation; the rest of the batch continues. The sink is
    /// notified once with all produced outcomes, or not at all.
    pub async fn process(&self, batch: &[Request]) {
        let operation = self.builder.operation();
        let mut output = Vec::new();
        for request in batch {
            if self.latch.is_tripped() {
                info!("skipping request since engine is in error");
                continue;
            }
            let params = match self.builder.build(request) {
                Ok(params) => params,
                Err(err) => {
                    warn!("dropping request: {err}");
                    continue;
                }
            };
            let slot = match self.admission.admit().await {
                Ok(slot) => slot,
                Err(rejected) => {
                    warn!("skipping {operation}: {rejected}");
                    if self.reject_mode == RejectMode::ErrorOutput {
                        output.push(OperationOutcome::skipped(params, rejected.to_string()));
                    }
                    continue;
                }
            };
            match self.executor.execute(operation, &params).await {
                Ok(Some(response)) => {
                    if let Some(outcome) = interpret(response, params) {
                        output.push(outcome);
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    error!("aborting retry and putting engine in error: {err}");
                    self.sink.notify_status(EngineStatus::RetriesExhausted {
                        device: params.device.clone(),
                        error: err.to_string(),
                    });
                    self.latch.trip();
                }
            }
            drop(slot);
        }
        if !output.is_empty() {
            self.sink.notify(output);
        }
    }

    /// Shuts the admission gate and closes every pooled connection. Never
    /// fails; close errors are logged.
    pub async fn shutdown(&self) {
        self.admission.close();
        self.pool.close_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::AdmissionPolicy;
    use crate::params::{ExprEvaluator, Value, WriteValue};
    use crate::testutil::{CollectSink, MockConnector, Step};
    use crate::transport::{Payload, Response};

    fn default_builder(operation: Operation) -> ParamBuilder {
        ParamBuilder::new(
            operation,
            DeviceKey::from("10.1.1.1:502"),
            Arc::new(ExprEvaluator),
        )
    }

    fn engine(
        builder: ParamBuilder,
        connector: Arc<MockConnector>,
        policy: RetryPolicy,
        sink: Arc<CollectSink>,
    ) -> Engine {
        Engine::new(
            builder,
            connector,
            policy,
            AdmissionController::new(
                AdmissionPolicy::CountingDrop,
                AdmissionController::DEFAULT_CAPACITY,
            ),
            Arc::new(ErrorLatch::new()),
            sink,
        )
    }

    #[tokio::test]
    async fn read_coils_emits_one_result_echoing_params() {
        let connector = Arc::new(MockConnector::ok());
        let sink = Arc::new(CollectSink::new());
        let engine = engine(
            default_builder(Operation::ReadCoils),
            Arc::clone(&connector),
            RetryPolicy::default(),
            Arc::clone(&sink),
        );

        engine.process(&[Request::new()]).await;

        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        let outcome = &batches[0][0];
        assert_eq!(outcome.params.address, 0);
        assert_eq!(outcome.params.count, None);
        assert_eq!(outcome.params.value, None);
        assert_eq!(outcome.payload, Payload::Coils(vec![true]));
        assert_eq!(connector.wire_calls(), 1);
    }

    #[tokio::test]
    async fn falsy_response_emits_nothing() {
        let connector = Arc::new(MockConnector::ok().with_script(vec![Step::Respond(
            Response::with_payload(Payload::Coils(Vec::new())),
        )]));
        let sink = Arc::new(CollectSink::new());
        let engine = engine(
            default_builder(Operation::ReadCoils),
            Arc::clone(&connector),
            RetryPolicy::default(),
            Arc::clone(&sink),
        );

        engine.process(&[Request::new()]).await;

        assert_eq!(connector.wire_calls(), 1);
        assert!(sink.batches().is_empty());
    }

    #[tokio::test]
    async fn preparation_failure_drops_only_the_affected_operation() {
        let connector = Arc::new(MockConnector::ok());
        let sink = Arc::new(CollectSink::new());
        let builder = default_builder(Operation::ReadCoils).address_expr("base");
        let engine = engine(
            builder,
            Arc::clone(&connector),
            RetryPolicy::default(),
            Arc::clone(&sink),
        );

        // First request lacks the `base` field and is dropped; the second
        // one goes through.
        let batch = vec![
            Request::new(),
            Request::new().with_field("base", Value::Int(3)),
        ];
        engine.process(&batch).await;

        assert_eq!(connector.wire_calls(), 1);
        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0].params.address, 3);
    }

    #[tokio::test]
    async fn preparation_failure_makes_zero_wire_calls() {
        let connector = Arc::new(MockConnector::ok());
        let sink = Arc::new(CollectSink::new());
        let builder = default_builder(Operation::WriteSingleRegister).value_expr("missing_field");
        let engine = engine(
            builder,
            Arc::clone(&connector),
            RetryPolicy::default(),
            Arc::clone(&sink),
        );

        engine.process(&[Request::new()]).await;

        assert_eq!(connector.wire_calls(), 0);
        assert_eq!(connector.connects(), 0);
        assert!(sink.batches().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_latch_the_engine() {
        let connector = Arc::new(MockConnector::failing());
        let sink = Arc::new(CollectSink::new());
        let engine = engine(
            default_builder(Operation::ReadCoils),
            Arc::clone(&connector),
            RetryPolicy::Bounded { max_retries: 2 },
            Arc::clone(&sink),
        );

        engine.process(&[Request::new()]).await;

        assert!(engine.latch().is_tripped());
        assert_eq!(connector.wire_calls(), 3);
        let statuses = sink.statuses();
        assert_eq!(statuses.len(), 1);
        assert!(matches!(
            &statuses[0],
            EngineStatus::RetriesExhausted { device, .. }
                if device == &DeviceKey::from("10.1.1.1:502")
        ));

        // A subsequent operation is skipped without a single wire call.
        engine.process(&[Request::new()]).await;
        assert_eq!(connector.wire_calls(), 3);
        assert!(sink.batches().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn latch_reset_resumes_operations() {
        let connector = Arc::new(MockConnector::failing());
        let sink = Arc::new(CollectSink::new());
        let engine = engine(
            default_builder(Operation::ReadCoils),
            Arc::clone(&connector),
            RetryPolicy::Bounded { max_retries: 0 },
            Arc::clone(&sink),
        );

        engine.process(&[Request::new()]).await;
        assert!(engine.latch().is_tripped());
        let calls = connector.wire_calls();

        engine.latch().reset();
        engine.process(&[Request::new()]).await;
        assert!(connector.wire_calls() > calls);
    }

    #[tokio::test]
    async fn rejected_operations_can_produce_error_output() {
        let connector = Arc::new(MockConnector::ok());
        let sink = Arc::new(CollectSink::new());
        let engine = Engine::new(
            default_builder(Operation::ReadCoils),
            Arc::clone(&connector) as Arc<dyn Connect>,
            RetryPolicy::default(),
            AdmissionController::new(AdmissionPolicy::CountingDrop, 0),
            Arc::new(ErrorLatch::new()),
            Arc::clone(&sink) as Arc<dyn OutputSink>,
        )
        .with_reject_mode(RejectMode::ErrorOutput);

        engine.process(&[Request::new()]).await;

        assert_eq!(connector.wire_calls(), 0);
        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        assert!(batches[0][0].error.is_some());
        assert_eq!(batches[0][0].payload, Payload::Empty);
    }

    #[tokio::test]
    async fn write_flows_through_to_the_wire() {
        let connector = Arc::new(MockConnector::ok());
        let sink = Arc::new(CollectSink::new());
        let builder = default_builder(Operation::WriteSingleCoil)
            .address_expr("4")
            .value_expr("true");
        let engine = engine(
            builder,
            Arc::clone(&connector),
            RetryPolicy::default(),
            Arc::clone(&sink),
        );

        engine.process(&[Request::new()]).await;

        assert_eq!(
            connector.calls(),
            vec![String::from("write_single_coil addr=4 value=true")]
        );
        let batches = sink.batches();
        assert_eq!(batches[0][0].params.value, Some(WriteValue::Coil(true)));
        assert_eq!(batches[0][0].payload, Payload::Ack);
    }

    #[tokio::test]
    async fn cooldown_latch_auto_resets() {
        let latch = ErrorLatch::with_cooldown(Duration::from_millis(5));
        latch.trip();
        assert!(latch.is_tripped());
        std::thread::sleep(Duration::from_millis(10));
        assert!(!latch.is_tripped());
    }
}
