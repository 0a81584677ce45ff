//! The retry/backoff state machine around a single operation.
//!
//! An attempt that fails at the transport level is assumed to have been
//! caused by a stale connection: the controller waits out a backoff delay,
//! forces the pool to recreate the connection for the affected device, and
//! attempts again. How that loop terminates is the [`RetryPolicy`]:
//!
//! - [`RetryPolicy::Bounded`] gives up after a configured number of
//!   re-attempts and surfaces [`RetriesExhausted`] so the engine can latch
//!   its error state.
//! - [`RetryPolicy::Forever`] never gives up; once the attempt count passes
//!   a threshold the per-attempt delay is replaced by one long fixed delay.
//! - [`RetryPolicy::ContinueOnFail`] makes no retry at all; a failure logs
//!   and yields an empty result.
//!
//! The backoff delay grows with the attempt index (attempt `n` waits `n`
//! seconds), so the first retry happens immediately and pressure on an
//! unresponsive device ramps down gradually.

use crate::error::{AttemptError, RetriesExhausted, TransportError};
use crate::params::{RequestParams, WriteValue};
use crate::pool::ConnectionPool;
use crate::protocol::Operation;
use crate::transport::{Response, Transport};
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;

/// When and how failed attempts are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case", tag = "mode")
)]
pub enum RetryPolicy {
    /// Retry up to `max_retries` times, then give up for good.
    Bounded { max_retries: u32 },
    /// Retry forever; after `long_delay_after` attempts the backoff is
    /// replaced by `long_delay` between attempts.
    Forever {
        long_delay_after: u32,
        #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
        long_delay: Duration,
    },
    /// A single attempt; failure degrades to an empty pass-through result.
    ContinueOnFail,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_RETRIES: u32 = 10;
    pub const DEFAULT_LONG_DELAY: Duration = Duration::from_secs(60);

    /// The delay before re-attempt number `attempt` (zero-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        if let RetryPolicy::Forever {
            long_delay_after,
            long_delay,
        } = self
        {
            if attempt >= *long_delay_after {
                return *long_delay;
            }
        }
        Duration::from_secs(u64::from(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::Bounded {
            max_retries: Self::DEFAULT_MAX_RETRIES,
        }
    }
}

/// Executes operations through the pool, applying the retry policy.
///
/// This is a decorator over the single-attempt execution path: the attempt
/// itself acquires the device handle, serializes on its mutex and performs
/// exactly one wire exchange.
pub struct RetryingExecutor {
    pool: Arc<ConnectionPool>,
    policy: RetryPolicy,
    attempt_timeout: Option<Duration>,
}

impl RetryingExecutor {
    pub fn new(pool: Arc<ConnectionPool>, policy: RetryPolicy) -> Self {
        Self {
            pool,
            policy,
            attempt_timeout: None,
        }
    }

    /// Caps the duration of each wire exchange. An overdue attempt counts as
    /// a transport failure and is retried like any other.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Runs one operation to completion under the configured policy.
    ///
    /// `Ok(None)` means the failure was swallowed (`ContinueOnFail`);
    /// `Err(RetriesExhausted)` is only produced by the bounded policy.
    pub async fn execute(
        &self,
        operation: Operation,
        params: &RequestParams,
    ) -> Result<Option<Response>, RetriesExhausted> {
        let mut attempt: u32 = 0;
        loop {
            let err = match self.attempt(operation, params).await {
                Ok(response) => return Ok(Some(response)),
                Err(err) => err,
            };
            match self.policy {
                RetryPolicy::ContinueOnFail => {
                    warn!(
                        "{operation} on '{}' failed, passing through: {err}",
                        params.device
                    );
                    return Ok(None);
                }
                RetryPolicy::Bounded { max_retries } if attempt >= max_retries => {
                    return Err(RetriesExhausted {
                        attempts: attempt + 1,
                        last: err,
                    });
                }
                _ => {}
            }
            let delay = self.policy.backoff_delay(attempt);
            debug!(
                "{operation} on '{}' failed ({err}), retrying in {delay:?}",
                params.device
            );
            tokio::time::sleep(delay).await;
            // A stale transport is the assumed cause of failure.
            if let Err(err) = self.pool.recreate(&params.device).await {
                warn!("reconnect to '{}' failed: {err}", params.device);
            }
            attempt += 1;
        }
    }

    async fn attempt(
        &self,
        operation: Operation,
        params: &RequestParams,
    ) -> Result<Response, AttemptError> {
        let handle = self.pool.get_or_create(&params.device).await?;
        let mut transport = handle.lock().await;
        debug!("executing {operation} with params: {params:?}");
        let exchange = dispatch(transport.as_mut(), operation, params);
        let response = match self.attempt_timeout {
            Some(limit) => tokio::time::timeout(limit, exchange)
                .await
                .map_err(|_| {
                    TransportError::Io(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("{operation} did not complete within {limit:?}"),
                    ))
                })??,
            None => exchange.await?,
        };
        debug!("{operation} returned: {response:?}");
        Ok(response)
    }
}

/// Issues the wire call matching the operation. The parameter builder
/// guarantees the value shape; a mismatch here means the params were not
/// built for this operation.
async fn dispatch(
    transport: &mut dyn Transport,
    operation: Operation,
    params: &RequestParams,
) -> Result<Response, TransportError> {
    let address = params.address;
    let count = params.count.unwrap_or(1);
    match operation {
        Operation::ReadCoils => transport.read_coils(address, count).await,
        Operation::ReadDiscreteInputs => transport.read_discrete_inputs(address, count).await,
        Operation::ReadHoldingRegisters => transport.read_holding_registers(address, count).await,
        Operation::ReadInputRegisters => transport.read_input_registers(address, count).await,
        Operation::WriteSingleCoil => match &params.value {
            Some(WriteValue::Coil(state)) => transport.write_single_coil(address, *state).await,
            other => Err(value_mismatch(operation, other)),
        },
        Operation::WriteMultipleCoils => match &params.value {
            Some(WriteValue::Coils(states)) => {
                transport.write_multiple_coils(address, states).await
            }
            other => Err(value_mismatch(operation, other)),
        },
        Operation::WriteSingleRegister => match &params.value {
            Some(WriteValue::Register(word)) => {
                transport.write_single_register(address, *word).await
            }
            other => Err(value_mismatch(operation, other)),
        },
        Operation::WriteMultipleRegisters => match &params.value {
            Some(WriteValue::Registers(words)) => {
                transport.write_multiple_registers(address, words).await
            }
            other => Err(value_mismatch(operation, other)),
        },
    }
}

fn value_mismatch(operation: Operation, value: &Option<WriteValue>) -> TransportError {
    TransportError::Driver(format!(
        "{operation} dispatched with mismatched write value {value:?}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{MockConnector, Step};
    use crate::transport::{DeviceKey, Payload};
    use assert_matches::assert_matches;

    fn params() -> RequestParams {
        RequestParams {
            device: DeviceKey::from("10.1.1.1:502"),
            address: 0,
            count: None,
            value: None,
        }
    }

    #[test]
    fn backoff_grows_with_attempt_index() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay(0), Duration::ZERO);
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(7), Duration::from_secs(7));
    }

    #[test]
    fn forever_policy_switches_to_long_delay() {
        let policy = RetryPolicy::Forever {
            long_delay_after: 3,
            long_delay: Duration::from_secs(60),
        };
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(60));
        assert_eq!(policy.backoff_delay(100), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn fail_once_then_succeed_reconnects_in_between() {
        let connector = Arc::new(MockConnector::ok().with_script(vec![Step::Fail]));
        let pool = Arc::new(ConnectionPool::new(connector.clone()));
        let executor = RetryingExecutor::new(Arc::clone(&pool), RetryPolicy::default());

        let response = executor
            .execute(Operation::ReadCoils, &params())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(response.payload, Payload::Coils(vec![true]));
        // Exactly two wire attempts with exactly one reconnect in between.
        assert_eq!(connector.wire_calls(), 2);
        assert_eq!(connector.connects(), 2);
        assert_eq!(connector.closed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_policy_exhausts() {
        let connector = Arc::new(MockConnector::failing());
        let pool = Arc::new(ConnectionPool::new(connector.clone()));
        let executor = RetryingExecutor::new(
            Arc::clone(&pool),
            RetryPolicy::Bounded { max_retries: 3 },
        );

        let err = executor
            .execute(Operation::ReadCoils, &params())
            .await
            .unwrap_err();

        assert_eq!(err.attempts, 4);
        assert_eq!(connector.wire_calls(), 4);
        assert_matches!(err.last, AttemptError::Transport(_));
    }

    #[tokio::test]
    async fn continue_on_fail_stops_after_one_attempt() {
        let connector = Arc::new(MockConnector::failing());
        let pool = Arc::new(ConnectionPool::new(connector.clone()));
        let executor = RetryingExecutor::new(Arc::clone(&pool), RetryPolicy::ContinueOnFail);

        let result = executor.execute(Operation::ReadCoils, &params()).await;

        assert_matches!(result, Ok(None));
        assert_eq!(connector.wire_calls(), 1);
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_reconnect_counts_as_an_attempt() {
        // First connect succeeds, the wire call fails, and every reconnect
        // attempt fails too: the bounded policy still terminates.
        let connector = Arc::new(
            MockConnector::failing().with_connect_failures_after_first(10),
        );
        let pool = Arc::new(ConnectionPool::new(connector.clone()));
        let executor = RetryingExecutor::new(
            Arc::clone(&pool),
            RetryPolicy::Bounded { max_retries: 3 },
        );

        let err = executor
            .execute(Operation::ReadCoils, &params())
            .await
            .unwrap_err();

        assert_eq!(err.attempts, 4);
        // Only the first attempt reached the wire.
        assert_eq!(connector.wire_calls(), 1);
        assert_matches!(err.last, AttemptError::Connection(_));
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_covers_writes() {
        let connector = Arc::new(MockConnector::ok());
        let pool = Arc::new(ConnectionPool::new(connector.clone()));
        let executor = RetryingExecutor::new(Arc::clone(&pool), RetryPolicy::default());

        let write = RequestParams {
            device: DeviceKey::from("10.1.1.1:502"),
            address: 9,
            count: None,
            value: Some(WriteValue::Registers(vec![1, 2])),
        };
        let response = executor
            .execute(Operation::WriteMultipleRegisters, &write)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(response.payload, Payload::Ack);
        assert_eq!(
            connector.calls(),
            vec![String::from("write_multiple_registers addr=9 n=2")]
        );
    }
}
