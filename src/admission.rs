//! Bounded-concurrency admission control.
//!
//! Two policies are supported. [`AdmissionPolicy::CountingDrop`] rejects
//! operations outright once the in-flight count reaches capacity, matching
//! setups where stale work is better skipped than queued.
//! [`AdmissionPolicy::QueuingGate`] parks excess operations until capacity
//! frees up. In both cases the returned [`AdmissionSlot`] releases its
//! capacity when dropped, on every exit path.

use crate::error::AdmissionRejected;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// How operations beyond capacity are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum AdmissionPolicy {
    /// Reject immediately when at capacity.
    CountingDrop,
    /// Queue behind the gate until capacity frees up.
    QueuingGate,
}

/// One unit of in-flight capacity. Dropping the slot releases it.
#[derive(Debug)]
pub struct AdmissionSlot {
    _permit: OwnedSemaphorePermit,
}

/// Bounds how many operations may be mid-flight at once.
#[derive(Debug)]
pub struct AdmissionController {
    policy: AdmissionPolicy,
    capacity: usize,
    semaphore: Arc<Semaphore>,
}

impl AdmissionController {
    pub const DEFAULT_CAPACITY: usize = 5;

    pub fn new(policy: AdmissionPolicy, capacity: usize) -> Self {
        Self {
            policy,
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity)),
        }
    }

    pub fn policy(&self) -> AdmissionPolicy {
        self.policy
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Operations currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }

    /// Acquires a slot according to the policy. Under `CountingDrop` a full
    /// controller rejects immediately; under `QueuingGate` the caller waits
    /// and is only rejected once the controller has been shut down.
    pub async fn admit(&self) -> Result<AdmissionSlot, AdmissionRejected> {
        let permit = match self.policy {
            AdmissionPolicy::CountingDrop => Arc::clone(&self.semaphore)
                .try_acquire_owned()
                .map_err(|_| AdmissionRejected)?,
            AdmissionPolicy::QueuingGate => Arc::clone(&self.semaphore)
                .acquire_owned()
                .await
                .map_err(|_| AdmissionRejected)?,
        };
        Ok(AdmissionSlot { _permit: permit })
    }

    /// Shuts the gate: queued waiters are rejected and no further slots are
    /// handed out.
    pub fn close(&self) {
        self.semaphore.close();
    }
}
