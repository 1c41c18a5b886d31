//! Service-queue dependency rows (§4.I, §6 `service_queue_tasks`).
//!
//! A service's `service_state` (carried on the record itself, per specialization) holds whatever
//! opaque data its stateful advancer needs between ticks. [`ServiceDependency`] is the separate,
//! generic bookkeeping the service engine uses to know which children it is currently waiting on
//! and in what order their results feed back into the advancer — independent of which of the
//! four service algorithms (§4.I) is running, so the engine's tick loop doesn't need to know a
//! service's internal shape to decide whether it has anything left to wait for.

use crate::ids::RecordId;
use crate::status::Priority;
use fractal_time::Time;
use serde::{Deserialize, Serialize};

/// One child a service is currently waiting on, or has just submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDependency {
    pub child_record_id: RecordId,
    /// The key this child's result is addressed by in the advancer's input map (a grid-point id,
    /// a component index, an image index, ...).
    pub key: String,
    /// Ordering hint (§4.I: "order them by `position` in the `extras`").
    pub position: i32,
    /// Opaque per-dependency metadata the owning algorithm attached at submission time.
    pub extras: serde_json::Value,
}

/// A service's `service_queue` row: the scheduling-relevant projection the periodic runner reads
/// to decide which services get a tick, independent of the record's own typed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceQueueEntry {
    pub record_id: RecordId,
    pub compute_tag: String,
    pub priority: Priority,
    pub created_on: Time,
    pub modified_on: Time,
}
