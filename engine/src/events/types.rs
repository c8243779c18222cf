//! Event types published while plans escalate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::plan::{ContactMethod, PlanId};

/// Why an executor terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The plan was stopped on its own, by an acknowledgment or an
    /// operator request
    Stopped,
    /// The whole engine shut down
    Shutdown,
}

/// All escalation events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EscalationEvent {
    /// A plan was registered and its executor started
    PlanAccepted {
        plan_id: PlanId,
        recipient: String,
        steps: usize,
        timestamp: DateTime<Utc>,
    },

    /// A plan could not be started
    PlanRejected {
        plan_id: PlanId,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// An executor entered a step
    StepEntered {
        plan_id: PlanId,
        step: usize,
        method: ContactMethod,
        repeating: bool,
        timestamp: DateTime<Utc>,
    },

    /// A contact attempt was accepted by the transport
    ContactDispatched {
        plan_id: PlanId,
        step: usize,
        method: ContactMethod,
        /// 1-based attempt number within the step
        attempt: u32,
        provider_ref: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A contact attempt failed; escalation continues on schedule
    ContactFailed {
        plan_id: PlanId,
        step: usize,
        method: ContactMethod,
        attempt: u32,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// A stop request reached the dispatcher
    StopRequested {
        plan_id: PlanId,
        timestamp: DateTime<Utc>,
    },

    /// A stop request named a plan that is not running
    StopIgnored {
        plan_id: PlanId,
        timestamp: DateTime<Utc>,
    },

    /// An executor terminated and unregistered itself
    PlanStopped {
        plan_id: PlanId,
        reason: StopReason,
        dispatches: u32,
        timestamp: DateTime<Utc>,
    },

    /// An inbound reply resolved to a plan
    AckResolved {
        plan_id: PlanId,
        recipient: String,
        stale: bool,
        timestamp: DateTime<Utc>,
    },

    /// An inbound reply matched no pending acknowledgment
    AckUnrecognized {
        recipient: String,
        timestamp: DateTime<Utc>,
    },
}

impl EscalationEvent {
    /// Get the timestamp of this event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            EscalationEvent::PlanAccepted { timestamp, .. } => *timestamp,
            EscalationEvent::PlanRejected { timestamp, .. } => *timestamp,
            EscalationEvent::StepEntered { timestamp, .. } => *timestamp,
            EscalationEvent::ContactDispatched { timestamp, .. } => *timestamp,
            EscalationEvent::ContactFailed { timestamp, .. } => *timestamp,
            EscalationEvent::StopRequested { timestamp, .. } => *timestamp,
            EscalationEvent::StopIgnored { timestamp, .. } => *timestamp,
            EscalationEvent::PlanStopped { timestamp, .. } => *timestamp,
            EscalationEvent::AckResolved { timestamp, .. } => *timestamp,
            EscalationEvent::AckUnrecognized { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            EscalationEvent::PlanAccepted { .. } => "plan_accepted",
            EscalationEvent::PlanRejected { .. } => "plan_rejected",
            EscalationEvent::StepEntered { .. } => "step_entered",
            EscalationEvent::ContactDispatched { .. } => "contact_dispatched",
            EscalationEvent::ContactFailed { .. } => "contact_failed",
            EscalationEvent::StopRequested { .. } => "stop_requested",
            EscalationEvent::StopIgnored { .. } => "stop_ignored",
            EscalationEvent::PlanStopped { .. } => "plan_stopped",
            EscalationEvent::AckResolved { .. } => "ack_resolved",
            EscalationEvent::AckUnrecognized { .. } => "ack_unrecognized",
        }
    }

    /// The plan this event concerns, if any
    pub fn plan_id(&self) -> Option<PlanId> {
        match self {
            EscalationEvent::PlanAccepted { plan_id, .. }
            | EscalationEvent::PlanRejected { plan_id, .. }
            | EscalationEvent::StepEntered { plan_id, .. }
            | EscalationEvent::ContactDispatched { plan_id, .. }
            | EscalationEvent::ContactFailed { plan_id, .. }
            | EscalationEvent::StopRequested { plan_id, .. }
            | EscalationEvent::StopIgnored { plan_id, .. }
            | EscalationEvent::PlanStopped { plan_id, .. }
            | EscalationEvent::AckResolved { plan_id, .. } => Some(*plan_id),
            EscalationEvent::AckUnrecognized { .. } => None,
        }
    }
}
