//! Engine error types
//!
//! Two families: `EngineError` for submission and lifecycle failures that are
//! returned to callers, and `TransportError` for contact attempts. Transport
//! errors never leave the executor that produced them.

use thiserror::Error;

use crate::plan::PlanId;

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced to callers of the engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// A plan with this identifier is already registered
    #[error("Plan {plan_id} is already registered")]
    DuplicatePlan { plan_id: PlanId },

    /// The plan failed validation and was not started
    #[error("Invalid plan: {reason}")]
    InvalidPlan { reason: String },

    /// The engine has been shut down (or its loop has exited)
    #[error("Escalation engine is stopped")]
    Stopped,
}

/// Errors raised while performing a contact attempt
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The request could not be sent or no response was received
    #[error("Request failed: {0}")]
    Request(String),

    /// The provider answered with a non-success status
    #[error("Provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The provider response could not be parsed
    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    /// No capability is registered for the requested contact method
    #[error("No contact capability registered for {0}")]
    Unsupported(String),
}

impl TransportError {
    /// Whether the failure happened before the provider accepted the attempt.
    ///
    /// A malformed response still means the provider received the request.
    pub fn is_undelivered(&self) -> bool {
        !matches!(self, Self::MalformedResponse(_))
    }
}
