//! Contact capabilities, the engine's boundary with the outbound transport.
//!
//! Each `ContactMethod` is served by one `Contact` implementation registered
//! in a `ContactBook`. The executor only ever calls `ContactBook::perform`, so
//! adding a method means adding an enum variant and an implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::plan::{ContactMethod, PlanId};
use crate::registry::AckCode;

/// One contact attempt handed to a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub plan_id: PlanId,
    /// Zero-based step index within the plan
    pub step: usize,
    pub recipient: String,
    pub content: String,
    /// Code the recipient replies with, when the method expects one
    pub ack_code: Option<AckCode>,
}

/// What the provider reported back for an accepted attempt
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactOutcome {
    /// Provider-side reference (message or call SID)
    pub provider_ref: Option<String>,
    /// Provider-reported status (e.g. "queued")
    pub status: Option<String>,
}

/// A way of reaching a recipient
#[async_trait]
pub trait Contact: Send + Sync {
    async fn perform(&self, attempt: &Attempt) -> Result<ContactOutcome, TransportError>;
}

/// Contact capabilities keyed by method
#[derive(Clone, Default)]
pub struct ContactBook {
    contacts: HashMap<ContactMethod, Arc<dyn Contact>>,
}

impl ContactBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the capability serving `method`, replacing any previous one
    pub fn with(mut self, method: ContactMethod, contact: Arc<dyn Contact>) -> Self {
        self.contacts.insert(method, contact);
        self
    }

    pub fn supports(&self, method: ContactMethod) -> bool {
        self.contacts.contains_key(&method)
    }

    /// Perform an attempt with the capability registered for `method`
    pub async fn perform(
        &self,
        method: ContactMethod,
        attempt: &Attempt,
    ) -> Result<ContactOutcome, TransportError> {
        match self.contacts.get(&method) {
            Some(contact) => contact.perform(attempt).await,
            None => Err(TransportError::Unsupported(method.to_string())),
        }
    }
}
