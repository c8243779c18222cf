//! Notification plans: the ordered escalation recipe for one recipient.
//!
//! Every step except the last fires once and waits `notify_until` before the
//! plan escalates. The last step repeats every `notify_every` until the plan
//! is stopped.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

/// Longest accepted step delay or repeat interval (one year)
pub const MAX_STEP_WAIT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Opaque unique identifier of a submitted plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanId(Uuid);

impl PlanId {
    /// Generate a fresh random identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PlanId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for PlanId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for PlanId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// How a recipient is contacted during a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactMethod {
    /// Text message carrying an acknowledgment code
    SendMessage,
    /// Voice call acknowledged by a key press
    PlaceCall,
}

impl ContactMethod {
    /// Whether an acknowledgment code is embedded in the attempt.
    ///
    /// Calls are acknowledged by key press against the plan id instead.
    pub fn requires_ack_code(self) -> bool {
        matches!(self, Self::SendMessage)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SendMessage => "send_message",
            Self::PlaceCall => "place_call",
        }
    }
}

impl fmt::Display for ContactMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stage of a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub method: ContactMethod,
    /// Wait before escalating to the next step (non-last steps)
    #[serde(rename = "notify_until_secs", with = "duration_secs", default)]
    pub notify_until: Duration,
    /// Repeat interval (last step only)
    #[serde(rename = "notify_every_secs", with = "duration_secs", default)]
    pub notify_every: Duration,
    /// Overrides the plan message for this step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Step {
    /// A step that fires once and escalates after `until`
    pub fn once(method: ContactMethod, until: Duration) -> Self {
        Self {
            method,
            notify_until: until,
            notify_every: Duration::ZERO,
            message: None,
        }
    }

    /// A step that repeats every `every` (meant to be the last one)
    pub fn repeating(method: ContactMethod, every: Duration) -> Self {
        Self {
            method,
            notify_until: Duration::ZERO,
            notify_every: every,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// An escalation recipe for one recipient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub id: PlanId,
    pub recipient: String,
    pub message: String,
    pub steps: Vec<Step>,
}

impl Plan {
    /// Build a plan with a fresh identifier
    pub fn new(recipient: impl Into<String>, message: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            id: PlanId::new(),
            recipient: recipient.into(),
            message: message.into(),
            steps,
        }
    }

    pub fn last_index(&self) -> usize {
        self.steps.len().saturating_sub(1)
    }

    pub fn is_last(&self, index: usize) -> bool {
        index == self.last_index()
    }

    /// Message delivered by the given step
    pub fn message_for(&self, index: usize) -> &str {
        self.steps
            .get(index)
            .and_then(|s| s.message.as_deref())
            .unwrap_or(&self.message)
    }

    /// Check the plan can be executed
    pub fn validate(&self) -> EngineResult<()> {
        if self.recipient.trim().is_empty() {
            return Err(invalid("recipient is empty"));
        }
        if self.steps.is_empty() {
            return Err(invalid("plan has no steps"));
        }
        let last = self.last_index();
        for (n, step) in self.steps.iter().enumerate() {
            let (field, wait) = if n == last {
                ("notify_every", step.notify_every)
            } else {
                ("notify_until", step.notify_until)
            };
            if wait.is_zero() {
                return Err(invalid(format!("step {} needs a non-zero {}", n, field)));
            }
            if wait > MAX_STEP_WAIT {
                return Err(invalid(format!(
                    "step {} {} exceeds {}s",
                    n,
                    field,
                    MAX_STEP_WAIT.as_secs()
                )));
            }
        }
        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> EngineError {
    EngineError::InvalidPlan {
        reason: reason.into(),
    }
}

/// Serialize durations as whole seconds
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sms_then_call() -> Plan {
        Plan::new(
            "+15551234567",
            "Disk full on db-01",
            vec![
                Step::once(ContactMethod::SendMessage, Duration::from_secs(120)),
                Step::repeating(ContactMethod::PlaceCall, Duration::from_secs(60)),
            ],
        )
    }

    #[test]
    fn test_valid_plan() {
        assert!(sms_then_call().validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_steps() {
        let plan = Plan::new("+15551234567", "hi", vec![]);
        assert!(matches!(plan.validate(), Err(EngineError::InvalidPlan { .. })));
    }

    #[test]
    fn test_rejects_zero_repeat_on_last_step() {
        let plan = Plan::new(
            "+15551234567",
            "hi",
            vec![Step::once(ContactMethod::SendMessage, Duration::from_secs(5))],
        );
        let err = plan.validate().unwrap_err();
        assert!(err.to_string().contains("notify_every"));
    }

    #[test]
    fn test_rejects_zero_delay_before_escalation() {
        let plan = Plan::new(
            "+15551234567",
            "hi",
            vec![
                Step::repeating(ContactMethod::SendMessage, Duration::from_secs(5)),
                Step::repeating(ContactMethod::PlaceCall, Duration::from_secs(5)),
            ],
        );
        let err = plan.validate().unwrap_err();
        assert!(err.to_string().contains("step 0"));
    }

    #[test]
    fn test_rejects_waits_beyond_a_year() {
        let plan = Plan::new(
            "+15551234567",
            "hi",
            vec![Step::repeating(ContactMethod::PlaceCall, Duration::from_secs(u64::MAX))],
        );
        let err = plan.validate().unwrap_err();
        assert!(err.to_string().contains("notify_every exceeds"));

        let plan = Plan::new(
            "+15551234567",
            "hi",
            vec![
                Step::once(ContactMethod::SendMessage, MAX_STEP_WAIT + Duration::from_secs(1)),
                Step::repeating(ContactMethod::PlaceCall, MAX_STEP_WAIT),
            ],
        );
        let err = plan.validate().unwrap_err();
        assert!(err.to_string().contains("step 0 notify_until"));
    }

    #[test]
    fn test_step_message_override() {
        let mut plan = sms_then_call();
        plan.steps[1] = plan.steps[1].clone().with_message("Still down, calling");
        assert_eq!(plan.message_for(0), "Disk full on db-01");
        assert_eq!(plan.message_for(1), "Still down, calling");
    }

    #[test]
    fn test_plan_json_shape() {
        let json = r#"{
            "recipient": "+15551234567",
            "message": "Disk full",
            "steps": [
                {"method": "send_message", "notify_until_secs": 120},
                {"method": "place_call", "notify_every_secs": 60}
            ]
        }"#;
        let plan: Plan = serde_json::from_str(json).unwrap();
        assert_eq!(plan.steps[0].method, ContactMethod::SendMessage);
        assert_eq!(plan.steps[0].notify_until, Duration::from_secs(120));
        assert_eq!(plan.steps[1].notify_every, Duration::from_secs(60));
        assert!(plan.is_last(1));
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn test_plan_id_parse() {
        let id = PlanId::new();
        let parsed: PlanId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<PlanId>().is_err());
    }
}
