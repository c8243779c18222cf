//! Inbound acknowledgments
//!
//! The webhook layer parses provider payloads and hands the engine either a
//! reply `(sender, body)` or a key press `(plan_id, digits)`. This module
//! turns those into stop requests.
//!
//! A reply carrying a code whose plan has already stopped is consumed and
//! reported as stale; no stop is sent. Stopping is idempotent, so this only
//! keeps the dispatcher from seeing pointless requests.

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use crate::dispatcher::EngineHandle;
use crate::error::EngineResult;
use crate::events::EscalationEvent;
use crate::plan::PlanId;
use crate::registry::AckCode;

/// Result of handling an inbound reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "plan_id", rename_all = "snake_case")]
pub enum ReplyOutcome {
    /// The reply acknowledged a running plan; a stop was requested
    Acknowledged(PlanId),
    /// The code belonged to a plan that is no longer running
    Stale(PlanId),
    /// The reply matched no pending acknowledgment
    Unrecognized,
}

/// Result of handling a key press during a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeypressOutcome {
    Acknowledged,
    /// No digits were entered
    NoInput,
    /// The plan is not running
    UnknownPlan,
}

/// Resolves inbound acknowledgments against a running engine
#[derive(Clone)]
pub struct Acknowledgments {
    engine: EngineHandle,
}

impl Acknowledgments {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }

    /// Handle a text reply from `sender`
    pub async fn handle_reply(&self, sender: &str, body: &str) -> EngineResult<ReplyOutcome> {
        let registry = self.engine.registry();
        let resolved = body
            .parse::<AckCode>()
            .ok()
            .and_then(|code| registry.resolve(sender, &code));

        let Some(plan_id) = resolved else {
            debug!(%sender, "Reply did not match a pending acknowledgment");
            self.engine.events().publish(EscalationEvent::AckUnrecognized {
                recipient: sender.to_string(),
                timestamp: Utc::now(),
            });
            return Ok(ReplyOutcome::Unrecognized);
        };

        let stale = !registry.is_active(plan_id);
        self.engine.events().publish(EscalationEvent::AckResolved {
            plan_id,
            recipient: sender.to_string(),
            stale,
            timestamp: Utc::now(),
        });

        if stale {
            info!(%plan_id, %sender, "Reply acknowledged a plan that already stopped");
            return Ok(ReplyOutcome::Stale(plan_id));
        }

        info!(%plan_id, %sender, "Reply acknowledged; stopping plan");
        self.engine.stop(plan_id).await?;
        Ok(ReplyOutcome::Acknowledged(plan_id))
    }

    /// Handle digits pressed during a call placed for `plan_id`
    pub async fn handle_keypress(
        &self,
        plan_id: PlanId,
        digits: &str,
    ) -> EngineResult<KeypressOutcome> {
        if digits.trim().is_empty() {
            return Ok(KeypressOutcome::NoInput);
        }
        if !self.engine.is_active(plan_id) {
            debug!(%plan_id, "Key press for a plan that is not running");
            return Ok(KeypressOutcome::UnknownPlan);
        }

        info!(%plan_id, "Key press acknowledged; stopping plan");
        self.engine.stop(plan_id).await?;
        Ok(KeypressOutcome::Acknowledged)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::EngineConfig;
    use crate::contact::ContactBook;
    use crate::dispatcher::Engine;
    use crate::events::{EventFilter, StopReason};
    use crate::plan::{ContactMethod, Plan, Step};

    fn plan() -> Plan {
        Plan::new(
            "+15550001111",
            "test",
            vec![Step::repeating(ContactMethod::PlaceCall, Duration::from_secs(60))],
        )
    }

    #[tokio::test]
    async fn test_reply_stops_plan() {
        let engine = Engine::spawn(&EngineConfig::default(), ContactBook::new());
        let acks = Acknowledgments::new(engine.clone());
        let id = engine.submit(plan()).await.unwrap();
        let mut stopped = engine
            .events()
            .subscribe_filtered(EventFilter::new().plan(id).types(vec!["plan_stopped"]));

        engine.registry().remember("+15550001111", "731".parse().unwrap(), id);
        let outcome = acks.handle_reply("+15550001111", " 731 ").await.unwrap();
        assert_eq!(outcome, ReplyOutcome::Acknowledged(id));

        match stopped.recv().await.unwrap() {
            EscalationEvent::PlanStopped { reason, .. } => {
                assert_eq!(reason, StopReason::Stopped)
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(!engine.is_active(id));
    }

    #[tokio::test]
    async fn test_unrecognized_reply_mutates_nothing() {
        let engine = Engine::spawn(&EngineConfig::default(), ContactBook::new());
        let acks = Acknowledgments::new(engine.clone());
        let id = engine.submit(plan()).await.unwrap();
        engine.registry().remember("+15550001111", "731".parse().unwrap(), id);

        for body in ["732", "yes", ""] {
            let outcome = acks.handle_reply("+15550001111", body).await.unwrap();
            assert_eq!(outcome, ReplyOutcome::Unrecognized);
        }
        // Right code, wrong sender
        let outcome = acks.handle_reply("+15559999999", "731").await.unwrap();
        assert_eq!(outcome, ReplyOutcome::Unrecognized);

        assert_eq!(engine.registry().pending_conversations(), 1);
        assert!(engine.is_active(id));
    }

    #[tokio::test]
    async fn test_keypress() {
        let engine = Engine::spawn(&EngineConfig::default(), ContactBook::new());
        let acks = Acknowledgments::new(engine.clone());
        let id = engine.submit(plan()).await.unwrap();

        assert_eq!(
            acks.handle_keypress(id, "").await.unwrap(),
            KeypressOutcome::NoInput
        );
        assert_eq!(
            acks.handle_keypress(PlanId::new(), "1").await.unwrap(),
            KeypressOutcome::UnknownPlan
        );
        assert_eq!(
            acks.handle_keypress(id, "5").await.unwrap(),
            KeypressOutcome::Acknowledged
        );
    }

    #[test]
    fn test_reply_outcome_json() {
        let id = PlanId::new();
        let json = serde_json::to_value(ReplyOutcome::Stale(id)).unwrap();
        assert_eq!(json["outcome"], "stale");
        assert_eq!(json["plan_id"], id.to_string());
        let json = serde_json::to_value(ReplyOutcome::Unrecognized).unwrap();
        assert_eq!(json["outcome"], "unrecognized");
    }
}
