//! Stop registry operations
//!
//! Entries are created by the dispatcher when a plan starts and removed by the
//! plan's own executor once it has committed to exiting. Signalling is a
//! `CancellationToken` cancel: non-blocking and idempotent, so a double stop
//! or a stop racing executor exit cannot stall the sender.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Registry, StopEntry};
use crate::error::{EngineError, EngineResult};
use crate::plan::{Plan, PlanId};

impl Registry {
    /// Register a plan and return the cancellation signal its executor waits on
    pub fn register(&self, plan: &Arc<Plan>) -> EngineResult<CancellationToken> {
        let mut state = self.lock();
        if state.stoppers.contains_key(&plan.id) {
            return Err(EngineError::DuplicatePlan { plan_id: plan.id });
        }
        let token = self.shutdown.child_token();
        state.stoppers.insert(
            plan.id,
            StopEntry {
                token: token.clone(),
                plan: Arc::clone(plan),
            },
        );
        debug!(plan_id = %plan.id, active = state.stoppers.len(), "Plan registered");
        Ok(token)
    }

    /// Signal a running plan to stop.
    ///
    /// Returns `false` (and does nothing) if the plan is not registered.
    pub fn signal_stop(&self, id: PlanId) -> bool {
        let state = self.lock();
        match state.stoppers.get(&id) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove a plan's entry. Only the plan's executor calls this.
    pub fn unregister(&self, id: PlanId) {
        let mut state = self.lock();
        if state.stoppers.remove(&id).is_some() {
            debug!(plan_id = %id, active = state.stoppers.len(), "Plan unregistered");
        }
    }

    /// Whether the plan's executor is still running
    pub fn is_active(&self, id: PlanId) -> bool {
        self.lock().stoppers.contains_key(&id)
    }

    /// The running plan with this id
    pub fn plan(&self, id: PlanId) -> Option<Arc<Plan>> {
        self.lock().stoppers.get(&id).map(|e| Arc::clone(&e.plan))
    }

    /// Identifiers of every running plan
    pub fn active_plans(&self) -> Vec<PlanId> {
        let mut ids: Vec<PlanId> = self.lock().stoppers.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn active_count(&self) -> usize {
        self.lock().stoppers.len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::plan::{ContactMethod, Step};

    fn plan() -> Arc<Plan> {
        Arc::new(Plan::new(
            "+15550001111",
            "test",
            vec![Step::repeating(ContactMethod::SendMessage, Duration::from_secs(1))],
        ))
    }

    #[test]
    fn test_register_and_signal() {
        let registry = Registry::new();
        let plan = plan();
        let token = registry.register(&plan).unwrap();

        assert!(registry.is_active(plan.id));
        assert!(!token.is_cancelled());
        assert!(registry.signal_stop(plan.id));
        assert!(token.is_cancelled());
        // Entry stays until the executor unregisters
        assert!(registry.is_active(plan.id));

        registry.unregister(plan.id);
        assert!(!registry.is_active(plan.id));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = Registry::new();
        let plan = plan();
        registry.register(&plan).unwrap();
        let err = registry.register(&plan).unwrap_err();
        assert!(matches!(err, EngineError::DuplicatePlan { plan_id } if plan_id == plan.id));
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn test_signal_unknown_plan_is_noop() {
        let registry = Registry::new();
        let other = plan();
        registry.register(&other).unwrap();

        assert!(!registry.signal_stop(PlanId::new()));
        assert_eq!(registry.active_count(), 1);
        assert!(!registry.lock().stoppers[&other.id].token.is_cancelled());
    }

    #[test]
    fn test_double_signal_is_safe() {
        let registry = Registry::new();
        let plan = plan();
        let token = registry.register(&plan).unwrap();
        assert!(registry.signal_stop(plan.id));
        assert!(registry.signal_stop(plan.id));
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_shutdown_cancels_every_plan() {
        let registry = Registry::new();
        let a = registry.register(&plan()).unwrap();
        let b = registry.register(&plan()).unwrap();
        registry.shutdown_token().cancel();
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
    }

    #[test]
    fn test_plan_lookup() {
        let registry = Registry::new();
        let plan = plan();
        registry.register(&plan).unwrap();
        assert_eq!(registry.plan(plan.id).unwrap().message, "test");
        assert_eq!(registry.active_plans(), vec![plan.id]);
        registry.unregister(plan.id);
        assert!(registry.plan(plan.id).is_none());
    }
}
