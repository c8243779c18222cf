//! Dispatcher: the engine's single control loop.
//!
//! The loop owns both inbound event sources:
//!
//! - **new plans**: registered in the stop registry, then started as a tracked
//!   executor task. The submitter is answered only after registration, so a
//!   stop sent once `submit` has returned always finds the plan.
//! - **stop requests**: forwarded to the registry's non-blocking signal.
//!
//! ```text
//! EngineHandle::submit ──plans──┐
//!                               ├──▶ Dispatcher ──register──▶ Registry
//! EngineHandle::stop ───stops───┘        │
//!                                        └──spawn──▶ Executor (one per plan)
//! ```
//!
//! Shutdown cancels the root token every plan token descends from, ends the
//! loop and waits a bounded time for all executors to exit.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::contact::ContactBook;
use crate::error::{EngineError, EngineResult};
use crate::events::{EscalationEvent, EventBus, SharedEventBus};
use crate::executor::{Executor, ExecutorContext};
use crate::plan::{Plan, PlanId};
use crate::registry::{Registry, SharedRegistry};

/// A plan waiting to be started, with the submitter's reply slot
struct Submission {
    plan: Arc<Plan>,
    reply: oneshot::Sender<EngineResult<PlanId>>,
}

/// Outcome of a graceful shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Plans that were running when shutdown began
    pub active_at_shutdown: usize,
    /// Plans still registered when the grace period ended
    pub remaining: usize,
    /// Whether every task exited within the grace period
    pub drained: bool,
}

/// Entry point for starting the engine
pub struct Engine;

impl Engine {
    /// Spawn the dispatcher loop on the current runtime
    pub fn spawn(config: &EngineConfig, contacts: ContactBook) -> EngineHandle {
        let shutdown = CancellationToken::new();
        let registry = Registry::with_shutdown(shutdown.clone()).shared();
        let events = EventBus::new().shared();
        let tracker = TaskTracker::new();

        let capacity = config.channel_capacity.max(1);
        let (plans_tx, plans_rx) = mpsc::channel(capacity);
        let (stops_tx, stops_rx) = mpsc::channel(capacity);

        let dispatcher = Dispatcher {
            plans: plans_rx,
            stops: stops_rx,
            ctx: ExecutorContext {
                registry: Arc::clone(&registry),
                contacts: Arc::new(contacts),
                events: Arc::clone(&events),
                ack_code_digits: config.ack_code_digits,
            },
            tracker: tracker.clone(),
            shutdown: shutdown.clone(),
        };
        tracker.spawn(dispatcher.run());

        EngineHandle {
            plans: plans_tx,
            stops: stops_tx,
            registry,
            events,
            tracker,
            shutdown,
        }
    }
}

struct Dispatcher {
    plans: mpsc::Receiver<Submission>,
    stops: mpsc::Receiver<PlanId>,
    ctx: ExecutorContext,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl Dispatcher {
    async fn run(mut self) {
        info!("Dispatcher started");
        let shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(submission) = self.plans.recv() => self.start(submission),
                Some(plan_id) = self.stops.recv() => self.stop(plan_id),
                else => break,
            }
        }

        info!("Dispatcher stopped");
    }

    fn start(&self, submission: Submission) {
        let Submission { plan, reply } = submission;

        match self.ctx.registry.register(&plan) {
            Ok(token) => {
                info!(plan_id = %plan.id, recipient = %plan.recipient, "Plan accepted");
                self.ctx.events.publish(EscalationEvent::PlanAccepted {
                    plan_id: plan.id,
                    recipient: plan.recipient.clone(),
                    steps: plan.steps.len(),
                    timestamp: Utc::now(),
                });
                let plan_id = plan.id;
                let executor = Executor::new(plan, token, self.ctx.clone());
                self.tracker.spawn(executor.run());
                // The submitter may have given up waiting; the plan runs anyway
                let _ = reply.send(Ok(plan_id));
            }
            Err(e) => {
                warn!(plan_id = %plan.id, error = %e, "Plan rejected");
                self.ctx.events.publish(EscalationEvent::PlanRejected {
                    plan_id: plan.id,
                    reason: e.to_string(),
                    timestamp: Utc::now(),
                });
                let _ = reply.send(Err(e));
            }
        }
    }

    fn stop(&self, plan_id: PlanId) {
        self.ctx.events.publish(EscalationEvent::StopRequested {
            plan_id,
            timestamp: Utc::now(),
        });
        if self.ctx.registry.signal_stop(plan_id) {
            info!(%plan_id, "Stop signalled");
        } else {
            debug!(%plan_id, "Stop requested for a plan that is not running; ignored");
            self.ctx.events.publish(EscalationEvent::StopIgnored {
                plan_id,
                timestamp: Utc::now(),
            });
        }
    }
}

/// Cloneable handle for talking to a running engine
#[derive(Clone)]
pub struct EngineHandle {
    plans: mpsc::Sender<Submission>,
    stops: mpsc::Sender<PlanId>,
    registry: SharedRegistry,
    events: SharedEventBus,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl EngineHandle {
    /// Validate and start a plan.
    ///
    /// Returns once the plan is registered; its first contact attempt happens
    /// asynchronously.
    pub async fn submit(&self, plan: Plan) -> EngineResult<PlanId> {
        plan.validate()?;
        if self.shutdown.is_cancelled() {
            return Err(EngineError::Stopped);
        }

        let (reply, registered) = oneshot::channel();
        self.plans
            .send(Submission {
                plan: Arc::new(plan),
                reply,
            })
            .await
            .map_err(|_| EngineError::Stopped)?;
        // Dropped unanswered only when the loop exits first
        registered.await.map_err(|_| EngineError::Stopped)?
    }

    /// Ask the engine to stop a plan. Unknown plans are ignored.
    pub async fn stop(&self, plan_id: PlanId) -> EngineResult<()> {
        self.stops
            .send(plan_id)
            .await
            .map_err(|_| EngineError::Stopped)
    }

    pub fn is_active(&self, plan_id: PlanId) -> bool {
        self.registry.is_active(plan_id)
    }

    pub fn active_plans(&self) -> Vec<PlanId> {
        self.registry.active_plans()
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn events(&self) -> &SharedEventBus {
        &self.events
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop every executor and wait up to `grace` for them to exit
    pub async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        let active_at_shutdown = self.registry.active_count();
        info!(active = active_at_shutdown, grace_secs = grace.as_secs(), "Engine shutting down");

        self.shutdown.cancel();
        self.tracker.close();
        let drained = time::timeout(grace, self.tracker.wait()).await.is_ok();
        let remaining = self.registry.active_count();

        if drained {
            info!("Engine shut down cleanly");
        } else {
            warn!(remaining, "Shutdown grace period elapsed with executors still running");
        }

        ShutdownReport {
            active_at_shutdown,
            remaining,
            drained,
        }
    }
}
