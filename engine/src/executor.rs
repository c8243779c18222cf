//! Escalation Executor, one task per running plan.
//!
//! # State machine
//!
//! ```text
//! running-step[0] ──notify_until elapsed──▶ running-step[1] ──▶ … ──▶ running-step[last]
//!        │                                        │                         │  ▲
//!        │                                        │              notify_every│  │ retry
//!        │                                        │                         ▼  │
//!        └──────────── cancellation ──────────────┴────────────────────▶ terminated
//! ```
//!
//! Every step dispatches its contact method on entry and its timer starts at
//! that same instant, so a slow transport never pushes the schedule back.
//! Non-last steps hold until their one-shot delay elapses or the plan is
//! cancelled. The last step re-dispatches on an interval anchored at entry and
//! has no timeout: only cancellation ends it.
//!
//! Every wait, including the contact attempt itself, is `biased` toward
//! cancellation. Once a stop has been signalled no further attempt starts and
//! an attempt still in flight is abandoned. A one-shot attempt still running
//! when its step ends is abandoned as well.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::contact::{Attempt, ContactBook};
use crate::events::{EscalationEvent, SharedEventBus, StopReason};
use crate::plan::{Plan, PlanId, Step};
use crate::registry::SharedRegistry;

/// Deadline used when a wait does not fit on the clock
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

/// Collaborators shared by every executor
#[derive(Clone)]
pub struct ExecutorContext {
    pub registry: SharedRegistry,
    pub contacts: Arc<ContactBook>,
    pub events: SharedEventBus,
    /// Digits in generated acknowledgment codes
    pub ack_code_digits: u32,
}

/// Summary returned when an executor exits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorReport {
    pub plan_id: PlanId,
    /// Contact attempts started, whether they succeeded, failed or were abandoned
    pub dispatches: u32,
    pub reason: StopReason,
}

/// Removes the plan's registry entry when dropped, so an executor that dies
/// early never leaves a stale entry behind
struct Registration {
    registry: SharedRegistry,
    plan_id: PlanId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(self.plan_id);
    }
}

/// Drives one plan from its first step until cancelled
pub struct Executor {
    plan: Arc<Plan>,
    cancel: CancellationToken,
    ctx: ExecutorContext,
    registration: Registration,
    dispatches: u32,
}

impl Executor {
    /// `cancel` must be the token the registry handed out for this plan
    pub fn new(plan: Arc<Plan>, cancel: CancellationToken, ctx: ExecutorContext) -> Self {
        let registration = Registration {
            registry: Arc::clone(&ctx.registry),
            plan_id: plan.id,
        };
        Self {
            plan,
            cancel,
            ctx,
            registration,
            dispatches: 0,
        }
    }

    pub fn plan_id(&self) -> PlanId {
        self.plan.id
    }

    /// Run the plan until its cancellation signal fires
    pub async fn run(mut self) -> ExecutorReport {
        let plan = Arc::clone(&self.plan);
        info!(plan_id = %plan.id, recipient = %plan.recipient, steps = plan.steps.len(), "Escalation started");

        for (n, step) in plan.steps.iter().enumerate() {
            if self.cancel.is_cancelled() {
                break;
            }
            let entered = Instant::now();
            let repeating = plan.is_last(n);
            let wait = if repeating { step.notify_every } else { step.notify_until };
            info!(
                plan_id = %plan.id,
                step = n,
                method = %step.method,
                repeating,
                wait_secs = wait.as_secs(),
                "Entering step"
            );
            self.ctx.events.publish(EscalationEvent::StepEntered {
                plan_id: plan.id,
                step: n,
                method: step.method,
                repeating,
                timestamp: Utc::now(),
            });

            if repeating {
                self.repeat(n, step, entered).await;
                break;
            }
            if !self.hold(n, step, entered).await {
                break;
            }
        }

        self.terminate()
    }

    /// Dispatch a one-shot step and wait out its delay. Returns `false` when
    /// the plan was cancelled first.
    async fn hold(&mut self, n: usize, step: &Step, entered: Instant) -> bool {
        let cancel = self.cancel.clone();
        let window = time::sleep_until(deadline(entered, step.notify_until));
        self.dispatches += 1;
        let attempt = self.dispatch(n, step, 1);
        tokio::pin!(window, attempt);

        let mut finished = false;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    if !finished {
                        debug!(plan_id = %self.plan.id, step = n, "Contact attempt abandoned on stop");
                    }
                    return false;
                }
                _ = &mut attempt, if !finished => finished = true,
                _ = &mut window => break,
            }
        }

        if !finished {
            warn!(
                plan_id = %self.plan.id,
                step = n,
                method = %step.method,
                "Contact attempt outlived its step; abandoned"
            );
        }
        debug!(plan_id = %self.plan.id, step = n, "Step timer expired; escalating");
        true
    }

    /// Dispatch the final step on entry and every `notify_every` after it
    /// until cancelled
    async fn repeat(&mut self, n: usize, step: &Step, entered: Instant) {
        // The first tick completes at `entered`
        let mut ticker = time::interval_at(entered, step.notify_every.min(FAR_FUTURE));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let cancel = self.cancel.clone();
        let mut attempt = 0;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            attempt += 1;
            if attempt > 1 {
                debug!(plan_id = %self.plan.id, step = n, attempt, "Retry tick");
            }
            self.dispatches += 1;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(plan_id = %self.plan.id, step = n, attempt, "Contact attempt abandoned on stop");
                    return;
                }
                _ = self.dispatch(n, step, attempt) => {}
            }
        }
    }

    /// Perform one contact attempt. Failures are logged and swallowed.
    async fn dispatch(&self, n: usize, step: &Step, attempt: u32) {
        let plan = &self.plan;

        let ack_code = step.method.requires_ack_code().then(|| {
            self.ctx
                .registry
                .issue_code(&plan.recipient, plan.id, self.ctx.ack_code_digits)
        });
        let request = Attempt {
            plan_id: plan.id,
            step: n,
            recipient: plan.recipient.clone(),
            content: plan.message_for(n).to_string(),
            ack_code: ack_code.clone(),
        };

        match self.ctx.contacts.perform(step.method, &request).await {
            Ok(outcome) => {
                info!(
                    plan_id = %plan.id,
                    step = n,
                    method = %step.method,
                    attempt,
                    provider_ref = outcome.provider_ref.as_deref().unwrap_or("-"),
                    "Contact dispatched"
                );
                self.ctx.events.publish(EscalationEvent::ContactDispatched {
                    plan_id: plan.id,
                    step: n,
                    method: step.method,
                    attempt,
                    provider_ref: outcome.provider_ref,
                    timestamp: Utc::now(),
                });
            }
            Err(e) => {
                if let Some(code) = &ack_code {
                    if e.is_undelivered() {
                        self.ctx.registry.forget(&plan.recipient, code);
                    }
                }
                warn!(
                    plan_id = %plan.id,
                    step = n,
                    method = %step.method,
                    attempt,
                    error = %e,
                    "Contact attempt failed; escalation continues on schedule"
                );
                self.ctx.events.publish(EscalationEvent::ContactFailed {
                    plan_id: plan.id,
                    step: n,
                    method: step.method,
                    attempt,
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
            }
        }
    }

    fn terminate(self) -> ExecutorReport {
        let reason = if self.ctx.registry.shutdown_token().is_cancelled() {
            StopReason::Shutdown
        } else {
            StopReason::Stopped
        };
        drop(self.registration);

        info!(plan_id = %self.plan.id, ?reason, dispatches = self.dispatches, "Escalation stopped");
        self.ctx.events.publish(EscalationEvent::PlanStopped {
            plan_id: self.plan.id,
            reason,
            dispatches: self.dispatches,
            timestamp: Utc::now(),
        });

        ExecutorReport {
            plan_id: self.plan.id,
            dispatches: self.dispatches,
            reason,
        }
    }
}

fn deadline(from: Instant, wait: Duration) -> Instant {
    from.checked_add(wait).unwrap_or_else(|| from + FAR_FUTURE)
}
