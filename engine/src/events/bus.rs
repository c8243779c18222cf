//! Event bus for escalation activity
//!
//! Pub/sub over a Tokio broadcast channel. Publishing never blocks and never
//! fails for lack of subscribers; slow subscribers lag rather than stall the
//! executors.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use super::types::EscalationEvent;
use crate::plan::PlanId;

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

/// Event bus with broadcast channels
pub struct EventBus {
    sender: broadcast::Sender<EscalationEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Create a shared reference to this event bus
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: EscalationEvent) {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(count) => debug!(event_type, receivers = count, "Event published"),
            Err(_) => debug!(event_type, "Event published (no receivers)"),
        }
    }

    /// Subscribe to receive events
    pub fn subscribe(&self) -> broadcast::Receiver<EscalationEvent> {
        self.sender.subscribe()
    }

    /// Subscribe to events matching `filter`
    pub fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver::new(self.subscribe(), filter)
    }

    /// Get the number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Event filter for selective subscription
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Filter by plan ID
    pub plan_id: Option<PlanId>,
    /// Filter by event types
    pub event_types: Option<Vec<String>>,
}

impl EventFilter {
    /// Create a new empty filter (matches all events)
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plan(mut self, plan_id: PlanId) -> Self {
        self.plan_id = Some(plan_id);
        self
    }

    pub fn types(mut self, event_types: Vec<&str>) -> Self {
        self.event_types = Some(event_types.into_iter().map(String::from).collect());
        self
    }

    /// Check if an event matches this filter
    pub fn matches(&self, event: &EscalationEvent) -> bool {
        if let Some(id) = self.plan_id {
            if event.plan_id() != Some(id) {
                return false;
            }
        }
        if let Some(ref types) = self.event_types {
            if !types.iter().any(|t| t == event.event_type()) {
                return false;
            }
        }
        true
    }
}

/// Filtered event receiver that only yields matching events
pub struct FilteredReceiver {
    receiver: broadcast::Receiver<EscalationEvent>,
    filter: EventFilter,
}

impl FilteredReceiver {
    pub fn new(receiver: broadcast::Receiver<EscalationEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// Receive the next matching event
    pub async fn recv(&mut self) -> Result<EscalationEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::StopReason;
    use chrono::Utc;

    fn stopped(plan_id: PlanId) -> EscalationEvent {
        EscalationEvent::PlanStopped {
            plan_id,
            reason: StopReason::Stopped,
            dispatches: 1,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        bus.publish(stopped(PlanId::new()));

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.event_type(), "plan_stopped");
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(stopped(PlanId::new()));
    }

    #[test]
    fn test_event_filter() {
        let target = PlanId::new();
        let filter = EventFilter::new().plan(target).types(vec!["plan_stopped"]);

        assert!(filter.matches(&stopped(target)));
        assert!(!filter.matches(&stopped(PlanId::new())));
        assert!(!filter.matches(&EscalationEvent::StopRequested {
            plan_id: target,
            timestamp: Utc::now(),
        }));
        assert!(!filter.matches(&EscalationEvent::AckUnrecognized {
            recipient: "+1555".to_string(),
            timestamp: Utc::now(),
        }));
    }

    #[tokio::test]
    async fn test_filtered_receiver() {
        let bus = EventBus::new().shared();
        let target = PlanId::new();
        let mut filtered = bus.subscribe_filtered(EventFilter::new().plan(target));

        let publisher = Arc::clone(&bus);
        tokio::spawn(async move {
            publisher.publish(stopped(PlanId::new()));
            publisher.publish(stopped(target));
        });

        let event = filtered.recv().await.unwrap();
        assert_eq!(event.plan_id(), Some(target));
    }
}
