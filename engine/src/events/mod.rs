//! Escalation events
//!
//! Every state change of the engine (plan accepted, step entered, contact
//! dispatched or failed, stop requested, plan stopped, reply resolved) is
//! published on a broadcast bus. Logging goes through `tracing` independently;
//! the bus is for programmatic observers.
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │  Dispatcher  │────▶│  Event Bus   │────▶│  Subscribers │
//! │  Executors   │     │  (broadcast) │     │   (recv)     │
//! └──────────────┘     └──────────────┘     └──────────────┘
//! ```

pub mod bus;
pub mod types;

pub use bus::{EventBus, EventFilter, FilteredReceiver, SharedEventBus};
pub use types::{EscalationEvent, StopReason};
