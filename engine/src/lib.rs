//! Escalation Engine Library
//!
//! Escalates a notification to a recipient through an ordered sequence of
//! contact attempts (text, then voice call, ...), repeating the final attempt
//! on an interval until the recipient acknowledges.
//!
//! # Components
//!
//! - `plan`: the escalation recipe (`Plan`, `Step`, `ContactMethod`)
//! - `registry`: stop registry and conversation correlator behind one lock
//! - `executor`: one task per running plan, walking its steps
//! - `dispatcher`: the control loop that starts executors and routes stops
//! - `ack`: turns inbound replies and key presses into stop requests
//! - `contact`: the capability interface transports implement
//! - `events`: broadcast bus of escalation activity
//!
//! # Usage
//!
//! ```ignore
//! use escalation_engine::{ContactBook, ContactMethod, Engine, EngineConfig, Plan, Step};
//!
//! let contacts = ContactBook::new()
//!     .with(ContactMethod::SendMessage, sms)
//!     .with(ContactMethod::PlaceCall, voice);
//! let engine = Engine::spawn(&EngineConfig::from_env(), contacts);
//!
//! let id = engine
//!     .submit(Plan::new(
//!         "+15551234567",
//!         "db-01 is down",
//!         vec![
//!             Step::once(ContactMethod::SendMessage, Duration::from_secs(300)),
//!             Step::repeating(ContactMethod::PlaceCall, Duration::from_secs(120)),
//!         ],
//!     ))
//!     .await?;
//!
//! // Later, from the webhook layer
//! engine.stop(id).await?;
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod ack;
pub mod config;
pub mod contact;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod executor;
pub mod plan;
pub mod registry;

pub use ack::{Acknowledgments, KeypressOutcome, ReplyOutcome};
pub use config::EngineConfig;
pub use contact::{Attempt, Contact, ContactBook, ContactOutcome};
pub use dispatcher::{Engine, EngineHandle, ShutdownReport};
pub use error::{EngineError, EngineResult, TransportError};
pub use events::{EscalationEvent, EventBus, EventFilter, SharedEventBus, StopReason};
pub use executor::{Executor, ExecutorContext, ExecutorReport};
pub use plan::{ContactMethod, Plan, PlanId, Step, MAX_STEP_WAIT};
pub use registry::{AckCode, ConversationKey, Registry, SharedRegistry};
