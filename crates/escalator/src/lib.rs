//! Escalator service
//!
//! Wires the escalation engine to Twilio: outbound texts and voice calls,
//! the call scripts Twilio fetches, and the webhooks that carry
//! acknowledgments back.

#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod server;
pub mod twilio;
pub mod twiml;

pub use config::{AppConfig, PlanFile, ServiceConfig};
pub use server::{router, serve, AppState, SharedState};
pub use twilio::{SmsContact, TwilioClient, TwilioConfig, VoiceContact};
