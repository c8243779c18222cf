//! Service configuration
//!
//! ```toml
//! [service]
//! listen = "0.0.0.0:8080"
//! callback_url_base = "https://alerts.example.com"
//!
//! [twilio]
//! account_sid = "AC..."
//! auth_token = "..."
//! from_number = "+15550009999"
//!
//! [engine]
//! ack_code_digits = 4
//! shutdown_grace_secs = 5
//! ```
//!
//! Every section is optional. Credentials are usually supplied through the
//! environment instead of the file.

use std::net::SocketAddr;
use std::path::Path;

use anyhow::{Context, Result};
use escalation_engine::{EngineConfig, Plan};
use serde::Deserialize;

use crate::twilio::TwilioConfig;

/// HTTP listener settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub listen: SocketAddr,
    /// Public URL Twilio uses to reach this service
    pub callback_url_base: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            callback_url_base: "http://localhost:8080".to_string(),
        }
    }
}

/// Top-level configuration of the `escalator` service
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub twilio: TwilioConfig,
    pub engine: EngineConfig,
}

impl AppConfig {
    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).context(format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).context("Failed to parse escalator config TOML")
    }

    /// Load from `path` if given (defaults otherwise), then apply environment
    /// overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(val) = std::env::var("ESCALATOR_LISTEN") {
            self.service.listen = val
                .parse()
                .context(format!("ESCALATOR_LISTEN is not a socket address: {}", val))?;
        }
        if let Ok(val) = std::env::var("ESCALATOR_CALLBACK_URL_BASE") {
            self.service.callback_url_base = val;
        }
        if let Ok(val) = std::env::var("TWILIO_API_BASE_URL") {
            self.twilio.api_base_url = val;
        }
        if let Ok(val) = std::env::var("TWILIO_ACCOUNT_SID") {
            self.twilio.account_sid = val;
        }
        if let Ok(val) = std::env::var("TWILIO_AUTH_TOKEN") {
            self.twilio.auth_token = val;
        }
        if let Ok(val) = std::env::var("TWILIO_FROM_NUMBER") {
            self.twilio.from_number = val;
        }

        self.engine.apply_env();
        Ok(())
    }

    /// Whether enough Twilio settings are present to send anything
    pub fn twilio_configured(&self) -> bool {
        !self.twilio.account_sid.is_empty()
            && !self.twilio.auth_token.is_empty()
            && !self.twilio.from_number.is_empty()
    }
}

/// Plans submitted at start-up
///
/// ```toml
/// [[plan]]
/// recipient = "+15551234567"
/// message = "nightly backup failed"
///
/// [[plan.steps]]
/// method = "send_message"
/// notify_until_secs = 300
///
/// [[plan.steps]]
/// method = "place_call"
/// notify_every_secs = 120
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlanFile {
    #[serde(default, rename = "plan")]
    pub plans: Vec<Plan>,
}

impl PlanFile {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).context(format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).context("Failed to parse plans TOML")
    }
}
