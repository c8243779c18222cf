//! Engine configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables of the escalation engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Capacity of each of the dispatcher's inbound channels
    pub channel_capacity: usize,
    /// Digits in generated acknowledgment codes
    pub ack_code_digits: u32,
    /// How long shutdown waits for executors to exit
    #[serde(rename = "shutdown_grace_secs", with = "secs")]
    pub shutdown_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            ack_code_digits: 4,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `ESCALATION_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Override fields from `ESCALATION_*` environment variables. Unparsable
    /// values are ignored.
    pub fn apply_env(&mut self) {
        if let Ok(val) = std::env::var("ESCALATION_CHANNEL_CAPACITY") {
            if let Ok(n) = val.parse::<usize>() {
                self.channel_capacity = n.max(1);
            }
        }
        if let Ok(val) = std::env::var("ESCALATION_ACK_CODE_DIGITS") {
            if let Ok(n) = val.parse() {
                self.ack_code_digits = n;
            }
        }
        if let Ok(val) = std::env::var("ESCALATION_SHUTDOWN_GRACE_SECS") {
            if let Ok(n) = val.parse() {
                self.shutdown_grace = Duration::from_secs(n);
            }
        }
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
