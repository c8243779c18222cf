//! Conversation correlator operations
//!
//! Correlates an inbound reply `(recipient, code)` back to the plan whose
//! attempt issued the code. Resolution consumes the entry, so a replayed reply
//! resolves at most once.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::Registry;
use crate::plan::PlanId;

/// Maximum digits an acknowledgment code may have
pub const MAX_CODE_DIGITS: u32 = 9;

/// Attempts at finding a code not already outstanding for a recipient
const CODE_ATTEMPTS: usize = 16;

/// Inclusive numeric range of codes with `digits` digits
fn code_range(digits: u32) -> (u32, u32) {
    let digits = digits.clamp(1, MAX_CODE_DIGITS);
    let low = if digits == 1 { 0 } else { 10u32.pow(digits - 1) };
    (low, 10u32.pow(digits) - 1)
}

/// Numeric acknowledgment code sent with a message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AckCode(String);

impl AckCode {
    /// Random code with exactly `digits` digits (no leading zero)
    pub fn generate(digits: u32) -> Self {
        let (low, high) = code_range(digits);
        Self(rand::thread_rng().gen_range(low..=high).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AckCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Error for reply text that is not an acknowledgment code
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("not an acknowledgment code")]
pub struct NotACode;

impl FromStr for AckCode {
    type Err = NotACode;

    /// Parse reply text, ignoring surrounding whitespace
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.len() > MAX_CODE_DIGITS as usize {
            return Err(NotACode);
        }
        if !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(NotACode);
        }
        Ok(Self(s.to_string()))
    }
}

/// Correlation key for an outstanding acknowledgment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    pub recipient: String,
    pub code: AckCode,
}

impl ConversationKey {
    pub fn new(recipient: impl Into<String>, code: AckCode) -> Self {
        Self {
            recipient: recipient.into(),
            code,
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.recipient, self.code)
    }
}

impl Registry {
    /// Record a pending acknowledgment for `plan_id`
    pub fn remember(&self, recipient: &str, code: AckCode, plan_id: PlanId) {
        let key = ConversationKey::new(recipient, code);
        let mut state = self.lock();
        if let Some(previous) = state.conversations.insert(key.clone(), plan_id) {
            if previous != plan_id {
                warn!(%key, %previous, %plan_id, "Conversation key reused; older plan can no longer be acknowledged with it");
            }
        }
    }

    /// Generate a code that is not outstanding for `recipient` and remember it
    pub fn issue_code(&self, recipient: &str, plan_id: PlanId, digits: u32) -> AckCode {
        let mut state = self.lock();
        let mut key = ConversationKey::new(recipient, AckCode::generate(digits));
        for _ in 1..CODE_ATTEMPTS {
            if !state.conversations.contains_key(&key) {
                break;
            }
            key.code = AckCode::generate(digits);
        }
        if state.conversations.contains_key(&key) {
            // Dense code space: walk it from the last draw
            let (low, high) = code_range(digits);
            let start: u32 = key.code.as_str().parse().unwrap_or(low);
            let span = high - low + 1;
            for offset in 1..span {
                let candidate = ConversationKey::new(
                    recipient,
                    AckCode((low + (start - low + offset) % span).to_string()),
                );
                if !state.conversations.contains_key(&candidate) {
                    key = candidate;
                    break;
                }
            }
        }
        if let Some(previous) = state.conversations.insert(key.clone(), plan_id) {
            warn!(%key, %previous, %plan_id, "Code space exhausted for recipient; reusing a live code");
        }
        debug!(%key, %plan_id, "Acknowledgment code issued");
        key.code
    }

    /// Look up and consume a pending acknowledgment
    pub fn resolve(&self, recipient: &str, code: &AckCode) -> Option<PlanId> {
        let key = ConversationKey::new(recipient, code.clone());
        self.lock().conversations.remove(&key)
    }

    /// Drop a pending acknowledgment without resolving it
    pub fn forget(&self, recipient: &str, code: &AckCode) {
        let key = ConversationKey::new(recipient, code.clone());
        self.lock().conversations.remove(&key);
    }

    pub fn pending_conversations(&self) -> usize {
        self.lock().conversations.len()
    }
}
