//! Registry: the engine's shared bookkeeping
//!
//! Two maps live behind one lock:
//!
//! 1. **Stop registry** (`stoppers.rs`): plan id → cancellation signal, one
//!    entry per running executor.
//! 2. **Conversation correlator** (`conversations.rs`): (recipient, code) →
//!    plan id, one entry per outstanding acknowledgment-eligible attempt.
//!
//! # Lock discipline
//!
//! The lock is a plain `std::sync::Mutex`. Every operation takes it, mutates
//! or reads, and releases it before returning; nothing awaits while holding
//! it. No operation spans both maps transactionally.
//!
//! ```text
//! Dispatcher ──register──▶ ┌──────────────┐ ◀──unregister── Executor
//!                          │   Registry   │ ◀──issue_code── Executor
//! Stop request ─signal───▶ │ (one Mutex)  │
//!                          └──────────────┘ ◀──resolve───── Webhook
//! ```

pub mod conversations;
pub mod stoppers;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

use crate::plan::{Plan, PlanId};

pub use conversations::{AckCode, ConversationKey};

/// Shared reference to the Registry
pub type SharedRegistry = Arc<Registry>;

/// A running plan's registry entry
struct StopEntry {
    token: CancellationToken,
    plan: Arc<Plan>,
}

#[derive(Default)]
struct RegistryState {
    stoppers: HashMap<PlanId, StopEntry>,
    conversations: HashMap<ConversationKey, PlanId>,
}

/// Process-wide registry of running plans and pending acknowledgments
pub struct Registry {
    state: Mutex<RegistryState>,
    /// Parent of every plan's cancellation token
    shutdown: CancellationToken,
}

impl Registry {
    /// Create a registry with its own shutdown token
    pub fn new() -> Self {
        Self::with_shutdown(CancellationToken::new())
    }

    /// Create a registry whose plan tokens are children of `shutdown`
    pub fn with_shutdown(shutdown: CancellationToken) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            shutdown,
        }
    }

    /// Create a shared reference to this registry
    pub fn shared(self) -> SharedRegistry {
        Arc::new(self)
    }

    /// Token cancelled when the whole engine shuts down
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        // Every critical section leaves the maps consistent, so a poisoned
        // lock still guards valid data.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
