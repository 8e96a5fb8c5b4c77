use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

use crate::types::UserId;

/// Allows at most one assistant turn in flight per user.
///
/// Entry never waits: a second caller for the same user is refused until the
/// first guard is dropped.
#[derive(Debug, Default)]
pub struct ConversationGate {
    in_flight: Mutex<HashSet<UserId>>,
}

/// Holds the gate for one user; dropping it releases the user
#[derive(Debug)]
pub struct GateGuard {
    gate: Arc<ConversationGate>,
    user_id: UserId,
}

impl GateGuard {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        self.gate.exit(&self.user_id);
    }
}

impl ConversationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the user busy, or return None if a turn is already in flight
    pub fn try_enter(self: &Arc<Self>, user_id: &str) -> Option<GateGuard> {
        if !self.in_flight.lock().insert(user_id.to_string()) {
            return None;
        }
        Some(GateGuard {
            gate: Arc::clone(self),
            user_id: user_id.to_string(),
        })
    }

    /// Clear the busy mark. Returns false if the user was not busy.
    pub fn exit(&self, user_id: &str) -> bool {
        self.in_flight.lock().remove(user_id)
    }

    pub fn is_busy(&self, user_id: &str) -> bool {
        self.in_flight.lock().contains(user_id)
    }

    pub fn busy_users(&self) -> HashSet<UserId> {
        self.in_flight.lock().clone()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }
}
