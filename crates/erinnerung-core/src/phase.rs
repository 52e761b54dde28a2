//! Coarse lifecycle phase derived from a condition ledger.

use serde::{Deserialize, Serialize};

use crate::conditions::Conditions;
use crate::resources::endpoint_conditions::NO_ASSOCIATED_PAYLOADS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    Pending,
    AwaitingPayloads,
    Ready,
}

impl Phase {
    /// Derives the phase from the current ledger. First match wins:
    /// empty ledger is `Pending`, `NoAssociatedPayloads=True` is
    /// `AwaitingPayloads`, anything else is `Ready`.
    pub fn aggregate(conditions: &Conditions) -> Self {
        if conditions.is_empty() {
            Phase::Pending
        } else if conditions.is_true(NO_ASSOCIATED_PAYLOADS) {
            Phase::AwaitingPayloads
        } else {
            Phase::Ready
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Pending => "Pending",
            Phase::AwaitingPayloads => "AwaitingPayloads",
            Phase::Ready => "Ready",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
