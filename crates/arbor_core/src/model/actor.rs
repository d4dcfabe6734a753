//! Acting principal model.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable account identifier. Accounts themselves live outside the core.
pub type AccountId = Uuid;

/// Principal on whose behalf an operation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "id")]
pub enum Actor {
    /// Unauthenticated caller; may only read public chains.
    Anonymous,
    Account(AccountId),
}

impl Actor {
    pub fn account_id(self) -> Option<AccountId> {
        match self {
            Self::Anonymous => None,
            Self::Account(id) => Some(id),
        }
    }
}

impl From<AccountId> for Actor {
    fn from(value: AccountId) -> Self {
        Self::Account(value)
    }
}

impl Display for Actor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anonymous => write!(f, "anonymous"),
            Self::Account(id) => write!(f, "{id}"),
        }
    }
}
