//! Permission grant model.
//!
//! # Invariants
//! - `PermissionLevel` ordering is `Read < Write < Admin`; effective
//!   permission is the maximum over every grant on the ancestor chain.
//! - A grant applies to the item at `item_path` and all of its descendants.

use crate::model::actor::AccountId;
use crate::model::path::ItemPath;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable membership identifier.
pub type MembershipId = Uuid;

/// Ordered permission level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    Read,
    Write,
    Admin,
}

impl PermissionLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "read" => Some(Self::Read),
            "write" => Some(Self::Write),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

impl Display for PermissionLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One permission grant attached to an item path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMembership {
    pub id: MembershipId,
    pub item_path: ItemPath,
    pub account_id: AccountId,
    pub level: PermissionLevel,
    pub creator_id: Option<AccountId>,
    pub created_at: i64,
    pub updated_at: i64,
}
