//! Inherited visibility flag model.
//!
//! # Invariants
//! - A flag applies to the item at `item_path` and every descendant.
//! - One chain never carries the same kind twice, and never carries two
//!   mutually exclusive kinds; both are enforced at write time.

use crate::model::actor::AccountId;
use crate::model::path::ItemPath;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Flag kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityKind {
    /// Grants implicit read to every actor.
    Public,
    /// Hides the subtree from read-only holders.
    Hidden,
}

impl VisibilityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Hidden => "hidden",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "public" => Some(Self::Public),
            "hidden" => Some(Self::Hidden),
            _ => None,
        }
    }

    /// Whether a flag of `self` may not share a chain with a flag of `other`.
    pub fn conflicts_with(self, other: VisibilityKind) -> bool {
        match (self, other) {
            (Self::Public, Self::Hidden) | (Self::Hidden, Self::Public) => true,
            // Same kind twice on one chain is redundant.
            (current, existing) => current == existing,
        }
    }
}

impl Display for VisibilityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One flag attached to an item path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemVisibility {
    pub id: Uuid,
    pub item_path: ItemPath,
    pub kind: VisibilityKind,
    pub creator_id: Option<AccountId>,
    pub created_at: i64,
}
