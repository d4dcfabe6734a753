//! Item domain model.
//!
//! # Responsibility
//! - Define the canonical node record of the item forest.
//! - Provide name normalization shared by create/patch flows.
//!
//! # Invariants
//! - `path` always ends with `id`.
//! - `deleted_at.is_some()` is the source of truth for "in recycle bin".
//! - `payload` is opaque to the core; only plugins interpret it.

use crate::model::actor::AccountId;
use crate::model::path::ItemPath;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable item identifier.
pub type ItemId = Uuid;

/// Longest accepted item name, in characters.
pub const MAX_ITEM_NAME_CHARS: usize = 500;

/// Discriminated item type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// Container; the only kind that may have children.
    Folder,
    Document,
    File,
    Link,
    App,
    Shortcut,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Folder => "folder",
            Self::Document => "document",
            Self::File => "file",
            Self::Link => "link",
            Self::App => "app",
            Self::Shortcut => "shortcut",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "folder" => Some(Self::Folder),
            "document" => Some(Self::Document),
            "file" => Some(Self::File),
            "link" => Some(Self::Link),
            "app" => Some(Self::App),
            "shortcut" => Some(Self::Shortcut),
            _ => None,
        }
    }

    pub fn can_have_children(self) -> bool {
        matches!(self, Self::Folder)
    }
}

/// One node of the forest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub path: ItemPath,
    pub name: String,
    pub kind: ItemKind,
    /// Type-specific data owned by plugins.
    pub payload: serde_json::Value,
    pub creator_id: Option<AccountId>,
    /// Epoch ms.
    pub created_at: i64,
    /// Epoch ms.
    pub updated_at: i64,
    /// Epoch ms recycle marker.
    pub deleted_at: Option<i64>,
}

impl Item {
    pub fn is_recycled(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_root(&self) -> bool {
        self.path.parent().is_none()
    }

    /// Id of the parent item, if any.
    pub fn parent_id(&self) -> Option<ItemId> {
        self.path.parent().and_then(|parent| parent.leaf_id().ok())
    }
}

/// Input for item creation.
#[derive(Debug, Clone, PartialEq)]
pub struct NewItem {
    /// `None` creates a root item.
    pub parent: Option<ItemId>,
    pub name: String,
    pub kind: ItemKind,
    pub payload: serde_json::Value,
}

impl NewItem {
    pub fn folder(parent: Option<ItemId>, name: impl Into<String>) -> Self {
        Self {
            parent,
            name: name.into(),
            kind: ItemKind::Folder,
            payload: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn document(
        parent: Option<ItemId>,
        name: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            parent,
            name: name.into(),
            kind: ItemKind::Document,
            payload,
        }
    }
}

/// Partial update for one item. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemPatch {
    pub name: Option<String>,
    pub payload: Option<serde_json::Value>,
}

/// Recycle-bin entry: one row per recycle root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecycledItem {
    pub item_id: ItemId,
    pub item_path: ItemPath,
    pub creator_id: Option<AccountId>,
    pub created_at: i64,
}

/// Item name validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemNameError {
    Blank,
    TooLong { max_chars: usize },
}

impl Display for ItemNameError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blank => write!(f, "item name must not be blank"),
            Self::TooLong { max_chars } => {
                write!(f, "item name must not exceed {max_chars} characters")
            }
        }
    }
}

impl Error for ItemNameError {}

/// Trims and validates a user-facing item name.
pub fn normalize_item_name(value: &str) -> Result<String, ItemNameError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ItemNameError::Blank);
    }
    if trimmed.chars().count() > MAX_ITEM_NAME_CHARS {
        return Err(ItemNameError::TooLong {
            max_chars: MAX_ITEM_NAME_CHARS,
        });
    }
    Ok(trimmed.to_string())
}
