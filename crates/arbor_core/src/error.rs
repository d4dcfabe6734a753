//! Engine-level error taxonomy.
//!
//! # Responsibility
//! - Map every failure of the service layer onto one of five stable kinds.
//! - Carry per-item failure summaries for batch results.
//!
//! # Invariants
//! - `CoreError::kind()` is total; new variants must pick a kind.
//! - Only storage busy/locked errors are retryable.

use crate::db::{DbError, Retryable};
use crate::model::item::{ItemId, ItemNameError};
use crate::model::membership::{MembershipId, PermissionLevel};
use crate::model::path::ItemPath;
use crate::model::visibility::VisibilityKind;
use crate::repo::StoreError;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Result type used by service operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Coarse failure category exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    Conflict,
    Validation,
    Infra,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Forbidden => "forbidden",
            Self::Conflict => "conflict",
            Self::Validation => "validation",
            Self::Infra => "infra",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from engine operations.
#[derive(Debug)]
pub enum CoreError {
    /// Item does not exist or is not visible in the requested state.
    ItemNotFound(ItemId),
    /// Membership does not exist.
    MembershipNotFound(MembershipId),
    /// No flag of that kind is attached directly to the item.
    VisibilityNotFound { item_id: ItemId, kind: VisibilityKind },
    /// Item exists but is not a recycle root.
    NotRecycled(ItemId),
    /// Actor lacks the required level on the item.
    Forbidden {
        item_id: ItemId,
        required: PermissionLevel,
    },
    /// Operation needs an authenticated account.
    AnonymousActor,
    /// Removing or downgrading this grant would leave the path without admin.
    CannotRemoveLastAdmin { item_path: ItemPath },
    /// Target parent lies inside the moved/copied subtree.
    CycleDetected { item_id: ItemId, parent_id: ItemId },
    /// Flag would duplicate or contradict another flag on the same chain.
    VisibilityConflict {
        item_id: ItemId,
        kind: VisibilityKind,
    },
    /// Account already holds a grant on exactly this item.
    MembershipExists { item_id: ItemId },
    /// Restore target parent is missing or recycled.
    ParentUnavailable { item_id: ItemId },
    /// A pre-hook refused the mutation.
    HookRejected { hook: String, message: String },
    /// Name is blank or too long.
    InvalidName(ItemNameError),
    /// Item cannot become its own parent.
    SelfParent(ItemId),
    /// Parent exists but cannot have children.
    ParentNotFolder(ItemId),
    /// Resulting tree would exceed the configured depth.
    HierarchyTooDeep { max_depth: usize },
    /// Copy source subtree is larger than allowed.
    TooManyDescendants { count: usize, max: usize },
    /// Batch has no targets.
    EmptyTargets,
    /// Batch lists the same target twice.
    DuplicateTarget(ItemId),
    /// Batch exceeds the configured size.
    TooManyTargets { count: usize, max: usize },
    /// Storage failure.
    Store(StoreError),
    /// A post-hook failed after the mutation was applied.
    Hook { hook: String, message: String },
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ItemNotFound(_)
            | Self::MembershipNotFound(_)
            | Self::VisibilityNotFound { .. }
            | Self::NotRecycled(_) => ErrorKind::NotFound,
            Self::Forbidden { .. } | Self::AnonymousActor => ErrorKind::Forbidden,
            Self::CannotRemoveLastAdmin { .. }
            | Self::CycleDetected { .. }
            | Self::VisibilityConflict { .. }
            | Self::MembershipExists { .. }
            | Self::ParentUnavailable { .. }
            | Self::HookRejected { .. } => ErrorKind::Conflict,
            Self::InvalidName(_)
            | Self::SelfParent(_)
            | Self::ParentNotFolder(_)
            | Self::HierarchyTooDeep { .. }
            | Self::TooManyDescendants { .. }
            | Self::EmptyTargets
            | Self::DuplicateTarget(_)
            | Self::TooManyTargets { .. } => ErrorKind::Validation,
            Self::Store(_) | Self::Hook { .. } => ErrorKind::Infra,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_retryable())
    }
}

impl Display for CoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ItemNotFound(id) => write!(f, "item not found: {id}"),
            Self::MembershipNotFound(id) => write!(f, "membership not found: {id}"),
            Self::VisibilityNotFound { item_id, kind } => {
                write!(f, "no {kind} flag attached to item {item_id}")
            }
            Self::NotRecycled(id) => write!(f, "item is not a recycle root: {id}"),
            Self::Forbidden { item_id, required } => {
                write!(f, "{required} permission required on item {item_id}")
            }
            Self::AnonymousActor => write!(f, "operation requires an account"),
            Self::CannotRemoveLastAdmin { item_path } => write!(
                f,
                "cannot remove the last admin reachable from {}",
                item_path.as_str()
            ),
            Self::CycleDetected { item_id, parent_id } => write!(
                f,
                "item {item_id} cannot be placed under its own descendant {parent_id}"
            ),
            Self::VisibilityConflict { item_id, kind } => {
                write!(f, "{kind} flag on item {item_id} conflicts with its chain")
            }
            Self::MembershipExists { item_id } => {
                write!(f, "account already has a membership on item {item_id}")
            }
            Self::ParentUnavailable { item_id } => {
                write!(f, "parent of item {item_id} is missing or recycled")
            }
            Self::HookRejected { hook, message } => {
                write!(f, "hook `{hook}` rejected the operation: {message}")
            }
            Self::InvalidName(err) => write!(f, "{err}"),
            Self::SelfParent(id) => write!(f, "item {id} cannot be its own parent"),
            Self::ParentNotFolder(id) => write!(f, "parent must be a folder: {id}"),
            Self::HierarchyTooDeep { max_depth } => {
                write!(f, "hierarchy would exceed {max_depth} levels")
            }
            Self::TooManyDescendants { count, max } => {
                write!(f, "subtree has {count} descendants, at most {max} allowed")
            }
            Self::EmptyTargets => write!(f, "batch must name at least one item"),
            Self::DuplicateTarget(id) => write!(f, "batch names item {id} more than once"),
            Self::TooManyTargets { count, max } => {
                write!(f, "batch names {count} items, at most {max} allowed")
            }
            Self::Store(err) => write!(f, "{err}"),
            Self::Hook { hook, message } => write!(f, "hook `{hook}` failed: {message}"),
        }
    }
}

impl Error for CoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::InvalidName(err) => Some(err),
            _ => None,
        }
    }
}

impl Retryable for CoreError {
    fn is_retryable(&self) -> bool {
        CoreError::is_retryable(self)
    }
}

impl From<StoreError> for CoreError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<DbError> for CoreError {
    fn from(value: DbError) -> Self {
        Self::Store(StoreError::Db(value))
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Store(StoreError::from(value))
    }
}

impl From<ItemNameError> for CoreError {
    fn from(value: ItemNameError) -> Self {
        Self::InvalidName(value)
    }
}

/// Serializable summary of one failed item inside a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&CoreError> for ItemFailure {
    fn from(value: &CoreError) -> Self {
        Self {
            kind: value.kind(),
            message: value.to_string(),
        }
    }
}
