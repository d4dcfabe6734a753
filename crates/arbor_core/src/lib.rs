//! Hierarchical item tree with inherited permissions.
//!
//! Items form a forest addressed by materialized paths. Grants and flags are
//! keyed by path and inherited by every descendant. Structural mutations
//! (move, copy, recycle, restore, purge) rewrite whole subtrees inside one
//! transaction, and can be batched through [`BulkCoordinator`].

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{ConfigError, DetachedAdminPolicy, EngineConfig, RestoreFallback};
pub use db::{
    open_db, open_db_in_memory, open_shared, open_shared_in_memory, with_transaction, DbError,
    RetryPolicy, SharedConnection,
};
pub use error::{CoreError, CoreResult, ErrorKind, ItemFailure};
pub use logging::{init_logging, logging_status, LoggingError};
pub use model::actor::{AccountId, Actor};
pub use model::item::{Item, ItemId, ItemKind, ItemPatch, NewItem, RecycledItem};
pub use model::membership::{ItemMembership, MembershipId, PermissionLevel};
pub use model::path::{ItemPath, PathError};
pub use model::visibility::{ItemVisibility, VisibilityKind};
pub use repo::{StoreError, StoreResult};
pub use service::bulk::{
    BatchEvent, BatchId, BatchTicket, BulkCoordinator, BulkOperation, ItemOutcome,
};
pub use service::hooks::{
    HookAction, HookContext, HookError, HookPayload, HookRegistry, ItemHook,
};
pub use service::notifier::{
    ActorNotifier, ChannelNotifier, LogNotifier, Notification, MEMBER_ITEMS_TOPIC,
};
pub use service::tree_mutation::{
    CopyOutcome, MoveOutcome, PurgeOutcome, RecycleOutcome, RestoreOutcome,
};
pub use service::Engine;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
