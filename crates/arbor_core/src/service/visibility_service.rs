//! Inherited visibility flag use cases.
//!
//! # Invariants
//! - A chain (ancestors, self and descendants) never carries two flags
//!   that conflict; checked on every write that changes a chain.

use crate::error::{CoreError, CoreResult};
use crate::model::actor::Actor;
use crate::model::item::ItemId;
use crate::model::membership::PermissionLevel;
use crate::model::now_epoch_ms;
use crate::model::path::ItemPath;
use crate::model::visibility::{ItemVisibility, VisibilityKind};
use crate::repo::visibility_repo::{SqliteVisibilityRepository, VisibilityStore};
use crate::service::{require_account, Engine};
use log::info;
use rusqlite::{Connection, Transaction};
use uuid::Uuid;

/// Flag service facade.
pub struct VisibilityService<'e> {
    engine: &'e Engine,
}

impl<'e> VisibilityService<'e> {
    pub fn new(engine: &'e Engine) -> Self {
        Self { engine }
    }

    /// Attaches a `kind` flag to the item.
    pub fn set_visibility(
        &self,
        tx: &Transaction<'_>,
        actor: Actor,
        item_id: ItemId,
        kind: VisibilityKind,
    ) -> CoreResult<ItemVisibility> {
        let creator_id = require_account(actor)?;
        let item = self
            .engine
            .authorizer()
            .check(tx, actor, item_id, PermissionLevel::Admin)?;

        let repo = SqliteVisibilityRepository::new(tx);
        let mut touching = repo.list_on_paths(&item.path.ancestors_or_self())?;
        touching.extend(repo.list_in_subtree(&item.path)?);
        if touching.iter().any(|flag| kind.conflicts_with(flag.kind)) {
            return Err(CoreError::VisibilityConflict { item_id, kind });
        }

        let visibility = ItemVisibility {
            id: Uuid::new_v4(),
            item_path: item.path,
            kind,
            creator_id: Some(creator_id),
            created_at: now_epoch_ms(),
        };
        repo.insert_visibility(&visibility)?;
        info!(
            "event=visibility_set module=visibility_service status=ok item_id={} kind={}",
            item_id, kind
        );
        Ok(visibility)
    }

    /// Detaches the `kind` flag attached directly to the item.
    pub fn remove_visibility(
        &self,
        tx: &Transaction<'_>,
        actor: Actor,
        item_id: ItemId,
        kind: VisibilityKind,
    ) -> CoreResult<ItemVisibility> {
        require_account(actor)?;
        let item = self
            .engine
            .authorizer()
            .check(tx, actor, item_id, PermissionLevel::Admin)?;
        let repo = SqliteVisibilityRepository::new(tx);
        let visibility = repo
            .find_visibility(&item.path, kind)?
            .ok_or(CoreError::VisibilityNotFound { item_id, kind })?;
        repo.delete_visibility(&item.path, kind)?;
        info!(
            "event=visibility_remove module=visibility_service status=ok item_id={} kind={}",
            item_id, kind
        );
        Ok(visibility)
    }

    /// Flags in effect on the item, root-first.
    pub fn list_for_item(
        &self,
        tx: &Transaction<'_>,
        actor: Actor,
        item_id: ItemId,
    ) -> CoreResult<Vec<ItemVisibility>> {
        let item = self
            .engine
            .authorizer()
            .check(tx, actor, item_id, PermissionLevel::Read)?;
        let flags =
            SqliteVisibilityRepository::new(tx).list_on_paths(&item.path.ancestors_or_self())?;
        Ok(flags)
    }
}

/// Flags on the chain of `parent` (itself and its ancestors), or none for a
/// root destination.
pub(crate) fn chain_flags(
    conn: &Connection,
    parent: Option<&ItemPath>,
) -> CoreResult<Vec<ItemVisibility>> {
    match parent {
        Some(path) => {
            Ok(SqliteVisibilityRepository::new(conn).list_on_paths(&path.ancestors_or_self())?)
        }
        None => Ok(Vec::new()),
    }
}

/// First flag of `subtree` that conflicts with any flag of `chain`.
pub(crate) fn first_conflict<'a>(
    subtree: &'a [ItemVisibility],
    chain: &[ItemVisibility],
) -> Option<&'a ItemVisibility> {
    subtree.iter().find(|flag| {
        chain
            .iter()
            .any(|existing| flag.kind.conflicts_with(existing.kind))
    })
}
