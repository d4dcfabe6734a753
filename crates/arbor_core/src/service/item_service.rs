//! Single-item use cases: create, read, list and patch.
//!
//! # Responsibility
//! - Validate names, parents and depth before anything is written.
//! - Make sure every new item has a reachable admin.
//!
//! # Invariants
//! - Only folders accept children.
//! - A new path never exceeds `max_tree_depth` segments.
//! - Listings skip recycled rows and nodes the actor cannot see.

use crate::error::{CoreError, CoreResult};
use crate::model::actor::Actor;
use crate::model::item::{normalize_item_name, Item, ItemId, ItemPatch, NewItem};
use crate::model::membership::PermissionLevel;
use crate::model::now_epoch_ms;
use crate::model::path::ItemPath;
use crate::model::visibility::VisibilityKind;
use crate::repo::item_repo::{ItemStore, SqliteItemRepository};
use crate::repo::recycled_repo::{RecycledStore, SqliteRecycledRepository};
use crate::repo::visibility_repo::{SqliteVisibilityRepository, VisibilityStore};
use crate::service::hooks::{HookContext, HookPayload};
use crate::service::membership_service::ensure_admin;
use crate::service::{require_account, Engine};
use log::info;
use rusqlite::Transaction;
use std::time::Instant;
use uuid::Uuid;

/// Item service facade.
pub struct ItemService<'e> {
    engine: &'e Engine,
}

impl<'e> ItemService<'e> {
    pub fn new(engine: &'e Engine) -> Self {
        Self { engine }
    }

    /// Creates one item under `new.parent`, or a root when it is `None`.
    ///
    /// The creator ends up with admin on the new item, either inherited or
    /// through a fresh grant.
    pub fn create_item(
        &self,
        tx: &Transaction<'_>,
        actor: Actor,
        new: NewItem,
    ) -> CoreResult<Item> {
        let started_at = Instant::now();
        let account_id = require_account(actor)?;
        let name = normalize_item_name(&new.name)?;
        let id = Uuid::new_v4();

        let path = match new.parent {
            Some(parent_id) => {
                let parent =
                    self.engine
                        .authorizer()
                        .check(tx, actor, parent_id, PermissionLevel::Write)?;
                if !parent.kind.can_have_children() {
                    return Err(CoreError::ParentNotFolder(parent_id));
                }
                parent.path.child(id)
            }
            None => ItemPath::root(id),
        };
        let max_depth = self.engine.config().max_tree_depth;
        if path.depth() > max_depth {
            return Err(CoreError::HierarchyTooDeep { max_depth });
        }

        let now = now_epoch_ms();
        let item = Item {
            id,
            path,
            name,
            kind: new.kind,
            payload: new.payload,
            creator_id: Some(account_id),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        let ctx = HookContext { conn: tx, actor };
        let hooks = self.engine.hooks();
        hooks.run_pre(&ctx, &HookPayload::Create { item: &item })?;
        SqliteItemRepository::new(tx).insert_item(&item)?;
        ensure_admin(tx, &item.path, account_id)?;
        hooks.run_post(&ctx, &HookPayload::Create { item: &item })?;

        info!(
            "event=item_create module=item_service status=ok item_id={} kind={} depth={} duration_ms={}",
            item.id,
            item.kind.as_str(),
            item.path.depth(),
            started_at.elapsed().as_millis()
        );
        Ok(item)
    }

    /// Loads one live item the actor can read.
    pub fn get_item(&self, tx: &Transaction<'_>, actor: Actor, id: ItemId) -> CoreResult<Item> {
        self.engine
            .authorizer()
            .check(tx, actor, id, PermissionLevel::Read)
    }

    /// Direct live children, ordered by path.
    pub fn list_children(
        &self,
        tx: &Transaction<'_>,
        actor: Actor,
        id: ItemId,
    ) -> CoreResult<Vec<Item>> {
        let parent = self.get_item(tx, actor, id)?;
        let children = SqliteItemRepository::new(tx).list_children(&parent.path, false)?;
        self.visible_below(tx, actor, &parent.path, children)
    }

    /// Every live descendant in pre-order.
    pub fn list_descendants(
        &self,
        tx: &Transaction<'_>,
        actor: Actor,
        id: ItemId,
    ) -> CoreResult<Vec<Item>> {
        let root = self.get_item(tx, actor, id)?;
        let descendants = SqliteItemRepository::new(tx).list_descendants(&root.path, false)?;
        self.visible_below(tx, actor, &root.path, descendants)
    }

    /// Readable ancestors of the item, root-first, excluding the item.
    pub fn list_ancestors(
        &self,
        tx: &Transaction<'_>,
        actor: Actor,
        id: ItemId,
    ) -> CoreResult<Vec<Item>> {
        let item = self.get_item(tx, actor, id)?;
        let mut chain = item.path.ancestors_or_self();
        chain.pop();
        let ancestors = SqliteItemRepository::new(tx).list_by_paths(&chain, false)?;

        let authorizer = self.engine.authorizer();
        let mut visible = Vec::with_capacity(ancestors.len());
        for ancestor in ancestors {
            if authorizer
                .effective_permission(tx, actor, &ancestor)?
                .is_some()
            {
                visible.push(ancestor);
            }
        }
        Ok(visible)
    }

    /// Renames the item and/or merges `patch.payload` into its payload.
    ///
    /// Object payloads merge key by key; any other payload replaces the
    /// stored one.
    pub fn patch_item(
        &self,
        tx: &Transaction<'_>,
        actor: Actor,
        id: ItemId,
        patch: ItemPatch,
    ) -> CoreResult<Item> {
        require_account(actor)?;
        let current = self
            .engine
            .authorizer()
            .check(tx, actor, id, PermissionLevel::Write)?;

        let name = match patch.name.as_deref() {
            Some(name) => normalize_item_name(name)?,
            None => current.name.clone(),
        };
        let payload = match patch.payload.clone() {
            Some(incoming) => merge_payload(current.payload.clone(), incoming),
            None => current.payload.clone(),
        };

        let ctx = HookContext { conn: tx, actor };
        let hooks = self.engine.hooks();
        hooks.run_pre(
            &ctx,
            &HookPayload::Update {
                item: &current,
                patch: &patch,
            },
        )?;

        let updated_at = now_epoch_ms();
        SqliteItemRepository::new(tx).update_item(id, &name, &payload, updated_at)?;
        let updated = Item {
            name,
            payload,
            updated_at,
            ..current
        };
        hooks.run_post(
            &ctx,
            &HookPayload::Update {
                item: &updated,
                patch: &patch,
            },
        )?;

        info!(
            "event=item_patch module=item_service status=ok item_id={}",
            id
        );
        Ok(updated)
    }

    /// Recycle roots the actor administers, most recently recycled first.
    pub fn list_recycled(&self, tx: &Transaction<'_>, actor: Actor) -> CoreResult<Vec<Item>> {
        let account_id = require_account(actor)?;
        let items = SqliteItemRepository::new(tx);

        let entries = SqliteRecycledRepository::new(tx).list_recycled_for_admin(account_id)?;
        let mut recycled = Vec::with_capacity(entries.len());
        for entry in entries {
            if let Some(item) = items.get_item(entry.item_id, true)? {
                recycled.push(item);
            }
        }
        Ok(recycled)
    }

    /// Drops nodes a `hidden` flag below `root` conceals from the actor.
    fn visible_below(
        &self,
        tx: &Transaction<'_>,
        actor: Actor,
        root: &ItemPath,
        candidates: Vec<Item>,
    ) -> CoreResult<Vec<Item>> {
        let hidden_below = SqliteVisibilityRepository::new(tx)
            .list_in_subtree(root)?
            .iter()
            .any(|flag| flag.kind == VisibilityKind::Hidden && flag.item_path != *root);
        if !hidden_below {
            return Ok(candidates);
        }

        let authorizer = self.engine.authorizer();
        let mut visible = Vec::with_capacity(candidates.len());
        for item in candidates {
            if authorizer.effective_permission(tx, actor, &item)?.is_some() {
                visible.push(item);
            }
        }
        Ok(visible)
    }
}

fn merge_payload(current: serde_json::Value, incoming: serde_json::Value) -> serde_json::Value {
    match (current, incoming) {
        (serde_json::Value::Object(mut base), serde_json::Value::Object(changes)) => {
            base.extend(changes);
            serde_json::Value::Object(base)
        }
        (_, incoming) => incoming,
    }
}

#[cfg(test)]
mod tests {
    use super::merge_payload;
    use serde_json::json;

    #[test]
    fn object_payloads_merge_shallowly() {
        let merged = merge_payload(
            json!({"url": "https://a", "meta": {"x": 1}}),
            json!({"meta": {"y": 2}, "title": "A"}),
        );
        assert_eq!(
            merged,
            json!({"url": "https://a", "meta": {"y": 2}, "title": "A"})
        );
    }

    #[test]
    fn non_object_payload_replaces() {
        assert_eq!(merge_payload(json!({"a": 1}), json!([1, 2])), json!([1, 2]));
    }
}
