//! Subtree-wide structural mutations.
//!
//! # Responsibility
//! - Move, copy, recycle, restore and purge whole subtrees inside the
//!   caller's transaction.
//! - Carry grants, flags and recycle-bin rows along with every path change.
//!
//! # Invariants
//! - Path rewrites are one range statement per table; subtree size only
//!   affects copy, which is bounded by `max_descendants_for_copy`.
//! - Validation (cycle, depth, exclusivity) happens before the first write,
//!   so a rejected mutation leaves every table untouched.
//! - After every move or restore some admin grant is reachable from the
//!   moved root.

use crate::config::{DetachedAdminPolicy, RestoreFallback};
use crate::error::{CoreError, CoreResult};
use crate::model::actor::{AccountId, Actor};
use crate::model::item::{Item, ItemId, RecycledItem};
use crate::model::membership::PermissionLevel;
use crate::model::now_epoch_ms;
use crate::model::path::ItemPath;
use crate::model::visibility::ItemVisibility;
use crate::repo::item_repo::{ItemStore, SqliteItemRepository};
use crate::repo::membership_repo::{MembershipStore, SqliteMembershipRepository};
use crate::repo::recycled_repo::{RecycledStore, SqliteRecycledRepository};
use crate::repo::visibility_repo::{SqliteVisibilityRepository, VisibilityStore};
use crate::repo::StoreError;
use crate::service::hooks::{HookContext, HookPayload};
use crate::service::membership_service::insert_membership;
use crate::service::visibility_service::{chain_flags, first_conflict};
use crate::service::{require_account, Engine};
use log::{debug, info};
use rusqlite::Transaction;
use std::collections::HashMap;
use std::time::Instant;
use uuid::Uuid;

/// Result of a move.
#[derive(Debug, Clone, PartialEq)]
pub struct MoveOutcome {
    /// Moved root at its new path.
    pub item: Item,
    pub previous_path: ItemPath,
    /// Rows rewritten below the root, recycled ones included.
    pub moved_descendants: usize,
}

/// Result of a copy.
#[derive(Debug, Clone, PartialEq)]
pub struct CopyOutcome {
    pub original: Item,
    pub copy: Item,
    /// `(original, copy)` id pairs in pre-order, root first.
    pub copied: Vec<(ItemId, ItemId)>,
}

/// Result of a recycle.
#[derive(Debug, Clone, PartialEq)]
pub struct RecycleOutcome {
    pub item: Item,
    /// Rows newly marked, root included.
    pub recycled_count: usize,
}

/// Result of a restore.
#[derive(Debug, Clone, PartialEq)]
pub struct RestoreOutcome {
    pub item: Item,
    /// Rows un-marked, root included.
    pub restored_count: usize,
}

/// Result of a purge.
#[derive(Debug, Clone, PartialEq)]
pub struct PurgeOutcome {
    /// Root as it was before deletion.
    pub item: Item,
    /// Item rows deleted, root included.
    pub purged_count: usize,
}

/// Structural mutation facade.
pub struct TreeMutationEngine<'e> {
    engine: &'e Engine,
}

impl<'e> TreeMutationEngine<'e> {
    pub fn new(engine: &'e Engine) -> Self {
        Self { engine }
    }

    /// Moves `item_id` with its subtree under `new_parent`, or to the root
    /// level when it is `None`.
    pub fn move_item(
        &self,
        tx: &Transaction<'_>,
        actor: Actor,
        item_id: ItemId,
        new_parent: Option<ItemId>,
    ) -> CoreResult<MoveOutcome> {
        let started_at = Instant::now();
        let account_id = require_account(actor)?;
        let config = self.engine.config();
        let authorizer = self.engine.authorizer();

        let item = authorizer.check(tx, actor, item_id, PermissionLevel::Admin)?;
        if new_parent == Some(item_id) {
            return Err(CoreError::SelfParent(item_id));
        }
        let destination = match new_parent {
            Some(parent_id) => {
                let parent = authorizer.check(tx, actor, parent_id, config.move_parent_level)?;
                if parent.path.is_descendant_or_self(&item.path) {
                    return Err(CoreError::CycleDetected { item_id, parent_id });
                }
                if !parent.kind.can_have_children() {
                    return Err(CoreError::ParentNotFolder(parent_id));
                }
                Some(parent)
            }
            None => None,
        };

        let previous_path = item.path.clone();
        if previous_path.parent().as_ref() == destination.as_ref().map(|parent| &parent.path) {
            debug!(
                "event=item_move module=tree_mutation status=ok item_id={} noop=true",
                item_id
            );
            return Ok(MoveOutcome {
                item,
                previous_path,
                moved_descendants: 0,
            });
        }

        let new_path = match &destination {
            Some(parent) => parent.path.child(item_id),
            None => ItemPath::root(item_id),
        };
        let items = SqliteItemRepository::new(tx);
        let height = items.subtree_height(&previous_path)?;
        if new_path.depth() + height > config.max_tree_depth {
            return Err(CoreError::HierarchyTooDeep {
                max_depth: config.max_tree_depth,
            });
        }

        let visibilities = SqliteVisibilityRepository::new(tx);
        let subtree_flags = visibilities.list_in_subtree(&previous_path)?;
        let target_chain = chain_flags(tx, destination.as_ref().map(|parent| &parent.path))?;
        if let Some(flag) = first_conflict(&subtree_flags, &target_chain) {
            return Err(CoreError::VisibilityConflict {
                item_id,
                kind: flag.kind,
            });
        }

        let ctx = HookContext { conn: tx, actor };
        let hooks = self.engine.hooks();
        hooks.run_pre(
            &ctx,
            &HookPayload::Move {
                item: &item,
                previous_path: &previous_path,
                destination: destination.as_ref(),
            },
        )?;

        let moved = rebase_everywhere(tx, &previous_path, &new_path, now_epoch_ms())?;
        self.reattach_admin(tx, &new_path, account_id)?;

        let item = items
            .get_item(item_id, false)?
            .ok_or(CoreError::ItemNotFound(item_id))?;
        hooks.run_post(
            &ctx,
            &HookPayload::Move {
                item: &item,
                previous_path: &previous_path,
                destination: destination.as_ref(),
            },
        )?;

        info!(
            "event=item_move module=tree_mutation status=ok item_id={} rows={} duration_ms={}",
            item_id,
            moved,
            started_at.elapsed().as_millis()
        );
        Ok(MoveOutcome {
            item,
            previous_path,
            moved_descendants: moved.saturating_sub(1),
        })
    }

    /// Duplicates the live subtree of `item_id` under `destination`, or as a
    /// new root when it is `None`.
    ///
    /// Grants are not copied; the actor gets admin on the copy root. Flags
    /// are copied unless they would conflict with the destination chain.
    pub fn copy_item(
        &self,
        tx: &Transaction<'_>,
        actor: Actor,
        item_id: ItemId,
        destination: Option<ItemId>,
    ) -> CoreResult<CopyOutcome> {
        let started_at = Instant::now();
        let account_id = require_account(actor)?;
        let config = self.engine.config();
        let authorizer = self.engine.authorizer();

        let original = authorizer.check(tx, actor, item_id, PermissionLevel::Read)?;
        let parent = match destination {
            Some(parent_id) => {
                let parent = authorizer.check(tx, actor, parent_id, config.copy_parent_level)?;
                if parent.path.is_descendant_or_self(&original.path) {
                    return Err(CoreError::CycleDetected { item_id, parent_id });
                }
                if !parent.kind.can_have_children() {
                    return Err(CoreError::ParentNotFolder(parent_id));
                }
                Some(parent)
            }
            None => None,
        };

        let items = SqliteItemRepository::new(tx);
        let count = items.count_descendants(&original.path, false)?;
        if count > config.max_descendants_for_copy {
            return Err(CoreError::TooManyDescendants {
                count,
                max: config.max_descendants_for_copy,
            });
        }
        let descendants = items.list_descendants(&original.path, false)?;

        let copy_root_id = Uuid::new_v4();
        let copy_root_path = match &parent {
            Some(parent) => parent.path.child(copy_root_id),
            None => ItemPath::root(copy_root_id),
        };
        let base_depth = original.path.depth();
        let height = descendants
            .iter()
            .map(|node| node.path.depth() - base_depth)
            .max()
            .unwrap_or(0);
        if copy_root_path.depth() + height > config.max_tree_depth {
            return Err(CoreError::HierarchyTooDeep {
                max_depth: config.max_tree_depth,
            });
        }

        let ctx = HookContext { conn: tx, actor };
        let hooks = self.engine.hooks();
        hooks.run_pre(
            &ctx,
            &HookPayload::Copy {
                original: &original,
                copy: None,
            },
        )?;

        let now = now_epoch_ms();
        let mut new_paths: HashMap<ItemPath, ItemPath> = HashMap::new();
        let mut pairs: Vec<(Item, Item)> = Vec::with_capacity(descendants.len() + 1);
        for source in std::iter::once(&original).chain(descendants.iter()) {
            let (copy_id, copy_path) = if source.id == original.id {
                (copy_root_id, copy_root_path.clone())
            } else {
                let copy_id = Uuid::new_v4();
                let parent_copy = source
                    .path
                    .parent()
                    .and_then(|source_parent| new_paths.get(&source_parent))
                    .ok_or_else(|| {
                        StoreError::InvalidData(format!(
                            "live item {} has no live parent",
                            source.id
                        ))
                    })?;
                (copy_id, parent_copy.child(copy_id))
            };
            let copy = Item {
                id: copy_id,
                path: copy_path.clone(),
                name: source.name.clone(),
                kind: source.kind,
                payload: source.payload.clone(),
                creator_id: Some(account_id),
                created_at: now,
                updated_at: now,
                deleted_at: None,
            };
            items.insert_item(&copy)?;
            new_paths.insert(source.path.clone(), copy_path);
            pairs.push((source.clone(), copy));
        }

        let visibilities = SqliteVisibilityRepository::new(tx);
        let target_chain = chain_flags(tx, parent.as_ref().map(|parent| &parent.path))?;
        for flag in visibilities.list_in_subtree(&original.path)? {
            let Some(copy_path) = new_paths.get(&flag.item_path) else {
                continue;
            };
            if first_conflict(std::slice::from_ref(&flag), &target_chain).is_some() {
                debug!(
                    "event=item_copy module=tree_mutation status=skip item_id={} dropped_flag={}",
                    item_id, flag.kind
                );
                continue;
            }
            visibilities.insert_visibility(&ItemVisibility {
                id: Uuid::new_v4(),
                item_path: copy_path.clone(),
                kind: flag.kind,
                creator_id: Some(account_id),
                created_at: now,
            })?;
        }

        insert_membership(
            tx,
            &copy_root_path,
            account_id,
            PermissionLevel::Admin,
            Some(account_id),
        )?;

        for (source, copy) in &pairs {
            hooks.run_post(
                &ctx,
                &HookPayload::Copy {
                    original: source,
                    copy: Some(copy),
                },
            )?;
        }

        let copied: Vec<(ItemId, ItemId)> = pairs
            .iter()
            .map(|(source, copy)| (source.id, copy.id))
            .collect();
        let copy = pairs
            .into_iter()
            .next()
            .map(|(_, copy)| copy)
            .ok_or(CoreError::ItemNotFound(copy_root_id))?;
        info!(
            "event=item_copy module=tree_mutation status=ok item_id={} copy_id={} rows={} duration_ms={}",
            item_id,
            copy.id,
            copied.len(),
            started_at.elapsed().as_millis()
        );
        Ok(CopyOutcome {
            original,
            copy,
            copied,
        })
    }

    /// Soft-deletes the item and every live descendant.
    pub fn recycle_item(
        &self,
        tx: &Transaction<'_>,
        actor: Actor,
        item_id: ItemId,
    ) -> CoreResult<RecycleOutcome> {
        let started_at = Instant::now();
        let account_id = require_account(actor)?;
        let item = self
            .engine
            .authorizer()
            .check(tx, actor, item_id, PermissionLevel::Admin)?;

        let ctx = HookContext { conn: tx, actor };
        let hooks = self.engine.hooks();
        hooks.run_pre(&ctx, &HookPayload::Recycle { item: &item })?;

        let deleted_at = now_epoch_ms();
        let recycled_count = SqliteItemRepository::new(tx).recycle_subtree(&item.path, deleted_at)?;
        SqliteRecycledRepository::new(tx).insert_recycled(&RecycledItem {
            item_id,
            item_path: item.path.clone(),
            creator_id: Some(account_id),
            created_at: deleted_at,
        })?;
        let item = Item {
            deleted_at: Some(deleted_at),
            ..item
        };
        hooks.run_post(&ctx, &HookPayload::Recycle { item: &item })?;

        info!(
            "event=item_recycle module=tree_mutation status=ok item_id={} rows={} duration_ms={}",
            item_id,
            recycled_count,
            started_at.elapsed().as_millis()
        );
        Ok(RecycleOutcome {
            item,
            recycled_count,
        })
    }

    /// Brings a recycle root and the part of its subtree it hid back.
    ///
    /// Descendants recycled on their own stay in the bin.
    pub fn restore_item(
        &self,
        tx: &Transaction<'_>,
        actor: Actor,
        item_id: ItemId,
    ) -> CoreResult<RestoreOutcome> {
        let started_at = Instant::now();
        let account_id = require_account(actor)?;
        let item = self
            .engine
            .authorizer()
            .get_for_admin_including_recycled(tx, actor, item_id)?;
        let recycled = SqliteRecycledRepository::new(tx);
        if recycled.get_recycled(item_id)?.is_none() {
            return Err(CoreError::NotRecycled(item_id));
        }

        let items = SqliteItemRepository::new(tx);
        let parent_available = match item.path.parent() {
            Some(parent_path) => !items
                .list_by_paths(std::slice::from_ref(&parent_path), false)?
                .is_empty(),
            None => true,
        };
        if !parent_available && self.engine.config().restore_fallback == RestoreFallback::Fail {
            return Err(CoreError::ParentUnavailable { item_id });
        }

        let ctx = HookContext { conn: tx, actor };
        let hooks = self.engine.hooks();
        hooks.run_pre(&ctx, &HookPayload::Restore { item: &item })?;

        let mut path = item.path.clone();
        if !parent_available {
            let root_path = ItemPath::root(item_id);
            rebase_everywhere(tx, &path, &root_path, now_epoch_ms())?;
            self.reattach_admin(tx, &root_path, account_id)?;
            path = root_path;
        }
        let restored_count = items.restore_subtree(item_id, &path)?;
        recycled.delete_recycled(item_id)?;
        let item = items
            .get_item(item_id, false)?
            .ok_or(CoreError::ItemNotFound(item_id))?;
        hooks.run_post(&ctx, &HookPayload::Restore { item: &item })?;

        info!(
            "event=item_restore module=tree_mutation status=ok item_id={} rows={} rerooted={} duration_ms={}",
            item_id,
            restored_count,
            !parent_available,
            started_at.elapsed().as_millis()
        );
        Ok(RestoreOutcome {
            item,
            restored_count,
        })
    }

    /// Permanently deletes the item, its subtree and everything keyed by
    /// their paths.
    pub fn purge_item(
        &self,
        tx: &Transaction<'_>,
        actor: Actor,
        item_id: ItemId,
    ) -> CoreResult<PurgeOutcome> {
        let started_at = Instant::now();
        require_account(actor)?;
        let item = self
            .engine
            .authorizer()
            .get_for_admin_including_recycled(tx, actor, item_id)?;

        let ctx = HookContext { conn: tx, actor };
        let hooks = self.engine.hooks();
        hooks.run_pre(&ctx, &HookPayload::Delete { item: &item })?;

        let purged_count = SqliteItemRepository::new(tx).delete_subtree(&item.path)?;
        let grants = SqliteMembershipRepository::new(tx).delete_subtree(&item.path)?;
        let flags = SqliteVisibilityRepository::new(tx).delete_subtree(&item.path)?;
        SqliteRecycledRepository::new(tx).delete_subtree(&item.path)?;
        hooks.run_post(&ctx, &HookPayload::Delete { item: &item })?;

        info!(
            "event=item_purge module=tree_mutation status=ok item_id={} rows={} grants={} flags={} duration_ms={}",
            item_id,
            purged_count,
            grants,
            flags,
            started_at.elapsed().as_millis()
        );
        Ok(PurgeOutcome { item, purged_count })
    }

    /// Applies the detached-admin policy to a subtree now rooted at `path`.
    fn reattach_admin(
        &self,
        tx: &Transaction<'_>,
        path: &ItemPath,
        account_id: AccountId,
    ) -> CoreResult<()> {
        let admins = SqliteMembershipRepository::new(tx)
            .list_admins_on_paths(&path.ancestors_or_self())?;
        if !admins.is_empty() {
            return Ok(());
        }
        match self.engine.config().detached_admin {
            DetachedAdminPolicy::GrantActor => {
                let grant = match SqliteMembershipRepository::new(tx)
                    .find_membership(path, account_id)?
                {
                    Some(existing) => {
                        SqliteMembershipRepository::new(tx).update_level(
                            existing.id,
                            PermissionLevel::Admin,
                            now_epoch_ms(),
                        )?;
                        existing.id
                    }
                    None => {
                        insert_membership(
                            tx,
                            path,
                            account_id,
                            PermissionLevel::Admin,
                            Some(account_id),
                        )?
                        .id
                    }
                };
                info!(
                    "event=admin_reattach module=tree_mutation status=ok membership_id={}",
                    grant
                );
                Ok(())
            }
            DetachedAdminPolicy::Reject => Err(CoreError::CannotRemoveLastAdmin {
                item_path: path.clone(),
            }),
        }
    }
}

/// Rewrites the `old` prefix to `new` in every path-keyed table.
///
/// Returns the number of item rows moved.
fn rebase_everywhere(
    tx: &Transaction<'_>,
    old: &ItemPath,
    new: &ItemPath,
    updated_at: i64,
) -> CoreResult<usize> {
    let moved = SqliteItemRepository::new(tx).rebase_subtree(old, new, updated_at)?;
    SqliteMembershipRepository::new(tx).rebase_subtree(old, new)?;
    SqliteVisibilityRepository::new(tx).rebase_subtree(old, new)?;
    SqliteRecycledRepository::new(tx).rebase_subtree(old, new)?;
    Ok(moved)
}
