//! Permission grant use cases.
//!
//! # Responsibility
//! - Create, change and remove grants under admin control.
//! - Keep at least one admin reachable from every granted path.
//!
//! # Invariants
//! - One grant per `(item_path, account_id)`.
//! - Downgrading or deleting an admin grant passes the last-admin guard.
//! - An account may always drop its own grant, subject to the same guard.
//! - Membership hooks run inside the caller's transaction around each write.

use crate::error::{CoreError, CoreResult};
use crate::model::actor::{AccountId, Actor};
use crate::model::item::{Item, ItemId};
use crate::model::membership::{ItemMembership, MembershipId, PermissionLevel};
use crate::model::now_epoch_ms;
use crate::model::path::ItemPath;
use crate::repo::item_repo::{ItemStore, SqliteItemRepository};
use crate::repo::membership_repo::{MembershipStore, SqliteMembershipRepository};
use crate::repo::StoreError;
use crate::service::hooks::{HookContext, HookPayload};
use crate::service::{require_account, Engine};
use log::info;
use rusqlite::Transaction;
use uuid::Uuid;

/// Grant service facade.
pub struct MembershipService<'e> {
    engine: &'e Engine,
}

impl<'e> MembershipService<'e> {
    pub fn new(engine: &'e Engine) -> Self {
        Self { engine }
    }

    /// Grants `level` on `item_id` to `account_id`.
    pub fn create_membership(
        &self,
        tx: &Transaction<'_>,
        actor: Actor,
        item_id: ItemId,
        account_id: AccountId,
        level: PermissionLevel,
    ) -> CoreResult<ItemMembership> {
        let creator_id = require_account(actor)?;
        let item = self
            .engine
            .authorizer()
            .check(tx, actor, item_id, PermissionLevel::Admin)?;

        let repo = SqliteMembershipRepository::new(tx);
        if repo.find_membership(&item.path, account_id)?.is_some() {
            return Err(CoreError::MembershipExists { item_id });
        }
        let membership = new_membership(&item.path, account_id, level, Some(creator_id));

        let ctx = HookContext { conn: tx, actor };
        let hooks = self.engine.hooks();
        let payload = HookPayload::MembershipCreate {
            item: &item,
            membership: &membership,
        };
        hooks.run_pre(&ctx, &payload)?;
        repo.insert_membership(&membership)?;
        hooks.run_post(&ctx, &payload)?;
        info!(
            "event=membership_create module=membership_service status=ok item_id={} membership_id={} level={}",
            item_id, membership.id, level
        );
        Ok(membership)
    }

    /// Loads one grant; needs read on the item it is attached to.
    pub fn get_membership(
        &self,
        tx: &Transaction<'_>,
        actor: Actor,
        id: MembershipId,
    ) -> CoreResult<ItemMembership> {
        let membership = load_membership(tx, id)?;
        self.item_of(tx, actor, &membership, PermissionLevel::Read)?;
        Ok(membership)
    }

    /// Grants attached to the item or any ancestor, root-first.
    pub fn list_for_item(
        &self,
        tx: &Transaction<'_>,
        actor: Actor,
        item_id: ItemId,
    ) -> CoreResult<Vec<ItemMembership>> {
        let item = self
            .engine
            .authorizer()
            .check(tx, actor, item_id, PermissionLevel::Read)?;
        let memberships = SqliteMembershipRepository::new(tx)
            .list_on_paths(&item.path.ancestors_or_self(), None)?;
        Ok(memberships)
    }

    /// Changes the level of one grant.
    pub fn patch_membership(
        &self,
        tx: &Transaction<'_>,
        actor: Actor,
        id: MembershipId,
        level: PermissionLevel,
    ) -> CoreResult<ItemMembership> {
        require_account(actor)?;
        let membership = load_membership(tx, id)?;
        let item = self.item_of(tx, actor, &membership, PermissionLevel::Admin)?;
        if membership.level == level {
            return Ok(membership);
        }
        self.engine
            .authorizer()
            .last_admin_guard(tx, &membership, Some(level))?;

        let ctx = HookContext { conn: tx, actor };
        let hooks = self.engine.hooks();
        hooks.run_pre(
            &ctx,
            &HookPayload::MembershipUpdate {
                item: &item,
                membership: &membership,
                level,
            },
        )?;

        let updated_at = now_epoch_ms();
        SqliteMembershipRepository::new(tx).update_level(id, level, updated_at)?;
        let previous = membership.level;
        let updated = ItemMembership {
            level,
            updated_at,
            ..membership
        };
        hooks.run_post(
            &ctx,
            &HookPayload::MembershipUpdate {
                item: &item,
                membership: &updated,
                level,
            },
        )?;
        info!(
            "event=membership_patch module=membership_service status=ok membership_id={} from={} to={}",
            id, previous, level
        );
        Ok(updated)
    }

    /// Removes one grant, and with `purge_below` the same account's grants on
    /// every descendant.
    ///
    /// Returns the removed grant.
    pub fn delete_membership(
        &self,
        tx: &Transaction<'_>,
        actor: Actor,
        id: MembershipId,
        purge_below: bool,
    ) -> CoreResult<ItemMembership> {
        let account_id = require_account(actor)?;
        let membership = load_membership(tx, id)?;
        let item = if membership.account_id == account_id {
            granted_item(tx, &membership)?
        } else {
            self.item_of(tx, actor, &membership, PermissionLevel::Admin)?
        };
        self.engine
            .authorizer()
            .last_admin_guard(tx, &membership, None)?;

        let ctx = HookContext { conn: tx, actor };
        let hooks = self.engine.hooks();
        let payload = HookPayload::MembershipDelete {
            item: &item,
            membership: &membership,
        };
        hooks.run_pre(&ctx, &payload)?;

        let repo = SqliteMembershipRepository::new(tx);
        repo.delete_membership(id)?;
        let purged = if purge_below {
            repo.delete_for_account_below(&membership.item_path, membership.account_id)?
        } else {
            0
        };
        hooks.run_post(&ctx, &payload)?;
        info!(
            "event=membership_delete module=membership_service status=ok membership_id={} purged_below={}",
            id, purged
        );
        Ok(membership)
    }

    fn item_of(
        &self,
        tx: &Transaction<'_>,
        actor: Actor,
        membership: &ItemMembership,
        min: PermissionLevel,
    ) -> CoreResult<Item> {
        let item_id = granted_item_id(membership)?;
        self.engine.authorizer().check(tx, actor, item_id, min)
    }
}

fn granted_item_id(membership: &ItemMembership) -> CoreResult<ItemId> {
    let item_id = membership
        .item_path
        .leaf_id()
        .map_err(|err| StoreError::InvalidData(err.to_string()))?;
    Ok(item_id)
}

/// Item a grant is attached to, without a permission check.
fn granted_item(tx: &Transaction<'_>, membership: &ItemMembership) -> CoreResult<Item> {
    let item_id = granted_item_id(membership)?;
    SqliteItemRepository::new(tx)
        .get_item(item_id, true)?
        .ok_or(CoreError::ItemNotFound(item_id))
}

fn load_membership(tx: &Transaction<'_>, id: MembershipId) -> CoreResult<ItemMembership> {
    SqliteMembershipRepository::new(tx)
        .get_membership(id)?
        .ok_or(CoreError::MembershipNotFound(id))
}

pub(crate) fn insert_membership(
    tx: &Transaction<'_>,
    item_path: &ItemPath,
    account_id: AccountId,
    level: PermissionLevel,
    creator_id: Option<AccountId>,
) -> CoreResult<ItemMembership> {
    let membership = new_membership(item_path, account_id, level, creator_id);
    SqliteMembershipRepository::new(tx).insert_membership(&membership)?;
    Ok(membership)
}

fn new_membership(
    item_path: &ItemPath,
    account_id: AccountId,
    level: PermissionLevel,
    creator_id: Option<AccountId>,
) -> ItemMembership {
    let now = now_epoch_ms();
    ItemMembership {
        id: Uuid::new_v4(),
        item_path: item_path.clone(),
        account_id,
        level,
        creator_id,
        created_at: now,
        updated_at: now,
    }
}

/// Gives `account_id` admin on `item_path` unless it already inherits admin
/// there. Returns the new grant, if one was needed.
pub(crate) fn ensure_admin(
    tx: &Transaction<'_>,
    item_path: &ItemPath,
    account_id: AccountId,
) -> CoreResult<Option<ItemMembership>> {
    let repo = SqliteMembershipRepository::new(tx);
    let inherited = repo
        .list_on_paths(&item_path.ancestors_or_self(), Some(account_id))?
        .into_iter()
        .any(|membership| membership.level == PermissionLevel::Admin);
    if inherited {
        return Ok(None);
    }
    if let Some(existing) = repo.find_membership(item_path, account_id)? {
        let updated_at = now_epoch_ms();
        repo.update_level(existing.id, PermissionLevel::Admin, updated_at)?;
        return Ok(Some(ItemMembership {
            level: PermissionLevel::Admin,
            updated_at,
            ..existing
        }));
    }
    insert_membership(
        tx,
        item_path,
        account_id,
        PermissionLevel::Admin,
        Some(account_id),
    )
    .map(Some)
}
