//! Effective permission resolution over the ancestor chain.
//!
//! # Responsibility
//! - Combine direct and inherited grants plus `public`/`hidden` flags into
//!   one effective level per (actor, item).
//! - Guard the admin chain against removal of its last reachable admin.
//!
//! # Invariants
//! - Grants only add up; a grant deeper in the chain never lowers a level
//!   granted above it.
//! - A `hidden` flag on the chain removes read-only access entirely.
//! - Recycled items resolve as missing except through
//!   [`Authorizer::get_for_admin_including_recycled`].

use crate::config::EngineConfig;
use crate::error::{CoreError, CoreResult};
use crate::model::actor::Actor;
use crate::model::item::{Item, ItemId};
use crate::model::membership::{ItemMembership, PermissionLevel};
use crate::model::visibility::VisibilityKind;
use crate::repo::item_repo::{ItemStore, SqliteItemRepository};
use crate::repo::membership_repo::{MembershipStore, SqliteMembershipRepository};
use crate::repo::visibility_repo::{SqliteVisibilityRepository, VisibilityStore};
use rusqlite::Connection;

/// Stateless resolver bound to the engine configuration.
#[derive(Debug, Clone, Copy)]
pub struct Authorizer<'cfg> {
    config: &'cfg EngineConfig,
}

impl<'cfg> Authorizer<'cfg> {
    pub fn new(config: &'cfg EngineConfig) -> Self {
        Self { config }
    }

    /// Level `actor` holds on `item`, or `None` for no access.
    pub fn effective_permission(
        &self,
        conn: &Connection,
        actor: Actor,
        item: &Item,
    ) -> CoreResult<Option<PermissionLevel>> {
        let chain = item.path.ancestors_or_self();

        let mut level = match actor.account_id() {
            Some(account_id) => SqliteMembershipRepository::new(conn)
                .list_on_paths(&chain, Some(account_id))?
                .into_iter()
                .map(|membership| membership.level)
                .max(),
            None => None,
        };

        let flags = SqliteVisibilityRepository::new(conn).list_on_paths(&chain)?;
        let is_public = flags.iter().any(|flag| flag.kind == VisibilityKind::Public);
        let is_hidden = flags.iter().any(|flag| flag.kind == VisibilityKind::Hidden);

        if is_public && self.config.public_read {
            level = level.max(Some(PermissionLevel::Read));
        }
        if is_hidden && level == Some(PermissionLevel::Read) {
            level = None;
        }
        Ok(level)
    }

    /// Fails unless `actor` holds at least `min` on `item`.
    ///
    /// Returns the effective level on success.
    pub fn require_permission(
        &self,
        conn: &Connection,
        actor: Actor,
        item: &Item,
        min: PermissionLevel,
    ) -> CoreResult<PermissionLevel> {
        match self.effective_permission(conn, actor, item)? {
            Some(level) if level >= min => Ok(level),
            Some(_) => Err(CoreError::Forbidden {
                item_id: item.id,
                required: min,
            }),
            None if self.config.hide_existence => Err(CoreError::ItemNotFound(item.id)),
            None => Err(CoreError::Forbidden {
                item_id: item.id,
                required: min,
            }),
        }
    }

    /// Loads a live item and checks `min` on it.
    pub fn check(
        &self,
        conn: &Connection,
        actor: Actor,
        item_id: ItemId,
        min: PermissionLevel,
    ) -> CoreResult<Item> {
        let item = SqliteItemRepository::new(conn)
            .get_item(item_id, false)?
            .ok_or(CoreError::ItemNotFound(item_id))?;
        self.require_permission(conn, actor, &item, min)?;
        Ok(item)
    }

    /// Loads an item whether recycled or not and checks admin on it.
    pub fn get_for_admin_including_recycled(
        &self,
        conn: &Connection,
        actor: Actor,
        item_id: ItemId,
    ) -> CoreResult<Item> {
        let item = SqliteItemRepository::new(conn)
            .get_item(item_id, true)?
            .ok_or(CoreError::ItemNotFound(item_id))?;
        self.require_permission(conn, actor, &item, PermissionLevel::Admin)?;
        Ok(item)
    }

    /// Rejects deleting `membership`, or changing it to `replacement`, when
    /// no other admin grant would remain reachable from its path.
    pub fn last_admin_guard(
        &self,
        conn: &Connection,
        membership: &ItemMembership,
        replacement: Option<PermissionLevel>,
    ) -> CoreResult<()> {
        if membership.level != PermissionLevel::Admin
            || replacement == Some(PermissionLevel::Admin)
        {
            return Ok(());
        }
        let chain = membership.item_path.ancestors_or_self();
        let other_admins = SqliteMembershipRepository::new(conn)
            .list_admins_on_paths(&chain)?
            .into_iter()
            .filter(|admin| admin.id != membership.id)
            .count();
        if other_admins == 0 {
            return Err(CoreError::CannotRemoveLastAdmin {
                item_path: membership.item_path.clone(),
            });
        }
        Ok(())
    }
}
