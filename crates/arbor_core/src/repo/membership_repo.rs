//! Membership store contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist permission grants keyed by item path.
//! - Answer "grants attached to any of these ancestor paths" queries.
//!
//! # Invariants
//! - `(item_path, account_id)` is unique.
//! - Chain listings are ordered root-first (shortest path first).

use crate::model::actor::AccountId;
use crate::model::membership::{ItemMembership, MembershipId, PermissionLevel};
use crate::model::path::ItemPath;
use crate::repo::{
    parse_optional_uuid, parse_path, parse_uuid, placeholders, subtree_params, StoreError,
    StoreResult,
};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

const MEMBERSHIP_SELECT_SQL: &str = "SELECT
    id,
    item_path,
    account_id,
    level,
    creator_id,
    created_at,
    updated_at
FROM item_memberships";

/// Store interface for permission grants.
pub trait MembershipStore {
    fn insert_membership(&self, membership: &ItemMembership) -> StoreResult<()>;
    fn get_membership(&self, id: MembershipId) -> StoreResult<Option<ItemMembership>>;
    /// Grant attached exactly at `path` for `account`.
    fn find_membership(
        &self,
        path: &ItemPath,
        account_id: AccountId,
    ) -> StoreResult<Option<ItemMembership>>;
    /// Grants attached to any of `paths`, optionally for one account only.
    fn list_on_paths(
        &self,
        paths: &[ItemPath],
        account_id: Option<AccountId>,
    ) -> StoreResult<Vec<ItemMembership>>;
    /// Admin grants attached to any of `paths`.
    fn list_admins_on_paths(&self, paths: &[ItemPath]) -> StoreResult<Vec<ItemMembership>>;
    fn update_level(
        &self,
        id: MembershipId,
        level: PermissionLevel,
        updated_at: i64,
    ) -> StoreResult<()>;
    fn delete_membership(&self, id: MembershipId) -> StoreResult<()>;
    /// Deletes the account's grants strictly below `path`.
    fn delete_for_account_below(&self, path: &ItemPath, account_id: AccountId)
        -> StoreResult<usize>;
    /// Rewrites the `old` prefix to `new` on every grant in the subtree.
    fn rebase_subtree(&self, old: &ItemPath, new: &ItemPath) -> StoreResult<usize>;
    /// Deletes every grant in the subtree.
    fn delete_subtree(&self, root: &ItemPath) -> StoreResult<usize>;
}

/// SQLite-backed membership store.
pub struct SqliteMembershipRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteMembershipRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn query_memberships(&self, sql: &str, values: Vec<Value>) -> StoreResult<Vec<ItemMembership>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params_from_iter(values))?;
        let mut memberships = Vec::new();
        while let Some(row) = rows.next()? {
            memberships.push(parse_membership_row(row)?);
        }
        Ok(memberships)
    }
}

impl MembershipStore for SqliteMembershipRepository<'_> {
    fn insert_membership(&self, membership: &ItemMembership) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO item_memberships (
                id,
                item_path,
                account_id,
                level,
                creator_id,
                created_at,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                membership.id.to_string(),
                membership.item_path.as_str(),
                membership.account_id.to_string(),
                membership.level.as_str(),
                membership.creator_id.map(|value| value.to_string()),
                membership.created_at,
                membership.updated_at,
            ],
        )?;
        Ok(())
    }

    fn get_membership(&self, id: MembershipId) -> StoreResult<Option<ItemMembership>> {
        let membership = self
            .conn
            .query_row(
                &format!("{MEMBERSHIP_SELECT_SQL} WHERE id = ?1;"),
                [id.to_string()],
                |row| Ok(parse_membership_row(row)),
            )
            .optional()?
            .transpose()?;
        Ok(membership)
    }

    fn find_membership(
        &self,
        path: &ItemPath,
        account_id: AccountId,
    ) -> StoreResult<Option<ItemMembership>> {
        let membership = self
            .conn
            .query_row(
                &format!("{MEMBERSHIP_SELECT_SQL} WHERE item_path = ?1 AND account_id = ?2;"),
                params![path.as_str(), account_id.to_string()],
                |row| Ok(parse_membership_row(row)),
            )
            .optional()?
            .transpose()?;
        Ok(membership)
    }

    fn list_on_paths(
        &self,
        paths: &[ItemPath],
        account_id: Option<AccountId>,
    ) -> StoreResult<Vec<ItemMembership>> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        let mut values: Vec<Value> = paths
            .iter()
            .map(|path| Value::Text(path.as_str().to_string()))
            .collect();
        let account_filter = match account_id {
            Some(account_id) => {
                values.push(Value::Text(account_id.to_string()));
                format!(" AND account_id = ?{}", values.len())
            }
            None => String::new(),
        };
        let sql = format!(
            "{MEMBERSHIP_SELECT_SQL}
             WHERE item_path IN ({}){account_filter}
             ORDER BY length(item_path) ASC, created_at ASC, id ASC;",
            placeholders(1, paths.len())
        );
        self.query_memberships(&sql, values)
    }

    fn list_admins_on_paths(&self, paths: &[ItemPath]) -> StoreResult<Vec<ItemMembership>> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "{MEMBERSHIP_SELECT_SQL}
             WHERE item_path IN ({})
               AND level = 'admin'
             ORDER BY length(item_path) ASC, created_at ASC, id ASC;",
            placeholders(1, paths.len())
        );
        self.query_memberships(
            &sql,
            paths
                .iter()
                .map(|path| Value::Text(path.as_str().to_string()))
                .collect(),
        )
    }

    fn update_level(
        &self,
        id: MembershipId,
        level: PermissionLevel,
        updated_at: i64,
    ) -> StoreResult<()> {
        let changed = self.conn.execute(
            "UPDATE item_memberships
             SET level = ?2,
                 updated_at = ?3
             WHERE id = ?1;",
            params![id.to_string(), level.as_str(), updated_at],
        )?;
        if changed == 0 {
            return Err(StoreError::InvalidData(format!(
                "membership {id} vanished during update"
            )));
        }
        Ok(())
    }

    fn delete_membership(&self, id: MembershipId) -> StoreResult<()> {
        self.conn.execute(
            "DELETE FROM item_memberships WHERE id = ?1;",
            [id.to_string()],
        )?;
        Ok(())
    }

    fn delete_for_account_below(
        &self,
        path: &ItemPath,
        account_id: AccountId,
    ) -> StoreResult<usize> {
        let (lower, upper) = path.descendant_range();
        let changed = self.conn.execute(
            "DELETE FROM item_memberships
             WHERE item_path > ?1 AND item_path < ?2
               AND account_id = ?3;",
            params![lower, upper, account_id.to_string()],
        )?;
        Ok(changed)
    }

    fn rebase_subtree(&self, old: &ItemPath, new: &ItemPath) -> StoreResult<usize> {
        let [path, lower, upper] = subtree_params(old);
        let changed = self.conn.execute(
            "UPDATE item_memberships
             SET item_path = ?4 || substr(item_path, length(?1) + 1)
             WHERE item_path = ?1 OR (item_path > ?2 AND item_path < ?3);",
            params![path, lower, upper, new.as_str()],
        )?;
        Ok(changed)
    }

    fn delete_subtree(&self, root: &ItemPath) -> StoreResult<usize> {
        let [path, lower, upper] = subtree_params(root);
        let changed = self.conn.execute(
            "DELETE FROM item_memberships
             WHERE item_path = ?1 OR (item_path > ?2 AND item_path < ?3);",
            params![path, lower, upper],
        )?;
        Ok(changed)
    }
}

fn parse_membership_row(row: &Row<'_>) -> StoreResult<ItemMembership> {
    let id_text: String = row.get("id")?;
    let path_text: String = row.get("item_path")?;
    let account_text: String = row.get("account_id")?;
    let level_text: String = row.get("level")?;
    let level = PermissionLevel::parse(&level_text).ok_or_else(|| {
        StoreError::InvalidData(format!(
            "invalid permission level `{level_text}` in item_memberships.level"
        ))
    })?;

    Ok(ItemMembership {
        id: parse_uuid(&id_text, "item_memberships.id")?,
        item_path: parse_path(&path_text, "item_memberships.item_path")?,
        account_id: parse_uuid(&account_text, "item_memberships.account_id")?,
        level,
        creator_id: parse_optional_uuid(row.get("creator_id")?, "item_memberships.creator_id")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}
