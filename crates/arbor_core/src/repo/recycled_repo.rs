//! Recycle-bin store: one row per recycle root.

use crate::model::actor::AccountId;
use crate::model::item::{ItemId, RecycledItem};
use crate::model::path::ItemPath;
use crate::repo::{parse_optional_uuid, parse_path, parse_uuid, subtree_params, StoreResult};
use rusqlite::{params, Connection, OptionalExtension, Row};

const RECYCLED_SELECT_SQL: &str = "SELECT
    item_id,
    item_path,
    creator_id,
    created_at
FROM recycled_items";

/// Store interface for recycle-bin entries.
pub trait RecycledStore {
    fn insert_recycled(&self, entry: &RecycledItem) -> StoreResult<()>;
    fn get_recycled(&self, item_id: ItemId) -> StoreResult<Option<RecycledItem>>;
    fn delete_recycled(&self, item_id: ItemId) -> StoreResult<()>;
    /// Entries at or below an admin grant of `account_id`, newest first.
    fn list_recycled_for_admin(&self, account_id: AccountId) -> StoreResult<Vec<RecycledItem>>;
    fn rebase_subtree(&self, old: &ItemPath, new: &ItemPath) -> StoreResult<usize>;
    fn delete_subtree(&self, root: &ItemPath) -> StoreResult<usize>;
}

/// SQLite-backed recycle-bin store.
pub struct SqliteRecycledRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteRecycledRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl RecycledStore for SqliteRecycledRepository<'_> {
    fn insert_recycled(&self, entry: &RecycledItem) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO recycled_items (
                item_id,
                item_path,
                creator_id,
                created_at
            ) VALUES (?1, ?2, ?3, ?4);",
            params![
                entry.item_id.to_string(),
                entry.item_path.as_str(),
                entry.creator_id.map(|value| value.to_string()),
                entry.created_at,
            ],
        )?;
        Ok(())
    }

    fn get_recycled(&self, item_id: ItemId) -> StoreResult<Option<RecycledItem>> {
        let entry = self
            .conn
            .query_row(
                &format!("{RECYCLED_SELECT_SQL} WHERE item_id = ?1;"),
                [item_id.to_string()],
                |row| Ok(parse_recycled_row(row)),
            )
            .optional()?
            .transpose()?;
        Ok(entry)
    }

    fn delete_recycled(&self, item_id: ItemId) -> StoreResult<()> {
        self.conn.execute(
            "DELETE FROM recycled_items WHERE item_id = ?1;",
            [item_id.to_string()],
        )?;
        Ok(())
    }

    fn list_recycled_for_admin(&self, account_id: AccountId) -> StoreResult<Vec<RecycledItem>> {
        let mut stmt = self.conn.prepare(&format!(
            "{RECYCLED_SELECT_SQL} r
             WHERE EXISTS (
                SELECT 1
                FROM item_memberships m
                WHERE m.account_id = ?1
                  AND m.level = 'admin'
                  AND (
                    r.item_path = m.item_path
                    OR (r.item_path > m.item_path || '.' AND r.item_path < m.item_path || '/')
                  )
             )
             ORDER BY r.created_at DESC, r.item_path ASC;"
        ))?;
        let mut rows = stmt.query([account_id.to_string()])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(parse_recycled_row(row)?);
        }
        Ok(entries)
    }

    fn rebase_subtree(&self, old: &ItemPath, new: &ItemPath) -> StoreResult<usize> {
        let [path, lower, upper] = subtree_params(old);
        let changed = self.conn.execute(
            "UPDATE recycled_items
             SET item_path = ?4 || substr(item_path, length(?1) + 1)
             WHERE item_path = ?1 OR (item_path > ?2 AND item_path < ?3);",
            params![path, lower, upper, new.as_str()],
        )?;
        Ok(changed)
    }

    fn delete_subtree(&self, root: &ItemPath) -> StoreResult<usize> {
        let [path, lower, upper] = subtree_params(root);
        let changed = self.conn.execute(
            "DELETE FROM recycled_items
             WHERE item_path = ?1 OR (item_path > ?2 AND item_path < ?3);",
            params![path, lower, upper],
        )?;
        Ok(changed)
    }
}

fn parse_recycled_row(row: &Row<'_>) -> StoreResult<RecycledItem> {
    let id_text: String = row.get("item_id")?;
    let path_text: String = row.get("item_path")?;
    Ok(RecycledItem {
        item_id: parse_uuid(&id_text, "recycled_items.item_id")?,
        item_path: parse_path(&path_text, "recycled_items.item_path")?,
        creator_id: parse_optional_uuid(row.get("creator_id")?, "recycled_items.creator_id")?,
        created_at: row.get("created_at")?,
    })
}
