//! Item store contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist item rows and their materialized paths.
//! - Answer ancestor/child/descendant queries with path predicates.
//! - Apply subtree-wide rewrites (move, recycle, restore, purge) as single
//!   range statements.
//!
//! # Invariants
//! - Live reads exclude rows with `deleted_at IS NOT NULL` unless asked.
//! - Descendant listings are ordered by path, which is tree pre-order.

use crate::model::item::{Item, ItemId, ItemKind};
use crate::model::path::ItemPath;
use crate::repo::{
    ensure_store_ready, parse_optional_uuid, parse_path, parse_uuid, placeholders,
    subtree_params, StoreError, StoreResult,
};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

const ITEM_SELECT_SQL: &str = "SELECT
    id,
    path,
    name,
    kind,
    payload,
    creator_id,
    created_at,
    updated_at,
    deleted_at
FROM items";

/// Length of one encoded segment plus its separator.
const SEGMENT_STRIDE: usize = 37;

/// Store interface for item rows.
pub trait ItemStore {
    /// Inserts one fully-formed item row.
    fn insert_item(&self, item: &Item) -> StoreResult<()>;
    /// Loads one item by id.
    fn get_item(&self, id: ItemId, include_deleted: bool) -> StoreResult<Option<Item>>;
    /// Loads items whose path is one of `paths`, ordered root-first.
    fn list_by_paths(&self, paths: &[ItemPath], include_deleted: bool) -> StoreResult<Vec<Item>>;
    /// Lists direct children of `parent`.
    fn list_children(&self, parent: &ItemPath, include_deleted: bool) -> StoreResult<Vec<Item>>;
    /// Lists strict descendants of `root` in pre-order.
    fn list_descendants(&self, root: &ItemPath, include_deleted: bool) -> StoreResult<Vec<Item>>;
    /// Counts strict descendants of `root`.
    fn count_descendants(&self, root: &ItemPath, include_deleted: bool) -> StoreResult<usize>;
    /// Depth of the deepest node at or below `root`, relative to `root` (0 for a leaf).
    fn subtree_height(&self, root: &ItemPath) -> StoreResult<usize>;
    /// Updates name/payload of one live item.
    fn update_item(
        &self,
        id: ItemId,
        name: &str,
        payload: &serde_json::Value,
        updated_at: i64,
    ) -> StoreResult<()>;
    /// Rewrites `old` to `new` as path prefix of the whole subtree.
    fn rebase_subtree(&self, old: &ItemPath, new: &ItemPath, updated_at: i64)
        -> StoreResult<usize>;
    /// Marks every live row of the subtree as recycled.
    fn recycle_subtree(&self, root: &ItemPath, deleted_at: i64) -> StoreResult<usize>;
    /// Clears the recycle marker on the subtree, skipping rows covered by
    /// another recycle root.
    fn restore_subtree(&self, root_id: ItemId, root: &ItemPath) -> StoreResult<usize>;
    /// Permanently deletes every row of the subtree.
    fn delete_subtree(&self, root: &ItemPath) -> StoreResult<usize>;
}

/// SQLite-backed item store.
pub struct SqliteItemRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteItemRepository<'conn> {
    /// Creates a store over a migrated connection or open transaction.
    pub fn try_new(conn: &'conn Connection) -> StoreResult<Self> {
        ensure_store_ready(conn)?;
        Ok(Self { conn })
    }

    /// Creates a store without re-checking the schema.
    ///
    /// Used by services that already validated the connection once per
    /// transaction.
    pub(crate) fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn query_items(&self, sql: &str, values: Vec<Value>) -> StoreResult<Vec<Item>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params_from_iter(values))?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_item_row(row)?);
        }
        Ok(items)
    }
}

impl ItemStore for SqliteItemRepository<'_> {
    fn insert_item(&self, item: &Item) -> StoreResult<()> {
        let payload = serde_json::to_string(&item.payload)
            .map_err(|err| StoreError::InvalidData(format!("unserializable payload: {err}")))?;
        self.conn.execute(
            "INSERT INTO items (
                id,
                path,
                name,
                kind,
                payload,
                creator_id,
                created_at,
                updated_at,
                deleted_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9);",
            params![
                item.id.to_string(),
                item.path.as_str(),
                item.name,
                item.kind.as_str(),
                payload,
                item.creator_id.map(|value| value.to_string()),
                item.created_at,
                item.updated_at,
                item.deleted_at,
            ],
        )?;
        Ok(())
    }

    fn get_item(&self, id: ItemId, include_deleted: bool) -> StoreResult<Option<Item>> {
        let sql = if include_deleted {
            format!("{ITEM_SELECT_SQL} WHERE id = ?1;")
        } else {
            format!("{ITEM_SELECT_SQL} WHERE id = ?1 AND deleted_at IS NULL;")
        };
        let item = self
            .conn
            .query_row(&sql, [id.to_string()], |row| Ok(parse_item_row(row)))
            .optional()?
            .transpose()?;
        Ok(item)
    }

    fn list_by_paths(&self, paths: &[ItemPath], include_deleted: bool) -> StoreResult<Vec<Item>> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        let deleted_filter = if include_deleted {
            ""
        } else {
            " AND deleted_at IS NULL"
        };
        let sql = format!(
            "{ITEM_SELECT_SQL} WHERE path IN ({}){deleted_filter} ORDER BY path ASC;",
            placeholders(1, paths.len())
        );
        self.query_items(
            &sql,
            paths
                .iter()
                .map(|path| Value::Text(path.as_str().to_string()))
                .collect(),
        )
    }

    fn list_children(&self, parent: &ItemPath, include_deleted: bool) -> StoreResult<Vec<Item>> {
        let (lower, upper) = parent.descendant_range();
        let child_len = parent.as_str().len() + SEGMENT_STRIDE;
        let deleted_filter = if include_deleted {
            ""
        } else {
            " AND deleted_at IS NULL"
        };
        let sql = format!(
            "{ITEM_SELECT_SQL}
             WHERE path > ?1 AND path < ?2
               AND length(path) = ?3{deleted_filter}
             ORDER BY path ASC;"
        );
        self.query_items(
            &sql,
            vec![
                Value::Text(lower),
                Value::Text(upper),
                Value::Integer(child_len as i64),
            ],
        )
    }

    fn list_descendants(&self, root: &ItemPath, include_deleted: bool) -> StoreResult<Vec<Item>> {
        let (lower, upper) = root.descendant_range();
        let deleted_filter = if include_deleted {
            ""
        } else {
            " AND deleted_at IS NULL"
        };
        let sql = format!(
            "{ITEM_SELECT_SQL}
             WHERE path > ?1 AND path < ?2{deleted_filter}
             ORDER BY path ASC;"
        );
        self.query_items(&sql, vec![Value::Text(lower), Value::Text(upper)])
    }

    fn count_descendants(&self, root: &ItemPath, include_deleted: bool) -> StoreResult<usize> {
        let (lower, upper) = root.descendant_range();
        let sql = if include_deleted {
            "SELECT COUNT(*) FROM items WHERE path > ?1 AND path < ?2;"
        } else {
            "SELECT COUNT(*) FROM items WHERE path > ?1 AND path < ?2 AND deleted_at IS NULL;"
        };
        let count: i64 = self
            .conn
            .query_row(sql, params![lower, upper], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn subtree_height(&self, root: &ItemPath) -> StoreResult<usize> {
        let [path, lower, upper] = subtree_params(root);
        let longest: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(length(path)), 0)
             FROM items
             WHERE path = ?1 OR (path > ?2 AND path < ?3);",
            params![path, lower, upper],
            |row| row.get(0),
        )?;
        let root_len = root.as_str().len();
        Ok((longest as usize).saturating_sub(root_len) / SEGMENT_STRIDE)
    }

    fn update_item(
        &self,
        id: ItemId,
        name: &str,
        payload: &serde_json::Value,
        updated_at: i64,
    ) -> StoreResult<()> {
        let payload = serde_json::to_string(payload)
            .map_err(|err| StoreError::InvalidData(format!("unserializable payload: {err}")))?;
        let changed = self.conn.execute(
            "UPDATE items
             SET name = ?2,
                 payload = ?3,
                 updated_at = ?4
             WHERE id = ?1
               AND deleted_at IS NULL;",
            params![id.to_string(), name, payload, updated_at],
        )?;
        if changed == 0 {
            return Err(StoreError::InvalidData(format!(
                "item {id} vanished during update"
            )));
        }
        Ok(())
    }

    fn rebase_subtree(
        &self,
        old: &ItemPath,
        new: &ItemPath,
        updated_at: i64,
    ) -> StoreResult<usize> {
        let [path, lower, upper] = subtree_params(old);
        let changed = self.conn.execute(
            "UPDATE items
             SET path = ?4 || substr(path, length(?1) + 1),
                 updated_at = ?5
             WHERE path = ?1 OR (path > ?2 AND path < ?3);",
            params![path, lower, upper, new.as_str(), updated_at],
        )?;
        Ok(changed)
    }

    fn recycle_subtree(&self, root: &ItemPath, deleted_at: i64) -> StoreResult<usize> {
        let [path, lower, upper] = subtree_params(root);
        let changed = self.conn.execute(
            "UPDATE items
             SET deleted_at = ?4
             WHERE (path = ?1 OR (path > ?2 AND path < ?3))
               AND deleted_at IS NULL;",
            params![path, lower, upper, deleted_at],
        )?;
        Ok(changed)
    }

    fn restore_subtree(&self, root_id: ItemId, root: &ItemPath) -> StoreResult<usize> {
        let [path, lower, upper] = subtree_params(root);
        let changed = self.conn.execute(
            "UPDATE items
             SET deleted_at = NULL
             WHERE (path = ?1 OR (path > ?2 AND path < ?3))
               AND deleted_at IS NOT NULL
               AND NOT EXISTS (
                 SELECT 1
                 FROM recycled_items r
                 WHERE r.item_id <> ?4
                   AND (
                     items.path = r.item_path
                     OR (items.path > r.item_path || '.' AND items.path < r.item_path || '/')
                   )
               );",
            params![path, lower, upper, root_id.to_string()],
        )?;
        Ok(changed)
    }

    fn delete_subtree(&self, root: &ItemPath) -> StoreResult<usize> {
        let [path, lower, upper] = subtree_params(root);
        let changed = self.conn.execute(
            "DELETE FROM items
             WHERE path = ?1 OR (path > ?2 AND path < ?3);",
            params![path, lower, upper],
        )?;
        Ok(changed)
    }
}

fn parse_item_row(row: &Row<'_>) -> StoreResult<Item> {
    let id_text: String = row.get("id")?;
    let id = parse_uuid(&id_text, "items.id")?;

    let path_text: String = row.get("path")?;
    let path = parse_path(&path_text, "items.path")?;

    let kind_text: String = row.get("kind")?;
    let kind = ItemKind::parse(&kind_text).ok_or_else(|| {
        StoreError::InvalidData(format!("invalid item kind `{kind_text}` in items.kind"))
    })?;

    let payload_text: String = row.get("payload")?;
    let payload = serde_json::from_str(&payload_text)
        .map_err(|err| StoreError::InvalidData(format!("invalid json in items.payload: {err}")))?;

    Ok(Item {
        id,
        path,
        name: row.get("name")?,
        kind,
        payload,
        creator_id: parse_optional_uuid(row.get("creator_id")?, "items.creator_id")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        deleted_at: row.get("deleted_at")?,
    })
}
