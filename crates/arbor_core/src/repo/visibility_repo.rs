//! Visibility flag store contracts and SQLite implementation.

use crate::model::path::ItemPath;
use crate::model::visibility::{ItemVisibility, VisibilityKind};
use crate::repo::{
    parse_optional_uuid, parse_path, parse_uuid, placeholders, subtree_params, StoreError,
    StoreResult,
};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

const VISIBILITY_SELECT_SQL: &str = "SELECT
    id,
    item_path,
    kind,
    creator_id,
    created_at
FROM item_visibilities";

/// Store interface for inherited flags.
pub trait VisibilityStore {
    fn insert_visibility(&self, visibility: &ItemVisibility) -> StoreResult<()>;
    /// Flag of `kind` attached exactly at `path`.
    fn find_visibility(
        &self,
        path: &ItemPath,
        kind: VisibilityKind,
    ) -> StoreResult<Option<ItemVisibility>>;
    /// Flags attached to any of `paths`, ordered root-first.
    fn list_on_paths(&self, paths: &[ItemPath]) -> StoreResult<Vec<ItemVisibility>>;
    /// Flags attached at or below `root`, in pre-order.
    fn list_in_subtree(&self, root: &ItemPath) -> StoreResult<Vec<ItemVisibility>>;
    fn delete_visibility(&self, path: &ItemPath, kind: VisibilityKind) -> StoreResult<()>;
    fn rebase_subtree(&self, old: &ItemPath, new: &ItemPath) -> StoreResult<usize>;
    fn delete_subtree(&self, root: &ItemPath) -> StoreResult<usize>;
}

/// SQLite-backed visibility store.
pub struct SqliteVisibilityRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteVisibilityRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn query_visibilities(
        &self,
        sql: &str,
        values: Vec<Value>,
    ) -> StoreResult<Vec<ItemVisibility>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params_from_iter(values))?;
        let mut flags = Vec::new();
        while let Some(row) = rows.next()? {
            flags.push(parse_visibility_row(row)?);
        }
        Ok(flags)
    }
}

impl VisibilityStore for SqliteVisibilityRepository<'_> {
    fn insert_visibility(&self, visibility: &ItemVisibility) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO item_visibilities (
                id,
                item_path,
                kind,
                creator_id,
                created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                visibility.id.to_string(),
                visibility.item_path.as_str(),
                visibility.kind.as_str(),
                visibility.creator_id.map(|value| value.to_string()),
                visibility.created_at,
            ],
        )?;
        Ok(())
    }

    fn find_visibility(
        &self,
        path: &ItemPath,
        kind: VisibilityKind,
    ) -> StoreResult<Option<ItemVisibility>> {
        let visibility = self
            .conn
            .query_row(
                &format!("{VISIBILITY_SELECT_SQL} WHERE item_path = ?1 AND kind = ?2;"),
                params![path.as_str(), kind.as_str()],
                |row| Ok(parse_visibility_row(row)),
            )
            .optional()?
            .transpose()?;
        Ok(visibility)
    }

    fn list_on_paths(&self, paths: &[ItemPath]) -> StoreResult<Vec<ItemVisibility>> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "{VISIBILITY_SELECT_SQL}
             WHERE item_path IN ({})
             ORDER BY length(item_path) ASC, kind ASC;",
            placeholders(1, paths.len())
        );
        self.query_visibilities(
            &sql,
            paths
                .iter()
                .map(|path| Value::Text(path.as_str().to_string()))
                .collect(),
        )
    }

    fn list_in_subtree(&self, root: &ItemPath) -> StoreResult<Vec<ItemVisibility>> {
        let values = subtree_params(root).into_iter().map(Value::Text).collect();
        self.query_visibilities(
            &format!(
                "{VISIBILITY_SELECT_SQL}
                 WHERE item_path = ?1 OR (item_path > ?2 AND item_path < ?3)
                 ORDER BY item_path ASC, kind ASC;"
            ),
            values,
        )
    }

    fn delete_visibility(&self, path: &ItemPath, kind: VisibilityKind) -> StoreResult<()> {
        self.conn.execute(
            "DELETE FROM item_visibilities WHERE item_path = ?1 AND kind = ?2;",
            params![path.as_str(), kind.as_str()],
        )?;
        Ok(())
    }

    fn rebase_subtree(&self, old: &ItemPath, new: &ItemPath) -> StoreResult<usize> {
        let [path, lower, upper] = subtree_params(old);
        let changed = self.conn.execute(
            "UPDATE item_visibilities
             SET item_path = ?4 || substr(item_path, length(?1) + 1)
             WHERE item_path = ?1 OR (item_path > ?2 AND item_path < ?3);",
            params![path, lower, upper, new.as_str()],
        )?;
        Ok(changed)
    }

    fn delete_subtree(&self, root: &ItemPath) -> StoreResult<usize> {
        let [path, lower, upper] = subtree_params(root);
        let changed = self.conn.execute(
            "DELETE FROM item_visibilities
             WHERE item_path = ?1 OR (item_path > ?2 AND item_path < ?3);",
            params![path, lower, upper],
        )?;
        Ok(changed)
    }
}

fn parse_visibility_row(row: &Row<'_>) -> StoreResult<ItemVisibility> {
    let id_text: String = row.get("id")?;
    let path_text: String = row.get("item_path")?;
    let kind_text: String = row.get("kind")?;
    let kind = VisibilityKind::parse(&kind_text).ok_or_else(|| {
        StoreError::InvalidData(format!(
            "invalid visibility kind `{kind_text}` in item_visibilities.kind"
        ))
    })?;

    Ok(ItemVisibility {
        id: parse_uuid(&id_text, "item_visibilities.id")?,
        item_path: parse_path(&path_text, "item_visibilities.item_path")?,
        kind,
        creator_id: parse_optional_uuid(row.get("creator_id")?, "item_visibilities.creator_id")?,
        created_at: row.get("created_at")?,
    })
}
