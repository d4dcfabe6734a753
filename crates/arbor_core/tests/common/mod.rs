#![allow(dead_code)]

use arbor_core::db::open_db_in_memory;
use arbor_core::{
    AccountId, Actor, CoreResult, Engine, EngineConfig, HookRegistry, Item, ItemId,
    ItemMembership, NewItem, PermissionLevel,
};
use rusqlite::{Connection, Transaction};
use uuid::Uuid;

pub struct Fixture {
    pub conn: Connection,
    pub engine: Engine,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_engine(Engine::new(config, HookRegistry::new()))
    }

    pub fn with_engine(engine: Engine) -> Self {
        Self {
            conn: open_db_in_memory().unwrap(),
            engine,
        }
    }

    /// Runs `work` in one transaction; an error rolls everything back.
    pub fn run<T>(
        &mut self,
        work: impl FnOnce(&Engine, &Transaction<'_>) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let tx = self.conn.transaction().unwrap();
        let value = work(&self.engine, &tx)?;
        tx.commit().unwrap();
        Ok(value)
    }

    pub fn folder(&mut self, actor: Actor, parent: Option<ItemId>, name: &str) -> Item {
        self.run(|engine, tx| {
            engine
                .items()
                .create_item(tx, actor, NewItem::folder(parent, name))
        })
        .unwrap()
    }

    pub fn document(&mut self, actor: Actor, parent: Option<ItemId>, name: &str) -> Item {
        self.run(|engine, tx| {
            engine.items().create_item(
                tx,
                actor,
                NewItem::document(parent, name, serde_json::json!({"content": name})),
            )
        })
        .unwrap()
    }

    pub fn grant(
        &mut self,
        actor: Actor,
        item_id: ItemId,
        account_id: AccountId,
        level: PermissionLevel,
    ) -> ItemMembership {
        self.run(|engine, tx| {
            engine
                .memberships()
                .create_membership(tx, actor, item_id, account_id, level)
        })
        .unwrap()
    }

    pub fn permission(&mut self, actor: Actor, item: &Item) -> Option<PermissionLevel> {
        self.run(|engine, tx| engine.authorizer().effective_permission(tx, actor, item))
            .unwrap()
    }

    /// Loads an item row regardless of permissions or recycle state.
    pub fn raw_item(&self, id: ItemId) -> Option<(String, Option<i64>)> {
        self.conn
            .query_row(
                "SELECT path, deleted_at FROM items WHERE id = ?1;",
                [id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .ok()
    }

    /// Full dump of every path-keyed table, sorted, for before/after checks.
    pub fn snapshot(&self) -> Vec<String> {
        let mut rows = Vec::new();
        for sql in [
            "SELECT 'item|' || id || '|' || path || '|' || COALESCE(deleted_at, '-') || '|' || payload FROM items",
            "SELECT 'grant|' || id || '|' || item_path || '|' || level FROM item_memberships",
            "SELECT 'flag|' || item_path || '|' || kind FROM item_visibilities",
            "SELECT 'bin|' || item_id || '|' || item_path FROM recycled_items",
        ] {
            let mut stmt = self.conn.prepare(sql).unwrap();
            let mut query = stmt.query([]).unwrap();
            while let Some(row) = query.next().unwrap() {
                rows.push(row.get::<_, String>(0).unwrap());
            }
        }
        rows.sort();
        rows
    }
}

pub fn account() -> (AccountId, Actor) {
    let id = Uuid::new_v4();
    (id, Actor::Account(id))
}
