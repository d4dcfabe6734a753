//! Typed pre/post hooks around item and grant mutations.
//!
//! # Responsibility
//! - Let collaborators outside the core (settings, attachments, indexing)
//!   react to tree and grant mutations without the core knowing their schemas.
//!
//! # Invariants
//! - Hooks run in registration order, inside the mutation's transaction.
//! - A failing pre hook rejects the mutation; a failing post hook aborts it.
//! - The registry is assembled once at composition time and never mutated
//!   while operations run.

use crate::error::{CoreError, CoreResult};
use crate::model::actor::Actor;
use crate::model::item::{Item, ItemPatch};
use crate::model::membership::{ItemMembership, PermissionLevel};
use crate::model::path::ItemPath;
use log::warn;
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Mutation a hook is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HookAction {
    Create,
    Update,
    Move,
    Copy,
    Recycle,
    Restore,
    Delete,
    MembershipCreate,
    MembershipUpdate,
    MembershipDelete,
}

impl HookAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Move => "move",
            Self::Copy => "copy",
            Self::Recycle => "recycle",
            Self::Restore => "restore",
            Self::Delete => "delete",
            Self::MembershipCreate => "membership_create",
            Self::MembershipUpdate => "membership_update",
            Self::MembershipDelete => "membership_delete",
        }
    }
}

/// Data handed to hooks. Pre hooks see the state before the mutation,
/// post hooks the state after it.
#[derive(Debug, Clone, Copy)]
pub enum HookPayload<'a> {
    Create {
        item: &'a Item,
    },
    Update {
        item: &'a Item,
        patch: &'a ItemPatch,
    },
    Move {
        item: &'a Item,
        previous_path: &'a ItemPath,
        /// `None` when the item becomes a root.
        destination: Option<&'a Item>,
    },
    /// One post event is emitted per copied node; `copy` is `None` in the
    /// single pre event.
    Copy {
        original: &'a Item,
        copy: Option<&'a Item>,
    },
    Recycle {
        item: &'a Item,
    },
    Restore {
        item: &'a Item,
    },
    Delete {
        item: &'a Item,
    },
    /// The pre event carries the grant about to be inserted.
    MembershipCreate {
        item: &'a Item,
        membership: &'a ItemMembership,
    },
    /// `membership` is the stored grant before the change in the pre event
    /// and after it in the post event.
    MembershipUpdate {
        item: &'a Item,
        membership: &'a ItemMembership,
        level: PermissionLevel,
    },
    MembershipDelete {
        item: &'a Item,
        membership: &'a ItemMembership,
    },
}

impl HookPayload<'_> {
    pub fn action(&self) -> HookAction {
        match self {
            Self::Create { .. } => HookAction::Create,
            Self::Update { .. } => HookAction::Update,
            Self::Move { .. } => HookAction::Move,
            Self::Copy { .. } => HookAction::Copy,
            Self::Recycle { .. } => HookAction::Recycle,
            Self::Restore { .. } => HookAction::Restore,
            Self::Delete { .. } => HookAction::Delete,
            Self::MembershipCreate { .. } => HookAction::MembershipCreate,
            Self::MembershipUpdate { .. } => HookAction::MembershipUpdate,
            Self::MembershipDelete { .. } => HookAction::MembershipDelete,
        }
    }

    /// Item the mutation was requested on; for grants, the granted item.
    pub fn item(&self) -> &Item {
        match self {
            Self::Create { item }
            | Self::Update { item, .. }
            | Self::Move { item, .. }
            | Self::Recycle { item }
            | Self::Restore { item }
            | Self::Delete { item }
            | Self::MembershipCreate { item, .. }
            | Self::MembershipUpdate { item, .. }
            | Self::MembershipDelete { item, .. } => *item,
            Self::Copy { original, .. } => *original,
        }
    }

    /// Grant of a membership event.
    pub fn membership(&self) -> Option<&ItemMembership> {
        match self {
            Self::MembershipCreate { membership, .. }
            | Self::MembershipUpdate { membership, .. }
            | Self::MembershipDelete { membership, .. } => Some(*membership),
            _ => None,
        }
    }
}

/// Execution context shared by every hook of one mutation.
pub struct HookContext<'a> {
    /// Open transaction of the mutation.
    pub conn: &'a Connection,
    pub actor: Actor,
}

/// Failure reported by a hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookError {
    pub message: String,
}

impl HookError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Display for HookError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl Error for HookError {}

impl From<rusqlite::Error> for HookError {
    fn from(value: rusqlite::Error) -> Self {
        Self::new(value.to_string())
    }
}

/// Collaborator reacting to item mutations.
pub trait ItemHook: Send + Sync {
    /// Stable name used in errors and logs.
    fn name(&self) -> &str;

    fn pre(&self, _ctx: &HookContext<'_>, _payload: &HookPayload<'_>) -> Result<(), HookError> {
        Ok(())
    }

    fn post(&self, _ctx: &HookContext<'_>, _payload: &HookPayload<'_>) -> Result<(), HookError> {
        Ok(())
    }
}

/// Ordered hook lists per action.
#[derive(Default, Clone)]
pub struct HookRegistry {
    hooks: BTreeMap<HookAction, Vec<Arc<dyn ItemHook>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `hook` to the list of `action`.
    pub fn register(&mut self, action: HookAction, hook: Arc<dyn ItemHook>) {
        self.hooks.entry(action).or_default().push(hook);
    }

    /// Builder form of [`HookRegistry::register`].
    pub fn with(mut self, action: HookAction, hook: Arc<dyn ItemHook>) -> Self {
        self.register(action, hook);
        self
    }

    /// Registers `hook` for several actions at once.
    pub fn with_all(mut self, actions: &[HookAction], hook: Arc<dyn ItemHook>) -> Self {
        for action in actions {
            self.register(*action, Arc::clone(&hook));
        }
        self
    }

    pub fn count(&self, action: HookAction) -> usize {
        self.hooks.get(&action).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.values().all(Vec::is_empty)
    }

    pub(crate) fn run_pre(
        &self,
        ctx: &HookContext<'_>,
        payload: &HookPayload<'_>,
    ) -> CoreResult<()> {
        for hook in self.hooks_for(payload.action()) {
            hook.pre(ctx, payload).map_err(|err| {
                warn!(
                    "event=hook_pre module=hooks status=error hook={} action={} item_id={}",
                    hook.name(),
                    payload.action().as_str(),
                    payload.item().id
                );
                CoreError::HookRejected {
                    hook: hook.name().to_string(),
                    message: err.message,
                }
            })?;
        }
        Ok(())
    }

    pub(crate) fn run_post(
        &self,
        ctx: &HookContext<'_>,
        payload: &HookPayload<'_>,
    ) -> CoreResult<()> {
        for hook in self.hooks_for(payload.action()) {
            hook.post(ctx, payload).map_err(|err| {
                warn!(
                    "event=hook_post module=hooks status=error hook={} action={} item_id={}",
                    hook.name(),
                    payload.action().as_str(),
                    payload.item().id
                );
                CoreError::Hook {
                    hook: hook.name().to_string(),
                    message: err.message,
                }
            })?;
        }
        Ok(())
    }

    fn hooks_for(&self, action: HookAction) -> &[Arc<dyn ItemHook>] {
        self.hooks.get(&action).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (action, hooks) in &self.hooks {
            let names: Vec<&str> = hooks.iter().map(|hook| hook.name()).collect();
            map.entry(&action.as_str(), &names);
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{HookAction, HookContext, HookError, HookPayload, HookRegistry, ItemHook};
    use crate::db::open_db_in_memory;
    use crate::error::{CoreError, ErrorKind};
    use crate::model::actor::Actor;
    use crate::model::item::{Item, ItemKind};
    use crate::model::membership::{ItemMembership, PermissionLevel};
    use crate::model::path::ItemPath;
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    struct Recorder {
        name: &'static str,
        seen: Arc<Mutex<Vec<String>>>,
        reject: bool,
    }

    impl ItemHook for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn pre(&self, _ctx: &HookContext<'_>, payload: &HookPayload<'_>) -> Result<(), HookError> {
            self.seen
                .lock()
                .unwrap()
                .push(format!("{}:pre:{}", self.name, payload.action().as_str()));
            if self.reject {
                return Err(HookError::new("quota exceeded"));
            }
            Ok(())
        }
    }

    fn sample_item() -> Item {
        let id = Uuid::new_v4();
        Item {
            id,
            path: ItemPath::root(id),
            name: "sample".to_string(),
            kind: ItemKind::Folder,
            payload: serde_json::json!({}),
            creator_id: None,
            created_at: 1,
            updated_at: 1,
            deleted_at: None,
        }
    }

    #[test]
    fn hooks_run_in_registration_order_per_action() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let registry = HookRegistry::new()
            .with(
                HookAction::Recycle,
                Arc::new(Recorder {
                    name: "first",
                    seen: Arc::clone(&seen),
                    reject: false,
                }),
            )
            .with(
                HookAction::Recycle,
                Arc::new(Recorder {
                    name: "second",
                    seen: Arc::clone(&seen),
                    reject: false,
                }),
            );
        let conn = open_db_in_memory().unwrap();
        let ctx = HookContext {
            conn: &conn,
            actor: Actor::Anonymous,
        };
        let item = sample_item();

        registry
            .run_pre(&ctx, &HookPayload::Recycle { item: &item })
            .unwrap();
        registry
            .run_pre(&ctx, &HookPayload::Delete { item: &item })
            .unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["first:pre:recycle", "second:pre:recycle"]
        );
        assert_eq!(registry.count(HookAction::Recycle), 2);
        assert_eq!(registry.count(HookAction::Delete), 0);
    }

    #[test]
    fn membership_payloads_expose_item_and_grant() {
        let item = sample_item();
        let membership = ItemMembership {
            id: Uuid::new_v4(),
            item_path: item.path.clone(),
            account_id: Uuid::new_v4(),
            level: PermissionLevel::Read,
            creator_id: None,
            created_at: 1,
            updated_at: 1,
        };
        let payload = HookPayload::MembershipUpdate {
            item: &item,
            membership: &membership,
            level: PermissionLevel::Write,
        };

        assert_eq!(payload.action(), HookAction::MembershipUpdate);
        assert_eq!(payload.action().as_str(), "membership_update");
        assert_eq!(payload.item().id, item.id);
        assert_eq!(payload.membership().map(|grant| grant.id), Some(membership.id));
        assert!(HookPayload::Recycle { item: &item }.membership().is_none());
    }

    #[test]
    fn rejecting_pre_hook_maps_to_conflict() {
        let registry = HookRegistry::new().with(
            HookAction::Create,
            Arc::new(Recorder {
                name: "quota",
                seen: Arc::new(Mutex::new(Vec::new())),
                reject: true,
            }),
        );
        let conn = open_db_in_memory().unwrap();
        let ctx = HookContext {
            conn: &conn,
            actor: Actor::Anonymous,
        };
        let item = sample_item();

        let err = registry
            .run_pre(&ctx, &HookPayload::Create { item: &item })
            .unwrap_err();
        assert!(matches!(err, CoreError::HookRejected { ref hook, .. } if hook == "quota"));
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }
}
