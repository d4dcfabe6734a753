//! Use-case services over the item forest.
//!
//! # Responsibility
//! - Orchestrate store calls into permission-checked operations.
//! - Keep transaction ownership with the caller: every operation receives
//!   the open `rusqlite::Transaction` it must run in.
//!
//! # Invariants
//! - Services never begin, commit or roll back transactions.
//! - Every mutation runs its pre hooks before and its post hooks after the
//!   store writes, inside the same transaction.

use crate::config::EngineConfig;
use crate::model::actor::{AccountId, Actor};

pub mod authorization;
pub mod bulk;
pub mod hooks;
pub mod item_service;
pub mod membership_service;
pub mod notifier;
pub mod tree_mutation;
pub mod visibility_service;

use authorization::Authorizer;
use hooks::HookRegistry;
use item_service::ItemService;
use membership_service::MembershipService;
use tree_mutation::TreeMutationEngine;
use visibility_service::VisibilityService;

/// Composition root: configuration plus hook registry.
///
/// Cheap to share behind an `Arc`; service facades borrow from it.
#[derive(Debug, Default)]
pub struct Engine {
    config: EngineConfig,
    hooks: HookRegistry,
}

impl Engine {
    pub fn new(config: EngineConfig, hooks: HookRegistry) -> Self {
        Self { config, hooks }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    pub fn authorizer(&self) -> Authorizer<'_> {
        Authorizer::new(&self.config)
    }

    pub fn items(&self) -> ItemService<'_> {
        ItemService::new(self)
    }

    pub fn memberships(&self) -> MembershipService<'_> {
        MembershipService::new(self)
    }

    pub fn visibilities(&self) -> VisibilityService<'_> {
        VisibilityService::new(self)
    }

    pub fn tree(&self) -> TreeMutationEngine<'_> {
        TreeMutationEngine::new(self)
    }
}

/// Account behind `actor`, or `AnonymousActor`.
pub(crate) fn require_account(actor: Actor) -> crate::error::CoreResult<AccountId> {
    actor
        .account_id()
        .ok_or(crate::error::CoreError::AnonymousActor)
}
