//! Ticketed asynchronous batches of per-item tree mutations.
//!
//! # Responsibility
//! - Validate a batch synchronously and hand back a ticket at once.
//! - Run every target in its own retried transaction on the blocking pool.
//! - Report exactly one terminal event per batch to the acting account.
//!
//! # Invariants
//! - One target's failure never rolls back another target.
//! - A batch ends in `Completed` (per-item outcomes) or, when one of its
//!   workers panics, in `BatchFailed`; never both.
//! - A panic only fails its own batch; the next batch recovers the
//!   connection lock, whose last transaction was rolled back while unwinding.
//! - Batches cannot be cancelled once submitted.

use crate::config::EngineConfig;
use crate::db::{with_transaction, SharedConnection};
use crate::error::{CoreError, CoreResult, ItemFailure};
use crate::model::actor::{AccountId, Actor};
use crate::model::item::{Item, ItemId};
use crate::model::now_epoch_ms;
use crate::service::notifier::{ActorNotifier, MEMBER_ITEMS_TOPIC};
use crate::service::{require_account, Engine};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::task::JoinSet;
use uuid::Uuid;

/// Batch identifier.
pub type BatchId = Uuid;

/// Operation applied to every target of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum BulkOperation {
    Move { parent: Option<ItemId> },
    Copy { parent: Option<ItemId> },
    Recycle,
    Restore,
    Purge,
}

impl BulkOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Move { .. } => "move",
            Self::Copy { .. } => "copy",
            Self::Recycle => "recycle",
            Self::Restore => "restore",
            Self::Purge => "purge",
        }
    }
}

/// Receipt for an accepted batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchTicket {
    pub id: BatchId,
    pub operation: BulkOperation,
    pub target_ids: Vec<ItemId>,
    /// Epoch ms.
    pub submitted_at: i64,
}

/// Result for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ItemOutcome {
    /// The affected item after the operation: the moved, recycled or
    /// restored item, the new copy, or the purged item as it was.
    Succeeded { item: Item },
    Failed { error: ItemFailure },
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

/// Terminal event of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum BatchEvent {
    Completed {
        batch_id: BatchId,
        operation: BulkOperation,
        results: BTreeMap<ItemId, ItemOutcome>,
    },
    BatchFailed {
        batch_id: BatchId,
        operation: BulkOperation,
        error: String,
    },
}

impl BatchEvent {
    pub fn batch_id(&self) -> BatchId {
        match self {
            Self::Completed { batch_id, .. } | Self::BatchFailed { batch_id, .. } => *batch_id,
        }
    }
}

/// Accepts batches and processes them on a tokio runtime.
#[derive(Clone)]
pub struct BulkCoordinator {
    runtime: Handle,
    conn: SharedConnection,
    engine: Arc<Engine>,
    notifier: Arc<dyn ActorNotifier>,
}

impl BulkCoordinator {
    pub fn new(
        runtime: Handle,
        conn: SharedConnection,
        engine: Arc<Engine>,
        notifier: Arc<dyn ActorNotifier>,
    ) -> Self {
        Self {
            runtime,
            conn,
            engine,
            notifier,
        }
    }

    /// Validates the batch shape and schedules it.
    ///
    /// Per-item problems (missing items, permissions, conflicts) are not
    /// checked here; they surface in the terminal event.
    pub fn submit(
        &self,
        actor: Actor,
        operation: BulkOperation,
        target_ids: Vec<ItemId>,
    ) -> CoreResult<BatchTicket> {
        let account_id = require_account(actor)?;
        validate_targets(&target_ids, self.engine.config())?;

        let ticket = BatchTicket {
            id: Uuid::new_v4(),
            operation,
            target_ids,
            submitted_at: now_epoch_ms(),
        };
        info!(
            "event=batch_state module=bulk status=ok state=submitted batch_id={} op={} targets={}",
            ticket.id,
            operation.as_str(),
            ticket.target_ids.len()
        );

        let batch = BatchRun {
            conn: Arc::clone(&self.conn),
            engine: Arc::clone(&self.engine),
            account_id,
            ticket: ticket.clone(),
        };
        let notifier = Arc::clone(&self.notifier);
        self.runtime.spawn(async move {
            let event = batch.run().await;
            notifier.notify(account_id, MEMBER_ITEMS_TOPIC, event);
        });
        Ok(ticket)
    }
}

fn validate_targets(target_ids: &[ItemId], config: &EngineConfig) -> CoreResult<()> {
    if target_ids.is_empty() {
        return Err(CoreError::EmptyTargets);
    }
    if target_ids.len() > config.max_batch_size {
        return Err(CoreError::TooManyTargets {
            count: target_ids.len(),
            max: config.max_batch_size,
        });
    }
    let mut seen = HashSet::with_capacity(target_ids.len());
    for id in target_ids {
        if !seen.insert(*id) {
            return Err(CoreError::DuplicateTarget(*id));
        }
    }
    Ok(())
}

struct BatchRun {
    conn: SharedConnection,
    engine: Arc<Engine>,
    account_id: AccountId,
    ticket: BatchTicket,
}

impl BatchRun {
    async fn run(self) -> BatchEvent {
        let started_at = Instant::now();
        let batch_id = self.ticket.id;
        let operation = self.ticket.operation;
        info!(
            "event=batch_state module=bulk status=start state=processing batch_id={}",
            batch_id
        );

        let mut workers = JoinSet::new();
        for item_id in self.ticket.target_ids.iter().copied() {
            let conn = Arc::clone(&self.conn);
            let engine = Arc::clone(&self.engine);
            let actor = Actor::Account(self.account_id);
            workers.spawn_blocking(move || {
                (item_id, apply_one(&conn, &engine, actor, operation, item_id))
            });
        }

        let mut results = BTreeMap::new();
        let mut breakdown: Option<String> = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((item_id, Ok(item))) => {
                    results.insert(item_id, ItemOutcome::Succeeded { item });
                }
                Ok((item_id, Err(err))) => {
                    warn!(
                        "event=batch_item module=bulk status=error batch_id={} item_id={} kind={} error={}",
                        batch_id,
                        item_id,
                        err.kind(),
                        err
                    );
                    results.insert(
                        item_id,
                        ItemOutcome::Failed {
                            error: ItemFailure::from(&err),
                        },
                    );
                }
                Err(join_err) => {
                    breakdown.get_or_insert(format!("worker failed: {join_err}"));
                }
            }
        }

        match breakdown {
            Some(reason) => {
                error!(
                    "event=batch_state module=bulk status=error state=batch_failed batch_id={} duration_ms={} error={}",
                    batch_id,
                    started_at.elapsed().as_millis(),
                    reason
                );
                BatchEvent::BatchFailed {
                    batch_id,
                    operation,
                    error: reason,
                }
            }
            None => {
                let failed = results.values().filter(|outcome| !outcome.is_success()).count();
                info!(
                    "event=batch_state module=bulk status=ok state=completed batch_id={} items={} failed={} duration_ms={}",
                    batch_id,
                    results.len(),
                    failed,
                    started_at.elapsed().as_millis()
                );
                BatchEvent::Completed {
                    batch_id,
                    operation,
                    results,
                }
            }
        }
    }
}

/// Runs one target in its own retried transaction.
fn apply_one(
    conn: &SharedConnection,
    engine: &Engine,
    actor: Actor,
    operation: BulkOperation,
    item_id: ItemId,
) -> CoreResult<Item> {
    let guard = conn.lock().unwrap_or_else(|poisoned| {
        warn!(
            "event=batch_item module=bulk status=recover item_id={} reason=lock_poisoned",
            item_id
        );
        conn.clear_poison();
        poisoned.into_inner()
    });
    let tree = engine.tree();
    with_transaction(
        &guard,
        &engine.config().retry,
        operation.as_str(),
        |tx| match operation {
            BulkOperation::Move { parent } => {
                tree.move_item(tx, actor, item_id, parent).map(|outcome| outcome.item)
            }
            BulkOperation::Copy { parent } => {
                tree.copy_item(tx, actor, item_id, parent).map(|outcome| outcome.copy)
            }
            BulkOperation::Recycle => tree.recycle_item(tx, actor, item_id).map(|outcome| outcome.item),
            BulkOperation::Restore => tree.restore_item(tx, actor, item_id).map(|outcome| outcome.item),
            BulkOperation::Purge => tree.purge_item(tx, actor, item_id).map(|outcome| outcome.item),
        },
    )
}
