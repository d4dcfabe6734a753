use arbor_core::{
    open_shared, open_shared_in_memory, AccountId, Actor, BatchEvent, BulkCoordinator,
    BulkOperation, ChannelNotifier, CoreError, CoreResult, Engine, EngineConfig, ErrorKind,
    HookAction, HookContext, HookError, HookPayload, HookRegistry, Item, ItemHook, ItemId,
    ItemOutcome, NewItem, Notification, PermissionLevel, SharedConnection, MEMBER_ITEMS_TOPIC,
};
use rusqlite::Transaction;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

struct Harness {
    conn: SharedConnection,
    engine: Arc<Engine>,
    coordinator: BulkCoordinator,
    notifications: UnboundedReceiver<Notification>,
}

impl Harness {
    fn new() -> Self {
        Self::with(open_shared_in_memory().unwrap(), Engine::default())
    }

    fn with(conn: SharedConnection, engine: Engine) -> Self {
        let engine = Arc::new(engine);
        let (notifier, notifications) = ChannelNotifier::channel();
        let coordinator = BulkCoordinator::new(
            Handle::current(),
            Arc::clone(&conn),
            Arc::clone(&engine),
            Arc::new(notifier),
        );
        Self {
            conn,
            engine,
            coordinator,
            notifications,
        }
    }

    fn run<T>(&self, work: impl FnOnce(&Engine, &Transaction<'_>) -> CoreResult<T>) -> CoreResult<T> {
        let mut guard = self.conn.lock().unwrap();
        let tx = guard.transaction().unwrap();
        let value = work(&self.engine, &tx)?;
        tx.commit().unwrap();
        Ok(value)
    }

    fn folder(&self, actor: Actor, parent: Option<ItemId>, name: &str) -> Item {
        self.run(|engine, tx| {
            engine
                .items()
                .create_item(tx, actor, NewItem::folder(parent, name))
        })
        .unwrap()
    }

    fn is_live(&self, actor: Actor, id: ItemId) -> bool {
        self.run(|engine, tx| engine.items().get_item(tx, actor, id))
            .is_ok()
    }

    async fn next_notification(&mut self) -> Notification {
        tokio::time::timeout(Duration::from_secs(5), self.notifications.recv())
            .await
            .expect("batch did not report in time")
            .expect("notifier channel closed")
    }
}

/// Panics the first time a recycle is attempted, then lets everything through.
#[derive(Default)]
struct PanicsOnce {
    calls: AtomicUsize,
}

impl ItemHook for PanicsOnce {
    fn name(&self) -> &str {
        "panics_once"
    }

    fn pre(&self, _ctx: &HookContext<'_>, _payload: &HookPayload<'_>) -> Result<(), HookError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("recycle hook blew up");
        }
        Ok(())
    }
}

fn account() -> (AccountId, Actor) {
    let id = Uuid::new_v4();
    (id, Actor::Account(id))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shared_folder_walkthrough() {
    let mut harness = Harness::new();
    let (alice_id, alice) = account();
    let (bob_id, bob) = account();

    let a = harness.folder(alice, None, "A");
    let b = harness.folder(alice, Some(a.id), "B");
    let d = harness.folder(alice, Some(a.id), "D");
    harness
        .run(|engine, tx| {
            engine
                .memberships()
                .create_membership(tx, alice, b.id, bob_id, PermissionLevel::Read)
        })
        .unwrap();

    let alice_grant = harness
        .run(|engine, tx| engine.memberships().list_for_item(tx, alice, a.id))
        .unwrap()
        .into_iter()
        .find(|grant| grant.account_id == alice_id)
        .unwrap();
    let err = harness
        .run(|engine, tx| {
            engine
                .memberships()
                .delete_membership(tx, alice, alice_grant.id, false)
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let c = harness.folder(alice, None, "C");
    let moved = harness
        .run(|engine, tx| engine.tree().move_item(tx, alice, b.id, Some(c.id)))
        .unwrap();
    assert_eq!(moved.item.parent_id(), Some(c.id));
    let bob_level = harness
        .run(|engine, tx| engine.authorizer().effective_permission(tx, bob, &moved.item))
        .unwrap();
    assert_eq!(bob_level, Some(PermissionLevel::Read));

    let ticket = harness
        .coordinator
        .submit(alice, BulkOperation::Recycle, vec![a.id])
        .unwrap();
    assert_eq!(ticket.target_ids, vec![a.id]);

    let notification = harness.next_notification().await;
    assert_eq!(notification.account_id, alice_id);
    assert_eq!(notification.topic, MEMBER_ITEMS_TOPIC);
    match notification.event {
        BatchEvent::Completed {
            batch_id,
            operation,
            results,
        } => {
            assert_eq!(batch_id, ticket.id);
            assert_eq!(operation, BulkOperation::Recycle);
            assert_eq!(results.len(), 1);
            match &results[&a.id] {
                ItemOutcome::Succeeded { item } => assert!(item.is_recycled()),
                other => panic!("unexpected outcome: {other:?}"),
            }
        }
        other => panic!("unexpected event: {other:?}"),
    }

    assert!(!harness.is_live(alice, a.id));
    assert!(!harness.is_live(alice, d.id));
    assert!(harness.is_live(alice, b.id));
    assert!(harness.is_live(bob, b.id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn one_failing_target_does_not_affect_the_others() {
    let mut harness = Harness::new();
    let (_, alice) = account();
    let (_, bob) = account();

    let target = harness.folder(alice, None, "target");
    let first = harness.folder(alice, None, "first");
    let second = harness.folder(alice, None, "second");
    let foreign = harness.folder(bob, None, "foreign");
    let missing = Uuid::new_v4();

    let targets = vec![first.id, foreign.id, second.id, missing];
    let ticket = harness
        .coordinator
        .submit(
            alice,
            BulkOperation::Move {
                parent: Some(target.id),
            },
            targets.clone(),
        )
        .unwrap();

    let notification = harness.next_notification().await;
    assert_eq!(notification.event.batch_id(), ticket.id);
    let BatchEvent::Completed { results, .. } = notification.event else {
        panic!("batch failed as a whole");
    };
    assert_eq!(results.len(), targets.len());

    for id in [first.id, second.id] {
        match &results[&id] {
            ItemOutcome::Succeeded { item } => assert_eq!(item.parent_id(), Some(target.id)),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
    match &results[&foreign.id] {
        ItemOutcome::Failed { error } => assert_eq!(error.kind, ErrorKind::Forbidden),
        other => panic!("unexpected outcome: {other:?}"),
    }
    match &results[&missing] {
        ItemOutcome::Failed { error } => assert_eq!(error.kind, ErrorKind::NotFound),
        other => panic!("unexpected outcome: {other:?}"),
    }

    let foreign_now = harness
        .run(|engine, tx| engine.items().get_item(tx, bob, foreign.id))
        .unwrap();
    assert!(foreign_now.is_root());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn restore_batch_brings_items_back() {
    let mut harness = Harness::new();
    let (_, alice) = account();

    let a = harness.folder(alice, None, "A");
    let b = harness.folder(alice, None, "B");
    harness
        .run(|engine, tx| {
            engine.tree().recycle_item(tx, alice, a.id)?;
            engine.tree().recycle_item(tx, alice, b.id)
        })
        .unwrap();

    harness
        .coordinator
        .submit(alice, BulkOperation::Restore, vec![a.id, b.id])
        .unwrap();
    let notification = harness.next_notification().await;
    let BatchEvent::Completed { results, .. } = notification.event else {
        panic!("batch failed as a whole");
    };
    assert!(results.values().all(ItemOutcome::is_success));
    assert!(harness.is_live(alice, a.id));
    assert!(harness.is_live(alice, b.id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_batches_are_rejected_synchronously() {
    let mut harness = Harness::new();
    let (_, alice) = account();
    let item = Uuid::new_v4();

    let err = harness
        .coordinator
        .submit(alice, BulkOperation::Purge, Vec::new())
        .unwrap_err();
    assert!(matches!(err, CoreError::EmptyTargets));

    let err = harness
        .coordinator
        .submit(alice, BulkOperation::Purge, vec![item, item])
        .unwrap_err();
    assert!(matches!(err, CoreError::DuplicateTarget(id) if id == item));

    let err = harness
        .coordinator
        .submit(Actor::Anonymous, BulkOperation::Recycle, vec![item])
        .unwrap_err();
    assert!(matches!(err, CoreError::AnonymousActor));

    let too_many: Vec<_> = (0..harness.engine.config().max_batch_size + 1)
        .map(|_| Uuid::new_v4())
        .collect();
    let err = harness
        .coordinator
        .submit(alice, BulkOperation::Recycle, too_many)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let nothing = tokio::time::timeout(Duration::from_millis(50), harness.notifications.recv()).await;
    assert!(nothing.is_err(), "rejected batches must not notify");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panicking_worker_fails_only_its_own_batch() {
    let dir = tempfile::tempdir().unwrap();
    let hook = Arc::new(PanicsOnce::default());
    let engine = Engine::new(
        EngineConfig::default(),
        HookRegistry::new().with(HookAction::Recycle, hook.clone()),
    );
    let mut harness = Harness::with(open_shared(dir.path().join("arbor.db")).unwrap(), engine);
    let (alice_id, alice) = account();

    let doomed = harness.folder(alice, None, "doomed");
    let healthy = harness.folder(alice, None, "healthy");

    let ticket = harness
        .coordinator
        .submit(alice, BulkOperation::Recycle, vec![doomed.id])
        .unwrap();
    let notification = harness.next_notification().await;
    assert_eq!(notification.account_id, alice_id);
    assert_eq!(notification.topic, MEMBER_ITEMS_TOPIC);
    match notification.event {
        BatchEvent::BatchFailed {
            batch_id,
            operation,
            error,
        } => {
            assert_eq!(batch_id, ticket.id);
            assert_eq!(operation, BulkOperation::Recycle);
            assert!(!error.is_empty());
        }
        other => panic!("unexpected event: {other:?}"),
    }
    let nothing = tokio::time::timeout(Duration::from_millis(50), harness.notifications.recv()).await;
    assert!(nothing.is_err(), "a failed batch reports exactly once");

    let ticket = harness
        .coordinator
        .submit(alice, BulkOperation::Recycle, vec![healthy.id])
        .unwrap();
    let notification = harness.next_notification().await;
    match notification.event {
        BatchEvent::Completed {
            batch_id, results, ..
        } => {
            assert_eq!(batch_id, ticket.id);
            match &results[&healthy.id] {
                ItemOutcome::Succeeded { item } => assert!(item.is_recycled()),
                other => panic!("unexpected outcome: {other:?}"),
            }
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(hook.calls.load(Ordering::SeqCst), 2);

    // the panicked transaction left nothing behind
    assert!(harness.is_live(alice, doomed.id));
    assert!(!harness.is_live(alice, healthy.id));
}
