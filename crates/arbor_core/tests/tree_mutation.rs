mod common;

use arbor_core::{
    CoreError, DetachedAdminPolicy, EngineConfig, ErrorKind, ItemPatch, PermissionLevel,
};
use common::{account, Fixture};
use serde_json::json;
use std::collections::HashSet;

#[test]
fn move_rebases_subtree_and_its_grants() {
    let mut fx = Fixture::new();
    let (_, alice) = account();
    let (bob_id, bob) = account();

    let a = fx.folder(alice, None, "A");
    let b = fx.folder(alice, Some(a.id), "B");
    let c = fx.folder(alice, Some(b.id), "C");
    let d = fx.document(alice, Some(c.id), "D");
    let target = fx.folder(alice, None, "target");
    fx.grant(alice, c.id, bob_id, PermissionLevel::Write);

    let outcome = fx
        .run(|engine, tx| engine.tree().move_item(tx, alice, b.id, Some(target.id)))
        .unwrap();
    assert_eq!(outcome.previous_path, b.path);
    assert_eq!(outcome.item.path, target.path.child(b.id));
    assert_eq!(outcome.moved_descendants, 2);

    let moved = fx
        .run(|engine, tx| engine.items().list_descendants(tx, alice, target.id))
        .unwrap();
    let moved_ids: HashSet<_> = moved.iter().map(|item| item.id).collect();
    assert_eq!(moved_ids, HashSet::from([b.id, c.id, d.id]));
    for item in &moved {
        assert!(item.path.is_strict_descendant(&target.path));
        assert_eq!(item.path.leaf_id().unwrap(), item.id);
    }

    let left_behind = fx
        .run(|engine, tx| engine.items().list_descendants(tx, alice, a.id))
        .unwrap();
    assert!(left_behind.is_empty());

    let moved_d = moved.iter().find(|item| item.id == d.id).unwrap();
    assert_eq!(fx.permission(bob, moved_d), Some(PermissionLevel::Write));
    let grants = fx
        .run(|engine, tx| engine.memberships().list_for_item(tx, alice, d.id))
        .unwrap();
    let bob_grant = grants.iter().find(|grant| grant.account_id == bob_id).unwrap();
    assert_eq!(
        bob_grant.item_path,
        target.path.child(b.id).child(c.id)
    );
}

#[test]
fn invalid_moves_leave_every_table_untouched() {
    let mut fx = Fixture::with_config(EngineConfig {
        max_tree_depth: 4,
        ..EngineConfig::default()
    });
    let (_, alice) = account();

    let a = fx.folder(alice, None, "A");
    let b = fx.folder(alice, Some(a.id), "B");
    let c = fx.folder(alice, Some(b.id), "C");
    let doc = fx.document(alice, Some(a.id), "doc");
    let other = fx.folder(alice, None, "other");
    let deep = fx.folder(alice, Some(other.id), "deep");
    let deeper = fx.folder(alice, Some(deep.id), "deeper");
    let before = fx.snapshot();

    let err = fx
        .run(|engine, tx| engine.tree().move_item(tx, alice, a.id, Some(c.id)))
        .unwrap_err();
    assert!(matches!(err, CoreError::CycleDetected { item_id, parent_id } if item_id == a.id && parent_id == c.id));

    let err = fx
        .run(|engine, tx| engine.tree().move_item(tx, alice, b.id, Some(b.id)))
        .unwrap_err();
    assert!(matches!(err, CoreError::SelfParent(id) if id == b.id));

    let err = fx
        .run(|engine, tx| engine.tree().move_item(tx, alice, b.id, Some(doc.id)))
        .unwrap_err();
    assert!(matches!(err, CoreError::ParentNotFolder(id) if id == doc.id));

    // B carries one level below it; deeper sits at depth 3
    let err = fx
        .run(|engine, tx| engine.tree().move_item(tx, alice, b.id, Some(deeper.id)))
        .unwrap_err();
    assert!(matches!(err, CoreError::HierarchyTooDeep { max_depth: 4 }));
    assert_eq!(err.kind(), ErrorKind::Validation);

    assert_eq!(fx.snapshot(), before);
}

#[test]
fn move_to_current_parent_is_a_noop() {
    let mut fx = Fixture::new();
    let (_, alice) = account();

    let a = fx.folder(alice, None, "A");
    let b = fx.folder(alice, Some(a.id), "B");
    let before = fx.snapshot();

    let outcome = fx
        .run(|engine, tx| engine.tree().move_item(tx, alice, b.id, Some(a.id)))
        .unwrap();
    assert_eq!(outcome.item.path, b.path);
    assert_eq!(outcome.moved_descendants, 0);

    let outcome = fx
        .run(|engine, tx| engine.tree().move_item(tx, alice, a.id, None))
        .unwrap();
    assert_eq!(outcome.item.path, a.path);
    assert_eq!(fx.snapshot(), before);
}

#[test]
fn move_needs_admin_on_destination_by_default() {
    let mut fx = Fixture::new();
    let (_, alice) = account();
    let (bob_id, bob) = account();

    let shared = fx.folder(alice, None, "shared");
    let mine = fx.folder(bob, None, "mine");
    fx.grant(alice, shared.id, bob_id, PermissionLevel::Write);

    let err = fx
        .run(|engine, tx| engine.tree().move_item(tx, bob, mine.id, Some(shared.id)))
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Forbidden {
            required: PermissionLevel::Admin,
            ..
        }
    ));

    let mut relaxed = Fixture::with_config(EngineConfig {
        move_parent_level: PermissionLevel::Write,
        ..EngineConfig::default()
    });
    let shared = relaxed.folder(alice, None, "shared");
    let mine = relaxed.folder(bob, None, "mine");
    relaxed.grant(alice, shared.id, bob_id, PermissionLevel::Write);
    let outcome = relaxed
        .run(|engine, tx| engine.tree().move_item(tx, bob, mine.id, Some(shared.id)))
        .unwrap();
    assert_eq!(outcome.item.parent_id(), Some(shared.id));
    assert_eq!(relaxed.permission(bob, &outcome.item), Some(PermissionLevel::Admin));
}

#[test]
fn detached_subtree_gets_the_mover_as_admin() {
    let mut fx = Fixture::new();
    let (alice_id, alice) = account();

    let a = fx.folder(alice, None, "A");
    let b = fx.folder(alice, Some(a.id), "B");

    let outcome = fx
        .run(|engine, tx| engine.tree().move_item(tx, alice, b.id, None))
        .unwrap();
    assert!(outcome.item.is_root());

    let grants = fx
        .run(|engine, tx| engine.memberships().list_for_item(tx, alice, b.id))
        .unwrap();
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].account_id, alice_id);
    assert_eq!(grants[0].level, PermissionLevel::Admin);
    assert_eq!(grants[0].item_path, outcome.item.path);
}

#[test]
fn detached_subtree_can_be_rejected() {
    let mut fx = Fixture::with_config(EngineConfig {
        detached_admin: DetachedAdminPolicy::Reject,
        ..EngineConfig::default()
    });
    let (_, alice) = account();
    let (bob_id, bob) = account();

    let a = fx.folder(alice, None, "A");
    let b = fx.folder(alice, Some(a.id), "B");
    let c = fx.folder(alice, Some(a.id), "C");
    let before = fx.snapshot();

    let err = fx
        .run(|engine, tx| engine.tree().move_item(tx, alice, b.id, None))
        .unwrap_err();
    assert!(matches!(err, CoreError::CannotRemoveLastAdmin { .. }));
    assert_eq!(fx.snapshot(), before);

    // an admin grant travelling with the subtree keeps it administered
    fx.grant(alice, c.id, bob_id, PermissionLevel::Admin);
    let outcome = fx
        .run(|engine, tx| engine.tree().move_item(tx, bob, c.id, None))
        .unwrap();
    assert!(outcome.item.is_root());
    assert_eq!(fx.permission(alice, &outcome.item), None);
}

#[test]
fn copy_duplicates_live_subtree_without_grants() {
    let mut fx = Fixture::new();
    let (alice_id, alice) = account();
    let (bob_id, bob) = account();

    let a = fx.folder(alice, None, "A");
    let b = fx.folder(alice, Some(a.id), "B");
    let c = fx.document(alice, Some(b.id), "C");
    let gone = fx.document(alice, Some(a.id), "gone");
    let target = fx.folder(alice, None, "target");
    fx.grant(alice, b.id, bob_id, PermissionLevel::Write);
    fx.run(|engine, tx| engine.tree().recycle_item(tx, alice, gone.id))
        .unwrap();

    let outcome = fx
        .run(|engine, tx| engine.tree().copy_item(tx, alice, a.id, Some(target.id)))
        .unwrap();
    assert_eq!(outcome.original.id, a.id);
    assert_eq!(outcome.copied.len(), 3);
    assert_eq!(outcome.copied[0], (a.id, outcome.copy.id));
    assert_eq!(outcome.copy.parent_id(), Some(target.id));
    assert_eq!(outcome.copy.name, "A");
    assert_eq!(outcome.copy.creator_id, Some(alice_id));

    let originals: HashSet<_> = outcome.copied.iter().map(|(original, _)| *original).collect();
    assert_eq!(originals, HashSet::from([a.id, b.id, c.id]));
    let copies: HashSet<_> = outcome.copied.iter().map(|(_, copy)| *copy).collect();
    assert!(copies.is_disjoint(&originals));

    let c_copy_id = outcome
        .copied
        .iter()
        .find(|(original, _)| *original == c.id)
        .map(|(_, copy)| *copy)
        .unwrap();
    let c_copy = fx
        .run(|engine, tx| engine.items().get_item(tx, alice, c_copy_id))
        .unwrap();
    assert_eq!(c_copy.payload, json!({"content": "C"}));
    assert_eq!(c_copy.path.depth(), 4);

    // bob's grant stays with the original
    assert_eq!(fx.permission(bob, &c_copy), None);
    let grants = fx
        .run(|engine, tx| engine.memberships().list_for_item(tx, alice, outcome.copy.id))
        .unwrap();
    assert!(grants
        .iter()
        .any(|grant| grant.item_path == outcome.copy.path && grant.level == PermissionLevel::Admin));

    fx.run(|engine, tx| {
        engine.items().patch_item(
            tx,
            alice,
            c_copy_id,
            ItemPatch {
                name: Some("C2".to_string()),
                payload: Some(json!({"content": "changed"})),
            },
        )
    })
    .unwrap();
    let original_c = fx
        .run(|engine, tx| engine.items().get_item(tx, alice, c.id))
        .unwrap();
    assert_eq!(original_c.name, "C");
    assert_eq!(original_c.payload, json!({"content": "C"}));
}

#[test]
fn reader_can_copy_into_own_folder() {
    let mut fx = Fixture::new();
    let (_, alice) = account();
    let (bob_id, bob) = account();

    let a = fx.folder(alice, None, "A");
    fx.document(alice, Some(a.id), "note");
    let mine = fx.folder(bob, None, "mine");
    fx.grant(alice, a.id, bob_id, PermissionLevel::Read);

    let outcome = fx
        .run(|engine, tx| engine.tree().copy_item(tx, bob, a.id, Some(mine.id)))
        .unwrap();
    assert_eq!(fx.permission(bob, &outcome.copy), Some(PermissionLevel::Admin));

    let err = fx
        .run(|engine, tx| engine.tree().copy_item(tx, bob, mine.id, Some(a.id)))
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Forbidden {
            required: PermissionLevel::Write,
            ..
        }
    ));
}

#[test]
fn invalid_copies_are_rejected() {
    let mut fx = Fixture::with_config(EngineConfig {
        max_descendants_for_copy: 1,
        ..EngineConfig::default()
    });
    let (_, alice) = account();

    let a = fx.folder(alice, None, "A");
    let b = fx.folder(alice, Some(a.id), "B");
    fx.document(alice, Some(b.id), "C");
    let before = fx.snapshot();

    let err = fx
        .run(|engine, tx| engine.tree().copy_item(tx, alice, a.id, Some(b.id)))
        .unwrap_err();
    assert!(matches!(err, CoreError::CycleDetected { .. }));

    let err = fx
        .run(|engine, tx| engine.tree().copy_item(tx, alice, a.id, None))
        .unwrap_err();
    assert!(matches!(err, CoreError::TooManyDescendants { count: 2, max: 1 }));

    assert_eq!(fx.snapshot(), before);

    // a subtree within the limit copies fine
    let outcome = fx
        .run(|engine, tx| engine.tree().copy_item(tx, alice, b.id, Some(a.id)))
        .unwrap();
    assert_eq!(outcome.copied.len(), 2);
}
