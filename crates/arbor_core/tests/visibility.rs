mod common;

use arbor_core::{CoreError, PermissionLevel, VisibilityKind};
use common::{account, Fixture};

#[test]
fn conflicting_flags_on_one_chain_are_rejected() {
    let mut fx = Fixture::new();
    let (_, alice) = account();

    let a = fx.folder(alice, None, "A");
    let b = fx.folder(alice, Some(a.id), "B");
    let c = fx.document(alice, Some(b.id), "C");
    fx.run(|engine, tx| {
        engine
            .visibilities()
            .set_visibility(tx, alice, b.id, VisibilityKind::Public)
    })
    .unwrap();

    // below, on and above the flagged node
    for (target, kind) in [
        (c.id, VisibilityKind::Hidden),
        (c.id, VisibilityKind::Public),
        (b.id, VisibilityKind::Public),
        (a.id, VisibilityKind::Hidden),
    ] {
        let err = fx
            .run(|engine, tx| engine.visibilities().set_visibility(tx, alice, target, kind))
            .unwrap_err();
        assert!(
            matches!(err, CoreError::VisibilityConflict { item_id, kind: rejected } if item_id == target && rejected == kind),
            "{target} {kind}: {err}"
        );
    }

    let flags = fx
        .run(|engine, tx| engine.visibilities().list_for_item(tx, alice, c.id))
        .unwrap();
    assert_eq!(flags.len(), 1);
    assert_eq!(flags[0].item_path, b.path);
}

#[test]
fn flags_on_separate_branches_coexist() {
    let mut fx = Fixture::new();
    let (_, alice) = account();

    let a = fx.folder(alice, None, "A");
    let left = fx.folder(alice, Some(a.id), "left");
    let right = fx.folder(alice, Some(a.id), "right");
    fx.run(|engine, tx| {
        engine
            .visibilities()
            .set_visibility(tx, alice, left.id, VisibilityKind::Public)?;
        engine
            .visibilities()
            .set_visibility(tx, alice, right.id, VisibilityKind::Hidden)
    })
    .unwrap();
}

#[test]
fn removing_a_missing_flag_is_not_found() {
    let mut fx = Fixture::new();
    let (_, alice) = account();
    let (bob_id, bob) = account();

    let a = fx.folder(alice, None, "A");
    let b = fx.folder(alice, Some(a.id), "B");
    fx.run(|engine, tx| {
        engine
            .visibilities()
            .set_visibility(tx, alice, a.id, VisibilityKind::Public)
    })
    .unwrap();

    // inherited flags cannot be removed from below
    let err = fx
        .run(|engine, tx| {
            engine
                .visibilities()
                .remove_visibility(tx, alice, b.id, VisibilityKind::Public)
        })
        .unwrap_err();
    assert!(matches!(err, CoreError::VisibilityNotFound { item_id, .. } if item_id == b.id));

    fx.grant(alice, a.id, bob_id, PermissionLevel::Write);
    let err = fx
        .run(|engine, tx| {
            engine
                .visibilities()
                .remove_visibility(tx, bob, a.id, VisibilityKind::Public)
        })
        .unwrap_err();
    assert!(matches!(err, CoreError::Forbidden { .. }));

    let removed = fx
        .run(|engine, tx| {
            engine
                .visibilities()
                .remove_visibility(tx, alice, a.id, VisibilityKind::Public)
        })
        .unwrap();
    assert_eq!(removed.kind, VisibilityKind::Public);
    assert_eq!(removed.item_path, a.path);
}

#[test]
fn move_into_conflicting_chain_is_rejected() {
    let mut fx = Fixture::new();
    let (_, alice) = account();

    let public_root = fx.folder(alice, None, "public");
    let hidden_root = fx.folder(alice, None, "hidden");
    let inner = fx.document(alice, Some(hidden_root.id), "inner");
    fx.run(|engine, tx| {
        engine
            .visibilities()
            .set_visibility(tx, alice, public_root.id, VisibilityKind::Public)?;
        engine
            .visibilities()
            .set_visibility(tx, alice, inner.id, VisibilityKind::Hidden)
    })
    .unwrap();

    let before = fx.snapshot();
    let err = fx
        .run(|engine, tx| {
            engine
                .tree()
                .move_item(tx, alice, hidden_root.id, Some(public_root.id))
        })
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::VisibilityConflict {
            kind: VisibilityKind::Hidden,
            ..
        }
    ));
    assert_eq!(fx.snapshot(), before);
}

#[test]
fn copy_drops_flags_that_conflict_with_destination() {
    let mut fx = Fixture::new();
    let (_, alice) = account();

    let public_root = fx.folder(alice, None, "public");
    let source = fx.folder(alice, None, "source");
    let secret = fx.document(alice, Some(source.id), "secret");
    fx.run(|engine, tx| {
        engine
            .visibilities()
            .set_visibility(tx, alice, public_root.id, VisibilityKind::Public)?;
        engine
            .visibilities()
            .set_visibility(tx, alice, secret.id, VisibilityKind::Hidden)
    })
    .unwrap();

    let outcome = fx
        .run(|engine, tx| {
            engine
                .tree()
                .copy_item(tx, alice, source.id, Some(public_root.id))
        })
        .unwrap();
    let secret_copy = outcome
        .copied
        .iter()
        .find(|(original, _)| *original == secret.id)
        .map(|(_, copy)| *copy)
        .unwrap();

    let flags = fx
        .run(|engine, tx| engine.visibilities().list_for_item(tx, alice, secret_copy))
        .unwrap();
    let kinds: Vec<_> = flags.iter().map(|flag| flag.kind).collect();
    assert_eq!(kinds, vec![VisibilityKind::Public]);

    // the copy to the root level keeps the flag
    let outcome = fx
        .run(|engine, tx| engine.tree().copy_item(tx, alice, source.id, None))
        .unwrap();
    let secret_copy = outcome.copied[1].1;
    let flags = fx
        .run(|engine, tx| engine.visibilities().list_for_item(tx, alice, secret_copy))
        .unwrap();
    let kinds: Vec<_> = flags.iter().map(|flag| flag.kind).collect();
    assert_eq!(kinds, vec![VisibilityKind::Hidden]);
}
