mod common;

use common::{blank, engine, p, straight_config, trace};
use neurotrace::storage::TxKind;
use neurotrace::types::{Mark, NodeState, Position};

#[test]
fn undo_and_redo_restore_exact_states() {
    let (mut engine, _) = engine(&straight_config(1));
    let volume = blank();
    let (_, nodes) = trace(&mut engine, &[Position::ORIGIN, p(10.0, 0.0, 0.0)]);

    let before = engine.store().snapshot();
    engine.pick_target(p(20.0, 0.0, 0.0));
    engine.connect(&volume).unwrap();
    engine.extend(&volume).unwrap();
    let after = engine.store().snapshot();
    assert_ne!(before, after);

    assert!(engine.undo().unwrap().is_some());
    assert_eq!(engine.store().snapshot(), before);
    assert!(engine.redo().unwrap().is_some());
    assert_eq!(engine.store().snapshot(), after);
    engine.store().check_integrity().unwrap();

    engine.pick_current_node(nodes[1]).unwrap();
    engine.mark(Mark::Mark1).unwrap();
    let marked = engine.store().snapshot();
    engine.undo().unwrap();
    assert_eq!(engine.store().snapshot(), after);
    engine.redo().unwrap();
    assert_eq!(engine.store().snapshot(), marked);
}

#[test]
fn undo_reverses_a_split_in_one_step() {
    let (mut engine, _) = engine(&straight_config(1));
    let (_, nodes) = trace(
        &mut engine,
        &[Position::ORIGIN, p(10.0, 0.0, 0.0), p(20.0, 0.0, 0.0), p(30.0, 0.0, 0.0)],
    );
    let before = engine.store().snapshot();
    engine.pick_current_node(nodes[1]).unwrap();
    engine.delete().unwrap();
    assert_eq!(engine.store().neuron_count(), 2);

    engine.undo().unwrap();
    assert_eq!(engine.store().snapshot(), before);
    engine.store().check_integrity().unwrap();
}

#[test]
fn new_action_invalidates_redo() {
    let (mut engine, _) = engine(&straight_config(1));
    let (_, nodes) = trace(&mut engine, &[Position::ORIGIN, p(10.0, 0.0, 0.0)]);
    engine.pick_current_node(nodes[1]).unwrap();
    engine.end().unwrap();
    engine.undo().unwrap();
    assert!(engine.can_redo());

    engine.end_as(NodeState::Tangle).unwrap();
    assert!(!engine.can_redo());
    assert_eq!(engine.redo().unwrap(), None);
    assert_eq!(engine.store().try_node(nodes[1]).unwrap().state, NodeState::Tangle);
}

#[test]
fn undo_walks_back_to_empty_graph() {
    let (mut engine, _) = engine(&straight_config(1));
    trace(
        &mut engine,
        &[Position::ORIGIN, p(10.0, 0.0, 0.0), p(20.0, 0.0, 0.0)],
    );
    let full = engine.store().snapshot();
    let mut steps = 0;
    while engine.undo().unwrap().is_some() {
        steps += 1;
        engine.store().check_integrity().unwrap();
    }
    assert_eq!(steps, 3);
    assert_eq!(engine.store().node_count(), 0);
    assert_eq!(engine.store().neuron_count(), 0);

    while engine.redo().unwrap().is_some() {}
    assert_eq!(engine.store().snapshot(), full);
}

#[test]
fn undo_and_redo_are_queued_for_sync() {
    let (mut engine, _) = engine(&straight_config(1));
    trace(&mut engine, &[Position::ORIGIN, p(10.0, 0.0, 0.0)]);
    engine.drain_outbox();

    let undone = engine.undo().unwrap().unwrap();
    let redone = engine.redo().unwrap().unwrap();
    assert_eq!(undone, redone);
    let outbox = engine.drain_outbox();
    assert_eq!(outbox.len(), 2);
    assert_eq!(outbox[0].kind, TxKind::Undo(undone));
    assert_eq!(outbox[1].kind, TxKind::Redo(undone));
    assert_ne!(outbox[0].id, undone);
}

#[test]
fn history_depth_is_bounded() {
    let mut config = straight_config(1);
    config.session.history_limit = 2;
    let (mut engine, _) = engine(&config);
    trace(
        &mut engine,
        &[Position::ORIGIN, p(10.0, 0.0, 0.0), p(20.0, 0.0, 0.0), p(30.0, 0.0, 0.0)],
    );
    assert!(engine.undo().unwrap().is_some());
    assert!(engine.undo().unwrap().is_some());
    assert!(engine.undo().unwrap().is_none());
    assert_eq!(engine.store().node_count(), 2);
}
