//! Replaying recorded operations on other documents, inverse operations,
//! and the diff reported for each transaction.

use docnode::{
    boolean, string, BooleanState, ChangeEvent, DocConfig, DocError, Document, ErrorKind,
    Extension, Field, NodeDefinition, NodeId, Operation, Operations, Position, StatePatch,
    StringState,
};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

fn value() -> Field<StringState> {
    Field::new("value", string(""))
}

fn done() -> Field<BooleanState> {
    Field::new("done", boolean(false))
}

fn text() -> NodeDefinition {
    NodeDefinition::new("text").with_state(&value()).with_state(&done())
}

fn list() -> NodeDefinition {
    NodeDefinition::new("list")
}

fn config() -> DocConfig {
    DocConfig::new([Extension::new().with_nodes([text(), list()])])
}

fn new_text(doc: &mut Document, v: &str) -> NodeId {
    let id = doc.create_node(&text()).unwrap();
    doc.set(&id, &value(), v.to_string()).unwrap();
    id
}

fn record(doc: &mut Document) -> Rc<RefCell<Vec<ChangeEvent>>> {
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = events.clone();
    doc.on_change(move |_, event| {
        sink.borrow_mut().push(event.clone());
        Ok(())
    })
    .unwrap();
    events
}

/// Run a mixed set of edits, one commit per step
fn edit(doc: &mut Document) {
    let root = doc.root().clone();
    let a = new_text(doc, "a");
    let b = new_text(doc, "b");
    let c = new_text(doc, "c");
    doc.append(&root, &[a.clone(), b.clone(), c.clone()]).unwrap();
    doc.commit().unwrap();

    let group = doc.create_node(&list()).unwrap();
    let x = new_text(doc, "x");
    doc.append(&group, &[x.clone()]).unwrap();
    doc.insert_after(&a, &[group.clone()]).unwrap();
    doc.set(&b, &done(), true).unwrap();
    doc.commit().unwrap();

    doc.move_to(&c, &group, Position::Prepend).unwrap();
    doc.set(&a, &value(), "A".to_string()).unwrap();
    doc.commit().unwrap();

    doc.delete(&b).unwrap();
    doc.copy_to(&group, &root, Position::Append).unwrap();
    doc.commit().unwrap();
}

#[test]
fn test_replay_reproduces_document() {
    let mut source = Document::new(config()).unwrap();
    let initial = source.to_json().unwrap();
    let events = record(&mut source);
    edit(&mut source);

    let mut replica = Document::from_json(config(), &initial).unwrap();
    for event in events.borrow().iter() {
        // ship through the wire format
        let wire = event.operations.to_json_string().unwrap();
        replica
            .apply_operations(&Operations::from_json_str(&wire).unwrap())
            .unwrap();
        replica.commit().unwrap();
    }

    assert_eq!(replica.to_json().unwrap(), source.to_json().unwrap());
    assert!(replica.check_integrity().is_empty());
}

#[test]
fn test_inverse_operations_restore_previous_state() {
    let mut doc = Document::new(config()).unwrap();
    let events = record(&mut doc);
    let mut snapshots = vec![doc.to_json().unwrap()];

    let root = doc.root().clone();
    let a = new_text(&mut doc, "a");
    doc.append(&root, &[a.clone()]).unwrap();
    doc.commit().unwrap();
    snapshots.push(doc.to_json().unwrap());

    let b = new_text(&mut doc, "b");
    doc.append(&a, &[b.clone()]).unwrap();
    doc.set(&a, &value(), "A".to_string()).unwrap();
    doc.commit().unwrap();
    snapshots.push(doc.to_json().unwrap());

    doc.delete(&a).unwrap();
    doc.commit().unwrap();

    let inverses: Vec<Operations> = events
        .borrow()
        .iter()
        .map(|event| event.inverse_operations.clone())
        .collect();
    for inverse in inverses.iter().rev() {
        doc.apply_operations(inverse).unwrap();
        doc.commit().unwrap();
        let expected = snapshots.pop().unwrap();
        assert_eq!(doc.to_json().unwrap(), expected);
        assert!(doc.check_integrity().is_empty());
    }
}

#[test]
fn test_wire_format_of_a_transaction() {
    let mut doc = Document::new(config()).unwrap();
    let events = record(&mut doc);
    let root = doc.root().clone();
    let a = new_text(&mut doc, "hi");
    doc.append(&root, &[a.clone()]).unwrap();
    doc.commit().unwrap();

    let event = events.borrow()[0].clone();
    let expected = format!(r#"[[[0,[["{a}","text"]],0,0,0]],{{"{a}":{{"value":"\"hi\""}}}}]"#);
    assert_eq!(event.operations.to_json_string().unwrap(), expected);
    let inverse = format!(r#"[[[1,"{a}",0]],{{}}]"#);
    assert_eq!(event.inverse_operations.to_json_string().unwrap(), inverse);
}

#[test]
fn test_operations_on_missing_nodes_are_skipped() {
    let mut doc = Document::new(config()).unwrap();
    let root = doc.root().clone();
    let a = new_text(&mut doc, "a");
    doc.append(&root, &[a.clone()]).unwrap();
    doc.commit().unwrap();

    let ghost = NodeId::from("ghost");
    let operations = Operations {
        ordered: vec![
            Operation::Delete {
                start: ghost.clone(),
                end: None,
            },
            Operation::Insert {
                nodes: vec![(NodeId::from("fresh"), "text".to_string())],
                parent: Some(ghost.clone()),
                prev: None,
                next: None,
            },
            Operation::Insert {
                nodes: vec![(NodeId::from("kept"), "text".to_string())],
                parent: None,
                prev: Some(a.clone()),
                next: None,
            },
        ],
        state_patch: StatePatch::from([
            (
                ghost,
                BTreeMap::from([("value".to_string(), "\"x\"".to_string())]),
            ),
            (
                NodeId::from("kept"),
                BTreeMap::from([
                    ("value".to_string(), "\"kept\"".to_string()),
                    ("unknown".to_string(), "1".to_string()),
                ]),
            ),
        ]),
    };
    doc.apply_operations(&operations).unwrap();
    doc.commit().unwrap();

    let children = doc.children(&root).ids();
    assert_eq!(children, vec![a, NodeId::from("kept")]);
    assert_eq!(doc.get(&children[1], &value()).unwrap(), "kept");
    assert!(doc.node(&NodeId::from("fresh")).map_or(true, |node| !doc.is_attached(node.id())));
}

#[test]
fn test_unknown_node_type_aborts_replay() {
    let mut doc = Document::new(config()).unwrap();
    let before = doc.to_json().unwrap();
    let operations = Operations {
        ordered: vec![
            Operation::Insert {
                nodes: vec![(NodeId::from("ok"), "text".to_string())],
                parent: None,
                prev: None,
                next: None,
            },
            Operation::Insert {
                nodes: vec![(NodeId::from("bad"), "video".to_string())],
                parent: None,
                prev: None,
                next: None,
            },
        ],
        state_patch: Default::default(),
    };
    let err = doc.apply_operations(&operations).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Schema);
    assert!(matches!(err, DocError::UnregisteredType(_)));
    doc.commit().unwrap();
    assert_eq!(doc.to_json().unwrap(), before);
}

#[test]
fn test_insert_then_delete_cancels_out() {
    let mut doc = Document::new(config()).unwrap();
    let events = record(&mut doc);
    let root = doc.root().clone();
    let a = new_text(&mut doc, "a");
    doc.append(&root, &[a.clone()]).unwrap();
    doc.delete(&a).unwrap();
    doc.commit().unwrap();
    assert!(events.borrow().is_empty());
}

#[test]
fn test_delete_then_reinsert_reports_move() {
    let mut doc = Document::new(config()).unwrap();
    let root = doc.root().clone();
    let a = new_text(&mut doc, "a");
    let b = new_text(&mut doc, "b");
    doc.append(&root, &[a.clone(), b.clone()]).unwrap();
    doc.commit().unwrap();
    let events = record(&mut doc);

    doc.delete(&a).unwrap();
    doc.append(&root, &[a.clone()]).unwrap();
    doc.commit().unwrap();

    let events = events.borrow();
    let diff = &events[0].diff;
    assert!(diff.moved.contains(&a));
    assert!(diff.inserted.is_empty());
    assert!(diff.deleted.is_empty());
    assert!(diff.updated.is_empty());
}

#[test]
fn test_diff_sets() {
    let mut doc = Document::new(config()).unwrap();
    let root = doc.root().clone();
    let a = new_text(&mut doc, "a");
    let b = new_text(&mut doc, "b");
    let c = new_text(&mut doc, "c");
    doc.append(&root, &[a.clone(), b.clone(), c.clone()]).unwrap();
    doc.commit().unwrap();
    let events = record(&mut doc);

    let d = new_text(&mut doc, "d");
    doc.append(&root, &[d.clone()]).unwrap();
    doc.set(&d, &value(), "dd".to_string()).unwrap();
    doc.delete(&b).unwrap();
    doc.move_to(&c, &a, Position::Before).unwrap();
    doc.set(&c, &done(), true).unwrap();
    doc.commit().unwrap();

    let events = events.borrow();
    let diff = &events[0].diff;
    assert_eq!(diff.inserted.iter().collect::<Vec<_>>(), vec![&d]);
    assert_eq!(diff.deleted.iter().collect::<Vec<_>>(), vec![&b]);
    assert_eq!(diff.moved.iter().collect::<Vec<_>>(), vec![&c]);
    assert_eq!(diff.updated.iter().collect::<Vec<_>>(), vec![&c]);
    // the deleted node's last state is what undo would restore
    assert_eq!(events[0].inverse_operations.state_patch[&b]["value"], "\"b\"");
}

#[test]
fn test_reinserted_node_keeps_state_after_revert() {
    let mut source = Document::new(config()).unwrap();
    let root = source.root().clone();
    let d = new_text(&mut source, "a");
    source.append(&root, &[d.clone()]).unwrap();
    source.commit().unwrap();
    let before = source.to_json().unwrap();
    let events = record(&mut source);

    source.delete(&d).unwrap();
    source.append(&root, &[d.clone()]).unwrap();
    source.set(&d, &value(), "b".to_string()).unwrap();
    source.set(&d, &value(), "a".to_string()).unwrap();
    source.commit().unwrap();

    let events = events.borrow();
    let event = &events[0];
    assert_eq!(event.operations.state_patch[&d]["value"], "\"a\"");
    assert!(event.diff.moved.contains(&d));
    assert!(!event.diff.updated.contains(&d));

    let mut replica = Document::from_json(config(), &before).unwrap();
    replica.apply_operations(&event.operations).unwrap();
    replica.commit().unwrap();
    assert_eq!(replica.to_json().unwrap(), source.to_json().unwrap());
    assert_eq!(replica.get(&d, &value()).unwrap(), "a");

    // and back again
    replica.apply_operations(&event.inverse_operations).unwrap();
    replica.commit().unwrap();
    assert_eq!(replica.to_json().unwrap(), before);
}

#[test]
fn test_reinserted_node_edited_while_detached() {
    let mut doc = Document::new(config()).unwrap();
    let root = doc.root().clone();
    let d = doc.create_node(&text()).unwrap();
    doc.append(&root, &[d.clone()]).unwrap();
    doc.commit().unwrap();
    let before = doc.to_json().unwrap();
    let events = record(&mut doc);

    doc.delete(&d).unwrap();
    doc.set(&d, &value(), "detached".to_string()).unwrap();
    doc.append(&root, &[d.clone()]).unwrap();
    doc.set(&d, &value(), "attached".to_string()).unwrap();
    doc.commit().unwrap();

    let event = events.borrow()[0].clone();
    assert!(event.diff.updated.contains(&d));
    doc.apply_operations(&event.inverse_operations).unwrap();
    doc.commit().unwrap();
    assert_eq!(doc.to_json().unwrap(), before);
}

#[test]
fn test_moved_then_deleted_is_only_deleted() {
    let mut doc = Document::new(config()).unwrap();
    let root = doc.root().clone();
    let x = new_text(&mut doc, "x");
    doc.append(&root, &[x.clone()]).unwrap();
    doc.commit().unwrap();
    let events = record(&mut doc);

    let n = doc.create_node(&list()).unwrap();
    doc.append(&root, &[n.clone()]).unwrap();
    doc.move_to(&x, &n, Position::Append).unwrap();
    doc.delete(&n).unwrap();
    doc.commit().unwrap();

    let events = events.borrow();
    let diff = &events[0].diff;
    assert_eq!(diff.deleted.iter().collect::<Vec<_>>(), vec![&x]);
    assert!(diff.moved.is_empty());
    assert!(diff.inserted.is_empty());
    assert!(diff.updated.is_empty());
}

#[test]
fn test_moved_node_reverted_state_leaves_no_patch() {
    let mut doc = Document::new(config()).unwrap();
    let root = doc.root().clone();
    let a = new_text(&mut doc, "a");
    let b = new_text(&mut doc, "b");
    doc.append(&root, &[a.clone(), b.clone()]).unwrap();
    doc.commit().unwrap();
    let events = record(&mut doc);

    doc.move_to(&b, &a, Position::Before).unwrap();
    doc.set(&b, &value(), "B".to_string()).unwrap();
    doc.set(&b, &value(), "b".to_string()).unwrap();
    doc.commit().unwrap();

    let events = events.borrow();
    assert!(events[0].diff.moved.contains(&b));
    assert!(events[0].diff.updated.is_empty());
    assert!(events[0].operations.state_patch.is_empty());
    assert!(events[0].inverse_operations.state_patch.is_empty());
}
