//! Transactions, commit, normalization and listener rules.

use docnode::{
    number, string, DocConfig, DocError, Document, ErrorKind, Extension, Field, NodeDefinition,
    NodeId, NumberState, RequireChild, Stage, StateMut, StringState,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

fn value() -> Field<StringState> {
    Field::new("value", string(""))
}

fn text() -> NodeDefinition {
    NodeDefinition::new("text").with_state(&value())
}

fn paragraph() -> NodeDefinition {
    NodeDefinition::new("paragraph")
}

fn config() -> DocConfig {
    DocConfig::new([Extension::new().with_nodes([text(), paragraph()])])
}

fn new_text(doc: &mut Document, v: &str) -> NodeId {
    let id = doc.create_node(&text()).unwrap();
    doc.set(&id, &value(), v.to_string()).unwrap();
    id
}

fn count_events(doc: &mut Document) -> Rc<Cell<usize>> {
    let events = Rc::new(Cell::new(0));
    let counter = events.clone();
    doc.on_change(move |_, _| {
        counter.set(counter.get() + 1);
        Ok(())
    })
    .unwrap();
    events
}

#[test]
fn test_one_event_per_commit() {
    let mut doc = Document::new(config()).unwrap();
    let root = doc.root().clone();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    doc.on_change(move |_, event| {
        sink.borrow_mut().push(event.clone());
        Ok(())
    })
    .unwrap();

    let a = new_text(&mut doc, "a");
    let b = new_text(&mut doc, "b");
    doc.append(&root, &[a.clone()]).unwrap();
    doc.append(&root, &[b.clone()]).unwrap();
    assert_eq!(doc.stage(), Stage::Update);
    doc.commit().unwrap();
    assert_eq!(doc.stage(), Stage::Idle);

    let events = seen.borrow();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.operations.ordered.len(), 2);
    assert!(event.diff.inserted.contains(&a) && event.diff.inserted.contains(&b));
    assert!(event.diff.updated.is_empty());
    assert_eq!(event.operations.state_patch[&a]["value"], "\"a\"");
}

#[test]
fn test_empty_commit_is_silent() {
    let mut doc = Document::new(config()).unwrap();
    let events = count_events(&mut doc);
    doc.commit().unwrap();

    // state changes on detached nodes are not recorded
    new_text(&mut doc, "loose");
    doc.commit().unwrap();
    assert_eq!(events.get(), 0);
}

#[test]
fn test_same_value_set_records_nothing() {
    let mut doc = Document::new(config()).unwrap();
    let root = doc.root().clone();
    let a = new_text(&mut doc, "a");
    doc.append(&root, &[a.clone()]).unwrap();
    doc.commit().unwrap();
    let events = count_events(&mut doc);

    doc.set(&a, &value(), "a".to_string()).unwrap();
    doc.commit().unwrap();
    assert_eq!(events.get(), 0);

    // changed and changed back within one transaction
    doc.set(&a, &value(), "b".to_string()).unwrap();
    doc.set(&a, &value(), "a".to_string()).unwrap();
    doc.commit().unwrap();
    assert_eq!(events.get(), 0);

    doc.update(&a, &value(), |v| format!("{v}!")).unwrap();
    doc.commit().unwrap();
    assert_eq!(events.get(), 1);
    assert_eq!(doc.get(&a, &value()).unwrap(), "a!");
}

#[test]
fn test_get_prev() {
    let mut doc = Document::new(config()).unwrap();
    let root = doc.root().clone();
    let a = new_text(&mut doc, "a");
    doc.append(&root, &[a.clone()]).unwrap();
    doc.commit().unwrap();

    let prev = Rc::new(RefCell::new(None));
    let slot = prev.clone();
    let watched = a.clone();
    doc.on_change(move |doc, event| {
        if event.diff.updated.contains(&watched) {
            *slot.borrow_mut() = Some(doc.state(&watched, &value()).get_prev()?);
        }
        Ok(())
    })
    .unwrap();

    // inserted nodes are not in diff.updated
    let b = new_text(&mut doc, "b");
    doc.append(&root, &[b.clone()]).unwrap();
    doc.set(&b, &value(), "bb".to_string()).unwrap();
    assert!(matches!(doc.get_prev(&b, &value()), Err(DocError::PrevUnavailable(_))));
    doc.commit().unwrap();

    doc.set(&a, &value(), "changed".to_string()).unwrap();
    doc.commit().unwrap();
    assert_eq!(*prev.borrow(), Some((true, "a".to_string())));
}

#[test]
fn test_normalize_joins_transaction() {
    let extension = Extension::new()
        .with_nodes([text(), paragraph()])
        .with_normalizer(RequireChild::new(paragraph()));
    let mut doc = Document::new(DocConfig::new([extension])).unwrap();
    let root = doc.root().clone();

    let first = doc.create_node(&paragraph()).unwrap();
    doc.append(&root, &[first.clone()]).unwrap();
    doc.commit().unwrap();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    doc.on_change(move |_, event| {
        sink.borrow_mut().push(event.diff.clone());
        Ok(())
    })
    .unwrap();

    doc.delete(&first).unwrap();
    doc.commit().unwrap();

    let children = doc.children(&root).ids();
    assert_eq!(children.len(), 1);
    assert_ne!(children[0], first);
    assert!(doc.is(&children[0], &paragraph()));

    let diffs = seen.borrow();
    assert_eq!(diffs.len(), 1);
    assert!(diffs[0].deleted.contains(&first));
    assert!(diffs[0].inserted.contains(&children[0]));
}

#[test]
fn test_strict_mode_rejects_non_idempotent_normalizer() {
    let grow = |doc: &mut Document| -> docnode::DocResult<()> {
        let root = doc.root().clone();
        let node = doc.create_node(&paragraph())?;
        doc.append(&root, &[node])
    };
    let extension = Extension::new()
        .with_nodes([paragraph()])
        .with_register(move |doc| doc.on_normalize(move |doc, _| grow(doc)));

    let mut strict = Document::new(DocConfig::new([extension.clone()])).unwrap();
    let root = strict.root().clone();
    let node = strict.create_node(&paragraph()).unwrap();
    strict.append(&root, &[node]).unwrap();
    let err = strict.commit().unwrap_err();
    assert!(matches!(err, DocError::NonIdempotentNormalize));
    assert_eq!(strict.stage(), Stage::Idle);

    let mut lenient = Document::new(DocConfig::new([extension]).strict_mode(false)).unwrap();
    let root = lenient.root().clone();
    let node = lenient.create_node(&paragraph()).unwrap();
    lenient.append(&root, &[node]).unwrap();
    lenient.commit().unwrap();
    assert_eq!(lenient.children(&root).count(), 2);
}

#[test]
fn test_listener_registration_rules() {
    let extension = Extension::new().with_nodes([paragraph()]).with_register(|doc| {
        let root = doc.root().clone();
        let node = doc.create_node(&paragraph())?;
        doc.append(&root, &[node])
    });
    let err = Document::new(DocConfig::new([extension])).unwrap_err();
    assert!(matches!(err, DocError::UpdateDuringStage("init")));

    let mut doc = Document::new(config()).unwrap();
    let err = doc.on_normalize(|_, _| Ok(())).unwrap_err();
    assert!(matches!(err, DocError::NormalizeListenerStage));

    new_text(&mut doc, "open");
    let err = doc.on_change(|_, _| Ok(())).unwrap_err();
    assert!(matches!(err, DocError::ChangeListenerStage));
}

#[test]
fn test_listener_error_resets_transaction() {
    let mut doc = Document::new(config()).unwrap();
    let root = doc.root().clone();
    let fail = Rc::new(Cell::new(true));
    let flag = fail.clone();
    let listener = doc
        .on_change(move |_, _| {
            if flag.replace(false) {
                return Err(DocError::listener("boom"));
            }
            Ok(())
        })
        .unwrap();

    let a = new_text(&mut doc, "a");
    doc.append(&root, &[a]).unwrap();
    let err = doc.commit().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Listener);
    assert_eq!(doc.stage(), Stage::Idle);

    // the failed change is still applied, and the next commit starts fresh
    assert_eq!(doc.children(&root).count(), 1);
    let b = new_text(&mut doc, "b");
    doc.append(&root, &[b]).unwrap();
    doc.commit().unwrap();

    assert!(doc.off_change(listener));
    assert!(!doc.off_change(listener));
}

#[test]
fn test_transact_keeps_edits_when_caller_fails() {
    let mut doc = Document::new(config()).unwrap();
    let root = doc.root().clone();
    let events = count_events(&mut doc);

    let outcome = doc
        .transact(|doc| -> Result<(), String> {
            let a = new_text(doc, "a");
            doc.append(&root, &[a]).map_err(|err| err.to_string())?;
            Err("caller failed".to_string())
        })
        .unwrap();

    assert_eq!(outcome, Err("caller failed".to_string()));
    assert_eq!(events.get(), 1);
    assert_eq!(doc.children(&root).count(), 1);
}

#[test]
fn test_abort() {
    let mut doc = Document::new(config()).unwrap();
    let root = doc.root().clone();
    let a = new_text(&mut doc, "a");
    doc.append(&root, &[a.clone()]).unwrap();
    doc.commit().unwrap();
    let before = doc.to_json().unwrap();
    let events = count_events(&mut doc);

    let b = new_text(&mut doc, "b");
    doc.append(&root, &[b]).unwrap();
    doc.set(&a, &value(), "changed".to_string()).unwrap();
    doc.abort().unwrap();
    doc.commit().unwrap();

    assert_eq!(events.get(), 0);
    assert_eq!(doc.to_json().unwrap(), before);
}

#[test]
fn test_commit_scheduler_runs_once_per_transaction() {
    let mut doc = Document::new(config()).unwrap();
    let root = doc.root().clone();
    let scheduled = Rc::new(Cell::new(0));
    let counter = scheduled.clone();
    doc.set_commit_scheduler(move || counter.set(counter.get() + 1));

    let a = new_text(&mut doc, "a");
    let b = new_text(&mut doc, "b");
    doc.append(&root, &[a, b]).unwrap();
    assert_eq!(scheduled.get(), 1);
    doc.commit().unwrap();

    let c = new_text(&mut doc, "c");
    doc.append(&root, &[c]).unwrap();
    assert_eq!(scheduled.get(), 2);
}

#[test]
fn test_serialize_during_transaction() {
    let mut doc = Document::new(config()).unwrap();
    new_text(&mut doc, "a");
    assert!(matches!(doc.to_json(), Err(DocError::SerializeDuringTransaction)));
    assert!(doc.to_json_unsafe().is_ok());
    doc.commit().unwrap();
    assert!(doc.to_json().is_ok());
}

trait Increment {
    fn increment(&mut self) -> docnode::DocResult<()>;
}

impl Increment for StateMut<'_, NumberState> {
    fn increment(&mut self) -> docnode::DocResult<()> {
        self.update(|count| count + 1.0)
    }
}

#[test]
fn test_custom_state_methods() -> anyhow::Result<()> {
    let count = Field::new("count", number(0.0));
    let counter = NodeDefinition::new("counter").with_state(&count);
    let mut doc = Document::new(DocConfig::new([Extension::new().with_nodes([counter.clone()])]))?;
    let root = doc.root().clone();
    let id = doc.create_node(&counter)?;
    doc.append(&root, &[id.clone()])?;

    let mut state = doc.state_mut(&id, &count);
    state.increment()?;
    state.increment()?;
    assert_eq!(*state.get()?, 2.0);
    doc.commit()?;

    assert_eq!(*doc.state(&id, &count).get()?, 2.0);
    let json = doc.to_json()?;
    assert_eq!(json.children[0].state["count"], "2");
    Ok(())
}
