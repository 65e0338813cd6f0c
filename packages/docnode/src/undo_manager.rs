//! # Undo/Redo
//!
//! History built on change events: every committed transaction's inverse
//! operations become one undo step.
//!
//! ## Design
//!
//! - Undo replays the newest inverse and commits; the inverse of *that*
//!   transaction becomes a redo step
//! - Redo works the same way in the other direction
//! - Any other transaction clears the redo stack
//! - Past `max_undo_steps` the oldest steps are dropped
//!
//! ## Example
//!
//! ```rust,ignore
//! let undo = UndoManager::new(&mut doc)?;
//!
//! doc.append(&root, &[node])?;
//! doc.commit()?;
//!
//! undo.undo(&mut doc)?;
//! undo.redo(&mut doc)?;
//! ```

use crate::document::{Document, ListenerId};
use crate::errors::DocResult;
use crate::operations::Operations;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UndoOptions {
    /// Maximum number of undo levels (0 = unlimited)
    pub max_undo_steps: usize,
}

impl Default for UndoOptions {
    fn default() -> Self {
        Self { max_undo_steps: 100 }
    }
}

/// What produced the transaction currently being committed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxKind {
    Edit,
    Undo,
    Redo,
}

#[derive(Debug)]
struct History {
    /// Inverse operations, most recent last
    undo_stack: VecDeque<Operations>,
    redo_stack: VecDeque<Operations>,
    max_levels: usize,
    kind: TxKind,
}

impl History {
    fn record(&mut self, inverse: Operations) {
        match self.kind {
            TxKind::Edit => {
                Self::push(&mut self.undo_stack, inverse, self.max_levels);
                self.redo_stack.clear();
            }
            TxKind::Undo => Self::push(&mut self.redo_stack, inverse, self.max_levels),
            TxKind::Redo => Self::push(&mut self.undo_stack, inverse, self.max_levels),
        }
        self.kind = TxKind::Edit;
    }

    fn push(stack: &mut VecDeque<Operations>, operations: Operations, max_levels: usize) {
        stack.push_back(operations);
        if max_levels > 0 {
            while stack.len() > max_levels {
                stack.pop_front();
            }
        }
    }
}

/// Undo/redo history for one document
#[derive(Debug)]
pub struct UndoManager {
    history: Rc<RefCell<History>>,
    listener: ListenerId,
}

impl UndoManager {
    pub fn new(doc: &mut Document) -> DocResult<Self> {
        Self::with_options(doc, UndoOptions::default())
    }

    pub fn with_options(doc: &mut Document, options: UndoOptions) -> DocResult<Self> {
        let history = Rc::new(RefCell::new(History {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            max_levels: options.max_undo_steps,
            kind: TxKind::Edit,
        }));
        let recorder = history.clone();
        let listener = doc.on_change(move |_, event| {
            recorder
                .borrow_mut()
                .record(event.inverse_operations.clone());
            Ok(())
        })?;
        Ok(Self { history, listener })
    }

    /// Undo the last step. Returns `false` if there was nothing to undo.
    pub fn undo(&self, doc: &mut Document) -> DocResult<bool> {
        self.step(doc, TxKind::Undo)
    }

    /// Redo the last undone step. Returns `false` if there was nothing to redo.
    pub fn redo(&self, doc: &mut Document) -> DocResult<bool> {
        self.step(doc, TxKind::Redo)
    }

    fn step(&self, doc: &mut Document, kind: TxKind) -> DocResult<bool> {
        // pending edits become their own undo step first
        doc.commit()?;

        let operations = {
            let mut history = self.history.borrow_mut();
            let stack = match kind {
                TxKind::Undo => &mut history.undo_stack,
                TxKind::Redo | TxKind::Edit => &mut history.redo_stack,
            };
            let Some(operations) = stack.pop_back() else {
                return Ok(false);
            };
            history.kind = kind;
            operations
        };

        debug!(?kind, "Replaying history step");
        let result = doc.apply_operations(&operations).and_then(|()| doc.commit());
        self.history.borrow_mut().kind = TxKind::Edit;
        result.map(|()| true)
    }

    pub fn can_undo(&self) -> bool {
        !self.history.borrow().undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.history.borrow().redo_stack.is_empty()
    }

    pub fn undo_levels(&self) -> usize {
        self.history.borrow().undo_stack.len()
    }

    pub fn redo_levels(&self) -> usize {
        self.history.borrow().redo_stack.len()
    }

    pub fn clear(&self) {
        let mut history = self.history.borrow_mut();
        history.undo_stack.clear();
        history.redo_stack.clear();
    }

    /// Stop recording and drop the history
    pub fn detach(self, doc: &mut Document) {
        doc.off_change(self.listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id_generator::NodeId;
    use crate::operations::Operation;

    fn step(id: &str) -> Operations {
        Operations {
            ordered: vec![Operation::Delete {
                start: NodeId::from(id),
                end: None,
            }],
            ..Default::default()
        }
    }

    fn history(max_levels: usize) -> History {
        History {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            max_levels,
            kind: TxKind::Edit,
        }
    }

    #[test]
    fn test_cap_drops_oldest() {
        let mut history = history(2);
        history.record(step("a"));
        history.record(step("b"));
        history.record(step("c"));
        assert_eq!(history.undo_stack.len(), 2);
        assert_eq!(history.undo_stack.front(), Some(&step("b")));
        assert_eq!(history.undo_stack.back(), Some(&step("c")));
    }

    #[test]
    fn test_unlimited_levels() {
        let mut history = history(0);
        for i in 0..250 {
            history.record(step(&i.to_string()));
        }
        assert_eq!(history.undo_stack.len(), 250);
    }

    #[test]
    fn test_edit_clears_redo() {
        let mut history = history(10);
        history.kind = TxKind::Undo;
        history.record(step("a"));
        assert_eq!(history.redo_stack.len(), 1);
        assert_eq!(history.kind, TxKind::Edit);

        history.record(step("b"));
        assert!(history.redo_stack.is_empty());
        assert_eq!(history.undo_stack.len(), 1);
    }
}
