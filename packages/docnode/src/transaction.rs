//! # Transactions
//!
//! ```text
//!            mutation               commit                      (strict)
//!   Idle ─────────────▶ Update ─────────────▶ Normalize ─────▶ Normalize2
//!    ▲                                                              │
//!    │                 change listeners                              │
//!    └──────────────────── Change ◀──────────────────────────────────┘
//! ```
//!
//! The first mutation from `Idle` opens a transaction; later mutations join
//! it. Normalize listeners may mutate during `Normalize` and their edits
//! join the same transaction. In strict mode any mutation during
//! `Normalize2` is an error. Change listeners only get `&Document`, and
//! mutating in `Init` or `Change` is rejected.
//!
//! If a primitive fails, everything recorded so far is rolled back before
//! the error is returned.

use crate::diff::ChangeEvent;
use crate::document::Document;
use crate::errors::{DocError, DocResult};
use serde::Serialize;
use std::fmt;
use std::mem;
use tracing::{debug, error, instrument, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Extensions are registering
    Init,
    Idle,
    /// A transaction is open
    Update,
    /// First normalize pass
    Normalize,
    /// Strict-mode verification pass
    Normalize2,
    /// Change listeners are running
    Change,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::Idle => "idle",
            Stage::Update => "update",
            Stage::Normalize => "normalize",
            Stage::Normalize2 => "normalize2",
            Stage::Change => "change",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Document {
    pub(crate) fn ensure_mutable(&self) -> DocResult<()> {
        match self.stage {
            Stage::Change | Stage::Init => Err(DocError::UpdateDuringStage(self.stage.name())),
            Stage::Normalize2 => Err(DocError::NonIdempotentNormalize),
            Stage::Idle | Stage::Update | Stage::Normalize => Ok(()),
        }
    }

    /// Run `f` inside the current transaction, opening one if idle. An error
    /// from `f` rolls back the whole transaction.
    pub(crate) fn with_transaction<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> DocResult<T>,
    ) -> DocResult<T> {
        self.ensure_mutable()?;
        if self.stage == Stage::Idle {
            self.stage = Stage::Update;
            trace!("Transaction opened");
            if let Some(scheduler) = self.commit_scheduler.as_mut() {
                scheduler();
            }
        }
        match f(self) {
            Ok(value) => Ok(value),
            Err(err) => {
                debug!(error = %err, "Rolling back transaction");
                if let Err(abort_err) = self.abort() {
                    error!(error = %abort_err, "Rollback failed");
                }
                Err(err)
            }
        }
    }

    /// Run `f`, then commit. Edits made before `f` fails are kept and still
    /// committed; only failures inside document primitives roll back.
    pub fn transact<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> DocResult<T> {
        let value = f(self);
        self.commit()?;
        Ok(value)
    }

    /// Commit the open transaction: normalize, then notify change listeners.
    ///
    /// Pending state is cleared even if a listener fails.
    #[instrument(level = "debug", skip(self), fields(operations = self.operations.ordered.len()))]
    pub fn commit(&mut self) -> DocResult<()> {
        match self.stage {
            Stage::Change | Stage::Init | Stage::Normalize | Stage::Normalize2 => {
                return Err(DocError::CommitDuringStage(self.stage.name()));
            }
            Stage::Idle | Stage::Update => {}
        }
        self.stage = Stage::Idle;
        let result = self.run_listeners();
        self.reset_accumulators();
        self.stage = Stage::Idle;
        result
    }

    pub fn force_commit(&mut self) -> DocResult<()> {
        self.commit()
    }

    fn run_listeners(&mut self) -> DocResult<()> {
        if !self.has_changes() {
            return Ok(());
        }

        self.stage = Stage::Normalize;
        self.run_normalize_pass()?;
        if self.strict_mode {
            self.stage = Stage::Normalize2;
            self.run_normalize_pass()?;
        }
        if !self.has_changes() {
            return Ok(());
        }

        self.stage = Stage::Change;
        let mut inverse_operations = self.inverse_operations.clone();
        inverse_operations.ordered.reverse();
        let event = ChangeEvent {
            operations: self.operations.clone(),
            inverse_operations,
            diff: self.diff.clone(),
        };
        debug!(
            operations = event.operations.ordered.len(),
            inserted = event.diff.inserted.len(),
            deleted = event.diff.deleted.len(),
            moved = event.diff.moved.len(),
            updated = event.diff.updated.len(),
            "Publishing change"
        );

        let mut listeners = mem::take(&mut self.change_listeners);
        let mut result = Ok(());
        for (_, listener) in listeners.iter_mut() {
            if let Err(err) = listener(self, &event) {
                result = Err(err);
                break;
            }
        }
        self.change_listeners = listeners;
        result
    }

    fn run_normalize_pass(&mut self) -> DocResult<()> {
        let diff = self.diff.clone();
        let mut listeners = mem::take(&mut self.normalize_listeners);
        let mut result = Ok(());
        for listener in listeners.iter_mut() {
            if let Err(err) = listener(self, &diff) {
                result = Err(err);
                break;
            }
        }
        self.normalize_listeners = listeners;
        result
    }

    /// Roll back the open transaction without notifying listeners
    pub fn abort(&mut self) -> DocResult<()> {
        if matches!(self.stage, Stage::Change | Stage::Init) {
            return Err(DocError::UpdateDuringStage(self.stage.name()));
        }
        let mut inverse = mem::take(&mut self.inverse_operations);
        inverse.ordered.reverse();
        self.reset_accumulators();

        self.stage = Stage::Update;
        let result = self.replay(&inverse);
        self.reset_accumulators();
        self.stage = Stage::Idle;
        result
    }

    fn reset_accumulators(&mut self) {
        self.operations = Default::default();
        self.inverse_operations = Default::default();
        self.diff = Default::default();
        self.reinserted.clear();
    }
}
