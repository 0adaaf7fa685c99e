//! Saga coordinator for writes that span more than one store
//!
//! Each step runs immediately. A step that succeeds registers its
//! compensating action; when a later step fails, the registered
//! compensations run in reverse order and the failure is reported together
//! with whether every compensation succeeded.
//!
//! ```ignore
//! let mut saga = Saga::new("create_order");
//! let escrow = saga.step("escrow", || settle.escrow(..), || settle.reverse(..))?;
//! let order = saga.step_final("persist", || repo.create_main_order(..))?;
//! saga.finish();
//! ```

use std::fmt;
use thiserror::Error;

type Compensation<'a, E> = Box<dyn FnOnce() -> Result<(), E> + Send + 'a>;

/// A failed saga step
#[derive(Debug, Error)]
#[error("saga {saga} failed at step {step}: {source}")]
pub struct SagaError<E> {
    pub saga: &'static str,
    pub step: &'static str,
    pub source: E,
    /// `true` when every earlier step was undone (or there was nothing to
    /// undo); `false` leaves state that needs manual repair.
    pub compensated: bool,
}

/// Coordinator for one multi-step operation.
///
/// Dropping a saga without calling [`Saga::finish`] keeps the completed
/// steps: compensations only run when a step fails.
#[must_use = "call finish() once every step has succeeded"]
pub struct Saga<'a, E> {
    name: &'static str,
    compensations: Vec<(&'static str, Compensation<'a, E>)>,
}

impl<'a, E: fmt::Display> Saga<'a, E> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            compensations: Vec::new(),
        }
    }

    /// Run `action`; on success remember `undo` for a later failure
    pub fn step<T>(
        &mut self,
        step: &'static str,
        action: impl FnOnce() -> Result<T, E>,
        undo: impl FnOnce() -> Result<(), E> + Send + 'a,
    ) -> Result<T, SagaError<E>> {
        let value = self.step_final(step, action)?;
        self.compensations.push((step, Box::new(undo)));
        Ok(value)
    }

    /// Run a step that needs no compensation of its own (the last one, or a
    /// read)
    pub fn step_final<T>(
        &mut self,
        step: &'static str,
        action: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, SagaError<E>> {
        match action() {
            Ok(value) => Ok(value),
            Err(source) => {
                let compensated = self.rollback(step, &source);
                Err(SagaError {
                    saga: self.name,
                    step,
                    source,
                    compensated,
                })
            }
        }
    }

    /// Number of steps that would be undone on failure
    pub fn pending_compensations(&self) -> usize {
        self.compensations.len()
    }

    /// Commit: forget every compensation
    pub fn finish(self) {
        tracing::debug!(saga = self.name, steps = self.compensations.len(), "Saga finished");
    }

    fn rollback(&mut self, failed_step: &'static str, cause: &E) -> bool {
        if self.compensations.is_empty() {
            return true;
        }
        tracing::warn!(
            saga = self.name,
            step = failed_step,
            error = %cause,
            "Saga step failed, compensating"
        );

        let mut all_ok = true;
        while let Some((step, undo)) = self.compensations.pop() {
            match undo() {
                Ok(()) => {
                    tracing::info!(saga = self.name, step, "Compensation applied");
                }
                Err(e) => {
                    all_ok = false;
                    tracing::error!(
                        saga = self.name,
                        step,
                        error = %e,
                        "Compensation failed, manual repair required"
                    );
                }
            }
        }
        all_ok
    }
}
