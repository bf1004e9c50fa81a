use crate::result::IdTableVocabPair;
use sparql_exec_common::{ExecutionError, ExecutionResult};
use std::fmt::{Debug, Formatter};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// The iterator that produces the batches of a lazy result.
pub type BatchIterator = Box<dyn Iterator<Item = ExecutionResult<IdTableVocabPair>> + Send>;

/// Called for every batch of a lazy result together with the time it took to compute the batch.
pub type OnNewBatch = Box<dyn FnMut(&IdTableVocabPair, Duration) + Send>;

/// Called exactly once when the consumption of a lazy result ends.
pub type OnFinish = Box<dyn FnOnce(ConsumptionOutcome) + Send>;

/// Describes how the consumption of a lazy result ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConsumptionOutcome {
    /// All batches were consumed.
    Finished,
    /// Computing a batch failed.
    Failed {
        /// `true` if the failure was a cancellation of the query.
        cancelled: bool,
    },
    /// The consumer stopped before all batches were consumed.
    Abandoned,
}

struct PendingBatches {
    batches: BatchIterator,
    on_new_batch: Vec<OnNewBatch>,
    on_finish: Vec<OnFinish>,
}

/// The batches of a lazy result.
///
/// The batches can be consumed exactly once. Hooks that observe the consumption can be registered
/// until the batches are taken with [LazyBatches::take].
pub struct LazyBatches {
    pending: Mutex<Option<PendingBatches>>,
}

impl Debug for LazyBatches {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyBatches")
            .field("taken", &self.is_taken())
            .finish()
    }
}

impl LazyBatches {
    /// Creates a new [LazyBatches] from an iterator of batches.
    pub fn new(
        batches: impl Iterator<Item = ExecutionResult<IdTableVocabPair>> + Send + 'static,
    ) -> Self {
        Self {
            pending: Mutex::new(Some(PendingBatches {
                batches: Box::new(batches),
                on_new_batch: Vec::new(),
                on_finish: Vec::new(),
            })),
        }
    }

    /// Returns `true` if the batches were already taken.
    pub fn is_taken(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Registers a hook that is called for every produced batch.
    pub fn add_on_new_batch(
        &self,
        hook: impl FnMut(&IdTableVocabPair, Duration) + Send + 'static,
    ) -> ExecutionResult<()> {
        self.with_pending(|pending| pending.on_new_batch.push(Box::new(hook)))
    }

    /// Registers a hook that is called exactly once when the consumption ends, regardless of
    /// whether all batches were consumed.
    pub fn add_on_finish(
        &self,
        hook: impl FnOnce(ConsumptionOutcome) + Send + 'static,
    ) -> ExecutionResult<()> {
        self.with_pending(|pending| pending.on_finish.push(Box::new(hook)))
    }

    /// Hands out the batches. Fails if the batches were already taken.
    pub fn take(&self) -> ExecutionResult<LazyBatchStream> {
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(already_taken)?;
        Ok(LazyBatchStream {
            batches: pending.batches,
            on_new_batch: pending.on_new_batch,
            on_finish: pending.on_finish,
            finished: false,
        })
    }

    fn with_pending(&self, f: impl FnOnce(&mut PendingBatches)) -> ExecutionResult<()> {
        let mut guard = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let pending = guard.as_mut().ok_or_else(already_taken)?;
        f(pending);
        Ok(())
    }
}

fn already_taken() -> ExecutionError {
    ExecutionError::ContractViolation(
        "The batches of a lazy result can only be consumed once".to_owned(),
    )
}

/// A single-pass stream over the batches of a lazy result.
///
/// The finish hooks run exactly once: when the underlying iterator is exhausted, when it yields an
/// error, or when the stream is dropped early.
pub struct LazyBatchStream {
    batches: BatchIterator,
    on_new_batch: Vec<OnNewBatch>,
    on_finish: Vec<OnFinish>,
    finished: bool,
}

impl Debug for LazyBatchStream {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyBatchStream")
            .field("finished", &self.finished)
            .finish()
    }
}

impl LazyBatchStream {
    fn finish(&mut self, outcome: ConsumptionOutcome) {
        if self.finished {
            return;
        }
        self.finished = true;
        for hook in self.on_finish.drain(..) {
            hook(outcome);
        }
    }
}

impl Iterator for LazyBatchStream {
    type Item = ExecutionResult<IdTableVocabPair>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let start = Instant::now();
        match self.batches.next() {
            Some(Ok(batch)) => {
                let elapsed = start.elapsed();
                tracing::trace!("Produced lazy batch with {} rows", batch.table.num_rows());
                for hook in &mut self.on_new_batch {
                    hook(&batch, elapsed);
                }
                Some(Ok(batch))
            }
            Some(Err(error)) => {
                self.finish(ConsumptionOutcome::Failed {
                    cancelled: error.is_cancellation(),
                });
                Some(Err(error))
            }
            None => {
                self.finish(ConsumptionOutcome::Finished);
                None
            }
        }
    }
}

impl Drop for LazyBatchStream {
    fn drop(&mut self) {
        self.finish(ConsumptionOutcome::Abandoned);
    }
}
