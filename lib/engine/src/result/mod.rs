mod lazy;

pub use lazy::{
    BatchIterator, ConsumptionOutcome, LazyBatchStream, LazyBatches, OnFinish, OnNewBatch,
};

use itertools::Itertools;
use sparql_exec_common::{CacheSize, CancellationHandle, ExecutionError, ExecutionResult};
use sparql_exec_model::{ColumnIndex, IdTable, LocalVocab};
use std::sync::{Arc, Mutex, PoisonError};

/// A table together with the local vocabulary that resolves its
/// [LocalVocabIndex](sparql_exec_model::LocalVocabIndex) cells.
#[derive(Clone, Debug, Default)]
pub struct IdTableVocabPair {
    /// The rows.
    pub table: IdTable,
    /// Resolves the local vocabulary entries in `table`.
    pub local_vocab: LocalVocab,
}

impl IdTableVocabPair {
    /// Creates a new [IdTableVocabPair].
    pub fn new(table: IdTable, local_vocab: LocalVocab) -> Self {
        Self { table, local_vocab }
    }
}

#[derive(Debug)]
enum ResultData {
    Materialized(IdTableVocabPair),
    Lazy(LazyBatches),
}

/// The result of an operation.
///
/// A result is either fully materialized or a single-pass sequence of batches. In both cases the
/// rows are sorted on [Self::sorted_by]. For lazy results this holds for the concatenation of all
/// batches.
#[derive(Debug)]
pub struct QueryResult {
    width: usize,
    sorted_by: Vec<ColumnIndex>,
    data: ResultData,
}

impl QueryResult {
    /// Creates a new materialized [QueryResult].
    pub fn new_materialized(
        table: IdTable,
        local_vocab: LocalVocab,
        sorted_by: Vec<ColumnIndex>,
    ) -> Self {
        Self {
            width: table.num_columns(),
            sorted_by,
            data: ResultData::Materialized(IdTableVocabPair::new(table, local_vocab)),
        }
    }

    /// Creates a new lazy [QueryResult]. Every batch produced by `batches` must have `width`
    /// columns.
    pub fn new_lazy(
        width: usize,
        batches: impl Iterator<Item = ExecutionResult<IdTableVocabPair>> + Send + 'static,
        sorted_by: Vec<ColumnIndex>,
    ) -> Self {
        Self {
            width,
            sorted_by,
            data: ResultData::Lazy(LazyBatches::new(batches)),
        }
    }

    /// Returns the number of columns.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Returns the columns the rows are sorted on, in order of precedence.
    pub fn sorted_by(&self) -> &[ColumnIndex] {
        &self.sorted_by
    }

    /// Returns `true` if the result is fully materialized.
    pub fn is_materialized(&self) -> bool {
        matches!(self.data, ResultData::Materialized(_))
    }

    /// Returns the table of a materialized result.
    pub fn id_table(&self) -> Option<&IdTable> {
        self.materialized().map(|pair| &pair.table)
    }

    /// Returns the local vocabulary of a materialized result.
    pub fn local_vocab(&self) -> Option<&LocalVocab> {
        self.materialized().map(|pair| &pair.local_vocab)
    }

    /// Returns the table and the local vocabulary of a materialized result. Fails for lazy
    /// results.
    pub fn materialized_pair(&self) -> ExecutionResult<&IdTableVocabPair> {
        self.materialized().ok_or_else(|| {
            ExecutionError::ContractViolation(
                "Expected a materialized result, but the result is lazy".to_owned(),
            )
        })
    }

    /// Returns the batches of a lazy result, e.g., to register hooks.
    pub fn lazy_batches(&self) -> Option<&LazyBatches> {
        match &self.data {
            ResultData::Lazy(batches) => Some(batches),
            ResultData::Materialized(_) => None,
        }
    }

    /// Hands out the batches of a lazy result. Fails for materialized results and if the
    /// batches were already taken.
    pub fn take_batches(&self) -> ExecutionResult<LazyBatchStream> {
        match &self.data {
            ResultData::Lazy(batches) => batches.take(),
            ResultData::Materialized(_) => Err(ExecutionError::ContractViolation(
                "Only lazy results can be consumed batch by batch".to_owned(),
            )),
        }
    }

    /// Returns a writable copy of the local vocabulary of a materialized result.
    ///
    /// Operations use this to add new words while the vocabulary of their input stays shared.
    pub fn copy_of_local_vocab(&self) -> ExecutionResult<LocalVocab> {
        Ok(self.materialized_pair()?.local_vocab.writable_copy())
    }

    /// Turns the result into a materialized result.
    ///
    /// Materialized results are returned unchanged. For lazy results, all batches are consumed
    /// in order and their vocabularies are merged. `cancellation` is checked between batches.
    pub fn materialize(
        self,
        cancellation: &CancellationHandle,
        detail: &str,
    ) -> ExecutionResult<Self> {
        if self.is_materialized() {
            return Ok(self);
        }

        let mut table = IdTable::new(self.width);
        let mut local_vocab = LocalVocab::new();
        for batch in self.take_batches()? {
            let batch = batch?;
            table.append(batch.table)?;
            local_vocab.merge_with(&batch.local_vocab);
            cancellation.check(detail)?;
        }
        tracing::trace!(
            "Materialized lazy result of {detail} with {} rows",
            table.num_rows()
        );
        Ok(Self::new_materialized(table, local_vocab, self.sorted_by))
    }

    /// Like [Self::materialize] for a shared result. A materialized result is returned as the same
    /// shared instance.
    pub fn materialize_shared(
        result: Arc<Self>,
        cancellation: &CancellationHandle,
        detail: &str,
    ) -> ExecutionResult<Arc<Self>> {
        if result.is_materialized() {
            return Ok(result);
        }

        // Only the batches are taken from the shared instance.
        let lazy = Self {
            width: result.width,
            sorted_by: result.sorted_by.clone(),
            data: ResultData::Lazy(LazyBatches::new(result.take_batches()?)),
        };
        Ok(Arc::new(lazy.materialize(cancellation, detail)?))
    }

    /// Verifies that a materialized result is sorted on [Self::sorted_by]. Lazy results are not
    /// checked.
    pub fn check_sort_order(&self) -> ExecutionResult<()> {
        let Some(pair) = self.materialized() else {
            return Ok(());
        };
        if pair.table.num_columns() != self.width {
            return Err(ExecutionError::ContractViolation(format!(
                "Result has {} columns, but {} were declared",
                pair.table.num_columns(),
                self.width
            )));
        }
        if !pair.table.is_sorted_by(&self.sorted_by) {
            return Err(ExecutionError::ContractViolation(format!(
                "Result is not sorted on columns [{}]",
                self.sorted_by.iter().join(", ")
            )));
        }
        Ok(())
    }

    /// Registers hooks on a lazy result that collect the consumed batches as long as their total
    /// size stays within `max_size`. If the consumer reads all batches, `store` receives the
    /// collected batches as a materialized result.
    ///
    /// Does nothing for materialized results.
    pub fn cache_during_consumption(
        &self,
        max_size: usize,
        store: impl FnOnce(QueryResult) + Send + 'static,
    ) -> ExecutionResult<()> {
        let Some(batches) = self.lazy_batches() else {
            return Ok(());
        };

        let aggregate = Arc::new(Mutex::new(Some(IdTableVocabPair::new(
            IdTable::new(self.width),
            LocalVocab::new(),
        ))));
        {
            let aggregate = Arc::clone(&aggregate);
            batches.add_on_new_batch(move |batch, _| {
                let mut aggregate = aggregate.lock().unwrap_or_else(PoisonError::into_inner);
                let fits = aggregate.as_ref().is_some_and(|pair| {
                    pair.table.num_cells() + batch.table.num_cells() <= max_size
                });
                if !fits {
                    *aggregate = None;
                    return;
                }
                if let Some(pair) = aggregate.as_mut() {
                    if pair.table.append(batch.table.clone()).is_err() {
                        *aggregate = None;
                        return;
                    }
                    pair.local_vocab.merge_with(&batch.local_vocab);
                }
            })?;
        }

        let sorted_by = self.sorted_by.clone();
        batches.add_on_finish(move |outcome| {
            if outcome != ConsumptionOutcome::Finished {
                return;
            }
            let aggregate = aggregate
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(pair) = aggregate {
                store(QueryResult::new_materialized(
                    pair.table,
                    pair.local_vocab,
                    sorted_by,
                ));
            }
        })
    }

    fn materialized(&self) -> Option<&IdTableVocabPair> {
        match &self.data {
            ResultData::Materialized(pair) => Some(pair),
            ResultData::Lazy(_) => None,
        }
    }
}

impl CacheSize for QueryResult {
    /// Materialized results are measured in cells. Lazy results are never cached and report the
    /// maximum size.
    fn cache_size(&self) -> usize {
        self.materialized()
            .map_or(usize::MAX, |pair| pair.table.num_cells())
    }
}

/// Combines the local vocabularies of several materialized results into a new vocabulary with a
/// fresh primary word set.
pub fn merged_local_vocab(results: &[&QueryResult]) -> ExecutionResult<LocalVocab> {
    let vocabs = results
        .iter()
        .map(|result| result.materialized_pair().map(|pair| &pair.local_vocab))
        .collect::<ExecutionResult<Vec<_>>>()?;
    Ok(LocalVocab::merge(vocabs))
}
