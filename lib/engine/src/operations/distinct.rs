use crate::context::ExecutionContext;
use crate::operation::{Operation, OperationCore, OperationExt};
use crate::result::{IdTableVocabPair, QueryResult};
use sparql_exec_common::{ExecutionResult, SharedCancellationHandle};
use sparql_exec_model::{ColumnIndex, Id, IdTable};
use std::sync::Arc;

/// Removes duplicate rows from its child.
///
/// Duplicates are removed by comparing consecutive rows, which requires the input to be sorted on
/// all columns. If the child does not guarantee this order, its result is sorted first. Sorted
/// lazy inputs are processed batch by batch.
#[derive(Debug)]
pub struct Distinct {
    core: OperationCore,
    child: Arc<dyn Operation>,
}

impl Distinct {
    /// Creates a new [Distinct].
    pub fn new(context: ExecutionContext, child: Arc<dyn Operation>) -> Self {
        Self {
            core: OperationCore::new(context),
            child,
        }
    }

    /// Returns `true` if equal rows of the child are guaranteed to be adjacent.
    fn child_sorted_on_all_columns(&self) -> bool {
        let sorted_on = self.child.result_sorted_on();
        (0..self.child.result_width()).all(|column| sorted_on.contains(&column))
    }
}

impl Operation for Distinct {
    fn descriptor(&self) -> String {
        "Distinct".to_owned()
    }

    fn cache_key(&self) -> String {
        format!("DISTINCT\n{}", self.child.cache_key())
    }

    fn result_width(&self) -> usize {
        self.child.result_width()
    }

    fn result_sorted_on(&self) -> Vec<ColumnIndex> {
        if self.child_sorted_on_all_columns() {
            self.child.result_sorted_on()
        } else {
            (0..self.child.result_width()).collect()
        }
    }

    fn size_estimate(&self) -> usize {
        self.child.size_estimate()
    }

    fn cost_estimate(&self) -> usize {
        self.child
            .cost_estimate()
            .saturating_add(self.child.size_estimate())
    }

    fn multiplicity(&self, _column: ColumnIndex) -> f32 {
        1.0
    }

    fn known_empty_result(&self) -> bool {
        self.child.known_empty_result()
    }

    fn children(&self) -> Vec<Arc<dyn Operation>> {
        vec![Arc::clone(&self.child)]
    }

    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn compute_result(&self, request_laziness: bool) -> ExecutionResult<QueryResult> {
        let can_stream = request_laziness && self.child_sorted_on_all_columns();
        let child = self.child.get_result(can_stream)?;
        let sorted_by = self.result_sorted_on();

        if !child.is_materialized() {
            tracing::debug!("Computing distinct rows of lazy input");
            let cancellation = Arc::clone(self.core.context().cancellation());
            let mut deduplicator = BatchDeduplicator::new(cancellation);
            let batches = child
                .take_batches()?
                .filter_map(move |batch| deduplicator.next_batch(batch));
            return Ok(QueryResult::new_lazy(
                self.result_width(),
                batches,
                sorted_by,
            ));
        }

        let input = child.materialized_pair()?;
        let mut table = input.table.clone();
        table.sort_by_columns(&sorted_by);
        let num_input_rows = table.num_rows();
        table.dedup_consecutive();
        tracing::debug!(
            "Distinct kept {} of {num_input_rows} rows",
            table.num_rows()
        );
        Ok(QueryResult::new_materialized(
            table,
            input.local_vocab.clone(),
            sorted_by,
        ))
    }
}

/// Removes duplicates from a sorted sequence of batches. The last row of the previous batch is
/// carried over, as duplicates may span batch boundaries.
struct BatchDeduplicator {
    cancellation: SharedCancellationHandle,
    last_row: Option<Vec<Id>>,
}

impl BatchDeduplicator {
    fn new(cancellation: SharedCancellationHandle) -> Self {
        Self {
            cancellation,
            last_row: None,
        }
    }

    /// Returns the deduplicated batch, or `None` if no new row remains.
    fn next_batch(
        &mut self,
        batch: ExecutionResult<IdTableVocabPair>,
    ) -> Option<ExecutionResult<IdTableVocabPair>> {
        self.deduplicate(batch).transpose()
    }

    fn deduplicate(
        &mut self,
        batch: ExecutionResult<IdTableVocabPair>,
    ) -> ExecutionResult<Option<IdTableVocabPair>> {
        let batch = batch?;
        self.cancellation.check("Distinct")?;

        let mut table = batch.table;
        table.dedup_consecutive();
        let starts_with_last =
            !table.is_empty() && self.last_row.as_deref() == Some(table.row(0));
        let skip = usize::from(starts_with_last);
        if table.num_rows() == skip {
            return Ok(None);
        }

        self.last_row = Some(table.row(table.num_rows() - 1).to_vec());
        let table = if skip == 0 {
            table
        } else {
            IdTable::from_rows(table.num_columns(), table.rows().skip(skip))?
        };
        Ok(Some(IdTableVocabPair::new(table, batch.local_vocab)))
    }
}
