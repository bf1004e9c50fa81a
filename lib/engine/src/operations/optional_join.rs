use crate::context::ExecutionContext;
use crate::operation::{Operation, OperationCore, OperationExt};
use crate::operations::join::{join_cache_key, zipper_join};
use crate::operations::{format_columns, scale_estimate, sorted_on};
use crate::result::QueryResult;
use sparql_exec_common::ExecutionResult;
use sparql_exec_model::{ColumnIndex, IdTable, LocalVocab};
use sparql_exec_physical::join::{AddCombinedRow, ColumnSubsetView, JoinColumnMapping};
use std::cell::RefCell;
use std::sync::Arc;

/// The left outer join of two operations (SPARQL `OPTIONAL`).
///
/// Every left row appears in the result. Left rows without a compatible right row have UNDEF in
/// the non-join columns of the right child.
#[derive(Debug)]
pub struct OptionalJoin {
    core: OperationCore,
    left: Arc<dyn Operation>,
    right: Arc<dyn Operation>,
    mapping: JoinColumnMapping,
}

impl OptionalJoin {
    /// Creates a new [OptionalJoin]. Each entry of `join_columns` is a pair of a left and a right
    /// column.
    pub fn try_new(
        context: ExecutionContext,
        left: Arc<dyn Operation>,
        right: Arc<dyn Operation>,
        join_columns: Vec<[ColumnIndex; 2]>,
    ) -> ExecutionResult<Self> {
        let mapping =
            JoinColumnMapping::try_new(join_columns, left.result_width(), right.result_width())?;
        Ok(Self {
            core: OperationCore::new(context),
            left,
            right,
            mapping,
        })
    }
}

impl Operation for OptionalJoin {
    fn descriptor(&self) -> String {
        format!(
            "OptionalJoin on {} |X| {}",
            format_columns(&self.mapping.jcs_left()),
            format_columns(&self.mapping.jcs_right())
        )
    }

    fn cache_key(&self) -> String {
        join_cache_key("OPTIONAL_JOIN", &self.left, &self.right, &self.mapping)
    }

    fn result_width(&self) -> usize {
        self.mapping.result_width()
    }

    fn result_sorted_on(&self) -> Vec<ColumnIndex> {
        self.mapping.jcs_left()
    }

    fn size_estimate(&self) -> usize {
        let [_, right_column] = self.mapping.join_columns()[0];
        let left = self.left.size_estimate();
        scale_estimate(left, self.right.multiplicity(right_column)).max(left)
    }

    fn cost_estimate(&self) -> usize {
        self.left
            .cost_estimate()
            .saturating_add(self.right.cost_estimate())
            .saturating_add(self.left.size_estimate())
            .saturating_add(self.right.size_estimate())
            .saturating_add(self.size_estimate())
    }

    fn multiplicity(&self, column: ColumnIndex) -> f32 {
        if column < self.mapping.left_width() {
            return self.left.multiplicity(column);
        }
        self.mapping
            .right_non_join_columns()
            .get(column - self.mapping.left_width())
            .map_or(1.0, |right| self.right.multiplicity(*right))
    }

    fn known_empty_result(&self) -> bool {
        self.left.known_empty_result()
    }

    fn children(&self) -> Vec<Arc<dyn Operation>> {
        vec![Arc::clone(&self.left), Arc::clone(&self.right)]
    }

    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn compute_result(&self, _request_laziness: bool) -> ExecutionResult<QueryResult> {
        let descriptor = self.descriptor();
        if self.known_empty_result() {
            tracing::debug!("Left input of {descriptor} is known to be empty");
            return Ok(QueryResult::new_materialized(
                IdTable::new(self.mapping.result_width()),
                LocalVocab::new(),
                self.result_sorted_on(),
            ));
        }

        let left_result = self.left.get_result(false)?;
        let left = left_result.materialized_pair()?;
        let right_result = self.right.get_result(false)?;
        let right = right_result.materialized_pair()?;

        let context = self.core.context();
        let jcs_left = self.mapping.jcs_left();
        let left_table = sorted_on(&left.table, &jcs_left);
        let right_table = sorted_on(&right.table, &self.mapping.jcs_right());
        let left_view = ColumnSubsetView::new(&left_table, &jcs_left);
        let right_view = ColumnSubsetView::new(&right_table, &self.mapping.jcs_right());
        tracing::debug!(
            "Computing {descriptor} with inputs of {} and {} rows",
            left_view.len(),
            right_view.len()
        );

        let mut adder = AddCombinedRow::new(
            (&*left_table, &left.local_vocab),
            (&*right_table, &right.local_vocab),
            &self.mapping,
            context.cancellation(),
            &descriptor,
            context.config().lazy_chunk_size,
        );
        let out_of_order = if right_view.is_empty() {
            for row in 0..left_view.len() {
                adder.add_optional_row(row)?;
            }
            0
        } else {
            // Both callbacks write to the adder. The join calls them one at a time.
            let adder = RefCell::new(&mut adder);
            let mut check_cancellation =
                || -> ExecutionResult<()> { Ok(context.cancellation().check(&descriptor)?) };
            zipper_join(
                &left_view,
                &right_view,
                &mut |left, right| adder.borrow_mut().add_row(left, right),
                Some(&mut |left| adder.borrow_mut().add_optional_row(left)),
                &mut check_cancellation,
            )?
        };

        let (mut table, local_vocab) = adder.finish();
        if out_of_order > 0 {
            tracing::debug!("Re-sorting result of {descriptor}");
            table.sort_by_columns(&jcs_left);
        }
        tracing::debug!("{descriptor} produced {} rows", table.num_rows());
        Ok(QueryResult::new_materialized(
            table,
            local_vocab,
            self.result_sorted_on(),
        ))
    }
}
