use crate::context::ExecutionContext;
use crate::operation::{Operation, OperationCore, OperationExt};
use crate::operations::join::{join_cache_key, zipper_join};
use crate::operations::{format_columns, sorted_on};
use crate::result::QueryResult;
use sparql_exec_common::ExecutionResult;
use sparql_exec_model::{ColumnIndex, Id, IdTable, LocalVocab};
use sparql_exec_physical::join::{ColumnSubsetView, JoinColumnMapping};
use std::sync::Arc;

/// Appends a boolean column to the left child that is `true` iff the left row has a compatible
/// row in the right child (SPARQL `EXISTS`).
#[derive(Debug)]
pub struct ExistsJoin {
    core: OperationCore,
    left: Arc<dyn Operation>,
    right: Arc<dyn Operation>,
    mapping: JoinColumnMapping,
}

impl ExistsJoin {
    /// Creates a new [ExistsJoin]. Each entry of `join_columns` is a pair of a left and a right
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

impl Operation for ExistsJoin {
    fn descriptor(&self) -> String {
        format!(
            "ExistsJoin on {} |X| {}",
            format_columns(&self.mapping.jcs_left()),
            format_columns(&self.mapping.jcs_right())
        )
    }

    fn cache_key(&self) -> String {
        join_cache_key("EXISTS_JOIN", &self.left, &self.right, &self.mapping)
    }

    fn result_width(&self) -> usize {
        self.mapping.left_width() + 1
    }

    fn result_sorted_on(&self) -> Vec<ColumnIndex> {
        self.mapping.jcs_left()
    }

    fn size_estimate(&self) -> usize {
        self.left.size_estimate()
    }

    fn cost_estimate(&self) -> usize {
        self.left
            .cost_estimate()
            .saturating_add(self.right.cost_estimate())
            .saturating_add(self.left.size_estimate())
            .saturating_add(self.right.size_estimate())
    }

    fn multiplicity(&self, column: ColumnIndex) -> f32 {
        if column < self.mapping.left_width() {
            self.left.multiplicity(column)
        } else {
            1.0
        }
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
            return Ok(QueryResult::new_materialized(
                IdTable::new(self.result_width()),
                LocalVocab::new(),
                self.result_sorted_on(),
            ));
        }

        let left_result = self.left.get_result(false)?;
        let left = left_result.materialized_pair()?;
        let jcs_left = self.mapping.jcs_left();
        let mut table = sorted_on(&left.table, &jcs_left).into_owned();
        // The local vocabulary of the right child is not needed, as no right values are copied.
        let local_vocab = left.local_vocab.clone();

        let right_known_empty = self.right.known_empty_result();
        if right_known_empty || table.is_empty() {
            table.push_column(Id::Bool(false));
            return Ok(QueryResult::new_materialized(
                table,
                local_vocab,
                self.result_sorted_on(),
            ));
        }

        let right_result = self.right.get_result(false)?;
        let right = right_result.materialized_pair()?;
        let right_table = sorted_on(&right.table, &self.mapping.jcs_right());

        let context = self.core.context();
        let mut exists = vec![true; table.num_rows()];
        {
            let left_view = ColumnSubsetView::new(&table, &jcs_left);
            let right_view = ColumnSubsetView::new(&right_table, &self.mapping.jcs_right());
            let mut check_cancellation =
                || -> ExecutionResult<()> { Ok(context.cancellation().check(&descriptor)?) };
            zipper_join(
                &left_view,
                &right_view,
                &mut |_, _| Ok(()),
                Some(&mut |left| {
                    exists[left] = false;
                    Ok(())
                }),
                &mut check_cancellation,
            )?;
        }

        tracing::debug!(
            "{descriptor} found a match for {} of {} rows",
            exists.iter().filter(|exists| **exists).count(),
            exists.len()
        );
        let exists_column = table.num_columns();
        table.push_column(Id::Bool(false));
        for (row, exists) in exists.into_iter().enumerate() {
            table.set(row, exists_column, Id::Bool(exists));
        }
        Ok(QueryResult::new_materialized(
            table,
            local_vocab,
            self.result_sorted_on(),
        ))
    }
}
