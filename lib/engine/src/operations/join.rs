use crate::context::ExecutionContext;
use crate::operation::{Operation, OperationCore, OperationExt};
use crate::operations::{format_columns, scale_estimate, sorted_on};
use crate::result::QueryResult;
use sparql_exec_common::ExecutionResult;
use sparql_exec_model::{ColumnIndex, IdTable, LocalVocab};
use sparql_exec_physical::join::{
    galloping_join, AddCombinedRow, ColumnSubsetView, GeneralUndefRanges, JoinColumnMapping,
    LeadingUndefRange, NoUndef, UndefRangeFinder, ZipperJoin,
};
use std::sync::Arc;

/// The inner join of two operations on one or more join columns.
///
/// The result contains all columns of the left child followed by the non-join columns of the
/// right child. It is sorted on the join columns of the left child.
#[derive(Debug)]
pub struct Join {
    core: OperationCore,
    left: Arc<dyn Operation>,
    right: Arc<dyn Operation>,
    mapping: JoinColumnMapping,
}

impl Join {
    /// Creates a new [Join]. Each entry of `join_columns` is a pair of a left and a right column.
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

    /// Returns the join columns.
    pub fn mapping(&self) -> &JoinColumnMapping {
        &self.mapping
    }

    fn empty_result(&self) -> QueryResult {
        QueryResult::new_materialized(
            IdTable::new(self.mapping.result_width()),
            LocalVocab::new(),
            self.result_sorted_on(),
        )
    }
}

impl Operation for Join {
    fn descriptor(&self) -> String {
        format!(
            "Join on {} |X| {}",
            format_columns(&self.mapping.jcs_left()),
            format_columns(&self.mapping.jcs_right())
        )
    }

    fn cache_key(&self) -> String {
        join_cache_key("JOIN", &self.left, &self.right, &self.mapping)
    }

    fn result_width(&self) -> usize {
        self.mapping.result_width()
    }

    fn result_sorted_on(&self) -> Vec<ColumnIndex> {
        self.mapping.jcs_left()
    }

    fn size_estimate(&self) -> usize {
        if self.known_empty_result() {
            return 0;
        }
        let [left_column, right_column] = self.mapping.join_columns()[0];
        let left = self.left.size_estimate();
        let right = self.right.size_estimate();
        // Each left row finds as many partners as a right join value occurs on average.
        let estimate = scale_estimate(left, self.right.multiplicity(right_column))
            .max(scale_estimate(right, self.left.multiplicity(left_column)));
        estimate.min(left.saturating_mul(right))
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
        let [left_column, right_column] = self.mapping.join_columns()[0];
        if column < self.mapping.left_width() {
            self.left.multiplicity(column) * self.right.multiplicity(right_column)
        } else {
            let right_non_join = self.mapping.right_non_join_columns();
            right_non_join
                .get(column - self.mapping.left_width())
                .map_or(1.0, |right| {
                    self.right.multiplicity(*right) * self.left.multiplicity(left_column)
                })
        }
    }

    fn known_empty_result(&self) -> bool {
        self.left.known_empty_result() || self.right.known_empty_result()
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
            tracing::debug!("{descriptor} has an input that is known to be empty");
            return Ok(self.empty_result());
        }

        let left_result = self.left.get_result(false)?;
        let left = left_result.materialized_pair()?;
        if left.table.is_empty() {
            return Ok(self.empty_result());
        }
        let right_result = self.right.get_result(false)?;
        let right = right_result.materialized_pair()?;
        if right.table.is_empty() {
            return Ok(self.empty_result());
        }

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
        let mut check_cancellation =
            || -> ExecutionResult<()> { Ok(context.cancellation().check(&descriptor)?) };

        let use_galloping = !left_view.contains_undef()
            && !right_view.contains_undef()
            && size_ratio(left_view.len(), right_view.len()) > context.config().gallop_threshold;
        let out_of_order = if use_galloping {
            tracing::debug!("Using galloping join for {descriptor}");
            if left_view.len() <= right_view.len() {
                galloping_join(
                    &left_view,
                    &right_view,
                    |left, right| adder.add_row(left, right),
                    &mut check_cancellation,
                )?;
            } else {
                galloping_join(
                    &right_view,
                    &left_view,
                    |right, left| adder.add_row(left, right),
                    &mut check_cancellation,
                )?;
            }
            0
        } else {
            zipper_join(
                &left_view,
                &right_view,
                &mut |left, right| adder.add_row(left, right),
                None,
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

fn size_ratio(lhs: usize, rhs: usize) -> usize {
    lhs.max(rhs) / lhs.min(rhs).max(1)
}

/// Renders the cache key of a join-like operation.
pub(super) fn join_cache_key(
    name: &str,
    left: &Arc<dyn Operation>,
    right: &Arc<dyn Operation>,
    mapping: &JoinColumnMapping,
) -> String {
    format!(
        "{name}\n{}\njoin-columns: {}\n|X|\n{}\njoin-columns: {}",
        left.cache_key(),
        format_columns(&mapping.jcs_left()),
        right.cache_key(),
        format_columns(&mapping.jcs_right())
    )
}

type OnMatch<'action> = &'action mut dyn FnMut(usize, usize) -> ExecutionResult<()>;
type OnNoMatch<'action> = &'action mut dyn FnMut(usize) -> ExecutionResult<()>;
type CheckCancellation<'action> = &'action mut dyn FnMut() -> ExecutionResult<()>;

/// Runs the zipper join with the cheapest UNDEF handling that is correct for the inputs.
///
/// Sides without UNDEF in their join columns use [NoUndef]. With a single join column, UNDEF
/// values can only form a prefix of the input, which [LeadingUndefRange] exploits. Otherwise,
/// [GeneralUndefRanges] is used. Returns the number of out-of-order rows reported by the join.
pub(super) fn zipper_join(
    left: &ColumnSubsetView<'_>,
    right: &ColumnSubsetView<'_>,
    on_match: OnMatch<'_>,
    on_no_match: Option<OnNoMatch<'_>>,
    check_cancellation: CheckCancellation<'_>,
) -> ExecutionResult<usize> {
    let single_column = left.num_columns() == 1;
    match (left.contains_undef(), right.contains_undef(), single_column) {
        (false, false, _) => run(
            ZipperJoin::without_undef(left, right),
            on_match,
            on_no_match,
            check_cancellation,
        ),
        (true, false, true) => run(
            ZipperJoin::new(left, right, LeadingUndefRange::new(left), NoUndef),
            on_match,
            on_no_match,
            check_cancellation,
        ),
        (false, true, true) => run(
            ZipperJoin::new(left, right, NoUndef, LeadingUndefRange::new(right)),
            on_match,
            on_no_match,
            check_cancellation,
        ),
        (true, true, true) => run(
            ZipperJoin::new(
                left,
                right,
                LeadingUndefRange::new(left),
                LeadingUndefRange::new(right),
            ),
            on_match,
            on_no_match,
            check_cancellation,
        ),
        (true, false, false) => run(
            ZipperJoin::new(left, right, GeneralUndefRanges, NoUndef),
            on_match,
            on_no_match,
            check_cancellation,
        ),
        (false, true, false) => run(
            ZipperJoin::new(left, right, NoUndef, GeneralUndefRanges),
            on_match,
            on_no_match,
            check_cancellation,
        ),
        (true, true, false) => run(
            ZipperJoin::new(left, right, GeneralUndefRanges, GeneralUndefRanges),
            on_match,
            on_no_match,
            check_cancellation,
        ),
    }
}

fn run<LF: UndefRangeFinder, RF: UndefRangeFinder>(
    join: ZipperJoin<'_, '_, LF, RF>,
    on_match: OnMatch<'_>,
    on_no_match: Option<OnNoMatch<'_>>,
    check_cancellation: CheckCancellation<'_>,
) -> ExecutionResult<usize> {
    match on_no_match {
        Some(on_no_match) => join.run_with_unmatched(on_match, on_no_match, check_cancellation),
        None => join.run(on_match, check_cancellation),
    }
}
