use crate::join::{ColumnSubsetView, NoUndef, UndefRangeFinder};
use sparql_exec_common::ExecutionResult;
use sparql_exec_model::Id;
use std::cmp::Ordering;

/// The callback for left rows without a compatible right row.
type NoMatchAction<'action> = &'action mut dyn FnMut(usize) -> ExecutionResult<()>;

/// A sort-merge join over two inputs that are sorted on their join columns.
///
/// The join implements the compatibility semantics of SPARQL: two rows match if each pair of
/// join columns is equal or at least one of the two values is UNDEF. Rows that are equal on all
/// join columns are found by advancing two cursors. Rows that only match because of UNDEF values
/// are found by the [UndefRangeFinder]s of the two sides. Every matching pair is reported exactly
/// once. Pairs that are not equal are reported while processing the row that sorts later.
///
/// Rows that are equal on all join columns are reported left-major, in input order.
#[derive(Debug)]
pub struct ZipperJoin<'view, 'table, LF, RF> {
    left: &'view ColumnSubsetView<'table>,
    right: &'view ColumnSubsetView<'table>,
    left_undef: LF,
    right_undef: RF,
}

impl<'view, 'table> ZipperJoin<'view, 'table, NoUndef, NoUndef> {
    /// Creates a new [ZipperJoin] for inputs without UNDEF in their join columns. All UNDEF
    /// handling is compiled out.
    pub fn without_undef(
        left: &'view ColumnSubsetView<'table>,
        right: &'view ColumnSubsetView<'table>,
    ) -> Self {
        Self::new(left, right, NoUndef, NoUndef)
    }
}

impl<'view, 'table, LF, RF> ZipperJoin<'view, 'table, LF, RF>
where
    LF: UndefRangeFinder,
    RF: UndefRangeFinder,
{
    /// Creates a new [ZipperJoin]. `left_undef` searches the left input for rows with UNDEF,
    /// `right_undef` the right one.
    pub fn new(
        left: &'view ColumnSubsetView<'table>,
        right: &'view ColumnSubsetView<'table>,
        left_undef: LF,
        right_undef: RF,
    ) -> Self {
        Self {
            left,
            right,
            left_undef,
            right_undef,
        }
    }

    /// Runs the join and calls `on_match` with the indices of every compatible row pair.
    ///
    /// Returns the number of rows that were reported out of the order of the join columns.
    /// [usize::MAX] means that rows with UNDEF values on both sides were merged, such that the
    /// order of the output is unknown.
    pub fn run(
        &self,
        on_match: impl FnMut(usize, usize) -> ExecutionResult<()>,
        check_cancellation: impl FnMut() -> ExecutionResult<()>,
    ) -> ExecutionResult<usize> {
        self.run_impl(on_match, None, check_cancellation)
    }

    /// Like [Self::run], but additionally calls `on_no_match` for every left row that is not
    /// compatible with any right row.
    ///
    /// Left rows with UNDEF may still be matched by later right rows. If they are not, they are
    /// reported after all other rows and count as out of order.
    pub fn run_with_unmatched(
        &self,
        on_match: impl FnMut(usize, usize) -> ExecutionResult<()>,
        mut on_no_match: impl FnMut(usize) -> ExecutionResult<()>,
        check_cancellation: impl FnMut() -> ExecutionResult<()>,
    ) -> ExecutionResult<usize> {
        let on_no_match: NoMatchAction<'_> = &mut on_no_match;
        self.run_impl(on_match, Some(on_no_match), check_cancellation)
    }

    fn run_impl<M: FnMut(usize, usize) -> ExecutionResult<()>>(
        &self,
        on_match: M,
        on_no_match: Option<NoMatchAction<'_>>,
        mut check_cancellation: impl FnMut() -> ExecutionResult<()>,
    ) -> ExecutionResult<usize> {
        #[cfg(feature = "expensive-checks")]
        {
            self.left.check_sorted("left")?;
            self.right.check_sorted("right")?;
        }

        let covered = if on_no_match.is_some() {
            vec![false; self.left.len()]
        } else {
            Vec::new()
        };
        let mut state = ZipperState {
            join: self,
            on_match,
            on_no_match,
            covered,
            scratch: Vec::new(),
            out_of_order: false,
        };

        let (left, right) = (self.left, self.right);
        let (left_len, right_len) = (left.len(), right.len());
        let (mut i1, mut i2) = (0, 0);

        'merge: while i1 < left_len && i2 < right_len {
            check_cancellation()?;

            while left.compare(i1, right, i2) == Ordering::Less {
                state.pass_left_row(i1, i2)?;
                i1 += 1;
                if i1 >= left_len {
                    break 'merge;
                }
            }
            while right.compare(i2, left, i1) == Ordering::Less {
                state.merge_with_undef_in_left(i2, i1)?;
                i2 += 1;
                if i2 >= right_len {
                    break 'merge;
                }
            }

            let end_same1 = (i1..left_len)
                .find(|&row| left.compare(row, right, i2) != Ordering::Equal)
                .unwrap_or(left_len);
            let end_same2 = (i2..right_len)
                .find(|&row| right.compare(row, left, i1) != Ordering::Equal)
                .unwrap_or(right_len);

            for row in i1..end_same1 {
                state.merge_with_undef_in_right(row, i2)?;
            }
            for row in i2..end_same2 {
                state.merge_with_undef_in_left(row, i1)?;
            }
            for row1 in i1..end_same1 {
                state.cover(row1);
                for row2 in i2..end_same2 {
                    (state.on_match)(row1, row2)?;
                }
            }
            i1 = end_same1;
            i2 = end_same2;
        }

        if !LF::IS_NOOP {
            for row in i2..right_len {
                check_cancellation()?;
                state.merge_with_undef_in_left(row, left_len)?;
            }
        }

        if !RF::IS_NOOP || state.on_no_match.is_some() {
            for row in i1..left_len {
                check_cancellation()?;
                let found = state.merge_with_undef_in_right(row, right_len)?;
                state.cover(row);
                if !found {
                    state.report_no_match(row)?;
                }
            }
        }

        let num_out_of_order = state.report_uncovered()?;
        Ok(if state.out_of_order {
            usize::MAX
        } else {
            num_out_of_order
        })
    }
}

/// The mutable state of a single run of a [ZipperJoin].
struct ZipperState<'join, 'view, 'table, 'action, LF, RF, M> {
    join: &'join ZipperJoin<'view, 'table, LF, RF>,
    on_match: M,
    on_no_match: Option<NoMatchAction<'action>>,
    /// Left rows that were matched or reported as unmatched. Only tracked if unmatched rows are
    /// reported.
    covered: Vec<bool>,
    scratch: Vec<usize>,
    out_of_order: bool,
}

impl<LF, RF, M> ZipperState<'_, '_, '_, '_, LF, RF, M>
where
    LF: UndefRangeFinder,
    RF: UndefRangeFinder,
    M: FnMut(usize, usize) -> ExecutionResult<()>,
{
    /// Processes a left row that is smaller than the current right row.
    fn pass_left_row(&mut self, left_row: usize, right_end: usize) -> ExecutionResult<()> {
        let found = self.merge_with_undef_in_right(left_row, right_end)?;
        if found {
            self.cover(left_row);
        } else if !contains_undef(self.join.left.row(left_row)) {
            // Rows without UNDEF can never be matched by a later right row.
            self.cover(left_row);
            self.report_no_match(left_row)?;
        }
        Ok(())
    }

    /// Joins the right row with all smaller, compatible left rows in `[0, left_end)`.
    fn merge_with_undef_in_left(
        &mut self,
        right_row: usize,
        left_end: usize,
    ) -> ExecutionResult<bool> {
        if LF::IS_NOOP {
            return Ok(false);
        }
        let (left, right) = (self.join.left, self.join.right);
        let key = right.row(right_row);

        let mut candidates = std::mem::take(&mut self.scratch);
        candidates.clear();
        self.join
            .left_undef
            .find_smaller_undef_ranges(left, key, left_end, &mut candidates);

        let mut found = false;
        for &left_row in &candidates {
            let other = left.row(left_row);
            if other >= key {
                continue;
            }
            found = true;
            self.out_of_order |= fills_undef(key, other);
            (self.on_match)(left_row, right_row)?;
            self.cover(left_row);
        }
        self.scratch = candidates;
        Ok(found)
    }

    /// Joins the left row with all smaller, compatible right rows in `[0, right_end)`.
    fn merge_with_undef_in_right(
        &mut self,
        left_row: usize,
        right_end: usize,
    ) -> ExecutionResult<bool> {
        if RF::IS_NOOP {
            return Ok(false);
        }
        let (left, right) = (self.join.left, self.join.right);
        let key = left.row(left_row);

        let mut candidates = std::mem::take(&mut self.scratch);
        candidates.clear();
        self.join
            .right_undef
            .find_smaller_undef_ranges(right, key, right_end, &mut candidates);

        let mut found = false;
        for &right_row in &candidates {
            let other = right.row(right_row);
            if other >= key {
                continue;
            }
            found = true;
            self.out_of_order |= fills_undef(key, other);
            (self.on_match)(left_row, right_row)?;
        }
        self.scratch = candidates;
        Ok(found)
    }

    fn cover(&mut self, left_row: usize) {
        if let Some(covered) = self.covered.get_mut(left_row) {
            *covered = true;
        }
    }

    fn report_no_match(&mut self, left_row: usize) -> ExecutionResult<()> {
        match self.on_no_match.as_mut() {
            Some(on_no_match) => on_no_match(left_row),
            None => Ok(()),
        }
    }

    /// Reports all left rows that were never covered as unmatched. Returns their number.
    fn report_uncovered(&mut self) -> ExecutionResult<usize> {
        let Some(on_no_match) = self.on_no_match.as_mut() else {
            return Ok(0);
        };
        let mut count = 0;
        for (row, covered) in self.covered.iter().enumerate() {
            if !covered {
                on_no_match(row)?;
                count += 1;
            }
        }
        Ok(count)
    }
}

fn contains_undef(row: &[Id]) -> bool {
    row.iter().any(|id| id.is_undefined())
}

/// Returns `true` if `other` has a defined value in a column where `row` is UNDEF. Merging such
/// rows yields a row that is not adjacent to `row` in the sort order.
fn fills_undef(row: &[Id], other: &[Id]) -> bool {
    row.iter()
        .zip(other)
        .any(|(value, other)| value.is_undefined() && !other.is_undefined())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::join::{GeneralUndefRanges, LeadingUndefRange};
    use sparql_exec_common::{CancellationHandle, CancellationState, ExecutionError};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use sparql_exec_model::IdTable;

    const U: Id = Id::Undefined;

    fn int(value: i64) -> Id {
        Id::Int(value)
    }

    fn table(rows: &[&[Id]]) -> IdTable {
        IdTable::from_rows(rows[0].len(), rows.iter().copied()).unwrap()
    }

    fn no_cancellation() -> ExecutionResult<()> {
        Ok(())
    }

    fn run_general(
        left: &IdTable,
        right: &IdTable,
        columns: &[usize],
    ) -> (Vec<(usize, usize)>, Vec<usize>, usize) {
        let left = ColumnSubsetView::new(left, columns);
        let right = ColumnSubsetView::new(right, columns);
        let join = ZipperJoin::new(&left, &right, GeneralUndefRanges, GeneralUndefRanges);

        let mut matches = Vec::new();
        let mut unmatched = Vec::new();
        let out_of_order = join
            .run_with_unmatched(
                |l, r| {
                    matches.push((l, r));
                    Ok(())
                },
                |l| {
                    unmatched.push(l);
                    Ok(())
                },
                no_cancellation,
            )
            .unwrap();
        matches.sort_unstable();
        (matches, unmatched, out_of_order)
    }

    #[test]
    fn equal_groups_are_cross_joined() {
        let left = table(&[&[int(1)], &[int(2)], &[int(2)], &[int(4)]]);
        let right = table(&[&[int(2)], &[int(2)], &[int(3)], &[int(4)]]);
        let left_view = ColumnSubsetView::new(&left, &[0]);
        let right_view = ColumnSubsetView::new(&right, &[0]);

        let mut matches = Vec::new();
        let out_of_order = ZipperJoin::without_undef(&left_view, &right_view)
            .run(
                |l, r| {
                    matches.push((l, r));
                    Ok(())
                },
                no_cancellation,
            )
            .unwrap();

        assert_eq!(out_of_order, 0);
        assert_eq!(matches, vec![(1, 0), (1, 1), (2, 0), (2, 1), (3, 3)]);
    }

    #[test]
    fn undef_matches_every_value() {
        // L = [(UNDEF, "b"), (1, "a")], R = [(1, "x"), (2, "y")]
        let left = table(&[&[U, int(20)], &[int(1), int(10)]]);
        let right = table(&[&[int(1), int(30)], &[int(2), int(40)]]);
        let left_view = ColumnSubsetView::new(&left, &[0]);
        let right_view = ColumnSubsetView::new(&right, &[0]);
        let join = ZipperJoin::new(
            &left_view,
            &right_view,
            LeadingUndefRange::new(&left_view),
            NoUndef,
        );

        let mut matches = Vec::new();
        let out_of_order = join
            .run(
                |l, r| {
                    matches.push((l, r));
                    Ok(())
                },
                no_cancellation,
            )
            .unwrap();
        matches.sort_unstable();

        assert_eq!(out_of_order, 0);
        assert_eq!(matches, vec![(0, 0), (0, 1), (1, 0)]);
    }

    #[test]
    fn undef_on_right_matches_defined_left_rows() {
        let left = table(&[&[int(1)], &[int(2)]]);
        let right = table(&[&[U], &[int(2)]]);
        let (matches, unmatched, _) = run_general(&left, &right, &[0]);
        assert_eq!(matches, vec![(0, 0), (1, 0), (1, 1)]);
        assert!(unmatched.is_empty());
    }

    #[test]
    fn undef_on_both_sides_matches_once() {
        let left = table(&[&[U], &[int(1)]]);
        let right = table(&[&[U], &[int(1)]]);
        let (matches, _, _) = run_general(&left, &right, &[0]);
        assert_eq!(matches, vec![(0, 0), (0, 1), (1, 0), (1, 1)]);
    }

    #[test]
    fn unmatched_left_rows_are_reported_in_order() {
        let left = table(&[&[int(1)], &[int(2)], &[int(3)]]);
        let right = table(&[&[int(2)]]);
        let (matches, unmatched, out_of_order) = run_general(&left, &right, &[0]);
        assert_eq!(matches, vec![(1, 0)]);
        assert_eq!(unmatched, vec![0, 2]);
        assert_eq!(out_of_order, 0);
    }

    #[test]
    fn unmatched_left_rows_with_undef_are_reported_last() {
        let left = table(&[&[U, int(5)], &[int(1), int(1)]]);
        let right = table(&[&[int(2), int(2)]]);
        let (matches, unmatched, out_of_order) = run_general(&left, &right, &[0, 1]);
        assert!(matches.is_empty());
        assert_eq!(unmatched, vec![1, 0]);
        assert_eq!(out_of_order, 1);
    }

    #[test]
    fn merging_complementary_undef_marks_order_unknown() {
        // (5, UNDEF) and (UNDEF, 3) are compatible and produce (5, 3).
        let left = table(&[&[int(5), U]]);
        let right = table(&[&[U, int(3)]]);
        let (matches, unmatched, out_of_order) = run_general(&left, &right, &[0, 1]);
        assert_eq!(matches, vec![(0, 0)]);
        assert!(unmatched.is_empty());
        assert_eq!(out_of_order, usize::MAX);
    }

    #[test]
    fn matches_brute_force_with_undef() {
        let left = table(&[
            &[U, U],
            &[U, int(2)],
            &[int(1), U],
            &[int(1), int(1)],
            &[int(2), int(2)],
            &[int(3), U],
        ]);
        let right = table(&[
            &[U, int(1)],
            &[int(1), int(1)],
            &[int(1), int(2)],
            &[int(2), U],
            &[int(4), int(4)],
        ]);
        let (matches, _, _) = run_general(&left, &right, &[0, 1]);

        let left_view = ColumnSubsetView::new(&left, &[0, 1]);
        let right_view = ColumnSubsetView::new(&right, &[0, 1]);
        let mut expected = Vec::new();
        for l in 0..left.num_rows() {
            for r in 0..right.num_rows() {
                if crate::join::is_compatible(left_view.row(l), right_view.row(r)) {
                    expected.push((l, r));
                }
            }
        }
        assert_eq!(matches, expected);
    }

    #[test]
    fn cancellation_stops_join() {
        let rows = (0..100).map(|value| vec![int(value)]).collect::<Vec<_>>();
        let left = IdTable::from_rows(1, &rows).unwrap();
        let right = IdTable::from_rows(1, &rows).unwrap();
        let left_view = ColumnSubsetView::new(&left, &[0]);
        let right_view = ColumnSubsetView::new(&right, &[0]);

        let handle = CancellationHandle::new();
        let mut num_matches = 0;
        let result = ZipperJoin::without_undef(&left_view, &right_view).run(
            |_, _| {
                num_matches += 1;
                if num_matches == 10 {
                    handle.cancel(CancellationState::Manual);
                }
                Ok(())
            },
            || Ok(handle.check("join")?),
        );

        assert!(matches!(result, Err(ExecutionError::QueryCancelled(_))));
        assert_eq!(num_matches, 10);
    }

    fn random_sorted_table(rng: &mut StdRng, num_rows: usize) -> IdTable {
        let mut rows = (0..num_rows)
            .map(|_| [int(rng.random_range(0..20)), int(rng.random_range(0..3))])
            .collect::<Vec<_>>();
        rows.sort();
        IdTable::from_rows(2, rows).unwrap()
    }

    fn collect_matches<LF: UndefRangeFinder, RF: UndefRangeFinder>(
        join: &ZipperJoin<'_, '_, LF, RF>,
    ) -> Vec<(usize, usize)> {
        let mut matches = Vec::new();
        join.run(
            |l, r| {
                matches.push((l, r));
                Ok(())
            },
            no_cancellation,
        )
        .unwrap();
        matches
    }

    #[test]
    fn fast_path_matches_general_path_without_undef() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let num_left = rng.random_range(0..60);
            let num_right = rng.random_range(0..60);
            let left = random_sorted_table(&mut rng, num_left);
            let right = random_sorted_table(&mut rng, num_right);
            for columns in [&[0][..], &[0, 1][..]] {
                let left_view = ColumnSubsetView::new(&left, columns);
                let right_view = ColumnSubsetView::new(&right, columns);

                let fast = collect_matches(&ZipperJoin::without_undef(&left_view, &right_view));
                let general = collect_matches(&ZipperJoin::new(
                    &left_view,
                    &right_view,
                    GeneralUndefRanges,
                    GeneralUndefRanges,
                ));
                assert_eq!(fast, general);

                let mut galloping = Vec::new();
                crate::join::galloping_join(
                    &left_view,
                    &right_view,
                    |l, r| {
                        galloping.push((l, r));
                        Ok(())
                    },
                    no_cancellation,
                )
                .unwrap();
                assert_eq!(fast, galloping);
            }
        }
    }
}
