use crate::join::ColumnSubsetView;
use sparql_exec_model::Id;

/// Above this number of join columns, enumerating all UNDEF patterns of a row is more expensive
/// than scanning the candidate rows.
const MAX_COLUMNS_FOR_PATTERN_SEARCH: usize = 16;

/// Finds the rows of one join input that must be joined with a row of the other input because
/// they contain UNDEF.
///
/// For a join key `row` of the other input, an implementation pushes the indices of all rows in
/// `[0, end)` of `view` to `result` that
/// - sort strictly before `row`,
/// - are compatible with `row` (each column is equal or UNDEF on at least one side), and
/// - contain at least one UNDEF.
///
/// Implementations may push additional rows that sort before `row` and are compatible with it.
/// Callers filter these out.
pub trait UndefRangeFinder {
    /// `true` if the finder never finds anything. Join algorithms skip all calls to the finder in
    /// this case.
    const IS_NOOP: bool = false;

    /// Pushes the candidate rows for `row` to `result`. See [UndefRangeFinder] for details.
    fn find_smaller_undef_ranges(
        &self,
        view: &ColumnSubsetView<'_>,
        row: &[Id],
        end: usize,
        result: &mut Vec<usize>,
    );
}

/// The [UndefRangeFinder] for inputs that contain no UNDEF values in their join columns.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoUndef;

impl UndefRangeFinder for NoUndef {
    const IS_NOOP: bool = true;

    fn find_smaller_undef_ranges(
        &self,
        _view: &ColumnSubsetView<'_>,
        _row: &[Id],
        _end: usize,
        _result: &mut Vec<usize>,
    ) {
    }
}

/// The [UndefRangeFinder] for joins on a single column. All UNDEF values of a sorted column are
/// located at its start and are compatible with every value.
#[derive(Clone, Copy, Debug)]
pub struct LeadingUndefRange {
    num_undef: usize,
}

impl LeadingUndefRange {
    /// Creates a new [LeadingUndefRange] for the given single-column `view`.
    pub fn new(view: &ColumnSubsetView<'_>) -> Self {
        debug_assert_eq!(view.num_columns(), 1);
        Self {
            num_undef: view.num_leading_undef(),
        }
    }

    /// Returns the number of UNDEF rows.
    pub fn num_undef(&self) -> usize {
        self.num_undef
    }
}

impl UndefRangeFinder for LeadingUndefRange {
    fn find_smaller_undef_ranges(
        &self,
        _view: &ColumnSubsetView<'_>,
        row: &[Id],
        end: usize,
        result: &mut Vec<usize>,
    ) {
        if row[0].is_undefined() {
            return;
        }
        result.extend(0..self.num_undef.min(end));
    }
}

/// The [UndefRangeFinder] for an arbitrary number of join columns with UNDEF values in any of
/// them.
///
/// Depending on the UNDEF positions of the searched row, it uses
/// - `2^k - 1` binary searches for rows without UNDEF,
/// - range searches on the defined prefix for rows whose UNDEF values are all at the end, or
/// - a linear scan over all smaller rows otherwise.
#[derive(Clone, Copy, Debug, Default)]
pub struct GeneralUndefRanges;

impl UndefRangeFinder for GeneralUndefRanges {
    fn find_smaller_undef_ranges(
        &self,
        view: &ColumnSubsetView<'_>,
        row: &[Id],
        end: usize,
        result: &mut Vec<usize>,
    ) {
        let num_columns = row.len();
        let num_trailing_undef = row.iter().rev().take_while(|id| id.is_undefined()).count();
        let num_defined_prefix = num_columns - num_trailing_undef;
        let has_inner_undef = row[..num_defined_prefix]
            .iter()
            .any(|id| id.is_undefined());

        if has_inner_undef || num_defined_prefix > MAX_COLUMNS_FOR_PATTERN_SEARCH {
            find_by_scan(view, row, end, result);
        } else {
            find_by_patterns(view, row, num_defined_prefix, end, result);
        }
    }
}

/// Searches all rows with the same values as `row` on the first `prefix_len` columns, except that
/// some of these values are replaced by UNDEF. The pattern without any UNDEF is skipped, as those
/// rows do not sort before `row`.
fn find_by_patterns(
    view: &ColumnSubsetView<'_>,
    row: &[Id],
    prefix_len: usize,
    end: usize,
    result: &mut Vec<usize>,
) {
    // A row that is entirely UNDEF is the smallest possible row.
    if prefix_len == 0 {
        return;
    }

    let mut pattern = row[..prefix_len].to_vec();
    let num_patterns = 1_usize << prefix_len;
    for mask in 0..num_patterns - 1 {
        for (column, value) in pattern.iter_mut().enumerate() {
            let keep = (mask >> (prefix_len - column - 1)) & 1 == 1;
            *value = if keep {
                row[column].clone()
            } else {
                Id::Undefined
            };
        }
        let begin = view.partition_point(0, end, |other| other[..prefix_len] < pattern[..]);
        let range_end =
            view.partition_point(begin, end, |other| other[..prefix_len] <= pattern[..]);
        result.extend(begin..range_end);
    }
}

/// Scans all rows that sort before `row` and keeps the compatible ones.
fn find_by_scan(view: &ColumnSubsetView<'_>, row: &[Id], end: usize, result: &mut Vec<usize>) {
    let end = view.lower_bound(row, 0, end);
    result.extend((0..end).filter(|&candidate| is_compatible(view.row(candidate), row)));
}

/// Returns `true` if every column of the two rows is equal or UNDEF in at least one of them.
pub fn is_compatible(lhs: &[Id], rhs: &[Id]) -> bool {
    lhs.iter()
        .zip(rhs)
        .all(|(a, b)| a.is_undefined() || b.is_undefined() || a == b)
}
