use itertools::Itertools;
use sparql_exec_common::{ExecutionError, ExecutionResult};
use sparql_exec_model::{ColumnIndex, Id, IdTable};
use std::cmp::Ordering;

/// A view on the join columns of an [IdTable].
///
/// The view stores the values of the join columns of every row contiguously, such that the join
/// key of a row can be accessed as a slice and compared lexicographically. The order of the
/// columns in the view is the order of the join-column pairs. Thus, the first column is the
/// primary comparison key.
#[derive(Debug, Clone)]
pub struct ColumnSubsetView<'table> {
    table: &'table IdTable,
    columns: Vec<ColumnIndex>,
    keys: Vec<Id>,
}

impl<'table> ColumnSubsetView<'table> {
    /// Creates a new [ColumnSubsetView] over the given `columns` of `table`.
    pub fn new(table: &'table IdTable, columns: &[ColumnIndex]) -> Self {
        let mut keys = Vec::with_capacity(table.num_rows() * columns.len());
        for row in table.rows() {
            keys.extend(columns.iter().map(|&column| row[column].clone()));
        }
        Self {
            table,
            columns: columns.to_vec(),
            keys,
        }
    }

    /// Returns the underlying table.
    pub fn table(&self) -> &'table IdTable {
        self.table
    }

    /// Returns the columns of the underlying table that are part of this view.
    pub fn columns(&self) -> &[ColumnIndex] {
        &self.columns
    }

    /// Returns the number of join columns.
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Returns the number of rows.
    pub fn len(&self) -> usize {
        self.table.num_rows()
    }

    /// Returns `true` if the view has no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the join key of the row at `index`.
    pub fn row(&self, index: usize) -> &[Id] {
        let width = self.columns.len();
        &self.keys[index * width..(index + 1) * width]
    }

    /// Compares the join key of row `lhs` in this view with the join key of row `rhs` in `other`.
    pub fn compare(&self, lhs: usize, other: &ColumnSubsetView<'_>, rhs: usize) -> Ordering {
        self.row(lhs).cmp(other.row(rhs))
    }

    /// Returns the index of the first row whose join key is not smaller than `key`, searching
    /// only the rows in `[begin, end)`.
    pub fn lower_bound(&self, key: &[Id], begin: usize, end: usize) -> usize {
        self.partition_point(begin, end, |row| row < key)
    }

    /// Returns the index of the first row in `[begin, end)` for which `is_before` returns `false`.
    /// The rows must be partitioned by `is_before`.
    pub fn partition_point(
        &self,
        begin: usize,
        end: usize,
        mut is_before: impl FnMut(&[Id]) -> bool,
    ) -> usize {
        let (mut low, mut high) = (begin, end);
        while low < high {
            let mid = low + (high - low) / 2;
            if is_before(self.row(mid)) {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        low
    }

    /// Returns the number of rows at the start of the view whose primary join column is UNDEF.
    pub fn num_leading_undef(&self) -> usize {
        if self.columns.is_empty() {
            return 0;
        }
        self.partition_point(0, self.len(), |row| row[0].is_undefined())
    }

    /// Returns `true` if any join column of any row is UNDEF.
    pub fn contains_undef(&self) -> bool {
        self.keys.iter().any(|id| id.is_undefined())
    }

    /// Returns `true` if any row contains UNDEF in a join column other than the first one.
    pub fn contains_undef_beyond_first_column(&self) -> bool {
        let width = self.columns.len();
        width > 1
            && self
                .keys
                .chunks_exact(width)
                .any(|row| row[1..].iter().any(|id| id.is_undefined()))
    }

    /// Checks that the rows are sorted by their join keys.
    pub fn check_sorted(&self, side: &str) -> ExecutionResult<()> {
        match (1..self.len()).find(|&row| self.row(row - 1) > self.row(row)) {
            None => Ok(()),
            Some(row) => Err(ExecutionError::MalformedJoinInput(format!(
                "The {side} input is not sorted on its join columns [{}] (row {row})",
                self.columns.iter().join(", ")
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(rows: &[&[Id]]) -> IdTable {
        IdTable::from_rows(rows[0].len(), rows.iter().copied()).unwrap()
    }

    #[test]
    fn keys_follow_join_column_order() {
        let table = table(&[&[Id::Int(1), Id::Int(2), Id::Int(3)]]);
        let view = ColumnSubsetView::new(&table, &[2, 0]);
        assert_eq!(view.row(0), &[Id::Int(3), Id::Int(1)]);
    }

    #[test]
    fn counts_leading_undef() {
        let table = table(&[
            &[Id::Undefined, Id::Int(1)],
            &[Id::Undefined, Id::Int(2)],
            &[Id::Int(1), Id::Undefined],
        ]);
        let view = ColumnSubsetView::new(&table, &[0, 1]);
        assert_eq!(view.num_leading_undef(), 2);
        assert!(view.contains_undef_beyond_first_column());
        assert_eq!(view.lower_bound(&[Id::Int(1)], 0, 3), 2);
    }

    #[test]
    fn detects_unsorted_input() {
        let table = table(&[&[Id::Int(2)], &[Id::Int(1)]]);
        let view = ColumnSubsetView::new(&table, &[0]);
        assert!(matches!(
            view.check_sorted("left"),
            Err(ExecutionError::MalformedJoinInput(_))
        ));
    }
}
