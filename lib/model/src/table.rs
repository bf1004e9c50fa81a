use crate::{Id, WidthMismatchError};
use std::cmp::Ordering;

/// The index of a column in an [IdTable].
pub type ColumnIndex = usize;

/// A table of [Id]s with a fixed number of columns.
///
/// Rows are stored contiguously (row-major). All rows of a table have the same width. The table
/// keeps track of the number of rows explicitly, so tables without any column (e.g., the result
/// of a join between two tables that only share their columns after projection) are supported.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct IdTable {
    /// The width of every row.
    num_columns: usize,
    /// The number of rows.
    num_rows: usize,
    /// The cells in row-major order.
    data: Vec<Id>,
}

impl IdTable {
    /// Creates a new empty [IdTable] with `num_columns` columns.
    pub fn new(num_columns: usize) -> Self {
        Self {
            num_columns,
            num_rows: 0,
            data: Vec::new(),
        }
    }

    /// Creates a new empty [IdTable] that can hold `num_rows` rows without re-allocating.
    pub fn with_capacity(num_columns: usize, num_rows: usize) -> Self {
        Self {
            num_columns,
            num_rows: 0,
            data: Vec::with_capacity(num_columns * num_rows),
        }
    }

    /// Creates a new [IdTable] from the given `rows`.
    ///
    /// Returns an error if one of the rows does not have `num_columns` entries.
    pub fn from_rows<R: AsRef<[Id]>>(
        num_columns: usize,
        rows: impl IntoIterator<Item = R>,
    ) -> Result<Self, WidthMismatchError> {
        let mut table = Self::new(num_columns);
        for row in rows {
            table.push_row(row.as_ref())?;
        }
        Ok(table)
    }

    /// Returns the number of columns.
    pub fn num_columns(&self) -> usize {
        self.num_columns
    }

    /// Returns the number of rows.
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Returns the total number of cells. This is the unit in which result sizes are measured.
    pub fn num_cells(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    /// Appends a single row.
    pub fn push_row(&mut self, row: &[Id]) -> Result<(), WidthMismatchError> {
        if row.len() != self.num_columns {
            return Err(WidthMismatchError {
                expected: self.num_columns,
                actual: row.len(),
            });
        }
        self.data.extend_from_slice(row);
        self.num_rows += 1;
        Ok(())
    }

    /// Returns the row at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn row(&self, index: usize) -> &[Id] {
        assert!(index < self.num_rows, "Row index {index} out of bounds");
        let start = index * self.num_columns;
        &self.data[start..start + self.num_columns]
    }

    /// Returns the cell at (`row`, `column`).
    pub fn get(&self, row: usize, column: ColumnIndex) -> &Id {
        &self.data[row * self.num_columns + column]
    }

    /// Returns an iterator over all rows.
    pub fn rows(&self) -> impl Iterator<Item = &[Id]> + '_ {
        (0..self.num_rows).map(|index| self.row(index))
    }

    /// Returns an iterator over the values of a single column.
    pub fn column(&self, column: ColumnIndex) -> impl Iterator<Item = &Id> + '_ {
        (0..self.num_rows).map(move |row| self.get(row, column))
    }

    /// Appends all rows of `other` to this table.
    pub fn append(&mut self, other: IdTable) -> Result<(), WidthMismatchError> {
        if other.num_columns != self.num_columns {
            return Err(WidthMismatchError {
                expected: self.num_columns,
                actual: other.num_columns,
            });
        }
        if self.data.is_empty() && self.num_rows == 0 {
            *self = other;
            return Ok(());
        }
        self.data.extend(other.data);
        self.num_rows += other.num_rows;
        Ok(())
    }

    /// Adds a new column at the end of the table where every row has the value `fill`.
    pub fn push_column(&mut self, fill: Id) {
        let old_width = self.num_columns;
        let mut data = Vec::with_capacity(self.num_rows * (old_width + 1));
        for row in 0..self.num_rows {
            data.extend_from_slice(&self.data[row * old_width..(row + 1) * old_width]);
            data.push(fill.clone());
        }
        self.data = data;
        self.num_columns += 1;
    }

    /// Overwrites the cell at (`row`, `column`).
    pub fn set(&mut self, row: usize, column: ColumnIndex, value: Id) {
        self.data[row * self.num_columns + column] = value;
    }

    /// Compares two rows of this table lexicographically on the given `columns`.
    pub fn compare_rows_on(&self, lhs: usize, rhs: usize, columns: &[ColumnIndex]) -> Ordering {
        columns
            .iter()
            .map(|&column| self.get(lhs, column).cmp(self.get(rhs, column)))
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
    }

    /// Returns `true` if the table is sorted ascending by the given `columns` (primary sort key
    /// first).
    pub fn is_sorted_by(&self, columns: &[ColumnIndex]) -> bool {
        (1..self.num_rows).all(|row| self.compare_rows_on(row - 1, row, columns).is_le())
    }

    /// Sorts the table by the given `columns`. The sort is stable.
    pub fn sort_by_columns(&mut self, columns: &[ColumnIndex]) {
        if self.is_sorted_by(columns) {
            return;
        }
        let mut order = (0..self.num_rows).collect::<Vec<_>>();
        order.sort_by(|&lhs, &rhs| self.compare_rows_on(lhs, rhs, columns));

        let mut data = Vec::with_capacity(self.data.len());
        for row in order {
            data.extend_from_slice(self.row(row));
        }
        self.data = data;
    }

    /// Removes consecutive duplicate rows. If the table is sorted on all columns, the result
    /// contains no duplicates at all.
    pub fn dedup_consecutive(&mut self) {
        if self.num_rows <= 1 {
            return;
        }
        let width = self.num_columns;
        let mut data = Vec::with_capacity(self.data.len());
        data.extend_from_slice(self.row(0));
        let mut num_rows = 1;
        for row in 1..self.num_rows {
            if self.row(row) != self.row(row - 1) {
                data.extend_from_slice(self.row(row));
                num_rows += 1;
            }
        }
        debug_assert_eq!(data.len(), num_rows * width);
        self.data = data;
        self.num_rows = num_rows;
    }
}
