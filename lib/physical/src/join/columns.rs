use sparql_exec_common::{ExecutionError, ExecutionResult};
use sparql_exec_model::ColumnIndex;

/// Describes which columns of two inputs are joined and how the output of the join is laid out.
///
/// The output consists of all columns of the left input, followed by the non-join columns of the
/// right input in their original order. The first join-column pair is the primary comparison key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct JoinColumnMapping {
    join_columns: Vec<[ColumnIndex; 2]>,
    left_width: usize,
    right_width: usize,
    right_non_join_columns: Vec<ColumnIndex>,
}

impl JoinColumnMapping {
    /// Creates a new [JoinColumnMapping].
    ///
    /// Returns an error if no join columns are given, if a column is out of bounds, or if a column
    /// is used more than once on the same side.
    pub fn try_new(
        join_columns: Vec<[ColumnIndex; 2]>,
        left_width: usize,
        right_width: usize,
    ) -> ExecutionResult<Self> {
        if join_columns.is_empty() {
            return Err(ExecutionError::ContractViolation(
                "A join requires at least one join column".to_owned(),
            ));
        }
        for (index, [left, right]) in join_columns.iter().enumerate() {
            if *left >= left_width || *right >= right_width {
                return Err(ExecutionError::ContractViolation(format!(
                    "Join column pair [{left}, {right}] is out of bounds for inputs of width \
                     {left_width} and {right_width}"
                )));
            }
            let duplicate = join_columns[..index]
                .iter()
                .any(|[other_left, other_right]| other_left == left || other_right == right);
            if duplicate {
                return Err(ExecutionError::ContractViolation(format!(
                    "Join column pair [{left}, {right}] reuses a column"
                )));
            }
        }

        let right_non_join_columns = (0..right_width)
            .filter(|column| join_columns.iter().all(|[_, right]| right != column))
            .collect();
        Ok(Self {
            join_columns,
            left_width,
            right_width,
            right_non_join_columns,
        })
    }

    /// Returns the join-column pairs.
    pub fn join_columns(&self) -> &[[ColumnIndex; 2]] {
        &self.join_columns
    }

    /// Returns the number of join columns.
    pub fn num_join_columns(&self) -> usize {
        self.join_columns.len()
    }

    /// Returns the join columns of the left input.
    pub fn jcs_left(&self) -> Vec<ColumnIndex> {
        self.join_columns.iter().map(|[left, _]| *left).collect()
    }

    /// Returns the join columns of the right input.
    pub fn jcs_right(&self) -> Vec<ColumnIndex> {
        self.join_columns.iter().map(|[_, right]| *right).collect()
    }

    /// Returns the columns of the right input that are not join columns.
    pub fn right_non_join_columns(&self) -> &[ColumnIndex] {
        &self.right_non_join_columns
    }

    /// Returns the width of the left input.
    pub fn left_width(&self) -> usize {
        self.left_width
    }

    /// Returns the width of the right input.
    pub fn right_width(&self) -> usize {
        self.right_width
    }

    /// Returns the width of the join output.
    pub fn result_width(&self) -> usize {
        self.left_width + self.right_non_join_columns.len()
    }

    /// Returns the output column of the given column of the right input.
    pub fn output_column_of_right(&self, right_column: ColumnIndex) -> Option<ColumnIndex> {
        if let Some([left, _]) = self
            .join_columns
            .iter()
            .find(|[_, right]| *right == right_column)
        {
            return Some(*left);
        }
        self.right_non_join_columns
            .iter()
            .position(|column| *column == right_column)
            .map(|position| self.left_width + position)
    }

    /// Returns a mapping with both inputs swapped.
    pub fn swapped(&self) -> ExecutionResult<Self> {
        Self::try_new(
            self.join_columns
                .iter()
                .map(|[left, right]| [*right, *left])
                .collect(),
            self.right_width,
            self.left_width,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computes_output_layout() {
        let mapping = JoinColumnMapping::try_new(vec![[1, 2], [0, 0]], 2, 4).unwrap();
        assert_eq!(mapping.jcs_left(), vec![1, 0]);
        assert_eq!(mapping.jcs_right(), vec![2, 0]);
        assert_eq!(mapping.right_non_join_columns(), &[1, 3]);
        assert_eq!(mapping.result_width(), 4);
        assert_eq!(mapping.output_column_of_right(2), Some(1));
        assert_eq!(mapping.output_column_of_right(3), Some(3));
    }

    #[test]
    fn rejects_invalid_columns() {
        assert!(JoinColumnMapping::try_new(vec![], 1, 1).is_err());
        assert!(JoinColumnMapping::try_new(vec![[1, 0]], 1, 1).is_err());
        assert!(JoinColumnMapping::try_new(vec![[0, 0], [0, 1]], 1, 2).is_err());
    }
}
