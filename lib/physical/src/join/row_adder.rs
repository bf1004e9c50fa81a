use crate::join::JoinColumnMapping;
use sparql_exec_common::{CancellationHandle, ExecutionResult};
use sparql_exec_model::{Id, IdTable, LocalVocab};

/// Collects the output rows of a join.
///
/// Each output row consists of the columns of the left row followed by the non-join columns of
/// the right row. If a join column of the left row is UNDEF, the output contains the value of the
/// right row instead. The local vocabularies of both inputs are merged into the local vocabulary
/// of the output.
///
/// Cancellation is checked after every `chunk_size` rows.
#[derive(Debug)]
pub struct AddCombinedRow<'input> {
    left: &'input IdTable,
    right: &'input IdTable,
    mapping: &'input JoinColumnMapping,
    output: IdTable,
    local_vocab: LocalVocab,
    cancellation: &'input CancellationHandle,
    detail: &'input str,
    chunk_size: usize,
    rows_since_check: usize,
    buffer: Vec<Id>,
}

impl<'input> AddCombinedRow<'input> {
    /// Creates a new [AddCombinedRow]. `detail` identifies the join in cancellation errors.
    pub fn new(
        left: (&'input IdTable, &LocalVocab),
        right: (&'input IdTable, &LocalVocab),
        mapping: &'input JoinColumnMapping,
        cancellation: &'input CancellationHandle,
        detail: &'input str,
        chunk_size: usize,
    ) -> Self {
        Self {
            left: left.0,
            right: right.0,
            mapping,
            output: IdTable::new(mapping.result_width()),
            local_vocab: LocalVocab::merge([left.1, right.1]),
            cancellation,
            detail,
            chunk_size: chunk_size.max(1),
            rows_since_check: 0,
            buffer: Vec::with_capacity(mapping.result_width()),
        }
    }

    /// Adds the combination of the given left and right row.
    pub fn add_row(&mut self, left_row: usize, right_row: usize) -> ExecutionResult<()> {
        self.buffer.clear();
        self.buffer.extend_from_slice(self.left.row(left_row));
        let right = self.right.row(right_row);
        for [left_column, right_column] in self.mapping.join_columns() {
            if self.buffer[*left_column].is_undefined() {
                self.buffer[*left_column] = right[*right_column].clone();
            }
        }
        self.buffer.extend(
            self.mapping
                .right_non_join_columns()
                .iter()
                .map(|column| right[*column].clone()),
        );
        self.push_buffer()
    }

    /// Adds the left row without a matching right row. The right non-join columns are UNDEF.
    pub fn add_optional_row(&mut self, left_row: usize) -> ExecutionResult<()> {
        self.buffer.clear();
        self.buffer.extend_from_slice(self.left.row(left_row));
        self.buffer.extend(
            std::iter::repeat(Id::Undefined).take(self.mapping.right_non_join_columns().len()),
        );
        self.push_buffer()
    }

    /// Returns the number of rows added so far.
    pub fn num_rows(&self) -> usize {
        self.output.num_rows()
    }

    /// Returns the output table and its local vocabulary.
    pub fn finish(self) -> (IdTable, LocalVocab) {
        (self.output, self.local_vocab)
    }

    fn push_buffer(&mut self) -> ExecutionResult<()> {
        self.output.push_row(&self.buffer)?;
        self.rows_since_check += 1;
        if self.rows_since_check >= self.chunk_size {
            self.rows_since_check = 0;
            self.cancellation.check(self.detail)?;
        }
        Ok(())
    }
}
