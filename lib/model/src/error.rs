use crate::WordSetId;
use thiserror::Error;

/// Indicates that a word was inserted into a [LocalVocab](crate::LocalVocab) whose primary word
/// set is also held by another vocabulary or result.
///
/// This is always a logic error in the operation that attempted the insertion. Operations must
/// obtain an exclusively owned vocabulary via
/// [LocalVocab::writable_copy](crate::LocalVocab::writable_copy) before inserting.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("Insertion into local vocabulary word set {word_set} which is not exclusively owned")]
pub struct IllegalConcurrentMutationError {
    /// The word set that could not be mutated.
    pub word_set: WordSetId,
}

/// An error that can occur while adding words to a [LocalVocab](crate::LocalVocab).
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum LocalVocabError {
    #[error(transparent)]
    IllegalConcurrentMutation(#[from] IllegalConcurrentMutationError),
    /// A single word set can hold at most `u32::MAX` words.
    #[error("Local vocabulary word set {0} is full")]
    CapacityExceeded(WordSetId),
}

/// An error returned if a row does not have the width of the table it is added to.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("Row of width {actual} does not fit into a table of width {expected}")]
pub struct WidthMismatchError {
    /// The width of the table.
    pub expected: usize,
    /// The width of the offending row.
    pub actual: usize,
}
