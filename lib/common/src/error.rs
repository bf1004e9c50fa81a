use crate::cancellation::CancellationError;
use sparql_exec_model::{IllegalConcurrentMutationError, LocalVocabError, WidthMismatchError};
use std::error::Error;

/// An error that can occur while computing the result of an operation.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ExecutionError {
    /// The query was cancelled, either manually or because its deadline passed.
    #[error(transparent)]
    QueryCancelled(#[from] CancellationError),
    /// Another caller computed the result for `key` and failed. The waiting caller does not retry.
    #[error("The computation of the result for {key} was aborted: {cause}")]
    ComputationAborted { key: String, cause: String },
    /// An operation tried to add a word to a local vocabulary that it does not own exclusively.
    #[error(transparent)]
    IllegalConcurrentMutation(#[from] IllegalConcurrentMutationError),
    /// The inputs of a merge join were not sorted on the join columns.
    #[error("Malformed join input: {0}")]
    MalformedJoinInput(String),
    /// An operation broke the contract of the execution engine. This is always a bug.
    #[error("Contract violation: {0}")]
    ContractViolation(String),
    /// A failure reported by a collaborator, e.g., a leaf scan.
    #[error("{0}")]
    External(#[source] Box<dyn Error + Send + Sync + 'static>),
}

impl ExecutionError {
    /// Builds an [ExecutionError::External] from any error.
    pub fn external(error: impl Into<Box<dyn Error + Send + Sync + 'static>>) -> Self {
        Self::External(error.into())
    }

    /// Returns `true` if this error was caused by a cancellation of the query.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::QueryCancelled(_))
    }
}

impl From<LocalVocabError> for ExecutionError {
    fn from(error: LocalVocabError) -> Self {
        match error {
            LocalVocabError::IllegalConcurrentMutation(error) => error.into(),
            LocalVocabError::CapacityExceeded(_) => Self::ContractViolation(error.to_string()),
        }
    }
}

impl From<WidthMismatchError> for ExecutionError {
    fn from(error: WidthMismatchError) -> Self {
        Self::ContractViolation(error.to_string())
    }
}

/// The result type of every fallible operation of the execution engine.
pub type ExecutionResult<T> = Result<T, ExecutionError>;
