mod evaluation;
mod runtime_info;

pub use evaluation::{ComputationMode, OperationExt};
pub use runtime_info::{RuntimeInformation, RuntimeStatus};

use crate::context::ExecutionContext;
use crate::result::QueryResult;
use sparql_exec_common::ExecutionResult;
use sparql_exec_model::ColumnIndex;
use std::fmt::Debug;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A node of a planned query tree.
///
/// Implementations describe their result (width, sort order, estimates) and compute it in
/// [Operation::compute_result]. Callers never invoke [Operation::compute_result] directly but go
/// through [OperationExt::get_result], which deduplicates identical computations with the query
/// result cache and records runtime information.
pub trait Operation: Debug + Send + Sync {
    /// A short, human-readable description of the operation.
    fn descriptor(&self) -> String;

    /// A string that uniquely identifies the result of this operation. Two operations with equal
    /// cache keys must produce identical results.
    fn cache_key(&self) -> String;

    /// The number of result columns.
    fn result_width(&self) -> usize;

    /// The columns the result is sorted on, in order of precedence.
    fn result_sorted_on(&self) -> Vec<ColumnIndex>;

    /// An estimate of the number of result rows.
    fn size_estimate(&self) -> usize;

    /// An estimate of the cost of computing the result, including the children.
    fn cost_estimate(&self) -> usize;

    /// The average number of times a value occurs in the given result column.
    fn multiplicity(&self, column: ColumnIndex) -> f32;

    /// Returns `true` if the result is known to be empty without computing it.
    fn known_empty_result(&self) -> bool;

    /// The children of this operation.
    fn children(&self) -> Vec<Arc<dyn Operation>>;

    /// The evaluation state shared by all operations.
    fn core(&self) -> &OperationCore;

    /// Computes the result.
    ///
    /// If `request_laziness` is `true`, the operation may return a lazy result. Operations that
    /// cannot stream their result ignore the flag.
    fn compute_result(&self, request_laziness: bool) -> ExecutionResult<QueryResult>;
}

/// The state of the evaluation of a single operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum EvaluationState {
    /// The result was not requested yet.
    #[default]
    NotRequested,
    /// The cache is queried for the result.
    CacheLookup,
    /// This operation computes the result.
    Computing,
    /// The result is available.
    Ready,
    /// The computation failed or was cancelled.
    Aborted,
}

/// The part of an operation that is managed by the evaluation machinery.
#[derive(Debug)]
pub struct OperationCore {
    context: ExecutionContext,
    state: Mutex<EvaluationState>,
    runtime_info: Arc<Mutex<RuntimeInformation>>,
}

impl OperationCore {
    /// Creates a new [OperationCore].
    pub fn new(context: ExecutionContext) -> Self {
        Self {
            context,
            state: Mutex::new(EvaluationState::NotRequested),
            runtime_info: Arc::new(Mutex::new(RuntimeInformation::default())),
        }
    }

    /// Returns the execution context.
    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Returns the current evaluation state.
    pub fn state(&self) -> EvaluationState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the runtime information of this operation without its children.
    pub fn runtime_info(&self) -> RuntimeInformation {
        self.lock_runtime_info().clone()
    }

    pub(crate) fn set_state(&self, state: EvaluationState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub(crate) fn update_runtime_info(&self, update: impl FnOnce(&mut RuntimeInformation)) {
        update(&mut self.lock_runtime_info());
    }

    pub(crate) fn shared_runtime_info(&self) -> Arc<Mutex<RuntimeInformation>> {
        Arc::clone(&self.runtime_info)
    }

    fn lock_runtime_info(&self) -> MutexGuard<'_, RuntimeInformation> {
        self.runtime_info
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
