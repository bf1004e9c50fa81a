use crate::operation::{
    EvaluationState, Operation, OperationCore, RuntimeInformation, RuntimeStatus,
};
use crate::result::{ConsumptionOutcome, QueryResult};
use sparql_exec_common::{CacheStatus, ExecutionError, ExecutionResult};
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};

/// Describes how the result of an operation is requested.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComputationMode {
    /// The result is computed, materialized and cached. Identical concurrent requests share a
    /// single computation.
    FullyMaterialized,
    /// The result may be lazy. Lazy results are not shared with concurrent requests but cache
    /// themselves once they are consumed completely.
    Lazy,
    /// Only a cached result is returned. Nothing is computed.
    OnlyIfCached,
}

/// Evaluates operations. Implemented for every [Operation].
pub trait OperationExt: Operation {
    /// Returns the result of this operation as a child of another operation.
    ///
    /// If `request_laziness` is `true`, the result may be lazy.
    fn get_result(&self, request_laziness: bool) -> ExecutionResult<Arc<QueryResult>>;

    /// Returns the result of the root of a query. The result is pinned in the cache if
    /// `pin_result` is configured.
    fn get_root_result(&self, request_laziness: bool) -> ExecutionResult<Arc<QueryResult>>;

    /// Returns the result of this operation with the given `mode`. Returns `None` only for
    /// [ComputationMode::OnlyIfCached] if the result is not cached.
    fn get_result_with_mode(
        &self,
        mode: ComputationMode,
        is_root: bool,
    ) -> ExecutionResult<Option<Arc<QueryResult>>>;

    /// Collects the runtime information of this operation and all of its descendants.
    fn runtime_info_tree(&self) -> RuntimeInformation;

    /// Sets the deadline of this operation and all of its descendants.
    fn recursively_set_deadline(&self, deadline: Instant);
}

impl<O: Operation + ?Sized> OperationExt for O {
    fn get_result(&self, request_laziness: bool) -> ExecutionResult<Arc<QueryResult>> {
        get_required_result(self, request_laziness, false)
    }

    fn get_root_result(&self, request_laziness: bool) -> ExecutionResult<Arc<QueryResult>> {
        get_required_result(self, request_laziness, true)
    }

    fn get_result_with_mode(
        &self,
        mode: ComputationMode,
        is_root: bool,
    ) -> ExecutionResult<Option<Arc<QueryResult>>> {
        let core = self.core();
        let key = self.cache_key();
        let descriptor = self.descriptor();
        core.set_state(EvaluationState::CacheLookup);
        core.update_runtime_info(|info| {
            info.descriptor.clone_from(&descriptor);
            info.num_columns = self.result_width();
            info.size_estimate = self.size_estimate();
            info.cost_estimate = self.cost_estimate();
        });

        match mode {
            ComputationMode::OnlyIfCached => {
                let cached = core.context().cache().get_if_contained(&key);
                match cached {
                    Some((result, status)) => {
                        tracing::debug!("Found cached result for {descriptor}");
                        record_success(core, &result, status, Duration::ZERO);
                        Ok(Some(result))
                    }
                    None => {
                        core.set_state(EvaluationState::NotRequested);
                        Ok(None)
                    }
                }
            }
            ComputationMode::Lazy => {
                compute_lazy(self, &key, &descriptor, pin_result(core, is_root)).map(Some)
            }
            ComputationMode::FullyMaterialized => {
                compute_materialized(self, &key, &descriptor, pin_result(core, is_root)).map(Some)
            }
        }
    }

    fn runtime_info_tree(&self) -> RuntimeInformation {
        let mut info = self.core().runtime_info();
        if info.descriptor.is_empty() {
            info.descriptor = self.descriptor();
        }
        info.children = self
            .children()
            .iter()
            .map(|child| child.runtime_info_tree())
            .collect();
        info
    }

    fn recursively_set_deadline(&self, deadline: Instant) {
        self.core().context().cancellation().set_deadline(deadline);
        for child in self.children() {
            child.recursively_set_deadline(deadline);
        }
    }
}

fn get_required_result<O: Operation + ?Sized>(
    operation: &O,
    request_laziness: bool,
    is_root: bool,
) -> ExecutionResult<Arc<QueryResult>> {
    let mode = if request_laziness {
        ComputationMode::Lazy
    } else {
        ComputationMode::FullyMaterialized
    };
    operation
        .get_result_with_mode(mode, is_root)?
        .ok_or_else(|| {
            ExecutionError::ContractViolation(format!(
                "No result was computed for {}",
                operation.descriptor()
            ))
        })
}

fn pin_result(core: &OperationCore, is_root: bool) -> bool {
    let config = core.context().config();
    (is_root && config.pin_result) || config.pin_subtrees
}

#[allow(clippy::ptr_arg, reason = "The query result cache is keyed by String")]
fn compute_materialized<O: Operation + ?Sized>(
    operation: &O,
    key: &String,
    descriptor: &str,
    pin: bool,
) -> ExecutionResult<Arc<QueryResult>> {
    let core = operation.core();
    let cache = core.context().cache();
    let start = Instant::now();
    let compute = || -> ExecutionResult<Arc<QueryResult>> {
        core.set_state(EvaluationState::Computing);
        core.update_runtime_info(|info| info.status = RuntimeStatus::InProgress);
        tracing::debug!("Computing result of {descriptor}");

        let result = operation
            .compute_result(false)?
            .materialize(core.context().cancellation(), descriptor)?;
        #[cfg(feature = "expensive-checks")]
        result.check_sort_order()?;
        Ok(Arc::new(result))
    };

    let outcome = if pin {
        cache.compute_once_pinned(key, compute)
    } else {
        cache.compute_once(key, compute)
    };
    match outcome {
        Ok((result, status)) => {
            if status.is_cached() {
                tracing::debug!("Found cached result for {descriptor}");
            }
            record_success(core, &result, status, start.elapsed());
            Ok(result)
        }
        Err(error) => Err(record_failure(operation, error, descriptor)),
    }
}

#[allow(clippy::ptr_arg, reason = "The query result cache is keyed by String")]
fn compute_lazy<O: Operation + ?Sized>(
    operation: &O,
    key: &String,
    descriptor: &str,
    pin: bool,
) -> ExecutionResult<Arc<QueryResult>> {
    let core = operation.core();
    let cache = core.context().cache();
    if let Some((result, status)) = cache.get_if_contained(key) {
        tracing::debug!("Found cached result for {descriptor}");
        record_success(core, &result, status, Duration::ZERO);
        return Ok(result);
    }

    core.set_state(EvaluationState::Computing);
    core.update_runtime_info(|info| info.status = RuntimeStatus::InProgress);
    tracing::debug!("Computing lazy result of {descriptor}");
    let start = Instant::now();
    let result = match operation.compute_result(true) {
        Ok(result) => result,
        Err(error) => return Err(record_failure(operation, error, descriptor)),
    };

    if result.is_materialized() {
        let result = Arc::new(result);
        if cache.try_insert(key.clone(), Arc::clone(&result), pin) {
            tracing::debug!("Cached result of {descriptor}");
        }
        record_success(core, &result, CacheStatus::Computed, start.elapsed());
        return Ok(result);
    }

    register_lazy_hooks(core, &result, key, pin)?;
    core.set_state(EvaluationState::Ready);
    core.update_runtime_info(|info| {
        info.status = RuntimeStatus::LazilyMaterialized;
        info.cache_status = Some(CacheStatus::Computed);
        info.time = start.elapsed();
    });
    Ok(Arc::new(result))
}

/// Updates the runtime information while the batches are consumed and caches the result once it
/// was consumed completely.
#[allow(clippy::ptr_arg, reason = "The query result cache is keyed by String")]
fn register_lazy_hooks(
    core: &OperationCore,
    result: &QueryResult,
    key: &String,
    pin: bool,
) -> ExecutionResult<()> {
    let Some(batches) = result.lazy_batches() else {
        return Ok(());
    };

    let runtime_info = core.shared_runtime_info();
    batches.add_on_new_batch(move |batch, elapsed| {
        let mut info = runtime_info.lock().unwrap_or_else(PoisonError::into_inner);
        info.num_rows += batch.table.num_rows();
        info.time += elapsed;
    })?;

    let runtime_info = core.shared_runtime_info();
    batches.add_on_finish(move |outcome| {
        let mut info = runtime_info.lock().unwrap_or_else(PoisonError::into_inner);
        match outcome {
            ConsumptionOutcome::Finished | ConsumptionOutcome::Abandoned => {}
            ConsumptionOutcome::Failed { cancelled: true } => {
                info.status = RuntimeStatus::Cancelled;
            }
            ConsumptionOutcome::Failed { cancelled: false } => {
                tracing::warn!("Failed to compute lazy result of {}", info.descriptor);
                info.status = RuntimeStatus::Failed;
            }
        }
    })?;

    let cache = Arc::clone(core.context().cache());
    let max_size = cache.config().max_size_single_entry;
    let key = key.clone();
    result.cache_during_consumption(max_size, move |result| {
        if cache.try_insert(key.clone(), Arc::new(result), pin) {
            tracing::debug!("Cached lazily computed result for {key}");
        }
    })
}

fn record_success(
    core: &OperationCore,
    result: &QueryResult,
    status: CacheStatus,
    elapsed: Duration,
) {
    core.set_state(EvaluationState::Ready);
    core.update_runtime_info(|info| {
        info.num_rows = result.id_table().map_or(0, |table| table.num_rows());
        info.num_columns = result.width();
        info.cache_status = Some(status);
        info.time = elapsed;
        info.status = if result.is_materialized() {
            RuntimeStatus::FullyMaterialized
        } else {
            RuntimeStatus::LazilyMaterialized
        };
    });
}

/// Records the failure. Only the deepest failing operation, i.e., the one whose children all
/// succeeded, logs a warning.
fn record_failure<O: Operation + ?Sized>(
    operation: &O,
    error: ExecutionError,
    descriptor: &str,
) -> ExecutionError {
    let core = operation.core();
    core.set_state(EvaluationState::Aborted);
    core.update_runtime_info(|info| {
        info.status = if error.is_cancellation() {
            RuntimeStatus::Cancelled
        } else {
            RuntimeStatus::Failed
        };
    });

    let child_failed = operation
        .children()
        .iter()
        .any(|child| child.core().runtime_info().status.is_failure());
    if child_failed {
        tracing::debug!("Aborted computation of {descriptor} after a child failed");
    } else if error.is_cancellation() {
        tracing::debug!("Computation of {descriptor} was cancelled: {error}");
    } else {
        tracing::warn!("Failed to compute {descriptor}: {error}");
    }
    error
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use crate::operations::ValuesTable;
    use sparql_exec_common::{CancellationState, EngineConfig};
    use sparql_exec_model::{ColumnIndex, Id, IdTable, LocalVocab};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts how often its result is computed. Fails if `fail` is set.
    #[derive(Debug)]
    struct CountingOperation {
        core: OperationCore,
        key: String,
        computations: AtomicUsize,
        fail: bool,
        lazy: bool,
    }

    impl CountingOperation {
        fn new(context: ExecutionContext, key: &str) -> Self {
            Self {
                core: OperationCore::new(context),
                key: key.to_owned(),
                computations: AtomicUsize::new(0),
                fail: false,
                lazy: false,
            }
        }

        fn computations(&self) -> usize {
            self.computations.load(Ordering::SeqCst)
        }
    }

    impl Operation for CountingOperation {
        fn descriptor(&self) -> String {
            format!("Counting {}", self.key)
        }

        fn cache_key(&self) -> String {
            self.key.clone()
        }

        fn result_width(&self) -> usize {
            1
        }

        fn result_sorted_on(&self) -> Vec<ColumnIndex> {
            vec![0]
        }

        fn size_estimate(&self) -> usize {
            2
        }

        fn cost_estimate(&self) -> usize {
            2
        }

        fn multiplicity(&self, _column: ColumnIndex) -> f32 {
            1.0
        }

        fn known_empty_result(&self) -> bool {
            false
        }

        fn children(&self) -> Vec<Arc<dyn Operation>> {
            Vec::new()
        }

        fn core(&self) -> &OperationCore {
            &self.core
        }

        fn compute_result(&self, request_laziness: bool) -> ExecutionResult<QueryResult> {
            self.computations.fetch_add(1, Ordering::SeqCst);
            self.core.context().cancellation().check("Counting")?;
            if self.fail {
                return Err(ExecutionError::external("scan failed"));
            }
            let table = IdTable::from_rows(1, [[Id::Int(1)], [Id::Int(2)]])?;
            if request_laziness && self.lazy {
                let batches = vec![Ok(crate::result::IdTableVocabPair::new(
                    table,
                    LocalVocab::new(),
                ))];
                return Ok(QueryResult::new_lazy(1, batches.into_iter(), vec![0]));
            }
            Ok(QueryResult::new_materialized(table, LocalVocab::new(), vec![0]))
        }
    }

    #[test]
    fn second_request_is_served_from_cache() {
        let operation = CountingOperation::new(ExecutionContext::default(), "a");

        let first = operation.get_result(false).unwrap();
        let second = operation.get_result(false).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(operation.computations(), 1);
        assert_eq!(operation.core().state(), EvaluationState::Ready);
        assert_eq!(
            operation.core().runtime_info().cache_status,
            Some(CacheStatus::CachedNotPinned)
        );
    }

    #[test]
    fn only_if_cached_does_not_compute() {
        let operation = CountingOperation::new(ExecutionContext::default(), "a");

        let result = operation
            .get_result_with_mode(ComputationMode::OnlyIfCached, false)
            .unwrap();
        assert!(result.is_none());
        assert_eq!(operation.computations(), 0);

        operation.get_result(false).unwrap();
        let result = operation
            .get_result_with_mode(ComputationMode::OnlyIfCached, false)
            .unwrap();
        assert!(result.is_some());
    }

    #[test]
    fn failure_is_not_cached() {
        let mut operation = CountingOperation::new(ExecutionContext::default(), "a");
        operation.fail = true;

        assert!(operation.get_result(false).is_err());
        assert!(operation.get_result(false).is_err());

        assert_eq!(operation.computations(), 2);
        assert_eq!(operation.core().state(), EvaluationState::Aborted);
        assert_eq!(
            operation.core().runtime_info().status,
            RuntimeStatus::Failed
        );
    }

    #[test]
    fn cancellation_is_recorded() {
        let context = ExecutionContext::default();
        context.cancellation().cancel(CancellationState::Manual);
        let operation = CountingOperation::new(context, "a");

        let error = operation.get_result(false).unwrap_err();

        assert!(error.is_cancellation());
        assert!(!operation.core().context().cache().contains(&"a".to_owned()));
        assert_eq!(
            operation.core().runtime_info().status,
            RuntimeStatus::Cancelled
        );
    }

    #[test]
    fn root_result_is_pinned_if_configured() {
        let config = EngineConfig {
            pin_result: true,
            ..EngineConfig::default()
        };
        let context = ExecutionContext::with_config(config);
        let operation = CountingOperation::new(context.clone(), "a");

        operation.get_root_result(false).unwrap();
        context.cache().clear_unpinned();

        assert_eq!(context.cache().num_pinned_entries(), 1);
        operation.get_result(false).unwrap();
        assert_eq!(operation.computations(), 1);
    }

    #[test]
    fn lazy_result_caches_itself_after_consumption() {
        let context = ExecutionContext::default();
        let mut operation = CountingOperation::new(context.clone(), "a");
        operation.lazy = true;

        let result = operation.get_result(true).unwrap();
        assert!(!result.is_materialized());
        assert!(!context.cache().contains(&"a".to_owned()));

        let rows = result
            .take_batches()
            .unwrap()
            .map(|batch| batch.unwrap().table.num_rows())
            .sum::<usize>();
        assert_eq!(rows, 2);
        assert!(context.cache().contains(&"a".to_owned()));
        assert_eq!(operation.core().runtime_info().num_rows, 2);

        let cached = operation.get_result(true).unwrap();
        assert!(cached.is_materialized());
        assert_eq!(operation.computations(), 1);
    }

    #[test]
    fn materialized_request_materializes_lazy_results() {
        let mut operation = CountingOperation::new(ExecutionContext::default(), "a");
        operation.lazy = true;

        let result = operation.get_result(false).unwrap();

        assert!(result.is_materialized());
        assert_eq!(result.id_table().unwrap().num_rows(), 2);
    }

    #[test]
    fn deadline_is_propagated() {
        let context = ExecutionContext::default();
        let values = ValuesTable::new(
            context.clone(),
            IdTable::from_rows(1, [[Id::Int(1)]]).unwrap(),
            LocalVocab::new(),
        );

        values.recursively_set_deadline(Instant::now());

        let error = values.get_result(false).unwrap_err();
        assert!(error.is_cancellation());
        assert_eq!(context.cancellation().state(), CancellationState::Timeout);
    }
}
