#![cfg(test)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sparql_exec::common::{CacheStatus, CancellationState, ExecutionError};
use sparql_exec::engine::operation::{EvaluationState, OperationCore};
use sparql_exec::engine::operations::{ExistsJoin, Join, OptionalJoin, ValuesTable};
use sparql_exec::model::{ColumnIndex, Id, IdTable, LocalVocab};
use sparql_exec::physical::join::{ColumnSubsetView, GeneralUndefRanges, ZipperJoin};
use sparql_exec::{ExecutionContext, ExecutionResult, Operation, OperationExt, QueryResult};
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

const U: Id = Id::Undefined;

fn int(value: i64) -> Id {
    Id::Int(value)
}

fn values<const N: usize>(
    context: &ExecutionContext,
    rows: &[[Id; N]],
) -> Result<Arc<dyn Operation>, Box<dyn Error>> {
    let table = IdTable::from_rows(N, rows)?;
    Ok(Arc::new(ValuesTable::new(
        context.clone(),
        table,
        LocalVocab::new(),
    )))
}

fn sorted_rows(result: &QueryResult) -> Vec<Vec<Id>> {
    let mut rows = result
        .id_table()
        .map(|table| table.rows().map(<[Id]>::to_vec).collect::<Vec<_>>())
        .unwrap_or_default();
    rows.sort();
    rows
}

/// A leaf that stands in for an index scan. Counts its computations and can cancel the query
/// after producing its result.
#[derive(Debug)]
struct Scan {
    core: OperationCore,
    name: &'static str,
    rows: Vec<[Id; 1]>,
    computations: Arc<AtomicUsize>,
    delay: Duration,
    cancel_after_compute: bool,
}

impl Scan {
    fn new(context: ExecutionContext, name: &'static str, rows: Vec<[Id; 1]>) -> Self {
        Self {
            core: OperationCore::new(context),
            name,
            rows,
            computations: Arc::default(),
            delay: Duration::ZERO,
            cancel_after_compute: false,
        }
    }
}

impl Operation for Scan {
    fn descriptor(&self) -> String {
        format!("Scan {}", self.name)
    }

    fn cache_key(&self) -> String {
        format!("SCAN {}", self.name)
    }

    fn result_width(&self) -> usize {
        1
    }

    fn result_sorted_on(&self) -> Vec<ColumnIndex> {
        vec![0]
    }

    fn size_estimate(&self) -> usize {
        self.rows.len()
    }

    fn cost_estimate(&self) -> usize {
        self.rows.len()
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

    fn compute_result(&self, _request_laziness: bool) -> ExecutionResult<QueryResult> {
        self.computations.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        let table = IdTable::from_rows(1, &self.rows)?;
        if self.cancel_after_compute {
            self.core
                .context()
                .cancellation()
                .cancel(CancellationState::Manual);
        }
        Ok(QueryResult::new_materialized(
            table,
            LocalVocab::new(),
            vec![0],
        ))
    }
}

#[test]
fn concurrent_identical_requests_compute_once() {
    const NUM_THREADS: usize = 8;
    let context = ExecutionContext::default();
    let computations = Arc::new(AtomicUsize::new(0));
    let barrier = Barrier::new(NUM_THREADS);

    let results = thread::scope(|scope| {
        let handles = (0..NUM_THREADS)
            .map(|_| {
                let mut scan = Scan::new(context.for_new_query(), "a", vec![[int(1)], [int(2)]]);
                scan.computations = Arc::clone(&computations);
                scan.delay = Duration::from_millis(50);
                let barrier = &barrier;
                scope.spawn(move || {
                    barrier.wait();
                    scan.get_result(false)
                })
            })
            .collect::<Vec<_>>();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect::<Vec<_>>()
    });

    assert_eq!(computations.load(Ordering::SeqCst), 1);
    let first = results[0].as_ref().unwrap();
    for result in &results {
        assert!(Arc::ptr_eq(first, result.as_ref().unwrap()));
    }
}

#[test]
fn undef_is_a_wildcard_in_joins() -> Result<(), Box<dyn Error>> {
    let context = ExecutionContext::default();
    let left = values(&context, &[[U, int(20)], [int(1), int(10)]])?;
    let right = values(&context, &[[int(1), int(30)], [int(2), int(40)]])?;

    let join = Join::try_new(context, left, right, vec![[0, 0]])?;
    let result = join.get_root_result(false)?;

    assert_eq!(
        sorted_rows(&result),
        vec![
            vec![int(1), int(10), int(30)],
            vec![int(1), int(20), int(30)],
            vec![int(2), int(20), int(40)],
        ]
    );
    Ok(())
}

#[test]
fn cancelled_join_leaves_no_cached_result() {
    let context = ExecutionContext::default();
    let mut left = Scan::new(
        context.clone(),
        "left",
        (0..1000).map(|v| [int(v)]).collect(),
    );
    left.cancel_after_compute = true;
    let right = Scan::new(
        context.clone(),
        "right",
        (0..1000).map(|v| [int(v)]).collect(),
    );

    let join = Join::try_new(
        context.clone(),
        Arc::new(left),
        Arc::new(right),
        vec![[0, 0]],
    )
    .unwrap();
    let error = join.get_result(false).unwrap_err();

    assert!(matches!(error, ExecutionError::QueryCancelled(_)));
    assert!(!context.cache().contains(&join.cache_key()));
    assert!(!context.cache().is_in_progress(&join.cache_key()));
    assert_eq!(join.core().state(), EvaluationState::Aborted);
}

#[test]
fn aborted_entry_is_recomputed_by_later_queries() -> Result<(), Box<dyn Error>> {
    let context = ExecutionContext::default();
    context.cancellation().cancel(CancellationState::Manual);
    let first = values(&context, &[[int(1)]])?;
    assert!(first.get_result(false).is_err());

    let second_query = context.for_new_query();
    let second = values(&second_query, &[[int(1)]])?;
    let result = second.get_result(false)?;

    assert_eq!(sorted_rows(&result), vec![vec![int(1)]]);
    assert_eq!(
        second.core().runtime_info().cache_status,
        Some(CacheStatus::Computed)
    );
    Ok(())
}

#[test]
fn shared_vocabularies_are_read_only() -> Result<(), Box<dyn Error>> {
    let context = ExecutionContext::default();
    let mut vocab = LocalVocab::new();
    let hello = vocab.get_index_and_add_if_not_contained("hello")?;
    let table = IdTable::from_rows(1, [[Id::LocalVocabIndex(hello.clone())]])?;
    let leaf = ValuesTable::new(context, table, vocab);

    let result = leaf.get_result(false)?;
    let mut shared = result.local_vocab().cloned().unwrap_or_default();
    let error = shared.get_index_and_add_if_not_contained("world");
    assert!(error.is_err());

    let mut copy = result.copy_of_local_vocab()?;
    let world = copy.get_index_and_add_if_not_contained("world")?;
    assert_eq!(copy.get_word(&hello), Some("hello"));
    assert_eq!(copy.get_word(&world), Some("world"));
    Ok(())
}

#[test]
fn equal_words_from_independent_vocabularies_join() -> Result<(), Box<dyn Error>> {
    let context = ExecutionContext::default();
    let mut left_vocab = LocalVocab::new();
    let x = left_vocab.get_index_and_add_if_not_contained("x")?;
    let left = IdTable::from_rows(1, [[Id::LocalVocabIndex(x)]])?;
    let left = Arc::new(ValuesTable::new(context.clone(), left, left_vocab));

    // "x" gets a different position in the right vocabulary.
    let mut right_vocab = LocalVocab::new();
    let y = right_vocab.get_index_and_add_if_not_contained("y")?;
    let x = right_vocab.get_index_and_add_if_not_contained("x")?;
    let right = IdTable::from_rows(
        2,
        [
            [Id::LocalVocabIndex(x), int(1)],
            [Id::LocalVocabIndex(y), int(2)],
        ],
    )?;
    let right = Arc::new(ValuesTable::new(context.clone(), right, right_vocab));

    let result = Join::try_new(context, left, right, vec![[0, 0]])?.get_result(false)?;

    let table = result.id_table().ok_or("result is not materialized")?;
    assert_eq!(table.num_rows(), 1);
    assert_eq!(table.get(0, 1), &int(1));
    let Id::LocalVocabIndex(word) = table.get(0, 0) else {
        return Err("join column is not a local vocab entry".into());
    };
    let vocab = result.local_vocab().ok_or("result has no vocabulary")?;
    assert_eq!(vocab.get_word(word), Some("x"));
    Ok(())
}

#[test]
fn leaves_with_equal_words_share_cache_entry() -> Result<(), Box<dyn Error>> {
    let context = ExecutionContext::default();
    let leaf = |word: &str| -> Result<ValuesTable, Box<dyn Error>> {
        let mut vocab = LocalVocab::new();
        let index = vocab.get_index_and_add_if_not_contained(word)?;
        let table = IdTable::from_rows(1, [[Id::LocalVocabIndex(index)]])?;
        Ok(ValuesTable::new(context.clone(), table, vocab))
    };
    let first = leaf("x")?;
    let second = leaf("x")?;
    assert_eq!(first.cache_key(), second.cache_key());
    assert_ne!(first.cache_key(), leaf("y")?.cache_key());

    let first_result = first.get_result(false)?;
    let second_result = second.get_result(false)?;
    assert!(Arc::ptr_eq(&first_result, &second_result));
    assert_eq!(
        second.core().runtime_info().cache_status,
        Some(CacheStatus::CachedNotPinned)
    );
    Ok(())
}

#[test]
fn materialization_is_idempotent() -> Result<(), Box<dyn Error>> {
    let context = ExecutionContext::default();
    let rows = (0..10).map(|v| [int(v / 3), int(v)]).collect::<Vec<_>>();
    let leaf = values(&context, &rows[..])?;

    let lazy = leaf.get_result(true)?;
    let cancellation = context.cancellation();
    let materialized = QueryResult::materialize_shared(lazy, cancellation, "test")?;
    let again = QueryResult::materialize_shared(Arc::clone(&materialized), cancellation, "test")?;

    assert!(Arc::ptr_eq(&materialized, &again));
    assert_eq!(materialized.id_table().map(IdTable::num_rows), Some(10));
    assert_eq!(materialized.sorted_by(), &[0, 1]);
    Ok(())
}

#[test]
fn unmatched_rows_are_reported_in_order() -> Result<(), Box<dyn Error>> {
    let left = IdTable::from_rows(1, [[int(1)], [int(2)], [int(3)]])?;
    let right = IdTable::from_rows(1, [[int(2)]])?;
    let left = ColumnSubsetView::new(&left, &[0]);
    let right = ColumnSubsetView::new(&right, &[0]);

    let mut unmatched = Vec::new();
    ZipperJoin::without_undef(&left, &right).run_with_unmatched(
        |_, _| Ok(()),
        |row| {
            unmatched.push(row);
            Ok(())
        },
        || Ok(()),
    )?;

    assert_eq!(unmatched, vec![0, 2]);
    Ok(())
}

#[test]
fn optional_and_exists_agree() -> Result<(), Box<dyn Error>> {
    let context = ExecutionContext::default();
    let left = values(&context, &[[U], [int(1)], [int(2)], [int(3)]])?;
    let right = values(&context, &[[int(2), int(20)]])?;

    let optional = OptionalJoin::try_new(
        context.clone(),
        Arc::clone(&left),
        Arc::clone(&right),
        vec![[0, 0]],
    )?
    .get_result(false)?;
    let exists = ExistsJoin::try_new(context, left, right, vec![[0, 0]])?.get_result(false)?;

    assert_eq!(
        sorted_rows(&optional),
        vec![
            vec![int(1), U],
            vec![int(2), int(20)],
            vec![int(2), int(20)],
            vec![int(3), U],
        ]
    );
    let matched = exists
        .id_table()
        .map(|table| table.column(1).filter(|id| **id == Id::Bool(true)).count());
    assert_eq!(matched, Some(2));
    Ok(())
}

fn random_table(rng: &mut StdRng, num_rows: usize) -> Vec<[Id; 3]> {
    (0..num_rows)
        .map(|row| {
            let mut cell = || {
                if rng.random_range(0..5) == 0 {
                    U
                } else {
                    int(rng.random_range(0..4))
                }
            };
            [cell(), cell(), int(i64::try_from(row).unwrap_or_default())]
        })
        .collect()
}

fn brute_force_join(left: &[[Id; 3]], right: &[[Id; 3]]) -> Vec<Vec<Id>> {
    let mut result = Vec::new();
    for l in left {
        for r in right {
            let compatible = (0..2)
                .all(|c| l[c] == r[c] || l[c].is_undefined() || r[c].is_undefined());
            if compatible {
                let merge = |c: usize| {
                    if l[c].is_undefined() {
                        r[c].clone()
                    } else {
                        l[c].clone()
                    }
                };
                result.push(vec![merge(0), merge(1), l[2].clone(), r[2].clone()]);
            }
        }
    }
    result.sort();
    result
}

#[test]
fn join_matches_brute_force_on_random_inputs() -> Result<(), Box<dyn Error>> {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..20 {
        let context = ExecutionContext::default();
        let left_rows = random_table(&mut rng, 30);
        let right_rows = random_table(&mut rng, 30);
        let left = values(&context, &left_rows[..])?;
        let right = values(&context, &right_rows[..])?;

        let join = Join::try_new(context, left, right, vec![[0, 0], [1, 1]])?;
        let result = join.get_result(false)?;

        let table = result.id_table().ok_or("result is not materialized")?;
        assert!(table.is_sorted_by(&[0, 1]));
        assert_eq!(sorted_rows(&result), brute_force_join(&left_rows, &right_rows));
    }
    Ok(())
}

#[test]
fn undef_aware_join_finds_all_compatible_pairs() -> Result<(), Box<dyn Error>> {
    let mut rng = StdRng::seed_from_u64(11);
    let mut rows = random_table(&mut rng, 40);
    rows.sort();
    let table = IdTable::from_rows(3, &rows)?;
    let view = ColumnSubsetView::new(&table, &[0, 1]);

    let mut pairs = 0;
    ZipperJoin::new(&view, &view, GeneralUndefRanges, GeneralUndefRanges).run(
        |_, _| {
            pairs += 1;
            Ok(())
        },
        || Ok(()),
    )?;

    assert_eq!(pairs, brute_force_join(&rows, &rows).len());
    Ok(())
}
