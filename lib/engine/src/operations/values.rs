use crate::context::ExecutionContext;
use crate::operation::{Operation, OperationCore};
use crate::operations::multiplicity_of;
use crate::result::{IdTableVocabPair, QueryResult};
use itertools::Itertools;
use sparql_exec_common::ExecutionResult;
use sparql_exec_model::{ColumnIndex, IdTable, LocalVocab};
use std::sync::Arc;

/// A leaf operation that returns an explicit table.
///
/// The rows are sorted on all columns. If laziness is requested, the rows are produced in batches
/// of [lazy_chunk_size](sparql_exec_common::EngineConfig::lazy_chunk_size) rows.
#[derive(Debug)]
pub struct ValuesTable {
    core: OperationCore,
    table: Arc<IdTable>,
    local_vocab: LocalVocab,
    multiplicities: Vec<f32>,
    cache_key: String,
}

impl ValuesTable {
    /// Creates a new [ValuesTable]. `local_vocab` must resolve all local vocabulary entries of
    /// `table`.
    pub fn new(context: ExecutionContext, mut table: IdTable, local_vocab: LocalVocab) -> Self {
        let all_columns = (0..table.num_columns()).collect::<Vec<_>>();
        table.sort_by_columns(&all_columns);
        let multiplicities = all_columns
            .iter()
            .map(|column| multiplicity_of(&table, *column))
            .collect();
        let cache_key = render_cache_key(&table);
        Self {
            core: OperationCore::new(context),
            table: Arc::new(table),
            local_vocab,
            multiplicities,
            cache_key,
        }
    }

    /// Returns the (sorted) table.
    pub fn table(&self) -> &IdTable {
        &self.table
    }
}

/// Renders the content of the table. Local vocabulary entries are rendered as their words, such
/// that equal keys imply equal cells.
fn render_cache_key(table: &IdTable) -> String {
    let rows = table.rows().map(|row| row.iter().join(" ")).join("\n");
    format!("VALUES\nwidth: {}\n{rows}", table.num_columns())
}

impl Operation for ValuesTable {
    fn descriptor(&self) -> String {
        format!("Values with {} rows", self.table.num_rows())
    }

    fn cache_key(&self) -> String {
        self.cache_key.clone()
    }

    fn result_width(&self) -> usize {
        self.table.num_columns()
    }

    fn result_sorted_on(&self) -> Vec<ColumnIndex> {
        (0..self.table.num_columns()).collect()
    }

    fn size_estimate(&self) -> usize {
        self.table.num_rows()
    }

    fn cost_estimate(&self) -> usize {
        self.table.num_rows()
    }

    fn multiplicity(&self, column: ColumnIndex) -> f32 {
        self.multiplicities.get(column).copied().unwrap_or(1.0)
    }

    fn known_empty_result(&self) -> bool {
        self.table.is_empty()
    }

    fn children(&self) -> Vec<Arc<dyn Operation>> {
        Vec::new()
    }

    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn compute_result(&self, request_laziness: bool) -> ExecutionResult<QueryResult> {
        let cancellation = self.core.context().cancellation();
        cancellation.check("Values")?;

        if !request_laziness {
            return Ok(QueryResult::new_materialized(
                IdTable::clone(&self.table),
                self.local_vocab.clone(),
                self.result_sorted_on(),
            ));
        }

        let table = Arc::clone(&self.table);
        let local_vocab = self.local_vocab.clone();
        let cancellation = Arc::clone(cancellation);
        let chunk_size = self.core.context().config().lazy_chunk_size.max(1);
        let batches = (0..table.num_rows()).step_by(chunk_size).map(move |start| {
            cancellation.check("Values")?;
            let end = (start + chunk_size).min(table.num_rows());
            let rows = (start..end).map(|row| table.row(row));
            let rows = IdTable::from_rows(table.num_columns(), rows)?;
            Ok(IdTableVocabPair::new(rows, local_vocab.clone()))
        });
        Ok(QueryResult::new_lazy(
            self.table.num_columns(),
            batches,
            self.result_sorted_on(),
        ))
    }
}
