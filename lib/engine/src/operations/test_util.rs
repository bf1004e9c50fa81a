use crate::context::ExecutionContext;
use crate::operation::Operation;
use crate::operations::ValuesTable;
use crate::result::QueryResult;
use sparql_exec_model::{Id, IdTable, LocalVocab};
use std::sync::Arc;

pub(crate) const U: Id = Id::Undefined;

pub(crate) fn int(value: i64) -> Id {
    Id::Int(value)
}

pub(crate) fn values<const N: usize>(
    context: &ExecutionContext,
    rows: &[[Id; N]],
) -> Arc<dyn Operation> {
    let table = IdTable::from_rows(N, rows).unwrap();
    Arc::new(ValuesTable::new(context.clone(), table, LocalVocab::new()))
}

pub(crate) fn rows_of(result: &QueryResult) -> Vec<Vec<Id>> {
    result
        .id_table()
        .unwrap()
        .rows()
        .map(<[Id]>::to_vec)
        .collect()
}
