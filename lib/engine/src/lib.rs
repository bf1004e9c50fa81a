#![doc(test(attr(deny(warnings))))]

//! The execution engine evaluates planned query trees.
//!
//! Each node of a tree implements [Operation](operation::Operation). Results are requested with
//! [OperationExt::get_result](operation::OperationExt::get_result), which deduplicates identical
//! computations with the query result cache of the [ExecutionContext]. Results are either fully
//! materialized or lazy sequences of batches ([QueryResult](result::QueryResult)).

mod context;
pub mod operation;
pub mod operations;
pub mod result;

pub use context::{ExecutionContext, QueryResultCache};
