#![doc = include_str!("../README.md")]
#![doc(test(attr(deny(warnings))))]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod model {
    pub use sparql_exec_model::*;
}

pub mod common {
    pub use sparql_exec_common::*;
}

pub mod physical {
    pub use sparql_exec_physical::*;
}

pub mod engine {
    pub use sparql_exec_engine::*;
}

pub use sparql_exec_common::{EngineConfig, ExecutionError, ExecutionResult};
pub use sparql_exec_engine::operation::{Operation, OperationExt};
pub use sparql_exec_engine::result::QueryResult;
pub use sparql_exec_engine::ExecutionContext;
