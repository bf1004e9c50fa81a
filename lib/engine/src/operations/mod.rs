//! The built-in operations.
//!
//! Leaf scans over the storage layer live outside of this crate. [ValuesTable] serves as a leaf
//! over an explicit table.

mod distinct;
mod exists_join;
mod join;
mod optional_join;
#[cfg(test)]
mod test_util;
mod values;

pub use distinct::Distinct;
pub use exists_join::ExistsJoin;
pub use join::Join;
pub use optional_join::OptionalJoin;
pub use values::ValuesTable;

use itertools::Itertools;
use sparql_exec_model::{ColumnIndex, IdTable};
use std::borrow::Cow;

/// Returns `table` if it is sorted on `columns`, and a sorted copy otherwise.
fn sorted_on<'table>(table: &'table IdTable, columns: &[ColumnIndex]) -> Cow<'table, IdTable> {
    if table.is_sorted_by(columns) {
        return Cow::Borrowed(table);
    }
    tracing::debug!(
        "Sorting copy of input with {} rows on columns [{}]",
        table.num_rows(),
        columns.iter().join(", ")
    );
    let mut table = table.clone();
    table.sort_by_columns(columns);
    Cow::Owned(table)
}

/// Scales a size estimate by a factor.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss,
    reason = "Estimates are approximate"
)]
fn scale_estimate(size: usize, factor: f32) -> usize {
    (size as f64 * f64::from(factor.max(0.0))).round() as usize
}

/// Computes the average multiplicity of the values in a column.
#[allow(clippy::cast_precision_loss, reason = "Estimates are approximate")]
fn multiplicity_of(table: &IdTable, column: ColumnIndex) -> f32 {
    let num_distinct = table.column(column).unique().count();
    if num_distinct == 0 {
        return 1.0;
    }
    table.num_rows() as f32 / num_distinct as f32
}

/// Renders join columns for cache keys and descriptors.
fn format_columns(columns: &[ColumnIndex]) -> String {
    format!("[{}]", columns.iter().join(", "))
}
