use sparql_exec_common::CacheStatus;
use std::fmt::{Display, Formatter};
use std::time::Duration;

/// The evaluation status of an operation as reported in [RuntimeInformation].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RuntimeStatus {
    /// The result was not requested yet.
    #[default]
    NotStarted,
    /// The result is currently being computed.
    InProgress,
    /// The result was computed and is fully materialized.
    FullyMaterialized,
    /// The result is lazy. Rows and time are updated while the batches are consumed.
    LazilyMaterialized,
    /// The computation failed.
    Failed,
    /// The computation was cancelled.
    Cancelled,
}

impl RuntimeStatus {
    /// Returns `true` if the computation failed or was cancelled.
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled)
    }
}

impl Display for RuntimeStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            RuntimeStatus::NotStarted => "not started",
            RuntimeStatus::InProgress => "in progress",
            RuntimeStatus::FullyMaterialized => "fully materialized",
            RuntimeStatus::LazilyMaterialized => "lazily materialized",
            RuntimeStatus::Failed => "failed",
            RuntimeStatus::Cancelled => "cancelled",
        };
        write!(f, "{status}")
    }
}

/// Statistics about the evaluation of an operation and its children.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RuntimeInformation {
    /// Describes the operation.
    pub descriptor: String,
    /// The number of result rows.
    pub num_rows: usize,
    /// The number of result columns.
    pub num_columns: usize,
    /// The time spent computing the result. Excludes the time spent in the children.
    pub time: Duration,
    /// Whether the result came from the cache.
    pub cache_status: Option<CacheStatus>,
    /// The size estimate of the operation.
    pub size_estimate: usize,
    /// The cost estimate of the operation.
    pub cost_estimate: usize,
    /// The evaluation status.
    pub status: RuntimeStatus,
    /// The runtime information of the children.
    pub children: Vec<RuntimeInformation>,
}

impl RuntimeInformation {
    /// Returns the total number of nodes in this tree.
    pub fn num_nodes(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(RuntimeInformation::num_nodes)
            .sum::<usize>()
    }

    /// Returns the first node in pre-order with the given descriptor.
    pub fn find(&self, descriptor: &str) -> Option<&RuntimeInformation> {
        if self.descriptor == descriptor {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(descriptor))
    }

    fn fmt_indented(&self, f: &mut Formatter<'_>, depth: usize) -> std::fmt::Result {
        let cache = match self.cache_status {
            None => "",
            Some(CacheStatus::Computed) => " computed",
            Some(CacheStatus::CachedNotPinned) => " cached",
            Some(CacheStatus::CachedPinned) => " cached (pinned)",
        };
        write!(
            f,
            "{:indent$}{} [{} x {}] {}{}",
            "",
            self.descriptor,
            self.num_rows,
            self.num_columns,
            self.status,
            cache,
            indent = depth * 2
        )?;
        for child in &self.children {
            writeln!(f)?;
            child.fmt_indented(f, depth + 1)?;
        }
        Ok(())
    }
}

/// Renders the tree without timings so that the output is deterministic.
impl Display for RuntimeInformation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.fmt_indented(f, 0)
    }
}
