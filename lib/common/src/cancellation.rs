use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The state of a [CancellationHandle].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CancellationState {
    /// The query may continue.
    NotCancelled = 0,
    /// The query was cancelled by a call to [CancellationHandle::cancel].
    Manual = 1,
    /// The deadline of the query passed.
    Timeout = 2,
}

impl CancellationState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Manual,
            2 => Self::Timeout,
            _ => Self::NotCancelled,
        }
    }
}

impl Display for CancellationState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CancellationState::NotCancelled => f.write_str("not cancelled"),
            CancellationState::Manual => f.write_str("manual cancellation"),
            CancellationState::Timeout => f.write_str("timeout"),
        }
    }
}

/// The error raised by [CancellationHandle::check] once the query is cancelled.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("Query cancelled due to {reason} during {detail}")]
pub struct CancellationError {
    /// Why the query was cancelled.
    pub reason: CancellationState,
    /// Where the cancellation was observed. Usually the descriptor of an operation.
    pub detail: String,
}

const NO_DEADLINE: u64 = u64::MAX;

/// A flag that is shared by all operations of a query and checked cooperatively.
///
/// Long-running loops call [CancellationHandle::check] at bounded intervals and propagate the
/// resulting [CancellationError]. The handle can be cancelled from any thread.
#[derive(Debug)]
pub struct CancellationHandle {
    state: AtomicU8,
    /// Reference point for the deadline.
    created: Instant,
    /// Nanoseconds since `created` or [NO_DEADLINE].
    deadline: AtomicU64,
}

/// A [CancellationHandle] that is shared by the operations of a query.
pub type SharedCancellationHandle = Arc<CancellationHandle>;

impl Default for CancellationHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationHandle {
    /// Creates a new [CancellationHandle] that is not cancelled and has no deadline.
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(CancellationState::NotCancelled as u8),
            created: Instant::now(),
            deadline: AtomicU64::new(NO_DEADLINE),
        }
    }

    /// Creates a new [SharedCancellationHandle].
    pub fn new_shared() -> SharedCancellationHandle {
        Arc::new(Self::new())
    }

    /// Returns the current state.
    pub fn state(&self) -> CancellationState {
        CancellationState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Cancels the query. The first reason wins.
    ///
    /// Passing [CancellationState::NotCancelled] is a usage error and is ignored.
    pub fn cancel(&self, reason: CancellationState) {
        if reason == CancellationState::NotCancelled {
            tracing::warn!("Ignoring attempt to cancel a query with reason 'not cancelled'");
            return;
        }
        if let Err(current) = self.state.compare_exchange(
            CancellationState::NotCancelled as u8,
            reason as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            tracing::trace!(
                "Query is already cancelled due to {}, ignoring {reason}",
                CancellationState::from_u8(current)
            );
        }
    }

    /// Sets the point in time after which [Self::check] reports a timeout.
    pub fn set_deadline(&self, deadline: Instant) {
        let nanos = deadline.saturating_duration_since(self.created).as_nanos();
        let nanos = u64::try_from(nanos).unwrap_or(NO_DEADLINE - 1);
        self.deadline.store(nanos, Ordering::Release);
    }

    /// Sets the deadline to `timeout` from now.
    pub fn set_timeout(&self, timeout: Duration) {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.set_deadline(deadline),
            None => self.deadline.store(NO_DEADLINE, Ordering::Release),
        }
    }

    /// Returns `true` if the query was cancelled. Does not consider the deadline.
    pub fn is_cancelled(&self) -> bool {
        self.state() != CancellationState::NotCancelled
    }

    /// Returns an error if the query was cancelled or its deadline passed. A passed deadline
    /// moves the handle into [CancellationState::Timeout].
    ///
    /// `detail` is included in the error and should identify the caller.
    pub fn check(&self, detail: &str) -> Result<(), CancellationError> {
        if self.deadline_passed() {
            self.cancel(CancellationState::Timeout);
        }
        match self.state() {
            CancellationState::NotCancelled => Ok(()),
            reason => Err(CancellationError {
                reason,
                detail: detail.to_owned(),
            }),
        }
    }

    fn deadline_passed(&self) -> bool {
        let deadline = self.deadline.load(Ordering::Acquire);
        if deadline == NO_DEADLINE {
            return false;
        }
        self.created.elapsed() >= Duration::from_nanos(deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_reports_manual_cancellation() {
        let handle = CancellationHandle::new();
        assert!(handle.check("scan").is_ok());

        handle.cancel(CancellationState::Manual);
        let error = handle.check("scan").unwrap_err();
        assert_eq!(error.reason, CancellationState::Manual);
        assert_eq!(error.to_string(), "Query cancelled due to manual cancellation during scan");
    }

    #[test]
    fn first_reason_wins() {
        let handle = CancellationHandle::new();
        handle.cancel(CancellationState::Timeout);
        handle.cancel(CancellationState::Manual);
        assert_eq!(handle.state(), CancellationState::Timeout);
    }

    #[test]
    fn passed_deadline_keeps_manual_reason() {
        let handle = CancellationHandle::new();
        handle.cancel(CancellationState::Manual);
        handle.set_deadline(Instant::now());

        let error = handle.check("join").unwrap_err();
        assert_eq!(error.reason, CancellationState::Manual);
        assert_eq!(handle.state(), CancellationState::Manual);
    }

    #[test]
    fn not_cancelled_is_ignored() {
        let handle = CancellationHandle::new();
        handle.cancel(CancellationState::NotCancelled);
        assert!(!handle.is_cancelled());
    }

    #[test]
    fn passed_deadline_times_out() {
        let handle = CancellationHandle::new();
        handle.set_deadline(Instant::now());
        let error = handle.check("join").unwrap_err();
        assert_eq!(error.reason, CancellationState::Timeout);
        assert_eq!(handle.state(), CancellationState::Timeout);
    }

    #[test]
    fn future_deadline_does_not_cancel() {
        let handle = CancellationHandle::new();
        handle.set_timeout(Duration::from_secs(3600));
        assert!(handle.check("join").is_ok());
    }
}
