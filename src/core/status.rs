//! Status codes shared by every pipeline stage.
//!
//! Stages return `Result<T, Status>` and propagate codes unchanged up the
//! chain; `Ok` is the success side of the `Result`.

use std::fmt;

/// Non-success outcome of a pipeline operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// No data available right now; retry later. Not an error.
    Drain,
    /// End of stream; the chain should be closed.
    NoData,
    /// Allocation failed; the affected slot is marked broken.
    NoMem,
    /// Invalid configuration surfaced at an API boundary.
    BadConfig,
    /// Operation addressed a missing or mismatched interface.
    BadInterface,
    /// Fatal pipeline corruption; the session must terminate.
    Abort,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Drain => write!(f, "no data available, retry later"),
            Status::NoData => write!(f, "end of stream"),
            Status::NoMem => write!(f, "allocation failed"),
            Status::BadConfig => write!(f, "invalid configuration"),
            Status::BadInterface => write!(f, "invalid interface"),
            Status::Abort => write!(f, "pipeline aborted"),
        }
    }
}

impl std::error::Error for Status {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Status::Drain.to_string(), "no data available, retry later");
        assert_eq!(Status::Abort.to_string(), "pipeline aborted");
    }
}
