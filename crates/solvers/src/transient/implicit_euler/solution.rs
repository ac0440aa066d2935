/// Indicates how an integration request terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Reached the target time exactly.
    Complete,

    /// Stopped early due to an observer action.
    StoppedByObserver,
}

/// The result of integrating to a target time.
///
/// The integrated state itself lives in the context that was advanced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Solution {
    /// How the integration terminated.
    pub status: Status,

    /// Number of steps committed during this request.
    pub steps: usize,
}
