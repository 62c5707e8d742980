use std::time::Duration;

use crate::config::DEFAULT_CONFLATION_WINDOW_US;
use crate::record::Record;

/// Decides whether an update is redundant with the last accepted one.
///
/// An update conflates when a previous record exists, the record type says
/// the two carry the same values (`Record::conflates_with`, bid/ask for ticks)
/// and the last accepted write is younger than the window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConflationPolicy {
    window_ns: u64,
}

impl Default for ConflationPolicy {
    fn default() -> Self {
        Self {
            window_ns: DEFAULT_CONFLATION_WINDOW_US * 1_000,
        }
    }
}

impl ConflationPolicy {
    pub fn new(window: Duration) -> Self {
        Self {
            window_ns: u64::try_from(window.as_nanos()).unwrap_or(u64::MAX),
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_nanos(self.window_ns)
    }

    /// `elapsed_ns` is the time since the last write that reached the ring.
    pub fn should_conflate<R: Record>(&self, candidate: &R, last: Option<&R>, elapsed_ns: u64) -> bool {
        match last {
            Some(last) => elapsed_ns < self.window_ns && candidate.conflates_with(last),
            None => false,
        }
    }
}
