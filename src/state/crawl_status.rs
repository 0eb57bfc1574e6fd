/// Crawl status definitions for tracking a job's lifecycle
///
/// A crawl attempt moves `queued → running → {done | error}`. Terminal states
/// never move back on their own; re-queuing a job is an explicit reset done by
/// the storage layer, outside this state machine.
use std::fmt;

/// Represents the current status of a crawl job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrawlStatus {
    /// Job is waiting for a worker
    Queued,

    /// A worker is crawling the job right now
    Running,

    /// The last attempt completed the full pipeline
    Done,

    /// The last attempt failed (fetch error, bad status, unsupported content,
    /// cancellation or deadline)
    Error,
}

impl CrawlStatus {
    /// Returns true if this is a terminal state for the current attempt
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    /// Returns true if the crawl state machine allows moving to `next`
    pub fn can_transition_to(&self, next: CrawlStatus) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Running) | (Self::Running, Self::Done) | (Self::Running, Self::Error)
        )
    }

    /// Converts the status to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Done => "done",
            Self::Error => "error",
        }
    }

    /// Parses a status from its database string representation
    ///
    /// Returns None if the string doesn't match any known status.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "done" => Some(Self::Done),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Returns all statuses in lifecycle order
    pub fn all() -> [Self; 4] {
        [Self::Queued, Self::Running, Self::Done, Self::Error]
    }
}

impl fmt::Display for CrawlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.to_db_string())
    }
}
