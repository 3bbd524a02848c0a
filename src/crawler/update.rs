use reqwest::StatusCode;
use url::Url;

use crate::crawler::analyzer::PageBaseInfo;

/// Outcome of fetching a single discovered link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    /// The server answered with this HTTP status code
    Status(u16),

    /// The request never produced a response (DNS, refused connection, timeout...)
    TransportError,
}

impl LinkOutcome {
    /// Whether this outcome counts towards the task's inaccessible links
    pub fn is_inaccessible(&self) -> bool {
        match self {
            LinkOutcome::Status(code) => (400..600).contains(code),
            LinkOutcome::TransportError => true,
        }
    }
}

/// Reasons a seeker run ends in error
#[derive(Debug, thiserror::Error)]
pub enum SeekError {
    #[error("failed to GET initial page: {0}")]
    RootFetch(#[source] reqwest::Error),

    #[error("failed to GET initial page: unexpected status {0}")]
    RootStatus(StatusCode),

    #[error("failed to read initial page body: {0}")]
    RootBody(#[source] reqwest::Error),
}

/// Progress reported by a seeker to the worker driving it.
///
/// Every seeker run emits at most one `PageBaseInfo`, any number of
/// `LinkCrawled`, and exactly one of `Error`, `Finished` or `Interrupted` last.
#[derive(Debug)]
pub enum ProcessingUpdate {
    PageBaseInfo(PageBaseInfo),
    LinkCrawled { link: Url, outcome: LinkOutcome },
    Error(SeekError),
    Finished,
    Interrupted,
}

impl ProcessingUpdate {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessingUpdate::Error(_) | ProcessingUpdate::Finished | ProcessingUpdate::Interrupted
        )
    }
}
