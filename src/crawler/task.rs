use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::crawler::update::ProcessingUpdate;

/// Identifier assigned to a task by the task store
pub type TaskId = u64;

/// Lifecycle of a crawl task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Initiating,
    TryingLinks,
    Interrupting,
    Interrupted,
    Finished,
    Error,
}

impl TaskStatus {
    /// Terminal states have no outgoing transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Finished | TaskStatus::Error | TaskStatus::Interrupted)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Initiating => "INITIATING",
            TaskStatus::TryingLinks => "TRYING_LINKS",
            TaskStatus::Interrupting => "INTERRUPTING",
            TaskStatus::Interrupted => "INTERRUPTED",
            TaskStatus::Finished => "FINISHED",
            TaskStatus::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// A crawl job and its current, observable snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Identifier, assigned when the task is first stored
    pub id: Option<TaskId>,

    /// Normalized page to crawl
    pub link: Url,

    /// Current lifecycle state
    pub status: TaskStatus,

    /// HTML version derived from the page DOCTYPE
    pub html_version: Option<String>,

    /// Contents of the page `<title>`
    pub page_title: Option<String>,

    /// Whether any form on the page has a password input
    pub login_form_present: Option<bool>,

    /// Number of `h1`..`h6` tags, h1 first
    pub headings_by_level: Option<[usize; 6]>,

    /// Distinct links pointing at the page's own host
    pub internal_links: Option<usize>,

    /// Distinct links pointing elsewhere
    pub external_links: Option<usize>,

    /// Link fetches that failed or returned 4xx/5xx
    pub inaccessible_links: Option<usize>,

    /// Link fetches completed so far
    pub crawled_links: usize,

    /// Failure description, only set in the ERROR state
    pub error: Option<String>,

    /// Creation timestamp, used to order listings
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Create a new, not yet stored, pending task
    pub fn new(link: Url) -> Self {
        Self {
            id: None,
            link,
            status: TaskStatus::Pending,
            html_version: None,
            page_title: None,
            login_form_present: None,
            headings_by_level: None,
            internal_links: None,
            external_links: None,
            inaccessible_links: None,
            crawled_links: 0,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// Fold a seeker update into this snapshot.
    ///
    /// Returns `false` when the update was discarded because the task is
    /// already terminal; callers must not publish in that case.
    pub fn apply(&mut self, update: ProcessingUpdate) -> bool {
        if self.status.is_terminal() {
            debug!("Discarding update for task {:?} in final state {}", self.id, self.status);
            return false;
        }

        match update {
            ProcessingUpdate::PageBaseInfo(info) => {
                self.html_version = info.html_version;
                self.page_title = Some(info.page_title);
                self.login_form_present = Some(info.login_form_present);
                self.headings_by_level = Some(info.headings_by_level);
                self.internal_links = Some(info.internal_links);
                self.external_links = Some(info.external_links);
                self.inaccessible_links = Some(0);
                if self.status == TaskStatus::Initiating {
                    self.status = TaskStatus::TryingLinks;
                }
            }
            ProcessingUpdate::LinkCrawled { outcome, .. } => {
                if outcome.is_inaccessible() {
                    *self.inaccessible_links.get_or_insert(0) += 1;
                }
                self.crawled_links += 1;
            }
            ProcessingUpdate::Error(cause) => {
                // An acknowledged interrupt can only end in INTERRUPTED
                if self.status == TaskStatus::Interrupting {
                    debug!("Task {:?} failed while interrupting: {}", self.id, cause);
                    self.status = TaskStatus::Interrupted;
                } else {
                    self.status = TaskStatus::Error;
                    self.error = Some(cause.to_string());
                }
            }
            ProcessingUpdate::Finished => {
                self.status = if self.status == TaskStatus::Interrupting {
                    TaskStatus::Interrupted
                } else {
                    TaskStatus::Finished
                };
            }
            ProcessingUpdate::Interrupted => {
                self.status = TaskStatus::Interrupted;
            }
        }

        true
    }

    /// Condensed view used for task listings
    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            id: self.id,
            link: self.link.to_string(),
            status: self.status,
            page_title: self.page_title.clone(),
            crawled_links: self.crawled_links,
            inaccessible_links: self.inaccessible_links,
            error: self.error.clone(),
        }
    }
}

/// Listing entry for a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    pub id: Option<TaskId>,
    pub link: String,
    pub status: TaskStatus,
    pub page_title: Option<String>,
    pub crawled_links: usize,
    pub inaccessible_links: Option<usize>,
    pub error: Option<String>,
}
