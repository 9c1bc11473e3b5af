//! The unit of work flowing through the stages.

use eddy_types::Page;
use url::Url;

/// Per-task lifecycle state. Retries are sub-transitions within `Fetching`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Admitted,
    Fetching,
    Processing,
    Rewriting,
    Emitting,
    Done,
    Failed,
}

/// One URL's journey through the pipeline. A task has exactly one owner at
/// any instant; ownership transfers on every queue send.
#[derive(Debug)]
pub struct CrawlTask {
    /// Normalized absolute URL.
    pub url: Url,
    /// Limiter / admission domain key.
    pub domain: String,
    /// Link depth; seeds are 0.
    pub depth: usize,
    /// Seeds get a CrawlResult even when admission rejects them.
    pub seed: bool,
    /// Fetch attempts already made.
    pub attempt: u32,
    pub state: TaskState,
    /// Present from fetch onward.
    pub page: Option<Page>,
    /// Last observed HTTP status.
    pub status: Option<u16>,
}

impl CrawlTask {
    pub fn new(url: Url, domain: String, depth: usize, seed: bool) -> Self {
        Self {
            url,
            domain,
            depth,
            seed,
            attempt: 0,
            state: TaskState::Admitted,
            page: None,
            status: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_starts_admitted() {
        let url = Url::parse("https://example.com/").unwrap();
        let task = CrawlTask::new(url, "example.com".into(), 0, true);
        assert_eq!(task.state, TaskState::Admitted);
        assert_eq!(task.attempt, 0);
        assert!(task.page.is_none());
    }
}
