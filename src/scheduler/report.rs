use serde::Serialize;
use std::collections::HashSet;

use crate::fetch::FetchTier;
use crate::ocr::FilterStats;

use super::TaskStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub task: usize,
    pub status: TaskStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub id: usize,
    pub url: String,
    pub status: TaskStatus,
    pub tier: Option<FetchTier>,
    pub blocks: usize,
    pub no_text: bool,
    pub filtered: Option<FilterStats>,
    pub error: Option<String>,
}

impl TaskReport {
    pub fn summary(&self) -> String {
        let via = self
            .tier
            .map(|tier| format!(" via {}", tier.as_str()))
            .unwrap_or_default();
        let detail = match (&self.error, self.no_text) {
            (Some(error), _) => error.clone(),
            (None, true) => "no text found".to_string(),
            (None, false) => format!("{} block(s)", self.blocks),
        };
        format!(
            "task {} {}{}: {} ({})",
            self.id,
            self.status.as_str(),
            via,
            detail,
            self.url
        )
    }
}

/// Result of one `run_loop`: a report per finished task plus every status
/// change in the order it happened.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub tasks: Vec<TaskReport>,
    pub transitions: Vec<Transition>,
}

impl ScanReport {
    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|task| task.status == status).count()
    }

    /// Highest number of tasks that were processing at the same time. A task
    /// that failed before dispatch never counts.
    pub fn max_in_flight(&self) -> usize {
        let mut active = HashSet::new();
        let mut peak = 0usize;
        for transition in &self.transitions {
            match transition.status {
                TaskStatus::Processing => {
                    active.insert(transition.task);
                    peak = peak.max(active.len());
                }
                TaskStatus::Done | TaskStatus::Failed => {
                    active.remove(&transition.task);
                }
                TaskStatus::Pending | TaskStatus::Queued => {}
            }
        }
        peak
    }

    pub fn position(&self, task: usize, status: TaskStatus) -> Option<usize> {
        self.transitions
            .iter()
            .position(|transition| transition.task == task && transition.status == status)
    }
}
