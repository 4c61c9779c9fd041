use crate::{pipeline::Stage, result::FailureKind};

/// Raw user input: a video or playlist id, or a link to one
#[derive(Debug, Clone)]
pub struct WorkItem(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed { artifacts: usize, bytes: u64 },
    /// Already delivered to this destination by a previous run
    Skipped,
    Failed {
        stage: Stage,
        kind: FailureKind,
        message: String,
    },
}

/// Result of one video, sent in input order
#[derive(Debug, Clone)]
pub struct ItemReport {
    pub id: String,
    pub outcome: Outcome,
}

/// Counts of a whole batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl Summary {
    pub fn record(&mut self, report: &ItemReport) {
        match report.outcome {
            Outcome::Completed { .. } => self.completed += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Failed { .. } => self.failed += 1,
        }
    }
}
