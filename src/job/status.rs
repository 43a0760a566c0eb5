use serde::{Deserialize, Serialize};

/// Lifecycle status of a job.
///
/// Allowed transitions:
///
/// ```text
/// pending  -> queued | cancelled
/// queued   -> running | cancelled
/// running  -> completed | failed | cancelled | retrying
/// retrying -> queued | failed | cancelled
/// ```
///
/// `completed`, `failed` and `cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
    Retrying,
}

impl JobStatus {
    pub const ALL: [JobStatus; 7] = [
        JobStatus::Pending,
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
        JobStatus::Retrying,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Retrying => "retrying",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match self {
            Pending => matches!(next, Queued | Cancelled),
            Queued => matches!(next, Running | Cancelled),
            Running => matches!(next, Completed | Failed | Cancelled | Retrying),
            Retrying => matches!(next, Queued | Failed | Cancelled),
            Completed | Failed | Cancelled => false,
        }
    }

    /// True if `target` can be reached from this status through one or more
    /// allowed transitions.
    pub fn can_reach(&self, target: JobStatus) -> bool {
        let mut seen = [false; JobStatus::ALL.len()];
        let mut frontier = vec![*self];
        while let Some(status) = frontier.pop() {
            for next in JobStatus::ALL {
                if !status.can_transition_to(next) || seen[next as usize] {
                    continue;
                }
                if next == target {
                    return true;
                }
                seen[next as usize] = true;
                frontier.push(next);
            }
        }
        false
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = crate::error::JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| crate::error::JobError::validation(format!("unknown job status: {}", s)))
    }
}
