use crate::{identity::ContributorIdentity, ids::*, model::*};

#[derive(Clone, Debug)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub short_name: String,
    pub owner_id: UserId,
    pub policy: SchedulerPolicy,
    pub hidden: bool,
    pub allow_anonymous: bool,
}

#[derive(Clone, Debug)]
pub struct Task {
    pub id: TaskId,
    pub project_id: ProjectId,
    pub state: TaskState,
    pub priority: f64,
    pub n_answers: u32,
    /// Storage-assigned monotonic creation order, used for tie-breaks and
    /// breadth/depth-first ordering.
    pub seq: i64,
    pub info: serde_json::Value,
    pub created_at_unix: i64,
}

#[derive(Clone, Debug)]
pub struct TaskRun {
    pub id: TaskRunId,
    pub task_id: TaskId,
    pub project_id: ProjectId,
    pub contributor: ContributorIdentity,
    pub info: serde_json::Value,
    pub created_at_unix: i64,
}

/// A task eligible for scheduling, paired with how many answers it already
/// has. The storage layer produces these; the scheduler only orders them.
#[derive(Clone, Debug)]
pub struct TaskCandidate {
    pub task: Task,
    pub answers: u64,
}

/// Short names appear in URLs and must be globally unique.
pub fn valid_short_name(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_name_rules() {
        assert!(valid_short_name("bird-count"));
        assert!(valid_short_name("flickr_person_2"));
        assert!(!valid_short_name(""));
        assert!(!valid_short_name("Bird Count"));
        assert!(!valid_short_name("birds/2024"));
    }
}
