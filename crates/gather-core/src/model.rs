use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskState {
    Ongoing,
    Completed,
}

/// Per-project ordering strategy for `next_task`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum SchedulerPolicy {
    Default,
    BreadthFirst,
    DepthFirst,
    Random,
}

impl SchedulerPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerPolicy::Default => "default",
            SchedulerPolicy::BreadthFirst => "breadth_first",
            SchedulerPolicy::DepthFirst => "depth_first",
            SchedulerPolicy::Random => "random",
        }
    }

    /// Lenient parse: an unknown setting falls back to the default policy
    /// rather than failing the request.
    pub fn parse(s: &str) -> Self {
        match s {
            "breadth_first" => SchedulerPolicy::BreadthFirst,
            "depth_first" => SchedulerPolicy::DepthFirst,
            "random" => SchedulerPolicy::Random,
            _ => SchedulerPolicy::Default,
        }
    }
}

/// Answers a task must collect before it is considered complete.
pub const DEFAULT_N_ANSWERS: u32 = 30;
pub const MIN_N_ANSWERS: u32 = 1;
pub const MAX_N_ANSWERS: u32 = 1000;

pub fn n_answers_in_range(n: u32) -> bool {
    (MIN_N_ANSWERS..=MAX_N_ANSWERS).contains(&n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_round_trips_and_falls_back() {
        for p in [
            SchedulerPolicy::Default,
            SchedulerPolicy::BreadthFirst,
            SchedulerPolicy::DepthFirst,
            SchedulerPolicy::Random,
        ] {
            assert_eq!(SchedulerPolicy::parse(p.as_str()), p);
        }
        assert_eq!(SchedulerPolicy::parse("incremental"), SchedulerPolicy::Default);
        assert_eq!(SchedulerPolicy::parse(""), SchedulerPolicy::Default);
    }

    #[test]
    fn n_answers_range() {
        assert!(n_answers_in_range(1));
        assert!(n_answers_in_range(30));
        assert!(n_answers_in_range(1000));
        assert!(!n_answers_in_range(0));
        assert!(!n_answers_in_range(1001));
    }
}
