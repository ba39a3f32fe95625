use std::cmp::Ordering;

use rand::RngExt;

use gather_core::{SchedulerPolicy, TaskCandidate};

/// Pick the next task for a contributor from the candidate set.
///
/// The candidate set is produced by storage and already excludes completed
/// tasks and tasks this contributor has answered; the policy only decides
/// the ordering, never membership. Selection has no side effects: a task is
/// not reserved by being viewed, so concurrent contributors may be handed
/// the same task and the submission pipeline settles who gets counted.
///
/// Ties under every deterministic policy break by ascending creation order.
pub fn pick_next<'a>(
    candidates: &'a [TaskCandidate],
    policy: &SchedulerPolicy,
) -> Option<&'a TaskCandidate> {
    if candidates.is_empty() {
        return None;
    }
    match policy {
        SchedulerPolicy::Default => candidates.iter().min_by(|a, b| {
            b.task
                .priority
                .total_cmp(&a.task.priority)
                .then(a.task.seq.cmp(&b.task.seq))
        }),
        SchedulerPolicy::BreadthFirst => candidates
            .iter()
            .min_by(|a, b| a.answers.cmp(&b.answers).then(by_seq(a, b))),
        SchedulerPolicy::DepthFirst => candidates
            .iter()
            .min_by(|a, b| b.answers.cmp(&a.answers).then(by_seq(a, b))),
        SchedulerPolicy::Random => {
            let idx = rand::rng().random_range(0..candidates.len());
            candidates.get(idx)
        }
    }
}

fn by_seq(a: &TaskCandidate, b: &TaskCandidate) -> Ordering {
    a.task.seq.cmp(&b.task.seq)
}
