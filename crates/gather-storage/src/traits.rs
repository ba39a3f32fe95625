use gather_core::{
    ContributorIdentity, Project, ProjectId, SchedulerPolicy, Task, TaskCandidate, TaskId,
    TaskRun, TaskState,
};

/// Result of attempting to persist a task run.
#[derive(Clone, Debug)]
pub enum InsertRunOutcome {
    /// The run was written. `answers` is the task's answer count read in the
    /// same transaction as the write, so redundancy evaluation observes at
    /// least its own write.
    Inserted { run: TaskRun, answers: u64 },
    /// A run for this `(task, contributor)` pair already exists. Losers of a
    /// concurrent race land here via the store's unique constraint, not via
    /// a pre-check.
    Duplicate,
    /// The task was no longer ongoing at write time.
    NotAccepting,
}

/// The single source of truth shared by all request-handling workers. No
/// in-process scheduler state is authoritative.
///
/// Implementations must enforce uniqueness of project short names and of
/// `(task, contributor)` task-run pairs, and must keep `insert_task_run`'s
/// state check, write and count in one atomic unit.
pub trait Storage: Send + Sync {
    fn insert_project(&self, project: Project) -> anyhow::Result<()>;
    fn project(&self, id: &ProjectId) -> anyhow::Result<Option<Project>>;
    fn project_by_short_name(&self, short_name: &str) -> anyhow::Result<Option<Project>>;
    fn projects(&self) -> anyhow::Result<Vec<Project>>;
    fn set_project_policy(&self, id: &ProjectId, policy: SchedulerPolicy) -> anyhow::Result<()>;

    /// Persists the task and assigns its monotonic `seq`; returns the stored
    /// task.
    fn insert_task(&self, task: Task) -> anyhow::Result<Task>;
    fn task(&self, id: &TaskId) -> anyhow::Result<Option<Task>>;
    fn project_tasks(&self, project_id: &ProjectId) -> anyhow::Result<Vec<Task>>;
    fn set_task_state(&self, id: &TaskId, state: TaskState) -> anyhow::Result<()>;
    /// The bulk redundancy-settings update: applies to every task in the
    /// project.
    fn set_project_n_answers(&self, project_id: &ProjectId, n_answers: u32) -> anyhow::Result<()>;
    /// Deletes all tasks of the project, cascading to their runs. Returns
    /// how many tasks were removed.
    fn delete_project_tasks(&self, project_id: &ProjectId) -> anyhow::Result<u64>;

    /// Ongoing tasks of the project with no run by this contributor, each
    /// paired with its current answer count. Pure read.
    fn candidate_tasks(
        &self,
        project_id: &ProjectId,
        contributor: &ContributorIdentity,
    ) -> anyhow::Result<Vec<TaskCandidate>>;

    fn insert_task_run(&self, run: TaskRun) -> anyhow::Result<InsertRunOutcome>;
    fn run_count(&self, task_id: &TaskId) -> anyhow::Result<u64>;
    fn project_runs(&self, project_id: &ProjectId) -> anyhow::Result<Vec<TaskRun>>;
}
