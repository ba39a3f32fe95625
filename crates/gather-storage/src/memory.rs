use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use gather_core::{
    ContributorIdentity, Project, ProjectId, SchedulerPolicy, Task, TaskCandidate, TaskId,
    TaskRun, TaskState,
};

use crate::traits::{InsertRunOutcome, Storage};

/// In-memory storage for tests. Not durable; the single mutex gives the same
/// check-write-count atomicity the sqlite store gets from its transaction.
#[derive(Default)]
pub struct InMemoryStorage {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    projects: HashMap<String, Project>,
    tasks: HashMap<String, Task>,
    runs: HashMap<String, TaskRun>,
    /// (task_id, contributor key) pairs, the stand-in for the unique index.
    run_keys: HashSet<(String, String)>,
    next_seq: i64,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for InMemoryStorage {
    fn insert_project(&self, project: Project) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner
            .projects
            .values()
            .any(|p| p.short_name == project.short_name)
        {
            anyhow::bail!("short name already taken: {}", project.short_name);
        }
        inner.projects.insert(project.id.0.clone(), project);
        Ok(())
    }

    fn project(&self, id: &ProjectId) -> anyhow::Result<Option<Project>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.projects.get(&id.0).cloned())
    }

    fn project_by_short_name(&self, short_name: &str) -> anyhow::Result<Option<Project>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .projects
            .values()
            .find(|p| p.short_name == short_name)
            .cloned())
    }

    fn projects(&self) -> anyhow::Result<Vec<Project>> {
        let inner = self.inner.lock().unwrap();
        let mut out: Vec<Project> = inner.projects.values().cloned().collect();
        out.sort_by(|a, b| a.short_name.cmp(&b.short_name));
        Ok(out)
    }

    fn set_project_policy(&self, id: &ProjectId, policy: SchedulerPolicy) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(p) = inner.projects.get_mut(&id.0) {
            p.policy = policy;
        }
        Ok(())
    }

    fn insert_task(&self, mut task: Task) -> anyhow::Result<Task> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_seq += 1;
        task.seq = inner.next_seq;
        inner.tasks.insert(task.id.0.clone(), task.clone());
        Ok(task)
    }

    fn task(&self, id: &TaskId) -> anyhow::Result<Option<Task>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.tasks.get(&id.0).cloned())
    }

    fn project_tasks(&self, project_id: &ProjectId) -> anyhow::Result<Vec<Task>> {
        let inner = self.inner.lock().unwrap();
        let mut tasks: Vec<Task> = inner
            .tasks
            .values()
            .filter(|t| t.project_id == *project_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.seq);
        Ok(tasks)
    }

    fn set_task_state(&self, id: &TaskId, state: TaskState) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(t) = inner.tasks.get_mut(&id.0) {
            t.state = state;
        }
        Ok(())
    }

    fn set_project_n_answers(&self, project_id: &ProjectId, n_answers: u32) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        for t in inner.tasks.values_mut() {
            if t.project_id == *project_id {
                t.n_answers = n_answers;
            }
        }
        Ok(())
    }

    fn delete_project_tasks(&self, project_id: &ProjectId) -> anyhow::Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let doomed: Vec<String> = inner
            .tasks
            .values()
            .filter(|t| t.project_id == *project_id)
            .map(|t| t.id.0.clone())
            .collect();
        for task_id in &doomed {
            inner.tasks.remove(task_id);
            inner.runs.retain(|_, r| r.task_id.0 != *task_id);
            inner.run_keys.retain(|(t, _)| t != task_id);
        }
        Ok(doomed.len() as u64)
    }

    fn candidate_tasks(
        &self,
        project_id: &ProjectId,
        contributor: &ContributorIdentity,
    ) -> anyhow::Result<Vec<TaskCandidate>> {
        let inner = self.inner.lock().unwrap();
        let key = contributor.key();
        let mut out = vec![];
        for t in inner.tasks.values() {
            if t.project_id != *project_id || t.state != TaskState::Ongoing {
                continue;
            }
            if inner.run_keys.contains(&(t.id.0.clone(), key.clone())) {
                continue;
            }
            let answers = inner.runs.values().filter(|r| r.task_id == t.id).count() as u64;
            out.push(TaskCandidate {
                task: t.clone(),
                answers,
            });
        }
        out.sort_by_key(|c| c.task.seq);
        Ok(out)
    }

    fn insert_task_run(&self, run: TaskRun) -> anyhow::Result<InsertRunOutcome> {
        let mut inner = self.inner.lock().unwrap();
        match inner.tasks.get(&run.task_id.0) {
            Some(t) if t.state == TaskState::Ongoing => {}
            _ => return Ok(InsertRunOutcome::NotAccepting),
        }
        let pair = (run.task_id.0.clone(), run.contributor.key());
        if !inner.run_keys.insert(pair) {
            return Ok(InsertRunOutcome::Duplicate);
        }
        inner.runs.insert(run.id.0.clone(), run.clone());
        let answers = inner.runs.values().filter(|r| r.task_id == run.task_id).count() as u64;
        Ok(InsertRunOutcome::Inserted { run, answers })
    }

    fn run_count(&self, task_id: &TaskId) -> anyhow::Result<u64> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.runs.values().filter(|r| r.task_id == *task_id).count() as u64)
    }

    fn project_runs(&self, project_id: &ProjectId) -> anyhow::Result<Vec<TaskRun>> {
        let inner = self.inner.lock().unwrap();
        let mut runs: Vec<TaskRun> = inner
            .runs
            .values()
            .filter(|r| r.project_id == *project_id)
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.created_at_unix);
        Ok(runs)
    }
}
