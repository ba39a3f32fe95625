use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use tracing::{debug, info};

use gather_core::{
    n_answers_in_range, ContributorIdentity, Project, ProjectId, SchedulerPolicy, SettingsError,
    SubmitError, SubmitError::*, Task, TaskId, TaskRun, TaskRunId, TaskState, valid_short_name,
    DEFAULT_N_ANSWERS,
};
use gather_sched::pick_next;
use gather_storage::{InsertRunOutcome, Storage};
use gather_storage_sqlite::SqliteStorage;

use crate::{allowed, now_unix, Action, Actor, Config, NoopCache, ProjectCache};

/// The imperative shell around storage: scheduling, the submission pipeline,
/// redundancy evaluation and the task-settings operations. Holds no
/// authoritative state of its own; the store is the single source of truth,
/// so any number of `Platform` handles (or processes) may run concurrently.
pub struct Platform {
    pub root: PathBuf,
    pub cfg: Config,
    pub storage: Arc<dyn Storage>,
    cache: Arc<dyn ProjectCache>,
}

impl Platform {
    pub fn open(root: PathBuf) -> Result<Self> {
        let cfg_path = Config::config_path(&root);
        let cfg = if cfg_path.exists() {
            Config::load_from(&cfg_path)?
        } else {
            let name = root
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("gather");
            let cfg = Config::default_for(name);
            cfg.save_to(&cfg_path)?;
            cfg
        };
        let storage = SqliteStorage::open(&cfg.db_path(&root))?;
        Ok(Self {
            root,
            cfg,
            storage: Arc::new(storage),
            cache: Arc::new(NoopCache),
        })
    }

    pub fn init(root: &Path) -> Result<()> {
        let cfg_path = Config::config_path(root);
        if !cfg_path.exists() {
            let name = root.file_name().and_then(|s| s.to_str()).unwrap_or("gather");
            Config::default_for(name).save_to(&cfg_path)?;
        }
        let cfg = Config::load_from(&cfg_path)?;
        let _ = SqliteStorage::open(&cfg.db_path(root))?;
        Ok(())
    }

    /// Test and embedding constructor: bring your own store and cache.
    pub fn with_storage(storage: Arc<dyn Storage>, cache: Arc<dyn ProjectCache>) -> Self {
        Self {
            root: PathBuf::from("."),
            cfg: Config::default_for("gather"),
            storage,
            cache,
        }
    }

    // ---- authoring -------------------------------------------------------

    pub fn create_project(
        &self,
        actor: &Actor,
        name: &str,
        short_name: &str,
        allow_anonymous: bool,
    ) -> Result<Project> {
        let owner = actor
            .user
            .clone()
            .ok_or_else(|| anyhow!("creating a project requires signing in"))?;
        if !valid_short_name(short_name) {
            bail!("invalid short name: {short_name:?} (lowercase letters, digits, - and _ only)");
        }
        let project = Project {
            id: ProjectId::new(),
            name: name.to_string(),
            short_name: short_name.to_string(),
            owner_id: owner,
            policy: SchedulerPolicy::Default,
            hidden: false,
            allow_anonymous,
        };
        self.storage.insert_project(project.clone())?;
        info!(short_name, "project created");
        Ok(project)
    }

    pub fn add_task(
        &self,
        actor: &Actor,
        project_id: &ProjectId,
        info: serde_json::Value,
        priority: f64,
        n_answers: Option<u32>,
    ) -> Result<Task> {
        let project = self
            .storage
            .project(project_id)?
            .ok_or_else(|| anyhow!("project not found: {}", project_id.as_str()))?;
        if !allowed(actor, &project, Action::Update) {
            bail!("only the project owner or an admin may add tasks");
        }
        let n_answers = n_answers.unwrap_or(DEFAULT_N_ANSWERS);
        if !n_answers_in_range(n_answers) {
            bail!("redundancy out of range: {n_answers}");
        }
        let task = self.storage.insert_task(Task {
            id: TaskId::new(),
            project_id: project_id.clone(),
            state: TaskState::Ongoing,
            priority,
            n_answers,
            seq: 0,
            info,
            created_at_unix: now_unix(),
        })?;
        self.cache.invalidate(project_id);
        Ok(task)
    }

    // ---- scheduling ------------------------------------------------------

    /// Pick the next eligible task for this contributor, or `None` when the
    /// project is exhausted for them. A pure read: viewing a task never
    /// reserves it.
    pub fn next_task(
        &self,
        project_id: &ProjectId,
        identity: &ContributorIdentity,
    ) -> Result<Option<Task>> {
        let project = self
            .storage
            .project(project_id)?
            .ok_or_else(|| anyhow!("project not found: {}", project_id.as_str()))?;
        if identity.is_anonymous() && !project.allow_anonymous {
            bail!("project {} requires signing in to contribute", project.short_name);
        }
        let candidates = self.storage.candidate_tasks(project_id, identity)?;
        let picked = pick_next(&candidates, &project.policy).map(|c| c.task.clone());
        debug!(
            project = %project.short_name,
            policy = project.policy.as_str(),
            candidates = candidates.len(),
            picked = ?picked.as_ref().map(|t| t.id.as_str()),
            "next_task"
        );
        Ok(picked)
    }

    // ---- submission ------------------------------------------------------

    pub fn submit(
        &self,
        project_id: &ProjectId,
        task_id: &TaskId,
        identity: &ContributorIdentity,
        payload: serde_json::Value,
    ) -> Result<TaskRun, SubmitError> {
        let task = self
            .storage
            .task(task_id)?
            .ok_or(TaskNotAcceptingAnswers)?;
        if task.project_id != *project_id {
            return Err(TaskProjectMismatch);
        }
        let project = self
            .storage
            .project(project_id)?
            .ok_or_else(|| anyhow!("project not found: {}", project_id.as_str()))?;
        if identity.is_anonymous() && !project.allow_anonymous {
            return Err(AnonymousNotAllowed);
        }
        if task.state != TaskState::Ongoing {
            return Err(TaskNotAcceptingAnswers);
        }

        let run = TaskRun {
            id: TaskRunId::new(),
            task_id: task_id.clone(),
            project_id: project_id.clone(),
            contributor: identity.clone(),
            info: payload,
            created_at_unix: now_unix(),
        };
        // No pre-check: the store's unique (task, contributor) constraint
        // settles concurrent submissions from the same identity.
        let outcome = self.storage.insert_task_run(run)?;
        match outcome {
            InsertRunOutcome::Duplicate => Err(DuplicateAnswer),
            InsertRunOutcome::NotAccepting => Err(TaskNotAcceptingAnswers),
            InsertRunOutcome::Inserted { run, answers } => {
                debug!(
                    task = task_id.as_str(),
                    contributor = %run.contributor.key(),
                    answers,
                    "task run accepted"
                );
                self.evaluate(task_id)?;
                self.cache.invalidate(project_id);
                Ok(run)
            }
        }
    }

    // ---- redundancy ------------------------------------------------------

    /// Recount answers and promote the task to completed once the target is
    /// met. Idempotent; a completed task is never reopened, even if its
    /// target was raised afterwards.
    pub fn evaluate(&self, task_id: &TaskId) -> Result<TaskState> {
        let task = self
            .storage
            .task(task_id)?
            .ok_or_else(|| anyhow!("task not found: {}", task_id.as_str()))?;
        if task.state == TaskState::Completed {
            return Ok(TaskState::Completed);
        }
        let received = self.storage.run_count(task_id)?;
        if received >= task.n_answers as u64 {
            self.storage.set_task_state(task_id, TaskState::Completed)?;
            info!(
                task = task_id.as_str(),
                received,
                target = task.n_answers,
                "task reached its redundancy target"
            );
            Ok(TaskState::Completed)
        } else {
            Ok(TaskState::Ongoing)
        }
    }

    // ---- settings --------------------------------------------------------

    /// Change the answer target for every task in the project (the original
    /// redundancy form applies project-wide), then re-evaluate ongoing tasks
    /// since a lowered target may complete them immediately.
    pub fn set_redundancy(
        &self,
        actor: &Actor,
        project_id: &ProjectId,
        n_answers: u32,
    ) -> Result<(), SettingsError> {
        if !n_answers_in_range(n_answers) {
            return Err(SettingsError::InvalidRedundancy { got: n_answers });
        }
        let project = self.project_for_update(actor, project_id)?;
        self.storage.set_project_n_answers(project_id, n_answers)?;
        for task in self.storage.project_tasks(project_id)? {
            if task.state == TaskState::Ongoing {
                self.evaluate(&task.id)?;
            }
        }
        self.cache.invalidate(project_id);
        info!(project = %project.short_name, n_answers, "redundancy updated");
        Ok(())
    }

    pub fn set_policy(
        &self,
        actor: &Actor,
        project_id: &ProjectId,
        policy: SchedulerPolicy,
    ) -> Result<(), SettingsError> {
        let project = self.project_for_update(actor, project_id)?;
        self.storage.set_project_policy(project_id, policy.clone())?;
        self.cache.invalidate(project_id);
        info!(project = %project.short_name, policy = policy.as_str(), "scheduler updated");
        Ok(())
    }

    /// Deletes every task of the project together with its task runs.
    pub fn delete_all_tasks(
        &self,
        actor: &Actor,
        project_id: &ProjectId,
    ) -> Result<u64, SettingsError> {
        let project = self.project_for_update(actor, project_id)?;
        let n = self.storage.delete_project_tasks(project_id)?;
        self.cache.invalidate(project_id);
        info!(project = %project.short_name, deleted = n, "tasks deleted");
        Ok(n)
    }

    fn project_for_update(
        &self,
        actor: &Actor,
        project_id: &ProjectId,
    ) -> Result<Project, SettingsError> {
        let project = self
            .storage
            .project(project_id)?
            .ok_or(SettingsError::ProjectNotFound)?;
        if !allowed(actor, &project, Action::Update) {
            return Err(SettingsError::Forbidden);
        }
        Ok(project)
    }
}
