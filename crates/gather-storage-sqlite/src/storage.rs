use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};

use gather_core::{
    ContributorIdentity, Project, ProjectId, SchedulerPolicy, Task, TaskCandidate, TaskId,
    TaskRun, TaskRunId, TaskState, UserId,
};
use gather_storage::{InsertRunOutcome, Storage};

pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("open sqlite db {}", db_path.display()))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let init_sql = include_str!("../migrations/0001_init.sql");
        conn.execute_batch(init_sql)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn state_to_str(s: &TaskState) -> &'static str {
        match s {
            TaskState::Ongoing => "ongoing",
            TaskState::Completed => "completed",
        }
    }

    fn str_to_state(s: &str) -> TaskState {
        match s {
            "completed" => TaskState::Completed,
            _ => TaskState::Ongoing,
        }
    }

    /// (user_id, user_ip) column pair; exactly one is Some.
    fn contributor_cols(c: &ContributorIdentity) -> (Option<&str>, Option<&str>) {
        match c {
            ContributorIdentity::Authenticated(user) => (Some(user.as_str()), None),
            ContributorIdentity::Anonymous(addr) => (None, Some(addr.as_str())),
        }
    }

    fn row_to_task(r: &Row<'_>) -> rusqlite::Result<Task> {
        let info_json: String = r.get(6)?;
        let info = serde_json::from_str(&info_json).unwrap_or(serde_json::Value::Null);
        Ok(Task {
            id: TaskId::from_str(r.get::<_, String>(0)?),
            project_id: ProjectId::from_str(r.get::<_, String>(1)?),
            state: Self::str_to_state(&r.get::<_, String>(2)?),
            priority: r.get(3)?,
            n_answers: r.get::<_, i64>(4)? as u32,
            seq: r.get(5)?,
            info,
            created_at_unix: r.get(7)?,
        })
    }

    fn row_to_project(r: &Row<'_>) -> rusqlite::Result<Project> {
        Ok(Project {
            id: ProjectId::from_str(r.get::<_, String>(0)?),
            name: r.get(1)?,
            short_name: r.get(2)?,
            owner_id: UserId::from_str(r.get::<_, String>(3)?),
            policy: SchedulerPolicy::parse(&r.get::<_, String>(4)?),
            hidden: r.get::<_, i64>(5)? != 0,
            allow_anonymous: r.get::<_, i64>(6)? != 0,
        })
    }

    fn row_to_run(r: &Row<'_>) -> rusqlite::Result<TaskRun> {
        let user_id: Option<String> = r.get(3)?;
        let user_ip: Option<String> = r.get(4)?;
        let contributor = match user_id {
            Some(id) => ContributorIdentity::Authenticated(UserId::from_str(id)),
            None => ContributorIdentity::Anonymous(user_ip.unwrap_or_default()),
        };
        let info_json: String = r.get(5)?;
        let info = serde_json::from_str(&info_json).unwrap_or(serde_json::Value::Null);
        Ok(TaskRun {
            id: TaskRunId::from_str(r.get::<_, String>(0)?),
            task_id: TaskId::from_str(r.get::<_, String>(1)?),
            project_id: ProjectId::from_str(r.get::<_, String>(2)?),
            contributor,
            info,
            created_at_unix: r.get(6)?,
        })
    }

    fn is_unique_violation(e: &rusqlite::Error) -> bool {
        matches!(
            e,
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

const TASK_COLS: &str = "id, project_id, state, priority, n_answers, seq, info_json, created_at";
const RUN_COLS: &str = "id, task_id, project_id, user_id, user_ip, info_json, created_at";

impl Storage for SqliteStorage {
    fn insert_project(&self, project: Project) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO projects(id, name, short_name, owner_id, policy, hidden, allow_anonymous)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                project.id.0,
                project.name,
                project.short_name,
                project.owner_id.0,
                project.policy.as_str(),
                project.hidden as i64,
                project.allow_anonymous as i64
            ],
        )
        .map_err(|e| {
            if Self::is_unique_violation(&e) {
                anyhow::anyhow!("short name already taken: {}", project.short_name)
            } else {
                e.into()
            }
        })?;
        Ok(())
    }

    fn project(&self, id: &ProjectId) -> Result<Option<Project>> {
        let conn = self.conn.lock().unwrap();
        let p = conn
            .query_row(
                "SELECT id, name, short_name, owner_id, policy, hidden, allow_anonymous
                 FROM projects WHERE id=?1",
                params![id.0],
                Self::row_to_project,
            )
            .optional()?;
        Ok(p)
    }

    fn project_by_short_name(&self, short_name: &str) -> Result<Option<Project>> {
        let conn = self.conn.lock().unwrap();
        let p = conn
            .query_row(
                "SELECT id, name, short_name, owner_id, policy, hidden, allow_anonymous
                 FROM projects WHERE short_name=?1",
                params![short_name],
                Self::row_to_project,
            )
            .optional()?;
        Ok(p)
    }

    fn projects(&self) -> Result<Vec<Project>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, short_name, owner_id, policy, hidden, allow_anonymous
             FROM projects ORDER BY short_name",
        )?;
        let rows = stmt.query_map([], Self::row_to_project)?;
        let mut out = vec![];
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn set_project_policy(&self, id: &ProjectId, policy: SchedulerPolicy) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE projects SET policy=?1 WHERE id=?2",
            params![policy.as_str(), id.0],
        )?;
        Ok(())
    }

    fn insert_task(&self, mut task: Task) -> Result<Task> {
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;
        let seq: i64 = tx.query_row("SELECT COALESCE(MAX(seq), 0) + 1 FROM tasks", [], |r| {
            r.get(0)
        })?;
        task.seq = seq;
        let info_json = serde_json::to_string(&task.info)?;
        tx.execute(
            "INSERT INTO tasks(id, project_id, state, priority, n_answers, seq, info_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                task.id.0,
                task.project_id.0,
                Self::state_to_str(&task.state),
                task.priority,
                task.n_answers as i64,
                task.seq,
                info_json,
                task.created_at_unix
            ],
        )?;
        tx.commit()?;
        Ok(task)
    }

    fn task(&self, id: &TaskId) -> Result<Option<Task>> {
        let conn = self.conn.lock().unwrap();
        let t = conn
            .query_row(
                &format!("SELECT {TASK_COLS} FROM tasks WHERE id=?1"),
                params![id.0],
                Self::row_to_task,
            )
            .optional()?;
        Ok(t)
    }

    fn project_tasks(&self, project_id: &ProjectId) -> Result<Vec<Task>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLS} FROM tasks WHERE project_id=?1 ORDER BY seq"
        ))?;
        let rows = stmt.query_map(params![project_id.0], Self::row_to_task)?;
        let mut tasks = vec![];
        for row in rows {
            tasks.push(row?);
        }
        Ok(tasks)
    }

    fn set_task_state(&self, id: &TaskId, state: TaskState) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE tasks SET state=?1 WHERE id=?2",
            params![Self::state_to_str(&state), id.0],
        )?;
        Ok(())
    }

    fn set_project_n_answers(&self, project_id: &ProjectId, n_answers: u32) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE tasks SET n_answers=?1 WHERE project_id=?2",
            params![n_answers as i64, project_id.0],
        )?;
        Ok(())
    }

    fn delete_project_tasks(&self, project_id: &ProjectId) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "DELETE FROM tasks WHERE project_id=?1",
            params![project_id.0],
        )?;
        Ok(n as u64)
    }

    fn candidate_tasks(
        &self,
        project_id: &ProjectId,
        contributor: &ContributorIdentity,
    ) -> Result<Vec<TaskCandidate>> {
        let conn = self.conn.lock().unwrap();
        let (user_id, user_ip) = Self::contributor_cols(contributor);
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLS},
                    (SELECT COUNT(1) FROM task_runs r WHERE r.task_id = tasks.id) AS answers
             FROM tasks
             WHERE project_id=?1 AND state='ongoing'
               AND NOT EXISTS (
                 SELECT 1 FROM task_runs r WHERE r.task_id = tasks.id
                   AND ((?2 IS NOT NULL AND r.user_id = ?2)
                     OR (?3 IS NOT NULL AND r.user_ip = ?3))
               )
             ORDER BY seq"
        ))?;
        let rows = stmt.query_map(params![project_id.0, user_id, user_ip], |r| {
            let task = Self::row_to_task(r)?;
            let answers: i64 = r.get(8)?;
            Ok(TaskCandidate {
                task,
                answers: answers as u64,
            })
        })?;
        let mut out = vec![];
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// The state check, insert and count run inside one transaction behind
    /// the connection mutex; a duplicate is decided by the unique index, not
    /// by a pre-check.
    fn insert_task_run(&self, run: TaskRun) -> Result<InsertRunOutcome> {
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;

        let state: Option<String> = tx
            .query_row(
                "SELECT state FROM tasks WHERE id=?1",
                params![run.task_id.0],
                |r| r.get(0),
            )
            .optional()?;
        match state.as_deref() {
            Some("ongoing") => {}
            _ => {
                tx.commit()?;
                return Ok(InsertRunOutcome::NotAccepting);
            }
        }

        let (user_id, user_ip) = Self::contributor_cols(&run.contributor);
        let info_json = serde_json::to_string(&run.info)?;
        let res = tx.execute(
            "INSERT INTO task_runs(id, task_id, project_id, user_id, user_ip, info_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                run.id.0,
                run.task_id.0,
                run.project_id.0,
                user_id,
                user_ip,
                info_json,
                run.created_at_unix
            ],
        );

        match res {
            Ok(_) => {
                let answers: i64 = tx.query_row(
                    "SELECT COUNT(1) FROM task_runs WHERE task_id=?1",
                    params![run.task_id.0],
                    |r| r.get(0),
                )?;
                tx.commit()?;
                Ok(InsertRunOutcome::Inserted {
                    run,
                    answers: answers as u64,
                })
            }
            Err(e) if Self::is_unique_violation(&e) => {
                tx.commit()?;
                Ok(InsertRunOutcome::Duplicate)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn run_count(&self, task_id: &TaskId) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let n: i64 = conn.query_row(
            "SELECT COUNT(1) FROM task_runs WHERE task_id=?1",
            params![task_id.0],
            |r| r.get(0),
        )?;
        Ok(n as u64)
    }

    fn project_runs(&self, project_id: &ProjectId) -> Result<Vec<TaskRun>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {RUN_COLS} FROM task_runs WHERE project_id=?1 ORDER BY created_at"
        ))?;
        let rows = stmt.query_map(params![project_id.0], Self::row_to_run)?;
        let mut out = vec![];
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn open_store(dir: &tempfile::TempDir) -> SqliteStorage {
        SqliteStorage::open(&dir.path().join("gather.db")).unwrap()
    }

    fn seed_project(store: &SqliteStorage, id: &str, short: &str) {
        store
            .insert_project(Project {
                id: ProjectId::from_str(id),
                name: short.to_string(),
                short_name: short.to_string(),
                owner_id: UserId::from_str("owner"),
                policy: SchedulerPolicy::Default,
                hidden: false,
                allow_anonymous: true,
            })
            .unwrap();
    }

    fn seed_task(store: &SqliteStorage, id: &str, project_id: &str, priority: f64) -> Task {
        store
            .insert_task(Task {
                id: TaskId::from_str(id),
                project_id: ProjectId::from_str(project_id),
                state: TaskState::Ongoing,
                priority,
                n_answers: 30,
                seq: 0,
                info: serde_json::json!({"question": "?"}),
                created_at_unix: 0,
            })
            .unwrap()
    }

    fn new_run(task_id: &str, project_id: &str, who: ContributorIdentity) -> TaskRun {
        TaskRun {
            id: TaskRunId::new(),
            task_id: TaskId::from_str(task_id),
            project_id: ProjectId::from_str(project_id),
            contributor: who,
            info: serde_json::json!({"answer": 1}),
            created_at_unix: 0,
        }
    }

    #[test]
    fn open_and_migrate() {
        let dir = tempdir().unwrap();
        let _ = open_store(&dir);
        // idempotent re-open
        let _ = open_store(&dir);
    }

    #[test]
    fn short_name_unique_index_rejects_reuse() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        seed_project(&store, "p1", "birds");
        let err = store
            .insert_project(Project {
                id: ProjectId::from_str("p2"),
                name: "other".into(),
                short_name: "birds".into(),
                owner_id: UserId::from_str("owner"),
                policy: SchedulerPolicy::Default,
                hidden: false,
                allow_anonymous: true,
            })
            .unwrap_err();
        assert!(err.to_string().contains("short name"));
    }

    #[test]
    fn seq_is_assigned_monotonically() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        seed_project(&store, "p1", "birds");
        let t1 = seed_task(&store, "t1", "p1", 0.0);
        let t2 = seed_task(&store, "t2", "p1", 0.0);
        assert!(t2.seq > t1.seq);
    }

    #[test]
    fn unique_constraint_rejects_duplicate_for_both_variants() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        seed_project(&store, "p1", "birds");
        seed_task(&store, "t1", "p1", 0.0);

        let anon = ContributorIdentity::Anonymous("10.0.0.1".into());
        let auth = ContributorIdentity::Authenticated(UserId::from_str("u1"));

        for who in [anon, auth] {
            let first = store.insert_task_run(new_run("t1", "p1", who.clone())).unwrap();
            assert!(matches!(first, InsertRunOutcome::Inserted { .. }));
            let second = store.insert_task_run(new_run("t1", "p1", who)).unwrap();
            assert!(matches!(second, InsertRunOutcome::Duplicate));
        }
        assert_eq!(store.run_count(&TaskId::from_str("t1")).unwrap(), 2);
    }

    #[test]
    fn distinct_identities_do_not_collide() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        seed_project(&store, "p1", "birds");
        seed_task(&store, "t1", "p1", 0.0);

        for ip in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
            let who = ContributorIdentity::Anonymous(ip.into());
            let out = store.insert_task_run(new_run("t1", "p1", who)).unwrap();
            assert!(matches!(out, InsertRunOutcome::Inserted { .. }));
        }
        assert_eq!(store.run_count(&TaskId::from_str("t1")).unwrap(), 3);
    }

    #[test]
    fn inserted_answer_count_reflects_own_write() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        seed_project(&store, "p1", "birds");
        seed_task(&store, "t1", "p1", 0.0);

        let out = store
            .insert_task_run(new_run(
                "t1",
                "p1",
                ContributorIdentity::Anonymous("10.0.0.1".into()),
            ))
            .unwrap();
        match out {
            InsertRunOutcome::Inserted { answers, .. } => assert_eq!(answers, 1),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn completed_task_rejects_new_runs() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        seed_project(&store, "p1", "birds");
        seed_task(&store, "t1", "p1", 0.0);
        store
            .set_task_state(&TaskId::from_str("t1"), TaskState::Completed)
            .unwrap();
        let out = store
            .insert_task_run(new_run(
                "t1",
                "p1",
                ContributorIdentity::Anonymous("10.0.0.1".into()),
            ))
            .unwrap();
        assert!(matches!(out, InsertRunOutcome::NotAccepting));
    }

    #[test]
    fn candidates_exclude_answered_and_completed_tasks() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        seed_project(&store, "p1", "birds");
        seed_task(&store, "t1", "p1", 0.0);
        seed_task(&store, "t2", "p1", 0.0);
        seed_task(&store, "t3", "p1", 0.0);
        store
            .set_task_state(&TaskId::from_str("t3"), TaskState::Completed)
            .unwrap();

        let who = ContributorIdentity::Authenticated(UserId::from_str("u1"));
        store.insert_task_run(new_run("t1", "p1", who.clone())).unwrap();

        let cs = store.candidate_tasks(&ProjectId::from_str("p1"), &who).unwrap();
        let ids: Vec<&str> = cs.iter().map(|c| c.task.id.as_str()).collect();
        assert_eq!(ids, vec!["t2"]);

        // another identity still sees t1
        let other = ContributorIdentity::Anonymous("10.0.0.9".into());
        let cs = store.candidate_tasks(&ProjectId::from_str("p1"), &other).unwrap();
        let ids: Vec<&str> = cs.iter().map(|c| c.task.id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2"]);
    }

    #[test]
    fn delete_cascades_to_runs() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        seed_project(&store, "p1", "birds");
        seed_task(&store, "t1", "p1", 0.0);
        store
            .insert_task_run(new_run(
                "t1",
                "p1",
                ContributorIdentity::Anonymous("10.0.0.1".into()),
            ))
            .unwrap();

        let n = store.delete_project_tasks(&ProjectId::from_str("p1")).unwrap();
        assert_eq!(n, 1);
        assert!(store.project_runs(&ProjectId::from_str("p1")).unwrap().is_empty());
        assert_eq!(store.run_count(&TaskId::from_str("t1")).unwrap(), 0);
    }

    #[test]
    fn concurrent_same_identity_submissions_insert_exactly_once() {
        let dir = tempdir().unwrap();
        let store = Arc::new(open_store(&dir));
        seed_project(&store, "p1", "birds");
        seed_task(&store, "t1", "p1", 0.0);

        let who = ContributorIdentity::Authenticated(UserId::from_str("u1"));
        let mut handles = vec![];
        for _ in 0..8 {
            let store = store.clone();
            let who = who.clone();
            handles.push(std::thread::spawn(move || {
                store.insert_task_run(new_run("t1", "p1", who)).unwrap()
            }));
        }
        let mut inserted = 0;
        let mut duplicates = 0;
        for h in handles {
            match h.join().unwrap() {
                InsertRunOutcome::Inserted { .. } => inserted += 1,
                InsertRunOutcome::Duplicate => duplicates += 1,
                other => panic!("unexpected outcome: {other:?}"),
            }
        }
        assert_eq!(inserted, 1);
        assert_eq!(duplicates, 7);
        assert_eq!(store.run_count(&TaskId::from_str("t1")).unwrap(), 1);
    }
}
