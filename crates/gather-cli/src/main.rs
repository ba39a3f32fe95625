use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use gather_core::{resolve_identity, Project, SchedulerPolicy, TaskId, UserId};
use gather_platform::{Actor, Platform};
use gather_storage::Storage as _;

#[derive(Parser)]
#[command(name = "gather", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Initialize gather in the current directory (creates .gather/, config, db)
    Init,

    /// Show projects, or one project's tasks and progress
    Status {
        #[arg(long)]
        project: Option<String>,
    },

    /// Create a project
    ProjectAdd {
        #[arg(long)]
        name: String,
        #[arg(long)]
        short_name: String,
        #[arg(long)]
        owner: String,
        /// Require contributors to be signed in
        #[arg(long, default_value_t = false)]
        members_only: bool,
    },

    /// Add a task to a project
    TaskAdd {
        #[arg(long)]
        project: String,
        /// Opaque task payload, JSON
        #[arg(long, default_value = "{}")]
        info: String,
        #[arg(long, default_value_t = 0.0)]
        priority: f64,
        #[arg(long)]
        n_answers: Option<u32>,
        #[arg(long)]
        as_user: String,
        #[arg(long, default_value_t = false)]
        admin: bool,
    },

    /// Ask the scheduler for the next task for a contributor
    NextTask {
        #[arg(long)]
        project: String,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        ip: Option<String>,
    },

    /// Submit an answer for a task
    Submit {
        #[arg(long)]
        project: String,
        #[arg(long)]
        task: String,
        /// Answer payload, JSON
        #[arg(long)]
        answer: String,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        ip: Option<String>,
    },

    /// Set the answer target for every task in a project
    SetRedundancy {
        #[arg(long)]
        project: String,
        #[arg(long)]
        n_answers: u32,
        #[arg(long)]
        as_user: String,
        #[arg(long, default_value_t = false)]
        admin: bool,
    },

    /// Set the project's scheduler policy (default, breadth_first, depth_first, random)
    SetScheduler {
        #[arg(long)]
        project: String,
        #[arg(long)]
        policy: String,
        #[arg(long)]
        as_user: String,
        #[arg(long, default_value_t = false)]
        admin: bool,
    },

    /// Delete all tasks (and their answers) of a project
    DeleteTasks {
        #[arg(long)]
        project: String,
        #[arg(long)]
        as_user: String,
        #[arg(long, default_value_t = false)]
        admin: bool,
    },
}

fn actor(as_user: &str, admin: bool) -> Actor {
    if admin {
        Actor::admin(as_user)
    } else {
        Actor::user(as_user)
    }
}

fn project_by_short_name(p: &Platform, short_name: &str) -> Result<Project> {
    p.storage
        .project_by_short_name(short_name)?
        .ok_or_else(|| anyhow!("no project with short name {short_name:?}"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let root = std::env::current_dir()?;

    match cli.cmd {
        Command::Init => {
            Platform::init(&root)?;
            println!("Initialized gather in {}", root.display());
        }
        Command::Status { project } => {
            let p = Platform::open(root)?;
            match project {
                None => {
                    let projects = p.storage.projects()?;
                    println!("Projects: {}", projects.len());
                    for pr in projects {
                        println!(
                            "- {} ({}) policy={} {}",
                            pr.short_name,
                            pr.name,
                            pr.policy.as_str(),
                            if pr.hidden { "[hidden]" } else { "" }
                        );
                    }
                }
                Some(short_name) => {
                    let pr = project_by_short_name(&p, &short_name)?;
                    let tasks = p.storage.project_tasks(&pr.id)?;
                    println!("{} — {} tasks", pr.short_name, tasks.len());
                    for t in tasks {
                        let received = p.storage.run_count(&t.id)?;
                        println!(
                            "- {} [{:?}] {}/{} answers, priority {}",
                            t.id.as_str(),
                            t.state,
                            received,
                            t.n_answers,
                            t.priority
                        );
                    }
                }
            }
        }
        Command::ProjectAdd {
            name,
            short_name,
            owner,
            members_only,
        } => {
            let p = Platform::open(root)?;
            let project =
                p.create_project(&Actor::user(owner), &name, &short_name, !members_only)?;
            println!("Created project {} ({})", project.short_name, project.id.as_str());
        }
        Command::TaskAdd {
            project,
            info,
            priority,
            n_answers,
            as_user,
            admin,
        } => {
            let p = Platform::open(root)?;
            let pr = project_by_short_name(&p, &project)?;
            let info: serde_json::Value =
                serde_json::from_str(&info).context("parse --info as JSON")?;
            let task = p.add_task(&actor(&as_user, admin), &pr.id, info, priority, n_answers)?;
            println!("Added task {} to {}", task.id.as_str(), pr.short_name);
        }
        Command::NextTask { project, user, ip } => {
            let p = Platform::open(root)?;
            let pr = project_by_short_name(&p, &project)?;
            let identity = resolve_identity(user.map(UserId::from_str), ip.as_deref());
            match p.next_task(&pr.id, &identity)? {
                Some(task) => {
                    println!("{}", task.id.as_str());
                    println!("{}", serde_json::to_string_pretty(&task.info)?);
                }
                None => println!("No tasks available for you in {}", pr.short_name),
            }
        }
        Command::Submit {
            project,
            task,
            answer,
            user,
            ip,
        } => {
            let p = Platform::open(root)?;
            let pr = project_by_short_name(&p, &project)?;
            let identity = resolve_identity(user.map(UserId::from_str), ip.as_deref());
            let payload: serde_json::Value =
                serde_json::from_str(&answer).context("parse --answer as JSON")?;
            match p.submit(&pr.id, &TaskId::from_str(task), &identity, payload) {
                Ok(run) => println!("Recorded answer {}", run.id.as_str()),
                Err(e) => {
                    println!("Rejected: {e}");
                    std::process::exit(1);
                }
            }
        }
        Command::SetRedundancy {
            project,
            n_answers,
            as_user,
            admin,
        } => {
            let p = Platform::open(root)?;
            let pr = project_by_short_name(&p, &project)?;
            p.set_redundancy(&actor(&as_user, admin), &pr.id, n_answers)?;
            println!("Redundancy of {} set to {}", pr.short_name, n_answers);
        }
        Command::SetScheduler {
            project,
            policy,
            as_user,
            admin,
        } => {
            let p = Platform::open(root)?;
            let pr = project_by_short_name(&p, &project)?;
            let policy = SchedulerPolicy::parse(&policy);
            p.set_policy(&actor(&as_user, admin), &pr.id, policy.clone())?;
            println!("Scheduler of {} set to {}", pr.short_name, policy.as_str());
        }
        Command::DeleteTasks {
            project,
            as_user,
            admin,
        } => {
            let p = Platform::open(root)?;
            let pr = project_by_short_name(&p, &project)?;
            let n = p.delete_all_tasks(&actor(&as_user, admin), &pr.id)?;
            println!("Deleted {} tasks from {}", n, pr.short_name);
        }
    }

    Ok(())
}
