use gather_core::{Project, UserId};

/// The caller's auth context. Produced by the surrounding web layer; this
/// core only consumes it.
#[derive(Clone, Debug, Default)]
pub struct Actor {
    pub user: Option<UserId>,
    pub admin: bool,
}

impl Actor {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn user(id: impl Into<String>) -> Self {
        Self {
            user: Some(UserId::from_str(id)),
            admin: false,
        }
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self {
            user: Some(UserId::from_str(id)),
            admin: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Read,
    Create,
    Update,
    Delete,
}

fn is_owner_or_admin(actor: &Actor, project: &Project) -> bool {
    match &actor.user {
        Some(user) => actor.admin || *user == project.owner_id,
        None => false,
    }
}

/// Project-level authorization: read is open unless the project is hidden,
/// create requires authentication, update/delete require owner or admin.
pub fn allowed(actor: &Actor, project: &Project, action: Action) -> bool {
    match action {
        Action::Read => !project.hidden || is_owner_or_admin(actor, project),
        Action::Create => actor.user.is_some(),
        Action::Update | Action::Delete => is_owner_or_admin(actor, project),
    }
}
