use thiserror::Error;

/// Failures of the answer submission pipeline. All of these are recoverable
/// at the caller: the contributor is redirected to request a different task.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// Task already completed or deleted.
    #[error("this task is no longer accepting answers")]
    TaskNotAcceptingAnswers,
    /// The task does not belong to the project the caller claims.
    #[error("task does not belong to the given project")]
    TaskProjectMismatch,
    /// The contributor already answered this task. Store-level losers of the
    /// unique `(task, contributor)` constraint race surface here, never as
    /// raw storage errors.
    #[error("you already answered this task")]
    DuplicateAnswer,
    /// The project does not accept anonymous contributions.
    #[error("this project requires signing in to contribute")]
    AnonymousNotAllowed,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("redundancy must be between {min} and {max}, got {got}", min = crate::MIN_N_ANSWERS, max = crate::MAX_N_ANSWERS)]
    InvalidRedundancy { got: u32 },
    #[error("project not found")]
    ProjectNotFound,
    #[error("not authorized")]
    Forbidden,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
