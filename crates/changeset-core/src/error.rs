use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChangesetError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("store connection error: {0}")]
    Connection(String),

    #[error("could not acquire process lock: {0}")]
    Lock(String),

    #[error("item already exists: {0}")]
    AlreadyExists(String),

    #[error("change set '{change_id}' ({method}) cannot be invoked: {reason}")]
    StepInvocation {
        change_id: String,
        method: String,
        reason: String,
    },

    #[error("change set '{change_id}' failed: {source:#}")]
    ChangeSetFailed {
        change_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ChangesetError>;
