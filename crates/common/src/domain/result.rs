use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Payload decode error: {0}")]
    PayloadDecodeError(String),

    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    #[error("Notification error: {0}")]
    NotificationError(String),

    #[error("Repository error: {0}")]
    RepositoryError(#[from] anyhow::Error),
}
