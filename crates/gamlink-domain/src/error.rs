use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Endpoint not found: {0}")]
    EndpointNotFound(String),

    #[error("Invalid MAC address: {0}")]
    InvalidMacAddress(String),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Device rejected request: {0}")]
    DeviceRejected(String),

    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Repository error: {0}")]
    RepositoryError(#[from] anyhow::Error),
}

impl DomainError {
    /// Transient errors are retried on the next natural trigger and are
    /// never cached as a not-found outcome.
    pub fn is_transient(&self) -> bool {
        matches!(self, DomainError::Transient(_))
    }
}
