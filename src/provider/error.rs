use crate::core::requester::Requester;
use crate::db::Key;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No record for the key, or a credential did not match.
    #[error("not found")]
    NotFound,
    #[error("record already exists: {0}")]
    Conflict(Key),
    #[error("malformed {field}: {reason}")]
    Malformed { field: String, reason: String },
    #[error("property {name} cannot be stored: {reason}")]
    InvalidProperty { name: String, reason: String },
    #[error("unsupported type: {0}")]
    UnsupportedType(String),
    #[error("transaction aborted: {0}")]
    TransactionAborted(String),
    /// The record exists but has been invalidated. The stored request is returned so the
    /// caller can act on it, e.g. revoke tokens issued from a reused authorization code.
    #[error("request has been invalidated")]
    Inactive(Box<Requester>),
    #[error("operation cancelled")]
    Cancelled,
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error(transparent)]
    Db(#[from] diesel::result::Error),
    #[error(transparent)]
    Pool(#[from] diesel::r2d2::PoolError),
    #[error(transparent)]
    Migration(#[from] diesel_migrations::RunMigrationsError),
    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("hashing failed: {0}")]
    Hash(#[from] argon2::Error),
}

impl Error {
    pub fn malformed(field: impl Into<String>, reason: impl ToString) -> Self {
        Self::Malformed {
            field: field.into(),
            reason: reason.to_string(),
        }
    }

    /// True for outcomes caused by the caller's context firing rather than by the input.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
