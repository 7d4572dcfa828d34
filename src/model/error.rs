use thiserror::Error;

/// The standard result type used throughout the application.
pub type StdResult<T> = Result<T, anyhow::Error>;

/// Whether a failure may succeed when the same operation is tried again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Expected to succeed on retry without changing its inputs.
    Transient,
    /// Retrying cannot fix it.
    Fatal,
}

/// Fetcher error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The remote could not be reached or answered with a server error.
    #[error("Network error: {0}")]
    Network(String),
    /// The credentials were rejected.
    #[error("Authentication error: {0}")]
    Auth(String),
    /// The remote signaled that the rate limit is exceeded.
    #[error("Rate limited: {0}")]
    RateLimited(String),
    /// The response could not be understood.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
    /// The request itself is invalid.
    #[error("Malformed request: {0}")]
    MalformedRequest(String),
}

impl FetchError {
    /// Classifies the error for the retry executor.
    pub fn class(&self) -> ErrorClass {
        match self {
            FetchError::Network(_)
            | FetchError::RateLimited(_)
            | FetchError::MalformedResponse(_) => ErrorClass::Transient,
            FetchError::Auth(_) | FetchError::MalformedRequest(_) => ErrorClass::Fatal,
        }
    }
}

/// Persister error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistError {
    /// The storage is temporarily unavailable.
    #[error("Connection error: {0}")]
    Connection(String),
    /// A constraint of the data model was violated.
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),
    /// The statement was rejected for another reason (schema mismatch, bad SQL).
    #[error("Query error: {0}")]
    Query(String),
}

impl PersistError {
    /// Classifies the error for the retry executor.
    pub fn class(&self) -> ErrorClass {
        match self {
            PersistError::Connection(_) => ErrorClass::Transient,
            PersistError::ConstraintViolation(_) | PersistError::Query(_) => ErrorClass::Fatal,
        }
    }
}

/// Database error codes that denote a lost or busy connection rather than a bad statement.
///
/// Postgres class `08` (connection exception), `53` (insufficient resources) and `57P`
/// (operator intervention), plus SQLite `SQLITE_BUSY` (5) and `SQLITE_LOCKED` (6).
fn is_connection_error_code(code: &str) -> bool {
    code.starts_with("08")
        || code.starts_with("53")
        || code.starts_with("57P")
        || matches!(code, "5" | "6" | "261" | "262" | "517")
}

impl From<sqlx::Error> for PersistError {
    fn from(error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => PersistError::Connection(error.to_string()),
            sqlx::Error::Database(database_error) => {
                let code = database_error.code().map(|code| code.into_owned());
                match database_error.kind() {
                    sqlx::error::ErrorKind::UniqueViolation
                    | sqlx::error::ErrorKind::ForeignKeyViolation
                    | sqlx::error::ErrorKind::NotNullViolation
                    | sqlx::error::ErrorKind::CheckViolation => {
                        PersistError::ConstraintViolation(error.to_string())
                    }
                    _ if code.as_deref().is_some_and(is_connection_error_code) => {
                        PersistError::Connection(error.to_string())
                    }
                    _ => PersistError::Query(error.to_string()),
                }
            }
            _ => PersistError::Query(error.to_string()),
        }
    }
}

/// A raw payload that could not be turned into a repository record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordMappingError {
    /// A required field is absent.
    #[error("missing field '{0}'")]
    MissingField(&'static str),
    /// A field is present but holds an unusable value.
    #[error("invalid field '{field}': {reason}")]
    InvalidField {
        /// The offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

/// Terminal failure of a retried operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// A fatal error surfaced; no further attempt was made.
    #[error("{0}")]
    Fatal(E),
    /// Every attempt failed with a transient error.
    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The error of the last attempt.
        last_error: E,
    },
}

impl<E> RetryError<E> {
    /// Whether the failure came from a fatal error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RetryError::Fatal(_))
    }
}
