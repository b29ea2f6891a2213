use std::sync::Arc;

use bb8::RunError;

use crate::transaction::{READ_ONLY, READ_WRITE};

/// All the ways driving a connection can fail.
///
/// The enum is `Clone` so that cached results (e.g. a replayed rows-updated
/// count) can hand the same terminal error to every subscriber.
#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    #[error("spanner client error: {0}")]
    Client(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("codec error: {0}")]
    Codec(String),

    /// A `begin*` operation was attempted while a transaction is already
    /// active. Carries [`READ_WRITE`] or [`READ_ONLY`] depending on the kind
    /// of the transaction that is in the way.
    #[error("{0} transaction already in progress")]
    TransactionInProgress(&'static str),

    #[error("cannot run DML statements in a read-only transaction")]
    DmlInReadOnlyTransaction,

    #[error("cannot run DML statements outside of a transaction when autocommit is disabled")]
    DmlOutsideTransaction,

    #[error("connection has been closed")]
    Closed,

    #[error("transport error: {0}")]
    Transport(#[from] Arc<tonic::transport::Error>),

    #[error("unexpected gRPC status: {0}")]
    Status(Arc<tonic::Status>),
}

impl From<tonic::Status> for Error {
    fn from(status: tonic::Status) -> Self {
        Error::Status(Arc::new(status))
    }
}

impl Error {
    /// The transaction kind that blocked a `begin*` operation, if this is a
    /// [`Error::TransactionInProgress`].
    pub fn blocking_transaction_kind(&self) -> Option<&'static str> {
        match self {
            Error::TransactionInProgress(kind) => Some(kind),
            _ => None,
        }
    }

    pub(crate) fn read_write_in_progress() -> Self {
        Error::TransactionInProgress(READ_WRITE)
    }

    pub(crate) fn read_only_in_progress() -> Self {
        Error::TransactionInProgress(READ_ONLY)
    }
}

impl From<tonic::transport::Error> for Error {
    fn from(value: tonic::transport::Error) -> Self {
        Error::Transport(Arc::new(value))
    }
}

impl From<RunError<Error>> for Error {
    fn from(value: RunError<Error>) -> Self {
        match value {
            RunError::User(error) => error,
            RunError::TimedOut => Error::Client("timeout while obtaining new session".to_string()),
        }
    }
}
