use std::time::{Duration, SystemTime};

use bb8::Pool;
use googapis::google::spanner::v1 as proto;
use tracing::debug;

use crate::connection::Connection;
use crate::session::{SessionHandle, SessionManager};
use crate::Error;

/// Stable identifier of the read-write transaction kind, as reported by
/// [`Error::TransactionInProgress`].
pub const READ_WRITE: &str = "read-write";
/// Stable identifier of the read-only transaction kind, as reported by
/// [`Error::TransactionInProgress`].
pub const READ_ONLY: &str = "read-only";

/// Staleness bound for read-only transactions and single-use reads.
#[derive(Clone, Debug)]
pub enum TimestampBound {
    Strong,
    ReadTimestamp(SystemTime),
    MinReadTimestamp(SystemTime),
    ExactStaleness(Duration),
    MaxStaleness(Duration),
}

impl From<TimestampBound> for proto::transaction_options::read_only::TimestampBound {
    fn from(value: TimestampBound) -> Self {
        match value {
            TimestampBound::Strong => {
                proto::transaction_options::read_only::TimestampBound::Strong(true)
            }
            TimestampBound::ReadTimestamp(timestamp) => {
                proto::transaction_options::read_only::TimestampBound::ReadTimestamp(
                    timestamp.into(),
                )
            }
            TimestampBound::MinReadTimestamp(timestamp) => {
                proto::transaction_options::read_only::TimestampBound::MinReadTimestamp(
                    timestamp.into(),
                )
            }
            TimestampBound::MaxStaleness(duration) => {
                proto::transaction_options::read_only::TimestampBound::MaxStaleness(duration.into())
            }
            TimestampBound::ExactStaleness(duration) => {
                proto::transaction_options::read_only::TimestampBound::ExactStaleness(
                    duration.into(),
                )
            }
        }
    }
}

/// The kind of transaction requested from a `BeginTransaction` RPC.
#[derive(Clone, Debug)]
pub enum TransactionMode {
    ReadWrite,
    ReadOnly(TimestampBound),
}

impl From<TransactionMode> for proto::TransactionOptions {
    fn from(value: TransactionMode) -> Self {
        match value {
            TransactionMode::ReadWrite => proto::TransactionOptions {
                mode: Some(proto::transaction_options::Mode::ReadWrite(
                    proto::transaction_options::ReadWrite {},
                )),
            },
            TransactionMode::ReadOnly(bound) => proto::TransactionOptions {
                mode: Some(proto::transaction_options::Mode::ReadOnly(
                    proto::transaction_options::ReadOnly {
                        return_read_timestamp: false,
                        timestamp_bound: Some(bound.into()),
                    },
                )),
            },
        }
    }
}

/// Server-assigned identifier of a begun transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionId(pub(crate) Vec<u8>);

/// How a statement relates to transactions: a one-shot snapshot, an existing
/// transaction, or a read-write transaction begun by the statement itself.
#[derive(Clone, Debug)]
pub enum TransactionSelector {
    SingleUse(Option<TimestampBound>),
    Id(TransactionId),
    Begin,
}

impl From<TransactionSelector> for proto::TransactionSelector {
    fn from(value: TransactionSelector) -> Self {
        match value {
            TransactionSelector::SingleUse(bound) => proto::TransactionSelector {
                selector: Some(proto::transaction_selector::Selector::SingleUse(
                    proto::TransactionOptions {
                        mode: Some(proto::transaction_options::Mode::ReadOnly(
                            proto::transaction_options::ReadOnly {
                                return_read_timestamp: false,
                                timestamp_bound: bound.map(Into::into),
                            },
                        )),
                    },
                )),
            },
            TransactionSelector::Id(tx) => proto::TransactionSelector {
                selector: Some(proto::transaction_selector::Selector::Id(tx.0)),
            },
            TransactionSelector::Begin => proto::TransactionSelector {
                selector: Some(proto::transaction_selector::Selector::Begin(
                    TransactionMode::ReadWrite.into(),
                )),
            },
        }
    }
}

/// The transaction lifecycle of one connection.
///
/// A connection is either idle, inside a read-write transaction, or inside a
/// read-only transaction. An active transaction pins the pooled session it
/// was begun on; every statement of the transaction must run on that session.
enum TxState<C: Connection> {
    Idle,
    ReadWrite {
        session: SessionHandle<C>,
        id: TransactionId,
        /// Sequence number of the most recent DML statement. Spanner requires
        /// strictly increasing values within one read-write transaction.
        seqno: i64,
    },
    ReadOnly {
        session: SessionHandle<C>,
        id: TransactionId,
    },
}

/// Serialized owner of the transaction state machine.
///
/// Not safe for concurrent mutation; the connection adapter owns exactly one
/// and Rust's `&mut` discipline enforces the serialized-caller assumption.
pub(crate) struct TransactionManager<C: Connection> {
    connection: C,
    sessions: Pool<SessionManager<C>>,
    state: TxState<C>,
}

impl<C: Connection> TransactionManager<C> {
    pub(crate) fn new(connection: C, sessions: Pool<SessionManager<C>>) -> Self {
        Self {
            connection,
            sessions,
            state: TxState::Idle,
        }
    }

    fn check_idle(&self) -> Result<(), Error> {
        match self.state {
            TxState::Idle => Ok(()),
            TxState::ReadWrite { .. } => Err(Error::read_write_in_progress()),
            TxState::ReadOnly { .. } => Err(Error::read_only_in_progress()),
        }
    }

    /// Begins a read-write transaction. Fails without issuing any RPC when a
    /// transaction is already active.
    pub(crate) async fn begin_transaction(&mut self) -> Result<(), Error> {
        self.check_idle()?;
        let mut session = self.sessions.get_owned().await?;
        let id = self
            .connection
            .begin_transaction(session.name(), TransactionMode::ReadWrite)
            .await?;
        session.mark_dirty();
        debug!(session = session.name(), "begun read-write transaction");
        self.state = TxState::ReadWrite {
            session,
            id,
            seqno: 0,
        };
        Ok(())
    }

    /// Begins a read-only transaction with the given staleness bound. Same
    /// exclusion rules as [`TransactionManager::begin_transaction`].
    pub(crate) async fn begin_readonly_transaction(
        &mut self,
        bound: TimestampBound,
    ) -> Result<(), Error> {
        self.check_idle()?;
        let session = self.sessions.get_owned().await?;
        let id = self
            .connection
            .begin_transaction(session.name(), TransactionMode::ReadOnly(bound))
            .await?;
        debug!(session = session.name(), "begun read-only transaction");
        self.state = TxState::ReadOnly { session, id };
        Ok(())
    }

    /// Commits the active transaction.
    ///
    /// A read-only transaction is closed by releasing its handles; when idle
    /// this is a no-op. The state returns to idle whatever the outcome.
    pub(crate) async fn commit_transaction(&mut self) -> Result<(), Error> {
        match std::mem::replace(&mut self.state, TxState::Idle) {
            TxState::Idle => Ok(()),
            TxState::ReadOnly { .. } => Ok(()),
            TxState::ReadWrite {
                mut session, id, ..
            } => {
                let result = self.connection.commit(session.name(), id).await;
                if result.is_ok() {
                    session.mark_clean();
                }
                debug!(committed = result.is_ok(), "read-write transaction ended");
                result
            }
        }
    }

    /// Rolls back the active transaction; same release rules as commit.
    pub(crate) async fn rollback_transaction(&mut self) -> Result<(), Error> {
        match std::mem::replace(&mut self.state, TxState::Idle) {
            TxState::Idle => Ok(()),
            TxState::ReadOnly { .. } => Ok(()),
            TxState::ReadWrite {
                mut session, id, ..
            } => {
                let result = self.connection.rollback(session.name(), id).await;
                if result.is_ok() {
                    session.mark_clean();
                }
                debug!(rolled_back = result.is_ok(), "read-write transaction ended");
                result
            }
        }
    }

    /// Releases any held native handles without talking to the server.
    /// Idempotent; called on close and after commit/rollback.
    pub(crate) fn clear(&mut self) {
        if !matches!(self.state, TxState::Idle) {
            debug!("discarding active transaction state");
        }
        self.state = TxState::Idle;
    }

    pub(crate) fn is_in_transaction(&self) -> bool {
        !matches!(self.state, TxState::Idle)
    }

    pub(crate) fn is_in_read_write_transaction(&self) -> bool {
        matches!(self.state, TxState::ReadWrite { .. })
    }

    pub(crate) fn is_in_readonly_transaction(&self) -> bool {
        matches!(self.state, TxState::ReadOnly { .. })
    }

    /// The read context for a SELECT: the pinned session of the active
    /// transaction, or a fresh single-use selector when idle.
    pub(crate) fn read_context(&self) -> (Option<String>, TransactionSelector) {
        match &self.state {
            TxState::Idle => (None, TransactionSelector::SingleUse(None)),
            TxState::ReadWrite { session, id, .. } => (
                Some(session.name().to_string()),
                TransactionSelector::Id(id.clone()),
            ),
            TxState::ReadOnly { session, id } => (
                Some(session.name().to_string()),
                TransactionSelector::Id(id.clone()),
            ),
        }
    }

    /// Execution parts for a DML statement inside the active read-write
    /// transaction, allocating the next sequence number.
    pub(crate) fn read_write_context(
        &mut self,
    ) -> Result<(String, TransactionSelector, i64), Error> {
        match &mut self.state {
            TxState::ReadWrite { session, id, seqno } => {
                *seqno += 1;
                Ok((
                    session.name().to_string(),
                    TransactionSelector::Id(id.clone()),
                    *seqno,
                ))
            }
            _ => Err(Error::Client(
                "not in a read-write transaction".to_string(),
            )),
        }
    }
}
