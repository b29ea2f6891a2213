use bb8::Pool;
use futures::future::BoxFuture;
use futures::StreamExt;
use tokio::runtime::{Handle, Runtime};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::QueryOptions;
use crate::connection::{Connection, ExecuteParams, GrpcConnection};
use crate::result_set::RowCursor;
use crate::session::SessionManager;
use crate::statement::Statement;
use crate::stream::{drive_cursor, LazyValue, RowStream, ROW_BUFFER};
use crate::transaction::{TimestampBound, TransactionManager, TransactionSelector};
use crate::{Error, SpannerResult};

/// One logical connection to a Cloud Spanner database.
///
/// The connection owns a worker pool, an internal session pool and the
/// transaction state machine, and turns statements into lazy values and
/// streams: no RPC is issued before the returned future or stream is first
/// polled, and dropping it cancels the underlying call.
///
/// A connection expects a serialized caller: statement ordering inside a
/// transaction is whatever order the caller awaits things in.
pub struct SpannerConnection<C: Connection = GrpcConnection> {
    connection: C,
    sessions: Pool<SessionManager<C>>,
    txn: TransactionManager<C>,
    /// `None` once closed; doubles as the closed flag.
    executor: Option<Runtime>,
    executor_handle: Handle,
    auto_commit: bool,
    query_options: QueryOptions,
}

impl<C: Connection> std::fmt::Debug for SpannerConnection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpannerConnection").finish_non_exhaustive()
    }
}

impl<C: Connection> SpannerConnection<C> {
    pub(crate) fn new(
        connection: C,
        sessions: Pool<SessionManager<C>>,
        executor: Runtime,
        query_options: QueryOptions,
    ) -> Self {
        let executor_handle = executor.handle().clone();
        Self {
            txn: TransactionManager::new(connection.clone(), sessions.clone()),
            connection,
            sessions,
            executor: Some(executor),
            executor_handle,
            auto_commit: true,
            query_options,
        }
    }

    fn ensure_open(&self) -> Result<(), Error> {
        match self.executor {
            Some(_) => Ok(()),
            None => Err(Error::Closed),
        }
    }

    /// Starts a read-write transaction.
    pub async fn begin_transaction(&mut self) -> Result<(), Error> {
        self.ensure_open()?;
        self.txn.begin_transaction().await
    }

    /// Starts a read-only transaction with the given staleness.
    pub async fn begin_readonly_transaction(
        &mut self,
        timestamp_bound: TimestampBound,
    ) -> Result<(), Error> {
        self.ensure_open()?;
        self.txn.begin_readonly_transaction(timestamp_bound).await
    }

    /// Commits the running transaction; a no-op when none is active.
    pub async fn commit_transaction(&mut self) -> Result<(), Error> {
        self.ensure_open()?;
        self.txn.commit_transaction().await
    }

    /// Rolls back the running transaction; a no-op when none is active.
    pub async fn rollback_transaction(&mut self) -> Result<(), Error> {
        self.ensure_open()?;
        self.txn.rollback_transaction().await
    }

    pub fn is_auto_commit(&self) -> bool {
        self.auto_commit
    }

    /// Changes the autocommit flag. Flipping it while a transaction is in
    /// progress commits that transaction first; the flag only changes when
    /// the commit succeeds.
    pub async fn set_auto_commit(&mut self, auto_commit: bool) -> Result<(), Error> {
        self.ensure_open()?;
        if self.auto_commit != auto_commit && self.txn.is_in_transaction() {
            self.txn.commit_transaction().await?;
        }
        self.auto_commit = auto_commit;
        Ok(())
    }

    pub fn query_options(&self) -> &QueryOptions {
        &self.query_options
    }

    pub fn is_in_transaction(&self) -> bool {
        self.txn.is_in_transaction()
    }

    /// Runs a query.
    ///
    /// Inside a transaction the query runs on the transaction (and sees its
    /// uncommitted writes); otherwise it runs on a fresh single-use snapshot.
    pub fn run_select_statement(&self, statement: Statement) -> SpannerResult {
        if self.executor.is_none() {
            return SpannerResult::query(RowStream::failed(Error::Closed));
        }
        let (pinned_session, selector) = self.txn.read_context();
        SpannerResult::query(self.spawn_select(statement, pinned_session, selector))
    }

    /// Runs a DML statement, producing the number of affected rows.
    ///
    /// State violations (read-only transaction, or autocommit disabled with
    /// no transaction) are reported synchronously; everything else surfaces
    /// on the returned result.
    pub fn run_dml_statement(&mut self, statement: Statement) -> Result<SpannerResult, Error> {
        self.check_dml_state()?;
        let mut connection = self.connection.clone();
        let query_options = self.query_options.clone();

        let work: BoxFuture<'static, Result<i64, Error>> =
            if self.txn.is_in_read_write_transaction() {
                let (session, selector, seqno) = self.txn.read_write_context()?;
                Box::pin(async move {
                    let outcome = connection
                        .execute_dml(ExecuteParams {
                            session,
                            selector,
                            statement,
                            seqno,
                            query_options,
                        })
                        .await?;
                    single_row_count(outcome.row_counts)
                })
            } else {
                let sessions = self.sessions.clone();
                Box::pin(async move {
                    let counts =
                        autocommit_update(connection, sessions, Payload::Single(statement), query_options)
                            .await?;
                    single_row_count(counts)
                })
            };

        Ok(SpannerResult::update(LazyValue::spawn_with(
            self.executor_handle.clone(),
            work,
        )))
    }

    /// Runs a batch of DML statements, producing one affected-row count per
    /// statement. Routing and state rules match [`run_dml_statement`].
    ///
    /// [`run_dml_statement`]: SpannerConnection::run_dml_statement
    pub fn run_batch_dml(&mut self, statements: Vec<Statement>) -> Result<LazyValue<Vec<i64>>, Error> {
        self.check_dml_state()?;
        let mut connection = self.connection.clone();
        let query_options = self.query_options.clone();

        let work: BoxFuture<'static, Result<Vec<i64>, Error>> =
            if self.txn.is_in_read_write_transaction() {
                let (session, selector, seqno) = self.txn.read_write_context()?;
                Box::pin(async move {
                    let outcome = connection
                        .execute_batch_dml(&session, selector, statements, seqno)
                        .await?;
                    Ok(outcome.row_counts)
                })
            } else {
                let sessions = self.sessions.clone();
                Box::pin(autocommit_update(
                    connection,
                    sessions,
                    Payload::Batch(statements),
                    query_options,
                ))
            };

        Ok(LazyValue::spawn_with(self.executor_handle.clone(), work))
    }

    /// Applies a DDL statement through the admin API. DDL never participates
    /// in transactions and returns no rows.
    pub fn run_ddl_statement(&self, statement: impl Into<String>) -> LazyValue<()> {
        if self.executor.is_none() {
            return LazyValue::ready(Err(Error::Closed));
        }
        let mut connection = self.connection.clone();
        let statement = statement.into();
        LazyValue::spawn_with(self.executor_handle.clone(), async move {
            connection.update_ddl(vec![statement]).await
        })
    }

    /// Round-trips `SELECT 1` on a single-use context. `true` when the query
    /// completes, `false` on any failure or when the connection is closed.
    pub async fn health_check(&self) -> bool {
        if self.executor.is_none() {
            return false;
        }
        let mut rows = self.spawn_select(
            Statement::new("SELECT 1"),
            None,
            TransactionSelector::SingleUse(None),
        );
        while let Some(row) = rows.next().await {
            if let Err(error) = row {
                warn!(%error, "Cloud Spanner healthcheck failed");
                return false;
            }
        }
        true
    }

    /// Cheap liveness probe: `true` while the executor is up.
    pub fn local_healthcheck(&self) -> bool {
        self.executor.is_some()
    }

    /// Releases the transaction state and shuts the executor down.
    /// Idempotent; the connection is unusable afterwards.
    pub async fn close(&mut self) -> Result<(), Error> {
        if let Some(executor) = self.executor.take() {
            self.txn.clear();
            executor.shutdown_background();
            debug!("connection closed");
        }
        Ok(())
    }

    fn check_dml_state(&self) -> Result<(), Error> {
        self.ensure_open()?;
        if self.txn.is_in_readonly_transaction() {
            return Err(Error::DmlInReadOnlyTransaction);
        }
        if !self.auto_commit && !self.txn.is_in_read_write_transaction() {
            return Err(Error::DmlOutsideTransaction);
        }
        Ok(())
    }

    fn spawn_select(
        &self,
        statement: Statement,
        pinned_session: Option<String>,
        selector: TransactionSelector,
    ) -> RowStream {
        let mut connection = self.connection.clone();
        let sessions = self.sessions.clone();
        let query_options = self.query_options.clone();
        let (rows, receiver) = mpsc::channel(ROW_BUFFER);

        let driver = async move {
            // transactions pin their session; otherwise borrow one for the
            // duration of the statement
            let (session, _borrowed) = match pinned_session {
                Some(name) => (name, None),
                None => match sessions.get_owned().await {
                    Ok(handle) => (handle.name().to_string(), Some(handle)),
                    Err(error) => {
                        let _ = rows.send(Err(Error::from(error))).await;
                        return;
                    }
                },
            };

            let params = ExecuteParams {
                session,
                selector,
                statement,
                seqno: 0,
                query_options,
            };
            match connection.execute_streaming_sql(params).await {
                Ok(stream) => drive_cursor(RowCursor::new(stream), rows).await,
                Err(error) => {
                    let _ = rows.send(Err(error)).await;
                }
            }
        };

        RowStream::spawn_with(self.executor_handle.clone(), Box::pin(driver), receiver)
    }
}

impl<C: Connection> Drop for SpannerConnection<C> {
    fn drop(&mut self) {
        // shutdown_background never blocks, so dropping a connection inside
        // an async context is safe
        if let Some(executor) = self.executor.take() {
            executor.shutdown_background();
        }
    }
}

fn single_row_count(counts: Vec<i64>) -> Result<i64, Error> {
    counts.first().copied().ok_or_else(|| {
        Error::Client("statement response carries no row count".to_string())
    })
}

enum Payload {
    Single(Statement),
    Batch(Vec<Statement>),
}

/// The autocommit path: run the statement with a `Begin` selector and commit
/// the transaction the server opened for it.
async fn autocommit_update<C: Connection>(
    mut connection: C,
    sessions: Pool<SessionManager<C>>,
    payload: Payload,
    query_options: QueryOptions,
) -> Result<Vec<i64>, Error> {
    let mut session = sessions.get_owned().await?;
    session.mark_dirty();

    let outcome = match payload {
        Payload::Single(statement) => {
            connection
                .execute_dml(ExecuteParams {
                    session: session.name().to_string(),
                    selector: TransactionSelector::Begin,
                    statement,
                    seqno: 1,
                    query_options,
                })
                .await?
        }
        Payload::Batch(statements) => {
            connection
                .execute_batch_dml(session.name(), TransactionSelector::Begin, statements, 1)
                .await?
        }
    };

    let transaction = outcome.transaction.ok_or_else(|| {
        Error::Client("server did not begin a transaction for an autocommit statement".to_string())
    })?;
    connection.commit(session.name(), transaction).await?;
    session.mark_clean();

    Ok(outcome.row_counts)
}
