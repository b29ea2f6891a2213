//! Scripted stand-ins for the wire seam, used by the unit tests.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use bb8::Pool;
use futures::{stream, Stream, StreamExt};
use googapis::google::spanner::v1 as proto;
use prost_types::value::Kind;
use prost_types::Value as WireValue;

use crate::connection::{Connection, ExecuteParams, PartialResultStream, UpdateOutcome};
use crate::session::SessionManager;
use crate::statement::Statement;
use crate::transaction::{TransactionId, TransactionMode, TransactionSelector};
use crate::{Error, Session, StructType, Type};

pub(crate) fn string_wire(value: &str) -> WireValue {
    WireValue {
        kind: Some(Kind::StringValue(value.to_string())),
    }
}

pub(crate) fn int64_wire(value: i64) -> WireValue {
    WireValue {
        kind: Some(Kind::StringValue(value.to_string())),
    }
}

pub(crate) fn result_metadata(fields: &[(&str, Type)]) -> proto::ResultSetMetadata {
    let struct_type = StructType(
        fields
            .iter()
            .map(|(name, tpe)| {
                let name = (!name.is_empty()).then(|| name.to_string());
                (name, tpe.clone())
            })
            .collect(),
    );
    proto::ResultSetMetadata {
        row_type: Some((&struct_type).into()),
        transaction: None,
    }
}

/// A single complete chunk holding `rows` of the given shape.
pub(crate) fn row_chunk(fields: &[(&str, Type)], rows: Vec<Vec<WireValue>>) -> proto::PartialResultSet {
    proto::PartialResultSet {
        metadata: Some(result_metadata(fields)),
        values: rows.into_iter().flatten().collect(),
        chunked_value: false,
        resume_token: vec![],
        stats: None,
    }
}

pub(crate) async fn mock_session_pool(connection: MockConnection) -> Pool<SessionManager<MockConnection>> {
    Pool::builder()
        .max_size(4)
        .build(SessionManager::new(connection))
        .await
        .expect("mock session pool")
}

/// Which transaction selector a statement was executed with.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum SelectorKind {
    SingleUse,
    Id(Vec<u8>),
    Begin,
}

impl From<&TransactionSelector> for SelectorKind {
    fn from(value: &TransactionSelector) -> Self {
        match value {
            TransactionSelector::SingleUse(_) => SelectorKind::SingleUse,
            TransactionSelector::Id(id) => SelectorKind::Id(id.0.clone()),
            TransactionSelector::Begin => SelectorKind::Begin,
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct UpdateCall {
    pub(crate) session: String,
    pub(crate) sqls: Vec<String>,
    pub(crate) seqno: i64,
    pub(crate) selector: SelectorKind,
}

#[derive(Clone, Debug)]
pub(crate) struct SelectCall {
    pub(crate) session: String,
    pub(crate) sql: String,
    pub(crate) selector: SelectorKind,
}

#[derive(Default)]
struct MockState {
    sessions_created: usize,
    next_transaction: u8,
    begun: Vec<&'static str>,
    committed: Vec<TransactionId>,
    rolled_back: Vec<TransactionId>,
    updates: Vec<UpdateCall>,
    selects: Vec<SelectCall>,
    ddl: Vec<String>,
    scripted_row_counts: VecDeque<Vec<i64>>,
    select_chunks: Vec<proto::PartialResultSet>,
    fail_next_begin: bool,
    fail_next_commit: bool,
    fail_select: bool,
    hold_select_open: bool,
    cancel_flag: Option<Arc<AtomicBool>>,
}

/// A scripted [`Connection`] recording every call it sees.
#[derive(Clone, Default)]
pub(crate) struct MockConnection {
    state: Arc<Mutex<MockState>>,
}

impl MockConnection {
    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state poisoned")
    }

    pub(crate) fn begun(&self) -> Vec<&'static str> {
        self.lock().begun.clone()
    }

    pub(crate) fn committed(&self) -> Vec<TransactionId> {
        self.lock().committed.clone()
    }

    pub(crate) fn rolled_back(&self) -> Vec<TransactionId> {
        self.lock().rolled_back.clone()
    }

    pub(crate) fn updates(&self) -> Vec<UpdateCall> {
        self.lock().updates.clone()
    }

    pub(crate) fn selects(&self) -> Vec<SelectCall> {
        self.lock().selects.clone()
    }

    pub(crate) fn ddl(&self) -> Vec<String> {
        self.lock().ddl.clone()
    }

    pub(crate) fn sessions_created(&self) -> usize {
        self.lock().sessions_created
    }

    /// Queues the row counts the next DML/batch calls report.
    pub(crate) fn script_row_counts(&self, counts: Vec<Vec<i64>>) {
        self.lock().scripted_row_counts.extend(counts);
    }

    /// Sets the chunks every streaming query replays.
    pub(crate) fn set_select_chunks(&self, chunks: Vec<proto::PartialResultSet>) {
        self.lock().select_chunks = chunks;
    }

    pub(crate) fn fail_next_begin(&self) {
        self.lock().fail_next_begin = true;
    }

    pub(crate) fn fail_next_commit(&self) {
        self.lock().fail_next_commit = true;
    }

    pub(crate) fn fail_select(&self) {
        self.lock().fail_select = true;
    }

    /// Keeps query streams open after their scripted chunks and reports
    /// whether the stream was dropped (i.e. the call was cancelled).
    pub(crate) fn track_cancellation(&self) -> Arc<AtomicBool> {
        let flag = Arc::new(AtomicBool::new(false));
        let mut state = self.lock();
        state.hold_select_open = true;
        state.cancel_flag = Some(Arc::clone(&flag));
        flag
    }
}

/// Stream wrapper flagging when the consumer lets go of it.
struct Monitored<S> {
    inner: S,
    dropped: Arc<AtomicBool>,
}

impl<S: Stream + Unpin> Stream for Monitored<S> {
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl<S> Drop for Monitored<S> {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn create_session(&mut self) -> Result<Session, Error> {
        let mut state = self.lock();
        state.sessions_created += 1;
        let session = proto::Session {
            name: format!("sessions/mock-{}", state.sessions_created),
            ..Default::default()
        };
        Ok(session.into())
    }

    async fn begin_transaction(
        &mut self,
        _session: &str,
        mode: TransactionMode,
    ) -> Result<TransactionId, Error> {
        let mut state = self.lock();
        if state.fail_next_begin {
            state.fail_next_begin = false;
            return Err(tonic::Status::unavailable("begin failed").into());
        }
        state.begun.push(match mode {
            TransactionMode::ReadWrite => "read-write",
            TransactionMode::ReadOnly(_) => "read-only",
        });
        state.next_transaction += 1;
        Ok(TransactionId(vec![state.next_transaction]))
    }

    async fn commit(&mut self, _session: &str, transaction: TransactionId) -> Result<(), Error> {
        let mut state = self.lock();
        if state.fail_next_commit {
            state.fail_next_commit = false;
            return Err(tonic::Status::aborted("commit failed").into());
        }
        state.committed.push(transaction);
        Ok(())
    }

    async fn rollback(&mut self, _session: &str, transaction: TransactionId) -> Result<(), Error> {
        self.lock().rolled_back.push(transaction);
        Ok(())
    }

    async fn execute_streaming_sql(
        &mut self,
        params: ExecuteParams,
    ) -> Result<PartialResultStream, Error> {
        let mut state = self.lock();
        if state.fail_select {
            return Err(tonic::Status::invalid_argument("scripted query failure").into());
        }
        state.selects.push(SelectCall {
            session: params.session,
            sql: params.statement.sql().to_string(),
            selector: SelectorKind::from(&params.selector),
        });

        let chunks = state.select_chunks.clone();
        let scripted = stream::iter(chunks.into_iter().map(Ok));
        if state.hold_select_open {
            let dropped = state
                .cancel_flag
                .clone()
                .unwrap_or_else(|| Arc::new(AtomicBool::new(false)));
            Ok(Monitored {
                inner: scripted.chain(stream::pending()),
                dropped,
            }
            .boxed())
        } else {
            Ok(scripted.boxed())
        }
    }

    async fn execute_dml(&mut self, params: ExecuteParams) -> Result<UpdateOutcome, Error> {
        let mut state = self.lock();
        let selector = SelectorKind::from(&params.selector);
        state.updates.push(UpdateCall {
            session: params.session,
            sqls: vec![params.statement.sql().to_string()],
            seqno: params.seqno,
            selector: selector.clone(),
        });
        let row_counts = state
            .scripted_row_counts
            .pop_front()
            .unwrap_or_else(|| vec![1]);
        Ok(UpdateOutcome {
            row_counts,
            transaction: matches!(selector, SelectorKind::Begin)
                .then(|| TransactionId(vec![0xFE])),
        })
    }

    async fn execute_batch_dml(
        &mut self,
        session: &str,
        selector: TransactionSelector,
        statements: Vec<Statement>,
        seqno: i64,
    ) -> Result<UpdateOutcome, Error> {
        let mut state = self.lock();
        let selector = SelectorKind::from(&selector);
        state.updates.push(UpdateCall {
            session: session.to_string(),
            sqls: statements
                .iter()
                .map(|statement| statement.sql().to_string())
                .collect(),
            seqno,
            selector: selector.clone(),
        });
        let row_counts = state
            .scripted_row_counts
            .pop_front()
            .unwrap_or_else(|| vec![1; statements.len()]);
        Ok(UpdateOutcome {
            row_counts,
            transaction: matches!(selector, SelectorKind::Begin)
                .then(|| TransactionId(vec![0xFE])),
        })
    }

    async fn update_ddl(&mut self, statements: Vec<String>) -> Result<(), Error> {
        self.lock().ddl.extend(statements);
        Ok(())
    }
}
