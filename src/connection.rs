use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use gcp_auth::AuthenticationManager;
use googapis::google::longrunning::{
    operation, operations_client::OperationsClient, GetOperationRequest, Operation,
};
use googapis::google::spanner::admin::database::v1::{
    database_admin_client::DatabaseAdminClient, UpdateDatabaseDdlRequest,
};
use googapis::google::spanner::v1 as proto;
use proto::{
    execute_sql_request::QueryMode, spanner_client::SpannerClient, BeginTransactionRequest,
    CommitRequest, CreateSessionRequest, ExecuteBatchDmlRequest, ExecuteSqlRequest,
    RollbackRequest,
};
use tonic::transport::{Channel, ClientTlsConfig};
use tonic::Request;
use tower::filter::{AsyncFilter, AsyncFilterLayer};
use tower::util::Either;
use tower::ServiceBuilder;
use tracing::debug;

use crate::auth::{AuthFilter, Scopes};
use crate::config::QueryOptions;
use crate::statement::Statement;
use crate::transaction::{TransactionId, TransactionMode, TransactionSelector};
use crate::{DatabaseId, Error, Session};

/// The stream of partial result chunks behind a streaming SQL call.
pub type PartialResultStream =
    futures::stream::BoxStream<'static, Result<proto::PartialResultSet, tonic::Status>>;

/// Everything one `ExecuteSql` call needs.
#[derive(Clone, Debug)]
pub struct ExecuteParams {
    /// Name of the session to run on.
    pub session: String,
    pub selector: TransactionSelector,
    pub statement: Statement,
    /// DML sequence number; ignored by the server for queries.
    pub seqno: i64,
    pub query_options: QueryOptions,
}

/// What a DML or batch-DML call produced: per-statement row counts, plus the
/// transaction the server opened when the selector asked it to begin one.
#[derive(Clone, Debug)]
pub struct UpdateOutcome {
    pub row_counts: Vec<i64>,
    pub transaction: Option<TransactionId>,
}

/// The wire seam between the adapter and Cloud Spanner.
///
/// [`GrpcConnection`] is the production implementation; tests substitute
/// scripted ones. Implementations are cheap to clone and every clone talks to
/// the same endpoint.
#[async_trait]
pub trait Connection: Clone + Send + Sync + 'static {
    async fn create_session(&mut self) -> Result<Session, Error>;

    async fn begin_transaction(
        &mut self,
        session: &str,
        mode: TransactionMode,
    ) -> Result<TransactionId, Error>;

    async fn commit(&mut self, session: &str, transaction: TransactionId) -> Result<(), Error>;

    async fn rollback(&mut self, session: &str, transaction: TransactionId) -> Result<(), Error>;

    /// Runs a query, returning the raw chunk stream. No chunk is pulled until
    /// the caller polls the stream; dropping the stream cancels the call.
    async fn execute_streaming_sql(
        &mut self,
        params: ExecuteParams,
    ) -> Result<PartialResultStream, Error>;

    async fn execute_dml(&mut self, params: ExecuteParams) -> Result<UpdateOutcome, Error>;

    async fn execute_batch_dml(
        &mut self,
        session: &str,
        selector: TransactionSelector,
        statements: Vec<Statement>,
        seqno: i64,
    ) -> Result<UpdateOutcome, Error>;

    /// Applies DDL through the database-admin API and waits for the
    /// long-running operation to finish.
    async fn update_ddl(&mut self, statements: Vec<String>) -> Result<(), Error>;
}

type AuthService = Either<AsyncFilter<Channel, AuthFilter>, Channel>;

#[derive(Clone)]
pub struct GrpcConnection {
    database: DatabaseId,
    spanner: SpannerClient<AuthService>,
    admin: DatabaseAdminClient<AuthService>,
    operations: OperationsClient<AuthService>,
}

impl GrpcConnection {
    pub(crate) async fn connect(
        endpoint: Option<String>,
        tls_config: Option<ClientTlsConfig>,
        auth: Option<AuthenticationManager>,
        database: DatabaseId,
    ) -> Result<Self, Error> {
        let channel = match endpoint {
            None => Channel::from_static("https://spanner.googleapis.com")
                .tls_config(tls_config.ok_or_else(|| Error::Config("TLS is required".into()))?)?,
            Some(hostname) => {
                let channel = Channel::from_shared(hostname).map_err(|invalid_uri| {
                    Error::Config(format!("invalid endpoint: {}", invalid_uri))
                })?;
                if let Some(tls_config) = tls_config {
                    channel.tls_config(tls_config)?
                } else {
                    channel
                }
            }
        };

        let channel = channel.connect().await?;
        let auth = auth.map(Arc::new);

        let with_scopes = |scopes: Scopes| {
            let auth_layer = auth
                .clone()
                .map(|auth| AsyncFilterLayer::new(AuthFilter::new(auth, scopes)));
            ServiceBuilder::new()
                .option_layer(auth_layer)
                .service(channel.clone())
        };

        let data = with_scopes(Scopes::Data);
        let admin = with_scopes(Scopes::Admin);

        Ok(Self {
            database,
            spanner: SpannerClient::new(data),
            admin: DatabaseAdminClient::new(admin.clone()),
            operations: OperationsClient::new(admin),
        })
    }

    fn sql_request(params: ExecuteParams) -> ExecuteSqlRequest {
        let (sql_params, param_types) = params.statement.encoded_params();
        ExecuteSqlRequest {
            session: params.session,
            transaction: Some(params.selector.into()),
            sql: params.statement.sql().to_string(),
            params: sql_params,
            param_types,
            resume_token: vec![],
            query_mode: QueryMode::Normal as i32,
            partition_token: vec![],
            seqno: params.seqno,
            query_options: params.query_options.to_proto(),
            request_options: None,
        }
    }

    async fn await_operation(&mut self, mut operation: Operation) -> Result<(), Error> {
        let mut delay = Duration::from_millis(250);
        loop {
            if operation.done {
                return match operation.result {
                    Some(operation::Result::Error(status)) => Err(tonic::Status::new(
                        status.code.into(),
                        status.message,
                    )
                    .into()),
                    _ => Ok(()),
                };
            }
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(Duration::from_secs(2));
            operation = self
                .operations
                .get_operation(Request::new(GetOperationRequest {
                    name: operation.name.clone(),
                }))
                .await?
                .into_inner();
        }
    }
}

fn row_count(result_set: &proto::ResultSet) -> Result<i64, Error> {
    match result_set.stats.as_ref().and_then(|stats| stats.row_count.clone()) {
        Some(proto::result_set_stats::RowCount::RowCountExact(exact)) => Ok(exact),
        Some(proto::result_set_stats::RowCount::RowCountLowerBound(_)) => Err(Error::Client(
            "lower bound row count is unsupported".to_string(),
        )),
        None => Err(Error::Client(
            "statement response carries no row count".to_string(),
        )),
    }
}

fn returned_transaction(result_set: &proto::ResultSet) -> Option<TransactionId> {
    result_set
        .metadata
        .as_ref()
        .and_then(|metadata| metadata.transaction.as_ref())
        .map(|transaction| TransactionId(transaction.id.clone()))
}

#[async_trait]
impl Connection for GrpcConnection {
    async fn create_session(&mut self) -> Result<Session, Error> {
        let response = self
            .spanner
            .create_session(Request::new(CreateSessionRequest {
                database: self.database.path(),
                session: None,
            }))
            .await?;
        Ok(response.into_inner().into())
    }

    async fn begin_transaction(
        &mut self,
        session: &str,
        mode: TransactionMode,
    ) -> Result<TransactionId, Error> {
        let response = self
            .spanner
            .begin_transaction(Request::new(BeginTransactionRequest {
                session: session.to_string(),
                options: Some(mode.into()),
                request_options: None,
            }))
            .await?;
        Ok(TransactionId(response.into_inner().id))
    }

    async fn commit(&mut self, session: &str, transaction: TransactionId) -> Result<(), Error> {
        self.spanner
            .commit(Request::new(CommitRequest {
                session: session.to_string(),
                mutations: vec![],
                return_commit_stats: false,
                transaction: Some(proto::commit_request::Transaction::TransactionId(
                    transaction.0,
                )),
                request_options: None,
            }))
            .await?;
        Ok(())
    }

    async fn rollback(&mut self, session: &str, transaction: TransactionId) -> Result<(), Error> {
        self.spanner
            .rollback(Request::new(RollbackRequest {
                session: session.to_string(),
                transaction_id: transaction.0,
            }))
            .await?;

        Ok(())
    }

    async fn execute_streaming_sql(
        &mut self,
        params: ExecuteParams,
    ) -> Result<PartialResultStream, Error> {
        let response = self
            .spanner
            .execute_streaming_sql(Request::new(Self::sql_request(params)))
            .await?;
        Ok(response.into_inner().boxed())
    }

    async fn execute_dml(&mut self, params: ExecuteParams) -> Result<UpdateOutcome, Error> {
        let result_set = self
            .spanner
            .execute_sql(Request::new(Self::sql_request(params)))
            .await?
            .into_inner();

        Ok(UpdateOutcome {
            row_counts: vec![row_count(&result_set)?],
            transaction: returned_transaction(&result_set),
        })
    }

    async fn execute_batch_dml(
        &mut self,
        session: &str,
        selector: TransactionSelector,
        statements: Vec<Statement>,
        seqno: i64,
    ) -> Result<UpdateOutcome, Error> {
        let response = self
            .spanner
            .execute_batch_dml(Request::new(ExecuteBatchDmlRequest {
                session: session.to_string(),
                transaction: Some(selector.into()),
                statements: statements.iter().map(Into::into).collect(),
                seqno,
                request_options: None,
            }))
            .await?
            .into_inner();

        // a non-OK status means a later statement failed after earlier ones
        // succeeded; surface it instead of a partial count list
        if let Some(status) = response.status {
            if status.code != 0 {
                return Err(tonic::Status::new(status.code.into(), status.message).into());
            }
        }

        let transaction = response.result_sets.first().and_then(returned_transaction);
        let row_counts = response
            .result_sets
            .iter()
            .map(row_count)
            .collect::<Result<Vec<i64>, Error>>()?;

        Ok(UpdateOutcome {
            row_counts,
            transaction,
        })
    }

    async fn update_ddl(&mut self, statements: Vec<String>) -> Result<(), Error> {
        debug!(count = statements.len(), "applying DDL statements");
        let operation = self
            .admin
            .update_database_ddl(Request::new(UpdateDatabaseDdlRequest {
                database: self.database.path(),
                statements,
                operation_id: String::new(),
            }))
            .await?
            .into_inner();

        self.await_operation(operation).await
    }
}
