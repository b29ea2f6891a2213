use std::num::NonZeroUsize;
use std::path::PathBuf;

use bb8::{Builder as PoolBuilder, Pool};
use derive_builder::Builder;
use gcp_auth::{AuthenticationManager, CustomServiceAccount};
use googapis::google::spanner::v1 as proto;
use tonic::transport::ClientTlsConfig;

use crate::client::SpannerConnection;
use crate::connection::GrpcConnection;
use crate::session::SessionManager;
use crate::{DatabaseId, Error};

/// Query execution options attached to every SQL statement of a connection.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryOptions {
    /// Query-optimizer version pin; server default when unset.
    pub optimizer_version: Option<String>,
}

impl QueryOptions {
    pub(crate) fn to_proto(&self) -> Option<proto::execute_sql_request::QueryOptions> {
        self.optimizer_version
            .as_ref()
            .map(|version| proto::execute_sql_request::QueryOptions {
                optimizer_version: version.clone(),
                ..Default::default()
            })
    }
}

/// The resolved configuration of one connection.
///
/// ```no_run
/// use spanner_reactive::Config;
///
/// # async fn connect() -> Result<(), spanner_reactive::Error> {
/// let connection = Config::builder()
///     .project("my-project")
///     .instance("my-instance")
///     .database("my-database")
///     .connect()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Builder, Debug)]
#[builder(pattern = "owned")]
pub struct Config {
    #[builder(setter(into))]
    project: String,
    #[builder(setter(into))]
    instance: String,
    #[builder(setter(into))]
    database: String,
    /// Worker threads backing the connection's executor.
    #[builder(default = "default_thread_pool_size()")]
    thread_pool_size: usize,
    /// Query-optimizer version pin.
    #[builder(setter(strip_option, into), default)]
    optimizer_version: Option<String>,
    /// Alternate endpoint, e.g. `http://localhost:9010` for the emulator.
    #[builder(setter(strip_option, into), default)]
    endpoint: Option<String>,
    /// Skip TLS and credentials; only sensible against an emulator.
    #[builder(default)]
    use_plain_text: bool,
    /// Service-account JSON key. Application-default credentials when unset.
    #[builder(setter(strip_option, into), default)]
    credentials_file: Option<PathBuf>,
    #[builder(setter(strip_option), default)]
    session_pool_config: Option<SessionPoolConfig>,
}

fn default_thread_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(4)
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub async fn connect(self) -> Result<SpannerConnection, Error> {
        // tokio's worker_threads panics on zero
        if self.thread_pool_size == 0 {
            return Err(Error::Config(
                "thread_pool_size must be at least 1".to_string(),
            ));
        }

        let database = DatabaseId::new(&self.project, &self.instance, &self.database);

        let (tls_config, auth) = if self.use_plain_text {
            (None, None)
        } else {
            let auth = match &self.credentials_file {
                Some(path) => {
                    let account = CustomServiceAccount::from_file(path).map_err(|error| {
                        Error::Config(format!("invalid credentials file: {error}"))
                    })?;
                    AuthenticationManager::from(account)
                }
                None => AuthenticationManager::new().await.map_err(|error| {
                    Error::Config(format!("could not resolve credentials: {error}"))
                })?,
            };
            (Some(ClientTlsConfig::new()), Some(auth))
        };

        let connection =
            GrpcConnection::connect(self.endpoint, tls_config, auth, database).await?;

        let manager = SessionManager::new(connection.clone());
        let sessions = self
            .session_pool_config
            .unwrap_or_default()
            .build()
            .build(manager)
            .await?;

        let executor = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.thread_pool_size)
            .thread_name("spanner-reactive")
            .enable_all()
            .build()
            .map_err(|error| Error::Client(format!("failed to start executor: {error}")))?;

        let query_options = QueryOptions {
            optimizer_version: self.optimizer_version,
        };

        Ok(SpannerConnection::new(
            connection,
            sessions,
            executor,
            query_options,
        ))
    }
}

impl ConfigBuilder {
    pub async fn connect(self) -> Result<SpannerConnection, Error> {
        self.build()
            .map_err(|error| Error::Config(error.to_string()))?
            .connect()
            .await
    }
}

/// Bounds of the internal session pool.
#[derive(Builder, Default, Debug)]
#[builder(pattern = "owned")]
pub struct SessionPoolConfig {
    #[builder(setter(strip_option), default)]
    max_size: Option<u32>,
    #[builder(setter(strip_option), default)]
    min_idle: Option<u32>,
}

impl SessionPoolConfig {
    pub fn builder() -> SessionPoolConfigBuilder {
        SessionPoolConfigBuilder::default()
    }

    fn build<M: bb8::ManageConnection>(self) -> PoolBuilder<M> {
        let mut builder = Pool::builder().test_on_check_out(false);
        if let Some(max_size) = self.max_size {
            builder = builder.max_size(max_size);
        }
        builder.min_idle(self.min_idle)
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;

    use super::*;

    #[tokio::test]
    async fn test_zero_thread_pool_size_is_rejected() {
        let result = Config::builder()
            .project("p")
            .instance("i")
            .database("d")
            .thread_pool_size(0)
            .connect()
            .await;
        assert_matches!(result, Err(Error::Config(_)));
    }

    #[test]
    fn test_config_identifiers() {
        let cfg = Config::builder()
            .project("project")
            .instance("instance")
            .database("db");
        assert_eq!(cfg.project, Some("project".to_string()));
        assert_eq!(cfg.instance, Some("instance".to_string()));
        assert_eq!(cfg.database, Some("db".to_string()));
    }

    #[test]
    fn test_config_requires_database() {
        let result = Config::builder().project("project").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_config_defaults() {
        let cfg = Config::builder()
            .project("p")
            .instance("i")
            .database("d")
            .build()
            .unwrap();
        assert!(cfg.thread_pool_size > 0);
        assert_eq!(cfg.optimizer_version, None);
        assert!(!cfg.use_plain_text);
    }

    #[test]
    fn test_session_pool_config() {
        let built = SessionPoolConfig::builder()
            .max_size(10)
            .min_idle(100)
            .build()
            .unwrap();

        assert_eq!(built.max_size, Some(10));
        assert_eq!(built.min_idle, Some(100));
    }

    #[test]
    fn test_query_options_to_proto() {
        assert_eq!(QueryOptions::default().to_proto(), None);
        let options = QueryOptions {
            optimizer_version: Some("3".to_string()),
        };
        assert_eq!(options.to_proto().unwrap().optimizer_version, "3");
    }
}
