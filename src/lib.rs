//! Reactive driver core for Google Cloud Spanner.
//!
//! The crate exposes one logical connection ([`SpannerConnection`]) per
//! adapter: statements come back as cold futures and row streams that start
//! no Spanner work until first polled and cancel the underlying call when
//! dropped. A per-connection state machine governs the transaction lifecycle
//! (idle, read-write, read-only) and rejects invalid nesting before any RPC
//! is issued.
//!
//! ```no_run
//! use futures::TryStreamExt;
//! use spanner_reactive::{Config, Statement};
//!
//! # async fn example() -> Result<(), spanner_reactive::Error> {
//! let mut conn = Config::builder()
//!     .project("my-project")
//!     .instance("my-instance")
//!     .database("my-database")
//!     .connect()
//!     .await?;
//!
//! conn.begin_transaction().await?;
//! let inserted = conn
//!     .run_dml_statement(
//!         Statement::new("INSERT BOOKS (UUID, CATEGORY) VALUES (@uuid, @category)")
//!             .bind("uuid", "abc-123")?
//!             .bind("category", &100i64)?,
//!     )?
//!     .rows_updated()
//!     .await?;
//! assert_eq!(inserted, 1);
//! conn.commit_transaction().await?;
//!
//! let rows: Vec<String> = conn
//!     .run_select_statement(Statement::new("SELECT UUID FROM BOOKS ORDER BY UUID"))
//!     .rows()
//!     .expect("queries produce rows")
//!     .and_then(|row| async move { row.get("UUID") })
//!     .try_collect()
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub use crate::client::SpannerConnection;
pub use crate::config::{Config, QueryOptions, SessionPoolConfig};
pub use crate::connection::{
    Connection, ExecuteParams, GrpcConnection, PartialResultStream, UpdateOutcome,
};
pub use crate::error::Error;
pub use crate::from_spanner::FromSpanner;
pub use crate::resource::DatabaseId;
pub use crate::result::SpannerResult;
pub use crate::result_set::{Row, RowIndex};
pub use crate::session::Session;
pub use crate::statement::Statement;
pub use crate::stream::{LazyValue, RowStream};
pub use crate::to_spanner::ToSpanner;
pub use crate::transaction::{
    TimestampBound, TransactionId, TransactionMode, TransactionSelector, READ_ONLY, READ_WRITE,
};
pub use crate::types::{StructType, Type};
pub use crate::value::Value;

mod auth;
mod client;
mod config;
mod connection;
mod error;
mod from_spanner;
mod resource;
mod result;
mod result_set;
mod session;
mod statement;
mod stream;
#[cfg(test)]
mod testing;
mod to_spanner;
mod transaction;
mod types;
mod value;
