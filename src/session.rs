use googapis::google::spanner::v1 as proto;
use tokio::sync::Mutex;

use crate::connection::Connection;
use crate::Error;

/// A server-side Spanner session.
///
/// Every data RPC runs against a session; a session supports at most one
/// transaction at a time. A session that began a transaction which was never
/// committed or rolled back is marked dirty so the pool discards it instead
/// of handing it out again.
pub struct Session {
    name: String,
    dirty: bool,
}

impl Session {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

impl From<proto::Session> for Session {
    fn from(value: proto::Session) -> Self {
        Self {
            name: value.name,
            dirty: false,
        }
    }
}

pub(crate) struct SessionManager<C> {
    connection: Mutex<C>,
}

impl<C> SessionManager<C> {
    pub(crate) fn new(connection: C) -> Self {
        Self {
            connection: Mutex::new(connection),
        }
    }
}

#[async_trait::async_trait]
impl<C: Connection> bb8::ManageConnection for SessionManager<C> {
    type Connection = Session;
    type Error = Error;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        self.connection.lock().await.create_session().await
    }

    async fn is_valid(&self, _conn: &mut Self::Connection) -> Result<(), Self::Error> {
        Ok(())
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        conn.dirty
    }
}

/// An owned checkout from the session pool; returns the session on drop.
pub(crate) type SessionHandle<C> = bb8::PooledConnection<'static, SessionManager<C>>;
