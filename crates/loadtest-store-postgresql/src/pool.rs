//! Small fixed-size connection pool.
//!
//! Connections are opened lazily up to `max_size` and returned to an idle list
//! when their [`PooledClient`] is dropped. A client marked with
//! [`PooledClient::discard`], or whose connection has closed, is dropped
//! instead of being reused.

use crate::error::PostgresStoreError;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_postgres::{Client, NoTls};
use tracing::debug;

struct PoolInner {
    connection_string: String,
    slots: Arc<Semaphore>,
    idle: Mutex<Vec<Client>>,
    max_size: usize,
}

/// Pool of PostgreSQL connections.
#[derive(Clone)]
pub struct PgPool {
    inner: Arc<PoolInner>,
}

impl PgPool {
    /// Create a pool and open its first connection.
    ///
    /// Fails if the database is unreachable, so callers learn about a bad
    /// connection string before any work starts.
    pub async fn connect(
        connection_string: &str,
        max_size: usize,
    ) -> Result<Self, PostgresStoreError> {
        if max_size == 0 {
            return Err(PostgresStoreError::Connection(
                "pool size must be greater than zero".to_string(),
            ));
        }

        let client = open(connection_string).await?;
        client.simple_query("SELECT 1").await?;

        let pool = Self {
            inner: Arc::new(PoolInner {
                connection_string: connection_string.to_string(),
                slots: Arc::new(Semaphore::new(max_size)),
                idle: Mutex::new(vec![client]),
                max_size,
            }),
        };
        debug!(max_size, "connection pool ready");
        Ok(pool)
    }

    pub fn max_size(&self) -> usize {
        self.inner.max_size
    }

    /// Connections currently checked out.
    pub fn in_use(&self) -> usize {
        self.inner.max_size - self.inner.slots.available_permits()
    }

    /// Check out a connection, waiting if all `max_size` are in use.
    pub async fn get(&self) -> Result<PooledClient, PostgresStoreError> {
        let permit = self
            .inner
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PostgresStoreError::PoolClosed)?;

        let reused = {
            let mut idle = self.inner.idle.lock().unwrap_or_else(PoisonError::into_inner);
            loop {
                match idle.pop() {
                    Some(client) if client.is_closed() => continue,
                    other => break other,
                }
            }
        };

        let client = match reused {
            Some(client) => client,
            None => open(&self.inner.connection_string).await?,
        };

        Ok(PooledClient {
            client: Some(client),
            pool: self.inner.clone(),
            discard: false,
            _permit: permit,
        })
    }

}

impl std::fmt::Debug for PgPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgPool")
            .field("max_size", &self.inner.max_size)
            .field("in_use", &self.in_use())
            .finish()
    }
}

async fn open(connection_string: &str) -> Result<Client, PostgresStoreError> {
    let (client, connection) = tokio_postgres::connect(connection_string, NoTls).await?;

    // Spawn the connection task
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("PostgreSQL connection error: {}", e);
        }
    });

    Ok(client)
}

/// A connection checked out of a [`PgPool`].
pub struct PooledClient {
    client: Option<Client>,
    pool: Arc<PoolInner>,
    discard: bool,
    _permit: OwnedSemaphorePermit,
}

impl PooledClient {
    /// Drop the connection instead of returning it to the pool. Used when the
    /// session may still hold an open transaction.
    pub fn discard(&mut self) {
        self.discard = true;
    }
}

impl Deref for PooledClient {
    type Target = Client;

    fn deref(&self) -> &Client {
        // Only `Drop` takes the client out.
        self.client.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledClient {
    fn deref_mut(&mut self) -> &mut Client {
        self.client.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledClient {
    fn drop(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };
        if self.discard || client.is_closed() {
            return;
        }
        self.pool
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(client);
    }
}
