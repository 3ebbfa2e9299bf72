//! Explicit `BEGIN` / `COMMIT` transactions over a pooled connection.

use crate::error::store_err;
use crate::pool::PooledClient;
use crate::schema;
use async_trait::async_trait;
use loadtest_engine::{IsolationLevel, Product, StoreError, Table, Transaction};
use rust_decimal::Decimal;
use tokio_postgres::error::SqlState;
use tracing::debug;
use uuid::Uuid;

/// An open transaction. If it is dropped before `commit` or `rollback` (for
/// example because the run was cancelled mid-statement) its connection is
/// discarded and the server rolls the transaction back when the session ends.
pub struct PgTransaction {
    client: PooledClient,
    open: bool,
}

impl PgTransaction {
    pub(crate) async fn begin(
        client: PooledClient,
        isolation: IsolationLevel,
    ) -> Result<Self, StoreError> {
        let statement = schema::begin(isolation);
        debug!("{}", statement);
        // Open from the moment BEGIN is sent: the server may run it even if
        // this future is dropped before the reply arrives.
        let mut tx = Self { client, open: true };
        tx.client.batch_execute(&statement).await.map_err(store_err)?;
        Ok(tx)
    }

    /// Run COMMIT or ROLLBACK. The connection goes back to the pool unless
    /// the outcome of the statement is unknown.
    async fn finish(&mut self, statement: &str) -> Result<(), StoreError> {
        debug!("{}", statement);
        match self.client.batch_execute(statement).await {
            Ok(()) => {
                self.open = false;
                Ok(())
            }
            Err(e) => {
                if !left_open(e.code()) {
                    self.open = false;
                }
                Err(store_err(e))
            }
        }
    }
}

/// Whether the session may still be inside a transaction after COMMIT or
/// ROLLBACK failed. A server-reported error (one with a SQLSTATE, such as a
/// `40001` at commit) ends the transaction; an I/O or protocol failure leaves
/// the session state unknown.
fn left_open(code: Option<&SqlState>) -> bool {
    code.is_none()
}

impl Drop for PgTransaction {
    fn drop(&mut self) {
        if self.open {
            self.client.discard();
        }
    }
}

/// Keys that are not UUIDs cannot match any row.
fn parse_key(table: Table, key: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(key).map_err(|_| StoreError::NotFound {
        table,
        key: key.to_string(),
    })
}

fn not_found(table: Table, key: &str) -> StoreError {
    StoreError::NotFound {
        table,
        key: key.to_string(),
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn fetch_balance(&mut self, key: &str) -> Result<Decimal, StoreError> {
        let id = parse_key(Table::Account, key)?;
        let row = self
            .client
            .query_opt(schema::FETCH_BALANCE, &[&id])
            .await
            .map_err(store_err)?
            .ok_or_else(|| not_found(Table::Account, key))?;
        row.try_get(0).map_err(store_err)
    }

    async fn update_balance(&mut self, key: &str, balance: Decimal) -> Result<(), StoreError> {
        let id = parse_key(Table::Account, key)?;
        let updated = self
            .client
            .execute(schema::UPDATE_BALANCE, &[&balance, &id])
            .await
            .map_err(store_err)?;
        if updated == 0 {
            return Err(not_found(Table::Account, key));
        }
        Ok(())
    }

    async fn fetch_product(&mut self, key: &str) -> Result<Product, StoreError> {
        let id = parse_key(Table::Product, key)?;
        let row = self
            .client
            .query_opt(schema::FETCH_PRODUCT, &[&id])
            .await
            .map_err(store_err)?
            .ok_or_else(|| not_found(Table::Product, key))?;
        Ok(Product {
            name: row.try_get(0).map_err(store_err)?,
            price: row.try_get(1).map_err(store_err)?,
        })
    }

    async fn update_product(&mut self, key: &str, product: &Product) -> Result<(), StoreError> {
        let id = parse_key(Table::Product, key)?;
        let updated = self
            .client
            .execute(schema::UPDATE_PRODUCT, &[&product.name, &product.price, &id])
            .await
            .map_err(store_err)?;
        if updated == 0 {
            return Err(not_found(Table::Product, key));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut tx = self;
        tx.finish("COMMIT").await
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let mut tx = self;
        tx.finish("ROLLBACK").await
    }
}
