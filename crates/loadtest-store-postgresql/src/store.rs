//! [`Store`] implementation for PostgreSQL and CockroachDB.

use crate::error::{store_err, PostgresStoreError};
use crate::pool::PgPool;
use crate::schema;
use crate::transaction::PgTransaction;
use async_trait::async_trait;
use loadtest_engine::{IsolationLevel, KeySelection, Product, Store, StoreError, Table, Transaction};
use rust_decimal::Decimal;
use tokio_postgres::types::ToSql;
use tracing::{debug, info};
use uuid::Uuid;

/// Default batch size for seed INSERTs.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Store backed by a pool of PostgreSQL connections.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    batch_size: usize,
}

impl PostgresStore {
    /// Connect with a pool of at most `max_pool_size` connections.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let store = PostgresStore::connect(
    ///     "host=localhost user=postgres password=postgres dbname=bank",
    ///     10,
    /// ).await?;
    /// ```
    pub async fn connect(
        connection_string: &str,
        max_pool_size: usize,
    ) -> Result<Self, PostgresStoreError> {
        let pool = PgPool::connect(connection_string, max_pool_size).await?;
        Ok(Self::with_pool(pool))
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self {
            pool,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Set the batch size for seed INSERTs.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn insert_batches(
        &self,
        table: Table,
        rows: Vec<Vec<Box<dyn ToSql + Sync + Send>>>,
    ) -> Result<u64, StoreError> {
        let client = self.pool.get().await?;
        let mut inserted = 0;
        let mut batch_count = 0u64;

        for batch in rows.chunks(self.batch_size) {
            let sql = schema::insert(table, batch.len());
            let param_refs: Vec<&(dyn ToSql + Sync)> = batch
                .iter()
                .flatten()
                .map(|p| p.as_ref() as &(dyn ToSql + Sync))
                .collect();

            inserted += client.execute(&sql, &param_refs).await.map_err(store_err)?;
            batch_count += 1;
        }

        debug!(%table, inserted, batch_count, "seed batches inserted");
        Ok(inserted)
    }
}

#[async_trait]
impl Store for PostgresStore {
    fn backend(&self) -> &'static str {
        "postgresql"
    }

    async fn begin(&self, isolation: IsolationLevel) -> Result<Box<dyn Transaction>, StoreError> {
        let client = self.pool.get().await?;
        let tx = PgTransaction::begin(client, isolation).await?;
        Ok(Box::new(tx))
    }

    async fn drop_table(&self, table: Table) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        info!("Dropping table: {}", table);
        client
            .batch_execute(&schema::drop_table(table))
            .await
            .map_err(store_err)
    }

    async fn create_table(&self, table: Table) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        info!("Creating table: {}", table);
        client
            .batch_execute(&schema::create_table(table))
            .await
            .map_err(store_err)
    }

    async fn seed_accounts(&self, count: usize, balance: Decimal) -> Result<u64, StoreError> {
        let rows = (0..count)
            .map(|_| -> Vec<Box<dyn ToSql + Sync + Send>> {
                vec![Box::new(Uuid::new_v4()), Box::new(balance)]
            })
            .collect();
        self.insert_batches(Table::Account, rows).await
    }

    async fn seed_products(&self, products: &[Product]) -> Result<u64, StoreError> {
        let rows = products
            .iter()
            .map(|product| -> Vec<Box<dyn ToSql + Sync + Send>> {
                vec![
                    Box::new(Uuid::new_v4()),
                    Box::new(product.name.clone()),
                    Box::new(product.price),
                ]
            })
            .collect();
        self.insert_batches(Table::Product, rows).await
    }

    async fn fetch_key_sample(
        &self,
        table: Table,
        selection: KeySelection,
    ) -> Result<Vec<String>, StoreError> {
        let client = self.pool.get().await?;
        let rows = match selection {
            KeySelection::All => client.query(&schema::all_keys(table), &[]).await,
            KeySelection::Sample(count) => {
                let limit = i64::try_from(count).unwrap_or(i64::MAX);
                client.query(&schema::sample_keys(table), &[&limit]).await
            }
        }
        .map_err(store_err)?;

        rows.iter()
            .map(|row| {
                row.try_get::<_, Uuid>(0)
                    .map(|id| id.to_string())
                    .map_err(store_err)
            })
            .collect()
    }

    async fn sum_balances(&self, keys: &[String]) -> Result<Decimal, StoreError> {
        let ids: Vec<Uuid> = keys
            .iter()
            .filter_map(|key| Uuid::parse_str(key).ok())
            .collect();

        let client = self.pool.get().await?;
        let row = client
            .query_one(schema::SUM_BALANCES, &[&ids])
            .await
            .map_err(store_err)?;
        row.try_get(0).map_err(store_err)
    }
}
