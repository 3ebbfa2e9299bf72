//! In-process store with optimistic concurrency control.
//!
//! Each row carries a version. Transactions read committed rows, buffer their
//! writes and apply them at commit. Under `SERIALIZABLE` the commit first
//! checks that every row the transaction touched still has the version it saw
//! (backward validation) and fails with a retryable conflict otherwise. Under
//! `READ COMMITTED` no validation happens, so two overlapping read-modify-write
//! transactions can overwrite each other: the lost update this tool exists to
//! surface.

use crate::config::IsolationLevel;
use crate::error::StoreError;
use crate::store::{KeySelection, Product, Store, Table, Transaction};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone)]
struct Versioned<T> {
    value: T,
    version: u64,
}

type Rows<T> = BTreeMap<String, Versioned<T>>;

#[derive(Debug, Default)]
struct Tables {
    accounts: Option<Rows<Decimal>>,
    products: Option<Rows<Product>>,
}

impl Tables {
    fn accounts(&self) -> Result<&Rows<Decimal>, StoreError> {
        self.accounts.as_ref().ok_or_else(|| missing(Table::Account))
    }

    fn accounts_mut(&mut self) -> Result<&mut Rows<Decimal>, StoreError> {
        self.accounts.as_mut().ok_or_else(|| missing(Table::Account))
    }

    fn products(&self) -> Result<&Rows<Product>, StoreError> {
        self.products.as_ref().ok_or_else(|| missing(Table::Product))
    }

    fn products_mut(&mut self) -> Result<&mut Rows<Product>, StoreError> {
        self.products.as_mut().ok_or_else(|| missing(Table::Product))
    }
}

fn missing(table: Table) -> StoreError {
    StoreError::backend(format!("relation \"{table}\" does not exist"))
}

fn not_found(table: Table, key: &str) -> StoreError {
    StoreError::NotFound {
        table,
        key: key.to_string(),
    }
}

/// Store that keeps both tables in memory.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    rng: Arc<Mutex<StdRng>>,
    op_delay: Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            tables: Arc::default(),
            rng: Arc::new(Mutex::new(StdRng::from_os_rng())),
            op_delay: Duration::ZERO,
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive row keys and key samples from `seed`, so two stores seeded
    /// alike and driven alike hold the same keys and return the same samples.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Arc::new(Mutex::new(StdRng::seed_from_u64(seed)));
        self
    }

    /// Pause this long before every statement, widening the window in which
    /// concurrent transactions overlap.
    pub fn with_op_delay(mut self, delay: Duration) -> Self {
        self.op_delay = delay;
        self
    }

    pub fn table_exists(&self, table: Table) -> bool {
        let tables = lock(&self.tables);
        match table {
            Table::Account => tables.accounts.is_some(),
            Table::Product => tables.products.is_some(),
        }
    }

    /// Committed balance of one account.
    pub fn balance(&self, key: &str) -> Option<Decimal> {
        lock(&self.tables)
            .accounts
            .as_ref()
            .and_then(|rows| rows.get(key))
            .map(|row| row.value)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStore {
    fn new_keys(&self, count: usize) -> Vec<String> {
        let mut rng = lock(&self.rng);
        (0..count)
            .map(|_| {
                uuid::Builder::from_random_bytes(rng.random())
                    .into_uuid()
                    .to_string()
            })
            .collect()
    }
}

async fn pause(delay: Duration) {
    if delay.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(delay).await;
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn begin(&self, isolation: IsolationLevel) -> Result<Box<dyn Transaction>, StoreError> {
        Ok(Box::new(MemoryTransaction {
            tables: self.tables.clone(),
            isolation,
            op_delay: self.op_delay,
            seen: HashMap::new(),
            balances: HashMap::new(),
            products: HashMap::new(),
        }))
    }

    async fn drop_table(&self, table: Table) -> Result<(), StoreError> {
        let mut tables = lock(&self.tables);
        match table {
            Table::Account => tables.accounts = None,
            Table::Product => tables.products = None,
        }
        Ok(())
    }

    async fn create_table(&self, table: Table) -> Result<(), StoreError> {
        let mut tables = lock(&self.tables);
        let exists = match table {
            Table::Account => tables.accounts.is_some(),
            Table::Product => tables.products.is_some(),
        };
        if exists {
            return Err(StoreError::backend(format!(
                "relation \"{table}\" already exists"
            )));
        }
        match table {
            Table::Account => tables.accounts = Some(BTreeMap::new()),
            Table::Product => tables.products = Some(BTreeMap::new()),
        }
        Ok(())
    }

    async fn seed_accounts(&self, count: usize, balance: Decimal) -> Result<u64, StoreError> {
        let keys = self.new_keys(count);
        let mut tables = lock(&self.tables);
        let rows = tables.accounts_mut()?;
        for key in keys {
            rows.insert(
                key,
                Versioned {
                    value: balance,
                    version: 0,
                },
            );
        }
        Ok(count as u64)
    }

    async fn seed_products(&self, products: &[Product]) -> Result<u64, StoreError> {
        let keys = self.new_keys(products.len());
        let mut tables = lock(&self.tables);
        let rows = tables.products_mut()?;
        for (key, product) in keys.into_iter().zip(products) {
            rows.insert(
                key,
                Versioned {
                    value: product.clone(),
                    version: 0,
                },
            );
        }
        Ok(products.len() as u64)
    }

    async fn fetch_key_sample(
        &self,
        table: Table,
        selection: KeySelection,
    ) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = {
            let tables = lock(&self.tables);
            match table {
                Table::Account => tables.accounts()?.keys().cloned().collect(),
                Table::Product => tables.products()?.keys().cloned().collect(),
            }
        };

        if let KeySelection::Sample(count) = selection {
            keys.shuffle(&mut *lock(&self.rng));
            keys.truncate(count);
        }
        Ok(keys)
    }

    async fn sum_balances(&self, keys: &[String]) -> Result<Decimal, StoreError> {
        let tables = lock(&self.tables);
        let rows = tables.accounts()?;
        Ok(keys
            .iter()
            .filter_map(|key| rows.get(key))
            .map(|row| row.value)
            .sum())
    }
}

/// Transaction over a [`MemoryStore`].
struct MemoryTransaction {
    tables: Arc<Mutex<Tables>>,
    isolation: IsolationLevel,
    op_delay: Duration,
    /// First version observed for every touched row.
    seen: HashMap<(Table, String), u64>,
    balances: HashMap<String, Decimal>,
    products: HashMap<String, Product>,
}

impl MemoryTransaction {
    fn observe(&mut self, table: Table, key: &str, version: u64) {
        self.seen
            .entry((table, key.to_string()))
            .or_insert(version);
    }

    fn validate(&self, tables: &Tables) -> Result<(), StoreError> {
        for ((table, key), seen) in &self.seen {
            let current = match table {
                Table::Account => tables.accounts()?.get(key).map(|row| row.version),
                Table::Product => tables.products()?.get(key).map(|row| row.version),
            };
            if current != Some(*seen) {
                return Err(StoreError::Conflict(format!(
                    "could not serialize access due to concurrent update of {table} '{key}'"
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn fetch_balance(&mut self, key: &str) -> Result<Decimal, StoreError> {
        pause(self.op_delay).await;
        if let Some(balance) = self.balances.get(key) {
            return Ok(*balance);
        }

        let (value, version) = {
            let tables = lock(&self.tables);
            let row = tables
                .accounts()?
                .get(key)
                .ok_or_else(|| not_found(Table::Account, key))?;
            (row.value, row.version)
        };
        self.observe(Table::Account, key, version);
        Ok(value)
    }

    async fn update_balance(&mut self, key: &str, balance: Decimal) -> Result<(), StoreError> {
        pause(self.op_delay).await;
        let version = {
            let tables = lock(&self.tables);
            tables
                .accounts()?
                .get(key)
                .map(|row| row.version)
                .ok_or_else(|| not_found(Table::Account, key))?
        };
        self.observe(Table::Account, key, version);
        self.balances.insert(key.to_string(), balance);
        Ok(())
    }

    async fn fetch_product(&mut self, key: &str) -> Result<Product, StoreError> {
        pause(self.op_delay).await;
        if let Some(product) = self.products.get(key) {
            return Ok(product.clone());
        }

        let (value, version) = {
            let tables = lock(&self.tables);
            let row = tables
                .products()?
                .get(key)
                .ok_or_else(|| not_found(Table::Product, key))?;
            (row.value.clone(), row.version)
        };
        self.observe(Table::Product, key, version);
        Ok(value)
    }

    async fn update_product(&mut self, key: &str, product: &Product) -> Result<(), StoreError> {
        pause(self.op_delay).await;
        let version = {
            let tables = lock(&self.tables);
            tables
                .products()?
                .get(key)
                .map(|row| row.version)
                .ok_or_else(|| not_found(Table::Product, key))?
        };
        self.observe(Table::Product, key, version);
        self.products.insert(key.to_string(), product.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        pause(self.op_delay).await;
        let mut tables = lock(&self.tables);

        if self.isolation == IsolationLevel::Serializable {
            self.validate(&tables)?;
        }

        if !self.balances.is_empty() {
            let rows = tables.accounts_mut()?;
            for (key, balance) in &self.balances {
                let row = rows
                    .get_mut(key)
                    .ok_or_else(|| not_found(Table::Account, key))?;
                row.value = *balance;
                row.version += 1;
            }
        }

        if !self.products.is_empty() {
            let rows = tables.products_mut()?;
            for (key, product) in &self.products {
                let row = rows
                    .get_mut(key)
                    .ok_or_else(|| not_found(Table::Product, key))?;
                row.value = product.clone();
                row.version += 1;
            }
        }

        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
