//! Data access port.
//!
//! The engine only talks to a database through these traits. Backends own
//! connection handling and SQL; the engine owns isolation selection, the retry
//! loop and what each transaction body does.

use crate::config::IsolationLevel;
use crate::error::StoreError;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Tables the workloads operate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Table {
    /// `account(id, balance)`, the conserved-quantity shape.
    Account,
    /// `product(id, name, price)`, the independent-mutation shape.
    Product,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::Account => "account",
            Table::Product => "product",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Mutable fields of a product row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub name: String,
    pub price: Decimal,
}

/// Which keys make up the key pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySelection {
    /// Every row in the table.
    All,
    /// A uniform random sample of this many rows.
    Sample(usize),
}

/// An open transaction. Dropping it without `commit` or `rollback` must leave
/// the database unchanged.
#[async_trait]
pub trait Transaction: Send {
    async fn fetch_balance(&mut self, key: &str) -> Result<Decimal, StoreError>;

    async fn update_balance(&mut self, key: &str, balance: Decimal) -> Result<(), StoreError>;

    async fn fetch_product(&mut self, key: &str) -> Result<Product, StoreError>;

    async fn update_product(&mut self, key: &str, product: &Product) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// A database the workloads can run against.
#[async_trait]
pub trait Store: Send + Sync {
    /// Short backend name for reports.
    fn backend(&self) -> &'static str;

    /// Open a transaction at the given isolation level.
    async fn begin(&self, isolation: IsolationLevel) -> Result<Box<dyn Transaction>, StoreError>;

    /// Drop the table if it exists.
    async fn drop_table(&self, table: Table) -> Result<(), StoreError>;

    async fn create_table(&self, table: Table) -> Result<(), StoreError>;

    /// Insert `count` accounts with the given balance. Returns rows inserted.
    async fn seed_accounts(&self, count: usize, balance: Decimal) -> Result<u64, StoreError>;

    /// Insert the given products under fresh keys. Returns rows inserted.
    async fn seed_products(&self, products: &[Product]) -> Result<u64, StoreError>;

    /// Fetch the key pool for a table.
    async fn fetch_key_sample(
        &self,
        table: Table,
        selection: KeySelection,
    ) -> Result<Vec<String>, StoreError>;

    /// Sum of balances over exactly these accounts.
    async fn sum_balances(&self, keys: &[String]) -> Result<Decimal, StoreError>;
}
