//! Transaction bodies and the per-loop sources that produce them.

use crate::error::{OpError, Step, StepExt};
use crate::stats::OpKind;
use crate::store::{Product, Transaction};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use std::sync::Arc;

/// Body of one transaction. May run several times if the transaction is
/// retried, so it must not carry state between attempts.
#[async_trait]
pub trait Operation: Send + Sync {
    fn kind(&self) -> OpKind;

    async fn apply(&self, tx: &mut dyn Transaction) -> Result<(), OpError>;
}

/// Move `amount` from `source` to `destination`.
///
/// Both balances are read before either is written so the database sees the
/// full read set before any write.
#[derive(Debug, Clone, PartialEq)]
pub struct Transfer {
    pub source: String,
    pub destination: String,
    pub amount: Decimal,
}

#[async_trait]
impl Operation for Transfer {
    fn kind(&self) -> OpKind {
        OpKind::Transfer
    }

    async fn apply(&self, tx: &mut dyn Transaction) -> Result<(), OpError> {
        let source_balance = tx
            .fetch_balance(&self.source)
            .await
            .step(Step::FetchSource)?;
        let destination_balance = tx
            .fetch_balance(&self.destination)
            .await
            .step(Step::FetchDestination)?;

        tx.update_balance(&self.source, source_balance - self.amount)
            .await
            .step(Step::DebitSource)?;
        tx.update_balance(&self.destination, destination_balance + self.amount)
            .await
            .step(Step::CreditDestination)?;

        Ok(())
    }
}

/// Read one product row.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadProduct {
    pub key: String,
}

#[async_trait]
impl Operation for ReadProduct {
    fn kind(&self) -> OpKind {
        OpKind::Read
    }

    async fn apply(&self, tx: &mut dyn Transaction) -> Result<(), OpError> {
        tx.fetch_product(&self.key)
            .await
            .step(Step::FetchProduct)?;
        Ok(())
    }
}

/// Overwrite one product row.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteProduct {
    pub key: String,
    pub product: Product,
}

#[async_trait]
impl Operation for WriteProduct {
    fn kind(&self) -> OpKind {
        OpKind::Write
    }

    async fn apply(&self, tx: &mut dyn Transaction) -> Result<(), OpError> {
        tx.update_product(&self.key, &self.product)
            .await
            .step(Step::UpdateProduct)?;
        Ok(())
    }
}

fn rng_from(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

/// Draws keys uniformly from an immutable key pool.
#[derive(Debug, Clone)]
pub struct KeySampler {
    keys: Arc<[String]>,
    rng: StdRng,
}

impl KeySampler {
    pub fn new(keys: Arc<[String]>, seed: Option<u64>) -> Self {
        Self {
            keys,
            rng: rng_from(seed),
        }
    }

    pub fn pick_one(&mut self) -> Option<String> {
        if self.keys.is_empty() {
            return None;
        }
        let index = self.rng.random_range(0..self.keys.len());
        Some(self.keys[index].clone())
    }

    /// Two distinct keys, sampled without replacement.
    pub fn pick_pair(&mut self) -> Option<(String, String)> {
        if self.keys.len() < 2 {
            return None;
        }
        let picked = rand::seq::index::sample(&mut self.rng, self.keys.len(), 2);
        Some((
            self.keys[picked.index(0)].clone(),
            self.keys[picked.index(1)].clone(),
        ))
    }
}

const ADJECTIVES: &[&str] = &[
    "Ergonomic", "Rustic", "Sleek", "Practical", "Handcrafted", "Refined", "Compact",
    "Durable", "Smart", "Vintage", "Portable", "Luxurious",
];

const MATERIALS: &[&str] = &[
    "Steel", "Wooden", "Cotton", "Granite", "Bamboo", "Copper", "Leather", "Ceramic",
    "Plastic", "Glass",
];

const NOUNS: &[&str] = &[
    "Chair", "Lamp", "Kettle", "Backpack", "Keyboard", "Blender", "Table", "Wallet",
    "Speaker", "Bottle", "Clock", "Toaster",
];

/// Produces product names and prices between 1.00 and 100.00.
#[derive(Debug, Clone)]
pub struct ProductGenerator {
    rng: StdRng,
}

impl ProductGenerator {
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            rng: rng_from(seed),
        }
    }

    pub fn next_product(&mut self) -> Product {
        let name = format!(
            "{} {} {}",
            ADJECTIVES[self.rng.random_range(0..ADJECTIVES.len())],
            MATERIALS[self.rng.random_range(0..MATERIALS.len())],
            NOUNS[self.rng.random_range(0..NOUNS.len())],
        );
        let cents: i64 = self.rng.random_range(100..=10_000);
        Product {
            name,
            price: Decimal::new(cents, 2),
        }
    }

    pub fn products(&mut self, count: usize) -> Vec<Product> {
        (0..count).map(|_| self.next_product()).collect()
    }
}

/// Produces the next operation for one workload loop.
#[derive(Debug, Clone)]
pub enum OperationSource {
    Transfer { keys: KeySampler, amount: Decimal },
    Read { keys: KeySampler },
    Write { keys: KeySampler, products: ProductGenerator },
}

impl OperationSource {
    /// Source for `kind` over `keys`. The seed, when given, is mixed with the
    /// kind so concurrent loops do not draw the same sequence.
    pub fn new(kind: OpKind, keys: Arc<[String]>, amount: Decimal, seed: Option<u64>) -> Self {
        let offset = match kind {
            OpKind::Transfer => 0,
            OpKind::Read => 1,
            OpKind::Write => 2,
        };
        let seed = seed.map(|s| s.wrapping_add(offset));
        let keys = KeySampler::new(keys, seed);

        match kind {
            OpKind::Transfer => OperationSource::Transfer { keys, amount },
            OpKind::Read => OperationSource::Read { keys },
            OpKind::Write => OperationSource::Write {
                keys,
                products: ProductGenerator::new(seed.map(|s| s.rotate_left(32))),
            },
        }
    }

    pub fn next_operation(&mut self) -> Option<Arc<dyn Operation>> {
        match self {
            OperationSource::Transfer { keys, amount } => {
                let (source, destination) = keys.pick_pair()?;
                Some(Arc::new(Transfer {
                    source,
                    destination,
                    amount: *amount,
                }))
            }
            OperationSource::Read { keys } => {
                let key = keys.pick_one()?;
                Some(Arc::new(ReadProduct { key }))
            }
            OperationSource::Write { keys, products } => {
                let key = keys.pick_one()?;
                Some(Arc::new(WriteProduct {
                    key,
                    product: products.next_product(),
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IsolationLevel;
    use crate::error::StoreError;
    use crate::memory::MemoryStore;
    use crate::store::{KeySelection, Store, Table};

    fn pool(n: usize) -> Arc<[String]> {
        (0..n).map(|i| format!("k{i}")).collect::<Vec<_>>().into()
    }

    #[test]
    fn test_pick_pair_is_distinct() {
        let mut sampler = KeySampler::new(pool(2), Some(7));
        for _ in 0..100 {
            let (a, b) = sampler.pick_pair().unwrap();
            assert_ne!(a, b);
        }
    }

    #[test]
    fn test_pick_from_small_pools() {
        let mut one = KeySampler::new(pool(1), Some(1));
        assert!(one.pick_pair().is_none());
        assert_eq!(one.pick_one().as_deref(), Some("k0"));

        let mut empty = KeySampler::new(pool(0), Some(1));
        assert!(empty.pick_one().is_none());
    }

    #[test]
    fn test_seeded_sampling_is_deterministic() {
        let mut a = KeySampler::new(pool(50), Some(42));
        let mut b = KeySampler::new(pool(50), Some(42));
        for _ in 0..20 {
            assert_eq!(a.pick_pair(), b.pick_pair());
        }
    }

    #[test]
    fn test_generated_prices_in_range() {
        let mut generator = ProductGenerator::new(Some(3));
        for product in generator.products(200) {
            assert!(product.price >= Decimal::new(100, 2));
            assert!(product.price <= Decimal::new(10_000, 2));
            assert_eq!(product.name.split(' ').count(), 3);
        }
    }

    #[test]
    fn test_operation_source_kinds() {
        let mut transfer = OperationSource::new(OpKind::Transfer, pool(3), Decimal::ONE, Some(1));
        let mut write = OperationSource::new(OpKind::Write, pool(3), Decimal::ONE, Some(1));

        assert_eq!(transfer.next_operation().unwrap().kind(), OpKind::Transfer);
        assert_eq!(write.next_operation().unwrap().kind(), OpKind::Write);
    }

    #[tokio::test]
    async fn test_transfer_moves_amount() {
        let store = MemoryStore::new();
        store.create_table(Table::Account).await.unwrap();
        store.seed_accounts(2, Decimal::from(50)).await.unwrap();
        let keys = store
            .fetch_key_sample(Table::Account, KeySelection::All)
            .await
            .unwrap();

        let transfer = Transfer {
            source: keys[0].clone(),
            destination: keys[1].clone(),
            amount: Decimal::from(5),
        };
        let mut tx = store.begin(IsolationLevel::Serializable).await.unwrap();
        transfer.apply(tx.as_mut()).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.balance(&keys[0]), Some(Decimal::from(45)));
        assert_eq!(store.balance(&keys[1]), Some(Decimal::from(55)));
    }

    #[tokio::test]
    async fn test_transfer_tags_missing_destination() {
        let store = MemoryStore::new();
        store.create_table(Table::Account).await.unwrap();
        store.seed_accounts(1, Decimal::from(50)).await.unwrap();
        let keys = store
            .fetch_key_sample(Table::Account, KeySelection::All)
            .await
            .unwrap();

        let transfer = Transfer {
            source: keys[0].clone(),
            destination: "missing".to_string(),
            amount: Decimal::from(5),
        };
        let mut tx = store.begin(IsolationLevel::ReadCommitted).await.unwrap();
        let err = transfer.apply(tx.as_mut()).await.unwrap_err();

        assert_eq!(err.step, Step::FetchDestination);
        assert!(matches!(err.source, StoreError::NotFound { .. }));
    }
}
