//! redb-based storage for products, the movement ledger, orders and courier runs
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `products` | `product_id` | `Product` | Bucket state |
//! | `product_codes` | `code` | `product_id` | Unique code index |
//! | `movements` | `(product_id, seq)` | `StockMovement` | Ledger (append-only) |
//! | `orders` | `order_id` | `Order` | Order snapshot |
//! | `order_refs` | `reference` | `order_id` | Unique reference index |
//! | `product_orders` | `(product_id, order_id)` | `()` | Orders per product |
//! | `runs` | `run_id` | `CourierRun` | Courier runs |
//! | `run_orders` | `(run_id, order_id)` | `()` | Orders per run |
//! | `sequence_counter` | name | `u64` | Id / ledger sequences |
//!
//! # Serialisation
//!
//! redb admits a single write transaction at a time. Every stock mutation
//! reads the product, writes the new buckets and appends its ledger rows
//! inside one write transaction, so two reservations on the same product
//! can never both observe the pre-decrement `available`.

use std::path::Path;
use std::sync::Arc;

use redb::{
    Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition,
    WriteTransaction,
};
use shared::models::{CourierRun, Order, OrderStatus, Product, StockMovement};
use thiserror::Error;

const PRODUCTS_TABLE: TableDefinition<i64, &[u8]> = TableDefinition::new("products");
const PRODUCT_CODES_TABLE: TableDefinition<&str, i64> = TableDefinition::new("product_codes");

/// Ledger: key = (product_id, seq), seq is global and monotonic
const MOVEMENTS_TABLE: TableDefinition<(i64, u64), &[u8]> = TableDefinition::new("movements");

const ORDERS_TABLE: TableDefinition<i64, &[u8]> = TableDefinition::new("orders");
const ORDER_REFS_TABLE: TableDefinition<&str, i64> = TableDefinition::new("order_refs");
const PRODUCT_ORDERS_TABLE: TableDefinition<(i64, i64), ()> =
    TableDefinition::new("product_orders");

const RUNS_TABLE: TableDefinition<i64, &[u8]> = TableDefinition::new("runs");
const RUN_ORDERS_TABLE: TableDefinition<(i64, i64), ()> = TableDefinition::new("run_orders");

const SEQUENCE_TABLE: TableDefinition<&str, u64> = TableDefinition::new("sequence_counter");

pub const MOVEMENT_SEQ_KEY: &str = "movement_seq";
pub const PRODUCT_ID_KEY: &str = "product_id";
pub const ORDER_ID_KEY: &str = "order_id";
pub const RUN_ID_KEY: &str = "run_id";

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Inventory storage backed by redb
#[derive(Clone)]
pub struct InventoryStorage {
    db: Arc<Database>,
}

impl InventoryStorage {
    /// Open or create the database at the given path
    ///
    /// redb commits with `Durability::Immediate`: once `commit()` returns the
    /// bucket write and its ledger rows are on disk together.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let db = Database::create(path)?;
        Self::init(db)
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> StorageResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::init(db)
    }

    fn init(db: Database) -> StorageResult<Self> {
        let write_txn = db.begin_write()?;
        {
            // Create all tables if they don't exist
            let _ = write_txn.open_table(PRODUCTS_TABLE)?;
            let _ = write_txn.open_table(PRODUCT_CODES_TABLE)?;
            let _ = write_txn.open_table(MOVEMENTS_TABLE)?;
            let _ = write_txn.open_table(ORDERS_TABLE)?;
            let _ = write_txn.open_table(ORDER_REFS_TABLE)?;
            let _ = write_txn.open_table(PRODUCT_ORDERS_TABLE)?;
            let _ = write_txn.open_table(RUNS_TABLE)?;
            let _ = write_txn.open_table(RUN_ORDERS_TABLE)?;
            let _ = write_txn.open_table(SEQUENCE_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Begin a write transaction
    pub fn begin_write(&self) -> StorageResult<WriteTransaction> {
        Ok(self.db.begin_write()?)
    }

    // ========== Sequence Operations ==========

    /// Increment and return the named sequence
    pub fn next_sequence(&self, txn: &WriteTransaction, key: &str) -> StorageResult<u64> {
        let mut table = txn.open_table(SEQUENCE_TABLE)?;
        let current = table.get(key)?.map(|guard| guard.value()).unwrap_or(0);
        let next = current + 1;
        table.insert(key, next)?;
        Ok(next)
    }

    /// Next entity id (1-based)
    pub fn next_id(&self, txn: &WriteTransaction, key: &str) -> StorageResult<i64> {
        Ok(self.next_sequence(txn, key)? as i64)
    }

    // ========== Products ==========

    pub fn put_product(&self, txn: &WriteTransaction, product: &Product) -> StorageResult<()> {
        let mut table = txn.open_table(PRODUCTS_TABLE)?;
        let value = serde_json::to_vec(product)?;
        table.insert(product.id, value.as_slice())?;
        Ok(())
    }

    pub fn get_product_txn(
        &self,
        txn: &WriteTransaction,
        product_id: i64,
    ) -> StorageResult<Option<Product>> {
        let table = txn.open_table(PRODUCTS_TABLE)?;
        match table.get(product_id)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    pub fn get_product(&self, product_id: i64) -> StorageResult<Option<Product>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PRODUCTS_TABLE)?;
        match table.get(product_id)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    pub fn list_products(&self) -> StorageResult<Vec<Product>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PRODUCTS_TABLE)?;
        let mut products = Vec::with_capacity(table.len()? as usize);
        for result in table.iter()? {
            let (_, value) = result?;
            products.push(serde_json::from_slice(value.value())?);
        }
        Ok(products)
    }

    pub fn product_id_for_code_txn(
        &self,
        txn: &WriteTransaction,
        code: &str,
    ) -> StorageResult<Option<i64>> {
        let table = txn.open_table(PRODUCT_CODES_TABLE)?;
        Ok(table.get(code)?.map(|g| g.value()))
    }

    pub fn put_product_code(
        &self,
        txn: &WriteTransaction,
        code: &str,
        product_id: i64,
    ) -> StorageResult<()> {
        let mut table = txn.open_table(PRODUCT_CODES_TABLE)?;
        table.insert(code, product_id)?;
        Ok(())
    }

    // ========== Ledger ==========

    /// Append a ledger row (never updated or removed)
    pub fn append_movement(
        &self,
        txn: &WriteTransaction,
        movement: &StockMovement,
    ) -> StorageResult<()> {
        let mut table = txn.open_table(MOVEMENTS_TABLE)?;
        let value = serde_json::to_vec(movement)?;
        table.insert((movement.product_id, movement.id), value.as_slice())?;
        Ok(())
    }

    /// All ledger rows for a product in creation order
    pub fn movements_for_product(&self, product_id: i64) -> StorageResult<Vec<StockMovement>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(MOVEMENTS_TABLE)?;

        let mut movements = Vec::new();
        for result in table.range((product_id, 0u64)..=(product_id, u64::MAX))? {
            let (_, value) = result?;
            movements.push(serde_json::from_slice(value.value())?);
        }
        Ok(movements)
    }

    /// Product snapshot and its ledger from the same read transaction
    pub fn product_with_movements(
        &self,
        product_id: i64,
    ) -> StorageResult<Option<(Product, Vec<StockMovement>)>> {
        let read_txn = self.db.begin_read()?;
        let products = read_txn.open_table(PRODUCTS_TABLE)?;
        let Some(guard) = products.get(product_id)? else {
            return Ok(None);
        };
        let product: Product = serde_json::from_slice(guard.value())?;

        let table = read_txn.open_table(MOVEMENTS_TABLE)?;
        let mut movements = Vec::new();
        for result in table.range((product_id, 0u64)..=(product_id, u64::MAX))? {
            let (_, value) = result?;
            movements.push(serde_json::from_slice(value.value())?);
        }
        Ok(Some((product, movements)))
    }

    // ========== Orders ==========

    pub fn put_order(&self, txn: &WriteTransaction, order: &Order) -> StorageResult<()> {
        let mut table = txn.open_table(ORDERS_TABLE)?;
        let value = serde_json::to_vec(order)?;
        table.insert(order.id, value.as_slice())?;
        Ok(())
    }

    /// Insert a new order together with its reference and product index rows
    pub fn insert_order(&self, txn: &WriteTransaction, order: &Order) -> StorageResult<()> {
        self.put_order(txn, order)?;
        {
            let mut refs = txn.open_table(ORDER_REFS_TABLE)?;
            refs.insert(order.reference.as_str(), order.id)?;
        }
        let mut by_product = txn.open_table(PRODUCT_ORDERS_TABLE)?;
        by_product.insert((order.product_id, order.id), ())?;
        Ok(())
    }

    /// Remove an order and every index row pointing at it
    pub fn remove_order(&self, txn: &WriteTransaction, order: &Order) -> StorageResult<()> {
        {
            let mut table = txn.open_table(ORDERS_TABLE)?;
            table.remove(order.id)?;
        }
        {
            let mut refs = txn.open_table(ORDER_REFS_TABLE)?;
            refs.remove(order.reference.as_str())?;
        }
        {
            let mut by_product = txn.open_table(PRODUCT_ORDERS_TABLE)?;
            by_product.remove((order.product_id, order.id))?;
        }
        if let Some(run_id) = order.run_id {
            let mut by_run = txn.open_table(RUN_ORDERS_TABLE)?;
            by_run.remove((run_id, order.id))?;
        }
        Ok(())
    }

    pub fn get_order_txn(
        &self,
        txn: &WriteTransaction,
        order_id: i64,
    ) -> StorageResult<Option<Order>> {
        let table = txn.open_table(ORDERS_TABLE)?;
        match table.get(order_id)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    pub fn get_order(&self, order_id: i64) -> StorageResult<Option<Order>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ORDERS_TABLE)?;
        match table.get(order_id)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    /// All orders, optionally filtered by status, ordered by id
    pub fn list_orders(&self, status: Option<OrderStatus>) -> StorageResult<Vec<Order>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ORDERS_TABLE)?;
        let mut orders = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            let order: Order = serde_json::from_slice(value.value())?;
            if status.is_none_or(|s| s == order.status) {
                orders.push(order);
            }
        }
        Ok(orders)
    }

    pub fn order_id_for_reference_txn(
        &self,
        txn: &WriteTransaction,
        reference: &str,
    ) -> StorageResult<Option<i64>> {
        let table = txn.open_table(ORDER_REFS_TABLE)?;
        Ok(table.get(reference)?.map(|g| g.value()))
    }

    /// Orders of one product (read snapshot)
    pub fn orders_for_product(&self, product_id: i64) -> StorageResult<Vec<Order>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(PRODUCT_ORDERS_TABLE)?;
        let orders = read_txn.open_table(ORDERS_TABLE)?;

        let mut result = Vec::new();
        for entry in index.range((product_id, i64::MIN)..=(product_id, i64::MAX))? {
            let (key, _) = entry?;
            let (_, order_id) = key.value();
            if let Some(guard) = orders.get(order_id)? {
                result.push(serde_json::from_slice(guard.value())?);
            }
        }
        Ok(result)
    }

    /// Orders of one product (inside a write transaction)
    pub fn orders_for_product_txn(
        &self,
        txn: &WriteTransaction,
        product_id: i64,
    ) -> StorageResult<Vec<Order>> {
        let index = txn.open_table(PRODUCT_ORDERS_TABLE)?;
        let orders = txn.open_table(ORDERS_TABLE)?;

        let mut result = Vec::new();
        for entry in index.range((product_id, i64::MIN)..=(product_id, i64::MAX))? {
            let (key, _) = entry?;
            let (_, order_id) = key.value();
            if let Some(guard) = orders.get(order_id)? {
                result.push(serde_json::from_slice(guard.value())?);
            }
        }
        Ok(result)
    }

    /// Product, its orders and each order's run, from one read snapshot
    pub fn product_orders_with_runs(
        &self,
        product_id: i64,
    ) -> StorageResult<Option<(Product, Vec<(Order, Option<CourierRun>)>)>> {
        let read_txn = self.db.begin_read()?;
        let products = read_txn.open_table(PRODUCTS_TABLE)?;
        let product: Product = match products.get(product_id)? {
            Some(guard) => serde_json::from_slice(guard.value())?,
            None => return Ok(None),
        };

        let index = read_txn.open_table(PRODUCT_ORDERS_TABLE)?;
        let orders = read_txn.open_table(ORDERS_TABLE)?;
        let runs = read_txn.open_table(RUNS_TABLE)?;

        let mut result = Vec::new();
        for entry in index.range((product_id, i64::MIN)..=(product_id, i64::MAX))? {
            let (key, _) = entry?;
            let (_, order_id) = key.value();
            let Some(guard) = orders.get(order_id)? else {
                continue;
            };
            let order: Order = serde_json::from_slice(guard.value())?;
            let run = match order.run_id {
                Some(run_id) => match runs.get(run_id)? {
                    Some(g) => Some(serde_json::from_slice(g.value())?),
                    None => None,
                },
                None => None,
            };
            result.push((order, run));
        }
        Ok(Some((product, result)))
    }

    // ========== Courier Runs ==========

    pub fn put_run(&self, txn: &WriteTransaction, run: &CourierRun) -> StorageResult<()> {
        let mut table = txn.open_table(RUNS_TABLE)?;
        let value = serde_json::to_vec(run)?;
        table.insert(run.id, value.as_slice())?;
        Ok(())
    }

    pub fn get_run_txn(
        &self,
        txn: &WriteTransaction,
        run_id: i64,
    ) -> StorageResult<Option<CourierRun>> {
        let table = txn.open_table(RUNS_TABLE)?;
        match table.get(run_id)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    pub fn get_run(&self, run_id: i64) -> StorageResult<Option<CourierRun>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RUNS_TABLE)?;
        match table.get(run_id)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    pub fn list_runs(&self) -> StorageResult<Vec<CourierRun>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RUNS_TABLE)?;
        let mut runs = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            runs.push(serde_json::from_slice(value.value())?);
        }
        Ok(runs)
    }

    pub fn link_order_to_run(
        &self,
        txn: &WriteTransaction,
        run_id: i64,
        order_id: i64,
    ) -> StorageResult<()> {
        let mut table = txn.open_table(RUN_ORDERS_TABLE)?;
        table.insert((run_id, order_id), ())?;
        Ok(())
    }

    /// Orders placed on a run (inside a write transaction), ordered by id
    pub fn orders_for_run_txn(
        &self,
        txn: &WriteTransaction,
        run_id: i64,
    ) -> StorageResult<Vec<Order>> {
        let index = txn.open_table(RUN_ORDERS_TABLE)?;
        let orders = txn.open_table(ORDERS_TABLE)?;

        let mut result = Vec::new();
        for entry in index.range((run_id, i64::MIN)..=(run_id, i64::MAX))? {
            let (key, _) = entry?;
            let (_, order_id) = key.value();
            if let Some(guard) = orders.get(order_id)? {
                result.push(serde_json::from_slice(guard.value())?);
            }
        }
        Ok(result)
    }

    /// Sum of quantities assigned to runs whose goods have not left yet
    ///
    /// These units are promised but still counted in `available`.
    pub fn pending_local_commitment_txn(
        &self,
        txn: &WriteTransaction,
        product_id: i64,
        exclude_order: Option<i64>,
    ) -> StorageResult<i64> {
        let pending = self
            .orders_for_product_txn(txn, product_id)?
            .into_iter()
            .filter(|o| Some(o.id) != exclude_order)
            .filter(|o| o.status == OrderStatus::Assigned && !o.handed_off)
            .map(|o| o.quantity)
            .sum();
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use shared::models::{Bucket, DeliveryChannel, MovementKind, StockBuckets};

    fn product(id: i64, code: &str) -> Product {
        Product {
            id,
            code: code.to_string(),
            name: format!("Product {id}"),
            unit_price: Decimal::new(10000, 2),
            price_for_two: None,
            price_for_three: None,
            alert_threshold: 0,
            stock: StockBuckets::default(),
            created_at: 0,
            updated_at: 0,
        }
    }

    fn order(id: i64, product_id: i64, status: OrderStatus, quantity: i64) -> Order {
        Order {
            id,
            reference: format!("REF-{id}"),
            client_name: "Client".to_string(),
            client_phone: "0600000000".to_string(),
            client_city: "Casablanca".to_string(),
            client_address: None,
            product_id,
            quantity,
            amount: Decimal::ZERO,
            delivery_channel: DeliveryChannel::Local,
            status,
            return_reason: None,
            caller_id: None,
            deliverer_id: None,
            run_id: None,
            handed_off: false,
            scheduled_callback_at: None,
            note: None,
            created_by: 1,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn test_sequence_increment() {
        let storage = InventoryStorage::open_in_memory().unwrap();

        let txn = storage.begin_write().unwrap();
        assert_eq!(storage.next_sequence(&txn, MOVEMENT_SEQ_KEY).unwrap(), 1);
        assert_eq!(storage.next_sequence(&txn, MOVEMENT_SEQ_KEY).unwrap(), 2);
        assert_eq!(storage.next_id(&txn, PRODUCT_ID_KEY).unwrap(), 1);
        txn.commit().unwrap();

        let txn = storage.begin_write().unwrap();
        assert_eq!(storage.next_sequence(&txn, MOVEMENT_SEQ_KEY).unwrap(), 3);
    }

    #[test]
    fn test_movements_are_scoped_per_product() {
        let storage = InventoryStorage::open_in_memory().unwrap();
        let txn = storage.begin_write().unwrap();
        storage.put_product(&txn, &product(1, "A")).unwrap();
        storage.put_product(&txn, &product(2, "B")).unwrap();
        for (seq, product_id) in [(1u64, 1i64), (2, 2), (3, 1)] {
            storage
                .append_movement(
                    &txn,
                    &StockMovement {
                        id: seq,
                        product_id,
                        kind: MovementKind::Restock,
                        bucket: Bucket::Available,
                        quantity_delta: 1,
                        balance_before: 0,
                        balance_after: 1,
                        actor_id: 1,
                        reason: "test".to_string(),
                        related_order_id: None,
                        created_at: 0,
                    },
                )
                .unwrap();
        }
        txn.commit().unwrap();

        let movements = storage.movements_for_product(1).unwrap();
        assert_eq!(movements.iter().map(|m| m.id).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(storage.movements_for_product(2).unwrap().len(), 1);
    }

    #[test]
    fn test_order_indexes_follow_insert_and_remove() {
        let storage = InventoryStorage::open_in_memory().unwrap();
        let mut o = order(10, 1, OrderStatus::Assigned, 3);
        o.run_id = Some(5);

        let txn = storage.begin_write().unwrap();
        storage.insert_order(&txn, &o).unwrap();
        storage.link_order_to_run(&txn, 5, 10).unwrap();
        assert_eq!(
            storage.order_id_for_reference_txn(&txn, "REF-10").unwrap(),
            Some(10)
        );
        assert_eq!(storage.orders_for_run_txn(&txn, 5).unwrap().len(), 1);
        assert_eq!(
            storage.pending_local_commitment_txn(&txn, 1, None).unwrap(),
            3
        );
        assert_eq!(
            storage.pending_local_commitment_txn(&txn, 1, Some(10)).unwrap(),
            0
        );

        storage.remove_order(&txn, &o).unwrap();
        assert!(storage.orders_for_run_txn(&txn, 5).unwrap().is_empty());
        assert!(
            storage
                .order_id_for_reference_txn(&txn, "REF-10")
                .unwrap()
                .is_none()
        );
        txn.commit().unwrap();

        assert!(storage.orders_for_product(1).unwrap().is_empty());
    }

    #[test]
    fn test_committed_rows_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inventory.redb");

        {
            let storage = InventoryStorage::open(&path).unwrap();
            let txn = storage.begin_write().unwrap();
            let id = storage.next_id(&txn, PRODUCT_ID_KEY).unwrap();
            storage.put_product(&txn, &product(id, "KEEP")).unwrap();
            txn.commit().unwrap();
        }

        let storage = InventoryStorage::open(&path).unwrap();
        assert_eq!(storage.get_product(1).unwrap().unwrap().code, "KEEP");
        let txn = storage.begin_write().unwrap();
        assert_eq!(storage.next_id(&txn, PRODUCT_ID_KEY).unwrap(), 2);
    }
}
