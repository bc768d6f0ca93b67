//! Stock Bucket Manager
//!
//! The only writer of product buckets. Each applied movement updates the
//! product and appends one ledger row per affected bucket inside the
//! caller's write transaction; commit makes both visible together.

use redb::WriteTransaction;
use shared::models::{
    Bucket, LedgerReplay, MovementKind, MovementOutcome, Product, ProductCreate, StockBuckets,
    StockMovement,
};
use shared::util::now_millis;

use super::error::{StockError, StockResult};
use super::movement::{self, MovementPlan};
use super::storage::{InventoryStorage, MOVEMENT_SEQ_KEY, PRODUCT_ID_KEY};

/// Context recorded on every ledger row
#[derive(Debug, Clone)]
pub struct MovementContext {
    pub actor_id: i64,
    pub reason: String,
    pub related_order_id: Option<i64>,
}

impl MovementContext {
    pub fn new(actor_id: i64, reason: impl Into<String>) -> Self {
        Self {
            actor_id,
            reason: reason.into(),
            related_order_id: None,
        }
    }

    pub fn for_order(mut self, order_id: i64) -> Self {
        self.related_order_id = Some(order_id);
        self
    }
}

#[derive(Clone)]
pub struct StockManager {
    storage: InventoryStorage,
}

impl StockManager {
    pub fn new(storage: InventoryStorage) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &InventoryStorage {
        &self.storage
    }

    // ========== Write path ==========

    /// Apply a movement in its own transaction
    pub fn apply_movement(
        &self,
        product_id: i64,
        kind: MovementKind,
        quantity: i64,
        ctx: &MovementContext,
    ) -> StockResult<MovementOutcome> {
        let txn = self.storage.begin_write()?;
        let outcome = self.apply_movement_txn(&txn, product_id, kind, quantity, ctx)?;
        txn.commit().map_err(super::storage::StorageError::from)?;
        Ok(outcome)
    }

    /// Apply a movement inside an existing write transaction
    ///
    /// Dropping the transaction without commit discards the bucket write and
    /// the ledger rows together.
    pub fn apply_movement_txn(
        &self,
        txn: &WriteTransaction,
        product_id: i64,
        kind: MovementKind,
        quantity: i64,
        ctx: &MovementContext,
    ) -> StockResult<MovementOutcome> {
        let product = self
            .storage
            .get_product_txn(txn, product_id)?
            .ok_or(StockError::ProductNotFound(product_id))?;

        let plan = movement::plan(product_id, kind, quantity, product.stock)?;
        self.commit_plan(txn, product, plan, ctx)
    }

    /// Operator correction: signed delta on one bucket, may go negative
    pub fn apply_correction_txn(
        &self,
        txn: &WriteTransaction,
        product_id: i64,
        bucket: Bucket,
        delta: i64,
        ctx: &MovementContext,
    ) -> StockResult<MovementOutcome> {
        let product = self
            .storage
            .get_product_txn(txn, product_id)?
            .ok_or(StockError::ProductNotFound(product_id))?;

        let plan = movement::plan_correction(bucket, delta, product.stock)?;
        let outcome = self.commit_plan(txn, product, plan, ctx)?;
        if outcome.flagged {
            tracing::warn!(
                product_id,
                bucket = %bucket,
                delta,
                after = outcome.after.get(bucket),
                "Correction left a negative bucket"
            );
        }
        Ok(outcome)
    }

    fn commit_plan(
        &self,
        txn: &WriteTransaction,
        mut product: Product,
        plan: MovementPlan,
        ctx: &MovementContext,
    ) -> StockResult<MovementOutcome> {
        let now = now_millis();
        let mut movements = Vec::with_capacity(plan.changes.len());
        for change in &plan.changes {
            let seq = self.storage.next_sequence(txn, MOVEMENT_SEQ_KEY)?;
            let row = StockMovement {
                id: seq,
                product_id: product.id,
                kind: plan.kind,
                bucket: change.bucket,
                quantity_delta: change.delta,
                balance_before: change.before,
                balance_after: change.after,
                actor_id: ctx.actor_id,
                reason: ctx.reason.clone(),
                related_order_id: ctx.related_order_id,
                created_at: now,
            };
            self.storage.append_movement(txn, &row)?;
            movements.push(row);
        }

        product.stock = plan.after;
        product.updated_at = now;
        self.storage.put_product(txn, &product)?;

        tracing::debug!(
            product_id = product.id,
            kind = %plan.kind,
            available = plan.after.available,
            reserved_local = plan.after.reserved_local,
            reserved_express = plan.after.reserved_express,
            order_id = ?ctx.related_order_id,
            "Stock movement applied"
        );

        Ok(MovementOutcome {
            product_id: product.id,
            kind: plan.kind,
            before: plan.before,
            after: plan.after,
            movements,
            flagged: plan.flagged,
        })
    }

    // ========== Product intake ==========

    /// Create a product; initial stock is written as a RESTOCK movement
    pub fn create_product(&self, create: ProductCreate, actor_id: i64) -> StockResult<Product> {
        let code = create.code.trim().to_string();
        if code.is_empty() {
            return Err(StockError::Validation("product code is required".to_string()));
        }
        if create.unit_price.is_sign_negative() {
            return Err(StockError::Validation(
                "unit price must not be negative".to_string(),
            ));
        }

        let txn = self.storage.begin_write()?;
        if self.storage.product_id_for_code_txn(&txn, &code)?.is_some() {
            return Err(StockError::ProductCodeExists(code));
        }

        let now = now_millis();
        let id = self.storage.next_id(&txn, PRODUCT_ID_KEY)?;
        let product = Product {
            id,
            code: code.clone(),
            name: create.name,
            unit_price: create.unit_price,
            price_for_two: create.price_for_two,
            price_for_three: create.price_for_three,
            alert_threshold: create.alert_threshold,
            stock: StockBuckets::default(),
            created_at: now,
            updated_at: now,
        };
        self.storage.put_product(&txn, &product)?;
        self.storage.put_product_code(&txn, &code, id)?;

        let product = if create.initial_stock > 0 {
            let ctx = MovementContext::new(actor_id, "initial stock");
            self.apply_movement_txn(&txn, id, MovementKind::Restock, create.initial_stock, &ctx)?;
            self.storage
                .get_product_txn(&txn, id)?
                .ok_or(StockError::ProductNotFound(id))?
        } else {
            product
        };

        txn.commit().map_err(super::storage::StorageError::from)?;
        tracing::info!(product_id = id, code = %code, initial_stock = create.initial_stock, "Product created");
        Ok(product)
    }

    pub fn restock(
        &self,
        product_id: i64,
        quantity: i64,
        actor_id: i64,
        reason: Option<String>,
    ) -> StockResult<MovementOutcome> {
        let ctx = MovementContext::new(actor_id, reason.unwrap_or_else(|| "restock".to_string()));
        self.apply_movement(product_id, MovementKind::Restock, quantity, &ctx)
    }

    // ========== Read path ==========

    pub fn get_product(&self, product_id: i64) -> StockResult<Product> {
        self.storage
            .get_product(product_id)?
            .ok_or(StockError::ProductNotFound(product_id))
    }

    pub fn list_products(&self) -> StockResult<Vec<Product>> {
        Ok(self.storage.list_products()?)
    }

    /// Ledger of one product in creation order
    pub fn movements(&self, product_id: i64) -> StockResult<Vec<StockMovement>> {
        // 404 for unknown products rather than an empty ledger
        self.get_product(product_id)?;
        Ok(self.storage.movements_for_product(product_id)?)
    }

    /// Replay the ledger from zero and compare with the stored buckets
    pub fn replay(&self, product_id: i64) -> StockResult<LedgerReplay> {
        let (product, movements) = self
            .storage
            .product_with_movements(product_id)?
            .ok_or(StockError::ProductNotFound(product_id))?;

        let replayed = movement::replay(&movements);
        let broken = movement::first_broken_link(&movements);
        if let Some(row) = broken {
            tracing::warn!(product_id, movement_id = row.id, "Ledger balance chain broken");
        }

        Ok(LedgerReplay {
            product_id,
            replayed,
            stored: product.stock,
            movement_count: movements.len(),
            consistent: replayed == product.stock && broken.is_none(),
        })
    }

    /// available ≤ alert_threshold
    pub fn low_stock(&self) -> StockResult<Vec<Product>> {
        Ok(self
            .storage
            .list_products()?
            .into_iter()
            .filter(Product::is_low_stock)
            .collect())
    }
}
