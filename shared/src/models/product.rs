//! Product Model

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::stock::Bucket;

/// 三个库存桶 (available / reserved_local / reserved_express)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockBuckets {
    pub available: i64,
    pub reserved_local: i64,
    pub reserved_express: i64,
}

impl StockBuckets {
    pub fn new(available: i64, reserved_local: i64, reserved_express: i64) -> Self {
        Self {
            available,
            reserved_local,
            reserved_express,
        }
    }

    /// Total owned stock
    pub fn total(&self) -> i64 {
        self.available + self.reserved_local + self.reserved_express
    }

    pub fn get(&self, bucket: Bucket) -> i64 {
        match bucket {
            Bucket::Available => self.available,
            Bucket::ReservedLocal => self.reserved_local,
            Bucket::ReservedExpress => self.reserved_express,
        }
    }

    pub fn get_mut(&mut self, bucket: Bucket) -> &mut i64 {
        match bucket {
            Bucket::Available => &mut self.available,
            Bucket::ReservedLocal => &mut self.reserved_local,
            Bucket::ReservedExpress => &mut self.reserved_express,
        }
    }

    /// Buckets currently below zero
    pub fn negative_buckets(&self) -> Vec<Bucket> {
        Bucket::ALL
            .iter()
            .copied()
            .filter(|b| self.get(*b) < 0)
            .collect()
    }
}

/// Product entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    /// Unique product code
    pub code: String,
    pub name: String,
    pub unit_price: Decimal,
    /// Bundle price when an order carries exactly 2 units
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_for_two: Option<Decimal>,
    /// Bundle price when an order carries exactly 3 units
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_for_three: Option<Decimal>,
    pub alert_threshold: i64,
    #[serde(flatten)]
    pub stock: StockBuckets,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Product {
    /// available ≤ alert_threshold
    pub fn is_low_stock(&self) -> bool {
        self.stock.available <= self.alert_threshold
    }
}

/// Create product payload
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ProductCreate {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub unit_price: Decimal,
    pub price_for_two: Option<Decimal>,
    pub price_for_three: Option<Decimal>,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub alert_threshold: i64,
    /// Recorded as a RESTOCK movement
    #[serde(default)]
    #[validate(range(min = 0))]
    pub initial_stock: i64,
}

/// Restock payload
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RestockRequest {
    #[validate(range(min = 1))]
    pub quantity: i64,
    pub reason: Option<String>,
}
