//! Bundle pricing
//!
//! 2 件、3 件有固定套餐价时使用套餐价，否则单价 × 数量。

use rust_decimal::Decimal;
use shared::models::Product;

pub fn order_amount(product: &Product, quantity: i64) -> Decimal {
    let bundle = match quantity {
        2 => product.price_for_two,
        3 => product.price_for_three,
        _ => None,
    };
    bundle.unwrap_or_else(|| product.unit_price * Decimal::from(quantity))
}
