use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};

use crate::domain::Order;

/// Deduplication key for an order submission.
///
/// Hashes symbol, side and quantity together with the coarse time bucket the submission
/// falls into, so a retried caller that resubmits the same order inside one window
/// produces the same key.
pub fn dedup_key(order: &Order, at: DateTime<Utc>, window_secs: u64) -> String {
    hash_request(order.symbol(), &order.side().to_string(), order.quantity(), time_bucket(at, window_secs))
}

/// Index of the `window_secs`-wide bucket containing `at`
pub fn time_bucket(at: DateTime<Utc>, window_secs: u64) -> i64 {
    let window = window_secs.max(1) as i64;
    at.timestamp().div_euclid(window)
}

fn hash_request(symbol: &str, action: &str, quantity: Decimal, bucket: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(symbol.as_bytes());
    hasher.update(b"|");
    hasher.update(action.as_bytes());
    hasher.update(b"|");
    // normalize so 10 and 10.00 hash the same
    hasher.update(quantity.normalize().to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(bucket.to_le_bytes());
    format!("{:x}", hasher.finalize())
}
