//! Discount coupons

use crate::core::error::CouponRejection;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a coupon's `value` is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscountType {
    /// `value` is a percentage (1..=100)
    Percent,
    /// `value` is an amount in the billing currency
    Fixed,
}

crate::impl_data_entity!(
    Coupon,
    "coupon",
    "coupons",
    {
        /// Uppercased, unique
        code: String,
        description: Option<String>,
        discount_type: DiscountType,
        value: i64,
        max_uses: Option<u32>,
        used_count: u32,
        min_amount: i64,
        valid_from: Option<DateTime<Utc>>,
        valid_until: Option<DateTime<Utc>>,
        is_active: bool,
    }
);

impl Coupon {
    /// Check whether the coupon may be applied to `amount` at `now`
    pub fn check(&self, amount: i64, now: DateTime<Utc>) -> Result<(), CouponRejection> {
        if !self.is_active {
            return Err(CouponRejection::Inactive);
        }
        if self.valid_from.is_some_and(|from| now < from) {
            return Err(CouponRejection::NotStarted);
        }
        if self.valid_until.is_some_and(|until| now > until) {
            return Err(CouponRejection::Expired);
        }
        if self.max_uses.is_some_and(|max| self.used_count >= max) {
            return Err(CouponRejection::Exhausted);
        }
        if amount < self.min_amount {
            return Err(CouponRejection::MinAmount);
        }
        Ok(())
    }

    /// Discount for `amount`, never more than `amount` itself
    pub fn discount_for(&self, amount: i64) -> i64 {
        let amount = amount.max(0);
        let discount = match self.discount_type {
            DiscountType::Percent => amount.saturating_mul(self.value.clamp(0, 100)) / 100,
            DiscountType::Fixed => self.value.max(0),
        };
        discount.min(amount)
    }
}
