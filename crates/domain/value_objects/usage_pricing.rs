use serde::{Deserialize, Serialize};

/// Per-period pricing of a metered counter: a free allotment, then a flat unit rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeteredPricing {
    pub free_per_period: i64,
    pub unit_price_minor: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageCharge {
    pub billable_units: i64,
    pub cost_minor: i64,
    pub was_free: bool,
}

impl MeteredPricing {
    /// Prices `amount` units consumed on top of `used_before` units this period.
    pub fn charge(&self, used_before: i64, amount: i64) -> UsageCharge {
        let free_left = (self.free_per_period - used_before).max(0);
        let free_units = amount.min(free_left);
        let billable_units = amount - free_units;

        UsageCharge {
            billable_units,
            cost_minor: billable_units.saturating_mul(self.unit_price_minor),
            was_free: billable_units == 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRICING: MeteredPricing = MeteredPricing {
        free_per_period: 3,
        unit_price_minor: 50,
    };

    #[test]
    fn inside_allotment_is_free() {
        let charge = PRICING.charge(0, 1);
        assert!(charge.was_free);
        assert_eq!(charge.cost_minor, 0);
    }

    #[test]
    fn straddling_the_allotment_bills_only_the_excess() {
        let charge = PRICING.charge(2, 3);
        assert_eq!(charge.billable_units, 2);
        assert_eq!(charge.cost_minor, 100);
        assert!(!charge.was_free);
    }

    #[test]
    fn past_the_allotment_bills_everything() {
        let charge = PRICING.charge(10, 1);
        assert_eq!(charge.billable_units, 1);
        assert_eq!(charge.cost_minor, 50);
    }
}
