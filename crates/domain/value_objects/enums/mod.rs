pub mod audiences;
pub mod plan_features;
pub mod plan_tiers;
pub mod subscription_statuses;
pub mod usage_counters;
