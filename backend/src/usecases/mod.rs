pub mod clock;
pub mod entitlements;
pub mod plan_resolver;
pub mod subscriptions;
pub mod usage_insights;

#[cfg(test)]
pub mod test_fixtures;
