pub mod entitlements;
pub mod subscriptions;
