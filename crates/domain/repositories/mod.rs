pub mod plans;
pub mod subscriptions;
pub mod usage_events;
