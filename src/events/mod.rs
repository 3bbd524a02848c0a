pub mod broadcaster;
pub mod broker;

// Re-export common types
pub use broadcaster::{BroadcastError, StateBroadcaster, Subscription};
pub use broker::{BrokerError, StateBroker};
