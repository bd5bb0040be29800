//! Polling Agents (§4.4): one thread per `(backend instance, tier)` mirroring
//! backend state into the registry.

pub mod agent;
pub mod tier;

pub use agent::spawn_polling_agent;
pub use tier::PollingTier;
