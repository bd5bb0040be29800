//! The Network Allocator (§4.6): leases isolated subnet identities.

pub mod allocator;
pub mod lease;

pub use allocator::{AllocatorConfig, NetworkAllocator};
pub use lease::NetworkLease;
