//! `pankki` simulates a bank branch as a federation of lockstep-synchronized
//! simulation nodes. Each node runs its own cooperative tick loop on its own
//! thread; the only way state crosses a node boundary is a typed interaction
//! routed through the federation hub, and the only suspension point is the
//! time-advance request that keeps every node inside the causality bound.

pub mod bank;
pub mod bus;
pub mod config;
pub mod error;
pub mod federation;
pub mod node;

pub use config::SimConfig;
pub use error::SimError;

/// Logical simulation time, in whole ticks.
pub type SimTime = u64;
