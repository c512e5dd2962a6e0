//! Shared data model and error taxonomy for the Bitcoin Sprint relay.
//!
//! Everything in this crate is plain data: no I/O, no locking, no async.
//! `relay-core` builds the pipeline out of these types; `relay-api` speaks
//! them over the wire.

pub mod chain;
pub mod error;
pub mod event;
pub mod feature;
pub mod tier;

pub use chain::Chain;
pub use error::{RelayError, RelayResult};
pub use event::BlockEvent;
pub use feature::RelayFeature;
pub use tier::{Tier, TierConfig};
