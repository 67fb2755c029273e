//! Stateful marketplace engines: crop listings, the offer lifecycle with
//! escrow bookkeeping, and two-party messaging.
//!
//! Each entity kind is owned by exactly one engine and mutated only through
//! that engine's API. External concerns (identity, notification fan-out,
//! media storage) sit behind the traits in [`gateway`].

pub mod gateway;
pub mod listings;
pub mod orders;
pub mod store;
pub mod threads;
