//! Domain types shared across the marketplace engines: identities, fixed
//! point money and mass, listings, offers and their transition table, and
//! the chat entities.

pub mod chat;
pub mod currency;
pub mod error;
pub mod identity;
pub mod listing;
pub mod offer;
