use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::currency::{Amount, Quantity};
use crate::error::MarketError;
use crate::identity::AccountId;

/// Unique listing identifier, assigned monotonically by the listing store.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ListingId(pub u64);

impl fmt::Display for ListingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque content address of listing media, as returned by the media store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef(pub String);

/// A crop lot offered for sale by a farmer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CropListing {
    pub id: ListingId,
    pub farmer: AccountId,
    pub crop_type: String,
    pub quantity: Quantity,
    /// Asking price per kilogram.
    pub price_per_unit: Amount,
    pub location: String,
    pub harvest_date: DateTime<Utc>,
    pub media_ref: Option<MediaRef>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl CropListing {
    /// Creation-time invariants: positive quantity and price, a named crop,
    /// and a harvest date no earlier than the listing itself.
    pub fn validate(&self) -> Result<(), MarketError> {
        if self.crop_type.trim().is_empty() {
            return Err(MarketError::validation("crop type must not be empty"));
        }
        if self.quantity.is_zero() {
            return Err(MarketError::validation("quantity must be positive"));
        }
        if self.price_per_unit.is_zero() {
            return Err(MarketError::validation("price per unit must be positive"));
        }
        if self.harvest_date < self.created_at {
            return Err(MarketError::validation(
                "harvest date must not be in the past",
            ));
        }
        Ok(())
    }
}
