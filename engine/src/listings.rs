use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tracing::info;

use farmlink_common::currency::{Amount, Quantity};
use farmlink_common::error::MarketError;
use farmlink_common::identity::AccountId;
use farmlink_common::listing::{CropListing, ListingId};

use crate::gateway::{MarketEvent, MediaStore, NotificationBridge};
use crate::store::{KvStore, MemoryStore};

/// Offer visibility the listing store needs for availability and conflict
/// checks. Offers are owned by the order machine, which implements this.
pub trait OfferLedger {
    /// Total quantity committed to non-cancelled offers on a listing.
    fn committed_quantity(&self, listing: ListingId) -> Quantity;
    /// Whether any offer on the listing has reached `Accepted` or later
    /// (and was not subsequently cancelled). Such listings are frozen for
    /// edits.
    fn has_progressed_offer(&self, listing: ListingId) -> bool;
    /// Whether any offer on the listing is past the point of cancellation:
    /// in transit, delivered, or disputed. Such listings cannot be
    /// deactivated.
    fn has_blocking_offer(&self, listing: ListingId) -> bool;
    /// Run `apply` with the committed total while holding the offer lock,
    /// so no offer can be placed until `apply` returns. Quantity edits go
    /// through this guard; a plain `committed_quantity` read would go
    /// stale the moment it is returned.
    fn with_committed(
        &self,
        listing: ListingId,
        apply: &mut dyn FnMut(Quantity) -> Result<CropListing, MarketError>,
    ) -> Result<CropListing, MarketError>;
}

/// Edit to the mutable fields of a listing. `None` fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct ListingUpdate {
    pub crop_type: Option<String>,
    pub quantity: Option<Quantity>,
    pub price_per_unit: Option<Amount>,
    pub location: Option<String>,
    pub harvest_date: Option<DateTime<Utc>>,
}

/// Owns all [`CropListing`] entities.
pub struct ListingStore<S = MemoryStore<ListingId, CropListing>> {
    inner: RwLock<ListingState<S>>,
    media: Arc<dyn MediaStore>,
    notifier: Arc<dyn NotificationBridge>,
}

struct ListingState<S> {
    listings: S,
    next_id: u64,
}

impl ListingStore {
    pub fn in_memory(media: Arc<dyn MediaStore>, notifier: Arc<dyn NotificationBridge>) -> Self {
        Self::with_store(MemoryStore::new(), media, notifier)
    }
}

impl<S: KvStore<ListingId, CropListing>> ListingStore<S> {
    pub fn with_store(
        store: S,
        media: Arc<dyn MediaStore>,
        notifier: Arc<dyn NotificationBridge>,
    ) -> Self {
        ListingStore {
            inner: RwLock::new(ListingState {
                listings: store,
                next_id: 1,
            }),
            media,
            notifier,
        }
    }

    /// Create a listing. Media bytes, when provided, are pushed to the
    /// content store and the resulting hash recorded on the listing.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        &self,
        farmer: AccountId,
        crop_type: impl Into<String>,
        quantity: Quantity,
        price_per_unit: Amount,
        location: impl Into<String>,
        harvest_date: DateTime<Utc>,
        media: Option<&[u8]>,
    ) -> Result<ListingId, MarketError> {
        let media_ref = media.map(|bytes| self.media.store(bytes));

        let mut inner = self.inner.write().expect("listing store lock poisoned");
        let id = ListingId(inner.next_id);
        let listing = CropListing {
            id,
            farmer: farmer.clone(),
            crop_type: crop_type.into(),
            quantity,
            price_per_unit,
            location: location.into(),
            harvest_date,
            media_ref,
            is_active: true,
            created_at: Utc::now(),
        };
        listing.validate()?;
        inner.next_id += 1;
        inner.listings.insert(id, listing);
        drop(inner);

        info!(listing = id.0, %farmer, "listing created");
        self.notifier
            .notify(MarketEvent::ListingCreated { listing_id: id, farmer });
        Ok(id)
    }

    pub fn get(&self, id: ListingId) -> Result<CropListing, MarketError> {
        self.inner
            .read()
            .expect("listing store lock poisoned")
            .listings
            .get(&id)
            .cloned()
            .ok_or_else(|| MarketError::not_found("listing", id))
    }

    /// Listing ids for one farmer, in creation order.
    pub fn list_by_farmer(&self, farmer: &AccountId) -> Vec<ListingId> {
        self.inner
            .read()
            .expect("listing store lock poisoned")
            .listings
            .iter()
            .filter(|(_, l)| l.farmer == *farmer)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Quantity still available on a listing: the listed quantity minus
    /// everything committed to non-cancelled offers.
    pub fn remaining_quantity(
        &self,
        id: ListingId,
        ledger: &dyn OfferLedger,
    ) -> Result<Quantity, MarketError> {
        let listing = self.get(id)?;
        Ok(listing.quantity.saturating_sub(ledger.committed_quantity(id)))
    }

    /// Resolve the display URL for a listing's media, if it has any.
    pub fn media_url(&self, id: ListingId) -> Result<Option<String>, MarketError> {
        let listing = self.get(id)?;
        Ok(listing.media_ref.as_ref().and_then(|m| self.media.resolve(m)))
    }

    /// Edit mutable listing fields. Only the owning farmer may edit, and a
    /// listing is frozen once any offer on it has been accepted.
    pub fn update(
        &self,
        id: ListingId,
        actor: &AccountId,
        changes: ListingUpdate,
        ledger: &dyn OfferLedger,
    ) -> Result<CropListing, MarketError> {
        let current = self.get(id)?;
        if current.farmer != *actor {
            return Err(MarketError::unauthorized(actor, "edit this listing"));
        }
        if ledger.has_progressed_offer(id) {
            return Err(MarketError::conflict(
                "listing has accepted offers and can no longer be edited",
            ));
        }

        // The ledger holds the offer lock across the closure and we take
        // the listing lock inside it, the same offers-then-listings order
        // the order machine uses, so the committed total cannot grow
        // between the shrink check and the write.
        let updated = ledger.with_committed(id, &mut |committed| {
            let mut inner = self.inner.write().expect("listing store lock poisoned");
            let listing = inner
                .listings
                .get_mut(&id)
                .ok_or_else(|| MarketError::not_found("listing", id))?;

            let mut updated = listing.clone();
            if let Some(crop_type) = changes.crop_type.clone() {
                updated.crop_type = crop_type;
            }
            if let Some(quantity) = changes.quantity {
                if quantity < committed {
                    return Err(MarketError::conflict(
                        "quantity cannot drop below what open offers have reserved",
                    ));
                }
                updated.quantity = quantity;
            }
            if let Some(price) = changes.price_per_unit {
                updated.price_per_unit = price;
            }
            if let Some(location) = changes.location.clone() {
                updated.location = location;
            }
            if let Some(harvest_date) = changes.harvest_date {
                updated.harvest_date = harvest_date;
            }
            updated.validate()?;

            *listing = updated.clone();
            Ok(updated)
        })?;

        info!(listing = id.0, "listing updated");
        Ok(updated)
    }

    /// Take a listing off the market. Only the owning farmer may, and only
    /// while no offer on it is in a non-cancellable state.
    pub fn deactivate(
        &self,
        id: ListingId,
        actor: &AccountId,
        ledger: &dyn OfferLedger,
    ) -> Result<(), MarketError> {
        let current = self.get(id)?;
        if current.farmer != *actor {
            return Err(MarketError::unauthorized(actor, "deactivate this listing"));
        }
        if ledger.has_blocking_offer(id) {
            return Err(MarketError::conflict(
                "listing has offers in flight and cannot be deactivated",
            ));
        }

        let mut inner = self.inner.write().expect("listing store lock poisoned");
        if let Some(listing) = inner.listings.get_mut(&id) {
            listing.is_active = false;
        }
        drop(inner);

        info!(listing = id.0, "listing deactivated");
        self.notifier
            .notify(MarketEvent::ListingDeactivated { listing_id: id });
        Ok(())
    }

    /// Flip the active flag without authorization checks. Used by the order
    /// machine when accepted offers consume the full quantity.
    pub(crate) fn set_active(&self, id: ListingId, active: bool) {
        let mut inner = self.inner.write().expect("listing store lock poisoned");
        if let Some(listing) = inner.listings.get_mut(&id) {
            listing.is_active = active;
        }
    }
}
