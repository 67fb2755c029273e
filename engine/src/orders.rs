use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use ed25519_dalek::Signature;
use serde::Serialize;
use tracing::{info, warn};

use farmlink_common::currency::{escrow_for, Amount, Quantity};
use farmlink_common::error::MarketError;
use farmlink_common::identity::{AccountId, UserRole};
use farmlink_common::listing::{CropListing, ListingId};
use farmlink_common::offer::{
    offer_signable_bytes, DisputeResolution, EscrowState, Offer, OfferEvent, OfferId, OfferStatus,
};

use crate::gateway::{IdentityGateway, MarketEvent, NotificationBridge};
use crate::listings::{ListingStore, OfferLedger};
use crate::store::{KvStore, MemoryStore};

/// One committed transition, signed through the identity gateway and kept
/// in an append-only trail. Offers are never deleted, so the trail plus the
/// offer set reconstructs every order's full history.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionRecord {
    pub offer_id: OfferId,
    pub event: &'static str,
    pub from: OfferStatus,
    pub to: OfferStatus,
    pub actor: AccountId,
    pub at: DateTime<Utc>,
    pub signature: Signature,
}

/// Owns all [`Offer`] entities and drives their lifecycle.
///
/// Every mutation validates fully before touching state, under one write
/// lock per call: a transition either commits whole (status, escrow flag,
/// dispute fields, audit record) or not at all, and racing transitions on
/// the same offer serialize.
pub struct OrderStateMachine<
    L = MemoryStore<ListingId, CropListing>,
    S = MemoryStore<OfferId, Offer>,
> {
    listings: Arc<ListingStore<L>>,
    inner: RwLock<OrderState<S>>,
    gateway: Arc<dyn IdentityGateway>,
    notifier: Arc<dyn NotificationBridge>,
    arbitrator: Option<AccountId>,
}

struct OrderState<S> {
    offers: S,
    audit: Vec<TransitionRecord>,
    next_id: u64,
}

impl<L, S> OrderStateMachine<L, S>
where
    L: KvStore<ListingId, CropListing>,
    S: KvStore<OfferId, Offer> + Default,
{
    pub fn new(
        listings: Arc<ListingStore<L>>,
        gateway: Arc<dyn IdentityGateway>,
        notifier: Arc<dyn NotificationBridge>,
    ) -> Self {
        OrderStateMachine {
            listings,
            inner: RwLock::new(OrderState {
                offers: S::default(),
                audit: Vec::new(),
                next_id: 1,
            }),
            gateway,
            notifier,
            arbitrator: None,
        }
    }

    /// Designate an account that may resolve disputes besides the farmer.
    pub fn with_arbitrator(mut self, arbitrator: AccountId) -> Self {
        self.arbitrator = Some(arbitrator);
        self
    }
}

impl<L, S> OrderStateMachine<L, S>
where
    L: KvStore<ListingId, CropListing>,
    S: KvStore<OfferId, Offer>,
{
    /// Place an offer on a listing. The escrow amount is computed and fixed
    /// here; the price is a snapshot independent of later listing edits.
    pub fn make_offer(
        &self,
        listing_id: ListingId,
        buyer: AccountId,
        quantity: Quantity,
        price_per_unit: Amount,
    ) -> Result<OfferId, MarketError> {
        if quantity.is_zero() {
            return Err(MarketError::validation("offer quantity must be positive"));
        }
        if price_per_unit.is_zero() {
            return Err(MarketError::validation("offer price must be positive"));
        }
        let escrow_amount = escrow_for(quantity, price_per_unit)
            .ok_or_else(|| MarketError::validation("escrow amount overflows"))?;

        // The listing snapshot, the availability check, and the insert all
        // happen while holding the offer lock: two racing offers cannot
        // both fit into the same remainder, and a racing quantity edit
        // (which also holds the offer lock, through the ledger guard)
        // cannot slip a stale quantity past the check.
        let mut inner = self.inner.write().expect("order machine lock poisoned");
        let listing = self.listings.get(listing_id)?;
        if !listing.is_active {
            return Err(MarketError::conflict("listing is not active"));
        }
        if listing.farmer == buyer {
            return Err(MarketError::validation(
                "farmer cannot offer on their own listing",
            ));
        }
        let remaining = listing
            .quantity
            .saturating_sub(committed(&inner.offers, listing_id));
        if quantity > remaining {
            return Err(MarketError::InsufficientQuantity {
                requested: quantity,
                remaining,
            });
        }

        let id = OfferId(inner.next_id);
        inner.next_id += 1;
        let mut offer = Offer {
            id,
            listing_id,
            buyer: buyer.clone(),
            quantity,
            price_per_unit,
            status: OfferStatus::Offered,
            escrow_amount,
            escrow_state: EscrowState::Held,
            dispute_reason: None,
            dispute_created_at: None,
            created_at: Utc::now(),
            signature: Signature::from_bytes(&[0u8; 64]),
        };
        offer.signature = self.gateway.sign(&offer_signable_bytes(&offer));
        inner.offers.insert(id, offer);
        drop(inner);

        info!(offer = id.0, listing = listing_id.0, %buyer, escrow = %escrow_amount, "offer made");
        self.notifier.notify(MarketEvent::OfferMade {
            offer_id: id,
            listing_id,
            buyer,
        });
        Ok(id)
    }

    /// Apply an event to an offer. Transition validity is checked before
    /// actor authorization, so a repeated confirm on a completed offer
    /// reports `InvalidTransition` rather than an authorization failure.
    pub fn transition(
        &self,
        offer_id: OfferId,
        event: OfferEvent,
        actor: &AccountId,
    ) -> Result<Offer, MarketError> {
        if let OfferEvent::RaiseDispute { reason } = &event {
            if reason.trim().is_empty() {
                return Err(MarketError::validation("dispute reason must not be empty"));
            }
        }

        let mut inner = self.inner.write().expect("order machine lock poisoned");
        let (from, listing_id, buyer) = {
            let current = inner
                .offers
                .get(&offer_id)
                .ok_or_else(|| MarketError::not_found("offer", offer_id))?;
            (current.status, current.listing_id, current.buyer.clone())
        };

        let to = from.next(&event).ok_or(MarketError::InvalidTransition {
            from,
            event: event.name(),
        })?;

        // Lock order is offers first, listings second everywhere the two
        // nest, so this nested read cannot cycle.
        let listing = self.listings.get(listing_id)?;
        self.authorize(&event, actor, &listing.farmer, &buyer)?;

        if matches!(event, OfferEvent::Accept) && !listing.is_active {
            return Err(MarketError::conflict("listing is no longer active"));
        }

        let now = Utc::now();
        let offer = inner
            .offers
            .get_mut(&offer_id)
            .expect("offer existence checked above");
        offer.status = to;
        if let OfferEvent::RaiseDispute { reason } = &event {
            offer.dispute_reason = Some(reason.clone());
            offer.dispute_created_at = Some(now);
        }
        match to {
            OfferStatus::Completed => offer.escrow_state = EscrowState::Released,
            OfferStatus::Cancelled => offer.escrow_state = EscrowState::Refunded,
            _ => {}
        }
        let updated = offer.clone();

        let signature = self
            .gateway
            .sign(&transition_signable_bytes(offer_id, from, to, actor, &now));
        inner.audit.push(TransitionRecord {
            offer_id,
            event: event.name(),
            from,
            to,
            actor: actor.clone(),
            at: now,
            signature,
        });
        let consumed = to == OfferStatus::Accepted
            && listing
                .quantity
                .saturating_sub(committed(&inner.offers, listing_id))
                .is_zero();
        drop(inner);

        // Accepting the last available kilogram consumes the listing.
        if consumed {
            self.listings.set_active(listing_id, false);
            self.notifier
                .notify(MarketEvent::ListingDeactivated { listing_id });
        }

        if to == OfferStatus::Disputed {
            warn!(offer = offer_id.0, %actor, reason = updated.dispute_reason.as_deref().unwrap_or(""), "offer disputed");
        } else {
            info!(offer = offer_id.0, from = ?from, to = ?to, %actor, "offer transitioned");
        }
        self.notifier.notify(MarketEvent::OfferTransitioned {
            offer_id,
            from,
            to,
            actor: actor.clone(),
        });
        if to == OfferStatus::Completed {
            info!(offer = offer_id.0, amount = %updated.escrow_amount, "escrow released");
            self.notifier
                .notify(MarketEvent::EscrowReleased { offer_id });
        }
        Ok(updated)
    }

    pub fn accept_offer(&self, offer: OfferId, actor: &AccountId) -> Result<Offer, MarketError> {
        self.transition(offer, OfferEvent::Accept, actor)
    }

    pub fn reject_offer(&self, offer: OfferId, actor: &AccountId) -> Result<Offer, MarketError> {
        self.transition(offer, OfferEvent::Reject, actor)
    }

    pub fn cancel_offer(&self, offer: OfferId, actor: &AccountId) -> Result<Offer, MarketError> {
        self.transition(offer, OfferEvent::Cancel, actor)
    }

    pub fn mark_in_transit(&self, offer: OfferId, actor: &AccountId) -> Result<Offer, MarketError> {
        self.transition(offer, OfferEvent::MarkInTransit, actor)
    }

    pub fn mark_delivered(&self, offer: OfferId, actor: &AccountId) -> Result<Offer, MarketError> {
        self.transition(offer, OfferEvent::MarkDelivered, actor)
    }

    pub fn confirm_receipt(&self, offer: OfferId, actor: &AccountId) -> Result<Offer, MarketError> {
        self.transition(offer, OfferEvent::ConfirmReceipt, actor)
    }

    pub fn raise_dispute(
        &self,
        offer: OfferId,
        actor: &AccountId,
        reason: impl Into<String>,
    ) -> Result<Offer, MarketError> {
        self.transition(
            offer,
            OfferEvent::RaiseDispute {
                reason: reason.into(),
            },
            actor,
        )
    }

    pub fn resolve_dispute(
        &self,
        offer: OfferId,
        actor: &AccountId,
        resolution: DisputeResolution,
    ) -> Result<Offer, MarketError> {
        self.transition(offer, OfferEvent::ResolveDispute { resolution }, actor)
    }

    pub fn get_offer(&self, id: OfferId) -> Result<Offer, MarketError> {
        self.inner
            .read()
            .expect("order machine lock poisoned")
            .offers
            .get(&id)
            .cloned()
            .ok_or_else(|| MarketError::not_found("offer", id))
    }

    /// Offer ids placed by one buyer, in creation order.
    pub fn offers_by_buyer(&self, buyer: &AccountId) -> Vec<OfferId> {
        self.inner
            .read()
            .expect("order machine lock poisoned")
            .offers
            .iter()
            .filter(|(_, o)| o.buyer == *buyer)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn offers_for_listing(&self, listing: ListingId) -> Vec<Offer> {
        self.inner
            .read()
            .expect("order machine lock poisoned")
            .offers
            .iter()
            .filter(|(_, o)| o.listing_id == listing)
            .map(|(_, o)| o.clone())
            .collect()
    }

    /// Quantity still available on a listing after all non-cancelled offers.
    pub fn remaining_quantity(&self, listing_id: ListingId) -> Result<Quantity, MarketError> {
        let listing = self.listings.get(listing_id)?;
        let inner = self.inner.read().expect("order machine lock poisoned");
        Ok(listing
            .quantity
            .saturating_sub(committed(&inner.offers, listing_id)))
    }

    pub fn audit_trail(&self) -> Vec<TransitionRecord> {
        self.inner
            .read()
            .expect("order machine lock poisoned")
            .audit
            .clone()
    }

    fn authorize(
        &self,
        event: &OfferEvent,
        actor: &AccountId,
        farmer: &AccountId,
        buyer: &AccountId,
    ) -> Result<(), MarketError> {
        let permitted = match event.required_role() {
            Some(UserRole::Farmer) => {
                actor == farmer
                    || (matches!(event, OfferEvent::ResolveDispute { .. })
                        && self.arbitrator.as_ref() == Some(actor))
            }
            Some(UserRole::Buyer) => actor == buyer,
            None => actor == farmer || actor == buyer,
        };
        if permitted {
            Ok(())
        } else {
            Err(MarketError::unauthorized(actor, event.name()))
        }
    }
}

impl<L, S> OfferLedger for OrderStateMachine<L, S>
where
    L: KvStore<ListingId, CropListing>,
    S: KvStore<OfferId, Offer>,
{
    fn committed_quantity(&self, listing: ListingId) -> Quantity {
        let inner = self.inner.read().expect("order machine lock poisoned");
        committed(&inner.offers, listing)
    }

    fn has_progressed_offer(&self, listing: ListingId) -> bool {
        let inner = self.inner.read().expect("order machine lock poisoned");
        let found = inner.offers.iter().any(|(_, o)| {
            o.listing_id == listing
                && matches!(
                    o.status,
                    OfferStatus::Accepted
                        | OfferStatus::InTransit
                        | OfferStatus::Delivered
                        | OfferStatus::Disputed
                        | OfferStatus::Completed
                )
        });
        found
    }

    fn has_blocking_offer(&self, listing: ListingId) -> bool {
        let inner = self.inner.read().expect("order machine lock poisoned");
        let found = inner.offers.iter().any(|(_, o)| {
            o.listing_id == listing
                && matches!(
                    o.status,
                    OfferStatus::InTransit | OfferStatus::Delivered | OfferStatus::Disputed
                )
        });
        found
    }

    fn with_committed(
        &self,
        listing: ListingId,
        apply: &mut dyn FnMut(Quantity) -> Result<CropListing, MarketError>,
    ) -> Result<CropListing, MarketError> {
        // Held for the whole of `apply`: no offer can be inserted while a
        // quantity edit is in flight.
        let inner = self.inner.read().expect("order machine lock poisoned");
        apply(committed(&inner.offers, listing))
    }
}

fn committed<S: KvStore<OfferId, Offer>>(offers: &S, listing: ListingId) -> Quantity {
    offers
        .iter()
        .filter(|(_, o)| o.listing_id == listing && o.reserves_quantity())
        .fold(Quantity::ZERO, |acc, (_, o)| acc.saturating_add(o.quantity))
}

fn transition_signable_bytes(
    offer_id: OfferId,
    from: OfferStatus,
    to: OfferStatus,
    actor: &AccountId,
    at: &DateTime<Utc>,
) -> Vec<u8> {
    #[derive(Serialize)]
    struct Signable<'a> {
        offer_id: OfferId,
        from: OfferStatus,
        to: OfferStatus,
        actor: &'a AccountId,
        at: &'a DateTime<Utc>,
    }
    serde_json::to_vec(&Signable {
        offer_id,
        from,
        to,
        actor,
        at,
    })
    .expect("serialization should not fail")
}
