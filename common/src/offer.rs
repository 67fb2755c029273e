use std::fmt;

use chrono::{DateTime, Utc};
use ed25519_dalek::Signature;
use serde::{Deserialize, Serialize};

use crate::currency::{Amount, Quantity};
use crate::identity::{AccountId, UserRole};
use crate::listing::ListingId;

/// Unique offer identifier, assigned monotonically by the order machine.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct OfferId(pub u64);

impl fmt::Display for OfferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where the funds escrowed against an offer currently stand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscrowState {
    /// Held against the offer until a release-triggering transition.
    Held,
    /// Released to the farmer on completion. Happens at most once.
    Released,
    /// Returned to the buyer on cancellation.
    Refunded,
}

/// Status of an offer on a crop listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OfferStatus {
    Offered,
    Accepted,
    InTransit,
    Delivered,
    Disputed,
    Completed,
    Cancelled,
}

impl OfferStatus {
    /// Terminal statuses permit no further transition.
    pub fn is_terminal(self) -> bool {
        matches!(self, OfferStatus::Completed | OfferStatus::Cancelled)
    }

    /// Explicit transition table. Dispute and cancel paths are not linearly
    /// ordered with the happy path, so validity is a table lookup, never an
    /// ordinal comparison.
    pub fn next(self, event: &OfferEvent) -> Option<OfferStatus> {
        use OfferStatus::*;
        match (self, event) {
            (Offered, OfferEvent::Accept) => Some(Accepted),
            (Offered, OfferEvent::Reject) => Some(Cancelled),
            (Offered | Accepted, OfferEvent::Cancel) => Some(Cancelled),
            (Accepted, OfferEvent::MarkInTransit) => Some(InTransit),
            (InTransit, OfferEvent::MarkDelivered) => Some(Delivered),
            (Delivered, OfferEvent::ConfirmReceipt) => Some(Completed),
            (Accepted | InTransit | Delivered, OfferEvent::RaiseDispute { .. }) => Some(Disputed),
            (Disputed, OfferEvent::ResolveDispute { resolution }) => Some(match resolution {
                DisputeResolution::Release => Completed,
                DisputeResolution::Refund => Cancelled,
            }),
            _ => None,
        }
    }
}

/// How an arbitrating party settles a dispute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisputeResolution {
    /// Release the escrow to the farmer; the offer completes.
    Release,
    /// Refund the escrow to the buyer; the offer is cancelled.
    Refund,
}

/// An event applied to an offer by one of its parties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OfferEvent {
    Accept,
    Reject,
    /// Buyer withdraws before the produce ships.
    Cancel,
    MarkInTransit,
    MarkDelivered,
    ConfirmReceipt,
    RaiseDispute { reason: String },
    ResolveDispute { resolution: DisputeResolution },
}

impl OfferEvent {
    /// Which side of the exchange may emit this event. `None` means either
    /// party may (disputes).
    pub fn required_role(&self) -> Option<UserRole> {
        match self {
            OfferEvent::Accept
            | OfferEvent::Reject
            | OfferEvent::MarkInTransit
            | OfferEvent::MarkDelivered
            | OfferEvent::ResolveDispute { .. } => Some(UserRole::Farmer),
            OfferEvent::Cancel | OfferEvent::ConfirmReceipt => Some(UserRole::Buyer),
            OfferEvent::RaiseDispute { .. } => None,
        }
    }

    /// Stable event name for errors, logs, and the audit trail.
    pub fn name(&self) -> &'static str {
        match self {
            OfferEvent::Accept => "accept",
            OfferEvent::Reject => "reject",
            OfferEvent::Cancel => "cancel",
            OfferEvent::MarkInTransit => "mark-in-transit",
            OfferEvent::MarkDelivered => "mark-delivered",
            OfferEvent::ConfirmReceipt => "confirm-receipt",
            OfferEvent::RaiseDispute { .. } => "raise-dispute",
            OfferEvent::ResolveDispute { .. } => "resolve-dispute",
        }
    }
}

/// A buyer's offer on a listing. Never deleted, only terminalized, so the
/// full order history stays available for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    pub id: OfferId,
    pub listing_id: ListingId,
    pub buyer: AccountId,
    pub quantity: Quantity,
    /// Price snapshot taken when the offer was made; later listing edits
    /// never change it.
    pub price_per_unit: Amount,
    pub status: OfferStatus,
    /// `quantity × price_per_unit`, fixed at creation.
    pub escrow_amount: Amount,
    pub escrow_state: EscrowState,
    pub dispute_reason: Option<String>,
    pub dispute_created_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Buyer's signature over the offer data.
    pub signature: Signature,
}

impl Offer {
    /// Whether this offer still counts against its listing's remaining
    /// quantity. Only cancellation frees the reserved produce.
    pub fn reserves_quantity(&self) -> bool {
        self.status != OfferStatus::Cancelled
    }
}

/// Serialize offer fields for signing (everything except signature and the
/// mutable status/escrow fields).
pub fn offer_signable_bytes(offer: &Offer) -> Vec<u8> {
    let signable = SignableOffer {
        id: offer.id,
        listing_id: offer.listing_id,
        buyer: &offer.buyer,
        quantity: offer.quantity,
        price_per_unit: offer.price_per_unit,
        escrow_amount: offer.escrow_amount,
        created_at: &offer.created_at,
    };
    serde_json::to_vec(&signable).expect("serialization should not fail")
}

#[derive(Serialize)]
struct SignableOffer<'a> {
    id: OfferId,
    listing_id: ListingId,
    buyer: &'a AccountId,
    quantity: Quantity,
    price_per_unit: Amount,
    escrow_amount: Amount,
    created_at: &'a DateTime<Utc>,
}
