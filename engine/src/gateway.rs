//! External collaborator seams.
//!
//! The core computes state transitions in memory; identity, notification
//! delivery, and media storage are other systems reached only through
//! these traits. The in-memory implementations here are reference
//! integrations, not mocks with special-cased behavior.

use std::collections::BTreeMap;
use std::sync::{Mutex, RwLock};

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::Serialize;
use sha2::{Digest, Sha256};

use farmlink_common::chat::ThreadId;
use farmlink_common::identity::AccountId;
use farmlink_common::listing::{ListingId, MediaRef};
use farmlink_common::offer::{OfferId, OfferStatus};

/// Supplies the acting account and signing capability.
pub trait IdentityGateway: Send + Sync {
    /// The account the caller is operating as, if a session is active.
    fn current_account(&self) -> Option<AccountId>;
    /// Sign a payload as proof the action was taken by this identity.
    fn sign(&self, payload: &[u8]) -> Signature;
}

/// Identity gateway over a locally held ed25519 key.
pub struct LocalKeyGateway {
    account: AccountId,
    key: SigningKey,
}

impl LocalKeyGateway {
    pub fn new(account: AccountId, key: SigningKey) -> Self {
        LocalKeyGateway { account, key }
    }

    /// Gateway with a freshly generated key.
    pub fn generate(account: AccountId) -> Self {
        let key = SigningKey::generate(&mut rand::rngs::OsRng);
        LocalKeyGateway { account, key }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }
}

impl IdentityGateway for LocalKeyGateway {
    fn current_account(&self) -> Option<AccountId> {
        Some(self.account.clone())
    }

    fn sign(&self, payload: &[u8]) -> Signature {
        self.key.sign(payload)
    }
}

/// Domain event pushed to the notification bridge after every successful
/// mutation. Fire and forget; the core never consumes a reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum MarketEvent {
    ListingCreated {
        listing_id: ListingId,
        farmer: AccountId,
    },
    ListingDeactivated {
        listing_id: ListingId,
    },
    OfferMade {
        offer_id: OfferId,
        listing_id: ListingId,
        buyer: AccountId,
    },
    OfferTransitioned {
        offer_id: OfferId,
        from: OfferStatus,
        to: OfferStatus,
        actor: AccountId,
    },
    EscrowReleased {
        offer_id: OfferId,
    },
    MessageSent {
        thread_id: ThreadId,
        sender: AccountId,
        recipient: AccountId,
    },
    ThreadDeleted {
        thread_id: ThreadId,
    },
}

/// Receives domain events for delivery to interested parties.
pub trait NotificationBridge: Send + Sync {
    fn notify(&self, event: MarketEvent);
}

/// Bridge that drops every event, for callers that do not care.
#[derive(Debug, Default)]
pub struct NullNotifier;

impl NotificationBridge for NullNotifier {
    fn notify(&self, _event: MarketEvent) {}
}

/// Bridge that records events for inspection in tests.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<MarketEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MarketEvent> {
        self.events.lock().expect("notifier lock poisoned").clone()
    }
}

impl NotificationBridge for RecordingNotifier {
    fn notify(&self, event: MarketEvent) {
        self.events.lock().expect("notifier lock poisoned").push(event);
    }
}

/// Content-addressed storage for listing media. Only the listing store
/// talks to it.
pub trait MediaStore: Send + Sync {
    /// Store a blob, returning its content address.
    fn store(&self, bytes: &[u8]) -> MediaRef;
    /// Resolve a content address to a fetchable URL, if the blob exists.
    fn resolve(&self, media: &MediaRef) -> Option<String>;
}

/// In-memory content store addressing blobs by SHA-256.
#[derive(Default)]
pub struct InMemoryMediaStore {
    blobs: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryMediaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MediaStore for InMemoryMediaStore {
    fn store(&self, bytes: &[u8]) -> MediaRef {
        let key = hex::encode(Sha256::digest(bytes));
        self.blobs
            .write()
            .expect("media store lock poisoned")
            .insert(key.clone(), bytes.to_vec());
        MediaRef(key)
    }

    fn resolve(&self, media: &MediaRef) -> Option<String> {
        let blobs = self.blobs.read().expect("media store lock poisoned");
        blobs
            .contains_key(&media.0)
            .then(|| format!("memory://media/{}", media.0))
    }
}
