use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::AccountId;
use crate::listing::ListingId;

/// Upper bound on message content, in bytes.
pub const MAX_MESSAGE_LEN: usize = 2_000;

/// Unique identifier for a message (random u64).
pub type MessageId = u64;

/// Deterministic conversation identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ThreadId(pub String);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the thread id for a participant pair, optionally scoped to a
/// listing: the sorted pair joined with `-`, with the listing id appended
/// when present. Symmetric in `a` and `b`.
pub fn thread_id(a: &AccountId, b: &AccountId, listing: Option<ListingId>) -> ThreadId {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let id = match listing {
        Some(l) => format!("{}-{}-{}", lo.0, hi.0, l.0),
        None => format!("{}-{}", lo.0, hi.0),
    };
    ThreadId(id)
}

/// A two-party conversation container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatThread {
    pub id: ThreadId,
    pub participants: [AccountId; 2],
    pub last_message: Option<MessageId>,
    /// Unread messages currently sitting in this thread, both directions
    /// combined. It reaches zero only once every participant has read;
    /// per-recipient counts come from the thread engine's
    /// `unread_count_for`.
    pub unread_count: u32,
    pub updated_at: DateTime<Utc>,
    pub listing_id: Option<ListingId>,
}

impl ChatThread {
    pub fn has_participant(&self, account: &AccountId) -> bool {
        self.participants.iter().any(|p| p == account)
    }
}

/// A single message within a thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub thread_id: ThreadId,
    pub sender_id: AccountId,
    pub recipient_id: AccountId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Flips false→true when the recipient reads the thread; never reverts.
    pub read: bool,
    /// Inherited from the thread context.
    pub listing_id: Option<ListingId>,
}
