use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use farmlink_common::chat::{
    thread_id, ChatMessage, ChatThread, MessageId, ThreadId, MAX_MESSAGE_LEN,
};
use farmlink_common::error::MarketError;
use farmlink_common::identity::AccountId;
use farmlink_common::listing::ListingId;

use crate::gateway::{MarketEvent, NotificationBridge};
use crate::store::{KvStore, MemoryStore};

/// Last-known connectivity for an account. The default is offline,
/// never seen.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Presence {
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Owns all [`ChatThread`] and [`ChatMessage`] entities.
///
/// Thread identity is derived from the participant pair (and listing scope),
/// so "open a conversation" and "look up the conversation" are the same
/// operation. The tracked unread counter is recomputed from the message set
/// after every mutation rather than incrementally adjusted, so it can never
/// drift from the per-message read flags.
pub struct ThreadEngine<S = MemoryStore<ThreadId, ChatThread>> {
    inner: RwLock<ThreadState<S>>,
    notifier: Arc<dyn NotificationBridge>,
}

struct ThreadState<S> {
    threads: S,
    messages: BTreeMap<ThreadId, Vec<ChatMessage>>,
    presence: BTreeMap<AccountId, Presence>,
}

impl ThreadEngine {
    pub fn in_memory(notifier: Arc<dyn NotificationBridge>) -> Self {
        Self::with_store(MemoryStore::new(), notifier)
    }
}

impl<S: KvStore<ThreadId, ChatThread>> ThreadEngine<S> {
    pub fn with_store(store: S, notifier: Arc<dyn NotificationBridge>) -> Self {
        ThreadEngine {
            inner: RwLock::new(ThreadState {
                threads: store,
                messages: BTreeMap::new(),
                presence: BTreeMap::new(),
            }),
            notifier,
        }
    }

    /// Open (or return) the conversation between two accounts, optionally
    /// scoped to a listing.
    pub fn get_or_create(
        &self,
        a: &AccountId,
        b: &AccountId,
        listing: Option<ListingId>,
    ) -> Result<ChatThread, MarketError> {
        if a == b {
            return Err(MarketError::validation(
                "a conversation needs two distinct participants",
            ));
        }
        let mut inner = self.inner.write().expect("thread engine lock poisoned");
        Ok(get_or_create_locked(&mut inner, a, b, listing).clone())
    }

    /// Send a message, creating the thread if it does not exist yet.
    pub fn send(
        &self,
        sender: &AccountId,
        recipient: &AccountId,
        content: impl Into<String>,
        listing: Option<ListingId>,
    ) -> Result<ChatMessage, MarketError> {
        if sender == recipient {
            return Err(MarketError::validation(
                "sender and recipient must be distinct",
            ));
        }
        let content = content.into();
        if content.trim().is_empty() {
            return Err(MarketError::validation("message content must not be empty"));
        }
        if content.len() > MAX_MESSAGE_LEN {
            return Err(MarketError::validation(
                "message content exceeds the maximum length",
            ));
        }

        let mut inner = self.inner.write().expect("thread engine lock poisoned");
        let id = get_or_create_locked(&mut inner, sender, recipient, listing)
            .id
            .clone();

        let log = inner.messages.entry(id.clone()).or_default();
        let mut message_id: MessageId = rand::random();
        while log.iter().any(|m| m.id == message_id) {
            message_id = rand::random();
        }
        let message = ChatMessage {
            id: message_id,
            thread_id: id.clone(),
            sender_id: sender.clone(),
            recipient_id: recipient.clone(),
            content,
            timestamp: Utc::now(),
            read: false,
            listing_id: listing,
        };
        log.push(message.clone());
        refresh_thread(&mut inner, &id);
        drop(inner);

        info!(thread = %id, %sender, "message sent");
        self.notifier.notify(MarketEvent::MessageSent {
            thread_id: id,
            sender: sender.clone(),
            recipient: recipient.clone(),
        });
        Ok(message)
    }

    /// Messages of a thread in timestamp order.
    pub fn messages(&self, thread: &ThreadId) -> Vec<ChatMessage> {
        let inner = self.inner.read().expect("thread engine lock poisoned");
        let mut log = inner.messages.get(thread).cloned().unwrap_or_default();
        log.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        log
    }

    pub fn get_thread(&self, thread: &ThreadId) -> Result<ChatThread, MarketError> {
        self.inner
            .read()
            .expect("thread engine lock poisoned")
            .threads
            .get(thread)
            .cloned()
            .ok_or_else(|| MarketError::not_found("thread", thread.clone()))
    }

    /// Conversations an account participates in, most recently active first.
    pub fn threads_for_user(&self, account: &AccountId) -> Vec<ChatThread> {
        let inner = self.inner.read().expect("thread engine lock poisoned");
        let mut threads: Vec<ChatThread> = inner
            .threads
            .iter()
            .filter(|(_, t)| t.has_participant(account))
            .map(|(_, t)| t.clone())
            .collect();
        threads.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        threads
    }

    /// Mark every message addressed to `reader` in the thread as read.
    /// The thread counter then reflects whatever the other participant
    /// still has unread, which is zero in the common one-directional case.
    pub fn mark_read(&self, thread: &ThreadId, reader: &AccountId) -> Result<(), MarketError> {
        let mut inner = self.inner.write().expect("thread engine lock poisoned");
        let owned = inner
            .threads
            .get(thread)
            .ok_or_else(|| MarketError::not_found("thread", thread.clone()))?;
        if !owned.has_participant(reader) {
            return Err(MarketError::unauthorized(reader, "read this thread"));
        }
        if let Some(log) = inner.messages.get_mut(thread) {
            for message in log.iter_mut().filter(|m| m.recipient_id == *reader) {
                message.read = true;
            }
        }
        refresh_thread(&mut inner, thread);
        Ok(())
    }

    /// Unread messages addressed to an account, across all threads.
    pub fn unread_count_for(&self, account: &AccountId) -> usize {
        let inner = self.inner.read().expect("thread engine lock poisoned");
        inner
            .messages
            .values()
            .flatten()
            .filter(|m| m.recipient_id == *account && !m.read)
            .count()
    }

    /// Remove one message. Only its sender may; returns whether anything
    /// was removed.
    pub fn delete_message(
        &self,
        thread: &ThreadId,
        message: MessageId,
        actor: &AccountId,
    ) -> Result<bool, MarketError> {
        let mut inner = self.inner.write().expect("thread engine lock poisoned");
        let Some(log) = inner.messages.get_mut(thread) else {
            return Ok(false);
        };
        let Some(position) = log.iter().position(|m| m.id == message) else {
            return Ok(false);
        };
        if log[position].sender_id != *actor {
            return Err(MarketError::unauthorized(actor, "delete this message"));
        }
        log.remove(position);
        refresh_thread(&mut inner, thread);
        Ok(true)
    }

    /// Remove a conversation and all of its messages. Either participant
    /// may.
    pub fn delete_thread(&self, thread: &ThreadId, actor: &AccountId) -> Result<(), MarketError> {
        let mut inner = self.inner.write().expect("thread engine lock poisoned");
        let owned = inner
            .threads
            .get(thread)
            .ok_or_else(|| MarketError::not_found("thread", thread.clone()))?;
        if !owned.has_participant(actor) {
            return Err(MarketError::unauthorized(actor, "delete this thread"));
        }
        inner.threads.remove(thread);
        inner.messages.remove(thread);
        drop(inner);

        info!(thread = %thread, %actor, "thread deleted");
        self.notifier.notify(MarketEvent::ThreadDeleted {
            thread_id: thread.clone(),
        });
        Ok(())
    }

    /// Record an account as online or offline. Every call refreshes
    /// `last_seen`.
    pub fn set_presence(&self, account: &AccountId, online: bool) {
        let mut inner = self.inner.write().expect("thread engine lock poisoned");
        inner.presence.insert(
            account.clone(),
            Presence {
                is_online: online,
                last_seen: Some(Utc::now()),
            },
        );
    }

    /// Presence for an account; never-seen accounts read as offline.
    pub fn presence(&self, account: &AccountId) -> Presence {
        self.inner
            .read()
            .expect("thread engine lock poisoned")
            .presence
            .get(account)
            .cloned()
            .unwrap_or_default()
    }
}

fn get_or_create_locked<'a, S: KvStore<ThreadId, ChatThread>>(
    inner: &'a mut ThreadState<S>,
    a: &AccountId,
    b: &AccountId,
    listing: Option<ListingId>,
) -> &'a ChatThread {
    let id = thread_id(a, b, listing);
    if inner.threads.get(&id).is_none() {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        inner.threads.insert(
            id.clone(),
            ChatThread {
                id: id.clone(),
                participants: [lo.clone(), hi.clone()],
                last_message: None,
                unread_count: 0,
                updated_at: Utc::now(),
                listing_id: listing,
            },
        );
    }
    inner
        .threads
        .get(&id)
        .expect("thread inserted or present above")
}

/// Re-derive the thread's cached fields from its message log.
fn refresh_thread<S: KvStore<ThreadId, ChatThread>>(inner: &mut ThreadState<S>, id: &ThreadId) {
    let (last, unread, latest) = match inner.messages.get(id) {
        Some(log) => (
            log.last().map(|m| m.id),
            log.iter().filter(|m| !m.read).count() as u32,
            log.last().map(|m| m.timestamp),
        ),
        None => (None, 0, None),
    };
    if let Some(thread) = inner.threads.get_mut(id) {
        thread.last_message = last;
        thread.unread_count = unread;
        if let Some(at) = latest {
            thread.updated_at = at;
        }
    }
}
