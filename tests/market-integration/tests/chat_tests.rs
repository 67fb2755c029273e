//! Conversation flows across the thread engine, including the
//! listing-scoped negotiation threads the order flow leans on.

use farmlink_common::chat::thread_id;
use farmlink_common::error::MarketError;
use farmlink_engine::gateway::MarketEvent;
use farmlink_market_integration::account;
use farmlink_market_integration::harness::Market;

#[test]
fn negotiation_thread_is_scoped_to_the_listing() {
    let market = Market::new();
    let farmer = account("wanjiku");
    let buyer = account("kamau");
    let listing = market.list_crop(&farmer, "Tomatoes", 500, 2_500);

    let enquiry = market
        .threads
        .send(&buyer, &farmer, "Is the price negotiable for 200kg?", Some(listing))
        .unwrap();
    assert_eq!(enquiry.thread_id, thread_id(&buyer, &farmer, Some(listing)));

    let reply = market
        .threads
        .send(&farmer, &buyer, "For 200kg I can do 2400.", Some(listing))
        .unwrap();
    assert_eq!(reply.thread_id, enquiry.thread_id);

    // An unscoped conversation between the same pair is a separate thread.
    market.threads.send(&buyer, &farmer, "Hello!", None).unwrap();
    assert_eq!(market.threads.threads_for_user(&buyer).len(), 2);
}

#[test]
fn unread_counts_are_recipient_scoped() {
    let market = Market::new();
    let farmer = account("wanjiku");
    let buyer = account("kamau");

    market.threads.send(&buyer, &farmer, "one", None).unwrap();
    market.threads.send(&buyer, &farmer, "two", None).unwrap();
    let last = market.threads.send(&farmer, &buyer, "three", None).unwrap();

    assert_eq!(market.threads.unread_count_for(&farmer), 2);
    assert_eq!(market.threads.unread_count_for(&buyer), 1);

    market.threads.mark_read(&last.thread_id, &farmer).unwrap();
    assert_eq!(market.threads.unread_count_for(&farmer), 0);
    // The farmer's own outbound message stays unread for the buyer.
    assert_eq!(market.threads.unread_count_for(&buyer), 1);
    assert_eq!(
        market.threads.get_thread(&last.thread_id).unwrap().unread_count,
        1
    );
}

#[test]
fn mark_read_is_idempotent() {
    let market = Market::new();
    let farmer = account("wanjiku");
    let buyer = account("kamau");
    let sent = market.threads.send(&buyer, &farmer, "ping", None).unwrap();

    market.threads.mark_read(&sent.thread_id, &farmer).unwrap();
    let once = market.threads.get_thread(&sent.thread_id).unwrap();
    market.threads.mark_read(&sent.thread_id, &farmer).unwrap();
    let twice = market.threads.get_thread(&sent.thread_id).unwrap();

    assert_eq!(once, twice);
    assert!(market.threads.messages(&sent.thread_id)[0].read);
}

#[test]
fn messages_come_back_in_send_order() {
    let market = Market::new();
    let a = account("wanjiku");
    let b = account("kamau");
    for text in ["first", "second", "third"] {
        market.threads.send(&a, &b, text, None).unwrap();
    }
    let id = thread_id(&a, &b, None);
    let contents: Vec<String> = market
        .threads
        .messages(&id)
        .into_iter()
        .map(|m| m.content)
        .collect();
    assert_eq!(contents, vec!["first", "second", "third"]);
}

#[test]
fn sender_retracts_a_message() {
    let market = Market::new();
    let a = account("wanjiku");
    let b = account("kamau");
    let keep = market.threads.send(&a, &b, "keep this", None).unwrap();
    let typo = market.threads.send(&a, &b, "tpyo", None).unwrap();

    assert!(market
        .threads
        .delete_message(&typo.thread_id, typo.id, &a)
        .unwrap());
    let thread = market.threads.get_thread(&typo.thread_id).unwrap();
    assert_eq!(thread.last_message, Some(keep.id));
    assert_eq!(thread.unread_count, 1);
}

#[test]
fn either_participant_may_delete_the_thread() {
    let market = Market::new();
    let a = account("wanjiku");
    let b = account("kamau");
    let sent = market.threads.send(&a, &b, "hello", None).unwrap();

    market.threads.delete_thread(&sent.thread_id, &b).unwrap();
    assert!(matches!(
        market.threads.get_thread(&sent.thread_id),
        Err(MarketError::NotFound { .. })
    ));
    assert_eq!(market.threads.unread_count_for(&b), 0);
    assert!(market
        .notifier
        .events()
        .iter()
        .any(|e| matches!(e, MarketEvent::ThreadDeleted { .. })));
}

#[test]
fn presence_round_trip() {
    let market = Market::new();
    let farmer = account("wanjiku");
    assert!(!market.threads.presence(&farmer).is_online);

    market.threads.set_presence(&farmer, true);
    assert!(market.threads.presence(&farmer).is_online);

    market.threads.set_presence(&farmer, false);
    let presence = market.threads.presence(&farmer);
    assert!(!presence.is_online);
    assert!(presence.last_seen.is_some());
}

#[test]
fn message_events_reach_the_notifier() {
    let market = Market::new();
    let farmer = account("wanjiku");
    let buyer = account("kamau");
    market.threads.send(&buyer, &farmer, "hello", None).unwrap();

    assert!(market.notifier.events().iter().any(|e| matches!(
        e,
        MarketEvent::MessageSent { sender, recipient, .. }
            if *sender == account("kamau") && *recipient == account("wanjiku")
    )));
}
