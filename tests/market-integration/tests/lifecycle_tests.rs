//! Full order lifecycles driven end to end through the listing store and
//! the order state machine.

use ed25519_dalek::Verifier;

use farmlink_common::currency::{Amount, Quantity};
use farmlink_common::error::MarketError;
use farmlink_common::offer::{offer_signable_bytes, DisputeResolution, EscrowState, OfferStatus};
use farmlink_engine::gateway::MarketEvent;
use farmlink_engine::listings::{ListingUpdate, OfferLedger};
use farmlink_market_integration::account;
use farmlink_market_integration::harness::Market;

#[test]
fn partial_sale_runs_to_completion() {
    let market = Market::new();
    let farmer = account("wanjiku");
    let buyer = account("kamau");
    let listing = market.list_crop(&farmer, "Tomatoes", 500, 2_500);

    let offer = market.offer_kg(listing, &buyer, 200, 2_500).unwrap();
    let placed = market.orders.get_offer(offer).unwrap();
    assert_eq!(placed.escrow_amount, Amount::from_micros(500_000));
    assert_eq!(placed.escrow_state, EscrowState::Held);

    market.orders.accept_offer(offer, &farmer).unwrap();
    market.orders.mark_in_transit(offer, &farmer).unwrap();
    market.orders.mark_delivered(offer, &farmer).unwrap();
    let done = market.orders.confirm_receipt(offer, &buyer).unwrap();
    assert_eq!(done.status, OfferStatus::Completed);
    assert_eq!(done.escrow_state, EscrowState::Released);

    // 300 kg stay on the market and the listing remains live.
    assert_eq!(
        market.orders.remaining_quantity(listing).unwrap(),
        Quantity::from_kg(300).unwrap()
    );
    assert_eq!(
        market
            .listings
            .remaining_quantity(listing, &market.orders)
            .unwrap(),
        Quantity::from_kg(300).unwrap()
    );
    assert!(market.listings.get(listing).unwrap().is_active);
}

#[test]
fn overlapping_offers_never_oversell() {
    let market = Market::new();
    let farmer = account("wanjiku");
    let listing = market.list_crop(&farmer, "Maize", 500, 1_000);

    market.offer_kg(listing, &account("b1"), 300, 1_000).unwrap();
    market.offer_kg(listing, &account("b2"), 200, 1_000).unwrap();

    // Fully reserved: a third offer of any size must bounce.
    let err = market.offer_kg(listing, &account("b3"), 1, 1_000).unwrap_err();
    assert!(matches!(err, MarketError::InsufficientQuantity { .. }));
    assert!(market.orders.remaining_quantity(listing).unwrap().is_zero());
}

#[test]
fn rejected_offer_returns_quantity_to_the_pool() {
    let market = Market::new();
    let farmer = account("wanjiku");
    let listing = market.list_crop(&farmer, "Maize", 500, 1_000);

    let offer = market.offer_kg(listing, &account("kamau"), 500, 1_000).unwrap();
    market.orders.reject_offer(offer, &farmer).unwrap();

    assert_eq!(
        market.orders.remaining_quantity(listing).unwrap(),
        Quantity::from_kg(500).unwrap()
    );
    // The rejected offer stays queryable, refunded.
    let rejected = market.orders.get_offer(offer).unwrap();
    assert_eq!(rejected.escrow_state, EscrowState::Refunded);
}

#[test]
fn buyer_cancel_after_acceptance_refunds_and_frees_quantity() {
    let market = Market::new();
    let farmer = account("wanjiku");
    let buyer = account("kamau");
    let listing = market.list_crop(&farmer, "Kale", 100, 800);

    let offer = market.offer_kg(listing, &buyer, 100, 800).unwrap();
    market.orders.accept_offer(offer, &farmer).unwrap();
    let cancelled = market.orders.cancel_offer(offer, &buyer).unwrap();
    assert_eq!(cancelled.status, OfferStatus::Cancelled);
    assert_eq!(cancelled.escrow_state, EscrowState::Refunded);
    assert_eq!(
        market.orders.remaining_quantity(listing).unwrap(),
        Quantity::from_kg(100).unwrap()
    );
}

#[test]
fn dispute_refund_unwinds_a_shipped_order() {
    let market = Market::new();
    let farmer = account("wanjiku");
    let buyer = account("kamau");
    let listing = market.list_crop(&farmer, "Avocados", 300, 5_000);

    let offer = market.offer_kg(listing, &buyer, 300, 5_000).unwrap();
    market.accept_and_ship(offer, &farmer);

    let disputed = market
        .orders
        .raise_dispute(offer, &buyer, "produce not as described")
        .unwrap();
    assert_eq!(disputed.status, OfferStatus::Disputed);

    let resolved = market
        .orders
        .resolve_dispute(offer, &farmer, DisputeResolution::Refund)
        .unwrap();
    assert_eq!(resolved.status, OfferStatus::Cancelled);
    assert_eq!(resolved.escrow_state, EscrowState::Refunded);
    assert_eq!(
        market.orders.remaining_quantity(listing).unwrap(),
        Quantity::from_kg(300).unwrap()
    );
}

#[test]
fn dispute_release_pays_the_farmer() {
    let market = Market::with_arbitrator(account("judge"));
    let farmer = account("wanjiku");
    let buyer = account("kamau");
    let listing = market.list_crop(&farmer, "Avocados", 300, 5_000);

    let offer = market.offer_kg(listing, &buyer, 100, 5_000).unwrap();
    market.accept_and_ship(offer, &farmer);
    market.orders.raise_dispute(offer, &buyer, "late").unwrap();

    let resolved = market
        .orders
        .resolve_dispute(offer, &account("judge"), DisputeResolution::Release)
        .unwrap();
    assert_eq!(resolved.status, OfferStatus::Completed);
    assert_eq!(resolved.escrow_state, EscrowState::Released);
}

#[test]
fn repeated_confirm_fails_and_escrow_releases_once() {
    let market = Market::new();
    let farmer = account("wanjiku");
    let buyer = account("kamau");
    let listing = market.list_crop(&farmer, "Tomatoes", 500, 2_500);

    let offer = market.offer_kg(listing, &buyer, 200, 2_500).unwrap();
    market.accept_and_ship(offer, &farmer);
    market.orders.mark_delivered(offer, &farmer).unwrap();
    market.orders.confirm_receipt(offer, &buyer).unwrap();

    let err = market.orders.confirm_receipt(offer, &buyer).unwrap_err();
    assert!(matches!(err, MarketError::InvalidTransition { .. }));

    let releases = market
        .notifier
        .events()
        .into_iter()
        .filter(|e| matches!(e, MarketEvent::EscrowReleased { .. }))
        .count();
    assert_eq!(releases, 1);
}

#[test]
fn listing_is_frozen_once_an_offer_is_accepted() {
    let market = Market::new();
    let farmer = account("wanjiku");
    let listing = market.list_crop(&farmer, "Tomatoes", 500, 2_500);
    let offer = market.offer_kg(listing, &account("kamau"), 100, 2_500).unwrap();
    market.orders.accept_offer(offer, &farmer).unwrap();

    let err = market
        .listings
        .update(
            listing,
            &farmer,
            ListingUpdate {
                price_per_unit: Some(Amount::from_micros(9_000)),
                ..Default::default()
            },
            &market.orders,
        )
        .unwrap_err();
    assert!(matches!(err, MarketError::Conflict(_)));

    // The accepted offer keeps its original price snapshot either way.
    let accepted = market.orders.get_offer(offer).unwrap();
    assert_eq!(accepted.price_per_unit, Amount::from_micros(2_500));
}

#[test]
fn in_flight_offers_block_deactivation() {
    let market = Market::new();
    let farmer = account("wanjiku");
    let buyer = account("kamau");
    let listing = market.list_crop(&farmer, "Tomatoes", 500, 2_500);
    let offer = market.offer_kg(listing, &buyer, 100, 2_500).unwrap();
    market.accept_and_ship(offer, &farmer);

    let err = market
        .listings
        .deactivate(listing, &farmer, &market.orders)
        .unwrap_err();
    assert!(matches!(err, MarketError::Conflict(_)));

    market.orders.mark_delivered(offer, &farmer).unwrap();
    market.orders.confirm_receipt(offer, &buyer).unwrap();
    market
        .listings
        .deactivate(listing, &farmer, &market.orders)
        .unwrap();
    assert!(!market.listings.get(listing).unwrap().is_active);

    // No new offers on a deactivated listing.
    let err = market.offer_kg(listing, &buyer, 10, 2_500).unwrap_err();
    assert!(matches!(err, MarketError::Conflict(_)));
}

#[test]
fn accept_after_deactivation_is_a_conflict() {
    let market = Market::new();
    let farmer = account("wanjiku");
    let buyer = account("kamau");
    let listing = market.list_crop(&farmer, "Kale", 200, 800);
    let offer = market.offer_kg(listing, &buyer, 100, 800).unwrap();

    // A merely-offered offer does not block deactivation.
    market
        .listings
        .deactivate(listing, &farmer, &market.orders)
        .unwrap();

    let err = market.orders.accept_offer(offer, &farmer).unwrap_err();
    assert!(matches!(err, MarketError::Conflict(_)));
    assert_eq!(
        market.orders.get_offer(offer).unwrap().status,
        OfferStatus::Offered
    );
    // Rejecting the stranded offer still works and refunds the buyer.
    let rejected = market.orders.reject_offer(offer, &farmer).unwrap();
    assert_eq!(rejected.escrow_state, EscrowState::Refunded);
}

#[test]
fn concurrent_shrink_and_offer_never_oversell() {
    let market = Market::new();
    let farmer = account("wanjiku");
    let buyer = account("kamau");

    // Either the shrink lands first (the offer bounces on availability) or
    // the offer lands first (the shrink bounces on reserved quantity);
    // committed must never exceed the listed quantity.
    for _ in 0..50 {
        let listing = market.list_crop(&farmer, "Maize", 500, 1_000);
        std::thread::scope(|scope| {
            scope.spawn(|| {
                let _ = market.listings.update(
                    listing,
                    &farmer,
                    ListingUpdate {
                        quantity: Some(Quantity::from_kg(100).unwrap()),
                        ..Default::default()
                    },
                    &market.orders,
                );
            });
            scope.spawn(|| {
                let _ = market.offer_kg(listing, &buyer, 400, 1_000);
            });
        });

        let quantity = market.listings.get(listing).unwrap().quantity;
        let committed = market.orders.committed_quantity(listing);
        assert!(
            committed <= quantity,
            "committed {committed} exceeds listed {quantity}"
        );
    }
}

#[test]
fn accepting_the_full_quantity_consumes_the_listing() {
    let market = Market::new();
    let farmer = account("wanjiku");
    let listing = market.list_crop(&farmer, "Maize", 200, 1_000);
    let offer = market.offer_kg(listing, &account("kamau"), 200, 1_000).unwrap();
    market.orders.accept_offer(offer, &farmer).unwrap();

    assert!(!market.listings.get(listing).unwrap().is_active);
    assert!(market
        .notifier
        .events()
        .iter()
        .any(|e| matches!(e, MarketEvent::ListingDeactivated { listing_id } if *listing_id == listing)));
}

#[test]
fn offers_carry_a_verifiable_signature() {
    let market = Market::new();
    let farmer = account("wanjiku");
    let listing = market.list_crop(&farmer, "Tomatoes", 500, 2_500);
    let offer = market.offer_kg(listing, &account("kamau"), 100, 2_500).unwrap();

    let placed = market.orders.get_offer(offer).unwrap();
    market
        .gateway
        .verifying_key()
        .verify(&offer_signable_bytes(&placed), &placed.signature)
        .unwrap();
}

#[test]
fn event_stream_follows_the_lifecycle() {
    let market = Market::new();
    let farmer = account("wanjiku");
    let buyer = account("kamau");
    let listing = market.list_crop(&farmer, "Tomatoes", 500, 2_500);
    let offer = market.offer_kg(listing, &buyer, 200, 2_500).unwrap();
    market.orders.accept_offer(offer, &farmer).unwrap();

    let events = market.notifier.events();
    assert!(matches!(events[0], MarketEvent::ListingCreated { .. }));
    assert!(matches!(events[1], MarketEvent::OfferMade { .. }));
    assert!(matches!(
        events[2],
        MarketEvent::OfferTransitioned {
            from: OfferStatus::Offered,
            to: OfferStatus::Accepted,
            ..
        }
    ));

    let trail = market.orders.audit_trail();
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].event, "accept");
}
