//! Kandel strategies and resting orders across the venue and strategy streams.

mod common;

use common::*;
use serde_json::{json, Value};

use venue_indexer::decoder::decode;
use venue_indexer::entities::{Offer, Strategy, StrategyOrder, TokenBalance};
use venue_indexer::records::{
    RestingOrderLink, StrategyConfiguration, StrategyEventRecord, StrategyOfferIndex,
};
use venue_store::{Record, VersionedEntity};
use venue_types::ids::{
    AccountId, ChainId, OfferSide, StrategyEventId, StrategyId, StrategyOfferIndexId,
    TokenBalanceId,
};
use venue_types::numeric::RawAmount;

fn strategy() -> StrategyId {
    StrategyId::new(ChainId(CHAIN), address(&kandel()))
}

fn reserve_balance(token: &str) -> TokenBalanceId {
    TokenBalanceId::new(AccountId::new(ChainId(CHAIN), address(&kandel())), address(token))
}

fn index_key(side: OfferSide, index: u32) -> String {
    StrategyOfferIndexId::new(strategy(), side, index).to_string()
}

fn strategy_event_key(stream: &str, payload: &[u8]) -> String {
    let event = decode(schema_of(stream), payload).unwrap();
    StrategyEventId::new(strategy(), event.event_id()).to_string()
}

fn kandel_created() -> Value {
    json!({
        "type": "KandelCreated",
        "owner": owner(),
        "venue": venue(),
        "base": base(),
        "quote": quote()
    })
}

fn kandel_offer(side: &str, index: u32, offer_id: u32, wants: u128, gives: u128) -> Value {
    json!({
        "side": side,
        "index": index,
        "offerId": offer_id,
        "wants": wants.to_string(),
        "gives": gives.to_string(),
        "gasprice": 1,
        "gasreq": 150000
    })
}

fn transfer(kind: &str, token: &str, amount: u128) -> Value {
    json!({ "type": kind, "token": token, "amount": amount.to_string() })
}

// ── Kandel ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_kandel_configuration_follows_strategy_versions() {
    let mut h = Harness::new();
    h.setup_market().await;
    let kandel = kandel();

    h.push(KANDEL_STREAM, &kandel, kandel_created());
    h.push(
        KANDEL_STREAM,
        &kandel,
        json!({ "type": "KandelParamsSet", "gasreq": 200000, "stepSize": 1, "pricePoints": 10 }),
    );
    h.push(KANDEL_STREAM, &kandel, transfer("KandelCredited", &base(), 1_000));
    h.push(KANDEL_STREAM, &kandel, transfer("KandelDebited", &base(), 400));
    let admin_set = h.push(KANDEL_STREAM, &kandel, json!({ "type": "KandelAdminSet", "admin": taker() }));
    let router_set = h.push(KANDEL_STREAM, &kandel, json!({ "type": "KandelRouterSet", "router": router() }));
    h.run(KANDEL_STREAM).await;

    let versions = h.chain::<Strategy>(&strategy()).await;
    assert_eq!(versions.len(), 6);
    assert_eq!(h.store.count(StrategyConfiguration::TABLE), 6);
    for version in &versions {
        let config: StrategyConfiguration = h.record(&version.id).await.unwrap();
        assert_eq!(config.version_number, version.version_number);
        assert_eq!(config.config, version.fields);
    }

    let current = versions.last().unwrap();
    assert_eq!(current.fields.last_event, "KandelRouterSet");
    assert_eq!(current.fields.gasreq, 200000);
    assert_eq!(current.fields.step_size, 1);
    assert_eq!(current.fields.price_points, 10);
    assert_eq!(current.fields.admin, address(&taker()));
    assert_eq!(current.fields.router, Some(address(&router())));

    let balance = h.current::<TokenBalance>(&reserve_balance(&base())).await.unwrap();
    assert_eq!(balance.fields.balance, RawAmount::new(600));

    // Reorgs unwind in reverse order.
    h.push_undo(KANDEL_STREAM, &router_set);
    h.push_undo(KANDEL_STREAM, &admin_set);
    h.run(KANDEL_STREAM).await;
    let current = h.current::<Strategy>(&strategy()).await.unwrap();
    assert_eq!(current.version_number, 3);
    assert_eq!(current.fields.last_event, "KandelDebited");
    assert_eq!(current.fields.admin, address(&owner()));
    assert_eq!(current.fields.router, None);
    assert_eq!(h.store.count(StrategyConfiguration::TABLE), 4);
}

#[tokio::test]
async fn test_kandel_debit_below_zero_is_fatal() {
    let mut h = Harness::new();
    h.setup_market().await;
    let kandel = kandel();
    h.push(KANDEL_STREAM, &kandel, kandel_created());
    h.push(KANDEL_STREAM, &kandel, transfer("KandelDebited", &quote(), 1));

    assert!(h.run_with(h.config(KANDEL_STREAM)).await.is_err());
    assert!(h.current::<TokenBalance>(&reserve_balance(&quote())).await.is_none());
}

#[tokio::test]
async fn test_kandel_event_before_creation_is_fatal() {
    let mut h = Harness::new();
    h.setup_market().await;
    h.push(
        KANDEL_STREAM,
        &kandel(),
        json!({ "type": "KandelParamsSet", "gasprice": 3 }),
    );

    let err = h.run_with(h.config(KANDEL_STREAM)).await.unwrap_err();
    assert!(err.to_string().contains("KandelParamsSet"));
}

#[tokio::test]
async fn test_kandel_populate_retract_and_undo() {
    let mut h = Harness::new();
    h.setup_market().await;
    let kandel = kandel();
    h.push(KANDEL_STREAM, &kandel, kandel_created());
    let populate = h.push(
        KANDEL_STREAM,
        &kandel,
        json!({
            "type": "KandelPopulated",
            "offers": [
                kandel_offer("ask", 0, 1, 100, 50),
                kandel_offer("bid", 0, 1, 50, 90)
            ]
        }),
    );
    h.run(KANDEL_STREAM).await;
    let populate_key = strategy_event_key(KANDEL_STREAM, &populate);

    // Asks rest on base → quote, bids on quote → base, made by the strategy.
    let ask_offer = h.current::<Offer>(&ask(1)).await.unwrap();
    assert_eq!(ask_offer.fields.strategy_event_id.as_deref(), Some(populate_key.as_str()));
    assert_eq!(ask_offer.fields.gives, RawAmount::new(50));
    let bid_offer = h.current::<Offer>(&bid(1)).await.unwrap();
    assert_eq!(bid_offer.fields.strategy_event_id.as_deref(), Some(populate_key.as_str()));
    let entity = h.entity::<Offer>(&ask(1)).await.unwrap();
    assert_eq!(entity.keys.maker, address(&kandel));

    let ask_index: StrategyOfferIndex = h.record(&index_key(OfferSide::Ask, 0)).await.unwrap();
    assert_eq!(ask_index.offer_id, ask(1).to_string());
    let bid_index: StrategyOfferIndex = h.record(&index_key(OfferSide::Bid, 0)).await.unwrap();
    assert_eq!(bid_index.offer_id, bid(1).to_string());
    let record: StrategyEventRecord = h.record(&populate_key).await.unwrap();
    assert_eq!(record.offers, vec![ask(1).to_string(), bid(1).to_string()]);

    let retract = h.push(
        KANDEL_STREAM,
        &kandel,
        json!({ "type": "KandelRetracted", "offers": [{ "side": "ask", "offerId": 1 }] }),
    );
    h.run(KANDEL_STREAM).await;
    let retract_key = strategy_event_key(KANDEL_STREAM, &retract);
    let retracted = h.current::<Offer>(&ask(1)).await.unwrap();
    assert!(retracted.fields.deleted);
    assert_eq!(retracted.fields.strategy_event_id.as_deref(), Some(retract_key.as_str()));

    h.push_undo(KANDEL_STREAM, &retract);
    h.run(KANDEL_STREAM).await;
    assert_eq!(h.current::<Offer>(&ask(1)).await.unwrap(), ask_offer);
    assert!(h.record::<StrategyEventRecord>(&retract_key).await.is_none());

    h.push_undo(KANDEL_STREAM, &populate);
    h.run(KANDEL_STREAM).await;
    assert!(h.current::<Offer>(&ask(1)).await.is_none());
    assert!(h.current::<Offer>(&bid(1)).await.is_none());
    assert_eq!(h.store.count(StrategyOfferIndex::TABLE), 0);
    assert_eq!(h.store.count(StrategyEventRecord::TABLE), 0);
    assert_eq!(h.chain::<Strategy>(&strategy()).await.len(), 1);
}

#[tokio::test]
async fn test_repopulate_undo_restores_previous_index() {
    let mut h = Harness::new();
    h.setup_market().await;
    let kandel = kandel();
    h.push(KANDEL_STREAM, &kandel, kandel_created());
    h.push(
        KANDEL_STREAM,
        &kandel,
        json!({ "type": "KandelPopulated", "offers": [kandel_offer("ask", 0, 1, 100, 50)] }),
    );
    let second = h.push(
        KANDEL_STREAM,
        &kandel,
        json!({ "type": "KandelPopulated", "offers": [kandel_offer("ask", 0, 2, 120, 50)] }),
    );
    h.run(KANDEL_STREAM).await;

    let index: StrategyOfferIndex = h.record(&index_key(OfferSide::Ask, 0)).await.unwrap();
    assert_eq!(index.offer_id, ask(2).to_string());

    h.push_undo(KANDEL_STREAM, &second);
    h.run(KANDEL_STREAM).await;
    let index: StrategyOfferIndex = h.record(&index_key(OfferSide::Ask, 0)).await.unwrap();
    assert_eq!(index.offer_id, ask(1).to_string());
    assert!(h.current::<Offer>(&ask(2)).await.is_none());
    assert!(h.current::<Offer>(&ask(1)).await.unwrap().fields.live);
}

// ── Resting orders ──────────────────────────────────────────────────

/// Post a resting buy of 100 base that got 40 up front; the residual sits
/// as offer 7 on the quote → base list.
async fn post_resting_order(h: &mut Harness) -> (Vec<u8>, String) {
    h.setup_market().await;
    h.push(
        VENUE_STREAM,
        &venue(),
        offer_written_by(&quote(), &base(), 7, &router(), 60, 120),
    );
    h.run(VENUE_STREAM).await;

    let posted = h.push(
        RESTING_STREAM,
        &router(),
        json!({
            "type": "RestingOrderPosted",
            "venue": venue(),
            "olKey": ol_key(&base(), &quote()),
            "owner": owner(),
            "fillOrKill": false,
            "fillWants": true,
            "takerWants": "100",
            "takerGives": "200",
            "takerGot": "40",
            "takerGave": "80",
            "fee": "0",
            "restingOfferId": 7
        }),
    );
    h.run(RESTING_STREAM).await;

    let link: RestingOrderLink = h.record(&bid(7).to_string()).await.unwrap();
    let order = link.current().unwrap().to_string();
    (posted, order)
}

#[tokio::test]
async fn test_resting_order_fill_propagates_and_undoes() {
    let mut h = Harness::new();
    let (_, order) = post_resting_order(&mut h).await;

    let posted = h.current::<StrategyOrder>(&order).await.unwrap();
    assert_eq!(posted.version_number, 0);
    assert!(!posted.fields.filled);
    assert_eq!(posted.fields.taker_got, RawAmount::new(40));

    // A taker on quote → base pays 60 base for 120 quote.
    let fill = h.push(
        VENUE_STREAM,
        &venue(),
        order_completed(&quote(), &base(), &[(7, 120, 60)]),
    );
    h.run(VENUE_STREAM).await;
    let filled = h.current::<StrategyOrder>(&order).await.unwrap();
    assert_eq!(filled.version_number, 1);
    assert!(filled.fields.filled);
    assert_eq!(filled.fields.taker_got, RawAmount::new(100));
    assert_eq!(filled.fields.taker_gave, RawAmount::new(200));

    h.push_undo(VENUE_STREAM, &fill);
    h.run(VENUE_STREAM).await;
    assert_eq!(h.current::<StrategyOrder>(&order).await.unwrap(), posted);
    assert!(h.current::<Offer>(&bid(7)).await.unwrap().fields.live);
}

#[tokio::test]
async fn test_resting_offer_retraction_cancels_order() {
    let mut h = Harness::new();
    let (_, order) = post_resting_order(&mut h).await;

    let retract = h.push(VENUE_STREAM, &venue(), offer_retracted(&quote(), &base(), 7));
    h.run(VENUE_STREAM).await;
    let cancelled = h.current::<StrategyOrder>(&order).await.unwrap();
    assert!(cancelled.fields.cancelled);
    assert!(!cancelled.fields.filled);

    h.push_undo(VENUE_STREAM, &retract);
    h.run(VENUE_STREAM).await;
    let back = h.current::<StrategyOrder>(&order).await.unwrap();
    assert!(!back.fields.cancelled);
    assert_eq!(back.version_number, 0);
}

#[tokio::test]
async fn test_resting_order_expiry_and_posting_undo() {
    let mut h = Harness::new();
    let (posted, order) = post_resting_order(&mut h).await;

    let expiry = h.push(
        RESTING_STREAM,
        &router(),
        json!({
            "type": "RestingOrderExpirySet",
            "venue": venue(),
            "olKey": ol_key(&quote(), &base()),
            "offerId": 7,
            "expiry": 1_700_086_400u64
        }),
    );
    h.run(RESTING_STREAM).await;
    assert_eq!(
        h.current::<StrategyOrder>(&order).await.unwrap().fields.expiry,
        Some(1_700_086_400)
    );

    h.push_undo(RESTING_STREAM, &expiry);
    h.run(RESTING_STREAM).await;
    assert_eq!(h.current::<StrategyOrder>(&order).await.unwrap().fields.expiry, None);

    h.push_undo(RESTING_STREAM, &posted);
    h.run(RESTING_STREAM).await;
    assert!(h.current::<StrategyOrder>(&order).await.is_none());
    assert!(h.record::<RestingOrderLink>(&bid(7).to_string()).await.is_none());
    assert_eq!(h.store.count(StrategyOrder::TABLE), 0);
}
