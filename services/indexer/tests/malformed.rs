//! Malformed and foreign records: skipped on the token registry by
//! default, fatal everywhere else.

mod common;

use common::*;
use serde_json::json;

use venue_indexer::consumer::ConsumerError;
use venue_indexer::decoder::{DecodeError, MalformedPolicy};
use venue_indexer::records::Token;
use venue_store::{load_cursor, Cursor, RelationalStore};

async fn cursor(h: &Harness, stream: &str) -> Cursor {
    let mut tx = h.store.begin().await.unwrap();
    load_cursor(&mut tx, stream).await.unwrap()
}

fn token_key(token: &str) -> String {
    format!("{}-{}", CHAIN, token)
}

#[tokio::test]
async fn test_registry_skips_nul_names_and_moves_on() {
    let mut h = Harness::new();
    let registry = registry();
    h.push(TOKEN_STREAM, &registry, token_registered(&base(), "BASE", 18));
    h.push(
        TOKEN_STREAM,
        &registry,
        json!({
            "type": "TokenRegistered",
            "token": addr(0x66),
            "name": "bad\u{0}name",
            "symbol": "BAD",
            "decimals": 18
        }),
    );
    h.push(TOKEN_STREAM, &registry, token_registered(&quote(), "QUOTE", 6));

    let report = h.run(TOKEN_STREAM).await;
    assert_eq!(report.skipped, 1);
    assert_eq!(report.entries_applied, 2);
    assert_eq!(report.last_cursor, Cursor(3));
    assert_eq!(cursor(&h, TOKEN_STREAM).await, Cursor(3));

    assert!(h.record::<Token>(&token_key(&base())).await.is_some());
    assert!(h.record::<Token>(&token_key(&addr(0x66))).await.is_none());
    let quote_token: Token = h.record(&token_key(&quote())).await.unwrap();
    assert_eq!(quote_token.decimals, 6);
}

#[tokio::test]
async fn test_registry_configured_to_fail_stops_on_bad_record() {
    let mut h = Harness::new();
    let registry = registry();
    h.push(TOKEN_STREAM, &registry, token_registered(&base(), "", 18));

    let mut config = h.config(TOKEN_STREAM);
    config.malformed = MalformedPolicy::Fail;
    let err = h.run_with(config).await.unwrap_err();
    assert!(matches!(
        err,
        ConsumerError::Decode {
            cursor: Cursor(1),
            source: DecodeError::Malformed { .. }
        }
    ));
    assert_eq!(cursor(&h, TOKEN_STREAM).await, Cursor(0));
}

#[tokio::test]
async fn test_malformed_venue_record_is_fatal() {
    let mut h = Harness::new();
    h.setup_market().await;
    let before = cursor(&h, VENUE_STREAM).await;
    let state = h.state();

    h.push(VENUE_STREAM, &venue(), offer_written(&base(), &quote(), 1, 100, 50));
    // Missing `gives`.
    h.push(
        VENUE_STREAM,
        &venue(),
        json!({
            "type": "OfferWritten",
            "olKey": ol_key(&base(), &quote()),
            "offerId": 2,
            "maker": maker(),
            "wants": "10",
            "gasprice": 1,
            "gasreq": 1
        }),
    );

    let mut config = h.config(VENUE_STREAM);
    config.batch_size = 8;
    let err = h.run_with(config).await.unwrap_err();
    assert!(matches!(err, ConsumerError::Decode { .. }));
    assert!(!err.is_transient());
    // The whole batch rolled back, the well-formed entry included.
    assert_eq!(cursor(&h, VENUE_STREAM).await, before);
    assert_eq!(h.state(), state);
}

#[tokio::test]
async fn test_unparseable_payload_is_fatal() {
    let h = Harness::new();
    h.source.push(VENUE_STREAM, b"not json".to_vec(), false);

    let err = h.run_with(h.config(VENUE_STREAM)).await.unwrap_err();
    assert!(matches!(err, ConsumerError::Decode { .. }));
}

#[tokio::test]
async fn test_registry_skips_event_from_another_schema() {
    let mut h = Harness::new();
    let registry = registry();
    h.push(TOKEN_STREAM, &registry, json!({ "type": "VenueCreated" }));
    h.push(TOKEN_STREAM, &registry, token_registered(&base(), "BASE", 18));

    let report = h.run(TOKEN_STREAM).await;
    assert_eq!(report.skipped, 1);
    assert_eq!(report.entries_applied, 1);
    assert_eq!(cursor(&h, TOKEN_STREAM).await, Cursor(2));
    assert!(h.record::<Token>(&token_key(&base())).await.is_some());
}

#[tokio::test]
async fn test_event_from_another_schema_fails_when_configured() {
    let mut h = Harness::new();
    h.push(TOKEN_STREAM, &registry(), json!({ "type": "VenueCreated" }));

    let mut config = h.config(TOKEN_STREAM);
    config.malformed = MalformedPolicy::Fail;
    let err = h.run_with(config).await.unwrap_err();
    match err {
        ConsumerError::Decode { source, .. } => {
            assert!(matches!(source, DecodeError::SchemaMismatch { .. }))
        }
        other => panic!("unexpected {}", other),
    }
    assert_eq!(cursor(&h, TOKEN_STREAM).await, Cursor(0));
}

#[tokio::test]
async fn test_event_from_another_schema_is_fatal_on_venue_stream() {
    let mut h = Harness::new();
    h.push(VENUE_STREAM, &venue(), token_registered(&base(), "BASE", 18));

    let err = h.run_with(h.config(VENUE_STREAM)).await.unwrap_err();
    assert!(matches!(
        err,
        ConsumerError::Decode {
            source: DecodeError::SchemaMismatch { .. },
            ..
        }
    ));
    assert_eq!(cursor(&h, VENUE_STREAM).await, Cursor(0));
}

#[tokio::test]
async fn test_unknown_event_type_is_fatal() {
    let mut h = Harness::new();
    h.push(VENUE_STREAM, &venue(), json!({ "type": "PoolSwapped" }));

    let err = h.run_with(h.config(VENUE_STREAM)).await.unwrap_err();
    assert!(err.to_string().contains("PoolSwapped"));
}
