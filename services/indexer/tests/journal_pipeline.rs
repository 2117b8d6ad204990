//! Journal-backed streams into a durable store, across a restart.

mod common;

use common::*;
use tempfile::TempDir;
use tokio::sync::watch;

use venue_indexer::consumer::{Consumer, ConsumerConfig, ConsumerReport, ExitReason};
use venue_indexer::entities::Offer;
use venue_indexer::source::{JournalStreamSource, JournalStreamWriter};
use venue_store::versioned::find_current_version;
use venue_store::{load_cursor, Cursor, DurableStore, RelationalStore};

fn write_stream(root: &std::path::Path, stream: &str, payloads: &[Vec<u8>]) {
    let mut writer = JournalStreamWriter::open(root, stream).unwrap();
    for payload in payloads {
        writer.append(block_time(), payload.clone(), false).unwrap();
    }
    writer.sync().unwrap();
}

async fn consume(
    store: &DurableStore,
    source: &JournalStreamSource,
    stream: &str,
) -> ConsumerReport {
    let mut config = ConsumerConfig::new(stream, schema_of(stream));
    config.batch_size = 2;
    config.high_water_mark = 8;
    let consumer = Consumer::new(store.clone(), config);
    let (_tx, shutdown) = watch::channel(false);
    consumer.run(source, shutdown).await.unwrap()
}

#[tokio::test]
async fn test_durable_pipeline_resumes_after_restart() {
    let streams = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let source = JournalStreamSource::new(streams.path());

    // Payload builders only; entries go to the journals.
    let mut h = Harness::new();
    let registry = registry();
    let venue = venue();
    let tokens = vec![
        h.payload(&registry, token_registered(&base(), "BASE", 18)),
        h.payload(&registry, token_registered(&quote(), "QUOTE", 6)),
    ];
    let venue_events = vec![
        h.payload(&venue, serde_json::json!({ "type": "VenueCreated" })),
        h.payload(&venue, offer_list_params(&base(), &quote())),
        h.payload(&venue, offer_written(&base(), &quote(), 1, 100, 50)),
    ];
    write_stream(streams.path(), TOKEN_STREAM, &tokens);
    write_stream(streams.path(), VENUE_STREAM, &venue_events);

    {
        let store = DurableStore::open(data.path()).unwrap();
        let report = consume(&store, &source, TOKEN_STREAM).await;
        assert_eq!(report.last_cursor, Cursor(2));
        let report = consume(&store, &source, VENUE_STREAM).await;
        assert_eq!(report.entries_applied, 3);
        assert_eq!(report.last_cursor, Cursor(3));
        store.sync().unwrap();
    }

    // Restart: state and cursors come back from the store journal.
    let store = DurableStore::open(data.path()).unwrap();
    {
        let mut tx = store.begin().await.unwrap();
        assert_eq!(load_cursor(&mut tx, VENUE_STREAM).await.unwrap(), Cursor(3));
        assert_eq!(load_cursor(&mut tx, TOKEN_STREAM).await.unwrap(), Cursor(2));
        let offer = find_current_version::<Offer>(&mut tx, &ask(1)).await.unwrap().unwrap();
        assert!(offer.fields.live);
    }

    let report = consume(&store, &source, VENUE_STREAM).await;
    assert_eq!(report.batches_committed, 0);
    assert_eq!(report.exit, ExitReason::SourceExhausted);

    // New entries continue the stream's numbering and resume from the cursor.
    let retract = h.payload(&venue, offer_retracted(&base(), &quote(), 1));
    write_stream(streams.path(), VENUE_STREAM, &[retract]);
    let report = consume(&store, &source, VENUE_STREAM).await;
    assert_eq!(report.entries_applied, 1);
    assert_eq!(report.last_cursor, Cursor(4));

    let mut tx = store.begin().await.unwrap();
    let offer = find_current_version::<Offer>(&mut tx, &ask(1)).await.unwrap().unwrap();
    assert!(offer.fields.deleted);
    assert_eq!(offer.version_number, 1);
}
