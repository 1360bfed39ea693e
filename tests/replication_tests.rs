//! Session replication tests: pages leave one node in serialized form and
//! are picked up by the store of another.

mod common;

use std::sync::Arc;

use bytes::Bytes;
use common::{session_id, shared, sync_config, FormPage, TestStore};
use pagestore_rs::{
    ErrorCode, Page, PageStore, SerializationAwarePageStore, SerializedPageWithSession,
    SessionValue,
};

fn serialized(value: SessionValue) -> Arc<SerializedPageWithSession> {
    match value {
        SessionValue::Serialized(entry) => entry,
        other => panic!("expected a serialized page, got {:?}", other),
    }
}

/// Sends an entry over the wire the way a replicated session would.
fn replicate(entry: &SerializedPageWithSession) -> SessionValue {
    let json = serde_json::to_string(entry).unwrap();
    SessionValue::Serialized(Arc::new(serde_json::from_str(&json).unwrap()))
}

#[tokio::test]
async fn test_prepare_reuses_cached_serialization() {
    let t = TestStore::synchronous().await;
    let session = session_id();
    let page = Arc::new(FormPage::new(1, "main", "cached"));
    t.store.store_page(&session, &shared(&page)).await.unwrap();

    let prepared = t
        .store
        .prepare_for_serialization(&session, SessionValue::Page(shared(&page)))
        .await
        .unwrap();
    let entry = serialized(prepared);
    let cached = t.store.cache().get_page(&shared(&page)).unwrap();
    assert!(Arc::ptr_eq(&entry, &cached));
    assert_eq!(entry.session_id, session);
    assert!(!entry.is_stripped());
}

#[tokio::test]
async fn test_replicated_page_is_stored_on_other_node() {
    let node_a = TestStore::synchronous().await;
    let node_b = TestStore::synchronous().await;
    let session = session_id();
    let original = Arc::new(FormPage::new(4, "main", "replicated").with_random_payload(256));

    let prepared = node_a
        .store
        .prepare_for_serialization(&session, SessionValue::Page(shared(&original)))
        .await
        .unwrap();
    let entry = serialized(prepared);
    let original_data = entry.pages[0].data().unwrap().clone();

    let restored = node_b
        .store
        .restore_after_serialization(replicate(&entry))
        .await
        .unwrap();
    let stripped = serialized(restored);
    assert!(stripped.is_stripped());
    assert!(stripped.pages.iter().all(|page| page.is_stripped()));
    assert!(node_b.store.contains_page(&session, "main", 4, -1).await);

    // a stripped entry is filled in again from disk before it leaves
    let prepared = node_b
        .store
        .prepare_for_serialization(&session, SessionValue::Serialized(stripped.clone()))
        .await
        .unwrap();
    let refilled = serialized(prepared);
    assert!(!refilled.is_stripped());
    assert_eq!(refilled.pages[0].data(), Some(&original_data));

    let page = node_b
        .store
        .convert_to_page(SessionValue::Serialized(stripped))
        .await
        .unwrap()
        .unwrap();
    let form = node_b.decoder.form(&page);
    assert_eq!(form.title, "replicated");
    assert_eq!(form.payload, original.payload);
}

#[tokio::test]
async fn test_convert_unstripped_entry_stores_it() {
    let node_a = TestStore::synchronous().await;
    let node_b = TestStore::synchronous().await;
    let session = session_id();
    let page = Arc::new(FormPage::new(2, "popup", "direct").at_version(3, 1));

    let entry = serialized(
        node_a
            .store
            .prepare_for_serialization(&session, SessionValue::Page(shared(&page)))
            .await
            .unwrap(),
    );
    let page = node_b
        .store
        .convert_to_page(replicate(&entry))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(node_b.decoder.form(&page).title, "direct");
    assert!(node_b.store.contains_page(&session, "popup", 2, 3).await);
}

#[tokio::test]
async fn test_live_pages_pass_through() {
    let t = TestStore::synchronous().await;
    let page = Arc::new(FormPage::new(1, "main", "live"));

    let restored = t
        .store
        .restore_after_serialization(SessionValue::Page(shared(&page)))
        .await
        .unwrap();
    assert!(matches!(restored, SessionValue::Page(_)));

    let converted = t
        .store
        .convert_to_page(SessionValue::Page(shared(&page)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(converted.numeric_id(), 1);
}

#[tokio::test]
async fn test_foreign_values() {
    let t = TestStore::synchronous().await;
    let session = session_id();
    let value = SessionValue::Opaque {
        type_name: "shopping cart".to_string(),
        value: Bytes::from_static(b"3 items"),
    };

    let prepared = t
        .store
        .prepare_for_serialization(&session, value.clone())
        .await
        .unwrap();
    assert_eq!(prepared.type_name(), "shopping cart");

    let err = t
        .store
        .restore_after_serialization(value.clone())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::UnexpectedObjectType);
    assert!(err.message.contains("shopping cart"));

    let err = t.store.convert_to_page(value).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::UnexpectedObjectType);
}

#[tokio::test]
async fn test_restore_can_be_disabled() {
    let node_a = TestStore::synchronous().await;
    let node_b = TestStore::start(|dir| pagestore_rs::Config {
        store_after_session_replication: false,
        ..sync_config(dir)
    })
    .await;
    let session = session_id();
    let page = Arc::new(FormPage::new(1, "main", "kept in memory"));

    let entry = serialized(
        node_a
            .store
            .prepare_for_serialization(&session, SessionValue::Page(shared(&page)))
            .await
            .unwrap(),
    );
    let restored = serialized(
        node_b
            .store
            .restore_after_serialization(replicate(&entry))
            .await
            .unwrap(),
    );
    assert!(!restored.is_stripped());
    assert!(!node_b.store.contains_page(&session, "main", 1, -1).await);
}

#[tokio::test]
async fn test_prepare_without_cache() {
    let t = TestStore::start(|dir| pagestore_rs::Config {
        serialized_pages_cache_size: 0,
        ..sync_config(dir)
    })
    .await;
    let session = session_id();
    let page = Arc::new(FormPage::new(1, "main", "uncached"));
    t.store.store_page(&session, &shared(&page)).await.unwrap();
    assert!(t.store.cache().is_empty());

    let entry = serialized(
        t.store
            .prepare_for_serialization(&session, SessionValue::Page(shared(&page)))
            .await
            .unwrap(),
    );
    assert_eq!(entry.pages.len(), 1);
    assert!(entry.pages[0].data().is_some());
    assert!(t.store.cache().is_empty());
}
