//! HistoryLog over the real SQLite store: thread lifecycle, message
//! append/read, tenant scoping, and search snippets.

use std::sync::Arc;

use tempfile::TempDir;

use weft_domain::config::StoreConfig;
use weft_domain::message::{MessageRole, ThreadMessage};
use weft_history::HistoryLog;
use weft_plugins::{HistoryPlugin, StorePlugin};
use weft_store::SqliteStore;

async fn open_log() -> (TempDir, HistoryLog) {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig {
        db_path: dir.path().join("history.db"),
        ..Default::default()
    };
    let store: Arc<dyn StorePlugin> = Arc::new(SqliteStore::open(&config).await.unwrap());
    let log = HistoryLog::open(store).await.unwrap();
    (dir, log)
}

#[tokio::test]
async fn thread_create_get_and_list() {
    let (_dir, log) = open_log().await;

    let id = log
        .create_thread("alice", "first chat", "small-1", "default")
        .await
        .unwrap();

    let header = log.get_thread("alice", &id).await.unwrap().unwrap();
    assert_eq!(header.title, "first chat");
    assert_eq!(header.model, "small-1");
    assert!(!header.is_archived);

    let listed = log.list_threads("alice", false).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, id);
}

#[tokio::test]
async fn messages_append_in_order() {
    let (_dir, log) = open_log().await;
    let id = log
        .create_thread("alice", "t", "m", "default")
        .await
        .unwrap();

    assert!(log
        .append_message(
            "alice",
            &id,
            ThreadMessage::text(MessageRole::User, "hello")
        )
        .await
        .unwrap());
    assert!(log
        .append_message(
            "alice",
            &id,
            ThreadMessage::text(MessageRole::Assistant, "Hi!").with_model("m")
        )
        .await
        .unwrap());
    assert!(log
        .append_message("alice", &id, ThreadMessage::tool_update("c1", "✅ add: 5"))
        .await
        .unwrap());

    let messages = log.get_messages("alice", &id).await.unwrap().unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0].content, "hello");
    assert_eq!(messages[1].model.as_deref(), Some("m"));
    assert_eq!(messages[2].call_id.as_deref(), Some("c1"));
}

#[tokio::test]
async fn other_tenants_see_nothing() {
    let (_dir, log) = open_log().await;
    let id = log
        .create_thread("alice", "private", "m", "default")
        .await
        .unwrap();
    log.append_message(
        "alice",
        &id,
        ThreadMessage::text(MessageRole::User, "secret plans"),
    )
    .await
    .unwrap();

    assert!(log.get_thread("bob", &id).await.unwrap().is_none());
    assert!(log.get_messages("bob", &id).await.unwrap().is_none());
    assert!(!log
        .append_message("bob", &id, ThreadMessage::text(MessageRole::User, "hi"))
        .await
        .unwrap());
    assert!(log.list_threads("bob", false).await.unwrap().is_empty());
    assert!(log.search("bob", "secret").await.unwrap().is_empty());
}

#[tokio::test]
async fn archive_hides_from_listing_but_keeps_searchable() {
    let (_dir, log) = open_log().await;
    let id = log
        .create_thread("alice", "quarterly planning", "m", "default")
        .await
        .unwrap();

    assert!(log.archive_thread("alice", &id).await.unwrap());
    assert!(log.list_threads("alice", false).await.unwrap().is_empty());
    assert_eq!(log.list_threads("alice", true).await.unwrap().len(), 1);

    // Still searchable until explicitly deleted.
    let hits = log.search("alice", "quarterly").await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].thread_id, id);

    assert!(log.delete_thread("alice", &id).await.unwrap());
    assert!(log.search("alice", "quarterly").await.unwrap().is_empty());
    assert!(log.get_messages("alice", &id).await.unwrap().is_none());
}

#[tokio::test]
async fn update_thread_title() {
    let (_dir, log) = open_log().await;
    let id = log
        .create_thread("alice", "old title", "m", "default")
        .await
        .unwrap();

    assert!(log
        .update_thread("alice", &id, Some("new title"))
        .await
        .unwrap());
    assert_eq!(
        log.get_thread("alice", &id).await.unwrap().unwrap().title,
        "new title"
    );

    // No-op update succeeds.
    assert!(log.update_thread("alice", &id, None).await.unwrap());
    // Unknown thread reports false.
    assert!(!log.update_thread("alice", "ghost", Some("x")).await.unwrap());
}

#[tokio::test]
async fn search_finds_titles_and_message_content() {
    let (_dir, log) = open_log().await;

    let by_title = log
        .create_thread("alice", "rust borrow checker", "m", "default")
        .await
        .unwrap();
    let by_message = log
        .create_thread("alice", "misc", "m", "default")
        .await
        .unwrap();
    log.append_message(
        "alice",
        &by_message,
        ThreadMessage::text(MessageRole::User, "how does the borrow checker work?"),
    )
    .await
    .unwrap();

    let hits = log.search("alice", "borrow").await.unwrap();
    let ids: Vec<&str> = hits.iter().map(|h| h.thread_id.as_str()).collect();
    assert!(ids.contains(&by_title.as_str()));
    assert!(ids.contains(&by_message.as_str()));

    // One hit per thread even when title and messages both match.
    assert_eq!(ids.len(), 2);

    let message_hit = hits.iter().find(|h| h.thread_id == by_message).unwrap();
    assert!(message_hit.snippet.contains("borrow checker"));
}

#[tokio::test]
async fn messages_of_each_thread_stay_separate() {
    let (_dir, log) = open_log().await;
    let t1 = log.create_thread("alice", "one", "m", "default").await.unwrap();
    let t2 = log.create_thread("alice", "two", "m", "default").await.unwrap();

    log.append_message("alice", &t1, ThreadMessage::text(MessageRole::User, "in one"))
        .await
        .unwrap();
    log.append_message("alice", &t2, ThreadMessage::text(MessageRole::User, "in two"))
        .await
        .unwrap();

    let m1 = log.get_messages("alice", &t1).await.unwrap().unwrap();
    let m2 = log.get_messages("alice", &t2).await.unwrap().unwrap();
    assert_eq!(m1.len(), 1);
    assert_eq!(m2.len(), 1);
    assert_eq!(m1[0].content, "in one");
    assert_eq!(m2[0].content, "in two");
}
