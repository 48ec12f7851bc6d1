//! Integration suite for the SQLite store: tenancy isolation, FTS
//! coherence, collection ordering, and schema evolution.

use serde_json::{json, Value};
use tempfile::TempDir;

use weft_domain::config::StoreConfig;
use weft_domain::schema::{FieldKind, FilterSet, FindQuery, Record, StoreSchema};
use weft_domain::Error;
use weft_plugins::StorePlugin;
use weft_store::SqliteStore;

async fn open_store() -> (TempDir, SqliteStore) {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig {
        db_path: dir.path().join("suite.db"),
        ..Default::default()
    };
    let store = SqliteStore::open(&config).await.unwrap();
    (dir, store)
}

fn notes_schema() -> StoreSchema {
    StoreSchema::new()
        .field("title", FieldKind::Text)
        .field("body", FieldKind::Text)
        .field("stars", FieldKind::Integer)
        .field("pinned", FieldKind::Bool)
        .field("tags", FieldKind::Json)
        .field("comments", FieldKind::JsonCollection)
}

fn record(pairs: &[(&str, Value)]) -> Record {
    let mut map = Record::new();
    for (k, v) in pairs {
        map.insert((*k).to_owned(), v.clone());
    }
    map
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Round trip & basics
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn add_then_get_round_trips_all_kinds() {
    let (_dir, store) = open_store().await;
    assert!(store
        .create_store_if_not_exists("notes", &notes_schema())
        .await
        .unwrap());

    let data = record(&[
        ("title", json!("alpha")),
        ("body", json!("beta gamma")),
        ("stars", json!(4)),
        ("pinned", json!(true)),
        ("tags", json!(["work", "urgent"])),
    ]);
    let id = store.add("alice", "notes", data, None).await.unwrap();

    let got = store
        .get("alice", "notes", &id, true)
        .await
        .unwrap()
        .expect("record present");
    assert_eq!(got["id"], json!(id));
    assert_eq!(got["user_id"], json!("alice"));
    assert_eq!(got["title"], json!("alpha"));
    assert_eq!(got["body"], json!("beta gamma"));
    assert_eq!(got["stars"], json!(4));
    assert_eq!(got["pinned"], json!(true));
    assert_eq!(got["tags"], json!(["work", "urgent"]));
    // Fresh collections materialize as the empty list.
    assert_eq!(got["comments"], json!([]));
    assert!(got["created_at"].is_string());
}

#[tokio::test]
async fn create_store_is_idempotent() {
    let (_dir, store) = open_store().await;
    assert!(store
        .create_store_if_not_exists("notes", &notes_schema())
        .await
        .unwrap());
    assert!(!store
        .create_store_if_not_exists("notes", &notes_schema())
        .await
        .unwrap());
    assert_eq!(store.list_stores().await.unwrap(), vec!["notes"]);
}

#[tokio::test]
async fn get_missing_record_is_none_not_error() {
    let (_dir, store) = open_store().await;
    store
        .create_store_if_not_exists("notes", &notes_schema())
        .await
        .unwrap();
    assert!(store
        .get("alice", "notes", "nope", false)
        .await
        .unwrap()
        .is_none());
    assert!(!store.delete("alice", "notes", "nope").await.unwrap());
    assert!(!store
        .update("alice", "notes", "nope", record(&[("title", json!("x"))]))
        .await
        .unwrap());
}

#[tokio::test]
async fn duplicate_record_id_is_validation() {
    let (_dir, store) = open_store().await;
    store
        .create_store_if_not_exists("notes", &notes_schema())
        .await
        .unwrap();
    let data = record(&[("title", json!("one"))]);
    store
        .add("alice", "notes", data.clone(), Some("fixed-id".into()))
        .await
        .unwrap();
    let err = store
        .add("alice", "notes", data, Some("fixed-id".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn unknown_and_wrong_kind_fields_are_validation() {
    let (_dir, store) = open_store().await;
    store
        .create_store_if_not_exists("notes", &notes_schema())
        .await
        .unwrap();

    let err = store
        .add("alice", "notes", record(&[("bogus", json!(1))]), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let err = store
        .add("alice", "notes", record(&[("stars", json!("five"))]), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    // Collections cannot be written through add or update.
    let err = store
        .add("alice", "notes", record(&[("comments", json!([]))]), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tenancy closure
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn no_operation_crosses_tenants() {
    let (_dir, store) = open_store().await;
    store
        .create_store_if_not_exists("notes", &notes_schema())
        .await
        .unwrap();

    let id = store
        .add(
            "alice",
            "notes",
            record(&[("title", json!("alpha")), ("body", json!("beta gamma"))]),
            None,
        )
        .await
        .unwrap();

    assert!(store.get("bob", "notes", &id, false).await.unwrap().is_none());
    assert!(store
        .find("bob", "notes", FindQuery::new())
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        store.count("bob", "notes", &FilterSet::new()).await.unwrap(),
        0
    );
    assert!(store
        .full_text_search("bob", "notes", "beta", None, 0)
        .await
        .unwrap()
        .is_empty());
    assert!(matches!(
        store
            .collection_get("bob", "notes", &id, "comments", None, 0)
            .await
            .unwrap_err(),
        Error::NotFound(_)
    ));
    // Bob cannot mutate Alice's record either.
    assert!(!store
        .update("bob", "notes", &id, record(&[("title", json!("stolen"))]))
        .await
        .unwrap());
    assert!(!store.delete("bob", "notes", &id).await.unwrap());
    assert!(store.get("alice", "notes", &id, false).await.unwrap().is_some());
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Full-text search
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn fts_matches_only_the_right_tenant_and_record() {
    let (_dir, store) = open_store().await;
    store
        .create_store_if_not_exists("notes", &notes_schema())
        .await
        .unwrap();

    let first = store
        .add(
            "alice",
            "notes",
            record(&[("title", json!("alpha")), ("body", json!("beta gamma"))]),
            None,
        )
        .await
        .unwrap();
    store
        .add(
            "alice",
            "notes",
            record(&[("title", json!("delta")), ("body", json!("epsilon"))]),
            None,
        )
        .await
        .unwrap();

    let hits = store
        .full_text_search("alice", "notes", "beta", None, 0)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["id"], json!(first));

    assert!(store
        .full_text_search("bob", "notes", "beta", None, 0)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn fts_reflects_update_and_delete() {
    let (_dir, store) = open_store().await;
    store
        .create_store_if_not_exists("notes", &notes_schema())
        .await
        .unwrap();
    let id = store
        .add(
            "alice",
            "notes",
            record(&[("title", json!("alpha")), ("body", json!("original wording"))]),
            None,
        )
        .await
        .unwrap();

    store
        .update(
            "alice",
            "notes",
            &id,
            record(&[("body", json!("replacement phrasing"))]),
        )
        .await
        .unwrap();

    assert!(store
        .full_text_search("alice", "notes", "original", None, 0)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        store
            .full_text_search("alice", "notes", "replacement", None, 0)
            .await
            .unwrap()
            .len(),
        1
    );

    store.delete("alice", "notes", &id).await.unwrap();
    assert!(store
        .full_text_search("alice", "notes", "replacement", None, 0)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn fts_indexes_collection_items() {
    let (_dir, store) = open_store().await;
    store
        .create_store_if_not_exists("notes", &notes_schema())
        .await
        .unwrap();
    let id = store
        .add("alice", "notes", record(&[("title", json!("plain"))]), None)
        .await
        .unwrap();

    store
        .collection_append(
            "alice",
            "notes",
            &id,
            "comments",
            json!({"text": "a remark about quasars"}),
        )
        .await
        .unwrap();

    let hits = store
        .full_text_search("alice", "notes", "quasars", None, 0)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["id"], json!(id));
}

#[tokio::test]
async fn fts_stemming_matches_inflections() {
    let (_dir, store) = open_store().await;
    store
        .create_store_if_not_exists("notes", &notes_schema())
        .await
        .unwrap();
    store
        .add(
            "alice",
            "notes",
            record(&[("body", json!("running faster every day"))]),
            None,
        )
        .await
        .unwrap();

    // Porter stemming: "run" matches "running".
    assert_eq!(
        store
            .full_text_search("alice", "notes", "run", None, 0)
            .await
            .unwrap()
            .len(),
        1
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Collections
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn appends_assign_increasing_one_based_indices() {
    let (_dir, store) = open_store().await;
    store
        .create_store_if_not_exists("notes", &notes_schema())
        .await
        .unwrap();
    let id = store
        .add("alice", "notes", record(&[("title", json!("t"))]), None)
        .await
        .unwrap();

    for expected in 1..=3 {
        let index = store
            .collection_append("alice", "notes", &id, "comments", json!({"n": expected}))
            .await
            .unwrap();
        assert_eq!(index, expected);
    }

    let items = store
        .collection_get("alice", "notes", &id, "comments", None, 0)
        .await
        .unwrap();
    assert_eq!(items, vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})]);

    let page = store
        .collection_get("alice", "notes", &id, "comments", Some(1), 1)
        .await
        .unwrap();
    assert_eq!(page, vec![json!({"n": 2})]);
}

#[tokio::test]
async fn append_does_not_rewrite_the_parent_row() {
    let (_dir, store) = open_store().await;
    store
        .create_store_if_not_exists("notes", &notes_schema())
        .await
        .unwrap();
    let id = store
        .add(
            "alice",
            "notes",
            record(&[("title", json!("stable")), ("stars", json!(2))]),
            None,
        )
        .await
        .unwrap();

    let before = store
        .get("alice", "notes", &id, false)
        .await
        .unwrap()
        .unwrap();
    store
        .collection_append("alice", "notes", &id, "comments", json!({"c": 1}))
        .await
        .unwrap();
    let after = store
        .get("alice", "notes", &id, false)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(before, after);
}

#[tokio::test]
async fn collection_ops_on_missing_parent_fail_not_found() {
    let (_dir, store) = open_store().await;
    store
        .create_store_if_not_exists("notes", &notes_schema())
        .await
        .unwrap();

    assert!(matches!(
        store
            .collection_append("alice", "notes", "ghost", "comments", json!({"a": 1}))
            .await
            .unwrap_err(),
        Error::NotFound(_)
    ));
    assert!(matches!(
        store
            .collection_get("alice", "notes", "ghost", "comments", None, 0)
            .await
            .unwrap_err(),
        Error::NotFound(_)
    ));
}

#[tokio::test]
async fn scalar_collection_items_are_rejected() {
    let (_dir, store) = open_store().await;
    store
        .create_store_if_not_exists("notes", &notes_schema())
        .await
        .unwrap();
    let id = store
        .add("alice", "notes", record(&[("title", json!("t"))]), None)
        .await
        .unwrap();
    assert!(matches!(
        store
            .collection_append("alice", "notes", &id, "comments", json!("bare string"))
            .await
            .unwrap_err(),
        Error::Validation(_)
    ));
}

#[tokio::test]
async fn delete_cascades_to_collection_items() {
    let (_dir, store) = open_store().await;
    store
        .create_store_if_not_exists("notes", &notes_schema())
        .await
        .unwrap();
    let id = store
        .add("alice", "notes", record(&[("title", json!("t"))]), None)
        .await
        .unwrap();
    store
        .collection_append("alice", "notes", &id, "comments", json!({"c": 1}))
        .await
        .unwrap();

    assert!(store.delete("alice", "notes", &id).await.unwrap());
    // Parent gone; the collection went with it.
    assert!(matches!(
        store
            .collection_get("alice", "notes", &id, "comments", None, 0)
            .await
            .unwrap_err(),
        Error::NotFound(_)
    ));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Find / count / filters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn find_with_filters_order_and_pagination() {
    let (_dir, store) = open_store().await;
    store
        .create_store_if_not_exists("notes", &notes_schema())
        .await
        .unwrap();

    for (title, stars, pinned) in [("a", 1, false), ("b", 2, true), ("c", 3, true)] {
        store
            .add(
                "alice",
                "notes",
                record(&[
                    ("title", json!(title)),
                    ("stars", json!(stars)),
                    ("pinned", json!(pinned)),
                ]),
                None,
            )
            .await
            .unwrap();
    }

    let pinned = store
        .find(
            "alice",
            "notes",
            FindQuery::new()
                .filters(FilterSet::new().eq("pinned", json!(true)))
                .order_by("stars", true),
        )
        .await
        .unwrap();
    assert_eq!(pinned.len(), 2);
    assert_eq!(pinned[0]["title"], json!("c"));
    assert_eq!(pinned[1]["title"], json!("b"));

    let count = store
        .count("alice", "notes", &FilterSet::new().eq("pinned", json!(true)))
        .await
        .unwrap();
    assert_eq!(count, 2);

    let page = store
        .find(
            "alice",
            "notes",
            FindQuery::new().order_by("stars", false).limit(1).offset(1),
        )
        .await
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0]["title"], json!("b"));
}

#[tokio::test]
async fn like_and_contains_filters() {
    let (_dir, store) = open_store().await;
    store
        .create_store_if_not_exists("notes", &notes_schema())
        .await
        .unwrap();
    store
        .add(
            "alice",
            "notes",
            record(&[("title", json!("meeting notes")), ("tags", json!(["work"]))]),
            None,
        )
        .await
        .unwrap();
    store
        .add(
            "alice",
            "notes",
            record(&[("title", json!("groceries")), ("tags", json!(["home"]))]),
            None,
        )
        .await
        .unwrap();

    let like = store
        .find(
            "alice",
            "notes",
            FindQuery::new().filters(FilterSet::new().like("title", "%meeting%")),
        )
        .await
        .unwrap();
    assert_eq!(like.len(), 1);

    let contains = store
        .find(
            "alice",
            "notes",
            FindQuery::new().filters(FilterSet::new().contains("tags", json!("home"))),
        )
        .await
        .unwrap();
    assert_eq!(contains.len(), 1);
    assert_eq!(contains[0]["title"], json!("groceries"));

    let unknown = store
        .find(
            "alice",
            "notes",
            FindQuery::new().filters(FilterSet::new().eq("nope", json!(1))),
        )
        .await
        .unwrap_err();
    assert!(matches!(unknown, Error::Validation(_)));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Schema evolution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn kind_drift_is_schema_conflict() {
    let (_dir, store) = open_store().await;
    store
        .create_store_if_not_exists(
            "tasks",
            &StoreSchema::new().field("priority", FieldKind::Integer),
        )
        .await
        .unwrap();

    let err = store
        .create_store_if_not_exists(
            "tasks",
            &StoreSchema::new().field("priority", FieldKind::Text),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SchemaConflict(_)));
}

#[tokio::test]
async fn additive_fields_are_accepted_later() {
    let (_dir, store) = open_store().await;
    store
        .create_store_if_not_exists("tasks", &StoreSchema::new().field("title", FieldKind::Text))
        .await
        .unwrap();

    let created = store
        .create_store_if_not_exists(
            "tasks",
            &StoreSchema::new()
                .field("title", FieldKind::Text)
                .field("done", FieldKind::Bool),
        )
        .await
        .unwrap();
    assert!(!created);

    let id = store
        .add(
            "alice",
            "tasks",
            record(&[("title", json!("ship it")), ("done", json!(false))]),
            None,
        )
        .await
        .unwrap();
    let got = store.get("alice", "tasks", &id, false).await.unwrap().unwrap();
    assert_eq!(got["done"], json!(false));
}

#[tokio::test]
async fn store_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig {
        db_path: dir.path().join("persist.db"),
        ..Default::default()
    };

    let id = {
        let store = SqliteStore::open(&config).await.unwrap();
        store
            .create_store_if_not_exists("notes", &notes_schema())
            .await
            .unwrap();
        store
            .add(
                "alice",
                "notes",
                record(&[("title", json!("durable")), ("body", json!("content"))]),
                None,
            )
            .await
            .unwrap()
    };

    let reopened = SqliteStore::open(&config).await.unwrap();
    let got = reopened
        .get("alice", "notes", &id, false)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(got["title"], json!("durable"));
    assert_eq!(
        reopened
            .full_text_search("alice", "notes", "durable", None, 0)
            .await
            .unwrap()
            .len(),
        1
    );
}
