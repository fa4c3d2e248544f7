//! Collection Tests
//!
//! Tests for the collection façade over the in-memory driver, including:
//! - Insert result shapes and absent versus null values
//! - Update and delete counts
//! - Reads with options, existence checks and index hints
//! - Aggregation, distinct values and index creation

mod common;

use std::sync::Arc;

use albatross::{doc, AlbatrossError, Bson, Hint, IndexOptions, OperationOptions, ReturnDocument, UpdateCount};
use common::memory_client;

// ============================================================================
// Façade Tests
// ============================================================================

#[tokio::test]
async fn test_same_name_same_facade() {
    let client = memory_client();
    let first = client.collection("users");
    let second = client.collection("users");

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.name(), "users");
}

#[tokio::test]
async fn test_facade_id_helper() {
    let client = memory_client();
    let users = client.collection("users");

    let id = users.id(None).unwrap();
    assert_eq!(users.id(Some(&id.to_hex())).unwrap(), id);
    assert!(matches!(users.id(Some("zz")), Err(AlbatrossError::InvalidId(_))));
}

// ============================================================================
// Insert Tests
// ============================================================================

#[tokio::test]
async fn test_insert_returns_stored_copy() {
    let client = memory_client();
    let users = client.collection("users");

    let input = doc! { "name": "ada", "tags": ["math"] };
    let mut stored = users.insert(&input, None).await.unwrap();

    assert!(stored.get_object_id("_id").is_ok());
    assert!(!input.contains_key("_id"));

    // Changing the returned copy does not reach the database.
    stored.insert("name", "grace");
    let found = users.find_by_id(stored.get_object_id("_id").unwrap(), None).await.unwrap().unwrap();
    assert_eq!(found.get_str("name").unwrap(), "ada");
}

#[tokio::test]
async fn test_insert_keeps_given_id() {
    let client = memory_client();
    let users = client.collection("users");

    let stored = users.insert(&doc! { "_id": "ada", "born": 1815 }, None).await.unwrap();
    assert_eq!(stored, doc! { "_id": "ada", "born": 1815 });
    assert!(users.find_by_id("ada", None).await.unwrap().is_some());
}

#[tokio::test]
async fn test_absent_values_are_dropped_null_is_kept() {
    let client = memory_client();
    let users = client.collection("users");

    let stored = users
        .insert(
            &doc! { "name": "ada", "nickname": Bson::Undefined, "died": Bson::Null, "nested": { "skip": Bson::Undefined, "keep": 1 } },
            None,
        )
        .await
        .unwrap();

    assert!(!stored.contains_key("nickname"));
    assert_eq!(stored.get("died"), Some(&Bson::Null));
    assert_eq!(stored.get_document("nested").unwrap(), &doc! { "keep": 1 });

    let found = users
        .find_one(doc! { "died": Bson::Null, "nickname": Bson::Undefined }, None)
        .await
        .unwrap()
        .unwrap();
    assert!(!found.contains_key("nickname"));
}

#[tokio::test]
async fn test_insert_duplicate_id_fails() {
    let client = memory_client();
    let users = client.collection("users");

    users.insert(&doc! { "_id": 1 }, None).await.unwrap();
    let err = users.insert(&doc! { "_id": 1 }, None).await.unwrap_err();
    assert!(err.to_string().contains("E11000"));
    assert_eq!(users.count(doc! {}, None).await.unwrap(), 1);
}

#[tokio::test]
async fn test_insert_many() {
    let client = memory_client();
    let users = client.collection("users");

    let stored = users
        .insert_many(&[doc! { "name": "ada" }, doc! { "name": "grace" }], None)
        .await
        .unwrap();

    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|doc| doc.contains_key("_id")));
    assert_eq!(users.count(doc! {}, None).await.unwrap(), 2);
}

// ============================================================================
// Update Tests
// ============================================================================

#[tokio::test]
async fn test_update_one_counts() {
    let client = memory_client();
    let users = client.collection("users");
    users.insert(&doc! { "_id": 1, "born": 1815 }, None).await.unwrap();

    let unchanged = users
        .update_one(doc! { "_id": 1 }, doc! { "$set": { "born": 1815 } }, None)
        .await
        .unwrap();
    assert_eq!(unchanged, UpdateCount::new(1, 0));

    let changed = users
        .update_one(doc! { "_id": 1 }, doc! { "$set": { "born": 1816 } }, None)
        .await
        .unwrap();
    assert_eq!(changed, UpdateCount::new(1, 1));

    let missing = users
        .update_one(doc! { "_id": 2 }, doc! { "$set": { "born": 1906 } }, None)
        .await
        .unwrap();
    assert_eq!(missing, UpdateCount::new(0, 0));
}

#[tokio::test]
async fn test_upsert_reports_nothing_matched() {
    let client = memory_client();
    let users = client.collection("users");

    let count = users
        .update_one(
            doc! { "name": "grace" },
            doc! { "$set": { "born": 1906 } },
            OperationOptions::new().upsert(true),
        )
        .await
        .unwrap();

    assert_eq!(count, UpdateCount::new(0, 0));
    let found = users.find_one(doc! { "name": "grace" }, None).await.unwrap().unwrap();
    assert_eq!(found.get_i32("born").unwrap(), 1906);
}

#[tokio::test]
async fn test_update_many_counts() {
    let client = memory_client();
    let users = client.collection("users");
    users
        .insert_many(
            &[
                doc! { "team": "a", "score": 1 },
                doc! { "team": "a", "score": 2 },
                doc! { "team": "b", "score": 2 },
            ],
            None,
        )
        .await
        .unwrap();

    let count = users
        .update_many(doc! { "team": "a" }, doc! { "$set": { "score": 2 } }, None)
        .await
        .unwrap();
    assert_eq!(count, UpdateCount::new(2, 1));
}

#[tokio::test]
async fn test_update_drops_absent_values() {
    let client = memory_client();
    let users = client.collection("users");
    users.insert(&doc! { "_id": 1, "name": "ada" }, None).await.unwrap();

    users
        .update_one(
            doc! { "_id": 1 },
            doc! { "$set": { "born": 1815, "nickname": Bson::Undefined } },
            None,
        )
        .await
        .unwrap();

    let found = users.find_by_id(1, None).await.unwrap().unwrap();
    assert_eq!(found, doc! { "_id": 1, "name": "ada", "born": 1815 });
}

#[tokio::test]
async fn test_find_one_and_update() {
    let client = memory_client();
    let counters = client.collection("counters");
    counters.insert(&doc! { "_id": "visits", "n": 1 }, None).await.unwrap();

    let before = counters
        .find_one_and_update(doc! { "_id": "visits" }, doc! { "$inc": { "n": 1 } }, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(before.get_i32("n").unwrap(), 1);

    let after = counters
        .find_one_and_update(
            doc! { "_id": "visits" },
            doc! { "$inc": { "n": 1 } },
            OperationOptions::new().return_document(ReturnDocument::After),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.get_i32("n").unwrap(), 3);

    let missing = counters
        .find_one_and_update(doc! { "_id": "other" }, doc! { "$inc": { "n": 1 } }, None)
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn test_replacement_update_is_rejected() {
    let client = memory_client();
    let users = client.collection("users");
    users.insert(&doc! { "_id": 1, "name": "ada" }, None).await.unwrap();

    let result = users
        .update_one(doc! { "_id": 1 }, doc! { "name": "grace" }, None)
        .await;
    assert!(result.is_err());
}

// ============================================================================
// Delete Tests
// ============================================================================

#[tokio::test]
async fn test_delete_counts() {
    let client = memory_client();
    let users = client.collection("users");
    users
        .insert_many(&[doc! { "a": 1 }, doc! { "a": 1 }, doc! { "a": 2 }], None)
        .await
        .unwrap();

    assert_eq!(users.delete_one(doc! { "a": 1 }, None).await.unwrap(), 1);
    assert_eq!(users.delete_many(doc! { "a": { "$gte": 1 } }, None).await.unwrap(), 2);
    assert_eq!(users.delete_many(doc! {}, None).await.unwrap(), 0);
}

// ============================================================================
// Read Tests
// ============================================================================

#[tokio::test]
async fn test_find_with_options() {
    let client = memory_client();
    let scores = client.collection("scores");
    let docs: Vec<_> = (1..=5).map(|n| doc! { "_id": n, "score": n * 10, "player": format!("p{}", n) }).collect();
    scores.insert_many(&docs, None).await.unwrap();

    let page = scores
        .find(
            doc! { "score": { "$gt": 10 } },
            OperationOptions::new()
                .sort(doc! { "score": -1 })
                .skip(1)
                .limit(2)
                .projection(doc! { "player": 1, "_id": 0 }),
        )
        .await
        .unwrap();

    assert_eq!(page, vec![doc! { "player": "p4" }, doc! { "player": "p3" }]);
    assert_eq!(scores.count(doc! { "score": { "$lte": 30 } }, None).await.unwrap(), 3);
}

#[tokio::test]
async fn test_find_one_missing_is_none() {
    let client = memory_client();
    let users = client.collection("users");
    assert!(users.find_one(doc! { "name": "nobody" }, None).await.unwrap().is_none());
    assert!(users.find_by_id(42, None).await.unwrap().is_none());
}

#[tokio::test]
async fn test_exists() {
    let client = memory_client();
    let users = client.collection("users");
    users.insert(&doc! { "email": "ada@example.com" }, None).await.unwrap();

    assert!(users.exists(doc! { "email": "ada@example.com" }, None).await.unwrap());
    assert!(!users.exists(doc! { "email": "grace@example.com" }, None).await.unwrap());
}

#[tokio::test]
async fn test_exists_forwards_hint() {
    let client = memory_client();
    let users = client.collection("users");
    users.create_index(doc! { "email": 1 }, IndexOptions::default()).await.unwrap();
    users.insert(&doc! { "email": "ada@example.com" }, None).await.unwrap();

    let hinted = users
        .exists(
            doc! { "email": "ada@example.com" },
            OperationOptions::new().hint(Hint::Keys(doc! { "email": 1 })),
        )
        .await
        .unwrap();
    assert!(hinted);

    let unknown = users
        .exists(doc! {}, OperationOptions::new().hint(Hint::Name("missing_1".to_string())))
        .await;
    assert!(unknown.is_err());
}

#[tokio::test]
async fn test_distinct() {
    let client = memory_client();
    let users = client.collection("users");
    users
        .insert_many(
            &[
                doc! { "team": "a", "tags": ["x", "y"] },
                doc! { "team": "b", "tags": ["y"] },
                doc! { "team": "a" },
            ],
            None,
        )
        .await
        .unwrap();

    let teams = users.distinct("team", doc! {}, None).await.unwrap();
    assert_eq!(teams, vec![Bson::from("a"), Bson::from("b")]);

    let tags = users.distinct("tags", doc! { "team": "a" }, None).await.unwrap();
    assert_eq!(tags, vec![Bson::from("x"), Bson::from("y")]);
}

#[tokio::test]
async fn test_aggregate() {
    let client = memory_client();
    let orders = client.collection("orders");
    orders
        .insert_many(
            &[
                doc! { "status": "paid", "total": 5 },
                doc! { "status": "open", "total": 7 },
                doc! { "status": "paid", "total": 9 },
            ],
            None,
        )
        .await
        .unwrap();

    let counted = orders
        .aggregate(vec![doc! { "$match": { "status": "paid" } }, doc! { "$count": "paid" }], None)
        .await
        .unwrap();
    assert_eq!(counted, vec![doc! { "paid": 2 }]);

    let top = orders
        .aggregate(
            vec![
                doc! { "$sort": { "total": -1 } },
                doc! { "$limit": 1 },
                doc! { "$project": { "_id": 0, "total": 1 } },
            ],
            None,
        )
        .await
        .unwrap();
    assert_eq!(top, vec![doc! { "total": 9 }]);
}

// ============================================================================
// Index Tests
// ============================================================================

#[tokio::test]
async fn test_create_index_names() {
    let client = memory_client();
    let users = client.collection("users");

    let name = users
        .create_index(doc! { "last": 1, "first": -1 }, IndexOptions::default())
        .await
        .unwrap();
    assert_eq!(name, "last_1_first_-1");

    let named = users
        .create_index(doc! { "email": 1 }, IndexOptions::unique().named("by_email"))
        .await
        .unwrap();
    assert_eq!(named, "by_email");
}

#[tokio::test]
async fn test_unique_index_rejects_duplicates() {
    let client = memory_client();
    let users = client.collection("users");
    users.create_index(doc! { "email": 1 }, IndexOptions::unique()).await.unwrap();

    users.insert(&doc! { "email": "ada@example.com" }, None).await.unwrap();
    let err = users.insert(&doc! { "email": "ada@example.com" }, None).await.unwrap_err();
    assert!(err.to_string().contains("duplicate key"));
}
