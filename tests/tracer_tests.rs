//! Tracer Tests
//!
//! Tests for the debug events emitted around every façade operation, including:
//! - One event before and one after each dispatched call
//! - Scope naming for collections and grids
//! - Error outcomes

mod common;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use albatross::{doc, UploadOptions};
use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

type Fields = HashMap<String, String>;

/// Keeps the fields of every event that carries an `op`.
#[derive(Clone, Default)]
struct Recorder {
    events: Arc<Mutex<Vec<Fields>>>,
}

impl Recorder {
    fn events(&self) -> Vec<Fields> {
        self.events.lock().clone()
    }

    fn for_op(&self, op: &str) -> Vec<Fields> {
        self.events()
            .into_iter()
            .filter(|fields| fields.get("op").map(String::as_str) == Some(op))
            .collect()
    }
}

#[derive(Default)]
struct FieldVisitor {
    fields: Fields,
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.fields.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.fields
            .insert(field.name().to_string(), format!("{:?}", value));
    }
}

impl<S: Subscriber> Layer<S> for Recorder {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        if visitor.fields.contains_key("op") {
            self.events.lock().push(visitor.fields);
        }
    }
}

fn recording() -> (Recorder, tracing::subscriber::DefaultGuard) {
    let recorder = Recorder::default();
    let subscriber = tracing_subscriber::registry().with(recorder.clone());
    let guard = tracing::subscriber::set_default(subscriber);
    (recorder, guard)
}

// ============================================================================
// Collection Event Tests
// ============================================================================

#[tokio::test]
async fn test_events_before_and_after_operation() {
    let (recorder, _guard) = recording();
    let client = common::memory_client();
    let users = client.collection("users");

    users.find_one(doc! { "name": "ada" }, None).await.unwrap();

    let events = recorder.for_op("find_one");
    assert_eq!(events.len(), 2);

    assert_eq!(events[0]["scope"], "users");
    assert_eq!(events[0]["message"], "dispatch");
    assert!(events[0]["args"].contains("ada"));

    assert_eq!(events[1]["scope"], "users");
    assert_eq!(events[1]["outcome"], "ok");
}

#[tokio::test]
async fn test_every_operation_is_traced() {
    let (recorder, _guard) = recording();
    let client = common::memory_client();
    let users = client.collection("users");

    users.insert(&doc! { "_id": 1 }, None).await.unwrap();
    users.count(doc! {}, None).await.unwrap();
    users.exists(doc! { "_id": 1 }, None).await.unwrap();
    users
        .update_one(doc! { "_id": 1 }, doc! { "$set": { "a": 1 } }, None)
        .await
        .unwrap();
    users.delete_many(doc! {}, None).await.unwrap();

    for op in ["insert", "count", "exists", "update_one", "delete_many"] {
        assert_eq!(recorder.for_op(op).len(), 2, "events for {}", op);
    }
}

#[tokio::test]
async fn test_failed_operation_records_error() {
    let (recorder, _guard) = recording();
    let client = common::memory_client();
    let users = client.collection("users");

    users.insert(&doc! { "_id": 1 }, None).await.unwrap();
    users.insert(&doc! { "_id": 1 }, None).await.unwrap_err();

    let events = recorder.for_op("insert");
    assert_eq!(events.len(), 4);
    let last = &events[3];
    assert_eq!(last["outcome"], "err");
    assert!(last["error"].contains("E11000"));
}

#[tokio::test]
async fn test_connect_failure_is_traced_as_error() {
    let (recorder, _guard) = recording();
    let (client, script, _store) = common::scripted_client();
    script.fail_next_connects(1);

    client.collection("users").count(doc! {}, None).await.unwrap_err();

    let events = recorder.for_op("count");
    assert_eq!(events.len(), 2);
    assert_eq!(events[1]["outcome"], "err");
}

// ============================================================================
// Grid Event Tests
// ============================================================================

#[tokio::test]
async fn test_grid_scope_names_bucket() {
    let (recorder, _guard) = recording();
    let client = common::memory_client();

    client
        .grid(Some("images"))
        .upload_bytes(b"png", UploadOptions::default())
        .await
        .unwrap();

    let events = recorder.for_op("upload");
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|fields| fields["scope"] == "grid-images"));
}
