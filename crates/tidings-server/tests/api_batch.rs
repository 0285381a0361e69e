mod common;

use axum::http::StatusCode;
use common::{harness, send, stored_count};
use serde_json::json;
use tidings_events::Change;
use tidings_types::Action;

#[tokio::test]
async fn batch_of_two_creates_dispatches_one_merged_event() {
    let h = harness();

    let (status, body) = send(
        &h.app,
        "POST",
        "/batch",
        Some(json!({
            "requests": [
                {"method": "POST", "path": "/widgets/records", "body": {"id": "1"}},
                {"method": "POST", "path": "/widgets/records", "body": {"id": "2"}}
            ]
        })),
        Some("alice"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let responses = body["responses"].as_array().unwrap();
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0]["status"], 201);
    assert_eq!(responses[1]["path"], "/widgets/records");

    let seen = h.recorder.seen();
    assert_eq!(seen.len(), 1, "one dispatch for the whole batch");
    let event = &seen[0];
    assert_eq!(event.action(), Action::Create);
    assert_eq!(event.user_id(), Some("alice"));
    assert_eq!(
        event.changes().unwrap(),
        &[
            Change::created(responses[0]["body"].clone()),
            Change::created(responses[1]["body"].clone()),
        ]
    );
}

#[tokio::test]
async fn batch_events_keep_first_insertion_order() {
    let h = harness();
    send(&h.app, "POST", "/widgets/records", Some(json!({"id": "a"})), None).await;
    let baseline = h.recorder.seen().len();

    let (status, _) = send(
        &h.app,
        "POST",
        "/batch",
        Some(json!({
            "requests": [
                {"method": "PATCH", "path": "/widgets/records/a", "body": {"v": 1}},
                {"method": "POST", "path": "/gadgets/records", "body": {"id": "b"}},
                {"method": "PATCH", "path": "/widgets/records/a", "body": {"v": 2}}
            ]
        })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let seen = h.recorder.seen();
    let dispatched = &seen[baseline..];
    let order: Vec<_> = dispatched
        .iter()
        .map(|e| (e.resource_name(), e.action()))
        .collect();
    assert_eq!(
        order,
        vec![("widgets", Action::Update), ("gadgets", Action::Create)]
    );
    assert_eq!(dispatched[0].changes().unwrap().len(), 2);
    assert_eq!(
        dispatched[0]
            .subject()
            .params
            .get("widgets_id")
            .map(String::as_str),
        Some("a")
    );
}

#[tokio::test]
async fn failing_subrequest_rolls_back_the_whole_batch() {
    let h = harness();

    let (status, body) = send(
        &h.app,
        "POST",
        "/batch",
        Some(json!({
            "requests": [
                {"method": "POST", "path": "/widgets/records", "body": {"id": "1"}},
                {"method": "GET", "path": "/widgets/records/missing"}
            ]
        })),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().starts_with("requests[1]"));
    assert_eq!(stored_count(&h.pool, "widgets"), 0);
    assert!(h.recorder.seen().is_empty(), "rolled back batch delivers nothing");
}

#[tokio::test]
async fn oversized_batch_is_rejected() {
    let h = harness();
    let requests: Vec<_> = (0..26)
        .map(|_| json!({"path": "/widgets/records"}))
        .collect();

    let (status, _) = send(
        &h.app,
        "POST",
        "/batch",
        Some(json!({ "requests": requests })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(h.recorder.seen().is_empty());
}

#[tokio::test]
async fn subrequest_method_defaults_to_get() {
    let h = harness();
    send(&h.app, "POST", "/widgets/records", Some(json!({"id": "a"})), None).await;

    let (status, body) = send(
        &h.app,
        "POST",
        "/batch",
        Some(json!({ "requests": [{"path": "/widgets/records/a"}] })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["responses"][0]["status"], 200);
    assert_eq!(body["responses"][0]["body"]["id"], "a");
    assert_eq!(h.recorder.seen().last().unwrap().action(), Action::Read);
}

#[tokio::test]
async fn subrequest_query_is_not_part_of_the_event_uri() {
    let h = harness();
    send(&h.app, "POST", "/widgets/records", Some(json!({"id": "a"})), None).await;

    let (status, body) = send(
        &h.app,
        "POST",
        "/batch",
        Some(json!({ "requests": [{"path": "/widgets/records/a?fields=id"}] })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["responses"][0]["status"], 200);

    let read = h.recorder.seen().last().unwrap().clone();
    assert_eq!(read.action(), Action::Read);
    assert_eq!(read.subject().uri, "/widgets/records/a");
}
