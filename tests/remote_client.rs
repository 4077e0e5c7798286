//! End-to-end tests of the HTTP client against a fake Timesketch server.
//!
//! The fake implements just enough of the Timesketch web app to exercise
//! form login (CSRF token + session cookie), sketch lookup, scrolled explore
//! paging, and the aggregation endpoint.

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use timesketch_mcp::aggregation::AggregationRunner;
use timesketch_mcp::client::TimesketchClient;
use timesketch_mcp::config::TimesketchSettings;
use timesketch_mcp::retry::RetryPolicy;
use timesketch_mcp::search::{SearchExecutor, SearchParams};
use timesketch_mcp_core::backend::TimesketchBackend;
use timesketch_mcp_core::models::SortOrder;
use timesketch_mcp_core::normalize::{normalize, ColumnSet};
use timesketch_mcp_core::TimesketchError;

const CSRF: &str = "tok-123";
const SESSION: &str = "session=ok";

// ─── Fake Timesketch ────────────────────────────────────────────────

#[derive(Default)]
struct Fake {
    events: Vec<Value>,
    explore_bodies: Mutex<Vec<Value>>,
}

type Shared = Arc<Fake>;

fn authorized(headers: &HeaderMap) -> bool {
    let cookie_ok = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|c| c.contains(SESSION));
    let csrf_ok = headers
        .get("X-CSRFToken")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|t| t == CSRF);
    cookie_ok && csrf_ok
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "message": "login required" }))).into_response()
}

async fn login_page() -> Response {
    let html = format!(
        r#"<html><form method="post"><input id="csrf_token" name="csrf_token" type="hidden" value="{}"></form></html>"#,
        CSRF
    );
    (
        [(header::SET_COOKIE, "session=anon; Path=/")],
        Html(html),
    )
        .into_response()
}

async fn login(Form(form): Form<HashMap<String, String>>) -> Response {
    let ok = form.get("username").map(String::as_str) == Some("analyst")
        && form.get("password").map(String::as_str) == Some("secret")
        && form.get("csrf_token").map(String::as_str) == Some(CSRF);
    if !ok {
        return (StatusCode::UNAUTHORIZED, "bad credentials").into_response();
    }
    ([(header::SET_COOKIE, "session=ok; Path=/")], "welcome").into_response()
}

async fn sketch(headers: HeaderMap, Path(id): Path<i64>) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    if id != 1 {
        return (StatusCode::NOT_FOUND, Json(json!({ "message": "no sketch" }))).into_response();
    }
    Json(json!({ "objects": [{ "id": 1, "name": "case", "description": "" }] })).into_response()
}

async fn explore(
    State(fake): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    fake.explore_bodies.lock().unwrap().push(body.clone());
    if id != 1 {
        return (StatusCode::NOT_FOUND, Json(json!({ "message": "no sketch" }))).into_response();
    }
    let query = body["query"].as_str().unwrap_or_default();
    if query.contains("AND AND") {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "message": "Failed to parse query" })),
        )
            .into_response();
    }

    let total = fake.events.len();
    let size = body["filter"]["size"].as_u64().unwrap_or(10) as usize;
    let offset: usize = body["scroll_id"]
        .as_str()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    let mut events = fake.events.clone();
    if body["filter"]["order"] == "desc" {
        events.reverse();
    }
    let page: Vec<Value> = events.into_iter().skip(offset).take(size).collect();
    let next = offset + page.len();
    let scroll_id = if body["enable_scroll"] == true {
        next.to_string()
    } else {
        String::new()
    };

    Json(json!({
        "objects": page,
        "meta": { "es_total_count": total, "scroll_id": scroll_id }
    }))
    .into_response()
}

async fn aggregation(headers: HeaderMap, Path(id): Path<i64>, Json(body): Json<Value>) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    if id != 1 {
        return (StatusCode::NOT_FOUND, Json(json!({ "message": "no sketch" }))).into_response();
    }
    let field = body["aggregator_parameters"]["field"]
        .as_str()
        .unwrap_or_default();
    let bucket = |value: &str, count: u64| {
        let mut b = serde_json::Map::new();
        b.insert(field.to_string(), json!(value));
        b.insert("count".to_string(), json!(count));
        Value::Object(b)
    };
    Json(json!({
        "objects": [{
            "field_bucket": {
                "buckets": [bucket("syslog:line", 4), bucket("fs:stat", 1)]
            }
        }]
    }))
    .into_response()
}

fn events(n: usize) -> Vec<Value> {
    (0..n)
        .map(|i| {
            json!({
                "_id": format!("ev-{}", i),
                "_index": "timeline-1",
                "_source": {
                    "datetime": format!("2024-03-01T10:00:{:02}Z", i),
                    "data_type": "syslog:line",
                    "message": format!("line {}", i),
                    "tag": []
                }
            })
        })
        .collect()
}

async fn start_fake(n: usize) -> (u16, Shared) {
    let fake = Arc::new(Fake {
        events: events(n),
        ..Fake::default()
    });
    let app = Router::new()
        .route("/login/", get(login_page).post(login))
        .route("/api/v1/sketches/{id}/", get(sketch))
        .route("/api/v1/sketches/{id}/explore/", post(explore))
        .route("/api/v1/sketches/{id}/aggregation/explore/", post(aggregation))
        .with_state(fake.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (port, fake)
}

fn settings(port: u16, password: &str) -> TimesketchSettings {
    TimesketchSettings {
        host: "127.0.0.1".to_string(),
        port: port.to_string(),
        username: "analyst".to_string(),
        password: password.to_string(),
    }
}

async fn connect(port: u16) -> Arc<TimesketchClient> {
    Arc::new(
        TimesketchClient::connect(&settings(port, "secret"), Duration::from_secs(5))
            .await
            .unwrap(),
    )
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_login_and_sketch_lookup() {
    let (port, _) = start_fake(0).await;
    let client = connect(port).await;

    let sketch = client.get_sketch(1).await.unwrap().unwrap();
    assert_eq!(sketch.id, 1);
    assert_eq!(sketch.name, "case");
    assert!(client.get_sketch(2).await.unwrap().is_none());
}

#[tokio::test]
async fn test_bad_password_is_connection_error() {
    let (port, _) = start_fake(0).await;
    let result = TimesketchClient::connect(&settings(port, "wrong"), Duration::from_secs(5)).await;
    assert!(matches!(result, Err(TimesketchError::Connection(_))));
}

#[tokio::test]
async fn test_unreachable_host_is_connection_error() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let result = TimesketchClient::connect(&settings(port, "secret"), Duration::from_secs(2)).await;
    assert!(matches!(result, Err(TimesketchError::Connection(_))));
}

#[tokio::test]
async fn test_scrolled_search_collects_every_page() {
    let (port, fake) = start_fake(5).await;
    let client = connect(port).await;

    let executor = SearchExecutor::new(client, RetryPolicy::none(), 2);
    let mut params = SearchParams::new(1, "*");
    params.sort = SortOrder::Asc;
    let table = executor.search(&params).await.unwrap();

    assert_eq!(table.len(), 5);
    assert_eq!(table[0]["identifier"], "ev-0");
    assert_eq!(table[4]["message"], "line 4");

    let bodies = fake.explore_bodies.lock().unwrap().clone();
    assert_eq!(bodies.len(), 3);
    assert_eq!(bodies[0]["enable_scroll"], true);
    assert!(bodies[0].get("scroll_id").is_none());
    assert_eq!(bodies[1]["scroll_id"], "2");
    assert_eq!(bodies[0]["filter"]["indices"], "_all");

    let records = normalize(table, ColumnSet::Fixed);
    let keys: Vec<&str> = records[0].keys().map(|k| k.as_str()).collect();
    assert_eq!(keys, vec!["identifier", "datetime", "data_type", "tag", "message"]);
    assert_eq!(records[0]["datetime"], "2024-03-01T10:00:00+00:00");
}

#[tokio::test]
async fn test_limited_search_single_request() {
    let (port, fake) = start_fake(5).await;
    let client = connect(port).await;

    let executor = SearchExecutor::new(client, RetryPolicy::none(), 100);
    let mut params = SearchParams::new(1, "*");
    params.limit = Some(2);
    params.starred = true;
    let table = executor.search(&params).await.unwrap();
    assert_eq!(table.len(), 2);
    // Descending by default.
    assert_eq!(table[0]["identifier"], "ev-4");

    let bodies = fake.explore_bodies.lock().unwrap().clone();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["enable_scroll"], false);
    assert_eq!(bodies[0]["filter"]["size"], 2);
    assert_eq!(bodies[0]["filter"]["chips"][0]["value"], "__ts_star");
}

#[tokio::test]
async fn test_rejected_query_is_search_failed() {
    let (port, _) = start_fake(3).await;
    let client = connect(port).await;
    let executor = SearchExecutor::new(client, RetryPolicy::none(), 100);
    let err = executor
        .search(&SearchParams::new(1, "a AND AND b"))
        .await
        .unwrap_err();
    match err {
        TimesketchError::SearchFailed(msg) => assert!(msg.contains("Failed to parse query")),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_missing_sketch_is_not_found() {
    let (port, fake) = start_fake(3).await;
    let client = connect(port).await;
    let executor = SearchExecutor::new(client, RetryPolicy::not_found(2, Duration::ZERO), 100);
    let err = executor.search(&SearchParams::new(9, "*")).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(fake.explore_bodies.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_field_bucket_aggregation() {
    let (port, _) = start_fake(0).await;
    let client = connect(port).await;
    let runner = AggregationRunner::new(client);
    let buckets = runner.field_bucket(1, "data_type", 10_000).await.unwrap();
    assert_eq!(buckets.len(), 2);
    assert_eq!(
        serde_json::to_value(&buckets[0]).unwrap(),
        json!({ "data_type": "syslog:line", "count": 4 })
    );
}
