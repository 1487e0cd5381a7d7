//! The HTTP client against a local stand-in for the search service.

use std::{
    num::NonZeroU32,
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use axum::{
    Json,
    Router,
    body::Bytes,
    extract::State,
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use chaindb::{
    Bootstrap,
    Connection,
    Error,
    HttpService,
    QueryEngine,
    RecordStore,
    RetryPolicy,
    schema::IndexStatus,
};
use serde_json::{Value, json};

#[derive(Debug, Clone)]
struct Seen {
    method: Method,
    path: String,
    query: Option<String>,
    body: Option<Value>,
}

#[derive(Clone, Default)]
struct Stub {
    seen: Arc<Mutex<Vec<Seen>>>,
    index_created: Arc<AtomicBool>,
}

impl Stub {
    fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }
}

async fn handle(
    State(stub): State<Stub>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    stub.seen.lock().unwrap().push(Seen {
        method: method.clone(),
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        body: serde_json::from_slice(&body).ok(),
    });

    let path = uri.path().trim_start_matches('/').to_string();
    let segments: Vec<&str> = path.split('/').collect();

    match (method.as_str(), segments.as_slice()) {
        ("GET", [""]) => Json(json!({
            "name": "stub-node",
            "cluster_name": "stub",
            "version": {"number": "8.13.0"}
        }))
        .into_response(),
        ("PUT", [index]) => {
            if stub.index_created.swap(true, Ordering::SeqCst) {
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({
                        "error": {
                            "root_cause": [{
                                "type": "resource_already_exists_exception",
                                "reason": format!("index [{index}/x] already exists")
                            }],
                            "type": "resource_already_exists_exception",
                            "reason": format!("index [{index}/x] already exists")
                        },
                        "status": 400
                    })),
                )
                    .into_response()
            } else {
                Json(json!({"acknowledged": true, "index": index}))
                    .into_response()
            }
        }
        ("PUT", [index, "_doc", id]) => (
            StatusCode::CREATED,
            Json(json!({
                "_index": index, "_id": id, "_version": 1, "result": "created"
            })),
        )
            .into_response(),
        ("DELETE", [index, "_doc", id]) => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "_index": index, "_id": id, "_version": 1, "result": "not_found"
            })),
        )
            .into_response(),
        ("POST", [_, "_search"]) => Json(json!({
            "took": 1,
            "hits": {
                "total": {"value": 2, "relation": "eq"},
                "max_score": 1.5,
                "hits": [
                    {"_id": "YS50eHQ=", "_score": 1.5,
                     "_source": {"name": "a.txt", "tags": ["x", "y"]}},
                    {"_id": "Yi50eHQ=", "_score": 0.5,
                     "_source": {"name": "b.txt"}}
                ]
            }
        }))
        .into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn start_stub() -> (String, Stub) {
    let stub = Stub::default();
    let app = Router::new().fallback(handle).with_state(stub.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), stub)
}

async fn ready_connection(url: &str) -> Arc<Connection> {
    let connection = Arc::new(Connection::default());
    Bootstrap::new(Arc::new(HttpService::parse(url).unwrap()))
        .with_policy(RetryPolicy::immediate())
        .run(&connection)
        .await
        .unwrap();
    connection
}

#[tokio::test]
async fn bootstrap_probes_then_creates_index() {
    let (url, stub) = start_stub().await;

    let first = Arc::new(Connection::default());
    let report = Bootstrap::new(Arc::new(HttpService::parse(&url).unwrap()))
        .with_policy(RetryPolicy::immediate())
        .run(&first)
        .await
        .unwrap();
    assert_eq!(report.index, IndexStatus::Created);
    assert_eq!(report.info.name, "stub-node");

    let second = Arc::new(Connection::default());
    let report = Bootstrap::new(Arc::new(HttpService::parse(&url).unwrap()))
        .with_policy(RetryPolicy::immediate())
        .run(&second)
        .await
        .unwrap();
    assert_eq!(report.index, IndexStatus::AlreadyExists);

    let seen = stub.seen();
    assert_eq!(seen[0].method, Method::GET);
    assert_eq!(seen[0].path, "/");
    assert_eq!(seen[1].method, Method::PUT);
    assert_eq!(seen[1].path, "/documents");
    let body = seen[1].body.as_ref().unwrap();
    assert_eq!(
        body["mappings"]["properties"]["name"]["fields"]["ngram"]["analyzer"],
        "catalog_ngram"
    );
}

#[tokio::test]
async fn upsert_puts_document_with_refresh() {
    let (url, stub) = start_stub().await;
    let records = RecordStore::new(ready_connection(&url).await);

    let info = records
        .upsert("a.txt", &["x".to_string(), "y".to_string()])
        .await
        .unwrap();
    assert_eq!(info.to_string(), "[201] created; version=1");

    let put = stub.seen().pop().unwrap();
    assert_eq!(put.method, Method::PUT);
    assert_eq!(put.path, "/documents/_doc/YS50eHQ=");
    assert_eq!(put.query.as_deref(), Some("refresh=true"));
    assert_eq!(put.body, Some(json!({"name": "a.txt", "tags": ["x", "y"]})));
}

#[tokio::test]
async fn keys_with_slashes_stay_one_segment() {
    let (url, stub) = start_stub().await;
    let records = RecordStore::new(ready_connection(&url).await);

    // "???" encodes to "Pz8/".
    records.upsert("???", &[]).await.unwrap();

    let put = stub.seen().pop().unwrap();
    assert_eq!(put.path, "/documents/_doc/Pz8%2F");
}

#[tokio::test]
async fn missing_record_delete_is_rejected() {
    let (url, stub) = start_stub().await;
    let records = RecordStore::new(ready_connection(&url).await);

    match records.remove("a.txt").await.unwrap_err() {
        Error::Delete { status, reason } => {
            assert_eq!(status, 404);
            assert_eq!(reason, "not_found");
        }
        other => panic!("expected delete error, got {other:?}"),
    }

    let delete = stub.seen().pop().unwrap();
    assert_eq!(delete.method, Method::DELETE);
    assert_eq!(delete.query.as_deref(), Some("refresh=true"));
}

#[tokio::test]
async fn search_posts_query_and_maps_hits() {
    let (url, stub) = start_stub().await;
    let engine = QueryEngine::new(ready_connection(&url).await);

    let page = engine.search_page("a &amp; b").await.unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.results[0].file_name, "a.txt");
    assert_eq!(page.results[0].file_tags, vec!["x", "y"]);
    assert!(page.results[1].file_tags.is_empty());

    let search = stub.seen().pop().unwrap();
    assert_eq!(search.method, Method::POST);
    assert_eq!(search.path, "/documents/_search");
    assert_eq!(search.query.as_deref(), Some("track_total_hits=true"));
    let body = search.body.unwrap();
    assert_eq!(body["query"]["multi_match"]["query"], "a & b");
    assert_eq!(body["size"], 25);
}

#[tokio::test]
async fn unreachable_service_gives_up_with_bounded_policy() {
    // Bind then drop to get a port nothing listens on.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let connection = Connection::default();
    let policy =
        RetryPolicy::immediate().with_max_attempts(NonZeroU32::new(3).unwrap());
    let err = Bootstrap::new(Arc::new(
        HttpService::parse(&format!("http://{addr}")).unwrap(),
    ))
    .with_policy(policy)
    .run(&connection)
    .await
    .unwrap_err();

    assert!(matches!(err, Error::Connection(_)));
    assert!(!connection.is_ready());
}
