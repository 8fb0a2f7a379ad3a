//! Link client tests against an in-process HTTP server.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};
use sessionlink::{LinkClient, LinkError, SessionLinker};

const LINK_PATH: &str = "/api/socket/session/link";

async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn client(addr: SocketAddr) -> LinkClient {
    LinkClient::new(format!("http://{addr}{LINK_PATH}"), Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_link_returns_session_index() {
    let received = Arc::new(Mutex::new(Vec::<Value>::new()));
    let sink = received.clone();
    let router = Router::new().route(
        LINK_PATH,
        post(move |Json(body): Json<Value>| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(body);
                Json(json!({ "socketIndex": 4 }))
            }
        }),
    );
    let addr = serve(router).await;

    let index = client(addr).link("sock-abc").await.unwrap();
    assert_eq!(index, 4);
    assert_eq!(
        *received.lock().unwrap(),
        vec![json!({ "socketId": "sock-abc" })]
    );
}

#[tokio::test]
async fn test_link_through_trait_object() {
    let router = Router::new().route(
        LINK_PATH,
        post(|| async { Json(json!({ "socketIndex": 0 })) }),
    );
    let addr = serve(router).await;

    let linker: Arc<dyn SessionLinker> = Arc::new(client(addr));
    assert_eq!(linker.link("sock-a").await.unwrap(), 0);
}

#[tokio::test]
async fn test_server_error_status() {
    let router = Router::new().route(
        LINK_PATH,
        post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "no session for this client") }),
    );
    let addr = serve(router).await;

    match client(addr).link("sock-a").await {
        Err(LinkError::Status { status, body }) => {
            assert_eq!(status, 503);
            assert_eq!(body, "no session for this client");
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_long_error_body_is_truncated() {
    let router = Router::new().route(
        LINK_PATH,
        post(|| async { (StatusCode::BAD_REQUEST, "é".repeat(400)) }),
    );
    let addr = serve(router).await;

    match client(addr).link("sock-a").await {
        Err(LinkError::Status { status, body }) => {
            assert_eq!(status, 400);
            assert!(body.len() <= 512);
            assert!(body.chars().all(|c| c == 'é'));
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_index_is_invalid_response() {
    let router = Router::new().route(LINK_PATH, post(|| async { Json(json!({ "ok": true })) }));
    let addr = serve(router).await;

    let err = client(addr).link("sock-a").await.unwrap_err();
    assert!(matches!(err, LinkError::InvalidResponse(_)), "{err:?}");
}

#[tokio::test]
async fn test_unreachable_server_is_request_failure() {
    // Bind then drop to get a port nothing listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client(addr).link("sock-a").await.unwrap_err();
    assert!(matches!(err, LinkError::RequestFailed(_)), "{err:?}");
}
