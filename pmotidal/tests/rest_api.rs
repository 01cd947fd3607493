use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use mockito::{Matcher, Server, ServerGuard};
use pmotidal::api::Endpoints;
use pmotidal::api_rest::{TidalState, create_router};
use pmotidal::{Credentials, LoginPolicy, SessionStore, SystemClock, TidalApi, TidalClient};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

async fn create_test_router(server: &ServerGuard, dir: &TempDir) -> axum::Router {
    let api = TidalApi::new("client", "secret", "US")
        .unwrap()
        .with_endpoints(Endpoints::local(&server.url()));
    let policy = LoginPolicy {
        max_attempts: 1,
        retry_delay: Duration::ZERO,
        ..LoginPolicy::default()
    };
    let client = TidalClient::new(
        Arc::new(api),
        SessionStore::in_dir(dir.path()),
        Arc::new(SystemClock),
        policy,
    );
    client.initialize().await;
    create_router(TidalState::new(Arc::new(client)))
}

async fn send(router: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_login_redirect() {
    let server = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let router = create_test_router(&server, &dir).await;

    let response = router.oneshot(get("/login")).await.unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(response.headers()[header::LOCATION], "/tidal/login");
}

#[tokio::test]
async fn test_catalog_requires_session() {
    let server = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let router = create_test_router(&server, &dir).await;

    let (status, body) = send(&router, get("/tidal/track/1")).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["login_url"], "/tidal/login");
    assert_eq!(body["error"], "No session, please restart login");
}

#[tokio::test]
async fn test_session_status() {
    let server = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let router = create_test_router(&server, &dir).await;

    let (status, body) = send(&router, get("/tidal/session")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"authenticated": false, "state": "invalid"}));
}

#[tokio::test]
async fn test_search_limit_validation() {
    let server = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let router = create_test_router(&server, &dir).await;

    let (status, _) = send(&router, get("/tidal/search?query=miles&limit=0")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&router, get("/tidal/search?query=miles&limit=101")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_login_flow_endpoints() {
    let mut server = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    server
        .mock("POST", "/auth/device_authorization")
        .with_body(
            json!({
                "deviceCode": "dev-1",
                "userCode": "ABC-123",
                "verificationUri": "link.tidal.com",
                "verificationUriComplete": "link.tidal.com/ABC-123",
                "expiresIn": 300,
                "interval": 2
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;
    server
        .mock("POST", "/auth/token")
        .with_status(400)
        .with_body(r#"{"error":"authorization_pending"}"#)
        .create_async()
        .await;
    let router = create_test_router(&server, &dir).await;

    let (status, body) = send(&router, get("/tidal/login")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["verification_code"], "ABC-123");
    assert_eq!(body["expires_in"], 300);

    // Le second appel réutilise le lien en attente
    let (_, body) = send(&router, get("/tidal/login")).await;
    assert_eq!(body["verification_code"], "ABC-123");
    assert_eq!(body["from_cache"], true);

    let (status, body) = send(
        &router,
        post_json(
            "/tidal/login/verify",
            json!({"verification_url": "link.tidal.com/ABC-123"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "pending");

    let (status, _) = send(&router, get("/tidal/login/verify/ABC-123")).await;
    assert_eq!(status, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_verify_requires_a_value() {
    let server = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let router = create_test_router(&server, &dir).await;

    let (status, _) = send(&router, post_json("/tidal/login/verify", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &router,
        post_json("/tidal/login/verify", json!({"verification_uri": "ABC-123"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn test_logout_and_cache_stats() {
    let server = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let router = create_test_router(&server, &dir).await;

    let request = Request::builder()
        .method("POST")
        .uri("/tidal/logout")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");

    let (status, body) = send(&router, get("/tidal/cache/stats")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"entries": 0, "hits": 0, "misses": 0}));
}

#[tokio::test]
async fn test_library_routes_wrap_results() {
    let mut server = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    SessionStore::in_dir(dir.path()).save(&Credentials::new("good", "refresh", "Bearer"));

    let country = || Matcher::UrlEncoded("countryCode".into(), "US".into());
    server
        .mock("GET", "/api/sessions")
        .match_query(country())
        .with_body(r#"{"userId":42}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/api/pages/my_collection_my_mixes")
        .match_query(country())
        .with_body(
            json!({"rows": [{"modules": [{"pagedList": {"items": [
                {"id": "mix-1", "title": "My Mix 1", "subTitle": "Miles Davis"}
            ]}}]}]})
            .to_string(),
        )
        .create_async()
        .await;
    let router = create_test_router(&server, &dir).await;

    let (status, body) = send(&router, get("/tidal/mixes")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_mixes"], 1);
    assert_eq!(body["mixes"][0]["subtitle"], "Miles Davis");

    let (status, _) = send(&router, get("/tidal/search/artist?title=So%20What&artist=Miles&limit=0")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_library_routes_require_session() {
    let server = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let router = create_test_router(&server, &dir).await;

    for uri in [
        "/tidal/user/playlists",
        "/tidal/mixes",
        "/tidal/mix/mix-1",
        "/tidal/search/artist?title=So%20What&artist=Miles",
        "/tidal/track/1/download-info",
        "/tidal/playlist/p-1/download-info",
    ] {
        let (status, body) = send(&router, get(uri)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{}", uri);
        assert_eq!(body["login_url"], "/tidal/login");
    }
}
