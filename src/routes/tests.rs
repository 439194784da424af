use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Form, Path, Query};
use axum::http::header::{AUTHORIZATION, COOKIE, HOST, LOCATION, SET_COOKIE};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::extract::CookieJar;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower::ServiceExt;

use super::generate::SYNC_KEY_HEADER;
use crate::app::AppState;
use crate::config::default_services;
use crate::drain::MemoryCounterStore;
use crate::oauth::client::AggregatorClient;
use crate::pipes::PipeClient;
use crate::session::{LoadedSession, Profile, Session, SessionStore};
use crate::sync_key::{SyncKeyCodec, SyncParams};

fn query_token(q: &HashMap<String, String>) -> &str {
    q.get("access_token").map(String::as_str).unwrap_or("")
}

/// Aggregation API and pipe API on one local listener.
async fn spawn_upstream() -> String {
    let app = Router::new()
        .route(
            "/oauth/access_token",
            post(|Form(form): Form<HashMap<String, String>>| async move {
                if form.get("client_secret").map(String::as_str) != Some("secret-1") {
                    return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "bad client" })));
                }
                match form.get("code").map(String::as_str) {
                    Some("good") => (StatusCode::OK, Json(json!({ "access_token": "tok-good" }))),
                    Some("numeric") => (
                        StatusCode::OK,
                        Json(json!({ "access_token": "tok-numeric" })),
                    ),
                    Some("noprofile") => (
                        StatusCode::OK,
                        Json(json!({ "access_token": "tok-noprofile" })),
                    ),
                    _ => (
                        StatusCode::UNAUTHORIZED,
                        Json(json!({ "error": "invalid_grant" })),
                    ),
                }
            }),
        )
        .route(
            "/profile",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                match query_token(&q) {
                    "tok-good" => (
                        StatusCode::OK,
                        Json(json!({
                            "id": "user-1",
                            "services": { "facebook": { "id": "fb-1" } }
                        })),
                    ),
                    "tok-numeric" => (
                        StatusCode::OK,
                        Json(json!({ "id": 42, "services": null, "name": "Jo" })),
                    ),
                    _ => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(json!("profile unavailable")),
                    ),
                }
            }),
        )
        .route(
            "/profiles/{service}",
            get(
                |Path(service): Path<String>, Query(q): Query<HashMap<String, String>>| async move {
                    let authed = q.get("auth").map(String::as_str) == Some("true");
                    let body = match (service.as_str(), query_token(&q), authed) {
                        ("facebook", "tok-good", true) => {
                            json!({ "auth": { "accessToken": "fb-delegated" } })
                        }
                        ("facebook", "tok-reject", true) => {
                            json!({ "auth": { "accessToken": "fb-stale" } })
                        }
                        _ => json!({ "error": "service not linked" }),
                    };
                    Json(body)
                },
            ),
        )
        .route(
            "/applications/{key}/pipes",
            post(
                |Path(key): Path<String>, headers: HeaderMap, Json(body): Json<Value>| async move {
                    let basic = headers
                        .get(AUTHORIZATION)
                        .and_then(|v| v.to_str().ok())
                        .is_some_and(|v| v.starts_with("Basic "));
                    if key == "app-key" && basic && body["auth"]["token"] == "fb-delegated" {
                        (
                            StatusCode::CREATED,
                            Json(json!({
                                "id": "pipe-1",
                                "identifier": body["identifier"],
                                "target_url": body["target_url"],
                            })),
                        )
                            .into_response()
                    } else {
                        (StatusCode::CONFLICT, "pipe rejected").into_response()
                    }
                },
            ),
        );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn test_state(upstream: &str) -> AppState {
    let http = reqwest::Client::new();
    AppState {
        aggregator: AggregatorClient::new(http.clone(), upstream, "client-1", "secret-1"),
        pipes: PipeClient::new(http, upstream, "app-key", "app-secret"),
        sessions: SessionStore::new(b"session-secret").unwrap(),
        sync_keys: SyncKeyCodec::new(&[7u8; 32]),
        counters: Arc::new(MemoryCounterStore::new()),
        services: Arc::new(default_services()),
        delegated_service: "facebook".to_string(),
        public_url: None,
    }
}

async fn setup() -> (AppState, Router) {
    let upstream = spawn_upstream().await;
    let state = test_state(&upstream);
    (state.clone(), super::router(state))
}

fn get_req(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("GET")
        .uri(uri)
        .header(HOST, "relay.test");
    if let Some(cookie) = cookie {
        builder = builder.header(COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn read_text(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn read_json(response: Response) -> Value {
    serde_json::from_str(&read_text(response).await).unwrap()
}

/// `name=value` part of the response's session cookie.
fn session_cookie(response: &Response) -> Option<String> {
    let header = response.headers().get(SET_COOKIE)?.to_str().ok()?;
    header.split(';').next().map(str::to_string)
}

fn jar_for(cookie: &str) -> CookieJar {
    let mut headers = HeaderMap::new();
    headers.insert(COOKIE, cookie.parse().unwrap());
    CookieJar::from_headers(&headers)
}

/// Store `session` directly and return the cookie naming it.
fn seed_session(state: &AppState, session: Session) -> String {
    let mut loaded = LoadedSession::default();
    loaded.session = session;
    let jar = state.sessions.save(CookieJar::new(), &mut loaded);
    let cookie = jar.get(crate::session::SESSION_COOKIE).unwrap();
    format!("{}={}", cookie.name(), cookie.value())
}

/// Drain increments land asynchronously; poll until `expected` shows up.
async fn wait_for_total(app: &Router, id: &str, expected: Value) -> Value {
    let mut last = Value::Null;
    for _ in 0..100 {
        let response = app
            .clone()
            .oneshot(get_req(&format!("/drain/{id}"), None))
            .await
            .unwrap();
        last = read_json(response).await["total"].clone();
        if last == expected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    last
}

#[tokio::test]
async fn test_drain_accumulates_array_batches() {
    let (_, app) = setup().await;

    let response = app
        .clone()
        .oneshot(post_json("/drain/42", r#"[{"id":1},{"id":2},{"id":3}]"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(wait_for_total(&app, "42", json!(3)).await, json!(3));

    let response = app
        .clone()
        .oneshot(post_json("/drain/42", r#"[{"id":4},{"id":5}]"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(wait_for_total(&app, "42", json!(5)).await, json!(5));
}

#[tokio::test]
async fn test_drain_ignores_non_array_payloads() {
    let (state, app) = setup().await;

    for body in [r#"{"id":1}"#, "", "garbage"] {
        let response = app.clone().oneshot(post_json("/drain/42", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    let response = app.clone().oneshot(get_req("/drain/42", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await, json!({ "total": null }));
    assert_eq!(state.counters.get("42").await.unwrap(), None);
}

#[tokio::test]
async fn test_drain_counters_are_per_identifier() {
    let (_, app) = setup().await;
    app.clone().oneshot(post_json("/drain/a", "[1,2]")).await.unwrap();
    app.clone().oneshot(post_json("/drain/b", "[1]")).await.unwrap();
    assert_eq!(wait_for_total(&app, "a", json!(2)).await, json!(2));
    assert_eq!(wait_for_total(&app, "b", json!(1)).await, json!(1));
}

#[tokio::test]
async fn test_generate_without_token() {
    let (_, app) = setup().await;
    let response = app.oneshot(get_req("/generate", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(read_json(response).await, json!({ "err": "missing token" }));
}

#[tokio::test]
async fn test_full_link_and_provision_flow() {
    let (state, app) = setup().await;

    let response = app
        .clone()
        .oneshot(get_req("/callback?code=good", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers().get(LOCATION).unwrap(), "/");
    let cookie = session_cookie(&response).unwrap();

    let session = state.sessions.load(&jar_for(&cookie)).session;
    assert_eq!(session.access_token.as_deref(), Some("tok-good"));
    assert_eq!(session.profile.unwrap().id().as_deref(), Some("user-1"));

    let response = app
        .clone()
        .oneshot(get_req("/", Some(&cookie)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let html = read_text(response).await;
    assert!(html.contains(r#"<span class="check">&#10003;</span> Facebook"#));
    assert!(html.contains("user-1"));
    assert!(html.contains("service=github"));
    assert!(html.contains("scope=repo"));
    assert!(html.contains("access_token=tok-good"));

    let response = app
        .clone()
        .oneshot(get_req("/generate", Some(&cookie)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let sync_key = response
        .headers()
        .get(SYNC_KEY_HEADER)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let body = read_json(response).await;
    assert_eq!(body["id"], "pipe-1");
    let identifier = body["identifier"].as_str().unwrap().to_string();
    assert_eq!(
        body["target_url"],
        format!("http://relay.test/drain/{identifier}")
    );

    let params: SyncParams = state.sync_keys.decode(&sync_key).unwrap();
    assert_eq!(params["identifier"], identifier);
    assert_eq!(params["service"], "facebook");

    let response = app
        .clone()
        .oneshot(get_req(&format!("/sync?key={sync_key}"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    app.clone()
        .oneshot(post_json(&format!("/drain/{identifier}"), "[1,2,3,4]"))
        .await
        .unwrap();
    assert_eq!(wait_for_total(&app, &identifier, json!(4)).await, json!(4));
}

#[tokio::test]
async fn test_callback_accepts_numeric_id_and_null_services() {
    let (state, app) = setup().await;

    let response = app
        .clone()
        .oneshot(get_req("/callback?code=numeric", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers().get(LOCATION).unwrap(), "/");
    let cookie = session_cookie(&response).unwrap();

    let profile = state
        .sessions
        .load(&jar_for(&cookie))
        .session
        .profile
        .unwrap();
    assert_eq!(profile.id().as_deref(), Some("42"));
    assert!(profile.services.is_empty());
    assert_eq!(profile.extra["name"], "Jo");

    // Known identity, so new links merge into it.
    let html = read_text(app.oneshot(get_req("/", Some(&cookie))).await.unwrap()).await;
    assert!(html.contains("access_token=tok-numeric"));
    assert!(html.contains("42"));
}

#[tokio::test]
async fn test_callback_profile_failure_keeps_token_but_not_profile() {
    let (state, app) = setup().await;

    let response = app
        .clone()
        .oneshot(get_req("/callback?code=noprofile", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let cookie = session_cookie(&response).unwrap();
    assert!(read_text(response).await.contains("profile unavailable"));

    let session = state.sessions.load(&jar_for(&cookie)).session;
    assert_eq!(session.access_token.as_deref(), Some("tok-noprofile"));
    assert!(session.profile.is_none());
}

#[tokio::test]
async fn test_callback_rejected_code_touches_nothing() {
    let (_, app) = setup().await;

    let response = app
        .clone()
        .oneshot(get_req("/callback?code=invalid", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.headers().get(SET_COOKIE).is_none());
    assert!(read_text(response).await.contains("invalid_grant"));

    let response = app.oneshot(get_req("/callback", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.headers().get(SET_COOKIE).is_none());
}

#[tokio::test]
async fn test_callback_failure_keeps_existing_profile() {
    let (state, app) = setup().await;
    let existing = Profile {
        id: Some(Value::from("old-user")),
        ..Profile::default()
    };
    let cookie = seed_session(
        &state,
        Session {
            access_token: Some("old".to_string()),
            profile: Some(existing.clone()),
        },
    );

    let response = app
        .oneshot(get_req("/callback?code=noprofile", Some(&cookie)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let session = state.sessions.load(&jar_for(&cookie)).session;
    assert_eq!(session.access_token.as_deref(), Some("tok-noprofile"));
    assert_eq!(session.profile, Some(existing));
}

#[tokio::test]
async fn test_index_anonymous_links() {
    let (_, app) = setup().await;
    let response = app.oneshot(get_req("/", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let html = read_text(response).await;
    assert!(html.contains("account=false"));
    assert!(html.contains("redirect_uri=http%3A%2F%2Frelay.test%2Fcallback"));
    assert!(!html.contains("access_token="));
    assert!(!html.contains("&#10003;"));
    assert!(!html.contains("/generate"));
}

#[tokio::test]
async fn test_index_requires_client_credentials() {
    let upstream = spawn_upstream().await;
    let mut state = test_state(&upstream);
    state.aggregator = AggregatorClient::new(reqwest::Client::new(), &upstream, "", "");

    let response = super::router(state)
        .oneshot(get_req("/", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(read_text(response).await.contains("client_id"));
}

#[tokio::test]
async fn test_index_uses_public_url_when_configured() {
    let upstream = spawn_upstream().await;
    let mut state = test_state(&upstream);
    state.public_url = Some("https://relay.example.com".to_string());

    let html = read_text(
        super::router(state)
            .oneshot(get_req("/", None))
            .await
            .unwrap(),
    )
    .await;
    assert!(html.contains("redirect_uri=https%3A%2F%2Frelay.example.com%2Fcallback"));
}

#[tokio::test]
async fn test_generate_delegation_failure() {
    let (state, app) = setup().await;
    let cookie = seed_session(
        &state,
        Session {
            access_token: Some("tok-unlinked".to_string()),
            profile: None,
        },
    );

    let response = app
        .oneshot(get_req("/generate", Some(&cookie)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = read_json(response).await;
    assert_eq!(body["err"], "couldn't get facebook token");
    assert_eq!(body["body"]["error"], "service not linked");
}

#[tokio::test]
async fn test_generate_provisioning_rejected() {
    let (state, app) = setup().await;
    let cookie = seed_session(
        &state,
        Session {
            access_token: Some("tok-reject".to_string()),
            profile: None,
        },
    );

    let response = app
        .oneshot(get_req("/generate", Some(&cookie)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.headers().get(SYNC_KEY_HEADER).is_none());
    assert_eq!(read_json(response).await, json!({ "err": "409 pipe rejected" }));
}

#[tokio::test]
async fn test_generate_without_pipe_credentials_is_json() {
    let upstream = spawn_upstream().await;
    let mut state = test_state(&upstream);
    state.pipes = PipeClient::new(reqwest::Client::new(), &upstream, "", "");
    let cookie = seed_session(
        &state,
        Session {
            access_token: Some("tok-good".to_string()),
            profile: None,
        },
    );

    let response = super::router(state)
        .oneshot(get_req("/generate", Some(&cookie)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        read_json(response).await,
        json!({ "err": "missing pipes app_key and app_secret settings" })
    );
}

#[tokio::test]
async fn test_sync_key_validation() {
    let (state, app) = setup().await;

    let response = app.clone().oneshot(get_req("/sync", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(read_text(response).await, "missing sync key");

    let response = app
        .clone()
        .oneshot(get_req("/sync?key=bogus", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(read_text(response).await, "invalid sync key");

    let foreign = SyncKeyCodec::new(&[9u8; 32])
        .encode(&SyncParams::from([("identifier".to_string(), "x".to_string())]))
        .unwrap();
    let response = app
        .clone()
        .oneshot(get_req(&format!("/sync?key={foreign}"), None))
        .await
        .unwrap();
    assert_eq!(read_text(response).await, "invalid sync key");

    let own = state.sync_keys.encode(&SyncParams::new()).unwrap();
    let response = app
        .oneshot(get_req(&format!("/sync?key={own}"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}
