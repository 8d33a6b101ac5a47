mod common;

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use common::*;
use httpmock::prelude::*;
use parking_lot::Mutex;
use reqwest::{Method, Url};
use serde_json::json;
use spotiauth::{
    auth::{AuthorizationCode, StaticToken, TokenProvider},
    cache::MemoryCache,
    config::Endpoints,
    client::{RequestHook, RetryPolicy, RetryReason, SpotifyClient},
    model::Page,
    token::{CacheRecord, Token},
    Error, Scope, ScopeSet,
};

fn static_token(access_token: &str) -> StaticToken {
    StaticToken::new(Token::expiring_in(access_token, ScopeSet::new(), 3600))
}

fn client_with<P>(server: &MockServer, provider: P, retry_policy: RetryPolicy) -> SpotifyClient
where
    P: TokenProvider + 'static,
{
    SpotifyClient::builder(provider)
        .endpoints(&endpoints(server))
        .retry_policy(retry_policy)
        .build()
        .expect("Client should build.")
}

fn fast_retries(max_retries: u32) -> RetryPolicy {
    RetryPolicy::default()
        .max_retries(max_retries)
        .backoff_factor(Duration::from_millis(10))
}

/// Hands out "first" on the first call and "rest" on every call after it.
struct RotatingToken {
    calls: AtomicUsize,
}

impl TokenProvider for RotatingToken {
    fn get_token(&self) -> spotiauth::Result<Token> {
        let access_token = match self.calls.fetch_add(1, Ordering::SeqCst) {
            0 => "first",
            _ => "rest",
        };

        Ok(Token::expiring_in(access_token, ScopeSet::new(), 3600))
    }
}

#[derive(Clone, Default)]
struct RecordingHook {
    retries: Arc<Mutex<Vec<(RetryReason, Duration)>>>,
    requests: Arc<AtomicUsize>,
}

impl RequestHook for RecordingHook {
    fn on_request(&self, _method: &Method, _url: &Url, _attempt: u32) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }

    fn on_retry(&self, _method: &Method, _url: &Url, reason: &RetryReason, delay: Duration) {
        self.retries.lock().push((reason.clone(), delay));
    }
}

#[test]
fn bearer_token_is_attached_to_relative_paths() {
    init_logging();

    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/v1/me")
            .query_param("market", "FI")
            .header("authorization", "Bearer access-1");
        then.status(200).json_body(json!({"id": "someone"}));
    });

    let client = client_with(&server, static_token("access-1"), RetryPolicy::default());
    let body = client.get("/me", &[("market", "FI")]).unwrap();

    mock.assert();
    assert_eq!(body, Some(json!({"id": "someone"})));
}

#[test]
fn retry_after_is_waited_before_retrying() {
    init_logging();

    let server = MockServer::start();
    let limited = server.mock(|when, then| {
        when.method(GET).path("/v1/me/player").header("authorization", "Bearer first");
        then.status(429).header("retry-after", "2");
    });
    let ok = server.mock(|when, then| {
        when.method(GET).path("/v1/me/player").header("authorization", "Bearer rest");
        then.status(200).json_body(json!({"is_playing": true}));
    });

    let client = client_with(
        &server,
        RotatingToken {
            calls: AtomicUsize::new(0),
        },
        RetryPolicy::default(),
    );

    let started = Instant::now();
    let body = client.get("me/player", &[]).expect("Retry should succeed.");

    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(body.unwrap()["is_playing"], true);
    limited.assert_calls(1);
    ok.assert_calls(1);
}

#[test]
fn rate_limit_retries_stop_at_the_budget() {
    init_logging();

    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/v1/me/player");
        then.status(429)
            .header("retry-after", "0")
            .json_body(json!({"error": {"status": 429, "message": "API rate limit exceeded"}}));
    });

    let hook = RecordingHook::default();
    let client = SpotifyClient::builder(static_token("access"))
        .endpoints(&endpoints(&server))
        .retry_policy(fast_retries(2))
        .hook(hook.clone())
        .build()
        .unwrap();

    let err = client.get("me/player", &[]).unwrap_err();

    mock.assert_calls(3);
    assert_eq!(hook.requests.load(Ordering::SeqCst), 3);
    assert_eq!(hook.retries.lock().len(), 2);
    assert_eq!(
        hook.retries.lock()[0],
        (RetryReason::RateLimited { retry_after: Some(0) }, Duration::ZERO)
    );

    match err {
        Error::Api(api_error) => {
            assert!(api_error.is_rate_limit());
            assert_eq!(api_error.retry_after, Some(0));
            assert_eq!(api_error.attempts, 3);
            assert_eq!(api_error.message, "API rate limit exceeded");
        }

        err => panic!("Expected an API error, got {:?}", err),
    }
}

#[test]
fn zero_budget_raises_the_first_rate_limit_immediately() {
    init_logging();

    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/v1/me/player");
        then.status(429).header("retry-after", "30");
    });

    let client = client_with(&server, static_token("access"), RetryPolicy::none());

    let started = Instant::now();
    let err = client.get("me/player", &[]).unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(err.status(), Some(429));
    mock.assert_calls(1);
}

#[test]
fn server_errors_are_retried_with_the_same_budget() {
    init_logging();

    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/v1/browse/categories");
        then.status(503).body("upstream unavailable");
    });

    let hook = RecordingHook::default();
    let client = SpotifyClient::builder(static_token("access"))
        .endpoints(&endpoints(&server))
        .retry_policy(fast_retries(2))
        .hook(hook.clone())
        .build()
        .unwrap();

    let err = client.get("browse/categories", &[]).unwrap_err();

    mock.assert_calls(3);
    assert_eq!(
        *hook.retries.lock(),
        vec![
            (RetryReason::Status(503), Duration::from_millis(10)),
            (RetryReason::Status(503), Duration::from_millis(20)),
        ]
    );

    match err {
        Error::Api(api_error) => {
            assert_eq!(api_error.status, 503);
            assert_eq!(api_error.message, "upstream unavailable");
            assert_eq!(api_error.code, None);
        }

        err => panic!("Expected an API error, got {:?}", err),
    }
}

#[test]
fn every_server_error_is_retried() {
    init_logging();

    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/v1/me");
        then.status(501).body("not implemented");
    });

    let client = client_with(&server, static_token("access"), fast_retries(3));
    let err = client.get("me", &[]).unwrap_err();

    mock.assert_calls(4);
    assert_eq!(err.status(), Some(501));
    assert_eq!(err.attempts(), Some(4));
}

#[test]
fn explicit_retryable_statuses_replace_the_default() {
    init_logging();

    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/v1/me");
        then.status(501);
    });

    let client = client_with(&server, static_token("access"), fast_retries(3).retryable_statuses([429, 503]));

    assert_eq!(client.get("me", &[]).unwrap_err().status(), Some(501));
    mock.assert_calls(1);
}

#[test]
fn client_errors_are_raised_without_retrying() {
    init_logging();

    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(PUT).path("/v1/me/player/play");
        then.status(404).json_body(json!({
            "error": {"status": 404, "message": "Player command failed: No active device found", "reason": "NO_ACTIVE_DEVICE"}
        }));
    });

    let client = client_with(&server, static_token("access"), fast_retries(3));
    let err = client.put("me/player/play", &[], None).unwrap_err();

    mock.assert_calls(1);
    match err {
        Error::Api(api_error) => {
            assert_eq!(api_error.status, 404);
            assert_eq!(api_error.code.as_deref(), Some("NO_ACTIVE_DEVICE"));
            assert_eq!(api_error.message, "Player command failed: No active device found");
            assert_eq!(api_error.attempts, 1);
            assert!(api_error.url.ends_with("/v1/me/player/play"));
        }

        err => panic!("Expected an API error, got {:?}", err),
    }
}

#[test]
fn empty_responses_are_none() {
    init_logging();

    let server = MockServer::start();
    let no_content = server.mock(|when, then| {
        when.method(PUT)
            .path("/v1/me/player/pause")
            .header("content-length", "0");
        then.status(204);
    });
    let empty_ok = server.mock(|when, then| {
        when.method(POST).path("/v1/me/player/next");
        then.status(200);
    });

    let client = client_with(&server, static_token("access"), RetryPolicy::none());

    assert_eq!(client.put("me/player/pause", &[], None).unwrap(), None);
    assert_eq!(client.post("me/player/next", &[], None).unwrap(), None);
    no_content.assert();
    empty_ok.assert();
}

#[test]
fn payload_is_sent_as_json() {
    init_logging();

    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/users/someone/playlists")
            .header("content-type", "application/json")
            .json_body(json!({"name": "New playlist", "public": false}));
        then.status(201).json_body(json!({"id": "playlist-1"}));
    });

    let client = client_with(&server, static_token("access"), RetryPolicy::none());
    let payload = json!({"name": "New playlist", "public": false});
    let body = client.post("users/someone/playlists", &[], Some(&payload)).unwrap();

    mock.assert();
    assert_eq!(body.unwrap()["id"], "playlist-1");
}

#[test]
fn non_json_success_body_is_malformed() {
    init_logging();

    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/v1/me");
        then.status(200).body("<html>not json</html>");
    });

    let client = client_with(&server, static_token("access"), RetryPolicy::none());

    assert!(matches!(client.get("me", &[]), Err(Error::MalformedResponse(_))));
}

#[test]
fn accept_language_is_sent() {
    init_logging();

    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/v1/browse/categories").header("accept-language", "fi");
        then.status(200).json_body(json!({}));
    });

    let client = SpotifyClient::builder(static_token("access"))
        .endpoints(&endpoints(&server))
        .language("fi")
        .build()
        .unwrap();

    client.get("browse/categories", &[]).unwrap();
    mock.assert();
}

#[test]
fn deadline_stops_retrying() {
    init_logging();

    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/v1/me");
        then.status(429).header("retry-after", "5");
    });

    let client = SpotifyClient::builder(static_token("access"))
        .endpoints(&endpoints(&server))
        .deadline(Duration::from_secs(1))
        .build()
        .unwrap();

    let started = Instant::now();
    let err = client.get("me", &[]).unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(err.status(), Some(429));
    mock.assert_calls(1);
}

#[test]
fn expired_access_token_is_refreshed_once_and_retried() {
    init_logging();

    let server = MockServer::start();
    let stale = server.mock(|when, then| {
        when.method(GET).path("/v1/me").header("authorization", "Bearer revoked-early");
        then.status(401)
            .json_body(json!({"error": {"status": 401, "message": "The access token expired"}}));
    });
    let fresh = server.mock(|when, then| {
        when.method(GET).path("/v1/me").header("authorization", "Bearer refreshed");
        then.status(200).json_body(json!({"id": "someone"}));
    });
    let refresh = server.mock(|when, then| {
        when.method(POST)
            .path("/api/token")
            .form_urlencoded_tuple("grant_type", "refresh_token")
            .form_urlencoded_tuple("refresh_token", "refresh-1");
        then.status(200).json_body(token_body("refreshed", None));
    });

    // the cached token looks fresh but the server already considers it expired
    let scope = ScopeSet::from([Scope::UserReadPrivate, Scope::UserReadEmail]);
    let token = Token::expiring_in("revoked-early", scope, 3600).with_refresh_token(Some("refresh-1"));
    let authority = build_authority(
        &server,
        credentials(),
        MemoryCache::with_record(CacheRecord::from(&token)),
        AuthorizationCode::new(),
    );

    let client = client_with(&server, authority, RetryPolicy::none());
    let body = client.get("me", &[]).expect("Call should succeed after refreshing.");

    assert_eq!(body.unwrap()["id"], "someone");
    stale.assert_calls(1);
    refresh.assert_calls(1);
    fresh.assert_calls(1);
}

#[test]
fn expired_static_token_cannot_be_recovered() {
    init_logging();

    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/v1/me");
        then.status(401)
            .json_body(json!({"error": {"status": 401, "message": "The access token expired"}}));
    });

    let client = client_with(&server, static_token("access"), fast_retries(3));

    assert!(matches!(client.get("me", &[]), Err(Error::AccessTokenExpired)));
    mock.assert_calls(1);
}

#[test]
fn pages_are_followed_through_their_links() {
    init_logging();

    let server = MockServer::start();
    let second_url = server.url("/v1/me/tracks?offset=2&limit=2");
    let second = server.mock(|when, then| {
        when.method(GET)
            .path("/v1/me/tracks")
            .query_param("offset", "2")
            .query_param("limit", "2")
            .header("authorization", "Bearer access");
        then.status(200).json_body(json!({
            "href": server.url("/v1/me/tracks?offset=2&limit=2"),
            "items": [3],
            "limit": 2,
            "offset": 2,
            "total": 3,
            "next": null,
            "previous": server.url("/v1/me/tracks?offset=0&limit=2"),
        }));
    });

    let client = client_with(&server, static_token("access"), RetryPolicy::none());
    let first: Page<u32> = serde_json::from_value(json!({
        "href": server.url("/v1/me/tracks?offset=0&limit=2"),
        "items": [1, 2],
        "limit": 2,
        "offset": 0,
        "total": 3,
        "next": second_url,
        "previous": null,
    }))
    .unwrap();

    assert!(first.previous_page(&client).unwrap().is_none());
    second.assert_calls(0);

    let next = first.next_page(&client).unwrap().expect("There should be a second page.");
    second.assert_calls(1);
    assert_eq!(next.items(), &[3]);

    // the last page has no next link, so nothing is requested
    assert!(next.next_page(&client).unwrap().is_none());
    second.assert_calls(1);

    let items: Vec<u32> = first
        .pages(&client)
        .flat_map(|page| page.unwrap().take_items())
        .collect();
    assert_eq!(items, vec![1, 2, 3]);
    second.assert_calls(2);
}

#[test]
fn untyped_pages_follow_next_verbatim() {
    init_logging();

    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/v1/search").query_param("offset", "20");
        then.status(200).json_body(json!({"items": [], "next": null}));
    });

    let client = client_with(&server, static_token("access"), RetryPolicy::none());
    let page = json!({"items": [], "next": server.url("/v1/search?q=abba&type=track&offset=20")});

    let next = client.next(&page).unwrap().expect("Next page should be fetched.");
    mock.assert_calls(1);

    assert!(client.next(&next).unwrap().is_none());
    assert!(client.previous(&next).unwrap().is_none());
    mock.assert_calls(1);
}

fn unreachable_client(retry_policy: RetryPolicy, hook: RecordingHook) -> SpotifyClient {
    let endpoints = Endpoints::with_base_url(&format!("http://127.0.0.1:{}", free_port())).unwrap();

    SpotifyClient::builder(static_token("access"))
        .endpoints(&endpoints)
        .retry_policy(retry_policy)
        .hook(hook)
        .build()
        .unwrap()
}

#[test]
fn connection_failures_are_retried_with_the_same_budget() {
    init_logging();

    let hook = RecordingHook::default();
    let client = unreachable_client(fast_retries(2), hook.clone());

    let err = client.get("me", &[]).unwrap_err();

    assert_eq!(hook.requests.load(Ordering::SeqCst), 3);
    let retries = hook.retries.lock();
    assert_eq!(retries.len(), 2);
    assert!(retries
        .iter()
        .all(|(reason, _)| matches!(reason, RetryReason::Transport(_))));
    assert_eq!(retries[1].1, Duration::from_millis(20));

    match err {
        Error::Transport { attempts, url, .. } => {
            assert_eq!(attempts, 3);
            assert!(url.ends_with("/v1/me"));
        }

        err => panic!("Expected a transport error, got {:?}", err),
    }
}

#[test]
fn zero_budget_raises_the_first_connection_failure() {
    init_logging();

    let hook = RecordingHook::default();
    let client = unreachable_client(RetryPolicy::none(), hook.clone());

    let err = client.get("me", &[]).unwrap_err();

    assert!(matches!(err, Error::Transport { attempts: 1, .. }));
    assert_eq!(err.attempts(), Some(1));
    assert_eq!(hook.requests.load(Ordering::SeqCst), 1);
    assert!(hook.retries.lock().is_empty());
}
