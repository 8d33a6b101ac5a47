#![allow(dead_code)]

use std::{
    net::TcpListener,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use httpmock::MockServer;
use reqwest::Url;
use serde_json::{json, Value};
use spotiauth::{
    auth::{Grant, TokenAuthority},
    cache::CacheHandler,
    config::{Credentials, Endpoints},
    Result, Scope,
};

pub const CLIENT_ID: &str = "client-it";
pub const CLIENT_SECRET: &str = "secret-it";
pub const REDIRECT_URI: &str = "http://127.0.0.1:8888/callback";

// base64("client-it:secret-it")
pub const BASIC_AUTHORIZATION: &str = "Basic Y2xpZW50LWl0OnNlY3JldC1pdA==";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn endpoints(server: &MockServer) -> Endpoints {
    Endpoints::with_base_url(&server.base_url()).expect("Mock server base URL should be valid.")
}

pub fn credentials() -> Credentials {
    Credentials::new(CLIENT_ID)
        .client_secret(CLIENT_SECRET)
        .redirect_uri(REDIRECT_URI)
}

pub fn build_authority<G, C>(server: &MockServer, credentials: Credentials, cache: C, grant: G) -> TokenAuthority<G>
where
    G: Grant,
    C: CacheHandler + 'static,
{
    TokenAuthority::builder(credentials)
        .scopes([Scope::UserReadPrivate, Scope::UserReadEmail])
        .endpoints(endpoints(server))
        .cache(cache)
        .build(grant)
        .expect("Token authority should build.")
}

pub fn token_body(access_token: &str, refresh_token: Option<&str>) -> Value {
    let mut body = json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": 3600,
        "scope": "user-read-email user-read-private",
    });

    if let Some(refresh_token) = refresh_token {
        body["refresh_token"] = json!(refresh_token);
    }

    body
}

/// Reads the state from an authorize URL.
pub fn state_of(authorize_url: &Url) -> String {
    authorize_url
        .query_pairs()
        .find(|(key, _)| key == "state")
        .map(|(_, value)| value.into_owned())
        .expect("Authorize URL should carry a state.")
}

/// A prompt that "authorizes" immediately, redirecting back with the given code and the original state. Counts how
/// many times it was used.
pub fn code_prompt(code: &'static str, uses: Arc<AtomicUsize>) -> impl Fn(&Url) -> Result<String> + Send + Sync {
    move |authorize_url: &Url| -> Result<String> {
        uses.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{}?code={}&state={}", REDIRECT_URI, code, state_of(authorize_url)))
    }
}

/// A port nothing listens on at the moment.
pub fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .expect("Binding an ephemeral port should succeed.")
}
