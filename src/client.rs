//! The [SpotifyClient] sends authorized requests to the Web API.
//!
//! The client asks its [TokenProvider] for a token before every attempt and attaches it as a bearer credential. It
//! retries rate-limited (429) and failed server (5xx) responses as well as timed out and failed connections according
//! to its [RetryPolicy], and raises every other non-2xx response immediately as an [ApiError].
//!
//! # Usage
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use spotiauth::{auth::{ClientCredentials, TokenAuthority}, client::SpotifyClient, config::Credentials};
//! # fn foo() -> spotiauth::Result<()> {
//! let authority = TokenAuthority::builder(
//!     Credentials::new("application client ID").client_secret("application client secret"),
//! )
//! .build(ClientCredentials::new())?;
//!
//! let client = SpotifyClient::builder(authority).build()?;
//! let track = client.get("tracks/2pDPOMX0kWA7kcPBcDCQBu", &[("market", "FI")])?;
//! # Ok(())
//! # }
//! ```

pub mod hook;
pub mod retry;

pub use self::{
    hook::RequestHook,
    retry::{RetryPolicy, RetryReason},
};

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use log::{debug, info, trace, warn};
use reqwest::{
    blocking::{Client as BlockingClient, Response},
    header::{self, HeaderMap, HeaderValue},
    Method, StatusCode, Url,
};
use serde_json::Value;

use crate::{
    auth::{TokenProvider, DEFAULT_REQUESTS_TIMEOUT},
    config::{parse_url, Endpoints},
    error::{Error, Result},
    model::error::{is_token_expired_body, ApiError},
    token::Token,
};

/// Client for the Web API. See the [module-level documentation](self).
///
/// This client uses `Arc` internally, so you do not need to wrap it in an `Arc` in order to reuse it.
#[derive(Clone)]
pub struct SpotifyClient {
    inner: Arc<SpotifyClientRef>,
}

struct SpotifyClientRef {
    token_provider: Arc<dyn TokenProvider>,
    http_client: BlockingClient,
    api_base: Url,
    retry_policy: RetryPolicy,
    deadline: Option<Duration>,
    hook: Option<Arc<dyn RequestHook>>,
}

/// Builder for [SpotifyClient].
pub struct SpotifyClientBuilder {
    token_provider: Arc<dyn TokenProvider>,
    api_base: Option<Url>,
    retry_policy: RetryPolicy,
    requests_timeout: Duration,
    deadline: Option<Duration>,
    hook: Option<Arc<dyn RequestHook>>,
    language: Option<String>,
}

impl SpotifyClient {
    pub fn builder<P>(token_provider: P) -> SpotifyClientBuilder
    where
        P: TokenProvider + 'static,
    {
        SpotifyClientBuilder {
            token_provider: Arc::new(token_provider),
            api_base: None,
            retry_policy: RetryPolicy::default(),
            requests_timeout: DEFAULT_REQUESTS_TIMEOUT,
            deadline: None,
            hook: None,
            language: None,
        }
    }

    pub fn token_provider(&self) -> &Arc<dyn TokenProvider> {
        &self.inner.token_provider
    }

    pub fn api_base_url(&self) -> &Url {
        &self.inner.api_base
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.inner.retry_policy
    }

    /// Sends a request and returns its JSON body, or `None` if the response has no content.
    ///
    /// `path` is either relative to the API base URL or an absolute `http(s)` URL, which is used verbatim. The query
    /// parameters are appended to the URL. A payload is sent as a JSON body.
    pub fn call(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, &str)],
        payload: Option<&Value>,
    ) -> Result<Option<Value>> {
        let url = self.resolve_url(path, params)?;
        let policy = &self.inner.retry_policy;
        let started = Instant::now();

        let mut attempts = 0;
        let mut retries = 0;
        let mut refreshed_stale_token = false;
        let mut replacement_token: Option<Token> = None;

        loop {
            let token = match replacement_token.take() {
                Some(token) => token,
                None => self.inner.token_provider.get_token()?,
            };

            attempts += 1;
            let response = match self.send(&method, &url, &token, payload, attempts) {
                Ok(response) => response,

                Err(err) if is_transient(&err) && retries < policy.max_retries => {
                    let delay = policy.backoff(retries + 1);
                    let reason = RetryReason::Transport(err.to_string());

                    if !self.wait_for_retry(&method, &url, &reason, delay, started) {
                        return Err(transport_error(&url, attempts, err));
                    }

                    retries += 1;
                    continue;
                }

                Err(err) => return Err(transport_error(&url, attempts, err)),
            };

            let status = response.status();
            if status.is_success() {
                return read_json_body(response);
            }

            let retry_after = parse_retry_after(response.headers());
            let body = response.text()?;
            debug!("{} {} failed with {}: {}", method, url, status, body);

            if status == StatusCode::UNAUTHORIZED && !refreshed_stale_token && is_token_expired_body(&body) {
                warn!("Access token expired, attempting to refresh");
                refreshed_stale_token = true;

                match self.inner.token_provider.refresh_stale(&token)? {
                    Some(token) => {
                        replacement_token = Some(token);
                        continue;
                    }

                    None => {
                        warn!("Refreshing the access token is inapplicable to this token provider");
                        return Err(Error::AccessTokenExpired);
                    }
                }
            }

            if policy.is_retryable_status(status.as_u16()) && retries < policy.max_retries {
                let (delay, reason) = if status == StatusCode::TOO_MANY_REQUESTS {
                    let delay = retry_after
                        .map(|seconds| policy.retry_after(seconds))
                        .unwrap_or_else(|| policy.backoff(retries + 1));

                    (delay, RetryReason::RateLimited { retry_after })
                } else {
                    (policy.backoff(retries + 1), RetryReason::Status(status.as_u16()))
                };

                if self.wait_for_retry(&method, &url, &reason, delay, started) {
                    retries += 1;
                    continue;
                }
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                warn!("Got rate limited and the retry budget is exhausted after {} attempts", attempts);
            }

            return Err(ApiError::from_body(status.as_u16(), &body, url.as_str(), retry_after, attempts).into());
        }
    }

    pub fn get(&self, path: &str, params: &[(&str, &str)]) -> Result<Option<Value>> {
        self.call(Method::GET, path, params, None)
    }

    pub fn post(&self, path: &str, params: &[(&str, &str)], payload: Option<&Value>) -> Result<Option<Value>> {
        self.call(Method::POST, path, params, payload)
    }

    pub fn put(&self, path: &str, params: &[(&str, &str)], payload: Option<&Value>) -> Result<Option<Value>> {
        self.call(Method::PUT, path, params, payload)
    }

    pub fn delete(&self, path: &str, params: &[(&str, &str)], payload: Option<&Value>) -> Result<Option<Value>> {
        self.call(Method::DELETE, path, params, payload)
    }

    /// Fetches the page after the given one by following its `next` URL. Returns `None` without sending anything if
    /// there is no next page.
    pub fn next(&self, page: &Value) -> Result<Option<Value>> {
        self.follow(page, "next")
    }

    /// Fetches the page before the given one by following its `previous` URL. Returns `None` without sending anything
    /// if there is no previous page.
    pub fn previous(&self, page: &Value) -> Result<Option<Value>> {
        self.follow(page, "previous")
    }

    fn follow(&self, page: &Value, link: &str) -> Result<Option<Value>> {
        match page.get(link).and_then(Value::as_str) {
            Some(url) => {
                debug!("Following {} page link: {}", link, url);
                self.get(url, &[])
            }

            None => Ok(None),
        }
    }

    fn resolve_url(&self, path: &str, params: &[(&str, &str)]) -> Result<Url> {
        let mut url = if path.starts_with("http://") || path.starts_with("https://") {
            parse_url(path)?
        } else {
            self.inner
                .api_base
                .join(path.trim_start_matches('/'))
                .map_err(|err| Error::InvalidUrl(path.to_owned(), err))?
        };

        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params);
        }

        Ok(url)
    }

    fn send(
        &self,
        method: &Method,
        url: &Url,
        token: &Token,
        payload: Option<&Value>,
        attempt: u32,
    ) -> std::result::Result<Response, reqwest::Error> {
        if let Some(hook) = &self.inner.hook {
            hook.on_request(method, url, attempt);
        }

        let mut request = self
            .inner
            .http_client
            .request(method.clone(), url.clone())
            .bearer_auth(token.access_token());

        if let Some(payload) = payload {
            trace!("Request body: {:?}", payload);
            request = request.json(payload);
        // Spotify requires that all empty POST and PUT requests have a Content-Length header set to 0. reqwest doesn't
        // set it for bodyless requests
        } else if *method == Method::POST || *method == Method::PUT {
            request = request.header(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
        }

        trace!("Sending {} {} (attempt {})", method, url, attempt);
        let sent = Instant::now();
        let response = request.send()?;

        if let Some(hook) = &self.inner.hook {
            hook.on_response(method, url, response.status().as_u16(), sent.elapsed());
        }

        Ok(response)
    }

    /// Sleeps ahead of a retry. Returns false without sleeping if the call's deadline would pass before the retry.
    fn wait_for_retry(
        &self,
        method: &Method,
        url: &Url,
        reason: &RetryReason,
        delay: Duration,
        started: Instant,
    ) -> bool {
        if let Some(deadline) = self.inner.deadline {
            if started.elapsed() + delay > deadline {
                warn!("Not retrying {} {}: the call deadline of {:?} would pass", method, url, deadline);
                return false;
            }
        }

        if let Some(hook) = &self.inner.hook {
            hook.on_retry(method, url, reason, delay);
        }

        info!("Retrying {} {} in {:?} ({:?})", method, url, delay, reason);
        thread::sleep(delay);

        true
    }
}

impl std::fmt::Debug for SpotifyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpotifyClient")
            .field("api_base", &self.inner.api_base)
            .field("retry_policy", &self.inner.retry_policy)
            .field("deadline", &self.inner.deadline)
            .finish_non_exhaustive()
    }
}

impl SpotifyClientBuilder {
    /// Resolve relative paths against the given URL instead of the Web API's.
    pub fn api_base_url(self, api_base: Url) -> Self {
        Self {
            api_base: Some(api_base),
            ..self
        }
    }

    /// Resolve relative paths against the API base URL of the given endpoints.
    pub fn endpoints(self, endpoints: &Endpoints) -> Self {
        self.api_base_url(endpoints.api_base.clone())
    }

    pub fn retry_policy(self, retry_policy: RetryPolicy) -> Self {
        Self { retry_policy, ..self }
    }

    /// Timeout for a single HTTP request. Defaults to 5 seconds.
    pub fn requests_timeout(self, requests_timeout: Duration) -> Self {
        Self {
            requests_timeout,
            ..self
        }
    }

    /// An overall deadline for a call including its retries. A retry whose wait would pass the deadline isn't
    /// attempted; the last failure is returned instead.
    pub fn deadline(self, deadline: Duration) -> Self {
        Self {
            deadline: Some(deadline),
            ..self
        }
    }

    pub fn hook<H>(self, hook: H) -> Self
    where
        H: RequestHook + 'static,
    {
        Self {
            hook: Some(Arc::new(hook)),
            ..self
        }
    }

    /// Send an `Accept-Language` header with every request, e.g. `"fi"` to get localized names.
    pub fn language<S>(self, language: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            language: Some(language.into()),
            ..self
        }
    }

    pub fn build(self) -> Result<SpotifyClient> {
        let mut default_headers = HeaderMap::new();
        if let Some(language) = &self.language {
            match HeaderValue::from_str(language) {
                Ok(value) => {
                    default_headers.insert(header::ACCEPT_LANGUAGE, value);
                }

                Err(_) => warn!("Ignoring invalid Accept-Language value: {:?}", language),
            }
        }

        let http_client = BlockingClient::builder()
            .default_headers(default_headers)
            .timeout(self.requests_timeout)
            .build()?;

        let api_base = match self.api_base {
            Some(api_base) => api_base,
            None => Endpoints::default().api_base,
        };

        Ok(SpotifyClient {
            inner: Arc::new(SpotifyClientRef {
                token_provider: self.token_provider,
                http_client,
                api_base,
                retry_policy: self.retry_policy,
                deadline: self.deadline,
                hook: self.hook,
            }),
        })
    }
}

impl std::fmt::Debug for SpotifyClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpotifyClientBuilder")
            .field("api_base", &self.api_base)
            .field("retry_policy", &self.retry_policy)
            .field("requests_timeout", &self.requests_timeout)
            .field("deadline", &self.deadline)
            .field("language", &self.language)
            .finish_non_exhaustive()
    }
}

fn is_transient(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

fn transport_error(url: &Url, attempts: u32, source: reqwest::Error) -> Error {
    warn!("Request to {} failed after {} attempt(s): {}", url, attempts, source);

    Error::Transport {
        url: url.to_string(),
        attempts,
        source,
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    let retry_after = headers
        .get(header::RETRY_AFTER)
        .and_then(|header| header.to_str().ok())
        .and_then(|header_str| header_str.trim().parse::<u64>().ok());

    if let Some(wait_time) = retry_after {
        warn!("Got response with Retry-After: {}", wait_time);
    }

    retry_after
}

fn read_json_body(response: Response) -> Result<Option<Value>> {
    if response.status() == StatusCode::NO_CONTENT {
        return Ok(None);
    }

    let body = response.bytes()?;
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    let value = serde_json::from_slice(&body).map_err(Error::MalformedResponse)?;
    trace!("Body: {:?}", value);

    Ok(Some(value))
}
