//! Obtaining, caching and refreshing access tokens.
//!
//! A [TokenAuthority] runs one [Grant] against the accounts service and persists the tokens it gets into a
//! [CacheHandler]. Every grant shares the same acquisition algorithm in [get_token](TokenAuthority::get_token):
//!
//! 1. A cached token for a different scope set than the one requested is treated as missing.
//! 2. A fresh cached token is returned as-is without contacting the accounts service.
//! 3. An expired cached token with a refresh token is refreshed, if the grant supports refreshing.
//! 4. Otherwise the grant acquires a new token, which may involve the user.
//!
//! Acquisition is serialized per cache: authorities whose caches point at the same storage (see
//! [CacheHandler::lock_key]) take turns, so that two threads racing over the same expired token perform only one
//! refresh.
//!
//! # Usage
//!
//! ```no_run
//! # use spotiauth::{auth::{ClientCredentials, TokenAuthority}, cache::MemoryCache, config::Credentials};
//! # fn foo() -> spotiauth::Result<()> {
//! let authority = TokenAuthority::builder(
//!     Credentials::new("application client ID").client_secret("application client secret"),
//! )
//! .cache(MemoryCache::new())
//! .build(ClientCredentials::new())?;
//!
//! let token = authority.get_token()?;
//! # Ok(())
//! # }
//! ```

pub mod accounts;
pub mod authorization_code;
pub mod client_credentials;
pub mod implicit_grant;
pub mod prompt;
pub mod redirect;
pub mod state;

pub use self::{
    accounts::AccountsClient,
    authorization_code::AuthorizationCode,
    client_credentials::ClientCredentials,
    implicit_grant::ImplicitGrant,
    prompt::{AuthorizationPrompt, CallbackListener, LocalServerPrompt, PastePrompt},
    redirect::{parse_redirect_code, parse_redirect_token, CodeRedirect, TokenRedirect},
    state::{code_challenge, GrantState, PendingAuthorization},
};

use std::{
    collections::HashMap,
    sync::{Arc, OnceLock},
    time::Duration,
};

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::{
    cache::{CacheHandler, FileCache},
    config::{parse_url, Credentials, Endpoints},
    error::{Error, Result},
    scope::{Scope, ScopeSet},
    token::{CacheRecord, Token},
};

pub(crate) const DEFAULT_EXPIRY_MARGIN: Duration = Duration::from_secs(60);
pub(crate) const DEFAULT_REQUESTS_TIMEOUT: Duration = Duration::from_secs(5);

/// An OAuth2 grant: a way of getting an access token from the accounts service.
pub trait Grant: Send + Sync {
    /// A human-readable name for logging.
    fn name(&self) -> &'static str;

    fn requires_client_secret(&self) -> bool {
        false
    }

    fn requires_redirect_uri(&self) -> bool {
        false
    }

    /// Whether tokens from this grant carry a refresh token that can be exchanged for a new access token.
    fn supports_refresh(&self) -> bool {
        false
    }

    /// Whether acquiring a token involves the user.
    fn is_interactive(&self) -> bool {
        false
    }

    /// Acquires a new token for the given scopes from scratch.
    fn acquire(&self, accounts: &AccountsClient, scope: &ScopeSet) -> Result<Token>;

    /// Exchanges the token's refresh token for a new token.
    fn refresh(&self, _accounts: &AccountsClient, _token: &Token) -> Result<Token> {
        Err(Error::RefreshUnsupported)
    }
}

/// A grant that sends the user through the authorize URL. The flow can be driven in two steps, for applications that
/// can't block while the user authorizes.
pub trait InteractiveGrant: Grant {
    /// Generates a new grant state and the authorize URL the user should be directed to.
    fn begin(&self, accounts: &AccountsClient, scope: &ScopeSet) -> Result<PendingAuthorization>;

    /// Completes a pending authorization with the URL the user was redirected back to.
    fn complete(&self, accounts: &AccountsClient, pending: PendingAuthorization, redirect_url: &str)
        -> Result<Token>;
}

/// Source of access tokens for the [SpotifyClient](crate::client::SpotifyClient).
pub trait TokenProvider: Send + Sync {
    /// Returns a fresh token.
    fn get_token(&self) -> Result<Token>;

    /// Called when the API rejected the given token as expired even though it looked fresh. Returns a replacement
    /// token, or `None` if the provider can't produce one without the user.
    fn refresh_stale(&self, _stale: &Token) -> Result<Option<Token>> {
        Ok(None)
    }
}

/// A fixed, caller-supplied token. It is never refreshed; once it expires every call fails with
/// [AccessTokenExpired](Error::AccessTokenExpired).
#[derive(Debug, Clone)]
pub struct StaticToken(Token);

/// Runs a [Grant], persisting its tokens into a [CacheHandler]. See the [module-level documentation](self).
pub struct TokenAuthority<G> {
    grant: G,
    accounts: AccountsClient,
    cache: Box<dyn CacheHandler>,
    scope: ScopeSet,
    expiry_margin: Duration,
    guard: Arc<Mutex<()>>,
}

/// Builder for [TokenAuthority].
pub struct TokenAuthorityBuilder {
    credentials: Credentials,
    scope: ScopeSet,
    cache: Option<Box<dyn CacheHandler>>,
    endpoints: Endpoints,
    expiry_margin: Duration,
    requests_timeout: Duration,
}

impl<T> TokenProvider for Arc<T>
where
    T: TokenProvider + ?Sized,
{
    fn get_token(&self) -> Result<Token> {
        (**self).get_token()
    }

    fn refresh_stale(&self, stale: &Token) -> Result<Option<Token>> {
        (**self).refresh_stale(stale)
    }
}

impl StaticToken {
    pub fn new(token: Token) -> Self {
        Self(token)
    }

    pub fn token(&self) -> &Token {
        &self.0
    }
}

impl TokenProvider for StaticToken {
    fn get_token(&self) -> Result<Token> {
        if self.0.is_expired(Duration::ZERO) {
            return Err(Error::AccessTokenExpired);
        }

        Ok(self.0.clone())
    }
}

impl TokenAuthority<()> {
    /// Returns a new builder with the given credentials.
    pub fn builder(credentials: Credentials) -> TokenAuthorityBuilder {
        TokenAuthorityBuilder {
            credentials,
            scope: ScopeSet::new(),
            cache: None,
            endpoints: Endpoints::default(),
            expiry_margin: DEFAULT_EXPIRY_MARGIN,
            requests_timeout: DEFAULT_REQUESTS_TIMEOUT,
        }
    }

    /// Returns a new builder with credentials read from the environment. See [Credentials::from_env].
    pub fn from_env() -> Result<TokenAuthorityBuilder> {
        Ok(Self::builder(Credentials::from_env()?))
    }
}

impl TokenAuthorityBuilder {
    /// Request the given scopes. Replaces any previously set scopes.
    pub fn scopes<I>(self, scopes: I) -> Self
    where
        I: IntoIterator<Item = Scope>,
    {
        Self {
            scope: scopes.into_iter().collect(),
            ..self
        }
    }

    /// Persist tokens into the given cache. Defaults to a [FileCache] named after the username in the credentials, or
    /// `.cache` if there is none.
    pub fn cache<C>(self, cache: C) -> Self
    where
        C: CacheHandler + 'static,
    {
        Self {
            cache: Some(Box::new(cache)),
            ..self
        }
    }

    pub fn endpoints(self, endpoints: Endpoints) -> Self {
        Self { endpoints, ..self }
    }

    /// Treat tokens as expired this long before they actually expire. Defaults to 60 seconds.
    pub fn expiry_margin(self, expiry_margin: Duration) -> Self {
        Self { expiry_margin, ..self }
    }

    /// Timeout for requests to the accounts service. Defaults to 5 seconds.
    pub fn requests_timeout(self, requests_timeout: Duration) -> Self {
        Self {
            requests_timeout,
            ..self
        }
    }

    /// Builds the authority for the given grant. Fails if the grant needs a client secret or a redirect URI that
    /// the credentials don't have.
    pub fn build<G>(self, grant: G) -> Result<TokenAuthority<G>>
    where
        G: Grant,
    {
        if grant.requires_client_secret() && !self.credentials.has_client_secret() {
            return Err(Error::MissingClientSecret);
        }

        if grant.requires_redirect_uri() {
            let redirect_uri = self.credentials.get_redirect_uri().ok_or(Error::MissingRedirectUri)?;
            parse_url(redirect_uri)?;
        }

        let cache: Box<dyn CacheHandler> = match (self.cache, self.credentials.get_username()) {
            (Some(cache), _) => cache,
            (None, Some(username)) => Box::new(FileCache::for_username(username)),
            (None, None) => Box::new(FileCache::default()),
        };

        let guard = match cache.lock_key() {
            Some(lock_key) => shared_guard(lock_key),
            None => Arc::new(Mutex::new(())),
        };

        debug!(
            "Building token authority for {} grant with scopes {:?}",
            grant.name(),
            self.scope.to_string()
        );

        Ok(TokenAuthority {
            grant,
            accounts: AccountsClient::new(self.credentials, &self.endpoints, self.requests_timeout)?,
            cache,
            scope: self.scope,
            expiry_margin: self.expiry_margin,
            guard,
        })
    }
}

impl<G> TokenAuthority<G>
where
    G: Grant,
{
    pub fn grant(&self) -> &G {
        &self.grant
    }

    pub fn accounts(&self) -> &AccountsClient {
        &self.accounts
    }

    /// The requested scopes.
    pub fn scope(&self) -> &ScopeSet {
        &self.scope
    }

    /// Returns a fresh token for the requested scopes, from the cache if possible.
    pub fn get_token(&self) -> Result<Token> {
        let _guard = self.guard.lock();

        if let Some(token) = self.cached_token() {
            if !token.is_expired(self.expiry_margin) {
                debug!("Using cached access token");
                return Ok(token);
            }

            if let Some(token) = self.try_refresh(&token) {
                return Ok(token);
            }
        }

        self.acquire()
    }

    /// Returns the cached token if it was granted for the requested scopes, whether it's fresh or not. Cache failures
    /// are logged and read as no token.
    pub fn cached_token(&self) -> Option<Token> {
        let record = match self.cache.get() {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!("No cached token");
                return None;
            }

            Err(err) => {
                warn!("Failed to read cached token, ignoring cache: {}", err);
                return None;
            }
        };

        let token = record.into_token();
        if token.scope() != &self.scope {
            debug!(
                "Cached token scope {:?} doesn't match requested scope {:?}",
                token.scope().to_string(),
                self.scope.to_string()
            );

            return None;
        }

        Some(token)
    }

    /// Refreshes the given token and persists the new one.
    pub fn refresh_token(&self, token: &Token) -> Result<Token> {
        let _guard = self.guard.lock();

        let token = self.grant.refresh(&self.accounts, token)?;
        self.save_token(&token);

        Ok(token)
    }

    /// Persists the token. Failures are logged and otherwise ignored; the token is still usable.
    pub fn save_token(&self, token: &Token) {
        if let Err(err) = self.cache.save(&CacheRecord::from(token)) {
            warn!("Failed to cache access token: {}", err);
        }
    }

    fn try_refresh(&self, token: &Token) -> Option<Token> {
        if !self.grant.supports_refresh() || token.refresh_token().is_none() {
            debug!("Cached token expired and can't be refreshed");
            return None;
        }

        match self.grant.refresh(&self.accounts, token) {
            Ok(token) => {
                debug!("Refreshed expired access token");
                self.save_token(&token);
                Some(token)
            }

            Err(err) => {
                warn!("Failed to refresh access token, acquiring a new one: {}", err);
                None
            }
        }
    }

    fn acquire(&self) -> Result<Token> {
        info!("Acquiring new access token with {} grant", self.grant.name());

        let token = self.grant.acquire(&self.accounts, &self.scope)?;
        self.save_token(&token);

        Ok(token)
    }
}

impl<G> TokenAuthority<G>
where
    G: InteractiveGrant,
{
    /// Begins a two-step authorization. Direct the user to the returned pending authorization's
    /// [authorize URL](PendingAuthorization::authorize_url), then pass the URL they're redirected back to into
    /// [finalize](TokenAuthority::finalize).
    pub fn begin_authorization(&self) -> Result<PendingAuthorization> {
        self.grant.begin(&self.accounts, &self.scope)
    }

    /// Completes a two-step authorization and persists the token.
    pub fn finalize(&self, pending: PendingAuthorization, redirect_url: &str) -> Result<Token> {
        let _guard = self.guard.lock();

        let token = self.grant.complete(&self.accounts, pending, redirect_url)?;
        self.save_token(&token);

        Ok(token)
    }
}

impl<G> TokenProvider for TokenAuthority<G>
where
    G: Grant,
{
    fn get_token(&self) -> Result<Token> {
        TokenAuthority::get_token(self)
    }

    fn refresh_stale(&self, stale: &Token) -> Result<Option<Token>> {
        let _guard = self.guard.lock();

        // another thread may have replaced the token already
        let cached = self.cached_token();
        if let Some(token) = &cached {
            if token.access_token() != stale.access_token() && !token.is_expired(self.expiry_margin) {
                debug!("Using access token refreshed by another caller");
                return Ok(Some(token.clone()));
            }
        }

        if self.grant.supports_refresh() {
            let current = cached.as_ref().filter(|token| token.refresh_token().is_some()).unwrap_or(stale);

            if current.refresh_token().is_some() {
                let token = self.grant.refresh(&self.accounts, current)?;
                self.save_token(&token);
                return Ok(Some(token));
            }
        }

        if self.grant.is_interactive() {
            return Ok(None);
        }

        self.acquire().map(Some)
    }
}

impl<G> std::fmt::Debug for TokenAuthority<G>
where
    G: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuthority")
            .field("grant", &self.grant)
            .field("accounts", &self.accounts)
            .field("scope", &self.scope)
            .field("expiry_margin", &self.expiry_margin)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for TokenAuthorityBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuthorityBuilder")
            .field("credentials", &self.credentials)
            .field("scope", &self.scope)
            .field("endpoints", &self.endpoints)
            .field("expiry_margin", &self.expiry_margin)
            .field("requests_timeout", &self.requests_timeout)
            .finish_non_exhaustive()
    }
}

/// Sends the user through the authorize URL with the given prompt and completes the authorization with the redirect.
pub(crate) fn authorize_interactively<G>(
    grant: &G,
    accounts: &AccountsClient,
    scope: &ScopeSet,
    prompt: &dyn AuthorizationPrompt,
) -> Result<Token>
where
    G: InteractiveGrant + ?Sized,
{
    let pending = grant.begin(accounts, scope)?;
    let redirect_url = prompt.authorize(pending.authorize_url(), accounts.redirect_uri()?)?;

    grant.complete(accounts, pending, &redirect_url)
}

/// A local server captures the redirect if it points to this machine over plain HTTP. Anything else has to be pasted.
pub(crate) fn default_prompt(redirect_uri: &str) -> Box<dyn AuthorizationPrompt> {
    let is_local = parse_url(redirect_uri)
        .map(|url| url.scheme() == "http" && matches!(url.host_str(), Some("localhost" | "127.0.0.1" | "[::1]")))
        .unwrap_or(false);

    if is_local {
        Box::new(LocalServerPrompt::new())
    } else {
        Box::new(PastePrompt)
    }
}

fn shared_guard(lock_key: String) -> Arc<Mutex<()>> {
    static GUARDS: OnceLock<Mutex<HashMap<String, Arc<Mutex<()>>>>> = OnceLock::new();

    GUARDS
        .get_or_init(Default::default)
        .lock()
        .entry(lock_key)
        .or_default()
        .clone()
}
