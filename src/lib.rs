//! Authorization and resilient request core for the Spotify Web API.
//!
//! The crate has two halves:
//!
//! - A [TokenAuthority](auth::TokenAuthority) obtains access tokens with one of the OAuth2 grants Spotify supports
//!   ([authorization code](auth::AuthorizationCode), optionally with PKCE,
//!   [client credentials](auth::ClientCredentials) and the [implicit grant](auth::ImplicitGrant)), persists them in a
//!   pluggable [cache](cache) and refreshes them when they expire.
//! - A [SpotifyClient](client::SpotifyClient) sends requests to the Web API with a token from the authority,
//!   retrying rate-limited and failed requests, and follows [page](model::Page) links.
//!
//! Everything is synchronous; the calling thread blocks on network requests, retry waits and interactive
//! authorization.
//!
//! # Usage
//!
//! ```no_run
//! use spotiauth::{
//!     auth::{AuthorizationCode, TokenAuthority},
//!     client::SpotifyClient,
//!     config::Credentials,
//!     scope::Scope,
//! };
//!
//! # fn foo() -> spotiauth::Result<()> {
//! // read the client ID, secret, redirect URI and username from the SPOTIFY_* environment variables
//! let authority = TokenAuthority::builder(Credentials::from_env()?)
//!     .scopes([Scope::UserReadPlaybackState, Scope::UserModifyPlaybackState])
//!     .build(AuthorizationCode::new())?;
//!
//! let client = SpotifyClient::builder(authority).build()?;
//!
//! // pause playback. empty PUT requests are sent with Content-Length: 0
//! client.put("me/player/pause", &[], None)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Logging
//!
//! The crate logs through the [log](https://docs.rs/log) facade. Access and refresh tokens, the client secret and PKCE
//! verifiers are never logged. To observe individual requests, give the client a [RequestHook](client::RequestHook).

pub mod auth;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod model;
pub mod scope;
pub mod token;

pub use crate::{
    error::{Error, Result},
    scope::{Scope, ScopeSet},
    token::Token,
};

/// Re-exports the traits needed to use the crate.
pub mod prelude {
    pub use crate::{
        auth::{AuthorizationPrompt, Grant, InteractiveGrant, TokenProvider},
        cache::CacheHandler,
        client::RequestHook,
    };
}
