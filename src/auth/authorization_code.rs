//! The authorization code flow, with optional PKCE.
//!
//! [Spotify documentation on the authorization code flow.](https://developer.spotify.com/documentation/general/guides/authorization/code-flow/).
//!
//! # Usage
//!
//! ```no_run
//! # use spotiauth::{auth::{AuthorizationCode, TokenAuthority}, config::Credentials, scope::Scope};
//! # fn foo() -> spotiauth::Result<()> {
//! let credentials = Credentials::new("application client ID")
//!     .client_secret("application client secret")
//!     // the redirect URI should match one of the redirect URIs specified in your Spotify application
//!     .redirect_uri("http://127.0.0.1:8888/callback");
//!
//! let authority = TokenAuthority::builder(credentials)
//!     .scopes([Scope::UserReadPlaybackState])
//!     // in case the user has already approved the application, `show_dialog` forces them to approve it again
//!     .build(AuthorizationCode::new().show_dialog(true))?;
//!
//! // the first call sends the user through the authorize URL. the redirect is captured with a one-shot local server
//! // since the redirect URI points at this machine
//! let token = authority.get_token()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Usage with PKCE
//!
//! In case the application's client secret cannot be safely stored in the environment, PKCE may still be used to
//! strongly authenticate the client with Spotify. Use [AuthorizationCode::with_pkce] and leave out the client secret.
//!
//! # Usage in web applications
//!
//! Web applications can't block waiting for the redirect. Instead, they
//! [begin the authorization](crate::auth::TokenAuthority::begin_authorization), direct the user to the authorize URL,
//! keep the [PendingAuthorization] in the user's session and [finalize](crate::auth::TokenAuthority::finalize) it with
//! the URL the user is redirected back to.

use log::debug;
use reqwest::Url;

use super::{
    accounts::{self, AccountsClient, ClientAuth},
    default_prompt,
    prompt::AuthorizationPrompt,
    redirect::parse_redirect_code,
    state::{GrantState, PendingAuthorization},
    Grant, InteractiveGrant,
};
use crate::{
    error::{Error, Result},
    scope::ScopeSet,
    token::Token,
};

/// The authorization code grant. Tokens from this grant carry a refresh token.
pub struct AuthorizationCode {
    pkce: bool,
    show_dialog: bool,
    prompt: Option<Box<dyn AuthorizationPrompt>>,
}

impl AuthorizationCode {
    /// The authorization code grant authenticated with the client secret.
    pub fn new() -> Self {
        Self {
            pkce: false,
            show_dialog: false,
            prompt: None,
        }
    }

    /// The authorization code grant with PKCE. Doesn't require a client secret.
    pub fn with_pkce() -> Self {
        Self {
            pkce: true,
            ..Self::new()
        }
    }

    /// Force the user to approve the application again even if they already have.
    pub fn show_dialog(self, show_dialog: bool) -> Self {
        Self { show_dialog, ..self }
    }

    /// Use the given prompt to send the user through the authorize URL. By default, a local server captures the
    /// redirect if the redirect URI points to this machine, otherwise the user is asked to paste the redirect URL.
    pub fn prompt<P>(self, prompt: P) -> Self
    where
        P: AuthorizationPrompt + 'static,
    {
        Self {
            prompt: Some(Box::new(prompt)),
            ..self
        }
    }

    pub fn uses_pkce(&self) -> bool {
        self.pkce
    }

    fn client_auth(&self) -> ClientAuth {
        if self.pkce {
            ClientAuth::Public
        } else {
            ClientAuth::Basic
        }
    }

    /// Builds the authorize URL the user should be directed to.
    pub fn authorize_url(&self, accounts: &AccountsClient, state: &GrantState, scope: &ScopeSet) -> Result<Url> {
        let redirect_uri = accounts.redirect_uri()?;
        let scope = scope.to_string();

        let mut query_params = vec![
            ("response_type", "code"),
            ("redirect_uri", redirect_uri),
            ("client_id", accounts.client_id()),
            ("state", state.state()),
            ("show_dialog", if self.show_dialog { "true" } else { "false" }),
        ];

        if !scope.is_empty() {
            query_params.push(("scope", scope.as_str()));
        }

        if let Some(code_challenge) = state.code_challenge() {
            debug!("Using PKCE extension with challenge: {}", code_challenge);
            query_params.extend([("code_challenge_method", "S256"), ("code_challenge", code_challenge)]);
        }

        let mut authorize_url = accounts.authorize_endpoint().clone();
        authorize_url.query_pairs_mut().extend_pairs(query_params);

        Ok(authorize_url)
    }

    /// Exchanges an authorization code for a token. The returned state is checked against the original before
    /// anything is sent to the token endpoint.
    pub fn exchange_code(
        &self,
        accounts: &AccountsClient,
        state: &GrantState,
        code: &str,
        returned_state: Option<&str>,
        scope: &ScopeSet,
    ) -> Result<Token> {
        if !state.matches(returned_state) {
            debug!(
                "Authorization code state mismatch: expected {}, got {:?}",
                state.state(),
                returned_state
            );

            return Err(Error::AuthorizationCodeStateMismatch);
        }

        let redirect_uri = accounts.redirect_uri()?;
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ];

        if let Some(code_verifier) = state.code_verifier() {
            debug!("Requesting access and refresh tokens for authorization code flow with PKCE");
            form.extend([("client_id", accounts.client_id()), ("code_verifier", code_verifier)]);
        } else {
            debug!("Requesting access and refresh tokens for authorization code flow");
        }

        let token_response = accounts
            .request_token(&form, self.client_auth())
            .map_err(accounts::map_authentication_error)?;

        Ok(token_response.into_token(scope, None))
    }
}

impl Default for AuthorizationCode {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AuthorizationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationCode")
            .field("pkce", &self.pkce)
            .field("show_dialog", &self.show_dialog)
            .field("prompt", &self.prompt.is_some())
            .finish()
    }
}

impl Grant for AuthorizationCode {
    fn name(&self) -> &'static str {
        if self.pkce {
            "authorization code with PKCE"
        } else {
            "authorization code"
        }
    }

    fn requires_client_secret(&self) -> bool {
        !self.pkce
    }

    fn requires_redirect_uri(&self) -> bool {
        true
    }

    fn supports_refresh(&self) -> bool {
        true
    }

    fn is_interactive(&self) -> bool {
        true
    }

    fn acquire(&self, accounts: &AccountsClient, scope: &ScopeSet) -> Result<Token> {
        match &self.prompt {
            Some(prompt) => super::authorize_interactively(self, accounts, scope, prompt.as_ref()),
            None => {
                let prompt = default_prompt(accounts.redirect_uri()?);
                super::authorize_interactively(self, accounts, scope, prompt.as_ref())
            }
        }
    }

    fn refresh(&self, accounts: &AccountsClient, token: &Token) -> Result<Token> {
        let refresh_token = token.refresh_token().ok_or(Error::RefreshUnsupported)?;
        debug!("Refreshing access token with {} grant", self.name());

        let mut form = vec![("grant_type", "refresh_token"), ("refresh_token", refresh_token)];
        if self.pkce {
            form.push(("client_id", accounts.client_id()));
        }

        let token_response = accounts
            .request_token(&form, self.client_auth())
            .map_err(accounts::map_refresh_token_error)?;

        Ok(token_response.into_token(token.scope(), Some(refresh_token)))
    }
}

impl InteractiveGrant for AuthorizationCode {
    fn begin(&self, accounts: &AccountsClient, scope: &ScopeSet) -> Result<PendingAuthorization> {
        let grant_state = if self.pkce {
            GrantState::with_pkce()
        } else {
            GrantState::new()
        };

        let authorize_url = self.authorize_url(accounts, &grant_state, scope)?;
        debug!("Built authorize URL: {}", authorize_url);

        Ok(PendingAuthorization {
            grant_state,
            authorize_url,
            scope: scope.clone(),
        })
    }

    fn complete(
        &self,
        accounts: &AccountsClient,
        pending: PendingAuthorization,
        redirect_url: &str,
    ) -> Result<Token> {
        let redirect = parse_redirect_code(redirect_url)?;

        self.exchange_code(
            accounts,
            &pending.grant_state,
            &redirect.code,
            redirect.state.as_deref(),
            &pending.scope,
        )
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, time::Duration};

    use super::*;
    use crate::{
        config::{Credentials, Endpoints},
        scope::Scope,
    };

    fn accounts() -> AccountsClient {
        let credentials = Credentials::new("client-id").redirect_uri("http://127.0.0.1:8888/callback");
        AccountsClient::new(credentials, &Endpoints::default(), Duration::from_secs(5)).unwrap()
    }

    fn query(url: &Url) -> HashMap<String, String> {
        url.query_pairs().into_owned().collect()
    }

    #[test]
    fn authorize_url_parameters() {
        let grant = AuthorizationCode::new().show_dialog(true);
        let state = GrantState::new();
        let scope = ScopeSet::from([Scope::UserReadPrivate, Scope::PlaylistReadPrivate]);
        let url = grant.authorize_url(&accounts(), &state, &scope).unwrap();
        let query = query(&url);

        assert!(url.as_str().starts_with("https://accounts.spotify.com/authorize?"));
        assert_eq!(query["response_type"], "code");
        assert_eq!(query["client_id"], "client-id");
        assert_eq!(query["redirect_uri"], "http://127.0.0.1:8888/callback");
        assert_eq!(query["state"], state.state());
        assert_eq!(query["show_dialog"], "true");
        assert_eq!(query["scope"], "playlist-read-private user-read-private");
        assert!(!query.contains_key("code_challenge"));
    }

    #[test]
    fn pkce_authorize_url_carries_challenge_not_verifier() {
        let grant = AuthorizationCode::with_pkce();
        let state = GrantState::with_pkce();
        let url = grant.authorize_url(&accounts(), &state, &ScopeSet::new()).unwrap();
        let query = query(&url);

        assert_eq!(query["code_challenge_method"], "S256");
        assert_eq!(Some(query["code_challenge"].as_str()), state.code_challenge());
        assert!(!url.as_str().contains(state.code_verifier().unwrap()));
        assert!(!query.contains_key("scope"));
    }

    #[test]
    fn state_mismatch_fails_before_exchange() {
        // the token endpoint is unreachable; reaching it would fail with an HTTP error instead
        let grant = AuthorizationCode::new();
        let state = GrantState::new();

        let err = grant
            .exchange_code(&accounts(), &state, "code", Some("forged"), &ScopeSet::new())
            .unwrap_err();
        assert!(matches!(err, Error::AuthorizationCodeStateMismatch));

        let err = grant
            .exchange_code(&accounts(), &state, "code", None, &ScopeSet::new())
            .unwrap_err();
        assert!(matches!(err, Error::AuthorizationCodeStateMismatch));
    }

    #[test]
    fn capabilities() {
        assert!(AuthorizationCode::new().requires_client_secret());
        assert!(!AuthorizationCode::with_pkce().requires_client_secret());
        assert!(AuthorizationCode::with_pkce().supports_refresh());
        assert!(AuthorizationCode::new().is_interactive());
    }
}
