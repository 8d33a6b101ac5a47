//! The implicit grant flow.
//!
//! [Spotify documentation on the implicit grant flow.](https://developer.spotify.com/documentation/general/guides/authorization/implicit-grant/).
//!
//! The access token is returned directly in the redirect URL's fragment, so no client secret is needed and there is no
//! code exchange. There is no refresh token either; once the token expires, the user has to authorize the application
//! again.

use log::debug;
use reqwest::Url;

use super::{
    accounts::AccountsClient,
    prompt::{AuthorizationPrompt, PastePrompt},
    redirect::parse_redirect_token,
    state::{GrantState, PendingAuthorization},
    Grant, InteractiveGrant,
};
use crate::{
    error::{Error, Result},
    scope::ScopeSet,
    token::Token,
};

pub struct ImplicitGrant {
    show_dialog: bool,
    prompt: Option<Box<dyn AuthorizationPrompt>>,
}

impl ImplicitGrant {
    pub fn new() -> Self {
        Self {
            show_dialog: false,
            prompt: None,
        }
    }

    /// Force the user to approve the application again even if they already have.
    pub fn show_dialog(self, show_dialog: bool) -> Self {
        Self { show_dialog, ..self }
    }

    /// Use the given prompt to send the user through the authorize URL. By default the user is asked to paste the
    /// redirect URL; the token is in the URL fragment which browsers never send to a server.
    pub fn prompt<P>(self, prompt: P) -> Self
    where
        P: AuthorizationPrompt + 'static,
    {
        Self {
            prompt: Some(Box::new(prompt)),
            ..self
        }
    }

    /// Builds the authorize URL the user should be directed to.
    pub fn authorize_url(&self, accounts: &AccountsClient, state: &GrantState, scope: &ScopeSet) -> Result<Url> {
        let redirect_uri = accounts.redirect_uri()?;
        let scope = scope.to_string();

        let mut query_params = vec![
            ("response_type", "token"),
            ("redirect_uri", redirect_uri),
            ("client_id", accounts.client_id()),
            ("state", state.state()),
            ("show_dialog", if self.show_dialog { "true" } else { "false" }),
        ];

        if !scope.is_empty() {
            query_params.push(("scope", scope.as_str()));
        }

        let mut authorize_url = accounts.authorize_endpoint().clone();
        authorize_url.query_pairs_mut().extend_pairs(query_params);

        Ok(authorize_url)
    }
}

impl Default for ImplicitGrant {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ImplicitGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImplicitGrant")
            .field("show_dialog", &self.show_dialog)
            .field("prompt", &self.prompt.is_some())
            .finish()
    }
}

impl Grant for ImplicitGrant {
    fn name(&self) -> &'static str {
        "implicit grant"
    }

    fn requires_redirect_uri(&self) -> bool {
        true
    }

    fn is_interactive(&self) -> bool {
        true
    }

    fn acquire(&self, accounts: &AccountsClient, scope: &ScopeSet) -> Result<Token> {
        match &self.prompt {
            Some(prompt) => super::authorize_interactively(self, accounts, scope, prompt.as_ref()),
            None => super::authorize_interactively(self, accounts, scope, &PastePrompt),
        }
    }
}

impl InteractiveGrant for ImplicitGrant {
    fn begin(&self, accounts: &AccountsClient, scope: &ScopeSet) -> Result<PendingAuthorization> {
        let grant_state = GrantState::new();
        let authorize_url = self.authorize_url(accounts, &grant_state, scope)?;
        debug!("Built implicit grant authorize URL: {}", authorize_url);

        Ok(PendingAuthorization {
            grant_state,
            authorize_url,
            scope: scope.clone(),
        })
    }

    fn complete(
        &self,
        _accounts: &AccountsClient,
        pending: PendingAuthorization,
        redirect_url: &str,
    ) -> Result<Token> {
        let redirect = parse_redirect_token(redirect_url)?;

        if !pending.grant_state.matches(redirect.state.as_deref()) {
            return Err(Error::AuthorizationCodeStateMismatch);
        }

        let scope = redirect
            .scope
            .as_deref()
            .map(ScopeSet::parse)
            .unwrap_or(pending.scope);

        debug!("Got implicit grant token expiring in {} seconds", redirect.expires_in);
        Ok(Token::expiring_in(redirect.access_token, scope, redirect.expires_in))
    }
}
