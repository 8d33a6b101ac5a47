use std::{fmt, time::Duration};

use base64::{engine::general_purpose::STANDARD, Engine};
use log::{debug, warn};
use reqwest::{
    blocking::{Client as BlockingClient, Response},
    header, StatusCode, Url,
};
use serde::Deserialize;

use crate::{
    config::{Credentials, Endpoints},
    error::{Error, Result},
    model::error::{AuthenticationErrorKind, AuthenticationErrorResponse},
    scope::ScopeSet,
    token::{Token, BEARER},
};

/// Client for the accounts service: holds the application's credentials and talks to the token endpoint.
#[derive(Debug, Clone)]
pub struct AccountsClient {
    credentials: Credentials,
    authorize_endpoint: Url,
    token_endpoint: Url,
    http_client: BlockingClient,
}

/// How the application authenticates itself to the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClientAuth {
    /// HTTP Basic with the client ID and secret.
    Basic,
    /// No client authentication; the client ID is sent in the form instead (PKCE).
    Public,
}

#[derive(Deserialize)]
pub(crate) struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
    expires_in: u64,
    refresh_token: Option<String>,
    scope: Option<String>,
}

impl AccountsClient {
    pub(crate) fn new(credentials: Credentials, endpoints: &Endpoints, requests_timeout: Duration) -> Result<Self> {
        let http_client = BlockingClient::builder().timeout(requests_timeout).build()?;

        Ok(Self {
            credentials,
            authorize_endpoint: endpoints.authorize.clone(),
            token_endpoint: endpoints.token.clone(),
            http_client,
        })
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn client_id(&self) -> &str {
        &self.credentials.client_id
    }

    pub fn authorize_endpoint(&self) -> &Url {
        &self.authorize_endpoint
    }

    pub fn token_endpoint(&self) -> &Url {
        &self.token_endpoint
    }

    pub(crate) fn redirect_uri(&self) -> Result<&str> {
        self.credentials.redirect_uri.as_deref().ok_or(Error::MissingRedirectUri)
    }

    /// POSTs the given form to the token endpoint and parses the token response. 400 and 401 responses are parsed as
    /// OAuth2 error responses.
    pub(crate) fn request_token(&self, form: &[(&str, &str)], auth: ClientAuth) -> Result<TokenResponse> {
        let mut request = self.http_client.post(self.token_endpoint.clone()).form(form);

        if auth == ClientAuth::Basic {
            let client_secret = self
                .credentials
                .client_secret
                .as_deref()
                .ok_or(Error::MissingClientSecret)?;

            request = request.header(
                header::AUTHORIZATION,
                build_authorization_header(&self.credentials.client_id, client_secret),
            );
        }

        let response = request.send()?;
        let response = extract_authentication_error(response)?;

        let token_response: TokenResponse = response.json()?;
        debug!("Got token response: {:?}", token_response);

        Ok(token_response)
    }
}

impl TokenResponse {
    /// Converts the response into a token. The granted scope falls back to the requested one if the response
    /// doesn't include it, and the refresh token falls back to the previous one if the server didn't rotate it.
    pub(crate) fn into_token(self, requested_scope: &ScopeSet, previous_refresh_token: Option<&str>) -> Token {
        let scope = self
            .scope
            .map(|scope| ScopeSet::parse(&scope))
            .unwrap_or_else(|| requested_scope.clone());

        if !self.token_type.eq_ignore_ascii_case(BEARER) {
            warn!("Unexpected token type in token response: {}", self.token_type);
        }

        let refresh_token = self.refresh_token.or_else(|| previous_refresh_token.map(str::to_owned));
        Token::expiring_in(self.access_token, scope, self.expires_in).with_refresh_token(refresh_token)
    }
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("scope", &self.scope)
            .finish()
    }
}

pub(crate) fn build_authorization_header(client_id: &str, client_secret: &str) -> String {
    let auth = format!("{}:{}", client_id, client_secret);
    format!("Basic {}", STANDARD.encode(auth))
}

/// Takes a response for an authentication request and if its status is 400 or 401, parses its body as an
/// authentication error. Any other error status is returned as an HTTP error. On success returns the given response
/// without modifying it.
fn extract_authentication_error(response: Response) -> Result<Response> {
    match response.status() {
        StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => {
            let status = response.status();
            let body = response.text()?;
            warn!("Token request failed with {}: {}", status, body);

            match serde_json::from_str::<AuthenticationErrorResponse>(&body) {
                Ok(error_response) => Err(error_response.into_unhandled_error()),
                Err(_) => Err(Error::UnhandledAuthenticationError(AuthenticationErrorKind::Other, body)),
            }
        }

        _ => Ok(response.error_for_status()?),
    }
}

/// Maps errors from the client credentials request.
pub(crate) fn map_client_error(err: Error) -> Error {
    match err {
        Error::UnhandledAuthenticationError(AuthenticationErrorKind::InvalidClient, description) => {
            Error::InvalidClient(description)
        }
        err => err,
    }
}

/// Maps errors from exchanging an authorization code.
pub(crate) fn map_authentication_error(err: Error) -> Error {
    match map_client_error(err) {
        Error::UnhandledAuthenticationError(AuthenticationErrorKind::InvalidGrant, description) => {
            Error::InvalidAuthorizationCode(description)
        }
        err => err,
    }
}

/// Maps errors from refreshing an access token.
pub(crate) fn map_refresh_token_error(err: Error) -> Error {
    match map_client_error(err) {
        Error::UnhandledAuthenticationError(AuthenticationErrorKind::InvalidGrant, description) => {
            Error::InvalidRefreshToken(description)
        }
        err => err,
    }
}

fn default_token_type() -> String {
    String::from(BEARER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::Scope;

    #[test]
    fn basic_authorization_header() {
        // base64("client:secret")
        assert_eq!(
            build_authorization_header("client", "secret"),
            "Basic Y2xpZW50OnNlY3JldA=="
        );
    }

    #[test]
    fn token_response_keeps_previous_refresh_token() {
        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token": "new", "token_type": "Bearer", "expires_in": 3600}"#).unwrap();
        let requested = ScopeSet::from([Scope::UserReadPrivate]);
        let token = response.into_token(&requested, Some("old-refresh"));

        assert_eq!(token.access_token(), "new");
        assert_eq!(token.refresh_token(), Some("old-refresh"));
        assert_eq!(token.scope(), &requested);
    }

    #[test]
    fn token_response_prefers_granted_scope_and_new_refresh_token() {
        let response: TokenResponse = serde_json::from_str(
            r#"{"access_token": "new", "token_type": "Bearer", "expires_in": 3600, "refresh_token": "rotated", "scope": "user-top-read"}"#,
        )
        .unwrap();
        let token = response.into_token(&ScopeSet::from([Scope::UserReadPrivate]), Some("old-refresh"));

        assert_eq!(token.refresh_token(), Some("rotated"));
        assert_eq!(token.scope(), &ScopeSet::from([Scope::UserTopRead]));
    }

    #[test]
    fn invalid_grant_maps_by_context() {
        let err = || Error::UnhandledAuthenticationError(AuthenticationErrorKind::InvalidGrant, "bad".into());

        assert!(matches!(map_authentication_error(err()), Error::InvalidAuthorizationCode(_)));
        assert!(matches!(map_refresh_token_error(err()), Error::InvalidRefreshToken(_)));
        assert!(matches!(
            map_client_error(Error::UnhandledAuthenticationError(
                AuthenticationErrorKind::InvalidClient,
                "bad".into()
            )),
            Error::InvalidClient(_)
        ));
    }
}
