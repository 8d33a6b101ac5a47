//! Parsing the URL the user is redirected back to after authorizing the application.

use log::warn;
use reqwest::Url;

use crate::{
    config::parse_url,
    error::{Error, Result},
};

const DEFAULT_IMPLICIT_EXPIRES_IN: u64 = 3600;

/// The authorization code and state from an authorization code flow redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeRedirect {
    pub code: String,
    pub state: Option<String>,
}

/// The access token and state from an implicit grant redirect fragment.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenRedirect {
    pub access_token: String,
    pub token_type: Option<String>,
    pub expires_in: u64,
    pub scope: Option<String>,
    pub state: Option<String>,
}

/// Reads `code` and `state` from the redirect URL's query. An `error` parameter means the user or the server refused
/// the authorization.
pub fn parse_redirect_code(redirect_url: &str) -> Result<CodeRedirect> {
    let url = parse_url(redirect_url.trim())?;
    let mut code = None;
    let mut state = None;

    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => return Err(Error::AuthorizationDenied(value.into_owned())),
            _ => {}
        }
    }

    Ok(CodeRedirect {
        code: code.ok_or(Error::MissingRedirectParameter("code"))?,
        state,
    })
}

/// Reads `access_token`, `token_type`, `expires_in`, `scope` and `state` from the redirect URL's fragment.
pub fn parse_redirect_token(redirect_url: &str) -> Result<TokenRedirect> {
    let url = parse_url(redirect_url.trim())?;
    let fragment = fragment_or_query(&url);

    let mut access_token = None;
    let mut redirect = TokenRedirect {
        access_token: String::new(),
        token_type: None,
        expires_in: DEFAULT_IMPLICIT_EXPIRES_IN,
        scope: None,
        state: None,
    };

    for (key, value) in url::form_urlencoded::parse(fragment.as_bytes()) {
        match key.as_ref() {
            "access_token" => access_token = Some(value.into_owned()),
            "token_type" => redirect.token_type = Some(value.into_owned()),
            "expires_in" => match value.parse() {
                Ok(expires_in) => redirect.expires_in = expires_in,
                Err(_) => warn!("Ignoring invalid expires_in in redirect: {}", value),
            },
            "scope" => redirect.scope = Some(value.into_owned()),
            "state" => redirect.state = Some(value.into_owned()),
            "error" => return Err(Error::AuthorizationDenied(value.into_owned())),
            _ => {}
        }
    }

    redirect.access_token = access_token.ok_or(Error::MissingRedirectParameter("access_token"))?;
    Ok(redirect)
}

// errors in the implicit grant flow are returned in the query instead of the fragment
fn fragment_or_query(url: &Url) -> String {
    match url.fragment() {
        Some(fragment) if !fragment.is_empty() => fragment.to_owned(),
        _ => url.query().unwrap_or_default().to_owned(),
    }
}

impl std::fmt::Debug for TokenRedirect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRedirect")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .field("state", &self.state)
            .finish()
    }
}
