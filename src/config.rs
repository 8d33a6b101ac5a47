//! Application credentials and service endpoints.

use std::fmt;

use const_format::concatcp;
use log::debug;
use reqwest::Url;

use crate::error::{Error, Result};

pub const CLIENT_ID_ENV: &str = "SPOTIFY_CLIENT_ID";
pub const CLIENT_SECRET_ENV: &str = "SPOTIFY_CLIENT_SECRET";
pub const REDIRECT_URI_ENV: &str = "SPOTIFY_REDIRECT_URI";
pub const USERNAME_ENV: &str = "SPOTIFY_USERNAME";

const ACCOUNTS_BASE_URL: &str = "https://accounts.spotify.com/";
const ACCOUNTS_AUTHORIZE_ENDPOINT: &str = concatcp!(ACCOUNTS_BASE_URL, "authorize");
const ACCOUNTS_API_TOKEN_ENDPOINT: &str = concatcp!(ACCOUNTS_BASE_URL, "api/token");

pub(crate) const API_BASE_URL: &str = "https://api.spotify.com/v1/";

/// The application's client ID and optional client secret, redirect URI and username.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub(crate) client_id: String,
    pub(crate) client_secret: Option<String>,
    pub(crate) redirect_uri: Option<String>,
    pub(crate) username: Option<String>,
}

/// The accounts service and Web API URLs. Defaults to Spotify's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub authorize: Url,
    pub token: Url,
    pub api_base: Url,
}

impl Credentials {
    pub fn new<S>(client_id: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            redirect_uri: None,
            username: None,
        }
    }

    /// Reads the credentials from the `SPOTIFY_CLIENT_ID`, `SPOTIFY_CLIENT_SECRET`, `SPOTIFY_REDIRECT_URI` and
    /// `SPOTIFY_USERNAME` environment variables. Only the client ID is required.
    pub fn from_env() -> Result<Self> {
        let client_id = read_env(CLIENT_ID_ENV).ok_or(Error::MissingCredential(CLIENT_ID_ENV))?;

        Ok(Self {
            client_id,
            client_secret: read_env(CLIENT_SECRET_ENV),
            redirect_uri: read_env(REDIRECT_URI_ENV),
            username: read_env(USERNAME_ENV),
        })
    }

    /// Fills in any value missing from `self` from the environment. Values already set are kept.
    pub fn or_env(self) -> Self {
        Self {
            client_secret: self.client_secret.or_else(|| read_env(CLIENT_SECRET_ENV)),
            redirect_uri: self.redirect_uri.or_else(|| read_env(REDIRECT_URI_ENV)),
            username: self.username.or_else(|| read_env(USERNAME_ENV)),
            ..self
        }
    }

    pub fn client_secret<S>(self, client_secret: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            client_secret: Some(client_secret.into()),
            ..self
        }
    }

    pub fn redirect_uri<S>(self, redirect_uri: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            redirect_uri: Some(redirect_uri.into()),
            ..self
        }
    }

    pub fn username<S>(self, username: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            username: Some(username.into()),
            ..self
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn has_client_secret(&self) -> bool {
        self.client_secret.is_some()
    }

    pub fn get_redirect_uri(&self) -> Option<&str> {
        self.redirect_uri.as_deref()
    }

    pub fn get_username(&self) -> Option<&str> {
        self.username.as_deref()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("redirect_uri", &self.redirect_uri)
            .field("username", &self.username)
            .finish()
    }
}

impl Endpoints {
    /// Points both the accounts service and the Web API at a single base URL, e.g. a mock server in tests. The
    /// authorize endpoint is `{base}/authorize`, the token endpoint `{base}/api/token` and the API root `{base}/v1/`.
    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let base = parse_url(&format!("{}/", base_url.trim_end_matches('/')))?;

        Ok(Self {
            authorize: join_url(&base, "authorize")?,
            token: join_url(&base, "api/token")?,
            api_base: join_url(&base, "v1/")?,
        })
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        // the URLs are constants; failing to parse them is a bug in the library
        Self {
            authorize: Url::parse(ACCOUNTS_AUTHORIZE_ENDPOINT).expect("invalid authorize endpoint constant"),
            token: Url::parse(ACCOUNTS_API_TOKEN_ENDPOINT).expect("invalid token endpoint constant"),
            api_base: Url::parse(API_BASE_URL).expect("invalid API base URL constant"),
        }
    }
}

pub(crate) fn parse_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|err| Error::InvalidUrl(url.to_owned(), err))
}

fn join_url(base: &Url, path: &str) -> Result<Url> {
    base.join(path).map_err(|err| Error::InvalidUrl(path.to_owned(), err))
}

fn read_env(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => {
            debug!("Read {} from environment", name);
            Some(value)
        }

        _ => None,
    }
}
