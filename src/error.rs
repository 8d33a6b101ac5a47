use std::time::Duration;

use thiserror::Error;

use crate::model::error::{ApiError, AuthenticationErrorKind};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("The given state does not match the original state")]
    AuthorizationCodeStateMismatch,
    #[error("The user or the authorization server refused the authorization: {0}")]
    AuthorizationDenied(String),
    #[error("The redirect URL is missing the `{0}` parameter")]
    MissingRedirectParameter(&'static str),
    #[error("The client ID or client secret is invalid: {0}")]
    InvalidClient(String),
    #[error("The authorization code is invalid: {0}")]
    InvalidAuthorizationCode(String),
    #[error("The refresh token is invalid: {0}. The user should be reauthorized")]
    InvalidRefreshToken(String),
    #[error("Unhandled authentication error: {0:?}: {1}")]
    UnhandledAuthenticationError(AuthenticationErrorKind, String),
    #[error("The grant in use cannot refresh access tokens")]
    RefreshUnsupported,
    #[error("The access token expired and cannot be refreshed")]
    AccessTokenExpired,

    #[error("Missing credential: {0} is not set")]
    MissingCredential(&'static str),
    #[error("The grant requires a client secret but none was given")]
    MissingClientSecret,
    #[error("The grant requires a redirect URI but none was given")]
    MissingRedirectUri,
    #[error("Invalid URL {0:?}: {1}")]
    InvalidUrl(String, #[source] url::ParseError),

    #[error("Authorization callback server failed: {0}")]
    CallbackServer(#[source] std::io::Error),
    #[error("No authorization callback was received within {0:?}")]
    CallbackTimeout(Duration),

    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("The response body is not valid JSON: {0}")]
    MalformedResponse(#[source] serde_json::Error),
    #[error(transparent)]
    HttpError(#[from] reqwest::Error),
    #[error("Request to {url} failed after {attempts} attempt(s): {source}")]
    Transport {
        url: String,
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },
}

impl Error {
    /// Returns the HTTP status associated with this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Api(api_error) => Some(api_error.status),
            Error::HttpError(err) | Error::Transport { source: err, .. } => {
                err.status().map(|status| status.as_u16())
            }
            _ => None,
        }
    }

    /// Returns how many times the dispatcher sent the request before giving up, if this error came from it.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Error::Api(api_error) => Some(api_error.attempts),
            Error::Transport { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// Returns true if this error is a credential or authorization failure. These are never retried.
    pub fn is_authorization_error(&self) -> bool {
        matches!(
            self,
            Error::AuthorizationCodeStateMismatch
                | Error::AuthorizationDenied(_)
                | Error::MissingRedirectParameter(_)
                | Error::InvalidClient(_)
                | Error::InvalidAuthorizationCode(_)
                | Error::InvalidRefreshToken(_)
                | Error::UnhandledAuthenticationError(..)
                | Error::RefreshUnsupported
                | Error::AccessTokenExpired
        )
    }
}
