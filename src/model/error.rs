use std::fmt;

use serde::{de::Visitor, Deserialize};

use crate::error::Error;

/// Error body returned by the accounts service for failed token requests.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct AuthenticationErrorResponse {
    pub error: AuthenticationErrorKind,
    #[serde(default)]
    pub error_description: String,
}

/// Error body returned by the Web API, e.g. `{"error": {"status": 404, "message": "Not found."}}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct ApiErrorResponse {
    pub error: ApiErrorBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct ApiErrorBody {
    #[allow(dead_code)]
    pub status: Option<u16>,
    pub message: ApiErrorMessage,
    pub reason: Option<String>,
}

/// The `error` field of an OAuth2 error response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticationErrorKind {
    InvalidRequest,
    InvalidClient,
    InvalidGrant,
    UnauthorizedClient,
    UnsupportedGrantType,
    InvalidScope,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub(crate) enum ApiErrorMessage {
    PermissionsMissing,
    TokenExpired,

    Other(String),
}

/// A terminal, non-2xx response from the Web API.
///
/// Carries everything a caller needs to implement its own backoff on top of the dispatcher: the HTTP status, the
/// API-supplied error code (Spotify's `reason` field) if the body could be parsed, the server's message, and the
/// `Retry-After` value of rate-limit responses.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("HTTP {status} for {url}: {message}")]
pub struct ApiError {
    pub status: u16,
    pub code: Option<String>,
    pub message: String,
    pub retry_after: Option<u64>,
    pub url: String,
    /// How many times the request was sent before giving up.
    pub attempts: u32,
}

impl AuthenticationErrorResponse {
    pub fn into_unhandled_error(self) -> Error {
        Error::UnhandledAuthenticationError(self.error, self.error_description)
    }
}

impl ApiErrorMessage {
    fn as_str(&self) -> &str {
        match self {
            ApiErrorMessage::PermissionsMissing => "Permissions missing",
            ApiErrorMessage::TokenExpired => "The access token expired",
            ApiErrorMessage::Other(message) => message,
        }
    }
}

impl ApiError {
    /// Builds an error from a response's status and raw body. The body is parsed as a Web API error if possible,
    /// otherwise it's used verbatim as the message.
    pub(crate) fn from_body(status: u16, body: &str, url: &str, retry_after: Option<u64>, attempts: u32) -> Self {
        let (code, message) = match serde_json::from_str::<ApiErrorResponse>(body) {
            Ok(response) => (response.error.reason, response.error.message.as_str().to_owned()),
            Err(_) if body.trim().is_empty() => (None, String::from("error")),
            Err(_) => (None, body.trim().to_owned()),
        };

        Self {
            status,
            code,
            message,
            retry_after,
            url: url.to_owned(),
            attempts,
        }
    }

    /// Returns true if the error is a 429 rate-limit response.
    pub fn is_rate_limit(&self) -> bool {
        self.status == 429
    }

    /// Returns true if the endpoint requires a scope the token wasn't granted.
    pub fn is_missing_scope(&self) -> bool {
        self.status == 403 && self.message == ApiErrorMessage::PermissionsMissing.as_str()
    }
}

/// Returns true if the given body is a 401 response stating the access token expired.
pub(crate) fn is_token_expired_body(body: &str) -> bool {
    serde_json::from_str::<ApiErrorResponse>(body)
        .map(|response| response.error.message == ApiErrorMessage::TokenExpired)
        .unwrap_or(false)
}

impl<'de> Deserialize<'de> for ApiErrorMessage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct ApiErrorMessageVisitor;

        impl<'de> Visitor<'de> for ApiErrorMessageVisitor {
            type Value = ApiErrorMessage;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a string")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                self.visit_string(v.to_owned())
            }

            fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                match v.as_str() {
                    "Permissions missing" => Ok(ApiErrorMessage::PermissionsMissing),
                    // the API has used both of these over time
                    "The access token expired" | "Token expired" => Ok(ApiErrorMessage::TokenExpired),

                    _ => Ok(ApiErrorMessage::Other(v)),
                }
            }
        }

        deserializer.deserialize_str(ApiErrorMessageVisitor)
    }
}
