//! The [Token](Token) snapshot handed out by token providers and its persisted form, the
//! [CacheRecord](CacheRecord).

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::scope::ScopeSet;

pub const BEARER: &str = "Bearer";

/// An immutable access token snapshot.
///
/// A token is fresh until `expires_at` minus a safety margin, after which it has to be refreshed or reacquired before
/// it may be attached to a request again. The access and refresh values are secrets and are redacted from the `Debug`
/// output.
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    access_token: String,
    token_type: String,
    scope: ScopeSet,
    expires_at: OffsetDateTime,
    refresh_token: Option<String>,
}

/// The externally persisted form of a [Token].
///
/// Serializes as a JSON object with the keys `access_token`, `token_type`, `scope`, `expires_in`, `expires_at` (a
/// Unix timestamp) and `refresh_token`. `refresh_token` is always written, as `null` when the token has none, so a
/// record written by a grant without refresh values can't be mistaken for one whose refresh value was lost.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub scope: ScopeSet,
    /// Seconds the token had left when the record was written. Informational only, `expires_at` is authoritative.
    #[serde(default)]
    pub expires_in: i64,
    #[serde(with = "time::serde::timestamp")]
    pub expires_at: OffsetDateTime,
    pub refresh_token: Option<String>,
}

impl Token {
    pub fn new<S>(access_token: S, scope: ScopeSet, expires_at: OffsetDateTime) -> Self
    where
        S: Into<String>,
    {
        Self {
            access_token: access_token.into(),
            token_type: String::from(BEARER),
            scope,
            expires_at,
            refresh_token: None,
        }
    }

    /// Builds a token that expires `expires_in` seconds from now.
    pub fn expiring_in<S>(access_token: S, scope: ScopeSet, expires_in: u64) -> Self
    where
        S: Into<String>,
    {
        let expires_in = i64::try_from(expires_in).unwrap_or(i64::MAX);
        let expires_at = OffsetDateTime::now_utc().saturating_add(time::Duration::seconds(expires_in));

        Self::new(access_token, scope, expires_at)
    }

    pub fn with_refresh_token<S>(self, refresh_token: Option<S>) -> Self
    where
        S: Into<String>,
    {
        Self {
            refresh_token: refresh_token.map(Into::into),
            ..self
        }
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    pub fn scope(&self) -> &ScopeSet {
        &self.scope
    }

    pub fn expires_at(&self) -> OffsetDateTime {
        self.expires_at
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    /// Returns true if the token expires within `margin` of `now`.
    pub fn is_expired_at(&self, now: OffsetDateTime, margin: Duration) -> bool {
        now.saturating_add(time::Duration::try_from(margin).unwrap_or(time::Duration::MAX)) >= self.expires_at
    }

    /// Returns true if the token expires within `margin` of the current instant.
    pub fn is_expired(&self, margin: Duration) -> bool {
        self.is_expired_at(OffsetDateTime::now_utc(), margin)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("expires_at", &self.expires_at)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl CacheRecord {
    pub fn into_token(self) -> Token {
        Token {
            access_token: self.access_token,
            token_type: self.token_type,
            scope: self.scope,
            expires_at: self.expires_at,
            refresh_token: self.refresh_token,
        }
    }
}

impl From<&Token> for CacheRecord {
    fn from(token: &Token) -> Self {
        let expires_in = (token.expires_at - OffsetDateTime::now_utc()).whole_seconds().max(0);

        Self {
            access_token: token.access_token.clone(),
            token_type: token.token_type.clone(),
            scope: token.scope.clone(),
            expires_in,
            expires_at: token.expires_at,
            refresh_token: token.refresh_token.clone(),
        }
    }
}

impl From<CacheRecord> for Token {
    fn from(record: CacheRecord) -> Self {
        record.into_token()
    }
}

impl fmt::Debug for CacheRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheRecord")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("expires_in", &self.expires_in)
            .field("expires_at", &self.expires_at)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .finish()
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
    fn expiry_honours_margin() {
        let now = OffsetDateTime::now_utc();
        let token = Token::new("access", ScopeSet::new(), now + time::Duration::seconds(30));

        assert!(!token.is_expired_at(now, Duration::ZERO));
        assert!(token.is_expired_at(now, Duration::from_secs(60)));
        assert!(token.is_expired_at(now + time::Duration::seconds(30), Duration::ZERO));
    }

    #[test]
    fn record_json_shape() {
        let token = Token::expiring_in("access", ScopeSet::from([Scope::UserReadEmail]), 3600)
            .with_refresh_token(Some("refresh"));
        let json = serde_json::to_value(CacheRecord::from(&token)).unwrap();

        assert_eq!(json["access_token"], "access");
        assert_eq!(json["token_type"], "Bearer");
        assert_eq!(json["scope"], "user-read-email");
        assert_eq!(json["refresh_token"], "refresh");
        assert_eq!(json["expires_at"], token.expires_at().unix_timestamp());
        assert!(json["expires_in"].as_i64().unwrap() > 3500);
    }

    #[test]
    fn missing_refresh_token_is_written_as_null() {
        let token = Token::expiring_in("access", ScopeSet::new(), 3600);
        let json = serde_json::to_value(CacheRecord::from(&token)).unwrap();

        assert!(json.as_object().unwrap().contains_key("refresh_token"));
        assert!(json["refresh_token"].is_null());
    }

    #[test]
    fn record_reads_minimal_json() {
        let record: CacheRecord =
            serde_json::from_str(r#"{"access_token": "a", "expires_at": 1700000000, "refresh_token": null}"#).unwrap();
        let token = record.into_token();

        assert_eq!(token.token_type(), BEARER);
        assert!(token.scope().is_empty());
        assert_eq!(token.expires_at().unix_timestamp(), 1_700_000_000);
        assert_eq!(token.refresh_token(), None);
    }

    #[test]
    fn debug_redacts_secrets() {
        let token = Token::expiring_in("very-secret-access", ScopeSet::new(), 60).with_refresh_token(Some("r-secret"));
        let debug = format!("{:?}", token);

        assert!(!debug.contains("very-secret-access"));
        assert!(!debug.contains("r-secret"));
    }
}
