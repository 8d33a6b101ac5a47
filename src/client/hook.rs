use std::time::Duration;

use reqwest::{Method, Url};

use super::retry::RetryReason;

/// Observes the requests the [SpotifyClient](crate::client::SpotifyClient) sends. Every method does nothing by
/// default. The access token is never passed to the hook.
pub trait RequestHook: Send + Sync {
    /// Called before each attempt is sent. `attempt` counts from 1.
    fn on_request(&self, _method: &Method, _url: &Url, _attempt: u32) {}

    /// Called when a response arrives, whatever its status.
    fn on_response(&self, _method: &Method, _url: &Url, _status: u16, _elapsed: Duration) {}

    /// Called before sleeping ahead of a retry.
    fn on_retry(&self, _method: &Method, _url: &Url, _reason: &RetryReason, _delay: Duration) {}
}
