//! The client credentials flow.
//!
//! [Spotify documentation on the client credentials flow.](https://developer.spotify.com/documentation/general/guides/authorization/client-credentials/).
//!
//! The flow authenticates only the application, so its tokens can't access any user data. There is no refresh token;
//! an expired token is replaced by simply repeating the request.

use log::debug;

use super::{
    accounts::{self, AccountsClient, ClientAuth},
    Grant,
};
use crate::{error::Result, scope::ScopeSet, token::Token};

#[derive(Debug, Default, Clone, Copy)]
pub struct ClientCredentials;

impl ClientCredentials {
    pub fn new() -> Self {
        Self
    }
}

impl Grant for ClientCredentials {
    fn name(&self) -> &'static str {
        "client credentials"
    }

    fn requires_client_secret(&self) -> bool {
        true
    }

    fn acquire(&self, accounts: &AccountsClient, scope: &ScopeSet) -> Result<Token> {
        debug!("Requesting access token for client credentials flow");

        let token_response = accounts
            .request_token(&[("grant_type", "client_credentials")], ClientAuth::Basic)
            .map_err(accounts::map_client_error)?;

        // client credentials tokens never carry a refresh token even if one was somehow returned
        Ok(token_response.into_token(scope, None).with_refresh_token(None::<String>))
    }
}
