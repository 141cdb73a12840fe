// User session endpoints
//
// Login sets the session cookies in the client's jar; everything after that
// (including the live channel's upgrade request) rides on them.

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::debug;

use crate::error::Error;
use crate::rest::client::ApiClient;
use crate::rest::models::{LoginResponse, UserProfile};

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

impl ApiClient {
    /// Log in with username and password.
    ///
    /// `POST /api/v1/user/login`
    ///
    /// On success the backend sets `access_token` / `refresh_token` cookies.
    /// Wrong credentials and disabled accounts surface as
    /// [`Error::Authentication`] with the server's detail text.
    pub async fn login(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<LoginResponse, Error> {
        let url = self.api_url("user/login")?;
        debug!(username, "logging in");
        self.post(
            url,
            &LoginRequest {
                username,
                password: password.expose_secret(),
            },
        )
        .await
    }

    /// End the server-side session.
    ///
    /// `POST /api/v1/user/logout`
    pub async fn logout(&self) -> Result<(), Error> {
        let url = self.api_url("user/logout")?;
        debug!("logging out");
        self.post_empty(url).await
    }

    /// The user the session cookie belongs to.
    ///
    /// `GET /api/v1/user/me`
    pub async fn me(&self) -> Result<UserProfile, Error> {
        let url = self.api_url("user/me")?;
        self.get(url, &[]).await
    }
}
