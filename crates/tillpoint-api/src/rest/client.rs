// REST HTTP client
//
// Wraps `reqwest::Client` with URL construction under `/api/v1` and status
// mapping. Endpoint groups (auth, sales, health) are inherent methods in
// sibling files so this module stays about transport mechanics.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

const API_PREFIX: &str = "api/v1/";

/// HTTP client for the store backend.
///
/// Authentication is cookie based: the login response sets `access_token`
/// and `refresh_token`, and the jar replays them on every later request.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a client from a `TransportConfig`.
    ///
    /// A cookie jar is added when the config has none; the session cookie
    /// lives there. `base_url` is the server root, e.g. `http://10.0.0.5:8000`.
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let config = if transport.cookie_jar.is_some() {
            transport.clone()
        } else {
            transport.clone().with_cookie_jar()
        };
        let http = config.build_client()?;
        Ok(Self::with_client(http, base_url))
    }

    /// Create a client over a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self {
            http,
            base_url: with_trailing_slash(base_url),
        }
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// `{base}/api/v1/{path}`
    pub(crate) fn api_url(&self, path: &str) -> Result<Url, Error> {
        let relative = format!("{API_PREFIX}{}", path.trim_start_matches('/'));
        Ok(self.base_url.join(&relative)?)
    }

    /// `{base}/{path}`, outside the versioned API.
    pub(crate) fn root_url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    // ── Request helpers ──────────────────────────────────────────────

    pub(crate) async fn get<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, &str)],
    ) -> Result<T, Error> {
        debug!("GET {}", url);

        let resp = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(Error::Transport)?;

        let body = checked_body(resp).await?;
        decode(body)
    }

    pub(crate) async fn post<T: DeserializeOwned>(
        &self,
        url: Url,
        body: &impl Serialize,
    ) -> Result<T, Error> {
        debug!("POST {}", url);

        let resp = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(Error::Transport)?;

        let body = checked_body(resp).await?;
        decode(body)
    }

    /// POST without a body, ignoring whatever the server answers on success.
    pub(crate) async fn post_empty(&self, url: Url) -> Result<(), Error> {
        debug!("POST {}", url);

        let resp = self
            .http
            .post(url)
            .send()
            .await
            .map_err(Error::Transport)?;

        checked_body(resp).await.map(drop)
    }
}

/// Map the status to an error or return the body text.
async fn checked_body(resp: reqwest::Response) -> Result<String, Error> {
    let status = resp.status();
    let body = resp.text().await.map_err(Error::Transport)?;

    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(Error::Authentication {
            message: detail(&body)
                .unwrap_or_else(|| "session expired or invalid credentials".into()),
        });
    }

    if !status.is_success() {
        return Err(Error::Api {
            status: status.as_u16(),
            message: detail(&body).unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_owned()
            }),
        });
    }

    Ok(body)
}

fn decode<T: DeserializeOwned>(body: String) -> Result<T, Error> {
    serde_json::from_str(&body).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body,
    })
}

/// Pull the human-readable error out of a FastAPI-style `{"detail": ...}`
/// body. Validation errors carry a list there; it is rendered as JSON.
fn detail(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value.get("detail").or_else(|| value.get("message"))? {
        Value::String(text) => Some(text.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    fn client(base: &str) -> ApiClient {
        ApiClient::with_client(reqwest::Client::new(), Url::parse(base).unwrap())
    }

    #[test]
    fn api_urls_are_versioned() {
        let api = client("http://10.0.0.5:8000");
        assert_eq!(
            api.api_url("/user/me").unwrap().as_str(),
            "http://10.0.0.5:8000/api/v1/user/me"
        );
        assert_eq!(
            api.root_url("/health").unwrap().as_str(),
            "http://10.0.0.5:8000/health"
        );
    }

    #[test]
    fn base_path_is_preserved() {
        let api = client("https://store.example/pos");
        assert_eq!(
            api.api_url("sales/create").unwrap().as_str(),
            "https://store.example/pos/api/v1/sales/create"
        );
    }

    #[test]
    fn detail_extraction() {
        assert_eq!(
            detail(r#"{"detail":"Sale not found"}"#).as_deref(),
            Some("Sale not found")
        );
        assert_eq!(
            detail(r#"{"detail":[{"loc":["body"],"msg":"field required"}]}"#).as_deref(),
            Some(r#"[{"loc":["body"],"msg":"field required"}]"#)
        );
        assert_eq!(detail("<html>oops</html>"), None);
    }
}
