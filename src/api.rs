use reqwest::header::ACCEPT;
use secrecy::ExposeSecret;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::{AccessToken, Error};

/// Calls endpoints of the protected API with a bearer token.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(http: reqwest::Client, base_url: Url) -> Self {
        ApiClient { http, base_url }
    }

    pub fn endpoint(&self, path: &str) -> Result<Url, Error> {
        join_endpoint(&self.base_url, path)
    }

    /// GET `path` relative to the base url and parse the body as JSON.
    /// Any status outside 2xx is returned as [`Error::ApiCall`]; nothing is
    /// retried.
    pub async fn get_json(&self, path: &str, token: &AccessToken) -> Result<Value, Error> {
        let url = self.endpoint(path)?;
        debug!(url = %url, "calling protected endpoint");

        let response = self
            .http
            .get(url.clone())
            .header(ACCEPT, "application/json")
            .bearer_auth(token.secret().expose_secret())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(url = %url, status = status.as_u16(), "protected endpoint refused the call");
            return Err(Error::ApiCall {
                status,
                url: url.to_string(),
            });
        }

        let body = response.bytes().await?;
        let value = serde_json::from_slice(&body)?;
        info!(url = %url, status = status.as_u16(), "obtained response from protected endpoint");
        Ok(value)
    }
}

/// Resolve `path` below `base`, treating `base` as a directory whether or not
/// it ends in `/` and `path` as relative whether or not it starts with one.
pub fn join_endpoint(base: &Url, path: &str) -> Result<Url, Error> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let directory = format!("{}/", base.path());
        base.set_path(&directory);
    }

    base.join(path.trim_start_matches('/'))
        .map_err(|e| Error::configuration(format!("invalid endpoint path {}: {}", path, e)))
}
