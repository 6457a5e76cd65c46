//! Confidential-client token acquisition against Azure AD.
//!
//! The client authenticates with a signed client assertion derived from an
//! X.509 certificate (or, alternatively, a client secret), obtains an access
//! token through the client-credentials grant and uses it as a bearer
//! credential against a protected API.

use chrono::{DateTime, Duration, Utc};
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, warn};
use url::form_urlencoded;
use zeroize::Zeroizing;

mod api;
mod certificate;
mod error;
mod pipeline;
mod settings;

#[cfg(test)]
mod test_support;

pub use api::{join_endpoint, ApiClient};
pub use certificate::{AssertionClaims, Certificate, DEFAULT_ASSERTION_LIFETIME};
pub use error::Error;
pub use pipeline::{run, Outcome};
pub use settings::{Settings, CONFIG_PATH_VAR, DEFAULT_AUTHORITY_HOST, ENV_PREFIX};

const CLIENT_ID: &'static str = "client_id";
const SCOPES: &'static str = "scope";
const GRANT_TYPE: &'static str = "grant_type";
const CLIENT_CREDENTIALS_GRANT: &'static str = "client_credentials";
const CLIENT_ASSERTION_GRANT_TYPE: &'static str =
    "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";
const ASSERTION_TYPE: &'static str = "client_assertion_type";
const ASSERTION: &'static str = "client_assertion";
const CLIENT_SECRET: &'static str = "client_secret";
const TENANT_DISCOVERY_ENDPOINT: &'static str = "/v2.0/.well-known/openid-configuration";
const DEFAULT_SCOPE_SUFFIX: &'static str = "/.default";
const DEFAULT_TOKEN_TYPE: &'static str = "Bearer";

/// Formats a resource as the `.default` scope the client-credentials grant
/// expects.
pub fn format_scope(resource: &str) -> String {
    if resource.ends_with(DEFAULT_SCOPE_SUFFIX) {
        resource.to_string()
    } else {
        format!("{}{}", resource.trim_end_matches('/'), DEFAULT_SCOPE_SUFFIX)
    }
}

pub struct ConfidentialClient {
    client_id: String,
    authority: Authority,
    credential: ClientCredential,
    http: reqwest::Client,
}

/// How the client proves its identity to the token endpoint.
pub enum ClientCredential {
    Secret(SecretString),
    /// An assertion signed ahead of time; sent as is.
    Assertion(SecretString),
    /// Signs a new assertion for every token request.
    Certificate(Certificate),
}

impl ClientCredential {
    pub fn from_secret(client_secret: impl Into<String>) -> Self {
        ClientCredential::Secret(SecretString::from(client_secret.into()))
    }

    pub fn from_assertion(signed_assertion: impl Into<String>) -> Self {
        ClientCredential::Assertion(SecretString::from(signed_assertion.into()))
    }

    pub fn from_certificate(certificate: Certificate) -> Self {
        ClientCredential::Certificate(certificate)
    }
}

impl ConfidentialClient {
    pub fn new(
        client_id: impl Into<String>,
        authority: Authority,
        credential: ClientCredential,
    ) -> Self {
        ConfidentialClient {
            client_id: client_id.into(),
            authority,
            credential,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// Exchange the client credential for an access token through the
    /// client-credentials grant.
    pub async fn acquire_token_for_client(&self, scopes: &[&str]) -> Result<AccessToken, Error> {
        let scopes = scopes.join(" ");

        let mut parameters: Vec<(&str, &str)> = vec![
            (CLIENT_ID, self.client_id.as_str()),
            (SCOPES, scopes.as_str()),
            (GRANT_TYPE, CLIENT_CREDENTIALS_GRANT),
        ];

        let assertion;
        match &self.credential {
            ClientCredential::Secret(client_secret) => {
                parameters.push((CLIENT_SECRET, client_secret.expose_secret()));
            }
            ClientCredential::Assertion(signed) => {
                parameters.push((ASSERTION_TYPE, CLIENT_ASSERTION_GRANT_TYPE));
                parameters.push((ASSERTION, signed.expose_secret()));
            }
            ClientCredential::Certificate(certificate) => {
                assertion = Zeroizing::new(
                    certificate.create_assertion(&self.authority.token_endpoint, &self.client_id)?,
                );
                parameters.push((ASSERTION_TYPE, CLIENT_ASSERTION_GRANT_TYPE));
                parameters.push((ASSERTION, assertion.as_str()));
            }
        }

        let token_request_body = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(parameters)
            .finish();

        debug!(
            token_endpoint = %self.authority.token_endpoint,
            client_id = %self.client_id,
            scopes = %scopes,
            "requesting token for client"
        );

        let response = http_post(&self.http, &self.authority.token_endpoint, token_request_body)
            .await?;
        let status = response.status();
        let body = response.text().await?;

        let token_response: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            warn!(status = status.as_u16(), "token endpoint returned a malformed body");
            Error::Authentication {
                status,
                error: "invalid_response".to_string(),
                description: format!("token endpoint returned a malformed body: {}", e),
                error_codes: Vec::new(),
                correlation_id: None,
            }
        })?;

        token_response.into_access_token(status)
    }
}

#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    pub token_type: Option<String>,
    pub expires_in: Option<u64>,
    pub access_token: Option<String>,

    // Error
    pub error: Option<String>,
    pub error_description: Option<String>,
    pub error_codes: Option<Vec<u64>>,
    pub trace_id: Option<String>,
    pub correlation_id: Option<String>,
}

impl TokenResponse {
    fn into_access_token(self, status: StatusCode) -> Result<AccessToken, Error> {
        if !status.is_success() || self.error.is_some() {
            let error = self.error.unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("unknown_error")
                    .to_string()
            });
            warn!(
                status = status.as_u16(),
                error = %error,
                correlation_id = ?self.correlation_id,
                trace_id = ?self.trace_id,
                "token endpoint rejected the request"
            );
            return Err(Error::Authentication {
                status,
                error,
                description: self.error_description.unwrap_or_default(),
                error_codes: self.error_codes.unwrap_or_default(),
                correlation_id: self.correlation_id,
            });
        }

        let access_token = self.access_token.ok_or_else(|| Error::Authentication {
            status,
            error: "invalid_response".to_string(),
            description: "token response has no access_token".to_string(),
            error_codes: Vec::new(),
            correlation_id: self.correlation_id.clone(),
        })?;

        Ok(AccessToken::new(
            access_token,
            self.token_type
                .unwrap_or_else(|| DEFAULT_TOKEN_TYPE.to_string()),
            self.expires_in.unwrap_or_default(),
        ))
    }
}

/// A bearer token for the protected API. The value itself is only reachable
/// through [`AccessToken::secret`].
#[derive(Debug)]
pub struct AccessToken {
    secret: SecretString,
    token_type: String,
    expires_in: u64,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(secret: impl Into<String>, token_type: impl Into<String>, expires_in: u64) -> Self {
        let lifetime = Duration::seconds(expires_in.min(u64::from(u32::MAX)) as i64);
        let expires_at = Utc::now() + lifetime;
        AccessToken {
            secret: SecretString::from(secret.into()),
            token_type: token_type.into(),
            expires_in,
            expires_at,
        }
    }

    pub fn secret(&self) -> &SecretString {
        &self.secret
    }

    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    pub fn expires_in(&self) -> u64 {
        self.expires_in
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

async fn http_post(
    http: &reqwest::Client,
    url: &str,
    body: String,
) -> Result<reqwest::Response, reqwest::Error> {
    http.post(url)
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(body)
        .send()
        .await
}

#[derive(Deserialize)]
struct TenantDiscoveryResponse {
    authorization_endpoint: String,
    token_endpoint: String,
}

#[derive(Debug, Clone)]
pub struct Authority {
    pub authority_url: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
}

impl Authority {
    /// Derive the v2.0 endpoints of `tenant` on `host` without any network
    /// access.
    pub fn from_tenant(host: &str, tenant: &str) -> Self {
        let authority_url = format!("{}/{}", host.trim_end_matches('/'), tenant);

        Authority {
            authorization_endpoint: format!("{}/oauth2/v2.0/authorize", authority_url),
            token_endpoint: format!("{}/oauth2/v2.0/token", authority_url),
            authority_url,
        }
    }

    /// Read the endpoints from the tenant's OpenID configuration document.
    pub async fn discover(http: &reqwest::Client, authority_url: &str) -> Result<Self, Error> {
        let authority_url = authority_url.trim_end_matches('/');
        let discovery_url = format!("{}{}", authority_url, TENANT_DISCOVERY_ENDPOINT);
        debug!(url = %discovery_url, "discovering tenant endpoints");

        let response = http.get(&discovery_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::configuration(format!(
                "tenant discovery at {} failed with status {}",
                discovery_url, status
            )));
        }

        let body = response.bytes().await?;
        let tenant_discovery_response: TenantDiscoveryResponse = serde_json::from_slice(&body)
            .map_err(|e| {
                Error::configuration(format!(
                    "tenant discovery at {} returned an invalid document: {}",
                    discovery_url, e
                ))
            })?;

        Ok(Authority {
            authority_url: authority_url.to_string(),
            authorization_endpoint: tenant_discovery_response.authorization_endpoint,
            token_endpoint: tenant_discovery_response.token_endpoint,
        })
    }
}
