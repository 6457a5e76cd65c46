use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::info;

use crate::{
    AccessToken, ApiClient, Authority, Certificate, ClientCredential, ConfidentialClient, Error,
    Settings,
};

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// What a successful run produced.
#[derive(Debug)]
pub struct Outcome {
    pub access_token: AccessToken,
    /// One parsed body per configured API path, in order.
    pub responses: Vec<(String, Value)>,
}

/// Load the certificate, sign an assertion, exchange it for a token and call
/// every configured API path once.
///
/// Settings are validated and the certificate is loaded before any request
/// is sent, so a bad setting, file or passphrase never reaches the network. It is dropped as soon as the
/// assertion is signed.
pub async fn run(settings: &Settings) -> Result<Outcome, Error> {
    settings.validate()?;

    let certificate = match &settings.certificate_path {
        Some(path) => {
            let empty = SecretString::from(String::new());
            let passphrase = settings.certificate_password.as_ref().unwrap_or(&empty);
            let certificate = Certificate::load(path, passphrase)?;
            Some(certificate.with_lifetime(settings.assertion_lifetime_secs))
        }
        None => None,
    };

    let http = reqwest::Client::builder().user_agent(USER_AGENT).build()?;

    let authority = if settings.discover_endpoints {
        let authority_url = format!(
            "{}/{}",
            settings.authority_host.trim_end_matches('/'),
            settings.tenant_id
        );
        Authority::discover(&http, &authority_url).await?
    } else {
        Authority::from_tenant(&settings.authority_host, &settings.tenant_id)
    };

    let credential = match certificate {
        Some(certificate) => {
            let assertion =
                certificate.create_assertion(&authority.token_endpoint, &settings.client_id)?;
            info!(
                thumbprint = certificate.thumbprint(),
                "signed client assertion"
            );
            ClientCredential::from_assertion(assertion)
        }
        None => {
            let secret = settings
                .client_secret
                .as_ref()
                .ok_or_else(|| Error::configuration("no client credential configured"))?;
            ClientCredential::from_secret(secret.expose_secret())
        }
    };

    let client = ConfidentialClient::new(settings.client_id.as_str(), authority, credential)
        .with_http_client(http.clone());

    let scope = settings.scope();
    let access_token = client.acquire_token_for_client(&[scope.as_str()]).await?;
    info!(
        scope = %scope,
        expires_in = access_token.expires_in(),
        "acquired access token"
    );

    let api = ApiClient::new(http, settings.api_base_url.clone());
    let mut responses = Vec::with_capacity(settings.api_paths.len());
    for path in &settings.api_paths {
        let value = api.get_json(path, &access_token).await?;
        responses.push((path.clone(), value));
    }

    Ok(Outcome {
        access_token,
        responses,
    })
}
