use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use tracing::{debug, warn};
use url::Url;

use crate::certificate::DEFAULT_ASSERTION_LIFETIME;
use crate::Error;

/// Prefix of every environment variable read into [`Settings`].
pub const ENV_PREFIX: &str = "AADCLIENT";

/// Names a configuration file to read before the environment.
pub const CONFIG_PATH_VAR: &str = "AADCLIENT_CONFIG";

const DEFAULT_CONFIG_FILE: &str = "aadclient.toml";

pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

const MAX_ASSERTION_LIFETIME: u64 = 3600;

/// Everything a run needs to know about the tenant, the app registration and
/// the protected API. Secrets stay wrapped so they never show up in `Debug`
/// output or logs.
#[derive(Debug, Deserialize)]
pub struct Settings {
    pub tenant_id: String,
    pub client_id: String,
    #[serde(default = "default_authority_host")]
    pub authority_host: String,
    /// Resolve endpoints through the tenant's OpenID configuration instead of
    /// deriving them from `authority_host`.
    #[serde(default)]
    pub discover_endpoints: bool,
    pub certificate_path: Option<PathBuf>,
    pub certificate_password: Option<SecretString>,
    pub client_secret: Option<SecretString>,
    pub api_base_url: Url,
    /// A list in files, or a comma-separated string in the environment.
    #[serde(default, deserialize_with = "string_or_list")]
    pub api_paths: Vec<String>,
    #[serde(default = "default_assertion_lifetime")]
    pub assertion_lifetime_secs: u64,
}

fn default_authority_host() -> String {
    DEFAULT_AUTHORITY_HOST.to_string()
}

fn default_assertion_lifetime() -> u64 {
    DEFAULT_ASSERTION_LIFETIME
}

fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrList {
        List(Vec<String>),
        String(String),
    }

    Ok(match StringOrList::deserialize(deserializer)? {
        StringOrList::List(paths) => paths,
        StringOrList::String(joined) => joined
            .split(',')
            .map(str::trim)
            .filter(|path| !path.is_empty())
            .map(str::to_string)
            .collect(),
    })
}

impl Settings {
    /// Read settings from the file named by `AADCLIENT_CONFIG` (or
    /// `aadclient.toml` if it exists), overridden by `AADCLIENT_*`
    /// environment variables.
    pub fn load() -> Result<Self, Error> {
        let file = match std::env::var_os(CONFIG_PATH_VAR) {
            Some(path) => Some(PathBuf::from(path)),
            None => {
                let path = PathBuf::from(DEFAULT_CONFIG_FILE);
                path.exists().then_some(path)
            }
        };

        Self::from_sources(file.as_deref(), None)
    }

    /// Assemble settings from an optional file and environment variables.
    /// `env_vars` replaces the process environment when given.
    ///
    /// Environment values are taken verbatim as strings, so a passphrase
    /// like `007` keeps its leading zero. The result is not validated;
    /// [`crate::run`] calls [`Settings::validate`] before doing any work.
    pub fn from_sources(
        file: Option<&Path>,
        env_vars: Option<config::Map<String, String>>,
    ) -> Result<Self, Error> {
        let mut builder = Config::builder();

        if let Some(path) = file {
            if !path.exists() {
                return Err(Error::configuration(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            let name = path.to_str().ok_or_else(|| {
                Error::configuration(format!("config path {} is not UTF-8", path.display()))
            })?;
            debug!(path = name, "reading config file");
            builder = builder.add_source(File::new(name, file_format(path)?));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .source(env_vars),
            )
            .build()?
            .try_deserialize()?;

        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.tenant_id.trim().is_empty() {
            return Err(Error::configuration("tenant_id must not be empty"));
        }
        if self.client_id.trim().is_empty() {
            return Err(Error::configuration("client_id must not be empty"));
        }
        if self.certificate_path.is_none() && self.client_secret.is_none() {
            return Err(Error::configuration(
                "either certificate_path or client_secret must be set",
            ));
        }
        if self.certificate_path.is_some() && self.client_secret.is_some() {
            warn!("both certificate_path and client_secret are set, using the certificate");
        }
        if !(1..=MAX_ASSERTION_LIFETIME).contains(&self.assertion_lifetime_secs) {
            return Err(Error::configuration(format!(
                "assertion_lifetime_secs must be between 1 and {}",
                MAX_ASSERTION_LIFETIME
            )));
        }
        if !matches!(self.api_base_url.scheme(), "http" | "https") {
            return Err(Error::configuration("api_base_url must be an http(s) url"));
        }
        Url::parse(&self.authority_host).map_err(|e| {
            Error::configuration(format!("authority_host is not a valid url: {}", e))
        })?;
        Ok(())
    }

    /// The `.default` scope of the protected API.
    pub fn scope(&self) -> String {
        crate::format_scope(self.api_base_url.as_str())
    }
}

fn file_format(path: &Path) -> Result<FileFormat, Error> {
    match path.extension().and_then(|s| s.to_str()) {
        Some("toml") => Ok(FileFormat::Toml),
        Some("yaml") | Some("yml") => Ok(FileFormat::Yaml),
        Some("json") => Ok(FileFormat::Json),
        _ => Err(Error::configuration(format!(
            "unsupported config file format: {}",
            path.display()
        ))),
    }
}
