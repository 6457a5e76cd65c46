//! Loading the signing certificate and turning it into client assertions.
//!
//! A client assertion is a short-lived JWT, signed with the certificate's
//! private key, that stands in for a client secret at the token endpoint
//! (RFC 7523). Azure AD finds the registered certificate through the `x5t`
//! header, so every assertion carries the SHA-1 thumbprint of the leaf
//! certificate.
//!
//! Certificates are read from PKCS#12 archives (`.pfx`, `.p12`) or from PEM
//! bundles holding both the private key and the certificate.

use std::fmt;
use std::path::Path;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{Id, PKey, Private};
use openssl::x509::X509;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::Error;

/// Validity window of a client assertion, in seconds.
pub const DEFAULT_ASSERTION_LIFETIME: u64 = 600;

/// A signing key together with the thumbprint of the certificate it belongs
/// to. Only the signing key derived from the private key is retained; the
/// decoded key material is wiped as soon as it has been handed over.
pub struct Certificate {
    encoding_key: EncodingKey,
    algorithm: Algorithm,
    thumbprint: String,
    lifetime: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AssertionClaims {
    pub aud: String,
    pub iss: String,
    pub sub: String,
    pub jti: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

impl Certificate {
    /// Load a certificate file, picking the format from its extension.
    pub fn load(path: impl AsRef<Path>, passphrase: &SecretString) -> Result<Self, Error> {
        let path = path.as_ref();
        let bytes = Zeroizing::new(std::fs::read(path).map_err(|e| {
            Error::configuration(format!("cannot read certificate {}: {}", path.display(), e))
        })?);

        debug!(path = %path.display(), "loading signing certificate");

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        match extension.as_deref() {
            Some("pem") | Some("crt") | Some("key") => Self::from_pem(&bytes, passphrase),
            _ => Self::from_pkcs12(&bytes, passphrase),
        }
    }

    pub fn from_pkcs12(der: &[u8], passphrase: &SecretString) -> Result<Self, Error> {
        let archive = Pkcs12::from_der(der).map_err(|e| {
            Error::configuration(format!("certificate is not a PKCS#12 archive: {}", e))
        })?;
        let parsed = archive.parse2(passphrase.expose_secret()).map_err(|_| {
            Error::configuration("cannot decrypt certificate: wrong passphrase or corrupt file")
        })?;

        let key = parsed
            .pkey
            .ok_or_else(|| Error::configuration("certificate has no private key"))?;
        let cert = parsed
            .cert
            .ok_or_else(|| Error::configuration("PKCS#12 archive holds no certificate"))?;

        Self::from_parts(&key, &cert)
    }

    /// Build from a PEM bundle. The passphrase is ignored when the private key
    /// is stored unencrypted.
    pub fn from_pem(pem: &[u8], passphrase: &SecretString) -> Result<Self, Error> {
        let cert = X509::from_pem(pem).map_err(|e| {
            Error::configuration(format!("PEM bundle holds no certificate: {}", e))
        })?;

        let key = PKey::private_key_from_pem_passphrase(
            pem,
            passphrase.expose_secret().as_bytes(),
        )
        .map_err(|_| {
            Error::configuration("cannot read private key: wrong passphrase or no key in bundle")
        })?;

        Self::from_parts(&key, &cert)
    }

    fn from_parts(key: &PKey<Private>, cert: &X509) -> Result<Self, Error> {
        let public = cert.public_key().map_err(openssl_error)?;
        if !key.public_eq(&public) {
            return Err(Error::configuration(
                "private key does not belong to the certificate",
            ));
        }

        let (algorithm, encoding_key) = if key.id() == Id::RSA {
            let der = Zeroizing::new(
                key.rsa()
                    .and_then(|rsa| rsa.private_key_to_der())
                    .map_err(openssl_error)?,
            );
            (Algorithm::RS256, EncodingKey::from_rsa_der(&der))
        } else if key.id() == Id::EC {
            let curve = key.ec_key().map_err(openssl_error)?.group().curve_name();
            let algorithm = if curve == Some(Nid::X9_62_PRIME256V1) {
                Algorithm::ES256
            } else if curve == Some(Nid::SECP384R1) {
                Algorithm::ES384
            } else {
                return Err(Error::configuration(
                    "unsupported elliptic curve, expected P-256 or P-384",
                ));
            };
            let der = Zeroizing::new(key.private_key_to_pkcs8().map_err(openssl_error)?);
            (algorithm, EncodingKey::from_ec_der(&der))
        } else {
            return Err(Error::configuration(
                "unsupported private key type, expected RSA or EC",
            ));
        };

        let digest = cert.digest(MessageDigest::sha1()).map_err(openssl_error)?;

        Ok(Certificate {
            encoding_key,
            algorithm,
            thumbprint: URL_SAFE_NO_PAD.encode(&*digest),
            lifetime: DEFAULT_ASSERTION_LIFETIME,
        })
    }

    pub fn with_lifetime(mut self, seconds: u64) -> Self {
        self.lifetime = seconds;
        self
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Base64url SHA-1 thumbprint of the certificate, as sent in `x5t`.
    pub fn thumbprint(&self) -> &str {
        &self.thumbprint
    }

    /// Sign a fresh assertion for `audience`, valid from now.
    pub fn create_assertion(&self, audience: &str, client_id: &str) -> Result<String, Error> {
        self.create_assertion_at(audience, client_id, Utc::now())
    }

    pub fn create_assertion_at(
        &self,
        audience: &str,
        client_id: &str,
        issued_at: DateTime<Utc>,
    ) -> Result<String, Error> {
        let mut header = Header::new(self.algorithm);
        header.x5t = Some(self.thumbprint.clone());

        let now = issued_at.timestamp();
        let claims = AssertionClaims {
            aud: audience.to_string(),
            iss: client_id.to_string(),
            sub: client_id.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now,
            nbf: now,
            exp: now + self.lifetime as i64,
        };

        jsonwebtoken::encode(&header, &claims, &self.encoding_key)
            .map_err(|e| Error::configuration(format!("cannot sign client assertion: {}", e)))
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("algorithm", &self.algorithm)
            .field("thumbprint", &self.thumbprint)
            .field("lifetime", &self.lifetime)
            .field("encoding_key", &"[redacted]")
            .finish()
    }
}

fn openssl_error(e: openssl::error::ErrorStack) -> Error {
    Error::configuration(format!("unusable certificate: {}", e))
}
