//! Throwaway certificates and a token endpoint that really checks the
//! assertions it is handed.

use std::collections::HashMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{Id, PKey, Private};
use openssl::rsa::Rsa;
use openssl::symm::Cipher;
use openssl::x509::{X509Builder, X509NameBuilder, X509};
use serde_json::json;
use wiremock::{Request, Respond, ResponseTemplate};

use crate::certificate::AssertionClaims;

pub struct TestCertificate {
    key: PKey<Private>,
    cert: X509,
}

impl TestCertificate {
    pub fn rsa() -> Self {
        let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
        Self::self_signed(key)
    }

    pub fn ec() -> Self {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();
        Self::self_signed(key)
    }

    fn self_signed(key: PKey<Private>) -> Self {
        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_text("CN", "aadclient-test").unwrap();
        let name = name.build();
        let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();

        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        builder.set_serial_number(&serial).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(1).unwrap())
            .unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();

        TestCertificate {
            key,
            cert: builder.build(),
        }
    }

    pub fn pkcs12(&self, password: &str) -> Vec<u8> {
        Pkcs12::builder()
            .name("aadclient-test")
            .pkey(&self.key)
            .cert(&self.cert)
            .build2(password)
            .unwrap()
            .to_der()
            .unwrap()
    }

    /// Private key followed by the certificate, encrypted when a password is
    /// given.
    pub fn pem(&self, password: Option<&str>) -> Vec<u8> {
        let mut pem = match password {
            Some(password) => self
                .key
                .private_key_to_pem_pkcs8_passphrase(Cipher::aes_256_cbc(), password.as_bytes())
                .unwrap(),
            None => self.key.private_key_to_pem_pkcs8().unwrap(),
        };
        pem.extend(self.cert.to_pem().unwrap());
        pem
    }

    pub fn thumbprint(&self) -> String {
        let digest = self.cert.digest(MessageDigest::sha1()).unwrap();
        URL_SAFE_NO_PAD.encode(&*digest)
    }

    fn decoding_key(&self) -> (Algorithm, DecodingKey) {
        let public = self.key.public_key_to_pem().unwrap();
        if self.key.id() == Id::RSA {
            (Algorithm::RS256, DecodingKey::from_rsa_pem(&public).unwrap())
        } else {
            (Algorithm::ES256, DecodingKey::from_ec_pem(&public).unwrap())
        }
    }

    pub fn verify(
        &self,
        assertion: &str,
        audience: &str,
    ) -> Result<AssertionClaims, jsonwebtoken::errors::Error> {
        let (algorithm, key) = self.decoding_key();
        verify(assertion, algorithm, &key, audience)
    }

    /// A token endpoint that issues `access_token` only for assertions signed
    /// by this certificate, addressed to `audience` and still valid.
    pub fn token_endpoint(&self, audience: &str, access_token: &str) -> VerifyingTokenEndpoint {
        let (algorithm, key) = self.decoding_key();
        VerifyingTokenEndpoint {
            algorithm,
            key,
            audience: audience.to_string(),
            access_token: access_token.to_string(),
        }
    }
}

fn verify(
    assertion: &str,
    algorithm: Algorithm,
    key: &DecodingKey,
    audience: &str,
) -> Result<AssertionClaims, jsonwebtoken::errors::Error> {
    let mut validation = Validation::new(algorithm);
    validation.set_audience(&[audience]);
    validation.set_required_spec_claims(&["exp", "nbf", "aud", "iss", "sub"]);
    validation.validate_nbf = true;

    jsonwebtoken::decode::<AssertionClaims>(assertion, key, &validation).map(|data| data.claims)
}

pub struct VerifyingTokenEndpoint {
    algorithm: Algorithm,
    key: DecodingKey,
    audience: String,
    access_token: String,
}

impl Respond for VerifyingTokenEndpoint {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let form: HashMap<String, String> = url::form_urlencoded::parse(&request.body)
            .into_owned()
            .collect();

        let Some(assertion) = form.get("client_assertion") else {
            return ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_request",
                "error_description": "AADSTS900144: The request body must contain the following parameter: 'client_assertion'.",
                "error_codes": [900144]
            }));
        };

        match verify(assertion, self.algorithm, &self.key, &self.audience) {
            Ok(_) => ResponseTemplate::new(200).set_body_json(json!({
                "token_type": "Bearer",
                "expires_in": 3599,
                "ext_expires_in": 3599,
                "access_token": self.access_token
            })),
            Err(e) => ResponseTemplate::new(401).set_body_json(json!({
                "error": "invalid_client",
                "error_description": format!("AADSTS700024: Client assertion is not valid: {}", e),
                "error_codes": [700024],
                "correlation_id": "0b7e8b1c-6f0e-4b8e-9a57-2f1b8c9d2a11"
            })),
        }
    }
}
