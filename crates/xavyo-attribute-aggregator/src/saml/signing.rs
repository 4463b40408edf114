//! Signing credentials and signature algorithms for XML-DSig

use base64::{engine::general_purpose::STANDARD, Engine};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::sign::{Signer, Verifier};
use openssl::x509::X509;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while signing or verifying XML messages
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("Invalid certificate: {0}")]
    Certificate(String),

    #[error("Invalid private key: {0}")]
    PrivateKey(String),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("XML canonicalization failed: {0}")]
    Canonicalization(String),

    #[error("Malformed signature: {0}")]
    MalformedSignature(String),

    #[error("Signature operation failed: {0}")]
    Crypto(String),

    #[error("Signature verification failed: {0}")]
    VerificationFailed(String),
}

/// RSA signature algorithms accepted for attribute queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignatureAlgorithm {
    RsaSha1,
    #[default]
    RsaSha256,
    RsaSha384,
    RsaSha512,
}

impl SignatureAlgorithm {
    /// XML-DSig `SignatureMethod` URI
    #[must_use]
    pub fn uri(&self) -> &'static str {
        match self {
            Self::RsaSha1 => "http://www.w3.org/2000/09/xmldsig#rsa-sha1",
            Self::RsaSha256 => "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256",
            Self::RsaSha384 => "http://www.w3.org/2001/04/xmldsig-more#rsa-sha384",
            Self::RsaSha512 => "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512",
        }
    }

    #[must_use]
    pub fn message_digest(&self) -> MessageDigest {
        match self {
            Self::RsaSha1 => MessageDigest::sha1(),
            Self::RsaSha256 => MessageDigest::sha256(),
            Self::RsaSha384 => MessageDigest::sha384(),
            Self::RsaSha512 => MessageDigest::sha512(),
        }
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = SigningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http://www.w3.org/2000/09/xmldsig#rsa-sha1" => Ok(Self::RsaSha1),
            "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256" => Ok(Self::RsaSha256),
            "http://www.w3.org/2001/04/xmldsig-more#rsa-sha384" => Ok(Self::RsaSha384),
            "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512" => Ok(Self::RsaSha512),
            other => Err(SigningError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

/// Digest algorithm from an XML-DSig `DigestMethod` URI
pub(crate) fn digest_from_uri(uri: &str) -> Result<MessageDigest, SigningError> {
    match uri {
        "http://www.w3.org/2000/09/xmldsig#sha1" => Ok(MessageDigest::sha1()),
        "http://www.w3.org/2001/04/xmlenc#sha256" => Ok(MessageDigest::sha256()),
        "http://www.w3.org/2001/04/xmldsig-more#sha384" => Ok(MessageDigest::sha384()),
        "http://www.w3.org/2001/04/xmlenc#sha512" => Ok(MessageDigest::sha512()),
        other => Err(SigningError::UnsupportedAlgorithm(other.to_string())),
    }
}

/// Requester key pair used to sign outgoing attribute queries
#[derive(Clone)]
pub struct SigningCredentials {
    certificate: X509,
    private_key: PKey<Private>,
}

impl SigningCredentials {
    /// Load credentials from a PEM certificate and a PEM private key
    pub fn from_pem(certificate_pem: &str, private_key_pem: &str) -> Result<Self, SigningError> {
        let certificate = parse_certificate(certificate_pem)?;
        let private_key = PKey::private_key_from_pem(private_key_pem.as_bytes())
            .map_err(|e| SigningError::PrivateKey(e.to_string()))?;

        Ok(Self {
            certificate,
            private_key,
        })
    }

    /// Certificate as base64 DER, the form carried in `ds:X509Certificate`
    pub fn certificate_base64_der(&self) -> Result<String, SigningError> {
        let der = self
            .certificate
            .to_der()
            .map_err(|e| SigningError::Certificate(e.to_string()))?;
        Ok(STANDARD.encode(der))
    }

    /// Sign raw bytes with the private key
    pub fn sign(&self, algorithm: SignatureAlgorithm, data: &[u8]) -> Result<Vec<u8>, SigningError> {
        let mut signer = Signer::new(algorithm.message_digest(), &self.private_key)
            .map_err(|e| SigningError::Crypto(e.to_string()))?;
        signer
            .update(data)
            .map_err(|e| SigningError::Crypto(e.to_string()))?;
        signer
            .sign_to_vec()
            .map_err(|e| SigningError::Crypto(e.to_string()))
    }
}

impl fmt::Debug for SigningCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningCredentials")
            .field("subject", &self.certificate.subject_name())
            .finish_non_exhaustive()
    }
}

/// Parse an X.509 certificate given as PEM or as bare base64 DER
pub fn parse_certificate(pem: &str) -> Result<X509, SigningError> {
    let pem_data = if pem.contains("-----BEGIN CERTIFICATE-----") {
        pem.to_string()
    } else {
        let body: String = pem.split_whitespace().collect();
        format!("-----BEGIN CERTIFICATE-----\n{body}\n-----END CERTIFICATE-----")
    };

    X509::from_pem(pem_data.as_bytes()).map_err(|e| SigningError::Certificate(e.to_string()))
}

/// Verify `signature` over `data` against any of the trusted certificates
pub fn verify_with_certificates(
    certificates: &[X509],
    algorithm: SignatureAlgorithm,
    data: &[u8],
    signature: &[u8],
) -> Result<(), SigningError> {
    if certificates.is_empty() {
        return Err(SigningError::VerificationFailed(
            "no trusted certificate available".to_string(),
        ));
    }

    for cert in certificates {
        let public_key = cert
            .public_key()
            .map_err(|e| SigningError::Certificate(e.to_string()))?;
        let mut verifier = Verifier::new(algorithm.message_digest(), &public_key)
            .map_err(|e| SigningError::Crypto(e.to_string()))?;
        verifier
            .update(data)
            .map_err(|e| SigningError::Crypto(e.to_string()))?;
        if verifier.verify(signature).unwrap_or(false) {
            return Ok(());
        }
    }

    Err(SigningError::VerificationFailed(
        "signature does not match any trusted certificate".to_string(),
    ))
}
