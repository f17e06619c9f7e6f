// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Certificate generation and parsing.
//!
//! Certificate and key generation are deliberately delegated to existing
//! crates rather than implemented from scratch: this module only wires up
//! `rcgen` (for generation) and `x509-parser` (for inspecting existing PEM
//! payloads).

use chrono::{DateTime, Utc};
use rcgen::{BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair, SanType};

use crate::error::RotationError;

/// A generated key pair plus its self-signed or CA-signed certificate, PEM
/// encoded and ready to store.
pub struct IssuedCertificate {
    pub cert_pem: String,
    pub key_pem: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

fn chrono_to_offset(dt: DateTime<Utc>) -> Result<time::OffsetDateTime, RotationError> {
    time::OffsetDateTime::from_unix_timestamp(dt.timestamp())
        .map_err(|e| RotationError::Generation(format!("invalid timestamp: {e}")))
}

fn offset_to_chrono(dt: time::OffsetDateTime) -> DateTime<Utc> {
    DateTime::from_timestamp(dt.unix_timestamp(), 0).unwrap_or_else(Utc::now)
}

fn base_params(
    common_name: &str,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
) -> Result<CertificateParams, RotationError> {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    params.distinguished_name = dn;
    params.not_before = chrono_to_offset(not_before)?;
    params.not_after = chrono_to_offset(not_after)?;
    Ok(params)
}

/// Build a self-signed CA certificate, as used by the Signer Reconciler.
/// `path_len` bounds the number of intermediate CAs this signer may issue
/// further sub-signers under (0 means it may only issue leaves).
pub fn issue_self_signed_ca(
    common_name: &str,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    path_len: u8,
) -> Result<IssuedCertificate, RotationError> {
    let mut params = base_params(common_name, not_before, not_after)?;
    params.is_ca = IsCa::Ca(BasicConstraints::Constrained(path_len));
    params.key_usages = vec![
        rcgen::KeyUsagePurpose::KeyCertSign,
        rcgen::KeyUsagePurpose::DigitalSignature,
        rcgen::KeyUsagePurpose::KeyEncipherment,
    ];

    let key_pair = KeyPair::generate(&rcgen::PKCS_ECDSA_P256_SHA256)
        .map_err(|e| RotationError::Generation(format!("key generation failed: {e}")))?;
    params.alg = &rcgen::PKCS_ECDSA_P256_SHA256;
    params.key_pair = Some(key_pair);
    let cert = Certificate::from_params(params)
        .map_err(|e| RotationError::Generation(format!("CA params invalid: {e}")))?;
    let cert_pem = cert
        .serialize_pem()
        .map_err(|e| RotationError::Generation(format!("CA self-sign failed: {e}")))?;
    let key_pem = cert.serialize_private_key_pem();

    Ok(IssuedCertificate {
        cert_pem,
        key_pem,
        not_before,
        not_after,
    })
}

/// Subject Alternative Name set for a leaf certificate. Serving certs carry
/// DNS names; client certs carry nothing but still need *some* SAN or some
/// TLS stacks reject the handshake (see `other_examples`'s comment on this
/// exact point), so a single DNS name echoing the common name is used.
pub enum LeafSubject {
    Serving { hostnames: Vec<String> },
    Client { common_name: String },
    SubSigner { common_name: String, path_len: u8 },
}

/// Build and sign a leaf (or sub-signer) certificate against `issuer`, as
/// used by the Target Reconciler.
pub fn issue_signed_leaf(
    subject: &LeafSubject,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    issuer_cert_pem: &str,
    issuer_key_pem: &str,
) -> Result<IssuedCertificate, RotationError> {
    let common_name = match subject {
        LeafSubject::Serving { hostnames } => {
            hostnames.first().cloned().unwrap_or_else(|| "serving".to_string())
        }
        LeafSubject::Client { common_name } => common_name.clone(),
        LeafSubject::SubSigner { common_name, .. } => common_name.clone(),
    };

    let mut params = base_params(&common_name, not_before, not_after)?;
    match subject {
        LeafSubject::Serving { hostnames } => {
            params.subject_alt_names = hostnames
                .iter()
                .cloned()
                .map(SanType::DnsName)
                .collect();
            params.key_usages = vec![
                rcgen::KeyUsagePurpose::DigitalSignature,
                rcgen::KeyUsagePurpose::KeyEncipherment,
            ];
            params.extended_key_usages = vec![rcgen::ExtendedKeyUsagePurpose::ServerAuth];
            params.is_ca = IsCa::ExplicitNoCa;
        }
        LeafSubject::Client { common_name } => {
            params.subject_alt_names = vec![SanType::DnsName(common_name.clone())];
            params.key_usages = vec![rcgen::KeyUsagePurpose::DigitalSignature];
            params.extended_key_usages = vec![rcgen::ExtendedKeyUsagePurpose::ClientAuth];
            params.is_ca = IsCa::ExplicitNoCa;
        }
        LeafSubject::SubSigner { path_len, .. } => {
            params.is_ca = IsCa::Ca(BasicConstraints::Constrained(*path_len));
            params.key_usages = vec![
                rcgen::KeyUsagePurpose::KeyCertSign,
                rcgen::KeyUsagePurpose::CrlSign,
            ];
        }
    }

    let leaf_key_pair = KeyPair::generate(&rcgen::PKCS_ECDSA_P256_SHA256)
        .map_err(|e| RotationError::Generation(format!("key generation failed: {e}")))?;
    params.alg = &rcgen::PKCS_ECDSA_P256_SHA256;
    params.key_pair = Some(leaf_key_pair);
    let cert = Certificate::from_params(params)
        .map_err(|e| RotationError::Generation(format!("leaf params invalid: {e}")))?;

    let issuer_params = rcgen::CertificateParams::from_ca_cert_pem(issuer_cert_pem, issuer_key_pair(issuer_key_pem)?)
        .map_err(|e| RotationError::Generation(format!("issuer cert unparsable: {e}")))?;
    let issuer = Certificate::from_params(issuer_params)
        .map_err(|e| RotationError::Generation(format!("issuer params invalid: {e}")))?;

    let cert_pem = cert
        .serialize_pem_with_signer(&issuer)
        .map_err(|e| RotationError::Generation(format!("leaf signing failed: {e}")))?;
    let key_pem = cert.serialize_private_key_pem();

    Ok(IssuedCertificate {
        cert_pem,
        key_pem,
        not_before,
        not_after,
    })
}

fn issuer_key_pair(issuer_key_pem: &str) -> Result<KeyPair, RotationError> {
    KeyPair::from_pem(issuer_key_pem)
        .map_err(|e| RotationError::Generation(format!("issuer key unparsable: {e}")))
}

/// Validity window and CA-ness of a parsed certificate, extracted from an
/// existing PEM record to decide whether regeneration is due.
pub struct ParsedCertificate {
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub is_ca: bool,
    pub der: Vec<u8>,
}

/// Parse a single PEM-encoded certificate block.
pub fn parse_certificate_pem(pem: &str) -> Result<ParsedCertificate, RotationError> {
    let (_, pem_block) = x509_parser::pem::parse_x509_pem(pem.as_bytes())
        .map_err(|e| RotationError::ParseFailure(format!("invalid PEM: {e}")))?;
    let cert = pem_block
        .parse_x509()
        .map_err(|e| RotationError::ParseFailure(format!("invalid X.509 DER: {e}")))?;
    let validity = cert.validity();
    let not_before = DateTime::from_timestamp(validity.not_before.timestamp(), 0)
        .ok_or_else(|| RotationError::ParseFailure("not_before out of range".to_string()))?;
    let not_after = DateTime::from_timestamp(validity.not_after.timestamp(), 0)
        .ok_or_else(|| RotationError::ParseFailure("not_after out of range".to_string()))?;
    let is_ca = cert.is_ca();
    Ok(ParsedCertificate {
        not_before,
        not_after,
        is_ca,
        der: pem_block.contents.clone(),
    })
}

/// Split a concatenated PEM blob (the trust bundle payload) into individual
/// certificates, as needed by the Bundle Reconciler's dedupe/filter pass.
pub fn split_pem_bundle(bundle: &[u8]) -> Result<Vec<String>, RotationError> {
    let mut out = Vec::new();
    for pem in x509_parser::pem::Pem::iter_from_buffer(bundle) {
        let pem = pem.map_err(|e| RotationError::ParseFailure(format!("malformed bundle: {e}")))?;
        let encoded = pem_rcgen_reencode(&pem.contents)?;
        out.push(encoded);
    }
    Ok(out)
}

fn pem_rcgen_reencode(der: &[u8]) -> Result<String, RotationError> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    let encoded = STANDARD.encode(der);
    let mut body = String::from("-----BEGIN CERTIFICATE-----\n");
    for chunk in encoded.as_bytes().chunks(64) {
        body.push_str(std::str::from_utf8(chunk).unwrap());
        body.push('\n');
    }
    body.push_str("-----END CERTIFICATE-----\n");
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn self_signed_ca_roundtrips_through_parser() {
        let not_before = Utc::now() - Duration::minutes(5);
        let not_after = Utc::now() + Duration::days(365);
        let issued = issue_self_signed_ca("test-ca", not_before, not_after, 1).unwrap();
        let parsed = parse_certificate_pem(&issued.cert_pem).unwrap();
        assert!(parsed.is_ca);
        assert_eq!(parsed.not_after.timestamp(), not_after.timestamp());
    }

    #[test]
    fn leaf_signed_by_ca_is_not_ca() {
        let not_before = Utc::now() - Duration::minutes(5);
        let not_after = Utc::now() + Duration::days(90);
        let ca = issue_self_signed_ca("test-ca", not_before, not_after, 1).unwrap();
        let leaf = issue_signed_leaf(
            &LeafSubject::Serving {
                hostnames: vec!["svc.default.svc".to_string()],
            },
            not_before,
            not_after,
            &ca.cert_pem,
            &ca.key_pem,
        )
        .unwrap();
        let parsed = parse_certificate_pem(&leaf.cert_pem).unwrap();
        assert!(!parsed.is_ca);
    }

    #[test]
    fn split_pem_bundle_returns_each_cert() {
        let not_before = Utc::now() - Duration::minutes(5);
        let not_after = Utc::now() + Duration::days(365);
        let ca1 = issue_self_signed_ca("ca-1", not_before, not_after, 1).unwrap();
        let ca2 = issue_self_signed_ca("ca-2", not_before, not_after, 1).unwrap();
        let bundle = format!("{}{}", ca1.cert_pem, ca2.cert_pem);
        let split = split_pem_bundle(bundle.as_bytes()).unwrap();
        assert_eq!(split.len(), 2);
    }
}
