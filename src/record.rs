// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Typed views over the generic [`Record`], one per managed certificate
//! kind. Mirrors the "typed wrapper over a generic resource" idiom this
//! codebase used for its DNS record kinds: a thin struct that knows which
//! annotation/payload keys apply and exposes parsed accessors, while the
//! underlying storage representation stays uniform.

use chrono::{DateTime, Utc};

use crate::constants::{
    ANNOTATION_HOSTNAMES, ANNOTATION_ISSUER, ANNOTATION_NOT_AFTER, ANNOTATION_NOT_BEFORE,
    PAYLOAD_CA_BUNDLE, PAYLOAD_TLS_CERT, PAYLOAD_TLS_KEY,
};
use crate::error::RotationError;
use crate::store::Record;

fn parse_timestamp(record: &Record, key: &str) -> Result<Option<DateTime<Utc>>, RotationError> {
    match record.annotations.get(key) {
        None => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| RotationError::ParseFailure(format!("annotation {key} unparsable: {e}"))),
    }
}

/// A typed view over a Signing CA record.
pub struct SignerRecord<'a>(pub &'a Record);

impl<'a> SignerRecord<'a> {
    #[must_use]
    pub fn cert_pem(&self) -> Option<&str> {
        self.0
            .payload
            .get(PAYLOAD_TLS_CERT)
            .and_then(|b| std::str::from_utf8(b).ok())
    }

    #[must_use]
    pub fn key_pem(&self) -> Option<&str> {
        self.0
            .payload
            .get(PAYLOAD_TLS_KEY)
            .and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn not_before(&self) -> Result<Option<DateTime<Utc>>, RotationError> {
        parse_timestamp(self.0, ANNOTATION_NOT_BEFORE)
    }

    pub fn not_after(&self) -> Result<Option<DateTime<Utc>>, RotationError> {
        parse_timestamp(self.0, ANNOTATION_NOT_AFTER)
    }
}

/// A typed view over the Trust Bundle record.
pub struct BundleRecord<'a>(pub &'a Record);

impl<'a> BundleRecord<'a> {
    #[must_use]
    pub fn bundle_pem(&self) -> &[u8] {
        self.0
            .payload
            .get(PAYLOAD_CA_BUNDLE)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// A typed view over a Target Key Pair record (serving, client, or
/// sub-signer).
pub struct TargetRecord<'a>(pub &'a Record);

impl<'a> TargetRecord<'a> {
    #[must_use]
    pub fn cert_pem(&self) -> Option<&str> {
        self.0
            .payload
            .get(PAYLOAD_TLS_CERT)
            .and_then(|b| std::str::from_utf8(b).ok())
    }

    #[must_use]
    pub fn key_pem(&self) -> Option<&str> {
        self.0
            .payload
            .get(PAYLOAD_TLS_KEY)
            .and_then(|b| std::str::from_utf8(b).ok())
    }

    #[must_use]
    pub fn issuer_cn(&self) -> Option<&str> {
        self.0.annotations.get(ANNOTATION_ISSUER).map(String::as_str)
    }

    #[must_use]
    pub fn hostnames(&self) -> Vec<String> {
        self.0
            .annotations
            .get(ANNOTATION_HOSTNAMES)
            .map(|v| v.split(',').map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn not_before(&self) -> Result<Option<DateTime<Utc>>, RotationError> {
        parse_timestamp(self.0, ANNOTATION_NOT_BEFORE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RecordKind;

    #[test]
    fn signer_record_exposes_pem_payload() {
        let mut record = Record::new("ns", "signer", RecordKind::TlsSecret);
        record.payload.insert(PAYLOAD_TLS_CERT.to_string(), b"cert-bytes".to_vec());
        let view = SignerRecord(&record);
        assert_eq!(view.cert_pem(), Some("cert-bytes"));
    }

    #[test]
    fn target_record_parses_hostnames() {
        let mut record = Record::new("ns", "target", RecordKind::TlsSecret);
        record
            .annotations
            .insert(ANNOTATION_HOSTNAMES.to_string(), "a,b,c".to_string());
        let view = TargetRecord(&record);
        assert_eq!(view.hostnames(), vec!["a", "b", "c"]);
    }
}
