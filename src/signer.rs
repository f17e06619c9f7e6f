// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The Signer Reconciler: maintains the signing CA record.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use tracing::{debug, info};

use crate::arbiter;
use crate::config::RotationConfig;
use crate::constants::{
    ANNOTATION_ISSUER, ANNOTATION_NOT_AFTER, ANNOTATION_NOT_BEFORE, ANNOTATION_REFRESH_PERIOD,
    CERTIFICATE_TYPE_SIGNER, LABEL_MANAGED_CERTIFICATE_TYPE, PAYLOAD_TLS_CERT, PAYLOAD_TLS_KEY,
};
use crate::crypto;
use crate::error::RotationError;
use crate::metadata::{apply_metadata, ensure_metadata};
use crate::policy::needs_regeneration;
use crate::record::SignerRecord;
use crate::store::{Record, RecordKind, RecordStore};

/// Why [`ensure_signer`] wrote a record this tick, distinguishing a
/// first-boot creation from a policy-driven regeneration from a metadata-only
/// patch, so the orchestrator can pick the right event reason.
#[derive(Debug, Clone)]
pub enum SignerWriteReason {
    /// No signer record existed yet.
    Created,
    /// The rotation policy decided regeneration was due; carries its reason
    /// string (e.g. "past its refresh time").
    Regenerated(String),
    /// Only the owner reference or annotation overlay drifted; the
    /// certificate itself is untouched.
    MetadataOnly,
}

/// Outcome of [`ensure_signer`]: the signer's cert/key PEM plus whether the
/// backing store was actually mutated this tick.
pub struct SignerOutcome {
    pub cert_pem: String,
    pub key_pem: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub wrote_record: bool,
    pub write_reason: Option<SignerWriteReason>,
}

fn unique_common_name() -> String {
    let nonce: u64 = rand::thread_rng().gen();
    format!("rotation-signer-{nonce:016x}")
}

fn build_desired_record(
    namespace: &str,
    name: &str,
    issued: &crypto::IssuedCertificate,
    refresh_period: &str,
    config: &RotationConfig,
) -> Record {
    let mut record = Record::new(namespace, name, RecordKind::TlsSecret);
    record
        .payload
        .insert(PAYLOAD_TLS_CERT.to_string(), issued.cert_pem.clone().into_bytes());
    record
        .payload
        .insert(PAYLOAD_TLS_KEY.to_string(), issued.key_pem.clone().into_bytes());
    record
        .annotations
        .insert(ANNOTATION_NOT_BEFORE.to_string(), issued.not_before.to_rfc3339());
    record
        .annotations
        .insert(ANNOTATION_NOT_AFTER.to_string(), issued.not_after.to_rfc3339());
    record
        .annotations
        .insert(ANNOTATION_REFRESH_PERIOD.to_string(), refresh_period.to_string());
    record
        .labels
        .insert(LABEL_MANAGED_CERTIFICATE_TYPE.to_string(), CERTIFICATE_TYPE_SIGNER.to_string());
    apply_metadata(&mut record, config.owner_reference.as_ref(), &config.additional_annotations);
    record
}

/// Ensures the signing CA record exists and is within its rotation
/// policy, returning its current cert/key and whether a write happened.
pub async fn ensure_signer(
    store: &dyn RecordStore,
    namespace: &str,
    name: &str,
    config: &RotationConfig,
) -> Result<SignerOutcome, RotationError> {
    let mut existing = store.get(namespace, name).await?;

    let wrong_type = existing
        .as_ref()
        .is_some_and(|r| r.kind != RecordKind::TlsSecret);

    if wrong_type && !config.update_only {
        debug!(namespace, name, "signer record has wrong storage type, recreating");
        store.delete(namespace, name).await?;
        existing = None;
    }

    let mut metadata_only_reasons: Vec<String> = Vec::new();
    let reason = match &existing {
        None => "no existing signer".to_string(),
        Some(_) if wrong_type && config.update_only => "wrong storage type (update-only)".to_string(),
        Some(record) => {
            let refresh_fraction = config.refresh_fraction_denominator();
            let policy_reason = needs_regeneration(
                &record.annotations,
                None,
                refresh_fraction,
                config.expiry_only,
                None,
                Utc::now(),
            );
            if !policy_reason.is_empty() {
                policy_reason
            } else {
                metadata_only_reasons =
                    ensure_metadata(record, config.owner_reference.as_ref(), &config.additional_annotations);
                String::new()
            }
        }
    };

    if reason.is_empty() && metadata_only_reasons.is_empty() {
        let record = existing.expect("no reason implies an existing record");
        let view = SignerRecord(&record);
        return Ok(SignerOutcome {
            cert_pem: view.cert_pem().unwrap_or_default().to_string(),
            key_pem: view.key_pem().unwrap_or_default().to_string(),
            not_before: view.not_before()?.ok_or_else(|| {
                RotationError::ParseFailure("signer missing notBefore".to_string())
            })?,
            not_after: view.not_after()?.ok_or_else(|| {
                RotationError::ParseFailure("signer missing notAfter".to_string())
            })?,
            wrote_record: false,
            write_reason: None,
        });
    }

    if reason.is_empty() {
        // Metadata-only: owner reference or annotation overlay drifted, but
        // the certificate itself is still within policy. Patch in place
        // without touching notBefore/notAfter.
        let record = existing.expect("metadata reasons imply an existing record");
        debug!(namespace, name, reasons = %metadata_only_reasons.join("; "), "signer metadata patch needed");
        let mut desired = record.clone();
        apply_metadata(&mut desired, config.owner_reference.as_ref(), &config.additional_annotations);
        let persisted = arbiter::update(store, &record, desired).await?;
        let view = SignerRecord(&persisted);
        return Ok(SignerOutcome {
            cert_pem: view.cert_pem().unwrap_or_default().to_string(),
            key_pem: view.key_pem().unwrap_or_default().to_string(),
            not_before: view.not_before()?.ok_or_else(|| {
                RotationError::ParseFailure("signer missing notBefore".to_string())
            })?,
            not_after: view.not_after()?.ok_or_else(|| {
                RotationError::ParseFailure("signer missing notAfter".to_string())
            })?,
            wrote_record: true,
            write_reason: Some(SignerWriteReason::MetadataOnly),
        });
    }

    debug!(namespace, name, reason, "signer regeneration needed");

    let now = Utc::now();
    let not_before = now - ChronoDuration::seconds(1);
    let not_after = now + ChronoDuration::from_std(config.validity).map_err(|e| {
        RotationError::Generation(format!("validity out of range: {e}"))
    })?;
    let common_name = unique_common_name();
    let issued = crypto::issue_self_signed_ca(&common_name, not_before, not_after, 0)?;

    let refresh_period = humantime_period(config.validity / config.refresh_fraction_denominator());
    let mut desired = build_desired_record(namespace, name, &issued, &refresh_period, config);
    desired
        .annotations
        .insert(ANNOTATION_ISSUER.to_string(), common_name.clone());

    let merger = |observed: &Record, desired: &Record| -> Option<Record> {
        let refresh_fraction = config.refresh_fraction_denominator();
        let observed_reason = needs_regeneration(
            &observed.annotations,
            None,
            refresh_fraction,
            config.expiry_only,
            None,
            Utc::now(),
        );
        if observed_reason.is_empty() {
            None
        } else {
            Some(desired.clone())
        }
    };

    let persisted = arbiter::create_or_update(store, namespace, name, desired, merger).await?;
    let view = SignerRecord(&persisted);
    info!(namespace, name, reason, "signer record written");

    let write_reason = if existing.is_none() {
        SignerWriteReason::Created
    } else {
        SignerWriteReason::Regenerated(reason)
    };

    Ok(SignerOutcome {
        cert_pem: view.cert_pem().unwrap_or_default().to_string(),
        key_pem: view.key_pem().unwrap_or_default().to_string(),
        not_before: view.not_before()?.unwrap_or(not_before),
        not_after: view.not_after()?.unwrap_or(not_after),
        wrote_record: true,
        write_reason: Some(write_reason),
    })
}

/// Formats a `Duration` as `##h##m##s`, the wire form for
/// [`ANNOTATION_REFRESH_PERIOD`].
fn humantime_period(duration: std::time::Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    format!("{hours}h{minutes}m{seconds}s")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use std::time::Duration;

    #[tokio::test]
    async fn cold_start_creates_signer() {
        let store = InMemoryStore::new();
        let config = RotationConfig::new(Duration::from_secs(86_400));
        let outcome = ensure_signer(&store, "ns", "signer", &config).await.unwrap();
        assert!(outcome.wrote_record);
        assert!(outcome.not_after > Utc::now());
        assert!(matches!(outcome.write_reason, Some(SignerWriteReason::Created)));
    }

    #[tokio::test]
    async fn steady_state_performs_no_write() {
        let store = InMemoryStore::new();
        let config = RotationConfig::new(Duration::from_secs(86_400));
        ensure_signer(&store, "ns", "signer", &config).await.unwrap();
        let second = ensure_signer(&store, "ns", "signer", &config).await.unwrap();
        assert!(!second.wrote_record);
    }

    #[tokio::test]
    async fn successive_regenerations_have_distinct_common_names() {
        let store = InMemoryStore::new();
        let config = RotationConfig::new(Duration::from_secs(2));
        let first = ensure_signer(&store, "ns", "signer", &config).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        // Force regeneration by writing an already-expired record directly.
        let mut record = store.get("ns", "signer").await.unwrap().unwrap();
        record
            .annotations
            .insert(ANNOTATION_NOT_AFTER.to_string(), (Utc::now() - ChronoDuration::seconds(1)).to_rfc3339());
        store.update(record).await.unwrap();

        let second = ensure_signer(&store, "ns", "signer", &config).await.unwrap();
        assert_ne!(first.cert_pem, second.cert_pem);
        assert!(matches!(second.write_reason, Some(SignerWriteReason::Regenerated(_))));
    }

    #[tokio::test]
    async fn refresh_deadline_regenerates_signer_before_expiry() {
        let store = InMemoryStore::new();
        let config = RotationConfig::new(Duration::from_secs(24 * 3_600));
        let first = ensure_signer(&store, "ns", "signer", &config).await.unwrap();

        // Backdate notBefore/notAfter so the record is past its refresh
        // deadline (half of a 24h validity) but not yet expired.
        let mut record = store.get("ns", "signer").await.unwrap().unwrap();
        let not_before = Utc::now() - ChronoDuration::hours(13);
        let not_after = not_before + ChronoDuration::hours(24);
        record
            .annotations
            .insert(ANNOTATION_NOT_BEFORE.to_string(), not_before.to_rfc3339());
        record
            .annotations
            .insert(ANNOTATION_NOT_AFTER.to_string(), not_after.to_rfc3339());
        store.update(record).await.unwrap();

        let second = ensure_signer(&store, "ns", "signer", &config).await.unwrap();
        assert_ne!(first.cert_pem, second.cert_pem);
        assert!(matches!(second.write_reason, Some(SignerWriteReason::Regenerated(reason)) if reason == "past its refresh time"));
    }

    #[tokio::test]
    async fn metadata_only_drift_does_not_reissue_certificate() {
        let store = InMemoryStore::new();
        let mut config = RotationConfig::new(Duration::from_secs(86_400));
        let first = ensure_signer(&store, "ns", "signer", &config).await.unwrap();

        config
            .additional_annotations
            .insert("openshift.io/owning-component".to_string(), "auth".to_string());
        let second = ensure_signer(&store, "ns", "signer", &config).await.unwrap();

        assert!(second.wrote_record);
        assert_eq!(first.cert_pem, second.cert_pem);
        assert_eq!(first.not_after, second.not_after);
        let record = store.get("ns", "signer").await.unwrap().unwrap();
        assert_eq!(
            record.annotations.get("openshift.io/owning-component").map(String::as_str),
            Some("auth")
        );
    }
}
