// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The Bundle Reconciler: maintains the trust bundle aggregating every live
//! signing CA.
//!
//! The merge rule is always additive with respect to unexpired signers —
//! never deleting a cert some other reconciler added unless it is expired or
//! a byte-identical duplicate: two peer orchestrators racing on the bundle
//! must each see the other's CA survive.

use chrono::Utc;
use tracing::debug;

use crate::arbiter;
use crate::config::RotationConfig;
use crate::constants::{CERTIFICATE_TYPE_CA_BUNDLE, LABEL_MANAGED_CERTIFICATE_TYPE, PAYLOAD_CA_BUNDLE};
use crate::crypto::{parse_certificate_pem, split_pem_bundle};
use crate::error::RotationError;
use crate::metadata::apply_metadata;
use crate::store::{Record, RecordKind, RecordStore};

/// Ensures the trust bundle contains every live signing CA.
/// `signer_cert_pems` is every signing CA certificate this reconciler
/// currently knows about (normally just the one it owns).
pub async fn ensure_bundle(
    store: &dyn RecordStore,
    namespace: &str,
    name: &str,
    signer_cert_pems: &[String],
    config: &RotationConfig,
) -> Result<Vec<String>, RotationError> {
    let existing = store.get(namespace, name).await?;
    let current_pems = match &existing {
        Some(record) => split_pem_bundle(
            record
                .payload
                .get(PAYLOAD_CA_BUNDLE)
                .map(Vec::as_slice)
                .unwrap_or_default(),
        )?,
        None => Vec::new(),
    };

    let merged = merge_and_filter(&current_pems, signer_cert_pems)?;
    if merged.is_empty() {
        return Err(RotationError::PreconditionNotReady("no live signers".to_string()));
    }

    let bundle_bytes = merged.concat().into_bytes();

    if let Some(record) = &existing {
        let unchanged = record.payload.get(PAYLOAD_CA_BUNDLE).map(Vec::as_slice) == Some(bundle_bytes.as_slice());
        if unchanged {
            debug!(namespace, name, "bundle unchanged, skipping write");
            return Ok(merged);
        }
    }

    let mut desired = Record::new(namespace, name, RecordKind::ConfigMap);
    desired.payload.insert(PAYLOAD_CA_BUNDLE.to_string(), bundle_bytes);
    desired
        .labels
        .insert(LABEL_MANAGED_CERTIFICATE_TYPE.to_string(), CERTIFICATE_TYPE_CA_BUNDLE.to_string());
    apply_metadata(&mut desired, config.owner_reference.as_ref(), &config.additional_annotations);

    let merger = |observed: &Record, _desired: &Record| -> Option<Record> {
        let observed_pems = split_pem_bundle(
            observed
                .payload
                .get(PAYLOAD_CA_BUNDLE)
                .map(Vec::as_slice)
                .unwrap_or_default(),
        )
        .ok()?;
        let remerged = merge_and_filter(&observed_pems, signer_cert_pems).ok()?;
        let remerged_bytes = remerged.concat().into_bytes();
        if observed.payload.get(PAYLOAD_CA_BUNDLE).map(Vec::as_slice) == Some(remerged_bytes.as_slice()) {
            return None;
        }
        let mut merged_record = observed.clone();
        merged_record.payload.insert(PAYLOAD_CA_BUNDLE.to_string(), remerged_bytes);
        Some(merged_record)
    };

    let persisted = arbiter::create_or_update(store, namespace, name, desired, merger).await?;
    split_pem_bundle(
        persisted
            .payload
            .get(PAYLOAD_CA_BUNDLE)
            .map(Vec::as_slice)
            .unwrap_or_default(),
    )
}

/// Append, filter-expired, dedupe-by-DER, and sort-by-DER-bytes. Pure,
/// reused by both the initial write and the conflict merger so both paths
/// converge to the same rule.
fn merge_and_filter(existing_pems: &[String], new_pems: &[String]) -> Result<Vec<String>, RotationError> {
    let now = Utc::now();
    let mut entries: Vec<(Vec<u8>, String)> = Vec::new();

    for pem in existing_pems.iter().chain(new_pems.iter()) {
        let parsed = parse_certificate_pem(pem)?;
        if parsed.not_after <= now {
            continue;
        }
        entries.push((parsed.der, pem.clone()));
    }

    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries.dedup_by(|a, b| a.0 == b.0);

    Ok(entries.into_iter().map(|(_, pem)| pem).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::issue_self_signed_ca;
    use crate::store::InMemoryStore;
    use chrono::Duration;
    use std::time::Duration as StdDuration;

    fn fresh_ca(cn: &str) -> String {
        let not_before = Utc::now() - Duration::minutes(5);
        let not_after = Utc::now() + Duration::days(365);
        issue_self_signed_ca(cn, not_before, not_after, 0).unwrap().cert_pem
    }

    #[tokio::test]
    async fn cold_start_creates_bundle_with_one_cert() {
        let store = InMemoryStore::new();
        let config = RotationConfig::new(StdDuration::from_secs(86_400));
        let ca = fresh_ca("ca-1");
        let merged = ensure_bundle(&store, "ns", "bundle", &[ca], &config).await.unwrap();
        assert_eq!(merged.len(), 1);
    }

    #[tokio::test]
    async fn two_parallel_writers_both_survive() {
        let store = InMemoryStore::new();
        let config = RotationConfig::new(StdDuration::from_secs(86_400));
        let ca1 = fresh_ca("ca-1");
        let ca2 = fresh_ca("ca-2");

        ensure_bundle(&store, "ns", "bundle", &[ca1.clone()], &config).await.unwrap();
        let merged = ensure_bundle(&store, "ns", "bundle", &[ca2.clone()], &config).await.unwrap();

        assert_eq!(merged.len(), 2);
        assert!(merged.contains(&ca1));
        assert!(merged.contains(&ca2));
    }

    /// Two orchestrators racing on the same bundle, actually concurrent via
    /// `tokio::spawn`/`join` rather than sequential calls: the conflict
    /// merger must keep both signers even when one writer's
    /// read-modify-write window overlaps the other's.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn two_concurrent_orchestrators_race_on_bundle_monotonically() {
        let store = InMemoryStore::new();
        let config = RotationConfig::new(StdDuration::from_secs(86_400));
        let cas: Vec<String> = (0..8).map(|i| fresh_ca(&format!("race-ca-{i}"))).collect();

        let mut tasks = Vec::new();
        for ca in cas.clone() {
            let store = store.clone();
            let config = config.clone();
            tasks.push(tokio::spawn(async move {
                ensure_bundle(&store, "ns", "bundle", std::slice::from_ref(&ca), &config).await
            }));
        }

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let record = store.get("ns", "bundle").await.unwrap().unwrap();
        let final_pems = split_pem_bundle(record.payload.get(PAYLOAD_CA_BUNDLE).unwrap()).unwrap();
        assert_eq!(final_pems.len(), cas.len());
        for ca in &cas {
            assert!(final_pems.contains(ca), "signer dropped under concurrent writes");
        }
    }

    #[tokio::test]
    async fn steady_state_skips_write_when_unchanged() {
        let store = InMemoryStore::new();
        let config = RotationConfig::new(StdDuration::from_secs(86_400));
        let ca = fresh_ca("ca-1");
        ensure_bundle(&store, "ns", "bundle", &[ca.clone()], &config).await.unwrap();
        let before = store.get("ns", "bundle").await.unwrap().unwrap().version;

        ensure_bundle(&store, "ns", "bundle", &[ca], &config).await.unwrap();
        let after = store.get("ns", "bundle").await.unwrap().unwrap().version;
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn expired_cert_is_filtered_out() {
        let store = InMemoryStore::new();
        let config = RotationConfig::new(StdDuration::from_secs(86_400));
        let expired = issue_self_signed_ca(
            "expired-ca",
            Utc::now() - Duration::days(10),
            Utc::now() - Duration::hours(1),
            0,
        )
        .unwrap()
        .cert_pem;
        let live = fresh_ca("live-ca");

        let merged = ensure_bundle(&store, "ns", "bundle", &[expired, live.clone()], &config)
            .await
            .unwrap();
        assert_eq!(merged, vec![live]);
    }
}
