// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The Target Reconciler: issues leaf key pairs using the current signer,
//! and the `TargetKind` tagged-variant design in place of open
//! inheritance.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::watch;
use tracing::debug;

use crate::arbiter;
use crate::config::RotationConfig;
use crate::constants::{
    ANNOTATION_HOSTNAMES, ANNOTATION_ISSUER, ANNOTATION_NOT_AFTER, ANNOTATION_NOT_BEFORE,
    ANNOTATION_REFRESH_PERIOD, ANNOTATION_USER_DESCRIPTOR, CERTIFICATE_TYPE_TARGET,
    LABEL_MANAGED_CERTIFICATE_TYPE, PAYLOAD_TLS_CERT, PAYLOAD_TLS_KEY,
};
use crate::crypto::{self, LeafSubject};
use crate::error::RotationError;
use crate::metadata::{apply_metadata, ensure_metadata};
use crate::policy::{needs_regeneration, TargetInputs};
use crate::record::TargetRecord;
use crate::store::{Record, RecordKind, RecordStore};

/// The three certificate shapes a target reconciler can produce. Each
/// variant carries exactly the inputs its `build_certificate` needs; this
/// is a tagged sum type with a common capability set, in place of open
/// subclassing.
#[derive(Debug, Clone)]
pub enum TargetKind {
    Serving { hostnames: Vec<String> },
    Client { user: String, groups: Vec<String> },
    Signer { common_name: String, path_len: u8 },
}

impl TargetKind {
    /// The `TargetInputs` this kind contributes to the rotation policy's
    /// decision on whether a target needs regeneration.
    fn target_inputs(&self) -> TargetInputs {
        match self {
            Self::Serving { hostnames } => {
                let mut sorted = hostnames.clone();
                sorted.sort();
                TargetInputs {
                    desired_hostnames: Some(sorted),
                    desired_user_descriptor: None,
                }
            }
            Self::Client { user, groups } => TargetInputs {
                desired_hostnames: None,
                desired_user_descriptor: Some(format!("{user}:{}", groups.join(","))),
            },
            Self::Signer { .. } => TargetInputs::default(),
        }
    }

    fn leaf_subject(&self) -> LeafSubject {
        match self {
            Self::Serving { hostnames } => LeafSubject::Serving {
                hostnames: hostnames.clone(),
            },
            Self::Client { user, .. } => LeafSubject::Client {
                common_name: user.clone(),
            },
            Self::Signer { common_name, path_len } => LeafSubject::SubSigner {
                common_name: common_name.clone(),
                path_len: *path_len,
            },
        }
    }

    /// A recheck channel fires when this target's desired inputs change out
    /// from under a running orchestrator loop (serving targets only).
    /// Returns both halves: the caller keeps the sender
    /// wherever the desired hostnames actually come from (a Service watch, a
    /// config reload) and hands the receiver to
    /// [`crate::orchestrator::spawn_recheck_merge_task`].
    #[must_use]
    pub fn recheck_channel(&self) -> Option<(watch::Sender<Vec<String>>, watch::Receiver<Vec<String>>)> {
        match self {
            Self::Serving { hostnames } => Some(watch::channel(hostnames.clone())),
            _ => None,
        }
    }
}

/// The signer inputs a target is signed against.
pub struct SignerContext<'a> {
    pub cert_pem: &'a str,
    pub key_pem: &'a str,
    pub common_name: &'a str,
    pub not_before: DateTime<Utc>,
}

/// Outcome of [`ensure_target`].
pub struct TargetOutcome {
    pub cert_pem: String,
    pub wrote_record: bool,
}

/// Ensures a target's leaf key pair exists, is signed by the current
/// signer, and matches its desired inputs.
pub async fn ensure_target(
    store: &dyn RecordStore,
    namespace: &str,
    name: &str,
    kind: &TargetKind,
    signer: &SignerContext<'_>,
    bundle_pems: &[String],
    config: &RotationConfig,
) -> Result<TargetOutcome, RotationError> {
    if bundle_pems.is_empty() {
        return Err(RotationError::PreconditionNotReady("bundle is empty".to_string()));
    }
    if !bundle_pems.iter().any(|pem| pem == signer.cert_pem) {
        return Err(RotationError::PreconditionNotReady(
            "bundle not yet updated".to_string(),
        ));
    }

    let mut existing = store.get(namespace, name).await?;
    let wrong_type = existing.as_ref().is_some_and(|r| r.kind != RecordKind::TlsSecret);
    if wrong_type && !config.update_only {
        debug!(namespace, name, "target record has wrong storage type, recreating");
        store.delete(namespace, name).await?;
        existing = None;
    }

    let mut metadata_only_reasons: Vec<String> = Vec::new();
    let reason = match &existing {
        None => "no existing target".to_string(),
        Some(_) if wrong_type && config.update_only => "wrong storage type (update-only)".to_string(),
        Some(record) => {
            let refresh_fraction = config.refresh_fraction_denominator();
            let target_view = TargetRecord(record);
            let target_not_before = target_view.not_before()?;
            let policy_reason = needs_regeneration(
                &record.annotations,
                Some(signer.not_before),
                refresh_fraction,
                config.expiry_only,
                Some(&kind.target_inputs()),
                Utc::now(),
            );

            let issuer_changed = match (target_view.issuer_cn(), target_not_before) {
                (Some(recorded_issuer), Some(target_nb)) => {
                    recorded_issuer != signer.common_name && signer.not_before > target_nb
                }
                _ => false,
            };

            if !policy_reason.is_empty() {
                policy_reason
            } else if issuer_changed {
                "signer changed".to_string()
            } else {
                metadata_only_reasons =
                    ensure_metadata(record, config.owner_reference.as_ref(), &config.additional_annotations);
                String::new()
            }
        }
    };

    if reason.is_empty() && metadata_only_reasons.is_empty() {
        let record = existing.expect("no reason implies an existing record");
        return Ok(TargetOutcome {
            cert_pem: TargetRecord(&record).cert_pem().unwrap_or_default().to_string(),
            wrote_record: false,
        });
    }

    if reason.is_empty() {
        // Metadata-only: policy and issuer both still match, only the
        // owner reference or annotation overlay drifted. Patch in place
        // without reissuing the leaf or touching notBefore/notAfter.
        let record = existing.expect("metadata reasons imply an existing record");
        debug!(namespace, name, reasons = %metadata_only_reasons.join("; "), "target metadata patch needed");
        let mut desired = record.clone();
        apply_metadata(&mut desired, config.owner_reference.as_ref(), &config.additional_annotations);
        let persisted = arbiter::update(store, &record, desired).await?;
        return Ok(TargetOutcome {
            cert_pem: TargetRecord(&persisted).cert_pem().unwrap_or_default().to_string(),
            wrote_record: true,
        });
    }

    debug!(namespace, name, reason, "target regeneration needed");

    let not_before = Utc::now() - ChronoDuration::seconds(1);
    let not_after = Utc::now()
        + ChronoDuration::from_std(config.validity)
            .map_err(|e| RotationError::Generation(format!("validity out of range: {e}")))?;
    let clamped_not_before = not_before.max(signer.not_before);

    let issued = crypto::issue_signed_leaf(
        &kind.leaf_subject(),
        clamped_not_before,
        not_after,
        signer.cert_pem,
        signer.key_pem,
    )?;

    let chained_cert_pem = match kind {
        TargetKind::Signer { .. } => format!("{}{}", issued.cert_pem, signer.cert_pem),
        TargetKind::Serving { .. } | TargetKind::Client { .. } => issued.cert_pem.clone(),
    };

    let mut desired = Record::new(namespace, name, RecordKind::TlsSecret);
    desired
        .payload
        .insert(PAYLOAD_TLS_CERT.to_string(), chained_cert_pem.into_bytes());
    desired
        .payload
        .insert(PAYLOAD_TLS_KEY.to_string(), issued.key_pem.clone().into_bytes());
    desired
        .annotations
        .insert(ANNOTATION_NOT_BEFORE.to_string(), issued.not_before.to_rfc3339());
    desired
        .annotations
        .insert(ANNOTATION_NOT_AFTER.to_string(), issued.not_after.to_rfc3339());
    desired
        .annotations
        .insert(ANNOTATION_ISSUER.to_string(), signer.common_name.to_string());
    desired.labels.insert(
        LABEL_MANAGED_CERTIFICATE_TYPE.to_string(),
        CERTIFICATE_TYPE_TARGET.to_string(),
    );

    match kind {
        TargetKind::Serving { hostnames } => {
            let mut sorted = hostnames.clone();
            sorted.sort();
            desired
                .annotations
                .insert(ANNOTATION_HOSTNAMES.to_string(), sorted.join(","));
        }
        TargetKind::Client { user, groups } => {
            desired.annotations.insert(
                ANNOTATION_USER_DESCRIPTOR.to_string(),
                format!("{user}:{}", groups.join(",")),
            );
        }
        TargetKind::Signer { .. } => {}
    }

    let refresh_period_secs = config.validity.as_secs() / u64::from(config.refresh_fraction_denominator().max(1));
    desired.annotations.insert(
        ANNOTATION_REFRESH_PERIOD.to_string(),
        format!(
            "{}h{}m{}s",
            refresh_period_secs / 3600,
            (refresh_period_secs % 3600) / 60,
            refresh_period_secs % 60
        ),
    );

    apply_metadata(&mut desired, config.owner_reference.as_ref(), &config.additional_annotations);

    let kind_for_merge = kind.clone();
    let signer_cn = signer.common_name.to_string();
    let signer_not_before = signer.not_before;
    let refresh_fraction = config.refresh_fraction_denominator();
    let expiry_only = config.expiry_only;

    let merger = move |observed: &Record, desired: &Record| -> Option<Record> {
        let observed_view = TargetRecord(observed);
        let observed_not_before = observed_view.not_before().ok().flatten();
        let policy_reason = needs_regeneration(
            &observed.annotations,
            Some(signer_not_before),
            refresh_fraction,
            expiry_only,
            Some(&kind_for_merge.target_inputs()),
            Utc::now(),
        );
        let issuer_changed = match (observed_view.issuer_cn(), observed_not_before) {
            (Some(recorded), Some(observed_nb)) => recorded != signer_cn && signer_not_before > observed_nb,
            _ => false,
        };
        if policy_reason.is_empty() && !issuer_changed {
            None
        } else {
            Some(desired.clone())
        }
    };

    let persisted = arbiter::create_or_update(store, namespace, name, desired, merger).await?;
    Ok(TargetOutcome {
        cert_pem: TargetRecord(&persisted).cert_pem().unwrap_or_default().to_string(),
        wrote_record: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::issue_self_signed_ca;
    use crate::store::InMemoryStore;
    use chrono::Duration;
    use std::time::Duration as StdDuration;

    fn fresh_signer() -> (crypto::IssuedCertificate, String) {
        let not_before = Utc::now() - Duration::minutes(5);
        let not_after = Utc::now() + Duration::days(365);
        let cn = "signer-cn".to_string();
        (issue_self_signed_ca(&cn, not_before, not_after, 0).unwrap(), cn)
    }

    #[tokio::test]
    async fn rejects_when_bundle_empty() {
        let store = InMemoryStore::new();
        let config = RotationConfig::new(StdDuration::from_secs(86_400));
        let (issued, cn) = fresh_signer();
        let signer = SignerContext {
            cert_pem: &issued.cert_pem,
            key_pem: &issued.key_pem,
            common_name: &cn,
            not_before: issued.not_before,
        };
        let kind = TargetKind::Serving {
            hostnames: vec!["svc.default.svc".to_string()],
        };
        let result = ensure_target(&store, "ns", "target", &kind, &signer, &[], &config).await;
        assert!(matches!(result, Err(RotationError::PreconditionNotReady(_))));
    }

    #[tokio::test]
    async fn cold_start_creates_serving_target() {
        let store = InMemoryStore::new();
        let config = RotationConfig::new(StdDuration::from_secs(86_400));
        let (issued, cn) = fresh_signer();
        let signer = SignerContext {
            cert_pem: &issued.cert_pem,
            key_pem: &issued.key_pem,
            common_name: &cn,
            not_before: issued.not_before,
        };
        let kind = TargetKind::Serving {
            hostnames: vec!["svc.default.svc".to_string()],
        };
        let bundle = vec![issued.cert_pem.clone()];
        let outcome = ensure_target(&store, "ns", "target", &kind, &signer, &bundle, &config)
            .await
            .unwrap();
        assert!(outcome.wrote_record);
    }

    #[tokio::test]
    async fn hostname_change_forces_regeneration() {
        let store = InMemoryStore::new();
        let config = RotationConfig::new(StdDuration::from_secs(86_400));
        let (issued, cn) = fresh_signer();
        let signer = SignerContext {
            cert_pem: &issued.cert_pem,
            key_pem: &issued.key_pem,
            common_name: &cn,
            not_before: issued.not_before,
        };
        let bundle = vec![issued.cert_pem.clone()];

        let kind_a = TargetKind::Serving {
            hostnames: vec!["a".to_string()],
        };
        ensure_target(&store, "ns", "target", &kind_a, &signer, &bundle, &config)
            .await
            .unwrap();

        let kind_ab = TargetKind::Serving {
            hostnames: vec!["a".to_string(), "b".to_string()],
        };
        let second = ensure_target(&store, "ns", "target", &kind_ab, &signer, &bundle, &config)
            .await
            .unwrap();
        assert!(second.wrote_record);

        let record = store.get("ns", "target").await.unwrap().unwrap();
        assert_eq!(
            record.annotations.get(ANNOTATION_HOSTNAMES).map(String::as_str),
            Some("a,b")
        );
    }

    #[tokio::test]
    async fn client_target_reaches_steady_state() {
        let store = InMemoryStore::new();
        let config = RotationConfig::new(StdDuration::from_secs(86_400));
        let (issued, cn) = fresh_signer();
        let signer = SignerContext {
            cert_pem: &issued.cert_pem,
            key_pem: &issued.key_pem,
            common_name: &cn,
            not_before: issued.not_before,
        };
        let kind = TargetKind::Client {
            user: "alice".to_string(),
            groups: vec!["system:authenticated".to_string()],
        };
        let bundle = vec![issued.cert_pem.clone()];

        ensure_target(&store, "ns", "target", &kind, &signer, &bundle, &config)
            .await
            .unwrap();
        let second = ensure_target(&store, "ns", "target", &kind, &signer, &bundle, &config)
            .await
            .unwrap();
        assert!(!second.wrote_record, "client target must reach steady state");
    }

    #[tokio::test]
    async fn client_group_change_forces_regeneration() {
        let store = InMemoryStore::new();
        let config = RotationConfig::new(StdDuration::from_secs(86_400));
        let (issued, cn) = fresh_signer();
        let signer = SignerContext {
            cert_pem: &issued.cert_pem,
            key_pem: &issued.key_pem,
            common_name: &cn,
            not_before: issued.not_before,
        };
        let bundle = vec![issued.cert_pem.clone()];

        let kind_a = TargetKind::Client {
            user: "alice".to_string(),
            groups: vec!["readers".to_string()],
        };
        ensure_target(&store, "ns", "target", &kind_a, &signer, &bundle, &config)
            .await
            .unwrap();

        let kind_b = TargetKind::Client {
            user: "alice".to_string(),
            groups: vec!["readers".to_string(), "writers".to_string()],
        };
        let second = ensure_target(&store, "ns", "target", &kind_b, &signer, &bundle, &config)
            .await
            .unwrap();
        assert!(second.wrote_record);

        let record = store.get("ns", "target").await.unwrap().unwrap();
        assert_eq!(
            record.annotations.get(ANNOTATION_USER_DESCRIPTOR).map(String::as_str),
            Some("alice:readers,writers")
        );
    }

    #[tokio::test]
    async fn sub_signer_target_stores_chain_in_order() {
        let store = InMemoryStore::new();
        let config = RotationConfig::new(StdDuration::from_secs(86_400));
        let (issued, cn) = fresh_signer();
        let signer = SignerContext {
            cert_pem: &issued.cert_pem,
            key_pem: &issued.key_pem,
            common_name: &cn,
            not_before: issued.not_before,
        };
        let kind = TargetKind::Signer {
            common_name: "sub-signer".to_string(),
            path_len: 0,
        };
        let bundle = vec![issued.cert_pem.clone()];

        let outcome = ensure_target(&store, "ns", "target", &kind, &signer, &bundle, &config)
            .await
            .unwrap();

        assert!(
            outcome.cert_pem.ends_with(&issued.cert_pem),
            "chain must end with the parent signer's cert"
        );
        assert!(
            outcome.cert_pem.len() > issued.cert_pem.len(),
            "chain must also carry the sub-CA's own cert ahead of the parent's"
        );
        assert!(outcome.cert_pem.starts_with("-----BEGIN CERTIFICATE-----"));
    }

    #[test]
    fn only_serving_targets_expose_a_recheck_channel() {
        let serving = TargetKind::Serving {
            hostnames: vec!["a".to_string()],
        };
        assert!(serving.recheck_channel().is_some());

        let client = TargetKind::Client {
            user: "u".to_string(),
            groups: vec![],
        };
        assert!(client.recheck_channel().is_none());

        let signer = TargetKind::Signer {
            common_name: "cn".to_string(),
            path_len: 0,
        };
        assert!(signer.recheck_channel().is_none());
    }

    #[tokio::test]
    async fn metadata_only_drift_does_not_reissue_certificate() {
        let store = InMemoryStore::new();
        let mut config = RotationConfig::new(StdDuration::from_secs(86_400));
        let (issued, cn) = fresh_signer();
        let signer = SignerContext {
            cert_pem: &issued.cert_pem,
            key_pem: &issued.key_pem,
            common_name: &cn,
            not_before: issued.not_before,
        };
        let kind = TargetKind::Serving {
            hostnames: vec!["svc.default.svc".to_string()],
        };
        let bundle = vec![issued.cert_pem.clone()];

        let first = ensure_target(&store, "ns", "target", &kind, &signer, &bundle, &config)
            .await
            .unwrap();

        config
            .additional_annotations
            .insert("openshift.io/owning-component".to_string(), "auth".to_string());
        let second = ensure_target(&store, "ns", "target", &kind, &signer, &bundle, &config)
            .await
            .unwrap();

        assert!(second.wrote_record);
        assert_eq!(first.cert_pem, second.cert_pem);
        let record = store.get("ns", "target").await.unwrap().unwrap();
        assert_eq!(
            record.annotations.get("openshift.io/owning-component").map(String::as_str),
            Some("auth")
        );
    }
}
