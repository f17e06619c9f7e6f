// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Rotation engine configuration: validity/refresh windows, flags, and the
//! additional annotation overlay a Rotation Task is constructed from.
//!
//! Follows the same env-var-with-default pattern `main.rs` uses for its
//! Kubernetes client tuning (`BINDY_KUBE_QPS`/`BINDY_KUBE_BURST`): each field
//! has an explicit-value constructor and a `from_env` fallback.

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::core::v1::OwnerReference;

/// Validity, refresh, and behavior flags for one (signer, bundle, target)
/// rotation task. Constructed once per orchestrator and reused across
/// ticks.
#[derive(Debug, Clone)]
pub struct RotationConfig {
    /// How long a freshly issued certificate is valid for.
    pub validity: Duration,
    /// Time after issuance at which a proactive refresh is due. Defaults to
    /// `validity / 2` when not set explicitly.
    pub refresh: Option<Duration>,
    /// When true, regeneration happens only after `notAfter`, never at the
    /// refresh deadline.
    pub expiry_only: bool,
    /// When true, forbids the delete-then-create path for a
    /// wrong-storage-type record; it is rewritten in place instead.
    pub update_only: bool,
    /// Annotation overlay applied by the Metadata Manager in addition to
    /// the lifecycle annotations the engine itself maintains.
    pub additional_annotations: BTreeMap<String, String>,
    /// Owner reference the engine is configured to maintain on every
    /// record it writes.
    pub owner_reference: Option<OwnerReference>,
}

impl RotationConfig {
    #[must_use]
    pub fn new(validity: Duration) -> Self {
        Self {
            validity,
            refresh: None,
            expiry_only: false,
            update_only: false,
            additional_annotations: BTreeMap::new(),
            owner_reference: None,
        }
    }

    /// The refresh fraction denominator implied by `validity`/`refresh`:
    /// `validity / refresh`, rounded down, minimum 1. Used by
    /// [`crate::policy::needs_regeneration`].
    #[must_use]
    pub fn refresh_fraction_denominator(&self) -> u32 {
        let refresh = self.refresh.unwrap_or_else(|| self.validity / 2);
        if refresh.is_zero() {
            return 1;
        }
        let ratio = self.validity.as_secs_f64() / refresh.as_secs_f64();
        (ratio.round() as u32).max(1)
    }

    /// Build configuration from environment variables, falling back to the
    /// given default validity when `ROTATE_VALIDITY_SECONDS` is unset.
    #[must_use]
    pub fn from_env(default_validity: Duration) -> Self {
        let validity = std::env::var("ROTATE_VALIDITY_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(default_validity);

        let refresh = std::env::var("ROTATE_REFRESH_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);

        let expiry_only = std::env::var("ROTATE_EXPIRY_ONLY")
            .ok()
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(false);

        let update_only = std::env::var("ROTATE_UPDATE_ONLY")
            .ok()
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(false);

        Self {
            validity,
            refresh,
            expiry_only,
            update_only,
            additional_annotations: BTreeMap::new(),
            owner_reference: None,
        }
    }
}
