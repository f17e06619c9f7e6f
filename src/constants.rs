// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the certificate rotation engine.
//!
//! This module contains the wire-contract strings (annotation keys, payload
//! keys, discovery label) and the numeric defaults used throughout the
//! codebase. The annotation and payload keys are a wire contract: they must
//! not be renamed or abbreviated, since external consumers (and peer
//! reconcilers racing on the same records) match on the exact strings.

use std::time::Duration;

// ============================================================================
// Annotation Keys (wire contract)
// ============================================================================

/// RFC-3339 timestamp marking the start of a certificate's validity window.
pub const ANNOTATION_NOT_BEFORE: &str = "auth.openshift.io/certificate-not-before";

/// RFC-3339 timestamp marking the end of a certificate's validity window.
pub const ANNOTATION_NOT_AFTER: &str = "auth.openshift.io/certificate-not-after";

/// Common Name of the certificate that issued this record's certificate.
pub const ANNOTATION_ISSUER: &str = "auth.openshift.io/certificate-issuer";

/// Comma-separated, sorted hostnames recorded for a serving target.
pub const ANNOTATION_HOSTNAMES: &str = "auth.openshift.io/certificate-hostnames";

/// `user:group,group` descriptor recorded for a client target.
pub const ANNOTATION_USER_DESCRIPTOR: &str = "auth.openshift.io/certificate-user";

/// Duration (and optionally humanized form) between issuance and proactive refresh.
pub const ANNOTATION_REFRESH_PERIOD: &str = "certificates.openshift.io/refresh-period";

/// Component that owns this record's lifecycle.
pub const ANNOTATION_OWNING_COMPONENT: &str = "openshift.io/owning-component";

/// Free-form human description of what this record is for.
pub const ANNOTATION_DESCRIPTION: &str = "openshift.io/description";

/// Marks records created by tests so they can be distinguished from production records.
pub const ANNOTATION_TEST_NAME: &str = "certificates.openshift.io/test-name";

// ============================================================================
// Payload Keys (wire contract)
// ============================================================================

/// PEM-encoded certificate chain, stored on Signing and Target records.
pub const PAYLOAD_TLS_CERT: &str = "tls.crt";

/// PEM-encoded private key (PKCS#1 or PKCS#8), stored on Signing and Target records.
pub const PAYLOAD_TLS_KEY: &str = "tls.key";

/// Concatenated PEM blob of every live signing CA, stored on the Bundle record.
pub const PAYLOAD_CA_BUNDLE: &str = "ca-bundle.crt";

// ============================================================================
// Discovery Label (wire contract)
// ============================================================================

/// Label used to discover managed certificate records without prior knowledge of their names.
pub const LABEL_MANAGED_CERTIFICATE_TYPE: &str = "auth.openshift.io/managed-certificate-type";

/// Value of [`LABEL_MANAGED_CERTIFICATE_TYPE`] for a Trust Bundle record.
pub const CERTIFICATE_TYPE_CA_BUNDLE: &str = "ca-bundle";

/// Value of [`LABEL_MANAGED_CERTIFICATE_TYPE`] for a Signing CA record.
pub const CERTIFICATE_TYPE_SIGNER: &str = "signer";

/// Value of [`LABEL_MANAGED_CERTIFICATE_TYPE`] for a Target Key Pair record.
pub const CERTIFICATE_TYPE_TARGET: &str = "target";

// ============================================================================
// Status Condition Constants
// ============================================================================

/// Condition status value indicating the controller has lost rotation progress.
pub const CONDITION_STATUS_TRUE: &str = "True";

/// Condition status value indicating rotation is proceeding normally.
pub const CONDITION_STATUS_FALSE: &str = "False";

/// Reason recorded on the degraded condition when rotation fails.
pub const REASON_ROTATION_ERROR: &str = "RotationError";

/// Reason recorded on the degraded condition when rotation is healthy.
pub const REASON_AS_EXPECTED: &str = "AsExpected";

// ============================================================================
// Event Reasons
// ============================================================================

/// Event reason emitted when a signer needs to be regenerated.
pub const EVENT_SIGNER_UPDATE_REQUIRED: &str = "SignerUpdateRequired";

/// Event reason emitted when a record is created for the first time.
pub const EVENT_SECRET_CREATED: &str = "SecretCreated";

/// Event reason emitted when an existing record is rewritten.
pub const EVENT_SECRET_UPDATED: &str = "SecretUpdated";

/// Event reason emitted when a tick ends in an error.
pub const EVENT_ROTATION_ERROR: &str = "RotationError";

// ============================================================================
// Policy Defaults
// ============================================================================

/// Default fraction of the validity window after which a proactive refresh is due (one half).
pub const DEFAULT_REFRESH_FRACTION_DENOMINATOR: u32 = 2;

// ============================================================================
// Concurrency Arbiter Defaults
// ============================================================================

/// Maximum number of conflict-retry attempts per write.
pub const ARBITER_MAX_ATTEMPTS: u32 = 10;

/// Approximate total time budget across all retry attempts for a single write.
pub const ARBITER_MAX_ELAPSED: Duration = Duration::from_secs(1);

/// Initial backoff interval before the first retry.
pub const ARBITER_INITIAL_INTERVAL: Duration = Duration::from_millis(10);

/// Backoff growth multiplier between retries.
pub const ARBITER_BACKOFF_MULTIPLIER: f64 = 1.8;

/// Randomization factor applied to each backoff interval (±20%).
pub const ARBITER_RANDOMIZATION_FACTOR: f64 = 0.2;
