// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error types for the certificate rotation engine.
//!
//! This module defines the six error kinds a reconciler may return:
//! [`RotationError::Generation`], [`RotationError::ParseFailure`],
//! [`RotationError::PreconditionNotReady`], [`RotationError::ConflictExhausted`],
//! [`RotationError::PermissionDenied`], and [`RotationError::Cancelled`]. Each
//! reconciler returns at most one such error per tick; the orchestrator
//! aggregates them and stops at the first (see [`crate::orchestrator`]).

use thiserror::Error;

/// Errors returned by the rotation engine's reconcilers and arbiter.
#[derive(Error, Debug, Clone)]
pub enum RotationError {
    /// Cryptographic key/certificate generation failed. Retry next tick.
    #[error("certificate generation failed: {0}")]
    Generation(String),

    /// An existing record's PEM payload failed to parse. The caller should
    /// treat this as a forced-regeneration trigger, not a fatal error.
    #[error("failed to parse existing record: {0}")]
    ParseFailure(String),

    /// A precondition for this stage was not satisfied (nil signer, empty
    /// bundle). The orchestrator must stop; the next tick may recover.
    #[error("precondition not ready: {0}")]
    PreconditionNotReady(String),

    /// The concurrency arbiter exhausted its retry budget without
    /// converging on a write.
    #[error("conflict retries exhausted after {attempts} attempts: {reason}")]
    ConflictExhausted {
        /// Number of attempts made before giving up.
        attempts: u32,
        /// The underlying conflict or store error on the final attempt.
        reason: String,
    },

    /// The backing store refused the operation (RBAC, quota, etc.). Do not
    /// retry further this tick.
    #[error("storage denied the operation: {0}")]
    PermissionDenied(String),

    /// The operation's context was cancelled. Silent: no status update.
    #[error("operation cancelled")]
    Cancelled,
}

impl RotationError {
    /// Whether this error should mark the operator status `Degraded=True`.
    ///
    /// `ConflictExhausted` and `Generation` degrade status.
    /// `PreconditionNotReady` is a normal transient (e.g. first boot) and
    /// does not. `PermissionDenied` is surfaced but does not flip
    /// `Degraded`, since retrying this tick won't help. `Cancelled` is
    /// silent.
    #[must_use]
    pub fn degrades_status(&self) -> bool {
        matches!(self, Self::Generation(_) | Self::ConflictExhausted { .. })
    }

    /// Whether this error should be surfaced to the [`crate::status`] reporter at all.
    #[must_use]
    pub fn is_reportable(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }

    /// The event/status reason string for this error kind.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Generation(_) => "CertificateGenerationFailed",
            Self::ParseFailure(_) => "ExistingRecordUnparsable",
            Self::PreconditionNotReady(_) => "PreconditionNotReady",
            Self::ConflictExhausted { .. } => "ConflictRetriesExhausted",
            Self::PermissionDenied(_) => "StorageAccessDenied",
            Self::Cancelled => "Cancelled",
        }
    }
}
