// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The Status Reporter Interface: surfaces a single `<name>Degraded`
//! condition on an operator status object.
//!
//! Condition bookkeeping (create/compare/preserve `lastTransitionTime`)
//! follows the same helpers this codebase used for its resource status
//! conditions, trimmed to the one condition type the rotation engine emits.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::constants::{CONDITION_STATUS_FALSE, CONDITION_STATUS_TRUE, REASON_AS_EXPECTED, REASON_ROTATION_ERROR};
use crate::error::RotationError;

/// A single Kubernetes-style status condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub r#type: String,
    pub status: String,
    pub reason: Option<String>,
    pub message: Option<String>,
    pub last_transition_time: Option<String>,
}

/// Build the `<controller_name>Degraded` condition type string.
#[must_use]
pub fn degraded_condition_type(controller_name: &str) -> String {
    format!("{controller_name}Degraded")
}

/// Construct the condition reflecting a successful tick.
#[must_use]
pub fn healthy_condition(controller_name: &str) -> Condition {
    Condition {
        r#type: degraded_condition_type(controller_name),
        status: CONDITION_STATUS_FALSE.to_string(),
        reason: Some(REASON_AS_EXPECTED.to_string()),
        message: Some(String::new()),
        last_transition_time: Some(Utc::now().to_rfc3339()),
    }
}

/// Construct the condition reflecting a tick that ended in a
/// status-degrading error. Returns `None` for errors that must not
/// degrade status (`PreconditionNotReady`, `Cancelled`).
#[must_use]
pub fn error_condition(controller_name: &str, error: &RotationError) -> Option<Condition> {
    if !error.degrades_status() {
        return None;
    }
    Some(Condition {
        r#type: degraded_condition_type(controller_name),
        status: CONDITION_STATUS_TRUE.to_string(),
        reason: Some(REASON_ROTATION_ERROR.to_string()),
        message: Some(error.to_string()),
        last_transition_time: Some(Utc::now().to_rfc3339()),
    })
}

/// Whether `new_condition` differs from `existing` in type, status, or
/// message (`reason`/`lastTransitionTime` are not compared, matching the
/// convention that they change incidentally with the condition itself).
#[must_use]
pub fn condition_changed(existing: &Option<Condition>, new_condition: &Condition) -> bool {
    match existing {
        Some(current) => {
            current.r#type != new_condition.r#type
                || current.status != new_condition.status
                || current.message != new_condition.message
        }
        None => true,
    }
}

/// Find a condition by type.
#[must_use]
pub fn find_condition<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == condition_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precondition_not_ready_does_not_degrade() {
        let error = RotationError::PreconditionNotReady("signer is nil".to_string());
        assert!(error_condition("CertRotation", &error).is_none());
    }

    #[test]
    fn conflict_exhausted_degrades() {
        let error = RotationError::ConflictExhausted {
            attempts: 10,
            reason: "gave up".to_string(),
        };
        let condition = error_condition("CertRotation", &error).unwrap();
        assert_eq!(condition.status, CONDITION_STATUS_TRUE);
        assert_eq!(condition.reason.as_deref(), Some(REASON_ROTATION_ERROR));
    }

    #[test]
    fn condition_changed_ignores_reason_and_timestamp() {
        let a = healthy_condition("CertRotation");
        let mut b = a.clone();
        b.reason = Some("SomethingElse".to_string());
        b.last_transition_time = Some("2020-01-01T00:00:00Z".to_string());
        assert!(!condition_changed(&Some(a), &b));
    }
}
