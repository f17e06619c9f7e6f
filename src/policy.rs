// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The Rotation Policy: a pure decision function over a record's
//! annotations, the current signer, and the configured refresh window.
//!
//! `needs_regeneration` never touches storage or the clock's wall-time
//! except through its `now` parameter, so every branch in the eight-step
//! decision order is independently testable.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::constants::{
    ANNOTATION_HOSTNAMES, ANNOTATION_NOT_AFTER, ANNOTATION_NOT_BEFORE, ANNOTATION_USER_DESCRIPTOR,
};

/// Extra policy inputs specific to target records; `None` for signer/bundle
/// checks.
#[derive(Debug, Clone, Default)]
pub struct TargetInputs {
    /// Desired hostnames (serving targets), sorted.
    pub desired_hostnames: Option<Vec<String>>,
    /// Desired user/group descriptor (client targets), formatted the same
    /// way it is stored in the annotation so a plain string compare works.
    pub desired_user_descriptor: Option<String>,
}

/// Returns the empty string ("leave alone") or a human-readable reason the
/// record must be regenerated. Eight-step decision order; first match
/// wins.
#[must_use]
pub fn needs_regeneration(
    annotations: &BTreeMap<String, String>,
    signer_not_before: Option<DateTime<Utc>>,
    refresh_fraction_denominator: u32,
    expiry_only: bool,
    target: Option<&TargetInputs>,
    now: DateTime<Utc>,
) -> String {
    let Some(not_after_raw) = annotations.get(ANNOTATION_NOT_AFTER) else {
        return "missing notAfter".to_string();
    };
    let Some(not_before_raw) = annotations.get(ANNOTATION_NOT_BEFORE) else {
        return "missing notBefore".to_string();
    };

    let not_after = match DateTime::parse_from_rfc3339(not_after_raw) {
        Ok(dt) => dt.with_timezone(&Utc),
        Err(_) => return format!("bad expiry: {not_after_raw}"),
    };
    let not_before = match DateTime::parse_from_rfc3339(not_before_raw) {
        Ok(dt) => dt.with_timezone(&Utc),
        Err(_) => return format!("bad expiry: {not_before_raw}"),
    };

    if not_after <= now {
        return "already expired".to_string();
    }

    if expiry_only {
        return String::new();
    }

    let validity = not_after - not_before;
    let refresh = validity / i32::try_from(refresh_fraction_denominator.max(1)).unwrap_or(2);
    let refresh_deadline = not_before + refresh;
    let signer_is_older = signer_not_before.is_none_or(|sb| sb < not_before);
    if now >= refresh_deadline && signer_is_older {
        return "past its refresh time".to_string();
    }

    if let Some(target) = target {
        if let Some(desired) = &target.desired_hostnames {
            let recorded = annotations
                .get(ANNOTATION_HOSTNAMES)
                .map(|v| v.split(',').map(str::to_string).collect::<Vec<_>>())
                .unwrap_or_default();
            let mut desired_sorted = desired.clone();
            desired_sorted.sort();
            if recorded != desired_sorted {
                return format!(
                    "inputs changed: hostnames {:?} -> {:?}",
                    recorded, desired_sorted
                );
            }
        }
        if let Some(desired_descriptor) = &target.desired_user_descriptor {
            let recorded = annotations.get(ANNOTATION_USER_DESCRIPTOR).cloned();
            if recorded.as_deref() != Some(desired_descriptor.as_str()) {
                return format!("inputs changed: user/group descriptor differs from {desired_descriptor}");
            }
        }
    }

    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn annotations(not_before: DateTime<Utc>, not_after: DateTime<Utc>) -> BTreeMap<String, String> {
        let mut m = BTreeMap::new();
        m.insert(ANNOTATION_NOT_BEFORE.to_string(), not_before.to_rfc3339());
        m.insert(ANNOTATION_NOT_AFTER.to_string(), not_after.to_rfc3339());
        m
    }

    #[test]
    fn missing_not_after_is_first_match() {
        let reason = needs_regeneration(&BTreeMap::new(), None, 2, false, None, Utc::now());
        assert_eq!(reason, "missing notAfter");
    }

    #[test]
    fn missing_not_before_after_not_after_present() {
        let mut m = BTreeMap::new();
        m.insert(ANNOTATION_NOT_AFTER.to_string(), Utc::now().to_rfc3339());
        let reason = needs_regeneration(&m, None, 2, false, None, Utc::now());
        assert_eq!(reason, "missing notBefore");
    }

    #[test]
    fn unparsable_not_after_reported() {
        let mut m = BTreeMap::new();
        m.insert(ANNOTATION_NOT_AFTER.to_string(), "not-a-date".to_string());
        m.insert(ANNOTATION_NOT_BEFORE.to_string(), Utc::now().to_rfc3339());
        let reason = needs_regeneration(&m, None, 2, false, None, Utc::now());
        assert_eq!(reason, "bad expiry: not-a-date");
    }

    #[test]
    fn already_expired_before_expiry_only_check() {
        let now = Utc::now();
        let m = annotations(now - Duration::days(10), now - Duration::hours(1));
        let reason = needs_regeneration(&m, None, 2, true, None, now);
        assert_eq!(reason, "already expired");
    }

    #[test]
    fn expiry_only_skips_refresh_window() {
        let now = Utc::now();
        let not_before = now - Duration::hours(20);
        let not_after = now + Duration::hours(4);
        let m = annotations(not_before, not_after);
        let reason = needs_regeneration(&m, None, 2, true, None, now);
        assert_eq!(reason, "");
    }

    #[test]
    fn refresh_deadline_triggers_when_signer_older() {
        let now = Utc::now();
        let not_before = now - Duration::hours(13);
        let not_after = not_before + Duration::hours(24);
        let m = annotations(not_before, not_after);
        let signer_not_before = Some(not_before - Duration::hours(1));
        let reason = needs_regeneration(&m, signer_not_before, 2, false, None, now);
        assert_eq!(reason, "past its refresh time");
    }

    #[test]
    fn refresh_deadline_suppressed_when_signer_is_newer() {
        let now = Utc::now();
        let not_before = now - Duration::hours(13);
        let not_after = not_before + Duration::hours(24);
        let m = annotations(not_before, not_after);
        // Signer was issued after this record's notBefore: guard against
        // declaring a freshly-rotated signer "old".
        let signer_not_before = Some(not_before + Duration::hours(1));
        let reason = needs_regeneration(&m, signer_not_before, 2, false, None, now);
        assert_eq!(reason, "");
    }

    #[test]
    fn hostname_change_detected_for_targets() {
        let now = Utc::now();
        let not_before = now - Duration::hours(1);
        let not_after = not_before + Duration::hours(24);
        let mut m = annotations(not_before, not_after);
        m.insert(ANNOTATION_HOSTNAMES.to_string(), "a".to_string());
        let target = TargetInputs {
            desired_hostnames: Some(vec!["a".to_string(), "b".to_string()]),
            desired_user_descriptor: None,
        };
        let reason = needs_regeneration(&m, Some(not_before), 2, false, Some(&target), now);
        assert!(reason.starts_with("inputs changed"));
    }

    #[test]
    fn steady_state_is_empty() {
        let now = Utc::now();
        let not_before = now - Duration::hours(1);
        let not_after = not_before + Duration::hours(24);
        let m = annotations(not_before, not_after);
        let reason = needs_regeneration(&m, Some(not_before), 2, false, None, now);
        assert_eq!(reason, "");
    }
}
