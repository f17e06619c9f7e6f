// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The Record Metadata Manager: owns annotations and the single owner
//! reference a reconciler is configured with, without ever touching
//! annotations or owner references it does not own.
//!
//! `ensure_metadata` is a pure diff function — it never mutates a record, it
//! only reports what would change. [`apply_metadata`] does the mutation, so
//! callers can log/emit the reasons before committing them.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::OwnerReference;

use crate::store::Record;

/// Returns a human-readable reason per field that is missing or stale.
/// Empty when calling it again on the result of [`apply_metadata`] would be
/// a no-op — this function is idempotent by construction.
#[must_use]
pub fn ensure_metadata(
    record: &Record,
    owner: Option<&OwnerReference>,
    desired_annotations: &BTreeMap<String, String>,
) -> Vec<String> {
    let mut reasons = Vec::new();

    for (key, value) in desired_annotations {
        match record.annotations.get(key) {
            Some(existing) if existing == value => {}
            Some(_) => reasons.push(format!("annotation {key} out of date")),
            None => reasons.push(format!("annotation {key} missing")),
        }
    }

    if let Some(owner) = owner {
        let matches_existing = record
            .owner_refs
            .iter()
            .find(|r| r.name == owner.name)
            .map(|r| r.uid == owner.uid && r.controller == owner.controller);
        match matches_existing {
            Some(true) => {}
            Some(false) => reasons.push("owner reference out of date".to_string()),
            None => reasons.push("owner reference missing".to_string()),
        }
    }

    reasons
}

/// Applies the overlay described by [`ensure_metadata`]: merges
/// `desired_annotations` into the record (never removing an annotation this
/// manager does not own) and replaces/add the one owner reference with a
/// matching name.
pub fn apply_metadata(
    record: &mut Record,
    owner: Option<&OwnerReference>,
    desired_annotations: &BTreeMap<String, String>,
) {
    for (key, value) in desired_annotations {
        record.annotations.insert(key.clone(), value.clone());
    }

    if let Some(owner) = owner {
        record.owner_refs.retain(|r| r.name != owner.name);
        record.owner_refs.push(owner.clone());
    }
}
