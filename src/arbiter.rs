// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The Concurrency Arbiter: every write to a Signer, Bundle, or Target
//! record passes through here.
//!
//! Writes behave like a convergent CRDT-style accumulator: every write
//! carries the version tag it was read at, and every conflict is routed
//! through a pure merger function rather than a lock.

use tracing::{debug, warn};

use crate::error::RotationError;
use crate::retry::arbiter_backoff;
use crate::store::{Record, RecordStore};

/// Unconditionally write `desired` using `existing`'s version tag. On a
/// version conflict returns [`RotationError::ConflictExhausted`] with
/// `attempts: 1`.
pub async fn update(
    store: &dyn RecordStore,
    existing: &Record,
    mut desired: Record,
) -> Result<Record, RotationError> {
    desired.version = existing.version.clone();
    match store.update(desired).await {
        Ok(record) => Ok(record),
        Err(RotationError::ConflictExhausted { reason, .. }) => {
            Err(RotationError::ConflictExhausted { attempts: 1, reason })
        }
        Err(other) => Err(other),
    }
}

/// Create-or-update `desired`, retrying on conflict with `merger` invoked
/// against the freshly re-read record. `merger` must be pure: given the
/// latest observed record and this reconciler's originally desired record,
/// it returns what should actually be written (or `None` to mean "the
/// observed record is already acceptable, absorb the conflict and return
/// it unmodified").
pub async fn create_or_update<M>(
    store: &dyn RecordStore,
    namespace: &str,
    name: &str,
    mut desired: Record,
    merger: M,
) -> Result<Record, RotationError>
where
    M: Fn(&Record, &Record) -> Option<Record>,
{
    let mut backoff = arbiter_backoff();

    loop {
        let current = store.get(namespace, name).await?;
        let result = match current {
            None => {
                desired.version = crate::store::VersionTag::absent();
                store.create(desired.clone()).await
            }
            Some(existing) => {
                desired.version = existing.version.clone();
                store.update(desired.clone()).await
            }
        };

        match result {
            Ok(record) => return Ok(record),
            Err(RotationError::ConflictExhausted { reason, .. }) => {
                debug!(namespace, name, reason, "arbiter observed a write conflict");
                let observed = store.get(namespace, name).await?.ok_or_else(|| {
                    RotationError::ConflictExhausted {
                        attempts: backoff.attempts(),
                        reason: "record disappeared after conflict".to_string(),
                    }
                })?;

                match merger(&observed, &desired) {
                    None => {
                        debug!(namespace, name, "conflict absorbed: observed record already acceptable");
                        return Ok(observed);
                    }
                    Some(merged) => {
                        desired = merged;
                    }
                }

                match backoff.next_backoff() {
                    Some(delay) => {
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        warn!(namespace, name, attempts = backoff.attempts(), "arbiter exhausted retry budget");
                        return Err(RotationError::ConflictExhausted {
                            attempts: backoff.attempts(),
                            reason,
                        });
                    }
                }
            }
            Err(other) => return Err(other),
        }
    }
}
