// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The Rotation Orchestrator: composes Signer → Bundle → Target into one
//! synchronous pass.
//!
//! Fail-closed: if an earlier stage errors, later stages are skipped so a
//! target is never signed by a stale signer. Cancellation is checked
//! between stages via [`tokio_util::sync::CancellationToken`]; a cancelled
//! tick returns silently without calling the status reporter.

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::bundle::ensure_bundle;
use crate::config::RotationConfig;
use crate::error::RotationError;
use crate::events::{EventRecorder, RotationEventReason};
use crate::signer::{ensure_signer, SignerWriteReason};
use crate::status::{healthy_condition, Condition};
use crate::store::RecordStore;
use crate::target::{ensure_target, SignerContext, TargetKind};

/// One (signer, bundle, target-set) tuple's configuration. A `RotationTask`
/// ephemeral, built fresh per tick.
pub struct RotationTask<'a> {
    pub namespace: &'a str,
    pub signer_name: &'a str,
    pub bundle_name: &'a str,
    pub targets: Vec<TargetTask<'a>>,
    pub config: &'a RotationConfig,
}

/// One target within a [`RotationTask`].
pub struct TargetTask<'a> {
    pub name: &'a str,
    pub kind: TargetKind,
    pub config: &'a RotationConfig,
}

/// Whether a tick should report status. "Run-once mode" skips it — useful
/// for unit tests and one-shot recovery invocations such as the
/// `rotate-once` CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportingMode {
    Normal,
    RunOnce,
}

/// Result of one orchestrator tick.
#[derive(Debug, serde::Serialize)]
pub struct SyncOutcome {
    pub condition: Option<Condition>,
    pub targets_written: usize,
}

/// Runs one signer/bundle/target reconciliation pass.
pub async fn sync(
    store: &dyn RecordStore,
    controller_name: &str,
    task: &RotationTask<'_>,
    mode: ReportingMode,
    events: &dyn EventRecorder,
    cancel: &CancellationToken,
) -> Result<SyncOutcome, RotationError> {
    if cancel.is_cancelled() {
        return Err(RotationError::Cancelled);
    }

    let signer_outcome = match ensure_signer(store, task.namespace, task.signer_name, task.config).await {
        Ok(outcome) => outcome,
        Err(error) => return report_error(events, error).await,
    };

    match &signer_outcome.write_reason {
        Some(SignerWriteReason::Created) => {
            events
                .record(
                    RotationEventReason::SecretCreated,
                    &format!("{} created", task.signer_name),
                )
                .await;
        }
        Some(SignerWriteReason::Regenerated(reason)) => {
            events
                .record(
                    RotationEventReason::SignerUpdateRequired,
                    &format!("{}: {reason}", task.signer_name),
                )
                .await;
        }
        Some(SignerWriteReason::MetadataOnly) | None => {}
    }

    if cancel.is_cancelled() {
        return Err(RotationError::Cancelled);
    }

    let bundle_pems = match ensure_bundle(
        store,
        task.namespace,
        task.bundle_name,
        std::slice::from_ref(&signer_outcome.cert_pem),
        task.config,
    )
    .await
    {
        Ok(pems) => pems,
        Err(error) => return report_error(events, error).await,
    };

    if cancel.is_cancelled() {
        return Err(RotationError::Cancelled);
    }

    let signer_context = SignerContext {
        cert_pem: &signer_outcome.cert_pem,
        key_pem: &signer_outcome.key_pem,
        common_name: task.signer_name,
        not_before: signer_outcome.not_before,
    };

    let mut targets_written = 0;
    for target in &task.targets {
        if cancel.is_cancelled() {
            return Err(RotationError::Cancelled);
        }
        let outcome = match ensure_target(
            store,
            task.namespace,
            target.name,
            &target.kind,
            &signer_context,
            &bundle_pems,
            target.config,
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(error) => return report_error(events, error).await,
        };
        if outcome.wrote_record {
            targets_written += 1;
            events
                .record(RotationEventReason::SecretUpdated, &format!("{} rotated", target.name))
                .await;
        }
    }

    let condition = match mode {
        ReportingMode::RunOnce => None,
        ReportingMode::Normal => Some(healthy_condition(controller_name)),
    };

    info!(namespace = task.namespace, targets_written, "rotation tick completed");
    Ok(SyncOutcome {
        condition,
        targets_written,
    })
}

/// Logs and emits the `RotationError` event for a failed stage, then
/// returns the same error so the caller can `return` it directly. On
/// cancellation, stays silent: the caller gets the cancellation error
/// back without any status-reporter call.
async fn report_error(events: &dyn EventRecorder, error: RotationError) -> Result<SyncOutcome, RotationError> {
    if matches!(error, RotationError::Cancelled) {
        return Err(error);
    }
    error!(error = %error, "rotation tick failed");
    if error.is_reportable() {
        events
            .record(RotationEventReason::RotationError, &error.to_string())
            .await;
    }
    Err(error)
}

/// The condition a caller (outside `sync`) should report against the
/// operator status object for a failed tick, honoring [`ReportingMode`].
#[must_use]
pub fn condition_for_error(controller_name: &str, mode: ReportingMode, error: &RotationError) -> Option<Condition> {
    match mode {
        ReportingMode::RunOnce => None,
        ReportingMode::Normal => crate::status::error_condition(controller_name, error),
    }
}

/// One target's recheck channel, paired with the name a recheck signal
/// should enqueue under.
pub struct RecheckSource {
    pub target_name: String,
    pub channel: watch::Receiver<Vec<String>>,
}

/// Spawns one task per recheck channel and merges every fired signal into a
/// single tick queue: a background task merges recheck signals into the
/// tick queue. Only serving targets carry a channel
/// ([`TargetKind::recheck_channel`]); callers collect those up front and pass
/// them here rather than the orchestrator polling `TargetKind` itself.
///
/// The returned receiver yields a target name each time its desired
/// hostnames change; a caller loop re-runs [`sync`] for that name on receipt.
/// Tasks exit when `cancel` fires or every channel's sender is dropped.
#[must_use]
pub fn spawn_recheck_merge_task(
    sources: Vec<RecheckSource>,
    cancel: CancellationToken,
) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(sources.len().max(1));

    for source in sources {
        let tx = tx.clone();
        let cancel = cancel.clone();
        let mut channel = source.channel;
        let target_name = source.target_name;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!(target_name, "recheck merge task cancelled");
                        return;
                    }
                    changed = channel.changed() => {
                        if changed.is_err() {
                            debug!(target_name, "recheck channel closed, stopping merge task");
                            return;
                        }
                        if tx.send(target_name.clone()).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });
    }

    rx
}
