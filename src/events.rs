// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Event surfacing: every rotation decision is surfaced as an event.
//!
//! Two [`EventRecorder`] implementations are provided: [`KubeEventRecorder`]
//! publishes real Kubernetes events via `kube::runtime::events`, and
//! [`TracingEventRecorder`] just logs — used in unit tests and the
//! `rotate-once` CLI, where there is no object to attach a Kubernetes event
//! to.

use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use tracing::info;

use crate::constants::{
    EVENT_ROTATION_ERROR, EVENT_SECRET_CREATED, EVENT_SECRET_UPDATED, EVENT_SIGNER_UPDATE_REQUIRED,
};

/// The reasons this engine ever emits. Kept as an enum rather than bare
/// strings so call sites can't typo a reason that a downstream consumer
/// might be matching on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationEventReason {
    SignerUpdateRequired,
    SecretCreated,
    SecretUpdated,
    RotationError,
}

impl RotationEventReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SignerUpdateRequired => EVENT_SIGNER_UPDATE_REQUIRED,
            Self::SecretCreated => EVENT_SECRET_CREATED,
            Self::SecretUpdated => EVENT_SECRET_UPDATED,
            Self::RotationError => EVENT_ROTATION_ERROR,
        }
    }

    #[must_use]
    pub fn event_type(self) -> EventTypeKind {
        match self {
            Self::RotationError => EventTypeKind::Warning,
            _ => EventTypeKind::Normal,
        }
    }
}

/// Mirrors `kube::runtime::events::EventType` without forcing every caller
/// to depend on `kube` directly (the in-memory/test recorder has no use for
/// it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTypeKind {
    Normal,
    Warning,
}

/// Where rotation decisions are surfaced. Implemented by
/// [`KubeEventRecorder`] (real clusters) and [`TracingEventRecorder`] (unit
/// tests, the `rotate-once` CLI).
#[async_trait::async_trait]
pub trait EventRecorder: Send + Sync {
    async fn record(&self, reason: RotationEventReason, message: &str);
}

/// Logs the event via `tracing` instead of publishing it to the API
/// server. Used whenever no `kube::Client`/object reference is available.
pub struct TracingEventRecorder;

#[async_trait::async_trait]
impl EventRecorder for TracingEventRecorder {
    async fn record(&self, reason: RotationEventReason, message: &str) {
        match reason.event_type() {
            EventTypeKind::Normal => info!(reason = reason.as_str(), message, "rotation event"),
            EventTypeKind::Warning => tracing::warn!(reason = reason.as_str(), message, "rotation event"),
        }
    }
}

/// Publishes events against a specific Kubernetes object via
/// `kube::runtime::events::Recorder`.
pub struct KubeEventRecorder {
    recorder: Recorder,
    reference: kube::api::ObjectReference,
}

impl KubeEventRecorder {
    #[must_use]
    pub fn new(client: kube::Client, controller_name: &str, reference: kube::api::ObjectReference) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: None,
        };
        Self {
            recorder: Recorder::new(client, reporter),
            reference,
        }
    }
}

#[async_trait::async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn record(&self, reason: RotationEventReason, message: &str) {
        let event_type = match reason.event_type() {
            EventTypeKind::Normal => EventType::Normal,
            EventTypeKind::Warning => EventType::Warning,
        };
        let event = Event {
            type_: event_type,
            reason: reason.as_str().to_string(),
            note: Some(message.to_string()),
            action: reason.as_str().to_string(),
            secondary: None,
        };
        if let Err(error) = self.recorder.publish(&event, &self.reference).await {
            tracing::warn!(%error, "failed to publish rotation event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tracing_recorder_does_not_panic() {
        let recorder = TracingEventRecorder;
        recorder
            .record(RotationEventReason::SecretCreated, "created signer")
            .await;
    }
}
