// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared context passed to the orchestrator on every tick.
//!
//! This module provides the core infrastructure for threading a record
//! store, an event recorder and a cancellation token through a rotation
//! cycle, the same `Arc<Context>`-per-tick shape this codebase uses for
//! controllers, trimmed down: there is no CRD and no reflector store here,
//! just the storage backend and the bits needed to report what happened.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::events::EventRecorder;
use crate::store::RecordStore;

/// Shared context for one rotation engine instance.
#[derive(Clone)]
pub struct RotationCtx {
    /// Backing record storage (in-memory or Kubernetes-backed).
    pub store: Arc<dyn RecordStore>,
    /// Where rotation decisions are surfaced as events.
    pub events: Arc<dyn EventRecorder>,
    /// Cancellation token threaded through every stage of a tick.
    pub cancel: CancellationToken,
    /// Name used to build the `<name>Degraded` status condition type.
    pub controller_name: String,
}

impl RotationCtx {
    #[must_use]
    pub fn new(store: Arc<dyn RecordStore>, events: Arc<dyn EventRecorder>, controller_name: impl Into<String>) -> Self {
        Self {
            store,
            events,
            cancel: CancellationToken::new(),
            controller_name: controller_name.into(),
        }
    }

    /// A child token whose cancellation also cancels this context's token,
    /// for a single in-flight tick that should not outlive a shutdown
    /// signal.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }
}
