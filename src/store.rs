// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The abstract record storage contract and its two
//! implementations: an in-memory test double used throughout the test suite,
//! and a Kubernetes-backed store over `Secret`/`ConfigMap` objects.
//!
//! Every reconciler talks to storage exclusively through [`RecordStore`]; no
//! reconciler imports `kube` directly. Reconcilers are handed a storage
//! handle rather than raw `kube::Api` clients.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{ConfigMap, OwnerReference, Secret};
use k8s_openapi::ByteString;
use kube::api::{Api, PostParams};
use kube::Client;
use tokio::sync::RwLock;

use crate::error::RotationError;

/// Opaque `resourceVersion`-style tag. Compared for equality only; never
/// parsed as a number, since Kubernetes does not guarantee it stays numeric.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VersionTag(pub Option<String>);

impl VersionTag {
    /// The tag for a record that does not yet exist.
    #[must_use]
    pub fn absent() -> Self {
        Self(None)
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

/// The underlying Kubernetes object kind a [`Record`] is stored as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// A `kubernetes.io/tls`-shaped `Secret` (`tls.crt` + `tls.key`).
    TlsSecret,
    /// A `ConfigMap`, used for the trust bundle (`ca-bundle.crt`).
    ConfigMap,
    /// Any other storage shape. A mismatch between the reconciler's expected
    /// kind and a record's actual kind is the "wrong storage type" scenario.
    Opaque,
}

/// A storage-agnostic view of a signer, bundle, or target record.
#[derive(Debug, Clone)]
pub struct Record {
    pub namespace: String,
    pub name: String,
    pub kind: RecordKind,
    pub payload: BTreeMap<String, Vec<u8>>,
    pub annotations: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub owner_refs: Vec<OwnerReference>,
    pub version: VersionTag,
}

impl Record {
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, kind: RecordKind) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            kind,
            payload: BTreeMap::new(),
            annotations: BTreeMap::new(),
            labels: BTreeMap::new(),
            owner_refs: Vec::new(),
            version: VersionTag::absent(),
        }
    }
}

/// Storage contract every reconciler depends on. Implementations must
/// enforce optimistic concurrency on `update`: a caller-supplied
/// `expected_version` that no longer matches must return
/// [`RotationError::ConflictExhausted`]'s inner conflict signal via a plain
/// `Err`, which `arbiter.rs` interprets as "retry".
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch a record by namespace/name. `Ok(None)` if it does not exist.
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Record>, RotationError>;

    /// List records carrying `label_key=label_value` in `namespace`.
    async fn list_by_label(
        &self,
        namespace: &str,
        label_key: &str,
        label_value: &str,
    ) -> Result<Vec<Record>, RotationError>;

    /// Create a new record. Fails if one already exists at that name.
    async fn create(&self, record: Record) -> Result<Record, RotationError>;

    /// Replace an existing record's contents, conditioned on
    /// `record.version` still matching the stored version. Returns the
    /// conflict as a plain `Err(RotationError::ConflictExhausted { attempts: 0, .. })`-shaped
    /// signal for the arbiter to interpret; callers should match on
    /// [`StoreConflict`] rather than constructing that variant directly.
    async fn update(&self, record: Record) -> Result<Record, RotationError>;

    /// Delete a record outright. Used for the destructive recreate path
    /// when a record of the wrong storage kind is found and update-only
    /// mode is not set. A missing record is not an error.
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), RotationError>;
}

/// Distinguishes "a genuine optimistic-concurrency conflict, retry" from
/// other storage failures. Returned by [`RecordStore::update`] wrapped in
/// [`RotationError::ConflictExhausted`] with `attempts: 0`; `arbiter.rs`
/// increments the attempt counter itself.
#[must_use]
pub fn conflict(reason: impl Into<String>) -> RotationError {
    RotationError::ConflictExhausted {
        attempts: 0,
        reason: reason.into(),
    }
}

/// In-memory [`RecordStore`] used by the test suite to exercise concurrency
/// scenarios deterministically, without a real Kubernetes API server. There
/// is no teacher analogue for this; it is grounded directly in the abstract
/// storage contract above.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    inner: Arc<RwLock<InMemoryInner>>,
}

#[derive(Default)]
struct InMemoryInner {
    records: BTreeMap<(String, String), Record>,
    next_version: u64,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_version(inner: &mut InMemoryInner) -> VersionTag {
        inner.next_version += 1;
        VersionTag(Some(inner.next_version.to_string()))
    }
}

#[async_trait::async_trait]
impl RecordStore for InMemoryStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Record>, RotationError> {
        let inner = self.inner.read().await;
        Ok(inner
            .records
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn list_by_label(
        &self,
        namespace: &str,
        label_key: &str,
        label_value: &str,
    ) -> Result<Vec<Record>, RotationError> {
        let inner = self.inner.read().await;
        Ok(inner
            .records
            .values()
            .filter(|r| {
                r.namespace == namespace
                    && r.labels.get(label_key).map(String::as_str) == Some(label_value)
            })
            .cloned()
            .collect())
    }

    async fn create(&self, mut record: Record) -> Result<Record, RotationError> {
        let mut inner = self.inner.write().await;
        let key = (record.namespace.clone(), record.name.clone());
        if inner.records.contains_key(&key) {
            return Err(conflict(format!(
                "record {}/{} already exists",
                record.namespace, record.name
            )));
        }
        record.version = Self::next_version(&mut inner);
        inner.records.insert(key, record.clone());
        Ok(record)
    }

    async fn update(&self, mut record: Record) -> Result<Record, RotationError> {
        let mut inner = self.inner.write().await;
        let key = (record.namespace.clone(), record.name.clone());
        match inner.records.get(&key) {
            None => Err(conflict(format!(
                "record {}/{} does not exist",
                record.namespace, record.name
            ))),
            Some(existing) if existing.version != record.version => Err(conflict(format!(
                "record {}/{} version mismatch: expected {:?}, found {:?}",
                record.namespace, record.name, record.version, existing.version
            ))),
            Some(_) => {
                record.version = Self::next_version(&mut inner);
                inner.records.insert(key, record.clone());
                Ok(record)
            }
        }
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), RotationError> {
        let mut inner = self.inner.write().await;
        inner.records.remove(&(namespace.to_string(), name.to_string()));
        Ok(())
    }
}

/// Kubernetes-backed [`RecordStore`] over `Secret` (TLS-shaped records) and
/// `ConfigMap` (the trust bundle). Follows the `kube::Api` + `replace`
/// pattern used throughout this crate's reconcilers, but speaks only the
/// generic [`Record`] shape upward.
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn secret_api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn configmap_api(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn record_from_secret(secret: &Secret) -> Record {
        let meta = &secret.metadata;
        let payload = secret
            .data
            .clone()
            .unwrap_or_default()
            .into_iter()
            .map(|(k, ByteString(v))| (k, v))
            .collect();
        let kind = if secret.type_.as_deref() == Some("kubernetes.io/tls") {
            RecordKind::TlsSecret
        } else {
            RecordKind::Opaque
        };
        Record {
            namespace: meta.namespace.clone().unwrap_or_default(),
            name: meta.name.clone().unwrap_or_default(),
            kind,
            payload,
            annotations: meta.annotations.clone().unwrap_or_default(),
            labels: meta.labels.clone().unwrap_or_default(),
            owner_refs: meta.owner_references.clone().unwrap_or_default(),
            version: VersionTag(meta.resource_version.clone()),
        }
    }

    fn record_from_configmap(cm: &ConfigMap) -> Record {
        let meta = &cm.metadata;
        let mut payload: BTreeMap<String, Vec<u8>> = cm
            .binary_data
            .clone()
            .unwrap_or_default()
            .into_iter()
            .map(|(k, ByteString(v))| (k, v))
            .collect();
        for (k, v) in cm.data.clone().unwrap_or_default() {
            payload.insert(k, v.into_bytes());
        }
        Record {
            namespace: meta.namespace.clone().unwrap_or_default(),
            name: meta.name.clone().unwrap_or_default(),
            kind: RecordKind::ConfigMap,
            payload,
            annotations: meta.annotations.clone().unwrap_or_default(),
            labels: meta.labels.clone().unwrap_or_default(),
            owner_refs: meta.owner_references.clone().unwrap_or_default(),
            version: VersionTag(meta.resource_version.clone()),
        }
    }

    fn secret_from_record(record: &Record) -> Secret {
        use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
        Secret {
            metadata: ObjectMeta {
                name: Some(record.name.clone()),
                namespace: Some(record.namespace.clone()),
                annotations: Some(record.annotations.clone()),
                labels: Some(record.labels.clone()),
                owner_references: Some(record.owner_refs.clone()),
                resource_version: record.version.0.clone(),
                ..Default::default()
            },
            type_: Some("kubernetes.io/tls".to_string()),
            data: Some(
                record
                    .payload
                    .iter()
                    .map(|(k, v)| (k.clone(), ByteString(v.clone())))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    fn configmap_from_record(record: &Record) -> ConfigMap {
        use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(record.name.clone()),
                namespace: Some(record.namespace.clone()),
                annotations: Some(record.annotations.clone()),
                labels: Some(record.labels.clone()),
                owner_references: Some(record.owner_refs.clone()),
                resource_version: record.version.0.clone(),
                ..Default::default()
            },
            binary_data: Some(
                record
                    .payload
                    .iter()
                    .map(|(k, v)| (k.clone(), ByteString(v.clone())))
                    .collect(),
            ),
            ..Default::default()
        }
    }
}

#[async_trait::async_trait]
impl RecordStore for KubeStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Record>, RotationError> {
        match self.secret_api(namespace).get_opt(name).await {
            Ok(Some(secret)) => return Ok(Some(Self::record_from_secret(&secret))),
            Ok(None) => {}
            Err(e) => return Err(RotationError::PermissionDenied(e.to_string())),
        }
        match self.configmap_api(namespace).get_opt(name).await {
            Ok(Some(cm)) => Ok(Some(Self::record_from_configmap(&cm))),
            Ok(None) => Ok(None),
            Err(e) => Err(RotationError::PermissionDenied(e.to_string())),
        }
    }

    async fn list_by_label(
        &self,
        namespace: &str,
        label_key: &str,
        label_value: &str,
    ) -> Result<Vec<Record>, RotationError> {
        let selector = format!("{label_key}={label_value}");
        let lp = kube::api::ListParams::default().labels(&selector);
        let mut out = Vec::new();
        let secrets = self
            .secret_api(namespace)
            .list(&lp)
            .await
            .map_err(|e| RotationError::PermissionDenied(e.to_string()))?;
        out.extend(secrets.items.iter().map(Self::record_from_secret));
        let configmaps = self
            .configmap_api(namespace)
            .list(&lp)
            .await
            .map_err(|e| RotationError::PermissionDenied(e.to_string()))?;
        out.extend(configmaps.items.iter().map(Self::record_from_configmap));
        Ok(out)
    }

    async fn create(&self, record: Record) -> Result<Record, RotationError> {
        let pp = PostParams::default();
        match record.kind {
            RecordKind::ConfigMap => {
                let cm = Self::configmap_from_record(&record);
                let created = self
                    .configmap_api(&record.namespace)
                    .create(&pp, &cm)
                    .await
                    .map_err(conflict_or_denied)?;
                Ok(Self::record_from_configmap(&created))
            }
            RecordKind::TlsSecret | RecordKind::Opaque => {
                let secret = Self::secret_from_record(&record);
                let created = self
                    .secret_api(&record.namespace)
                    .create(&pp, &secret)
                    .await
                    .map_err(conflict_or_denied)?;
                Ok(Self::record_from_secret(&created))
            }
        }
    }

    async fn update(&self, record: Record) -> Result<Record, RotationError> {
        // `replace` carries the resourceVersion embedded by
        // `secret_from_record`/`configmap_from_record`, so the API server
        // itself enforces optimistic concurrency: a stale version comes back
        // as a 409, which `conflict_or_denied` turns into `ConflictExhausted`
        // for the arbiter to retry. Server-side apply would bypass this
        // check entirely, which is wrong for records multiple peer
        // orchestrators write to (the trust bundle).
        let pp = PostParams::default();
        match record.kind {
            RecordKind::ConfigMap => {
                let cm = Self::configmap_from_record(&record);
                let updated = self
                    .configmap_api(&record.namespace)
                    .replace(&record.name, &pp, &cm)
                    .await
                    .map_err(conflict_or_denied)?;
                Ok(Self::record_from_configmap(&updated))
            }
            RecordKind::TlsSecret | RecordKind::Opaque => {
                let secret = Self::secret_from_record(&record);
                let updated = self
                    .secret_api(&record.namespace)
                    .replace(&record.name, &pp, &secret)
                    .await
                    .map_err(conflict_or_denied)?;
                Ok(Self::record_from_secret(&updated))
            }
        }
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), RotationError> {
        let dp = kube::api::DeleteParams::default();
        match self.secret_api(namespace).delete(name, &dp).await {
            Ok(_) => {}
            Err(kube::Error::Api(resp)) if resp.code == 404 => {}
            Err(e) => return Err(RotationError::PermissionDenied(e.to_string())),
        }
        match self.configmap_api(namespace).delete(name, &dp).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(e) => Err(RotationError::PermissionDenied(e.to_string())),
        }
    }
}

fn conflict_or_denied(err: kube::Error) -> RotationError {
    match &err {
        kube::Error::Api(resp) if resp.code == 409 => conflict(resp.message.clone()),
        other => RotationError::PermissionDenied(other.to_string()),
    }
}
