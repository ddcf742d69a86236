//! Snapshot and volume claim operations
//!
//! The objects created here belong to the cluster (the CSI snapshotter and
//! the volume provisioner drive them to readiness). The operator only
//! creates them and reads their state back.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, TypedLocalObjectReference,
    VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::{
    api::{ObjectMeta, PostParams},
    Api, Client, Resource,
};
use tracing::{debug, info};

use crate::crd::{VolumeSnapshot, VolumeSnapshotSource, VolumeSnapshotSpec};
use crate::error::{Error, Result};
use crate::queue::ObjectKey;

/// API group of VolumeSnapshot, used as a claim data source
pub const SNAPSHOT_API_GROUP: &str = "snapshot.storage.k8s.io";

/// Access mode of restored claims (single writer)
pub const SINGLE_WRITER_ACCESS_MODE: &str = "ReadWriteOnce";

/// Phase of a claim that has a volume bound to it
pub const CLAIM_BOUND_PHASE: &str = "Bound";

/// Parameters of a VolumeSnapshot to create
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotRequest {
    pub name: String,
    pub namespace: String,
    /// Claim the snapshot is taken from
    pub source_claim: String,
    pub snapshot_class: Option<String>,
}

impl SnapshotRequest {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }
}

/// Parameters of a PersistentVolumeClaim to provision from a snapshot
#[derive(Clone, Debug, PartialEq)]
pub struct VolumeClaimRequest {
    pub name: String,
    pub namespace: String,
    /// VolumeSnapshot the claim is populated from
    pub source_snapshot: String,
    pub storage_class: Option<String>,
    pub requested_size: Quantity,
    pub access_mode: String,
}

impl VolumeClaimRequest {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }
}

/// Result of a create call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The object was created by this call
    Created,
    /// An object with the same identity and source already existed
    AlreadyExists,
}

/// Client for the dependent objects a reconciliation creates and waits on
#[async_trait]
pub trait DependentResourceClient: Send + Sync {
    /// Create a VolumeSnapshot.
    ///
    /// An existing snapshot with the same source claim is reported as
    /// [`CreateOutcome::AlreadyExists`]; one with a different source fails
    /// with [`Error::DependentConflict`].
    async fn create_snapshot(&self, request: &SnapshotRequest) -> Result<CreateOutcome>;

    /// Whether the snapshot reports `readyToUse: true`.
    ///
    /// A snapshot that does not exist (yet) is not ready.
    async fn snapshot_ready(&self, snapshot: &ObjectKey) -> Result<bool>;

    /// Create a PersistentVolumeClaim from a snapshot, with the same
    /// already-exists semantics as [`create_snapshot`](Self::create_snapshot)
    async fn create_volume_claim(&self, request: &VolumeClaimRequest) -> Result<CreateOutcome>;

    /// Current `status.phase` of the claim, `None` if absent
    async fn volume_claim_phase(&self, claim: &ObjectKey) -> Result<Option<String>>;
}

/// [`DependentResourceClient`] backed by the Kubernetes API
pub struct KubeDependentClient {
    client: Client,
}

impl KubeDependentClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Build the VolumeSnapshot object for a request
pub fn build_snapshot(request: &SnapshotRequest) -> VolumeSnapshot {
    let mut snapshot = VolumeSnapshot::new(
        &request.name,
        VolumeSnapshotSpec {
            source: VolumeSnapshotSource {
                persistent_volume_claim_name: Some(request.source_claim.clone()),
                volume_snapshot_content_name: None,
            },
            volume_snapshot_class_name: request.snapshot_class.clone(),
        },
    );
    snapshot.metadata.namespace = Some(request.namespace.clone());
    snapshot
}

/// Build the PersistentVolumeClaim object for a request
pub fn build_volume_claim(request: &VolumeClaimRequest) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(request.name.clone()),
            namespace: Some(request.namespace.clone()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            storage_class_name: request.storage_class.clone(),
            data_source: Some(TypedLocalObjectReference {
                api_group: Some(SNAPSHOT_API_GROUP.to_string()),
                kind: VolumeSnapshot::kind(&()).to_string(),
                name: request.source_snapshot.clone(),
            }),
            access_modes: Some(vec![request.access_mode.clone()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    request.requested_size.clone(),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn is_already_exists(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(api_err) if api_err.code == 409)
}

#[async_trait]
impl DependentResourceClient for KubeDependentClient {
    async fn create_snapshot(&self, request: &SnapshotRequest) -> Result<CreateOutcome> {
        let api: Api<VolumeSnapshot> = Api::namespaced(self.client.clone(), &request.namespace);

        match api.create(&PostParams::default(), &build_snapshot(request)).await {
            Ok(_) => {
                info!(snapshot = %request.key(), claim = %request.source_claim, "Created VolumeSnapshot");
                Ok(CreateOutcome::Created)
            }
            Err(e) if is_already_exists(&e) => {
                let existing = api.get(&request.name).await?;
                let source = existing.spec.source.persistent_volume_claim_name.as_deref();
                if source == Some(request.source_claim.as_str()) {
                    debug!(snapshot = %request.key(), "VolumeSnapshot already exists");
                    Ok(CreateOutcome::AlreadyExists)
                } else {
                    Err(Error::DependentConflict(format!(
                        "VolumeSnapshot {} already exists with source claim {:?}, expected '{}'",
                        request.key(),
                        source,
                        request.source_claim
                    )))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn snapshot_ready(&self, snapshot: &ObjectKey) -> Result<bool> {
        let api: Api<VolumeSnapshot> = Api::namespaced(self.client.clone(), &snapshot.namespace);
        let Some(current) = api.get_opt(&snapshot.name).await? else {
            debug!(snapshot = %snapshot, "VolumeSnapshot not found yet");
            return Ok(false);
        };

        if let Some(message) = current
            .status
            .as_ref()
            .and_then(|s| s.error.as_ref())
            .and_then(|e| e.message.as_deref())
        {
            debug!(snapshot = %snapshot, error = %message, "VolumeSnapshot reports an error");
        }

        Ok(current.is_ready())
    }

    async fn create_volume_claim(&self, request: &VolumeClaimRequest) -> Result<CreateOutcome> {
        let api: Api<PersistentVolumeClaim> =
            Api::namespaced(self.client.clone(), &request.namespace);

        match api
            .create(&PostParams::default(), &build_volume_claim(request))
            .await
        {
            Ok(_) => {
                info!(claim = %request.key(), snapshot = %request.source_snapshot, "Created PersistentVolumeClaim");
                Ok(CreateOutcome::Created)
            }
            Err(e) if is_already_exists(&e) => {
                let existing = api.get(&request.name).await?;
                let source = existing
                    .spec
                    .as_ref()
                    .and_then(|s| s.data_source.as_ref())
                    .map(|d| d.name.as_str());
                if source == Some(request.source_snapshot.as_str()) {
                    debug!(claim = %request.key(), "PersistentVolumeClaim already exists");
                    Ok(CreateOutcome::AlreadyExists)
                } else {
                    Err(Error::DependentConflict(format!(
                        "PersistentVolumeClaim {} already exists with data source {:?}, expected '{}'",
                        request.key(),
                        source,
                        request.source_snapshot
                    )))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn volume_claim_phase(&self, claim: &ObjectKey) -> Result<Option<String>> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), &claim.namespace);
        Ok(api
            .get_opt(&claim.name)
            .await?
            .and_then(|pvc| pvc.status)
            .and_then(|status| status.phase))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_object_carries_source_and_class() {
        let snapshot = build_snapshot(&SnapshotRequest {
            name: "snap1".into(),
            namespace: "ns1".into(),
            source_claim: "pvc1".into(),
            snapshot_class: Some("fast".into()),
        });

        assert_eq!(snapshot.metadata.name.as_deref(), Some("snap1"));
        assert_eq!(snapshot.metadata.namespace.as_deref(), Some("ns1"));
        assert_eq!(
            snapshot.spec.source.persistent_volume_claim_name.as_deref(),
            Some("pvc1")
        );
        assert_eq!(snapshot.spec.volume_snapshot_class_name.as_deref(), Some("fast"));
    }

    #[test]
    fn claim_object_requests_size_from_snapshot() {
        let claim = build_volume_claim(&VolumeClaimRequest {
            name: "r1".into(),
            namespace: "ns1".into(),
            source_snapshot: "snap1".into(),
            storage_class: Some("fast".into()),
            requested_size: Quantity("10Gi".into()),
            access_mode: SINGLE_WRITER_ACCESS_MODE.into(),
        });

        let spec = claim.spec.unwrap();
        let source = spec.data_source.unwrap();
        assert_eq!(source.name, "snap1");
        assert_eq!(source.kind, "VolumeSnapshot");
        assert_eq!(source.api_group.as_deref(), Some(SNAPSHOT_API_GROUP));
        assert_eq!(spec.storage_class_name.as_deref(), Some("fast"));
        assert_eq!(spec.access_modes, Some(vec!["ReadWriteOnce".to_string()]));
        assert_eq!(
            spec.resources.unwrap().requests.unwrap().get("storage"),
            Some(&Quantity("10Gi".into()))
        );
    }
}
