//! Backup Custom Resource Definition

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{ProgressResource, ProgressStatus};

/// Backup resource specification
///
/// A Backup asks for a point-in-time VolumeSnapshot of a claim.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "backstore.github.com",
    version = "v1alpha1",
    kind = "Backup",
    plural = "backups",
    singular = "backup",
    namespaced,
    status = "ProgressStatus",
    printcolumn = r#"{"name": "Snapshot", "type": "string", "jsonPath": ".spec.volume-snapshot-name"}"#,
    printcolumn = r#"{"name": "Progress", "type": "string", "jsonPath": ".status.progress"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "kebab-case")]
pub struct BackupSpec {
    /// Name of the VolumeSnapshot to create
    pub volume_snapshot_name: String,

    /// VolumeSnapshotClass used for the snapshot
    #[serde(default)]
    pub volume_snapshot_class_name: String,

    /// PersistentVolumeClaim to snapshot
    pub pvc: String,

    /// Namespace of the claim and the snapshot (defaults to the Backup's namespace)
    #[serde(default)]
    pub namespace: String,
}

impl ProgressResource for Backup {
    fn status(&self) -> Option<&ProgressStatus> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut Option<ProgressStatus> {
        &mut self.status
    }
}
