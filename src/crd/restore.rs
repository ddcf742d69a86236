//! Restore Custom Resource Definition

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{ProgressResource, ProgressStatus};

/// Restore resource specification
///
/// A Restore provisions a new PersistentVolumeClaim, named after the Restore,
/// from an existing VolumeSnapshot.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "backstore.github.com",
    version = "v1alpha1",
    kind = "Restore",
    plural = "restores",
    singular = "restore",
    namespaced,
    status = "ProgressStatus",
    printcolumn = r#"{"name": "Snapshot", "type": "string", "jsonPath": ".spec.backup-name"}"#,
    printcolumn = r#"{"name": "Storage", "type": "string", "jsonPath": ".spec.storage"}"#,
    printcolumn = r#"{"name": "Progress", "type": "string", "jsonPath": ".status.progress"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "kebab-case")]
pub struct RestoreSpec {
    /// Name of the VolumeSnapshot to restore from
    pub backup_name: String,

    /// Storage class for the restored claim
    #[serde(default)]
    pub volume_snapshot_class_name: String,

    /// Requested size of the restored claim, e.g. `10Gi`
    #[serde(default)]
    pub storage: String,
}

impl ProgressResource for Restore {
    fn status(&self) -> Option<&ProgressStatus> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut Option<ProgressStatus> {
        &mut self.status
    }
}
