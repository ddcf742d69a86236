//! Restore reconciler
//!
//! A Restore becomes a PersistentVolumeClaim named after it, populated from
//! the referenced VolumeSnapshot. It is complete once the claim is Bound.
//! The snapshot itself is not checked up front; a missing or unready
//! snapshot surfaces through the claim never binding.

use async_trait::async_trait;
use tracing::debug;

use super::KindPolicy;
use crate::adapters::{
    parse_storage_quantity, CreateOutcome, DependentResourceClient, VolumeClaimRequest,
    CLAIM_BOUND_PHASE, SINGLE_WRITER_ACCESS_MODE,
};
use crate::crd::Restore;
use crate::error::{Error, Result};
use crate::queue::ObjectKey;

/// Validate the Restore spec
pub fn validate(restore: &Restore) -> Result<()> {
    volume_claim_request(restore).map(|_| ())
}

/// Build the claim request for a Restore
pub fn volume_claim_request(restore: &Restore) -> Result<VolumeClaimRequest> {
    if restore.spec.backup_name.trim().is_empty() {
        return Err(Error::validation("backup-name must be specified"));
    }

    let requested_size = parse_storage_quantity(&restore.spec.storage)?;
    let key = ObjectKey::from_resource(restore);
    let class = restore.spec.volume_snapshot_class_name.trim();

    Ok(VolumeClaimRequest {
        name: key.name,
        namespace: key.namespace,
        source_snapshot: restore.spec.backup_name.trim().to_string(),
        storage_class: (!class.is_empty()).then(|| class.to_string()),
        requested_size,
        access_mode: SINGLE_WRITER_ACCESS_MODE.to_string(),
    })
}

pub struct RestorePolicy;

#[async_trait]
impl KindPolicy for RestorePolicy {
    type Resource = Restore;

    const KIND: &'static str = "Restore";

    const DEPENDENT_KIND: &'static str = "PersistentVolumeClaim";

    fn validate(&self, resource: &Restore) -> Result<()> {
        validate(resource)
    }

    async fn submit(
        &self,
        client: &dyn DependentResourceClient,
        resource: &Restore,
    ) -> Result<(ObjectKey, CreateOutcome)> {
        let request = volume_claim_request(resource)?;
        debug!(claim = %request.key(), size = %request.requested_size.0, "Submitting PersistentVolumeClaim");
        let outcome = client.create_volume_claim(&request).await?;
        Ok((request.key(), outcome))
    }

    async fn is_ready(
        &self,
        client: &dyn DependentResourceClient,
        dependent: &ObjectKey,
    ) -> Result<bool> {
        let phase = client.volume_claim_phase(dependent).await?;
        debug!(claim = %dependent, phase = phase.as_deref().unwrap_or("<none>"), "Claim phase");
        Ok(phase.as_deref() == Some(CLAIM_BOUND_PHASE))
    }
}
