//! In-memory collaborators shared by the integration tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use backstore_operator::adapters::{
    CreateOutcome, DependentResourceClient, ResourceStore, SnapshotRequest, VolumeClaimRequest,
};
use backstore_operator::crd::{Backup, BackupSpec, Progress, ProgressResource, Restore, RestoreSpec};
use backstore_operator::queue::ObjectKey;
use backstore_operator::{Error, Result};

// ============================================================================
// Resource builders
// ============================================================================

pub fn metadata(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

pub fn backup(namespace: &str, name: &str, snapshot: &str, pvc: &str, class: &str) -> Backup {
    Backup {
        metadata: metadata(namespace, name),
        spec: BackupSpec {
            volume_snapshot_name: snapshot.to_string(),
            volume_snapshot_class_name: class.to_string(),
            pvc: pvc.to_string(),
            namespace: namespace.to_string(),
        },
        status: None,
    }
}

pub fn restore(namespace: &str, name: &str, snapshot: &str, storage: &str, class: &str) -> Restore {
    Restore {
        metadata: metadata(namespace, name),
        spec: RestoreSpec {
            backup_name: snapshot.to_string(),
            volume_snapshot_class_name: class.to_string(),
            storage: storage.to_string(),
        },
        status: None,
    }
}

// ============================================================================
// Resource store
// ============================================================================

/// Store with resource-version checked status writes
pub struct MemoryStore<K> {
    objects: Mutex<HashMap<ObjectKey, K>>,
    /// Every progress value written, in order, per key
    history: Mutex<HashMap<ObjectKey, Vec<Progress>>>,
    version: AtomicU32,
    /// Number of upcoming status writes to reject with a conflict
    conflicts: AtomicU32,
    /// Number of upcoming gets to fail with a transient error
    get_failures: AtomicU32,
}

impl<K: ProgressResource> MemoryStore<K> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            objects: Mutex::new(HashMap::new()),
            history: Mutex::new(HashMap::new()),
            version: AtomicU32::new(1),
            conflicts: AtomicU32::new(0),
            get_failures: AtomicU32::new(0),
        })
    }

    pub fn insert(&self, mut resource: K) -> ObjectKey {
        let key = ObjectKey::from_resource(&resource);
        resource.meta_mut().resource_version = Some(self.next_version());
        self.objects.lock().unwrap().insert(key.clone(), resource);
        key
    }

    pub fn remove(&self, key: &ObjectKey) {
        self.objects.lock().unwrap().remove(key);
    }

    pub fn progress(&self, key: &ObjectKey) -> Option<Progress> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .and_then(|r| r.progress())
    }

    pub fn message(&self, key: &ObjectKey) -> Option<String> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .and_then(|r| r.status().and_then(|s| s.message.clone()))
    }

    pub fn history(&self, key: &ObjectKey) -> Vec<Progress> {
        self.history
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Simulate another writer bumping the stored version
    pub fn touch(&self, key: &ObjectKey) {
        let version = self.next_version();
        if let Some(resource) = self.objects.lock().unwrap().get_mut(key) {
            resource.meta_mut().resource_version = Some(version);
        }
    }

    pub fn fail_next_status_writes_with_conflict(&self, count: u32) {
        self.conflicts.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_gets(&self, count: u32) {
        self.get_failures.store(count, Ordering::SeqCst);
    }

    fn next_version(&self) -> String {
        self.version.fetch_add(1, Ordering::SeqCst).to_string()
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl<K: ProgressResource> ResourceStore<K> for MemoryStore<K> {
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>> {
        if take_one(&self.get_failures) {
            return Err(Error::dependent("simulated API outage"));
        }
        Ok(self.objects.lock().unwrap().get(key).cloned())
    }

    async fn replace_status(&self, key: &ObjectKey, resource: &K) -> Result<K> {
        if take_one(&self.conflicts) {
            // Another writer got there first
            self.touch(key);
            return Err(Error::Conflict(key.to_string()));
        }

        let mut objects = self.objects.lock().unwrap();
        let Some(stored) = objects.get_mut(key) else {
            return Err(Error::NotFound {
                kind: K::kind(&()).to_string(),
                key: key.to_string(),
            });
        };
        if stored.meta().resource_version != resource.meta().resource_version {
            return Err(Error::Conflict(key.to_string()));
        }

        *stored.status_mut() = resource.status().cloned();
        stored.meta_mut().resource_version =
            Some(self.version.fetch_add(1, Ordering::SeqCst).to_string());

        if let Some(progress) = resource.progress() {
            self.history
                .lock()
                .unwrap()
                .entry(key.clone())
                .or_default()
                .push(progress);
        }
        Ok(stored.clone())
    }
}

// ============================================================================
// Dependent resources
// ============================================================================

/// Fake cluster holding snapshots and claims
#[derive(Default)]
pub struct FakeDependents {
    snapshot_requests: Mutex<Vec<SnapshotRequest>>,
    claim_requests: Mutex<Vec<VolumeClaimRequest>>,
    /// Existing objects and their source
    snapshots: Mutex<HashMap<ObjectKey, String>>,
    claims: Mutex<HashMap<ObjectKey, String>>,
    ready_snapshots: Mutex<HashSet<ObjectKey>>,
    claim_phases: Mutex<HashMap<ObjectKey, String>>,
    /// Number of upcoming create calls to fail with a transient error
    create_failures: AtomicU32,
    readiness_checks: AtomicUsize,
    /// Readiness calls never return, like a hung API request
    stall_readiness: AtomicBool,
}

impl FakeDependents {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot_requests(&self) -> Vec<SnapshotRequest> {
        self.snapshot_requests.lock().unwrap().clone()
    }

    pub fn claim_requests(&self) -> Vec<VolumeClaimRequest> {
        self.claim_requests.lock().unwrap().clone()
    }

    /// Pre-create a snapshot, as if a previous run had submitted it
    pub fn existing_snapshot(&self, key: ObjectKey, source_claim: &str) {
        self.snapshots
            .lock()
            .unwrap()
            .insert(key, source_claim.to_string());
    }

    pub fn set_snapshot_ready(&self, key: ObjectKey) {
        self.ready_snapshots.lock().unwrap().insert(key);
    }

    pub fn set_claim_phase(&self, key: ObjectKey, phase: &str) {
        self.claim_phases
            .lock()
            .unwrap()
            .insert(key, phase.to_string());
    }

    pub fn fail_next_creates(&self, count: u32) {
        self.create_failures.store(count, Ordering::SeqCst);
    }

    pub fn stall_readiness_checks(&self) {
        self.stall_readiness.store(true, Ordering::SeqCst);
    }

    async fn readiness_call(&self) {
        self.readiness_checks.fetch_add(1, Ordering::SeqCst);
        if self.stall_readiness.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }

    pub fn readiness_checks(&self) -> usize {
        self.readiness_checks.load(Ordering::SeqCst)
    }
}

fn create_or_match(
    existing: &Mutex<HashMap<ObjectKey, String>>,
    key: ObjectKey,
    source: &str,
) -> Result<CreateOutcome> {
    let mut existing = existing.lock().unwrap();
    match existing.get(&key) {
        Some(current) if current == source => Ok(CreateOutcome::AlreadyExists),
        Some(current) => Err(Error::DependentConflict(format!(
            "{} exists with source {}",
            key, current
        ))),
        None => {
            existing.insert(key, source.to_string());
            Ok(CreateOutcome::Created)
        }
    }
}

#[async_trait]
impl DependentResourceClient for FakeDependents {
    async fn create_snapshot(&self, request: &SnapshotRequest) -> Result<CreateOutcome> {
        self.snapshot_requests.lock().unwrap().push(request.clone());
        if take_one(&self.create_failures) {
            return Err(Error::dependent("simulated API outage"));
        }
        create_or_match(&self.snapshots, request.key(), &request.source_claim)
    }

    async fn snapshot_ready(&self, snapshot: &ObjectKey) -> Result<bool> {
        self.readiness_call().await;
        Ok(self.ready_snapshots.lock().unwrap().contains(snapshot))
    }

    async fn create_volume_claim(&self, request: &VolumeClaimRequest) -> Result<CreateOutcome> {
        self.claim_requests.lock().unwrap().push(request.clone());
        if take_one(&self.create_failures) {
            return Err(Error::dependent("simulated API outage"));
        }
        create_or_match(&self.claims, request.key(), &request.source_snapshot)
    }

    async fn volume_claim_phase(&self, claim: &ObjectKey) -> Result<Option<String>> {
        self.readiness_call().await;
        Ok(self.claim_phases.lock().unwrap().get(claim).cloned())
    }
}
