//! Restore reconciliation through the generic controller

mod common;

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use backstore_operator::adapters::SINGLE_WRITER_ACCESS_MODE;
use backstore_operator::config::ControllerConfig;
use backstore_operator::controllers::{Controller, ReconcileOutcome};
use backstore_operator::crd::{Progress, Restore};
use backstore_operator::queue::ObjectKey;
use backstore_operator::reconcilers::{restore, RestorePolicy};

use common::{FakeDependents, MemoryStore};

fn controller() -> (
    Arc<MemoryStore<Restore>>,
    Arc<FakeDependents>,
    Arc<Controller<RestorePolicy>>,
) {
    let store = MemoryStore::<Restore>::new();
    let dependents = FakeDependents::new();
    let controller = Controller::new(
        RestorePolicy,
        &ControllerConfig::named("restores"),
        store.clone(),
        dependents.clone(),
    );
    (store, dependents, controller)
}

fn r1() -> Restore {
    common::restore("ns1", "r1", "snap1", "10Gi", "fast")
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn restore_valid_spec_builds_claim_request() {
    let request = restore::volume_claim_request(&r1()).unwrap();

    assert_eq!(request.name, "r1");
    assert_eq!(request.namespace, "ns1");
    assert_eq!(request.source_snapshot, "snap1");
    assert_eq!(request.storage_class.as_deref(), Some("fast"));
    assert_eq!(request.requested_size, Quantity("10Gi".into()));
    assert_eq!(request.access_mode, SINGLE_WRITER_ACCESS_MODE);
}

#[test]
fn restore_empty_backup_name_fails_validation() {
    let mut resource = r1();
    resource.spec.backup_name = String::new();

    let result = restore::validate(&resource);
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("backup-name"));
}

#[test]
fn restore_unparseable_storage_fails_validation() {
    for storage in ["", "lots", "10Gx", "-5Gi", "0"] {
        let mut resource = r1();
        resource.spec.storage = storage.into();
        assert!(
            restore::validate(&resource).is_err(),
            "storage {:?} should be rejected",
            storage
        );
    }
}

// ============================================================================
// Reconciliation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn restore_creates_claim_then_completes_when_bound() {
    let (store, dependents, controller) = controller();
    let key = store.insert(r1());

    controller.on_add(&r1()).await;
    assert!(controller.process_next().await);

    let requests = dependents.claim_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].requested_size, Quantity("10Gi".into()));
    assert_eq!(requests[0].storage_class.as_deref(), Some("fast"));
    assert_eq!(requests[0].source_snapshot, "snap1");
    assert_eq!(requests[0].access_mode, "ReadWriteOnce");
    assert_eq!(store.progress(&key), Some(Progress::Creating));

    // Pending is not ready
    dependents.set_claim_phase(ObjectKey::new("ns1", "r1"), "Pending");
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(store.progress(&key), Some(Progress::Creating));

    dependents.set_claim_phase(ObjectKey::new("ns1", "r1"), "Bound");
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(store.progress(&key), Some(Progress::Created));
    assert_eq!(controller.pollers().active().await, 0);
}

#[tokio::test(start_paused = true)]
async fn restore_invalid_storage_is_marked_failed_and_dropped() {
    let (store, dependents, controller) = controller();
    let mut resource = r1();
    resource.spec.storage = "ten gigs".into();
    let key = store.insert(resource);

    assert_eq!(controller.reconcile(&key).await, ReconcileOutcome::Dropped);
    assert!(dependents.claim_requests().is_empty());
    assert_eq!(store.progress(&key), Some(Progress::Failed));
    assert!(store.message(&key).unwrap().contains("ten gigs"));
}

#[tokio::test(start_paused = true)]
async fn restore_never_bound_claim_times_out_as_failed() {
    let (store, dependents, controller) = controller();
    let key = store.insert(r1());

    assert_eq!(controller.reconcile(&key).await, ReconcileOutcome::Submitted);

    tokio::time::sleep(Duration::from_secs(301)).await;

    assert_eq!(store.progress(&key), Some(Progress::Failed));
    let message = store.message(&key).unwrap();
    assert!(message.contains("PersistentVolumeClaim"));
    assert!(message.contains("ns1/r1"));
    assert_eq!(dependents.readiness_checks(), 60);
    assert_eq!(controller.pollers().active().await, 0);

    // Polling stopped with the timeout
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(dependents.readiness_checks(), 60);
}

#[tokio::test(start_paused = true)]
async fn restore_deleted_during_poll_does_not_fail_the_poller() {
    let (store, dependents, controller) = controller();
    let key = store.insert(r1());

    assert_eq!(controller.reconcile(&key).await, ReconcileOutcome::Submitted);
    store.remove(&key);

    dependents.set_claim_phase(ObjectKey::new("ns1", "r1"), "Bound");
    tokio::time::sleep(Duration::from_secs(6)).await;

    assert_eq!(store.progress(&key), None);
    assert_eq!(controller.pollers().active().await, 0);
}
