//! Reconciler scenarios against the simulated provisioning API.

use std::sync::Arc;
use std::time::Duration;

use fsx_agent::{InjectedFailure, SimOptions, SimulatedApi};
use fsx_engine::{
    DescribeQuery, EngineConfig, Finder, Mutation, Operation, ReadOutcome, ReconcileError,
    Reconciler, RemoteResource, ResourceKind, UpdateGroup, UpdatePlan, reconciler_for,
};
use serde_json::json;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn sim(settle_after: u32) -> Arc<SimulatedApi> {
    Arc::new(SimulatedApi::new(SimOptions {
        settle_after,
        page_size: 2,
    }))
}

fn reconciler(api: &Arc<SimulatedApi>, kind: ResourceKind) -> Box<dyn Reconciler> {
    reconciler_for(kind, api.clone(), &EngineConfig::default(), CancellationToken::new()).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_create_lustre_file_system() {
    let api = sim(0);
    api.script_next(ResourceKind::LustreFileSystem, &["CREATING", "CREATING", "AVAILABLE"])
        .await;
    let lustre = reconciler(&api, ResourceKind::LustreFileSystem);

    let created = lustre
        .create(&Mutation::new(json!({"StorageCapacity": 1200, "DeploymentType": "PERSISTENT_2"})))
        .await
        .unwrap();
    assert!(created.id.starts_with("fs-"));
    assert_eq!(created.lifecycle, "AVAILABLE");
    assert_eq!(created.attributes["DeploymentType"], "PERSISTENT_2");

    let read = lustre.read(&created.id, true).await.unwrap();
    assert_eq!(read, ReadOutcome::Found(created));
}

#[tokio::test(start_paused = true)]
async fn test_finder_pages_through_simulated_results() {
    let api = sim(1);
    for i in 0..5 {
        api.insert(
            RemoteResource::new(ResourceKind::OntapVolume, format!("fsvol-0000{i}"), "CREATED")
                .with_attributes(json!({"StorageVirtualMachineId": format!("svm-{}", i % 2)})),
        )
        .await;
    }
    let volumes = reconciler(&api, ResourceKind::OntapVolume);
    let created = volumes
        .create(&Mutation::new(json!({"Name": "vol6", "StorageVirtualMachineId": "svm-1"})))
        .await
        .unwrap();
    assert_eq!(created.lifecycle, "CREATED");

    let finder = Finder::new(ResourceKind::OntapVolume, api.clone());
    let all = finder.find_all(&DescribeQuery::default()).await.unwrap();
    assert_eq!(all.len(), 6);
    let on_svm1 = finder
        .find_all(&DescribeQuery::default().filter("storage-virtual-machine-id", ["svm-1"]))
        .await
        .unwrap();
    assert_eq!(on_svm1.len(), 3);
    assert!(on_svm1.iter().any(|v| v.id == created.id));
}

#[tokio::test(start_paused = true)]
async fn test_create_failure_carries_remote_detail() {
    let api = sim(1);
    api.fail_next_settle(
        ResourceKind::WindowsFileSystem,
        "The specified Active Directory could not be reached",
    )
    .await;
    let windows = reconciler(&api, ResourceKind::WindowsFileSystem);

    let err = windows.create(&Mutation::new(json!({}))).await.unwrap_err();
    match &err {
        ReconcileError::RemoteFailure { detail, kind, .. } => {
            assert_eq!(*kind, ResourceKind::WindowsFileSystem);
            assert_eq!(
                detail.as_deref(),
                Some("The specified Active Directory could not be reached")
            );
        }
        other => panic!("expected remote failure, got {other:?}"),
    }
    assert_eq!(api.call_count("CreateFileSystem").await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_create_times_out_with_last_observation() {
    let api = sim(10_000);
    let config = EngineConfig::default().with_timeout_scale(0.1);
    let backups =
        reconciler_for(ResourceKind::Backup, api.clone(), &config, CancellationToken::new())
            .unwrap();

    let started = Instant::now();
    let err = backups.create(&Mutation::new(json!({}))).await.unwrap_err();
    let elapsed = started.elapsed();

    // Scaled backup create timeout is one minute.
    assert!(elapsed >= Duration::from_secs(60));
    assert!(elapsed < Duration::from_secs(90));
    assert_eq!(err.last_observed().map(|r| r.lifecycle.as_str()), Some("CREATING"));
}

#[tokio::test(start_paused = true)]
async fn test_unexpected_status_fails_fast() {
    let api = sim(5);
    api.script_next(ResourceKind::FileCache, &["CREATING", "STALLED"])
        .await;
    let caches = reconciler(&api, ResourceKind::FileCache);
    let err = caches.create(&Mutation::new(json!({}))).await.unwrap_err();
    assert!(matches!(err, ReconcileError::UnexpectedStatus { ref status, .. } if status == "STALLED"));
}

#[tokio::test(start_paused = true)]
async fn test_delete_missing_backup_does_not_poll() {
    let api = sim(1);
    let backups = reconciler(&api, ResourceKind::Backup);
    backups
        .delete("backup-0123456789", &Mutation::new(json!(null)))
        .await
        .unwrap();
    assert_eq!(api.calls().await, vec!["DeleteBackup"]);
}

#[tokio::test(start_paused = true)]
async fn test_delete_is_idempotent() {
    let api = sim(2);
    let svms = reconciler(&api, ResourceKind::StorageVirtualMachine);
    let svm = svms
        .create(&Mutation::new(json!({"Name": "svm1"})))
        .await
        .unwrap();
    assert_eq!(svm.lifecycle, "CREATED");

    let request = Mutation::new(json!(null));
    svms.delete(&svm.id, &request).await.unwrap();
    assert!(api.get(&svm.id).await.is_none());
    svms.delete(&svm.id, &request).await.unwrap();
    assert_eq!(api.call_count("DeleteStorageVirtualMachine").await, 2);
}

#[tokio::test(start_paused = true)]
async fn test_update_stops_after_failed_group() {
    let api = sim(1);
    let lustre = reconciler(&api, ResourceKind::LustreFileSystem);
    let fs = lustre.create(&Mutation::new(json!({}))).await.unwrap();

    api.fail_nth(
        ResourceKind::LustreFileSystem,
        Operation::Update,
        2,
        InjectedFailure::Transport("broken pipe".to_string()),
    )
    .await;
    let plan = UpdatePlan::new()
        .group(UpdateGroup::new("throughput", json!({"PerUnitStorageThroughput": 500})))
        .group(UpdateGroup::new("retention", json!({"AutomaticBackupRetentionDays": 3})))
        .group(UpdateGroup::new(
            "maintenance",
            json!({"WeeklyMaintenanceStartTime": "2:00:00"}),
        ));

    let err = lustre.update(&fs.id, &plan).await.unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::Transport {
            operation: "UpdateFileSystem",
            ..
        }
    ));
    assert_eq!(api.call_count("UpdateFileSystem").await, 2);

    let observed = lustre.read(&fs.id, true).await.unwrap().into_resource().unwrap();
    assert_eq!(observed.lifecycle, "AVAILABLE");
    assert_eq!(observed.attributes["PerUnitStorageThroughput"], 500);
    assert!(observed.attributes.get("AutomaticBackupRetentionDays").is_none());
    assert!(observed.attributes.get("WeeklyMaintenanceStartTime").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_volume_update_waits_for_administrative_action() {
    let api = sim(1);
    let volumes = reconciler(&api, ResourceKind::OpenZfsVolume);
    let volume = volumes.create(&Mutation::new(json!({}))).await.unwrap();

    let plan = UpdatePlan::new().group(
        UpdateGroup::new("quota", json!({"StorageCapacityQuotaGiB": 64}))
            .awaiting_action("VOLUME_UPDATE"),
    );
    let updated = volumes.update(&volume.id, &plan).await.unwrap();
    assert_eq!(updated.lifecycle, "CREATED");
    assert!(updated.administrative_actions.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_administrative_action_surfaces_detail() {
    let api = sim(1);
    let ontap = reconciler(&api, ResourceKind::OntapFileSystem);
    let fs = ontap.create(&Mutation::new(json!({}))).await.unwrap();

    api.fail_next_settle(ResourceKind::OntapFileSystem, "insufficient SSD capacity")
        .await;
    let plan = UpdatePlan::new().group(
        UpdateGroup::new("capacity", json!({"StorageCapacity": 4096}))
            .awaiting_action("FILE_SYSTEM_UPDATE"),
    );
    let err = ontap.update(&fs.id, &plan).await.unwrap_err();
    assert!(matches!(err, ReconcileError::RemoteFailure { .. }));
    assert!(err.to_string().contains("insufficient SSD capacity"));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_pending_wait() {
    let api = sim(10_000);
    let cancel = CancellationToken::new();
    let caches = reconciler_for(
        ResourceKind::FileCache,
        api.clone(),
        &EngineConfig::default(),
        cancel.clone(),
    )
    .unwrap();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(90)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = caches.create(&Mutation::new(json!({}))).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Cancelled { .. }));
    assert!(started.elapsed() < Duration::from_secs(120));
}

#[tokio::test(start_paused = true)]
async fn test_read_reports_out_of_band_removal() {
    let api = sim(0);
    let snapshots = reconciler(&api, ResourceKind::OpenZfsSnapshot);
    let snapshot = snapshots.create(&Mutation::new(json!({}))).await.unwrap();
    api.remove(&snapshot.id).await;

    assert_eq!(
        snapshots.read(&snapshot.id, true).await.unwrap(),
        ReadOutcome::Drifted {
            kind: ResourceKind::OpenZfsSnapshot,
            id: snapshot.id.clone()
        }
    );
}
