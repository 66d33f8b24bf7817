//! Server creation, start-up and drive cloning against the in-memory provider.

mod common;

use std::time::Duration;

use backfill::lifecycle::{ResourceLifecycleManager, CLONE_NAME_PREFIX};
use backfill::naming::NamingAllocator;
use backfill::providers::{
    DriveAttachment, DriveStatus, NicSpec, ServerStatus, ServerTier,
};
use common::{settings, Call, FakeCloud, StartBehavior};

#[tokio::test]
async fn test_next_name_on_empty_account() {
    let cloud = FakeCloud::new();
    let name = NamingAllocator::new(&cloud)
        .next_name(ServerTier::Backfill, "lab")
        .await
        .unwrap();
    assert_eq!(name, "grey-1-lab");
}

#[tokio::test]
async fn test_next_name_follows_live_servers() {
    let cloud = FakeCloud::new();
    cloud.add_server("grey-7-x", ServerStatus::Running);
    cloud.add_server("white-3-y", ServerStatus::Stopped);
    cloud.add_server("grey-100", ServerStatus::Running);
    cloud.add_server("database", ServerStatus::Running);

    let name = NamingAllocator::new(&cloud)
        .next_name(ServerTier::Backfill, "x")
        .await
        .unwrap();
    assert_eq!(name, "grey-8-x");
}

#[tokio::test]
async fn test_build_spec_without_drive() {
    let cloud = FakeCloud::new();
    let params = settings(true).validate().unwrap().server;

    let spec = ResourceLifecycleManager::new(&cloud)
        .build_spec(&params, Some(8))
        .await
        .unwrap();

    assert_eq!(spec.name, "grey-1-lab");
    assert_eq!(spec.cpu, 8000);
    assert_eq!(spec.mem, 16 << 30);
    assert_eq!(spec.gpus.len(), 2);
    assert!(spec.gpus.iter().all(|g| g.model == "a100"));
    assert_eq!(spec.nics, vec![NicSpec::public_dhcp()]);
    assert_eq!(spec.drives, None);
    assert_eq!(spec.pubkeys, None);
    assert!(!spec.vnc_password.is_empty());
    assert_eq!(cloud.count(|c| matches!(c, Call::CloneDrive(_))), 0);
}

#[tokio::test]
async fn test_build_spec_clamps_gpus_and_attaches_key() {
    let cloud = FakeCloud::new();
    let mut settings = settings(true);
    settings.gpus = Some(8);
    settings.auto_adjust_max_gpus = Some(true);
    settings.pubkey = Some("key-1".to_string());
    settings.vnc_password = Some("console".to_string());
    let params = settings.validate().unwrap().server;

    let spec = ResourceLifecycleManager::new(&cloud)
        .build_spec(&params, Some(4))
        .await
        .unwrap();

    assert_eq!(spec.gpus.len(), 4);
    assert_eq!(spec.pubkeys, Some(vec!["key-1".to_string()]));
    assert_eq!(spec.vnc_password, "console");
}

#[tokio::test(start_paused = true)]
async fn test_build_spec_clones_boot_drive() {
    let cloud = FakeCloud::new();
    let template = cloud.add_drive("ubuntu-template", DriveStatus::Unmounted);
    let mut settings = settings(false);
    settings.drive = Some(template.clone());
    let params = settings.validate().unwrap().server;

    let spec = ResourceLifecycleManager::new(&cloud)
        .build_spec(&params, None)
        .await
        .unwrap();

    let drives = spec.drives.unwrap();
    assert_eq!(drives.len(), 1);
    let clone = cloud.drive(&drives[0].drive).unwrap();
    assert_eq!(clone.name, format!("{CLONE_NAME_PREFIX}{template}"));
    assert_eq!(clone.status, DriveStatus::Unmounted);
    assert_eq!(drives[0], DriveAttachment::boot(clone.uuid));
}

#[tokio::test(start_paused = true)]
async fn test_clone_returns_uuid_when_not_ready() {
    let cloud = FakeCloud::new();
    cloud.hang_clones();
    let template = cloud.add_drive("ubuntu-template", DriveStatus::Unmounted);

    let manager = ResourceLifecycleManager::new(&cloud);
    let uuid = manager.clone_drive(&template).await.unwrap();

    assert_eq!(cloud.drive(&uuid).unwrap().status, DriveStatus::CloningDst);
    // 40 steps plus the first read
    assert_eq!(
        cloud.count(|c| matches!(c, Call::GetDrive(u) if *u == uuid)),
        41
    );
}

#[tokio::test(start_paused = true)]
async fn test_create_and_start_reaches_running() {
    let cloud = FakeCloud::new();
    let params = settings(true).validate().unwrap().server;
    let manager = ResourceLifecycleManager::new(&cloud);

    let spec = manager.build_spec(&params, None).await.unwrap();
    let outcome = manager
        .create_and_start(&spec, ServerTier::Backfill)
        .await
        .unwrap();

    assert!(outcome.started);
    assert_eq!(outcome.server.status, ServerStatus::Running);
    assert_eq!(outcome.startup, Some(Duration::from_secs(1)));

    let calls = cloud.calls();
    let create = calls
        .iter()
        .position(|c| matches!(c, Call::CreateServer(ServerTier::Backfill, _)))
        .unwrap();
    let start = calls
        .iter()
        .position(|c| matches!(c, Call::StartServer(_)))
        .unwrap();
    let first_poll = calls
        .iter()
        .position(|c| matches!(c, Call::GetServer(_)))
        .unwrap();
    assert!(create < start && start < first_poll);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_start_is_not_an_error() {
    let cloud = FakeCloud::new();
    cloud.set_start_behavior(StartBehavior::Reject("Not enough GPUs".to_string()));
    let params = settings(true).validate().unwrap().server;
    let manager = ResourceLifecycleManager::new(&cloud);

    let spec = manager.build_spec(&params, None).await.unwrap();
    let outcome = manager
        .create_and_start(&spec, ServerTier::Backfill)
        .await
        .unwrap();

    assert!(!outcome.started);
    assert_eq!(outcome.startup, None);
    assert_eq!(cloud.count(|c| matches!(c, Call::GetServer(_))), 0);
}

#[tokio::test(start_paused = true)]
async fn test_start_poll_times_out() {
    let cloud = FakeCloud::new();
    cloud.set_start_behavior(StartBehavior::Hang);
    let params = settings(false).validate().unwrap().server;
    let manager = ResourceLifecycleManager::new(&cloud);

    let spec = manager.build_spec(&params, None).await.unwrap();
    let outcome = manager
        .create_and_start(&spec, ServerTier::Standard)
        .await
        .unwrap();

    assert!(!outcome.started);
    assert_eq!(outcome.server.status, ServerStatus::Starting);
    assert_eq!(cloud.count(|c| matches!(c, Call::GetServer(_))), 41);
}
