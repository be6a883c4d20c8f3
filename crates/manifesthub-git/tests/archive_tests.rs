use manifesthub_core::{AccountRecord, ManifestDescriptor};
use manifesthub_git::{GitStore, WriteOutcome};
use std::collections::BTreeSet;
use tempfile::TempDir;

fn origin() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    git2::Repository::init_bare(dir.path()).unwrap();
    dir
}

fn store(origin: &TempDir) -> (TempDir, GitStore) {
    let local = tempfile::tempdir().unwrap();
    let store = GitStore::open(
        local.path(),
        Some(origin.path().to_str().unwrap()),
        "test-token".into(),
    )
    .unwrap();
    (local, store)
}

fn descriptor(app_id: u32, depot_id: u32, manifest_id: u64, key_byte: u8) -> ManifestDescriptor {
    ManifestDescriptor {
        app_id,
        depot_id,
        manifest_id,
        depot_key: [key_byte; 32],
        manifest: format!("manifest-{app_id}-{depot_id}-{manifest_id}").into_bytes(),
    }
}

#[tokio::test]
async fn write_manifest_creates_tag_and_branch() {
    let origin = origin();
    let (_local, store) = store(&origin);
    let outcome = store.write_manifest(&descriptor(10, 20, 30, 1)).await.unwrap();
    assert_eq!(outcome, WriteOutcome::Written);
    assert!(store.has_manifest(10, 20, 30).unwrap());
}

#[tokio::test]
async fn write_manifest_is_idempotent() {
    let origin = origin();
    let (_local, store) = store(&origin);
    let d = descriptor(10, 20, 30, 1);
    assert_eq!(store.write_manifest(&d).await.unwrap(), WriteOutcome::Written);
    assert_eq!(
        store.write_manifest(&d).await.unwrap(),
        WriteOutcome::AlreadyPresent
    );
}

#[tokio::test]
async fn branch_keeps_one_manifest_per_depot() {
    let origin = origin();
    let (_local, store) = store(&origin);
    store.write_manifest(&descriptor(10, 20, 30, 1)).await.unwrap();
    store.write_manifest(&descriptor(10, 20, 31, 2)).await.unwrap();

    assert!(store.has_manifest(10, 20, 30).unwrap());
    assert!(store.has_manifest(10, 20, 31).unwrap());
}

#[tokio::test]
async fn key_vdf_is_monotonic_across_writes() {
    let origin = origin();
    let (_local, store) = store(&origin);
    store.write_manifest(&descriptor(10, 20, 30, 1)).await.unwrap();
    store.write_manifest(&descriptor(10, 21, 40, 2)).await.unwrap();

    let touched = BTreeSet::from([(10, 20), (10, 21)]);
    let report = store.report_tracking_status(&touched).unwrap();
    assert_eq!(report.active.len(), 2);
}

#[tokio::test]
async fn writes_to_different_apps_do_not_collide() {
    let origin = origin();
    let (_local, store) = store(&origin);
    store.write_manifest(&descriptor(10, 20, 30, 1)).await.unwrap();
    store.write_manifest(&descriptor(11, 20, 30, 1)).await.unwrap();
    assert!(store.has_manifest(10, 20, 30).unwrap());
    assert!(store.has_manifest(11, 20, 30).unwrap());
}

#[tokio::test]
async fn prune_expired_tags_keeps_only_newest_per_depot() {
    let origin = origin();
    let (_local, store) = store(&origin);
    store.write_manifest(&descriptor(10, 20, 1, 1)).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    store.write_manifest(&descriptor(10, 20, 2, 2)).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    store.write_manifest(&descriptor(10, 20, 3, 3)).await.unwrap();

    let pruned = store.prune_expired_tags().await.unwrap();
    assert_eq!(pruned, 2);
    assert!(!store.has_manifest(10, 20, 1).unwrap());
    assert!(!store.has_manifest(10, 20, 2).unwrap());
    assert!(store.has_manifest(10, 20, 3).unwrap());
}

#[tokio::test]
async fn tracking_report_classifies_active_orphan_and_access_denied() {
    let origin = origin();
    let (_local, store) = store(&origin);
    store.write_manifest(&descriptor(10, 20, 30, 1)).await.unwrap();
    store.write_manifest(&descriptor(11, 21, 31, 2)).await.unwrap();

    let touched = BTreeSet::from([(10, 20), (12, 22)]);
    let report = store.report_tracking_status(&touched).unwrap();
    assert_eq!(report.active, vec![(10, 20)]);
    assert_eq!(report.orphan, vec![(11, 21)]);
    assert_eq!(report.access_denied, vec![(12, 22)]);
}

fn account(index: &str) -> AccountRecord {
    AccountRecord {
        account_name: "friend".into(),
        account_password: Some("hunter2".into()),
        refresh_token: Some("a-refresh-token".into()),
        last_refresh: None,
        index: Some(index.into()),
        aes_encrypted: None,
        aes_iv: None,
        touched_app_ids: Default::default(),
    }
}

#[tokio::test]
async fn write_then_enumerate_account_decrypts_secrets() {
    let origin = origin();
    let (_local, store) = store(&origin);
    let key = [8u8; 32];
    let record = account("ABCDE-FGHJ");
    store.write_account(&record, &key).await.unwrap();

    let accounts = store.enumerate_accounts(&key).unwrap();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].account_password.as_deref(), Some("hunter2"));
    assert_eq!(accounts[0].refresh_token.as_deref(), Some("a-refresh-token"));
}

#[tokio::test]
async fn remove_account_deletes_its_branch() {
    let origin = origin();
    let (_local, store) = store(&origin);
    let key = [8u8; 32];
    store.write_account(&account("ABCDE-FGHJ"), &key).await.unwrap();
    store.remove_account("ABCDE-FGHJ").await.unwrap();

    let accounts = store.enumerate_accounts(&key).unwrap();
    assert!(accounts.is_empty());
}

#[tokio::test]
async fn enumerate_accounts_ignores_non_account_branches() {
    let origin = origin();
    let (_local, store) = store(&origin);
    store.write_manifest(&descriptor(10, 20, 30, 1)).await.unwrap();
    store.write_account(&account("ABCDE-FGHJ"), &[1u8; 32]).await.unwrap();

    let accounts = store.enumerate_accounts(&[1u8; 32]).unwrap();
    assert_eq!(accounts.len(), 1);
}
