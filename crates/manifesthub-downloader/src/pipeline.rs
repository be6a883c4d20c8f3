//! Per-account enumerate → resolve → fetch pipeline.

use crate::catalog::{Catalog, CatalogError, PaymentMethod};
use crate::retry::retry_fixed;
use manifesthub_core::ManifestDescriptor;
use manifesthub_git::GitStore;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Attempts allotted to each of the manifest-request-code, depot-key, and
/// CDN-fetch RPCs.
const RETRY_ATTEMPTS: u32 = 30;
/// Delay between attempts of the above.
const RETRY_DELAY: Duration = Duration::from_secs(10);
/// Default cap on manifests downloaded concurrently within one session.
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 16;

/// Error messages the downloader treats as expected noise and never logs.
const SILENT_FAILURES: &[&str] = ["Access denied to manifest", "Failed to get depot key"];

/// Errors from a single `(app, depot, manifest)` download attempt.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// Steam denied access to this manifest or depot key.
    #[error("access denied")]
    AccessDenied,
    /// A catalog RPC failed after exhausting its retry schedule.
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
    /// Writing the fetched manifest to the archive failed.
    #[error("archive error: {0}")]
    Archive(#[from] manifesthub_git::ArchiveError),
}

impl DownloadError {
    fn is_silent(&self) -> bool {
        matches!(self, DownloadError::AccessDenied)
            || SILENT_FAILURES.iter().any(|m| self.to_string().contains(m))
    }
}

/// Runs the full enumerate → resolve → fetch pipeline for one logged-on
/// session, writing every newly-discovered manifest to `archive`.
///
/// Returns the set of `(app_id, depot_id)` pairs this run touched, for the
/// tracking report.
pub async fn run_account(
    catalog: Arc<dyn Catalog>,
    archive: Arc<GitStore>,
    max_concurrent_downloads: usize,
) -> Result<BTreeSet<(u32, u32)>, CatalogError> {
    let package_ids: Vec<u32> = catalog
        .licenses()
        .await?
        .into_iter()
        .filter(|l| l.payment_method != PaymentMethod::Complimentary)
        .map(|l| l.package_id)
        .collect();

    let packages = catalog.package_info(&package_ids).await?;
    let mut app_ids: BTreeSet<u32> = BTreeSet::new();
    for info in packages.values() {
        app_ids.extend(info.app_ids.iter().copied().filter(|&id| id != 0));
    }

    let mut targets = Vec::new();
    for app_id in &app_ids {
        for depot in catalog.app_depots(*app_id).await? {
            if !archive
                .has_manifest(*app_id, depot.depot_id, depot.manifest_id)
                .unwrap_or(false)
            {
                targets.push((*app_id, depot.depot_id, depot.manifest_id));
            }
        }
    }

    let servers = Arc::new(catalog.cdn_servers().await?);
    let semaphore = Arc::new(tokio::sync::Semaphore::new(max_concurrent_downloads.max(1)));
    let mut handles = Vec::with_capacity(targets.len());

    for (app_id, depot_id, manifest_id) in targets {
        let catalog = catalog.clone();
        let archive = archive.clone();
        let servers = servers.clone();
        let semaphore = semaphore.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
            let outcome = download_one(catalog.as_ref(), archive.as_ref(), &servers, app_id, depot_id, manifest_id).await;
            if let Err(err) = &outcome {
                if !err.is_silent() {
                    warn!(app_id, depot_id, manifest_id, error = %err, "manifest download failed");
                }
            }
            (app_id, depot_id)
        }));
    }

    let mut touched = BTreeSet::new();
    for handle in handles {
        if let Ok((app_id, depot_id)) = handle.await {
            touched.insert((app_id, depot_id));
        }
    }
    Ok(touched)
}

async fn download_one(
    catalog: &dyn Catalog,
    archive: &GitStore,
    servers: &[String],
    app_id: u32,
    depot_id: u32,
    manifest_id: u64,
) -> Result<(), DownloadError> {
    let request_code = retry_fixed(RETRY_ATTEMPTS, RETRY_DELAY, || {
        catalog.manifest_request_code(app_id, depot_id, manifest_id)
    })
    .await?;
    if request_code == 0 {
        return Err(DownloadError::AccessDenied);
    }

    let depot_key = retry_fixed(RETRY_ATTEMPTS, RETRY_DELAY, || catalog.depot_key(app_id, depot_id)).await?;

    if servers.is_empty() {
        return Err(DownloadError::Catalog(CatalogError::Transient(
            "no CDN servers available".into(),
        )));
    }
    let server = &servers[(depot_id as usize) % servers.len()];

    let manifest = retry_fixed(RETRY_ATTEMPTS, RETRY_DELAY, || {
        catalog.download_manifest(server, app_id, depot_id, manifest_id, request_code)
    })
    .await?;

    debug!(app_id, depot_id, manifest_id, bytes = manifest.len(), "manifest downloaded");
    archive
        .write_manifest(&ManifestDescriptor { app_id, depot_id, manifest_id, depot_key, manifest })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, DepotTarget, LicenseInfo, PackageInfo};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::tempdir;

    struct FakeCatalog {
        denied_depot: u32,
        flaky_until: AtomicU32,
    }

    #[async_trait]
    impl Catalog for FakeCatalog {
        async fn licenses(&self) -> Result<Vec<LicenseInfo>, CatalogError> {
            Ok(vec![
                LicenseInfo { package_id: 1, payment_method: PaymentMethod::Other },
                LicenseInfo { package_id: 2, payment_method: PaymentMethod::Complimentary },
            ])
        }

        async fn package_info(&self, package_ids: &[u32]) -> Result<HashMap<u32, PackageInfo>, CatalogError> {
            let mut out = HashMap::new();
            for &id in package_ids {
                out.insert(id, PackageInfo { app_ids: vec![100 + id] });
            }
            Ok(out)
        }

        async fn app_depots(&self, app_id: u32) -> Result<Vec<DepotTarget>, CatalogError> {
            Ok(vec![
                DepotTarget { depot_id: app_id * 10, manifest_id: 1 },
                DepotTarget { depot_id: self.denied_depot, manifest_id: 2 },
            ])
        }

        async fn manifest_request_code(&self, _app_id: u32, depot_id: u32, _manifest_id: u64) -> Result<u64, CatalogError> {
            if depot_id == self.denied_depot {
                return Ok(0);
            }
            let attempt = self.flaky_until.fetch_add(1, Ordering::SeqCst);
            if attempt == 0 {
                return Err(CatalogError::Transient("temporary blip".into()));
            }
            Ok(42)
        }

        async fn depot_key(&self, _app_id: u32, _depot_id: u32) -> Result<[u8; 32], CatalogError> {
            Ok([9u8; 32])
        }

        async fn cdn_servers(&self) -> Result<Vec<String>, CatalogError> {
            Ok(vec!["cdn1".into()])
        }

        async fn download_manifest(
            &self,
            _server: &str,
            _app_id: u32,
            _depot_id: u32,
            _manifest_id: u64,
            _request_code: u64,
        ) -> Result<Vec<u8>, CatalogError> {
            Ok(b"manifest bytes".to_vec())
        }
    }

    fn archive() -> (tempfile::TempDir, tempfile::TempDir, GitStore) {
        let origin = tempdir().unwrap();
        git2::Repository::init_bare(origin.path()).unwrap();
        let local = tempdir().unwrap();
        let store = GitStore::open(local.path(), Some(origin.path().to_str().unwrap()), "token".into()).unwrap();
        (origin, local, store)
    }

    #[tokio::test]
    async fn pipeline_skips_complimentary_license_packages() {
        let catalog = Arc::new(FakeCatalog { denied_depot: 9999, flaky_until: AtomicU32::new(1) });
        let (_origin, _local, store) = archive();
        let archive = Arc::new(store);
        let touched = run_account(catalog, archive, 4).await.unwrap();
        assert!(touched.iter().all(|(app, _)| *app != 102));
    }

    #[tokio::test]
    async fn pipeline_retries_transient_errors_and_succeeds() {
        let catalog = Arc::new(FakeCatalog { denied_depot: 9999, flaky_until: AtomicU32::new(0) });
        let (_origin, _local, store) = archive();
        let archive = Arc::new(store);
        let touched = run_account(catalog, archive.clone(), 4).await.unwrap();
        assert!(!touched.is_empty());
        assert!(archive.has_manifest(101, 1010, 1).unwrap());
    }

    #[tokio::test]
    async fn pipeline_skips_triples_already_in_the_archive() {
        let catalog = Arc::new(FakeCatalog { denied_depot: 9999, flaky_until: AtomicU32::new(1) });
        let (_origin, _local, store) = archive();
        store
            .write_manifest(&ManifestDescriptor { app_id: 101, depot_id: 1010, manifest_id: 1, depot_key: [1u8; 32], manifest: vec![1] })
            .await
            .unwrap();
        let archive = Arc::new(store);
        run_account(catalog, archive, 4).await.unwrap();
    }
}
