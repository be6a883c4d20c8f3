//! The Steam-facing surface the pipeline needs, kept as a trait so the
//! fan-out/retry/filtering logic can be exercised without a live connection.

use async_trait::async_trait;
use std::collections::HashMap;

/// How a license was paid for. Only `Complimentary` licenses are excluded
/// from the package scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentMethod {
    /// A free license Steam grants automatically; never scanned.
    Complimentary,
    /// Any other payment method (purchase, gift, key activation, ...).
    Other,
}

/// One license entry from the account's license list.
#[derive(Debug, Clone, Copy)]
pub struct LicenseInfo {
    /// The licensed package id.
    pub package_id: u32,
    /// How the license was acquired.
    pub payment_method: PaymentMethod,
}

/// Product info for one package: the app ids it grants.
#[derive(Debug, Clone, Default)]
pub struct PackageInfo {
    /// Non-zero app ids referenced under this package's `appids`.
    pub app_ids: Vec<u32>,
}

/// One depot target discovered under an app's product info.
#[derive(Debug, Clone, Copy)]
pub struct DepotTarget {
    /// Depot id (the all-digits child key under `depots`).
    pub depot_id: u32,
    /// `manifests.public.gid`.
    pub manifest_id: u64,
}

/// Errors from any catalog RPC. Transient errors are retried by the
/// pipeline; [`CatalogError::AccessDenied`] is not.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// Steam returned a definitive "no" (zero manifest request code, or an
    /// explicit depot-key denial).
    #[error("access denied")]
    AccessDenied,

    /// A transport-level or protocol-level failure that may succeed on retry.
    #[error("steam rpc failed: {0}")]
    Transient(String),
}

/// The subset of Steam's product-info and CDN surface a download run needs.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Returns the account's current license list.
    async fn licenses(&self) -> Result<Vec<LicenseInfo>, CatalogError>;

    /// Resolves product info for a batch of packages.
    async fn package_info(&self, package_ids: &[u32]) -> Result<HashMap<u32, PackageInfo>, CatalogError>;

    /// Enumerates the public manifest target for every depot of `app_id`.
    async fn app_depots(&self, app_id: u32) -> Result<Vec<DepotTarget>, CatalogError>;

    /// Requests a manifest request code. A value of `0` means access denied.
    async fn manifest_request_code(
        &self,
        app_id: u32,
        depot_id: u32,
        manifest_id: u64,
    ) -> Result<u64, CatalogError>;

    /// Requests the AES decryption key for a depot.
    async fn depot_key(&self, app_id: u32, depot_id: u32) -> Result<[u8; 32], CatalogError>;

    /// Fetches the current CDN server list, once per run.
    async fn cdn_servers(&self) -> Result<Vec<String>, CatalogError>;

    /// Downloads and decompresses the manifest body from `server`.
    async fn download_manifest(
        &self,
        server: &str,
        app_id: u32,
        depot_id: u32,
        manifest_id: u64,
        request_code: u64,
    ) -> Result<Vec<u8>, CatalogError>;
}
