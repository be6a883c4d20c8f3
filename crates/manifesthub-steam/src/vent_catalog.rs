//! Adapts a live Steam connection to the [`Catalog`] port the downloader
//! pipeline depends on, translating `steam-vent`'s RPC surface and errors
//! into the pipeline's vocabulary.

use async_trait::async_trait;
use manifesthub_downloader::{Catalog, CatalogError, DepotTarget, LicenseInfo, PackageInfo, PaymentMethod};
use std::collections::HashMap;
use steam_vent::connection::Connection;
use steam_vent::proto::enums::EPaymentMethod;

/// Wraps an owned, cloned connection handle so it can be handed to
/// [`manifesthub_downloader::run_account`], which spawns one task per
/// depot and therefore needs its catalog to be `'static`.
pub struct VentCatalog {
    connection: Connection,
}

impl VentCatalog {
    /// Takes a clone of `session.connection()` for the lifetime of one
    /// download run.
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }
}

fn transient(err: impl std::fmt::Display) -> CatalogError {
    CatalogError::Transient(err.to_string())
}

#[async_trait]
impl Catalog for VentCatalog {
    async fn licenses(&self) -> Result<Vec<LicenseInfo>, CatalogError> {
        let licenses = self.connection.licenses().await.map_err(transient)?;
        Ok(licenses
            .into_iter()
            .map(|l| LicenseInfo {
                package_id: l.package_id,
                payment_method: if l.payment_method == EPaymentMethod::Complimentary {
                    PaymentMethod::Complimentary
                } else {
                    PaymentMethod::Other
                },
            })
            .collect())
    }

    async fn package_info(&self, package_ids: &[u32]) -> Result<HashMap<u32, PackageInfo>, CatalogError> {
        let infos = self.connection.package_info(package_ids).await.map_err(transient)?;
        Ok(infos
            .into_iter()
            .map(|(id, info)| (id, PackageInfo { app_ids: info.app_ids }))
            .collect())
    }

    async fn app_depots(&self, app_id: u32) -> Result<Vec<DepotTarget>, CatalogError> {
        let product_info = self.connection.app_info(app_id).await.map_err(transient)?;
        Ok(product_info
            .depots
            .into_iter()
            .filter_map(|(name, depot)| {
                let depot_id: u32 = name.parse().ok()?;
                let manifest_id = depot.manifests.public?.gid;
                Some(DepotTarget { depot_id, manifest_id })
            })
            .collect())
    }

    async fn manifest_request_code(
        &self,
        app_id: u32,
        depot_id: u32,
        manifest_id: u64,
    ) -> Result<u64, CatalogError> {
        self.connection
            .manifest_request_code(app_id, depot_id, manifest_id)
            .await
            .map_err(transient)
    }

    async fn depot_key(&self, app_id: u32, depot_id: u32) -> Result<[u8; 32], CatalogError> {
        self.connection.depot_key(app_id, depot_id).await.map_err(transient)
    }

    async fn cdn_servers(&self) -> Result<Vec<String>, CatalogError> {
        self.connection.content_servers().await.map_err(transient)
    }

    async fn download_manifest(
        &self,
        server: &str,
        app_id: u32,
        depot_id: u32,
        manifest_id: u64,
        request_code: u64,
    ) -> Result<Vec<u8>, CatalogError> {
        self.connection
            .download_manifest(server, app_id, depot_id, manifest_id, request_code)
            .await
            .map_err(transient)
    }
}
