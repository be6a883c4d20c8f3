// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-account enumerate → resolve → fetch pipeline: turns a logged-on
//! Steam session's license list into a set of archived manifests.
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod catalog;
mod pipeline;
mod retry;

pub use catalog::{Catalog, CatalogError, DepotTarget, LicenseInfo, PackageInfo, PaymentMethod};
pub use pipeline::{run_account, DownloadError, DEFAULT_MAX_CONCURRENT_DOWNLOADS};
pub use retry::retry_fixed;
