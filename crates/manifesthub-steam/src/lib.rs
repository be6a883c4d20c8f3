// SPDX-License-Identifier: MIT OR Apache-2.0
//! Steam session lifecycle for ManifestHub: one authenticated connection
//! per account, the headless auth flow, and the reconnect policy for
//! unsolicited drops.
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod lifecycle;
mod session;
mod vent_catalog;

pub use error::{SteamError, TerminalAuthError};
pub use lifecycle::{InvalidTransition, SessionLifecycle, SessionState};
pub use session::{LogonResult, SteamSession};
pub use vent_catalog::VentCatalog;
