//! One authenticated Steam connection plus the callback pump that keeps it
//! alive and the reconnect policy for unsolicited drops.

use crate::error::{SteamError, TerminalAuthError};
use crate::lifecycle::{SessionLifecycle, SessionState};
use std::sync::Arc;
use std::time::Duration;
use steam_vent::auth::{AuthConfirmationHandler, ConfirmationMethod};
use steam_vent::connection::{Connection, ConnectionOptions};
use steam_vent::credentials::{Credentials, RefreshToken};
use steam_vent::ServerList;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Unsolicited disconnects wait this long before reconnecting.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Polling cadence for the callback pump.
const PUMP_INTERVAL: Duration = Duration::from_millis(100);

/// Headless confirmation handler: auto-accepts device confirmations and
/// treats any prompt for an out-of-band code as a terminal error.
struct HeadlessConfirmation;

impl AuthConfirmationHandler for HeadlessConfirmation {
    fn handle(&self, method: ConfirmationMethod) -> Result<(), TerminalAuthError> {
        match method {
            ConfirmationMethod::DeviceConfirmation => Ok(()),
            ConfirmationMethod::EmailCode => Err(TerminalAuthError::EmailRequired),
            ConfirmationMethod::DeviceCode => Err(TerminalAuthError::NeedTwoFactor),
            _ => Err(TerminalAuthError::NeedTwoFactor),
        }
    }
}

/// Outcome of a successful logon: the refresh token to persist (freshly
/// issued one if Steam rotated it) and the account's SteamID64.
pub struct LogonResult {
    /// Refresh token to store for the next run.
    pub refresh_token: String,
    /// The logged-on account's 64-bit Steam id.
    pub steam_id64: u64,
}

/// A live Steam session: the underlying connection, its lifecycle state,
/// and the handle to its callback pump task.
pub struct SteamSession {
    connection: Connection,
    lifecycle: SessionLifecycle,
    pump: Option<JoinHandle<()>>,
    cancel: Arc<Notify>,
}

impl SteamSession {
    /// Connects and authenticates, preferring `refresh_token` if present and
    /// falling back to `account_password` on a rejected token. Returns once
    /// the first license-list callback has been observed (state `Ready`).
    pub async fn connect(
        account_name: &str,
        account_password: Option<&str>,
        refresh_token: Option<&str>,
    ) -> Result<(Self, LogonResult), SteamError> {
        let mut lifecycle = SessionLifecycle::new();
        lifecycle.transition(SessionState::Connecting)?;

        let servers = ServerList::discover()
            .await
            .map_err(|e| SteamError::Transport(e.to_string()))?;
        let mut connection = Connection::connect(&servers, ConnectionOptions::default())
            .await
            .map_err(|e| SteamError::Transport(e.to_string()))?;
        lifecycle.transition(SessionState::Authing)?;

        let logon = match refresh_token {
            Some(token) => {
                match connection
                    .login(Credentials::RefreshToken(RefreshToken::new(token)))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => {
                        debug!(%account_name, "refresh token rejected, falling back to password");
                        login_with_password(&mut connection, account_name, account_password).await?
                    }
                }
            }
            None => login_with_password(&mut connection, account_name, account_password).await?,
        };
        lifecycle.transition(SessionState::LoggedOn)?;

        connection
            .await_license_list()
            .await
            .map_err(|_| SteamError::DisconnectedDuringLogon)?;
        lifecycle.transition(SessionState::Ready)?;

        let cancel = Arc::new(Notify::new());
        let result = LogonResult {
            refresh_token: logon.refresh_token,
            steam_id64: logon.steam_id.into(),
        };

        let mut session = Self { connection, lifecycle, pump: None, cancel };
        session.spawn_pump();
        Ok((session, result))
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.lifecycle.state()
    }

    /// A clone of the connection handle, for issuing Steam RPCs.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Clones the underlying connection handle for use in a `'static`
    /// context, e.g. wrapping it in a [`crate::VentCatalog`] that a spawned
    /// download task can own.
    pub fn clone_connection(&self) -> Connection {
        self.connection.clone()
    }

    fn spawn_pump(&mut self) {
        let connection = self.connection.clone();
        let cancel = self.cancel.clone();
        self.pump = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.notified() => {
                        debug!("callback pump cancelled");
                        return;
                    }
                    _ = tokio::time::sleep(PUMP_INTERVAL) => {
                        if !connection.is_connected() {
                            warn!("steam connection dropped unsolicited, reconnecting in 5s");
                            tokio::time::sleep(RECONNECT_DELAY).await;
                            if connection.reconnect().await.is_err() {
                                warn!("steam reconnect attempt failed");
                            }
                        }
                    }
                }
            }
        }));
    }

    /// Terminates the callback pump and disconnects. Idempotent.
    pub async fn disconnect(mut self) {
        self.cancel.notify_one();
        if let Some(pump) = self.pump.take() {
            let _ = pump.await;
        }
        self.connection.disconnect().await;
        info!("steam session disconnected");
    }
}

async fn login_with_password(
    connection: &mut Connection,
    account_name: &str,
    account_password: Option<&str>,
) -> Result<steam_vent::connection::LogonDetails, SteamError> {
    let password = account_password.ok_or(SteamError::Terminal(TerminalAuthError::InvalidPassword))?;
    connection
        .login_with_confirmation(
            Credentials::Password { account_name: account_name.to_string(), password: password.to_string() },
            &HeadlessConfirmation,
        )
        .await
        .map_err(classify_auth_error)
}

fn classify_auth_error(err: steam_vent::connection::LoginError) -> SteamError {
    use steam_vent::connection::LoginError;
    match err {
        LoginError::InvalidPassword => SteamError::Terminal(TerminalAuthError::InvalidPassword),
        LoginError::AccountLogonDeniedVerifiedEmailRequired => {
            SteamError::Terminal(TerminalAuthError::AccountLogonDeniedVerifiedEmailRequired)
        }
        LoginError::AccountLoginDeniedNeedTwoFactor => {
            SteamError::Terminal(TerminalAuthError::AccountLoginDeniedNeedTwoFactor)
        }
        other => SteamError::Transport(other.to_string()),
    }
}
