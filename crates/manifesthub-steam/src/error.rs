//! Errors a Steam session can raise, split into terminal (the account
//! should be dropped) and transient (the orchestrator logs and moves on).

use std::fmt;

/// A terminal authentication failure: retrying with the same credentials
/// cannot succeed, so the caller should remove the account.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminalAuthError {
    /// The password (or refresh token fallback) was rejected.
    InvalidPassword,
    /// The account requires a confirmed email before logging on.
    AccountLogonDeniedVerifiedEmailRequired,
    /// The account requires two-factor confirmation the headless
    /// authenticator cannot supply.
    AccountLoginDeniedNeedTwoFactor,
    /// Steam Guard asked for an email code.
    EmailRequired,
    /// Steam Guard asked for a mobile authenticator code.
    NeedTwoFactor,
}

impl fmt::Display for TerminalAuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidPassword => "invalid password",
            Self::AccountLogonDeniedVerifiedEmailRequired => "verified email required",
            Self::AccountLoginDeniedNeedTwoFactor => "two-factor confirmation required",
            Self::EmailRequired => "email confirmation code required",
            Self::NeedTwoFactor => "mobile authenticator code required",
        };
        f.write_str(s)
    }
}

impl std::error::Error for TerminalAuthError {}

/// Errors raised while connecting, authenticating, or running a session.
#[derive(Debug, thiserror::Error)]
pub enum SteamError {
    /// Authentication failed in a way that will not resolve on retry.
    #[error("terminal authentication failure: {0}")]
    Terminal(#[from] TerminalAuthError),

    /// The underlying transport failed to connect or was dropped.
    #[error("steam transport error: {0}")]
    Transport(String),

    /// A requested state transition was not valid from the current state.
    #[error(transparent)]
    InvalidTransition(#[from] crate::lifecycle::InvalidTransition),

    /// The session disconnected before reaching `Ready`.
    #[error("session disconnected before completing logon")]
    DisconnectedDuringLogon,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_auth_error_displays_human_readable_text() {
        assert_eq!(TerminalAuthError::InvalidPassword.to_string(), "invalid password");
        assert_eq!(TerminalAuthError::NeedTwoFactor.to_string(), "mobile authenticator code required");
    }

    #[test]
    fn steam_error_wraps_terminal_auth_error_via_from() {
        let err: SteamError = TerminalAuthError::EmailRequired.into();
        assert!(matches!(err, SteamError::Terminal(TerminalAuthError::EmailRequired)));
        assert_eq!(err.to_string(), "terminal authentication failure: email confirmation code required");
    }
}
