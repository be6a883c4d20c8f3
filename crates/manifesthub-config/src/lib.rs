// SPDX-License-Identifier: MIT OR Apache-2.0
//! CLI surface and runtime configuration for ManifestHub.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Errors found while validating or assembling a [`RunConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// `account` mode requires `-a/--account PATH`.
    #[error("account mode requires --account PATH")]
    MissingAccountFile,

    /// `-i/--index` was not smaller than `-n/--number`.
    #[error("index {index} must be less than number {number}")]
    InvalidPartition {
        /// The `-i/--index` value.
        index: u32,
        /// The `-n/--number` value.
        number: u32,
    },

    /// `-k/--key` did not decode to a 32-byte AES key.
    #[error("invalid AES key: {0}")]
    InvalidKey(#[from] manifesthub_crypto::CryptoError),
}

/// Orchestrator mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lower")]
pub enum Mode {
    /// Enumerate accounts and archive every reachable manifest.
    Download,
    /// Ingest an external account file and refresh tokens.
    Account,
}

/// Parsed command-line arguments, before environment-derived fields are
/// merged in.
#[derive(Parser, Debug)]
#[command(name = "manifesthub", version, about = "Archives Steam depot manifests and decryption keys into a git-backed store")]
pub struct Cli {
    /// Orchestrator mode.
    #[arg(value_enum, default_value_t = Mode::Download)]
    pub mode: Mode,

    /// Path to the account ingestion file (`account` mode only).
    #[arg(short = 'a', long = "account")]
    pub account: Option<PathBuf>,

    /// Forge push token, used as the password half of the
    /// `x-access-token` HTTPS credential.
    #[arg(short = 't', long = "token")]
    pub token: String,

    /// Concurrent Steam sessions (accounts processed in parallel).
    #[arg(short = 'c', long = "concurrent-account", default_value_t = 4)]
    pub concurrent_account: usize,

    /// Concurrent manifest downloads within one session.
    #[arg(short = 'p', long = "concurrent-manifest", default_value_t = 16)]
    pub concurrent_manifest: usize,

    /// This instance's partition index (`account` mode only).
    #[arg(short = 'i', long = "index", default_value_t = 0)]
    pub index: u32,

    /// Number of partitions the account list is split across (`account` mode only).
    #[arg(short = 'n', long = "number", default_value_t = 1)]
    pub number: u32,

    /// Base64-encoded 32-byte AES key used to encrypt/decrypt account secrets.
    #[arg(short = 'k', long = "key")]
    pub key: String,

    /// Enable debug logging regardless of `RUST_LOG`/`MANIFESTHUB_LOG`.
    #[arg(long)]
    pub debug: bool,
}

/// Fully assembled runtime configuration: CLI flags plus the environment
/// variables ManifestHub reads.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Orchestrator mode.
    pub mode: Mode,
    /// Account ingestion file, if supplied.
    pub account_path: Option<PathBuf>,
    /// Forge push token.
    pub push_token: String,
    /// Concurrent Steam sessions.
    pub concurrent_account: usize,
    /// Concurrent manifest downloads per session.
    pub concurrent_manifest: usize,
    /// This instance's partition index.
    pub index: u32,
    /// Total partition count.
    pub number: u32,
    /// Decoded 32-byte AES key.
    pub aes_key: [u8; 32],
    /// `$GITHUB_STEP_SUMMARY`, if set.
    pub step_summary_path: Option<PathBuf>,
    /// `$RSA_PRIVATE_KEY` (PEM), if set.
    pub rsa_private_key: Option<String>,
    /// Debug logging requested on the command line.
    pub debug: bool,
    /// Local path of the archive checkout (`$MANIFESTHUB_REPO_PATH`,
    /// defaulting to the current directory).
    pub repo_path: PathBuf,
    /// Remote URL for the archive's `origin`, needed only the first time a
    /// repo at `repo_path` is opened (`$MANIFESTHUB_REMOTE_URL`).
    pub remote_url: Option<String>,
}

impl RunConfig {
    /// Merges parsed CLI flags with the environment variables ManifestHub
    /// consumes, decoding the AES key along the way.
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let aes_key = manifesthub_crypto::parse_aes_key(&cli.key)?;
        Ok(Self {
            mode: cli.mode,
            account_path: cli.account,
            push_token: cli.token,
            concurrent_account: cli.concurrent_account,
            concurrent_manifest: cli.concurrent_manifest,
            index: cli.index,
            number: cli.number,
            aes_key,
            step_summary_path: std::env::var_os("GITHUB_STEP_SUMMARY").map(PathBuf::from),
            rsa_private_key: std::env::var("RSA_PRIVATE_KEY").ok(),
            debug: cli.debug,
            repo_path: std::env::var_os("MANIFESTHUB_REPO_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            remote_url: std::env::var("MANIFESTHUB_REMOTE_URL").ok(),
        })
    }

    /// Checks cross-field constraints the CLI parser itself can't express.
    /// Returns every problem found, not just the first.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        if self.mode == Mode::Account && self.account_path.is_none() {
            errors.push(ConfigError::MissingAccountFile);
        }
        if self.number == 0 || self.index >= self.number {
            errors.push(ConfigError::InvalidPartition { index: self.index, number: self.number });
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cli() -> Cli {
        Cli {
            mode: Mode::Download,
            account: None,
            token: "tok".into(),
            concurrent_account: 4,
            concurrent_manifest: 16,
            index: 0,
            number: 1,
            key: base64::Engine::encode(&base64::engine::general_purpose::STANDARD, [1u8; 32]),
            debug: false,
        }
    }

    #[test]
    fn download_mode_with_defaults_validates_clean() {
        let config = RunConfig::from_cli(base_cli()).unwrap();
        assert!(config.validate().is_empty());
    }

    #[test]
    fn account_mode_without_file_is_rejected() {
        let mut cli = base_cli();
        cli.mode = Mode::Account;
        let config = RunConfig::from_cli(cli).unwrap();
        let errors = config.validate();
        assert!(matches!(errors[0], ConfigError::MissingAccountFile));
    }

    #[test]
    fn index_must_be_less_than_number() {
        let mut cli = base_cli();
        cli.index = 2;
        cli.number = 2;
        let config = RunConfig::from_cli(cli).unwrap();
        let errors = config.validate();
        assert!(matches!(errors[0], ConfigError::InvalidPartition { .. }));
    }

    #[test]
    fn invalid_key_is_rejected_at_assembly() {
        let mut cli = base_cli();
        cli.key = "not base64!!".into();
        assert!(RunConfig::from_cli(cli).is_err());
    }
}
