// SPDX-License-Identifier: MIT OR Apache-2.0
//! ManifestHub orchestrator: wires the account vault, a Steam session per
//! account, and the manifest archive together for one CI run.

mod ingest;

use anyhow::{Context, Result};
use clap::Parser;
use futures::stream::{self, StreamExt};
use manifesthub_config::{Cli, Mode, RunConfig};
use manifesthub_core::AccountRecord;
use manifesthub_downloader::Catalog;
use manifesthub_git::GitStore;
use manifesthub_steam::{SteamError, SteamSession, TerminalAuthError, VentCatalog};
use rand::seq::SliceRandom;
use std::collections::BTreeSet;
use std::io::Write as _;
use std::sync::{Arc, Mutex as StdMutex};
use tracing_subscriber::EnvFilter;

/// Exit code for runtime errors.
const EXIT_RUNTIME_ERROR: i32 = 1;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(EXIT_RUNTIME_ERROR);
        }
    };
    let config = match RunConfig::from_cli(cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(EXIT_RUNTIME_ERROR);
        }
    };

    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("error: {e}");
        }
        std::process::exit(EXIT_RUNTIME_ERROR);
    }

    init_tracing(config.debug);

    let store = Arc::new(GitStore::open(
        &config.repo_path,
        config.remote_url.as_deref(),
        config.push_token.clone(),
    )?);

    match config.mode {
        Mode::Download => run_download(&config, store).await,
        Mode::Account => run_account_ingestion(&config, store).await,
    }
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("MANIFESTHUB_LOG")
            .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// `Terminal` reasons that mean the stored credential is permanently bad and
/// the account should be dropped from the vault. `EmailRequired`/
/// `NeedTwoFactor` are also terminal but don't imply a bad credential, so
/// they're logged and left for a human to resolve out of band.
fn should_remove(reason: &TerminalAuthError) -> bool {
    matches!(
        reason,
        TerminalAuthError::InvalidPassword
            | TerminalAuthError::AccountLogonDeniedVerifiedEmailRequired
            | TerminalAuthError::AccountLoginDeniedNeedTwoFactor
    )
}

async fn run_download(config: &RunConfig, store: Arc<GitStore>) -> Result<()> {
    let mut accounts = store.enumerate_accounts(&config.aes_key)?;
    accounts.shuffle(&mut rand::thread_rng());
    tracing::info!(accounts = accounts.len(), "enumerated vault accounts");

    let touched = Arc::new(StdMutex::new(BTreeSet::new()));
    let aes_key = config.aes_key;
    let concurrent_manifest = config.concurrent_manifest.max(1);

    stream::iter(accounts)
        .for_each_concurrent(config.concurrent_account.max(1), |account| {
            let store = store.clone();
            let touched = touched.clone();
            async move {
                let account_name = account.account_name.clone();
                match process_download_account(account, store, &aes_key, concurrent_manifest).await {
                    Ok(found) => touched.lock().expect("touched set poisoned").extend(found),
                    Err(e) => tracing::error!(account = %account_name, error = %e, "account run failed"),
                }
            }
        })
        .await;

    let touched = Arc::try_unwrap(touched)
        .expect("all account tasks joined before this point")
        .into_inner()
        .expect("touched set poisoned");

    let pruned = store.prune_expired_tags().await?;
    tracing::info!(pruned, "expired tags pruned");

    let report = store.report_tracking_status(&touched)?;
    if let Some(path) = &config.step_summary_path {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening {}", path.display()))?;
        file.write_all(report.to_markdown().as_bytes())
            .with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(())
}

async fn process_download_account(
    mut record: AccountRecord,
    store: Arc<GitStore>,
    aes_key: &[u8; 32],
    concurrent_manifest: usize,
) -> Result<BTreeSet<(u32, u32)>> {
    let account_password = record.account_password.clone();
    let refresh_token = record.refresh_token.clone();

    let (session, logon) = match SteamSession::connect(
        &record.account_name,
        account_password.as_deref(),
        refresh_token.as_deref(),
    )
    .await
    {
        Ok(pair) => pair,
        Err(SteamError::Terminal(reason)) => {
            tracing::warn!(account = %record.account_name, %reason, "account logon rejected");
            if should_remove(&reason) {
                if let Some(index) = &record.index {
                    store.remove_account(index).await?;
                }
            }
            return Ok(BTreeSet::new());
        }
        Err(e) => return Err(e.into()),
    };

    let new_index = manifesthub_crypto::branch_index(logon.steam_id64);
    let rotated = record.index.as_deref() != Some(new_index.as_str())
        || record.refresh_token.as_deref() != Some(logon.refresh_token.as_str());
    record.index = Some(new_index);
    record.refresh_token = Some(logon.refresh_token);
    record.last_refresh = Some(chrono::Utc::now());
    if rotated {
        store.write_account(&record, aes_key).await?;
    }

    let catalog: Arc<dyn Catalog> = Arc::new(VentCatalog::new(session.clone_connection()));
    let touched = manifesthub_downloader::run_account(catalog, store, concurrent_manifest).await?;
    session.disconnect().await;
    Ok(touched)
}

async fn run_account_ingestion(config: &RunConfig, store: Arc<GitStore>) -> Result<()> {
    let path = config
        .account_path
        .as_ref()
        .expect("validated: account mode requires --account");
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let accounts = ingest::load_ingestion_file(&content, config.rsa_private_key.as_deref())?;

    let entries: Vec<(String, Vec<String>)> = accounts.into_iter().collect();
    let total = entries.len();
    let assigned: Vec<(String, Vec<String>)> = entries
        .into_iter()
        .enumerate()
        .filter(|(i, _)| (*i as u32) % config.number == config.index)
        .map(|(_, entry)| entry)
        .collect();
    tracing::info!(total, assigned = assigned.len(), "partitioned ingestion accounts");

    let aes_key = config.aes_key;
    stream::iter(assigned)
        .for_each_concurrent(config.concurrent_account.max(1), |(account_name, passwords)| {
            let store = store.clone();
            async move {
                if let Err(e) = refresh_one_account(&account_name, passwords, &store, &aes_key).await {
                    tracing::error!(account = %account_name, error = %e, "account ingestion failed");
                }
            }
        })
        .await;

    Ok(())
}

async fn refresh_one_account(
    account_name: &str,
    passwords: Vec<String>,
    store: &GitStore,
    aes_key: &[u8; 32],
) -> Result<()> {
    let existing = store.get_account(account_name, aes_key)?;
    let password = passwords
        .into_iter()
        .next()
        .or_else(|| existing.as_ref().and_then(|r| r.account_password.clone()));
    let refresh_token = existing.as_ref().and_then(|r| r.refresh_token.clone());

    let (session, logon) =
        match SteamSession::connect(account_name, password.as_deref(), refresh_token.as_deref()).await {
            Ok(pair) => pair,
            Err(SteamError::Terminal(reason)) => {
                tracing::warn!(account = %account_name, %reason, "ingestion logon rejected");
                if should_remove(&reason) {
                    if let Some(index) = existing.as_ref().and_then(|r| r.index.as_deref()) {
                        store.remove_account(index).await?;
                    }
                }
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
    session.disconnect().await;

    let new_index = manifesthub_crypto::branch_index(logon.steam_id64);
    let rotated = existing.as_ref().and_then(|r| r.index.as_deref()) != Some(new_index.as_str())
        || existing.as_ref().and_then(|r| r.refresh_token.as_deref()) != Some(logon.refresh_token.as_str());

    let record = AccountRecord {
        account_name: account_name.to_string(),
        account_password: password,
        refresh_token: Some(logon.refresh_token),
        last_refresh: Some(chrono::Utc::now()),
        index: Some(new_index),
        aes_encrypted: None,
        aes_iv: None,
        touched_app_ids: Default::default(),
    };
    if rotated {
        store.write_account(&record, aes_key).await?;
    }
    Ok(())
}
