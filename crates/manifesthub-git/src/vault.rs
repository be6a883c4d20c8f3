//! Account vault: one branch per account, named by its derived branch
//! index, carrying a single `AccountInfo.json` blob.

use crate::{ArchiveError, COMMITTER_EMAIL, COMMITTER_NAME, GitStore, push_delete_ref, push_ref};
use git2::Repository;
use manifesthub_core::AccountRecord;

const FRIEND_CODE_ALPHABET: &str = "ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Errors loading, decrypting, or storing an [`AccountRecord`].
#[derive(Debug, thiserror::Error)]
pub enum AccountLoadError {
    /// `AccountInfo.json` did not parse as an [`AccountRecord`].
    #[error("account record was not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// A stored secret failed to decrypt (wrong key, corrupt IV, ...).
    #[error("failed to decrypt account secret: {0}")]
    Decrypt(#[from] manifesthub_crypto::CryptoError),
}

impl GitStore {
    /// Writes `record` to its branch (`record.index`), encrypting
    /// `account_password`/`refresh_token` under `aes_key` first. A no-op if
    /// the encrypted record is byte-identical to the branch tip.
    pub async fn write_account(
        &self,
        record: &AccountRecord,
        aes_key: &[u8; 32],
    ) -> Result<(), ArchiveError> {
        let index = record
            .index
            .clone()
            .expect("account record must carry a branch index before being written");
        let lock = self.branch_lock(&index);
        let _guard = lock.lock().await;

        let encrypted = encrypt_record(record, aes_key);
        let json = serde_json::to_vec_pretty(&encrypted).map_err(AccountLoadError::from)?;

        let repo = self.repo.clone();
        let push_token = self.push_token.clone();
        let branch_ref = format!("refs/heads/{index}");

        tokio::task::spawn_blocking(move || -> Result<(), git2::Error> {
            let repo = repo.lock().expect("git repository mutex poisoned");
            write_account_blocking(&repo, &push_token, &branch_ref, &json)
        })
        .await??;
        Ok(())
    }

    /// Force-deletes an account's branch, both locally and on `origin`.
    pub async fn remove_account(&self, index: &str) -> Result<(), ArchiveError> {
        let lock = self.branch_lock(index);
        let _guard = lock.lock().await;

        let repo = self.repo.clone();
        let push_token = self.push_token.clone();
        let branch_ref = format!("refs/heads/{index}");

        tokio::task::spawn_blocking(move || -> Result<(), git2::Error> {
            let repo = repo.lock().expect("git repository mutex poisoned");
            if let Ok(mut reference) = repo.find_reference(&branch_ref) {
                reference.delete()?;
            }
            push_delete_ref(&repo, &push_token, &branch_ref)
        })
        .await??;
        Ok(())
    }

    /// Scans every local branch whose name matches the account branch-index
    /// pattern, decrypts its record, and returns all of them.
    ///
    /// Records that fail to decrypt or parse are skipped with a warning
    /// rather than aborting the whole scan.
    pub fn enumerate_accounts(&self, aes_key: &[u8; 32]) -> Result<Vec<AccountRecord>, ArchiveError> {
        let repo = self.repo.lock().expect("git repository mutex poisoned");
        let mut out = Vec::new();
        for item in repo.branches(Some(git2::BranchType::Local))? {
            let (branch, _) = item?;
            let Some(name) = branch.name()?.map(str::to_string) else {
                continue;
            };
            if !is_account_branch_name(&name) {
                continue;
            }
            let Ok(commit) = branch.get().peel_to_commit() else {
                continue;
            };
            let Ok(tree) = commit.tree() else { continue };
            let Some(entry) = tree.get_name("AccountInfo.json") else {
                continue;
            };
            let Ok(obj) = entry.to_object(&repo) else {
                continue;
            };
            let Some(blob) = obj.as_blob() else { continue };
            let encrypted: AccountRecord = match serde_json::from_slice(blob.content()) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(branch = %name, error = %e, "account record was not valid JSON");
                    continue;
                }
            };
            match decrypt_record(encrypted, aes_key) {
                Ok(record) => out.push(record),
                Err(e) => {
                    tracing::warn!(branch = %name, error = %e, "failed to decrypt account record")
                }
            }
        }
        Ok(out)
    }

    /// Finds one account by login name, decrypting its stored secrets.
    pub fn get_account(
        &self,
        account_name: &str,
        aes_key: &[u8; 32],
    ) -> Result<Option<AccountRecord>, ArchiveError> {
        Ok(self
            .enumerate_accounts(aes_key)?
            .into_iter()
            .find(|r| r.account_name == account_name))
    }
}

fn is_account_branch_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() == 10
        && bytes[5] == b'-'
        && name
            .char_indices()
            .all(|(i, c)| if i == 5 { c == '-' } else { FRIEND_CODE_ALPHABET.contains(c) })
}

/// Encrypts `account_password`/`refresh_token`, storing their IVs
/// colon-joined in `aes_iv` (empty segment for whichever secret is absent).
fn encrypt_record(record: &AccountRecord, key: &[u8; 32]) -> AccountRecord {
    let mut out = record.clone();
    let password_iv = match &record.account_password {
        Some(password) => {
            let (ciphertext, iv) = manifesthub_crypto::encrypt_secret(password, key);
            out.account_password = Some(ciphertext);
            iv
        }
        None => String::new(),
    };
    let token_iv = match &record.refresh_token {
        Some(token) => {
            let (ciphertext, iv) = manifesthub_crypto::encrypt_secret(token, key);
            out.refresh_token = Some(ciphertext);
            iv
        }
        None => String::new(),
    };
    out.aes_iv = Some(format!("{password_iv}:{token_iv}"));
    out.aes_encrypted = Some(true);
    out
}

fn decrypt_record(record: AccountRecord, key: &[u8; 32]) -> Result<AccountRecord, AccountLoadError> {
    let mut out = record.clone();
    if !record.is_encrypted() {
        return Ok(out);
    }
    let iv_field = record.aes_iv.as_deref().unwrap_or_default();
    let mut ivs = iv_field.splitn(2, ':');
    let password_iv = ivs.next().unwrap_or_default();
    let token_iv = ivs.next().unwrap_or_default();

    if let Some(ciphertext) = &record.account_password {
        if !password_iv.is_empty() {
            out.account_password =
                Some(manifesthub_crypto::decrypt_secret(ciphertext, password_iv, key)?);
        }
    }
    if let Some(ciphertext) = &record.refresh_token {
        if !token_iv.is_empty() {
            out.refresh_token = Some(manifesthub_crypto::decrypt_secret(ciphertext, token_iv, key)?);
        }
    }
    out.aes_encrypted = Some(false);
    out.aes_iv = None;
    Ok(out)
}

fn write_account_blocking(
    repo: &Repository,
    push_token: &str,
    branch_ref: &str,
    json: &[u8],
) -> Result<(), git2::Error> {
    let existing_commit = repo
        .find_reference(branch_ref)
        .ok()
        .and_then(|r| r.peel_to_commit().ok());

    let mut builder = repo.treebuilder(None)?;
    let blob_oid = repo.blob(json)?;
    builder.insert("AccountInfo.json", blob_oid, i32::from(git2::FileMode::Blob))?;
    let new_tree_oid = builder.write()?;

    if let Some(commit) = &existing_commit {
        if commit.tree_id() == new_tree_oid {
            return Ok(());
        }
    }

    let signature = git2::Signature::now(COMMITTER_NAME, COMMITTER_EMAIL)?;
    let new_tree = repo.find_tree(new_tree_oid)?;
    let parents: Vec<&git2::Commit> = existing_commit.iter().collect();
    let commit_oid = repo.commit(
        None,
        &signature,
        &signature,
        "Update AccountInfo.json",
        &new_tree,
        &parents,
    )?;
    repo.reference(branch_ref, commit_oid, true, "manifesthub: update account")?;
    push_ref(repo, push_token, branch_ref)
}
