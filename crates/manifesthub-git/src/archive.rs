//! Manifest archive: per-app branches carrying manifest blobs and an
//! accumulating `Key.vdf`, plus the tag index that makes `has_manifest` an
//! O(1) check.

use crate::{ArchiveError, COMMITTER_EMAIL, COMMITTER_NAME, GitStore, push_delete_ref, push_ref};
use git2::Repository;
use manifesthub_core::ManifestDescriptor;
use std::collections::{BTreeSet, HashMap};

/// Result of a [`GitStore::write_manifest`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// A new commit and tag were created.
    Written,
    /// The tree would have been identical to the current tip; no commit was
    /// made, but the tag was created (or confirmed to already exist).
    Unchanged,
    /// The `(app, depot, manifest)` triple was already tagged; no work done.
    AlreadyPresent,
}

/// Tracking status derived from the archive's tags against a run's touched
/// `(app, depot)` set: which pairs are actively managed and still in scope,
/// which are managed but no longer touched by any license, and which were
/// touched this run but never successfully archived.
#[derive(Debug, Clone, Default)]
pub struct TrackingReport {
    /// Managed and touched this run.
    pub active: Vec<(u32, u32)>,
    /// Managed, but not touched this run (no license currently sees them).
    pub orphan: Vec<(u32, u32)>,
    /// Touched this run, but never successfully archived (access denied).
    pub access_denied: Vec<(u32, u32)>,
}

impl TrackingReport {
    /// Renders the report as the Markdown summary ManifestHub appends to
    /// `GITHUB_STEP_SUMMARY`.
    pub fn to_markdown(&self) -> String {
        let mut out = String::from("# ManifestHub tracking report\n\n");
        render_section(&mut out, "Active", &self.active);
        render_section(&mut out, "Orphan", &self.orphan);
        render_section(&mut out, "Access Denied", &self.access_denied);
        out
    }
}

fn render_section(out: &mut String, title: &str, rows: &[(u32, u32)]) {
    out.push_str(&format!("## {title}\n\n"));
    if rows.is_empty() {
        out.push_str("_none_\n\n");
        return;
    }
    out.push_str("| App | Depot |\n|---|---|\n");
    for (app, depot) in rows {
        out.push_str(&format!("| {app} | {depot} |\n"));
    }
    out.push('\n');
}

impl GitStore {
    /// Returns whether the archive already has a tag for this triple.
    /// Must be consulted before spending any network effort fetching it.
    pub fn has_manifest(
        &self,
        app_id: u32,
        depot_id: u32,
        manifest_id: u64,
    ) -> Result<bool, ArchiveError> {
        let tag_ref = format!(
            "refs/tags/{}",
            manifesthub_core::tag_name(app_id, depot_id, manifest_id)
        );
        let repo = self.repo.lock().expect("git repository mutex poisoned");
        Ok(repo.find_reference(&tag_ref).is_ok())
    }

    /// Writes a downloaded manifest to its app branch, tagging the
    /// resulting commit. Idempotent: a repeat call for the same triple is a
    /// no-op, since the tag itself records that the triple is archived.
    pub async fn write_manifest(
        &self,
        descriptor: &ManifestDescriptor,
    ) -> Result<WriteOutcome, ArchiveError> {
        if self.has_manifest(descriptor.app_id, descriptor.depot_id, descriptor.manifest_id)? {
            return Ok(WriteOutcome::AlreadyPresent);
        }

        let branch = manifesthub_core::app_branch_name(descriptor.app_id);
        let lock = self.branch_lock(&branch);
        let _guard = lock.lock().await;

        // Re-check under the lock to close the TOCTOU window against a
        // concurrent writer that just finished the same triple.
        if self.has_manifest(descriptor.app_id, descriptor.depot_id, descriptor.manifest_id)? {
            return Ok(WriteOutcome::AlreadyPresent);
        }

        let repo = self.repo.clone();
        let push_token = self.push_token.clone();
        let descriptor = descriptor.clone();
        let branch_ref = format!("refs/heads/{branch}");
        let tag = descriptor.tag_name();
        let tag_ref = format!("refs/tags/{tag}");

        let outcome = tokio::task::spawn_blocking(move || -> Result<WriteOutcome, git2::Error> {
            let repo = repo.lock().expect("git repository mutex poisoned");
            write_manifest_blocking(&repo, &push_token, &branch_ref, &tag, &tag_ref, &descriptor)
        })
        .await??;

        Ok(outcome)
    }

    /// Groups tags by `(app, depot)` and deletes every tag but the newest
    /// (by commit time) within each group, both locally and on `origin`.
    /// Returns the number of tags pruned.
    pub async fn prune_expired_tags(&self) -> Result<usize, ArchiveError> {
        let repo = self.repo.clone();
        let push_token = self.push_token.clone();
        let pruned = tokio::task::spawn_blocking(move || -> Result<usize, git2::Error> {
            let repo = repo.lock().expect("git repository mutex poisoned");
            prune_expired_tags_blocking(&repo, &push_token)
        })
        .await??;
        Ok(pruned)
    }

    /// Builds a [`TrackingReport`] from the archive's tags against the
    /// `(app, depot)` pairs touched during the current run.
    pub fn report_tracking_status(
        &self,
        touched: &BTreeSet<(u32, u32)>,
    ) -> Result<TrackingReport, ArchiveError> {
        let repo = self.repo.lock().expect("git repository mutex poisoned");
        let mut managed = BTreeSet::new();
        for name in repo.tag_names(None)?.iter().flatten() {
            if let Some((app_id, depot_id)) = parse_tag_prefix(name) {
                managed.insert((app_id, depot_id));
            }
        }
        Ok(TrackingReport {
            active: managed.intersection(touched).copied().collect(),
            orphan: managed.difference(touched).copied().collect(),
            access_denied: touched.difference(&managed).copied().collect(),
        })
    }
}

fn parse_tag_prefix(tag: &str) -> Option<(u32, u32)> {
    let parts: Vec<&str> = tag.splitn(3, '_').collect();
    match parts.as_slice() {
        [app_str, depot_str, _manifest_str] => {
            Some((app_str.parse().ok()?, depot_str.parse().ok()?))
        }
        _ => None,
    }
}

fn write_manifest_blocking(
    repo: &Repository,
    push_token: &str,
    branch_ref: &str,
    tag: &str,
    tag_ref: &str,
    descriptor: &ManifestDescriptor,
) -> Result<WriteOutcome, git2::Error> {
    let existing_commit = repo
        .find_reference(branch_ref)
        .ok()
        .and_then(|r| r.peel_to_commit().ok());
    let old_tree = existing_commit.as_ref().map(|c| c.tree()).transpose()?;

    let mut builder = repo.treebuilder(old_tree.as_ref())?;

    // Read whatever depot keys were already recorded (an unreadable or
    // missing Key.vdf parses to an empty map), and remove the stale blob
    // for this depot so the branch keeps at most one manifest per depot.
    let mut depot_keys = old_tree
        .as_ref()
        .and_then(|tree| tree.get_name("Key.vdf"))
        .and_then(|entry| entry.to_object(repo).ok())
        .and_then(|obj| obj.into_blob().ok())
        .map(|blob| crate::vdf::parse(&String::from_utf8_lossy(blob.content())))
        .unwrap_or_default();

    // `builder` was seeded from `old_tree`; drop the stale Key.vdf and the
    // prior blob for this depot so the branch keeps at most one manifest
    // per depot.
    if let Some(tree) = &old_tree {
        for entry in tree.iter() {
            let Some(name) = entry.name() else { continue };
            if name == "Key.vdf" || manifesthub_core::depot_id_from_blob_name(name) == Some(descriptor.depot_id) {
                builder.remove(name)?;
            }
        }
    }

    depot_keys.insert(descriptor.depot_id, hex::encode(descriptor.depot_key));
    let vdf_oid = repo.blob(crate::vdf::render(&depot_keys).as_bytes())?;
    builder.insert("Key.vdf", vdf_oid, i32::from(git2::FileMode::Blob))?;

    let manifest_oid = repo.blob(&descriptor.manifest)?;
    builder.insert(
        &descriptor.blob_name(),
        manifest_oid,
        i32::from(git2::FileMode::Blob),
    )?;

    let new_tree_oid = builder.write()?;

    if let Some(commit) = &existing_commit {
        if commit.tree_id() == new_tree_oid {
            tag_commit_idempotent(repo, tag, commit.id())?;
            push_ref(repo, push_token, tag_ref)?;
            return Ok(WriteOutcome::Unchanged);
        }
    }

    let signature = git2::Signature::now(COMMITTER_NAME, COMMITTER_EMAIL)?;
    let new_tree = repo.find_tree(new_tree_oid)?;
    let parents: Vec<&git2::Commit> = existing_commit.iter().collect();
    let message = format!("Update {}", descriptor.blob_name());
    let commit_oid = repo.commit(None, &signature, &signature, &message, &new_tree, &parents)?;

    repo.reference(branch_ref, commit_oid, true, "manifesthub: update manifest")?;
    push_ref(repo, push_token, branch_ref)?;

    tag_commit_idempotent(repo, tag, commit_oid)?;
    push_ref(repo, push_token, tag_ref)?;

    Ok(WriteOutcome::Written)
}

fn tag_commit_idempotent(repo: &Repository, tag: &str, commit_oid: git2::Oid) -> Result<(), git2::Error> {
    let commit = repo.find_commit(commit_oid)?;
    let signature = git2::Signature::now(COMMITTER_NAME, COMMITTER_EMAIL)?;
    match repo.tag(tag, commit.as_object(), &signature, tag, false) {
        Ok(_) => Ok(()),
        Err(e) if e.code() == git2::ErrorCode::Exists => Ok(()),
        Err(e) => Err(e),
    }
}

fn prune_expired_tags_blocking(repo: &Repository, push_token: &str) -> Result<usize, git2::Error> {
    let mut groups: HashMap<(u32, u32), Vec<(String, i64)>> = HashMap::new();
    for name in repo.tag_names(None)?.iter().flatten() {
        let Some((app_id, depot_id)) = parse_tag_prefix(name) else {
            continue;
        };
        let reference = repo.find_reference(&format!("refs/tags/{name}"))?;
        let commit = reference.peel_to_commit()?;
        groups
            .entry((app_id, depot_id))
            .or_default()
            .push((name.to_string(), commit.time().seconds()));
    }

    let mut pruned = 0usize;
    for mut tags in groups.into_values() {
        if tags.len() <= 1 {
            continue;
        }
        tags.sort_by_key(|(_, when)| *when);
        tags.pop(); // keep the newest
        for (name, _) in tags {
            let tag_ref = format!("refs/tags/{name}");
            if let Ok(mut reference) = repo.find_reference(&tag_ref) {
                reference.delete()?;
            }
            push_delete_ref(repo, push_token, &tag_ref)?;
            pruned += 1;
        }
    }
    Ok(pruned)
}
