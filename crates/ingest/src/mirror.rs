use std::path::Path;

use inboxmux_types::{InboxError, Result};

/// Public-inbox v2 keeps each message in a blob with this name at the tree root.
const V2_MESSAGE_BLOB: &str = "m";
/// A v2 removal commit swaps `m` for this blob, which holds the removed message.
const V2_REMOVED_BLOB: &str = "d";

/// The raw payload introduced by one mirror commit.
#[derive(Debug, Clone)]
pub struct RawMail {
    pub commit_id: String,
    /// `None` when the commit adds no message blob (e.g. a deletion).
    pub blob: Option<Vec<u8>>,
}

fn extraction(e: git2::Error) -> InboxError {
    InboxError::Extraction(e.message().to_string())
}

/// Read-only handle on a public-inbox git mirror.
pub struct Mirror {
    repo: git2::Repository,
    branch: Option<String>,
}

impl Mirror {
    pub fn open(path: &Path, branch: Option<&str>) -> Result<Self> {
        let repo = git2::Repository::open(path).map_err(|e| {
            InboxError::Extraction(format!(
                "cannot open mirror at {}: {}",
                path.display(),
                e.message()
            ))
        })?;
        Ok(Self {
            repo,
            branch: branch.map(str::to_string),
        })
    }

    /// Tip of the indexed branch, or `None` for an empty repository.
    fn resolve_tip(&self) -> Result<Option<git2::Oid>> {
        if let Some(ref branch_name) = self.branch {
            let refname = format!("refs/heads/{}", branch_name);
            for candidate in [refname.as_str(), branch_name.as_str()] {
                if let Ok(obj) = self.repo.revparse_single(candidate) {
                    if let Ok(commit) = obj.peel_to_commit() {
                        return Ok(Some(commit.id()));
                    }
                }
            }
            return Err(InboxError::Extraction(format!(
                "branch '{}' not found in mirror",
                branch_name
            )));
        }

        if self.repo.is_empty().map_err(extraction)? {
            return Ok(None);
        }

        let tip = self
            .repo
            .head()
            .map_err(extraction)?
            .peel_to_commit()
            .map_err(extraction)?;
        Ok(Some(tip.id()))
    }

    /// Commits after `since` (exclusive), oldest first.
    ///
    /// Fails if `since` is unknown or no longer an ancestor of the tip: the
    /// mirror has been rewritten and the watermark is meaningless.
    pub fn walk_since(&self, since: Option<&str>) -> Result<MailWalk<'_>> {
        let mut revwalk = self.repo.revwalk().map_err(extraction)?;
        revwalk
            .set_sorting(git2::Sort::TOPOLOGICAL | git2::Sort::REVERSE)
            .map_err(extraction)?;

        let tip = self.resolve_tip()?;

        if let Some(since) = since {
            let lost = |detail: &str| {
                InboxError::Extraction(format!(
                    "resume commit {} {}; the mirror history was rewritten",
                    since, detail
                ))
            };
            let since_oid = git2::Oid::from_str(since).map_err(|_| lost("is not a commit id"))?;
            self.repo
                .find_commit(since_oid)
                .map_err(|_| lost("is not in the mirror"))?;

            let tip = tip.ok_or_else(|| lost("is not reachable from an empty mirror"))?;
            let reachable = tip == since_oid
                || self
                    .repo
                    .graph_descendant_of(tip, since_oid)
                    .map_err(extraction)?;
            if !reachable {
                return Err(lost("is not an ancestor of the tip"));
            }
            revwalk.hide(since_oid).map_err(extraction)?;
        }

        if let Some(tip) = tip {
            revwalk.push(tip).map_err(extraction)?;
        }

        Ok(MailWalk {
            repo: &self.repo,
            revwalk,
        })
    }

    /// Re-read the message blob of one commit.
    pub fn read_message(&self, commit_id: &str) -> Result<Option<Vec<u8>>> {
        let oid = git2::Oid::from_str(commit_id)?;
        let commit = self.repo.find_commit(oid)?;
        message_blob(&self.repo, &commit)
    }
}

/// Lazy, ordered stream of [`RawMail`] from a [`Mirror`].
pub struct MailWalk<'repo> {
    repo: &'repo git2::Repository,
    revwalk: git2::Revwalk<'repo>,
}

impl Iterator for MailWalk<'_> {
    type Item = Result<RawMail>;

    fn next(&mut self) -> Option<Self::Item> {
        let oid = match self.revwalk.next()? {
            Ok(oid) => oid,
            Err(e) => return Some(Err(extraction(e))),
        };
        Some(self.load(oid))
    }
}

impl MailWalk<'_> {
    fn load(&self, oid: git2::Oid) -> Result<RawMail> {
        let commit = self.repo.find_commit(oid).map_err(|e| {
            InboxError::Extraction(format!("failed to find commit {}: {}", oid, e.message()))
        })?;
        let blob = message_blob(self.repo, &commit)?;
        Ok(RawMail {
            commit_id: oid.to_string(),
            blob,
        })
    }
}

/// The message payload a commit introduces.
///
/// v2 layout: blob `m` at the root, and a commit without `m` (a removal) has
/// no payload. v1 layout: the blob added or modified relative to the first
/// parent.
fn message_blob(repo: &git2::Repository, commit: &git2::Commit<'_>) -> Result<Option<Vec<u8>>> {
    let tree = commit.tree().map_err(extraction)?;

    if let Some(entry) = tree.get_name(V2_MESSAGE_BLOB) {
        if entry.kind() == Some(git2::ObjectType::Blob) {
            let blob = repo.find_blob(entry.id()).map_err(extraction)?;
            return Ok(Some(blob.content().to_vec()));
        }
    }

    let parent_tree = if commit.parent_count() > 0 {
        Some(
            commit
                .parent(0)
                .map_err(extraction)?
                .tree()
                .map_err(extraction)?,
        )
    } else {
        None
    };

    let v2_layout = tree.get_name(V2_REMOVED_BLOB).is_some()
        || parent_tree
            .as_ref()
            .is_some_and(|t| t.get_name(V2_MESSAGE_BLOB).is_some());
    if v2_layout {
        return Ok(None);
    }

    let diff = repo
        .diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)
        .map_err(extraction)?;

    for delta in diff.deltas() {
        if !matches!(delta.status(), git2::Delta::Added | git2::Delta::Modified) {
            continue;
        }
        if let Ok(blob) = repo.find_blob(delta.new_file().id()) {
            return Ok(Some(blob.content().to_vec()));
        }
    }

    Ok(None)
}
