//! Commit inspection and object-surgery amends.
//!
//! Amending never goes through the worktree: a throwaway index file is seeded
//! from the target commit's tree, the patch is applied with `git apply
//! --cached`, and a replacement commit is written with `git commit-tree`
//! carrying the original author name, email, date and message.

use std::io::Write;
use std::process::{Command, Stdio};

use crate::errors::{Error, Result};

use super::refs::Oid;
use super::{verbose_cmd, GitGateway};

/// Author identity and message of a commit, captured before rewriting it.
#[derive(Debug, Clone)]
pub struct CommitMetadata {
    pub author_name: String,
    pub author_email: String,
    /// Seconds since epoch plus offset, formatted for `GIT_AUTHOR_DATE`.
    pub author_date: String,
    pub message: String,
    pub summary: String,
    pub tree: Oid,
    pub parent: Option<Oid>,
}

impl GitGateway {
    /// Metadata of a single commit.
    pub fn commit_metadata(&self, sha: &Oid) -> Result<CommitMetadata> {
        let commit = self.repo.find_commit(sha.to_git2()?)?;
        let author = commit.author();
        let when = author.when();
        let sign = if when.offset_minutes() < 0 { '-' } else { '+' };
        let offset = when.offset_minutes().abs();
        let author_date = format!(
            "{} {}{:02}{:02}",
            when.seconds(),
            sign,
            offset / 60,
            offset % 60
        );
        Ok(CommitMetadata {
            author_name: author.name().unwrap_or("").to_string(),
            author_email: author.email().unwrap_or("").to_string(),
            author_date,
            message: commit.message().unwrap_or("").to_string(),
            summary: commit.summary().unwrap_or("").to_string(),
            tree: Oid::from_git2(commit.tree_id()),
            parent: commit.parent_ids().next().map(Oid::from_git2),
        })
    }

    /// Commits reachable from `to` but not from `from`, ordered
    /// nearest-to-`from` first (oldest first).
    pub fn commits_between(&self, from: &Oid, to: &Oid) -> Result<Vec<Oid>> {
        let mut walk = self.repo.revwalk()?;
        walk.push(to.to_git2()?)?;
        walk.hide(from.to_git2()?)?;
        walk.set_sorting(git2::Sort::TOPOLOGICAL | git2::Sort::REVERSE)?;
        let mut out = Vec::new();
        for oid in walk {
            out.push(Oid::from_git2(oid?));
        }
        Ok(out)
    }

    /// Run a git command against a throwaway index seeded from `base_tree`,
    /// returning the command output. The index file is removed afterwards.
    fn with_temp_index<F>(&self, base_tree: &Oid, f: F) -> Result<std::process::Output>
    where
        F: FnOnce(&std::path::Path) -> Result<std::process::Output>,
    {
        let index_path = self.git_dir.join(format!(
            "stackit-index-{}-{}",
            std::process::id(),
            base_tree.short()
        ));

        verbose_cmd(&["read-tree", base_tree.as_str()]);
        let seed = Command::new("git")
            .args(["read-tree", base_tree.as_str()])
            .env("GIT_INDEX_FILE", &index_path)
            .current_dir(&self.workdir)
            .output()
            .map_err(|e| Error::Fatal(format!("failed to spawn git read-tree: {}", e)))?;
        if !seed.status.success() {
            let _ = std::fs::remove_file(&index_path);
            return Err(Error::Fatal(format!(
                "git read-tree failed: {}",
                String::from_utf8_lossy(&seed.stderr).trim()
            )));
        }

        let result = f(&index_path);
        let _ = std::fs::remove_file(&index_path);
        result
    }

    /// Whether a patch applies cleanly onto a commit's tree.
    pub fn apply_check_on_commit(&self, patch: &str, commit: &Oid) -> Result<bool> {
        let tree = self.commit_metadata(commit)?.tree;
        let output = self.with_temp_index(&tree, |index_path| {
            verbose_cmd(&["apply", "--cached", "--check", "-"]);
            let mut child = Command::new("git")
                .args(["apply", "--cached", "--check", "-"])
                .env("GIT_INDEX_FILE", index_path)
                .current_dir(&self.workdir)
                .stdin(Stdio::piped())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
                .map_err(|e| Error::Fatal(format!("failed to spawn git apply: {}", e)))?;
            child
                .stdin
                .as_mut()
                .ok_or_else(|| Error::Fatal("apply stdin unavailable".to_string()))?
                .write_all(patch.as_bytes())?;
            child
                .wait_with_output()
                .map_err(|e| Error::Fatal(format!("git apply failed: {}", e)))
        })?;
        Ok(output.status.success())
    }

    /// Apply a patch onto an existing tree, returning the new tree's id.
    pub fn apply_patch_to_tree(&self, tree: &Oid, patch: &str) -> Result<Oid> {
        let apply = self.with_temp_index(tree, |index_path| {
            verbose_cmd(&["apply", "--cached", "-"]);
            let mut child = Command::new("git")
                .args(["apply", "--cached", "-"])
                .env("GIT_INDEX_FILE", index_path)
                .current_dir(&self.workdir)
                .stdin(Stdio::piped())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .spawn()
                .map_err(|e| Error::Fatal(format!("failed to spawn git apply: {}", e)))?;
            child
                .stdin
                .as_mut()
                .ok_or_else(|| Error::Fatal("apply stdin unavailable".to_string()))?
                .write_all(patch.as_bytes())?;
            let applied = child
                .wait_with_output()
                .map_err(|e| Error::Fatal(format!("git apply failed: {}", e)))?;
            if !applied.status.success() {
                return Err(Error::Fatal(format!(
                    "patch does not apply onto tree {}: {}",
                    tree.short(),
                    String::from_utf8_lossy(&applied.stderr).trim()
                )));
            }

            verbose_cmd(&["write-tree"]);
            Command::new("git")
                .args(["write-tree"])
                .env("GIT_INDEX_FILE", index_path)
                .current_dir(&self.workdir)
                .output()
                .map_err(|e| Error::Fatal(format!("git write-tree failed: {}", e)))
        })?;
        if !apply.status.success() {
            return Err(Error::Fatal(format!(
                "git write-tree failed: {}",
                String::from_utf8_lossy(&apply.stderr).trim()
            )));
        }
        Oid::parse(&String::from_utf8_lossy(&apply.stdout))
    }

    /// Amend a commit with a patch, preserving author identity, date and
    /// message. Returns the replacement commit id. The branch ref is not
    /// touched; callers graft descendants and move refs themselves.
    pub fn amend_commit_with_patch(&self, commit: &Oid, patch: &str) -> Result<Oid> {
        let meta = self.commit_metadata(commit)?;
        let new_tree = self.apply_patch_to_tree(&meta.tree, patch)?;
        self.commit_tree_as(&new_tree, meta.parent.as_ref(), &meta)
    }

    /// Write a commit object for `tree` with the given parent, carrying the
    /// author identity, date and message from `meta`.
    pub fn commit_tree_as(
        &self,
        tree: &Oid,
        parent: Option<&Oid>,
        meta: &CommitMetadata,
    ) -> Result<Oid> {
        let mut args: Vec<String> = vec!["commit-tree".to_string(), tree.to_string()];
        if let Some(p) = parent {
            args.push("-p".to_string());
            args.push(p.to_string());
        }
        let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        verbose_cmd(&arg_refs);

        let mut child = Command::new("git")
            .args(&args)
            .env("GIT_AUTHOR_NAME", &meta.author_name)
            .env("GIT_AUTHOR_EMAIL", &meta.author_email)
            .env("GIT_AUTHOR_DATE", &meta.author_date)
            .current_dir(&self.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Fatal(format!("failed to spawn git commit-tree: {}", e)))?;
        child
            .stdin
            .as_mut()
            .ok_or_else(|| Error::Fatal("commit-tree stdin unavailable".to_string()))?
            .write_all(meta.message.as_bytes())?;
        let output = child
            .wait_with_output()
            .map_err(|e| Error::Fatal(format!("git commit-tree failed: {}", e)))?;
        if !output.status.success() {
            return Err(Error::Fatal(format!(
                "git commit-tree failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Oid::parse(&String::from_utf8_lossy(&output.stdout))
    }

    /// Collapse a branch's commits into one commit on top of `onto`,
    /// preserving the author of the branch's first unique commit.
    pub fn squash_commits(&self, branch_tip: &Oid, onto: &Oid, message: &str) -> Result<Oid> {
        let commits = self.commits_between(onto, branch_tip)?;
        let first = commits
            .first()
            .ok_or_else(|| Error::Fatal("nothing to squash".to_string()))?;
        let mut meta = self.commit_metadata(first)?;
        meta.message = message.to_string();
        meta.tree = self.commit_metadata(branch_tip)?.tree;
        self.commit_tree_as(&meta.tree.clone(), Some(onto), &meta)
    }

    /// Stage all changes (`git add -A`).
    pub fn stage_all(&self) -> Result<()> {
        self.run_git_ok(&["add", "-A"])?;
        Ok(())
    }

    /// Stage updates to tracked files only (`git add -u`).
    pub fn stage_updates(&self) -> Result<()> {
        self.run_git_ok(&["add", "-u"])?;
        Ok(())
    }

    /// Commit the staged index.
    pub fn create_commit(&self, message: &str) -> Result<Oid> {
        self.run_git_ok(&["commit", "-m", message])?;
        self.rev_parse("HEAD")
    }

    /// Subject line of a commit.
    pub fn commit_subject(&self, sha: &Oid) -> Result<String> {
        Ok(self.commit_metadata(sha)?.summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_context::{commit_file, init_test_repo};
    use tempfile::tempdir;

    #[test]
    fn test_commits_between_ordering() {
        let dir = tempdir().unwrap();
        let repo = init_test_repo(dir.path()).unwrap();
        let base = Oid::from_git2(repo.head().unwrap().peel_to_commit().unwrap().id());
        let second = Oid::from_git2(commit_file(&repo, "a.txt", "1\n", "second").unwrap());
        let third = Oid::from_git2(commit_file(&repo, "a.txt", "2\n", "third").unwrap());

        let gateway = GitGateway::from_path(dir.path()).unwrap();
        let between = gateway.commits_between(&base, &third).unwrap();
        assert_eq!(between, vec![second, third]);
    }

    #[test]
    fn test_commit_metadata_captures_author() {
        let dir = tempdir().unwrap();
        let repo = init_test_repo(dir.path()).unwrap();
        let sha = Oid::from_git2(commit_file(&repo, "a.txt", "1\n", "subject line\n\nbody").unwrap());

        let gateway = GitGateway::from_path(dir.path()).unwrap();
        let meta = gateway.commit_metadata(&sha).unwrap();
        assert_eq!(meta.author_name, "Test User");
        assert_eq!(meta.author_email, "test@example.com");
        assert_eq!(meta.summary, "subject line");
        assert!(meta.message.contains("body"));
        assert!(meta.parent.is_some());
    }

    #[test]
    fn test_amend_commit_with_patch_preserves_author_and_message() {
        let dir = tempdir().unwrap();
        let repo = init_test_repo(dir.path()).unwrap();
        let target =
            Oid::from_git2(commit_file(&repo, "file.txt", "alpha\nbeta\n", "add file").unwrap());

        let gateway = GitGateway::from_path(dir.path()).unwrap();
        let patch = "\
diff --git a/file.txt b/file.txt
--- a/file.txt
+++ b/file.txt
@@ -1,2 +1,2 @@
-alpha
+ALPHA
 beta
";
        assert!(gateway.apply_check_on_commit(patch, &target).unwrap());
        let amended = gateway.amend_commit_with_patch(&target, patch).unwrap();
        assert_ne!(amended, target);

        let old_meta = gateway.commit_metadata(&target).unwrap();
        let new_meta = gateway.commit_metadata(&amended).unwrap();
        assert_eq!(new_meta.message, old_meta.message);
        assert_eq!(new_meta.author_name, old_meta.author_name);
        assert_eq!(new_meta.author_date, old_meta.author_date);
        assert_eq!(new_meta.parent, old_meta.parent);
        assert_ne!(new_meta.tree, old_meta.tree);
    }

    #[test]
    fn test_apply_check_rejects_conflicting_patch() {
        let dir = tempdir().unwrap();
        let repo = init_test_repo(dir.path()).unwrap();
        let target =
            Oid::from_git2(commit_file(&repo, "file.txt", "alpha\nbeta\n", "add file").unwrap());

        let gateway = GitGateway::from_path(dir.path()).unwrap();
        let patch = "\
diff --git a/file.txt b/file.txt
--- a/file.txt
+++ b/file.txt
@@ -1,2 +1,2 @@
-different
+DIFFERENT
 beta
";
        assert!(!gateway.apply_check_on_commit(patch, &target).unwrap());
    }

    #[test]
    fn test_squash_commits_single_commit_with_branch_tree() {
        let dir = tempdir().unwrap();
        let repo = init_test_repo(dir.path()).unwrap();
        let base = Oid::from_git2(repo.head().unwrap().peel_to_commit().unwrap().id());
        commit_file(&repo, "a.txt", "1\n", "first change").unwrap();
        let tip = Oid::from_git2(commit_file(&repo, "b.txt", "2\n", "second change").unwrap());

        let gateway = GitGateway::from_path(dir.path()).unwrap();
        let squashed = gateway.squash_commits(&tip, &base, "combined change").unwrap();

        let meta = gateway.commit_metadata(&squashed).unwrap();
        assert_eq!(meta.message, "combined change");
        assert_eq!(meta.parent.as_ref(), Some(&base));
        assert_eq!(meta.tree, gateway.commit_metadata(&tip).unwrap().tree);
        assert_eq!(gateway.commits_between(&base, &squashed).unwrap().len(), 1);
    }
}
