//! Ref, object and ancestry operations.

use std::io::Write;
use std::process::{Command, Stdio};

use crate::errors::{Error, Result};

use super::{verbose_cmd, GitGateway};

/// Git object id (40-character lowercase hex).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Oid(String);

impl Oid {
    /// Parse and validate a 40-character hex id.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != 40 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::Fatal(format!("invalid object id '{}'", s)));
        }
        Ok(Self(s.to_lowercase()))
    }

    pub(crate) fn from_git2(oid: git2::Oid) -> Self {
        Self(oid.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form (first 7 characters).
    pub fn short(&self) -> &str {
        &self.0[..7]
    }

    pub(crate) fn to_git2(&self) -> Result<git2::Oid> {
        git2::Oid::from_str(&self.0).map_err(Error::from)
    }
}

impl std::fmt::Display for Oid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One entry in an atomic ref update: set the ref to an oid, or delete it.
#[derive(Debug, Clone)]
pub enum RefUpdate {
    Set { name: String, target: Oid },
    Delete { name: String },
}

impl GitGateway {
    /// Resolve a revision string to a commit id.
    pub fn rev_parse(&self, spec: &str) -> Result<Oid> {
        let obj = self
            .repo
            .revparse_single(spec)
            .map_err(|_| Error::RefNotFound(spec.to_string()))?;
        let commit = obj
            .peel(git2::ObjectType::Commit)
            .map_err(|_| Error::RefNotFound(spec.to_string()))?;
        Ok(Oid::from_git2(commit.id()))
    }

    /// Merge base of two commits.
    pub fn merge_base(&self, a: &Oid, b: &Oid) -> Result<Oid> {
        let base = self.repo.merge_base(a.to_git2()?, b.to_git2()?)?;
        Ok(Oid::from_git2(base))
    }

    /// Whether `ancestor` is an ancestor of (or equal to) `descendant`.
    pub fn is_ancestor(&self, ancestor: &Oid, descendant: &Oid) -> Result<bool> {
        if ancestor == descendant {
            return Ok(true);
        }
        Ok(self
            .repo
            .graph_descendant_of(descendant.to_git2()?, ancestor.to_git2()?)?)
    }

    /// Find a reference, returning its target oid.
    pub fn find_reference(&self, name: &str) -> Result<Option<Oid>> {
        match self.repo.find_reference(name) {
            Ok(r) => Ok(r.target().map(Oid::from_git2)),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// List references matching a glob pattern, as `(name, target)` pairs.
    pub fn list_references(&self, pattern: &str) -> Result<Vec<(String, Oid)>> {
        let mut out = Vec::new();
        for r in self.repo.references_glob(pattern)? {
            let r = r?;
            if let (Some(name), Some(target)) = (r.name(), r.target()) {
                out.push((name.to_string(), Oid::from_git2(target)));
            }
        }
        Ok(out)
    }

    /// Create or overwrite a reference.
    pub fn update_reference(&self, name: &str, target: &Oid, log_msg: &str) -> Result<()> {
        self.repo.reference(name, target.to_git2()?, true, log_msg)?;
        Ok(())
    }

    /// Delete a reference. Deleting a missing ref is not an error.
    pub fn delete_reference(&self, name: &str) -> Result<()> {
        match self.repo.find_reference(name) {
            Ok(mut r) => {
                r.delete()?;
                Ok(())
            }
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Apply a set of ref updates in one `git update-ref --stdin` transaction.
    ///
    /// All updates land or none do.
    pub fn update_refs_atomic(&self, updates: &[RefUpdate]) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }
        verbose_cmd(&["update-ref", "--stdin"]);

        let mut script = String::from("start\n");
        for update in updates {
            match update {
                RefUpdate::Set { name, target } => {
                    script.push_str(&format!("update {} {}\n", name, target));
                }
                RefUpdate::Delete { name } => {
                    script.push_str(&format!("delete {}\n", name));
                }
            }
        }
        script.push_str("prepare\ncommit\n");

        let mut child = Command::new("git")
            .args(["update-ref", "--stdin"])
            .current_dir(&self.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Fatal(format!("failed to spawn git update-ref: {}", e)))?;

        child
            .stdin
            .as_mut()
            .ok_or_else(|| Error::Fatal("update-ref stdin unavailable".to_string()))?
            .write_all(script.as_bytes())?;

        let output = child
            .wait_with_output()
            .map_err(|e| Error::Fatal(format!("git update-ref failed: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Fatal(format!(
                "atomic ref update failed: {}",
                stderr.trim()
            )));
        }
        Ok(())
    }

    /// Create a blob from content, returning its oid.
    pub fn create_blob(&self, content: &[u8]) -> Result<Oid> {
        let oid = self.repo.blob(content)?;
        Ok(Oid::from_git2(oid))
    }

    /// Read a blob's content by oid.
    pub fn read_blob(&self, oid: &Oid) -> Result<Vec<u8>> {
        let blob = self.repo.find_blob(oid.to_git2()?)?;
        Ok(blob.content().to_vec())
    }

    /// Value of a git config key, if set.
    pub fn config_value(&self, key: &str) -> Option<String> {
        self.repo
            .config()
            .ok()
            .and_then(|c| c.get_string(key).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_context::{commit_file, init_test_repo};
    use tempfile::tempdir;

    #[test]
    fn test_oid_parse_rejects_garbage() {
        assert!(Oid::parse("not-a-sha").is_err());
        assert!(Oid::parse(&"a".repeat(39)).is_err());
        assert!(Oid::parse(&"a".repeat(40)).is_ok());
    }

    #[test]
    fn test_rev_parse_and_ancestry() {
        let dir = tempdir().unwrap();
        let repo = init_test_repo(dir.path()).unwrap();
        let first = repo.head().unwrap().peel_to_commit().unwrap().id();
        commit_file(&repo, "a.txt", "one\n", "second commit").unwrap();

        let gateway = GitGateway::from_path(dir.path()).unwrap();
        let head = gateway.rev_parse("HEAD").unwrap();
        let root = Oid::from_git2(first);

        assert!(gateway.is_ancestor(&root, &head).unwrap());
        assert!(!gateway.is_ancestor(&head, &root).unwrap());
        assert_eq!(gateway.merge_base(&root, &head).unwrap(), root);
    }

    #[test]
    fn test_rev_parse_missing_ref() {
        let dir = tempdir().unwrap();
        let _repo = init_test_repo(dir.path()).unwrap();
        let gateway = GitGateway::from_path(dir.path()).unwrap();
        assert!(matches!(
            gateway.rev_parse("no-such-branch"),
            Err(Error::RefNotFound(_))
        ));
    }

    #[test]
    fn test_atomic_ref_updates_apply_together() {
        let dir = tempdir().unwrap();
        let _repo = init_test_repo(dir.path()).unwrap();
        let gateway = GitGateway::from_path(dir.path()).unwrap();
        let head = gateway.rev_parse("HEAD").unwrap();

        gateway
            .update_refs_atomic(&[
                RefUpdate::Set {
                    name: "refs/branch-metadata/a".to_string(),
                    target: head.clone(),
                },
                RefUpdate::Set {
                    name: "refs/branch-metadata/b".to_string(),
                    target: head.clone(),
                },
            ])
            .unwrap();

        assert!(gateway
            .find_reference("refs/branch-metadata/a")
            .unwrap()
            .is_some());

        gateway
            .update_refs_atomic(&[RefUpdate::Delete {
                name: "refs/branch-metadata/a".to_string(),
            }])
            .unwrap();
        assert!(gateway
            .find_reference("refs/branch-metadata/a")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_blob_round_trip() {
        let dir = tempdir().unwrap();
        let _repo = init_test_repo(dir.path()).unwrap();
        let gateway = GitGateway::from_path(dir.path()).unwrap();

        let oid = gateway.create_blob(b"{\"parent\":\"main\"}").unwrap();
        let content = gateway.read_blob(&oid).unwrap();
        assert_eq!(content, b"{\"parent\":\"main\"}");
    }
}
