//! Thread-local test context for parallel test execution.
//!
//! Tests never call `std::env::set_current_dir()` (process-wide, would force
//! serial execution). Instead they create a `TestRepoContext` which sets a
//! thread-local repository path consumed by `GitGateway::discover()` and
//! `Engine::open()` when compiled for tests.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

thread_local! {
    static TEST_REPO_PATH: RefCell<Option<PathBuf>> = const { RefCell::new(None) };
}

/// RAII guard that points repository discovery at a test directory.
///
/// The `PhantomData<*const ()>` makes the guard `!Send` so it cannot cross
/// thread boundaries and silently stop applying.
pub struct TestRepoContext {
    _phantom: PhantomData<*const ()>,
}

impl TestRepoContext {
    pub fn new(path: &Path) -> Self {
        TEST_REPO_PATH.with(|p| *p.borrow_mut() = Some(path.to_path_buf()));
        Self {
            _phantom: PhantomData,
        }
    }
}

impl Drop for TestRepoContext {
    fn drop(&mut self) {
        TEST_REPO_PATH.with(|p| *p.borrow_mut() = None);
    }
}

/// The test repository path for the current thread, if one is set.
pub fn test_repo_path() -> Option<PathBuf> {
    TEST_REPO_PATH.with(|p| p.borrow().clone())
}

/// Initialize a git repository with an initial commit on `main`, configured
/// for non-interactive use. Shared by unit tests across the crate.
#[cfg(test)]
pub fn init_test_repo(path: &Path) -> anyhow::Result<git2::Repository> {
    let mut opts = git2::RepositoryInitOptions::new();
    opts.initial_head("main");
    let repo = git2::Repository::init_opts(path, &opts)?;
    {
        let mut config = repo.config()?;
        config.set_str("user.name", "Test User")?;
        config.set_str("user.email", "test@example.com")?;
        config.set_str("core.editor", "true")?;
        config.set_str("sequence.editor", "true")?;
    }
    let sig = git2::Signature::now("Test User", "test@example.com")?;
    std::fs::write(path.join("README.md"), "# test repo\n")?;
    let mut index = repo.index()?;
    index.add_path(Path::new("README.md"))?;
    index.write()?;
    let tree_id = index.write_tree()?;
    {
        let tree = repo.find_tree(tree_id)?;
        repo.commit(Some("HEAD"), &sig, &sig, "Initial commit", &tree, &[])?;
    }
    Ok(repo)
}

/// Commit a file change on the currently checked out branch of a test repo.
#[cfg(test)]
pub fn commit_file(repo: &git2::Repository, name: &str, content: &str, message: &str) -> anyhow::Result<git2::Oid> {
    let workdir = repo.workdir().expect("test repo has a workdir");
    std::fs::write(workdir.join(name), content)?;
    let mut index = repo.index()?;
    // The repository's index object is cached in memory; external `git`
    // invocations (e.g. checkout) rewrite the on-disk index without the
    // running process observing it, so force a reload before mutating.
    index.read(true)?;
    index.add_path(Path::new(name))?;
    index.write()?;
    let tree_id = index.write_tree()?;
    let tree = repo.find_tree(tree_id)?;
    let sig = git2::Signature::now("Test User", "test@example.com")?;
    let parent = repo.head()?.peel_to_commit()?;
    let oid = repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])?;
    Ok(oid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_context_sets_and_clears_path() {
        let dir = tempdir().unwrap();
        {
            let _ctx = TestRepoContext::new(dir.path());
            assert_eq!(test_repo_path().as_deref(), Some(dir.path()));
        }
        assert!(test_repo_path().is_none());
    }

    #[test]
    fn test_init_test_repo_creates_main() {
        let dir = tempdir().unwrap();
        let repo = init_test_repo(dir.path()).unwrap();
        let head = repo.head().unwrap();
        assert_eq!(head.shorthand(), Some("main"));
    }
}
