// Each integration-test crate compiles this module separately and uses a
// different subset of the helpers.
#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::process::{Command, Output, Stdio};

/// Run the stackit binary in a directory.
pub fn stackit(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_stackit"))
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .output()
        .expect("failed to run stackit")
}

/// Run stackit and assert it succeeded, returning stdout.
pub fn stackit_ok(dir: &Path, args: &[&str]) -> String {
    let output = stackit(dir, args);
    assert!(
        output.status.success(),
        "stackit {:?} failed\nstdout: {}\nstderr: {}",
        args,
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// Run git in a directory, asserting success.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Initialize a repository with one commit on `main` and run `stackit init`.
pub fn init_repo(dir: &Path) {
    git(dir, &["init", "-b", "main"]);
    git(dir, &["config", "user.name", "Test User"]);
    git(dir, &["config", "user.email", "test@example.com"]);
    git(dir, &["config", "core.editor", "true"]);
    git(dir, &["config", "sequence.editor", "true"]);
    fs::write(dir.join("README.md"), "# test repo\n").unwrap();
    git(dir, &["add", "."]);
    git(dir, &["commit", "-m", "Initial commit"]);
    stackit_ok(dir, &["init"]);
}

/// Write a file, stage it, commit it.
pub fn commit_file(dir: &Path, name: &str, content: &str, message: &str) {
    fs::write(dir.join(name), content).unwrap();
    git(dir, &["add", name]);
    git(dir, &["commit", "-m", message]);
}

/// Current branch name.
#[allow(dead_code)]
pub fn current_branch(dir: &Path) -> String {
    git(dir, &["branch", "--show-current"])
}

/// Tip sha of a branch.
pub fn branch_sha(dir: &Path, branch: &str) -> String {
    git(dir, &["rev-parse", branch])
}

/// Merge base of two refs.
pub fn merge_base(dir: &Path, a: &str, b: &str) -> String {
    git(dir, &["merge-base", a, b])
}

/// Create a tracked branch on top of the current one, with one commit.
/// `create` records the parent tip as the base; the commit lands on top.
pub fn create_stacked(dir: &Path, name: &str, file: &str, message: &str) {
    stackit_ok(dir, &["create", name]);
    commit_file(dir, file, &format!("{}\n", message), message);
}
