//! End-to-end restack scenarios: amend-and-restack, conflict pause plus
//! continue, auto-reparenting after a parent merges.

mod common;

use common::*;
use tempfile::tempdir;

/// Linear stack restack after amend: main -> a -> b, amend a, restack
/// upstack from a. b ends up based on a's new tip with its base recorded.
#[test]
fn test_linear_restack_after_amend() {
    let dir = tempdir().unwrap();
    init_repo(dir.path());

    create_stacked(dir.path(), "a", "a.txt", "a work");
    create_stacked(dir.path(), "b", "b.txt", "b work");

    // Amend a: rewrite its commit.
    stackit_ok(dir.path(), &["checkout", "a"]);
    std::fs::write(dir.path().join("a.txt"), "a work amended\n").unwrap();
    git(dir.path(), &["add", "a.txt"]);
    git(dir.path(), &["commit", "--amend", "--no-edit"]);

    stackit_ok(dir.path(), &["restack", "--upstack"]);

    let a_sha = branch_sha(dir.path(), "a");
    assert_eq!(merge_base(dir.path(), "a", "b"), a_sha);

    // b kept exactly its own commit.
    let count = git(dir.path(), &["rev-list", "--count", "a..b"]);
    assert_eq!(count, "1");
}

/// restack --only on an aligned branch is a no-op and says so.
#[test]
fn test_restack_only_idempotent() {
    let dir = tempdir().unwrap();
    init_repo(dir.path());

    create_stacked(dir.path(), "a", "a.txt", "a work");
    let before = branch_sha(dir.path(), "a");

    let out = stackit_ok(dir.path(), &["restack", "--only"]);
    assert!(out.contains("does not need to be restacked"), "got: {}", out);
    assert_eq!(branch_sha(dir.path(), "a"), before);
}

/// Conflict pause: both branches edit the same line; the child's rebase
/// pauses with exit code 3, continuation state on disk; after resolving,
/// `continue` finishes and clears the state.
#[test]
fn test_restack_conflict_then_continue() {
    let dir = tempdir().unwrap();
    init_repo(dir.path());

    commit_file(dir.path(), "file.txt", "line one\nline two\nline three\n", "base file");
    stackit_ok(dir.path(), &["create", "a"]);
    commit_file(dir.path(), "unrelated.txt", "a\n", "a work");
    stackit_ok(dir.path(), &["create", "b"]);
    std::fs::write(dir.path().join("file.txt"), "line one\nb version\nline three\n").unwrap();
    git(dir.path(), &["add", "file.txt"]);
    git(dir.path(), &["commit", "-m", "b edits line two"]);

    // Amend a to also change line two.
    stackit_ok(dir.path(), &["checkout", "a"]);
    std::fs::write(dir.path().join("file.txt"), "line one\na version\nline three\n").unwrap();
    git(dir.path(), &["add", "file.txt"]);
    git(dir.path(), &["commit", "-m", "a edits line two"]);

    let out = stackit(dir.path(), &["restack", "--upstack"]);
    assert_eq!(out.status.code(), Some(3), "expected conflict exit code");
    assert!(dir.path().join(".git/.stackit_continue").exists());
    assert!(
        dir.path().join(".git/rebase-merge").exists()
            || dir.path().join(".git/rebase-apply").exists()
    );

    // Resolve in favor of b and continue.
    std::fs::write(dir.path().join("file.txt"), "line one\nb version\nline three\n").unwrap();
    git(dir.path(), &["add", "file.txt"]);
    stackit_ok(dir.path(), &["continue"]);

    assert!(!dir.path().join(".git/.stackit_continue").exists());
    let a_sha = branch_sha(dir.path(), "a");
    assert_eq!(merge_base(dir.path(), "a", "b"), a_sha);
}

/// Abort rolls back the paused rebase and clears continuation state.
#[test]
fn test_restack_conflict_then_abort() {
    let dir = tempdir().unwrap();
    init_repo(dir.path());

    commit_file(dir.path(), "clash.txt", "original\n", "base");
    stackit_ok(dir.path(), &["create", "a"]);
    commit_file(dir.path(), "other.txt", "a\n", "a work");
    stackit_ok(dir.path(), &["create", "b"]);
    std::fs::write(dir.path().join("clash.txt"), "from b\n").unwrap();
    git(dir.path(), &["add", "clash.txt"]);
    git(dir.path(), &["commit", "-m", "b clash"]);

    stackit_ok(dir.path(), &["checkout", "a"]);
    std::fs::write(dir.path().join("clash.txt"), "from a\n").unwrap();
    git(dir.path(), &["add", "clash.txt"]);
    git(dir.path(), &["commit", "-m", "a clash"]);

    let b_before = branch_sha(dir.path(), "b");
    let out = stackit(dir.path(), &["restack", "--upstack"]);
    assert_eq!(out.status.code(), Some(3));

    stackit_ok(dir.path(), &["abort"]);
    assert!(!dir.path().join(".git/.stackit_continue").exists());
    assert!(!dir.path().join(".git/rebase-merge").exists());
    assert_eq!(branch_sha(dir.path(), "b"), b_before);
}

/// Auto-reparent: main -> parent -> child; parent merges into main; a
/// restack of child reports the reparenting and lands child on main.
#[test]
fn test_auto_reparent_after_parent_merged() {
    let dir = tempdir().unwrap();
    init_repo(dir.path());

    create_stacked(dir.path(), "parent", "p.txt", "parent work");
    create_stacked(dir.path(), "child", "c.txt", "child work");

    git(dir.path(), &["checkout", "main"]);
    git(dir.path(), &["merge", "--no-ff", "parent"]);
    git(dir.path(), &["checkout", "child"]);

    let out = stackit_ok(dir.path(), &["restack", "--only"]);
    assert!(out.contains("Reparented"), "got: {}", out);

    let info = stackit_ok(dir.path(), &["info", "child"]);
    assert!(info.contains("parent: main"));

    let main_sha = branch_sha(dir.path(), "main");
    assert_eq!(merge_base(dir.path(), "main", "child"), main_sha);
}

/// Auto-reparent when the recorded parent was deleted out from under us.
#[test]
fn test_auto_reparent_after_parent_deleted() {
    let dir = tempdir().unwrap();
    init_repo(dir.path());

    create_stacked(dir.path(), "parent", "p.txt", "parent work");
    create_stacked(dir.path(), "child", "c.txt", "child work");

    git(dir.path(), &["checkout", "child"]);
    git(dir.path(), &["branch", "-D", "parent"]);

    let out = stackit_ok(dir.path(), &["restack", "--only"]);
    assert!(out.contains("Reparented"), "got: {}", out);
    let info = stackit_ok(dir.path(), &["info", "child"]);
    assert!(info.contains("parent: main"));
}

/// Diamond: one parent with two children; both get restacked after an amend.
#[test]
fn test_diamond_restack() {
    let dir = tempdir().unwrap();
    init_repo(dir.path());

    create_stacked(dir.path(), "base", "base.txt", "base work");
    create_stacked(dir.path(), "left", "left.txt", "left work");
    stackit_ok(dir.path(), &["checkout", "base"]);
    stackit_ok(dir.path(), &["create", "right"]);
    commit_file(dir.path(), "right.txt", "right\n", "right work");

    // Advance base.
    stackit_ok(dir.path(), &["checkout", "base"]);
    commit_file(dir.path(), "base2.txt", "more\n", "base more");

    stackit_ok(dir.path(), &["restack", "--upstack"]);

    let base_sha = branch_sha(dir.path(), "base");
    assert_eq!(merge_base(dir.path(), "base", "left"), base_sha);
    assert_eq!(merge_base(dir.path(), "base", "right"), base_sha);
}

/// Move then undo: the snapshot restores parent and ref position.
#[test]
fn test_move_then_undo() {
    let dir = tempdir().unwrap();
    init_repo(dir.path());

    create_stacked(dir.path(), "a", "a.txt", "a work");
    create_stacked(dir.path(), "b", "b.txt", "b work");
    let b_before = branch_sha(dir.path(), "b");

    stackit_ok(dir.path(), &["move", "--source", "b", "--onto", "main"]);
    let info = stackit_ok(dir.path(), &["info", "b"]);
    assert!(info.contains("parent: main"));
    assert_ne!(branch_sha(dir.path(), "b"), b_before);

    stackit_ok(dir.path(), &["undo", "--yes"]);
    let info = stackit_ok(dir.path(), &["info", "b"]);
    assert!(info.contains("parent: a"));
    assert_eq!(branch_sha(dir.path(), "b"), b_before);
}
