//! End-to-end tests for the basic stack lifecycle: init, create, track,
//! navigation, log, delete.

mod common;

use common::*;
use tempfile::tempdir;

#[test]
fn test_init_and_log() {
    let dir = tempdir().unwrap();
    init_repo(dir.path());

    let log = stackit_ok(dir.path(), &["log"]);
    assert!(log.contains("main"));
    assert!(log.contains("trunk"));
}

#[test]
fn test_create_stack_and_navigate() {
    let dir = tempdir().unwrap();
    init_repo(dir.path());

    create_stacked(dir.path(), "a", "a.txt", "a work");
    create_stacked(dir.path(), "b", "b.txt", "b work");
    assert_eq!(current_branch(dir.path()), "b");

    stackit_ok(dir.path(), &["down"]);
    assert_eq!(current_branch(dir.path()), "a");
    stackit_ok(dir.path(), &["up"]);
    assert_eq!(current_branch(dir.path()), "b");
    stackit_ok(dir.path(), &["bottom"]);
    assert_eq!(current_branch(dir.path()), "a");
    stackit_ok(dir.path(), &["top"]);
    assert_eq!(current_branch(dir.path()), "b");
    stackit_ok(dir.path(), &["trunk", "--checkout"]);
    assert_eq!(current_branch(dir.path()), "main");
}

#[test]
fn test_create_with_generated_name() {
    let dir = tempdir().unwrap();
    init_repo(dir.path());

    std::fs::write(dir.path().join("endpoint.txt"), "data\n").unwrap();
    stackit_ok(
        dir.path(),
        &["create", "-a", "-m", "feat(api): add new endpoint"],
    );
    // Conventional-commit prefix stripped, message slugified.
    assert_eq!(current_branch(dir.path()), "add-new-endpoint");
}

#[test]
fn test_track_and_untrack() {
    let dir = tempdir().unwrap();
    init_repo(dir.path());

    git(dir.path(), &["checkout", "-b", "loose"]);
    commit_file(dir.path(), "l.txt", "l\n", "loose work");
    git(dir.path(), &["checkout", "main"]);

    stackit_ok(dir.path(), &["track", "loose"]);
    let info = stackit_ok(dir.path(), &["info", "loose"]);
    assert!(info.contains("parent: main"));

    stackit_ok(dir.path(), &["untrack", "loose"]);
    let info = stackit_ok(dir.path(), &["info", "loose"]);
    assert!(info.contains("untracked"));
}

#[test]
fn test_delete_reparents_children() {
    let dir = tempdir().unwrap();
    init_repo(dir.path());

    create_stacked(dir.path(), "mid", "m.txt", "mid work");
    create_stacked(dir.path(), "leaf", "l.txt", "leaf work");
    stackit_ok(dir.path(), &["checkout", "main"]);

    stackit_ok(dir.path(), &["delete", "mid", "--force"]);

    let info = stackit_ok(dir.path(), &["info", "leaf"]);
    assert!(info.contains("parent: main"));

    // leaf was restacked onto main, carrying only its own commit.
    let main_sha = branch_sha(dir.path(), "main");
    assert_eq!(merge_base(dir.path(), "main", "leaf"), main_sha);
    let leaf_files = git(dir.path(), &["ls-tree", "--name-only", "leaf"]);
    assert!(leaf_files.contains("l.txt"));
    assert!(!leaf_files.contains("m.txt"));
}

#[test]
fn test_exit_codes() {
    let dir = tempdir().unwrap();

    // Not a git repo -> repository-state error (2).
    let out = stackit(dir.path(), &["log"]);
    assert_eq!(out.status.code(), Some(2));

    init_repo(dir.path());

    // Unknown config key -> user error (1).
    let out = stackit(dir.path(), &["config", "set", "bogus", "1"]);
    assert_eq!(out.status.code(), Some(1));

    // continue with nothing pending -> repository-state error (2).
    let out = stackit(dir.path(), &["continue"]);
    assert_eq!(out.status.code(), Some(2));
}

#[test]
fn test_uninitialized_repo_reports_init() {
    let dir = tempdir().unwrap();
    git(dir.path(), &["init", "-b", "main"]);
    git(dir.path(), &["config", "user.name", "t"]);
    git(dir.path(), &["config", "user.email", "t@example.com"]);
    std::fs::write(dir.path().join("f"), "x").unwrap();
    git(dir.path(), &["add", "."]);
    git(dir.path(), &["commit", "-m", "c"]);

    let out = stackit(dir.path(), &["log"]);
    assert_eq!(out.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("init"), "stderr: {}", stderr);
}

#[test]
fn test_fold_into_parent() {
    let dir = tempdir().unwrap();
    init_repo(dir.path());

    create_stacked(dir.path(), "p", "p.txt", "p work");
    create_stacked(dir.path(), "c", "c.txt", "c work");
    let c_sha = branch_sha(dir.path(), "c");

    stackit_ok(dir.path(), &["fold"]);

    assert_eq!(branch_sha(dir.path(), "p"), c_sha);
    let branches = git(dir.path(), &["branch", "--list", "c"]);
    assert!(branches.is_empty());
}

/// Round trip: create then force-delete restores the pre-create graph and
/// refs.
#[test]
fn test_create_delete_round_trip() {
    let dir = tempdir().unwrap();
    init_repo(dir.path());
    create_stacked(dir.path(), "a", "a.txt", "a work");

    let a_sha = branch_sha(dir.path(), "a");
    let log_before = stackit_ok(dir.path(), &["log"]);

    stackit_ok(dir.path(), &["create", "n"]);
    commit_file(dir.path(), "n.txt", "n\n", "n work");
    stackit_ok(dir.path(), &["delete", "n", "--force"]);

    assert_eq!(branch_sha(dir.path(), "a"), a_sha);
    let log_after = stackit_ok(dir.path(), &["log"]);
    assert_eq!(log_before, log_after);
    let branches = git(dir.path(), &["branch", "--list", "n"]);
    assert!(branches.is_empty());
}

#[test]
fn test_reorder_with_file() {
    let dir = tempdir().unwrap();
    init_repo(dir.path());
    create_stacked(dir.path(), "a", "a.txt", "a work");
    create_stacked(dir.path(), "b", "b.txt", "b work");

    std::fs::write(dir.path().join("order.txt"), "b\na\n").unwrap();
    stackit_ok(
        dir.path(),
        &["reorder", "--file", dir.path().join("order.txt").to_str().unwrap()],
    );

    // b now sits directly on main, a on b.
    let info_b = stackit_ok(dir.path(), &["info", "b"]);
    assert!(info_b.contains("parent: main"));
    let info_a = stackit_ok(dir.path(), &["info", "a"]);
    assert!(info_a.contains("parent: b"));

    let b_sha = branch_sha(dir.path(), "b");
    assert_eq!(merge_base(dir.path(), "b", "a"), b_sha);
    // Each branch kept exactly its own file.
    let b_files = git(dir.path(), &["ls-tree", "--name-only", "b"]);
    assert!(b_files.contains("b.txt") && !b_files.contains("a.txt"));
}

#[test]
fn test_squash_branch_commits() {
    let dir = tempdir().unwrap();
    init_repo(dir.path());

    stackit_ok(dir.path(), &["create", "feature"]);
    commit_file(dir.path(), "one.txt", "1\n", "first");
    commit_file(dir.path(), "two.txt", "2\n", "second");

    stackit_ok(dir.path(), &["squash", "-m", "combined"]);

    let count = git(
        dir.path(),
        &["rev-list", "--count", "main..feature"],
    );
    assert_eq!(count, "1");
    let subject = git(dir.path(), &["log", "-1", "--format=%s", "feature"]);
    assert_eq!(subject, "combined");
    // Both files survive in the squashed tree.
    let files = git(dir.path(), &["ls-tree", "--name-only", "feature"]);
    assert!(files.contains("one.txt") && files.contains("two.txt"));
}
