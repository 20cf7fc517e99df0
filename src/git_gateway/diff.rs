//! Diff capture, unified-diff parsing and blame-based line ownership.
//!
//! The absorb engine drives everything from a patch captured once, up front,
//! so the parser here keeps enough structure to reconstruct a minimal patch
//! for any single hunk (file header + hunk) and to answer "which commit last
//! touched this hunk's pre-image lines".

use std::collections::HashMap;

use crate::errors::{Error, Result};

use super::refs::Oid;
use super::GitGateway;

/// One hunk of a unified diff.
#[derive(Debug, Clone)]
pub struct Hunk {
    /// Start line in the pre-image (1-based).
    pub old_start: usize,
    pub old_count: usize,
    /// Start line in the post-image (1-based).
    pub new_start: usize,
    pub new_count: usize,
    /// The `@@` header line, verbatim.
    pub header: String,
    /// Body lines including their ` `/`+`/`-` prefixes.
    pub lines: Vec<String>,
}

impl Hunk {
    /// Pre-image line numbers this hunk modifies (the `-` lines). For pure
    /// insertions, falls back to the surrounding context lines, so an added
    /// block is attributed to the code it is embedded in.
    pub fn pre_image_lines(&self) -> Vec<usize> {
        let mut removed = Vec::new();
        let mut context = Vec::new();
        let mut old_line = self.old_start;
        for line in &self.lines {
            match line.chars().next() {
                Some('-') => {
                    removed.push(old_line);
                    old_line += 1;
                }
                Some(' ') => {
                    context.push(old_line);
                    old_line += 1;
                }
                Some('+') => {}
                _ => {}
            }
        }
        if removed.is_empty() {
            context
        } else {
            removed
        }
    }

    /// Whether this hunk only adds lines.
    pub fn is_pure_insertion(&self) -> bool {
        self.lines.iter().all(|l| !l.starts_with('-'))
    }
}

/// All hunks of one file in a patch.
#[derive(Debug, Clone)]
pub struct FilePatch {
    /// Post-image path.
    pub path: String,
    /// Pre-image path (differs on rename).
    pub old_path: String,
    /// Header lines from `diff --git` up to the first hunk, verbatim.
    pub header: String,
    pub hunks: Vec<Hunk>,
    /// New, deleted, renamed or binary files cannot be absorbed.
    pub is_structural_change: bool,
}

impl FilePatch {
    /// Reconstruct a patch containing only the given hunks of this file.
    pub fn patch_for_hunks(&self, hunks: &[&Hunk]) -> String {
        let mut out = self.header.clone();
        for hunk in hunks {
            out.push_str(&hunk.header);
            out.push('\n');
            for line in &hunk.lines {
                out.push_str(line);
                out.push('\n');
            }
        }
        out
    }
}

/// Parse a unified diff into per-file patches.
pub fn parse_patch(text: &str) -> Vec<FilePatch> {
    let mut files: Vec<FilePatch> = Vec::new();
    let mut current: Option<FilePatch> = None;
    let mut in_hunk = false;

    for line in text.lines() {
        if line.starts_with("diff --git ") {
            if let Some(f) = current.take() {
                files.push(f);
            }
            in_hunk = false;
            let (old_path, path) = parse_diff_paths(line);
            current = Some(FilePatch {
                path,
                old_path,
                header: format!("{}\n", line),
                hunks: Vec::new(),
                is_structural_change: false,
            });
            continue;
        }

        let Some(file) = current.as_mut() else {
            continue;
        };

        if let Some(rest) = line.strip_prefix("@@ ") {
            in_hunk = true;
            if let Some((old_start, old_count, new_start, new_count)) = parse_hunk_header(rest) {
                file.hunks.push(Hunk {
                    old_start,
                    old_count,
                    new_start,
                    new_count,
                    header: line.to_string(),
                    lines: Vec::new(),
                });
            }
            continue;
        }

        if in_hunk {
            if line.starts_with(' ') || line.starts_with('+') || line.starts_with('-') || line.starts_with('\\') {
                if let Some(hunk) = file.hunks.last_mut() {
                    hunk.lines.push(line.to_string());
                }
                continue;
            }
            in_hunk = false;
        }

        // Still in the file header.
        if line.starts_with("new file")
            || line.starts_with("deleted file")
            || line.starts_with("rename from")
            || line.starts_with("Binary files")
            || line.starts_with("GIT binary patch")
        {
            file.is_structural_change = true;
        }
        file.header.push_str(line);
        file.header.push('\n');
    }

    if let Some(f) = current.take() {
        files.push(f);
    }
    files
}

fn parse_diff_paths(line: &str) -> (String, String) {
    // "diff --git a/<old> b/<new>"; paths with spaces are rare enough that
    // the b/-anchored split covers real-world diffs.
    let rest = line.trim_start_matches("diff --git ");
    if let Some(idx) = rest.find(" b/") {
        let old = rest[..idx].trim_start_matches("a/").to_string();
        let new = rest[idx + 3..].to_string();
        (old, new)
    } else {
        (rest.to_string(), rest.to_string())
    }
}

fn parse_hunk_header(rest: &str) -> Option<(usize, usize, usize, usize)> {
    // "-l,c +l,c @@ ..."
    let mut parts = rest.split(" @@").next()?.split(' ');
    let old = parts.next()?.strip_prefix('-')?;
    let new = parts.next()?.strip_prefix('+')?;
    let parse_range = |s: &str| -> Option<(usize, usize)> {
        match s.split_once(',') {
            Some((l, c)) => Some((l.parse().ok()?, c.parse().ok()?)),
            None => Some((s.parse().ok()?, 1)),
        }
    };
    let (old_start, old_count) = parse_range(old)?;
    let (new_start, new_count) = parse_range(new)?;
    Some((old_start, old_count, new_start, new_count))
}

impl GitGateway {
    /// The staged diff as patch text.
    pub fn staged_diff(&self) -> Result<String> {
        let output = self.run_git(&["diff", "--cached", "--no-color", "--no-ext-diff"])?;
        if !output.status.success() {
            return Err(Error::Fatal(format!(
                "git diff --cached failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// The unstaged diff as patch text.
    #[allow(dead_code)] // Part of the diff surface; callers probe via has_unstaged_changes
    pub fn unstaged_diff(&self) -> Result<String> {
        let output = self.run_git(&["diff", "--no-color", "--no-ext-diff"])?;
        if !output.status.success() {
            return Err(Error::Fatal(format!(
                "git diff failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Whether anything is staged.
    pub fn has_staged_changes(&self) -> Result<bool> {
        Ok(!self.staged_diff()?.trim().is_empty())
    }

    /// Per-line ownership of a file at HEAD: index i holds the commit that
    /// last modified line i+1. Line numbers match the pre-image coordinates
    /// of a staged diff.
    pub fn blame_lines(&self, path: &str) -> Result<Vec<Oid>> {
        let output = self.run_git(&["blame", "--porcelain", "HEAD", "--", path])?;
        if !output.status.success() {
            return Err(Error::Fatal(format!(
                "git blame failed for {}: {}",
                path,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let text = String::from_utf8_lossy(&output.stdout);

        let mut by_line: HashMap<usize, Oid> = HashMap::new();
        let mut max_line = 0usize;
        for line in text.lines() {
            // Block headers look like "<sha> <orig> <final>[ <count>]" and are
            // the only lines starting with 40 hex chars followed by a space.
            if line.len() > 41 && line.as_bytes()[40] == b' ' {
                let sha = &line[..40];
                if sha.chars().all(|c| c.is_ascii_hexdigit()) {
                    let mut fields = line[41..].split(' ');
                    let _orig = fields.next();
                    if let Some(final_line) = fields.next().and_then(|s| s.parse::<usize>().ok()) {
                        by_line.insert(final_line, Oid::parse(sha)?);
                        max_line = max_line.max(final_line);
                    }
                }
            }
        }

        let mut out = Vec::with_capacity(max_line);
        for i in 1..=max_line {
            match by_line.remove(&i) {
                Some(oid) => out.push(oid),
                None => {
                    return Err(Error::Fatal(format!(
                        "blame output missing line {} of {}",
                        i, path
                    )))
                }
            }
        }
        Ok(out)
    }

    /// Apply a patch to the index and worktree (used to restore hunks that
    /// were not absorbed).
    pub fn apply_patch_to_index(&self, patch: &str) -> Result<()> {
        use std::io::Write;
        use std::process::{Command, Stdio};

        super::verbose_cmd(&["apply", "--index", "-"]);
        let mut child = Command::new("git")
            .args(["apply", "--index", "-"])
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
        let output = child
            .wait_with_output()
            .map_err(|e| Error::Fatal(format!("git apply failed: {}", e)))?;
        if !output.status.success() {
            return Err(Error::Fatal(format!(
                "could not re-apply patch: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    /// Hard-reset the worktree and index to HEAD.
    pub fn reset_hard_head(&self) -> Result<()> {
        self.run_git_ok(&["reset", "--hard", "HEAD"])?;
        Ok(())
    }

    /// The diff from one commit to another, as patch text.
    pub fn diff_between(&self, from: &Oid, to: &Oid) -> Result<String> {
        let output = self.run_git(&[
            "diff",
            "--no-color",
            "--no-ext-diff",
            from.as_str(),
            to.as_str(),
        ])?;
        if !output.status.success() {
            return Err(Error::Fatal(format!(
                "git diff failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}
