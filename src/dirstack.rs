//! Deferred directory mtimes.
//!
//! Creating a file touches its parent directory's mtime, so a directory's
//! timestamp can only be set once everything inside it exists. The
//! materializer pushes each directory here as it's created; an entry pops
//! (and gets its mtime applied) as soon as something outside its subtree
//! shows up, and anything left pops at the end.

use anyhow::Result;
use camino::Utf8PathBuf;
use tracing::*;

use crate::file_util::set_mtime;

pub struct DirStack {
    /// (path, mtime) pairs, ordered by nesting: each entry's path is
    /// inside the one below it.
    entries: Vec<(Utf8PathBuf, i64)>,
}

/// Is `path` strictly inside `prefix`?
///
/// `/foo` is a prefix of `/foo/bar` but not of `/foobar`; a prefix that
/// already ends in `/` (the tree root, typically) prefixes anything that
/// extends it.
fn is_prefix_of(prefix: &str, path: &str) -> bool {
    debug_assert_ne!(prefix, path);
    path.len() > prefix.len()
        && path.starts_with(prefix)
        && (prefix.ends_with('/') || path.as_bytes()[prefix.len()] == b'/')
}

impl DirStack {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Records a freshly-created directory, first finalizing every stacked
    /// directory that isn't an ancestor of it.
    pub fn push(&mut self, path: Utf8PathBuf, mtime: i64) -> Result<()> {
        while let Some((top, _)) = self.entries.last() {
            if is_prefix_of(top.as_str(), path.as_str()) {
                break;
            }
            self.pop()?;
        }
        self.entries.push((path, mtime));
        Ok(())
    }

    fn pop(&mut self) -> Result<()> {
        if let Some((path, mtime)) = self.entries.pop() {
            trace!("DirStack POP: {path}");
            set_mtime(&path, mtime)?;
        }
        Ok(())
    }

    /// Finalizes everything still on the stack, deepest first.
    pub fn finish(&mut self) -> Result<()> {
        while !self.entries.is_empty() {
            self.pop()?;
        }
        Ok(())
    }
}

impl Default for DirStack {
    fn default() -> Self {
        Self::new()
    }
}
