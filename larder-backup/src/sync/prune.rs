use std::fs;
use std::io;
use std::path::Path;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum PruneError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("prune cancelled")]
    Cancelled,
}

/// Removes subtrees under `root` that consist, recursively, of nothing but
/// directories. Each fileless subtree goes with a single `remove_dir_all`
/// at its highest fileless point; `root` itself is never removed.
pub fn prune_fileless_subtrees(root: &Path, token: &CancellationToken) -> Result<(), PruneError> {
    if token.is_cancelled() {
        return Err(PruneError::Cancelled);
    }
    if !root.is_dir() {
        // Nothing was ever mirrored under this root.
        return Ok(());
    }
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let child = entry.path();
        if prune_dir(&child, token)? {
            if token.is_cancelled() {
                return Err(PruneError::Cancelled);
            }
            fs::remove_dir_all(&child)?;
        }
    }
    Ok(())
}

fn prune_dir(dir: &Path, token: &CancellationToken) -> Result<bool, PruneError> {
    if token.is_cancelled() {
        return Err(PruneError::Cancelled);
    }

    let mut fileless = true;
    let mut fileless_children = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            fileless = false;
            continue;
        }
        let child = entry.path();
        if prune_dir(&child, token)? {
            fileless_children.push(child);
        } else {
            fileless = false;
        }
    }

    if !fileless {
        // This directory survives, so its fileless children are removed here
        // instead of bubbling further up.
        for child in fileless_children {
            if token.is_cancelled() {
                return Err(PruneError::Cancelled);
            }
            fs::remove_dir_all(&child)?;
        }
    }

    Ok(fileless)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn removes_nested_fileless_chains() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("ab/abc/abcde")).unwrap();
        fs::create_dir_all(dir.path().join("cd/cde")).unwrap();

        prune_fileless_subtrees(dir.path(), &CancellationToken::new()).unwrap();

        assert!(!dir.path().join("ab").exists());
        assert!(!dir.path().join("cd").exists());
        assert!(dir.path().exists());
    }

    #[test]
    fn keeps_subtrees_that_hold_files_at_any_depth() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("ab/abc/abcde")).unwrap();
        fs::write(dir.path().join("ab/abc/abcde/recipe.json"), b"{}").unwrap();

        prune_fileless_subtrees(dir.path(), &CancellationToken::new()).unwrap();

        assert!(dir.path().join("ab/abc/abcde/recipe.json").exists());
    }

    #[test]
    fn removes_fileless_siblings_next_to_kept_data() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("ab/abc/abcde")).unwrap();
        fs::write(dir.path().join("ab/abc/abcde/recipe.json"), b"{}").unwrap();
        fs::create_dir_all(dir.path().join("ab/abd/abdef")).unwrap();

        prune_fileless_subtrees(dir.path(), &CancellationToken::new()).unwrap();

        // The shard with data survives; the empty sibling shard is gone.
        assert!(dir.path().join("ab/abc/abcde/recipe.json").exists());
        assert!(!dir.path().join("ab/abd").exists());
    }

    #[test]
    fn files_directly_under_root_are_untouched() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("recipes-index.json"), b"[]").unwrap();
        fs::create_dir_all(dir.path().join("ab")).unwrap();

        prune_fileless_subtrees(dir.path(), &CancellationToken::new()).unwrap();

        assert!(dir.path().join("recipes-index.json").exists());
        assert!(!dir.path().join("ab").exists());
    }

    #[test]
    fn missing_root_is_a_no_op() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("never-created");
        prune_fileless_subtrees(&root, &CancellationToken::new()).unwrap();
    }

    #[test]
    fn cancelled_token_stops_pruning() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("ab/abc")).unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let err = prune_fileless_subtrees(dir.path(), &token).expect_err("expected cancellation");
        assert!(matches!(err, PruneError::Cancelled));
        assert!(dir.path().join("ab/abc").exists());
    }
}
