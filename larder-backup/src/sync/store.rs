use std::io;
use std::path::Path;

use larder_core::RecipeRef;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// What the upsert should do with a recipe file, decided from the reference
/// hash alone so unchanged records never pay for a full fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveAction {
    Create,
    Update,
    Skip,
}

impl SaveAction {
    pub fn needs_fetch(self) -> bool {
        !matches!(self, SaveAction::Skip)
    }
}

/// Compares the candidate hash against whatever is stored at `path`.
/// A file that no longer decodes is treated as stale and rewritten rather
/// than failing the sync.
pub async fn save_action(path: &Path, candidate_hash: &str) -> SaveAction {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(_) => {
            debug!(path = %path.display(), "no extant recipe file");
            return SaveAction::Create;
        }
    };

    match serde_json::from_slice::<RecipeRef>(&bytes) {
        Ok(stored) if stored.hash == candidate_hash => SaveAction::Skip,
        Ok(stored) => {
            debug!(
                path = %path.display(),
                extant_hash = %stored.hash,
                "extant recipe file does not match latest recipe hash"
            );
            SaveAction::Update
        }
        Err(err) => {
            warn!(
                path = %path.display(),
                error = %err,
                "failed decoding extant recipe file, forcing rewrite"
            );
            SaveAction::Update
        }
    }
}

/// Persists any serializable value as a single JSON document, creating
/// parent directories first. Shared by recipe files and both index files.
pub async fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let body = serde_json::to_vec(value)?;
    tokio::fs::write(path, body).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use larder_core::RecipeRef;
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_file_means_create() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("recipe.json");
        assert_eq!(save_action(&path, "h1").await, SaveAction::Create);
    }

    #[tokio::test]
    async fn matching_hash_means_skip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("recipe.json");
        save_json(&path, &RecipeRef { uid: "abcde".into(), hash: "h1".into() })
            .await
            .unwrap();

        let action = save_action(&path, "h1").await;
        assert_eq!(action, SaveAction::Skip);
        assert!(!action.needs_fetch());
    }

    #[tokio::test]
    async fn differing_hash_means_update() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("recipe.json");
        save_json(&path, &RecipeRef { uid: "abcde".into(), hash: "h1".into() })
            .await
            .unwrap();

        assert_eq!(save_action(&path, "h2").await, SaveAction::Update);
    }

    #[tokio::test]
    async fn corrupt_file_forces_update() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("recipe.json");
        std::fs::write(&path, b"{ not json").unwrap();

        assert_eq!(save_action(&path, "h1").await, SaveAction::Update);
    }

    #[tokio::test]
    async fn save_json_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ab/abc/abcde/recipe.json");
        save_json(&path, &RecipeRef { uid: "abcde".into(), hash: "h1".into() })
            .await
            .unwrap();

        let stored: RecipeRef =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(stored.hash, "h1");
    }
}
