use std::path::{Path, PathBuf};

pub const RECIPE_FILENAME: &str = "recipe.json";
pub const MARKER_FILENAME: &str = ".delete-marker";
const RECIPES_DIRNAME: &str = "recipes";
const RECIPES_INDEX_FILENAME: &str = "recipes-index.json";
const CATEGORIES_INDEX_FILENAME: &str = "categories-index.json";

/// Resolved on-disk locations for everything the mirror persists. Recipes
/// fan out under two UID-prefix levels to bound per-directory entry counts.
#[derive(Debug, Clone)]
pub struct Layout {
    recipes_dir: PathBuf,
    recipes_index_file: PathBuf,
    categories_index_file: PathBuf,
}

impl Layout {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            recipes_dir: data_dir.join(RECIPES_DIRNAME),
            recipes_index_file: data_dir.join(RECIPES_INDEX_FILENAME),
            categories_index_file: data_dir.join(CATEGORIES_INDEX_FILENAME),
        }
    }

    /// Like [`Layout::new`], with each location independently overridable
    /// from the environment, so e.g. the index file can live elsewhere
    /// without moving the recipe tree.
    pub fn from_env(data_dir: &Path) -> Self {
        Self::new(data_dir).with_overrides(
            std::env::var("LARDER_RECIPES_DIR").ok().map(PathBuf::from),
            std::env::var("LARDER_RECIPES_INDEX_FILE").ok().map(PathBuf::from),
            std::env::var("LARDER_CATEGORIES_INDEX_FILE").ok().map(PathBuf::from),
        )
    }

    fn with_overrides(
        mut self,
        recipes_dir: Option<PathBuf>,
        recipes_index_file: Option<PathBuf>,
        categories_index_file: Option<PathBuf>,
    ) -> Self {
        if let Some(dir) = recipes_dir {
            self.recipes_dir = dir;
        }
        if let Some(file) = recipes_index_file {
            self.recipes_index_file = file;
        }
        if let Some(file) = categories_index_file {
            self.categories_index_file = file;
        }
        self
    }

    pub fn recipes_dir(&self) -> &Path {
        &self.recipes_dir
    }

    pub fn recipes_index_file(&self) -> &Path {
        &self.recipes_index_file
    }

    pub fn categories_index_file(&self) -> &Path {
        &self.categories_index_file
    }

    /// UIDs are ASCII and at least 3 characters; shorter UIDs are a caller
    /// bug, not an input this defends against.
    pub fn recipe_dir(&self, uid: &str) -> PathBuf {
        self.recipes_dir.join(&uid[..2]).join(&uid[..3]).join(uid)
    }

    pub fn recipe_file(&self, uid: &str) -> PathBuf {
        self.recipe_dir(uid).join(RECIPE_FILENAME)
    }

    pub fn marker_file(&self, uid: &str) -> PathBuf {
        self.recipe_dir(uid).join(MARKER_FILENAME)
    }
}
