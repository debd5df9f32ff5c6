mod client;

pub use client::{Bookmark, Category, LarderClient, LarderError, Recipe, RecipeRef};
