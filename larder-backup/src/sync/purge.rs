use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

use larder_core::RecipeRef;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::paths::{Layout, MARKER_FILENAME, RECIPE_FILENAME};

#[derive(Debug, Error)]
pub enum PurgeError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to decode recipes index: {0}")]
    Index(#[from] serde_json::Error),
    #[error("invalid timestamp in deletion marker {path}: {source}")]
    Marker {
        path: String,
        source: time::error::Parse,
    },
    #[error("failed to format marker timestamp: {0}")]
    Stamp(#[from] time::error::Format),
    #[error("purge cancelled")]
    Cancelled,
}

/// Mark-and-sweep over the local recipe tree against the persisted index
/// snapshot. Recipes absent from the index get a durable deletion marker
/// stamped with this run's timestamp and are removed once the marker
/// outlives the grace period; a zero grace period removes them immediately.
/// Markers survive process restarts between runs, which is the point.
pub fn purge_unreferenced(
    layout: &Layout,
    grace: Duration,
    now: OffsetDateTime,
    token: &CancellationToken,
) -> Result<(), PurgeError> {
    let raw = fs::read(layout.recipes_index_file())?;
    let index: Vec<RecipeRef> = serde_json::from_slice(&raw)?;

    let pass = PurgePass {
        indexed: index.iter().map(|r| r.uid.as_str()).collect(),
        grace,
        cutoff: now - grace,
        stamp: now.format(&Rfc3339)?,
        token,
    };

    if !layout.recipes_dir().is_dir() {
        // Nothing mirrored yet.
        return Ok(());
    }
    pass.visit_dir(layout.recipes_dir())
}

/// One sweep over one index snapshot. Membership is decided once per recipe
/// directory; the walk never descends past a directory it has classified.
struct PurgePass<'a> {
    indexed: HashSet<&'a str>,
    grace: Duration,
    cutoff: OffsetDateTime,
    stamp: String,
    token: &'a CancellationToken,
}

impl PurgePass<'_> {
    fn visit_dir(&self, dir: &Path) -> Result<(), PurgeError> {
        if self.token.is_cancelled() {
            return Err(PurgeError::Cancelled);
        }

        let mut subdirs = Vec::new();
        let mut is_recipe_dir = false;
        let mut has_marker = false;
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                subdirs.push(entry.path());
                continue;
            }
            let name = entry.file_name();
            if name == RECIPE_FILENAME {
                is_recipe_dir = true;
            } else if name == MARKER_FILENAME {
                is_recipe_dir = true;
                has_marker = true;
            }
        }

        if is_recipe_dir {
            return self.check_recipe_dir(dir, has_marker);
        }
        for sub in subdirs {
            self.visit_dir(&sub)?;
        }
        Ok(())
    }

    fn check_recipe_dir(&self, dir: &Path, has_marker: bool) -> Result<(), PurgeError> {
        let uid = dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        if self.indexed.contains(uid.as_str()) {
            if has_marker {
                fs::remove_file(dir.join(MARKER_FILENAME))?;
                debug!(uid = %uid, "deleted stale deletion marker file for indexed recipe");
            }
            return Ok(());
        }

        // Unindexed, likely deleted remotely. Purge now, consult the marker,
        // or lay a marker down for a later run.
        if self.grace.is_zero() {
            fs::remove_dir_all(dir)?;
            info!(
                uid = %uid,
                reason = "immediate purge requested",
                "deleted local data for unindexed recipe"
            );
            return Ok(());
        }

        if has_marker {
            let marker_path = dir.join(MARKER_FILENAME);
            let unindexed_since = read_timestamp_marker(&marker_path)?;
            if unindexed_since > self.cutoff {
                debug!(
                    uid = %uid,
                    "ignoring unindexed local recipe data because marker is more recent than cutoff"
                );
                return Ok(());
            }
            fs::remove_dir_all(dir)?;
            info!(
                uid = %uid,
                reason = "recipe not seen in index since cutoff",
                "deleted local data for unindexed recipe"
            );
            return Ok(());
        }

        match write_timestamp_marker(&dir.join(MARKER_FILENAME), &self.stamp) {
            Ok(()) => {
                info!(uid = %uid, "wrote new deletion marker file for unindexed recipe");
                Ok(())
            }
            // A concurrent pass won the race; one marker is enough.
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

fn read_timestamp_marker(path: &Path) -> Result<OffsetDateTime, PurgeError> {
    let text = fs::read_to_string(path)?;
    OffsetDateTime::parse(text.trim(), &Rfc3339).map_err(|source| PurgeError::Marker {
        path: path.display().to_string(),
        source,
    })
}

fn write_timestamp_marker(path: &Path, stamp: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(stamp.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use larder_core::RecipeRef;
    use tempfile::{TempDir, tempdir};

    fn setup(index: &[(&str, &str)]) -> (TempDir, Layout) {
        let dir = tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let refs: Vec<RecipeRef> = index
            .iter()
            .map(|(uid, hash)| RecipeRef {
                uid: uid.to_string(),
                hash: hash.to_string(),
            })
            .collect();
        fs::write(
            layout.recipes_index_file(),
            serde_json::to_vec(&refs).unwrap(),
        )
        .unwrap();
        (dir, layout)
    }

    fn write_recipe(layout: &Layout, uid: &str, hash: &str) {
        let path = layout.recipe_file(uid);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(
            &path,
            serde_json::to_vec(&RecipeRef {
                uid: uid.to_string(),
                hash: hash.to_string(),
            })
            .unwrap(),
        )
        .unwrap();
    }

    fn write_marker(layout: &Layout, uid: &str, at: OffsetDateTime) {
        fs::write(
            layout.marker_file(uid),
            at.format(&Rfc3339).unwrap().as_bytes(),
        )
        .unwrap();
    }

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    #[test]
    fn unindexed_recipe_gets_a_marker_and_is_retained() {
        let (_dir, layout) = setup(&[]);
        write_recipe(&layout, "old11", "h1");
        let now = OffsetDateTime::now_utc();

        purge_unreferenced(&layout, DAY, now, &CancellationToken::new()).unwrap();

        assert!(layout.recipe_file("old11").exists());
        let stamp = fs::read_to_string(layout.marker_file("old11")).unwrap();
        assert_eq!(OffsetDateTime::parse(stamp.trim(), &Rfc3339).unwrap(), now);
    }

    #[test]
    fn existing_marker_is_not_replaced() {
        let (_dir, layout) = setup(&[]);
        write_recipe(&layout, "old11", "h1");
        let first = OffsetDateTime::now_utc() - Duration::from_secs(3600);
        write_marker(&layout, "old11", first);

        purge_unreferenced(&layout, DAY, OffsetDateTime::now_utc(), &CancellationToken::new())
            .unwrap();

        // Still exactly one marker, carrying the original timestamp.
        let stamp = fs::read_to_string(layout.marker_file("old11")).unwrap();
        assert_eq!(OffsetDateTime::parse(stamp.trim(), &Rfc3339).unwrap(), first);
        assert!(layout.recipe_file("old11").exists());
    }

    #[test]
    fn expired_marker_purges_the_directory() {
        let (_dir, layout) = setup(&[]);
        write_recipe(&layout, "old11", "h1");
        let now = OffsetDateTime::now_utc();
        write_marker(&layout, "old11", now - 2 * DAY);

        purge_unreferenced(&layout, DAY, now, &CancellationToken::new()).unwrap();

        assert!(!layout.recipe_dir("old11").exists());
    }

    #[test]
    fn retention_boundary_sits_at_the_grace_period() {
        let now = OffsetDateTime::now_utc();

        let (_dir, layout) = setup(&[]);
        write_recipe(&layout, "young", "h1");
        write_marker(&layout, "young", now - (DAY - Duration::from_secs(1)));
        purge_unreferenced(&layout, DAY, now, &CancellationToken::new()).unwrap();
        assert!(layout.recipe_file("young").exists());

        let (_dir2, layout2) = setup(&[]);
        write_recipe(&layout2, "stale", "h1");
        write_marker(&layout2, "stale", now - (DAY + Duration::from_secs(1)));
        purge_unreferenced(&layout2, DAY, now, &CancellationToken::new()).unwrap();
        assert!(!layout2.recipe_dir("stale").exists());
    }

    #[test]
    fn reappeared_recipe_keeps_data_and_loses_marker() {
        let (_dir, layout) = setup(&[("back1", "h1")]);
        write_recipe(&layout, "back1", "h1");
        write_marker(&layout, "back1", OffsetDateTime::now_utc() - 3 * DAY);

        purge_unreferenced(&layout, DAY, OffsetDateTime::now_utc(), &CancellationToken::new())
            .unwrap();

        assert!(layout.recipe_file("back1").exists());
        assert!(!layout.marker_file("back1").exists());
    }

    #[test]
    fn zero_grace_purges_immediately_without_markers() {
        let (_dir, layout) = setup(&[("keep1", "h1")]);
        write_recipe(&layout, "keep1", "h1");
        write_recipe(&layout, "gone1", "h1");

        purge_unreferenced(
            &layout,
            Duration::ZERO,
            OffsetDateTime::now_utc(),
            &CancellationToken::new(),
        )
        .unwrap();

        assert!(layout.recipe_file("keep1").exists());
        assert!(!layout.recipe_dir("gone1").exists());
    }

    #[test]
    fn cancelled_token_stops_the_walk() {
        let (_dir, layout) = setup(&[]);
        write_recipe(&layout, "old11", "h1");
        let token = CancellationToken::new();
        token.cancel();

        let err = purge_unreferenced(&layout, DAY, OffsetDateTime::now_utc(), &token)
            .expect_err("expected cancellation");
        assert!(matches!(err, PurgeError::Cancelled));
        assert!(!layout.marker_file("old11").exists());
    }

    #[test]
    fn unreadable_marker_is_an_error() {
        let (_dir, layout) = setup(&[]);
        write_recipe(&layout, "old11", "h1");
        fs::write(layout.marker_file("old11"), b"not a timestamp").unwrap();

        let err = purge_unreferenced(
            &layout,
            DAY,
            OffsetDateTime::now_utc(),
            &CancellationToken::new(),
        )
        .expect_err("expected marker parse failure");
        assert!(matches!(err, PurgeError::Marker { .. }));
    }
}
