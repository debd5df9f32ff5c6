use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use larder_core::{LarderClient, LarderError, RecipeRef};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::paths::Layout;
use super::prune::{self, PruneError};
use super::purge::{self, PurgeError};
use super::store::{self, SaveAction, StoreError};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("api error: {0}")]
    Api(#[from] LarderError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("purge error: {0}")]
    Purge(#[from] PurgeError),
    #[error("prune error: {0}")]
    Prune(#[from] PruneError),
    #[error("fetched recipe UID {fetched:?} does not match requested UID {requested:?}")]
    UidMismatch { requested: String, fetched: String },
    #[error("background purge task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Aggregate result of one sync run. Per-item failures never abort sibling
/// work; they only flip the run into `CompletedWithErrors`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Clean,
    CompletedWithErrors,
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub include_recipes: bool,
    pub include_categories: bool,
    /// Bound on concurrent recipe downloads; also sizes the work queue.
    pub workers: usize,
    /// `None` disables purge entirely; `Some(ZERO)` purges immediately.
    pub purge_after: Option<Duration>,
}

#[derive(Clone)]
pub struct SyncEngine {
    client: LarderClient,
    layout: Layout,
    options: SyncOptions,
}

impl SyncEngine {
    pub fn new(client: LarderClient, layout: Layout, options: SyncOptions) -> Self {
        Self {
            client,
            layout,
            options,
        }
    }

    /// One full mirror pass: fetch and persist the remote indexes, fan
    /// recipe upserts out to a bounded worker pool, join everything, then
    /// purge and prune. Purge only runs when the sync itself was clean, so
    /// deletions never act on a possibly-incomplete snapshot.
    pub async fn run(&self, token: CancellationToken) -> SyncOutcome {
        let had_errors = Arc::new(AtomicBool::new(false));
        let saved_total = Arc::new(AtomicU64::new(0));
        let tracker = TaskTracker::new();

        if self.options.include_categories {
            let engine = self.clone();
            let had_errors = Arc::clone(&had_errors);
            tracker.spawn(async move {
                if let Err(err) = engine.save_categories_index().await {
                    error!(error = %err, "error saving categories index");
                    had_errors.store(true, Ordering::SeqCst);
                }
            });
        }

        if self.options.include_recipes {
            let (tx, rx) = mpsc::channel::<RecipeRef>(self.options.workers);
            let rx = Arc::new(Mutex::new(rx));

            {
                let engine = self.clone();
                let had_errors = Arc::clone(&had_errors);
                let token = token.clone();
                tracker.spawn(async move {
                    engine.produce_recipe_queue(tx, token, had_errors).await;
                });
            }

            for worker_id in 1..=self.options.workers {
                let engine = self.clone();
                let rx = Arc::clone(&rx);
                let token = token.clone();
                let had_errors = Arc::clone(&had_errors);
                let saved_total = Arc::clone(&saved_total);
                tracker.spawn(async move {
                    engine
                        .worker_loop(worker_id, rx, token, had_errors, saved_total)
                        .await;
                });
            }
        }

        tracker.close();
        tracker.wait().await;

        if self.options.include_recipes {
            info!(
                total_saved = saved_total.load(Ordering::SeqCst),
                "saved new/updated recipes"
            );
        }

        if !had_errors.load(Ordering::SeqCst) {
            if let Some(grace) = self.options.purge_after {
                if let Err(err) = self.purge_and_prune(grace, token).await {
                    error!(error = %err, "error purging unindexed recipes");
                    had_errors.store(true, Ordering::SeqCst);
                }
            }
        }

        if had_errors.load(Ordering::SeqCst) {
            SyncOutcome::CompletedWithErrors
        } else {
            info!("sync completed successfully");
            SyncOutcome::Clean
        }
    }

    /// Fetches the index, persists the snapshot, then feeds every reference
    /// into the bounded queue. The queue is sized to the worker count, so
    /// enumeration blocks once the workers fall behind; every send races the
    /// cancellation token.
    async fn produce_recipe_queue(
        &self,
        tx: mpsc::Sender<RecipeRef>,
        token: CancellationToken,
        had_errors: Arc<AtomicBool>,
    ) {
        let refs = match self.client.recipes().await {
            Ok(refs) => refs,
            Err(err) => {
                error!(error = %err, "failed to fetch recipes index");
                had_errors.store(true, Ordering::SeqCst);
                return;
            }
        };

        if let Err(err) = store::save_json(self.layout.recipes_index_file(), &refs).await {
            // Recipes still sync from the fetched list; the error flag keeps
            // purge from acting on the stale on-disk snapshot.
            error!(error = %err, "error saving recipes index file");
            had_errors.store(true, Ordering::SeqCst);
        } else {
            info!(
                path = %self.layout.recipes_index_file().display(),
                "saved recipes index file"
            );
        }

        let mut queued = 0usize;
        for item in refs {
            tokio::select! {
                _ = token.cancelled() => {
                    warn!(reason = "shutdown requested", "stopping index enumeration");
                    return;
                }
                sent = tx.send(item) => {
                    if sent.is_err() {
                        return;
                    }
                    queued += 1;
                }
            }
        }
        debug!(total_items = queued, "added all indexed recipe items to sync queue");
    }

    async fn worker_loop(
        &self,
        worker_id: usize,
        rx: Arc<Mutex<mpsc::Receiver<RecipeRef>>>,
        token: CancellationToken,
        had_errors: Arc<AtomicBool>,
        saved_total: Arc<AtomicU64>,
    ) {
        let mut worker_saved = 0u64;
        loop {
            // Prioritize cancellation over draining a saturated queue.
            if token.is_cancelled() {
                warn!(worker_id, reason = "shutdown requested", "shutting down worker");
                break;
            }
            let item = tokio::select! {
                _ = token.cancelled() => {
                    warn!(worker_id, reason = "shutdown requested", "shutting down worker");
                    break;
                }
                item = async { rx.lock().await.recv().await } => item,
            };
            let Some(reference) = item else {
                debug!(worker_id, reason = "no more work", "shutting down worker");
                break;
            };

            match self.upsert_recipe(&reference).await {
                Ok(true) => worker_saved += 1,
                Ok(false) => {}
                Err(err) => {
                    had_errors.store(true, Ordering::SeqCst);
                    error!(
                        worker_id,
                        uid = %reference.uid,
                        indexed_hash = %reference.hash,
                        error = %err,
                        "worker task failed for recipe item in queue"
                    );
                }
            }
        }

        if worker_saved > 0 {
            debug!(worker_id, saved = worker_saved, "worker saved recipes in queue");
            saved_total.fetch_add(worker_saved, Ordering::SeqCst);
        } else {
            debug!(worker_id, "worker stopped before saving any recipes");
        }
    }

    /// Creates or refreshes the local copy for one index reference. Returns
    /// whether a file was written. The reference hash is the sole authority
    /// for whether to write; a mismatching fetched hash is only warned
    /// about, while a mismatching fetched UID rejects the write outright.
    pub async fn upsert_recipe(&self, reference: &RecipeRef) -> Result<bool, EngineError> {
        let path = self.layout.recipe_file(&reference.uid);
        match store::save_action(&path, &reference.hash).await {
            SaveAction::Skip => {
                debug!(uid = %reference.uid, "local recipe exists and does not require update");
                return Ok(false);
            }
            SaveAction::Update => {
                debug!(uid = %reference.uid, "local recipe exists and requires update");
            }
            SaveAction::Create => {
                debug!(uid = %reference.uid, "local recipe does not yet exist");
            }
        }

        debug!(uid = %reference.uid, "fetching recipe from API");
        let recipe = self.client.recipe(&reference.uid).await?;

        if recipe.hash != reference.hash {
            // The record may have changed between the index fetch and now.
            warn!(
                uid = %reference.uid,
                indexed_hash = %reference.hash,
                fetched_hash = %recipe.hash,
                "fetched recipe hash does not match reference hash"
            );
        }
        if recipe.uid != reference.uid {
            return Err(EngineError::UidMismatch {
                requested: reference.uid.clone(),
                fetched: recipe.uid,
            });
        }

        store::save_json(&path, &recipe).await?;
        info!(uid = %reference.uid, path = %path.display(), "saved recipe file");
        Ok(true)
    }

    async fn save_categories_index(&self) -> Result<(), EngineError> {
        let categories = self.client.categories().await?;
        let path = self.layout.categories_index_file();
        store::save_json(path, &categories).await?;
        info!(path = %path.display(), "saved categories index file");
        Ok(())
    }

    /// Mark-and-sweep plus pruning, on a blocking thread; both run
    /// single-threaded after the sync has fully joined so directory
    /// mutation never races an in-flight upsert.
    async fn purge_and_prune(
        &self,
        grace: Duration,
        token: CancellationToken,
    ) -> Result<(), EngineError> {
        let layout = self.layout.clone();
        let now = OffsetDateTime::now_utc();
        tokio::task::spawn_blocking(move || {
            purge::purge_unreferenced(&layout, grace, now, &token)?;
            prune::prune_fileless_subtrees(layout.recipes_dir(), &token)?;
            Ok::<(), EngineError>(())
        })
        .await?
    }
}
