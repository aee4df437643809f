//! The batch driver: runs [`crate::header::do_patch`] over every file in a
//! [`Context`]'s rename map, bounded and cancellable.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::context::Context;
use crate::error::PatchError;
use crate::header;
use crate::redirect::RedirectDatabase;

/// How many files may be mid-patch at once. Each patch task holds a whole
/// source file in memory, so this also bounds peak memory use.
const DEFAULT_MAX_CONCURRENT_FILES: usize = 8;

/// The overall result of a batch, mirroring spec.md §4.E's status machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchResult {
    NotStarted,
    InProgress,
    Success,
    Cancelled,
    /// At least one file failed; the batch still ran to completion.
    CompletedWithErrors,
}

struct Shared {
    db: Arc<RedirectDatabase>,
    ctx: Arc<Context>,
    cancelled: AtomicBool,
    num_files: AtomicUsize,
    num_patched: AtomicUsize,
    status: Mutex<PatchResult>,
    patched_files: Mutex<BTreeMap<PathBuf, PathBuf>>,
    error_files: Mutex<BTreeMap<PathBuf, PatchError>>,
}

/// Drives a batch patch of every `(src, dst)` pair in a [`Context`]'s
/// `file_renames` map against a shared [`RedirectDatabase`].
///
/// One `Patcher` is good for one batch; call [`Patcher::patch_async`] once
/// and poll [`Patcher::is_patching`]/[`Patcher::get_patch_result`] until it
/// settles.
pub struct Patcher {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
    max_concurrent: usize,
}

impl Patcher {
    pub fn new(ctx: Context, db: Arc<RedirectDatabase>) -> Patcher {
        Patcher::with_concurrency(ctx, db, DEFAULT_MAX_CONCURRENT_FILES)
    }

    pub fn with_concurrency(ctx: Context, db: Arc<RedirectDatabase>, max_concurrent: usize) -> Patcher {
        Patcher {
            shared: Arc::new(Shared {
                db,
                ctx: Arc::new(ctx),
                cancelled: AtomicBool::new(false),
                num_files: AtomicUsize::new(0),
                num_patched: AtomicUsize::new(0),
                status: Mutex::new(PatchResult::NotStarted),
                patched_files: Mutex::new(BTreeMap::new()),
                error_files: Mutex::new(BTreeMap::new()),
            }),
            task: Mutex::new(None),
            max_concurrent,
        }
    }

    pub fn set_context(&mut self, ctx: Context) {
        self.shared = Arc::new(Shared {
            db: Arc::clone(&self.shared.db),
            ctx: Arc::new(ctx),
            cancelled: AtomicBool::new(false),
            num_files: AtomicUsize::new(0),
            num_patched: AtomicUsize::new(0),
            status: Mutex::new(PatchResult::NotStarted),
            patched_files: Mutex::new(BTreeMap::new()),
            error_files: Mutex::new(BTreeMap::new()),
        });
    }

    /// Snapshots the context's file map and spawns one task per file on the
    /// async runtime, bounded by a semaphore to cap simultaneous filesystem
    /// pressure. Returns immediately; poll [`Self::is_patching`] or await
    /// [`Self::get_patching_task`] to learn when the batch settles.
    pub async fn patch_async(&self) {
        let shared = Arc::clone(&self.shared);
        let max_concurrent = self.max_concurrent;

        let files: Vec<(PathBuf, PathBuf)> = shared
            .ctx
            .file_renames
            .iter()
            .map(|(src, dst)| (src.clone(), dst.clone()))
            .collect();
        shared.num_files.store(files.len(), Ordering::SeqCst);
        shared.num_patched.store(0, Ordering::SeqCst);
        *shared.status.lock().await = PatchResult::InProgress;

        info!(count = files.len(), "starting batch patch");

        let handle = tokio::spawn(run_batch(shared, files, max_concurrent));
        let mut guard = self.task.lock().await;
        if let Some(previous) = guard.take() {
            previous.abort();
        }
        *guard = Some(handle);
    }

    /// Takes and awaits the handle spawned by the most recent
    /// [`Self::patch_async`] call, if the batch hasn't already been awaited.
    /// Returns immediately if no batch is in flight.
    pub async fn get_patching_task(&self) {
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn cancel_patching(&self) {
        self.shared.cancelled.store(true, Ordering::SeqCst);
        if let Ok(mut status) = self.shared.status.try_lock() {
            *status = PatchResult::Cancelled;
        }
    }

    pub fn is_patching(&self) -> bool {
        self.shared
            .status
            .try_lock()
            .map(|s| *s == PatchResult::InProgress)
            .unwrap_or(true)
    }

    pub async fn get_patch_result(&self) -> PatchResult {
        *self.shared.status.lock().await
    }

    pub async fn get_patched_files(&self) -> BTreeMap<PathBuf, PathBuf> {
        self.shared.patched_files.lock().await.clone()
    }

    pub async fn get_error_files(&self) -> BTreeMap<PathBuf, PatchError> {
        self.shared.error_files.lock().await.clone()
    }

    pub async fn has_errors(&self) -> bool {
        !self.shared.error_files.lock().await.is_empty()
    }

    pub fn num_files(&self) -> usize {
        self.shared.num_files.load(Ordering::SeqCst)
    }

    pub fn num_patched(&self) -> usize {
        self.shared.num_patched.load(Ordering::SeqCst)
    }
}

async fn run_batch(shared: Arc<Shared>, files: Vec<(PathBuf, PathBuf)>, max_concurrent: usize) {
    let semaphore = Arc::new(Semaphore::new(max_concurrent));

    let tasks: Vec<_> = files
        .into_iter()
        .map(|(src, dst)| {
            let shared = Arc::clone(&shared);
            let semaphore = Arc::clone(&semaphore);
            tokio::spawn(async move { patch_one(shared, semaphore, src, dst).await })
        })
        .collect();

    join_all(tasks).await;

    finalize(&shared).await;
}

async fn patch_one(shared: Arc<Shared>, semaphore: Arc<Semaphore>, src: PathBuf, dst: PathBuf) {
    let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");

    // Increment regardless of outcome, including the early cancellation exit,
    // so `num_patched` always reaches `num_files` once the batch settles.
    shared.num_patched.fetch_add(1, Ordering::SeqCst);

    if shared.cancelled.load(Ordering::SeqCst) {
        return;
    }

    let db = Arc::clone(&shared.db);
    let ctx = Arc::clone(&shared.ctx);
    let src_for_task = src.clone();
    let dst_for_task = dst.clone();

    let result = tokio::task::spawn_blocking(move || {
        db.with_as_current(|| header::do_patch(&src_for_task, &dst_for_task, &ctx, &db))
    })
    .await;

    match result {
        Ok(Ok(outcome)) => {
            info!(?src, ?dst, bytes = outcome.bytes_written, "patched file");
            shared.patched_files.lock().await.insert(src, dst);
        }
        Ok(Err(err)) => {
            warn!(?src, error = %err, "failed to patch file");
            let mut status = shared.status.lock().await;
            if *status != PatchResult::Cancelled {
                *status = PatchResult::CompletedWithErrors;
            }
            drop(status);
            shared.error_files.lock().await.insert(src, err);
        }
        Err(join_err) => {
            error!(?src, error = %join_err, "patch task panicked");
        }
    }
}

async fn finalize(shared: &Shared) {
    let mut status = shared.status.lock().await;
    if *status == PatchResult::Cancelled {
        return;
    }

    let mut patched = shared.patched_files.lock().await;
    let errors = shared.error_files.lock().await;
    for failed_src in errors.keys() {
        patched.remove(failed_src);
    }

    *status = if errors.is_empty() {
        PatchResult::Success
    } else {
        PatchResult::CompletedWithErrors
    };
}

/// One-shot convenience wrapper around [`crate::header::do_patch`] for
/// callers that want to patch a single file without standing up a full
/// [`Patcher`]/batch.
pub fn do_patch(
    src: &std::path::Path,
    dst: &std::path::Path,
    ctx: &Context,
    db: &RedirectDatabase,
) -> Result<header::PatchOutcome, PatchError> {
    header::do_patch(src, dst, ctx, db)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redirect::RedirectDatabase;
    use std::path::Path;

    fn empty_patcher() -> Patcher {
        Patcher::new(Context::default(), Arc::new(RedirectDatabase::new()))
    }

    #[tokio::test]
    async fn empty_batch_reports_success() {
        let patcher = empty_patcher();
        patcher.patch_async().await;
        patcher.get_patching_task().await;
        assert_eq!(patcher.get_patch_result().await, PatchResult::Success);
        assert_eq!(patcher.num_files(), 0);
    }

    #[tokio::test]
    async fn missing_source_file_is_recorded_as_error() {
        let mut ctx = Context::default();
        ctx.file_renames.insert(
            PathBuf::from("/nonexistent/source/path.uasset"),
            PathBuf::from("/nonexistent/dest/path.uasset"),
        );
        let patcher = Patcher::new(ctx, Arc::new(RedirectDatabase::new()));
        patcher.patch_async().await;
        patcher.get_patching_task().await;
        assert!(patcher.has_errors().await);
        assert_eq!(
            patcher.get_patch_result().await,
            PatchResult::CompletedWithErrors
        );
        assert!(patcher
            .get_error_files()
            .await
            .contains_key(Path::new("/nonexistent/source/path.uasset")));
    }

    #[test]
    fn cancel_sets_status_immediately() {
        let patcher = empty_patcher();
        patcher.cancel_patching();
        assert!(!patcher.is_patching());
    }
}
