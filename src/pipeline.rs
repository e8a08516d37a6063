//! Batch Pipeline.
//!
//! Runs decode, watermark and export over many photos on a bounded rayon
//! pool. Batch-wide preconditions are checked before any item starts; after
//! that every failure is captured in the item's own result.

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDateTime};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::{MissingAssetPolicy, WatermarkConfig};
use crate::error::{BatchError, ItemError, OverlayError};
use crate::export::{self, ExportOptions, ExportOutcome, OverwritePolicy};
use crate::font::{BuiltinFontResolver, SharedFontResolver};
use crate::source::{SourceImage, DEFAULT_DECODE_LIMIT};
use crate::watermark::PreparedWatermark;

/// One photo to process, optionally with its own config.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchItem {
    pub path: PathBuf,
    pub config: Option<WatermarkConfig>,
}

impl BatchItem {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            config: None,
        }
    }

    pub fn with_config(path: impl Into<PathBuf>, config: WatermarkConfig) -> Self {
        Self {
            path: path.into(),
            config: Some(config),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The batch was cancelled before the item started.
    Cancelled,
    /// The destination exists and the overwrite policy is `Skip`.
    OutputExists { path: PathBuf },
}

#[derive(Debug)]
pub enum ItemOutcome {
    /// `watermarked` is false only when an unusable watermark image was
    /// skipped under [`MissingAssetPolicy::SkipWatermark`].
    Succeeded { output: PathBuf, watermarked: bool },
    Failed(ItemError),
    Skipped(SkipReason),
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped(_))
    }
}

#[derive(Debug)]
pub struct ItemResult {
    /// Position of the item in the input order.
    pub index: usize,
    pub source: PathBuf,
    pub outcome: ItemOutcome,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub elapsed: Duration,
}

impl BatchSummary {
    fn tally(results: &[ItemResult], elapsed: Duration) -> Self {
        let mut summary = Self {
            total: results.len(),
            elapsed,
            ..Self::default()
        };
        for result in results {
            match result.outcome {
                ItemOutcome::Succeeded { .. } => summary.succeeded += 1,
                ItemOutcome::Failed(_) => summary.failed += 1,
                ItemOutcome::Skipped(_) => summary.skipped += 1,
            }
        }
        summary
    }
}

/// Per-item results in input order plus aggregate counts.
#[derive(Debug)]
pub struct BatchReport {
    pub results: Vec<ItemResult>,
    pub summary: BatchSummary,
}

impl BatchReport {
    pub fn has_failures(&self) -> bool {
        self.summary.failed > 0
    }

    pub fn failures(&self) -> impl Iterator<Item = (&ItemResult, &ItemError)> {
        self.results.iter().filter_map(|r| match &r.outcome {
            ItemOutcome::Failed(err) => Some((r, err)),
            _ => None,
        })
    }
}

/// Progress observer. Called from worker threads.
pub trait ProgressSink: Send + Sync {
    /// `index` counts finished items from 1 up to `total`.
    fn on_progress(&self, _index: usize, _total: usize, _file_name: &str) {}

    fn on_item_result(&self, _result: &ItemResult) {}

    fn on_complete(&self, _summary: &BatchSummary) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {}

/// Cooperative cancellation, checked before each item starts.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that also trips once `timeout` has elapsed.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            flag: Arc::default(),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

pub struct BatchPipeline {
    config: WatermarkConfig,
    fonts: SharedFontResolver,
    concurrency: usize,
    decode_limit: u64,
}

impl BatchPipeline {
    /// A pipeline drawing text with the bundled DejaVu Sans face, one worker
    /// per core.
    pub fn new(config: WatermarkConfig) -> Self {
        Self {
            config,
            fonts: Arc::new(BuiltinFontResolver),
            concurrency: 0,
            decode_limit: DEFAULT_DECODE_LIMIT,
        }
    }

    pub fn with_fonts(mut self, fonts: SharedFontResolver) -> Self {
        self.fonts = fonts;
        self
    }

    /// Upper bound on concurrently processed items; 0 means one per core.
    pub fn with_concurrency(mut self, workers: usize) -> Self {
        self.concurrency = workers;
        self
    }

    pub fn with_decode_limit(mut self, bytes: u64) -> Self {
        self.decode_limit = bytes;
        self
    }

    pub fn config(&self) -> &WatermarkConfig {
        &self.config
    }

    /// Check every precondition shared by the whole batch.
    pub fn validate(&self, items: &[BatchItem], export: &ExportOptions) -> Result<(), BatchError> {
        self.config.validate().map_err(BatchError::Config)?;
        export.validate().map_err(BatchError::Config)?;
        for (index, item) in items.iter().enumerate() {
            if let Some(config) = &item.config {
                config
                    .validate()
                    .map_err(|source| BatchError::ItemConfig { index, source })?;
            }
        }
        Ok(())
    }

    /// Process `items` into `export.output_dir`.
    ///
    /// Returns `Err` only for batch preconditions; per-item problems are in
    /// the report.
    pub fn run(
        &self,
        items: &[BatchItem],
        export: &ExportOptions,
        progress: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<BatchReport, BatchError> {
        self.validate(items, export)?;

        let target = export.target_dir();
        std::fs::create_dir_all(&target).map_err(|source| BatchError::OutputDir {
            path: target.clone(),
            source,
        })?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.concurrency)
            .thread_name(|i| format!("photomark-{i}"))
            .build()
            .map_err(|e| BatchError::WorkerPool(e.to_string()))?;

        let started = Instant::now();
        let total = items.len();
        info!(
            items = total,
            workers = pool.current_num_threads(),
            output = %target.display(),
            "batch started"
        );

        let prepared = PreparedWatermark::prepare(&self.config);
        let now = Local::now().naive_local();
        let completed = AtomicUsize::new(0);

        let results: Vec<ItemResult> = pool.install(|| {
            items
                .par_iter()
                .enumerate()
                .map(|(index, item)| {
                    let result = self.process(index, item, &prepared, export, cancel, now);
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    progress.on_progress(done, total, &file_name(&item.path));
                    progress.on_item_result(&result);
                    result
                })
                .collect()
        });

        let summary = BatchSummary::tally(&results, started.elapsed());
        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "batch finished"
        );
        progress.on_complete(&summary);
        Ok(BatchReport { results, summary })
    }

    fn process(
        &self,
        index: usize,
        item: &BatchItem,
        default: &PreparedWatermark,
        export: &ExportOptions,
        cancel: &CancelToken,
        now: NaiveDateTime,
    ) -> ItemResult {
        let started = Instant::now();
        let outcome = if cancel.is_cancelled() {
            ItemOutcome::Skipped(SkipReason::Cancelled)
        } else {
            self.process_item(index, item, default, export, now)
        };

        match &outcome {
            ItemOutcome::Failed(err) => warn!(path = %item.path.display(), error = %err, "item failed"),
            ItemOutcome::Skipped(reason) => debug!(path = %item.path.display(), ?reason, "item skipped"),
            ItemOutcome::Succeeded { output, watermarked } => debug!(
                path = %item.path.display(),
                output = %output.display(),
                watermarked,
                "item done"
            ),
        }
        ItemResult {
            index,
            source: item.path.clone(),
            outcome,
            elapsed: started.elapsed(),
        }
    }

    fn process_item(
        &self,
        index: usize,
        item: &BatchItem,
        default: &PreparedWatermark,
        export: &ExportOptions,
        now: NaiveDateTime,
    ) -> ItemOutcome {
        let prepared = match &item.config {
            Some(config) => Cow::Owned(PreparedWatermark::prepare(config)),
            None => Cow::Borrowed(default),
        };
        let policy = prepared.config().missing_asset;
        match (prepared.image_error(), policy) {
            (Some(OverlayError::Source(err)), MissingAssetPolicy::Fail) => {
                return ItemOutcome::Failed(ItemError::watermark_source(&item.path, err.clone()));
            }
            (Some(OverlayError::TooLarge(err)), _) => {
                return ItemOutcome::Failed(ItemError::too_large(&item.path, err.clone()));
            }
            _ => {}
        }

        let plan = export.plan(&item.path, index + 1, now);
        if export.overwrite == OverwritePolicy::Skip {
            let path = plan.path();
            if path.exists() {
                return ItemOutcome::Skipped(SkipReason::OutputExists { path });
            }
        }

        let mut source = match SourceImage::open(&item.path, self.decode_limit) {
            Ok(source) => source,
            Err(err) => return ItemOutcome::Failed(err),
        };

        let watermarked = match prepared.apply(&mut source, &*self.fonts) {
            Ok(_) => true,
            Err(OverlayError::TooLarge(err)) => {
                return ItemOutcome::Failed(ItemError::too_large(&item.path, err));
            }
            Err(OverlayError::Source(err)) => match policy {
                MissingAssetPolicy::Fail => {
                    return ItemOutcome::Failed(ItemError::watermark_source(&item.path, err));
                }
                MissingAssetPolicy::SkipWatermark => {
                    warn!(path = %item.path.display(), error = %err, "exporting without watermark");
                    false
                }
            },
        };

        match export::export(&source.pixels, &source, &plan, export) {
            Ok(ExportOutcome::Written(output)) => ItemOutcome::Succeeded { output, watermarked },
            Ok(ExportOutcome::Exists(path)) => ItemOutcome::Skipped(SkipReason::OutputExists { path }),
            Err(err) => ItemOutcome::Failed(err),
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
