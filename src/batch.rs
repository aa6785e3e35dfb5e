//! Batch scanning of image files
//!
//! Walks a list of images through the pipeline one at a time, storing every
//! card found. Pause and cancellation are checked between images; an image
//! already in the pipeline always finishes.

use crossbeam_channel::Sender;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capture::ScanImage;
use crate::storage::{Card, CardRepository, ProcessedSet};
use crate::vision::{CardPipeline, Rect, ScanOutcome, Size};

/// Progress notifications
#[derive(Debug, Clone)]
pub enum BatchEvent {
    Started { total: usize },
    /// Already processed in an earlier run or earlier in this one
    Skipped { path: PathBuf },
    Scanned { path: PathBuf, outcome: ScanOutcome, stored: bool },
    Failed { path: PathBuf, error: String },
    Paused,
    Resumed,
    Finished(BatchSummary),
}

/// Totals for one batch run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub scanned: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cards_found: usize,
    pub cards_stored: usize,
    pub cancelled: bool,
}

/// Pause/resume/cancel handle, cheap to clone
#[derive(Debug, Clone)]
pub struct BatchControl {
    cancel: CancellationToken,
    paused: Arc<watch::Sender<bool>>,
}

impl Default for BatchControl {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchControl {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            cancel: CancellationToken::new(),
            paused: Arc::new(paused),
        }
    }

    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Block while paused; returns `false` if cancelled meanwhile
    async fn wait_while_paused(&self) -> bool {
        let mut rx = self.paused.subscribe();
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            if !*rx.borrow_and_update() {
                return true;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                changed = rx.changed() => {
                    if changed.is_err() {
                        return true;
                    }
                }
            }
        }
    }
}

/// Where scanned images are mapped for scan frame filtering
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanGeometry {
    pub scan_frame: Option<Rect>,
    pub viewport_size: Option<Size>,
}

/// Runs the pipeline over many images
pub struct BatchScanner {
    pipeline: CardPipeline,
    store: Arc<dyn CardRepository>,
    processed: Arc<ProcessedSet>,
    control: BatchControl,
    events: Option<Sender<BatchEvent>>,
    geometry: ScanGeometry,
    dry_run: bool,
}

impl BatchScanner {
    pub fn new(pipeline: CardPipeline, store: Arc<dyn CardRepository>, processed: Arc<ProcessedSet>) -> Self {
        Self {
            pipeline,
            store,
            processed,
            control: BatchControl::new(),
            events: None,
            geometry: ScanGeometry::default(),
            dry_run: false,
        }
    }

    pub fn with_events(mut self, events: Sender<BatchEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_geometry(mut self, geometry: ScanGeometry) -> Self {
        self.geometry = geometry;
        self
    }

    /// Scan without storing cards
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn control(&self) -> BatchControl {
        self.control.clone()
    }

    fn emit(&self, event: BatchEvent) {
        if let Some(events) = &self.events {
            // Receiver gone just means nobody is listening
            let _ = events.send(event);
        }
    }

    pub async fn run(&self, paths: Vec<PathBuf>) -> BatchSummary {
        let start = Instant::now();
        let mut summary = BatchSummary {
            total: paths.len(),
            ..Default::default()
        };
        self.emit(BatchEvent::Started { total: paths.len() });

        for path in paths {
            if self.control.is_paused() {
                self.emit(BatchEvent::Paused);
                let resumed = self.control.wait_while_paused().await;
                if resumed {
                    self.emit(BatchEvent::Resumed);
                }
            }
            if self.control.is_cancelled() {
                info!("Batch cancelled after {} images", summary.scanned);
                summary.cancelled = true;
                break;
            }

            let identifier = path.to_string_lossy().into_owned();
            if self.processed.contains(&identifier) {
                debug!("Skipping already processed {}", identifier);
                summary.skipped += 1;
                self.emit(BatchEvent::Skipped { path });
                continue;
            }

            let open_path = path.clone();
            let image = match tokio::task::spawn_blocking(move || ScanImage::open(&open_path)).await {
                Ok(Ok(image)) => Arc::new(image),
                Ok(Err(e)) => {
                    warn!("Failed to open {:?}: {:#}", path, e);
                    summary.failed += 1;
                    self.emit(BatchEvent::Failed { path, error: format!("{:#}", e) });
                    continue;
                }
                Err(e) => {
                    warn!("Image loading task failed for {:?}: {}", path, e);
                    summary.failed += 1;
                    self.emit(BatchEvent::Failed { path, error: e.to_string() });
                    continue;
                }
            };

            let outcome = self
                .pipeline
                .detect(image, None, self.geometry.scan_frame, self.geometry.viewport_size)
                .await;
            self.processed.mark(identifier.clone());
            summary.scanned += 1;

            let mut stored = false;
            if let Some(info) = &outcome.card_info {
                summary.cards_found += 1;
                if !self.dry_run {
                    match self.store.insert(Card::from_info(identifier.clone(), info)).await {
                        Ok(inserted) => stored = inserted,
                        Err(e) => warn!("Failed to store card for {}: {:#}", identifier, e),
                    }
                }
            }
            if stored {
                summary.cards_stored += 1;
            }

            self.emit(BatchEvent::Scanned { path, outcome, stored });
        }

        info!(
            "Batch finished in {:?}: {} scanned, {} skipped, {} failed, {} cards found, {} stored",
            start.elapsed(),
            summary.scanned,
            summary.skipped,
            summary.failed,
            summary.cards_found,
            summary.cards_stored
        );
        self.emit(BatchEvent::Finished(summary.clone()));
        summary
    }
}
