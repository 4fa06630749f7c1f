//! Dual-cursor fetch scheduler.
//!
//! Runs a forward cursor (floor toward now) and a backward cursor (now toward
//! the floor) against one channel and merges both streams into a single
//! archive:
//! - Running: both cursors active, records drained as they arrive
//! - Draining: both cursors reported, queued records still being consumed
//! - Done: queue empty, final snapshot persisted
//!
//! A stop signal moves the run to Cancelled at any point; everything already
//! captured is still persisted.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::{Direction, RateLimitedClient};
use crate::cursor::{Cursor, CursorEvent, CursorReport, Frontier};
use crate::error::Result;
use crate::progress;
use crate::sink::ArchiveSink;
use crate::snowflake::Snowflake;
use crate::store::MergeStore;

/// Configuration for a fetch run.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Newly inserted records between checkpoints (default: 200).
    pub checkpoint_threshold: usize,

    /// Seed the store from an existing archive before fetching.
    pub resume: bool,

    /// Let the walks stop refetching each other's range once they meet.
    pub join_walks: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            checkpoint_threshold: 200,
            resume: true,
            join_walks: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
    Running,
    Draining,
    Done,
    Cancelled,
}

/// What to fetch.
#[derive(Debug, Clone, Copy)]
pub struct FetchPlan {
    pub channel_id: Snowflake,
    /// Exclusive lower bound on archived ids.
    pub floor: Snowflake,
}

impl FetchPlan {
    /// Everything in `channel_id` sent after `cutoff`.
    pub fn since(channel_id: Snowflake, cutoff: DateTime<Utc>) -> Self {
        Self {
            channel_id,
            floor: Snowflake::from_datetime(cutoff),
        }
    }
}

/// Id range neither cursor covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoverageGap {
    /// Highest id the forward walk reached.
    pub after: Snowflake,
    /// Lowest id the backward walk reached.
    pub before: Snowflake,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Complete,
    Cancelled,
}

/// Result of [`Scheduler::run`].
#[derive(Debug, Clone)]
pub struct FetchSummary {
    pub outcome: RunOutcome,
    pub archive_path: PathBuf,
    /// Records in the final archive.
    pub total_records: usize,
    /// Records added by this run.
    pub inserted: usize,
    /// Records received more than once (both cursors, or already archived).
    pub duplicates: usize,
    /// Records loaded from the existing archive.
    pub seeded: usize,
    /// Successful checkpoint writes, excluding the final persist.
    pub checkpoints: usize,
    pub forward: Option<CursorReport>,
    pub backward: Option<CursorReport>,
    pub gap: Option<CoverageGap>,
}

impl FetchSummary {
    /// The archive may be missing records in the requested range.
    pub fn is_partial(&self) -> bool {
        self.outcome == RunOutcome::Cancelled || self.gap.is_some()
    }
}

/// Snapshot handed to the progress observer after each drain cycle.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub phase: SchedulerPhase,
    pub total_records: usize,
    pub inserted: usize,
    pub checkpoints: usize,
}

type ProgressObserver = Box<dyn Fn(&ProgressUpdate) + Send + Sync>;

#[derive(Default)]
struct RunState {
    inserted: usize,
    duplicates: usize,
    /// Inserted since the last successful persist.
    pending: usize,
    checkpoints: usize,
    forward: Option<CursorReport>,
    backward: Option<CursorReport>,
}

impl RunState {
    fn both_finished(&self) -> bool {
        self.forward.is_some() && self.backward.is_some()
    }
}

enum Wake {
    Event(Option<CursorEvent>),
    Stop,
    StopClosed,
}

/// Owns the merge store and drives one fetch.
pub struct Scheduler<S: ArchiveSink> {
    client: RateLimitedClient,
    sink: S,
    config: SchedulerConfig,
    store: MergeStore,
    phase: SchedulerPhase,
    observer: Option<ProgressObserver>,
}

impl<S: ArchiveSink> Scheduler<S> {
    pub fn new(client: RateLimitedClient, sink: S, config: SchedulerConfig) -> Self {
        Self {
            client,
            sink,
            config,
            store: MergeStore::new(),
            phase: SchedulerPhase::Running,
            observer: None,
        }
    }

    /// Call `observer` after every drain cycle.
    pub fn with_progress<F>(mut self, observer: F) -> Self
    where
        F: Fn(&ProgressUpdate) + Send + Sync + 'static,
    {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn phase(&self) -> SchedulerPhase {
        self.phase
    }

    pub fn store(&self) -> &MergeStore {
        &self.store
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Fetch `plan` into the archive until both cursors finish or `stop`
    /// turns `true`.
    ///
    /// Only a failed load of the existing archive or a failed final persist
    /// is returned as an error; cursor failures end up in the summary.
    pub async fn run(
        &mut self,
        plan: FetchPlan,
        mut stop: watch::Receiver<bool>,
    ) -> Result<FetchSummary> {
        let label = self.archive_label();
        self.phase = SchedulerPhase::Running;

        let seeded = if self.config.resume {
            let existing = self.sink.load()?;
            let seeded = self.store.seed(existing);
            if seeded > 0 {
                info!("[SCHEDULER] Resuming {} with {} archived records", label, seeded);
            }
            seeded
        } else {
            0
        };

        info!(
            "[SCHEDULER] Fetching channel {} into {} (floor {})",
            plan.channel_id,
            self.sink.path().display(),
            plan.floor
        );
        progress::emit_progress(&label, "fetching", "started", Some(self.store.len()));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let frontier = self.config.join_walks.then(|| Arc::new(Frontier::new()));
        let handles: Vec<JoinHandle<CursorReport>> = [Direction::Forward, Direction::Backward]
            .into_iter()
            .map(|direction| {
                let mut cursor =
                    Cursor::new(self.client.clone(), plan.channel_id, direction, plan.floor);
                if let Some(frontier) = &frontier {
                    cursor = cursor.with_frontier(frontier.clone());
                }
                tokio::spawn(cursor.run(tx.clone(), stop.clone()))
            })
            .collect();
        drop(tx);

        let mut state = RunState::default();
        let mut cancelled = *stop.borrow();
        let mut stop_open = true;

        while !cancelled {
            let wake = tokio::select! {
                event = rx.recv() => Wake::Event(event),
                changed = stop.changed(), if stop_open => match changed {
                    Ok(()) => Wake::Stop,
                    Err(_) => Wake::StopClosed,
                },
            };

            match wake {
                Wake::Stop => {
                    cancelled = *stop.borrow();
                    continue;
                }
                Wake::StopClosed => {
                    stop_open = false;
                    continue;
                }
                // Every sender is gone: both cursors finished and the queue is empty.
                Wake::Event(None) => break,
                Wake::Event(Some(event)) => {
                    self.apply(event, &mut state);
                    while let Ok(event) = rx.try_recv() {
                        self.apply(event, &mut state);
                    }
                }
            }

            if state.both_finished() && self.phase == SchedulerPhase::Running {
                debug!("[SCHEDULER] Both cursors finished, draining");
                self.phase = SchedulerPhase::Draining;
            }
            if state.pending >= self.config.checkpoint_threshold {
                self.checkpoint(&label, &mut state);
            }
            self.notify(&state);
        }

        let outcome = if cancelled {
            warn!("[SCHEDULER] Fetch of {} cancelled, saving partial archive", label);
            for handle in &handles {
                handle.abort();
            }
            // A cursor mid-page keeps sending until its next await point.
            for handle in handles {
                if let Err(e) = handle.await {
                    if !e.is_cancelled() {
                        warn!("[SCHEDULER] Cursor task ended abnormally: {}", e);
                    }
                }
            }
            while let Ok(event) = rx.try_recv() {
                self.apply(event, &mut state);
            }
            self.phase = SchedulerPhase::Cancelled;
            RunOutcome::Cancelled
        } else {
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!("[SCHEDULER] Cursor task ended abnormally: {}", e);
                }
            }
            self.phase = SchedulerPhase::Done;
            RunOutcome::Complete
        };

        let archive_path = self.sink.persist(&self.store.snapshot())?;
        state.pending = 0;

        let gap = if outcome == RunOutcome::Complete {
            coverage_gap(state.forward.as_ref(), state.backward.as_ref(), plan.floor)
        } else {
            None
        };
        if let Some(gap) = gap {
            warn!(
                "[SCHEDULER] Coverage gap in {}: nothing fetched between {} and {}",
                label, gap.after, gap.before
            );
        }

        let summary = FetchSummary {
            outcome,
            archive_path,
            total_records: self.store.len(),
            inserted: state.inserted,
            duplicates: state.duplicates,
            seeded,
            checkpoints: state.checkpoints,
            forward: state.forward.take(),
            backward: state.backward.take(),
            gap,
        };

        info!(
            "[SCHEDULER] {} finished: {} records ({} new, {} duplicates, {} checkpoints)",
            label, summary.total_records, summary.inserted, summary.duplicates, summary.checkpoints
        );
        self.notify(&state);
        progress::emit_result(
            "fetch",
            match outcome {
                RunOutcome::Complete if summary.gap.is_none() => "complete",
                RunOutcome::Complete => "partial",
                RunOutcome::Cancelled => "cancelled",
            },
            serde_json::json!({
                "archive": summary.archive_path.display().to_string(),
                "records": summary.total_records,
                "inserted": summary.inserted,
            }),
        );

        Ok(summary)
    }

    fn apply(&mut self, event: CursorEvent, state: &mut RunState) {
        match event {
            CursorEvent::Record(record) => {
                if self.store.insert(record) {
                    state.inserted += 1;
                    state.pending += 1;
                } else {
                    state.duplicates += 1;
                }
            }
            CursorEvent::Finished(report) => match report.direction {
                Direction::Forward => state.forward = Some(report),
                Direction::Backward => state.backward = Some(report),
            },
        }
    }

    fn checkpoint(&mut self, label: &str, state: &mut RunState) {
        match self.sink.persist(&self.store.snapshot()) {
            Ok(path) => {
                state.pending = 0;
                state.checkpoints += 1;
                info!(
                    "[SCHEDULER] Checkpoint {}: {} records in {}",
                    state.checkpoints,
                    self.store.len(),
                    path.display()
                );
                progress::emit_progress(
                    label,
                    "checkpoint",
                    &path.display().to_string(),
                    Some(self.store.len()),
                );
            }
            // Pending count is kept, so the next drain cycle tries again.
            Err(e) => warn!("[SCHEDULER] Checkpoint of {} failed: {}", label, e),
        }
    }

    fn notify(&self, state: &RunState) {
        if let Some(observer) = &self.observer {
            observer(&ProgressUpdate {
                phase: self.phase,
                total_records: self.store.len(),
                inserted: state.inserted,
                checkpoints: state.checkpoints,
            });
        }
    }

    fn archive_label(&self) -> String {
        self.sink
            .path()
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "archive".to_string())
    }
}

/// Whether the two walks together left part of `(floor, now]` unfetched.
///
/// Either walk finishing normally covers the whole range on its own.
/// Otherwise the forward walk must have reached the backward walk's lowest id.
pub fn coverage_gap(
    forward: Option<&CursorReport>,
    backward: Option<&CursorReport>,
    floor: Snowflake,
) -> Option<CoverageGap> {
    let complete = |r: Option<&CursorReport>| r.is_some_and(|r| r.outcome.is_complete());
    if complete(forward) || complete(backward) {
        return None;
    }

    let after = forward.and_then(|r| r.highest).unwrap_or(floor);
    let before = backward
        .and_then(|r| r.lowest)
        .unwrap_or(Snowflake::SENTINEL);
    if after >= before {
        None
    } else {
        Some(CoverageGap { after, before })
    }
}
