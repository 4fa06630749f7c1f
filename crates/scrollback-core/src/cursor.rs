//! Directional pagination walks over one channel.
//!
//! A [`Cursor`] is either a forward walk (from a floor id toward the present)
//! or a backward walk (from the present down to the floor). Both are the same
//! type; only [`Direction`] differs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::client::{Direction, RateLimitedClient, RetryBudget};
use crate::error::Result;
use crate::record::MessageRecord;
use crate::snowflake::Snowflake;

/// Why a walk ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorOutcome {
    /// The service returned an empty page.
    Exhausted,
    /// A backward walk reached records at or below the floor.
    FloorReached,
    /// A terminal error stopped the walk early.
    Failed(String),
    /// The stop signal fired or the consumer went away.
    Cancelled,
    /// A backward walk reached ids the forward walk had already fetched.
    Joined,
}

impl CursorOutcome {
    /// Whether the walk covered its whole range.
    pub fn is_complete(&self) -> bool {
        matches!(
            self,
            CursorOutcome::Exhausted | CursorOutcome::FloorReached | CursorOutcome::Joined
        )
    }
}

/// Mutable state of one walk.
#[derive(Debug, Clone)]
pub struct CursorState {
    pub direction: Direction,
    /// Last identifier the next request is anchored to.
    pub anchor: Snowflake,
    pub pages: usize,
    pub records: usize,
    pub lowest: Option<Snowflake>,
    pub highest: Option<Snowflake>,
    pub outcome: Option<CursorOutcome>,
}

impl CursorState {
    fn new(direction: Direction, anchor: Snowflake) -> Self {
        Self {
            direction,
            anchor,
            pages: 0,
            records: 0,
            lowest: None,
            highest: None,
            outcome: None,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.outcome.is_some()
    }

    fn observe(&mut self, id: Snowflake) {
        self.lowest = Some(self.lowest.map_or(id, |l| l.min(id)));
        self.highest = Some(self.highest.map_or(id, |h| h.max(id)));
    }
}

/// Summary left behind when a cursor task exits.
#[derive(Debug, Clone)]
pub struct CursorReport {
    pub direction: Direction,
    pub outcome: CursorOutcome,
    pub pages: usize,
    pub records: usize,
    pub lowest: Option<Snowflake>,
    pub highest: Option<Snowflake>,
    pub rate_limit_waited: Duration,
}

/// Progress shared by a forward and a backward walk over the same channel.
///
/// The backward walk fetches one contiguous range `[low, high]` from the
/// present downward; the forward walk fetches `(floor, forward_high]`. Once
/// the two ranges touch, the backward walk stops and the forward walk skips
/// to `high` so only messages newer than the backward walk's start remain.
#[derive(Debug)]
pub struct Frontier {
    forward_high: AtomicU64,
    backward_high: AtomicU64,
    backward_low: AtomicU64,
}

impl Default for Frontier {
    fn default() -> Self {
        Self {
            forward_high: AtomicU64::new(0),
            backward_high: AtomicU64::new(0),
            backward_low: AtomicU64::new(u64::MAX),
        }
    }
}

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest id the forward walk has fetched through.
    pub fn forward_high(&self) -> Snowflake {
        Snowflake(self.forward_high.load(Ordering::SeqCst))
    }

    /// `(low, high)` of the backward walk's range, once it has one.
    pub fn backward_range(&self) -> Option<(Snowflake, Snowflake)> {
        let low = self.backward_low.load(Ordering::SeqCst);
        if low == u64::MAX {
            return None;
        }
        Some((Snowflake(low), Snowflake(self.backward_high.load(Ordering::SeqCst))))
    }

    fn publish_forward(&self, anchor: Snowflake) {
        self.forward_high.fetch_max(anchor.0, Ordering::SeqCst);
    }

    // high is stored before low so a reader that sees low also sees high.
    fn publish_backward(&self, page_high: Snowflake, anchor: Snowflake) {
        self.backward_high.fetch_max(page_high.0, Ordering::SeqCst);
        self.backward_low.fetch_min(anchor.0, Ordering::SeqCst);
    }
}

/// Messages sent from cursors to the scheduler.
#[derive(Debug)]
pub enum CursorEvent {
    Record(MessageRecord),
    Finished(CursorReport),
}

/// One directional walk.
pub struct Cursor {
    client: RateLimitedClient,
    channel_id: Snowflake,
    /// Exclusive lower bound: only ids strictly above it are emitted.
    floor: Snowflake,
    state: CursorState,
    budget: RetryBudget,
    frontier: Option<Arc<Frontier>>,
}

impl Cursor {
    pub fn new(
        client: RateLimitedClient,
        channel_id: Snowflake,
        direction: Direction,
        floor: Snowflake,
    ) -> Self {
        let anchor = match direction {
            Direction::Forward => floor,
            Direction::Backward => Snowflake::SENTINEL,
        };
        Self {
            client,
            channel_id,
            floor,
            state: CursorState::new(direction, anchor),
            budget: RetryBudget::default(),
            frontier: None,
        }
    }

    /// Share progress with the opposite walk through `frontier`.
    pub fn with_frontier(mut self, frontier: Arc<Frontier>) -> Self {
        self.frontier = Some(frontier);
        self
    }

    /// Walk from `floor` toward the present.
    pub fn forward(client: RateLimitedClient, channel_id: Snowflake, floor: Snowflake) -> Self {
        Self::new(client, channel_id, Direction::Forward, floor)
    }

    /// Walk from the present down to `floor`.
    pub fn backward(client: RateLimitedClient, channel_id: Snowflake, floor: Snowflake) -> Self {
        Self::new(client, channel_id, Direction::Backward, floor)
    }

    pub fn state(&self) -> &CursorState {
        &self.state
    }

    pub fn direction(&self) -> Direction {
        self.state.direction
    }

    /// Fetch the next page of records.
    ///
    /// Returns `Ok(None)` once the walk is over. An `Err` also ends the walk;
    /// later calls return `Ok(None)`.
    pub async fn next_page(&mut self) -> Result<Option<Vec<MessageRecord>>> {
        if self.state.is_exhausted() {
            return Ok(None);
        }

        let raw = match self
            .client
            .fetch_page(
                self.channel_id,
                self.state.direction,
                self.state.anchor,
                &mut self.budget,
            )
            .await
        {
            Ok(raw) => raw,
            Err(err) => {
                self.state.outcome = Some(CursorOutcome::Failed(err.to_string()));
                return Err(err);
            }
        };

        if raw.is_empty() {
            self.state.outcome = Some(CursorOutcome::Exhausted);
            return Ok(None);
        }

        let page_ids: Vec<Snowflake> = raw.iter().filter_map(|m| m.id).collect();
        let next_anchor = match self.state.direction {
            Direction::Forward => page_ids.iter().max().copied(),
            Direction::Backward => page_ids.iter().min().copied(),
        };
        let advanced = match (self.state.direction, next_anchor) {
            (_, None) => false,
            (Direction::Forward, Some(next)) => next > self.state.anchor,
            (Direction::Backward, Some(next)) => next < self.state.anchor,
        };

        let total = raw.len();
        let floor = self.floor;
        let parsed: Vec<MessageRecord> = raw.into_iter().filter_map(|m| m.into_record()).collect();
        let malformed = total - parsed.len();
        let records: Vec<MessageRecord> = parsed.into_iter().filter(|r| r.id > floor).collect();
        if malformed > 0 {
            warn!(
                channel = %self.channel_id,
                direction = self.state.direction.as_str(),
                malformed,
                "skipped malformed messages"
            );
        }

        self.state.pages += 1;
        self.state.records += records.len();
        for record in &records {
            self.state.observe(record.id);
        }

        match next_anchor {
            Some(next) if advanced => {
                self.state.anchor = next;
                if self.state.direction == Direction::Backward && next <= self.floor {
                    self.state.outcome = Some(CursorOutcome::FloorReached);
                }
                if let Some(page_high) = page_ids.iter().max().copied() {
                    self.share_progress(page_high);
                }
            }
            _ => {
                warn!(
                    channel = %self.channel_id,
                    direction = self.state.direction.as_str(),
                    anchor = %self.state.anchor,
                    "page did not advance the anchor"
                );
                self.state.outcome = Some(CursorOutcome::Failed(
                    "pagination anchor did not advance".to_string(),
                ));
            }
        }

        Ok(Some(records))
    }

    fn share_progress(&mut self, page_high: Snowflake) {
        let Some(frontier) = self.frontier.clone() else {
            return;
        };
        match self.state.direction {
            Direction::Forward => {
                if let Some((low, high)) = frontier.backward_range() {
                    if self.state.anchor >= low && high > self.state.anchor {
                        debug!(
                            channel = %self.channel_id,
                            from = %self.state.anchor,
                            to = %high,
                            "forward walk skipping range fetched backward"
                        );
                        self.state.anchor = high;
                    }
                }
                frontier.publish_forward(self.state.anchor);
            }
            Direction::Backward => {
                frontier.publish_backward(page_high, self.state.anchor);
                if self.state.outcome.is_none() && frontier.forward_high() >= self.state.anchor {
                    debug!(
                        channel = %self.channel_id,
                        anchor = %self.state.anchor,
                        "backward walk joined forward walk"
                    );
                    self.state.outcome = Some(CursorOutcome::Joined);
                }
            }
        }
    }

    /// Drive the walk to completion, emitting every record before the next
    /// request and a final [`CursorEvent::Finished`].
    pub async fn run(
        mut self,
        tx: mpsc::UnboundedSender<CursorEvent>,
        stop: watch::Receiver<bool>,
    ) -> CursorReport {
        let direction = self.state.direction.as_str();
        info!(channel = %self.channel_id, direction, anchor = %self.state.anchor, "cursor started");

        'walk: loop {
            if *stop.borrow() {
                self.state.outcome = Some(CursorOutcome::Cancelled);
                break;
            }

            match self.next_page().await {
                Ok(Some(records)) => {
                    debug!(direction, count = records.len(), anchor = %self.state.anchor, "page received");
                    for record in records {
                        if tx.send(CursorEvent::Record(record)).is_err() {
                            self.state.outcome = Some(CursorOutcome::Cancelled);
                            break 'walk;
                        }
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(channel = %self.channel_id, direction, error = %err, "cursor stopped");
                    break;
                }
            }
        }

        let report = CursorReport {
            direction: self.state.direction,
            outcome: self
                .state
                .outcome
                .clone()
                .unwrap_or(CursorOutcome::Exhausted),
            pages: self.state.pages,
            records: self.state.records,
            lowest: self.state.lowest,
            highest: self.state.highest,
            rate_limit_waited: self.budget.rate_limit_waited,
        };
        info!(
            channel = %self.channel_id,
            direction,
            outcome = ?report.outcome,
            pages = report.pages,
            records = report.records,
            "cursor finished"
        );
        let _ = tx.send(CursorEvent::Finished(report.clone()));
        report
    }
}
