//! Follow a channel and append new messages to its archive.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::client::RateLimitedClient;
use crate::cursor::Cursor;
use crate::error::{ArchiveError, Result};
use crate::progress;
use crate::record::MessageRecord;
use crate::sink::ArchiveSink;
use crate::snowflake::Snowflake;
use crate::store::MergeStore;

#[derive(Debug, Clone, Default)]
pub struct TailSummary {
    pub polls: usize,
    pub inserted: usize,
    pub total_records: usize,
}

/// Polls forward from the newest archived message at a fixed interval.
pub struct Tailer<S: ArchiveSink> {
    client: RateLimitedClient,
    sink: S,
    channel_id: Snowflake,
    interval: Duration,
    store: MergeStore,
    primed: bool,
}

impl<S: ArchiveSink> Tailer<S> {
    pub fn new(
        client: RateLimitedClient,
        sink: S,
        channel_id: Snowflake,
        interval: Duration,
    ) -> Self {
        Self {
            client,
            sink,
            channel_id,
            interval,
            store: MergeStore::new(),
            primed: false,
        }
    }

    pub fn store(&self) -> &MergeStore {
        &self.store
    }

    /// Seed from the existing archive. Returns the newest archived id.
    pub fn prime(&mut self) -> Result<Option<Snowflake>> {
        let existing = self.sink.load()?;
        self.store.seed(existing);
        self.primed = true;
        Ok(self.store.newest_id())
    }

    /// Fetch everything newer than the archive and persist it.
    ///
    /// With an empty archive only the newest page is taken as a starting point.
    pub async fn poll_once(&mut self) -> Result<Vec<MessageRecord>> {
        let (fresh, outcome) = self.poll().await;
        outcome.map(|()| fresh)
    }

    /// One poll. Records captured before a failing page are persisted and
    /// returned alongside the error.
    async fn poll(&mut self) -> (Vec<MessageRecord>, Result<()>) {
        if !self.primed {
            if let Err(e) = self.prime() {
                return (Vec::new(), Err(e));
            }
        }

        let mut fresh = Vec::new();
        let fetched = self.fetch_new(&mut fresh).await;

        if fresh.is_empty() {
            return (fresh, fetched);
        }
        match self.sink.persist(&self.store.snapshot()) {
            Ok(path) => {
                debug!(count = fresh.len(), path = %path.display(), "tail appended records");
                (fresh, fetched)
            }
            Err(e) => match fetched {
                Ok(()) => (fresh, Err(e)),
                Err(fetch_err) => {
                    warn!(error = %e, "failed to persist records captured before poll error");
                    (fresh, Err(fetch_err))
                }
            },
        }
    }

    async fn fetch_new(&mut self, fresh: &mut Vec<MessageRecord>) -> Result<()> {
        match self.store.newest_id() {
            Some(newest) => {
                let mut cursor = Cursor::forward(self.client.clone(), self.channel_id, newest);
                while let Some(page) = cursor.next_page().await? {
                    self.absorb(page, fresh);
                }
            }
            None => {
                let mut cursor =
                    Cursor::backward(self.client.clone(), self.channel_id, Snowflake(0));
                if let Some(page) = cursor.next_page().await? {
                    self.absorb(page, fresh);
                }
            }
        }
        Ok(())
    }

    fn absorb(&mut self, page: Vec<MessageRecord>, fresh: &mut Vec<MessageRecord>) {
        for record in page {
            if self.store.insert(record.clone()) {
                fresh.push(record);
            }
        }
    }

    /// Poll until `stop` turns `true`, calling `on_new` with each batch of
    /// new records.
    ///
    /// Network trouble and throttling are logged and retried at the next tick;
    /// any other error ends the tail.
    pub async fn run<F>(
        &mut self,
        mut stop: watch::Receiver<bool>,
        mut on_new: F,
    ) -> Result<TailSummary>
    where
        F: FnMut(&[MessageRecord]),
    {
        let label = self
            .sink
            .path()
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut summary = TailSummary::default();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(channel = %self.channel_id, interval = ?self.interval, "tailing {}", label);

        loop {
            if *stop.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {}
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                    continue;
                }
            }

            summary.polls += 1;
            let (fresh, outcome) = self.poll().await;
            if !fresh.is_empty() {
                summary.inserted += fresh.len();
                progress::emit_progress(&label, "tailing", "new messages", Some(self.store.len()));
                on_new(&fresh);
            }
            match outcome {
                Ok(()) => {}
                Err(e @ ArchiveError::TransientNetwork(_))
                | Err(e @ ArchiveError::RateLimitBudgetExceeded { .. })
                | Err(e @ ArchiveError::Persistence { .. }) => {
                    warn!(channel = %self.channel_id, error = %e, "tail poll failed, retrying next tick");
                }
                Err(e) => return Err(e),
            }
        }

        summary.total_records = self.store.len();
        info!(
            channel = %self.channel_id,
            polls = summary.polls,
            inserted = summary.inserted,
            "tail stopped"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::JsonFileSink;
    use crate::testing::{test_config, SyntheticChannel};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn tailer(
        channel: &Arc<SyntheticChannel>,
        sink: JsonFileSink,
    ) -> Tailer<JsonFileSink> {
        let client = RateLimitedClient::new(channel.clone(), test_config());
        Tailer::new(client, sink, Snowflake(42), Duration::from_secs(10))
    }

    fn archived_ids(sink: &JsonFileSink) -> Vec<u64> {
        sink.load().unwrap().into_iter().map(|r| r.id.0).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_poll_takes_newest_page_only() {
        let temp_dir = TempDir::new().unwrap();
        let sink = JsonFileSink::for_label(temp_dir.path(), "live");
        let channel = Arc::new(SyntheticChannel::new(1..=250));
        let mut tailer = tailer(&channel, sink.clone());

        let fresh = tailer.poll_once().await.unwrap();
        assert_eq!(fresh.len(), 100);
        assert_eq!(archived_ids(&sink), (151..=250).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_picks_up_only_newer_messages() {
        let temp_dir = TempDir::new().unwrap();
        let sink = JsonFileSink::for_label(temp_dir.path(), "live");
        let channel = Arc::new(SyntheticChannel::new(1..=20));
        let mut tailer = tailer(&channel, sink.clone());
        tailer.poll_once().await.unwrap();

        assert!(tailer.poll_once().await.unwrap().is_empty());

        channel.append(21..=180);
        let fresh = tailer.poll_once().await.unwrap();
        assert_eq!(fresh.len(), 160);
        assert_eq!(archived_ids(&sink), (1..=180).collect::<Vec<_>>());

        let after: Vec<_> = channel
            .requests()
            .iter()
            .filter_map(|r| r.param("after").map(str::to_string))
            .collect();
        assert_eq!(after, vec!["20", "20", "120", "180"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prime_resumes_from_archive() {
        let temp_dir = TempDir::new().unwrap();
        let sink = JsonFileSink::for_label(temp_dir.path(), "live");
        let channel = Arc::new(SyntheticChannel::new(1..=30));
        tailer(&channel, sink.clone()).poll_once().await.unwrap();

        let mut second = tailer(&channel, sink.clone());
        assert_eq!(second.prime().unwrap(), Some(Snowflake(30)));
        assert_eq!(second.store().len(), 30);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_stopped() {
        let temp_dir = TempDir::new().unwrap();
        let sink = JsonFileSink::for_label(temp_dir.path(), "live");
        let channel = Arc::new(SyntheticChannel::new(1..=10));
        let mut tailer = tailer(&channel, sink.clone());
        let (stop_tx, stop_rx) = watch::channel(false);

        let producer = channel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(15)).await;
            producer.append(11..=15);
            tokio::time::sleep(Duration::from_secs(20)).await;
            let _ = stop_tx.send(true);
        });

        let mut batches = Vec::new();
        let summary = tailer
            .run(stop_rx, |fresh| batches.push(fresh.len()))
            .await
            .unwrap();

        assert_eq!(batches, vec![10, 5]);
        assert_eq!(summary.inserted, 15);
        assert_eq!(summary.total_records, 15);
        assert!(summary.polls >= 3);
        assert_eq!(archived_ids(&sink), (1..=15).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_poll_keeps_records_already_fetched() {
        let temp_dir = TempDir::new().unwrap();
        let sink = JsonFileSink::for_label(temp_dir.path(), "live");
        let channel = Arc::new(SyntheticChannel::new(1..=10).fail_forward_after(1));
        let mut tailer = tailer(&channel, sink.clone());
        tailer.poll_once().await.unwrap();

        channel.append(11..=250);
        let err = tailer.poll_once().await.unwrap_err();
        assert!(matches!(err, ArchiveError::PermanentApi { status: 500, .. }));
        assert_eq!(tailer.store().len(), 110);
        assert_eq!(archived_ids(&sink), (1..=110).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_reports_records_before_fatal_error() {
        let temp_dir = TempDir::new().unwrap();
        let sink = JsonFileSink::for_label(temp_dir.path(), "live");
        let channel = Arc::new(SyntheticChannel::new(1..=10).fail_forward_after(1));
        let mut tailer = tailer(&channel, sink.clone());
        let (_stop_tx, stop_rx) = watch::channel(false);

        let producer = channel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            producer.append(11..=250);
        });

        let mut batches = Vec::new();
        let err = tailer
            .run(stop_rx, |fresh| batches.push(fresh.len()))
            .await
            .unwrap_err();

        assert!(matches!(err, ArchiveError::PermanentApi { .. }));
        assert_eq!(batches, vec![10, 100]);
        assert_eq!(archived_ids(&sink), (1..=110).collect::<Vec<_>>());
    }
}
