//! Per-day orchestration: fan out paginated fetches across chunks, drive
//! them through the [`ChunkedEventQueue`], project one snapshot per
//! distinct second, and persist the result. Grounded on
//! `pysrc.adapters.kraken.historical.updates.historical_updates_data_client::HistoricalUpdatesDataClient`
//! (original_source); retry/checkpoint rules and the consumer loop from
//! spec §4.6.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::book::MBPBook;
use crate::codec::{self, SnapshotWriter};
use crate::events::{self, coalesce_page};
use crate::history::HistorySource;
use crate::queue::ChunkedEventQueue;
use crate::symbol::asset_to_feedcode;
use crate::types::{Asset, EventType, Market};
use crate::wire::SnapshotMessage;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Codec(#[from] codec::Error),

    #[error("one or more producers failed before the day could be fully drained")]
    QueueFailed,

    #[error("failed to download updates for '{feedcode}' on {date}")]
    DayDownloadFailed { feedcode: String, date: NaiveDate },
}

/// 30-minute chunks, 48 per day (spec §4.6).
const NUM_CHUNKS: usize = 48;
const CHUNK_MINUTES: i64 = 30;
const DEFAULT_MAX_RETRY_COUNT: u32 = 3;

pub struct UpdatesBuilder<H> {
    resource_path: PathBuf,
    history: Arc<H>,
    max_retry_count: u32,
}

impl<H> UpdatesBuilder<H>
where
    H: HistorySource + Send + Sync + 'static,
{
    pub fn new(resource_path: impl Into<PathBuf>, history: H, max_retry_count: Option<u32>) -> Self {
        Self {
            resource_path: resource_path.into(),
            history: Arc::new(history),
            max_retry_count: max_retry_count.unwrap_or(DEFAULT_MAX_RETRY_COUNT),
        }
    }

    /// Downloads and persists per-second snapshots for every day in
    /// `[since, until)`. The book is carried forward across successful
    /// days; only a day that exhausts all retries surfaces an error
    /// (spec §4.6 retry & recovery, §7 propagation policy).
    pub async fn download_updates(
        &self,
        asset: Asset,
        market: Market,
        since: DateTime<Utc>,
        until: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let feedcode = asset_to_feedcode(asset, market).to_string();
        let until = until.unwrap_or_else(Utc::now);

        let mut last_saved_book = MBPBook::new(feedcode.clone(), market);
        let mut last_saved_second = since.timestamp() as u64;
        let mut cur_book = last_saved_book.clone();
        let mut cur_second = last_saved_second;

        let days = (until - since).num_days();
        for i in 0..days {
            let day = since + Duration::days(i);
            let mut succeeded = false;

            for attempt in 0..self.max_retry_count {
                let file_path = codec::snapshot_path(&self.resource_path, &feedcode, &day.format("%m_%d_%Y").to_string());
                let queue = ChunkedEventQueue::new(NUM_CHUNKS);

                match self
                    .compute_day(&feedcode, day, queue, &mut cur_book, &mut cur_second, &file_path)
                    .await
                {
                    Ok(()) => {
                        last_saved_book = cur_book.clone();
                        last_saved_second = cur_second;
                        succeeded = true;
                        break;
                    }
                    Err(err) => {
                        tracing::warn!(
                            feedcode = %feedcode,
                            day = %day,
                            attempt,
                            error = %err,
                            "day download attempt failed, restoring checkpoint"
                        );
                        cur_book = last_saved_book.clone();
                        cur_second = last_saved_second;
                        let _ = std::fs::remove_file(&file_path);
                    }
                }
            }

            if !succeeded {
                tracing::error!(feedcode = %feedcode, day = %day, "exhausted retries for day");
                return Err(Error::DayDownloadFailed {
                    feedcode,
                    date: day.date_naive(),
                });
            }
        }

        Ok(())
    }

    /// One attempt at one day: spawns `2*NUM_CHUNKS` producers, drains the
    /// queue into snapshots, and persists them. Mutates `cur_book`/
    /// `cur_second` in place; callers restore them from a checkpoint on
    /// `Err`.
    async fn compute_day(
        &self,
        feedcode: &str,
        day: DateTime<Utc>,
        queue: Arc<ChunkedEventQueue>,
        cur_book: &mut MBPBook,
        cur_second: &mut u64,
        file_path: &Path,
    ) -> Result<()> {
        let mut producers = Vec::with_capacity(NUM_CHUNKS * 2);
        for chunk_idx in 0..NUM_CHUNKS {
            let chunk_since = day + Duration::minutes(CHUNK_MINUTES * chunk_idx as i64);
            let chunk_until = day + Duration::minutes(CHUNK_MINUTES * (chunk_idx as i64 + 1));

            for event_type in [EventType::Order, EventType::Execution] {
                let queue = queue.clone();
                let history = self.history.clone();
                let feedcode = feedcode.to_string();
                producers.push(tokio::spawn(async move {
                    produce_chunk(history, queue, feedcode, event_type, chunk_idx, chunk_since, chunk_until).await;
                }));
            }
        }

        let snapshots = drain_day(&queue, cur_book, cur_second).await;

        for producer in producers {
            let _ = producer.await;
        }

        if queue.failed().await {
            return Err(Error::QueueFailed);
        }

        let mut writer = SnapshotWriter::create(file_path)?;
        for snapshot in &snapshots {
            writer.write(snapshot)?;
        }
        writer.finish()?;

        Ok(())
    }
}

/// One producer task: pages through either the orders or the executions
/// endpoint for one chunk, coalescing and mapping each page to deltas,
/// `put`ting them into the queue, and `mark_done`ing on exhaustion. Any
/// error fails the whole queue (spec §4.6 step 2 / §7 `TransportError` ->
/// queue failure).
async fn produce_chunk<H: HistorySource>(
    history: Arc<H>,
    queue: Arc<ChunkedEventQueue>,
    feedcode: String,
    event_type: EventType,
    chunk_idx: usize,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
) {
    let since_ms = since.timestamp_millis() as u64;
    let before_ms = until.timestamp_millis() as u64;
    let mut continuation_token: Option<String> = None;

    loop {
        if queue.failed().await {
            return;
        }

        let page_result = fetch_and_map_page(&*history, &feedcode, event_type, since_ms, before_ms, continuation_token.as_deref())
            .await;

        let (deltas, next_token) = match page_result {
            Ok(page) => page,
            Err(error) => {
                tracing::error!(feedcode = %feedcode, chunk_idx, ?event_type, %error, "producer failed, failing queue");
                queue.mark_failed().await;
                return;
            }
        };

        if let Err(error) = queue.put(deltas, event_type, chunk_idx).await {
            tracing::error!(feedcode = %feedcode, chunk_idx, ?event_type, %error, "put into queue failed");
            queue.mark_failed().await;
            return;
        }

        match next_token {
            Some(token) => continuation_token = Some(token),
            None => break,
        }
    }

    if let Err(error) = queue.mark_done(event_type, chunk_idx).await {
        tracing::error!(feedcode = %feedcode, chunk_idx, ?event_type, %error, "mark_done failed");
        queue.mark_failed().await;
    }
}

type PageOutcome = (Vec<crate::book::UpdateDelta>, Option<String>);

async fn fetch_and_map_page<H: HistorySource>(
    history: &H,
    feedcode: &str,
    event_type: EventType,
    since_ms: u64,
    before_ms: u64,
    continuation_token: Option<&str>,
) -> std::result::Result<PageOutcome, String> {
    match event_type {
        EventType::Order => {
            let page = history
                .order_events_page(feedcode, since_ms, before_ms, continuation_token)
                .await
                .map_err(|e| e.to_string())?;

            let mut deltas = Vec::new();
            for element in &page.elements {
                deltas.extend(events::deltas_from_order_event(element).map_err(|e| e.to_string())?);
            }
            Ok((coalesce_page(deltas), page.continuation_token))
        }
        EventType::Execution => {
            let page = history
                .execution_events_page(feedcode, since_ms, before_ms, continuation_token)
                .await
                .map_err(|e| e.to_string())?;

            let mut deltas = Vec::new();
            for element in &page.elements {
                deltas.extend(events::deltas_from_execution_event(element).map_err(|e| e.to_string())?);
            }
            Ok((coalesce_page(deltas), page.continuation_token))
        }
    }
}

/// The consumer loop of spec §4.6 step 3, split into one call per emitted
/// snapshot: on a second boundary it projects and returns without
/// consuming the delta that crossed it; otherwise it consumes and applies
/// deltas until the boundary or exhaustion. The final-flush snapshot at
/// the bottom only fires when this call actually consumed a delta before
/// running dry — a call that starts and ends on an already-drained queue
/// (an empty day) emits nothing, per spec §9.
async fn compute_next_snapshot(
    queue: &ChunkedEventQueue,
    book: &mut MBPBook,
    cur_second: &mut u64,
) -> Option<SnapshotMessage> {
    let mut consumed_any = false;

    loop {
        let Some(next_delta) = queue.peek().await else {
            break;
        };

        if next_delta.timestamp != *cur_second {
            let prev_second = *cur_second;
            *cur_second = next_delta.timestamp;
            return Some(book.project(prev_second));
        }

        let Some(delta) = queue.get().await else {
            break;
        };
        *cur_second = delta.timestamp;
        book.apply_delta(&delta);
        consumed_any = true;
    }

    if consumed_any && !queue.failed().await {
        Some(book.project(*cur_second))
    } else {
        None
    }
}

/// Drains a queue end to end, collecting every emitted snapshot. Spec §9's
/// "empty starting snapshot" is emitted here, once, only when the first
/// delta actually observed lands at exactly `cur_second` — never
/// unconditionally, so a day with no events at all emits zero snapshots.
async fn drain_day(queue: &ChunkedEventQueue, book: &mut MBPBook, cur_second: &mut u64) -> Vec<SnapshotMessage> {
    let mut snapshots = Vec::new();

    if let Some(first) = queue.peek().await {
        if first.timestamp == *cur_second {
            snapshots.push(book.project(*cur_second));
        }
    }

    while let Some(snapshot) = compute_next_snapshot(queue, book, cur_second).await {
        snapshots.push(snapshot);
    }
    snapshots
}
