//! Parallel-producer / single-consumer timestamp-ordered merge queue.
//! Grounded on `pysrc.adapters.kraken.historical.updates.containers.ChunkedEventQueue`
//! (original_source) and spec §4.4: the Python version uses one
//! `threading.Condition` per `(event_type, chunk)` pair; this keeps that
//! shape but maps threads to tokio tasks and the condvar to
//! `tokio::sync::Notify`, since producers and the consumer all suspend on
//! network I/O and are naturally async (spec §5 explicitly allows either).

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

use crate::book::UpdateDelta;
use crate::types::EventType;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("chunk {0} is already marked done for its event type")]
    ChunkAlreadyDone(usize),

    #[error("chunk index {0} is out of range")]
    ChunkOutOfRange(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkStatus {
    InProgress,
    Done,
}

struct ChunkSlot {
    status: ChunkStatus,
    deltas: VecDeque<UpdateDelta>,
}

impl ChunkSlot {
    fn new() -> Self {
        Self {
            status: ChunkStatus::InProgress,
            deltas: VecDeque::new(),
        }
    }
}

struct State {
    order: Vec<ChunkSlot>,
    execution: Vec<ChunkSlot>,
    /// FIFO for the chunk currently being drained, already merged and
    /// sorted; refilled transparently as chunks become drainable.
    fifo: VecDeque<UpdateDelta>,
    cur_chunk: usize,
    failed: bool,
}

impl State {
    fn slots(&mut self, event_type: EventType) -> &mut Vec<ChunkSlot> {
        match event_type {
            EventType::Order => &mut self.order,
            EventType::Execution => &mut self.execution,
        }
    }
}

/// Created with `N` chunks, fed by `2*N` producers (one ORDER + one
/// EXECUTION per chunk), drained by a single consumer via [`peek`]/[`get`].
pub struct ChunkedEventQueue {
    state: Mutex<State>,
    notify: Notify,
    num_chunks: usize,
}

impl ChunkedEventQueue {
    pub fn new(num_chunks: usize) -> Arc<Self> {
        assert!(num_chunks > 0, "num_chunks must be greater than zero");
        Arc::new(Self {
            state: Mutex::new(State {
                order: (0..num_chunks).map(|_| ChunkSlot::new()).collect(),
                execution: (0..num_chunks).map(|_| ChunkSlot::new()).collect(),
                fifo: VecDeque::new(),
                cur_chunk: 0,
                failed: false,
            }),
            notify: Notify::new(),
            num_chunks,
        })
    }

    /// `true` iff every chunk has been drained and the internal FIFO is empty.
    pub async fn empty(&self) -> bool {
        let state = self.state.lock().await;
        state.cur_chunk >= self.num_chunks && state.fifo.is_empty()
    }

    pub async fn failed(&self) -> bool {
        self.state.lock().await.failed
    }

    /// Appends mapped deltas into the `(event_type, chunk_idx)` slot.
    /// Errors if the slot is already `DONE` or `chunk_idx` is out of range.
    pub async fn put(
        &self,
        deltas: Vec<UpdateDelta>,
        event_type: EventType,
        chunk_idx: usize,
    ) -> Result<()> {
        if chunk_idx >= self.num_chunks {
            return Err(Error::ChunkOutOfRange(chunk_idx));
        }
        {
            let mut state = self.state.lock().await;
            let slot = &mut state.slots(event_type)[chunk_idx];
            if slot.status != ChunkStatus::InProgress {
                return Err(Error::ChunkAlreadyDone(chunk_idx));
            }
            slot.deltas.extend(deltas);
        }
        self.notify.notify_waiters();
        Ok(())
    }

    /// Marks a `(event_type, chunk_idx)` half done. Errors if called twice
    /// for the same pair.
    pub async fn mark_done(&self, event_type: EventType, chunk_idx: usize) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            let slot = &mut state.slots(event_type)[chunk_idx];
            if slot.status != ChunkStatus::InProgress {
                return Err(Error::ChunkAlreadyDone(chunk_idx));
            }
            slot.status = ChunkStatus::Done;
        }
        self.notify.notify_waiters();
        Ok(())
    }

    /// Latches failure: every subsequent `peek`/`get` returns `None`.
    pub async fn mark_failed(&self) {
        self.state.lock().await.failed = true;
        self.notify.notify_waiters();
    }

    /// Blocks until the current chunk is drainable (both halves `DONE`),
    /// merges and stably sorts it by timestamp (ORDER before EXECUTION on
    /// ties), and refills the FIFO. Skips transparently over chunks whose
    /// merged FIFO is empty. No-op if the FIFO already has entries or the
    /// queue is exhausted/failed.
    async fn ensure_fifo_loaded(&self) {
        loop {
            let mut state = self.state.lock().await;
            if state.failed || !state.fifo.is_empty() || state.cur_chunk >= self.num_chunks {
                return;
            }

            let chunk = state.cur_chunk;
            let order_done = state.order[chunk].status == ChunkStatus::Done;
            let exec_done = state.execution[chunk].status == ChunkStatus::Done;

            if !order_done || !exec_done {
                // Register interest before releasing the lock: a `notified()`
                // future created before a `notify_waiters()` call is
                // guaranteed to be woken by it, even if this task hasn't
                // started `.await`ing yet (see tokio::sync::Notify docs).
                // Creating it after dropping the lock would leave a window
                // where a producer's notify is missed entirely.
                let notified = self.notify.notified();
                drop(state);
                notified.await;
                continue;
            }

            let order_deltas: Vec<_> = state.order[chunk].deltas.drain(..).collect();
            let exec_deltas: Vec<_> = state.execution[chunk].deltas.drain(..).collect();

            // Stable merge: ORDER entries precede EXECUTION entries on a
            // timestamp tie because they are appended to `merged` first and
            // `sort_by_key` is stable (spec §4.4 rule 3 / §4.5 tie-break).
            let mut merged: Vec<UpdateDelta> =
                Vec::with_capacity(order_deltas.len() + exec_deltas.len());
            merged.extend(order_deltas);
            merged.extend(exec_deltas);
            merged.sort_by_key(|d| d.timestamp);

            if merged.is_empty() {
                state.cur_chunk += 1;
                continue;
            }

            state.fifo = merged.into();
            return;
        }
    }

    /// Returns the next delta without consuming it, or `None` once the
    /// queue is exhausted or failed.
    pub async fn peek(&self) -> Option<UpdateDelta> {
        self.ensure_fifo_loaded().await;
        let state = self.state.lock().await;
        state.fifo.front().cloned()
    }

    /// Consumes and returns the next delta, or `None` once the queue is
    /// exhausted or failed.
    pub async fn get(&self) -> Option<UpdateDelta> {
        self.ensure_fifo_loaded().await;
        let mut state = self.state.lock().await;
        let next = state.fifo.pop_front();
        if next.is_some() && state.fifo.is_empty() {
            state.cur_chunk += 1;
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;

    fn delta(side: Side, timestamp: u64, price: f64, qty: f64) -> UpdateDelta {
        UpdateDelta::with_entry(side, timestamp, price, qty)
    }

    #[tokio::test]
    async fn drains_chunks_in_order_merged_and_sorted() {
        let queue = ChunkedEventQueue::new(2);

        queue
            .put(vec![delta(Side::Bid, 5, 1.0, 1.0)], EventType::Order, 0)
            .await
            .unwrap();
        queue
            .put(vec![delta(Side::Ask, 3, 2.0, 1.0)], EventType::Execution, 0)
            .await
            .unwrap();
        queue.mark_done(EventType::Order, 0).await.unwrap();
        queue.mark_done(EventType::Execution, 0).await.unwrap();

        queue.mark_done(EventType::Order, 1).await.unwrap();
        queue.mark_done(EventType::Execution, 1).await.unwrap();

        let first = queue.get().await.unwrap();
        assert_eq!(first.timestamp, 3);
        let second = queue.get().await.unwrap();
        assert_eq!(second.timestamp, 5);

        assert!(queue.get().await.is_none());
        assert!(queue.empty().await);
    }

    #[tokio::test]
    async fn ties_break_order_before_execution() {
        let queue = ChunkedEventQueue::new(1);
        queue
            .put(vec![delta(Side::Bid, 1, 1.0, 1.0)], EventType::Order, 0)
            .await
            .unwrap();
        queue
            .put(vec![delta(Side::Ask, 1, 2.0, 1.0)], EventType::Execution, 0)
            .await
            .unwrap();
        queue.mark_done(EventType::Order, 0).await.unwrap();
        queue.mark_done(EventType::Execution, 0).await.unwrap();

        let first = queue.get().await.unwrap();
        assert_eq!(first.side, Side::Bid);
        let second = queue.get().await.unwrap();
        assert_eq!(second.side, Side::Ask);
    }

    #[tokio::test]
    async fn empty_chunk_is_skipped_transparently() {
        let queue = ChunkedEventQueue::new(2);
        queue.mark_done(EventType::Order, 0).await.unwrap();
        queue.mark_done(EventType::Execution, 0).await.unwrap();
        queue
            .put(vec![delta(Side::Bid, 9, 1.0, 1.0)], EventType::Order, 1)
            .await
            .unwrap();
        queue.mark_done(EventType::Order, 1).await.unwrap();
        queue.mark_done(EventType::Execution, 1).await.unwrap();

        let next = queue.get().await.unwrap();
        assert_eq!(next.timestamp, 9);
        assert!(queue.empty().await);
    }

    #[tokio::test]
    async fn put_after_done_is_chunk_already_done() {
        let queue = ChunkedEventQueue::new(1);
        queue.mark_done(EventType::Order, 0).await.unwrap();
        let err = queue
            .put(vec![delta(Side::Bid, 1, 1.0, 1.0)], EventType::Order, 0)
            .await
            .unwrap_err();
        assert_eq!(err, Error::ChunkAlreadyDone(0));
    }

    #[tokio::test]
    async fn mark_done_twice_is_chunk_already_done() {
        let queue = ChunkedEventQueue::new(1);
        queue.mark_done(EventType::Order, 0).await.unwrap();
        let err = queue.mark_done(EventType::Order, 0).await.unwrap_err();
        assert_eq!(err, Error::ChunkAlreadyDone(0));
    }

    #[tokio::test]
    async fn put_out_of_range_chunk_errors() {
        let queue = ChunkedEventQueue::new(1);
        let err = queue
            .put(vec![delta(Side::Bid, 1, 1.0, 1.0)], EventType::Order, 5)
            .await
            .unwrap_err();
        assert_eq!(err, Error::ChunkOutOfRange(5));
    }

    #[tokio::test]
    async fn mark_failed_wakes_blocked_consumer() {
        let queue = ChunkedEventQueue::new(1);
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };

        // Give the consumer a chance to start waiting before failing it.
        tokio::task::yield_now().await;
        queue.mark_failed().await;

        let result = tokio::time::timeout(std::time::Duration::from_secs(1), consumer)
            .await
            .expect("consumer should wake promptly after mark_failed")
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn concurrent_producers_yield_nondecreasing_timestamps() {
        let queue = ChunkedEventQueue::new(4);
        let mut producers = vec![];

        for chunk in 0..4u64 {
            for event_type in [EventType::Order, EventType::Execution] {
                let queue = queue.clone();
                producers.push(tokio::spawn(async move {
                    let base = chunk * 10;
                    queue
                        .put(
                            vec![
                                delta(Side::Bid, base + 2, 1.0, 1.0),
                                delta(Side::Bid, base + 1, 1.0, 1.0),
                            ],
                            event_type,
                            chunk as usize,
                        )
                        .await
                        .unwrap();
                    queue.mark_done(event_type, chunk as usize).await.unwrap();
                }));
            }
        }

        for p in producers {
            p.await.unwrap();
        }

        let mut seen = vec![];
        while let Some(delta) = queue.get().await {
            seen.push(delta.timestamp);
        }

        let mut sorted = seen.clone();
        sorted.sort();
        assert_eq!(seen, sorted);
        assert_eq!(seen.len(), 16);
    }
}
