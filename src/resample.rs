//! Wraps a raw loader and presents one output per wall-clock second over
//! `[since, until)`. Grounded on
//! `pysrc.data_loaders.{tick_snapshots_data_loader,tick_trades_data_loader}`
//! (original_source); alignment rules from spec §4.9.

use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};

use crate::loader::{self, RawSnapshotsLoader, RawTradesLoader};
use crate::types::{Asset, Market};
use crate::wire::{SnapshotMessage, TradeMessage};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Loader(#[from] loader::Error),

    #[error("raw record at time {found} precedes the current wall-clock second {expected}")]
    OutOfOrder { expected: u64, found: u64 },
}

fn date_to_timestamp(date: NaiveDate) -> u64 {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
        .timestamp() as u64
}

/// Re-emits the raw snapshot stream as one snapshot per wall-clock second.
/// Holds the last-seen book state so seconds with no raw snapshot repeat
/// the prior state, per spec §4.9.
pub struct TickSnapshots {
    raw: RawSnapshotsLoader,
    cur_timestamp: u64,
    end_timestamp: u64,
    cur_snapshot: SnapshotMessage,
    pending: Option<SnapshotMessage>,
}

impl TickSnapshots {
    pub fn new(root: &std::path::Path, asset: Asset, market: Market, since: NaiveDate, until: NaiveDate) -> Result<Self> {
        let raw = RawSnapshotsLoader::new(root, asset, market, since, until)?;
        let cur_timestamp = date_to_timestamp(since);
        let cur_snapshot = SnapshotMessage::new(cur_timestamp, raw.feedcode(), market, vec![], vec![]);
        Ok(Self {
            raw,
            cur_timestamp,
            end_timestamp: date_to_timestamp(until),
            cur_snapshot,
            pending: None,
        })
    }

    /// `None` exactly once `[since, until)` is exhausted.
    pub fn next(&mut self) -> Result<Option<SnapshotMessage>> {
        if self.cur_timestamp >= self.end_timestamp {
            return Ok(None);
        }

        if let Some(pending) = self.pending.take() {
            match pending.time.cmp(&self.cur_timestamp) {
                std::cmp::Ordering::Less => {
                    return Err(Error::OutOfOrder {
                        expected: self.cur_timestamp,
                        found: pending.time,
                    })
                }
                std::cmp::Ordering::Greater => {
                    self.pending = Some(pending);
                    self.cur_timestamp += 1;
                    return Ok(Some(self.stamped_snapshot()));
                }
                std::cmp::Ordering::Equal => {
                    self.cur_snapshot = pending;
                }
            }
        }

        loop {
            match self.raw.next()? {
                None => break,
                Some(record) => {
                    if record.time < self.cur_timestamp {
                        return Err(Error::OutOfOrder {
                            expected: self.cur_timestamp,
                            found: record.time,
                        });
                    } else if record.time == self.cur_timestamp {
                        self.cur_snapshot = record;
                    } else {
                        self.pending = Some(record);
                        break;
                    }
                }
            }
        }

        self.cur_timestamp += 1;
        Ok(Some(self.stamped_snapshot()))
    }

    fn stamped_snapshot(&self) -> SnapshotMessage {
        let mut snapshot = self.cur_snapshot.clone();
        snapshot.time = self.cur_timestamp - 1;
        snapshot
    }
}

/// Re-emits the raw trade stream as one (possibly empty) list of trades
/// per wall-clock second.
pub struct TickTrades {
    raw: RawTradesLoader,
    cur_timestamp: u64,
    end_timestamp: u64,
    cur_trades: Vec<TradeMessage>,
    pending: Option<TradeMessage>,
}

impl TickTrades {
    pub fn new(root: &std::path::Path, asset: Asset, market: Market, since: NaiveDate, until: NaiveDate) -> Result<Self> {
        let raw = RawTradesLoader::new(root, asset, market, since, until)?;
        Ok(Self {
            raw,
            cur_timestamp: date_to_timestamp(since),
            end_timestamp: date_to_timestamp(until),
            cur_trades: Vec::new(),
            pending: None,
        })
    }

    pub fn next(&mut self) -> Result<Option<Vec<TradeMessage>>> {
        if self.cur_timestamp >= self.end_timestamp {
            return Ok(None);
        }

        if let Some(pending) = self.pending.take() {
            match pending.time.cmp(&self.cur_timestamp) {
                std::cmp::Ordering::Less => {
                    return Err(Error::OutOfOrder {
                        expected: self.cur_timestamp,
                        found: pending.time,
                    })
                }
                std::cmp::Ordering::Greater => {
                    self.pending = Some(pending);
                    self.cur_timestamp += 1;
                    return Ok(Some(vec![]));
                }
                std::cmp::Ordering::Equal => {
                    self.cur_trades = vec![pending];
                }
            }
        }

        loop {
            match self.raw.next()? {
                None => break,
                Some(trade) => {
                    if trade.time < self.cur_timestamp {
                        return Err(Error::OutOfOrder {
                            expected: self.cur_timestamp,
                            found: trade.time,
                        });
                    } else if trade.time == self.cur_timestamp {
                        self.cur_trades.push(trade);
                    } else {
                        self.pending = Some(trade);
                        break;
                    }
                }
            }
        }

        self.cur_timestamp += 1;
        Ok(Some(std::mem::take(&mut self.cur_trades)))
    }
}
