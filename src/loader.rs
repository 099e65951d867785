//! Iterates persisted snapshot/trade files in date order, yielding each
//! record exactly once. Grounded on
//! `pysrc.data_loaders.{raw_snapshots_data_loader,raw_trades_data_loader,base_data_loader}`
//! (original_source); construction and failure modes from spec §4.8.

use std::path::PathBuf;

use chrono::NaiveDate;

use crate::codec::{self, snapshot_path, trade_path, SnapshotReader, TradeReader};
use crate::symbol::{self, asset_to_feedcode};
use crate::types::{Asset, Market};
use crate::wire::{SnapshotMessage, TradeMessage};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Symbol(#[from] symbol::Error),

    #[error(transparent)]
    Codec(#[from] codec::Error),

    #[error("asset directory '{0}' does not exist")]
    MissingDirectory(PathBuf),

    #[error("since ({0}) must be strictly before until ({1})")]
    EmptyRange(NaiveDate, NaiveDate),

    #[error("expected file '{0}' does not exist")]
    MissingFile(PathBuf),
}

fn file_stem(date: NaiveDate) -> String {
    date.format("%m_%d_%Y").to_string()
}

/// Raw, un-resampled loader over a `[since, until)` date range. Shared
/// skeleton between [`RawSnapshotsLoader`] and [`RawTradesLoader`]: tracks
/// which day's stream is currently open and advances across day
/// boundaries transparently.
#[derive(Debug)]
struct DayCursor {
    asset_dir: PathBuf,
    cur_date: NaiveDate,
    until: NaiveDate,
}

impl DayCursor {
    fn new(asset_dir: PathBuf, since: NaiveDate, until: NaiveDate) -> Result<Self> {
        if !asset_dir.exists() {
            return Err(Error::MissingDirectory(asset_dir));
        }
        if since >= until {
            return Err(Error::EmptyRange(since, until));
        }
        Ok(Self {
            asset_dir,
            cur_date: since,
            until,
        })
    }

    fn cur_path(&self) -> PathBuf {
        self.asset_dir.join(format!("{}.bin", file_stem(self.cur_date)))
    }

    fn advance_day(&mut self) {
        self.cur_date += chrono::Duration::days(1);
    }
}

/// Loads persisted snapshot files for one `(asset, market)` across
/// `[since, until)`.
#[derive(Debug)]
pub struct RawSnapshotsLoader {
    cursor: DayCursor,
    feedcode: String,
    reader: Option<SnapshotReader>,
}

impl RawSnapshotsLoader {
    pub fn new(root: &std::path::Path, asset: Asset, market: Market, since: NaiveDate, until: NaiveDate) -> Result<Self> {
        let feedcode = asset_to_feedcode(asset, market).to_string();
        let asset_dir = root.join("snapshots").join(&feedcode);
        let cursor = DayCursor::new(asset_dir, since, until)?;

        let first_path = cursor.cur_path();
        if !first_path.exists() {
            return Err(Error::MissingFile(first_path));
        }
        let reader = Some(SnapshotReader::open(&first_path)?);

        Ok(Self {
            cursor,
            feedcode,
            reader,
        })
    }

    /// All records across `[since, until)`; fails on any gap.
    pub fn get_data(&self, since: NaiveDate, until: NaiveDate) -> Result<Vec<SnapshotMessage>> {
        if since >= until {
            return Err(Error::EmptyRange(since, until));
        }
        let mut out = Vec::new();
        let mut date = since;
        while date < until {
            let path = self.cursor.asset_dir.join(format!("{}.bin", file_stem(date)));
            if !path.exists() {
                return Err(Error::MissingFile(path));
            }
            let mut reader = SnapshotReader::open(&path)?;
            while let Some(record) = reader.next()? {
                out.push(record);
            }
            date += chrono::Duration::days(1);
        }
        Ok(out)
    }

    /// Next record, or `None` once `until` is reached. Any missing
    /// intermediate file terminates the iterator cleanly; a read error
    /// within an existing file is fatal.
    pub fn next(&mut self) -> Result<Option<SnapshotMessage>> {
        loop {
            let Some(reader) = self.reader.as_mut() else {
                return Ok(None);
            };
            if let Some(record) = reader.next()? {
                return Ok(Some(record));
            }

            self.cursor.advance_day();
            if self.cursor.cur_date >= self.cursor.until {
                self.reader = None;
                return Ok(None);
            }
            let next_path = self.cursor.cur_path();
            if !next_path.exists() {
                self.reader = None;
                return Ok(None);
            }
            self.reader = Some(SnapshotReader::open(&next_path)?);
        }
    }

    pub fn feedcode(&self) -> &str {
        &self.feedcode
    }
}

/// Loads persisted trade files for one `(asset, market)` across
/// `[since, until)`.
pub struct RawTradesLoader {
    cursor: DayCursor,
    feedcode: String,
    market: Market,
    reader: Option<TradeReader>,
}

impl RawTradesLoader {
    pub fn new(root: &std::path::Path, asset: Asset, market: Market, since: NaiveDate, until: NaiveDate) -> Result<Self> {
        let feedcode = asset_to_feedcode(asset, market).to_string();
        let asset_dir = root.join("trades").join(&feedcode);
        let cursor = DayCursor::new(asset_dir, since, until)?;

        let first_path = cursor.cur_path();
        if !first_path.exists() {
            return Err(Error::MissingFile(first_path));
        }
        let reader = Some(TradeReader::open(&first_path, &feedcode, market)?);

        Ok(Self {
            cursor,
            feedcode,
            market,
            reader,
        })
    }

    pub fn get_data(&self, since: NaiveDate, until: NaiveDate) -> Result<Vec<TradeMessage>> {
        if since >= until {
            return Err(Error::EmptyRange(since, until));
        }
        let mut out = Vec::new();
        let mut date = since;
        while date < until {
            let path = self.cursor.asset_dir.join(format!("{}.bin", file_stem(date)));
            if !path.exists() {
                return Err(Error::MissingFile(path));
            }
            let mut reader = TradeReader::open(&path, &self.feedcode, self.market)?;
            while let Some(record) = reader.next()? {
                out.push(record);
            }
            date += chrono::Duration::days(1);
        }
        Ok(out)
    }

    pub fn next(&mut self) -> Result<Option<TradeMessage>> {
        loop {
            let Some(reader) = self.reader.as_mut() else {
                return Ok(None);
            };
            if let Some(record) = reader.next()? {
                return Ok(Some(record));
            }

            self.cursor.advance_day();
            if self.cursor.cur_date >= self.cursor.until {
                self.reader = None;
                return Ok(None);
            }
            let next_path = self.cursor.cur_path();
            if !next_path.exists() {
                self.reader = None;
                return Ok(None);
            }
            self.reader = Some(TradeReader::open(&next_path, &self.feedcode, self.market)?);
        }
    }

    pub fn feedcode(&self) -> &str {
        &self.feedcode
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{SnapshotWriter, TradeWriter};
    use crate::types::Side;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn write_snapshots(root: &std::path::Path, feedcode: &str, stem: &str, snapshots: &[SnapshotMessage]) {
        let path = snapshot_path(root, feedcode, stem);
        let mut writer = SnapshotWriter::create(&path).unwrap();
        for s in snapshots {
            writer.write(s).unwrap();
        }
        writer.finish().unwrap();
    }

    fn write_trades(root: &std::path::Path, feedcode: &str, stem: &str, trades: &[TradeMessage]) {
        let path = trade_path(root, feedcode, stem);
        let mut writer = TradeWriter::create(&path).unwrap();
        for t in trades {
            writer.write(t).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn iterates_across_a_day_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let feedcode = asset_to_feedcode(Asset::Btc, Market::UsdFuture);

        write_snapshots(
            dir.path(),
            feedcode,
            "01_01_2024",
            &[SnapshotMessage::new(1, feedcode, Market::UsdFuture, vec![(1.0, 1.0)], vec![])],
        );
        write_snapshots(
            dir.path(),
            feedcode,
            "01_02_2024",
            &[SnapshotMessage::new(2, feedcode, Market::UsdFuture, vec![(2.0, 2.0)], vec![])],
        );

        let mut loader = RawSnapshotsLoader::new(
            dir.path(),
            Asset::Btc,
            Market::UsdFuture,
            date(2024, 1, 1),
            date(2024, 1, 3),
        )
        .unwrap();

        let first = loader.next().unwrap().unwrap();
        assert_eq!(first.time, 1);
        let second = loader.next().unwrap().unwrap();
        assert_eq!(second.time, 2);
        assert!(loader.next().unwrap().is_none());
    }

    #[test]
    fn missing_intermediate_file_ends_iteration_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let feedcode = asset_to_feedcode(Asset::Eth, Market::Spot);
        write_snapshots(
            dir.path(),
            feedcode,
            "01_01_2024",
            &[SnapshotMessage::new(1, feedcode, Market::Spot, vec![], vec![])],
        );

        let mut loader = RawSnapshotsLoader::new(
            dir.path(),
            Asset::Eth,
            Market::Spot,
            date(2024, 1, 1),
            date(2024, 1, 5),
        )
        .unwrap();

        assert!(loader.next().unwrap().is_some());
        assert!(loader.next().unwrap().is_none());
    }

    #[test]
    fn missing_directory_fails_construction() {
        let dir = tempfile::tempdir().unwrap();
        let err = RawSnapshotsLoader::new(
            dir.path(),
            Asset::Sol,
            Market::Spot,
            date(2024, 1, 1),
            date(2024, 1, 2),
        )
        .unwrap_err();
        assert!(matches!(err, Error::MissingDirectory(_)));
    }

    #[test]
    fn empty_range_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let feedcode = asset_to_feedcode(Asset::Sol, Market::Spot);
        write_snapshots(dir.path(), feedcode, "01_01_2024", &[]);

        let err = RawSnapshotsLoader::new(
            dir.path(),
            Asset::Sol,
            Market::Spot,
            date(2024, 1, 2),
            date(2024, 1, 1),
        )
        .unwrap_err();
        assert!(matches!(err, Error::EmptyRange(_, _)));
    }

    #[test]
    fn get_data_gathers_across_the_whole_range() {
        let dir = tempfile::tempdir().unwrap();
        let feedcode = asset_to_feedcode(Asset::Trx, Market::Spot);
        write_trades(
            dir.path(),
            feedcode,
            "01_01_2024",
            &[TradeMessage::new(1, feedcode, 1, 1.0, 1.0, Side::Bid, Market::Spot)],
        );
        write_trades(
            dir.path(),
            feedcode,
            "01_02_2024",
            &[TradeMessage::new(2, feedcode, 1, 2.0, 2.0, Side::Ask, Market::Spot)],
        );

        let loader = RawTradesLoader::new(
            dir.path(),
            Asset::Trx,
            Market::Spot,
            date(2024, 1, 1),
            date(2024, 1, 2),
        )
        .unwrap();

        let data = loader.get_data(date(2024, 1, 1), date(2024, 1, 3)).unwrap();
        assert_eq!(data.len(), 2);
    }
}
