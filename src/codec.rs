//! On-disk zstd-framed, length-prefixed record format. Grounded on
//! `pysrc.data_handlers.kraken.historical.{snapshots_data_handler,trades_data_handler}`
//! and `pysrc.util.historical_data_utils.check_historical_data_filepath`
//! (original_source); directory contract and framing rules from spec §4.7.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::symbol::{self, feedcode_to_market};
use crate::types::Market;
use crate::wire::{self, SnapshotMessage, TradeMessage, SNAPSHOT_HEADER_LEN, TRADE_RECORD_LEN};

/// zstd compression level the reference writer uses.
const COMPRESSION_LEVEL: i32 = 10;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Wire(#[from] wire::Error),

    #[error(transparent)]
    Symbol(#[from] symbol::Error),

    #[error("path '{0}' does not live under a recognized <root>/{1}/<feedcode>/ directory")]
    InvalidPath(PathBuf, &'static str),
}

fn validate_path(path: &Path, kind: &'static str) -> Result<()> {
    let feedcode = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::InvalidPath(path.to_path_buf(), kind))?;

    let root_segment = path
        .parent()
        .and_then(|p| p.parent())
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str());

    if root_segment != Some(kind) {
        return Err(Error::InvalidPath(path.to_path_buf(), kind));
    }
    if path.extension().and_then(|e| e.to_str()) != Some("bin") {
        return Err(Error::InvalidPath(path.to_path_buf(), kind));
    }
    feedcode_to_market(feedcode)?;
    Ok(())
}

/// `<root>/snapshots/<feedcode>/<MM_DD_YYYY>.bin`
pub fn snapshot_path(root: &Path, feedcode: &str, file_stem: &str) -> PathBuf {
    root.join("snapshots").join(feedcode).join(format!("{file_stem}.bin"))
}

/// `<root>/trades/<feedcode>/<MM_DD_YYYY>.bin`
pub fn trade_path(root: &Path, feedcode: &str, file_stem: &str) -> PathBuf {
    root.join("trades").join(feedcode).join(format!("{file_stem}.bin"))
}

/// Writes a zstd stream of framed [`SnapshotMessage`] records, one file per
/// day per feedcode. Flushes and finalizes the zstd frame on drop-free
/// completion (`finish`).
pub struct SnapshotWriter {
    encoder: zstd::stream::write::Encoder<'static, BufWriter<File>>,
}

impl SnapshotWriter {
    pub fn create(path: &Path) -> Result<Self> {
        validate_path(path, "snapshots")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        let encoder = zstd::stream::write::Encoder::new(BufWriter::new(file), COMPRESSION_LEVEL)?;
        Ok(Self { encoder })
    }

    pub fn write(&mut self, snapshot: &SnapshotMessage) -> Result<()> {
        self.encoder.write_all(&snapshot.encode())?;
        Ok(())
    }

    pub fn finish(self) -> Result<()> {
        self.encoder.finish()?.flush()?;
        Ok(())
    }
}

/// Writes a zstd stream of framed [`TradeMessage`] records.
pub struct TradeWriter {
    encoder: zstd::stream::write::Encoder<'static, BufWriter<File>>,
}

impl TradeWriter {
    pub fn create(path: &Path) -> Result<Self> {
        validate_path(path, "trades")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        let encoder = zstd::stream::write::Encoder::new(BufWriter::new(file), COMPRESSION_LEVEL)?;
        Ok(Self { encoder })
    }

    pub fn write(&mut self, trade: &TradeMessage) -> Result<()> {
        self.encoder.write_all(&trade.encode())?;
        Ok(())
    }

    pub fn finish(self) -> Result<()> {
        self.encoder.finish()?.flush()?;
        Ok(())
    }
}

/// Streaming reader over a snapshot file: one record per [`next`] call.
pub struct SnapshotReader {
    decoder: zstd::stream::read::Decoder<'static, BufReader<File>>,
}

impl std::fmt::Debug for SnapshotReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotReader").finish_non_exhaustive()
    }
}

impl SnapshotReader {
    pub fn open(path: &Path) -> Result<Self> {
        validate_path(path, "snapshots")?;
        let file = File::open(path)?;
        let decoder = zstd::stream::read::Decoder::new(file)?;
        Ok(Self { decoder })
    }

    /// A short read (< header size) at a record boundary is end-of-stream;
    /// a short read mid-record is [`Error::Wire`]'s `Truncated`.
    pub fn next(&mut self) -> Result<Option<SnapshotMessage>> {
        let mut header = [0u8; SNAPSHOT_HEADER_LEN];
        let n = read_fill(&mut self.decoder, &mut header)?;
        if n == 0 {
            return Ok(None);
        }
        if n < SNAPSHOT_HEADER_LEN {
            return Err(wire::Error::Truncated {
                needed: SNAPSHOT_HEADER_LEN,
                had: n,
            }
            .into());
        }

        let feedcode_len = u32::from_le_bytes(header[12..16].try_into().unwrap()) as usize;
        let bids_len = u32::from_le_bytes(header[16..20].try_into().unwrap()) as usize;
        let asks_len = u32::from_le_bytes(header[20..24].try_into().unwrap()) as usize;
        let body_len = feedcode_len + bids_len + asks_len;

        let mut body = vec![0u8; body_len];
        let n = read_fill(&mut self.decoder, &mut body)?;
        if n < body_len {
            return Err(wire::Error::Truncated {
                needed: body_len,
                had: n,
            }
            .into());
        }

        let mut record = Vec::with_capacity(SNAPSHOT_HEADER_LEN + body_len);
        record.extend_from_slice(&header);
        record.extend_from_slice(&body);
        Ok(Some(SnapshotMessage::decode(&record)?))
    }
}

/// Streaming reader over a trade file: one record per [`next`] call.
pub struct TradeReader {
    decoder: zstd::stream::read::Decoder<'static, BufReader<File>>,
    feedcode: String,
    market: Market,
}

impl TradeReader {
    pub fn open(path: &Path, feedcode: impl Into<String>, market: Market) -> Result<Self> {
        validate_path(path, "trades")?;
        let file = File::open(path)?;
        let decoder = zstd::stream::read::Decoder::new(file)?;
        Ok(Self {
            decoder,
            feedcode: feedcode.into(),
            market,
        })
    }

    pub fn next(&mut self) -> Result<Option<TradeMessage>> {
        let mut record = [0u8; TRADE_RECORD_LEN];
        let n = read_fill(&mut self.decoder, &mut record)?;
        if n == 0 {
            return Ok(None);
        }
        if n < TRADE_RECORD_LEN {
            return Err(wire::Error::Truncated {
                needed: TRADE_RECORD_LEN,
                had: n,
            }
            .into());
        }
        Ok(Some(TradeMessage::decode(&record, &self.feedcode, self.market)?))
    }
}

/// Reads until `buf` is full or the stream ends, returning the number of
/// bytes actually read (short iff end-of-stream was reached mid-fill).
fn read_fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;

    #[test]
    fn snapshot_round_trips_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = snapshot_path(dir.path(), "PF_XBTUSD", "01_02_2024");

        let snapshots = vec![
            SnapshotMessage::new(1, "PF_XBTUSD", Market::UsdFuture, vec![(100.0, 1.0)], vec![]),
            SnapshotMessage::new(2, "PF_XBTUSD", Market::UsdFuture, vec![], vec![(101.0, 2.0)]),
        ];

        let mut writer = SnapshotWriter::create(&path).unwrap();
        for s in &snapshots {
            writer.write(s).unwrap();
        }
        writer.finish().unwrap();

        let mut reader = SnapshotReader::open(&path).unwrap();
        let mut read_back = vec![];
        while let Some(s) = reader.next().unwrap() {
            read_back.push(s);
        }
        assert_eq!(read_back, snapshots);
    }

    #[test]
    fn empty_snapshot_file_decodes_to_no_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = snapshot_path(dir.path(), "PF_XBTUSD", "01_02_2024");
        SnapshotWriter::create(&path).unwrap().finish().unwrap();

        let mut reader = SnapshotReader::open(&path).unwrap();
        assert!(reader.next().unwrap().is_none());
    }

    #[test]
    fn trade_round_trips_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = trade_path(dir.path(), "XADAZUSD", "01_02_2024");

        let trades = vec![
            TradeMessage::new(10, "XADAZUSD", 1, 10.0, 20.0, Side::Ask, Market::Spot),
            TradeMessage::new(11, "XADAZUSD", 1, 11.0, 21.0, Side::Bid, Market::Spot),
        ];

        let mut writer = TradeWriter::create(&path).unwrap();
        for t in &trades {
            writer.write(t).unwrap();
        }
        writer.finish().unwrap();

        let mut reader = TradeReader::open(&path, "XADAZUSD", Market::Spot).unwrap();
        let mut read_back = vec![];
        while let Some(t) = reader.next().unwrap() {
            read_back.push(t);
        }
        assert_eq!(read_back, trades);
    }

    #[test]
    fn rejects_path_outside_known_feedcode_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshots").join("NOT_A_FEEDCODE").join("01_02_2024.bin");
        assert!(matches!(SnapshotWriter::create(&path), Err(Error::Symbol(_))));
    }

    #[test]
    fn rejects_path_under_wrong_root_segment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not_snapshots").join("PF_XBTUSD").join("01_02_2024.bin");
        assert!(matches!(SnapshotWriter::create(&path), Err(Error::InvalidPath(_, _))));
    }
}
