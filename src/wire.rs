//! Canonical trade and snapshot records, and their on-disk binary form.
//! Grounded on `pysrc.adapters.messages` (original_source): `to_bytes` /
//! `from_bytes` on both message types. Layout is pinned by spec §4.2.

use crate::types::{Market, Side};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("record truncated: needed {needed} bytes, had {had}")]
    Truncated { needed: usize, had: usize },

    #[error("feedcode is not valid utf-8")]
    BadUtf8,

    #[error("unknown market tag {0}")]
    BadMarketTag(u32),

    #[error("unknown side tag {0}")]
    BadSideTag(u8),
}

impl Market {
    pub fn tag(self) -> u32 {
        match self {
            Market::Spot => 1,
            Market::UsdFuture => 2,
        }
    }

    pub fn from_tag(tag: u32) -> Result<Self> {
        match tag {
            1 => Ok(Market::Spot),
            2 => Ok(Market::UsdFuture),
            other => Err(Error::BadMarketTag(other)),
        }
    }
}

/// A single executed trade. Immutable after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeMessage {
    pub time: u64,
    pub feedcode: String,
    pub n_trades: u32,
    pub price: f32,
    pub quantity: f32,
    pub side: Side,
    pub market: Market,
}

/// Trade wire body: `u64 time | f32 price | f32 quantity | u8 side_tag`.
pub const TRADE_RECORD_LEN: usize = 17;

impl TradeMessage {
    pub fn new(
        time: u64,
        feedcode: impl Into<String>,
        n_trades: u32,
        price: f32,
        quantity: f32,
        side: Side,
        market: Market,
    ) -> Self {
        assert!(n_trades >= 1, "a trade record must aggregate at least one trade");
        Self {
            time,
            feedcode: feedcode.into(),
            n_trades,
            price,
            quantity,
            side,
            market,
        }
    }

    /// `feedcode` and `market` are carried by the containing file's
    /// directory path (spec §4.2) so they are not part of the body.
    pub fn encode(&self) -> [u8; TRADE_RECORD_LEN] {
        let mut out = [0u8; TRADE_RECORD_LEN];
        out[0..8].copy_from_slice(&self.time.to_le_bytes());
        out[8..12].copy_from_slice(&self.price.to_le_bytes());
        out[12..16].copy_from_slice(&self.quantity.to_le_bytes());
        out[16] = self.side.tag();
        out
    }

    pub fn decode(bytes: &[u8], feedcode: &str, market: Market) -> Result<Self> {
        if bytes.len() < TRADE_RECORD_LEN {
            return Err(Error::Truncated {
                needed: TRADE_RECORD_LEN,
                had: bytes.len(),
            });
        }
        let time = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
        let price = f32::from_le_bytes(bytes[8..12].try_into().unwrap());
        let quantity = f32::from_le_bytes(bytes[12..16].try_into().unwrap());
        let side = Side::from_tag(bytes[16]).ok_or(Error::BadSideTag(bytes[16]))?;
        Ok(Self {
            time,
            feedcode: feedcode.to_string(),
            n_trades: 1,
            price,
            quantity,
            side,
            market,
        })
    }
}

/// A full materialization of the book's price levels at one instant.
/// Levels with zero quantity never appear (constructor drops them).
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotMessage {
    pub time: u64,
    pub feedcode: String,
    pub market: Market,
    pub bids: Vec<(f64, f64)>,
    pub asks: Vec<(f64, f64)>,
}

/// Snapshot header: `u64 time | u32 market_tag | u32 feedcode_len | u32 bids_bytes | u32 asks_bytes`.
pub const SNAPSHOT_HEADER_LEN: usize = 24;

impl SnapshotMessage {
    /// Drops any `(price, volume)` pair whose volume is exactly zero.
    pub fn new(
        time: u64,
        feedcode: impl Into<String>,
        market: Market,
        raw_bids: impl IntoIterator<Item = (f64, f64)>,
        raw_asks: impl IntoIterator<Item = (f64, f64)>,
    ) -> Self {
        Self {
            time,
            feedcode: feedcode.into(),
            market,
            bids: raw_bids.into_iter().filter(|(_, qty)| *qty != 0.0).collect(),
            asks: raw_asks.into_iter().filter(|(_, qty)| *qty != 0.0).collect(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let feedcode_bytes = self.feedcode.as_bytes();
        let bids_bytes = encode_levels(&self.bids);
        let asks_bytes = encode_levels(&self.asks);

        let mut out =
            Vec::with_capacity(SNAPSHOT_HEADER_LEN + feedcode_bytes.len() + bids_bytes.len() + asks_bytes.len());
        out.extend_from_slice(&self.time.to_le_bytes());
        out.extend_from_slice(&self.market.tag().to_le_bytes());
        out.extend_from_slice(&(feedcode_bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(&(bids_bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(&(asks_bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(feedcode_bytes);
        out.extend_from_slice(&bids_bytes);
        out.extend_from_slice(&asks_bytes);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < SNAPSHOT_HEADER_LEN {
            return Err(Error::Truncated {
                needed: SNAPSHOT_HEADER_LEN,
                had: bytes.len(),
            });
        }
        let time = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
        let market_tag = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        let feedcode_len = u32::from_le_bytes(bytes[12..16].try_into().unwrap()) as usize;
        let bids_len = u32::from_le_bytes(bytes[16..20].try_into().unwrap()) as usize;
        let asks_len = u32::from_le_bytes(bytes[20..24].try_into().unwrap()) as usize;
        let market = Market::from_tag(market_tag)?;

        let mut offset = SNAPSHOT_HEADER_LEN;
        let feedcode = take(bytes, &mut offset, feedcode_len)?;
        let feedcode = std::str::from_utf8(feedcode).map_err(|_| Error::BadUtf8)?.to_string();

        let bids_raw = take(bytes, &mut offset, bids_len)?;
        let asks_raw = take(bytes, &mut offset, asks_len)?;

        Ok(Self {
            time,
            feedcode,
            market,
            bids: decode_levels(bids_raw)?,
            asks: decode_levels(asks_raw)?,
        })
    }
}

fn take<'a>(bytes: &'a [u8], offset: &mut usize, len: usize) -> Result<&'a [u8]> {
    if *offset + len > bytes.len() {
        return Err(Error::Truncated {
            needed: *offset + len,
            had: bytes.len(),
        });
    }
    let slice = &bytes[*offset..*offset + len];
    *offset += len;
    Ok(slice)
}

const LEVEL_LEN: usize = 16; // f64 price | f64 qty

fn encode_levels(levels: &[(f64, f64)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(levels.len() * LEVEL_LEN);
    for (price, qty) in levels {
        out.extend_from_slice(&price.to_le_bytes());
        out.extend_from_slice(&qty.to_le_bytes());
    }
    out
}

fn decode_levels(bytes: &[u8]) -> Result<Vec<(f64, f64)>> {
    if bytes.len() % LEVEL_LEN != 0 {
        return Err(Error::Truncated {
            needed: bytes.len() + (LEVEL_LEN - bytes.len() % LEVEL_LEN),
            had: bytes.len(),
        });
    }
    Ok(bytes
        .chunks_exact(LEVEL_LEN)
        .map(|chunk| {
            let price = f64::from_le_bytes(chunk[0..8].try_into().unwrap());
            let qty = f64::from_le_bytes(chunk[8..16].try_into().unwrap());
            (price, qty)
        })
        .collect())
}
