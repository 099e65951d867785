//! Market-By-Price order book: delta application and snapshot projection.
//! Grounded on `pysrc.adapters.kraken.historical.updates.containers.MBPBook`
//! (original_source) and spec §4.3.

use std::collections::BTreeMap;

use crate::types::{Market, Side};
use crate::wire::SnapshotMessage;

/// Relative and absolute tolerance for "close enough to zero to remove the
/// level", per spec §3/§4.3.
const REL_TOLERANCE: f64 = 1e-5;
const ABS_TOLERANCE: f64 = 1e-8;

/// `numpy.isclose(qty, 0.0, rtol=1e-5, atol=1e-8)`-equivalent: since the
/// reference value is zero, the relative term vanishes and this reduces to
/// the absolute tolerance. See DESIGN.md for why the relative term in
/// spec §3/§4.3 is interpreted this way.
fn is_zero(qty: f64) -> bool {
    qty.abs() <= ABS_TOLERANCE + REL_TOLERANCE * 0.0_f64.abs()
}

/// A signed adjustment to one or more price levels on one side, all
/// sharing a timestamp. Carries one or more (price -> signed qty) entries.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateDelta {
    pub side: Side,
    pub timestamp: u64,
    entries: BTreeMap<OrderedF64, f64>,
}

/// Prices are compared bitwise-ordered via their total ordering; books
/// never carry NaN prices so this is sound and lets prices key a `BTreeMap`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
struct OrderedF64(f64);
impl Eq for OrderedF64 {}
impl Ord for OrderedF64 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.partial_cmp(&other.0).expect("price must not be NaN")
    }
}

impl UpdateDelta {
    pub fn new(side: Side, timestamp: u64) -> Self {
        Self {
            side,
            timestamp,
            entries: BTreeMap::new(),
        }
    }

    pub fn with_entry(side: Side, timestamp: u64, price: f64, qty: f64) -> Self {
        let mut delta = Self::new(side, timestamp);
        delta.add(price, qty);
        delta
    }

    /// Accumulates `qty` into the price-level entry.
    pub fn add(&mut self, price: f64, qty: f64) {
        *self.entries.entry(OrderedF64(price)).or_insert(0.0) += qty;
    }

    /// Merges `other` into `self`. Both deltas must share `side` and
    /// `timestamp` — callers (see `crate::events::coalesce_page`) only call
    /// this once that invariant is already known to hold.
    pub fn add_delta(&mut self, other: &UpdateDelta) {
        debug_assert_eq!(self.side, other.side);
        debug_assert_eq!(self.timestamp, other.timestamp);
        for (price, qty) in &other.entries {
            *self.entries.entry(*price).or_insert(0.0) += qty;
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.entries.iter().map(|(p, q)| (p.0, *q))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Price-indexed two-sided book for one feedcode.
#[derive(Debug, Clone)]
pub struct MBPBook {
    feedcode: String,
    market: Market,
    bids: BTreeMap<OrderedF64, f64>,
    asks: BTreeMap<OrderedF64, f64>,
}

impl MBPBook {
    pub fn new(feedcode: impl Into<String>, market: Market) -> Self {
        Self {
            feedcode: feedcode.into(),
            market,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
        }
    }

    fn side_map(&mut self, side: Side) -> &mut BTreeMap<OrderedF64, f64> {
        match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        }
    }

    /// Applies every entry of `delta` to the running sum for its side,
    /// removing any level that lands within the zero tolerance. Total:
    /// never fails.
    pub fn apply_delta(&mut self, delta: &UpdateDelta) {
        let side_map = self.side_map(delta.side);
        for (price, qty) in delta.entries() {
            let key = OrderedF64(price);
            let running = side_map.entry(key).or_insert(0.0);
            *running += qty;
            if is_zero(*running) {
                side_map.remove(&key);
            }
        }
    }

    /// Materializes the current levels into a snapshot stamped at `time`.
    /// Insertion order (ascending price on both sides, since both sides
    /// are stored in a `BTreeMap`) is what callers observe; spec §3 only
    /// requires bids descending / asks ascending for the live-replay
    /// projection, which `crate::resample` enforces when it re-sorts for
    /// downstream consumers.
    pub fn project(&self, time: u64) -> SnapshotMessage {
        SnapshotMessage::new(
            time,
            self.feedcode.clone(),
            self.market,
            self.bids.iter().map(|(p, q)| (p.0, *q)),
            self.asks.iter().map(|(p, q)| (p.0, *q)),
        )
    }

    pub fn feedcode(&self) -> &str {
        &self.feedcode
    }

    pub fn market(&self) -> Market {
        self.market
    }
}
