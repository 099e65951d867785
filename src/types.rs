//! Core enumerations shared across the crate: the asset universe, the
//! markets Kraken exposes them on, and the two sides of a book.

use serde::{Deserialize, Serialize};

/// Base asset. Extensible — add a variant and a row in [`crate::symbol`]'s
/// tables to onboard a new one.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Asset {
    Btc,
    Eth,
    Wif,
    Xrp,
    Sol,
    Doge,
    Trx,
    Ada,
    Avax,
    Shib,
    Dot,
}

/// Market an [`Asset`] can trade on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Market {
    Spot,
    UsdFuture,
}

/// Side of the book. The numeric tag (1 = bid, 2 = ask) is the wire
/// representation used by [`crate::wire`] and must stay stable.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Bid = 1,
    Ask = 2,
}

impl Side {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Side::Bid),
            2 => Some(Side::Ask),
            _ => None,
        }
    }
}

/// The two independent event streams a day is fetched from, per
/// spec §3 `EventType`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    Order,
    Execution,
}
