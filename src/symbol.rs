//! Bidirectional mapping between the internal `{Asset, Market}` pair and
//! Kraken's feedcode strings. Grounded on
//! `pysrc.adapters.kraken.asset_mappings` (original_source): a compile-time
//! constant table per market, no I/O.

use crate::types::{Asset, Market};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown feedcode '{0}'")]
    InvalidSymbol(String),
}

const SPOT_TABLE: &[(Asset, &str)] = &[
    (Asset::Btc, "XXBTZUSD"),
    (Asset::Eth, "XETHZUSD"),
    (Asset::Wif, "XWIFZUSD"),
    (Asset::Xrp, "XXRPZUSD"),
    (Asset::Sol, "XSOLZUSD"),
    (Asset::Doge, "XDOGEZUSD"),
    (Asset::Trx, "XTRXZUSD"),
    (Asset::Ada, "XADAZUSD"),
    (Asset::Avax, "XAVAXZUSD"),
    (Asset::Shib, "XSHIBZUSD"),
    (Asset::Dot, "XDOTZUSD"),
];

const USD_FUTURE_TABLE: &[(Asset, &str)] = &[
    (Asset::Btc, "PF_XBTUSD"),
    (Asset::Eth, "PF_ETHUSD"),
    (Asset::Wif, "PF_WIFUSD"),
    (Asset::Xrp, "PF_XRPUSD"),
    (Asset::Sol, "PF_SOLUSD"),
    (Asset::Doge, "PF_DOGEUSD"),
    (Asset::Trx, "PF_TRXUSD"),
    (Asset::Ada, "PF_ADAUSD"),
    (Asset::Avax, "PF_AVAXUSD"),
    (Asset::Shib, "PF_SHIBUSD"),
    (Asset::Dot, "PF_DOTUSD"),
];

fn table_for(market: Market) -> &'static [(Asset, &'static str)] {
    match market {
        Market::Spot => SPOT_TABLE,
        Market::UsdFuture => USD_FUTURE_TABLE,
    }
}

/// Total: every `(Asset, Market)` pair has a feedcode.
pub fn asset_to_feedcode(asset: Asset, market: Market) -> &'static str {
    table_for(market)
        .iter()
        .find(|(a, _)| *a == asset)
        .map(|(_, code)| *code)
        .expect("symbol table is total over Asset x Market")
}

/// Partial: fails with [`Error::InvalidSymbol`] for unrecognized feedcodes.
pub fn feedcode_to_asset(feedcode: &str) -> Result<Asset> {
    let market = feedcode_to_market(feedcode)?;
    table_for(market)
        .iter()
        .find(|(_, code)| *code == feedcode)
        .map(|(asset, _)| *asset)
        .ok_or_else(|| Error::InvalidSymbol(feedcode.to_string()))
}

/// Partial: reports which market a feedcode belongs to.
pub fn feedcode_to_market(feedcode: &str) -> Result<Market> {
    if SPOT_TABLE.iter().any(|(_, code)| *code == feedcode) {
        Ok(Market::Spot)
    } else if USD_FUTURE_TABLE.iter().any(|(_, code)| *code == feedcode) {
        Ok(Market::UsdFuture)
    } else {
        Err(Error::InvalidSymbol(feedcode.to_string()))
    }
}
