//! Historical Kraken Futures market-data ingestion, Market-By-Price order
//! book reconstruction, and per-second replay.
//!
//! The pipeline runs in three stages: [`builder`] pages through Kraken's
//! history API and persists one [`wire::SnapshotMessage`] file per day via
//! [`codec`]; [`loader`] replays those files back in date order; [`resample`]
//! re-emits them (or raw [`wire::TradeMessage`]s) as one record per
//! wall-clock second for downstream consumers that expect a steady clock.

pub mod book;
pub mod builder;
pub mod codec;
pub mod events;
pub mod history;
pub mod loader;
pub mod queue;
pub mod resample;
pub mod symbol;
pub mod types;
pub mod wire;

pub use book::MBPBook;
pub use builder::UpdatesBuilder;
pub use history::{HistoryClient, HistorySource};
pub use loader::{RawSnapshotsLoader, RawTradesLoader};
pub use queue::ChunkedEventQueue;
pub use resample::{TickSnapshots, TickTrades};
pub use symbol::{asset_to_feedcode, feedcode_to_asset, feedcode_to_market};
pub use types::{Asset, EventType, Market, Side};
pub use wire::{SnapshotMessage, TradeMessage};
