//! Maps Kraken history-API event payloads to signed [`UpdateDelta`]s.
//! Grounded on
//! `pysrc.adapters.kraken.historical.updates.historical_updates_data_client`'s
//! `_delta_from_order_event` / `_delta_from_execution_event`, and
//! `pysrc.adapters.kraken.historical.updates.utils` for the string tags
//! (original_source); rules pinned by spec §4.5.

use serde::Deserialize;

use crate::book::UpdateDelta;
use crate::types::Side;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("malformed event: {0}")]
    MalformedEvent(String),
}

fn str_to_side(s: &str) -> Result<Side> {
    match s {
        "Buy" => Ok(Side::Bid),
        "Sell" => Ok(Side::Ask),
        other => Err(Error::MalformedEvent(format!("unknown order direction '{other}'"))),
    }
}

/// One resting order as it appears nested in `OrderPlaced` / `OrderUpdated`
/// / `OrderCancelled` payloads.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderFields {
    pub direction: String,
    #[serde(rename = "limitPrice")]
    pub limit_price: String,
    pub quantity: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdatedOrderFields {
    #[serde(rename = "newOrder")]
    pub new_order: OrderFields,
    #[serde(rename = "oldOrder")]
    pub old_order: OrderFields,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionFields {
    pub price: String,
    pub quantity: String,
}

/// The tagged union of event kinds the orders endpoint can return, keyed by
/// the JSON object's single field name (spec §6 HTTP / §4.5).
#[derive(Debug, Clone, Deserialize)]
pub enum OrderEvent {
    OrderPlaced { order: OrderFields },
    OrderUpdated(UpdatedOrderFields),
    OrderCancelled { order: OrderFields },
    OrderRejected {},
    OrderEditRejected {},
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderApiEvent {
    pub event: OrderEvent,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionEvent {
    pub execution: ExecutionFields,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionApiEvent {
    pub event: ExecutionWrapper,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionWrapper {
    #[serde(rename = "Execution")]
    pub execution: ExecutionEvent,
}

fn parse_f64(s: &str, field: &str) -> Result<f64> {
    s.parse()
        .map_err(|_| Error::MalformedEvent(format!("field '{field}' is not numeric: '{s}'")))
}

/// §4.5: `PLACED` -> one delta `{side, price=limitPrice, qty=+quantity}`;
/// `CANCELLED` -> one delta with `qty=-quantity`; `UPDATED` -> two entries,
/// `+newQuantity @ newLimitPrice` and `-oldQuantity @ oldLimitPrice`, merged
/// into one [`UpdateDelta`] when they share side (the API always reports
/// both legs against the same order, so they always do), else as two
/// separate deltas. `REJECTED`/`EDIT_REJECTED` produce nothing. Timestamps
/// arrive in milliseconds and are truncated to seconds here, the earliest
/// point they can be (spec §9).
pub fn deltas_from_order_event(event: &OrderApiEvent) -> Result<Vec<UpdateDelta>> {
    let timestamp = event.timestamp / 1000;

    match &event.event {
        OrderEvent::OrderPlaced { order } => {
            let side = str_to_side(&order.direction)?;
            let price = parse_f64(&order.limit_price, "limitPrice")?;
            let qty = parse_f64(&order.quantity, "quantity")?;
            Ok(vec![UpdateDelta::with_entry(side, timestamp, price, qty)])
        }
        OrderEvent::OrderCancelled { order } => {
            let side = str_to_side(&order.direction)?;
            let price = parse_f64(&order.limit_price, "limitPrice")?;
            let qty = parse_f64(&order.quantity, "quantity")?;
            Ok(vec![UpdateDelta::with_entry(side, timestamp, price, -qty)])
        }
        OrderEvent::OrderUpdated(fields) => {
            let new_side = str_to_side(&fields.new_order.direction)?;
            let new_price = parse_f64(&fields.new_order.limit_price, "newOrder.limitPrice")?;
            let new_qty = parse_f64(&fields.new_order.quantity, "newOrder.quantity")?;

            let old_side = str_to_side(&fields.old_order.direction)?;
            let old_price = parse_f64(&fields.old_order.limit_price, "oldOrder.limitPrice")?;
            let old_qty = parse_f64(&fields.old_order.quantity, "oldOrder.quantity")?;

            let mut new_delta = UpdateDelta::with_entry(new_side, timestamp, new_price, new_qty);
            if old_side == new_side {
                new_delta.add(old_price, -old_qty);
                Ok(vec![new_delta])
            } else {
                let old_delta = UpdateDelta::with_entry(old_side, timestamp, old_price, -old_qty);
                Ok(vec![new_delta, old_delta])
            }
        }
        OrderEvent::OrderRejected {} | OrderEvent::OrderEditRejected {} => Ok(vec![]),
    }
}

/// §4.5: an execution consumes liquidity on both sides of the book as
/// modeled here (flagged as an open question in spec §9 — see DESIGN.md
/// for why this is kept as-is).
pub fn deltas_from_execution_event(event: &ExecutionApiEvent) -> Result<Vec<UpdateDelta>> {
    let timestamp = event.timestamp / 1000;
    let execution = &event.event.execution.execution;
    let price = parse_f64(&execution.price, "price")?;
    let qty = parse_f64(&execution.quantity, "quantity")?;

    Ok(vec![
        UpdateDelta::with_entry(Side::Bid, timestamp, price, -qty),
        UpdateDelta::with_entry(Side::Ask, timestamp, price, -qty),
    ])
}

/// Merges consecutive deltas in `page` that share `(timestamp, side)` via
/// [`UpdateDelta::add_delta`], to reduce queue churn. Optimization only —
/// spec §4.5 guarantees the per-second projection is identical either way.
pub fn coalesce_page(page: Vec<UpdateDelta>) -> Vec<UpdateDelta> {
    let mut out: Vec<UpdateDelta> = Vec::with_capacity(page.len());
    for delta in page {
        if let Some(last) = out.last_mut() {
            if last.side == delta.side && last.timestamp == delta.timestamp {
                last.add_delta(&delta);
                continue;
            }
        }
        out.push(delta);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_event(json: serde_json::Value) -> OrderApiEvent {
        serde_json::from_value(json).unwrap()
    }

    fn execution_event(json: serde_json::Value) -> ExecutionApiEvent {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn placed_then_cancelled() {
        let placed = order_event(serde_json::json!({
            "event": {"OrderPlaced": {"order": {"direction": "Sell", "limitPrice": "1", "quantity": "2"}}},
            "timestamp": 1000,
        }));
        let deltas = deltas_from_order_event(&placed).unwrap();
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].side, Side::Ask);
        assert_eq!(deltas[0].timestamp, 1);
        assert_eq!(deltas[0].entries().collect::<Vec<_>>(), vec![(1.0, 2.0)]);

        let cancelled = order_event(serde_json::json!({
            "event": {"OrderCancelled": {"order": {"direction": "Buy", "limitPrice": "7", "quantity": "8"}}},
            "timestamp": 10_000,
        }));
        let deltas = deltas_from_order_event(&cancelled).unwrap();
        assert_eq!(deltas[0].side, Side::Bid);
        assert_eq!(deltas[0].timestamp, 10);
        assert_eq!(deltas[0].entries().collect::<Vec<_>>(), vec![(7.0, -8.0)]);
    }

    #[test]
    fn updated_same_side_merges_into_one_delta() {
        let updated = order_event(serde_json::json!({
            "event": {"OrderUpdated": {
                "newOrder": {"direction": "Buy", "limitPrice": "3", "quantity": "4"},
                "oldOrder": {"direction": "Buy", "limitPrice": "5", "quantity": "6"},
            }},
            "timestamp": 2000,
        }));
        let deltas = deltas_from_order_event(&updated).unwrap();
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].side, Side::Bid);
        assert_eq!(deltas[0].timestamp, 2);
        let mut entries = deltas[0].entries().collect::<Vec<_>>();
        entries.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
        assert_eq!(entries, vec![(3.0, 4.0), (5.0, -6.0)]);
    }

    #[test]
    fn updated_cross_side_produces_two_deltas() {
        let updated = order_event(serde_json::json!({
            "event": {"OrderUpdated": {
                "newOrder": {"direction": "Buy", "limitPrice": "3", "quantity": "4"},
                "oldOrder": {"direction": "Sell", "limitPrice": "5", "quantity": "6"},
            }},
            "timestamp": 2000,
        }));
        let deltas = deltas_from_order_event(&updated).unwrap();
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].side, Side::Bid);
        assert_eq!(deltas[1].side, Side::Ask);
    }

    #[test]
    fn rejected_and_edit_rejected_produce_nothing() {
        let rejected = order_event(serde_json::json!({
            "event": {"OrderRejected": {"reason": "string"}},
            "timestamp": 1000,
        }));
        assert!(deltas_from_order_event(&rejected).unwrap().is_empty());

        let edit_rejected = order_event(serde_json::json!({
            "event": {"OrderEditRejected": {"reason": "string"}},
            "timestamp": 1000,
        }));
        assert!(deltas_from_order_event(&edit_rejected).unwrap().is_empty());
    }

    #[test]
    fn execution_consumes_both_sides() {
        let exec = execution_event(serde_json::json!({
            "event": {"Execution": {"execution": {"price": "68717.5", "quantity": "3000"}}},
            "timestamp": 2000,
        }));
        let deltas = deltas_from_execution_event(&exec).unwrap();
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].side, Side::Bid);
        assert_eq!(deltas[1].side, Side::Ask);
        for delta in &deltas {
            assert_eq!(delta.timestamp, 2);
            assert_eq!(delta.entries().collect::<Vec<_>>(), vec![(68717.5, -3000.0)]);
        }
    }

    #[test]
    fn unknown_direction_is_malformed_event() {
        let placed = order_event(serde_json::json!({
            "event": {"OrderPlaced": {"order": {"direction": "Sideways", "limitPrice": "1", "quantity": "2"}}},
            "timestamp": 1000,
        }));
        assert!(matches!(
            deltas_from_order_event(&placed),
            Err(Error::MalformedEvent(_))
        ));
    }

    #[test]
    fn coalesce_merges_same_timestamp_and_side() {
        let page = vec![
            UpdateDelta::with_entry(Side::Bid, 1, 10.0, 1.0),
            UpdateDelta::with_entry(Side::Bid, 1, 10.0, 2.0),
            UpdateDelta::with_entry(Side::Ask, 1, 11.0, 1.0),
        ];
        let coalesced = coalesce_page(page);
        assert_eq!(coalesced.len(), 2);
        assert_eq!(
            coalesced[0].entries().collect::<Vec<_>>(),
            vec![(10.0, 3.0)]
        );
    }
}
