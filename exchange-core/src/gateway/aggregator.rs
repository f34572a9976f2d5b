//! Batch-event bridge for aggregator-controlled devices.
//!
//! Devices under aggregator control do not publish tick/trade/market events
//! individually; the events accumulate in per-device batches that the
//! aggregator transport flushes in bulk, decoupling per-device event volume
//! from the number of external publish calls.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Default)]
struct BridgeState {
    /// device id -> controlling aggregator name.
    controlled: HashMap<Uuid, String>,
    /// device id -> not-yet-flushed events.
    batches: HashMap<Uuid, Vec<Value>>,
}

#[derive(Default)]
pub struct AggregatorBridge {
    state: Mutex<BridgeState>,
}

impl AggregatorBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_device(&self, device_id: Uuid, aggregator: impl Into<String>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.controlled.insert(device_id, aggregator.into());
    }

    pub fn release_device(&self, device_id: Uuid) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.controlled.remove(&device_id);
        state.batches.remove(&device_id);
    }

    pub fn is_controlling_device(&self, device_id: Uuid) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.controlled.contains_key(&device_id)
    }

    pub fn add_batch_event(&self, device_id: Uuid, event: Value) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.batches.entry(device_id).or_default().push(event);
    }

    pub fn add_batch_tick_event(&self, device_id: Uuid, slot_completion_percent: f64) {
        self.add_batch_event(
            device_id,
            json!({
                "event": "tick",
                "area_uuid": device_id.to_string(),
                "slot_completion_percent": slot_completion_percent,
            }),
        );
    }

    pub fn add_batch_trade_event(&self, device_id: Uuid, trade: Value) {
        self.add_batch_event(
            device_id,
            json!({
                "event": "trade",
                "area_uuid": device_id.to_string(),
                "trade": trade,
            }),
        );
    }

    pub fn add_batch_market_event(&self, device_id: Uuid, market_info: Value) {
        self.add_batch_event(
            device_id,
            json!({
                "event": "market",
                "area_uuid": device_id.to_string(),
                "market_info": market_info,
            }),
        );
    }

    pub fn add_batch_finished_event(&self, device_id: Uuid) {
        self.add_batch_event(
            device_id,
            json!({
                "event": "finish",
                "area_uuid": device_id.to_string(),
            }),
        );
    }

    /// Take and clear one device's accumulated events.
    pub fn pop_batch(&self, device_id: Uuid) -> Vec<Value> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.batches.remove(&device_id).unwrap_or_default()
    }

    /// Take and clear every device's accumulated events.
    pub fn flush_all(&self) -> HashMap<Uuid, Vec<Value>> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut state.batches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batches_accumulate_until_popped() {
        let bridge = AggregatorBridge::new();
        let device = Uuid::new_v4();
        bridge.register_device(device, "agg-1");

        bridge.add_batch_tick_event(device, 10.0);
        bridge.add_batch_tick_event(device, 20.0);

        let batch = bridge.pop_batch(device);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0]["event"], "tick");
        assert!(bridge.pop_batch(device).is_empty());
    }

    #[test]
    fn releasing_a_device_drops_its_batch() {
        let bridge = AggregatorBridge::new();
        let device = Uuid::new_v4();
        bridge.register_device(device, "agg-1");
        bridge.add_batch_finished_event(device);

        bridge.release_device(device);
        assert!(!bridge.is_controlling_device(device));
        assert!(bridge.pop_batch(device).is_empty());
    }
}
