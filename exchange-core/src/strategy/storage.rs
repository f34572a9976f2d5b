//! Storage device: trades on both sides of the book.

use serde_json::{json, Value};

use super::{DeviceKind, DeviceStrategy};

/// A battery. Sells what it has stored, buys up to its free capacity.
pub struct StorageDevice {
    capacity_kwh: f64,
    stored_kwh: f64,
}

impl StorageDevice {
    pub fn new(capacity_kwh: f64, stored_kwh: f64) -> Self {
        let capacity_kwh = capacity_kwh.max(0.0);
        Self {
            capacity_kwh,
            stored_kwh: stored_kwh.clamp(0.0, capacity_kwh),
        }
    }

    pub fn free_capacity_kwh(&self) -> f64 {
        (self.capacity_kwh - self.stored_kwh).max(0.0)
    }
}

impl DeviceStrategy for StorageDevice {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Prosumer
    }

    fn required_energy_kwh(&self) -> f64 {
        self.free_capacity_kwh()
    }

    fn available_energy_kwh(&self) -> f64 {
        self.stored_kwh
    }

    /// A forecast for storage is the expected state of charge.
    fn set_energy_forecast(&mut self, energy_kwh: f64) {
        self.stored_kwh = energy_kwh.clamp(0.0, self.capacity_kwh);
    }

    fn device_info_extra(&self) -> Value {
        json!({
            "energy_to_sell_kWh": self.stored_kwh,
            "free_capacity_kWh": self.free_capacity_kwh(),
        })
    }
}
