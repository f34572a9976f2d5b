//! Consumption-only device.

use serde_json::{json, Value};

use super::{DeviceKind, DeviceStrategy};

/// A load that buys its forecast consumption for each slot.
pub struct LoadDevice {
    required_energy_kwh: f64,
}

impl LoadDevice {
    pub fn new(required_energy_kwh: f64) -> Self {
        Self {
            required_energy_kwh: required_energy_kwh.max(0.0),
        }
    }
}

impl DeviceStrategy for LoadDevice {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Consumer
    }

    fn required_energy_kwh(&self) -> f64 {
        self.required_energy_kwh
    }

    fn available_energy_kwh(&self) -> f64 {
        0.0
    }

    fn set_energy_forecast(&mut self, energy_kwh: f64) {
        self.required_energy_kwh = energy_kwh.max(0.0);
    }

    fn device_info_extra(&self) -> Value {
        json!({ "energy_requirement_kWh": self.required_energy_kwh })
    }
}
