//! Generation-only device.

use serde_json::{json, Value};

use super::{DeviceKind, DeviceStrategy};

/// A PV panel that sells its forecast production for each slot.
pub struct PvDevice {
    available_energy_kwh: f64,
}

impl PvDevice {
    pub fn new(available_energy_kwh: f64) -> Self {
        Self {
            available_energy_kwh: available_energy_kwh.max(0.0),
        }
    }
}

impl DeviceStrategy for PvDevice {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Producer
    }

    fn required_energy_kwh(&self) -> f64 {
        0.0
    }

    fn available_energy_kwh(&self) -> f64 {
        self.available_energy_kwh
    }

    fn set_energy_forecast(&mut self, energy_kwh: f64) {
        self.available_energy_kwh = energy_kwh.max(0.0);
    }

    fn device_info_extra(&self) -> Value {
        json!({ "available_energy_kWh": self.available_energy_kwh })
    }
}
