//! Device strategy seam.
//!
//! A strategy models one device's trading intent for the current market slot:
//! how much it needs to buy, how much it can sell, and what its externally
//! visible device info looks like. The gateway consults the strategy's kind
//! to decide which external commands the device exposes.

pub mod load;
pub mod pv;
pub mod storage;

pub use load::LoadDevice;
pub use pv::PvDevice;
pub use storage::StorageDevice;

use serde_json::{json, Value};

/// Which side(s) of the book a device naturally trades on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// Buys energy (loads). Bid side only.
    Consumer,
    /// Sells energy (generation). Offer side only.
    Producer,
    /// Both sides (storage).
    Prosumer,
}

impl DeviceKind {
    pub fn supports_bids(&self) -> bool {
        matches!(self, DeviceKind::Consumer | DeviceKind::Prosumer)
    }

    pub fn supports_offers(&self) -> bool {
        matches!(self, DeviceKind::Producer | DeviceKind::Prosumer)
    }
}

pub trait DeviceStrategy: Send {
    fn kind(&self) -> DeviceKind;

    /// Energy the device still needs to buy in the current slot, in kWh.
    fn required_energy_kwh(&self) -> f64;

    /// Energy the device can still sell in the current slot, in kWh.
    fn available_energy_kwh(&self) -> f64;

    /// Apply an externally supplied forecast for the current slot.
    fn set_energy_forecast(&mut self, energy_kwh: f64);

    /// Device-class specific fields merged into `device_info` replies.
    fn device_info_extra(&self) -> Value {
        json!({})
    }
}
