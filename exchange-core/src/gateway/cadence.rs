//! Tick-dispatch throttling.

use crate::config::ExchangeConfig;

/// Decides on which ticks external progress events go out.
///
/// Computed once from configuration and handed to every gateway, so all
/// devices in a simulation agree on the same dispatch cadence.
#[derive(Debug, Clone, Copy)]
pub struct TickCadence {
    ticks_per_slot: u32,
    dispatch_interval: u32,
}

impl TickCadence {
    pub fn new(ticks_per_slot: u32, dispatch_percent: u32) -> Self {
        let dispatch_interval = (ticks_per_slot * dispatch_percent / 100).max(1);
        Self {
            ticks_per_slot,
            dispatch_interval,
        }
    }

    pub fn from_config(config: &ExchangeConfig) -> Self {
        Self::new(config.ticks_per_slot, config.tick_dispatch_percent)
    }

    pub fn ticks_per_slot(&self) -> u32 {
        self.ticks_per_slot
    }

    pub fn is_dispatch_tick(&self, tick: u32) -> bool {
        tick != 0 && tick % self.dispatch_interval == 0
    }

    /// How far into the slot tick `tick` is, as a percentage.
    pub fn slot_completion_percent(&self, tick: u32) -> f64 {
        if self.ticks_per_slot == 0 {
            return 0.0;
        }
        f64::from(tick % self.ticks_per_slot) / f64::from(self.ticks_per_slot) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatches_every_interval_ticks() {
        // 90 ticks per slot, 10% -> every 9th tick.
        let cadence = TickCadence::new(90, 10);
        assert!(!cadence.is_dispatch_tick(0));
        assert!(!cadence.is_dispatch_tick(1));
        assert!(!cadence.is_dispatch_tick(8));
        assert!(cadence.is_dispatch_tick(9));
        assert!(cadence.is_dispatch_tick(18));
        assert!(!cadence.is_dispatch_tick(19));
    }

    #[test]
    fn interval_never_collapses_to_zero() {
        let cadence = TickCadence::new(5, 10);
        assert!(cadence.is_dispatch_tick(1));
        assert!(cadence.is_dispatch_tick(2));
    }

    #[test]
    fn slot_completion_wraps_per_slot() {
        let cadence = TickCadence::new(90, 10);
        assert_eq!(cadence.slot_completion_percent(45), 50.0);
        assert_eq!(cadence.slot_completion_percent(90), 0.0);
    }
}
