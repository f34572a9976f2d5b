use std::time::Duration;

/// Whether the simulation runs single-sided (offers only) or double-sided
/// markets. In a double-sided market a single match produces two mirrored
/// trade records, which the gateway must de-duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketKind {
    OneSided,
    TwoSided,
}

impl MarketKind {
    pub fn is_two_sided(&self) -> bool {
        matches!(self, MarketKind::TwoSided)
    }
}

/// Runtime configuration for the transport and gateway layers.
///
/// Injected by value wherever it is needed; there are no process-wide
/// configuration singletons.
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    /// How long a blocking call waits for its correlated response.
    pub response_timeout: Duration,
    /// Bound on concurrently running inbound command handlers per market.
    pub max_worker_threads: usize,
    /// Bounded wait for in-flight handlers during shutdown.
    pub drain_timeout: Duration,
    pub market_kind: MarketKind,
    /// Keep ledger entries of expired markets instead of dropping them on
    /// market-cycle rollover.
    pub retain_past_market_state: bool,
    pub ticks_per_slot: u32,
    /// Percentage of a slot between two external tick dispatches.
    pub tick_dispatch_percent: u32,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(10),
            max_worker_threads: 10,
            drain_timeout: Duration::from_secs(5),
            market_kind: MarketKind::OneSided,
            retain_past_market_state: false,
            ticks_per_slot: 90,
            tick_dispatch_percent: 10,
        }
    }
}
