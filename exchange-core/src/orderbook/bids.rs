//! Buy-side ledger for bid-enabled strategies in two-sided markets.

use std::collections::{HashMap, HashSet};

use exchange::{Bid, InstrumentId, MarketId, Trade};

use crate::FLOATING_POINT_TOLERANCE;

/// Per-strategy ledger of posted and traded bids, scoped by market id.
pub struct BidLedger {
    owner: String,
    posted: HashMap<MarketId, Vec<Bid>>,
    traded: HashMap<MarketId, Vec<Bid>>,
}

impl BidLedger {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            posted: HashMap::new(),
            traded: HashMap::new(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn add_posted(&mut self, market_id: MarketId, bid: Bid) {
        self.posted.entry(market_id).or_default().push(bid);
    }

    /// Remove one bid (or, with `None`, every posted bid) from the posted set.
    /// Returns the removed ids.
    pub fn remove_posted(
        &mut self,
        market_id: MarketId,
        bid_id: Option<InstrumentId>,
    ) -> Vec<InstrumentId> {
        let posted = match self.posted.get_mut(&market_id) {
            Some(posted) => posted,
            None => return Vec::new(),
        };
        let removed: Vec<InstrumentId> = posted
            .iter()
            .filter(|bid| bid_id.is_none_or(|id| bid.id() == id))
            .map(Bid::id)
            .collect();
        posted.retain(|bid| !removed.contains(&bid.id()));
        removed
    }

    /// Register a successful bid trade: moves the bid out of the posted set.
    pub fn add_traded(&mut self, market_id: MarketId, bid: Bid) {
        self.remove_posted(market_id, Some(bid.id()));
        self.traded.entry(market_id).or_default().push(bid);
    }

    pub fn get_posted(&self, market_id: MarketId) -> Vec<Bid> {
        self.posted.get(&market_id).cloned().unwrap_or_default()
    }

    pub fn is_bid_posted(&self, market_id: MarketId, bid_id: InstrumentId) -> bool {
        self.posted
            .get(&market_id)
            .is_some_and(|posted| posted.iter().any(|bid| bid.id() == bid_id))
    }

    pub fn are_bids_posted(&self, market_id: MarketId) -> bool {
        self.posted
            .get(&market_id)
            .is_some_and(|posted| !posted.is_empty())
    }

    pub fn posted_energy(&self, market_id: MarketId) -> f64 {
        self.posted
            .get(&market_id)
            .map_or(0.0, |posted| posted.iter().map(Bid::energy).sum())
    }

    pub fn traded_energy(&self, market_id: MarketId) -> f64 {
        self.traded
            .get(&market_id)
            .map_or(0.0, |traded| traded.iter().map(Bid::energy).sum())
    }

    pub fn traded_cost(&self, market_id: MarketId) -> f64 {
        self.traded
            .get(&market_id)
            .map_or(0.0, |traded| traded.iter().map(Bid::price).sum())
    }

    /// Admission check for a new bid posting against the device's remaining
    /// energy requirement.
    pub fn can_bid_be_posted(
        &self,
        bid_energy: f64,
        bid_price: f64,
        required_energy: f64,
        market_id: MarketId,
        replace_existing: bool,
    ) -> bool {
        let posted_energy = if replace_existing {
            0.0
        } else {
            self.posted_energy(market_id)
        };
        let total = bid_energy + posted_energy;
        total <= required_energy + FLOATING_POINT_TOLERANCE && bid_price >= 0.0
    }

    /// React to a partial fill of one of this strategy's bids: the original
    /// is replaced by the accepted portion and the residual.
    pub fn on_bid_split(
        &mut self,
        original: &Bid,
        accepted: &Bid,
        residual: &Bid,
        market_id: MarketId,
    ) {
        if accepted.buyer() != self.owner {
            return;
        }
        self.remove_posted(market_id, Some(original.id()));
        self.add_posted(market_id, accepted.clone());
        self.add_posted(market_id, residual.clone());
    }

    pub fn on_bid_deleted(&mut self, market_id: MarketId, bid: &Bid) {
        if bid.buyer() != self.owner {
            return;
        }
        self.remove_posted(market_id, Some(bid.id()));
    }

    /// React to a concluded bid trade where this strategy was the buyer.
    pub fn on_bid_traded(&mut self, market_id: MarketId, trade: &Trade) {
        if trade.buyer() != self.owner {
            return;
        }
        if let Some(bid) = trade.offer_bid().as_bid() {
            self.add_traded(market_id, bid.clone());
        }
    }

    /// Market-cycle rollover: drop entries whose market left the active
    /// window.
    pub fn delete_past_markets(&mut self, active_markets: &HashSet<MarketId>) {
        self.posted
            .retain(|market, _| active_markets.contains(market));
        self.traded
            .retain(|market, _| active_markets.contains(market));
    }
}
