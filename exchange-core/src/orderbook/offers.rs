//! Sell-side ledger: what has this strategy posted, sold, bought, and what
//! survived splitting.
//!
//! Bookkeeping mismatches (removing an unknown offer, removing an offer that
//! already sold) are logged warnings, not errors: they legitimately occur when
//! external command handling races the match engine, and the operations are
//! written so that a duplicate application is a no-op.

use std::collections::{HashMap, HashSet};

use log::warn;

use exchange::{InstrumentId, MarketId, Offer, Trade};

use crate::FLOATING_POINT_TOLERANCE;

/// Per-strategy ledger of sell-side instruments, scoped by market id.
pub struct Offers {
    owner: String,
    /// Currently live, not-yet-settled offers this strategy created.
    posted: HashMap<InstrumentId, (Offer, MarketId)>,
    /// Offers matched away, per market.
    sold: HashMap<MarketId, Vec<Offer>>,
    /// Offers this strategy acquired as counterparty.
    bought: HashMap<InstrumentId, (Offer, MarketId)>,
    /// Partial fills: original offer id -> accepted portion. Lives only while
    /// the original id is still in play within its market slot.
    split: HashMap<InstrumentId, Offer>,
}

impl Offers {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            posted: HashMap::new(),
            sold: HashMap::new(),
            bought: HashMap::new(),
            split: HashMap::new(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Register a freshly created offer. Skipped when the id is a known split
    /// key: the residual of a split must not be re-posted under the original
    /// id, the split path already posted it separately.
    pub fn post(&mut self, offer: Offer, market_id: MarketId) {
        if self.split.contains_key(&offer.id()) {
            return;
        }
        self.posted.insert(offer.id(), (offer, market_id));
    }

    /// Remove an offer from the posted set.
    ///
    /// Returns `false` (and leaves the ledger untouched) when the offer
    /// already sold in its market or was never posted.
    pub fn remove(&mut self, offer_id: InstrumentId) -> bool {
        let market_id = match self.posted.get(&offer_id) {
            Some((_, market_id)) => *market_id,
            None => {
                warn!("could not find offer {offer_id} to remove");
                return false;
            }
        };
        let already_sold = self
            .sold
            .get(&market_id)
            .is_some_and(|sold| sold.iter().any(|o| o.id() == offer_id));
        if already_sold {
            warn!("offer {offer_id} already sold, cannot remove it");
            return false;
        }
        self.posted.remove(&offer_id);
        true
    }

    /// Atomic remove-then-post. When `old_id` cannot be removed the new offer
    /// is not posted either and the ledger is unchanged.
    pub fn replace(&mut self, old_id: InstrumentId, new_offer: Offer, market_id: MarketId) {
        if self.remove(old_id) {
            // Direct insert: the replacement may carry a split key (the
            // accepted part of a split keeps the original id), which `post`
            // would refuse.
            self.posted.insert(new_offer.id(), (new_offer, market_id));
        }
    }

    /// React to a trade concluded in `market_id`.
    pub fn on_trade(&mut self, market_id: MarketId, trade: &Trade) {
        if trade.seller() != self.owner {
            return;
        }
        let offer = match trade.offer_bid().as_offer() {
            Some(offer) => offer,
            None => return,
        };
        if let Some(accepted) = self.split.get(&offer.id()) {
            // The traded instrument came out of a split; the residual was
            // posted separately, so the accepted portion must leave `posted`.
            let accepted_id = accepted.id();
            if self.posted.contains_key(&accepted_id) {
                self.remove(accepted_id);
            }
        }
        self.sold.entry(market_id).or_default().push(offer.clone());
    }

    /// React to a partial fill of one of this strategy's offers.
    pub fn on_offer_split(
        &mut self,
        original: &Offer,
        accepted: &Offer,
        residual: &Offer,
        market_id: MarketId,
    ) {
        if original.seller() != self.owner {
            return;
        }
        self.split.insert(original.id(), accepted.clone());
        self.post(residual.clone(), market_id);
        if self.posted.contains_key(&original.id()) {
            self.replace(original.id(), accepted.clone(), market_id);
        }
    }

    pub fn bought_offer(&mut self, offer: Offer, market_id: MarketId) {
        self.bought.insert(offer.id(), (offer, market_id));
    }

    pub fn is_offer_posted(&self, market_id: MarketId, offer_id: InstrumentId) -> bool {
        self.posted
            .get(&offer_id)
            .is_some_and(|(_, market)| *market == market_id)
    }

    pub fn posted_in_market(&self, market_id: MarketId) -> Vec<Offer> {
        self.posted
            .values()
            .filter(|(_, market)| *market == market_id)
            .map(|(offer, _)| offer.clone())
            .collect()
    }

    fn sold_ids_in_market(&self, market_id: MarketId) -> HashSet<InstrumentId> {
        self.sold
            .get(&market_id)
            .map(|sold| sold.iter().map(Offer::id).collect())
            .unwrap_or_default()
    }

    /// Posted offers in a market that have not been sold yet.
    pub fn open_in_market(&self, market_id: MarketId) -> Vec<Offer> {
        let sold_ids = self.sold_ids_in_market(market_id);
        self.posted
            .values()
            .filter(|(offer, market)| *market == market_id && !sold_ids.contains(&offer.id()))
            .map(|(offer, _)| offer.clone())
            .collect()
    }

    pub fn sold_in_market(&self, market_id: MarketId) -> Vec<Offer> {
        self.sold.get(&market_id).cloned().unwrap_or_default()
    }

    pub fn open_offer_energy(&self, market_id: MarketId) -> f64 {
        self.open_in_market(market_id).iter().map(Offer::energy).sum()
    }

    pub fn posted_offer_energy(&self, market_id: MarketId) -> f64 {
        self.posted
            .values()
            .filter(|(_, market)| *market == market_id)
            .map(|(offer, _)| offer.energy())
            .sum()
    }

    pub fn sold_offer_energy(&self, market_id: MarketId) -> f64 {
        self.sold_in_market(market_id).iter().map(Offer::energy).sum()
    }

    pub fn sold_offer_price(&self, market_id: MarketId) -> f64 {
        self.sold_in_market(market_id).iter().map(Offer::price).sum()
    }

    /// Admission check for a new posting.
    ///
    /// When replacing, open postings do not count against the new offer since
    /// they will be cancelled; only previously sold energy does.
    pub fn can_offer_be_posted(
        &self,
        offer_energy: f64,
        offer_price: f64,
        available_energy: f64,
        market_id: MarketId,
        replace_existing: bool,
    ) -> bool {
        let posted_energy = if replace_existing {
            self.sold_offer_energy(market_id)
        } else {
            self.posted_offer_energy(market_id)
        };
        let total = offer_energy + posted_energy - self.sold_offer_energy(market_id);
        total <= available_energy + FLOATING_POINT_TOLERANCE && offer_price >= 0.0
    }

    /// Market-cycle rollover: drop entries whose market left the active
    /// window. Splits are only meaningful within their originating slot, so
    /// the split map is always cleared.
    pub fn delete_past_markets(&mut self, active_markets: &HashSet<MarketId>) {
        self.posted
            .retain(|_, (_, market)| active_markets.contains(market));
        self.sold
            .retain(|market, _| active_markets.contains(market));
        self.bought
            .retain(|_, (_, market)| active_markets.contains(market));
        self.split.clear();
    }

    pub fn clear_split(&mut self) {
        self.split.clear();
    }

    pub fn has_split(&self, offer_id: InstrumentId) -> bool {
        self.split.contains_key(&offer_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exchange::{OfferBid, Participant};
    use uuid::Uuid;

    fn owner() -> Participant {
        Participant::owned("house-pv", Uuid::new_v4())
    }

    fn offer(price: f64, energy: f64) -> Offer {
        Offer::new(price, energy, owner())
    }

    fn offer_trade(offer: &Offer, residual: Option<Offer>) -> Trade {
        Trade::new(
            OfferBid::Offer(offer.clone()),
            offer.seller().to_string(),
            "house-load",
            offer.seller_id(),
            None,
            None,
            residual.map(OfferBid::Offer),
        )
    }

    #[test]
    fn sold_offer_cannot_be_removed() {
        // P1: once sold, a remove must fail and keep the sold record.
        let market = Uuid::new_v4();
        let mut ledger = Offers::new("house-pv");
        let o1 = offer(10.0, 5.0);
        ledger.post(o1.clone(), market);
        ledger.on_trade(market, &offer_trade(&o1, None));

        assert!(!ledger.remove(o1.id()));
        assert_eq!(ledger.sold_in_market(market).len(), 1);
        // Still bookkept as posted, just no longer open.
        assert!(ledger.is_offer_posted(market, o1.id()));
        assert!(ledger.open_in_market(market).is_empty());
    }

    #[test]
    fn remove_of_unknown_offer_is_a_noop() {
        let mut ledger = Offers::new("house-pv");
        assert!(!ledger.remove(Uuid::new_v4()));
    }

    #[test]
    fn replace_is_atomic() {
        // P4: when the old offer cannot be removed, the new one never appears.
        let market = Uuid::new_v4();
        let mut ledger = Offers::new("house-pv");
        let sold = offer(10.0, 5.0);
        ledger.post(sold.clone(), market);
        ledger.on_trade(market, &offer_trade(&sold, None));

        let replacement = offer(12.0, 5.0);
        ledger.replace(sold.id(), replacement.clone(), market);
        assert!(!ledger.is_offer_posted(market, replacement.id()));
        assert!(ledger.is_offer_posted(market, sold.id()));

        let open = offer(8.0, 2.0);
        ledger.post(open.clone(), market);
        let replacement = offer(9.0, 2.0);
        ledger.replace(open.id(), replacement.clone(), market);
        assert!(ledger.is_offer_posted(market, replacement.id()));
        assert!(!ledger.is_offer_posted(market, open.id()));
    }

    #[test]
    fn split_conserves_energy_and_replaces_the_original() {
        // P2: accepted + residual == original, original gone from posted.
        let market = Uuid::new_v4();
        let mut ledger = Offers::new("house-pv");
        let original = offer(10.0, 5.0);
        ledger.post(original.clone(), market);

        let accepted = Offer::with_id(
            original.id(),
            6.0,
            3.0,
            original.seller_participant(),
        );
        let residual = Offer::new(4.0, 2.0, original.seller_participant());
        ledger.on_offer_split(&original, &accepted, &residual, market);

        assert!(
            (accepted.energy() + residual.energy() - original.energy()).abs()
                < FLOATING_POINT_TOLERANCE
        );
        let open = ledger.open_in_market(market);
        assert_eq!(open.len(), 2);
        assert!(open.iter().any(|o| o.id() == residual.id()));
        // The accepted portion carries the original id and replaced it.
        assert!(open
            .iter()
            .any(|o| o.id() == accepted.id() && o.energy() == 3.0));

        // The subsequent trade on the original id clears the accepted part.
        ledger.on_trade(market, &offer_trade(&accepted, None));
        let open = ledger.open_in_market(market);
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id(), residual.id());
    }

    #[test]
    fn split_residual_is_not_reposted_under_the_original_id() {
        let market = Uuid::new_v4();
        let mut ledger = Offers::new("house-pv");
        let original = offer(10.0, 5.0);
        ledger.post(original.clone(), market);
        let accepted = Offer::with_id(original.id(), 6.0, 3.0, original.seller_participant());
        let residual = Offer::new(4.0, 2.0, original.seller_participant());
        ledger.on_offer_split(&original, &accepted, &residual, market);

        // Posting under a split key must be refused.
        let reposted = Offer::with_id(original.id(), 99.0, 99.0, original.seller_participant());
        ledger.post(reposted, market);
        let posted = ledger.posted_in_market(market);
        assert_eq!(posted.len(), 2);
        assert!(posted
            .iter()
            .any(|o| o.id() == original.id() && o.energy() == 3.0));
    }

    #[test]
    fn split_for_foreign_offer_is_ignored() {
        let market = Uuid::new_v4();
        let mut ledger = Offers::new("house-pv");
        let foreign = Offer::new(10.0, 5.0, Participant::new("neighbour"));
        let accepted = Offer::with_id(foreign.id(), 6.0, 3.0, foreign.seller_participant());
        let residual = Offer::new(4.0, 2.0, foreign.seller_participant());
        ledger.on_offer_split(&foreign, &accepted, &residual, market);
        assert!(ledger.posted_in_market(market).is_empty());
        assert!(!ledger.has_split(foreign.id()));
    }

    #[test]
    fn admission_check_counts_open_postings_unless_replacing() {
        // Scenario A, resolved: with 5 kWh posted and 5 available, 3 more is
        // only admissible when the open posting will be replaced.
        let market = Uuid::new_v4();
        let mut ledger = Offers::new("house-pv");
        ledger.post(offer(10.0, 5.0), market);

        assert!(ledger.can_offer_be_posted(3.0, 10.0, 5.0, market, true));
        assert!(!ledger.can_offer_be_posted(6.0, 10.0, 5.0, market, true));
        assert!(!ledger.can_offer_be_posted(3.0, 10.0, 5.0, market, false));
    }

    #[test]
    fn admission_check_counts_sold_energy_when_replacing() {
        let market = Uuid::new_v4();
        let mut ledger = Offers::new("house-pv");
        let sold = offer(4.0, 2.0);
        ledger.post(sold.clone(), market);
        ledger.on_trade(market, &offer_trade(&sold, None));

        // 2 kWh already sold: a replacement may only use the remaining 3.
        assert!(ledger.can_offer_be_posted(3.0, 10.0, 5.0, market, true));
        assert!(!ledger.can_offer_be_posted(4.0, 10.0, 5.0, market, true));
        assert!(!ledger.can_offer_be_posted(3.0, -1.0, 5.0, market, true));
    }

    #[test]
    fn rollover_drops_expired_markets_and_clears_splits() {
        let live = Uuid::new_v4();
        let expired = Uuid::new_v4();
        let mut ledger = Offers::new("house-pv");
        let kept = offer(10.0, 5.0);
        let dropped = offer(10.0, 5.0);
        ledger.post(kept.clone(), live);
        ledger.post(dropped.clone(), expired);

        let original = offer(10.0, 4.0);
        ledger.post(original.clone(), live);
        let accepted = Offer::with_id(original.id(), 5.0, 2.0, original.seller_participant());
        let residual = Offer::new(5.0, 2.0, original.seller_participant());
        ledger.on_offer_split(&original, &accepted, &residual, live);

        let active: HashSet<MarketId> = [live].into_iter().collect();
        ledger.delete_past_markets(&active);

        assert!(ledger.is_offer_posted(live, kept.id()));
        assert!(!ledger.is_offer_posted(expired, dropped.id()));
        assert!(!ledger.has_split(original.id()));
    }
}
