//! Minimal in-memory market facade for tests and demos.
//!
//! Accepts and deletes instruments and performs full/partial fills; it does
//! no price matching of its own. On a partial fill the accepted portion keeps
//! the original instrument id, the residual gets a fresh one.

use std::collections::HashMap;

use serde_json::Value;

use exchange::{
    Bid, InstrumentId, Market, MarketError, MarketId, Offer, OfferBid, Participant, Trade,
};

pub struct SimMarket {
    id: MarketId,
    name: String,
    offers: HashMap<InstrumentId, Offer>,
    bids: HashMap<InstrumentId, Bid>,
}

impl SimMarket {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: MarketId::new_v4(),
            name: name.into(),
            offers: HashMap::new(),
            bids: HashMap::new(),
        }
    }

    fn validate_order(price: f64, energy: f64) -> Result<(), MarketError> {
        if !energy.is_finite() || energy <= 0.0 {
            return Err(MarketError::InvalidOrder(format!(
                "energy must be positive, got {energy}"
            )));
        }
        if !price.is_finite() || price < 0.0 {
            return Err(MarketError::InvalidOrder(format!(
                "price must be non-negative, got {price}"
            )));
        }
        Ok(())
    }
}

impl Market for SimMarket {
    fn id(&self) -> MarketId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn offer(&mut self, price: f64, energy: f64, seller: Participant) -> Result<Offer, MarketError> {
        Self::validate_order(price, energy)?;
        let offer = Offer::new(price, energy, seller);
        self.offers.insert(offer.id(), offer.clone());
        Ok(offer)
    }

    fn bid(
        &mut self,
        price: f64,
        energy: f64,
        buyer: Participant,
        attributes: Option<Value>,
        requirements: Option<Value>,
    ) -> Result<Bid, MarketError> {
        Self::validate_order(price, energy)?;
        let bid = Bid::new(price, energy, buyer).with_attributes(attributes, requirements);
        self.bids.insert(bid.id(), bid.clone());
        Ok(bid)
    }

    fn accept_offer(
        &mut self,
        offer_id: InstrumentId,
        buyer: Participant,
        energy: Option<f64>,
    ) -> Result<Trade, MarketError> {
        let offer = self
            .offers
            .get(&offer_id)
            .cloned()
            .ok_or(MarketError::OfferNotFound(offer_id))?;
        let requested = energy.unwrap_or_else(|| offer.energy());
        if requested > offer.energy() {
            return Err(MarketError::InsufficientEnergy {
                requested,
                available: offer.energy(),
            });
        }

        self.offers.remove(&offer_id);
        let (accepted, residual) = if requested < offer.energy() {
            let ratio = requested / offer.energy();
            let accepted = Offer::with_id(
                offer.id(),
                offer.price() * ratio,
                requested,
                offer.seller_participant(),
            );
            let residual = Offer::new(
                offer.price() * (1.0 - ratio),
                offer.energy() - requested,
                offer.seller_participant(),
            );
            self.offers.insert(residual.id(), residual.clone());
            (accepted, Some(residual))
        } else {
            (offer.clone(), None)
        };

        Ok(Trade::new(
            OfferBid::Offer(accepted),
            offer.seller().to_string(),
            buyer.name.clone(),
            offer.seller_id(),
            buyer.id,
            None,
            residual.map(OfferBid::Offer),
        ))
    }

    fn accept_bid(
        &mut self,
        bid_id: InstrumentId,
        seller: Participant,
        energy: Option<f64>,
    ) -> Result<Trade, MarketError> {
        let bid = self
            .bids
            .get(&bid_id)
            .cloned()
            .ok_or(MarketError::BidNotFound(bid_id))?;
        let requested = energy.unwrap_or_else(|| bid.energy());
        if requested > bid.energy() {
            return Err(MarketError::InsufficientEnergy {
                requested,
                available: bid.energy(),
            });
        }

        self.bids.remove(&bid_id);
        let (accepted, residual) = if requested < bid.energy() {
            let ratio = requested / bid.energy();
            let accepted = Bid::with_id(
                bid.id(),
                bid.price() * ratio,
                requested,
                bid.buyer_participant(),
            );
            let residual = Bid::new(
                bid.price() * (1.0 - ratio),
                bid.energy() - requested,
                bid.buyer_participant(),
            );
            self.bids.insert(residual.id(), residual.clone());
            (accepted, Some(residual))
        } else {
            (bid.clone(), None)
        };

        Ok(Trade::new(
            OfferBid::Bid(accepted),
            seller.name.clone(),
            bid.buyer().to_string(),
            seller.id,
            bid.buyer_id(),
            None,
            residual.map(OfferBid::Bid),
        ))
    }

    fn delete_offer(&mut self, offer_id: InstrumentId) -> Result<(), MarketError> {
        self.offers
            .remove(&offer_id)
            .map(|_| ())
            .ok_or(MarketError::OfferNotFound(offer_id))
    }

    fn delete_bid(&mut self, bid_id: InstrumentId) -> Result<(), MarketError> {
        self.bids
            .remove(&bid_id)
            .map(|_| ())
            .ok_or(MarketError::BidNotFound(bid_id))
    }

    fn open_offers(&self) -> Vec<Offer> {
        self.offers.values().cloned().collect()
    }

    fn open_bids(&self) -> Vec<Bid> {
        self.bids.values().cloned().collect()
    }
}
