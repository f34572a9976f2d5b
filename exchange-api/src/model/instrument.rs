//! Tradable instruments: sell-side offers and buy-side bids.
//!
//! Instruments are immutable once created. A price or energy change always
//! produces a new instrument with a new id; the single exception is a split,
//! where the accepted portion keeps the original id (so trade events on the
//! original id can be redirected) and only the residual gets a fresh one.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::participant::Participant;

/// A sell-side instrument posted into a market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    id: Uuid,
    price: f64,
    energy: f64,
    seller: String,
    seller_origin: Option<String>,
    seller_origin_id: Option<Uuid>,
    seller_id: Option<Uuid>,
}

impl Offer {
    pub fn new(price: f64, energy: f64, seller: Participant) -> Self {
        Self::with_id(Uuid::new_v4(), price, energy, seller)
    }

    /// Creates an offer under a caller-chosen id. Used by markets when the
    /// accepted part of a split must keep the original offer's id.
    pub fn with_id(id: Uuid, price: f64, energy: f64, seller: Participant) -> Self {
        Self {
            id,
            price,
            energy,
            seller: seller.name,
            seller_origin: seller.origin,
            seller_origin_id: seller.origin_id,
            seller_id: seller.id,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn price(&self) -> f64 {
        self.price
    }

    pub fn energy(&self) -> f64 {
        self.energy
    }

    pub fn seller(&self) -> &str {
        &self.seller
    }

    pub fn seller_origin(&self) -> Option<&str> {
        self.seller_origin.as_deref()
    }

    pub fn seller_origin_id(&self) -> Option<Uuid> {
        self.seller_origin_id
    }

    pub fn seller_id(&self) -> Option<Uuid> {
        self.seller_id
    }

    pub fn energy_rate(&self) -> f64 {
        self.price / self.energy
    }

    pub fn seller_participant(&self) -> Participant {
        Participant {
            name: self.seller.clone(),
            origin: self.seller_origin.clone(),
            origin_id: self.seller_origin_id,
            id: self.seller_id,
        }
    }

    /// Canonical serialized string form used in transport envelopes.
    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

/// A buy-side instrument posted into a market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bid {
    id: Uuid,
    price: f64,
    energy: f64,
    buyer: String,
    buyer_origin: Option<String>,
    buyer_origin_id: Option<Uuid>,
    buyer_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    attributes: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    requirements: Option<Value>,
}

impl Bid {
    pub fn new(price: f64, energy: f64, buyer: Participant) -> Self {
        Self::with_id(Uuid::new_v4(), price, energy, buyer)
    }

    pub fn with_id(id: Uuid, price: f64, energy: f64, buyer: Participant) -> Self {
        Self {
            id,
            price,
            energy,
            buyer: buyer.name,
            buyer_origin: buyer.origin,
            buyer_origin_id: buyer.origin_id,
            buyer_id: buyer.id,
            attributes: None,
            requirements: None,
        }
    }

    pub fn with_attributes(mut self, attributes: Option<Value>, requirements: Option<Value>) -> Self {
        self.attributes = attributes;
        self.requirements = requirements;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn price(&self) -> f64 {
        self.price
    }

    pub fn energy(&self) -> f64 {
        self.energy
    }

    pub fn buyer(&self) -> &str {
        &self.buyer
    }

    pub fn buyer_origin(&self) -> Option<&str> {
        self.buyer_origin.as_deref()
    }

    pub fn buyer_origin_id(&self) -> Option<Uuid> {
        self.buyer_origin_id
    }

    pub fn buyer_id(&self) -> Option<Uuid> {
        self.buyer_id
    }

    pub fn attributes(&self) -> Option<&Value> {
        self.attributes.as_ref()
    }

    pub fn requirements(&self) -> Option<&Value> {
        self.requirements.as_ref()
    }

    pub fn energy_rate(&self) -> f64 {
        self.price / self.energy
    }

    pub fn buyer_participant(&self) -> Participant {
        Participant {
            name: self.buyer.clone(),
            origin: self.buyer_origin.clone(),
            origin_id: self.buyer_origin_id,
            id: self.buyer_id,
        }
    }

    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

/// Either side of the book. A `Trade` always references exactly one of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OfferBid {
    Offer(Offer),
    Bid(Bid),
}

impl OfferBid {
    pub fn id(&self) -> Uuid {
        match self {
            OfferBid::Offer(offer) => offer.id(),
            OfferBid::Bid(bid) => bid.id(),
        }
    }

    pub fn price(&self) -> f64 {
        match self {
            OfferBid::Offer(offer) => offer.price(),
            OfferBid::Bid(bid) => bid.price(),
        }
    }

    pub fn energy(&self) -> f64 {
        match self {
            OfferBid::Offer(offer) => offer.energy(),
            OfferBid::Bid(bid) => bid.energy(),
        }
    }

    pub fn energy_rate(&self) -> f64 {
        self.price() / self.energy()
    }

    pub fn is_offer(&self) -> bool {
        matches!(self, OfferBid::Offer(_))
    }

    pub fn is_bid(&self) -> bool {
        matches!(self, OfferBid::Bid(_))
    }

    pub fn as_offer(&self) -> Option<&Offer> {
        match self {
            OfferBid::Offer(offer) => Some(offer),
            OfferBid::Bid(_) => None,
        }
    }

    pub fn as_bid(&self) -> Option<&Bid> {
        match self {
            OfferBid::Offer(_) => None,
            OfferBid::Bid(bid) => Some(bid),
        }
    }

    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offer_round_trips_through_canonical_form() {
        let offer = Offer::new(10.0, 5.0, Participant::owned("pv-house-1", Uuid::new_v4()));
        let raw = offer.to_json_string().unwrap();
        let parsed = Offer::from_json(&raw).unwrap();
        assert_eq!(offer, parsed);
    }

    #[test]
    fn offer_bid_tag_distinguishes_sides() {
        let bid = Bid::new(4.0, 2.0, Participant::new("load-house-2"));
        let raw = OfferBid::Bid(bid).to_json_string().unwrap();
        assert!(raw.contains("\"type\":\"Bid\""));
        let parsed = OfferBid::from_json(&raw).unwrap();
        assert!(parsed.is_bid());
        assert_eq!(parsed.energy(), 2.0);
    }

    #[test]
    fn energy_rate_is_price_per_unit() {
        let offer = Offer::new(30.0, 6.0, Participant::new("pv"));
        assert!((offer.energy_rate() - 5.0).abs() < f64::EPSILON);
    }
}
