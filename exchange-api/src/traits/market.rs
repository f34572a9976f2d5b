use serde_json::Value;
use thiserror::Error;

use crate::model::ids::{InstrumentId, MarketId};
use crate::model::instrument::{Bid, Offer};
use crate::model::participant::Participant;
use crate::model::trade::Trade;

#[derive(Error, Debug)]
pub enum MarketError {
    #[error("offer {0} not found in market")]
    OfferNotFound(InstrumentId),
    #[error("bid {0} not found in market")]
    BidNotFound(InstrumentId),
    #[error("invalid order: {0}")]
    InvalidOrder(String),
    #[error("insufficient energy: requested {requested}, available {available}")]
    InsufficientEnergy { requested: f64, available: f64 },
    #[error("market is read-only")]
    MarketReadOnly,
}

impl MarketError {
    /// Error-kind label carried in `exception` fields of error replies.
    pub fn kind(&self) -> &'static str {
        match self {
            MarketError::OfferNotFound(_) => "OfferNotFound",
            MarketError::BidNotFound(_) => "BidNotFound",
            MarketError::InvalidOrder(_) => "InvalidOrder",
            MarketError::InsufficientEnergy { .. } => "InsufficientEnergy",
            MarketError::MarketReadOnly => "MarketReadOnly",
        }
    }
}

/// Interface to the double-sided (or single-sided) matching engine.
///
/// The matching arithmetic lives behind this trait; the trading subsystems
/// only post, cancel and accept instruments and react to the resulting
/// events.
pub trait Market: Send {
    fn id(&self) -> MarketId;

    fn name(&self) -> &str;

    /// Post a sell-side instrument.
    fn offer(&mut self, price: f64, energy: f64, seller: Participant) -> Result<Offer, MarketError>;

    /// Post a buy-side instrument.
    fn bid(
        &mut self,
        price: f64,
        energy: f64,
        buyer: Participant,
        attributes: Option<Value>,
        requirements: Option<Value>,
    ) -> Result<Bid, MarketError>;

    /// Accept an open offer, fully or partially (`energy = None` means fully).
    fn accept_offer(
        &mut self,
        offer_id: InstrumentId,
        buyer: Participant,
        energy: Option<f64>,
    ) -> Result<Trade, MarketError>;

    /// Accept an open bid, fully or partially.
    fn accept_bid(
        &mut self,
        bid_id: InstrumentId,
        seller: Participant,
        energy: Option<f64>,
    ) -> Result<Trade, MarketError>;

    fn delete_offer(&mut self, offer_id: InstrumentId) -> Result<(), MarketError>;

    fn delete_bid(&mut self, bid_id: InstrumentId) -> Result<(), MarketError>;

    /// Currently open sell-side instruments.
    fn open_offers(&self) -> Vec<Offer>;

    /// Currently open buy-side instruments.
    fn open_bids(&self) -> Vec<Bid>;
}
