use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::instrument::OfferBid;

/// The record of a match between two participants.
///
/// References exactly one instrument (the cleared offer *or* bid). When a
/// larger instrument was partially matched, `residual` points at the left-over
/// instrument the market re-posted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    id: Uuid,
    time: DateTime<Utc>,
    offer_bid: OfferBid,
    seller: String,
    buyer: String,
    seller_id: Option<Uuid>,
    buyer_id: Option<Uuid>,
    fee_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    residual: Option<OfferBid>,
}

impl Trade {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        offer_bid: OfferBid,
        seller: impl Into<String>,
        buyer: impl Into<String>,
        seller_id: Option<Uuid>,
        buyer_id: Option<Uuid>,
        fee_price: Option<f64>,
        residual: Option<OfferBid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            time: Utc::now(),
            offer_bid,
            seller: seller.into(),
            buyer: buyer.into(),
            seller_id,
            buyer_id,
            fee_price,
            residual,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    pub fn offer_bid(&self) -> &OfferBid {
        &self.offer_bid
    }

    pub fn seller(&self) -> &str {
        &self.seller
    }

    pub fn buyer(&self) -> &str {
        &self.buyer
    }

    pub fn seller_id(&self) -> Option<Uuid> {
        self.seller_id
    }

    pub fn buyer_id(&self) -> Option<Uuid> {
        self.buyer_id
    }

    pub fn fee_price(&self) -> Option<f64> {
        self.fee_price
    }

    pub fn residual(&self) -> Option<&OfferBid> {
        self.residual.as_ref()
    }

    pub fn is_offer_trade(&self) -> bool {
        self.offer_bid.is_offer()
    }

    pub fn is_bid_trade(&self) -> bool {
        self.offer_bid.is_bid()
    }

    pub fn traded_energy(&self) -> f64 {
        self.offer_bid.energy()
    }

    pub fn trade_price(&self) -> f64 {
        self.offer_bid.price()
    }

    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}
