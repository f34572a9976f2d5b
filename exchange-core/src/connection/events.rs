//! Market events fanned out to the owning area.

use serde_json::{json, Value};

use exchange::{Bid, Offer, Trade};

/// Something that happened inside a market and that the owning area must be
/// told about before the tick proceeds.
#[derive(Debug, Clone)]
pub enum MarketEvent {
    Offer { offer: Offer },
    OfferSplit { original: Offer, accepted: Offer, residual: Offer },
    OfferDeleted { offer: Offer },
    OfferTraded { trade: Trade },
    Bid { bid: Bid },
    BidSplit { original: Bid, accepted: Bid, residual: Bid },
    BidDeleted { bid: Bid },
    BidTraded { trade: Trade },
}

impl MarketEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            MarketEvent::Offer { .. } => "offer",
            MarketEvent::OfferSplit { .. } => "offer_split",
            MarketEvent::OfferDeleted { .. } => "offer_deleted",
            MarketEvent::OfferTraded { .. } => "offer_traded",
            MarketEvent::Bid { .. } => "bid",
            MarketEvent::BidSplit { .. } => "bid_split",
            MarketEvent::BidDeleted { .. } => "bid_deleted",
            MarketEvent::BidTraded { .. } => "bid_traded",
        }
    }

    /// Event arguments with every instrument/trade in its canonical string
    /// form, ready to be embedded in a transport envelope.
    pub fn kwargs(&self) -> serde_json::Result<Value> {
        Ok(match self {
            MarketEvent::Offer { offer } => json!({ "offer": offer.to_json_string()? }),
            MarketEvent::OfferSplit {
                original,
                accepted,
                residual,
            } => json!({
                "original_offer": original.to_json_string()?,
                "accepted_offer": accepted.to_json_string()?,
                "residual_offer": residual.to_json_string()?,
            }),
            MarketEvent::OfferDeleted { offer } => json!({ "offer": offer.to_json_string()? }),
            MarketEvent::OfferTraded { trade } => json!({ "trade": trade.to_json_string()? }),
            MarketEvent::Bid { bid } => json!({ "bid": bid.to_json_string()? }),
            MarketEvent::BidSplit {
                original,
                accepted,
                residual,
            } => json!({
                "original_bid": original.to_json_string()?,
                "accepted_bid": accepted.to_json_string()?,
                "residual_bid": residual.to_json_string()?,
            }),
            MarketEvent::BidDeleted { bid } => json!({ "bid": bid.to_json_string()? }),
            MarketEvent::BidTraded { trade } => json!({ "trade": trade.to_json_string()? }),
        })
    }

    pub fn payload(&self) -> serde_json::Result<Value> {
        Ok(json!({
            "event_type": self.event_type(),
            "kwargs": self.kwargs()?,
        }))
    }
}
