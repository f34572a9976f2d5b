//! # Exchange API
//!
//! Shared data model and trait seams for the energy exchange core.
//!
//! ## Modules
//! - `model`: Offer/Bid/Trade instruments, participant identity, wire envelope types.
//! - `traits`: The opaque `Market` facade consumed by the trading subsystems.

pub mod model;
pub mod traits;

pub use model::envelope::ResponseStatus;
pub use model::ids::{InstrumentId, MarketId, TransactionId};
pub use model::instrument::{Bid, Offer, OfferBid};
pub use model::participant::Participant;
pub use model::trade::Trade;
pub use traits::market::{Market, MarketError};
