use uuid::Uuid;

/// Identifier of a time-sliced market slot.
pub type MarketId = Uuid;

/// Identifier of a posted Offer or Bid.
pub type InstrumentId = Uuid;

/// Correlator linking a published command to its asynchronous response.
pub type TransactionId = Uuid;
