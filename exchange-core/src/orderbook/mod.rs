pub mod bids;
pub mod offers;

pub use bids::BidLedger;
pub use offers::Offers;
