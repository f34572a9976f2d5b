//! Market-level transport endpoints: the event publisher that notifies an
//! area about market activity, and the command subscriber that executes
//! inbound trading commands against the market facade.

pub mod events;
pub mod publisher;
pub mod subscriber;

pub use events::MarketEvent;
pub use publisher::MarketEventPublisher;
pub use subscriber::MarketEventSubscriber;

use exchange::MarketId;

pub fn command_channel(market_id: MarketId, command: &str) -> String {
    format!("{market_id}/{command}")
}

pub fn response_channel(command_channel: &str) -> String {
    format!("{command_channel}/RESPONSE")
}

pub fn notify_channel(market_id: MarketId) -> String {
    format!("market/{market_id}/notify_event")
}

pub fn notify_response_channel(market_id: MarketId) -> String {
    format!("market/{market_id}/notify_event/response")
}
