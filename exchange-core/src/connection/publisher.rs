//! Outbound market event delivery with acknowledgment.

use log::{error, warn};

use exchange::MarketId;

use super::events::MarketEvent;
use super::{notify_channel, notify_response_channel};
use crate::comms::BlockingCommunicator;

/// Publishes market events to the owning area and waits for the area to
/// acknowledge before returning, so the caller knows the event was processed
/// before the tick continues. Delivery failures are logged, never raised.
pub struct MarketEventPublisher {
    market_id: MarketId,
    comms: BlockingCommunicator,
}

impl MarketEventPublisher {
    pub fn new(market_id: MarketId, comms: BlockingCommunicator) -> Self {
        Self { market_id, comms }
    }

    pub fn market_id(&self) -> MarketId {
        self.market_id
    }

    pub async fn publish_event(&self, event: &MarketEvent) {
        let payload = match event.payload() {
            Ok(payload) => payload,
            Err(err) => {
                error!(
                    "could not serialize {} event for market {}: {err}",
                    event.event_type(),
                    self.market_id
                );
                return;
            }
        };

        let channel = notify_channel(self.market_id);
        let response_channel = notify_response_channel(self.market_id);
        if let Err(err) = self.comms.call(&channel, &response_channel, payload).await {
            warn!(
                "{} event for market {} was not acknowledged: {err}",
                event.event_type(),
                self.market_id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comms::{MemoryBus, PubSub};
    use exchange::{Offer, Participant};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;

    fn publisher(bus: &MemoryBus, market_id: MarketId, timeout: Duration) -> MarketEventPublisher {
        let comms = BlockingCommunicator::new(Arc::new(bus.clone()), timeout);
        MarketEventPublisher::new(market_id, comms)
    }

    #[tokio::test]
    async fn waits_for_the_area_acknowledgment() {
        let bus = MemoryBus::new();
        let market_id = uuid::Uuid::new_v4();
        let mut sub = bus.subscribe(&notify_channel(market_id)).await.unwrap();
        {
            let bus = bus.clone();
            tokio::spawn(async move {
                let msg = sub.recv().await.unwrap();
                let event: Value = serde_json::from_str(&msg.data).unwrap();
                assert_eq!(event["event_type"], "offer");
                let ack = json!({ "transaction_uuid": event["transaction_uuid"] });
                bus.publish(&notify_response_channel(market_id), ack.to_string())
                    .await
                    .unwrap();
            });
        }

        let publisher = publisher(&bus, market_id, Duration::from_secs(1));
        let offer = Offer::new(10.0, 5.0, Participant::new("house-pv"));
        publisher.publish_event(&MarketEvent::Offer { offer }).await;
    }

    #[tokio::test(start_paused = true)]
    async fn missing_acknowledgment_does_not_propagate() {
        let bus = MemoryBus::new();
        let publisher = publisher(&bus, uuid::Uuid::new_v4(), Duration::from_millis(200));
        let offer = Offer::new(10.0, 5.0, Participant::new("house-pv"));
        // Nobody listens; publish_event must swallow the timeout.
        publisher.publish_event(&MarketEvent::Offer { offer }).await;
    }
}
