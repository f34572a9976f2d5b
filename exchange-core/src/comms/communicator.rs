//! Synchronous calls over the asynchronous pub/sub transport.
//!
//! A call publishes a command with a fresh `transaction_uuid`, then waits on
//! the response channel until a message carrying the same id arrives or the
//! configured timeout elapses. Responses with unknown transaction ids are
//! discarded: a late response must never apply after the caller has moved on.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error};
use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;

use exchange::TransactionId;

use super::bus::PubSub;

#[derive(Error, Debug)]
pub enum CommsError {
    #[error("no response on channel {channel} within {timeout:?}")]
    ResponseTimeout { channel: String, timeout: Duration },
    #[error("transport closed while waiting on channel {0}")]
    ChannelClosed(String),
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

/// Request/response correlation over a fire-and-forget transport.
#[derive(Clone)]
pub struct BlockingCommunicator {
    bus: Arc<dyn PubSub>,
    timeout: Duration,
}

impl BlockingCommunicator {
    pub fn new(bus: Arc<dyn PubSub>, timeout: Duration) -> Self {
        Self { bus, timeout }
    }

    pub fn bus(&self) -> Arc<dyn PubSub> {
        Arc::clone(&self.bus)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Publish `payload` on `request_channel` and wait for the correlated
    /// response on `response_channel`.
    ///
    /// On timeout the caller must assume the command had no effect: under
    /// pub/sub there is no guarantee it was processed at all.
    pub async fn call(
        &self,
        request_channel: &str,
        response_channel: &str,
        mut payload: Value,
    ) -> Result<Value, CommsError> {
        let transaction_uuid = TransactionId::new_v4();
        payload["transaction_uuid"] = Value::String(transaction_uuid.to_string());

        // Subscribe before publishing so a fast responder cannot be missed.
        let mut subscription = self.bus.subscribe(response_channel).await?;
        self.bus
            .publish(request_channel, payload.to_string())
            .await?;

        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let message = match tokio::time::timeout(remaining, subscription.recv()).await {
                Err(_) => break,
                Ok(None) => return Err(CommsError::ChannelClosed(response_channel.to_string())),
                Ok(Some(message)) => message,
            };
            let response: Value = match serde_json::from_str(&message.data) {
                Ok(value) => value,
                Err(err) => {
                    debug!("discarding unparseable message on {response_channel}: {err}");
                    continue;
                }
            };
            if response.get("transaction_uuid").and_then(Value::as_str)
                == Some(transaction_uuid.to_string().as_str())
            {
                return Ok(response);
            }
            // A response for a different (possibly abandoned) call; drop it.
        }

        error!(
            "transaction {} not answered on {} after {:?}: {}",
            transaction_uuid, response_channel, self.timeout, payload
        );
        Err(CommsError::ResponseTimeout {
            channel: response_channel.to_string(),
            timeout: self.timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comms::bus::MemoryBus;
    use serde_json::json;

    fn communicator(bus: &MemoryBus, timeout: Duration) -> BlockingCommunicator {
        BlockingCommunicator::new(Arc::new(bus.clone()), timeout)
    }

    async fn echo_responder(bus: MemoryBus, request_channel: &str, response_channel: &str) {
        let mut sub = bus.subscribe(request_channel).await.unwrap();
        let response_channel = response_channel.to_string();
        tokio::spawn(async move {
            while let Some(msg) = sub.recv().await {
                let request: Value = serde_json::from_str(&msg.data).unwrap();
                let reply = json!({
                    "status": "ready",
                    "transaction_uuid": request["transaction_uuid"],
                });
                bus.publish(&response_channel, reply.to_string())
                    .await
                    .unwrap();
            }
        });
    }

    #[tokio::test]
    async fn call_returns_the_correlated_response() {
        let bus = MemoryBus::new();
        echo_responder(bus.clone(), "m/OFFER", "m/OFFER/RESPONSE").await;

        let comms = communicator(&bus, Duration::from_secs(1));
        let response = comms
            .call("m/OFFER", "m/OFFER/RESPONSE", json!({"price": 10.0}))
            .await
            .unwrap();
        assert_eq!(response["status"], "ready");
    }

    #[tokio::test]
    async fn call_ignores_responses_for_other_transactions() {
        let bus = MemoryBus::new();
        let mut sub = bus.subscribe("m/BID").await.unwrap();
        {
            let bus = bus.clone();
            tokio::spawn(async move {
                let msg = sub.recv().await.unwrap();
                let request: Value = serde_json::from_str(&msg.data).unwrap();
                // A stray reply from an abandoned call, then the real one.
                let stray = json!({"transaction_uuid": TransactionId::new_v4().to_string()});
                bus.publish("m/BID/RESPONSE", stray.to_string())
                    .await
                    .unwrap();
                let reply = json!({
                    "status": "ready",
                    "transaction_uuid": request["transaction_uuid"],
                });
                bus.publish("m/BID/RESPONSE", reply.to_string())
                    .await
                    .unwrap();
            });
        }

        let comms = communicator(&bus, Duration::from_secs(1));
        let response = comms
            .call("m/BID", "m/BID/RESPONSE", json!({}))
            .await
            .unwrap();
        assert_eq!(response["status"], "ready");
    }

    #[tokio::test(start_paused = true)]
    async fn call_times_out_when_nobody_responds() {
        let bus = MemoryBus::new();
        let comms = communicator(&bus, Duration::from_secs(2));

        let started = Instant::now();
        let result = comms
            .call("m/DELETE_OFFER", "m/DELETE_OFFER/RESPONSE", json!({}))
            .await;

        assert!(matches!(result, Err(CommsError::ResponseTimeout { .. })));
        assert!(started.elapsed() >= Duration::from_secs(2));
        // The subscription must not linger after the call gave up.
        assert_eq!(bus.subscriber_count("m/DELETE_OFFER/RESPONSE"), 0);
    }
}
