//! Pub/sub transport seam.
//!
//! `PubSub` hides the broker implementation behind publish/subscribe on named
//! channels. `MemoryBus` is the in-process implementation used by the
//! simulation; a networked broker transport would plug in behind the same
//! trait.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

/// One message delivered to a subscription.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub channel: String,
    pub data: String,
}

/// Handle to a channel subscription. Dropping it unsubscribes.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<BusMessage>,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

#[async_trait]
pub trait PubSub: Send + Sync {
    /// Fire-and-forget delivery to every current subscriber of `channel`.
    async fn publish(&self, channel: &str, data: String) -> Result<()>;

    async fn subscribe(&self, channel: &str) -> Result<Subscription>;

    async fn publish_json(&self, channel: &str, value: &Value) -> Result<()> {
        self.publish(channel, value.to_string()).await
    }
}

#[derive(Default)]
struct BusState {
    topics: HashMap<String, HashMap<u64, mpsc::UnboundedSender<BusMessage>>>,
}

/// In-process pub/sub fan-out over unbounded tokio channels.
#[derive(Clone, Default)]
pub struct MemoryBus {
    state: Arc<Mutex<BusState>>,
    next_token: Arc<AtomicU64>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions on a channel. Test hook.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.topics.get(channel).map_or(0, |subs| subs.len())
    }
}

#[async_trait]
impl PubSub for MemoryBus {
    async fn publish(&self, channel: &str, data: String) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(subs) = state.topics.get_mut(channel) {
            subs.retain(|_, tx| {
                tx.send(BusMessage {
                    channel: channel.to_string(),
                    data: data.clone(),
                })
                .is_ok()
            });
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state
                .topics
                .entry(channel.to_string())
                .or_default()
                .insert(token, tx);
        }

        let state = Arc::clone(&self.state);
        let channel_name = channel.to_string();
        let cancel = Box::new(move || {
            let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(subs) = state.topics.get_mut(&channel_name) {
                subs.remove(&token);
                if subs.is_empty() {
                    state.topics.remove(&channel_name);
                }
            }
        });

        Ok(Subscription {
            rx,
            cancel: Some(cancel),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_to_all_subscribers_of_a_channel() -> Result<()> {
        let bus = MemoryBus::new();
        let mut first = bus.subscribe("m1/OFFER").await?;
        let mut second = bus.subscribe("m1/OFFER").await?;
        let mut other = bus.subscribe("m2/OFFER").await?;

        bus.publish("m1/OFFER", "{}".to_string()).await?;

        assert_eq!(first.recv().await.unwrap().data, "{}");
        assert_eq!(second.recv().await.unwrap().data, "{}");

        bus.publish("m2/OFFER", "x".to_string()).await?;
        let msg = other.recv().await.unwrap();
        assert_eq!(msg.channel, "m2/OFFER");
        Ok(())
    }

    #[tokio::test]
    async fn dropping_a_subscription_unsubscribes() -> Result<()> {
        let bus = MemoryBus::new();
        let sub = bus.subscribe("notify").await?;
        assert_eq!(bus.subscriber_count("notify"), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count("notify"), 0);
        Ok(())
    }
}
