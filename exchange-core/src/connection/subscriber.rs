//! Inbound trading command execution for one market.
//!
//! Listens on the market's command channels, executes each command against
//! the market facade and replies on `{channel}/RESPONSE`. Facade errors are
//! turned into error envelopes, never allowed to crash a worker.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use log::{debug, warn};
use serde_json::{json, Map, Value};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use exchange::{
    Bid, InstrumentId, Market, MarketError, MarketId, Offer, Participant, ResponseStatus,
};

use super::{command_channel, response_channel};
use crate::comms::{PubSub, WorkerPool};
use crate::config::{ExchangeConfig, MarketKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Offer,
    DeleteOffer,
    AcceptOffer,
    Bid,
    DeleteBid,
    AcceptBid,
}

impl Command {
    fn suffix(self) -> &'static str {
        match self {
            Command::Offer => "OFFER",
            Command::DeleteOffer => "DELETE_OFFER",
            Command::AcceptOffer => "ACCEPT_OFFER",
            Command::Bid => "BID",
            Command::DeleteBid => "DELETE_BID",
            Command::AcceptBid => "ACCEPT_BID",
        }
    }

    fn for_kind(kind: MarketKind) -> &'static [Command] {
        const ONE_SIDED: &[Command] = &[Command::Offer, Command::DeleteOffer, Command::AcceptOffer];
        const TWO_SIDED: &[Command] = &[
            Command::Offer,
            Command::DeleteOffer,
            Command::AcceptOffer,
            Command::Bid,
            Command::DeleteBid,
            Command::AcceptBid,
        ];
        match kind {
            MarketKind::OneSided => ONE_SIDED,
            MarketKind::TwoSided => TWO_SIDED,
        }
    }
}

/// A command that could not be executed; becomes an error envelope on the
/// response channel.
struct CommandFailure {
    exception: &'static str,
    message: String,
}

impl CommandFailure {
    fn malformed(message: impl Into<String>) -> Self {
        Self {
            exception: "MalformedPayload",
            message: message.into(),
        }
    }
}

impl From<MarketError> for CommandFailure {
    fn from(err: MarketError) -> Self {
        Self {
            exception: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CommandFailure {
    fn from(err: serde_json::Error) -> Self {
        Self {
            exception: "Serialization",
            message: err.to_string(),
        }
    }
}

pub struct MarketEventSubscriber {
    market_id: MarketId,
    market: Arc<Mutex<Box<dyn Market>>>,
    bus: Arc<dyn PubSub>,
    pool: Arc<WorkerPool>,
    market_kind: MarketKind,
    drain_timeout: Duration,
    shutdown: watch::Sender<bool>,
    listeners: StdMutex<Vec<JoinHandle<()>>>,
}

impl MarketEventSubscriber {
    pub fn new(
        market_id: MarketId,
        market: Arc<Mutex<Box<dyn Market>>>,
        bus: Arc<dyn PubSub>,
        config: &ExchangeConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            market_id,
            market,
            bus,
            pool: Arc::new(WorkerPool::new(config.max_worker_threads)),
            market_kind: config.market_kind,
            drain_timeout: config.drain_timeout,
            shutdown,
            listeners: StdMutex::new(Vec::new()),
        }
    }

    /// Subscribe to the market's command channels and start dispatching.
    pub async fn start(&self) -> anyhow::Result<()> {
        for &command in Command::for_kind(self.market_kind) {
            let channel = command_channel(self.market_id, command.suffix());
            let reply_channel = response_channel(&channel);
            let mut subscription = self.bus.subscribe(&channel).await?;
            let mut shutdown = self.shutdown.subscribe();
            let market = Arc::clone(&self.market);
            let bus = Arc::clone(&self.bus);
            let pool = Arc::clone(&self.pool);

            let listener = tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        message = subscription.recv() => {
                            let Some(message) = message else { break };
                            let market = Arc::clone(&market);
                            let bus = Arc::clone(&bus);
                            let reply_channel = reply_channel.clone();
                            pool.spawn(async move {
                                handle_command(market, bus, command, reply_channel, message.data)
                                    .await;
                            });
                        }
                    }
                }
            });
            self.listeners
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(listener);
        }
        Ok(())
    }

    /// Drain in-flight command handlers within the configured window, then
    /// release the channel subscriptions.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        self.pool.drain(self.drain_timeout).await;

        let listeners: Vec<JoinHandle<()>> = {
            let mut guard = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        for result in futures::future::join_all(listeners).await {
            if result.is_err() {
                warn!("command listener for market {} panicked", self.market_id);
            }
        }
    }
}

async fn handle_command(
    market: Arc<Mutex<Box<dyn Market>>>,
    bus: Arc<dyn PubSub>,
    command: Command,
    reply_channel: String,
    data: String,
) {
    let mut payload: Map<String, Value> = match serde_json::from_str(&data) {
        Ok(Value::Object(map)) => map,
        _ => {
            warn!("discarding malformed {} command: {data}", command.suffix());
            return;
        }
    };
    let transaction_uuid = payload.remove("transaction_uuid");

    let mut reply = match execute(market, command, &payload).await {
        Ok(mut fields) => {
            fields.insert(
                "status".to_string(),
                Value::String(ResponseStatus::Ready.as_str().to_string()),
            );
            Value::Object(fields)
        }
        Err(failure) => {
            debug!(
                "{} command failed: {} ({})",
                command.suffix(),
                failure.message,
                failure.exception
            );
            json!({
                "status": ResponseStatus::Error.as_str(),
                "exception": failure.exception,
                "error_message": failure.message,
            })
        }
    };
    if let Some(transaction_uuid) = transaction_uuid {
        reply["transaction_uuid"] = transaction_uuid;
    }

    if let Err(err) = bus.publish(&reply_channel, reply.to_string()).await {
        warn!("could not publish reply on {reply_channel}: {err}");
    }
}

async fn execute(
    market: Arc<Mutex<Box<dyn Market>>>,
    command: Command,
    payload: &Map<String, Value>,
) -> Result<Map<String, Value>, CommandFailure> {
    let mut fields = Map::new();
    match command {
        Command::Offer => {
            let price = require_f64(payload, "price")?;
            let energy = require_f64(payload, "energy")?;
            let seller = participant(payload, "seller")?;
            let offer = market.lock().await.offer(price, energy, seller)?;
            fields.insert("offer".to_string(), Value::String(offer.to_json_string()?));
        }
        Command::DeleteOffer => {
            let offer = embedded_offer(payload)?;
            market.lock().await.delete_offer(offer.id())?;
        }
        Command::AcceptOffer => {
            let offer = embedded_offer(payload)?;
            let buyer = participant(payload, "buyer")?;
            let energy = optional_f64(payload, "energy")?;
            let trade = market.lock().await.accept_offer(offer.id(), buyer, energy)?;
            fields.insert("trade".to_string(), Value::String(trade.to_json_string()?));
        }
        Command::Bid => {
            let price = require_f64(payload, "price")?;
            let energy = require_f64(payload, "energy")?;
            let buyer = participant(payload, "buyer")?;
            let attributes = payload.get("attributes").filter(|v| !v.is_null()).cloned();
            let requirements = payload.get("requirements").filter(|v| !v.is_null()).cloned();
            let bid = market
                .lock()
                .await
                .bid(price, energy, buyer, attributes, requirements)?;
            fields.insert("bid".to_string(), Value::String(bid.to_json_string()?));
        }
        Command::DeleteBid => {
            let bid = embedded_bid(payload)?;
            market.lock().await.delete_bid(bid.id())?;
        }
        Command::AcceptBid => {
            let bid = embedded_bid(payload)?;
            let seller = participant(payload, "seller")?;
            let energy = optional_f64(payload, "energy")?;
            let trade = market.lock().await.accept_bid(bid.id(), seller, energy)?;
            fields.insert("trade".to_string(), Value::String(trade.to_json_string()?));
        }
    }
    Ok(fields)
}

fn require_f64(payload: &Map<String, Value>, key: &str) -> Result<f64, CommandFailure> {
    payload
        .get(key)
        .and_then(Value::as_f64)
        .ok_or_else(|| CommandFailure::malformed(format!("missing or non-numeric field {key}")))
}

fn optional_f64(payload: &Map<String, Value>, key: &str) -> Result<Option<f64>, CommandFailure> {
    match payload.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_f64()
            .map(Some)
            .ok_or_else(|| CommandFailure::malformed(format!("non-numeric field {key}"))),
    }
}

fn require_str<'a>(payload: &'a Map<String, Value>, key: &str) -> Result<&'a str, CommandFailure> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| CommandFailure::malformed(format!("missing or non-string field {key}")))
}

fn optional_uuid(
    payload: &Map<String, Value>,
    key: &str,
) -> Result<Option<InstrumentId>, CommandFailure> {
    match payload.get(key).and_then(Value::as_str) {
        None => Ok(None),
        Some(raw) => InstrumentId::parse_str(raw)
            .map(Some)
            .map_err(|_| CommandFailure::malformed(format!("field {key} is not a uuid"))),
    }
}

/// Reads the participant fields for one side (`seller` or `buyer`) of a
/// command payload.
fn participant(payload: &Map<String, Value>, role: &str) -> Result<Participant, CommandFailure> {
    Ok(Participant {
        name: require_str(payload, role)?.to_string(),
        origin: payload
            .get(&format!("{role}_origin"))
            .and_then(Value::as_str)
            .map(str::to_string),
        origin_id: optional_uuid(payload, &format!("{role}_origin_id"))?,
        id: optional_uuid(payload, &format!("{role}_id"))?,
    })
}

fn embedded_offer(payload: &Map<String, Value>) -> Result<Offer, CommandFailure> {
    Offer::from_json(require_str(payload, "offer")?)
        .map_err(|err| CommandFailure::malformed(format!("undecodable offer: {err}")))
}

fn embedded_bid(payload: &Map<String, Value>) -> Result<Bid, CommandFailure> {
    Bid::from_json(require_str(payload, "bid")?)
        .map_err(|err| CommandFailure::malformed(format!("undecodable bid: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comms::{BlockingCommunicator, MemoryBus};
    use crate::market::SimMarket;

    fn two_sided_config() -> ExchangeConfig {
        ExchangeConfig {
            market_kind: MarketKind::TwoSided,
            ..ExchangeConfig::default()
        }
    }

    async fn setup(config: &ExchangeConfig) -> (MemoryBus, MarketId, MarketEventSubscriber) {
        let market = SimMarket::new("house");
        let market_id = market.id();
        let market: Arc<Mutex<Box<dyn Market>>> = Arc::new(Mutex::new(Box::new(market)));
        let bus = MemoryBus::new();
        let subscriber =
            MarketEventSubscriber::new(market_id, market, Arc::new(bus.clone()), config);
        subscriber.start().await.unwrap();
        (bus, market_id, subscriber)
    }

    fn comms(bus: &MemoryBus) -> BlockingCommunicator {
        BlockingCommunicator::new(Arc::new(bus.clone()), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn offer_command_posts_and_replies_ready() {
        let config = ExchangeConfig::default();
        let (bus, market_id, subscriber) = setup(&config).await;

        let channel = command_channel(market_id, "OFFER");
        let response = comms(&bus)
            .call(
                &channel,
                &response_channel(&channel),
                json!({ "price": 10.0, "energy": 5.0, "seller": "house-pv" }),
            )
            .await
            .unwrap();

        assert_eq!(response["status"], "ready");
        let offer = Offer::from_json(response["offer"].as_str().unwrap()).unwrap();
        assert_eq!(offer.energy(), 5.0);
        assert_eq!(offer.seller(), "house-pv");
        subscriber.stop().await;
    }

    #[tokio::test]
    async fn facade_errors_become_error_envelopes() {
        let config = ExchangeConfig::default();
        let (bus, market_id, subscriber) = setup(&config).await;

        let ghost = Offer::new(1.0, 1.0, Participant::new("nobody"));
        let channel = command_channel(market_id, "DELETE_OFFER");
        let response = comms(&bus)
            .call(
                &channel,
                &response_channel(&channel),
                json!({ "offer": ghost.to_json_string().unwrap() }),
            )
            .await
            .unwrap();

        assert_eq!(response["status"], "error");
        assert_eq!(response["exception"], "OfferNotFound");
        assert!(response["error_message"].as_str().is_some());
        subscriber.stop().await;
    }

    #[tokio::test]
    async fn missing_fields_are_rejected_before_the_facade() {
        let config = ExchangeConfig::default();
        let (bus, market_id, subscriber) = setup(&config).await;

        let channel = command_channel(market_id, "OFFER");
        let response = comms(&bus)
            .call(
                &channel,
                &response_channel(&channel),
                json!({ "price": 10.0, "seller": "house-pv" }),
            )
            .await
            .unwrap();

        assert_eq!(response["status"], "error");
        assert_eq!(response["exception"], "MalformedPayload");
        subscriber.stop().await;
    }

    #[tokio::test]
    async fn bid_channels_exist_only_in_two_sided_markets() {
        let one_sided = ExchangeConfig::default();
        let (bus, market_id, subscriber) = setup(&one_sided).await;
        assert_eq!(
            bus.subscriber_count(&command_channel(market_id, "BID")),
            0
        );
        subscriber.stop().await;

        let (bus, market_id, subscriber) = setup(&two_sided_config()).await;
        assert_eq!(
            bus.subscriber_count(&command_channel(market_id, "BID")),
            1
        );
        subscriber.stop().await;
    }

    #[tokio::test]
    async fn stop_releases_all_subscriptions() {
        let config = two_sided_config();
        let (bus, market_id, subscriber) = setup(&config).await;
        subscriber.stop().await;

        for suffix in [
            "OFFER",
            "DELETE_OFFER",
            "ACCEPT_OFFER",
            "BID",
            "DELETE_BID",
            "ACCEPT_BID",
        ] {
            assert_eq!(
                bus.subscriber_count(&command_channel(market_id, suffix)),
                0,
                "subscription on {suffix} leaked"
            );
        }
    }
}
