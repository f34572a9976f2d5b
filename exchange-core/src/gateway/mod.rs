//! Per-device bridge to external controllers.
//!
//! An `ExternalGateway` wraps one device strategy and exposes it over the
//! pub/sub transport: registration, per-tick progress events, trade
//! notification, an energy-forecast channel, and the aggregator command
//! dispatch table. Registration changes are staged and only become visible at
//! the next market-cycle boundary, never mid-tick.

pub mod aggregator;
pub mod cadence;
pub mod pending;

pub use aggregator::AggregatorBridge;
pub use cadence::TickCadence;
pub use pending::PendingRequest;

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};

use log::{debug, warn};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use exchange::{
    Bid, InstrumentId, Market, MarketError, MarketId, Offer, Participant, ResponseStatus, Trade,
};

use crate::comms::PubSub;
use crate::config::ExchangeConfig;
use crate::orderbook::{BidLedger, Offers};
use crate::strategy::DeviceStrategy;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("command {0} is not supported by this device")]
    NotSupported(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error(transparent)]
    Market(#[from] MarketError),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

/// Mutable per-device state. One lock covers strategy, ledgers and
/// registration so every read-then-write command sequence is atomic.
struct DeviceCore {
    strategy: Box<dyn DeviceStrategy>,
    offers: Offers,
    bids: BidLedger,
    connected: bool,
    staged_connected: Option<bool>,
    pending: VecDeque<PendingRequest>,
    market: Option<Arc<Mutex<Box<dyn Market>>>>,
    market_id: Option<MarketId>,
    last_market_stats: Value,
}

struct GatewayInner {
    device_id: Uuid,
    device_name: String,
    channel_prefix: String,
    bus: Arc<dyn PubSub>,
    aggregator: Arc<AggregatorBridge>,
    cadence: TickCadence,
    two_sided: bool,
    retain_past_market_state: bool,
    core: Mutex<DeviceCore>,
}

pub struct ExternalGateway {
    inner: Arc<GatewayInner>,
    shutdown: watch::Sender<bool>,
    listeners: StdMutex<Vec<JoinHandle<()>>>,
}

const REGISTRATION_COMMANDS: &[&str] = &[
    "register_participant",
    "unregister_participant",
    "set_energy_forecast",
];

impl ExternalGateway {
    pub fn new(
        device_id: Uuid,
        device_name: impl Into<String>,
        channel_prefix: impl Into<String>,
        strategy: Box<dyn DeviceStrategy>,
        bus: Arc<dyn PubSub>,
        aggregator: Arc<AggregatorBridge>,
        config: &ExchangeConfig,
    ) -> Self {
        let device_name = device_name.into();
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(GatewayInner {
                device_id,
                device_name: device_name.clone(),
                channel_prefix: channel_prefix.into(),
                bus,
                aggregator,
                cadence: TickCadence::from_config(config),
                two_sided: config.market_kind.is_two_sided(),
                retain_past_market_state: config.retain_past_market_state,
                core: Mutex::new(DeviceCore {
                    strategy,
                    offers: Offers::new(device_name.clone()),
                    bids: BidLedger::new(device_name),
                    connected: false,
                    staged_connected: None,
                    pending: VecDeque::new(),
                    market: None,
                    market_id: None,
                    last_market_stats: Value::Null,
                }),
            }),
            shutdown,
            listeners: StdMutex::new(Vec::new()),
        }
    }

    pub fn device_id(&self) -> Uuid {
        self.inner.device_id
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.core.lock().await.connected
    }

    /// Subscribe to the device's registration and forecast channels.
    pub async fn activate(&self) -> anyhow::Result<()> {
        for &command in REGISTRATION_COMMANDS {
            let channel = format!("{}/{}", self.inner.channel_prefix, command);
            let mut subscription = self.inner.bus.subscribe(&channel).await?;
            let mut shutdown = self.shutdown.subscribe();
            let inner = Arc::clone(&self.inner);

            let listener = tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        message = subscription.recv() => {
                            let Some(message) = message else { break };
                            inner.handle_inbound(command, message.data).await;
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

    /// Per-tick driver hook: replays queued requests, then emits a progress
    /// event when the cadence says it is time.
    pub async fn on_tick(&self, tick: u32) {
        self.inner.on_tick(tick).await;
    }

    /// Trade notification from the market the device participates in.
    pub async fn on_trade(&self, market_id: MarketId, trade: &Trade) {
        self.inner.on_trade(market_id, trade).await;
    }

    pub async fn on_offer_split(
        &self,
        market_id: MarketId,
        original: &Offer,
        accepted: &Offer,
        residual: &Offer,
    ) {
        let mut core = self.inner.core.lock().await;
        core.offers
            .on_offer_split(original, accepted, residual, market_id);
    }

    pub async fn on_bid_split(
        &self,
        market_id: MarketId,
        original: &Bid,
        accepted: &Bid,
        residual: &Bid,
    ) {
        let mut core = self.inner.core.lock().await;
        core.bids.on_bid_split(original, accepted, residual, market_id);
    }

    pub async fn on_bid_deleted(&self, market_id: MarketId, bid: &Bid) {
        let mut core = self.inner.core.lock().await;
        core.bids.on_bid_deleted(market_id, bid);
    }

    /// Market-cycle boundary: reject stale pending requests, snapshot the
    /// completed slot's stats, roll the ledgers over, flip staged
    /// registration, and move to the next market.
    pub async fn on_market_cycle(
        &self,
        next_market: Option<Arc<Mutex<Box<dyn Market>>>>,
        active_markets: &HashSet<MarketId>,
    ) {
        self.inner
            .on_market_cycle(next_market, active_markets)
            .await;
    }

    /// Structured command dispatch for aggregator batches. Always returns a
    /// response envelope; failures become `status: "error"` entries.
    pub async fn trigger_aggregator_commands(&self, command: Value) -> Value {
        let command_type = command
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let transaction_id = command.get("transaction_id").cloned().unwrap_or(Value::Null);

        let mut envelope = Map::new();
        envelope.insert("command".to_string(), Value::String(command_type.clone()));
        envelope.insert(
            "area_uuid".to_string(),
            Value::String(self.inner.device_id.to_string()),
        );
        envelope.insert("transaction_id".to_string(), transaction_id);

        match self.inner.execute_command(&command_type, &command).await {
            Ok(fields) => {
                envelope.insert(
                    "status".to_string(),
                    Value::String(ResponseStatus::Ready.as_str().to_string()),
                );
                envelope.extend(fields);
            }
            Err(err) => {
                debug!(
                    "aggregator command {command_type} failed for device {}: {err}",
                    self.inner.device_id
                );
                envelope.insert(
                    "status".to_string(),
                    Value::String(ResponseStatus::Error.as_str().to_string()),
                );
                envelope.insert(
                    "error_message".to_string(),
                    Value::String(err.to_string()),
                );
            }
        }
        Value::Object(envelope)
    }

    /// Emit the finish event and release the registration channels.
    pub async fn deactivate(&self) {
        self.inner.publish_finish_event().await;

        let _ = self.shutdown.send(true);
        let listeners: Vec<JoinHandle<()>> = {
            let mut guard = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        for result in futures::future::join_all(listeners).await {
            if result.is_err() {
                warn!(
                    "registration listener for device {} panicked",
                    self.inner.device_id
                );
            }
        }
    }
}

impl GatewayInner {
    fn response_channel(&self, command: &str) -> String {
        format!("{}/response/{}", self.channel_prefix, command)
    }

    fn event_channel(&self, event: &str) -> String {
        format!("{}/events/{}", self.channel_prefix, event)
    }

    fn participant(&self) -> Participant {
        Participant::owned(self.device_name.clone(), self.device_id)
    }

    async fn reply(
        &self,
        channel: &str,
        status: ResponseStatus,
        mut body: Value,
        transaction_uuid: Value,
    ) {
        body["status"] = Value::String(status.as_str().to_string());
        if !transaction_uuid.is_null() {
            body["transaction_uuid"] = transaction_uuid;
        }
        if let Err(err) = self.bus.publish(channel, body.to_string()).await {
            warn!("could not publish reply on {channel}: {err}");
        }
    }

    async fn handle_inbound(&self, command: &str, data: String) {
        let payload: Value = match serde_json::from_str(&data) {
            Ok(value @ Value::Object(_)) => value,
            _ => {
                warn!("discarding malformed {command} payload: {data}");
                return;
            }
        };
        let transaction_uuid = payload.get("transaction_uuid").cloned().unwrap_or(Value::Null);
        let channel = self.response_channel(command);

        match command {
            "register_participant" => {
                let mut core = self.core.lock().await;
                core.staged_connected = Some(true);
                drop(core);
                self.reply(
                    &channel,
                    ResponseStatus::Ready,
                    json!({ "registered": true }),
                    transaction_uuid,
                )
                .await;
            }
            "unregister_participant" => {
                let mut core = self.core.lock().await;
                let currently = core.staged_connected.unwrap_or(core.connected);
                if currently {
                    core.staged_connected = Some(false);
                    drop(core);
                    self.reply(
                        &channel,
                        ResponseStatus::Ready,
                        json!({ "unregistered": true }),
                        transaction_uuid,
                    )
                    .await;
                } else {
                    drop(core);
                    self.reply(
                        &channel,
                        ResponseStatus::Error,
                        json!({ "error_message": "device is not registered" }),
                        transaction_uuid,
                    )
                    .await;
                }
            }
            "set_energy_forecast" => {
                // Applied on the next tick, not at receipt time.
                let mut core = self.core.lock().await;
                core.pending
                    .push_back(PendingRequest::new(command, payload, channel));
            }
            _ => warn!("unknown inbound command {command}"),
        }
    }

    async fn on_tick(&self, tick: u32) {
        let mut core = self.core.lock().await;

        let pending: Vec<PendingRequest> = core.pending.drain(..).collect();
        for request in pending {
            let transaction_uuid = request
                .arguments
                .get("transaction_uuid")
                .cloned()
                .unwrap_or(Value::Null);
            if request.request_type != "set_energy_forecast" {
                self.reply(
                    &request.response_channel,
                    ResponseStatus::Error,
                    json!({ "error_message": format!("unsupported pending request {}", request.request_type) }),
                    transaction_uuid,
                )
                .await;
                continue;
            }
            match request.arguments.get("energy_forecast").and_then(Value::as_f64) {
                Some(energy_kwh) => {
                    core.strategy.set_energy_forecast(energy_kwh);
                    self.reply(
                        &request.response_channel,
                        ResponseStatus::Ready,
                        json!({}),
                        transaction_uuid,
                    )
                    .await;
                }
                None => {
                    self.reply(
                        &request.response_channel,
                        ResponseStatus::Error,
                        json!({ "error_message": "missing or non-numeric field energy_forecast" }),
                        transaction_uuid,
                    )
                    .await;
                }
            }
        }

        // Aggregator control counts as a connection mode of its own; batched
        // devices get progress events without the direct handshake.
        let aggregated = self.aggregator.is_controlling_device(self.device_id);
        if (core.connected || aggregated) && self.cadence.is_dispatch_tick(tick) {
            let percent = self.cadence.slot_completion_percent(tick);
            drop(core);
            if aggregated {
                self.aggregator.add_batch_tick_event(self.device_id, percent);
            } else {
                let event = json!({
                    "event": "tick",
                    "area_uuid": self.device_id.to_string(),
                    "slot_completion_percent": percent,
                });
                if let Err(err) = self
                    .bus
                    .publish(&self.event_channel("tick"), event.to_string())
                    .await
                {
                    warn!("could not publish tick event: {err}");
                }
            }
        }
    }

    async fn on_trade(&self, market_id: MarketId, trade: &Trade) {
        let mut core = self.core.lock().await;

        let is_seller = trade.seller() == self.device_name;
        let is_buyer = trade.buyer() == self.device_name;
        if !is_seller && !is_buyer {
            return;
        }

        // The ledgers filter on ownership and side themselves.
        core.offers.on_trade(market_id, trade);
        core.bids.on_bid_traded(market_id, trade);
        if is_buyer {
            if let Some(offer) = trade.offer_bid().as_offer() {
                core.offers.bought_offer(offer.clone(), market_id);
            }
        }

        let aggregated = self.aggregator.is_controlling_device(self.device_id);
        if !core.connected && !aggregated {
            return;
        }
        // In a two-sided market the same match produces two mirrored trade
        // records; only the device's natural-side record is published.
        let mirrored = self.two_sided
            && ((is_buyer && trade.is_offer_trade()) || (is_seller && trade.is_bid_trade()));
        if mirrored {
            return;
        }
        drop(core);

        let serialized = match trade.to_json_string() {
            Ok(serialized) => serialized,
            Err(err) => {
                warn!("could not serialize trade {}: {err}", trade.id());
                return;
            }
        };
        if aggregated {
            self.aggregator
                .add_batch_trade_event(self.device_id, Value::String(serialized));
        } else {
            let event = json!({
                "event": "trade",
                "area_uuid": self.device_id.to_string(),
                "trade": serialized,
            });
            if let Err(err) = self
                .bus
                .publish(&self.event_channel("trade"), event.to_string())
                .await
            {
                warn!("could not publish trade event: {err}");
            }
        }
    }

    async fn on_market_cycle(
        &self,
        next_market: Option<Arc<Mutex<Box<dyn Market>>>>,
        active_markets: &HashSet<MarketId>,
    ) {
        let mut core = self.core.lock().await;

        // Requests still queued refer to the slot that just ended.
        let stale: Vec<PendingRequest> = core.pending.drain(..).collect();
        for request in stale {
            let transaction_uuid = request
                .arguments
                .get("transaction_uuid")
                .cloned()
                .unwrap_or(Value::Null);
            self.reply(
                &request.response_channel,
                ResponseStatus::Error,
                json!({ "error_message": "market cycle already finished" }),
                transaction_uuid,
            )
            .await;
        }

        if let Some(market_id) = core.market_id {
            core.last_market_stats = json!({
                "market_id": market_id.to_string(),
                "sold_energy_kWh": core.offers.sold_offer_energy(market_id),
                "sold_revenue": core.offers.sold_offer_price(market_id),
                "bought_energy_kWh": core.bids.traded_energy(market_id),
                "bought_cost": core.bids.traded_cost(market_id),
            });
        }

        if !self.retain_past_market_state {
            core.offers.delete_past_markets(active_markets);
            core.bids.delete_past_markets(active_markets);
        } else {
            // Splits are only meaningful within their originating slot.
            core.offers.clear_split();
        }

        if let Some(staged) = core.staged_connected.take() {
            core.connected = staged;
        }

        core.market_id = match &next_market {
            Some(market) => Some(market.lock().await.id()),
            None => None,
        };
        core.market = next_market;

        let market_info = json!({
            "market_id": core.market_id.map(|id| id.to_string()),
        });
        drop(core);

        if self.aggregator.is_controlling_device(self.device_id) {
            self.aggregator
                .add_batch_market_event(self.device_id, market_info);
        }
    }

    async fn publish_finish_event(&self) {
        if self.aggregator.is_controlling_device(self.device_id) {
            self.aggregator.add_batch_finished_event(self.device_id);
            return;
        }
        if !self.core.lock().await.connected {
            return;
        }
        let event = json!({
            "event": "finish",
            "area_uuid": self.device_id.to_string(),
        });
        if let Err(err) = self
            .bus
            .publish(&self.event_channel("finish"), event.to_string())
            .await
        {
            warn!("could not publish finish event: {err}");
        }
    }

    async fn execute_command(
        &self,
        command_type: &str,
        args: &Value,
    ) -> Result<Map<String, Value>, CommandError> {
        let mut core = self.core.lock().await;
        let mut fields = Map::new();

        match command_type {
            "offer" | "update_offer" => {
                if !core.strategy.kind().supports_offers() {
                    return Err(CommandError::NotSupported(command_type.to_string()));
                }
                let (market, market_id) = active_market(&core)?;
                let replace_existing = command_type == "update_offer"
                    || args.get("replace_existing").and_then(Value::as_bool).unwrap_or(true);
                let open = core.offers.open_in_market(market_id);
                if command_type == "update_offer" && open.is_empty() {
                    return Err(CommandError::InvalidArguments(
                        "no posted offers to update".to_string(),
                    ));
                }
                let price = require_f64(args, "price")?;
                let energy = require_f64(args, "energy")?;
                let available = core.strategy.available_energy_kwh();
                if !core
                    .offers
                    .can_offer_be_posted(energy, price, available, market_id, replace_existing)
                {
                    return Err(CommandError::InvalidArguments(
                        "offer exceeds available energy".to_string(),
                    ));
                }
                if replace_existing {
                    for offer in open {
                        let _ = market.lock().await.delete_offer(offer.id());
                        core.offers.remove(offer.id());
                    }
                }
                let offer = market
                    .lock()
                    .await
                    .offer(price, energy, self.participant())?;
                core.offers.post(offer.clone(), market_id);
                fields.insert("offer".to_string(), Value::String(offer.to_json_string()?));
            }
            "delete_offer" => {
                if !core.strategy.kind().supports_offers() {
                    return Err(CommandError::NotSupported(command_type.to_string()));
                }
                let (market, market_id) = active_market(&core)?;
                let targets: Vec<InstrumentId> = match optional_uuid(args, "offer")? {
                    Some(id) => vec![id],
                    None => core
                        .offers
                        .open_in_market(market_id)
                        .iter()
                        .map(Offer::id)
                        .collect(),
                };
                let mut deleted = Vec::new();
                for id in targets {
                    market.lock().await.delete_offer(id)?;
                    core.offers.remove(id);
                    deleted.push(Value::String(id.to_string()));
                }
                fields.insert("deleted_offers".to_string(), Value::Array(deleted));
            }
            "list_offers" => {
                if !core.strategy.kind().supports_offers() {
                    return Err(CommandError::NotSupported(command_type.to_string()));
                }
                let (_, market_id) = active_market(&core)?;
                let list: Vec<Value> = core
                    .offers
                    .open_in_market(market_id)
                    .iter()
                    .map(|offer| {
                        json!({
                            "id": offer.id().to_string(),
                            "price": offer.price(),
                            "energy": offer.energy(),
                        })
                    })
                    .collect();
                fields.insert("offer_list".to_string(), Value::Array(list));
            }
            "bid" | "update_bid" => {
                if !core.strategy.kind().supports_bids() || !self.two_sided {
                    return Err(CommandError::NotSupported(command_type.to_string()));
                }
                let (market, market_id) = active_market(&core)?;
                let replace_existing = command_type == "update_bid"
                    || args.get("replace_existing").and_then(Value::as_bool).unwrap_or(true);
                if command_type == "update_bid" && !core.bids.are_bids_posted(market_id) {
                    return Err(CommandError::InvalidArguments(
                        "no posted bids to update".to_string(),
                    ));
                }
                let price = require_f64(args, "price")?;
                let energy = require_f64(args, "energy")?;
                let required = core.strategy.required_energy_kwh();
                if !core
                    .bids
                    .can_bid_be_posted(energy, price, required, market_id, replace_existing)
                {
                    return Err(CommandError::InvalidArguments(
                        "bid exceeds required energy".to_string(),
                    ));
                }
                if replace_existing {
                    for id in core.bids.remove_posted(market_id, None) {
                        let _ = market.lock().await.delete_bid(id);
                    }
                }
                let attributes = args.get("attributes").filter(|v| !v.is_null()).cloned();
                let requirements = args.get("requirements").filter(|v| !v.is_null()).cloned();
                let bid = market.lock().await.bid(
                    price,
                    energy,
                    self.participant(),
                    attributes,
                    requirements,
                )?;
                core.bids.add_posted(market_id, bid.clone());
                fields.insert("bid".to_string(), Value::String(bid.to_json_string()?));
            }
            "delete_bid" => {
                if !core.strategy.kind().supports_bids() || !self.two_sided {
                    return Err(CommandError::NotSupported(command_type.to_string()));
                }
                let (market, market_id) = active_market(&core)?;
                let target = optional_uuid(args, "bid")?;
                if let Some(id) = target {
                    market.lock().await.delete_bid(id)?;
                }
                let removed = core.bids.remove_posted(market_id, target);
                if target.is_none() {
                    for id in &removed {
                        let _ = market.lock().await.delete_bid(*id);
                    }
                }
                let deleted: Vec<Value> = removed
                    .iter()
                    .map(|id| Value::String(id.to_string()))
                    .collect();
                fields.insert("deleted_bids".to_string(), Value::Array(deleted));
            }
            "list_bids" => {
                if !core.strategy.kind().supports_bids() || !self.two_sided {
                    return Err(CommandError::NotSupported(command_type.to_string()));
                }
                let (_, market_id) = active_market(&core)?;
                let list: Vec<Value> = core
                    .bids
                    .get_posted(market_id)
                    .iter()
                    .map(|bid| {
                        json!({
                            "id": bid.id().to_string(),
                            "price": bid.price(),
                            "energy": bid.energy(),
                        })
                    })
                    .collect();
                fields.insert("bid_list".to_string(), Value::Array(list));
            }
            "device_info" => {
                let mut info = Map::new();
                info.insert("name".to_string(), Value::String(self.device_name.clone()));
                info.insert(
                    "area_uuid".to_string(),
                    Value::String(self.device_id.to_string()),
                );
                info.insert("registered".to_string(), Value::Bool(core.connected));
                if let Some(market_id) = core.market_id {
                    info.insert(
                        "open_offer_energy_kWh".to_string(),
                        json!(core.offers.open_offer_energy(market_id)),
                    );
                    info.insert(
                        "sold_energy_kWh".to_string(),
                        json!(core.offers.sold_offer_energy(market_id)),
                    );
                    info.insert(
                        "posted_bid_energy_kWh".to_string(),
                        json!(core.bids.posted_energy(market_id)),
                    );
                    info.insert(
                        "bought_energy_kWh".to_string(),
                        json!(core.bids.traded_energy(market_id)),
                    );
                }
                if let Value::Object(extra) = core.strategy.device_info_extra() {
                    info.extend(extra);
                }
                fields.insert("device_info".to_string(), Value::Object(info));
            }
            "last_market_stats" => {
                fields.insert(
                    "market_stats".to_string(),
                    core.last_market_stats.clone(),
                );
            }
            other => return Err(CommandError::NotSupported(other.to_string())),
        }

        Ok(fields)
    }
}

fn active_market(
    core: &DeviceCore,
) -> Result<(Arc<Mutex<Box<dyn Market>>>, MarketId), CommandError> {
    match (&core.market, core.market_id) {
        (Some(market), Some(market_id)) => Ok((Arc::clone(market), market_id)),
        _ => Err(CommandError::InvalidArguments(
            "no active market for this device".to_string(),
        )),
    }
}

fn require_f64(args: &Value, key: &str) -> Result<f64, CommandError> {
    args.get(key).and_then(Value::as_f64).ok_or_else(|| {
        CommandError::InvalidArguments(format!("missing or non-numeric field {key}"))
    })
}

fn optional_uuid(args: &Value, key: &str) -> Result<Option<InstrumentId>, CommandError> {
    match args.get(key).and_then(Value::as_str) {
        None => Ok(None),
        Some(raw) => InstrumentId::parse_str(raw)
            .map(Some)
            .map_err(|_| CommandError::InvalidArguments(format!("field {key} is not a uuid"))),
    }
}
