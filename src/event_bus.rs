// =============================================================================
// Event Bus — in-process publish/subscribe with typed topics
// =============================================================================
//
// Topics are typed: every published `Event` variant maps to exactly one
// `Topic`. Delivery is cooperative — `publish` enqueues without blocking,
// and one dispatcher task per topic drains the queue and awaits handlers in
// priority order (High → Normal → Low, FIFO within a priority). A handler
// error is logged and delivery to the remaining handlers continues.
//
// Per-topic FIFO dispatch is what preserves the ordering guarantee for
// `market.price_update` → `indicator.updated` chains on a single symbol.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::types::OrderSide;

// =============================================================================
// Topics
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    PriceUpdate,
    IndicatorUpdated,
    SignalGenerated,
    OrderCreated,
    OrderFilled,
    OrderCancelled,
    PositionOpened,
    PositionUpdated,
    PositionClosed,
    BacktestProgress,
    BacktestCompleted,
    BacktestFailed,
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::PriceUpdate => "market.price_update",
            Self::IndicatorUpdated => "indicator.updated",
            Self::SignalGenerated => "signal_generated",
            Self::OrderCreated => "order_created",
            Self::OrderFilled => "order_filled",
            Self::OrderCancelled => "order_cancelled",
            Self::PositionOpened => "position_opened",
            Self::PositionUpdated => "position_updated",
            Self::PositionClosed => "position_closed",
            Self::BacktestProgress => "backtest.progress",
            Self::BacktestCompleted => "backtest.completed",
            Self::BacktestFailed => "backtest.failed",
        };
        write!(f, "{name}")
    }
}

// =============================================================================
// Payloads
// =============================================================================

/// A signal's discrete intent toward the order manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum SignalType {
    /// Entry.
    S1,
    /// Take-profit-style close.
    Ze1,
    /// Emergency exit.
    E1,
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::S1 => write!(f, "S1"),
            Self::Ze1 => write!(f, "ZE1"),
            Self::E1 => write!(f, "E1"),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PriceUpdate {
    pub symbol: String,
    pub price: f64,
    pub volume: f64,
    /// Unix epoch seconds (millisecond inputs are normalized at ingress).
    pub timestamp: f64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct IndicatorUpdate {
    pub indicator_id: String,
    pub symbol: String,
    pub value: f64,
    pub timestamp: f64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct Signal {
    pub strategy_name: String,
    pub symbol: String,
    pub signal_type: SignalType,
    pub side: OrderSide,
    pub quantity: f64,
    pub price: f64,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct OrderEvent {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub price: f64,
    pub status: String,
    pub timestamp: f64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PositionEvent {
    pub position_id: String,
    pub symbol: String,
    /// "LONG", "SHORT", or "NONE".
    pub side: String,
    pub quantity: f64,
    pub entry_price: f64,
    pub current_price: f64,
    pub unrealized_pnl: Option<f64>,
    pub realized_pnl: Option<f64>,
    pub timestamp: f64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BacktestProgressEvent {
    pub session_id: String,
    pub status: String,
    pub progress_pct: f64,
    pub current_timestamp: Option<f64>,
    pub current_pnl: f64,
    pub total_trades: usize,
    pub open_positions: usize,
    pub equity: f64,
    pub max_drawdown_pct: f64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BacktestCompletedEvent {
    pub session_id: String,
    pub final_pnl: f64,
    pub total_trades: usize,
    pub win_rate: f64,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BacktestFailedEvent {
    pub session_id: String,
    pub error: String,
}

/// Everything that flows over the bus.
#[derive(Debug, Clone)]
pub enum Event {
    PriceUpdate(PriceUpdate),
    IndicatorUpdated(IndicatorUpdate),
    SignalGenerated(Signal),
    OrderCreated(OrderEvent),
    OrderFilled(OrderEvent),
    OrderCancelled(OrderEvent),
    PositionOpened(PositionEvent),
    PositionUpdated(PositionEvent),
    PositionClosed(PositionEvent),
    BacktestProgress(BacktestProgressEvent),
    BacktestCompleted(BacktestCompletedEvent),
    BacktestFailed(BacktestFailedEvent),
}

impl Event {
    pub fn topic(&self) -> Topic {
        match self {
            Self::PriceUpdate(_) => Topic::PriceUpdate,
            Self::IndicatorUpdated(_) => Topic::IndicatorUpdated,
            Self::SignalGenerated(_) => Topic::SignalGenerated,
            Self::OrderCreated(_) => Topic::OrderCreated,
            Self::OrderFilled(_) => Topic::OrderFilled,
            Self::OrderCancelled(_) => Topic::OrderCancelled,
            Self::PositionOpened(_) => Topic::PositionOpened,
            Self::PositionUpdated(_) => Topic::PositionUpdated,
            Self::PositionClosed(_) => Topic::PositionClosed,
            Self::BacktestProgress(_) => Topic::BacktestProgress,
            Self::BacktestCompleted(_) => Topic::BacktestCompleted,
            Self::BacktestFailed(_) => Topic::BacktestFailed,
        }
    }
}

// =============================================================================
// Subscriptions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    High,
    Normal,
    Low,
}

/// Token returned by `subscribe`; used to unsubscribe. Handler closures are
/// not comparable, so identity lives in this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Async event handler. Errors are logged by the bus; they never stop
/// delivery to other subscribers.
pub type EventHandler = Arc<dyn Fn(Event) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    priority: Priority,
    seq: u64,
    handler: EventHandler,
}

struct TopicEntry {
    subscriptions: Arc<RwLock<Vec<Subscription>>>,
    sender: mpsc::UnboundedSender<Event>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

// =============================================================================
// EventBus
// =============================================================================

pub struct EventBus {
    topics: RwLock<HashMap<Topic, Arc<TopicEntry>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe a handler to a topic at the given priority. Returns the id
    /// needed for `unsubscribe`.
    pub fn subscribe(&self, topic: Topic, priority: Priority, handler: EventHandler) -> SubscriptionId {
        let seq = self.next_id.fetch_add(1, AtomicOrdering::SeqCst);
        let id = SubscriptionId(seq);

        let entry = self.entry(topic);
        {
            let mut subs = entry.subscriptions.write();
            subs.push(Subscription {
                id,
                priority,
                seq,
                handler,
            });
            // Priority order, FIFO within a priority.
            subs.sort_by_key(|s| (s.priority, s.seq));
        }

        debug!(topic = %topic, ?priority, "subscribed handler");
        id
    }

    /// Remove one subscription. Returns false when the id was not found.
    pub fn unsubscribe(&self, topic: Topic, id: SubscriptionId) -> bool {
        let entry = {
            let topics = self.topics.read();
            topics.get(&topic).cloned()
        };

        let Some(entry) = entry else {
            return false;
        };

        let mut subs = entry.subscriptions.write();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        before != subs.len()
    }

    /// Enqueue an event for delivery. Never blocks on handlers; the topic's
    /// dispatcher task invokes them in priority order.
    pub fn publish(&self, event: Event) {
        let topic = event.topic();
        let entry = self.entry(topic);

        if entry.sender.send(event).is_err() {
            warn!(topic = %topic, "event dropped: dispatcher is gone");
        }
    }

    /// Number of live subscriptions on a topic.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topics
            .read()
            .get(&topic)
            .map(|e| e.subscriptions.read().len())
            .unwrap_or(0)
    }

    /// Unsubscribe everything and drain pending deliveries. The bus can be
    /// used again afterwards (topics respawn lazily).
    pub async fn shutdown(&self) {
        let entries: Vec<Arc<TopicEntry>> = {
            let mut topics = self.topics.write();
            topics.drain().map(|(_, entry)| entry).collect()
        };

        for entry in entries {
            let worker = entry.worker.lock().take();
            let subscriptions = entry.subscriptions.clone();
            // Dropping the last sender closes the channel; the worker drains
            // the queue, delivers what was pending, and exits.
            drop(entry);
            if let Some(handle) = worker {
                let _ = handle.await;
            }
            subscriptions.write().clear();
        }

        debug!("event bus shut down");
    }

    /// Get or lazily create the dispatcher for a topic.
    fn entry(&self, topic: Topic) -> Arc<TopicEntry> {
        if let Some(entry) = self.topics.read().get(&topic) {
            return entry.clone();
        }

        let mut topics = self.topics.write();
        topics
            .entry(topic)
            .or_insert_with(|| {
                let (sender, receiver) = mpsc::unbounded_channel();
                let subscriptions: Arc<RwLock<Vec<Subscription>>> = Arc::new(RwLock::new(Vec::new()));
                let worker = tokio::spawn(dispatch_loop(topic, receiver, subscriptions.clone()));

                Arc::new(TopicEntry {
                    subscriptions,
                    sender,
                    worker: Mutex::new(Some(worker)),
                })
            })
            .clone()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-topic dispatcher: drains the queue in publish order and awaits each
/// handler sequentially so per-topic ordering holds.
async fn dispatch_loop(
    topic: Topic,
    mut receiver: mpsc::UnboundedReceiver<Event>,
    subscriptions: Arc<RwLock<Vec<Subscription>>>,
) {
    while let Some(event) = receiver.recv().await {
        // Snapshot the handler list before awaiting anything.
        let handlers: Vec<EventHandler> = subscriptions.read().iter().map(|s| s.handler.clone()).collect();

        for handler in handlers {
            if let Err(error) = handler(event.clone()).await {
                warn!(topic = %topic, error = %error, "event handler failed; continuing delivery");
            }
        }
    }
}
