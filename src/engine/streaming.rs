// =============================================================================
// Streaming Indicator Engine — live indicator instances over market data
// =============================================================================
//
// Owns the per-session indicator instances and the per-symbol market
// histories. Subscribes to `market.price_update`; every update appends to
// the history rings and recomputes the event-driven indicators bound to that
// symbol. Time-driven indicators recompute on a single tick loop that sleeps
// until the next scheduled instance is due; missed ticks collapse (the loop
// reschedules from `now`, never builds a backlog).
//
// Instances deduplicate on `(variant_id, canonical parameters)`. History
// retention per symbol follows the largest lookback of the indicators bound
// to it, times a safety factor.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::windows;
use crate::error::EngineError;
use crate::event_bus::{Event, EventBus, IndicatorUpdate, PriceUpdate, Priority, SubscriptionId, Topic};
use crate::indicators::registry::AlgorithmRegistry;
use crate::indicators::{validate_and_coerce, IndicatorParameters};
use crate::market_data::MarketHistory;
use crate::types::{epoch_now, normalize_timestamp, OrderBookSnapshot};
use crate::variants::IndicatorVariant;

/// History retention = max window lookback * safety factor + pad.
const RETENTION_SAFETY_FACTOR: f64 = 1.25;
const RETENTION_PAD_SECS: f64 = 60.0;

/// Tick-loop sleep when no time-driven indicator is scheduled.
const IDLE_TICK_MILLIS: u64 = 200;

/// A runtime binding of a variant to a `(session, symbol)` pair.
#[derive(Debug, Clone)]
pub struct IndicatorInstance {
    pub indicator_id: String,
    pub session_id: String,
    pub symbol: String,
    pub variant_id: String,
    pub indicator_type: String,
    pub parameters: IndicatorParameters,
    pub refresh_interval: f64,
    pub time_driven: bool,
    pub last_value: Option<f64>,
    pub last_timestamp: Option<f64>,
    /// Monotonic creation sequence; newest wins during duplicate cleanup.
    creation_seq: u64,
}

impl IndicatorInstance {
    fn dedup_key(&self) -> (String, String) {
        (self.variant_id.clone(), self.parameters.canonical_json())
    }
}

/// Time-driven schedule entry: `(due_at_millis, indicator_id)` behind
/// `Reverse` for a min-heap. Stale entries are dropped lazily on pop.
type ScheduleEntry = Reverse<(i64, String)>;

pub struct StreamingIndicatorEngine {
    bus: Arc<EventBus>,
    registry: Arc<AlgorithmRegistry>,
    history: Arc<MarketHistory>,

    variants: RwLock<HashMap<String, IndicatorVariant>>,
    indicators: Mutex<HashMap<String, IndicatorInstance>>,
    session_index: Mutex<HashMap<(String, String), HashSet<String>>>,
    event_driven_index: Mutex<HashMap<String, HashSet<String>>>,
    schedule: Mutex<BinaryHeap<ScheduleEntry>>,

    creation_seq: AtomicU64,
    subscriptions: Mutex<Vec<(Topic, SubscriptionId)>>,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    tick_task: Mutex<Option<JoinHandle<()>>>,
}

impl StreamingIndicatorEngine {
    pub fn new(bus: Arc<EventBus>, registry: Arc<AlgorithmRegistry>, history: Arc<MarketHistory>) -> Self {
        Self {
            bus,
            registry,
            history,
            variants: RwLock::new(HashMap::new()),
            indicators: Mutex::new(HashMap::new()),
            session_index: Mutex::new(HashMap::new()),
            event_driven_index: Mutex::new(HashMap::new()),
            schedule: Mutex::new(BinaryHeap::new()),
            creation_seq: AtomicU64::new(0),
            subscriptions: Mutex::new(Vec::new()),
            shutdown_tx: Mutex::new(None),
            tick_task: Mutex::new(None),
        }
    }

    // =========================================================================
    // Variant cache
    // =========================================================================

    /// Load or refresh one variant (engine cache, refreshed on CRUD
    /// signals).
    pub fn upsert_variant(&self, variant: IndicatorVariant) {
        self.variants.write().insert(variant.id.clone(), variant);
    }

    pub fn remove_variant(&self, variant_id: &str) {
        self.variants.write().remove(variant_id);
    }

    /// Replace the whole variant cache, typically at startup from
    /// `VariantRepository::load_all`.
    pub fn load_variants(&self, variants: Vec<IndicatorVariant>) {
        let mut cache = self.variants.write();
        cache.clear();
        for variant in variants {
            cache.insert(variant.id.clone(), variant);
        }
        info!(count = cache.len(), "variants loaded into streaming engine");
    }

    // =========================================================================
    // Session indicator management
    // =========================================================================

    /// Bind a variant to `(session, symbol)` with optional parameter
    /// overrides. Deduplicates on `(variant_id, canonical parameters)`:
    /// an equivalent existing instance is returned instead of a new one.
    pub fn add_indicator_to_session(
        &self,
        session_id: &str,
        symbol: &str,
        variant_id: &str,
        parameter_overrides: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<String, EngineError> {
        let variant = self
            .variants
            .read()
            .get(variant_id)
            .cloned()
            .ok_or_else(|| EngineError::VariantNotFound(variant_id.to_string()))?;

        let algorithm = self
            .registry
            .get(&variant.base_indicator_type)
            .ok_or_else(|| EngineError::UnknownAlgorithm {
                indicator_type: variant.base_indicator_type.clone(),
                available: self.registry.indicator_types(),
            })?;

        // Merge: variant parameters as the base, validated overrides on top.
        let mut merged = match variant.parameters.as_value() {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        if let Some(overrides) = parameter_overrides {
            let definitions = algorithm.parameters();
            for (name, value) in overrides {
                let Some(definition) = definitions.iter().find(|d| d.name == name) else {
                    return Err(EngineError::InvalidParameter {
                        name,
                        reason: format!("unknown override for {}", variant.base_indicator_type),
                    });
                };
                merged.insert(name, validate_and_coerce(&value, definition)?);
            }
        }
        let parameters = IndicatorParameters::new(merged);

        // Window specs validate the merged configuration and size retention.
        let specs = algorithm.window_specs(&parameters)?;
        let max_lookback = specs.iter().map(|s| s.t1).fold(0.0_f64, f64::max);
        let needed_retention = max_lookback * RETENTION_SAFETY_FACTOR + RETENTION_PAD_SECS;
        if needed_retention > self.history.retention_for(symbol) {
            self.history.set_retention(symbol, needed_retention);
        }

        let refresh_interval = algorithm.refresh_interval(&parameters);
        let time_driven = algorithm.is_time_driven();

        let instance = IndicatorInstance {
            indicator_id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            symbol: symbol.to_string(),
            variant_id: variant_id.to_string(),
            indicator_type: variant.base_indicator_type.clone(),
            parameters,
            refresh_interval,
            time_driven,
            last_value: None,
            last_timestamp: None,
            creation_seq: self.creation_seq.fetch_add(1, Ordering::SeqCst),
        };

        let session_key = (session_id.to_string(), symbol.to_string());
        let dedup_key = instance.dedup_key();

        let mut indicators = self.indicators.lock();
        let mut session_index = self.session_index.lock();

        // Dedup against instances already bound to this (session, symbol).
        if let Some(ids) = session_index.get(&session_key) {
            for id in ids {
                if let Some(existing) = indicators.get(id) {
                    if existing.dedup_key() == dedup_key {
                        debug!(
                            indicator_id = %existing.indicator_id,
                            variant_id,
                            "duplicate indicator request; reusing existing instance"
                        );
                        return Ok(existing.indicator_id.clone());
                    }
                }
            }
        }

        let indicator_id = instance.indicator_id.clone();

        session_index
            .entry(session_key)
            .or_default()
            .insert(indicator_id.clone());

        if time_driven {
            let due = (epoch_now() * 1000.0) as i64;
            self.schedule.lock().push(Reverse((due, indicator_id.clone())));
        } else {
            self.event_driven_index
                .lock()
                .entry(symbol.to_string())
                .or_default()
                .insert(indicator_id.clone());
        }

        info!(
            indicator_id = %indicator_id,
            session_id,
            symbol,
            variant_id,
            indicator_type = %instance.indicator_type,
            refresh_interval,
            time_driven,
            "indicator added to session"
        );

        indicators.insert(indicator_id.clone(), instance);
        Ok(indicator_id)
    }

    /// Remove one indicator instance from a session.
    pub fn remove_indicator_from_session(
        &self,
        session_id: &str,
        symbol: &str,
        indicator_id: &str,
    ) -> Result<(), EngineError> {
        let mut indicators = self.indicators.lock();
        let Some(instance) = indicators.get(indicator_id) else {
            return Err(EngineError::IndicatorNotFound(indicator_id.to_string()));
        };
        if instance.session_id != session_id || instance.symbol != symbol {
            return Err(EngineError::IndicatorNotFound(indicator_id.to_string()));
        }

        indicators.remove(indicator_id);

        let session_key = (session_id.to_string(), symbol.to_string());
        if let Some(ids) = self.session_index.lock().get_mut(&session_key) {
            ids.remove(indicator_id);
        }
        if let Some(ids) = self.event_driven_index.lock().get_mut(symbol) {
            ids.remove(indicator_id);
        }
        // Stale schedule entries are dropped lazily by the tick loop.

        info!(indicator_id, session_id, symbol, "indicator removed from session");
        Ok(())
    }

    /// Instances bound to `(session, symbol)`, newest first.
    pub fn list_session_indicators(&self, session_id: &str, symbol: &str) -> Vec<IndicatorInstance> {
        let indicators = self.indicators.lock();
        let session_key = (session_id.to_string(), symbol.to_string());

        let mut result: Vec<IndicatorInstance> = self
            .session_index
            .lock()
            .get(&session_key)
            .map(|ids| ids.iter().filter_map(|id| indicators.get(id)).cloned().collect())
            .unwrap_or_default();

        result.sort_by(|a, b| b.creation_seq.cmp(&a.creation_seq));
        result
    }

    /// Drop duplicate instances per `(variant_id, parameters)` key, keeping
    /// the most recently created. Returns the number removed.
    pub fn cleanup_duplicates(&self, session_id: &str, symbol: &str) -> usize {
        let session_key = (session_id.to_string(), symbol.to_string());
        let mut indicators = self.indicators.lock();
        let mut session_index = self.session_index.lock();
        let mut event_index = self.event_driven_index.lock();

        let Some(ids) = session_index.get_mut(&session_key) else {
            return 0;
        };

        // Newest instance per dedup key survives.
        let mut keep: HashMap<(String, String), (u64, String)> = HashMap::new();
        for id in ids.iter() {
            if let Some(instance) = indicators.get(id) {
                let entry = keep.entry(instance.dedup_key()).or_insert((instance.creation_seq, id.clone()));
                if instance.creation_seq > entry.0 {
                    *entry = (instance.creation_seq, id.clone());
                }
            }
        }

        let survivors: HashSet<String> = keep.into_values().map(|(_, id)| id).collect();
        let doomed: Vec<String> = ids.iter().filter(|id| !survivors.contains(*id)).cloned().collect();

        for id in &doomed {
            indicators.remove(id);
            ids.remove(id);
            if let Some(symbol_ids) = event_index.get_mut(symbol) {
                symbol_ids.remove(id);
            }
        }

        if !doomed.is_empty() {
            info!(session_id, symbol, removed = doomed.len(), "duplicate indicators cleaned up");
        }

        doomed.len()
    }

    // =========================================================================
    // Market data ingress
    // =========================================================================

    /// Handle one price update: append to history, recompute the
    /// event-driven indicators bound to the symbol.
    pub fn on_price_update(&self, update: &PriceUpdate) {
        let timestamp = normalize_timestamp(update.timestamp);
        self.history
            .record_tick(&update.symbol, timestamp, update.price, update.volume);

        let ids: Vec<String> = self
            .event_driven_index
            .lock()
            .get(&update.symbol)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();

        for indicator_id in ids {
            self.compute_and_publish(&indicator_id, timestamp);
        }
    }

    /// Record an order-book snapshot into the symbol's history.
    pub fn on_orderbook_snapshot(&self, symbol: &str, snapshot: OrderBookSnapshot) {
        self.history.record_orderbook(symbol, snapshot);
    }

    // =========================================================================
    // Calculation
    // =========================================================================

    /// Recompute one instance at `target_ts`; publish `indicator.updated`
    /// when the result is non-nil.
    fn compute_and_publish(&self, indicator_id: &str, target_ts: f64) {
        let (symbol, indicator_type, parameters) = {
            let indicators = self.indicators.lock();
            let Some(instance) = indicators.get(indicator_id) else {
                return;
            };
            (
                instance.symbol.clone(),
                instance.indicator_type.clone(),
                instance.parameters.clone(),
            )
        };

        let Some(algorithm) = self.registry.get(&indicator_type) else {
            warn!(indicator_id, indicator_type = %indicator_type, "algorithm vanished from registry");
            return;
        };

        let specs = match algorithm.window_specs(&parameters) {
            Ok(specs) => specs,
            Err(error) => {
                warn!(indicator_id, error = %error, "window spec rejected at calculation time");
                return;
            }
        };

        let prices = self.history.price_series(&symbol);
        let volumes = self.history.volume_series(&symbol);
        let orderbooks = self.history.orderbook_series(&symbol);

        let assembled = windows::assemble(&prices, &volumes, &orderbooks, target_ts, &specs);
        let value = algorithm.calculate_from_windows(&assembled, &parameters);

        if let Some(value) = value {
            {
                let mut indicators = self.indicators.lock();
                if let Some(instance) = indicators.get_mut(indicator_id) {
                    instance.last_value = Some(value);
                    instance.last_timestamp = Some(target_ts);
                }
            }

            self.bus.publish(Event::IndicatorUpdated(IndicatorUpdate {
                indicator_id: indicator_id.to_string(),
                symbol,
                value,
                timestamp: target_ts,
            }));
        }
    }

    /// Process every time-driven indicator due at or before `now`, then
    /// reschedule each from `now` (missed ticks collapse; no backlog).
    pub fn process_due(&self, now: f64) -> usize {
        let now_ms = (now * 1000.0) as i64;

        let mut candidates: Vec<String> = Vec::new();
        {
            let mut schedule = self.schedule.lock();
            while let Some(Reverse((due_ms, _))) = schedule.peek() {
                if *due_ms > now_ms {
                    break;
                }
                let Some(Reverse((_, indicator_id))) = schedule.pop() else {
                    break;
                };
                candidates.push(indicator_id);
            }
        }

        // Lazy removal: entries whose instance is gone are dropped here.
        let due: Vec<String> = {
            let indicators = self.indicators.lock();
            candidates
                .into_iter()
                .filter(|id| indicators.get(id).map(|i| i.time_driven).unwrap_or(false))
                .collect()
        };

        for indicator_id in &due {
            self.compute_and_publish(indicator_id, now);

            let refresh = {
                let indicators = self.indicators.lock();
                indicators.get(indicator_id).map(|i| i.refresh_interval)
            };
            if let Some(refresh) = refresh {
                let next_due = now_ms + (refresh * 1000.0) as i64;
                self.schedule.lock().push(Reverse((next_due, indicator_id.clone())));
            }
        }

        due.len()
    }

    /// Delay until the earliest scheduled instance, if any.
    fn next_due_delay(&self, now: f64) -> Option<std::time::Duration> {
        let schedule = self.schedule.lock();
        schedule.peek().map(|Reverse((due_ms, _))| {
            let now_ms = (now * 1000.0) as i64;
            std::time::Duration::from_millis((due_ms - now_ms).max(0) as u64)
        })
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Subscribe to price updates and start the time-driven tick loop.
    pub fn start(self: &Arc<Self>) {
        let engine = self.clone();
        let id = self.bus.subscribe(
            Topic::PriceUpdate,
            Priority::High,
            Arc::new(move |event| {
                let engine = engine.clone();
                async move {
                    if let Event::PriceUpdate(update) = event {
                        engine.on_price_update(&update);
                    }
                    Ok(())
                }
                .boxed()
            }),
        );
        self.subscriptions.lock().push((Topic::PriceUpdate, id));

        let (tx, mut rx) = watch::channel(false);
        *self.shutdown_tx.lock() = Some(tx);

        let engine = self.clone();
        let task = tokio::spawn(async move {
            loop {
                let now = epoch_now();
                let sleep_for = engine
                    .next_due_delay(now)
                    .unwrap_or(std::time::Duration::from_millis(IDLE_TICK_MILLIS));

                tokio::select! {
                    _ = tokio::time::sleep(sleep_for) => {
                        engine.process_due(epoch_now());
                    }
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("time-driven tick loop stopped");
        });
        *self.tick_task.lock() = Some(task);

        info!("streaming indicator engine started");
    }

    /// Unsubscribe everything and stop the tick loop.
    pub async fn shutdown(&self) {
        for (topic, id) in self.subscriptions.lock().drain(..) {
            self.bus.unsubscribe(topic, id);
        }

        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(true);
        }
        let task = self.tick_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }

        info!("streaming indicator engine shut down");
    }
}
