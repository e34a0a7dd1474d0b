// =============================================================================
// Strategy Manager — finite state machines over indicator values
// =============================================================================
//
// Each strategy walks the 5-state model:
//
//   Idle ──enable──▶ Monitoring
//   Monitoring ──S1 == TRUE──▶ SignalDetected
//   SignalDetected ──O1 == TRUE──▶ Monitoring          (cancel)
//   SignalDetected ──Z1 == TRUE──▶ PositionActive      (entry, emits S1)
//   PositionActive ──ZE1 == TRUE──▶ Closing            (emits ZE1)
//   PositionActive ──E1 == TRUE──▶ Closing             (emits E1)
//   Closing ──position closed──▶ Monitoring
//   any ──disable──▶ Idle
//
// Condition groups evaluate to a trinary outcome. An EMPTY group is FALSE:
// a group with no positive evidence must never authorize a transition. A
// condition whose indicator key is absent is PENDING, not FALSE, so warm-up
// never triggers premature transitions.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::event_bus::{
    Event, EventBus, IndicatorUpdate, PositionEvent, PriceUpdate, Priority, Signal, SignalType,
    SubscriptionId, Topic,
};
use crate::types::OrderSide;

// =============================================================================
// Conditions
// =============================================================================

/// Trinary outcome of condition evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionOutcome {
    True,
    False,
    /// A referenced indicator has not produced a value yet.
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionOperator {
    Gte,
    Lte,
    Gt,
    Lt,
    Eq,
    Ne,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    #[serde(default)]
    pub name: String,
    /// Indicator key looked up in the strategy's current values map.
    pub condition_type: String,
    pub operator: ConditionOperator,
    pub value: f64,
}

impl Condition {
    /// Evaluate against the current indicator values. A missing key is
    /// PENDING.
    pub fn evaluate(&self, values: &HashMap<String, f64>) -> ConditionOutcome {
        let Some(current) = values.get(&self.condition_type) else {
            return ConditionOutcome::Pending;
        };

        let satisfied = match self.operator {
            ConditionOperator::Gte => *current >= self.value,
            ConditionOperator::Lte => *current <= self.value,
            ConditionOperator::Gt => *current > self.value,
            ConditionOperator::Lt => *current < self.value,
            ConditionOperator::Eq => *current == self.value,
            ConditionOperator::Ne => *current != self.value,
        };

        if satisfied {
            ConditionOutcome::True
        } else {
            ConditionOutcome::False
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConditionGroup {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub require_all: bool,
}

impl ConditionGroup {
    /// Trinary fold over the member conditions.
    ///
    /// Empty group: FALSE regardless of `require_all`.
    /// `require_all`: any FALSE wins, then any PENDING, else TRUE.
    /// Otherwise:    any TRUE wins, then any PENDING, else FALSE.
    pub fn evaluate(&self, values: &HashMap<String, f64>) -> ConditionOutcome {
        if self.conditions.is_empty() {
            return ConditionOutcome::False;
        }

        let outcomes: Vec<ConditionOutcome> = self.conditions.iter().map(|c| c.evaluate(values)).collect();

        if self.require_all {
            if outcomes.contains(&ConditionOutcome::False) {
                ConditionOutcome::False
            } else if outcomes.contains(&ConditionOutcome::Pending) {
                ConditionOutcome::Pending
            } else {
                ConditionOutcome::True
            }
        } else if outcomes.contains(&ConditionOutcome::True) {
            ConditionOutcome::True
        } else if outcomes.contains(&ConditionOutcome::Pending) {
            ConditionOutcome::Pending
        } else {
            ConditionOutcome::False
        }
    }
}

// =============================================================================
// Strategy configuration
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyDirection {
    Long,
    Short,
}

impl Default for StrategyDirection {
    fn default() -> Self {
        Self::Long
    }
}

impl StrategyDirection {
    /// Side used for entry orders.
    pub fn entry_side(&self) -> OrderSide {
        match self {
            Self::Long => OrderSide::Buy,
            Self::Short => OrderSide::Short,
        }
    }

    /// Side used for close orders.
    pub fn close_side(&self) -> OrderSide {
        match self {
            Self::Long => OrderSide::Sell,
            Self::Short => OrderSide::Cover,
        }
    }
}

fn default_base_position_pct() -> f64 {
    2.0
}

fn default_max_position_pct() -> f64 {
    5.0
}

fn default_min_position_pct() -> f64 {
    0.5
}

/// Position sizing bounds in percent of account balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalLimits {
    #[serde(default = "default_base_position_pct")]
    pub base_position_pct: f64,
    #[serde(default = "default_max_position_pct")]
    pub max_position_pct: f64,
    #[serde(default = "default_min_position_pct")]
    pub min_position_pct: f64,
}

impl Default for GlobalLimits {
    fn default() -> Self {
        Self {
            base_position_pct: default_base_position_pct(),
            max_position_pct: default_max_position_pct(),
            min_position_pct: default_min_position_pct(),
        }
    }
}

impl GlobalLimits {
    /// Base position percentage clamped into `[min, max]`.
    pub fn position_size_pct(&self) -> f64 {
        self.base_position_pct
            .clamp(self.min_position_pct, self.max_position_pct)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub strategy_name: String,
    pub symbol: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub direction: StrategyDirection,
    #[serde(default)]
    pub signal_detection: ConditionGroup,
    #[serde(default)]
    pub signal_cancellation: ConditionGroup,
    #[serde(default)]
    pub entry_conditions: ConditionGroup,
    #[serde(default)]
    pub close_order_detection: ConditionGroup,
    #[serde(default)]
    pub emergency_exit: ConditionGroup,
    #[serde(default)]
    pub global_limits: GlobalLimits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StrategyState {
    Idle,
    Monitoring,
    SignalDetected,
    PositionActive,
    Closing,
}

impl std::fmt::Display for StrategyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Monitoring => write!(f, "Monitoring"),
            Self::SignalDetected => write!(f, "SignalDetected"),
            Self::PositionActive => write!(f, "PositionActive"),
            Self::Closing => write!(f, "Closing"),
        }
    }
}

struct StrategyRuntime {
    config: StrategyConfig,
    state: StrategyState,
    indicator_values: HashMap<String, f64>,
}

// =============================================================================
// StrategyManager
// =============================================================================

pub struct StrategyManager {
    bus: Arc<EventBus>,
    strategies: Mutex<HashMap<String, StrategyRuntime>>,
    last_prices: Mutex<HashMap<String, f64>>,
    subscriptions: Mutex<Vec<(Topic, SubscriptionId)>>,
    /// Account balance used to convert position percentages into quantities.
    account_balance: f64,
}

impl StrategyManager {
    pub fn new(bus: Arc<EventBus>, account_balance: f64) -> Self {
        Self {
            bus,
            strategies: Mutex::new(HashMap::new()),
            last_prices: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(Vec::new()),
            account_balance,
        }
    }

    /// Subscribe to indicator, price, and position-closed events.
    pub fn start(self: &Arc<Self>) {
        let manager = self.clone();
        let id = self.bus.subscribe(
            Topic::IndicatorUpdated,
            Priority::Normal,
            Arc::new(move |event| {
                let manager = manager.clone();
                async move {
                    if let Event::IndicatorUpdated(update) = event {
                        manager.on_indicator_updated(&update);
                    }
                    Ok(())
                }
                .boxed()
            }),
        );
        self.subscriptions.lock().push((Topic::IndicatorUpdated, id));

        let manager = self.clone();
        let id = self.bus.subscribe(
            Topic::PriceUpdate,
            Priority::Normal,
            Arc::new(move |event| {
                let manager = manager.clone();
                async move {
                    if let Event::PriceUpdate(update) = event {
                        manager.on_price_update(&update);
                    }
                    Ok(())
                }
                .boxed()
            }),
        );
        self.subscriptions.lock().push((Topic::PriceUpdate, id));

        let manager = self.clone();
        let id = self.bus.subscribe(
            Topic::PositionClosed,
            Priority::Normal,
            Arc::new(move |event| {
                let manager = manager.clone();
                async move {
                    if let Event::PositionClosed(closed) = event {
                        manager.on_position_closed(&closed);
                    }
                    Ok(())
                }
                .boxed()
            }),
        );
        self.subscriptions.lock().push((Topic::PositionClosed, id));

        info!("strategy manager started");
    }

    /// Unsubscribe from the bus.
    pub fn shutdown(&self) {
        for (topic, id) in self.subscriptions.lock().drain(..) {
            self.bus.unsubscribe(topic, id);
        }
        info!("strategy manager shut down");
    }

    /// Register a strategy. Enabled strategies start Monitoring, disabled
    /// ones Idle.
    pub fn register(&self, config: StrategyConfig) {
        let state = if config.enabled {
            StrategyState::Monitoring
        } else {
            StrategyState::Idle
        };

        info!(
            strategy = %config.strategy_name,
            symbol = %config.symbol,
            state = %state,
            "strategy registered"
        );

        self.strategies.lock().insert(
            config.strategy_name.clone(),
            StrategyRuntime {
                config,
                state,
                indicator_values: HashMap::new(),
            },
        );
    }

    pub fn enable(&self, strategy_name: &str) {
        let mut strategies = self.strategies.lock();
        if let Some(runtime) = strategies.get_mut(strategy_name) {
            runtime.config.enabled = true;
            if runtime.state == StrategyState::Idle {
                runtime.state = StrategyState::Monitoring;
                info!(strategy = strategy_name, "strategy enabled");
            }
        }
    }

    /// Disable from any state back to Idle.
    pub fn disable(&self, strategy_name: &str) {
        let mut strategies = self.strategies.lock();
        if let Some(runtime) = strategies.get_mut(strategy_name) {
            runtime.config.enabled = false;
            runtime.state = StrategyState::Idle;
            info!(strategy = strategy_name, "strategy disabled");
        }
    }

    pub fn current_state(&self, strategy_name: &str) -> Option<StrategyState> {
        self.strategies.lock().get(strategy_name).map(|r| r.state)
    }

    fn on_price_update(&self, update: &PriceUpdate) {
        self.last_prices.lock().insert(update.symbol.clone(), update.price);
    }

    /// Fold an indicator update into each matching strategy and evaluate the
    /// group relevant to its current state.
    pub fn on_indicator_updated(&self, update: &IndicatorUpdate) {
        let last_price = self.last_prices.lock().get(&update.symbol).copied();
        let mut signals: Vec<Signal> = Vec::new();

        {
            let mut strategies = self.strategies.lock();
            for runtime in strategies.values_mut() {
                if runtime.config.symbol != update.symbol {
                    continue;
                }

                runtime
                    .indicator_values
                    .insert(update.indicator_id.clone(), update.value);

                if let Some(signal) = Self::advance(runtime, last_price, self.account_balance) {
                    signals.push(signal);
                }
            }
        }

        // Publish outside the lock.
        for signal in signals {
            self.bus.publish(Event::SignalGenerated(signal));
        }
    }

    /// A closed position returns the strategy from Closing to Monitoring.
    pub fn on_position_closed(&self, event: &PositionEvent) {
        let mut strategies = self.strategies.lock();
        for runtime in strategies.values_mut() {
            if runtime.config.symbol == event.symbol && runtime.state == StrategyState::Closing {
                runtime.state = StrategyState::Monitoring;
                info!(
                    strategy = %runtime.config.strategy_name,
                    "position closed; back to monitoring"
                );
            }
        }
    }

    /// Run one FSM step. Returns a signal to emit when a transition
    /// produces one (entry / close / emergency).
    fn advance(runtime: &mut StrategyRuntime, last_price: Option<f64>, account_balance: f64) -> Option<Signal> {
        let values = &runtime.indicator_values;
        let config = &runtime.config;

        match runtime.state {
            StrategyState::Idle => None,

            StrategyState::Monitoring => {
                if config.signal_detection.evaluate(values) == ConditionOutcome::True {
                    runtime.state = StrategyState::SignalDetected;
                    debug!(strategy = %config.strategy_name, "signal detected");
                }
                None
            }

            StrategyState::SignalDetected => {
                // Cancellation first: an empty O1 group is FALSE and never
                // cancels.
                if config.signal_cancellation.evaluate(values) == ConditionOutcome::True {
                    runtime.state = StrategyState::Monitoring;
                    debug!(strategy = %config.strategy_name, "signal cancelled");
                    return None;
                }

                if config.entry_conditions.evaluate(values) == ConditionOutcome::True {
                    let Some(price) = last_price.filter(|p| *p > 0.0) else {
                        warn!(
                            strategy = %config.strategy_name,
                            "entry conditions met but no market price yet; holding"
                        );
                        return None;
                    };

                    let position_pct = config.global_limits.position_size_pct();
                    let quantity = account_balance * (position_pct / 100.0) / price;

                    runtime.state = StrategyState::PositionActive;
                    info!(
                        strategy = %config.strategy_name,
                        symbol = %config.symbol,
                        price,
                        quantity,
                        position_pct,
                        "entry conditions met"
                    );

                    return Some(Signal {
                        strategy_name: config.strategy_name.clone(),
                        symbol: config.symbol.clone(),
                        signal_type: SignalType::S1,
                        side: config.direction.entry_side(),
                        quantity,
                        price,
                        reason: None,
                    });
                }
                None
            }

            StrategyState::PositionActive => {
                let close = config.close_order_detection.evaluate(values) == ConditionOutcome::True;
                let emergency = config.emergency_exit.evaluate(values) == ConditionOutcome::True;

                if !close && !emergency {
                    return None;
                }

                let price = last_price.unwrap_or(0.0);
                runtime.state = StrategyState::Closing;

                let signal_type = if close { SignalType::Ze1 } else { SignalType::E1 };
                info!(
                    strategy = %config.strategy_name,
                    signal_type = %signal_type,
                    "close conditions met"
                );

                Some(Signal {
                    strategy_name: config.strategy_name.clone(),
                    symbol: config.symbol.clone(),
                    signal_type,
                    side: config.direction.close_side(),
                    // The order manager closes the full open position.
                    quantity: 0.0,
                    price,
                    reason: None,
                })
            }

            StrategyState::Closing => None,
        }
    }
}
