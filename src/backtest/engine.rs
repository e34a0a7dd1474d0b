// =============================================================================
// Backtest Engine — candle replay through signals, orders, and equity
// =============================================================================
//
// Drives historical candles in ascending time order through exit rules,
// entry evaluation, and the deterministic order manager, recording an equity
// curve and broadcasting throttled progress on the event bus.
//
// Evaluation policy: the built-in inline evaluator (price momentum and
// volume surge) generates entries; exits come from stop-loss / take-profit
// rules against the position's average price. A caller wanting full
// strategy-manager semantics wires the manager onto the same bus and feeds
// it replayed indicator streams instead.
//
// Any failure inside the run is caught: the session is marked FAILED, a
// `backtest.failed` event is published, and a terminal result is returned.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::backtest::order_manager::{BacktestOrderManager, OrderKind, PositionRecord};
use crate::error::EngineError;
use crate::event_bus::{
    BacktestCompletedEvent, BacktestFailedEvent, BacktestProgressEvent, Event, EventBus, SignalType,
};
use crate::store::{
    now_naive_utc, BacktestTradeRow, Candle, EquityPointRow, SessionStatusPatch, TimeSeriesStore,
};
use crate::types::{CancelToken, OrderSide};

// =============================================================================
// Status / config / progress / result
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum BacktestStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl std::fmt::Display for BacktestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BacktestConfig {
    pub session_id: String,
    pub strategy_id: String,
    pub symbol: String,
    /// Epoch seconds.
    pub start_ts: f64,
    pub end_ts: f64,
    pub acceleration_factor: i64,
    pub initial_balance: f64,
    pub stop_loss_percent: f64,
    pub take_profit_percent: f64,
    pub timeframe: String,
}

/// A close/entry intent synthesized by the inline evaluator.
#[derive(Debug, Clone)]
struct SyntheticSignal {
    signal_type: SignalType,
    side: OrderSide,
    price: f64,
    quantity: f64,
    reason: String,
}

#[derive(Debug, Clone)]
pub struct BacktestResult {
    pub session_id: String,
    pub symbol: String,
    pub strategy_id: String,
    pub final_pnl: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub max_drawdown_pct: f64,
    pub initial_balance: f64,
    pub final_balance: f64,
    pub equity_curve: Vec<EquityPointRow>,
    pub trades: Vec<BacktestTradeRow>,
    pub duration_seconds: f64,
    pub candles_processed: usize,
    pub signals_generated: usize,
    pub status: BacktestStatus,
    pub error_message: Option<String>,
}

/// Mutable state threaded through one run.
struct RunState {
    current_pnl: f64,
    total_trades: usize,
    signals_generated: usize,
    trades: Vec<BacktestTradeRow>,
    equity_curve: Vec<EquityPointRow>,
    peak_equity: f64,
    max_drawdown_pct: f64,
    equity: f64,
    progress_pct: f64,
    current_timestamp: Option<f64>,
    open_positions: usize,
    last_broadcast: Option<Instant>,
}

impl RunState {
    fn new(initial_balance: f64) -> Self {
        Self {
            current_pnl: 0.0,
            total_trades: 0,
            signals_generated: 0,
            trades: Vec::new(),
            equity_curve: Vec::new(),
            peak_equity: initial_balance,
            max_drawdown_pct: 0.0,
            equity: initial_balance,
            progress_pct: 0.0,
            current_timestamp: None,
            open_positions: 0,
            last_broadcast: None,
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

pub struct BacktestEngine {
    session_id: String,
    store: Arc<dyn TimeSeriesStore>,
    bus: Arc<EventBus>,
    broadcast_interval: f64,
    cancel: CancelToken,
    running: AtomicBool,
}

impl BacktestEngine {
    pub fn new(
        session_id: impl Into<String>,
        store: Arc<dyn TimeSeriesStore>,
        bus: Arc<EventBus>,
        broadcast_interval: f64,
    ) -> Self {
        let session_id = session_id.into();
        info!(session_id = %session_id, broadcast_interval, "backtest engine initialized");
        Self {
            session_id,
            store,
            bus,
            broadcast_interval,
            cancel: CancelToken::new(),
            running: AtomicBool::new(false),
        }
    }

    /// Request a graceful stop; the run aborts at the next candle.
    pub fn stop(&self) {
        self.cancel.cancel();
        info!(session_id = %self.session_id, "backtest stop requested");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Execute the backtest. Never fails outward: errors become a FAILED
    /// result plus a `backtest.failed` event.
    pub async fn run(&self) -> BacktestResult {
        let started = Instant::now();
        self.running.store(true, Ordering::SeqCst);

        let outcome = self.execute(started).await;
        self.running.store(false, Ordering::SeqCst);

        match outcome {
            Ok(result) => result,
            Err(error) => {
                let error_message = error.to_string();
                error!(session_id = %self.session_id, error = %error_message, "backtest failed");

                let patch = SessionStatusPatch {
                    status: BacktestStatus::Failed.to_string(),
                    error_message: Some(error_message.clone()),
                    completed_at: Some(now_naive_utc()),
                    ..Default::default()
                };
                if let Err(update_error) = self.store.update_backtest_session(&self.session_id, patch).await {
                    warn!(
                        session_id = %self.session_id,
                        error = %update_error,
                        "failed to record FAILED status"
                    );
                }

                self.bus.publish(Event::BacktestFailed(BacktestFailedEvent {
                    session_id: self.session_id.clone(),
                    error: error_message.clone(),
                }));

                BacktestResult {
                    session_id: self.session_id.clone(),
                    symbol: String::new(),
                    strategy_id: String::new(),
                    final_pnl: 0.0,
                    total_trades: 0,
                    winning_trades: 0,
                    losing_trades: 0,
                    win_rate: 0.0,
                    max_drawdown_pct: 0.0,
                    initial_balance: 0.0,
                    final_balance: 0.0,
                    equity_curve: Vec::new(),
                    trades: Vec::new(),
                    duration_seconds: started.elapsed().as_secs_f64(),
                    candles_processed: 0,
                    signals_generated: 0,
                    status: BacktestStatus::Failed,
                    error_message: Some(error_message),
                }
            }
        }
    }

    async fn execute(&self, started: Instant) -> Result<BacktestResult, EngineError> {
        // 1. Session configuration.
        let config = self.load_session_config().await?;

        // 2. Mark running.
        self.store
            .update_backtest_session(
                &self.session_id,
                SessionStatusPatch {
                    status: BacktestStatus::Running.to_string(),
                    progress_pct: Some(0.0),
                    ..Default::default()
                },
            )
            .await?;

        let mut state = RunState::new(config.initial_balance);

        // 3. Historical candles.
        let candles = self
            .store
            .ohlcv_resample(&config.symbol, &config.timeframe, config.start_ts, config.end_ts)
            .await?;

        if candles.is_empty() {
            return Err(EngineError::InsufficientData(format!(
                "no historical data for {} in [{}, {}]",
                config.symbol, config.start_ts, config.end_ts
            )));
        }

        info!(
            session_id = %self.session_id,
            candle_count = candles.len(),
            first_candle = candles[0].timestamp,
            last_candle = candles[candles.len() - 1].timestamp,
            "historical data loaded"
        );

        // 4. Order manager (zero slippage keeps backtests deterministic).
        let order_manager = Arc::new(BacktestOrderManager::new(self.bus.clone(), 0.0));
        order_manager.start();

        // 5. Strategy config; missing strategies fall back to the inline
        // evaluator's defaults.
        if self
            .store
            .fetch_strategy_config(&config.strategy_id)
            .await?
            .is_none()
        {
            warn!(
                strategy_id = %config.strategy_id,
                "strategy config not found; using inline evaluation defaults"
            );
        }

        // 6. Candle loop.
        let total_candles = candles.len();
        let mut candles_processed = 0usize;
        let mut volume_sum = 0.0;
        let mut volume_count = 0usize;
        let mut stopped = false;

        for candle in &candles {
            if self.cancel.is_cancelled() {
                info!(
                    session_id = %self.session_id,
                    candles_processed,
                    "stop requested; aborting candle loop"
                );
                stopped = true;
                break;
            }

            // a. Running volume average (incremental mean).
            volume_sum += candle.volume;
            volume_count += 1;
            let avg_volume = volume_sum / volume_count as f64;

            order_manager.mark_price(&candle.symbol, candle.close);

            // b. Exit rules on open positions.
            for position in order_manager.open_positions() {
                let Some(exit) = evaluate_exit_signal(candle, &position, &config) else {
                    continue;
                };

                let submitted = order_manager.submit_order(
                    &candle.symbol,
                    exit.side,
                    exit.quantity,
                    exit.price,
                    &config.strategy_id,
                    1.0,
                    OrderKind::Market,
                );

                if submitted.is_some() {
                    let pnl = realized_pnl(&position, exit.price, exit.quantity);
                    let trade = BacktestTradeRow {
                        trade_id: format!("trade_{}", uuid::Uuid::new_v4().simple()),
                        session_id: self.session_id.clone(),
                        symbol: candle.symbol.clone(),
                        order_type: exit.side.to_string(),
                        quantity: exit.quantity,
                        entry_price: position.average_price,
                        exit_price: Some(exit.price),
                        pnl,
                        entry_time: None,
                        exit_time: Some(candle.timestamp),
                        strategy_signal: exit.signal_type.to_string(),
                    };

                    debug!(
                        session_id = %self.session_id,
                        pnl,
                        reason = %exit.reason,
                        "exit executed"
                    );

                    if let Err(error) = self.store.insert_backtest_trade(&trade).await {
                        warn!(error = %error, "trade storage failed; continuing");
                    }

                    state.trades.push(trade);
                    state.current_pnl += pnl;
                    state.total_trades += 1;
                    state.signals_generated += 1;

                    self.broadcast_progress(&mut state, true);
                }
            }

            // c. Entry when flat.
            if order_manager.open_positions().is_empty() {
                if let Some(entry) = evaluate_entry_signal(candle, avg_volume, config.initial_balance) {
                    let submitted = order_manager.submit_order(
                        &candle.symbol,
                        entry.side,
                        entry.quantity,
                        entry.price,
                        &config.strategy_id,
                        1.0,
                        OrderKind::Market,
                    );
                    if submitted.is_some() {
                        state.signals_generated += 1;
                        debug!(session_id = %self.session_id, reason = %entry.reason, "entry executed");
                        self.broadcast_progress(&mut state, true);
                    }
                }
            }

            // d. Equity point.
            let positions = order_manager.open_positions();
            record_equity_point(&mut state, candle.timestamp, &positions, config.initial_balance);

            // e. Progress.
            candles_processed += 1;
            state.progress_pct = candles_processed as f64 / total_candles as f64 * 100.0;
            state.current_timestamp = Some(candle.timestamp);
            self.broadcast_progress(&mut state, false);
        }

        // 7. Close remaining positions at the final close.
        if let Some(last) = candles.last() {
            for position in order_manager.open_positions() {
                let side = if position.quantity > 0.0 {
                    OrderSide::Sell
                } else {
                    OrderSide::Cover
                };
                let quantity = position.position_size();

                let submitted = order_manager.submit_order(
                    &last.symbol,
                    side,
                    quantity,
                    last.close,
                    &config.strategy_id,
                    1.0,
                    OrderKind::Market,
                );

                if submitted.is_some() {
                    let pnl = realized_pnl(&position, last.close, quantity);
                    let trade = BacktestTradeRow {
                        trade_id: format!("trade_{}", uuid::Uuid::new_v4().simple()),
                        session_id: self.session_id.clone(),
                        symbol: last.symbol.clone(),
                        order_type: side.to_string(),
                        quantity,
                        entry_price: position.average_price,
                        exit_price: Some(last.close),
                        pnl,
                        entry_time: None,
                        exit_time: Some(last.timestamp),
                        strategy_signal: "CLOSE".into(),
                    };

                    if let Err(error) = self.store.insert_backtest_trade(&trade).await {
                        warn!(error = %error, "trade storage failed; continuing");
                    }

                    state.trades.push(trade);
                    state.current_pnl += pnl;
                    state.total_trades += 1;
                }
            }
        }

        // 8. Final metrics.
        let winning_trades = state.trades.iter().filter(|t| t.pnl > 0.0).count();
        let losing_trades = state.trades.iter().filter(|t| t.pnl < 0.0).count();
        let win_rate = if state.trades.is_empty() {
            0.0
        } else {
            winning_trades as f64 / state.trades.len() as f64
        };

        let status = if stopped {
            BacktestStatus::Stopped
        } else {
            BacktestStatus::Completed
        };

        let result = BacktestResult {
            session_id: self.session_id.clone(),
            symbol: config.symbol.clone(),
            strategy_id: config.strategy_id.clone(),
            final_pnl: state.current_pnl,
            total_trades: state.trades.len(),
            winning_trades,
            losing_trades,
            win_rate,
            max_drawdown_pct: state.max_drawdown_pct,
            initial_balance: config.initial_balance,
            final_balance: config.initial_balance + state.current_pnl,
            equity_curve: state.equity_curve.clone(),
            trades: state.trades.clone(),
            duration_seconds: started.elapsed().as_secs_f64(),
            candles_processed,
            signals_generated: state.signals_generated,
            status,
            error_message: None,
        };

        // 9. Terminal status.
        self.store
            .update_backtest_session(
                &self.session_id,
                SessionStatusPatch {
                    status: status.to_string(),
                    progress_pct: Some(100.0),
                    final_pnl: Some(result.final_pnl),
                    total_trades: Some(result.total_trades as i64),
                    win_rate: Some(result.win_rate),
                    completed_at: Some(now_naive_utc()),
                    ..Default::default()
                },
            )
            .await?;

        // 10. Equity curve, downsampled to every 10th point plus the last.
        self.store_equity_curve(&state.equity_curve).await;

        // 11. Final broadcasts.
        state.progress_pct = 100.0;
        self.broadcast_progress(&mut state, true);
        self.bus.publish(Event::BacktestCompleted(BacktestCompletedEvent {
            session_id: self.session_id.clone(),
            final_pnl: result.final_pnl,
            total_trades: result.total_trades,
            win_rate: result.win_rate,
            duration_seconds: result.duration_seconds,
        }));

        order_manager.stop();

        info!(
            session_id = %self.session_id,
            candles_processed,
            total_trades = result.total_trades,
            final_pnl = result.final_pnl,
            status = %status,
            "backtest finished"
        );

        Ok(result)
    }

    /// Session configuration from the store; `SessionNotFound` when absent.
    async fn load_session_config(&self) -> Result<BacktestConfig, EngineError> {
        let row = self
            .store
            .fetch_backtest_session(&self.session_id)
            .await?
            .ok_or_else(|| EngineError::SessionNotFound(self.session_id.clone()))?;

        let config = BacktestConfig {
            session_id: row.session_id,
            strategy_id: row.strategy_id,
            symbol: row.symbol,
            start_ts: row.start_date.and_utc().timestamp() as f64,
            end_ts: row.end_date.and_utc().timestamp() as f64,
            acceleration_factor: row.acceleration_factor,
            initial_balance: row.initial_balance,
            stop_loss_percent: 5.0,
            take_profit_percent: 10.0,
            timeframe: "1m".into(),
        };

        info!(
            session_id = %config.session_id,
            strategy_id = %config.strategy_id,
            symbol = %config.symbol,
            acceleration_factor = config.acceleration_factor,
            "session config loaded"
        );

        Ok(config)
    }

    /// Throttled progress broadcast. `force` skips the interval check (used
    /// on transitions).
    fn broadcast_progress(&self, state: &mut RunState, force: bool) {
        if !force {
            if let Some(last) = state.last_broadcast {
                if last.elapsed().as_secs_f64() < self.broadcast_interval {
                    return;
                }
            }
        }
        state.last_broadcast = Some(Instant::now());

        self.bus.publish(Event::BacktestProgress(BacktestProgressEvent {
            session_id: self.session_id.clone(),
            status: BacktestStatus::Running.to_string(),
            progress_pct: state.progress_pct,
            current_timestamp: state.current_timestamp,
            current_pnl: state.current_pnl,
            total_trades: state.total_trades,
            open_positions: state.open_positions,
            equity: state.equity,
            max_drawdown_pct: state.max_drawdown_pct,
        }));
    }

    async fn store_equity_curve(&self, curve: &[EquityPointRow]) {
        if curve.is_empty() {
            return;
        }

        let mut sampled: Vec<EquityPointRow> = curve.iter().step_by(10).cloned().collect();
        let last = curve[curve.len() - 1].clone();
        if sampled.last().map(|p| p.timestamp) != Some(last.timestamp) {
            sampled.push(last);
        }

        if let Err(error) = self.store.insert_equity_points(&self.session_id, &sampled).await {
            warn!(
                session_id = %self.session_id,
                error = %error,
                "equity curve storage failed"
            );
        }
    }
}

// =============================================================================
// Inline evaluation
// =============================================================================

/// Default entry rule: candle momentum above 0.1% with a volume surge above
/// 1.5x the running average. Sized at 2% of the initial balance.
fn evaluate_entry_signal(candle: &Candle, avg_volume: f64, initial_balance: f64) -> Option<SyntheticSignal> {
    if candle.open <= 0.0 || candle.close <= 0.0 {
        return None;
    }

    let price_change_pct = (candle.close - candle.open) / candle.open * 100.0;
    let volume_ratio = if avg_volume > 0.0 {
        candle.volume / avg_volume
    } else {
        1.0
    };

    if price_change_pct > 0.1 && volume_ratio > 1.5 {
        return Some(SyntheticSignal {
            signal_type: SignalType::S1,
            side: OrderSide::Buy,
            price: candle.close,
            quantity: initial_balance * 0.02 / candle.close,
            reason: format!("Price momentum {price_change_pct:.2}%, Volume ratio {volume_ratio:.2}"),
        });
    }

    None
}

/// Exit rules against the position's average entry: stop-loss at
/// `-stop_loss_percent`, take-profit at `+take_profit_percent`.
fn evaluate_exit_signal(
    candle: &Candle,
    position: &PositionRecord,
    config: &BacktestConfig,
) -> Option<SyntheticSignal> {
    if position.quantity == 0.0 {
        return None;
    }

    let mut marked = position.clone();
    marked.update_unrealized_pnl(candle.close);

    let close_side = if position.quantity > 0.0 {
        OrderSide::Sell
    } else {
        OrderSide::Cover
    };

    if marked.unrealized_pnl_pct <= -config.stop_loss_percent {
        return Some(SyntheticSignal {
            signal_type: SignalType::E1,
            side: close_side,
            price: candle.close,
            quantity: position.position_size(),
            reason: format!("Stop loss triggered at {:.2}%", marked.unrealized_pnl_pct),
        });
    }

    if marked.unrealized_pnl_pct >= config.take_profit_percent {
        return Some(SyntheticSignal {
            signal_type: SignalType::Ze1,
            side: close_side,
            price: candle.close,
            quantity: position.position_size(),
            reason: format!("Take profit triggered at {:.2}%", marked.unrealized_pnl_pct),
        });
    }

    None
}

/// Realized PnL of a close at `exit_price`: LONG `(exit - entry) * qty`,
/// SHORT `(entry - exit) * qty`.
fn realized_pnl(position: &PositionRecord, exit_price: f64, quantity: f64) -> f64 {
    if position.quantity > 0.0 {
        (exit_price - position.average_price) * quantity
    } else {
        (position.average_price - exit_price) * quantity
    }
}

fn record_equity_point(
    state: &mut RunState,
    timestamp: f64,
    positions: &[PositionRecord],
    initial_balance: f64,
) {
    let unrealized: f64 = positions.iter().map(|p| p.unrealized_pnl).sum();
    let equity = initial_balance + state.current_pnl + unrealized;

    if equity > state.peak_equity {
        state.peak_equity = equity;
    }

    let drawdown_pct = if state.peak_equity > 0.0 {
        (state.peak_equity - equity) / state.peak_equity * 100.0
    } else {
        0.0
    };
    if drawdown_pct > state.max_drawdown_pct {
        state.max_drawdown_pct = drawdown_pct;
    }

    state.equity = equity;
    state.open_positions = positions.iter().filter(|p| p.quantity != 0.0).count();
    state.equity_curve.push(EquityPointRow {
        timestamp,
        equity,
        drawdown_pct,
        open_positions: state.open_positions,
    });
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{BacktestSessionRow, MemoryStore};
    use futures_util::FutureExt;
    use parking_lot::Mutex;

    fn candle(timestamp: f64, open: f64, close: f64, volume: f64) -> Candle {
        Candle {
            symbol: "BTC_USDT".into(),
            timestamp,
            open,
            high: open.max(close),
            low: open.min(close),
            close,
            volume,
        }
    }

    fn session_row(session_id: &str, start: i64, end: i64) -> BacktestSessionRow {
        let at = |secs: i64| chrono::DateTime::from_timestamp(secs, 0).unwrap().naive_utc();
        BacktestSessionRow {
            session_id: session_id.into(),
            strategy_id: "strat-1".into(),
            symbol: "BTC_USDT".into(),
            start_date: at(start),
            end_date: at(end),
            acceleration_factor: 10,
            initial_balance: 10_000.0,
            status: BacktestStatus::Pending.to_string(),
            progress_pct: 0.0,
            current_timestamp: None,
            final_pnl: None,
            total_trades: None,
            win_rate: None,
            error_message: None,
            created_at: now_naive_utc(),
            completed_at: None,
        }
    }

    fn test_config() -> BacktestConfig {
        BacktestConfig {
            session_id: "sess".into(),
            strategy_id: "strat-1".into(),
            symbol: "BTC_USDT".into(),
            start_ts: 0.0,
            end_ts: 1000.0,
            acceleration_factor: 10,
            initial_balance: 10_000.0,
            stop_loss_percent: 5.0,
            take_profit_percent: 10.0,
            timeframe: "1m".into(),
        }
    }

    fn long_position(quantity: f64, entry: f64) -> PositionRecord {
        let mut position = PositionRecord {
            symbol: "BTC_USDT".into(),
            quantity,
            average_price: entry,
            leverage: 1.0,
            liquidation_price: None,
            unrealized_pnl: 0.0,
            unrealized_pnl_pct: 0.0,
        };
        position.update_unrealized_pnl(entry);
        position
    }

    // ---- inline evaluators -----------------------------------------------

    #[test]
    fn entry_requires_momentum_and_volume_surge() {
        // 0.2% momentum with 2x volume: entry.
        let c = candle(60.0, 100.0, 100.2, 20.0);
        let signal = evaluate_entry_signal(&c, 10.0, 10_000.0).unwrap();
        assert_eq!(signal.side, OrderSide::Buy);
        assert_eq!(signal.signal_type, SignalType::S1);
        assert!((signal.quantity - 10_000.0 * 0.02 / 100.2).abs() < 1e-9);

        // Momentum without volume: no entry.
        assert!(evaluate_entry_signal(&candle(60.0, 100.0, 100.2, 10.0), 10.0, 10_000.0).is_none());
        // Volume without momentum: no entry.
        assert!(evaluate_entry_signal(&candle(60.0, 100.0, 100.05, 20.0), 10.0, 10_000.0).is_none());
    }

    #[test]
    fn stop_loss_synthesizes_sell_close() {
        let config = test_config();
        let position = long_position(2.0, 100.0);

        // 6% under water: stop loss fires.
        let signal = evaluate_exit_signal(&candle(120.0, 95.0, 94.0, 1.0), &position, &config).unwrap();
        assert_eq!(signal.side, OrderSide::Sell);
        assert_eq!(signal.signal_type, SignalType::E1);
        assert!(signal.reason.contains("Stop loss"), "reason: {}", signal.reason);

        // The realized PnL of that close is negative.
        let pnl = realized_pnl(&position, signal.price, signal.quantity);
        assert!(pnl < 0.0, "pnl {pnl}");
    }

    #[test]
    fn take_profit_synthesizes_ze1_close() {
        let config = test_config();
        let position = long_position(2.0, 100.0);

        let signal = evaluate_exit_signal(&candle(120.0, 111.0, 111.0, 1.0), &position, &config).unwrap();
        assert_eq!(signal.signal_type, SignalType::Ze1);
        assert!(signal.reason.contains("Take profit"));

        // In between: hold.
        assert!(evaluate_exit_signal(&candle(120.0, 102.0, 102.0, 1.0), &position, &config).is_none());
    }

    #[test]
    fn short_position_exits_via_cover() {
        let config = test_config();
        let mut position = long_position(-2.0, 100.0);
        position.update_unrealized_pnl(106.0);

        // Price rose 6% against the short: stop loss, side COVER.
        let signal = evaluate_exit_signal(&candle(120.0, 106.0, 106.0, 1.0), &position, &config).unwrap();
        assert_eq!(signal.side, OrderSide::Cover);
        assert_eq!(signal.signal_type, SignalType::E1);
    }

    // ---- full runs --------------------------------------------------------

    fn collect_events(bus: &Arc<EventBus>) -> Arc<Mutex<Vec<String>>> {
        use crate::event_bus::{Priority, Topic};

        let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        for topic in [Topic::BacktestProgress, Topic::BacktestCompleted, Topic::BacktestFailed] {
            let sink = log.clone();
            bus.subscribe(
                topic,
                Priority::Normal,
                Arc::new(move |event| {
                    let sink = sink.clone();
                    async move {
                        let tag = match event {
                            Event::BacktestProgress(_) => "progress",
                            Event::BacktestCompleted(_) => "completed",
                            Event::BacktestFailed(_) => "failed",
                            _ => "other",
                        };
                        sink.lock().push(tag.to_string());
                        Ok(())
                    }
                    .boxed()
                }),
            );
        }
        log
    }

    #[tokio::test]
    async fn missing_session_fails_terminally() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(EventBus::new());
        let events = collect_events(&bus);

        let engine = BacktestEngine::new("ghost", store, bus.clone(), 1.0);
        let result = engine.run().await;

        assert_eq!(result.status, BacktestStatus::Failed);
        assert!(result.error_message.as_deref().unwrap_or("").contains("ghost"));

        bus.shutdown().await;
        assert!(events.lock().contains(&"failed".to_string()));
    }

    #[tokio::test]
    async fn stop_loss_round_trip_produces_losing_trade() {
        let store = Arc::new(MemoryStore::new());
        store.insert_session(session_row("sess-sl", 0, 1000));
        // Candle 2 triggers the entry (momentum + surge); candle 3 collapses
        // below the 5% stop.
        store.seed_resample_ohlcv(
            "BTC_USDT",
            "1m",
            vec![
                candle(60.0, 100.0, 100.0, 10.0),
                candle(120.0, 100.0, 100.2, 40.0),
                candle(180.0, 100.0, 94.0, 10.0),
            ],
        );

        let bus = Arc::new(EventBus::new());
        let events = collect_events(&bus);

        let engine = BacktestEngine::new("sess-sl", store.clone(), bus.clone(), 1000.0);
        let result = engine.run().await;

        assert_eq!(result.status, BacktestStatus::Completed);
        assert_eq!(result.total_trades, 1);
        assert_eq!(result.losing_trades, 1);
        assert_eq!(result.win_rate, 0.0);
        assert!(result.final_pnl < 0.0);
        assert_eq!(result.candles_processed, 3);

        // The synthesized close was an emergency stop.
        assert_eq!(result.trades[0].strategy_signal, "E1");
        assert_eq!(result.trades[0].order_type, "SELL");
        assert!(result.trades[0].pnl < 0.0);

        // Session row reflects the terminal state.
        let row = store.fetch_backtest_session("sess-sl").await.unwrap().unwrap();
        assert_eq!(row.status, "completed");
        assert_eq!(row.progress_pct, 100.0);
        assert_eq!(row.total_trades, Some(1));

        // Trade persisted.
        assert_eq!(store.trades_for_session("sess-sl").len(), 1);

        bus.shutdown().await;
        let log = events.lock();
        assert!(log.contains(&"completed".to_string()));
        assert!(log.contains(&"progress".to_string()));
    }

    #[tokio::test]
    async fn remaining_position_closes_at_final_candle() {
        let store = Arc::new(MemoryStore::new());
        store.insert_session(session_row("sess-eod", 0, 1000));
        // Entry on candle 2, price drifts but never hits stop or target.
        store.seed_resample_ohlcv(
            "BTC_USDT",
            "1m",
            vec![
                candle(60.0, 100.0, 100.0, 10.0),
                candle(120.0, 100.0, 100.2, 40.0),
                candle(180.0, 100.2, 102.0, 10.0),
            ],
        );

        let bus = Arc::new(EventBus::new());
        let engine = BacktestEngine::new("sess-eod", store.clone(), bus.clone(), 1000.0);
        let result = engine.run().await;

        assert_eq!(result.status, BacktestStatus::Completed);
        assert_eq!(result.total_trades, 1);
        assert_eq!(result.trades[0].strategy_signal, "CLOSE");
        // Entered at 100.2, forced out at 102: a winner.
        assert_eq!(result.winning_trades, 1);
        assert!(result.final_pnl > 0.0);
        assert!((result.final_balance - (10_000.0 + result.final_pnl)).abs() < 1e-9);

        bus.shutdown().await;
    }

    #[tokio::test]
    async fn stop_before_run_yields_stopped_status() {
        let store = Arc::new(MemoryStore::new());
        store.insert_session(session_row("sess-stop", 0, 1000));
        store.seed_resample_ohlcv("BTC_USDT", "1m", vec![candle(60.0, 100.0, 100.0, 10.0)]);

        let bus = Arc::new(EventBus::new());
        let engine = BacktestEngine::new("sess-stop", store.clone(), bus.clone(), 1000.0);
        engine.stop();
        let result = engine.run().await;

        assert_eq!(result.status, BacktestStatus::Stopped);
        assert_eq!(result.candles_processed, 0);

        let row = store.fetch_backtest_session("sess-stop").await.unwrap().unwrap();
        assert_eq!(row.status, "stopped");

        bus.shutdown().await;
    }

    #[tokio::test]
    async fn equity_curve_is_downsampled_on_persist() {
        let store = Arc::new(MemoryStore::new());
        store.insert_session(session_row("sess-eq", 0, 10_000));
        // 25 flat candles: no trades, 25 equity points.
        let candles: Vec<Candle> = (0..25).map(|i| candle(60.0 * i as f64, 100.0, 100.0, 10.0)).collect();
        store.seed_resample_ohlcv("BTC_USDT", "1m", candles);

        let bus = Arc::new(EventBus::new());
        let engine = BacktestEngine::new("sess-eq", store.clone(), bus.clone(), 1000.0);
        let result = engine.run().await;

        assert_eq!(result.equity_curve.len(), 25);
        // Sampled: indices 0, 10, 20 plus the last point.
        let persisted = store.equity_for_session("sess-eq");
        assert_eq!(persisted.len(), 4);
        assert_eq!(persisted[0].timestamp, 0.0);
        assert_eq!(persisted.last().unwrap().timestamp, 60.0 * 24.0);

        bus.shutdown().await;
    }

    #[tokio::test]
    async fn no_candles_is_insufficient_data_failure() {
        let store = Arc::new(MemoryStore::new());
        store.insert_session(session_row("sess-empty", 0, 1000));

        let bus = Arc::new(EventBus::new());
        let engine = BacktestEngine::new("sess-empty", store.clone(), bus.clone(), 1.0);
        let result = engine.run().await;

        assert_eq!(result.status, BacktestStatus::Failed);
        assert!(result.error_message.as_deref().unwrap_or("").contains("no historical data"));

        let row = store.fetch_backtest_session("sess-empty").await.unwrap().unwrap();
        assert_eq!(row.status, "failed");
        assert!(row.error_message.is_some());

        bus.shutdown().await;
    }
}
