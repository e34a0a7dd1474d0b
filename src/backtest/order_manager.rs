// =============================================================================
// Backtest Order Manager — instant deterministic fills
// =============================================================================
//
// Subscribes to `signal_generated` and fills every order instantly with
// configurable slippage. Positions follow the quantity-sign convention:
// quantity > 0 is LONG, < 0 is SHORT, 0 is flat. The sign is the single
// source of truth for side, which makes a long-to-short flip expressible as
// one order: the close leg realizes PnL and the remainder opens the
// opposite direction.
//
// `submit_order` is a single atomic transaction under the manager lock:
// record order → `order_created` → position update → `position_*` → mark
// Filled → `order_filled`. Order-id generation uses its own lock so ids stay
// unique under concurrent submission.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::NaiveDateTime;
use futures_util::FutureExt;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::event_bus::{Event, EventBus, OrderEvent, PositionEvent, Priority, Signal, SubscriptionId, Topic};
use crate::store::now_naive_utc;
use crate::types::{epoch_now, OrderSide};

// =============================================================================
// Records
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum OrderStatus {
    New,
    Filled,
    Cancelled,
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "NEW"),
            Self::Filled => write!(f, "FILLED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum OrderKind {
    Market,
    Limit,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct OrderRecord {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    /// Absolute quantity.
    pub quantity: f64,
    /// Fill price after slippage.
    pub price: f64,
    pub status: OrderStatus,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub strategy_name: String,
    pub leverage: f64,
    pub order_kind: OrderKind,
}

/// Quantity sign determines the position side: > 0 LONG, < 0 SHORT, 0 flat.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PositionRecord {
    pub symbol: String,
    pub quantity: f64,
    pub average_price: f64,
    pub leverage: f64,
    pub liquidation_price: Option<f64>,
    pub unrealized_pnl: f64,
    pub unrealized_pnl_pct: f64,
}

impl PositionRecord {
    fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            quantity: 0.0,
            average_price: 0.0,
            leverage: 1.0,
            liquidation_price: None,
            unrealized_pnl: 0.0,
            unrealized_pnl_pct: 0.0,
        }
    }

    pub fn position_type(&self) -> &'static str {
        if self.quantity > 0.0 {
            "LONG"
        } else if self.quantity < 0.0 {
            "SHORT"
        } else {
            "NONE"
        }
    }

    pub fn position_size(&self) -> f64 {
        self.quantity.abs()
    }

    /// Recompute unrealized PnL against the current market price.
    pub fn update_unrealized_pnl(&mut self, current_price: f64) {
        if self.quantity == 0.0 || self.average_price == 0.0 {
            self.unrealized_pnl = 0.0;
            self.unrealized_pnl_pct = 0.0;
            return;
        }

        if self.quantity > 0.0 {
            self.unrealized_pnl = self.quantity * (current_price - self.average_price);
            self.unrealized_pnl_pct = (current_price - self.average_price) / self.average_price * 100.0;
        } else {
            self.unrealized_pnl = self.quantity.abs() * (self.average_price - current_price);
            self.unrealized_pnl_pct = (self.average_price - current_price) / self.average_price * 100.0;
        }
    }
}

/// LONG liquidates at `entry * (1 - 1/leverage)`, SHORT at
/// `entry * (1 + 1/leverage)`; no liquidation without leverage.
fn liquidation_price(entry_price: f64, leverage: f64, is_long: bool) -> Option<f64> {
    if leverage <= 1.0 {
        return None;
    }

    if is_long {
        Some(entry_price * (1.0 - 1.0 / leverage))
    } else {
        Some(entry_price * (1.0 + 1.0 / leverage))
    }
}

// =============================================================================
// Manager
// =============================================================================

#[derive(Default)]
struct ManagerState {
    orders: HashMap<String, OrderRecord>,
    positions: HashMap<String, PositionRecord>,
}

pub struct BacktestOrderManager {
    bus: Arc<EventBus>,
    slippage_pct: f64,
    state: Mutex<ManagerState>,
    /// Serializes order-id generation only.
    order_seq: Mutex<u64>,
    subscriptions: Mutex<Vec<(Topic, SubscriptionId)>>,
    started: AtomicBool,
}

impl BacktestOrderManager {
    pub fn new(bus: Arc<EventBus>, slippage_pct: f64) -> Self {
        info!(slippage_pct, "backtest order manager initialized");
        Self {
            bus,
            slippage_pct,
            state: Mutex::new(ManagerState::default()),
            order_seq: Mutex::new(0),
            subscriptions: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Subscribe to `signal_generated`.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let manager = self.clone();
        let id = self.bus.subscribe(
            Topic::SignalGenerated,
            Priority::Normal,
            Arc::new(move |event| {
                let manager = manager.clone();
                async move {
                    if let Event::SignalGenerated(signal) = event {
                        manager.on_signal(&signal);
                    }
                    Ok(())
                }
                .boxed()
            }),
        );
        self.subscriptions.lock().push((Topic::SignalGenerated, id));

        info!("backtest order manager subscribed to signals");
    }

    /// Unsubscribe and clear all state.
    pub fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }

        for (topic, id) in self.subscriptions.lock().drain(..) {
            self.bus.unsubscribe(topic, id);
        }

        let mut state = self.state.lock();
        state.orders.clear();
        state.positions.clear();

        info!("backtest order manager stopped");
    }

    fn on_signal(&self, signal: &Signal) {
        if signal.price <= 0.0 {
            warn!(symbol = %signal.symbol, "signal dropped: non-positive price");
            return;
        }

        // Close signals may carry quantity 0: close the full open position.
        let quantity = if signal.quantity > 0.0 {
            signal.quantity
        } else if signal.side.is_closing() {
            match self.position(&signal.symbol) {
                Some(position) if position.quantity != 0.0 => position.position_size(),
                _ => {
                    warn!(symbol = %signal.symbol, "close signal dropped: no open position");
                    return;
                }
            }
        } else {
            warn!(symbol = %signal.symbol, "signal dropped: non-positive quantity");
            return;
        };

        let order_id = self.submit_order(
            &signal.symbol,
            signal.side,
            quantity,
            signal.price,
            &signal.strategy_name,
            1.0,
            OrderKind::Market,
        );

        if let Some(order_id) = order_id {
            info!(
                order_id = %order_id,
                signal_type = %signal.signal_type,
                symbol = %signal.symbol,
                side = %signal.side,
                quantity,
                "signal processed"
            );
        }
    }

    fn next_order_id(&self) -> String {
        let mut seq = self.order_seq.lock();
        *seq += 1;
        format!("backtest_order_{:06}", *seq)
    }

    /// Fill price under the slippage model: buys/shorts pay up, sells/covers
    /// receive less.
    fn fill_price(&self, side: OrderSide, price: f64) -> f64 {
        if self.slippage_pct <= 0.0 {
            return price;
        }

        match side {
            OrderSide::Buy | OrderSide::Short => price * (1.0 + self.slippage_pct / 100.0),
            OrderSide::Sell | OrderSide::Cover => price * (1.0 - self.slippage_pct / 100.0),
        }
    }

    /// Submit an order with an instant fill.
    ///
    /// Returns `None` when the order is invalid (SELL without a long, COVER
    /// without a short, degenerate quantity/price): logged and dropped with
    /// no state change.
    #[allow(clippy::too_many_arguments)]
    pub fn submit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        price: f64,
        strategy_name: &str,
        leverage: f64,
        order_kind: OrderKind,
    ) -> Option<String> {
        if quantity <= 0.0 || price <= 0.0 {
            warn!(symbol, %side, quantity, price, "order dropped: degenerate quantity or price");
            return None;
        }

        let symbol = symbol.to_uppercase();
        let fill_price = self.fill_price(side, price);

        let mut state = self.state.lock();

        // Validity against the current position before any state change.
        let current_quantity = state.positions.get(&symbol).map(|p| p.quantity).unwrap_or(0.0);
        match side {
            OrderSide::Sell if current_quantity <= 0.0 => {
                warn!(symbol = %symbol, current_quantity, "invalid SELL without a long position; dropped");
                return None;
            }
            OrderSide::Cover if current_quantity >= 0.0 => {
                warn!(symbol = %symbol, current_quantity, "invalid COVER without a short position; dropped");
                return None;
            }
            _ => {}
        }

        let order_id = self.next_order_id();
        let now = now_naive_utc();

        let record = OrderRecord {
            order_id: order_id.clone(),
            symbol: symbol.clone(),
            side,
            quantity,
            price: fill_price,
            status: OrderStatus::New,
            created_at: now,
            updated_at: now,
            strategy_name: strategy_name.to_string(),
            leverage,
            order_kind,
        };
        state.orders.insert(order_id.clone(), record);

        self.bus.publish(Event::OrderCreated(OrderEvent {
            order_id: order_id.clone(),
            symbol: symbol.clone(),
            side,
            quantity,
            price: fill_price,
            status: OrderStatus::New.to_string(),
            timestamp: epoch_now(),
        }));

        self.apply_position_update(&mut state, &symbol, &order_id, side, quantity, fill_price, leverage);

        // Instant fill.
        if let Some(order) = state.orders.get_mut(&order_id) {
            order.status = OrderStatus::Filled;
            order.updated_at = now_naive_utc();
        }

        self.bus.publish(Event::OrderFilled(OrderEvent {
            order_id: order_id.clone(),
            symbol: symbol.clone(),
            side,
            quantity,
            price: fill_price,
            status: OrderStatus::Filled.to_string(),
            timestamp: epoch_now(),
        }));

        debug!(
            order_id = %order_id,
            symbol = %symbol,
            %side,
            quantity,
            fill_price,
            slippage_pct = self.slippage_pct,
            "order filled"
        );

        Some(order_id)
    }

    /// Apply one fill to the symbol's position under the sign convention and
    /// publish the matching `position_*` events.
    fn apply_position_update(
        &self,
        state: &mut ManagerState,
        symbol: &str,
        order_id: &str,
        side: OrderSide,
        quantity: f64,
        fill_price: f64,
        leverage: f64,
    ) {
        let position = state
            .positions
            .entry(symbol.to_string())
            .or_insert_with(|| PositionRecord::new(symbol));

        let delta = match side {
            OrderSide::Buy | OrderSide::Cover => quantity,
            OrderSide::Sell | OrderSide::Short => -quantity,
        };

        let old_quantity = position.quantity;
        let new_quantity = old_quantity + delta;
        let position_id = format!("{symbol}_{order_id}");

        let event = |position: &PositionRecord, realized: Option<f64>| PositionEvent {
            position_id: position_id.clone(),
            symbol: symbol.to_string(),
            side: position.position_type().to_string(),
            quantity: position.position_size(),
            entry_price: position.average_price,
            current_price: fill_price,
            unrealized_pnl: Some(position.unrealized_pnl),
            realized_pnl: realized,
            timestamp: epoch_now(),
        };

        if old_quantity == 0.0 {
            // Opening a fresh position.
            position.quantity = new_quantity;
            position.average_price = fill_price;
            position.leverage = leverage;
            position.liquidation_price = liquidation_price(fill_price, leverage, new_quantity > 0.0);
            position.update_unrealized_pnl(fill_price);

            self.bus.publish(Event::PositionOpened(event(position, None)));
        } else if old_quantity.signum() == delta.signum() {
            // Increasing the existing position: weighted average entry.
            let total = old_quantity.abs() + quantity;
            position.average_price =
                (old_quantity.abs() * position.average_price + quantity * fill_price) / total;
            position.quantity = new_quantity;
            position.liquidation_price =
                liquidation_price(position.average_price, position.leverage, new_quantity > 0.0);
            position.update_unrealized_pnl(fill_price);

            self.bus.publish(Event::PositionUpdated(event(position, None)));
        } else {
            // Reducing, closing, or flipping: the close leg realizes PnL.
            let close_qty = quantity.min(old_quantity.abs());
            let realized = if old_quantity > 0.0 {
                (fill_price - position.average_price) * close_qty
            } else {
                (position.average_price - fill_price) * close_qty
            };

            // The closed-leg event reports what was closed, not the empty
            // position left behind.
            let closed_event = |entry_price: f64| PositionEvent {
                position_id: position_id.clone(),
                symbol: symbol.to_string(),
                side: if old_quantity > 0.0 { "LONG" } else { "SHORT" }.to_string(),
                quantity: close_qty,
                entry_price,
                current_price: fill_price,
                unrealized_pnl: Some(0.0),
                realized_pnl: Some(realized),
                timestamp: epoch_now(),
            };

            if new_quantity == 0.0 {
                // Full close.
                let entry_price = position.average_price;
                position.quantity = 0.0;
                position.average_price = 0.0;
                position.leverage = 1.0;
                position.liquidation_price = None;
                position.update_unrealized_pnl(fill_price);

                info!(symbol, realized_pnl = realized, "position closed");
                self.bus.publish(Event::PositionClosed(closed_event(entry_price)));
            } else if new_quantity.signum() == old_quantity.signum() {
                // Partial close: entry basis unchanged.
                position.quantity = new_quantity;
                position.liquidation_price =
                    liquidation_price(position.average_price, position.leverage, new_quantity > 0.0);
                position.update_unrealized_pnl(fill_price);

                self.bus.publish(Event::PositionUpdated(event(position, Some(realized))));
            } else {
                // Flip through zero: close the old side fully, reopen the
                // remainder on the opposite side at the fill price.
                let entry_price = position.average_price;
                info!(symbol, realized_pnl = realized, flipped_to = new_quantity, "position flipped");
                self.bus.publish(Event::PositionClosed(closed_event(entry_price)));

                position.quantity = new_quantity;
                position.average_price = fill_price;
                position.leverage = leverage;
                position.liquidation_price = liquidation_price(fill_price, leverage, new_quantity > 0.0);
                position.update_unrealized_pnl(fill_price);

                self.bus.publish(Event::PositionOpened(event(position, None)));
            }
        }
    }

    /// Cancel an order (bookkeeping; fills are instantaneous in backtests).
    pub fn cancel_order(&self, order_id: &str) -> bool {
        let mut state = self.state.lock();
        let Some(order) = state.orders.get_mut(order_id) else {
            return false;
        };

        order.status = OrderStatus::Cancelled;
        order.updated_at = now_naive_utc();

        let event = OrderEvent {
            order_id: order_id.to_string(),
            symbol: order.symbol.clone(),
            side: order.side,
            quantity: order.quantity,
            price: order.price,
            status: OrderStatus::Cancelled.to_string(),
            timestamp: epoch_now(),
        };
        drop(state);

        self.bus.publish(Event::OrderCancelled(event));
        info!(order_id, "order cancelled");
        true
    }

    pub fn all_orders(&self) -> Vec<OrderRecord> {
        let mut orders: Vec<OrderRecord> = self.state.lock().orders.values().cloned().collect();
        orders.sort_by(|a, b| a.order_id.cmp(&b.order_id));
        orders
    }

    /// Open positions (non-zero quantity).
    pub fn open_positions(&self) -> Vec<PositionRecord> {
        self.state
            .lock()
            .positions
            .values()
            .filter(|p| p.quantity != 0.0)
            .cloned()
            .collect()
    }

    pub fn position(&self, symbol: &str) -> Option<PositionRecord> {
        self.state.lock().positions.get(&symbol.to_uppercase()).cloned()
    }

    /// Refresh unrealized PnL for a symbol against the latest price.
    pub fn mark_price(&self, symbol: &str, price: f64) {
        let mut state = self.state.lock();
        if let Some(position) = state.positions.get_mut(&symbol.to_uppercase()) {
            position.update_unrealized_pnl(price);
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> Arc<BacktestOrderManager> {
        Arc::new(BacktestOrderManager::new(Arc::new(EventBus::new()), 0.0))
    }

    fn manager_with_bus() -> (Arc<EventBus>, Arc<BacktestOrderManager>) {
        let bus = Arc::new(EventBus::new());
        (bus.clone(), Arc::new(BacktestOrderManager::new(bus, 0.0)))
    }

    fn submit(m: &BacktestOrderManager, side: OrderSide, qty: f64, price: f64) -> Option<String> {
        m.submit_order("BTC_USDT", side, qty, price, "test", 1.0, OrderKind::Market)
    }

    // ---- basics -----------------------------------------------------------

    #[tokio::test]
    async fn buy_opens_long_position() {
        let m = manager();
        let order_id = submit(&m, OrderSide::Buy, 2.0, 100.0).unwrap();

        let position = m.position("BTC_USDT").unwrap();
        assert_eq!(position.quantity, 2.0);
        assert_eq!(position.average_price, 100.0);
        assert_eq!(position.position_type(), "LONG");

        let orders = m.all_orders();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].order_id, order_id);
        assert_eq!(orders[0].status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn order_ids_are_sequential_and_unique() {
        let m = manager();
        let a = submit(&m, OrderSide::Buy, 1.0, 100.0).unwrap();
        let b = submit(&m, OrderSide::Buy, 1.0, 100.0).unwrap();
        assert_eq!(a, "backtest_order_000001");
        assert_eq!(b, "backtest_order_000002");
    }

    #[tokio::test]
    async fn averaging_up_recomputes_entry() {
        let m = manager();
        submit(&m, OrderSide::Buy, 1.0, 100.0).unwrap();
        submit(&m, OrderSide::Buy, 1.0, 110.0).unwrap();

        let position = m.position("BTC_USDT").unwrap();
        assert_eq!(position.quantity, 2.0);
        assert!((position.average_price - 105.0).abs() < 1e-12);
    }

    // ---- slippage ---------------------------------------------------------

    #[tokio::test]
    async fn slippage_worsens_fills_both_ways() {
        let bus = Arc::new(EventBus::new());
        let m = BacktestOrderManager::new(bus, 1.0);

        m.submit_order("BTC_USDT", OrderSide::Buy, 1.0, 100.0, "t", 1.0, OrderKind::Market)
            .unwrap();
        let position = m.position("BTC_USDT").unwrap();
        assert!((position.average_price - 101.0).abs() < 1e-12);

        let orders = m.all_orders();
        assert!((orders[0].price - 101.0).abs() < 1e-12);

        m.submit_order("BTC_USDT", OrderSide::Sell, 1.0, 100.0, "t", 1.0, OrderKind::Market)
            .unwrap();
        let orders = m.all_orders();
        assert!((orders[1].price - 99.0).abs() < 1e-12);
    }

    // ---- invalid operations ----------------------------------------------

    #[tokio::test]
    async fn sell_without_long_is_dropped() {
        let m = manager();
        assert!(submit(&m, OrderSide::Sell, 1.0, 100.0).is_none());
        assert!(m.all_orders().is_empty());
        assert!(m.position("BTC_USDT").is_none());
    }

    #[tokio::test]
    async fn cover_without_short_is_dropped() {
        let m = manager();
        submit(&m, OrderSide::Buy, 1.0, 100.0).unwrap();
        assert!(submit(&m, OrderSide::Cover, 1.0, 100.0).is_none());
        assert_eq!(m.all_orders().len(), 1);
        assert_eq!(m.position("BTC_USDT").unwrap().quantity, 1.0);
    }

    // ---- realized PnL -----------------------------------------------------

    #[tokio::test]
    async fn profitable_short_realizes_exact_pnl() {
        let (bus, m) = manager_with_bus();

        let closed: Arc<Mutex<Vec<PositionEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = closed.clone();
        bus.subscribe(
            Topic::PositionClosed,
            Priority::Normal,
            Arc::new(move |event| {
                let sink = sink.clone();
                async move {
                    if let Event::PositionClosed(closed) = event {
                        sink.lock().push(closed);
                    }
                    Ok(())
                }
                .boxed()
            }),
        );

        submit(&m, OrderSide::Short, 10.0, 100.0).unwrap();
        submit(&m, OrderSide::Cover, 10.0, 90.0).unwrap();

        for _ in 0..20 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let events = closed.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].realized_pnl, Some(100.0));

        let position = m.position("BTC_USDT").unwrap();
        assert_eq!(position.quantity, 0.0);
        assert_eq!(position.liquidation_price, None);
    }

    #[tokio::test]
    async fn long_close_realizes_exit_minus_entry() {
        let (bus, m) = manager_with_bus();

        let closed: Arc<Mutex<Vec<PositionEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = closed.clone();
        bus.subscribe(
            Topic::PositionClosed,
            Priority::Normal,
            Arc::new(move |event| {
                let sink = sink.clone();
                async move {
                    if let Event::PositionClosed(closed) = event {
                        sink.lock().push(closed);
                    }
                    Ok(())
                }
                .boxed()
            }),
        );

        submit(&m, OrderSide::Buy, 5.0, 100.0).unwrap();
        submit(&m, OrderSide::Sell, 5.0, 94.0).unwrap();

        for _ in 0..20 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let events = closed.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].realized_pnl, Some(-30.0));
    }

    #[tokio::test]
    async fn partial_close_keeps_entry_basis() {
        let m = manager();
        submit(&m, OrderSide::Buy, 4.0, 100.0).unwrap();
        submit(&m, OrderSide::Sell, 1.0, 110.0).unwrap();

        let position = m.position("BTC_USDT").unwrap();
        assert_eq!(position.quantity, 3.0);
        assert_eq!(position.average_price, 100.0);
    }

    #[tokio::test]
    async fn sell_past_zero_flips_to_short() {
        let m = manager();
        submit(&m, OrderSide::Buy, 2.0, 100.0).unwrap();
        submit(&m, OrderSide::Sell, 5.0, 110.0).unwrap();

        let position = m.position("BTC_USDT").unwrap();
        assert_eq!(position.quantity, -3.0);
        assert_eq!(position.position_type(), "SHORT");
        assert_eq!(position.average_price, 110.0);
    }

    // ---- sign convention property ----------------------------------------

    #[tokio::test]
    async fn final_quantity_is_sum_of_signed_quantities() {
        let m = manager();
        // BUY/COVER positive, SELL/SHORT negative.
        let orders = [
            (OrderSide::Buy, 5.0),
            (OrderSide::Sell, 2.0),
            (OrderSide::Sell, 3.0),
            (OrderSide::Short, 4.0),
            (OrderSide::Cover, 4.0),
            (OrderSide::Buy, 1.5),
        ];

        let mut expected = 0.0;
        for (side, qty) in orders {
            submit(&m, side, qty, 100.0);
            expected += match side {
                OrderSide::Buy | OrderSide::Cover => qty,
                OrderSide::Sell | OrderSide::Short => -qty,
            };
        }

        let quantity = m.position("BTC_USDT").map(|p| p.quantity).unwrap_or(0.0);
        assert!((quantity - expected).abs() < 1e-12, "got {quantity}, want {expected}");
    }

    // ---- leverage & liquidation ------------------------------------------

    #[test]
    fn liquidation_price_rule() {
        assert_eq!(liquidation_price(100.0, 1.0, true), None);
        assert_eq!(liquidation_price(100.0, 0.5, true), None);
        assert_eq!(liquidation_price(100.0, 4.0, true), Some(75.0));
        assert_eq!(liquidation_price(100.0, 4.0, false), Some(125.0));
    }

    #[tokio::test]
    async fn leveraged_position_carries_liquidation_price() {
        let m = manager();
        m.submit_order("BTC_USDT", OrderSide::Buy, 1.0, 100.0, "t", 5.0, OrderKind::Market)
            .unwrap();

        let position = m.position("BTC_USDT").unwrap();
        assert_eq!(position.leverage, 5.0);
        assert_eq!(position.liquidation_price, Some(80.0));
    }

    // ---- unrealized PnL ---------------------------------------------------

    #[tokio::test]
    async fn mark_price_updates_unrealized_pnl() {
        let m = manager();
        submit(&m, OrderSide::Short, 2.0, 100.0).unwrap();
        m.mark_price("BTC_USDT", 90.0);

        let position = m.position("BTC_USDT").unwrap();
        assert!((position.unrealized_pnl - 20.0).abs() < 1e-12);
        assert!((position.unrealized_pnl_pct - 10.0).abs() < 1e-12);
    }

    // ---- signal handling --------------------------------------------------

    #[tokio::test]
    async fn signals_drive_orders_via_bus() {
        let (bus, m) = manager_with_bus();
        m.start();

        bus.publish(Event::SignalGenerated(Signal {
            strategy_name: "s".into(),
            symbol: "BTC_USDT".into(),
            signal_type: crate::event_bus::SignalType::S1,
            side: OrderSide::Buy,
            quantity: 2.0,
            price: 100.0,
            reason: None,
        }));

        // Close-the-rest signal with zero quantity.
        bus.publish(Event::SignalGenerated(Signal {
            strategy_name: "s".into(),
            symbol: "BTC_USDT".into(),
            signal_type: crate::event_bus::SignalType::Ze1,
            side: OrderSide::Sell,
            quantity: 0.0,
            price: 110.0,
            reason: None,
        }));

        for _ in 0..20 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        assert_eq!(m.all_orders().len(), 2);
        assert_eq!(m.position("BTC_USDT").unwrap().quantity, 0.0);

        m.stop();
        assert!(m.all_orders().is_empty());
    }

    // ---- cancel -----------------------------------------------------------

    #[tokio::test]
    async fn cancel_marks_order_cancelled() {
        let m = manager();
        let id = submit(&m, OrderSide::Buy, 1.0, 100.0).unwrap();

        assert!(m.cancel_order(&id));
        assert!(!m.cancel_order("nope"));

        let orders = m.all_orders();
        assert_eq!(orders[0].status, OrderStatus::Cancelled);
    }
}
