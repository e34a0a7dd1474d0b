// =============================================================================
// MarketHistory — age-bounded ring buffers per symbol
// =============================================================================
//
// Stores price, volume, and order-book series per symbol. Eviction is by
// AGE, not count: each symbol keeps `retention` seconds of history (the
// engine sets retention from the largest lookback of the indicators bound to
// that symbol, plus a safety factor). Eviction is lazy, performed on append.
//
// One point older than the cutoff is always retained per series, so window
// assembly can include the pre-window anchor point that time-weighted
// calculations require.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;

use crate::types::OrderBookSnapshot;

#[derive(Default)]
struct SymbolSeries {
    price: VecDeque<(f64, f64)>,
    volume: VecDeque<(f64, f64)>,
    orderbook: VecDeque<OrderBookSnapshot>,
}

pub struct MarketHistory {
    series: RwLock<HashMap<String, SymbolSeries>>,
    retention: RwLock<HashMap<String, f64>>,
    default_retention: f64,
}

impl MarketHistory {
    /// `default_retention`: seconds of history kept for symbols without an
    /// explicit retention.
    pub fn new(default_retention: f64) -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            retention: RwLock::new(HashMap::new()),
            default_retention,
        }
    }

    /// Set the retention horizon for one symbol (seconds).
    pub fn set_retention(&self, symbol: &str, seconds: f64) {
        self.retention.write().insert(symbol.to_string(), seconds);
    }

    pub fn retention_for(&self, symbol: &str) -> f64 {
        self.retention
            .read()
            .get(symbol)
            .copied()
            .unwrap_or(self.default_retention)
    }

    /// Append a tick to the price and volume series, evicting expired
    /// entries.
    pub fn record_tick(&self, symbol: &str, timestamp: f64, price: f64, volume: f64) {
        let retention = self.retention_for(symbol);
        let mut series = self.series.write();
        let entry = series.entry(symbol.to_string()).or_default();

        entry.price.push_back((timestamp, price));
        entry.volume.push_back((timestamp, volume));

        let cutoff = timestamp - retention;
        evict_points(&mut entry.price, cutoff);
        evict_points(&mut entry.volume, cutoff);
    }

    /// Append an order-book snapshot, evicting expired entries.
    pub fn record_orderbook(&self, symbol: &str, snapshot: OrderBookSnapshot) {
        let retention = self.retention_for(symbol);
        let mut series = self.series.write();
        let entry = series.entry(symbol.to_string()).or_default();

        let cutoff = snapshot.timestamp - retention;
        entry.orderbook.push_back(snapshot);
        evict_snapshots(&mut entry.orderbook, cutoff);
    }

    /// Snapshot of the price series, ascending by timestamp.
    pub fn price_series(&self, symbol: &str) -> Vec<(f64, f64)> {
        self.series
            .read()
            .get(symbol)
            .map(|s| s.price.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Snapshot of the volume series, ascending by timestamp.
    pub fn volume_series(&self, symbol: &str) -> Vec<(f64, f64)> {
        self.series
            .read()
            .get(symbol)
            .map(|s| s.volume.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Snapshot of the order-book series, ascending by timestamp.
    pub fn orderbook_series(&self, symbol: &str) -> Vec<OrderBookSnapshot> {
        self.series
            .read()
            .get(symbol)
            .map(|s| s.orderbook.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Most recent `(timestamp, price)` for a symbol.
    pub fn latest_price(&self, symbol: &str) -> Option<(f64, f64)> {
        self.series
            .read()
            .get(symbol)
            .and_then(|s| s.price.back().copied())
    }

    pub fn price_point_count(&self, symbol: &str) -> usize {
        self.series.read().get(symbol).map_or(0, |s| s.price.len())
    }
}

/// Pop expired points, always keeping one point at or before the cutoff as
/// the anchor for duration attribution.
fn evict_points(buffer: &mut VecDeque<(f64, f64)>, cutoff: f64) {
    while buffer.len() >= 2 && buffer[1].0 <= cutoff {
        buffer.pop_front();
    }
}

fn evict_snapshots(buffer: &mut VecDeque<OrderBookSnapshot>, cutoff: f64) {
    while buffer.len() >= 2 && buffer[1].timestamp <= cutoff {
        buffer.pop_front();
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn snap(timestamp: f64) -> OrderBookSnapshot {
        OrderBookSnapshot {
            timestamp,
            best_bid: 100.0,
            best_ask: 100.1,
            bid_qty: 1.0,
            ask_qty: 1.0,
        }
    }

    #[test]
    fn ticks_accumulate_in_order() {
        let history = MarketHistory::new(600.0);
        history.record_tick("BTC_USDT", 1.0, 100.0, 5.0);
        history.record_tick("BTC_USDT", 2.0, 101.0, 6.0);

        assert_eq!(history.price_series("BTC_USDT"), vec![(1.0, 100.0), (2.0, 101.0)]);
        assert_eq!(history.volume_series("BTC_USDT"), vec![(1.0, 5.0), (2.0, 6.0)]);
        assert_eq!(history.latest_price("BTC_USDT"), Some((2.0, 101.0)));
    }

    #[test]
    fn eviction_is_by_age_not_count() {
        let history = MarketHistory::new(10.0);
        for i in 0..100 {
            history.record_tick("BTC_USDT", i as f64, 100.0, 1.0);
        }

        let prices = history.price_series("BTC_USDT");
        // 10 seconds of retention at t=99: window [89, 99] plus one anchor.
        assert!(prices.len() <= 12, "kept {} points", prices.len());
        assert!(prices.last().unwrap().0 == 99.0);
        // The anchor point at or before the cutoff survives.
        assert!(prices.first().unwrap().0 <= 89.0);
    }

    #[test]
    fn anchor_point_survives_eviction() {
        let history = MarketHistory::new(10.0);
        history.record_tick("BTC_USDT", 0.0, 100.0, 1.0);
        // A large time gap: the t=0 point is far outside retention but must
        // survive as the last point before the cutoff.
        history.record_tick("BTC_USDT", 100.0, 105.0, 1.0);

        let prices = history.price_series("BTC_USDT");
        assert_eq!(prices, vec![(0.0, 100.0), (100.0, 105.0)]);

        // A third tick makes t=0 evictable: t=100 becomes the anchor.
        history.record_tick("BTC_USDT", 120.0, 106.0, 1.0);
        let prices = history.price_series("BTC_USDT");
        assert_eq!(prices, vec![(100.0, 105.0), (120.0, 106.0)]);
    }

    #[test]
    fn per_symbol_retention_override() {
        let history = MarketHistory::new(600.0);
        history.set_retention("BTC_USDT", 5.0);
        assert_eq!(history.retention_for("BTC_USDT"), 5.0);
        assert_eq!(history.retention_for("ETH_USDT"), 600.0);

        for i in 0..20 {
            history.record_tick("BTC_USDT", i as f64, 100.0, 1.0);
            history.record_tick("ETH_USDT", i as f64, 100.0, 1.0);
        }

        assert!(history.price_point_count("BTC_USDT") < 10);
        assert_eq!(history.price_point_count("ETH_USDT"), 20);
    }

    #[test]
    fn orderbook_series_evicts_by_age() {
        let history = MarketHistory::new(10.0);
        for i in 0..30 {
            history.record_orderbook("BTC_USDT", snap(i as f64));
        }

        let snaps = history.orderbook_series("BTC_USDT");
        assert!(snaps.len() <= 12);
        assert_eq!(snaps.last().unwrap().timestamp, 29.0);
    }

    #[test]
    fn symbols_are_isolated() {
        let history = MarketHistory::new(600.0);
        history.record_tick("BTC_USDT", 1.0, 100.0, 1.0);
        assert!(history.price_series("ETH_USDT").is_empty());
        assert_eq!(history.latest_price("ETH_USDT"), None);
    }
}
