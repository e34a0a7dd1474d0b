// =============================================================================
// Shared types used across the Meridian indicator engine
// =============================================================================
//
// Market-data primitives, window descriptors, and indicator value records.
// All timestamps are Unix epoch seconds (f64); millisecond inputs are
// normalized at ingress via `normalize_timestamp`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Current wall-clock time as Unix epoch seconds.
pub fn epoch_now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Normalize a timestamp to Unix seconds. Values above 1e12 are assumed to be
/// milliseconds and divided by 1000.
pub fn normalize_timestamp(timestamp: f64) -> f64 {
    if timestamp > 1e12 {
        timestamp / 1000.0
    } else {
        timestamp
    }
}

/// A single observed trade/tick: price and volume at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketDataPoint {
    /// Unix epoch seconds.
    pub timestamp: f64,
    pub symbol: String,
    pub price: f64,
    pub volume: f64,
}

impl MarketDataPoint {
    /// Build a point, normalizing millisecond timestamps to seconds.
    pub fn new(timestamp: f64, symbol: impl Into<String>, price: f64, volume: f64) -> Self {
        Self {
            timestamp: normalize_timestamp(timestamp),
            symbol: symbol.into(),
            price,
            volume,
        }
    }
}

/// Top-of-book snapshot used by liquidity and imbalance indicators.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    /// Unix epoch seconds.
    pub timestamp: f64,
    pub best_bid: f64,
    pub best_ask: f64,
    pub bid_qty: f64,
    pub ask_qty: f64,
}

impl OrderBookSnapshot {
    /// Total quoted liquidity in quote-currency units:
    /// `bid_qty * best_bid + ask_qty * best_ask`.
    pub fn total_liquidity(&self) -> f64 {
        self.bid_qty * self.best_bid + self.ask_qty * self.best_ask
    }

    /// Bid-ask imbalance percentage in [-100, +100], or `None` when both
    /// sides are empty.
    pub fn imbalance_pct(&self) -> Option<f64> {
        let total = self.bid_qty + self.ask_qty;
        if total > 0.0 {
            Some((self.bid_qty - self.ask_qty) / total * 100.0)
        } else {
            None
        }
    }
}

/// Which series an algorithm window slices over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WindowKind {
    Price,
    Volume,
    OrderBook,
}

/// Declarative window request: a window of length `t1 - t2` seconds ending
/// `t2` seconds before the evaluation timestamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowSpec {
    pub t1: f64,
    pub t2: f64,
    pub kind: WindowKind,
}

impl WindowSpec {
    pub fn price(t1: f64, t2: f64) -> Self {
        Self {
            t1,
            t2,
            kind: WindowKind::Price,
        }
    }

    pub fn volume(t1: f64, t2: f64) -> Self {
        Self {
            t1,
            t2,
            kind: WindowKind::Volume,
        }
    }

    pub fn orderbook(t1: f64, t2: f64) -> Self {
        Self {
            t1,
            t2,
            kind: WindowKind::OrderBook,
        }
    }
}

/// Contents of an assembled data window.
#[derive(Debug, Clone, PartialEq)]
pub enum WindowData {
    /// `(timestamp, value)` pairs sorted ascending.
    Points(Vec<(f64, f64)>),
    /// Order-book snapshots sorted ascending by timestamp.
    OrderBook(Vec<OrderBookSnapshot>),
}

/// An immutable, assembled window of data.
///
/// When points exist at or before `start_ts`, the last one is included so
/// time-weighted calculations can attribute duration to the first in-window
/// value.
#[derive(Debug, Clone, PartialEq)]
pub struct DataWindow {
    pub data: WindowData,
    pub start_ts: f64,
    pub end_ts: f64,
}

impl DataWindow {
    pub fn points(data: Vec<(f64, f64)>, start_ts: f64, end_ts: f64) -> Self {
        Self {
            data: WindowData::Points(data),
            start_ts,
            end_ts,
        }
    }

    pub fn orderbook(data: Vec<OrderBookSnapshot>, start_ts: f64, end_ts: f64) -> Self {
        Self {
            data: WindowData::OrderBook(data),
            start_ts,
            end_ts,
        }
    }

    /// Point series, or `None` for order-book windows.
    pub fn point_series(&self) -> Option<&[(f64, f64)]> {
        match &self.data {
            WindowData::Points(points) => Some(points),
            WindowData::OrderBook(_) => None,
        }
    }

    /// Order-book snapshots, or `None` for point windows.
    pub fn snapshots(&self) -> Option<&[OrderBookSnapshot]> {
        match &self.data {
            WindowData::Points(_) => None,
            WindowData::OrderBook(snaps) => Some(snaps),
        }
    }

    pub fn is_empty(&self) -> bool {
        match &self.data {
            WindowData::Points(points) => points.is_empty(),
            WindowData::OrderBook(snaps) => snaps.is_empty(),
        }
    }
}

/// One computed indicator sample.
///
/// `value == None` denotes warm-up or insufficient data. Nil values are legal
/// in memory but must be dropped before batch persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorValue {
    /// Unix epoch seconds, grid-aligned for offline series.
    pub timestamp: f64,
    pub symbol: String,
    pub indicator_id: String,
    pub value: Option<f64>,
    pub metadata: serde_json::Value,
}

/// Side of an order or signal.
///
/// BUY opens/increases a long, SELL closes/decreases a long, SHORT
/// opens/increases a short, COVER closes/decreases a short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
    Short,
    Cover,
}

impl OrderSide {
    /// Whether the order opens (or increases) a position.
    pub fn is_opening(&self) -> bool {
        matches!(self, Self::Buy | Self::Short)
    }

    /// Whether the order closes (or decreases) a position.
    pub fn is_closing(&self) -> bool {
        matches!(self, Self::Sell | Self::Cover)
    }

    /// Parse the uppercase wire form used in signal payloads.
    pub fn parse(side: &str) -> Option<Self> {
        match side.to_uppercase().as_str() {
            "BUY" => Some(Self::Buy),
            "SELL" => Some(Self::Sell),
            "SHORT" => Some(Self::Short),
            "COVER" => Some(Self::Cover),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
            Self::Short => write!(f, "SHORT"),
            Self::Cover => write!(f, "COVER"),
        }
    }
}

/// Cooperative cancellation flag shared between a long-running operation and
/// its controller. Checked at grid slots / candles / dispatch boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
