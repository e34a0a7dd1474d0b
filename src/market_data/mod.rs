// =============================================================================
// Market Data Module
// =============================================================================
//
// Per-symbol sliding histories of ticks and order-book snapshots, bounded by
// age rather than count. The engine owns these buffers; other components
// read them through the engine's API.

pub mod history;

pub use history::MarketHistory;
