// =============================================================================
// Indicator Engines
// =============================================================================
//
// Two engines share one algorithm library: the streaming engine computes
// live values from in-memory histories, the offline engine replays
// historical series on a uniform time grid. Both assemble windows through
// `windows::assemble`, which enforces the pre-window anchor invariant.

pub mod offline;
pub mod streaming;
pub mod windows;
