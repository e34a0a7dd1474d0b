// =============================================================================
// Algorithm Registry — builtin discovery, lookup, metadata
// =============================================================================
//
// The Rust rendition of auto-discovery: every builtin algorithm is
// enumerated in `builtin_algorithms()` and registered by its indicator
// type. Re-registering a type logs a warning and overwrites the previous
// binding, so running discovery twice never produces duplicates.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::indicators::bid_ask_imbalance::BidAskImbalance;
use crate::indicators::dump_exhaustion::DumpExhaustionScore;
use crate::indicators::liquidity_drain::LiquidityDrainIndex;
use crate::indicators::momentum_reversal::MomentumReversalIndex;
use crate::indicators::price_momentum::PriceMomentum;
use crate::indicators::price_velocity::PriceVelocity;
use crate::indicators::pump_magnitude::PumpMagnitudePct;
use crate::indicators::rsi::Rsi;
use crate::indicators::sma::Sma;
use crate::indicators::support_level_proximity::SupportLevelProximity;
use crate::indicators::twpa::Twpa;
use crate::indicators::twpa_ratio::TwpaRatio;
use crate::indicators::velocity_cascade::VelocityCascade;
use crate::indicators::velocity_stabilization::VelocityStabilizationIndex;
use crate::indicators::volume_surge::VolumeSurgeRatio;
use crate::indicators::{Algorithm, IndicatorParameters};

/// Every algorithm shipped with the engine.
fn builtin_algorithms() -> Vec<Arc<dyn Algorithm>> {
    vec![
        Arc::new(Twpa),
        Arc::new(TwpaRatio),
        Arc::new(PumpMagnitudePct),
        Arc::new(PriceVelocity),
        Arc::new(PriceMomentum),
        Arc::new(VolumeSurgeRatio),
        Arc::new(VelocityCascade),
        Arc::new(LiquidityDrainIndex),
        Arc::new(MomentumReversalIndex),
        Arc::new(BidAskImbalance),
        Arc::new(DumpExhaustionScore),
        Arc::new(SupportLevelProximity),
        Arc::new(VelocityStabilizationIndex),
        Arc::new(Sma),
        Arc::new(Rsi),
    ]
}

/// Registry statistics for status endpoints and logs.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RegistryStatistics {
    pub total_algorithms: usize,
    pub categories_count: usize,
    pub algorithms_by_category: HashMap<String, usize>,
}

pub struct AlgorithmRegistry {
    algorithms: RwLock<HashMap<String, Arc<dyn Algorithm>>>,
}

impl AlgorithmRegistry {
    /// Empty registry; callers normally want [`AlgorithmRegistry::with_builtins`].
    pub fn new() -> Self {
        Self {
            algorithms: RwLock::new(HashMap::new()),
        }
    }

    /// Registry with every builtin algorithm registered.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.discover_builtins();
        registry
    }

    /// Register every builtin algorithm. Idempotent: a second invocation
    /// overwrites in place and returns the same count.
    pub fn discover_builtins(&self) -> usize {
        let mut registered = 0usize;
        for algorithm in builtin_algorithms() {
            self.register(algorithm);
            registered += 1;
        }

        debug!(total = self.len(), registered, "algorithm discovery completed");
        registered
    }

    /// Register one algorithm by its indicator type. Duplicate registration
    /// warns and overwrites the previous binding.
    pub fn register(&self, algorithm: Arc<dyn Algorithm>) {
        let indicator_type = algorithm.indicator_type().to_string();
        let mut algorithms = self.algorithms.write();

        if let Some(existing) = algorithms.get(&indicator_type) {
            warn!(
                indicator_type = %indicator_type,
                existing_name = existing.name(),
                new_name = algorithm.name(),
                "algorithm overwrite"
            );
        }

        algorithms.insert(indicator_type, algorithm);
    }

    pub fn get(&self, indicator_type: &str) -> Option<Arc<dyn Algorithm>> {
        self.algorithms.read().get(indicator_type).cloned()
    }

    /// All registered indicator types, sorted.
    pub fn indicator_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.algorithms.read().keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.algorithms.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.algorithms.read().is_empty()
    }

    /// Algorithms in the given category.
    pub fn algorithms_by_category(&self, category: &str) -> Vec<Arc<dyn Algorithm>> {
        self.algorithms
            .read()
            .values()
            .filter(|a| a.category() == category)
            .cloned()
            .collect()
    }

    /// All known categories, sorted.
    pub fn categories(&self) -> Vec<String> {
        let mut categories: Vec<String> = self
            .algorithms
            .read()
            .values()
            .map(|a| a.category().to_string())
            .collect();
        categories.sort();
        categories.dedup();
        categories
    }

    /// Refresh interval for an algorithm under the given parameters, or
    /// `None` when the type is unknown.
    pub fn refresh_interval(&self, indicator_type: &str, params: &IndicatorParameters) -> Option<f64> {
        self.get(indicator_type).map(|a| a.refresh_interval(params))
    }

    pub fn statistics(&self) -> RegistryStatistics {
        let algorithms = self.algorithms.read();

        let mut by_category: HashMap<String, usize> = HashMap::new();
        for algorithm in algorithms.values() {
            *by_category.entry(algorithm.category().to_string()).or_insert(0) += 1;
        }

        RegistryStatistics {
            total_algorithms: algorithms.len(),
            categories_count: by_category.len(),
            algorithms_by_category: by_category,
        }
    }
}

impl Default for AlgorithmRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtins_register_once() {
        let registry = AlgorithmRegistry::with_builtins();
        assert_eq!(registry.len(), 15);
        assert!(registry.get("TWPA").is_some());
        assert!(registry.get("PUMP_MAGNITUDE_PCT").is_some());
        assert!(registry.get("DUMP_EXHAUSTION_SCORE").is_some());
        assert!(registry.get("NOT_AN_ALGO").is_none());
    }

    #[test]
    fn discovery_is_idempotent() {
        let registry = AlgorithmRegistry::with_builtins();
        let before = registry.len();
        registry.discover_builtins();
        assert_eq!(registry.len(), before);
    }

    #[test]
    fn lookup_by_category() {
        let registry = AlgorithmRegistry::with_builtins();
        let general = registry.algorithms_by_category("general");
        assert!(general.len() >= 10);
        let oscillators = registry.algorithms_by_category("oscillator");
        assert_eq!(oscillators.len(), 1);
        assert_eq!(oscillators[0].indicator_type(), "RSI");
    }

    #[test]
    fn categories_are_sorted_and_unique() {
        let registry = AlgorithmRegistry::with_builtins();
        let categories = registry.categories();
        assert!(categories.contains(&"general".to_string()));
        assert!(categories.contains(&"trend".to_string()));
        let mut sorted = categories.clone();
        sorted.sort();
        assert_eq!(categories, sorted);
    }

    #[test]
    fn refresh_interval_for_known_and_unknown_types() {
        let registry = AlgorithmRegistry::with_builtins();
        let params = IndicatorParameters::from_value(json!({"t1": 5.0, "t2": 0.0}));
        assert_eq!(registry.refresh_interval("TWPA", &params), Some(1.0));
        assert_eq!(registry.refresh_interval("NOPE", &params), None);
    }

    #[test]
    fn statistics_count_per_category() {
        let registry = AlgorithmRegistry::with_builtins();
        let stats = registry.statistics();
        assert_eq!(stats.total_algorithms, 15);
        assert_eq!(
            stats.algorithms_by_category.values().sum::<usize>(),
            stats.total_algorithms
        );
    }
}
