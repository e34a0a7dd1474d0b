// =============================================================================
// Variant Repository — persisted indicator configurations
// =============================================================================
//
// CRUD over `indicator_variants` rows. Parameters are validated against the
// owning algorithm's definitions at write time (fail fast) and trusted at
// read time. Deletes are soft: rows flip `is_deleted` and become invisible
// to `get`/`list`; a second delete reports not-found.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::EngineError;
use crate::indicators::registry::AlgorithmRegistry;
use crate::indicators::{validate_and_coerce, Algorithm, IndicatorParameters};
use crate::store::{now_naive_utc, TimeSeriesStore, VariantFilter, VariantRow, VariantRowPatch};

// =============================================================================
// Domain objects
// =============================================================================

/// A persisted, named configuration of one algorithm with validated
/// parameters.
#[derive(Debug, Clone)]
pub struct IndicatorVariant {
    pub id: String,
    pub name: String,
    pub base_indicator_type: String,
    pub variant_type: String,
    pub description: String,
    pub parameters: IndicatorParameters,
    pub is_system: bool,
    pub created_by: String,
    pub user_id: String,
    pub scope: String,
    pub created_at: chrono::NaiveDateTime,
    pub updated_at: chrono::NaiveDateTime,
    pub schema_version: i32,
}

impl IndicatorVariant {
    fn from_row(row: VariantRow) -> Self {
        let parameters = serde_json::from_str::<Value>(&row.parameters)
            .map(IndicatorParameters::from_value)
            .unwrap_or_default();

        Self {
            id: row.id,
            name: row.name,
            base_indicator_type: row.base_indicator_type,
            variant_type: row.variant_type,
            description: row.description,
            parameters,
            is_system: row.is_system,
            created_by: row.created_by,
            user_id: row.user_id,
            scope: row.scope,
            created_at: row.created_at,
            updated_at: row.updated_at,
            schema_version: row.schema_version,
        }
    }
}

/// Input for `create`.
#[derive(Debug, Clone)]
pub struct CreateVariant {
    pub name: String,
    pub base_indicator_type: String,
    pub variant_type: String,
    pub description: String,
    pub parameters: Map<String, Value>,
    pub created_by: String,
    pub user_id: Option<String>,
    pub scope: Option<String>,
    pub is_system: bool,
}

/// Patch for `update`. Parameters are re-validated against the variant's
/// (immutable) algorithm.
#[derive(Debug, Clone, Default)]
pub struct VariantUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub parameters: Option<Map<String, Value>>,
    pub scope: Option<String>,
}

// =============================================================================
// Repository
// =============================================================================

pub struct VariantRepository {
    store: Arc<dyn TimeSeriesStore>,
    registry: Arc<AlgorithmRegistry>,
}

impl VariantRepository {
    pub fn new(store: Arc<dyn TimeSeriesStore>, registry: Arc<AlgorithmRegistry>) -> Self {
        Self { store, registry }
    }

    /// Create a new variant; returns its id.
    ///
    /// Steps: generate a UUID, resolve the algorithm by the uppercased
    /// `base_indicator_type`, validate/coerce every provided parameter,
    /// apply defaults for missing required parameters, serialize with
    /// sorted keys, insert with `is_deleted = false` and naive-UTC stamps.
    pub async fn create(&self, data: CreateVariant) -> Result<String, EngineError> {
        let variant_id = Uuid::new_v4().to_string();
        let base_indicator_type = data.base_indicator_type.to_uppercase();

        let algorithm = self.resolve_algorithm(&base_indicator_type)?;
        let parameters_json = encode_parameters(algorithm.as_ref(), &data.parameters)?;

        let user_id = data.user_id.unwrap_or_else(|| data.created_by.clone());
        let scope = data.scope.unwrap_or_else(|| format!("user_{user_id}"));
        let now = now_naive_utc();

        let row = VariantRow {
            id: variant_id.clone(),
            name: data.name.clone(),
            base_indicator_type: base_indicator_type.clone(),
            variant_type: data.variant_type,
            description: data.description,
            parameters: parameters_json,
            is_system: data.is_system,
            created_by: data.created_by,
            user_id,
            scope,
            is_deleted: false,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            schema_version: 1,
        };

        self.store.insert_variant(row).await?;

        info!(
            variant_id = %variant_id,
            name = %data.name,
            base_indicator_type = %base_indicator_type,
            "variant created"
        );

        Ok(variant_id)
    }

    /// Fetch a variant by id; soft-deleted rows are invisible.
    pub async fn get(&self, variant_id: &str) -> Result<Option<IndicatorVariant>, EngineError> {
        Ok(self
            .store
            .fetch_variant(variant_id)
            .await?
            .map(IndicatorVariant::from_row))
    }

    /// List non-deleted variants matching the filter, newest first.
    pub async fn list(&self, filter: &VariantFilter) -> Result<Vec<IndicatorVariant>, EngineError> {
        let rows = self.store.fetch_variants(filter).await?;
        debug!(count = rows.len(), "variant list");
        Ok(rows.into_iter().map(IndicatorVariant::from_row).collect())
    }

    /// All active variants, for engine startup.
    pub async fn load_all(&self) -> Result<Vec<IndicatorVariant>, EngineError> {
        self.list(&VariantFilter::default()).await
    }

    /// Update `name`, `description`, `parameters`, and/or `scope`.
    /// Re-validates parameters against the variant's algorithm and bumps
    /// `updated_at`.
    pub async fn update(&self, variant_id: &str, update: VariantUpdate) -> Result<(), EngineError> {
        let existing = self
            .get(variant_id)
            .await?
            .ok_or_else(|| EngineError::VariantNotFound(variant_id.to_string()))?;

        let parameters = match &update.parameters {
            Some(params) => {
                let algorithm = self.resolve_algorithm(&existing.base_indicator_type)?;
                Some(encode_parameters(algorithm.as_ref(), params)?)
            }
            None => None,
        };

        let patch = VariantRowPatch {
            name: update.name,
            description: update.description,
            parameters,
            scope: update.scope,
            updated_at: now_naive_utc(),
        };

        if !self.store.update_variant_row(variant_id, patch).await? {
            return Err(EngineError::VariantNotFound(variant_id.to_string()));
        }

        info!(variant_id = %variant_id, "variant updated");
        Ok(())
    }

    /// Soft delete. A second delete against the same id reports not-found.
    pub async fn delete(&self, variant_id: &str) -> Result<(), EngineError> {
        if !self
            .store
            .mark_variant_deleted(variant_id, now_naive_utc())
            .await?
        {
            return Err(EngineError::VariantNotFound(variant_id.to_string()));
        }

        info!(variant_id = %variant_id, "variant deleted");
        Ok(())
    }

    fn resolve_algorithm(&self, indicator_type: &str) -> Result<Arc<dyn Algorithm>, EngineError> {
        self.registry
            .get(indicator_type)
            .ok_or_else(|| EngineError::UnknownAlgorithm {
                indicator_type: indicator_type.to_string(),
                available: self.registry.indicator_types(),
            })
    }
}

/// Validate user parameters against the algorithm's definitions and encode
/// them as JSON with sorted keys.
///
/// Unknown parameter names fail fast, naming the valid set. Missing required
/// parameters take their declared default, or fail when the definition has
/// none.
fn encode_parameters(
    algorithm: &dyn Algorithm,
    parameters: &Map<String, Value>,
) -> Result<String, EngineError> {
    let definitions = algorithm.parameters();
    let by_name: BTreeMap<&str, _> = definitions.iter().map(|d| (d.name, d)).collect();

    let mut validated: BTreeMap<String, Value> = BTreeMap::new();

    for (name, value) in parameters {
        let Some(definition) = by_name.get(name.as_str()) else {
            return Err(EngineError::InvalidParameter {
                name: name.clone(),
                reason: format!(
                    "unknown parameter for {}; valid parameters: {:?}",
                    algorithm.indicator_type(),
                    by_name.keys().collect::<Vec<_>>()
                ),
            });
        };

        validated.insert(name.clone(), validate_and_coerce(value, definition)?);
    }

    for definition in &definitions {
        if validated.contains_key(definition.name) || !definition.required {
            continue;
        }
        match &definition.default {
            Some(default) => {
                validated.insert(definition.name.to_string(), default.clone());
            }
            None => {
                return Err(EngineError::InvalidParameter {
                    name: definition.name.to_string(),
                    reason: "required parameter is missing".into(),
                });
            }
        }
    }

    serde_json::to_string(&validated).map_err(|e| EngineError::FatalStore(e.to_string()))
}
