//! Cache key layout
//!
//! Keys are colon-delimited: `{entity_type}:{id}:stats:{year}:{term}:{week}`,
//! with `all` standing in for an absent period filter. The cache itself
//! treats keys as opaque strings.

use crate::entity::{EntityScope, EntityType, Period};

const ANY: &str = "all";

/// Key for the rolled-up statistics of one entity over one period
pub fn stats_key(scope: EntityScope, period: Period) -> String {
    format!(
        "{}:{}:stats:{}:{}:{}",
        scope.entity_type.as_str(),
        scope.id,
        segment(period.year),
        segment(period.term),
        segment(period.week),
    )
}

/// Pattern matching every key cached for one entity
pub fn entity_pattern(scope: EntityScope) -> String {
    format!("{}:{}:*", scope.entity_type.as_str(), scope.id)
}

/// Pattern matching every key cached for an entity type
pub fn entity_type_pattern(entity_type: EntityType) -> String {
    format!("{}:*", entity_type.as_str())
}

fn segment<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| ANY.to_string())
}
