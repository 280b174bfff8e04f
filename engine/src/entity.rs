use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Kind of bookable item whose price is tracked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Hotel,
    Flight,
    Tour,
}

impl EntityType {
    pub const ALL: [EntityType; 3] = [EntityType::Hotel, EntityType::Flight, EntityType::Tour];

    /// Storage / wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Hotel => "HOTEL",
            EntityType::Flight => "FLIGHT",
            EntityType::Tour => "TOUR",
        }
    }
}

impl FromStr for EntityType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HOTEL" => Ok(EntityType::Hotel),
            "FLIGHT" => Ok(EntityType::Flight),
            "TOUR" => Ok(EntityType::Tour),
            _ => Err(ValidationError::UnknownEntityType(s.to_string())),
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a tracked entity. The engine never resolves whether the entity
/// exists; callers pass identifiers they already validated.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub entity_type: EntityType,
    pub entity_id: String,
}

impl EntityKey {
    pub fn new(entity_type: EntityType, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.entity_id.trim().is_empty() {
            return Err(ValidationError::MissingField("entity_id"));
        }
        Ok(())
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.entity_id)
    }
}

/// Shared price checks for observations and alert thresholds.
pub(crate) fn validate_price(price: f64) -> Result<(), ValidationError> {
    if !price.is_finite() {
        return Err(ValidationError::NonFinitePrice);
    }
    if price < 0.0 {
        return Err(ValidationError::NegativePrice(price));
    }
    Ok(())
}

/// ISO-4217 style: exactly three ASCII uppercase letters.
pub(crate) fn validate_currency(code: &str) -> Result<(), ValidationError> {
    if code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase()) {
        Ok(())
    } else {
        Err(ValidationError::InvalidCurrency(code.to_string()))
    }
}
