use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{EntityKey, EntityType, validate_currency, validate_price};
use crate::error::ValidationError;

/// Structured metadata captured alongside a price, one shape per entity type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObservationContext {
    Hotel {
        check_in: NaiveDate,
        check_out: NaiveDate,
        guests: u32,
    },
    Flight {
        origin: String,
        destination: String,
        departure_date: NaiveDate,
        passengers: u32,
    },
    Tour {
        tour_date: NaiveDate,
        participants: u32,
    },
}

impl ObservationContext {
    pub fn entity_type(&self) -> EntityType {
        match self {
            ObservationContext::Hotel { .. } => EntityType::Hotel,
            ObservationContext::Flight { .. } => EntityType::Flight,
            ObservationContext::Tour { .. } => EntityType::Tour,
        }
    }
}

/// A price sample submitted by a collaborator, not yet persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewObservation {
    pub entity: EntityKey,
    pub price: f64,
    pub currency: String,
    pub observed_at: DateTime<Utc>,
    pub source: String,
    pub context: Option<ObservationContext>,
}

impl NewObservation {
    pub fn new(
        entity: EntityKey,
        price: f64,
        currency: impl Into<String>,
        observed_at: DateTime<Utc>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            entity,
            price,
            currency: currency.into(),
            observed_at,
            source: source.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: ObservationContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.entity.validate()?;
        validate_price(self.price)?;
        validate_currency(&self.currency)?;

        if self.source.trim().is_empty() {
            return Err(ValidationError::MissingField("source"));
        }

        if let Some(ctx) = &self.context {
            let kind = ctx.entity_type();
            if kind != self.entity.entity_type {
                return Err(ValidationError::ContextMismatch {
                    entity: self.entity.entity_type.as_str(),
                    context: kind.as_str(),
                });
            }
        }

        Ok(())
    }
}

/// A persisted observation. Never mutated after insert.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub id: i64,
    pub entity: EntityKey,
    pub price: f64,
    pub currency: String,
    pub observed_at: DateTime<Utc>,
    pub source: String,
    pub context: Option<ObservationContext>,
}

/// Outcome of a bulk insert.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchReport {
    /// Rows actually written.
    pub inserted: u64,
    /// Rows skipped because the natural key already existed.
    pub duplicates: u64,
    /// Rows rejected by validation, by position in the submitted batch.
    pub rejected: Vec<(usize, ValidationError)>,
}

impl BatchReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Result of a single-row insert attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn hotel_obs(price: f64) -> NewObservation {
        NewObservation::new(
            EntityKey::new(EntityType::Hotel, "test-001"),
            price,
            "THB",
            Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap(),
            "search",
        )
    }

    #[test]
    fn valid_observation_passes() {
        assert!(hotel_obs(1200.0).validate().is_ok());
    }

    #[test]
    fn negative_price_rejected() {
        assert_eq!(
            hotel_obs(-1.0).validate(),
            Err(ValidationError::NegativePrice(-1.0))
        );
    }

    #[test]
    fn empty_source_rejected() {
        let mut o = hotel_obs(10.0);
        o.source = String::new();
        assert_eq!(o.validate(), Err(ValidationError::MissingField("source")));
    }

    #[test]
    fn context_must_match_entity_type() {
        let o = hotel_obs(10.0).with_context(ObservationContext::Tour {
            tour_date: NaiveDate::from_ymd_opt(2026, 2, 1).unwrap(),
            participants: 2,
        });

        assert_eq!(
            o.validate(),
            Err(ValidationError::ContextMismatch {
                entity: "HOTEL",
                context: "TOUR"
            })
        );
    }

    #[test]
    fn context_serializes_with_kind_tag() {
        let ctx = ObservationContext::Hotel {
            check_in: NaiveDate::from_ymd_opt(2026, 2, 1).unwrap(),
            check_out: NaiveDate::from_ymd_opt(2026, 2, 3).unwrap(),
            guests: 2,
        };
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["kind"], "hotel");
        assert_eq!(json["guests"], 2);

        let back: ObservationContext = serde_json::from_value(json).unwrap();
        assert_eq!(back, ctx);
    }
}
