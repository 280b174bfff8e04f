use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::{EntityKey, validate_currency, validate_price};
use crate::error::ValidationError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertStatus {
    Active,
    Triggered,
    Expired,
    Cancelled,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Active => "ACTIVE",
            AlertStatus::Triggered => "TRIGGERED",
            AlertStatus::Expired => "EXPIRED",
            AlertStatus::Cancelled => "CANCELLED",
        }
    }
}

impl FromStr for AlertStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(AlertStatus::Active),
            "TRIGGERED" => Ok(AlertStatus::Triggered),
            "EXPIRED" => Ok(AlertStatus::Expired),
            "CANCELLED" => Ok(AlertStatus::Cancelled),
            other => Err(anyhow::anyhow!("unknown alert status: {other}")),
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery channel tag. Delivery itself belongs to the notification collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Email,
    Push,
    Sms,
    InApp,
}

/// User-facing request to start (or re-tune) tracking of one entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertRequest {
    pub user_id: String,
    pub entity: EntityKey,
    pub entity_name: String,
    pub target_price: f64,
    /// Price the user saw when creating the alert; baseline for percentage drops.
    pub current_price: f64,
    pub currency: String,
    pub price_drop_percentage: Option<f64>,
    pub channels: BTreeSet<NotificationChannel>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AlertRequest {
    /// Rejects clearly invalid input only. A target above the current price is
    /// allowed (price-ceiling alerts).
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.user_id.trim().is_empty() {
            return Err(ValidationError::MissingField("user_id"));
        }
        self.entity.validate()?;
        validate_price(self.target_price)?;
        validate_price(self.current_price)?;
        validate_currency(&self.currency)?;

        if let Some(pct) = self.price_drop_percentage {
            if !pct.is_finite() || pct <= 0.0 || pct > 100.0 {
                return Err(ValidationError::InvalidPercentage(pct));
            }
        }
        Ok(())
    }

    /// Channels to persist; email when none were requested.
    pub fn effective_channels(&self) -> BTreeSet<NotificationChannel> {
        if self.channels.is_empty() {
            BTreeSet::from([NotificationChannel::Email])
        } else {
            self.channels.clone()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceAlert {
    pub id: Uuid,
    pub user_id: String,
    pub entity: EntityKey,
    pub entity_name: String,
    pub target_price: f64,
    pub current_price_at_creation: f64,
    pub currency: String,
    pub price_drop_percentage: Option<f64>,
    pub status: AlertStatus,
    pub channels: BTreeSet<NotificationChannel>,
    pub expires_at: Option<DateTime<Utc>>,
    pub triggered_price: Option<f64>,
    pub triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Why an alert fired.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerReason {
    TargetReached,
    PercentageDrop { drop_percent: f64 },
}

impl PriceAlert {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Drop from the creation-time price, in percent. `None` without a positive baseline.
    pub fn drop_percent(&self, latest_price: f64) -> Option<f64> {
        if self.current_price_at_creation > 0.0 {
            Some(
                (self.current_price_at_creation - latest_price) / self.current_price_at_creation
                    * 100.0,
            )
        } else {
            None
        }
    }

    /// Either condition fires the alert; the target check is reported first.
    pub fn trigger_reason(&self, latest_price: f64) -> Option<TriggerReason> {
        if latest_price <= self.target_price {
            return Some(TriggerReason::TargetReached);
        }

        let threshold = self.price_drop_percentage?;
        let drop = self.drop_percent(latest_price)?;
        (drop >= threshold).then_some(TriggerReason::PercentageDrop { drop_percent: drop })
    }
}

/// Trigger decision handed to the notification collaborator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertDecision {
    pub alert_id: Uuid,
    pub user_id: String,
    pub entity: EntityKey,
    pub entity_name: String,
    pub channels: BTreeSet<NotificationChannel>,
    pub triggered_price: f64,
    pub target_price: f64,
    pub currency: String,
    pub reason: TriggerReason,
    pub decided_at: DateTime<Utc>,
}
