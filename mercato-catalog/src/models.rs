use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Stock counter for one product. `version` is bumped by every write that touches the
/// product or its reservations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProductStock {
    pub tenant_id: Uuid,
    pub product_id: Uuid,
    pub stock_quantity: i64,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Active,
    Confirmed,
    Released,
    Expired,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Active => "active",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Released => "released",
            ReservationStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ReservationStatus::Active),
            "confirmed" => Ok(ReservationStatus::Confirmed),
            "released" => Ok(ReservationStatus::Released),
            "expired" => Ok(ReservationStatus::Expired),
            other => Err(format!("unknown reservation status: {}", other)),
        }
    }
}

/// A hold on stock tied to a reference (usually an order).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InventoryReservation {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i64,
    pub reference_type: String,
    pub reference_id: Uuid,
    pub status: ReservationStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InventoryReservation {
    pub fn new(tenant_id: Uuid, request: &ReserveRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            product_id: request.product_id,
            quantity: request.quantity,
            reference_type: request.reference_type.clone(),
            reference_id: request.reference_id,
            status: ReservationStatus::Active,
            expires_at: request.expires_at,
            created_at: now,
            updated_at: now,
        }
    }

    /// Expiry is computed, not stored: an active reservation past `expires_at` reads as expired.
    pub fn effective_status(&self, now: DateTime<Utc>) -> ReservationStatus {
        match (self.status, self.expires_at) {
            (ReservationStatus::Active, Some(expires_at)) if expires_at <= now => {
                ReservationStatus::Expired
            }
            (status, _) => status,
        }
    }

    pub fn holds_stock(&self, now: DateTime<Utc>) -> bool {
        self.effective_status(now) == ReservationStatus::Active
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReserveRequest {
    pub product_id: Uuid,
    pub quantity: i64,
    pub reference_type: String,
    pub reference_id: Uuid,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Availability {
    pub product_id: Uuid,
    pub stock_quantity: i64,
    pub reserved_quantity: i64,
    pub available_quantity: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockAdjustment {
    pub product_id: Uuid,
    /// Signed change to `stock_quantity`.
    pub delta: i64,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdjustmentOutcome {
    pub product_id: Uuid,
    pub success: bool,
    pub stock_quantity: Option<i64>,
    pub error: Option<String>,
}

/// Sum of quantities still holding stock at `now`.
pub fn reserved_quantity(reservations: &[InventoryReservation], now: DateTime<Utc>) -> i64 {
    reservations
        .iter()
        .filter(|r| r.holds_stock(now))
        .map(|r| r.quantity)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn reservation(expires_at: Option<DateTime<Utc>>) -> InventoryReservation {
        let request = ReserveRequest {
            product_id: Uuid::new_v4(),
            quantity: 3,
            reference_type: "order".to_string(),
            reference_id: Uuid::new_v4(),
            expires_at,
        };
        InventoryReservation::new(Uuid::new_v4(), &request, Utc::now())
    }

    #[test]
    fn test_expiry_is_computed() {
        let now = Utc::now();
        let live = reservation(Some(now + Duration::minutes(5)));
        let stale = reservation(Some(now - Duration::seconds(1)));
        let open_ended = reservation(None);

        assert_eq!(live.effective_status(now), ReservationStatus::Active);
        assert_eq!(stale.effective_status(now), ReservationStatus::Expired);
        assert_eq!(stale.status, ReservationStatus::Active);
        assert_eq!(open_ended.effective_status(now), ReservationStatus::Active);

        assert_eq!(reserved_quantity(&[live, stale, open_ended], now), 6);
    }
}
