use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ProductId;

pub type MovementId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementType {
    /// Stock leaving through a sale; written only by the sale flow
    Sale,
    /// Stock returning through a cancelled sale; written only by the cancel flow
    Cancellation,
    /// Goods received from a supplier
    Purchase,
    /// Opening stock when a product enters the catalog
    Initial,
    /// Manual inventory correction, signed
    Correction,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Sale => "sale",
            MovementType::Cancellation => "cancellation",
            MovementType::Purchase => "purchase",
            MovementType::Initial => "initial",
            MovementType::Correction => "correction",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "sale" => Some(MovementType::Sale),
            "cancellation" => Some(MovementType::Cancellation),
            "purchase" => Some(MovementType::Purchase),
            "initial" => Some(MovementType::Initial),
            "correction" => Some(MovementType::Correction),
            _ => None,
        }
    }

    /// Types an operator may record directly. Sale and cancellation rows are
    /// written only by the sale/cancel flows.
    pub fn is_manual_entry(&self) -> bool {
        matches!(
            self,
            MovementType::Purchase | MovementType::Initial | MovementType::Correction
        )
    }

    /// Types whose rows must never be deleted: they are the two halves of the
    /// audited sale/cancellation pair.
    pub fn is_protected(&self) -> bool {
        matches!(self, MovementType::Sale | MovementType::Cancellation)
    }
}

impl std::fmt::Display for MovementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Turn an operator-entered quantity into the signed stock delta.
/// Purchases and opening stock always increase stock regardless of the sign
/// typed; corrections keep their sign.
pub fn normalize_delta(movement_type: MovementType, quantity: i64) -> i64 {
    match movement_type {
        MovementType::Purchase | MovementType::Initial => quantity.abs(),
        _ => quantity,
    }
}

/// An audited, signed change to product stock.
/// Invariant: stock_after = stock_before + quantity_delta.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: MovementId,
    pub product_id: ProductId,
    pub movement_type: MovementType,
    pub quantity_delta: i64,
    pub stock_before: i64,
    pub stock_after: i64,
    pub reason: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl StockMovement {
    pub fn new(
        product_id: ProductId,
        movement_type: MovementType,
        quantity_delta: i64,
        stock_before: i64,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            product_id,
            movement_type,
            quantity_delta,
            stock_before,
            stock_after: stock_before + quantity_delta,
            reason: None,
            created_by: created_by.into(),
            created_at: Utc::now(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}
