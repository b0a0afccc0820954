use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Cents, Role};

pub type ProductId = Uuid;

/// A catalog item with two price tiers and tracked stock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub category: Option<String>,
    /// Scanner barcodes; unique across all products.
    pub barcodes: Vec<String>,
    pub member_price_cents: Cents,
    pub guest_price_cents: Cents,
    /// Mutated only through recorded stock movements,
    /// never by a generic product update.
    pub stock: i64,
    /// Reorder threshold, informational only.
    pub min_stock: i64,
    /// Listed for sale at the till.
    pub available: bool,
    pub created_at: DateTime<Utc>,
}

impl Product {
    pub fn new(
        name: impl Into<String>,
        member_price_cents: Cents,
        guest_price_cents: Cents,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            category: None,
            barcodes: Vec::new(),
            member_price_cents,
            guest_price_cents,
            stock: 0,
            min_stock: 0,
            available: true,
            created_at: Utc::now(),
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_barcodes(mut self, barcodes: Vec<String>) -> Self {
        self.barcodes = barcodes;
        self
    }

    pub fn with_min_stock(mut self, min_stock: i64) -> Self {
        self.min_stock = min_stock;
        self
    }

    /// Unit price for the buyer's role tier.
    pub fn price_for(&self, role: Role) -> Cents {
        if role.pays_member_price() {
            self.member_price_cents
        } else {
            self.guest_price_cents
        }
    }

    pub fn is_low_stock(&self) -> bool {
        self.stock <= self.min_stock
    }
}
