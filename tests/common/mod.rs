// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use deckel::application::LedgerService;
use deckel::domain::{Account, MovementType, Product, Role, SaleItem};
use tempfile::TempDir;

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(LedgerService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let service = LedgerService::init(db_path.to_str().unwrap()).await?;
    Ok((service, temp_dir))
}

/// Helper to parse a date string into DateTime<Utc>
pub fn parse_date(date_str: &str) -> DateTime<Utc> {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_utc()
}

/// Helper to build a sale line for a product at its member price
pub fn item(product: &Product, quantity: i64) -> SaleItem {
    SaleItem::new(
        Some(product.id),
        product.name.clone(),
        quantity,
        product.member_price_cents,
    )
}

/// Test fixture: Standard club setup with members and a stocked bar
pub struct StandardClub {
    pub anna: Account,
    pub max: Account,
    pub gast: Account,
    pub helles: Product,
    pub mate: Product,
}

impl StandardClub {
    /// Create two members with barcodes, one guest, and two stocked products
    pub async fn create(service: &LedgerService) -> Result<Self> {
        let anna = Self::member(service, "Anna", "Schmidt", "USER001").await?;
        let max = Self::member(service, "Max", "Weber", "USER002").await?;
        let gast = service
            .create_account("Tages".into(), "Gast".into(), Role::Guest, None, vec![])
            .await?;

        let helles = Self::product(service, "Augustiner Hell", 250, 300, 24).await?;
        let mate = Self::product(service, "Club-Mate", 150, 200, 12).await?;

        Ok(Self {
            anna,
            max,
            gast,
            helles,
            mate,
        })
    }

    /// Create a member account with a single scanner barcode
    pub async fn member(
        service: &LedgerService,
        first_name: &str,
        last_name: &str,
        barcode: &str,
    ) -> Result<Account> {
        let account = service
            .create_account(
                first_name.into(),
                last_name.into(),
                Role::Member,
                None,
                vec![barcode.into()],
            )
            .await?;
        Ok(account)
    }

    /// Create a product and book its opening stock
    pub async fn product(
        service: &LedgerService,
        name: &str,
        member_price_cents: i64,
        guest_price_cents: i64,
        opening_stock: i64,
    ) -> Result<Product> {
        let product = service
            .create_product(
                name.into(),
                member_price_cents,
                guest_price_cents,
                None,
                vec![],
                0,
            )
            .await?;
        if opening_stock > 0 {
            service
                .record_stock_movement(
                    product.id,
                    MovementType::Initial,
                    opening_stock,
                    Some("Erstbestand".into()),
                    None,
                )
                .await?;
        }
        // Re-fetch so the caller sees the opening stock
        let product = service.get_product(product.id).await?;
        Ok(product)
    }
}
