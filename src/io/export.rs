use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;

use crate::application::{LedgerService, TransactionFilter};
use crate::domain::{Account, BillingBatch, Product, StockMovement, Transaction};

/// Database snapshot for full export/import
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSnapshot {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub accounts: Vec<Account>,
    pub products: Vec<Product>,
    pub transactions: Vec<Transaction>,
    pub stock_movements: Vec<StockMovement>,
    pub billings: Vec<BillingBatch>,
}

/// Exporter for converting ledger data to various formats
pub struct Exporter<'a> {
    service: &'a LedgerService,
}

impl<'a> Exporter<'a> {
    pub fn new(service: &'a LedgerService) -> Self {
        Self { service }
    }

    /// Export transactions to CSV format
    pub async fn export_transactions_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let transactions = self
            .service
            .list_transactions(TransactionFilter::default())
            .await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        // Write header
        csv_writer.write_record(&[
            "id",
            "created_at",
            "account",
            "description",
            "quantity",
            "unit_price_cents",
            "total_cents",
            "payment_method",
            "cancelled",
            "billing_id",
        ])?;

        let mut count = 0;
        for transaction in &transactions {
            // History outlives its account; fall back to the raw id
            let account_name = match self.service.get_account(transaction.account_id).await {
                Ok(account) => account.full_name(),
                Err(_) => transaction.account_id.to_string(),
            };

            csv_writer.write_record(&[
                transaction.id.to_string(),
                transaction.created_at.to_rfc3339(),
                account_name,
                transaction.description.clone(),
                transaction.quantity.to_string(),
                transaction.unit_price_cents.to_string(),
                transaction.total_cents.to_string(),
                transaction.payment_method.as_str().to_string(),
                transaction.cancelled.to_string(),
                transaction
                    .billing_id
                    .map(|id| id.to_string())
                    .unwrap_or_default(),
            ])?;
            count += 1;
        }

        csv_writer.flush()?;
        Ok(count)
    }

    /// Export accounts with their balances to CSV format
    pub async fn export_accounts_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let accounts = self.service.list_accounts().await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        // Write header
        csv_writer.write_record(&[
            "first_name",
            "last_name",
            "email",
            "role",
            "balance_cents",
            "barcodes",
            "sepa_active",
            "iban",
        ])?;

        let mut count = 0;
        for account in &accounts {
            csv_writer.write_record(&[
                account.first_name.clone(),
                account.last_name.clone(),
                account.email.clone().unwrap_or_default(),
                account.role.as_str().to_string(),
                account.balance_cents.to_string(),
                account.barcodes.join(";"),
                account.sepa_active.to_string(),
                account.iban.clone().unwrap_or_default(),
            ])?;
            count += 1;
        }

        csv_writer.flush()?;
        Ok(count)
    }

    /// Export the product catalog to CSV format
    pub async fn export_products_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let products = self.service.list_products(true).await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        // Write header
        csv_writer.write_record(&[
            "name",
            "category",
            "member_price_cents",
            "guest_price_cents",
            "stock",
            "min_stock",
            "available",
            "barcodes",
        ])?;

        let mut count = 0;
        for product in &products {
            csv_writer.write_record(&[
                product.name.clone(),
                product.category.clone().unwrap_or_default(),
                product.member_price_cents.to_string(),
                product.guest_price_cents.to_string(),
                product.stock.to_string(),
                product.min_stock.to_string(),
                product.available.to_string(),
                product.barcodes.join(";"),
            ])?;
            count += 1;
        }

        csv_writer.flush()?;
        Ok(count)
    }

    /// Export the SEPA direct-debit run to CSV format: one row per eligible
    /// account with the amount to collect.
    pub async fn export_sepa_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let debits = self.service.sepa_eligible_accounts().await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        // Write header
        csv_writer.write_record(&[
            "account",
            "account_holder",
            "iban",
            "mandate_reference",
            "debit_cents",
        ])?;

        let mut count = 0;
        for debit in &debits {
            let holder = debit
                .account
                .account_holder
                .clone()
                .unwrap_or_else(|| debit.account.full_name());

            csv_writer.write_record(&[
                debit.account.full_name(),
                holder,
                debit.account.iban.clone().unwrap_or_default(),
                debit.account.mandate_reference.clone().unwrap_or_default(),
                debit.debit_amount_cents.to_string(),
            ])?;
            count += 1;
        }

        csv_writer.flush()?;
        Ok(count)
    }

    /// Export full database as JSON snapshot
    pub async fn export_full_json<W: Write>(&self, mut writer: W) -> Result<DatabaseSnapshot> {
        let accounts = self.service.list_accounts().await?;
        let products = self.service.list_products(true).await?;
        let transactions = self
            .service
            .list_transactions(TransactionFilter::default())
            .await?;
        let stock_movements = self.service.list_movements(None, None).await?;
        let billings = self.service.list_billings().await?;

        let snapshot = DatabaseSnapshot {
            version: env!("CARGO_PKG_VERSION").to_string(),
            exported_at: Utc::now(),
            accounts,
            products,
            transactions,
            stock_movements,
            billings,
        };

        let json = serde_json::to_string_pretty(&snapshot)?;
        writer.write_all(json.as_bytes())?;
        writer.flush()?;

        Ok(snapshot)
    }
}
