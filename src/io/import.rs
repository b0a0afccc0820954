use anyhow::Result;
use std::io::Read;

use crate::application::LedgerService;
use crate::domain::{parse_cents, MovementType, Role};

/// Result of an import operation
#[derive(Debug, Clone)]
pub struct ImportResult {
    pub imported: usize,
    pub skipped: usize,
    pub errors: Vec<ImportError>,
}

/// Error that occurred during import
#[derive(Debug, Clone)]
pub struct ImportError {
    pub line: usize,
    pub field: Option<String>,
    pub error: String,
}

/// Options for import operations
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub dry_run: bool,
    pub skip_duplicates: bool,
    pub validate_only: bool,
}

/// Importer for loading data into the ledger
pub struct Importer<'a> {
    service: &'a LedgerService,
}

impl<'a> Importer<'a> {
    pub fn new(service: &'a LedgerService) -> Self {
        Self { service }
    }

    /// Import accounts from CSV.
    ///
    /// Expected columns: first_name, last_name, email, role, barcodes
    /// (semicolon-separated), iban, account_holder, mandate_reference.
    pub async fn import_accounts_csv<R: Read>(
        &self,
        reader: R,
        options: ImportOptions,
    ) -> Result<ImportResult> {
        let mut csv_reader = csv::Reader::from_reader(reader);
        let mut imported = 0;
        let mut skipped = 0;
        let mut errors = Vec::new();

        for (line_num, result) in csv_reader.records().enumerate() {
            let line = line_num + 2; // +2 for header and 0-indexing

            let record = match result {
                Ok(r) => r,
                Err(e) => {
                    errors.push(ImportError {
                        line,
                        field: None,
                        error: format!("CSV parse error: {}", e),
                    });
                    continue;
                }
            };

            // Parse CSV record
            let first_name = record.get(0).unwrap_or("").to_string();
            let last_name = record.get(1).unwrap_or("").to_string();
            let email = record.get(2).and_then(|s| {
                if s.is_empty() {
                    None
                } else {
                    Some(s.to_string())
                }
            });
            let role_str = record.get(3).unwrap_or("");
            let barcodes = split_codes(record.get(4).unwrap_or(""));

            // Validate and parse
            let role = if role_str.is_empty() {
                Role::Member
            } else {
                match Role::from_str(role_str) {
                    Some(role) => role,
                    None => {
                        errors.push(ImportError {
                            line,
                            field: Some("role".to_string()),
                            error: format!("Unknown role: {}", role_str),
                        });
                        continue;
                    }
                }
            };

            // Skip actual import if dry run or validate only
            if options.dry_run || options.validate_only {
                imported += 1;
                continue;
            }

            // Import the account
            let account = match self
                .service
                .create_account(first_name, last_name, role, email, barcodes)
                .await
            {
                Ok(account) => account,
                Err(e) => {
                    if options.skip_duplicates {
                        skipped += 1;
                    } else {
                        errors.push(ImportError {
                            line,
                            field: None,
                            error: format!("Account creation failed: {}", e),
                        });
                    }
                    continue;
                }
            };

            // Mandate columns are optional as a group, keyed on the IBAN
            let iban = record.get(5).unwrap_or("");
            if !iban.is_empty() {
                let holder = match record.get(6) {
                    Some(h) if !h.is_empty() => h.to_string(),
                    _ => account.full_name(),
                };
                let reference = record.get(7).unwrap_or("").to_string();

                let mandated = account.with_mandate(iban, holder, reference);
                if let Err(e) = self.service.update_account(&mandated).await {
                    errors.push(ImportError {
                        line,
                        field: Some("iban".to_string()),
                        error: format!("Mandate update failed: {}", e),
                    });
                    continue;
                }
            }

            imported += 1;
        }

        Ok(ImportResult {
            imported,
            skipped,
            errors,
        })
    }

    /// Import products from CSV.
    ///
    /// Expected columns: name, category, member_price, guest_price, barcodes
    /// (semicolon-separated), min_stock, initial_stock. Prices accept both
    /// decimal separators ("2.50" and "2,50"). A positive initial_stock is
    /// recorded as an `initial` stock movement after the product is created.
    pub async fn import_products_csv<R: Read>(
        &self,
        reader: R,
        options: ImportOptions,
    ) -> Result<ImportResult> {
        let mut csv_reader = csv::Reader::from_reader(reader);
        let mut imported = 0;
        let mut skipped = 0;
        let mut errors = Vec::new();

        for (line_num, result) in csv_reader.records().enumerate() {
            let line = line_num + 2; // +2 for header and 0-indexing

            let record = match result {
                Ok(r) => r,
                Err(e) => {
                    errors.push(ImportError {
                        line,
                        field: None,
                        error: format!("CSV parse error: {}", e),
                    });
                    continue;
                }
            };

            // Parse CSV record
            let name = record.get(0).unwrap_or("").to_string();
            let category = record.get(1).and_then(|s| {
                if s.is_empty() {
                    None
                } else {
                    Some(s.to_string())
                }
            });
            let member_price_str = record.get(2).unwrap_or("");
            let guest_price_str = record.get(3).unwrap_or("");
            let barcodes = split_codes(record.get(4).unwrap_or(""));

            // Validate and parse
            let member_price_cents = match parse_cents(member_price_str) {
                Ok(c) => c,
                Err(e) => {
                    errors.push(ImportError {
                        line,
                        field: Some("member_price".to_string()),
                        error: format!("Invalid price: {}", e),
                    });
                    continue;
                }
            };
            let guest_price_cents = match parse_cents(guest_price_str) {
                Ok(c) => c,
                Err(e) => {
                    errors.push(ImportError {
                        line,
                        field: Some("guest_price".to_string()),
                        error: format!("Invalid price: {}", e),
                    });
                    continue;
                }
            };

            let min_stock: i64 = match record.get(5).unwrap_or("").trim() {
                "" => 0,
                s => match s.parse() {
                    Ok(v) => v,
                    Err(_) => {
                        errors.push(ImportError {
                            line,
                            field: Some("min_stock".to_string()),
                            error: format!("Invalid min_stock: {}", s),
                        });
                        continue;
                    }
                },
            };
            let initial_stock: i64 = match record.get(6).unwrap_or("").trim() {
                "" => 0,
                s => match s.parse() {
                    Ok(v) => v,
                    Err(_) => {
                        errors.push(ImportError {
                            line,
                            field: Some("initial_stock".to_string()),
                            error: format!("Invalid initial_stock: {}", s),
                        });
                        continue;
                    }
                },
            };

            // Skip actual import if dry run or validate only
            if options.dry_run || options.validate_only {
                imported += 1;
                continue;
            }

            // Import the product
            let product = match self
                .service
                .create_product(
                    name,
                    member_price_cents,
                    guest_price_cents,
                    category,
                    barcodes,
                    min_stock,
                )
                .await
            {
                Ok(product) => product,
                Err(e) => {
                    if options.skip_duplicates {
                        skipped += 1;
                    } else {
                        errors.push(ImportError {
                            line,
                            field: None,
                            error: format!("Product creation failed: {}", e),
                        });
                    }
                    continue;
                }
            };

            if initial_stock > 0 {
                if let Err(e) = self
                    .service
                    .record_stock_movement(
                        product.id,
                        MovementType::Initial,
                        initial_stock,
                        Some("Import".to_string()),
                        None,
                    )
                    .await
                {
                    errors.push(ImportError {
                        line,
                        field: Some("initial_stock".to_string()),
                        error: format!("Opening stock failed: {}", e),
                    });
                }
            }

            imported += 1;
        }

        Ok(ImportResult {
            imported,
            skipped,
            errors,
        })
    }
}

// Helper to split a semicolon-separated barcode list
fn split_codes(value: &str) -> Vec<String> {
    value
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
