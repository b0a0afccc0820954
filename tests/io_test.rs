mod common;

use anyhow::Result;
use common::{StandardClub, item, test_service};
use deckel::domain::{MovementType, PaymentMethod};
use deckel::io::{DatabaseSnapshot, Exporter, ImportOptions, Importer};

#[tokio::test]
async fn test_export_accounts_csv() -> Result<()> {
    let (service, _temp) = test_service().await?;
    StandardClub::create(&service).await?;

    let exporter = Exporter::new(&service);
    let mut buffer = Vec::new();
    let count = exporter.export_accounts_csv(&mut buffer).await?;

    assert_eq!(count, 3);
    let content = String::from_utf8(buffer)?;
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 4, "Header plus three accounts");
    assert!(lines[0].starts_with("first_name,last_name,email,role"));

    // Sorted by last name: Gast, Schmidt, Weber
    assert!(lines[1].contains("Gast"));
    assert!(lines[2].contains("Anna,Schmidt"));
    assert!(lines[3].contains("Max,Weber"));

    Ok(())
}

#[tokio::test]
async fn test_export_transactions_csv_resolves_account_names() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let club = StandardClub::create(&service).await?;

    service
        .create_sale(
            club.anna.id,
            vec![item(&club.helles, 2)],
            PaymentMethod::BalanceDebit,
        )
        .await?;

    let exporter = Exporter::new(&service);
    let mut buffer = Vec::new();
    let count = exporter.export_transactions_csv(&mut buffer).await?;

    assert_eq!(count, 1);
    let content = String::from_utf8(buffer)?;
    assert!(content.contains("Anna Schmidt"));
    assert!(content.contains("Augustiner Hell"));
    assert!(content.contains("balance-debit"));

    // After the account is gone the export falls back to the raw id
    service.delete_account(club.anna.id).await?;
    let mut buffer = Vec::new();
    exporter.export_transactions_csv(&mut buffer).await?;
    let content = String::from_utf8(buffer)?;
    assert!(!content.contains("Anna Schmidt"));
    assert!(content.contains(&club.anna.id.to_string()));

    Ok(())
}

#[tokio::test]
async fn test_export_sepa_csv() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let club = StandardClub::create(&service).await?;

    let anna = service
        .get_account(club.anna.id)
        .await?
        .with_mandate("DE89370400440532013000", "Anna Schmidt", "CLUB-2025-001");
    service.update_account(&anna).await?;
    service
        .create_sale(
            club.anna.id,
            vec![item(&club.helles, 3)],
            PaymentMethod::BalanceDebit,
        )
        .await?;

    let exporter = Exporter::new(&service);
    let mut buffer = Vec::new();
    let count = exporter.export_sepa_csv(&mut buffer).await?;

    assert_eq!(count, 1);
    let content = String::from_utf8(buffer)?;
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines[0], "account,account_holder,iban,mandate_reference,debit_cents");
    assert!(lines[1].contains("DE89370400440532013000"));
    assert!(lines[1].ends_with("750"));

    Ok(())
}

#[tokio::test]
async fn test_export_full_json_roundtrip() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let club = StandardClub::create(&service).await?;

    service
        .create_sale(
            club.anna.id,
            vec![item(&club.helles, 1), item(&club.mate, 1)],
            PaymentMethod::BalanceDebit,
        )
        .await?;
    service.create_billing(vec![club.anna.id], None).await?;

    let exporter = Exporter::new(&service);
    let mut buffer = Vec::new();
    let snapshot = exporter.export_full_json(&mut buffer).await?;

    assert_eq!(snapshot.accounts.len(), 3);
    assert_eq!(snapshot.products.len(), 2);
    assert_eq!(snapshot.transactions.len(), 2);
    assert_eq!(snapshot.stock_movements.len(), 4, "Two openings, two sales");
    assert_eq!(snapshot.billings.len(), 1);
    assert_eq!(snapshot.version, env!("CARGO_PKG_VERSION"));

    // The written JSON parses back into the same shape
    let parsed: DatabaseSnapshot = serde_json::from_slice(&buffer)?;
    assert_eq!(parsed.accounts.len(), snapshot.accounts.len());
    assert_eq!(parsed.transactions.len(), snapshot.transactions.len());
    assert_eq!(parsed.billings[0].id, snapshot.billings[0].id);

    Ok(())
}

#[tokio::test]
async fn test_import_accounts_csv() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let csv = "first_name,last_name,email,role,barcodes,iban,account_holder,mandate_reference\n\
               Anna,Schmidt,anna@example.org,member,USER001;USER001B,DE89370400440532013000,Anna Schmidt,CLUB-2025-001\n\
               Tages,Gast,,guest,,,,\n";

    let importer = Importer::new(&service);
    let result = importer
        .import_accounts_csv(csv.as_bytes(), ImportOptions::default())
        .await?;

    assert_eq!(result.imported, 2);
    assert_eq!(result.skipped, 0);
    assert!(result.errors.is_empty());

    let anna = service.find_account_by_barcode("USER001").await?;
    assert_eq!(anna.full_name(), "Anna Schmidt");
    assert_eq!(anna.barcodes.len(), 2);
    assert!(anna.sepa_active);
    assert_eq!(anna.iban.as_deref(), Some("DE89370400440532013000"));
    assert_eq!(anna.mandate_reference.as_deref(), Some("CLUB-2025-001"));

    let accounts = service.list_accounts().await?;
    assert_eq!(accounts.len(), 2);

    Ok(())
}

#[tokio::test]
async fn test_import_accounts_dry_run_writes_nothing() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let csv = "first_name,last_name,email,role,barcodes,iban,account_holder,mandate_reference\n\
               Anna,Schmidt,,member,USER001,,,\n";

    let importer = Importer::new(&service);
    let options = ImportOptions {
        dry_run: true,
        ..Default::default()
    };
    let result = importer
        .import_accounts_csv(csv.as_bytes(), options)
        .await?;

    assert_eq!(result.imported, 1, "Counted as if it had been written");
    assert!(service.list_accounts().await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_import_accounts_collects_row_errors() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let csv = "first_name,last_name,email,role,barcodes,iban,account_holder,mandate_reference\n\
               Falsche,Rolle,,vorstand,,,,\n\
               Max,Weber,,member,USER002,,,\n";

    let importer = Importer::new(&service);
    let result = importer
        .import_accounts_csv(csv.as_bytes(), ImportOptions::default())
        .await?;

    assert_eq!(result.imported, 1);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].line, 2);
    assert_eq!(result.errors[0].field.as_deref(), Some("role"));

    // The good row made it in regardless
    assert!(service.find_account_by_barcode("USER002").await.is_ok());

    Ok(())
}

#[tokio::test]
async fn test_import_accounts_skip_duplicates() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let csv = "first_name,last_name,email,role,barcodes,iban,account_holder,mandate_reference\n\
               Anna,Schmidt,,member,USER001,,,\n";

    let importer = Importer::new(&service);
    importer
        .import_accounts_csv(csv.as_bytes(), ImportOptions::default())
        .await?;

    // Second pass over the same file: the barcode is taken now
    let strict = importer
        .import_accounts_csv(csv.as_bytes(), ImportOptions::default())
        .await?;
    assert_eq!(strict.imported, 0);
    assert_eq!(strict.errors.len(), 1);

    let lenient = importer
        .import_accounts_csv(
            csv.as_bytes(),
            ImportOptions {
                skip_duplicates: true,
                ..Default::default()
            },
        )
        .await?;
    assert_eq!(lenient.imported, 0);
    assert_eq!(lenient.skipped, 1);
    assert!(lenient.errors.is_empty());

    assert_eq!(service.list_accounts().await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_import_products_csv() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let csv = "name,category,member_price,guest_price,barcodes,min_stock,initial_stock\n\
               Augustiner Hell,Bier,\"2,50\",3.00,BEER001;BEER002,5,24\n\
               Club-Mate,Alkoholfrei,1.50,2.00,,,\n";

    let importer = Importer::new(&service);
    let result = importer
        .import_products_csv(csv.as_bytes(), ImportOptions::default())
        .await?;

    assert_eq!(result.imported, 2);
    assert!(result.errors.is_empty());

    let helles = service.find_product_by_barcode("BEER001").await?;
    assert_eq!(helles.member_price_cents, 250);
    assert_eq!(helles.guest_price_cents, 300);
    assert_eq!(helles.category.as_deref(), Some("Bier"));
    assert_eq!(helles.min_stock, 5);
    assert_eq!(helles.stock, 24);
    assert_eq!(helles.barcodes.len(), 2);

    // Opening stock arrives as a regular movement
    let movements = service.list_movements(Some(helles.id), None).await?;
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0].movement_type, MovementType::Initial);
    assert_eq!(movements[0].quantity_delta, 24);
    assert_eq!(movements[0].reason.as_deref(), Some("Import"));

    // The row without stock columns starts empty
    let products = service.list_products(true).await?;
    let mate = products.iter().find(|p| p.name == "Club-Mate").unwrap();
    assert_eq!(mate.member_price_cents, 150);
    assert_eq!(mate.stock, 0);
    assert_eq!(mate.min_stock, 0);

    Ok(())
}

#[tokio::test]
async fn test_import_products_rejects_bad_prices() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let csv = "name,category,member_price,guest_price,barcodes,min_stock,initial_stock\n\
               Kaputt,,abc,2,,,\n\
               Spezi,,1.50,2,,,\n";

    let importer = Importer::new(&service);
    let result = importer
        .import_products_csv(csv.as_bytes(), ImportOptions::default())
        .await?;

    assert_eq!(result.imported, 1);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].line, 2);
    assert_eq!(result.errors[0].field.as_deref(), Some("member_price"));

    let products = service.list_products(true).await?;
    assert_eq!(products.len(), 1);
    assert_eq!(products[0].name, "Spezi");

    Ok(())
}
