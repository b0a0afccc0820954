mod common;

use anyhow::Result;
use common::{StandardClub, item, test_service};
use deckel::application::{AppError, ErrorKind, TransactionFilter};
use deckel::domain::{MovementType, PaymentMethod, SaleItem};
use uuid::Uuid;

#[tokio::test]
async fn test_sale_debits_balance_and_stock() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let club = StandardClub::create(&service).await?;

    let sale = service
        .create_sale(
            club.anna.id,
            vec![item(&club.helles, 2)],
            PaymentMethod::BalanceDebit,
        )
        .await?;

    assert_eq!(sale.total_cents, 500);
    assert_eq!(sale.new_balance, -500);
    assert_eq!(sale.transactions.len(), 1);
    assert!(sale.warnings.is_empty());

    // Stock went down by the quantity sold
    let helles = service.get_product(club.helles.id).await?;
    assert_eq!(helles.stock, 22);

    // The sale left an audit movement, newest first
    let movements = service.list_movements(Some(club.helles.id), None).await?;
    assert_eq!(movements.len(), 2, "Opening stock plus the sale");
    assert_eq!(movements[0].movement_type, MovementType::Sale);
    assert_eq!(movements[0].quantity_delta, -2);
    assert_eq!(movements[0].stock_before, 24);
    assert_eq!(movements[0].stock_after, 22);
    assert_eq!(movements[0].created_by, "system");
    assert_eq!(movements[0].reason.as_deref(), Some("Verkauf an Anna Schmidt"));

    let transaction = service.get_transaction(sale.transactions[0].id).await?;
    assert_eq!(transaction.account_id, club.anna.id);
    assert_eq!(transaction.quantity, 2);
    assert_eq!(transaction.unit_price_cents, 250);
    assert_eq!(transaction.total_cents, 500);
    assert_eq!(transaction.payment_method, PaymentMethod::BalanceDebit);
    assert!(transaction.is_open());

    Ok(())
}

#[tokio::test]
async fn test_multi_item_sale_creates_one_transaction_per_line() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let club = StandardClub::create(&service).await?;

    let sale = service
        .create_sale(
            club.anna.id,
            vec![item(&club.helles, 2), item(&club.mate, 1)],
            PaymentMethod::BalanceDebit,
        )
        .await?;

    assert_eq!(sale.transactions.len(), 2);
    assert_eq!(sale.total_cents, 650);
    assert_eq!(sale.new_balance, -650);

    assert_eq!(service.get_product(club.helles.id).await?.stock, 22);
    assert_eq!(service.get_product(club.mate.id).await?.stock, 11);

    Ok(())
}

#[tokio::test]
async fn test_voucher_card_sale_leaves_balance_untouched() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let club = StandardClub::create(&service).await?;

    let sale = service
        .create_sale(
            club.anna.id,
            vec![item(&club.helles, 1)],
            PaymentMethod::VoucherCard,
        )
        .await?;

    assert_eq!(sale.new_balance, 0, "Prepaid cards settle outside the tab");
    assert_eq!(service.get_balance(club.anna.id).await?, 0);

    // Inventory still moves
    assert_eq!(service.get_product(club.helles.id).await?.stock, 23);

    Ok(())
}

#[tokio::test]
async fn test_voucher_refund_credits_balance() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let club = StandardClub::create(&service).await?;

    let sale = service
        .create_sale(
            club.anna.id,
            vec![SaleItem::new(None, "Gutschein-Rückgabe", 1, 1000)],
            PaymentMethod::VoucherRefund,
        )
        .await?;

    assert_eq!(sale.new_balance, 1000);
    assert_eq!(service.get_balance(club.anna.id).await?, 1000);

    Ok(())
}

#[tokio::test]
async fn test_manual_booking_charge_without_product() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let club = StandardClub::create(&service).await?;

    let sale = service
        .create_sale(
            club.max.id,
            vec![SaleItem::new(None, "Mitgliedsbeitrag", 1, 2000)],
            PaymentMethod::ManualBooking,
        )
        .await?;

    assert_eq!(sale.new_balance, -2000);
    assert!(sale.warnings.is_empty(), "Free-form lines carry no product");

    // No stock movement for a line without a product
    let movements = service.list_movements(None, None).await?;
    assert_eq!(movements.len(), 2, "Only the two opening stock entries");

    Ok(())
}

#[tokio::test]
async fn test_sale_with_missing_product_warns_but_completes() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let club = StandardClub::create(&service).await?;

    // A line referencing a product that was deleted meanwhile
    let ghost_id = Uuid::new_v4();
    let sale = service
        .create_sale(
            club.anna.id,
            vec![
                item(&club.helles, 1),
                SaleItem::new(Some(ghost_id), "Altes Produkt", 1, 150),
            ],
            PaymentMethod::BalanceDebit,
        )
        .await?;

    // The sale still books in full
    assert_eq!(sale.total_cents, 400);
    assert_eq!(sale.new_balance, -400);
    assert_eq!(sale.transactions.len(), 2);
    assert_eq!(sale.warnings.len(), 1);
    assert!(sale.warnings[0].contains("Altes Produkt"));

    // Only the real product moved
    let movements = service.list_movements(None, None).await?;
    let sales: Vec<_> = movements
        .iter()
        .filter(|m| m.movement_type == MovementType::Sale)
        .collect();
    assert_eq!(sales.len(), 1);
    assert_eq!(sales[0].product_id, club.helles.id);

    Ok(())
}

#[tokio::test]
async fn test_sale_rejects_empty_items() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let club = StandardClub::create(&service).await?;

    let result = service
        .create_sale(club.anna.id, vec![], PaymentMethod::BalanceDebit)
        .await;
    assert!(matches!(result, Err(AppError::InvalidInput(_))));

    Ok(())
}

#[tokio::test]
async fn test_sale_rejects_nonpositive_quantity() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let club = StandardClub::create(&service).await?;

    let result = service
        .create_sale(
            club.anna.id,
            vec![SaleItem::new(Some(club.helles.id), "Augustiner Hell", 0, 250)],
            PaymentMethod::BalanceDebit,
        )
        .await;
    assert!(matches!(result, Err(AppError::InvalidInput(_))));

    // Nothing was booked
    assert_eq!(service.get_balance(club.anna.id).await?, 0);
    assert_eq!(service.get_product(club.helles.id).await?.stock, 24);

    Ok(())
}

#[tokio::test]
async fn test_sale_for_unknown_account_is_not_found() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let club = StandardClub::create(&service).await?;

    let result = service
        .create_sale(
            Uuid::new_v4(),
            vec![item(&club.helles, 1)],
            PaymentMethod::BalanceDebit,
        )
        .await;
    assert!(matches!(result, Err(AppError::AccountNotFound(_))));

    Ok(())
}

#[tokio::test]
async fn test_cancellation_restores_stock_and_balance() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let club = StandardClub::create(&service).await?;

    let sale = service
        .create_sale(
            club.anna.id,
            vec![item(&club.helles, 2)],
            PaymentMethod::BalanceDebit,
        )
        .await?;
    let transaction_id = sale.transactions[0].id;
    assert_eq!(service.get_product(club.helles.id).await?.stock, 22);

    let cancellation = service.cancel_sale(transaction_id, None, None).await?;

    assert_eq!(cancellation.refunded_cents, 500);
    assert!(cancellation.transaction.cancelled);
    assert_eq!(service.get_balance(club.anna.id).await?, 0);
    assert_eq!(service.get_product(club.helles.id).await?.stock, 24);

    // The restock is audited as a cancellation movement
    let movements = service.list_movements(Some(club.helles.id), None).await?;
    assert_eq!(movements[0].movement_type, MovementType::Cancellation);
    assert_eq!(movements[0].quantity_delta, 2);
    assert_eq!(movements[0].stock_before, 22);
    assert_eq!(movements[0].stock_after, 24);
    assert!(
        movements[0]
            .reason
            .as_deref()
            .unwrap_or("")
            .contains(&transaction_id.to_string()),
        "Restock movement names the cancelled transaction"
    );

    Ok(())
}

#[tokio::test]
async fn test_cancellation_stamps_audit_fields() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let club = StandardClub::create(&service).await?;

    let sale = service
        .create_sale(
            club.anna.id,
            vec![item(&club.mate, 1)],
            PaymentMethod::BalanceDebit,
        )
        .await?;

    let cancellation = service
        .cancel_sale(sale.transactions[0].id, None, None)
        .await?;

    let transaction = cancellation.transaction;
    assert!(transaction.cancelled);
    assert!(transaction.cancelled_at.is_some());
    assert_eq!(transaction.cancelled_by.as_deref(), Some("barkeeper"));
    assert_eq!(
        transaction.cancellation_reason.as_deref(),
        Some("Storniert über Kasse")
    );

    // The stored row matches what came back
    let stored = service.get_transaction(transaction.id).await?;
    assert!(stored.cancelled);
    assert_eq!(stored.cancelled_by.as_deref(), Some("barkeeper"));

    Ok(())
}

#[tokio::test]
async fn test_cancellation_with_custom_reason_and_actor() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let club = StandardClub::create(&service).await?;

    let sale = service
        .create_sale(
            club.anna.id,
            vec![item(&club.mate, 1)],
            PaymentMethod::BalanceDebit,
        )
        .await?;

    let cancellation = service
        .cancel_sale(
            sale.transactions[0].id,
            Some("Falsch gebucht".to_string()),
            Some("kassenwart".to_string()),
        )
        .await?;

    assert_eq!(
        cancellation.transaction.cancellation_reason.as_deref(),
        Some("Falsch gebucht")
    );
    assert_eq!(
        cancellation.transaction.cancelled_by.as_deref(),
        Some("kassenwart")
    );

    Ok(())
}

#[tokio::test]
async fn test_cancel_voucher_card_sale_skips_refund() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let club = StandardClub::create(&service).await?;

    let sale = service
        .create_sale(
            club.anna.id,
            vec![item(&club.helles, 1)],
            PaymentMethod::VoucherCard,
        )
        .await?;

    let cancellation = service
        .cancel_sale(sale.transactions[0].id, None, None)
        .await?;

    // The card was charged outside the ledger, so nothing flows back
    assert_eq!(cancellation.refunded_cents, 0);
    assert_eq!(service.get_balance(club.anna.id).await?, 0);

    // Stock restoration is unaffected by the payment method
    assert_eq!(service.get_product(club.helles.id).await?.stock, 24);

    Ok(())
}

#[tokio::test]
async fn test_cancel_twice_is_a_conflict() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let club = StandardClub::create(&service).await?;

    let sale = service
        .create_sale(
            club.anna.id,
            vec![item(&club.helles, 1)],
            PaymentMethod::BalanceDebit,
        )
        .await?;
    let transaction_id = sale.transactions[0].id;

    service.cancel_sale(transaction_id, None, None).await?;
    let result = service.cancel_sale(transaction_id, None, None).await;

    match result {
        Err(err) => {
            assert!(matches!(err, AppError::AlreadyCancelled));
            assert_eq!(err.kind(), ErrorKind::Conflict);
        }
        Ok(_) => panic!("second cancellation must be rejected"),
    }

    // The second attempt must not double-refund or double-restock
    assert_eq!(service.get_balance(club.anna.id).await?, 0);
    assert_eq!(service.get_product(club.helles.id).await?.stock, 24);

    Ok(())
}

#[tokio::test]
async fn test_cancel_billed_transaction_is_a_conflict() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let club = StandardClub::create(&service).await?;

    let sale = service
        .create_sale(
            club.anna.id,
            vec![item(&club.helles, 1)],
            PaymentMethod::BalanceDebit,
        )
        .await?;
    let transaction_id = sale.transactions[0].id;

    service.create_billing(vec![club.anna.id], None).await?;

    let result = service.cancel_sale(transaction_id, None, None).await;
    assert!(matches!(result, Err(AppError::AlreadyBilled)));

    // Still booked, still paid
    assert_eq!(service.get_balance(club.anna.id).await?, -250);
    assert_eq!(service.get_product(club.helles.id).await?.stock, 23);

    Ok(())
}

#[tokio::test]
async fn test_cancel_unknown_transaction_is_not_found() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let result = service.cancel_sale(Uuid::new_v4(), None, None).await;
    assert!(matches!(result, Err(AppError::TransactionNotFound(_))));

    Ok(())
}

#[tokio::test]
async fn test_transaction_filtering() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let club = StandardClub::create(&service).await?;

    let first = service
        .create_sale(
            club.anna.id,
            vec![item(&club.helles, 1)],
            PaymentMethod::BalanceDebit,
        )
        .await?;
    service
        .create_sale(
            club.anna.id,
            vec![item(&club.mate, 1)],
            PaymentMethod::BalanceDebit,
        )
        .await?;
    service
        .create_sale(
            club.max.id,
            vec![item(&club.mate, 2)],
            PaymentMethod::BalanceDebit,
        )
        .await?;

    service
        .cancel_sale(first.transactions[0].id, None, None)
        .await?;

    // By account
    let annas = service
        .list_transactions(TransactionFilter {
            account_id: Some(club.anna.id),
            ..Default::default()
        })
        .await?;
    assert_eq!(annas.len(), 2, "Both of Anna's lines, cancelled included");

    // Open lines only
    let open = service
        .list_transactions(TransactionFilter {
            account_id: Some(club.anna.id),
            include_cancelled: false,
            ..Default::default()
        })
        .await?;
    assert_eq!(open.len(), 1);
    assert!(!open[0].cancelled);

    // Newest first, capped
    let latest = service
        .list_transactions(TransactionFilter {
            limit: Some(2),
            ..Default::default()
        })
        .await?;
    assert_eq!(latest.len(), 2);
    assert_eq!(latest[0].account_id, club.max.id);

    Ok(())
}
