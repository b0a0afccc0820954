mod common;

use anyhow::Result;
use common::{StandardClub, item, parse_date, test_service};
use deckel::application::{AppError, TransactionFilter};
use deckel::domain::{PaymentMethod, SaleItem};
use uuid::Uuid;

#[tokio::test]
async fn test_billing_run_captures_open_transactions() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let club = StandardClub::create(&service).await?;

    service
        .create_sale(
            club.anna.id,
            vec![item(&club.helles, 2), item(&club.mate, 1)],
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

    let billing = service
        .create_billing(vec![club.anna.id, club.max.id], None)
        .await?;

    assert_eq!(billing.captured, 3);
    assert_eq!(billing.batch.transaction_count, 3);
    assert_eq!(billing.batch.total_cents, 950);
    assert_eq!(billing.batch.account_ids.len(), 2);

    // Every captured line now points at the batch
    let captured = service.list_billing_transactions(billing.batch.id).await?;
    assert_eq!(captured.len(), 3);
    for transaction in &captured {
        assert_eq!(transaction.billing_id, Some(billing.batch.id));
        assert!(transaction.is_billed);
    }

    Ok(())
}

#[tokio::test]
async fn test_billing_skips_cancelled_and_already_billed() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let club = StandardClub::create(&service).await?;

    let kept = service
        .create_sale(
            club.anna.id,
            vec![item(&club.helles, 1)],
            PaymentMethod::BalanceDebit,
        )
        .await?;
    let cancelled = service
        .create_sale(
            club.anna.id,
            vec![item(&club.mate, 1)],
            PaymentMethod::BalanceDebit,
        )
        .await?;
    service
        .cancel_sale(cancelled.transactions[0].id, None, None)
        .await?;

    let first = service.create_billing(vec![club.anna.id], None).await?;
    assert_eq!(first.captured, 1);
    assert_eq!(first.batch.total_cents, 250);

    let captured = service.list_billing_transactions(first.batch.id).await?;
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].id, kept.transactions[0].id);

    // A second run over the same account finds nothing left
    let second = service.create_billing(vec![club.anna.id], None).await?;
    assert_eq!(second.captured, 0);
    assert_eq!(second.batch.total_cents, 0);

    Ok(())
}

#[tokio::test]
async fn test_mark_billed_attaches_late_transactions() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let club = StandardClub::create(&service).await?;

    service
        .create_sale(
            club.anna.id,
            vec![item(&club.helles, 1)],
            PaymentMethod::BalanceDebit,
        )
        .await?;
    let billing = service.create_billing(vec![club.anna.id], None).await?;
    assert_eq!(billing.captured, 1);

    // A sale booked after the run is still open
    let late = service
        .create_sale(
            club.anna.id,
            vec![item(&club.mate, 1)],
            PaymentMethod::BalanceDebit,
        )
        .await?;

    let marked = service
        .mark_billed(billing.batch.id, &[club.anna.id])
        .await?;
    assert_eq!(marked, 1);

    let transaction = service.get_transaction(late.transactions[0].id).await?;
    assert_eq!(transaction.billing_id, Some(billing.batch.id));
    assert!(transaction.is_billed);

    // Running it again touches nothing
    let again = service
        .mark_billed(billing.batch.id, &[club.anna.id])
        .await?;
    assert_eq!(again, 0);

    Ok(())
}

#[tokio::test]
async fn test_mark_billed_catches_cancelled_rows_too() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let club = StandardClub::create(&service).await?;

    service
        .create_sale(
            club.anna.id,
            vec![item(&club.helles, 1)],
            PaymentMethod::BalanceDebit,
        )
        .await?;
    let billing = service.create_billing(vec![club.anna.id], None).await?;

    // Cancelled after the run, never billed: the run would skip it,
    // the explicit mark does not
    let late = service
        .create_sale(
            club.anna.id,
            vec![item(&club.mate, 1)],
            PaymentMethod::BalanceDebit,
        )
        .await?;
    service
        .cancel_sale(late.transactions[0].id, None, None)
        .await?;

    let marked = service
        .mark_billed(billing.batch.id, &[club.anna.id])
        .await?;
    assert_eq!(marked, 1);

    let transaction = service.get_transaction(late.transactions[0].id).await?;
    assert!(transaction.cancelled);
    assert_eq!(transaction.billing_id, Some(billing.batch.id));

    Ok(())
}

#[tokio::test]
async fn test_mark_billed_unknown_billing_is_not_found() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let club = StandardClub::create(&service).await?;

    let result = service.mark_billed(Uuid::new_v4(), &[club.anna.id]).await;
    assert!(matches!(result, Err(AppError::BillingNotFound(_))));

    Ok(())
}

#[tokio::test]
async fn test_mark_billed_with_no_accounts_is_a_noop() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let club = StandardClub::create(&service).await?;

    service
        .create_sale(
            club.anna.id,
            vec![item(&club.helles, 1)],
            PaymentMethod::BalanceDebit,
        )
        .await?;
    let billing = service.create_billing(vec![club.anna.id], None).await?;

    let marked = service.mark_billed(billing.batch.id, &[]).await?;
    assert_eq!(marked, 0);

    Ok(())
}

#[tokio::test]
async fn test_billing_requires_accounts() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let result = service.create_billing(vec![], None).await;
    assert!(matches!(result, Err(AppError::InvalidInput(_))));

    Ok(())
}

#[tokio::test]
async fn test_billing_number_derives_from_run_time() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let club = StandardClub::create(&service).await?;

    let billing = service
        .create_billing(vec![club.anna.id], Some(parse_date("2025-03-07")))
        .await?;

    assert_eq!(billing.batch.billing_number, "BIL-20250307-0000");

    Ok(())
}

#[tokio::test]
async fn test_billing_listing_and_lookup() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let club = StandardClub::create(&service).await?;

    service
        .create_sale(
            club.anna.id,
            vec![item(&club.helles, 1)],
            PaymentMethod::BalanceDebit,
        )
        .await?;
    let first = service.create_billing(vec![club.anna.id], None).await?;

    service
        .create_sale(
            club.max.id,
            vec![item(&club.mate, 1)],
            PaymentMethod::BalanceDebit,
        )
        .await?;
    let second = service.create_billing(vec![club.max.id], None).await?;

    // Newest first
    let billings = service.list_billings().await?;
    assert_eq!(billings.len(), 2);
    assert_eq!(billings[0].id, second.batch.id);
    assert_eq!(billings[1].id, first.batch.id);

    let fetched = service.get_billing(first.batch.id).await?;
    assert_eq!(fetched.account_ids, vec![club.anna.id]);
    assert_eq!(fetched.total_cents, 250);

    let result = service.get_billing(Uuid::new_v4()).await;
    assert!(matches!(result, Err(AppError::BillingNotFound(_))));
    let result = service.list_billing_transactions(Uuid::new_v4()).await;
    assert!(matches!(result, Err(AppError::BillingNotFound(_))));

    Ok(())
}

#[tokio::test]
async fn test_full_evening_flow() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let club = StandardClub::create(&service).await?;

    // A member runs a tab over the evening
    service
        .create_sale(
            club.anna.id,
            vec![item(&club.helles, 2)],
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

    // A guest pays with a prepaid voucher card
    service
        .create_sale(
            club.gast.id,
            vec![SaleItem::new(
                Some(club.helles.id),
                club.helles.name.clone(),
                1,
                club.helles.guest_price_cents,
            )],
            PaymentMethod::VoucherCard,
        )
        .await?;

    // One pour was booked twice and gets taken back
    let double = service
        .create_sale(
            club.anna.id,
            vec![item(&club.helles, 1)],
            PaymentMethod::BalanceDebit,
        )
        .await?;
    service
        .cancel_sale(double.transactions[0].id, None, None)
        .await?;

    assert_eq!(service.get_balance(club.anna.id).await?, -650);
    assert_eq!(service.get_balance(club.gast.id).await?, 0);
    assert_eq!(service.get_product(club.helles.id).await?.stock, 21);
    assert_eq!(service.get_product(club.mate.id).await?.stock, 11);

    // Month end: bill every account
    let account_ids: Vec<_> = service
        .list_accounts()
        .await?
        .into_iter()
        .map(|a| a.id)
        .collect();
    let billing = service.create_billing(account_ids, None).await?;

    assert_eq!(billing.captured, 3, "The cancelled line stays out");
    assert_eq!(billing.batch.total_cents, 950);

    // Nothing open is left behind
    let open = service
        .list_transactions(TransactionFilter {
            include_cancelled: false,
            ..Default::default()
        })
        .await?;
    assert!(open.iter().all(|t| t.billing_id.is_some()));

    Ok(())
}
