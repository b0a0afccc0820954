use chrono::{DateTime, Utc};

use crate::domain::{
    balance_effect, sale_total, Account, AccountId, BillingBatch, BillingId, Cents, MovementId,
    MovementType, PaymentMethod, Product, ProductId, Role, SaleItem, StockMovement, Transaction,
    TransactionId,
};
use crate::storage::{
    CancelOutcome, DashboardStats, DeleteMovementOutcome, MovementOutcome, Repository, SaleOutcome,
};

use super::{AppError, SepaDebit};

/// Application service providing high-level operations for the ledger.
/// This is the primary interface for any client (CLI, API, TUI, etc.).
pub struct LedgerService {
    repo: Repository,
}

/// Result of a completed sale
pub struct SaleResult {
    pub transactions: Vec<Transaction>,
    pub new_balance: Cents,
    pub total_cents: Cents,
    /// Line items whose inventory effect was skipped (stock stays
    /// best-effort; the sale itself went through)
    pub warnings: Vec<String>,
}

/// Result of cancelling a sale
pub struct CancellationResult {
    pub transaction: Transaction,
    /// Amount credited back to the account; 0 for voucher-card sales
    pub refunded_cents: Cents,
}

/// Result of a billing run
pub struct BillingResult {
    pub batch: BillingBatch,
    /// Number of transactions captured and marked billed
    pub captured: i64,
}

/// Filter for querying transactions
pub struct TransactionFilter {
    pub account_id: Option<AccountId>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub include_cancelled: bool,
    pub limit: Option<usize>,
}

impl Default for TransactionFilter {
    fn default() -> Self {
        Self {
            account_id: None,
            from_date: None,
            to_date: None,
            include_cancelled: true,
            limit: None,
        }
    }
}

impl LedgerService {
    /// Create a new ledger service with the given repository.
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Initialize a new database at the given path.
    pub async fn init(database_path: &str) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}?mode=rwc", database_path);
        let repo = Repository::init(&db_url).await?;
        Ok(Self::new(repo))
    }

    /// Connect to an existing database.
    pub async fn connect(database_path: &str) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}", database_path);
        let repo = Repository::connect(&db_url).await?;
        Ok(Self::new(repo))
    }

    // ========================
    // Account operations
    // ========================

    /// Create a new account. Barcodes are normalized to uppercase and must
    /// not be in use by any other account.
    pub async fn create_account(
        &self,
        first_name: String,
        last_name: String,
        role: Role,
        email: Option<String>,
        barcodes: Vec<String>,
    ) -> Result<Account, AppError> {
        if first_name.trim().is_empty() && last_name.trim().is_empty() {
            return Err(AppError::InvalidInput("account needs a name".into()));
        }

        let barcodes = normalize_barcodes(barcodes);
        self.check_account_barcodes(&barcodes, None).await?;

        let mut account = Account::new(first_name, last_name, role).with_barcodes(barcodes);
        if let Some(email) = email {
            account = account.with_email(email);
        }

        self.repo.save_account(&account).await?;
        Ok(account)
    }

    /// Update an account's master data. The stored balance is deliberately
    /// left untouched: balance changes only through sales and cancellations.
    pub async fn update_account(&self, account: &Account) -> Result<Account, AppError> {
        let mut account = account.clone();
        account.barcodes = normalize_barcodes(account.barcodes);
        self.check_account_barcodes(&account.barcodes, Some(account.id))
            .await?;

        let updated = self.repo.update_account(&account).await?;
        if updated == 0 {
            return Err(AppError::AccountNotFound(account.id.to_string()));
        }

        // Reload so the caller sees the authoritative balance
        self.get_account(account.id).await
    }

    pub async fn get_account(&self, id: AccountId) -> Result<Account, AppError> {
        self.repo
            .get_account(id)
            .await?
            .ok_or_else(|| AppError::AccountNotFound(id.to_string()))
    }

    /// Look up an account by one of its scanner barcodes (case-insensitive).
    pub async fn find_account_by_barcode(&self, barcode: &str) -> Result<Account, AppError> {
        let code = barcode.trim().to_uppercase();
        self.repo
            .find_account_by_barcode(&code)
            .await?
            .ok_or_else(|| AppError::AccountNotFound(barcode.to_string()))
    }

    pub async fn list_accounts(&self) -> Result<Vec<Account>, AppError> {
        Ok(self.repo.list_accounts().await?)
    }

    pub async fn delete_account(&self, id: AccountId) -> Result<(), AppError> {
        let deleted = self.repo.delete_account(id).await?;
        if deleted == 0 {
            return Err(AppError::AccountNotFound(id.to_string()));
        }
        Ok(())
    }

    pub async fn get_balance(&self, id: AccountId) -> Result<Cents, AppError> {
        self.repo
            .get_balance(id)
            .await?
            .ok_or_else(|| AppError::AccountNotFound(id.to_string()))
    }

    async fn check_account_barcodes(
        &self,
        barcodes: &[String],
        exclude: Option<AccountId>,
    ) -> Result<(), AppError> {
        for code in barcodes {
            if self.repo.account_barcode_taken(code, exclude).await? {
                return Err(AppError::DuplicateBarcode(code.clone()));
            }
        }
        Ok(())
    }

    // ========================
    // Product operations
    // ========================

    /// Create a new catalog product. Opening stock is recorded afterwards via
    /// an `initial` stock movement, never set directly.
    pub async fn create_product(
        &self,
        name: String,
        member_price_cents: Cents,
        guest_price_cents: Cents,
        category: Option<String>,
        barcodes: Vec<String>,
        min_stock: i64,
    ) -> Result<Product, AppError> {
        if name.trim().is_empty() {
            return Err(AppError::InvalidInput("product needs a name".into()));
        }
        if member_price_cents < 0 || guest_price_cents < 0 {
            return Err(AppError::InvalidInput("prices cannot be negative".into()));
        }

        let barcodes = normalize_barcodes(barcodes);
        self.check_product_barcodes(&barcodes, None).await?;

        let mut product = Product::new(name, member_price_cents, guest_price_cents)
            .with_barcodes(barcodes)
            .with_min_stock(min_stock);
        if let Some(category) = category {
            product = product.with_category(category);
        }

        self.repo.save_product(&product).await?;
        Ok(product)
    }

    /// Update a product's master data. The stored stock is deliberately left
    /// untouched: stock changes only through recorded movements.
    pub async fn update_product(&self, product: &Product) -> Result<Product, AppError> {
        let mut product = product.clone();
        product.barcodes = normalize_barcodes(product.barcodes);
        self.check_product_barcodes(&product.barcodes, Some(product.id))
            .await?;

        let updated = self.repo.update_product(&product).await?;
        if updated == 0 {
            return Err(AppError::ProductNotFound(product.id.to_string()));
        }

        self.get_product(product.id).await
    }

    pub async fn get_product(&self, id: ProductId) -> Result<Product, AppError> {
        self.repo
            .get_product(id)
            .await?
            .ok_or_else(|| AppError::ProductNotFound(id.to_string()))
    }

    pub async fn find_product_by_barcode(&self, barcode: &str) -> Result<Product, AppError> {
        let code = barcode.trim().to_uppercase();
        self.repo
            .find_product_by_barcode(&code)
            .await?
            .ok_or_else(|| AppError::ProductNotFound(barcode.to_string()))
    }

    pub async fn list_products(&self, include_unavailable: bool) -> Result<Vec<Product>, AppError> {
        Ok(self.repo.list_products(include_unavailable).await?)
    }

    pub async fn delete_product(&self, id: ProductId) -> Result<(), AppError> {
        let deleted = self.repo.delete_product(id).await?;
        if deleted == 0 {
            return Err(AppError::ProductNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn check_product_barcodes(
        &self,
        barcodes: &[String],
        exclude: Option<ProductId>,
    ) -> Result<(), AppError> {
        for code in barcodes {
            if self.repo.product_barcode_taken(code, exclude).await? {
                return Err(AppError::DuplicateBarcode(code.clone()));
            }
        }
        Ok(())
    }

    // ========================
    // Sales
    // ========================

    /// Record a multi-item sale against an account.
    ///
    /// Stock decrements, transaction rows and the balance update are committed
    /// as one unit. A line item whose product cannot be found skips its
    /// inventory effect and is reported in `warnings`; a failing balance
    /// update aborts and rolls back everything.
    pub async fn create_sale(
        &self,
        account_id: AccountId,
        items: Vec<SaleItem>,
        payment_method: PaymentMethod,
    ) -> Result<SaleResult, AppError> {
        let account = self.get_account(account_id).await?;

        if items.is_empty() {
            return Err(AppError::InvalidInput("sale has no items".into()));
        }
        for item in &items {
            if item.quantity <= 0 {
                return Err(AppError::InvalidInput(format!(
                    "quantity must be positive: '{}'",
                    item.description
                )));
            }
        }

        let total_cents = sale_total(&items);
        let transactions: Vec<Transaction> = items
            .iter()
            .map(|item| Transaction::from_item(account.id, item, payment_method))
            .collect();
        let delta = balance_effect(payment_method, total_cents);

        match self.repo.create_sale(&account, &transactions, delta).await? {
            SaleOutcome::Completed {
                new_balance,
                warnings,
            } => Ok(SaleResult {
                transactions,
                new_balance,
                total_cents,
                warnings,
            }),
            SaleOutcome::AccountMissing => Err(AppError::AccountNotFound(account_id.to_string())),
        }
    }

    /// Cancel a sale transaction (soft delete). Restores stock, emits a
    /// `cancellation` movement and refunds the balance unless the sale was
    /// paid by voucher card. Billed transactions cannot be cancelled.
    pub async fn cancel_sale(
        &self,
        transaction_id: TransactionId,
        reason: Option<String>,
        actor: Option<String>,
    ) -> Result<CancellationResult, AppError> {
        let reason = reason.unwrap_or_else(|| "Storniert über Kasse".to_string());
        let actor = actor.unwrap_or_else(|| "barkeeper".to_string());

        match self
            .repo
            .cancel_sale(transaction_id, &reason, &actor, Utc::now())
            .await?
        {
            CancelOutcome::Cancelled {
                transaction,
                refunded_cents,
            } => Ok(CancellationResult {
                transaction,
                refunded_cents,
            }),
            CancelOutcome::NotFound => {
                Err(AppError::TransactionNotFound(transaction_id.to_string()))
            }
            CancelOutcome::AlreadyBilled => Err(AppError::AlreadyBilled),
            CancelOutcome::AlreadyCancelled => Err(AppError::AlreadyCancelled),
            CancelOutcome::AccountMissing(account_id) => {
                Err(AppError::AccountNotFound(account_id.to_string()))
            }
        }
    }

    pub async fn get_transaction(&self, id: TransactionId) -> Result<Transaction, AppError> {
        self.repo
            .get_transaction(id)
            .await?
            .ok_or_else(|| AppError::TransactionNotFound(id.to_string()))
    }

    pub async fn list_transactions(
        &self,
        filter: TransactionFilter,
    ) -> Result<Vec<Transaction>, AppError> {
        Ok(self
            .repo
            .list_transactions_filtered(
                filter.account_id,
                filter.from_date,
                filter.to_date,
                filter.include_cancelled,
                filter.limit,
            )
            .await?)
    }

    // ========================
    // Inventory
    // ========================

    /// Record a manual stock movement (purchase, initial stock, correction).
    ///
    /// Purchase and initial quantities always increase stock regardless of
    /// the entered sign; corrections keep their sign and are rejected if the
    /// result would be negative. Sale/cancellation movements can only be
    /// produced by the sale flow.
    pub async fn record_stock_movement(
        &self,
        product_id: ProductId,
        movement_type: MovementType,
        quantity: i64,
        reason: Option<String>,
        actor: Option<String>,
    ) -> Result<StockMovement, AppError> {
        if !movement_type.is_manual_entry() {
            return Err(AppError::InvalidInput(format!(
                "movement type '{}' is recorded by the sale flow, not manually",
                movement_type
            )));
        }
        if quantity == 0 {
            return Err(AppError::InvalidInput("quantity cannot be zero".into()));
        }

        let product = self.get_product(product_id).await?;
        let actor = actor.unwrap_or_else(|| "admin".to_string());

        match self
            .repo
            .apply_movement(product_id, movement_type, quantity, reason, &actor)
            .await?
        {
            MovementOutcome::Applied(movement) => Ok(movement),
            MovementOutcome::ProductMissing => {
                Err(AppError::ProductNotFound(product_id.to_string()))
            }
            MovementOutcome::NegativeStock { current, delta } => Err(AppError::NegativeStock {
                product: product.name,
                current,
                delta,
            }),
        }
    }

    /// Delete a manual stock movement and back its delta out of current
    /// stock, clamping at zero. Sale and cancellation movements are the
    /// audit trail of a sale and can never be deleted.
    pub async fn delete_stock_movement(&self, movement_id: MovementId) -> Result<(), AppError> {
        match self.repo.delete_movement(movement_id).await? {
            DeleteMovementOutcome::Deleted => Ok(()),
            DeleteMovementOutcome::NotFound => {
                Err(AppError::MovementNotFound(movement_id.to_string()))
            }
            DeleteMovementOutcome::Protected(movement_type) => {
                Err(AppError::ProtectedMovement(movement_type))
            }
        }
    }

    /// List recorded stock movements, newest first, optionally for a single
    /// product.
    pub async fn list_movements(
        &self,
        product_id: Option<ProductId>,
        limit: Option<usize>,
    ) -> Result<Vec<StockMovement>, AppError> {
        Ok(self.repo.list_movements(product_id, limit).await?)
    }

    // ========================
    // Billing
    // ========================

    /// Run a billing batch: capture every open (uncancelled, unbilled)
    /// transaction of the given accounts, mark them billed and record the
    /// batch with its generated billing number. One database transaction.
    pub async fn create_billing(
        &self,
        account_ids: Vec<AccountId>,
        at: Option<DateTime<Utc>>,
    ) -> Result<BillingResult, AppError> {
        if account_ids.is_empty() {
            return Err(AppError::InvalidInput(
                "billing needs at least one account".into(),
            ));
        }

        let batch = BillingBatch::new(account_ids, at.unwrap_or_else(Utc::now));
        let (batch, captured) = self.repo.create_billing(batch).await?;
        Ok(BillingResult { batch, captured })
    }

    /// Attach unbilled transactions of the given accounts to an existing
    /// billing batch. Idempotent: transactions that already carry a billing
    /// id are left untouched. Returns the number of transactions updated.
    pub async fn mark_billed(
        &self,
        billing_id: BillingId,
        account_ids: &[AccountId],
    ) -> Result<i64, AppError> {
        self.get_billing(billing_id).await?;
        if account_ids.is_empty() {
            return Ok(0);
        }
        Ok(self.repo.mark_billed(billing_id, account_ids).await?)
    }

    pub async fn get_billing(&self, id: BillingId) -> Result<BillingBatch, AppError> {
        self.repo
            .get_billing(id)
            .await?
            .ok_or_else(|| AppError::BillingNotFound(id.to_string()))
    }

    pub async fn list_billings(&self) -> Result<Vec<BillingBatch>, AppError> {
        Ok(self.repo.list_billings().await?)
    }

    pub async fn list_billing_transactions(
        &self,
        billing_id: BillingId,
    ) -> Result<Vec<Transaction>, AppError> {
        self.get_billing(billing_id).await?;
        Ok(self.repo.list_billing_transactions(billing_id).await?)
    }

    // ========================
    // Reporting
    // ========================

    /// Aggregate counts for the venue overview.
    pub async fn dashboard_stats(&self) -> Result<DashboardStats, AppError> {
        Ok(self.repo.dashboard_stats().await?)
    }

    /// Accounts eligible for a SEPA direct-debit run: active mandate, IBAN on
    /// file and a negative balance. The debit amount is the balance magnitude.
    pub async fn sepa_eligible_accounts(&self) -> Result<Vec<SepaDebit>, AppError> {
        let accounts = self.repo.sepa_eligible_accounts().await?;
        Ok(accounts.into_iter().map(SepaDebit::for_account).collect())
    }

    // ========================
    // Settings
    // ========================

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>, AppError> {
        Ok(self.repo.get_setting(key).await?)
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<(), AppError> {
        if key.trim().is_empty() {
            return Err(AppError::InvalidInput("setting key cannot be empty".into()));
        }
        Ok(self.repo.set_setting(key, value).await?)
    }

    pub async fn list_settings(&self) -> Result<Vec<(String, String)>, AppError> {
        Ok(self.repo.list_settings().await?)
    }
}

/// Uppercase, trim and de-duplicate scanner barcodes.
fn normalize_barcodes(barcodes: Vec<String>) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::new();
    for code in barcodes {
        let code = code.trim().to_uppercase();
        if !code.is_empty() && !normalized.contains(&code) {
            normalized.push(code);
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_barcodes() {
        let codes = vec![
            " user001 ".to_string(),
            "USER001".to_string(),
            "".to_string(),
            "a1b2".to_string(),
        ];
        assert_eq!(
            normalize_barcodes(codes),
            vec!["USER001".to_string(), "A1B2".to_string()]
        );
    }

    #[test]
    fn test_refund_uses_domain_policy() {
        use crate::domain::refund_amount;

        // The service reports what the ledger actually credited back
        assert_eq!(refund_amount(PaymentMethod::VoucherCard, 600), 0);
        assert_eq!(refund_amount(PaymentMethod::BalanceDebit, 600), 600);
    }
}
