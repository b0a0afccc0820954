use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::{
    normalize_delta, refund_amount, Account, AccountId, BillingBatch, BillingId, Cents,
    MovementId, MovementType, PaymentMethod, Product, ProductId, Role, StockMovement, Transaction,
    TransactionId,
};

use super::MIGRATION_001_INITIAL;

/// Aggregate counts for the venue overview, computed in SQL.
#[derive(Debug, Clone)]
pub struct DashboardStats {
    pub member_count: i64,
    pub available_products: i64,
    pub total_stock: i64,
    pub low_stock_count: i64,
    pub members_with_debt: i64,
    pub unbilled_revenue_cents: Cents,
}

/// Outcome of applying a stock movement.
pub enum MovementOutcome {
    Applied(StockMovement),
    ProductMissing,
    NegativeStock { current: i64, delta: i64 },
}

/// Outcome of recording a sale.
pub enum SaleOutcome {
    Completed {
        new_balance: Cents,
        warnings: Vec<String>,
    },
    AccountMissing,
}

/// Outcome of cancelling a sale.
pub enum CancelOutcome {
    Cancelled {
        transaction: Transaction,
        refunded_cents: Cents,
    },
    NotFound,
    AlreadyBilled,
    AlreadyCancelled,
    AccountMissing(AccountId),
}

/// Outcome of deleting a stock movement.
pub enum DeleteMovementOutcome {
    Deleted,
    NotFound,
    Protected(MovementType),
}

/// Repository for persisting accounts, products, transactions, stock
/// movements and billing batches. Multi-ledger operations (sale, cancel,
/// billing run) execute inside one database transaction.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database at the given path.
    /// Creates the database file if it doesn't exist.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;

        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_url: &str) -> Result<Self> {
        let repo = Self::connect(database_url).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    // ========================
    // Account operations
    // ========================

    /// Save a new account to the database.
    pub async fn save_account(&self, account: &Account) -> Result<()> {
        let barcodes_json = serde_json::to_string(&account.barcodes)?;

        sqlx::query(
            r#"
            INSERT INTO accounts (id, first_name, last_name, email, role, balance_cents, barcodes, sepa_active, iban, account_holder, mandate_reference, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(account.id.to_string())
        .bind(&account.first_name)
        .bind(&account.last_name)
        .bind(&account.email)
        .bind(account.role.as_str())
        .bind(account.balance_cents)
        .bind(&barcodes_json)
        .bind(account.sepa_active)
        .bind(&account.iban)
        .bind(&account.account_holder)
        .bind(&account.mandate_reference)
        .bind(account.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save account")?;
        Ok(())
    }

    /// Get an account by ID.
    pub async fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        let row = sqlx::query(
            r#"
            SELECT id, first_name, last_name, email, role, balance_cents, barcodes, sepa_active, iban, account_holder, mandate_reference, created_at
            FROM accounts
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch account")?;

        match row {
            Some(row) => Ok(Some(Self::row_to_account(&row)?)),
            None => Ok(None),
        }
    }

    /// Find the account owning the given scanner barcode.
    pub async fn find_account_by_barcode(&self, barcode: &str) -> Result<Option<Account>> {
        let row = sqlx::query(
            r#"
            SELECT a.id, a.first_name, a.last_name, a.email, a.role, a.balance_cents, a.barcodes, a.sepa_active, a.iban, a.account_holder, a.mandate_reference, a.created_at
            FROM accounts a, json_each(a.barcodes) code
            WHERE code.value = ?
            LIMIT 1
            "#,
        )
        .bind(barcode)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch account by barcode")?;

        match row {
            Some(row) => Ok(Some(Self::row_to_account(&row)?)),
            None => Ok(None),
        }
    }

    /// Check whether a barcode is already assigned to an account,
    /// optionally ignoring one account (for updates).
    pub async fn account_barcode_taken(
        &self,
        barcode: &str,
        exclude: Option<AccountId>,
    ) -> Result<bool> {
        let row = match exclude {
            Some(id) => {
                sqlx::query(
                    "SELECT COUNT(*) as hits FROM accounts a, json_each(a.barcodes) code WHERE code.value = ? AND a.id != ?",
                )
                .bind(barcode)
                .bind(id.to_string())
                .fetch_one(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT COUNT(*) as hits FROM accounts a, json_each(a.barcodes) code WHERE code.value = ?",
                )
                .bind(barcode)
                .fetch_one(&self.pool)
                .await
            }
        }
        .context("Failed to check account barcode")?;

        Ok(row.get::<i64, _>("hits") > 0)
    }

    /// List all accounts, ordered by name.
    pub async fn list_accounts(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query(
            r#"
            SELECT id, first_name, last_name, email, role, balance_cents, barcodes, sepa_active, iban, account_holder, mandate_reference, created_at
            FROM accounts
            ORDER BY last_name, first_name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list accounts")?;

        rows.iter().map(Self::row_to_account).collect()
    }

    /// Update an account's master data. The balance column is deliberately
    /// not part of this statement; it changes only through ledger operations.
    pub async fn update_account(&self, account: &Account) -> Result<u64> {
        let barcodes_json = serde_json::to_string(&account.barcodes)?;

        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET first_name = ?, last_name = ?, email = ?, role = ?, barcodes = ?, sepa_active = ?, iban = ?, account_holder = ?, mandate_reference = ?
            WHERE id = ?
            "#,
        )
        .bind(&account.first_name)
        .bind(&account.last_name)
        .bind(&account.email)
        .bind(account.role.as_str())
        .bind(&barcodes_json)
        .bind(account.sepa_active)
        .bind(&account.iban)
        .bind(&account.account_holder)
        .bind(&account.mandate_reference)
        .bind(account.id.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to update account")?;

        Ok(result.rows_affected())
    }

    /// Delete an account. Its transactions stay behind as history.
    pub async fn delete_account(&self, id: AccountId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to delete account")?;
        Ok(result.rows_affected())
    }

    /// Get an account's current balance.
    pub async fn get_balance(&self, id: AccountId) -> Result<Option<Cents>> {
        let row = sqlx::query("SELECT balance_cents FROM accounts WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch balance")?;

        Ok(row.map(|r| r.get("balance_cents")))
    }

    fn row_to_account(row: &sqlx::sqlite::SqliteRow) -> Result<Account> {
        let id_str: String = row.get("id");
        let role_str: String = row.get("role");
        let barcodes_json: String = row.get("barcodes");
        let created_at_str: String = row.get("created_at");

        Ok(Account {
            id: Uuid::parse_str(&id_str).context("Invalid account ID")?,
            first_name: row.get("first_name"),
            last_name: row.get("last_name"),
            email: row.get("email"),
            role: Role::from_str(&role_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid role: {}", role_str))?,
            balance_cents: row.get("balance_cents"),
            barcodes: serde_json::from_str(&barcodes_json).context("Invalid barcodes")?,
            sepa_active: row.get::<i32, _>("sepa_active") != 0,
            iban: row.get("iban"),
            account_holder: row.get("account_holder"),
            mandate_reference: row.get("mandate_reference"),
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .context("Invalid created_at timestamp")?
                .with_timezone(&Utc),
        })
    }

    // ========================
    // Product operations
    // ========================

    /// Save a new product to the database.
    pub async fn save_product(&self, product: &Product) -> Result<()> {
        let barcodes_json = serde_json::to_string(&product.barcodes)?;

        sqlx::query(
            r#"
            INSERT INTO products (id, name, category, barcodes, member_price_cents, guest_price_cents, stock, min_stock, available, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(product.id.to_string())
        .bind(&product.name)
        .bind(&product.category)
        .bind(&barcodes_json)
        .bind(product.member_price_cents)
        .bind(product.guest_price_cents)
        .bind(product.stock)
        .bind(product.min_stock)
        .bind(product.available)
        .bind(product.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save product")?;
        Ok(())
    }

    /// Get a product by ID.
    pub async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, category, barcodes, member_price_cents, guest_price_cents, stock, min_stock, available, created_at
            FROM products
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch product")?;

        match row {
            Some(row) => Ok(Some(Self::row_to_product(&row)?)),
            None => Ok(None),
        }
    }

    /// Find the product owning the given scanner barcode.
    pub async fn find_product_by_barcode(&self, barcode: &str) -> Result<Option<Product>> {
        let row = sqlx::query(
            r#"
            SELECT p.id, p.name, p.category, p.barcodes, p.member_price_cents, p.guest_price_cents, p.stock, p.min_stock, p.available, p.created_at
            FROM products p, json_each(p.barcodes) code
            WHERE code.value = ?
            LIMIT 1
            "#,
        )
        .bind(barcode)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch product by barcode")?;

        match row {
            Some(row) => Ok(Some(Self::row_to_product(&row)?)),
            None => Ok(None),
        }
    }

    /// Check whether a barcode is already assigned to a product,
    /// optionally ignoring one product (for updates).
    pub async fn product_barcode_taken(
        &self,
        barcode: &str,
        exclude: Option<ProductId>,
    ) -> Result<bool> {
        let row = match exclude {
            Some(id) => {
                sqlx::query(
                    "SELECT COUNT(*) as hits FROM products p, json_each(p.barcodes) code WHERE code.value = ? AND p.id != ?",
                )
                .bind(barcode)
                .bind(id.to_string())
                .fetch_one(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT COUNT(*) as hits FROM products p, json_each(p.barcodes) code WHERE code.value = ?",
                )
                .bind(barcode)
                .fetch_one(&self.pool)
                .await
            }
        }
        .context("Failed to check product barcode")?;

        Ok(row.get::<i64, _>("hits") > 0)
    }

    /// List products, ordered by name (optionally including unavailable ones).
    pub async fn list_products(&self, include_unavailable: bool) -> Result<Vec<Product>> {
        let query = if include_unavailable {
            "SELECT id, name, category, barcodes, member_price_cents, guest_price_cents, stock, min_stock, available, created_at FROM products ORDER BY name"
        } else {
            "SELECT id, name, category, barcodes, member_price_cents, guest_price_cents, stock, min_stock, available, created_at FROM products WHERE available = 1 ORDER BY name"
        };

        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list products")?;

        rows.iter().map(Self::row_to_product).collect()
    }

    /// Update a product's master data. The stock column is deliberately not
    /// part of this statement; it changes only through recorded movements.
    pub async fn update_product(&self, product: &Product) -> Result<u64> {
        let barcodes_json = serde_json::to_string(&product.barcodes)?;

        let result = sqlx::query(
            r#"
            UPDATE products
            SET name = ?, category = ?, barcodes = ?, member_price_cents = ?, guest_price_cents = ?, min_stock = ?, available = ?
            WHERE id = ?
            "#,
        )
        .bind(&product.name)
        .bind(&product.category)
        .bind(&barcodes_json)
        .bind(product.member_price_cents)
        .bind(product.guest_price_cents)
        .bind(product.min_stock)
        .bind(product.available)
        .bind(product.id.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to update product")?;

        Ok(result.rows_affected())
    }

    /// Delete a product. Its movement history stays behind.
    pub async fn delete_product(&self, id: ProductId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM products WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to delete product")?;
        Ok(result.rows_affected())
    }

    fn row_to_product(row: &sqlx::sqlite::SqliteRow) -> Result<Product> {
        let id_str: String = row.get("id");
        let barcodes_json: String = row.get("barcodes");
        let created_at_str: String = row.get("created_at");

        Ok(Product {
            id: Uuid::parse_str(&id_str).context("Invalid product ID")?,
            name: row.get("name"),
            category: row.get("category"),
            barcodes: serde_json::from_str(&barcodes_json).context("Invalid barcodes")?,
            member_price_cents: row.get("member_price_cents"),
            guest_price_cents: row.get("guest_price_cents"),
            stock: row.get("stock"),
            min_stock: row.get("min_stock"),
            available: row.get::<i32, _>("available") != 0,
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .context("Invalid created_at timestamp")?
                .with_timezone(&Utc),
        })
    }

    // ========================
    // Sales
    // ========================

    /// Record a sale: stock decrements with their `sale` movements, one
    /// transaction row per line item, and the balance update, committed as
    /// one unit. A line item whose product is missing skips its inventory
    /// effect and is reported as a warning; a missing account aborts and
    /// rolls back everything.
    pub async fn create_sale(
        &self,
        account: &Account,
        transactions: &[Transaction],
        balance_delta: Cents,
    ) -> Result<SaleOutcome> {
        tracing::debug!(
            account_id = %account.id,
            items = transactions.len(),
            balance_delta,
            "recording sale"
        );

        let mut db = self.pool.begin().await.context("Failed to begin sale")?;
        let mut warnings = Vec::new();

        for transaction in transactions {
            if let Some(product_id) = transaction.product_id {
                let stock = Self::fetch_stock(&mut db, product_id).await?;
                match stock {
                    Some(stock_before) => {
                        let movement = StockMovement::new(
                            product_id,
                            MovementType::Sale,
                            -transaction.quantity,
                            stock_before,
                            "system",
                        )
                        .with_reason(format!("Verkauf an {}", account.full_name()));

                        Self::set_stock(&mut db, product_id, movement.stock_after).await?;
                        Self::insert_movement_row(&mut db, &movement).await?;
                    }
                    None => {
                        tracing::warn!(
                            product_id = %product_id,
                            line = %transaction.description,
                            "sale line skipped inventory: product not found"
                        );
                        warnings.push(format!(
                            "no stock recorded for '{}': product not found",
                            transaction.description
                        ));
                    }
                }
            }

            Self::insert_transaction_row(&mut db, transaction).await?;
        }

        // Balance step is mandatory: no row means no commit.
        let row = sqlx::query(
            "UPDATE accounts SET balance_cents = balance_cents + ? WHERE id = ? RETURNING balance_cents",
        )
        .bind(balance_delta)
        .bind(account.id.to_string())
        .fetch_optional(&mut *db)
        .await
        .context("Failed to update balance")?;

        let Some(row) = row else {
            tracing::error!(account_id = %account.id, "sale aborted: account vanished");
            return Ok(SaleOutcome::AccountMissing);
        };
        let new_balance: Cents = row.get("balance_cents");

        db.commit().await.context("Failed to commit sale")?;

        Ok(SaleOutcome::Completed {
            new_balance,
            warnings,
        })
    }

    /// Cancel a sale: mark the transaction cancelled, restore stock with a
    /// `cancellation` movement and refund the balance unless the sale was
    /// paid by voucher card. One database transaction.
    pub async fn cancel_sale(
        &self,
        transaction_id: TransactionId,
        reason: &str,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<CancelOutcome> {
        tracing::debug!(transaction_id = %transaction_id, "cancelling sale");

        let mut db = self
            .pool
            .begin()
            .await
            .context("Failed to begin cancellation")?;

        let row = sqlx::query(
            r#"
            SELECT id, account_id, product_id, description, quantity, unit_price_cents, total_cents, payment_method, cancelled, cancelled_at, cancelled_by, cancellation_reason, billing_id, is_billed, created_at
            FROM transactions
            WHERE id = ?
            "#,
        )
        .bind(transaction_id.to_string())
        .fetch_optional(&mut *db)
        .await
        .context("Failed to fetch transaction")?;

        let Some(row) = row else {
            return Ok(CancelOutcome::NotFound);
        };
        let mut transaction = Self::row_to_transaction(&row)?;

        if transaction.is_billed || transaction.billing_id.is_some() {
            return Ok(CancelOutcome::AlreadyBilled);
        }
        if transaction.cancelled {
            return Ok(CancelOutcome::AlreadyCancelled);
        }

        transaction.mark_cancelled(reason, actor, at);
        sqlx::query(
            r#"
            UPDATE transactions
            SET cancelled = 1, cancelled_at = ?, cancelled_by = ?, cancellation_reason = ?
            WHERE id = ?
            "#,
        )
        .bind(at.to_rfc3339())
        .bind(actor)
        .bind(reason)
        .bind(transaction_id.to_string())
        .execute(&mut *db)
        .await
        .context("Failed to mark transaction cancelled")?;

        // Restore stock; like the sale itself this is best-effort when the
        // product has since disappeared.
        if let Some(product_id) = transaction.product_id {
            match Self::fetch_stock(&mut db, product_id).await? {
                Some(stock_before) => {
                    let movement = StockMovement::new(
                        product_id,
                        MovementType::Cancellation,
                        transaction.quantity,
                        stock_before,
                        "system",
                    )
                    .with_reason(format!("Stornierung Transaktion {}", transaction_id));

                    Self::set_stock(&mut db, product_id, movement.stock_after).await?;
                    Self::insert_movement_row(&mut db, &movement).await?;
                }
                None => {
                    tracing::warn!(
                        product_id = %product_id,
                        "cancellation skipped stock restore: product not found"
                    );
                }
            }
        }

        let refunded_cents = refund_amount(transaction.payment_method, transaction.total_cents);
        if refunded_cents != 0 {
            let row = sqlx::query(
                "UPDATE accounts SET balance_cents = balance_cents + ? WHERE id = ? RETURNING balance_cents",
            )
            .bind(refunded_cents)
            .bind(transaction.account_id.to_string())
            .fetch_optional(&mut *db)
            .await
            .context("Failed to refund balance")?;

            if row.is_none() {
                tracing::error!(
                    account_id = %transaction.account_id,
                    "cancellation aborted: account vanished"
                );
                return Ok(CancelOutcome::AccountMissing(transaction.account_id));
            }
        }

        db.commit().await.context("Failed to commit cancellation")?;

        Ok(CancelOutcome::Cancelled {
            transaction,
            refunded_cents,
        })
    }

    /// Get a transaction by ID.
    pub async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        let row = sqlx::query(
            r#"
            SELECT id, account_id, product_id, description, quantity, unit_price_cents, total_cents, payment_method, cancelled, cancelled_at, cancelled_by, cancellation_reason, billing_id, is_billed, created_at
            FROM transactions
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch transaction")?;

        match row {
            Some(row) => Ok(Some(Self::row_to_transaction(&row)?)),
            None => Ok(None),
        }
    }

    /// List transactions with optional filters, newest first.
    pub async fn list_transactions_filtered(
        &self,
        account_id: Option<AccountId>,
        from_date: Option<DateTime<Utc>>,
        to_date: Option<DateTime<Utc>>,
        include_cancelled: bool,
        limit: Option<usize>,
    ) -> Result<Vec<Transaction>> {
        // Build query dynamically based on filters
        let mut query = String::from(
            "SELECT id, account_id, product_id, description, quantity, unit_price_cents, total_cents, payment_method, cancelled, cancelled_at, cancelled_by, cancellation_reason, billing_id, is_billed, created_at FROM transactions WHERE 1=1",
        );

        let account_id_str = account_id.map(|id| id.to_string());
        let from_date_str = from_date.map(|dt| dt.to_rfc3339());
        let to_date_str = to_date.map(|dt| dt.to_rfc3339());

        if account_id.is_some() {
            query.push_str(" AND account_id = ?");
        }
        if from_date.is_some() {
            query.push_str(" AND created_at >= ?");
        }
        if to_date.is_some() {
            query.push_str(" AND created_at <= ?");
        }
        if !include_cancelled {
            query.push_str(" AND cancelled = 0");
        }

        query.push_str(" ORDER BY created_at DESC");

        if let Some(lim) = limit {
            query.push_str(&format!(" LIMIT {}", lim));
        }

        let mut sql_query = sqlx::query(&query);

        if let Some(ref aid_str) = account_id_str {
            sql_query = sql_query.bind(aid_str);
        }
        if let Some(ref fd_str) = from_date_str {
            sql_query = sql_query.bind(fd_str);
        }
        if let Some(ref td_str) = to_date_str {
            sql_query = sql_query.bind(td_str);
        }

        let rows = sql_query
            .fetch_all(&self.pool)
            .await
            .context("Failed to list transactions")?;

        rows.iter().map(Self::row_to_transaction).collect()
    }

    fn row_to_transaction(row: &sqlx::sqlite::SqliteRow) -> Result<Transaction> {
        let id_str: String = row.get("id");
        let account_id_str: String = row.get("account_id");
        let product_id_str: Option<String> = row.get("product_id");
        let payment_method_str: String = row.get("payment_method");
        let cancelled_at_str: Option<String> = row.get("cancelled_at");
        let billing_id_str: Option<String> = row.get("billing_id");
        let created_at_str: String = row.get("created_at");

        Ok(Transaction {
            id: Uuid::parse_str(&id_str).context("Invalid transaction ID")?,
            account_id: Uuid::parse_str(&account_id_str).context("Invalid account ID")?,
            product_id: product_id_str
                .map(|s| Uuid::parse_str(&s))
                .transpose()
                .context("Invalid product ID")?,
            description: row.get("description"),
            quantity: row.get("quantity"),
            unit_price_cents: row.get("unit_price_cents"),
            total_cents: row.get("total_cents"),
            payment_method: PaymentMethod::from_str(&payment_method_str).ok_or_else(|| {
                anyhow::anyhow!("Invalid payment method: {}", payment_method_str)
            })?,
            cancelled: row.get::<i32, _>("cancelled") != 0,
            cancelled_at: cancelled_at_str
                .map(|s| DateTime::parse_from_rfc3339(&s))
                .transpose()
                .context("Invalid cancelled_at timestamp")?
                .map(|dt| dt.with_timezone(&Utc)),
            cancelled_by: row.get("cancelled_by"),
            cancellation_reason: row.get("cancellation_reason"),
            billing_id: billing_id_str
                .map(|s| Uuid::parse_str(&s))
                .transpose()
                .context("Invalid billing ID")?,
            is_billed: row.get::<i32, _>("is_billed") != 0,
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .context("Invalid created_at timestamp")?
                .with_timezone(&Utc),
        })
    }

    // ========================
    // Stock movements
    // ========================

    /// Apply a manual stock movement: normalize the entered quantity, reject
    /// corrections that would push stock below zero, then write the new stock
    /// and the movement record as one unit.
    pub async fn apply_movement(
        &self,
        product_id: ProductId,
        movement_type: MovementType,
        quantity: i64,
        reason: Option<String>,
        created_by: &str,
    ) -> Result<MovementOutcome> {
        let delta = normalize_delta(movement_type, quantity);
        tracing::debug!(
            product_id = %product_id,
            movement_type = %movement_type,
            delta,
            "applying stock movement"
        );

        let mut db = self
            .pool
            .begin()
            .await
            .context("Failed to begin stock movement")?;

        let Some(stock_before) = Self::fetch_stock(&mut db, product_id).await? else {
            return Ok(MovementOutcome::ProductMissing);
        };

        if stock_before + delta < 0 {
            // Rejected whole: no partial write leaves the transaction.
            return Ok(MovementOutcome::NegativeStock {
                current: stock_before,
                delta,
            });
        }

        let mut movement =
            StockMovement::new(product_id, movement_type, delta, stock_before, created_by);
        if let Some(reason) = reason {
            movement = movement.with_reason(reason);
        }

        Self::set_stock(&mut db, product_id, movement.stock_after).await?;
        Self::insert_movement_row(&mut db, &movement).await?;

        db.commit().await.context("Failed to commit stock movement")?;

        Ok(MovementOutcome::Applied(movement))
    }

    /// Delete a manual movement and back its delta out of current stock,
    /// clamping at zero. Sale and cancellation movements are protected.
    pub async fn delete_movement(&self, movement_id: MovementId) -> Result<DeleteMovementOutcome> {
        let mut db = self
            .pool
            .begin()
            .await
            .context("Failed to begin movement deletion")?;

        let row = sqlx::query(
            r#"
            SELECT id, product_id, movement_type, quantity_delta, stock_before, stock_after, reason, created_by, created_at
            FROM stock_movements
            WHERE id = ?
            "#,
        )
        .bind(movement_id.to_string())
        .fetch_optional(&mut *db)
        .await
        .context("Failed to fetch movement")?;

        let Some(row) = row else {
            return Ok(DeleteMovementOutcome::NotFound);
        };
        let movement = Self::row_to_movement(&row)?;

        if movement.movement_type.is_protected() {
            return Ok(DeleteMovementOutcome::Protected(movement.movement_type));
        }

        sqlx::query("DELETE FROM stock_movements WHERE id = ?")
            .bind(movement_id.to_string())
            .execute(&mut *db)
            .await
            .context("Failed to delete movement")?;

        // Back the delta out of current stock. MAX() clamps at zero: the
        // history below zero is lost, which is accepted for disavowed
        // bookkeeping entries.
        sqlx::query("UPDATE products SET stock = MAX(0, stock - ?) WHERE id = ?")
            .bind(movement.quantity_delta)
            .bind(movement.product_id.to_string())
            .execute(&mut *db)
            .await
            .context("Failed to recompute stock")?;

        db.commit()
            .await
            .context("Failed to commit movement deletion")?;

        tracing::debug!(movement_id = %movement_id, "stock movement deleted");
        Ok(DeleteMovementOutcome::Deleted)
    }

    /// List stock movements, newest first, optionally for a single product.
    pub async fn list_movements(
        &self,
        product_id: Option<ProductId>,
        limit: Option<usize>,
    ) -> Result<Vec<StockMovement>> {
        let mut query = String::from(
            "SELECT id, product_id, movement_type, quantity_delta, stock_before, stock_after, reason, created_by, created_at FROM stock_movements WHERE 1=1",
        );

        let product_id_str = product_id.map(|id| id.to_string());

        if product_id.is_some() {
            query.push_str(" AND product_id = ?");
        }

        query.push_str(" ORDER BY created_at DESC");

        if let Some(lim) = limit {
            query.push_str(&format!(" LIMIT {}", lim));
        }

        let mut sql_query = sqlx::query(&query);
        if let Some(ref pid_str) = product_id_str {
            sql_query = sql_query.bind(pid_str);
        }

        let rows = sql_query
            .fetch_all(&self.pool)
            .await
            .context("Failed to list movements")?;

        rows.iter().map(Self::row_to_movement).collect()
    }

    fn row_to_movement(row: &sqlx::sqlite::SqliteRow) -> Result<StockMovement> {
        let id_str: String = row.get("id");
        let product_id_str: String = row.get("product_id");
        let movement_type_str: String = row.get("movement_type");
        let created_at_str: String = row.get("created_at");

        Ok(StockMovement {
            id: Uuid::parse_str(&id_str).context("Invalid movement ID")?,
            product_id: Uuid::parse_str(&product_id_str).context("Invalid product ID")?,
            movement_type: MovementType::from_str(&movement_type_str).ok_or_else(|| {
                anyhow::anyhow!("Invalid movement type: {}", movement_type_str)
            })?,
            quantity_delta: row.get("quantity_delta"),
            stock_before: row.get("stock_before"),
            stock_after: row.get("stock_after"),
            reason: row.get("reason"),
            created_by: row.get("created_by"),
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .context("Invalid created_at timestamp")?
                .with_timezone(&Utc),
        })
    }

    // ========================
    // Billing
    // ========================

    /// Run a billing batch: total the open transactions of the batch's
    /// accounts, persist the batch and mark those transactions billed,
    /// all in one database transaction. Returns the stored batch and the
    /// number of transactions captured.
    pub async fn create_billing(&self, mut batch: BillingBatch) -> Result<(BillingBatch, i64)> {
        tracing::debug!(
            billing_number = %batch.billing_number,
            accounts = batch.account_ids.len(),
            "running billing batch"
        );

        let mut db = self.pool.begin().await.context("Failed to begin billing")?;

        let placeholders = vec!["?"; batch.account_ids.len()].join(", ");

        let totals_sql = format!(
            "SELECT COALESCE(SUM(total_cents), 0) as total, COUNT(*) as captured FROM transactions WHERE cancelled = 0 AND billing_id IS NULL AND account_id IN ({})",
            placeholders
        );
        let mut totals_query = sqlx::query(&totals_sql);
        for id in &batch.account_ids {
            totals_query = totals_query.bind(id.to_string());
        }
        let row = totals_query
            .fetch_one(&mut *db)
            .await
            .context("Failed to total open transactions")?;

        batch.total_cents = row.get("total");
        batch.transaction_count = row.get("captured");

        let account_ids_json = serde_json::to_string(&batch.account_ids)?;
        sqlx::query(
            r#"
            INSERT INTO billings (id, billing_number, account_ids, total_cents, transaction_count, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(batch.id.to_string())
        .bind(&batch.billing_number)
        .bind(&account_ids_json)
        .bind(batch.total_cents)
        .bind(batch.transaction_count)
        .bind(batch.created_at.to_rfc3339())
        .execute(&mut *db)
        .await
        .context("Failed to save billing batch")?;

        let capture_sql = format!(
            "UPDATE transactions SET billing_id = ?, is_billed = 1 WHERE cancelled = 0 AND billing_id IS NULL AND account_id IN ({})",
            placeholders
        );
        let mut capture_query = sqlx::query(&capture_sql).bind(batch.id.to_string());
        for id in &batch.account_ids {
            capture_query = capture_query.bind(id.to_string());
        }
        let result = capture_query
            .execute(&mut *db)
            .await
            .context("Failed to capture transactions")?;

        db.commit().await.context("Failed to commit billing")?;

        Ok((batch, result.rows_affected() as i64))
    }

    /// Attach unbilled transactions of the given accounts to an existing
    /// billing batch. Guarded by `billing_id IS NULL`, so already-billed
    /// transactions are untouched and the call is idempotent.
    pub async fn mark_billed(
        &self,
        billing_id: BillingId,
        account_ids: &[AccountId],
    ) -> Result<i64> {
        if account_ids.is_empty() {
            return Ok(0);
        }

        let placeholders = vec!["?"; account_ids.len()].join(", ");
        let sql = format!(
            "UPDATE transactions SET billing_id = ?, is_billed = 1 WHERE billing_id IS NULL AND account_id IN ({})",
            placeholders
        );

        let mut query = sqlx::query(&sql).bind(billing_id.to_string());
        for id in account_ids {
            query = query.bind(id.to_string());
        }

        let result = query
            .execute(&self.pool)
            .await
            .context("Failed to mark transactions billed")?;

        tracing::debug!(
            billing_id = %billing_id,
            marked = result.rows_affected(),
            "marked transactions billed"
        );
        Ok(result.rows_affected() as i64)
    }

    /// Get a billing batch by ID.
    pub async fn get_billing(&self, id: BillingId) -> Result<Option<BillingBatch>> {
        let row = sqlx::query(
            r#"
            SELECT id, billing_number, account_ids, total_cents, transaction_count, created_at
            FROM billings
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch billing batch")?;

        match row {
            Some(row) => Ok(Some(Self::row_to_billing(&row)?)),
            None => Ok(None),
        }
    }

    /// List all billing batches, newest first.
    pub async fn list_billings(&self) -> Result<Vec<BillingBatch>> {
        let rows = sqlx::query(
            r#"
            SELECT id, billing_number, account_ids, total_cents, transaction_count, created_at
            FROM billings
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list billing batches")?;

        rows.iter().map(Self::row_to_billing).collect()
    }

    /// List the transactions captured by a billing batch.
    pub async fn list_billing_transactions(
        &self,
        billing_id: BillingId,
    ) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, product_id, description, quantity, unit_price_cents, total_cents, payment_method, cancelled, cancelled_at, cancelled_by, cancellation_reason, billing_id, is_billed, created_at
            FROM transactions
            WHERE billing_id = ?
            ORDER BY created_at DESC
            "#,
        )
        .bind(billing_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list billing transactions")?;

        rows.iter().map(Self::row_to_transaction).collect()
    }

    fn row_to_billing(row: &sqlx::sqlite::SqliteRow) -> Result<BillingBatch> {
        let id_str: String = row.get("id");
        let account_ids_json: String = row.get("account_ids");
        let created_at_str: String = row.get("created_at");

        Ok(BillingBatch {
            id: Uuid::parse_str(&id_str).context("Invalid billing ID")?,
            billing_number: row.get("billing_number"),
            account_ids: serde_json::from_str(&account_ids_json).context("Invalid account ids")?,
            total_cents: row.get("total_cents"),
            transaction_count: row.get("transaction_count"),
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .context("Invalid created_at timestamp")?
                .with_timezone(&Utc),
        })
    }

    // ========================
    // Reporting
    // ========================

    /// Aggregate counts for the venue overview, computed in SQL.
    pub async fn dashboard_stats(&self) -> Result<DashboardStats> {
        let members = sqlx::query(
            "SELECT COUNT(*) as member_count, COALESCE(SUM(CASE WHEN balance_cents < 0 THEN 1 ELSE 0 END), 0) as with_debt FROM accounts WHERE role = ?",
        )
        .bind(Role::Member.as_str())
        .fetch_one(&self.pool)
        .await
        .context("Failed to count members")?;

        let products = sqlx::query(
            "SELECT COALESCE(SUM(CASE WHEN available = 1 THEN 1 ELSE 0 END), 0) as available_products, COALESCE(SUM(stock), 0) as total_stock, COALESCE(SUM(CASE WHEN stock <= min_stock THEN 1 ELSE 0 END), 0) as low_stock FROM products",
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to aggregate products")?;

        let revenue = sqlx::query(
            "SELECT COALESCE(SUM(total_cents), 0) as unbilled FROM transactions WHERE billing_id IS NULL AND cancelled = 0 AND payment_method != ?",
        )
        .bind(PaymentMethod::ManualBooking.as_str())
        .fetch_one(&self.pool)
        .await
        .context("Failed to sum unbilled revenue")?;

        Ok(DashboardStats {
            member_count: members.get("member_count"),
            available_products: products.get("available_products"),
            total_stock: products.get("total_stock"),
            low_stock_count: products.get("low_stock"),
            members_with_debt: members.get("with_debt"),
            unbilled_revenue_cents: revenue.get("unbilled"),
        })
    }

    /// Accounts eligible for a SEPA debit run: active mandate, IBAN on file,
    /// negative balance. Ordered by name.
    pub async fn sepa_eligible_accounts(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query(
            r#"
            SELECT id, first_name, last_name, email, role, balance_cents, barcodes, sepa_active, iban, account_holder, mandate_reference, created_at
            FROM accounts
            WHERE sepa_active = 1 AND balance_cents < 0 AND iban IS NOT NULL
            ORDER BY first_name, last_name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list SEPA-eligible accounts")?;

        rows.iter().map(Self::row_to_account).collect()
    }

    // ========================
    // Settings
    // ========================

    /// Get a setting value by key.
    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch setting")?;

        Ok(row.map(|r| r.get("value")))
    }

    /// Set a setting, replacing any previous value.
    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO settings (key, value) VALUES (?, ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .context("Failed to save setting")?;
        Ok(())
    }

    /// List all settings as key/value pairs, ordered by key.
    pub async fn list_settings(&self) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query("SELECT key, value FROM settings ORDER BY key")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list settings")?;

        Ok(rows
            .iter()
            .map(|row| (row.get("key"), row.get("value")))
            .collect())
    }

    // ========================
    // Shared helpers
    // ========================

    async fn fetch_stock(
        db: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        product_id: ProductId,
    ) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT stock FROM products WHERE id = ?")
            .bind(product_id.to_string())
            .fetch_optional(&mut **db)
            .await
            .context("Failed to fetch stock")?;

        Ok(row.map(|r| r.get("stock")))
    }

    async fn set_stock(
        db: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        product_id: ProductId,
        stock: i64,
    ) -> Result<()> {
        sqlx::query("UPDATE products SET stock = ? WHERE id = ?")
            .bind(stock)
            .bind(product_id.to_string())
            .execute(&mut **db)
            .await
            .context("Failed to write stock")?;
        Ok(())
    }

    async fn insert_movement_row(
        db: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        movement: &StockMovement,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_movements (id, product_id, movement_type, quantity_delta, stock_before, stock_after, reason, created_by, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(movement.id.to_string())
        .bind(movement.product_id.to_string())
        .bind(movement.movement_type.as_str())
        .bind(movement.quantity_delta)
        .bind(movement.stock_before)
        .bind(movement.stock_after)
        .bind(&movement.reason)
        .bind(&movement.created_by)
        .bind(movement.created_at.to_rfc3339())
        .execute(&mut **db)
        .await
        .context("Failed to save stock movement")?;
        Ok(())
    }

    async fn insert_transaction_row(
        db: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        transaction: &Transaction,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO transactions (id, account_id, product_id, description, quantity, unit_price_cents, total_cents, payment_method, cancelled, cancelled_at, cancelled_by, cancellation_reason, billing_id, is_billed, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(transaction.id.to_string())
        .bind(transaction.account_id.to_string())
        .bind(transaction.product_id.map(|id| id.to_string()))
        .bind(&transaction.description)
        .bind(transaction.quantity)
        .bind(transaction.unit_price_cents)
        .bind(transaction.total_cents)
        .bind(transaction.payment_method.as_str())
        .bind(transaction.cancelled)
        .bind(transaction.cancelled_at.map(|dt| dt.to_rfc3339()))
        .bind(&transaction.cancelled_by)
        .bind(&transaction.cancellation_reason)
        .bind(transaction.billing_id.map(|id| id.to_string()))
        .bind(transaction.is_billed)
        .bind(transaction.created_at.to_rfc3339())
        .execute(&mut **db)
        .await
        .context("Failed to save transaction")?;
        Ok(())
    }
}
