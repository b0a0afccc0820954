use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::application::{LedgerService, TransactionFilter};
use crate::domain::{
    format_eur, parse_cents, Account, AccountId, MovementType, PaymentMethod, Product, Role,
    SaleItem,
};

/// Deckel - Club Tab Ledger
#[derive(Parser)]
#[command(name = "deckel")]
#[command(about = "A transactional point-of-sale ledger for a small members' club")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "deckel.db")]
    pub database: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Account management commands
    #[command(subcommand)]
    Account(AccountCommands),

    /// Product catalog commands
    #[command(subcommand)]
    Product(ProductCommands),

    /// Record a sale at the till
    Sell {
        /// Account barcode or ID
        account: String,

        /// Product barcode or ID (omit for a free-form charge)
        product: Option<String>,

        /// Number of units
        #[arg(short, long, default_value = "1")]
        quantity: i64,

        /// Payment method: balance-debit, voucher-card, voucher-refund, manual-booking, other
        #[arg(short, long, default_value = "balance-debit")]
        method: String,

        /// Description for a free-form charge (no stock effect)
        #[arg(short, long)]
        description: Option<String>,

        /// Unit price override, or the price of a free-form charge (e.g., "2.50" or "2,50")
        #[arg(short, long)]
        price: Option<String>,
    },

    /// Cancel a sale transaction (restores stock and refunds the tab)
    Cancel {
        /// Transaction ID to cancel
        id: String,

        /// Reason for the cancellation
        #[arg(short, long)]
        reason: Option<String>,

        /// Who is cancelling
        #[arg(long)]
        actor: Option<String>,
    },

    /// List recent transactions
    Transactions {
        /// Filter by account barcode or ID
        #[arg(long)]
        account: Option<String>,

        /// Filter from date (YYYY-MM-DD)
        #[arg(long)]
        from_date: Option<String>,

        /// Filter to date (YYYY-MM-DD)
        #[arg(long)]
        to_date: Option<String>,

        /// Include cancelled transactions
        #[arg(long)]
        all: bool,

        /// Maximum number of transactions to show
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Inventory management commands
    #[command(subcommand)]
    Stock(StockCommands),

    /// Billing batch commands
    #[command(subcommand)]
    Billing(BillingCommands),

    /// Show the SEPA direct-debit run
    Sepa {
        /// Write the run as CSV to this file (prints a table if omitted)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Show the club overview
    Dashboard,

    /// Settings commands
    #[command(subcommand)]
    Settings(SettingsCommands),

    /// Export data to CSV or JSON
    Export {
        /// What to export: transactions, accounts, products, sepa, full
        export_type: String,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Import data from CSV
    Import {
        /// What to import: accounts, products
        import_type: String,

        /// Input file (stdin if omitted)
        #[arg(short, long)]
        input: Option<String>,

        /// Preview without importing
        #[arg(long)]
        dry_run: bool,

        /// Skip records that fail (e.g. duplicate barcodes)
        #[arg(long)]
        skip_duplicates: bool,

        /// Validate without importing
        #[arg(long)]
        validate: bool,
    },
}

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Create a new account
    Create {
        /// First name
        first_name: String,

        /// Last name
        last_name: String,

        /// Role: member, guest, bartender, admin
        #[arg(short, long, default_value = "member")]
        role: String,

        /// Email address
        #[arg(short, long)]
        email: Option<String>,

        /// Scanner barcode (repeatable)
        #[arg(short, long)]
        barcode: Vec<String>,
    },

    /// List all accounts
    List,

    /// Show detailed account information
    Show {
        /// Account barcode or ID
        account: String,
    },

    /// Attach a SEPA direct-debit mandate
    Mandate {
        /// Account barcode or ID
        account: String,

        /// IBAN to debit
        iban: String,

        /// Account holder (defaults to the account name)
        #[arg(long)]
        holder: Option<String>,

        /// Mandate reference
        #[arg(short, long)]
        reference: String,
    },

    /// Delete an account (its transaction history stays)
    Delete {
        /// Account barcode or ID
        account: String,
    },
}

#[derive(Subcommand)]
pub enum ProductCommands {
    /// Create a new product
    Create {
        /// Product name
        name: String,

        /// Member price (e.g., "2.50" or "2,50")
        #[arg(short, long)]
        member_price: String,

        /// Guest price (defaults to the member price)
        #[arg(short, long)]
        guest_price: Option<String>,

        /// Category (e.g., "beer", "softdrinks")
        #[arg(short, long)]
        category: Option<String>,

        /// Scanner barcode (repeatable)
        #[arg(short, long)]
        barcode: Vec<String>,

        /// Reorder threshold
        #[arg(long, default_value = "0")]
        min_stock: i64,
    },

    /// List products
    List {
        /// Include retired products
        #[arg(long)]
        all: bool,
    },

    /// Show detailed product information
    Show {
        /// Product barcode or ID
        product: String,
    },

    /// Take a product off the menu (soft delete)
    Retire {
        /// Product barcode or ID
        product: String,
    },

    /// Delete a product (its movement history stays)
    Delete {
        /// Product barcode or ID
        product: String,
    },
}

#[derive(Subcommand)]
pub enum StockCommands {
    /// Record goods received from a supplier
    Purchase {
        /// Product barcode or ID
        product: String,

        /// Number of units received
        quantity: i64,

        /// Reason or delivery note
        #[arg(short, long)]
        reason: Option<String>,
    },

    /// Record opening stock for a new product
    Initial {
        /// Product barcode or ID
        product: String,

        /// Number of units on the shelf
        quantity: i64,

        /// Reason
        #[arg(short, long)]
        reason: Option<String>,
    },

    /// Record a signed inventory correction
    Correct {
        /// Product barcode or ID
        product: String,

        /// Signed stock delta (e.g., -3 for breakage)
        #[arg(allow_hyphen_values = true)]
        delta: i64,

        /// Reason
        #[arg(short, long)]
        reason: Option<String>,
    },

    /// Show the stock movement history
    History {
        /// Filter by product barcode or ID
        #[arg(long)]
        product: Option<String>,

        /// Maximum number of movements to show
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Delete a manual stock movement and back its delta out
    Delete {
        /// Movement ID
        id: String,
    },

    /// List products at or below their reorder threshold
    Low,
}

#[derive(Subcommand)]
pub enum BillingCommands {
    /// Run a billing batch over the open transactions of given accounts
    Run {
        /// Account barcode or ID (repeatable)
        #[arg(short, long)]
        account: Vec<String>,

        /// Bill all accounts
        #[arg(long)]
        all: bool,
    },

    /// List billing batches
    List,

    /// Show a billing batch and its captured transactions
    Show {
        /// Billing batch ID
        id: String,
    },

    /// Attach remaining unbilled transactions to an existing batch
    MarkBilled {
        /// Billing batch ID
        id: String,

        /// Account barcode or ID (repeatable)
        #[arg(short, long)]
        account: Vec<String>,
    },
}

#[derive(Subcommand)]
pub enum SettingsCommands {
    /// Read a setting
    Get {
        /// Setting key
        key: String,
    },

    /// Write a setting
    Set {
        /// Setting key
        key: String,

        /// Setting value
        value: String,
    },

    /// List all settings
    List,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Init => {
                LedgerService::init(&self.database).await?;
                println!("Database initialized: {}", self.database);
            }

            Commands::Account(account_cmd) => {
                let service = LedgerService::connect(&self.database).await?;
                run_account_command(&service, account_cmd).await?;
            }

            Commands::Product(product_cmd) => {
                let service = LedgerService::connect(&self.database).await?;
                run_product_command(&service, product_cmd).await?;
            }

            Commands::Sell {
                account,
                product,
                quantity,
                method,
                description,
                price,
            } => {
                let service = LedgerService::connect(&self.database).await?;
                run_sell_command(
                    &service,
                    &account,
                    product.as_deref(),
                    quantity,
                    &method,
                    description,
                    price.as_deref(),
                )
                .await?;
            }

            Commands::Cancel { id, reason, actor } => {
                let service = LedgerService::connect(&self.database).await?;
                let transaction_id = Uuid::parse_str(&id)
                    .context("Invalid transaction ID format (expected UUID)")?;

                let result = service.cancel_sale(transaction_id, reason, actor).await?;

                println!(
                    "Cancelled transaction: {} ({})",
                    result.transaction.description, result.transaction.id
                );
                if result.refunded_cents != 0 {
                    println!("Refunded: {}", format_eur(result.refunded_cents));
                } else {
                    println!("No refund (voucher-card sale)");
                }
            }

            Commands::Transactions {
                account,
                from_date,
                to_date,
                all,
                limit,
            } => {
                let service = LedgerService::connect(&self.database).await?;
                run_transactions_command(&service, account, from_date, to_date, all, limit).await?;
            }

            Commands::Stock(stock_cmd) => {
                let service = LedgerService::connect(&self.database).await?;
                run_stock_command(&service, stock_cmd).await?;
            }

            Commands::Billing(billing_cmd) => {
                let service = LedgerService::connect(&self.database).await?;
                run_billing_command(&service, billing_cmd).await?;
            }

            Commands::Sepa { output } => {
                let service = LedgerService::connect(&self.database).await?;
                run_sepa_command(&service, output.as_deref()).await?;
            }

            Commands::Dashboard => {
                let service = LedgerService::connect(&self.database).await?;
                run_dashboard_command(&service).await?;
            }

            Commands::Settings(settings_cmd) => {
                let service = LedgerService::connect(&self.database).await?;
                run_settings_command(&service, settings_cmd).await?;
            }

            Commands::Export {
                export_type,
                output,
            } => {
                let service = LedgerService::connect(&self.database).await?;
                run_export_command(&service, &export_type, output.as_deref()).await?;
            }

            Commands::Import {
                import_type,
                input,
                dry_run,
                skip_duplicates,
                validate,
            } => {
                let service = LedgerService::connect(&self.database).await?;
                run_import_command(
                    &service,
                    &import_type,
                    input.as_deref(),
                    dry_run,
                    skip_duplicates,
                    validate,
                )
                .await?;
            }
        }

        Ok(())
    }
}

async fn run_account_command(service: &LedgerService, cmd: AccountCommands) -> Result<()> {
    match cmd {
        AccountCommands::Create {
            first_name,
            last_name,
            role,
            email,
            barcode,
        } => {
            let role = Role::from_str(&role).ok_or_else(|| {
                anyhow::anyhow!(
                    "Invalid role '{}'. Valid roles: member, guest, bartender, admin",
                    role
                )
            })?;

            let account = service
                .create_account(first_name, last_name, role, email, barcode)
                .await?;
            println!("Created account: {} ({})", account.full_name(), account.id);
        }

        AccountCommands::List => {
            let accounts = service.list_accounts().await?;
            if accounts.is_empty() {
                println!("No accounts found.");
            } else {
                println!(
                    "{:<24} {:<10} {:>12} {:<5} BARCODES",
                    "NAME", "ROLE", "BALANCE", "SEPA"
                );
                println!("{}", "-".repeat(70));
                for account in accounts {
                    println!(
                        "{:<24} {:<10} {:>12} {:<5} {}",
                        truncate(&account.full_name(), 24),
                        account.role.as_str(),
                        format_eur(account.balance_cents),
                        if account.sepa_active { "yes" } else { "no" },
                        account.barcodes.join(";")
                    );
                }
            }
        }

        AccountCommands::Show { account } => {
            let account = resolve_account(service, &account).await?;

            println!("Account: {}", account.full_name());
            println!("  ID:       {}", account.id);
            println!("  Role:     {}", account.role);
            if let Some(email) = &account.email {
                println!("  Email:    {}", email);
            }
            println!("  Balance:  {}", format_eur(account.balance_cents));
            if !account.barcodes.is_empty() {
                println!("  Barcodes: {}", account.barcodes.join(", "));
            }
            println!(
                "  SEPA:     {}",
                if account.sepa_active {
                    "active"
                } else {
                    "inactive"
                }
            );
            if let Some(iban) = &account.iban {
                println!("  IBAN:     {}", iban);
            }
            if let Some(reference) = &account.mandate_reference {
                println!("  Mandate:  {}", reference);
            }
            println!(
                "  Created:  {}",
                account.created_at.format("%Y-%m-%d %H:%M:%S")
            );
        }

        AccountCommands::Mandate {
            account,
            iban,
            holder,
            reference,
        } => {
            let account = resolve_account(service, &account).await?;
            let holder = holder.unwrap_or_else(|| account.full_name());

            let mandated = account.with_mandate(iban, holder, reference);
            let account = service.update_account(&mandated).await?;
            println!(
                "Attached SEPA mandate to {} ({})",
                account.full_name(),
                account.iban.as_deref().unwrap_or("")
            );
        }

        AccountCommands::Delete { account } => {
            let account = resolve_account(service, &account).await?;
            service.delete_account(account.id).await?;
            println!("Deleted account: {}", account.full_name());
        }
    }
    Ok(())
}

async fn run_product_command(service: &LedgerService, cmd: ProductCommands) -> Result<()> {
    match cmd {
        ProductCommands::Create {
            name,
            member_price,
            guest_price,
            category,
            barcode,
            min_stock,
        } => {
            let member_price_cents = parse_cents(&member_price)
                .context("Invalid member price. Use '2.50' or '2,50'")?;
            let guest_price_cents = match guest_price {
                Some(p) => parse_cents(&p).context("Invalid guest price. Use '2.50' or '2,50'")?,
                None => member_price_cents,
            };

            let product = service
                .create_product(
                    name,
                    member_price_cents,
                    guest_price_cents,
                    category,
                    barcode,
                    min_stock,
                )
                .await?;
            println!(
                "Created product: {} (member {}, guest {})",
                product.name,
                format_eur(product.member_price_cents),
                format_eur(product.guest_price_cents)
            );
        }

        ProductCommands::List { all } => {
            let products = service.list_products(all).await?;
            if products.is_empty() {
                println!("No products found.");
            } else {
                println!(
                    "{:<24} {:<14} {:>10} {:>10} {:>6} {:>6}",
                    "NAME", "CATEGORY", "MEMBER", "GUEST", "STOCK", "MIN"
                );
                println!("{}", "-".repeat(74));
                for product in products {
                    let name = if product.available {
                        product.name.clone()
                    } else {
                        format!("{} (retired)", product.name)
                    };
                    println!(
                        "{:<24} {:<14} {:>10} {:>10} {:>6} {:>6}",
                        truncate(&name, 24),
                        truncate(product.category.as_deref().unwrap_or(""), 14),
                        format_eur(product.member_price_cents),
                        format_eur(product.guest_price_cents),
                        product.stock,
                        product.min_stock
                    );
                }
            }
        }

        ProductCommands::Show { product } => {
            let product = resolve_product(service, &product).await?;

            println!("Product: {}", product.name);
            println!("  ID:           {}", product.id);
            if let Some(category) = &product.category {
                println!("  Category:     {}", category);
            }
            println!(
                "  Member price: {}",
                format_eur(product.member_price_cents)
            );
            println!("  Guest price:  {}", format_eur(product.guest_price_cents));
            println!(
                "  Stock:        {} (minimum {})",
                product.stock, product.min_stock
            );
            if product.is_low_stock() {
                println!("  Low on stock!");
            }
            println!(
                "  Available:    {}",
                if product.available { "yes" } else { "no" }
            );
            if !product.barcodes.is_empty() {
                println!("  Barcodes:     {}", product.barcodes.join(", "));
            }
            println!(
                "  Created:      {}",
                product.created_at.format("%Y-%m-%d %H:%M:%S")
            );
        }

        ProductCommands::Retire { product } => {
            let mut product = resolve_product(service, &product).await?;
            product.available = false;
            let product = service.update_product(&product).await?;
            println!("Retired product: {}", product.name);
        }

        ProductCommands::Delete { product } => {
            let product = resolve_product(service, &product).await?;
            service.delete_product(product.id).await?;
            println!("Deleted product: {}", product.name);
        }
    }
    Ok(())
}

async fn run_sell_command(
    service: &LedgerService,
    account_key: &str,
    product_key: Option<&str>,
    quantity: i64,
    method: &str,
    description: Option<String>,
    price: Option<&str>,
) -> Result<()> {
    let account = resolve_account(service, account_key).await?;
    let payment_method = parse_payment_method(method)?;

    let item = match (product_key, description) {
        (Some(key), None) => {
            let product = resolve_product(service, key).await?;
            let unit_price = match price {
                Some(p) => parse_cents(p).context("Invalid price format. Use '2.50' or '2,50'")?,
                None => product.price_for(account.role),
            };
            SaleItem::new(Some(product.id), product.name.clone(), quantity, unit_price)
        }
        (None, Some(description)) => {
            let price = price.context("A free-form charge needs --price")?;
            let unit_price =
                parse_cents(price).context("Invalid price format. Use '2.50' or '2,50'")?;
            SaleItem::new(None, description, quantity, unit_price)
        }
        (Some(_), Some(_)) => {
            anyhow::bail!("Give either a product or --description, not both")
        }
        (None, None) => {
            anyhow::bail!("Nothing to sell: give a product, or --description with --price")
        }
    };

    let result = service
        .create_sale(account.id, vec![item], payment_method)
        .await?;

    let line = &result.transactions[0];
    println!(
        "Sold {} x {} to {} ({})",
        line.quantity,
        line.description,
        account.full_name(),
        format_eur(result.total_cents)
    );
    for warning in &result.warnings {
        eprintln!("Warning: {}", warning);
    }
    println!("New balance: {}", format_eur(result.new_balance));
    println!("Transaction: {}", line.id);

    Ok(())
}

async fn run_transactions_command(
    service: &LedgerService,
    account: Option<String>,
    from_date: Option<String>,
    to_date: Option<String>,
    all: bool,
    limit: Option<usize>,
) -> Result<()> {
    use std::collections::HashMap;

    // Parse dates
    let from_date_parsed = from_date
        .map(|s| parse_date(&s))
        .transpose()
        .context("Invalid from-date")?;
    let to_date_parsed = to_date
        .map(|s| parse_date(&s))
        .transpose()
        .context("Invalid to-date")?;

    let account_id = match account {
        Some(key) => Some(resolve_account(service, &key).await?.id),
        None => None,
    };

    let filter = TransactionFilter {
        account_id,
        from_date: from_date_parsed,
        to_date: to_date_parsed,
        include_cancelled: all,
        limit,
    };

    let transactions = service.list_transactions(filter).await?;

    if transactions.is_empty() {
        println!("No transactions found.");
    } else {
        // Resolve account names once per account
        let mut names: HashMap<AccountId, String> = HashMap::new();
        for transaction in &transactions {
            if !names.contains_key(&transaction.account_id) {
                let name = match service.get_account(transaction.account_id).await {
                    Ok(account) => account.full_name(),
                    Err(_) => "?".to_string(),
                };
                names.insert(transaction.account_id, name);
            }
        }

        println!(
            "{:<12} {:>10} {:<20} {:<10} DESCRIPTION",
            "DATE", "AMOUNT", "ACCOUNT", "STATUS"
        );
        println!("{}", "-".repeat(80));

        // Show all transactions (limit already applied in query)
        for transaction in transactions.iter().rev() {
            let account_name = names
                .get(&transaction.account_id)
                .map(|s| s.as_str())
                .unwrap_or("?");
            let status = if transaction.cancelled {
                "cancelled"
            } else if transaction.is_billed {
                "billed"
            } else {
                "open"
            };

            println!(
                "{:<12} {:>10} {:<20} {:<10} {}",
                transaction.created_at.format("%Y-%m-%d"),
                format_eur(transaction.total_cents),
                truncate(account_name, 20),
                status,
                truncate(&transaction.description, 30)
            );
        }
    }
    Ok(())
}

async fn run_stock_command(service: &LedgerService, cmd: StockCommands) -> Result<()> {
    match cmd {
        StockCommands::Purchase {
            product,
            quantity,
            reason,
        } => {
            let product = resolve_product(service, &product).await?;
            let movement = service
                .record_stock_movement(product.id, MovementType::Purchase, quantity, reason, None)
                .await?;
            println!(
                "Recorded purchase: {} {:+} -> {} on shelf",
                product.name, movement.quantity_delta, movement.stock_after
            );
        }

        StockCommands::Initial {
            product,
            quantity,
            reason,
        } => {
            let product = resolve_product(service, &product).await?;
            let movement = service
                .record_stock_movement(product.id, MovementType::Initial, quantity, reason, None)
                .await?;
            println!(
                "Recorded opening stock: {} {:+} -> {} on shelf",
                product.name, movement.quantity_delta, movement.stock_after
            );
        }

        StockCommands::Correct {
            product,
            delta,
            reason,
        } => {
            let product = resolve_product(service, &product).await?;
            let movement = service
                .record_stock_movement(product.id, MovementType::Correction, delta, reason, None)
                .await?;
            println!(
                "Recorded correction: {} {:+} -> {} on shelf",
                product.name, movement.quantity_delta, movement.stock_after
            );
        }

        StockCommands::History { product, limit } => {
            use std::collections::HashMap;
            use crate::domain::ProductId;

            let product_id = match product {
                Some(key) => Some(resolve_product(service, &key).await?.id),
                None => None,
            };

            let movements = service.list_movements(product_id, limit).await?;

            if movements.is_empty() {
                println!("No stock movements found.");
            } else {
                // Resolve product names once per product
                let mut names: HashMap<ProductId, String> = HashMap::new();
                for movement in &movements {
                    if !names.contains_key(&movement.product_id) {
                        let name = match service.get_product(movement.product_id).await {
                            Ok(product) => product.name,
                            Err(_) => "?".to_string(),
                        };
                        names.insert(movement.product_id, name);
                    }
                }

                println!(
                    "{:<12} {:<20} {:<14} {:>6} {:>6} REASON",
                    "DATE", "PRODUCT", "TYPE", "DELTA", "AFTER"
                );
                println!("{}", "-".repeat(80));

                for movement in movements.iter().rev() {
                    let product_name = names
                        .get(&movement.product_id)
                        .map(|s| s.as_str())
                        .unwrap_or("?");

                    println!(
                        "{:<12} {:<20} {:<14} {:>+6} {:>6} {}",
                        movement.created_at.format("%Y-%m-%d"),
                        truncate(product_name, 20),
                        movement.movement_type.as_str(),
                        movement.quantity_delta,
                        movement.stock_after,
                        truncate(movement.reason.as_deref().unwrap_or(""), 30)
                    );
                }
            }
        }

        StockCommands::Delete { id } => {
            let movement_id =
                Uuid::parse_str(&id).context("Invalid movement ID format (expected UUID)")?;
            service.delete_stock_movement(movement_id).await?;
            println!("Deleted stock movement: {}", movement_id);
        }

        StockCommands::Low => {
            let products = service.list_products(false).await?;
            let low: Vec<Product> = products.into_iter().filter(|p| p.is_low_stock()).collect();

            if low.is_empty() {
                println!("No products below their reorder threshold.");
            } else {
                println!("{:<24} {:>6} {:>6}", "NAME", "STOCK", "MIN");
                println!("{}", "-".repeat(38));
                for product in low {
                    println!(
                        "{:<24} {:>6} {:>6}",
                        truncate(&product.name, 24),
                        product.stock,
                        product.min_stock
                    );
                }
            }
        }
    }
    Ok(())
}

async fn run_billing_command(service: &LedgerService, cmd: BillingCommands) -> Result<()> {
    match cmd {
        BillingCommands::Run { account, all } => {
            let account_ids: Vec<AccountId> = if all {
                service
                    .list_accounts()
                    .await?
                    .into_iter()
                    .map(|a| a.id)
                    .collect()
            } else {
                if account.is_empty() {
                    anyhow::bail!("Give at least one --account, or --all");
                }
                let mut ids = Vec::new();
                for key in &account {
                    ids.push(resolve_account(service, key).await?.id);
                }
                ids
            };

            let result = service.create_billing(account_ids, None).await?;
            println!(
                "Billing batch {}: captured {} transactions, {}",
                result.batch.billing_number,
                result.captured,
                format_eur(result.batch.total_cents)
            );
            println!("Batch ID: {}", result.batch.id);
        }

        BillingCommands::List => {
            let batches = service.list_billings().await?;
            if batches.is_empty() {
                println!("No billing batches found.");
            } else {
                println!(
                    "{:<18} {:<12} {:>8} {:>13} {:>12}",
                    "NUMBER", "DATE", "ACCOUNTS", "TRANSACTIONS", "TOTAL"
                );
                println!("{}", "-".repeat(67));
                for batch in batches {
                    println!(
                        "{:<18} {:<12} {:>8} {:>13} {:>12}",
                        batch.billing_number,
                        batch.created_at.format("%Y-%m-%d"),
                        batch.account_ids.len(),
                        batch.transaction_count,
                        format_eur(batch.total_cents)
                    );
                }
            }
        }

        BillingCommands::Show { id } => {
            let billing_id =
                Uuid::parse_str(&id).context("Invalid billing ID format (expected UUID)")?;
            let batch = service.get_billing(billing_id).await?;

            println!("Billing batch: {}", batch.billing_number);
            println!("  ID:           {}", batch.id);
            println!(
                "  Created:      {}",
                batch.created_at.format("%Y-%m-%d %H:%M:%S")
            );
            println!("  Accounts:     {}", batch.account_ids.len());
            println!("  Transactions: {}", batch.transaction_count);
            println!("  Total:        {}", format_eur(batch.total_cents));

            let transactions = service.list_billing_transactions(billing_id).await?;
            if !transactions.is_empty() {
                println!();
                println!("{:<12} {:>10} DESCRIPTION", "DATE", "AMOUNT");
                println!("{}", "-".repeat(54));
                for transaction in transactions.iter().rev() {
                    println!(
                        "{:<12} {:>10} {}",
                        transaction.created_at.format("%Y-%m-%d"),
                        format_eur(transaction.total_cents),
                        truncate(&transaction.description, 30)
                    );
                }
            }
        }

        BillingCommands::MarkBilled { id, account } => {
            let billing_id =
                Uuid::parse_str(&id).context("Invalid billing ID format (expected UUID)")?;
            if account.is_empty() {
                anyhow::bail!("Give at least one --account");
            }

            let mut ids = Vec::new();
            for key in &account {
                ids.push(resolve_account(service, key).await?.id);
            }

            let marked = service.mark_billed(billing_id, &ids).await?;
            println!("Marked {} transactions billed (batch {})", marked, billing_id);
        }
    }
    Ok(())
}

async fn run_sepa_command(service: &LedgerService, output: Option<&str>) -> Result<()> {
    use crate::io::Exporter;
    use std::fs::File;

    match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path))?;
            let exporter = Exporter::new(service);
            let count = exporter.export_sepa_csv(file).await?;
            eprintln!("Exported {} debits to {}", count, path);
        }
        None => {
            let debits = service.sepa_eligible_accounts().await?;
            if debits.is_empty() {
                println!("No accounts eligible for a debit run.");
            } else {
                println!(
                    "{:<24} {:<24} {:<16} {:>10}",
                    "ACCOUNT", "IBAN", "MANDATE", "AMOUNT"
                );
                println!("{}", "-".repeat(78));

                let mut total = 0;
                for debit in &debits {
                    println!(
                        "{:<24} {:<24} {:<16} {:>10}",
                        truncate(&debit.account.full_name(), 24),
                        debit.account.iban.as_deref().unwrap_or(""),
                        debit.account.mandate_reference.as_deref().unwrap_or(""),
                        format_eur(debit.debit_amount_cents)
                    );
                    total += debit.debit_amount_cents;
                }

                println!("{}", "-".repeat(78));
                println!("{:<66} {:>10}", "TOTAL", format_eur(total));
            }
        }
    }
    Ok(())
}

async fn run_dashboard_command(service: &LedgerService) -> Result<()> {
    let stats = service.dashboard_stats().await?;

    println!("Club overview\n");
    println!("Members:           {}", stats.member_count);
    println!("  with open tab:   {}", stats.members_with_debt);
    println!("Products for sale: {}", stats.available_products);
    println!("  units on shelf:  {}", stats.total_stock);
    println!("  low on stock:    {}", stats.low_stock_count);
    println!(
        "Unbilled revenue:  {}",
        format_eur(stats.unbilled_revenue_cents)
    );

    Ok(())
}

async fn run_settings_command(service: &LedgerService, cmd: SettingsCommands) -> Result<()> {
    match cmd {
        SettingsCommands::Get { key } => match service.get_setting(&key).await? {
            Some(value) => println!("{}", value),
            None => println!("(not set)"),
        },

        SettingsCommands::Set { key, value } => {
            service.set_setting(&key, &value).await?;
            println!("Set {} = {}", key, value);
        }

        SettingsCommands::List => {
            let settings = service.list_settings().await?;
            if settings.is_empty() {
                println!("No settings found.");
            } else {
                for (key, value) in settings {
                    println!("{} = {}", key, value);
                }
            }
        }
    }
    Ok(())
}

async fn run_export_command(
    service: &LedgerService,
    export_type: &str,
    output: Option<&str>,
) -> Result<()> {
    use crate::io::Exporter;
    use std::fs::File;
    use std::io::{stdout, Write};

    let exporter = Exporter::new(service);

    // Determine output writer
    let writer: Box<dyn Write> = match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path))?;
            Box::new(file)
        }
        None => Box::new(stdout()),
    };

    match export_type {
        "transactions" => {
            let count = exporter.export_transactions_csv(writer).await?;
            if output.is_some() {
                eprintln!("Exported {} transactions", count);
            }
        }
        "accounts" => {
            let count = exporter.export_accounts_csv(writer).await?;
            if output.is_some() {
                eprintln!("Exported {} accounts", count);
            }
        }
        "products" => {
            let count = exporter.export_products_csv(writer).await?;
            if output.is_some() {
                eprintln!("Exported {} products", count);
            }
        }
        "sepa" => {
            let count = exporter.export_sepa_csv(writer).await?;
            if output.is_some() {
                eprintln!("Exported {} debits", count);
            }
        }
        "full" => {
            let snapshot = exporter.export_full_json(writer).await?;
            if output.is_some() {
                eprintln!(
                    "Exported full database: {} accounts, {} products, {} transactions, {} stock movements, {} billing batches",
                    snapshot.accounts.len(),
                    snapshot.products.len(),
                    snapshot.transactions.len(),
                    snapshot.stock_movements.len(),
                    snapshot.billings.len()
                );
            }
        }
        _ => {
            anyhow::bail!(
                "Invalid export type '{}'. Valid types: transactions, accounts, products, sepa, full",
                export_type
            );
        }
    }

    Ok(())
}

async fn run_import_command(
    service: &LedgerService,
    import_type: &str,
    input: Option<&str>,
    dry_run: bool,
    skip_duplicates: bool,
    validate: bool,
) -> Result<()> {
    use crate::io::{ImportOptions, Importer};
    use std::fs::File;
    use std::io::{stdin, Read};

    let importer = Importer::new(service);

    // Determine input reader
    let reader: Box<dyn Read> = match input {
        Some(path) => {
            let file =
                File::open(path).with_context(|| format!("Failed to open input file: {}", path))?;
            Box::new(file)
        }
        None => Box::new(stdin()),
    };

    let options = ImportOptions {
        dry_run,
        skip_duplicates,
        validate_only: validate,
    };

    let result = match import_type {
        "accounts" => importer.import_accounts_csv(reader, options).await?,
        "products" => importer.import_products_csv(reader, options).await?,
        _ => {
            anyhow::bail!(
                "Invalid import type '{}'. Valid types: accounts, products",
                import_type
            );
        }
    };

    // Display results
    if validate || dry_run {
        println!("Validation successful");
    } else {
        println!("Import complete");
    }
    println!("  Imported: {}", result.imported);
    println!("  Skipped:  {}", result.skipped);
    println!("  Errors:   {}", result.errors.len());

    if !result.errors.is_empty() {
        println!("\nErrors:");
        for error in result.errors.iter().take(10) {
            println!(
                "  Line {}: {}",
                error.line,
                error
                    .field
                    .as_ref()
                    .map(|f| format!("{}: ", f))
                    .unwrap_or_default()
                    + &error.error
            );
        }
        if result.errors.len() > 10 {
            println!("  ... and {} more errors", result.errors.len() - 10);
        }
    }

    Ok(())
}

/// Look up an account by scanner barcode first, then by UUID.
async fn resolve_account(service: &LedgerService, key: &str) -> Result<Account> {
    if let Ok(account) = service.find_account_by_barcode(key).await {
        return Ok(account);
    }
    if let Ok(id) = Uuid::parse_str(key) {
        return Ok(service.get_account(id).await?);
    }
    anyhow::bail!("No account matching '{}'", key)
}

/// Look up a product by scanner barcode first, then by UUID.
async fn resolve_product(service: &LedgerService, key: &str) -> Result<Product> {
    if let Ok(product) = service.find_product_by_barcode(key).await {
        return Ok(product);
    }
    if let Ok(id) = Uuid::parse_str(key) {
        return Ok(service.get_product(id).await?);
    }
    anyhow::bail!("No product matching '{}'", key)
}

fn parse_payment_method(s: &str) -> Result<PaymentMethod> {
    PaymentMethod::from_str(s).ok_or_else(|| {
        anyhow::anyhow!(
            "Invalid payment method '{}'. Valid: balance-debit, voucher-card, voucher-refund, manual-booking, other",
            s
        )
    })
}

// Char-based so umlaut names don't split mid-character
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len - 3).collect();
        format!("{}...", cut)
    }
}

fn parse_date(date_str: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    use chrono::NaiveDate;

    // Parse YYYY-MM-DD format
    let naive_date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .context("Date must be in YYYY-MM-DD format")?;

    // Convert to UTC datetime at midnight
    let naive_datetime = naive_date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| anyhow::anyhow!("Invalid date"))?;

    Ok(chrono::DateTime::from_naive_utc_and_offset(
        naive_datetime,
        chrono::Utc,
    ))
}
