use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use dealer_inventory::{
    config::{self, AppConfig},
    db::{self, DbPool},
    entities::{product, stock_movement},
    events::{process_events, EventSender},
    services::{
        product_stock::StockReconciliation, stock_ledger::ChainVerification, InventoryServices,
        ServiceSettings,
    },
};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let context = AdminContext::initialize().await?;

    match cli.command {
        Commands::Migrate => {
            db::run_migrations(&context.db)
                .await
                .context("failed to run migrations")?;
            println!("Migrations applied");
        }
        Commands::Stock(args) => handle_stock(&context, args, cli.json).await?,
        Commands::History(args) => handle_history(&context, args, cli.json).await?,
        Commands::Verify(args) => handle_verify(&context, args, cli.json).await?,
        Commands::Reconcile(args) => handle_reconcile(&context, args, cli.json).await?,
        Commands::LowStock => handle_low_stock(&context, cli.json).await?,
        Commands::Health => handle_health(&context, cli.json).await?,
    }

    Ok(())
}

#[derive(Parser)]
#[command(
    name = "stock-admin",
    about = "Inspect and repair the inventory stock ledger",
    version
)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema migrations
    Migrate,
    /// Show the cached stock quantity of a product
    Stock(ProductArgs),
    /// List ledger movements of a product, newest first
    History(HistoryArgs),
    /// Walk a product's ledger and report the first broken link
    Verify(ProductArgs),
    /// Compare cached quantities with the ledger
    Reconcile(ReconcileArgs),
    /// List products at or below their minimum stock
    LowStock,
    /// Ping the database
    Health,
}

#[derive(Args)]
struct ProductArgs {
    #[arg(help = "Product id or product code")]
    product: String,
}

#[derive(Args)]
struct HistoryArgs {
    #[arg(help = "Product id or product code")]
    product: String,
    #[arg(long, default_value_t = 1, help = "Page number, starting at 1")]
    page: u64,
    #[arg(long, help = "Movements per page")]
    limit: Option<u64>,
}

#[derive(Args)]
struct ReconcileArgs {
    #[arg(long, help = "Only reconcile this product (id or code)")]
    product: Option<String>,
    #[arg(
        long,
        action = ArgAction::SetTrue,
        help = "Rewrite drifted cached quantities from the ledger"
    )]
    repair: bool,
}

struct AdminContext {
    db: Arc<DbPool>,
    services: InventoryServices,
}

impl AdminContext {
    async fn initialize() -> Result<Self> {
        let config = config::load_config().context("failed to load application config")?;
        config::init_tracing(config.log_level(), config.log_json);

        let db_pool = db::establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to database")?;
        if config.auto_migrate {
            db::run_migrations(&db_pool)
                .await
                .context("failed to run migrations")?;
        }
        let db = Arc::new(db_pool);

        let services = build_services(&config, db.clone());

        Ok(Self { db, services })
    }

    async fn resolve_product(&self, product: &str) -> Result<product::Model> {
        let found = match Uuid::parse_str(product) {
            Ok(id) => self.services.stock.get_product(id).await,
            Err(_) => self.services.stock.find_by_code(product).await,
        };
        found.with_context(|| format!("unknown product '{}'", product))
    }
}

fn build_services(config: &AppConfig, db: Arc<DbPool>) -> InventoryServices {
    let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity);
    tokio::spawn(process_events(event_rx));

    InventoryServices::new(
        db,
        Some(EventSender::new(event_tx)),
        ServiceSettings::from(config),
    )
}

#[derive(Serialize)]
struct StockSummary<'a> {
    product_id: Uuid,
    code: &'a str,
    name: &'a str,
    stock_quantity: i32,
    min_stock: i32,
    max_stock: Option<i32>,
}

async fn handle_stock(context: &AdminContext, args: ProductArgs, json: bool) -> Result<()> {
    let product = context.resolve_product(&args.product).await?;
    let summary = StockSummary {
        product_id: product.id,
        code: &product.code,
        name: &product.name,
        stock_quantity: product.stock_quantity,
        min_stock: product.min_stock,
        max_stock: product.max_stock,
    };

    if json {
        print_json(&summary)?;
    } else {
        println!(
            "{} ({}) • on hand {} • min {}{}",
            summary.code,
            summary.name,
            summary.stock_quantity,
            summary.min_stock,
            if product.is_below_minimum() { " • LOW" } else { "" }
        );
    }
    Ok(())
}

async fn handle_history(context: &AdminContext, args: HistoryArgs, json: bool) -> Result<()> {
    let product = context.resolve_product(&args.product).await?;
    let page = context
        .services
        .ledger
        .history(product.id, args.page, args.limit)
        .await
        .context("failed to load movement history")?;

    if json {
        print_json(&page)?;
        return Ok(());
    }

    println!(
        "{}: page {}/{} ({} movements)",
        product.code, page.page, page.total_pages, page.total_items
    );
    for movement in &page.movements {
        render_movement(movement);
    }
    Ok(())
}

async fn handle_verify(context: &AdminContext, args: ProductArgs, json: bool) -> Result<()> {
    let product = context.resolve_product(&args.product).await?;
    let verification = context
        .services
        .ledger
        .verify_chain(product.id)
        .await
        .context("failed to verify ledger")?;

    if json {
        print_json(&verification)?;
    } else {
        render_verification(&product, &verification);
    }

    if !verification.is_intact() {
        std::process::exit(2);
    }
    Ok(())
}

async fn handle_reconcile(context: &AdminContext, args: ReconcileArgs, json: bool) -> Result<()> {
    let stock = &context.services.stock;
    let reports = match args.product {
        Some(product) => {
            let product = context.resolve_product(&product).await?;
            let report = if args.repair {
                stock.reconcile(product.id).await
            } else {
                stock.check(product.id).await
            };
            vec![report.context("failed to reconcile product")?]
        }
        None => stock
            .reconcile_all(args.repair)
            .await
            .context("failed to reconcile products")?,
    };

    if json {
        print_json(&reports)?;
        return Ok(());
    }

    let drifted: Vec<&StockReconciliation> =
        reports.iter().filter(|r| !r.is_consistent() || r.repaired).collect();
    for report in &drifted {
        println!(
            "- {} • cached {} • ledger {} • drift {}{}",
            report.product_id,
            report.cached_quantity,
            report.ledger_quantity,
            report.drift(),
            if report.repaired { " • repaired" } else { "" }
        );
    }
    info!(checked = reports.len(), drifted = drifted.len(), "reconcile finished");
    println!("{} products checked, {} drifted", reports.len(), drifted.len());
    Ok(())
}

async fn handle_low_stock(context: &AdminContext, json: bool) -> Result<()> {
    let products = context
        .services
        .stock
        .below_minimum()
        .await
        .context("failed to list low stock")?;

    if json {
        print_json(&products)?;
        return Ok(());
    }

    if products.is_empty() {
        println!("No products below minimum stock");
    }
    for product in &products {
        println!(
            "- {} ({}) • on hand {} • min {}",
            product.code, product.name, product.stock_quantity, product.min_stock
        );
    }
    Ok(())
}

#[derive(Serialize)]
struct HealthReport {
    database: &'static str,
    latency_ms: u128,
}

async fn handle_health(context: &AdminContext, json: bool) -> Result<()> {
    let start = std::time::Instant::now();
    db::check_connection(&context.db)
        .await
        .context("database is unreachable")?;
    let report = HealthReport {
        database: "reachable",
        latency_ms: start.elapsed().as_millis(),
    };

    if json {
        print_json(&report)?;
    } else {
        println!("Database {} in {}ms", report.database, report.latency_ms);
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn render_movement(movement: &stock_movement::Model) {
    println!(
        "- #{} {} {} {} • {} → {} • {} by {}",
        movement.sequence,
        movement.created_at.format("%Y-%m-%d %H:%M"),
        movement.movement_type,
        movement.quantity_moved,
        movement.quantity_before,
        movement.quantity_after,
        movement.reference_type,
        movement.created_by
    );
}

fn render_verification(product: &product::Model, verification: &ChainVerification) {
    match &verification.first_break {
        None => println!(
            "{}: {} entries, chain intact, ledger quantity {} (cached {})",
            product.code, verification.entries, verification.final_quantity, product.stock_quantity
        ),
        Some(chain_break) => println!(
            "{}: chain broken after {} entries: {:?}",
            product.code, verification.entries, chain_break
        ),
    }
}
