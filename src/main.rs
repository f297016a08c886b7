use anyhow::Context;
use clap::{Parser, Subcommand};
use comfy_table::{Cell, Table, presets::UTF8_FULL};
use database::{LedgerStore, PgLedgerStore, connect, run_migrations};
use executor::TradeEngine;
use price_oracle::HttpPriceOracle;
use rust_decimal::Decimal;
use std::sync::Arc;
use valuator::{HistoryPage, PortfolioReport, PortfolioValuator, TradeHistory};

/// The main entry point for the Stonks paper-trading ledger.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; everything can come from the environment.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = configuration::load_config().context("Failed to load configuration")?;
    // Keep the guard alive so the file writer flushes on exit.
    let _log_guard = configuration::init_tracing(&config.logging).context("Failed to initialise logging")?;

    let pool = connect(&config.database)
        .await
        .context("Failed to connect to the database")?;

    if let Commands::Migrate = cli.command {
        run_migrations(&pool).await.context("Failed to run database migrations")?;
        tracing::info!("Ledger schema is up to date.");
        println!("Migrations applied.");
        return Ok(());
    }

    let store = Arc::new(PgLedgerStore::new(
        pool,
        config.ledger.lock_timeout(),
        config.ledger.store_deadline(),
    ));
    let oracle = Arc::new(HttpPriceOracle::new(&config.oracle)?);

    match cli.command {
        Commands::Migrate => {}
        Commands::OpenWallet(args) => {
            let balance = args.balance.unwrap_or(config.ledger.initial_balance);
            let wallet = store.open_wallet(args.owner, balance).await?;
            println!(
                "Wallet {} for owner {} holds {}",
                wallet.id, wallet.owner_id, wallet.balance
            );
        }
        Commands::Buy(args) => {
            let engine = TradeEngine::from_config(store, oracle, &config);
            let receipt = engine.buy(args.owner, &args.symbol, &args.quantity).await?;
            println!(
                "Bought {} {} @ {} for {}. Position {} @ {}. Balance {}",
                receipt.filled_quantity,
                receipt.symbol,
                receipt.price,
                receipt.total_cost,
                receipt.quantity,
                receipt.average_price,
                receipt.balance
            );
        }
        Commands::Sell(args) => {
            let engine = TradeEngine::from_config(store, oracle, &config);
            let receipt = engine.sell(args.owner, &args.symbol, &args.quantity).await?;
            println!(
                "Sold {} {} @ {} for {} (P&L {}). Remaining {}. Balance {}",
                receipt.sold_quantity,
                receipt.symbol,
                receipt.sold_at,
                receipt.proceeds,
                receipt.realized_pnl,
                receipt.remaining_quantity,
                receipt.balance
            );
        }
        Commands::Portfolio(args) => {
            let valuator = PortfolioValuator::new(store, oracle, config.oracle.timeout());
            let report = valuator.value(args.owner).await?;
            print_portfolio(&report);
        }
        Commands::History(args) => {
            let history = TradeHistory::new(store, config.ledger.history_page_size);
            let page = history.page(args.owner, args.page).await?;
            print_history(&page);
        }
    }

    Ok(())
}

// ==============================================================================
// CLI Structure
// ==============================================================================

/// A paper-trading ledger for stocks and crypto.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply the ledger schema migrations.
    Migrate,
    /// Create a wallet for an owner (no-op if it already exists).
    OpenWallet(OpenWalletArgs),
    /// Buy at the current market price.
    Buy(OrderArgs),
    /// Sell at the current market price.
    Sell(OrderArgs),
    /// Show holdings marked to market.
    Portfolio(OwnerArgs),
    /// Show trade history, newest first.
    History(HistoryArgs),
}

#[derive(Parser)]
struct OpenWalletArgs {
    #[arg(long)]
    owner: i64,

    /// Starting cash; defaults to `ledger.initial_balance`.
    #[arg(long)]
    balance: Option<Decimal>,
}

#[derive(Parser)]
struct OrderArgs {
    #[arg(long)]
    owner: i64,

    /// The ticker, e.g. "AAPL" or "BTC".
    symbol: String,

    /// Quantity as a decimal with at most 8 fractional digits.
    quantity: String,
}

#[derive(Parser)]
struct OwnerArgs {
    #[arg(long)]
    owner: i64,
}

#[derive(Parser)]
struct HistoryArgs {
    #[arg(long)]
    owner: i64,

    #[arg(long, default_value_t = 1)]
    page: u32,
}

// ==============================================================================
// Output
// ==============================================================================

fn print_portfolio(report: &PortfolioReport) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Symbol",
        "Class",
        "Quantity",
        "Avg Price",
        "Price",
        "Value",
        "Unrealized P&L",
    ]);

    for position in &report.positions {
        table.add_row(vec![
            Cell::new(&position.symbol),
            Cell::new(position.instrument_class),
            Cell::new(position.quantity),
            Cell::new(position.average_buy_price),
            Cell::new(or_dash(position.current_price)),
            Cell::new(or_dash(position.market_value)),
            Cell::new(or_dash(position.unrealized_pnl)),
        ]);
    }
    println!("{table}");

    let mut summary = Table::new();
    summary.load_preset(UTF8_FULL);
    for (label, value) in [
        ("Cash", report.cash_balance),
        ("Holdings value", report.holdings_value),
        ("Total balance", report.total_balance),
        ("Total invested", report.total_invested),
        ("Realized P&L", report.realized_pnl),
        ("Unrealized P&L", report.unrealized_pnl),
        ("Today's P&L", report.today_pnl),
        ("Total return", report.total_return),
        ("P&L %", report.pnl_pct.round_dp(2)),
        ("Change %", report.percentage_change.round_dp(2)),
    ] {
        summary.add_row(vec![Cell::new(label), Cell::new(value)]);
    }
    println!("{summary}");

    if !report.unpriced_symbols.is_empty() {
        println!("No quote for: {}", report.unpriced_symbols.join(", "));
    }
}

fn print_history(page: &HistoryPage) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Time", "Side", "Symbol", "Quantity", "Price", "Total", "Realized P&L",
    ]);

    for tx in &page.transactions {
        table.add_row(vec![
            Cell::new(tx.created_at.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(tx.side),
            Cell::new(&tx.symbol),
            Cell::new(tx.quantity),
            Cell::new(tx.price_per_unit),
            Cell::new(tx.total_amount),
            Cell::new(tx.realized_pnl),
        ]);
    }
    println!("{table}");
    println!(
        "Page {}/{} | {} trades | {} winning ({}%) | realized P&L {} | volume {}",
        page.page,
        page.total_pages.max(1),
        page.total_trades,
        page.winning_trades,
        page.win_rate_pct,
        page.total_realized_pnl,
        page.total_volume
    );
}

fn or_dash(value: Option<Decimal>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}
