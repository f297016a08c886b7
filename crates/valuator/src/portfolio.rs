use crate::engine::ValuationEngine;
use crate::error::ValuatorError;
use crate::report::{HistoryPage, PortfolioReport};
use chrono::Utc;
use core_types::Holding;
use database::LedgerReader;
use futures::future::join_all;
use price_oracle::PriceOracle;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Values a wallet from committed ledger state and live quotes.
///
/// Quotes are requested concurrently, one per holding. A holding whose quote
/// fails or times out is reported as unpriced; it never fails the report.
pub struct PortfolioValuator {
    reader: Arc<dyn LedgerReader>,
    oracle: Arc<dyn PriceOracle>,
    oracle_timeout: Duration,
    engine: ValuationEngine,
}

impl PortfolioValuator {
    pub fn new(reader: Arc<dyn LedgerReader>, oracle: Arc<dyn PriceOracle>, oracle_timeout: Duration) -> Self {
        Self {
            reader,
            oracle,
            oracle_timeout,
            engine: ValuationEngine::new(),
        }
    }

    pub async fn value(&self, owner_id: i64) -> Result<PortfolioReport, ValuatorError> {
        let wallet = self
            .reader
            .find_wallet(owner_id)
            .await?
            .ok_or(ValuatorError::WalletNotFound(owner_id))?;
        let holdings = self.reader.holdings(wallet.id).await?;
        let transactions = self.reader.transactions(wallet.id).await?;

        let prices = self.fetch_prices(&holdings).await;
        let report = self
            .engine
            .calculate(&wallet, &holdings, &transactions, &prices, Utc::now().date_naive());

        tracing::info!(
            owner_id,
            total_balance = %report.total_balance,
            positions = report.positions.len(),
            unpriced = report.unpriced_symbols.len(),
            "Portfolio valued."
        );
        Ok(report)
    }

    async fn fetch_prices(&self, holdings: &[Holding]) -> HashMap<String, Decimal> {
        let quotes = holdings.iter().map(|holding| async move {
            let requested = self.oracle.get_price(&holding.symbol, holding.instrument_class);
            let quote = tokio::time::timeout(self.oracle_timeout, requested).await;
            (holding, quote)
        });

        join_all(quotes)
            .await
            .into_iter()
            .filter_map(|(holding, quote)| match quote {
                Ok(Ok(price)) => Some((holding.symbol.clone(), price)),
                Ok(Err(e)) => {
                    tracing::warn!(symbol = %holding.symbol, error = %e, "Skipping valuation of holding.");
                    None
                }
                Err(_) => {
                    tracing::warn!(symbol = %holding.symbol, "Quote timed out; skipping valuation of holding.");
                    None
                }
            })
            .collect()
    }
}

/// Paged access to a wallet's trade history.
pub struct TradeHistory {
    reader: Arc<dyn LedgerReader>,
    page_size: u32,
}

impl TradeHistory {
    pub fn new(reader: Arc<dyn LedgerReader>, page_size: u32) -> Self {
        Self {
            reader,
            page_size: page_size.max(1),
        }
    }

    /// Returns page `page` (1-based; anything lower reads page 1), newest trades first.
    pub async fn page(&self, owner_id: i64, page: u32) -> Result<HistoryPage, ValuatorError> {
        let page = page.max(1);
        let wallet = self
            .reader
            .find_wallet(owner_id)
            .await?
            .ok_or(ValuatorError::WalletNotFound(owner_id))?;

        let limit = i64::from(self.page_size);
        let offset = i64::from(page - 1) * limit;
        let transactions = self.reader.transactions_page(wallet.id, limit, offset).await?;
        let stats = self.reader.trade_stats(wallet.id).await?;

        Ok(HistoryPage::new(page, self.page_size, transactions, stats))
    }
}
