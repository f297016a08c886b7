use core_types::{InstrumentClass, Transaction};
use database::TradeStats;
use rust_decimal::Decimal;
use serde::Serialize;

/// One open holding marked to market.
///
/// The price-dependent fields are `None` when no quote could be obtained.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionValuation {
    pub symbol: String,
    pub instrument_class: InstrumentClass,
    pub quantity: Decimal,
    pub average_buy_price: Decimal,
    /// `quantity × average_buy_price`.
    pub cost_basis: Decimal,
    pub current_price: Option<Decimal>,
    pub market_value: Option<Decimal>,
    pub unrealized_pnl: Option<Decimal>,
}

/// A snapshot of a wallet's value.
///
/// Holdings without a quote are listed in `unpriced_symbols` and contribute
/// nothing to `holdings_value` or `unrealized_pnl`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioReport {
    pub owner_id: i64,
    pub cash_balance: Decimal,
    /// Σ quantity × current price over priced holdings.
    pub holdings_value: Decimal,
    /// Cash plus holdings value.
    pub total_balance: Decimal,
    /// Σ total amount of every buy.
    pub total_invested: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    /// Realized plus unrealized.
    pub total_return: Decimal,
    /// `total_return / total_invested × 100`; zero when nothing was ever bought.
    pub pnl_pct: Decimal,
    /// `(total_balance − total_invested) / total_invested × 100`; zero when
    /// nothing was ever bought.
    pub percentage_change: Decimal,
    /// Realized P&L of sells booked on the reporting day (UTC).
    pub today_pnl: Decimal,
    pub positions: Vec<PositionValuation>,
    pub unpriced_symbols: Vec<String>,
}

/// One page of trade history, newest first, with stats over the whole history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryPage {
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u32,
    pub transactions: Vec<Transaction>,
    pub total_trades: i64,
    pub total_realized_pnl: Decimal,
    pub winning_trades: i64,
    /// `winning_trades / total_trades × 100`; zero with no trades.
    pub win_rate_pct: Decimal,
    pub total_volume: Decimal,
}

impl HistoryPage {
    pub(crate) fn new(page: u32, page_size: u32, transactions: Vec<Transaction>, stats: TradeStats) -> Self {
        let win_rate_pct = if stats.total_trades > 0 {
            (Decimal::from(stats.winning_trades) / Decimal::from(stats.total_trades) * Decimal::ONE_HUNDRED).round_dp(2)
        } else {
            Decimal::ZERO
        };
        let total_pages = u32::try_from((stats.total_trades.max(0) as u64).div_ceil(u64::from(page_size.max(1))))
            .unwrap_or(u32::MAX);

        Self {
            page,
            page_size,
            total_pages,
            transactions,
            total_trades: stats.total_trades,
            total_realized_pnl: stats.total_realized_pnl,
            winning_trades: stats.winning_trades,
            win_rate_pct,
            total_volume: stats.total_volume,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn win_rate_and_page_count() {
        let stats = TradeStats {
            total_trades: 3,
            total_realized_pnl: dec!(12),
            winning_trades: 1,
            total_volume: dec!(300),
        };
        let page = HistoryPage::new(1, 2, Vec::new(), stats);
        assert_eq!(page.win_rate_pct, dec!(33.33));
        assert_eq!(page.total_pages, 2);
    }

    #[test]
    fn empty_history_has_zero_win_rate() {
        let page = HistoryPage::new(1, 10, Vec::new(), TradeStats::default());
        assert_eq!(page.win_rate_pct, Decimal::ZERO);
        assert_eq!(page.total_pages, 0);
    }
}
