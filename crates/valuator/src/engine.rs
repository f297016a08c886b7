use crate::report::{PortfolioReport, PositionValuation};
use chrono::NaiveDate;
use core_types::money::normalize;
use core_types::{Holding, Side, Transaction, Wallet};
use rust_decimal::Decimal;
use std::collections::HashMap;

/// A stateless calculator that marks a wallet to market.
#[derive(Debug, Default)]
pub struct ValuationEngine {}

impl ValuationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the report for one wallet.
    ///
    /// # Arguments
    ///
    /// * `wallet` - The wallet whose cash balance is reported.
    /// * `holdings` - Its open holdings.
    /// * `transactions` - Its full trade history.
    /// * `prices` - Current prices by symbol; holdings missing from it are reported as unpriced.
    /// * `today` - The UTC day whose realized P&L is reported as `today_pnl`.
    pub fn calculate(
        &self,
        wallet: &Wallet,
        holdings: &[Holding],
        transactions: &[Transaction],
        prices: &HashMap<String, Decimal>,
        today: NaiveDate,
    ) -> PortfolioReport {
        let positions: Vec<PositionValuation> = holdings
            .iter()
            .map(|holding| value_position(holding, prices.get(&holding.symbol).copied()))
            .collect();

        let holdings_value = normalize(positions.iter().filter_map(|p| p.market_value).sum());
        let unrealized_pnl = normalize(positions.iter().filter_map(|p| p.unrealized_pnl).sum());
        let unpriced_symbols = positions
            .iter()
            .filter(|p| p.current_price.is_none())
            .map(|p| p.symbol.clone())
            .collect();

        let (total_invested, realized_pnl, today_pnl) = self.summarize_history(transactions, today);

        let total_balance = normalize(wallet.balance + holdings_value);
        let total_return = normalize(realized_pnl + unrealized_pnl);
        let pnl_pct = percent_of(total_return, total_invested);
        let percentage_change = percent_of(total_balance - total_invested, total_invested);

        PortfolioReport {
            owner_id: wallet.owner_id,
            cash_balance: wallet.balance,
            holdings_value,
            total_balance,
            total_invested,
            realized_pnl,
            unrealized_pnl,
            total_return,
            pnl_pct,
            percentage_change,
            today_pnl,
            positions,
            unpriced_symbols,
        }
    }

    /// Total bought, total realized, and realized on `today`.
    fn summarize_history(&self, transactions: &[Transaction], today: NaiveDate) -> (Decimal, Decimal, Decimal) {
        let mut invested = Decimal::ZERO;
        let mut realized = Decimal::ZERO;
        let mut today_pnl = Decimal::ZERO;

        for tx in transactions {
            if tx.side == Side::Buy {
                invested += tx.total_amount;
            }
            realized += tx.realized_pnl;
            if tx.created_at.date_naive() == today {
                today_pnl += tx.realized_pnl;
            }
        }

        (normalize(invested), normalize(realized), normalize(today_pnl))
    }
}

fn value_position(holding: &Holding, price: Option<Decimal>) -> PositionValuation {
    PositionValuation {
        symbol: holding.symbol.clone(),
        instrument_class: holding.instrument_class,
        quantity: holding.quantity,
        average_buy_price: holding.average_buy_price,
        cost_basis: normalize(holding.quantity * holding.average_buy_price),
        current_price: price,
        market_value: price.map(|p| normalize(holding.quantity * p)),
        unrealized_pnl: price.map(|p| normalize(holding.quantity * (p - holding.average_buy_price))),
    }
}

/// `amount / base × 100`, or zero when `base` is not positive.
fn percent_of(amount: Decimal, base: Decimal) -> Decimal {
    if base > Decimal::ZERO {
        normalize(amount / base * Decimal::ONE_HUNDRED)
    } else {
        normalize(Decimal::ZERO)
    }
}
