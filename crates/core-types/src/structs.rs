use crate::enums::{InstrumentClass, Side};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A user's cash account. There is exactly one per owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: i64,
    /// The authenticated user that owns this wallet.
    pub owner_id: i64,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An open position of one symbol inside a wallet.
///
/// A holding row exists only while its quantity is strictly positive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub id: i64,
    pub wallet_id: i64,
    pub symbol: String,
    pub quantity: Decimal,
    /// Quantity-weighted mean purchase price (the cost basis).
    pub average_buy_price: Decimal,
    pub instrument_class: InstrumentClass,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The data needed to open a new holding on a first buy.
#[derive(Debug, Clone, PartialEq)]
pub struct NewHolding {
    pub wallet_id: i64,
    pub symbol: String,
    pub quantity: Decimal,
    pub average_buy_price: Decimal,
    pub instrument_class: InstrumentClass,
}

/// An immutable entry in a wallet's trade history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub wallet_id: i64,
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub price_per_unit: Decimal,
    /// `quantity × price_per_unit` at the ledger scale.
    pub total_amount: Decimal,
    /// Zero for buys; signed profit against cost basis for sells.
    pub realized_pnl: Decimal,
    pub created_at: DateTime<Utc>,
}

/// A transaction about to be appended; the store assigns id and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub wallet_id: i64,
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub price_per_unit: Decimal,
    pub total_amount: Decimal,
    pub realized_pnl: Decimal,
}
