use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The direction of a ledger transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// The text stored in the `type` column of the transactions table.
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BUY" => Ok(Side::Buy),
            "SELL" => Ok(Side::Sell),
            other => Err(CoreError::InvalidInput("side".to_string(), other.to_string())),
        }
    }
}

/// Which market an instrument trades on. Selects the price source for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstrumentClass {
    Stock,
    Crypto,
}

impl InstrumentClass {
    /// The text stored in the `type` column of the holdings table.
    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentClass::Stock => "STOCK",
            InstrumentClass::Crypto => "CRYPTO",
        }
    }
}

impl fmt::Display for InstrumentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstrumentClass {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STOCK" => Ok(InstrumentClass::Stock),
            "CRYPTO" => Ok(InstrumentClass::Crypto),
            other => Err(CoreError::InvalidInput(
                "instrument class".to_string(),
                other.to_string(),
            )),
        }
    }
}
