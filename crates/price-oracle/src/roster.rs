use core_types::InstrumentClass;
use std::collections::HashSet;

/// Decides whether a symbol is an equity or a crypto asset.
///
/// Equities are an explicit list; any other symbol is treated as crypto and
/// quoted against the configured stablecoin.
#[derive(Debug, Clone, Default)]
pub struct InstrumentRoster {
    stocks: HashSet<String>,
}

impl InstrumentRoster {
    pub fn new<I, S>(stock_symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            stocks: stock_symbols
                .into_iter()
                .map(|s| s.as_ref().trim().to_ascii_uppercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    /// Expects an already normalised (upper-case) symbol.
    pub fn classify(&self, symbol: &str) -> InstrumentClass {
        if self.stocks.contains(symbol) {
            InstrumentClass::Stock
        } else {
            InstrumentClass::Crypto
        }
    }
}
