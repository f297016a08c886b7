use crate::error::OracleError;
use crate::responses::{BINANCE_INVALID_SYMBOL, BinanceErrorResponse, BinanceTicker, FinnhubQuote};
use configuration::OracleConfig;
use core_types::money::normalize;
use core_types::{InstrumentClass, LEDGER_LIMIT};
use rust_decimal::Decimal;
use std::str::FromStr;

/// Where quotes for one instrument class come from.
///
/// Crypto and equity quotes are variants of this one capability, picked once
/// per order by [`InstrumentClass`].
#[derive(Debug, Clone)]
pub enum PriceSource {
    /// Binance spot ticker, quoting `{SYMBOL}{quote_asset}`.
    Binance { base_url: String, quote_asset: String },
    /// Finnhub equity quote.
    Finnhub { base_url: String, api_key: String },
}

impl PriceSource {
    /// The configured source for the given instrument class.
    pub fn for_class(class: InstrumentClass, config: &OracleConfig) -> Self {
        match class {
            InstrumentClass::Crypto => PriceSource::Binance {
                base_url: config.binance_base_url.trim_end_matches('/').to_string(),
                quote_asset: config.quote_asset.trim().to_ascii_uppercase(),
            },
            InstrumentClass::Stock => PriceSource::Finnhub {
                base_url: config.finnhub_base_url.trim_end_matches('/').to_string(),
                api_key: config.finnhub_api_key.clone(),
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PriceSource::Binance { .. } => "binance",
            PriceSource::Finnhub { .. } => "finnhub",
        }
    }

    /// Requests the current price of `symbol` from this source.
    pub async fn fetch(&self, client: &reqwest::Client, symbol: &str) -> Result<Decimal, OracleError> {
        match self {
            PriceSource::Binance { base_url, quote_asset } => {
                let url = format!("{}/api/v3/ticker/price", base_url);
                let pair = format!("{}{}", symbol, quote_asset);
                let response = client
                    .get(&url)
                    .query(&[("symbol", pair.as_str())])
                    .send()
                    .await?;
                let status = response.status().as_u16();
                let text = response.text().await?;
                parse_binance(symbol, status, &text)
            }
            PriceSource::Finnhub { base_url, api_key } => {
                if api_key.is_empty() {
                    return Err(OracleError::MarketUnavailable(
                        "no Finnhub API key configured".to_string(),
                    ));
                }
                let url = format!("{}/api/v1/quote", base_url);
                let response = client
                    .get(&url)
                    .query(&[("symbol", symbol), ("token", api_key.as_str())])
                    .send()
                    .await?;
                let status = response.status().as_u16();
                let text = response.text().await?;
                parse_finnhub(symbol, status, &text)
            }
        }
    }
}

/// Accepts a raw quote only if it is strictly positive and fits a ledger column.
pub fn validate_quote(symbol: &str, raw: Decimal) -> Result<Decimal, OracleError> {
    let price = normalize(raw);
    if price <= Decimal::ZERO {
        return Err(OracleError::InvalidPrice(format!("{symbol} quoted at {raw}")));
    }
    if price >= LEDGER_LIMIT {
        return Err(OracleError::InvalidPrice(format!("{symbol} quoted out of range at {raw}")));
    }
    Ok(price)
}

pub(crate) fn parse_binance(symbol: &str, status: u16, body: &str) -> Result<Decimal, OracleError> {
    if (200..300).contains(&status) {
        let ticker: BinanceTicker = serde_json::from_str(body)
            .map_err(|e| OracleError::InvalidPrice(format!("malformed ticker for {symbol}: {e}")))?;
        let raw = Decimal::from_str(ticker.price.trim()).map_err(|_| {
            OracleError::InvalidPrice(format!("{} is not a decimal price", ticker.price))
        })?;
        return validate_quote(symbol, raw);
    }

    match serde_json::from_str::<BinanceErrorResponse>(body) {
        Ok(error) if error.code == BINANCE_INVALID_SYMBOL => {
            Err(OracleError::InvalidSymbol(symbol.to_string()))
        }
        Ok(error) => Err(OracleError::MarketUnavailable(format!(
            "binance error {}: {}",
            error.code, error.msg
        ))),
        Err(_) => Err(OracleError::MarketUnavailable(format!(
            "binance answered HTTP {status}"
        ))),
    }
}

pub(crate) fn parse_finnhub(symbol: &str, status: u16, body: &str) -> Result<Decimal, OracleError> {
    if !(200..300).contains(&status) {
        return Err(OracleError::MarketUnavailable(format!(
            "finnhub answered HTTP {status}"
        )));
    }
    let quote: FinnhubQuote = serde_json::from_str(body)
        .map_err(|e| OracleError::InvalidPrice(format!("malformed quote for {symbol}: {e}")))?;

    let current = quote.current.as_ref().map(number_to_decimal).transpose()?;
    let previous = quote.previous_close.as_ref().map(number_to_decimal).transpose()?;

    match current {
        // An all-zero quote is how Finnhub reports a symbol it does not list.
        Some(c) if c.is_zero() && previous.is_none_or(|pc| pc.is_zero()) => {
            Err(OracleError::InvalidSymbol(symbol.to_string()))
        }
        Some(c) => validate_quote(symbol, c),
        None => Err(OracleError::InvalidSymbol(symbol.to_string())),
    }
}

fn number_to_decimal(number: &serde_json::Number) -> Result<Decimal, OracleError> {
    let text = number.to_string();
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|_| OracleError::InvalidPrice(format!("{text} is not a decimal price")))
}
