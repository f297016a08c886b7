use serde::Deserialize;

// Binance sends prices as strings; Finnhub sends JSON numbers, which are kept
// as their literal text (serde_json "arbitrary_precision") and parsed into a
// Decimal without ever becoming an f64.

/// The response from `GET /api/v3/ticker/price`.
#[derive(Debug, Clone, Deserialize)]
pub struct BinanceTicker {
    pub symbol: String,
    pub price: String,
}

/// Represents an error response from the Binance API.
#[derive(Debug, Clone, Deserialize)]
pub struct BinanceErrorResponse {
    pub code: i64,
    pub msg: String,
}

/// The response from `GET /api/v1/quote`. Only the current price is used.
#[derive(Debug, Clone, Deserialize)]
pub struct FinnhubQuote {
    /// Current price. Finnhub answers unknown symbols with `0`.
    #[serde(rename = "c")]
    pub current: Option<serde_json::Number>,
    /// Previous close.
    #[serde(rename = "pc")]
    pub previous_close: Option<serde_json::Number>,
}

/// Binance error code for an unknown trading pair.
pub const BINANCE_INVALID_SYMBOL: i64 = -1121;
