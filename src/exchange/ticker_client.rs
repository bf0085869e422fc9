//! Public ticker price client (read-only, unsigned).

use anyhow::{Context, Result};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
struct TickerPrice {
    symbol: String,
    price: Decimal,
}

/// `BTC/USDT` -> `BTCUSDT`.
pub fn exchange_symbol(symbol: &str) -> String {
    symbol.replace('/', "").to_uppercase()
}

/// Client for the `/api/v3/ticker/price` endpoint.
pub struct TickerClient {
    client: Client,
    base_url: String,
}

impl TickerClient {
    /// Create with custom base URL and per-request timeout.
    pub fn with_base_url(base_url: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Last traded price for `BASE/QUOTE`.
    pub async fn get_price(&self, symbol: &str) -> Result<Decimal> {
        let url = format!(
            "{}/api/v3/ticker/price?symbol={}",
            self.base_url,
            exchange_symbol(symbol)
        );
        debug!(url = %url, "Fetching ticker price");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to fetch ticker price")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Ticker request failed: {} - {}", status, body);
        }

        let body = response
            .text()
            .await
            .context("Failed to read ticker response")?;
        parse_ticker(&body)
    }
}

fn parse_ticker(body: &str) -> Result<Decimal> {
    let ticker: TickerPrice =
        serde_json::from_str(body).context("Failed to parse ticker response")?;
    if ticker.price <= Decimal::ZERO {
        anyhow::bail!("Ticker {} returned non-positive price {}", ticker.symbol, ticker.price);
    }
    Ok(ticker.price)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_exchange_symbol() {
        assert_eq!(exchange_symbol("BTC/USDT"), "BTCUSDT");
        assert_eq!(exchange_symbol("eth/usdt"), "ETHUSDT");
    }

    #[test]
    fn test_parse_ticker() {
        let price = parse_ticker(r#"{"symbol":"BTCUSDT","price":"64123.45000000"}"#).unwrap();
        assert_eq!(price, dec!(64123.45));

        assert!(parse_ticker(r#"{"symbol":"BTCUSDT","price":"0"}"#).is_err());
        assert!(parse_ticker(r#"{"code":-1121,"msg":"Invalid symbol."}"#).is_err());
    }

    #[test]
    fn test_base_url_trimmed() {
        let client = TickerClient::with_base_url("http://localhost:9000/".to_string(), Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "http://localhost:9000");
    }
}
