use crate::models::Candle;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

const MARKET_DATA_URL_SETTING: &str = "MARKET_DATA_URL";
const MARKET_DATA_API_KEY_SETTING: &str = "MARKET_DATA_API_KEY";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Supplier of historical OHLC candles. The wire returns them in arbitrary
/// order; consumers sort.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn get_historical_candles(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>>;
}

pub struct HttpMarketData {
    http: Client,
    base_url: String,
    headers: HeaderMap,
}

impl HttpMarketData {
    pub fn from_settings(settings: &HashMap<String, String>) -> Result<Self> {
        let base_url = settings
            .get(MARKET_DATA_URL_SETTING)
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| anyhow!("Missing required setting {}", MARKET_DATA_URL_SETTING))?;

        let mut headers = HeaderMap::new();
        if let Some(api_key) = settings
            .get(MARKET_DATA_API_KEY_SETTING)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
        {
            headers.insert(
                "X-API-KEY",
                HeaderValue::from_str(api_key).context("invalid market data API key")?,
            );
        }

        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to construct market data HTTP client")?;

        Ok(Self {
            http,
            base_url,
            headers,
        })
    }
}

#[derive(Debug, Deserialize)]
struct CandleRow {
    timestamp: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
}

#[async_trait]
impl MarketDataSource for HttpMarketData {
    async fn get_historical_candles(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let url = format!("{}/candles", self.base_url);
        let response = self
            .http
            .get(&url)
            .headers(self.headers.clone())
            .query(&[
                ("symbol", symbol.to_string()),
                ("start", start.to_rfc3339()),
                ("end", end.to_rfc3339()),
            ])
            .send()
            .await
            .with_context(|| format!("GET {} failed for {}", url, symbol))?
            .error_for_status()
            .with_context(|| format!("GET {} returned error for {}", url, symbol))?;

        let rows = response
            .json::<Vec<CandleRow>>()
            .await
            .context("failed to parse market data response")?;

        Ok(rows
            .into_iter()
            .map(|row| Candle {
                symbol: symbol.to_string(),
                timestamp: row.timestamp,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
            })
            .collect())
    }
}
