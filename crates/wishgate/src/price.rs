use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

use crate::config::OracleConfig;

#[derive(Debug, thiserror::Error)]
pub enum PriceError {
    #[error("price feed request failed")]
    Transport(#[from] reqwest::Error),
    #[error("price feed returned HTTP {0}")]
    Status(u16),
    #[error("price feed returned no usable price")]
    Malformed,
}

/// SOL/USD price source. No caching: every strict call is a fresh network
/// round trip, so one admission flow must fetch once and reuse the value.
pub enum PriceSource {
    CoinGecko(CoinGeckoFeed),
    Fixed(f64),
}

impl PriceSource {
    pub fn from_config(cfg: &OracleConfig) -> Result<Self> {
        Ok(Self::CoinGecko(CoinGeckoFeed::new(cfg)?))
    }

    /// Strict variant for admission paths: any upstream failure or
    /// non-positive price is an error, never a silent substitute.
    pub async fn usd_per_sol(&self) -> Result<f64, PriceError> {
        match self {
            Self::CoinGecko(feed) => feed.fetch().await,
            Self::Fixed(price) => Ok(*price),
        }
    }

    /// Fallback variant for display-only estimates. Must never feed the
    /// amount that gets validated on-chain.
    pub async fn usd_per_sol_or_fallback(&self) -> f64 {
        match self {
            Self::CoinGecko(feed) => match feed.fetch().await {
                Ok(price) => price,
                Err(err) => {
                    warn!(error = %err, fallback_usd = feed.fallback_usd, "price feed failed; using fallback estimate");
                    feed.fallback_usd
                }
            },
            Self::Fixed(price) => *price,
        }
    }
}

pub struct CoinGeckoFeed {
    http: reqwest::Client,
    url: String,
    fallback_usd: f64,
}

impl CoinGeckoFeed {
    pub fn new(cfg: &OracleConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.request_timeout_ms))
            .build()
            .context("failed to build price feed HTTP client")?;
        Ok(Self {
            http,
            url: cfg.price_url.clone(),
            fallback_usd: cfg.fallback_price_usd,
        })
    }

    async fn fetch(&self) -> Result<f64, PriceError> {
        let response = self.http.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(PriceError::Status(response.status().as_u16()));
        }
        let quote: GeckoQuote = response.json().await?;
        quote
            .solana
            .and_then(|q| q.usd)
            .filter(|price| *price > 0.0)
            .ok_or(PriceError::Malformed)
    }
}

// Simple-price shape: {"solana": {"usd": 142.35}}
#[derive(Debug, Deserialize)]
struct GeckoQuote {
    solana: Option<SolUsd>,
}

#[derive(Debug, Deserialize)]
struct SolUsd {
    usd: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_shape_parses() {
        let quote: GeckoQuote = serde_json::from_str(r#"{"solana":{"usd":142.35}}"#).unwrap();
        assert_eq!(quote.solana.and_then(|q| q.usd), Some(142.35));
    }

    #[test]
    fn missing_price_is_none() {
        let quote: GeckoQuote = serde_json::from_str(r#"{"solana":{}}"#).unwrap();
        assert_eq!(quote.solana.and_then(|q| q.usd), None);

        let quote: GeckoQuote = serde_json::from_str(r#"{}"#).unwrap();
        assert!(quote.solana.is_none());
    }

    #[tokio::test]
    async fn fixed_source_never_fails() {
        let source = PriceSource::Fixed(100.0);
        assert_eq!(source.usd_per_sol().await.unwrap(), 100.0);
        assert_eq!(source.usd_per_sol_or_fallback().await, 100.0);
    }

    #[tokio::test]
    async fn unreachable_feed_falls_back_for_estimates_only() {
        let cfg = OracleConfig {
            price_url: "http://127.0.0.1:9/price".to_string(),
            request_timeout_ms: 250,
            fallback_price_usd: 100.0,
        };
        let source = PriceSource::from_config(&cfg).unwrap();
        assert!(source.usd_per_sol().await.is_err());
        assert_eq!(source.usd_per_sol_or_fallback().await, 100.0);
    }
}
