use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;
use validator::Validate;

pub const MAX_AUTO_GAS_PRICE_GWEI: f64 = 200.0;
const MIN_AUTO_GAS_PRICE_GWEI: f64 = 1.0;
const DEFAULT_ORACLE_URL: &str = "https://blockscout.com/xdai/mainnet/api/v1/gas-price-oracle";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_SLOW_GWEI: f64 = 1.0;
const DEFAULT_AVERAGE_GWEI: f64 = 5.0;
const DEFAULT_FAST_GWEI: f64 = 10.0;

/// Gas price tiers in gwei.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct GasPrices {
    pub slow: f64,
    pub average: f64,
    pub fast: f64,
}

impl Default for GasPrices {
    fn default() -> Self {
        Self { slow: DEFAULT_SLOW_GWEI, average: DEFAULT_AVERAGE_GWEI, fast: DEFAULT_FAST_GWEI }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate, PartialEq)]
pub struct GasOracleConfig {
    pub url: Url,
    #[validate(range(min = 1))]
    pub request_timeout_ms: u64,
    #[validate(range(min = 1.0))]
    pub max_auto_gas_price_gwei: f64,
}

impl Default for GasOracleConfig {
    fn default() -> Self {
        Self {
            url: Url::parse(DEFAULT_ORACLE_URL).expect("Default oracle URL should parse."),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            max_auto_gas_price_gwei: MAX_AUTO_GAS_PRICE_GWEI,
        }
    }
}

/// Fetches gas price tiers from an HTTP oracle.
///
/// The oracle is advisory: any transport or parse failure, and any missing or
/// non-numeric field, degrades to the built-in defaults rather than an error.
/// All returned tiers are clamped to `[1, max_auto_gas_price_gwei]`.
pub struct GasOracleClient {
    client: reqwest::Client,
    config: GasOracleConfig,
}

impl GasOracleClient {
    pub fn new(config: GasOracleConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .expect("Building the oracle HTTP client should succeed.");
        Self { client, config }
    }

    /// Never fails; see the type-level docs for the degradation policy.
    pub async fn get_auto_gas_prices(&self) -> GasPrices {
        let raw = match self.fetch().await {
            Ok(raw) => raw,
            Err(err) => {
                debug!("Gas oracle fetch from {} failed: {err}. Using defaults.", self.config.url);
                Value::Null
            }
        };
        self.sanitize(&raw)
    }

    async fn fetch(&self) -> Result<Value, reqwest::Error> {
        self.client.get(self.config.url.clone()).send().await?.json().await
    }

    fn sanitize(&self, raw: &Value) -> GasPrices {
        let defaults = GasPrices::default();
        GasPrices {
            slow: self.sanitize_tier(raw.get("slow"), defaults.slow),
            average: self.sanitize_tier(raw.get("average"), defaults.average),
            fast: self.sanitize_tier(raw.get("fast"), defaults.fast),
        }
    }

    fn sanitize_tier(&self, tier: Option<&Value>, default: f64) -> f64 {
        let value = tier.and_then(Value::as_f64).unwrap_or(default);
        value.clamp(MIN_AUTO_GAS_PRICE_GWEI, self.config.max_auto_gas_price_gwei)
    }
}
