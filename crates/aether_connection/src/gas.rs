use std::str::FromStr;

use aether_gas_oracle::GasPrices;
use serde::{Deserialize, Serialize};

/// The gas price policy applied to auto-priced transactions: one of the
/// oracle tiers, or a fixed gwei amount.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum GasSetting {
    Slow,
    Average,
    Fast,
    Gwei(f64),
}

impl FromStr for GasSetting {
    type Err = std::convert::Infallible;

    /// Unrecognized, non-numeric settings fall back to [`GasSetting::Average`].
    fn from_str(setting: &str) -> Result<Self, Self::Err> {
        Ok(match setting {
            "Slow" => Self::Slow,
            "Average" => Self::Average,
            "Fast" => Self::Fast,
            other => match other.parse::<f64>() {
                Ok(gwei) if gwei.is_finite() => Self::Gwei(gwei),
                _ => Self::Average,
            },
        })
    }
}

/// Resolves a gas setting against the current oracle prices, in gwei.
/// Non-finite fixed amounts resolve to the average tier.
pub fn auto_gas_price_gwei(prices: &GasPrices, setting: &GasSetting) -> f64 {
    match setting {
        GasSetting::Slow => prices.slow,
        GasSetting::Average => prices.average,
        GasSetting::Fast => prices.fast,
        GasSetting::Gwei(gwei) if gwei.is_finite() => *gwei,
        GasSetting::Gwei(_) => prices.average,
    }
}
