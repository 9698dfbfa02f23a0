use aether_gas_oracle::GasPrices;
use pretty_assertions::assert_eq;

use crate::gas::{auto_gas_price_gwei, GasSetting};

const PRICES: GasPrices = GasPrices { slow: 2.0, average: 5.0, fast: 11.0 };

#[test]
fn named_tiers_select_their_field() {
    assert_eq!(auto_gas_price_gwei(&PRICES, &GasSetting::Slow), 2.0);
    assert_eq!(auto_gas_price_gwei(&PRICES, &GasSetting::Average), 5.0);
    assert_eq!(auto_gas_price_gwei(&PRICES, &GasSetting::Fast), 11.0);
}

#[test]
fn fixed_gwei_passes_through() {
    assert_eq!(auto_gas_price_gwei(&PRICES, &GasSetting::Gwei(3.75)), 3.75);
}

#[test]
fn non_finite_fixed_amount_falls_back_to_average() {
    assert_eq!(auto_gas_price_gwei(&PRICES, &GasSetting::Gwei(f64::NAN)), 5.0);
    assert_eq!(auto_gas_price_gwei(&PRICES, &GasSetting::Gwei(f64::INFINITY)), 5.0);
}

#[test]
fn settings_parse_from_strings() {
    assert_eq!("Slow".parse(), Ok(GasSetting::Slow));
    assert_eq!("Average".parse(), Ok(GasSetting::Average));
    assert_eq!("Fast".parse(), Ok(GasSetting::Fast));
    assert_eq!("7.5".parse(), Ok(GasSetting::Gwei(7.5)));
}

#[test]
fn garbage_settings_parse_as_average() {
    assert_eq!("Ludicrous".parse(), Ok(GasSetting::Average));
    assert_eq!("".parse(), Ok(GasSetting::Average));
    assert_eq!("NaN".parse(), Ok(GasSetting::Average));
}
