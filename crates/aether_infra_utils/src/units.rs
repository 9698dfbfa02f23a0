use alloy_primitives::U256;

const WEI_PER_GWEI: f64 = 1e9;

/// Converts a gwei amount to wei, rounding to the nearest wei. Non-finite and
/// non-positive inputs map to zero.
pub fn gwei_to_wei(gwei: f64) -> U256 {
    if !gwei.is_finite() || gwei <= 0.0 {
        return U256::ZERO;
    }
    U256::from((gwei * WEI_PER_GWEI).round() as u128)
}

/// Converts a wei amount to gwei. Lossy for amounts beyond f64 precision;
/// saturates at `u128::MAX` wei.
pub fn wei_to_gwei(wei: U256) -> f64 {
    let wei: u128 = wei.try_into().unwrap_or(u128::MAX);
    (wei as f64) / WEI_PER_GWEI
}
