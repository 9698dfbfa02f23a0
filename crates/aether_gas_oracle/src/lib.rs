pub mod gas_oracle;
#[cfg(test)]
mod gas_oracle_test;

pub use gas_oracle::{GasOracleClient, GasOracleConfig, GasPrices};
