use pretty_assertions::assert_eq;
use url::Url;

use crate::gas_oracle::{GasOracleClient, GasOracleConfig, GasPrices};

fn client_for(server: &mockito::ServerGuard, max_gwei: f64) -> GasOracleClient {
    GasOracleClient::new(GasOracleConfig {
        url: Url::parse(&format!("{}/gas-price-oracle", server.url())).unwrap(),
        request_timeout_ms: 1_000,
        max_auto_gas_price_gwei: max_gwei,
    })
}

async fn serve_body(server: &mut mockito::ServerGuard, body: &str) -> mockito::Mock {
    server
        .mock("GET", "/gas-price-oracle")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body)
        .create_async()
        .await
}

#[tokio::test]
async fn well_formed_response_is_passed_through() {
    let mut server = mockito::Server::new_async().await;
    let mock = serve_body(&mut server, r#"{"slow": 2.5, "average": 4, "fast": 9.1}"#).await;

    let prices = client_for(&server, 200.0).get_auto_gas_prices().await;

    mock.assert_async().await;
    assert_eq!(prices, GasPrices { slow: 2.5, average: 4.0, fast: 9.1 });
}

#[tokio::test]
async fn malformed_fields_default_then_clamp() {
    let mut server = mockito::Server::new_async().await;
    serve_body(&mut server, r#"{"slow": "x", "average": 500000, "fast": 7}"#).await;

    let prices = client_for(&server, 100.0).get_auto_gas_prices().await;

    assert_eq!(prices, GasPrices { slow: 1.0, average: 100.0, fast: 7.0 });
}

#[tokio::test]
async fn tiers_below_one_gwei_are_raised() {
    let mut server = mockito::Server::new_async().await;
    serve_body(&mut server, r#"{"slow": 0.1, "average": 0, "fast": -3}"#).await;

    let prices = client_for(&server, 200.0).get_auto_gas_prices().await;

    assert_eq!(prices, GasPrices { slow: 1.0, average: 1.0, fast: 1.0 });
}

#[tokio::test]
async fn missing_fields_fall_back_per_field() {
    let mut server = mockito::Server::new_async().await;
    serve_body(&mut server, r#"{"fast": 42}"#).await;

    let prices = client_for(&server, 200.0).get_auto_gas_prices().await;

    let defaults = GasPrices::default();
    assert_eq!(prices, GasPrices { slow: defaults.slow, average: defaults.average, fast: 42.0 });
}

#[tokio::test]
async fn non_json_body_yields_defaults() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/gas-price-oracle")
        .with_status(200)
        .with_body("<html>rate limited</html>")
        .create_async()
        .await;

    let prices = client_for(&server, 200.0).get_auto_gas_prices().await;
    assert_eq!(prices, GasPrices::default());
}

#[tokio::test]
async fn unreachable_oracle_yields_defaults() {
    let client = GasOracleClient::new(GasOracleConfig {
        url: Url::parse("http://127.0.0.1:9/gas-price-oracle").unwrap(),
        request_timeout_ms: 200,
        max_auto_gas_price_gwei: 200.0,
    });

    let prices = client.get_auto_gas_prices().await;
    assert_eq!(prices, GasPrices::default());
}

#[tokio::test]
async fn server_error_yields_defaults() {
    let mut server = mockito::Server::new_async().await;
    server.mock("GET", "/gas-price-oracle").with_status(500).create_async().await;

    let prices = client_for(&server, 200.0).get_auto_gas_prices().await;
    assert_eq!(prices, GasPrices::default());
}
