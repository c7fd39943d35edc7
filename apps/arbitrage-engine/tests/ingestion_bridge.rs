//! Ingestion Bridge Integration Tests
//!
//! Runs the bridge against the synthetic connector.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use arbitrage_engine::{
    ExchangeConnector, IngestionBridge, IngestionError, Normalizer, NormalizerConfig,
    NormalizerService, QuoteStream, SyntheticConfig, SyntheticConnector,
};

fn synthetic(exchange: &str) -> Arc<SyntheticConnector> {
    Arc::new(SyntheticConnector::new(
        exchange,
        SyntheticConfig {
            tick_interval: Duration::from_millis(5),
            seed: Some(42),
            ..Default::default()
        },
    ))
}

fn bridge(cancel: &CancellationToken) -> IngestionBridge {
    let (normalizer, _) = NormalizerService::spawn(
        Normalizer::new(NormalizerConfig::default()),
        64,
        cancel.clone(),
    );
    IngestionBridge::new(normalizer, 64)
}

async fn first_error(stream: &mut QuoteStream) -> IngestionError {
    timeout(Duration::from_secs(5), async {
        loop {
            match stream.next().await {
                Some(Ok(_)) => {}
                Some(Err(error)) => return error,
                None => panic!("stream ended without an error"),
            }
        }
    })
    .await
    .expect("no error within timeout")
}

#[tokio::test]
async fn streams_normalized_quotes_for_one_symbol() {
    let cancel = CancellationToken::new();
    let connector = synthetic("Binance");
    let mut stream = bridge(&cancel).open(connector.clone() as Arc<dyn ExchangeConnector>, "eth-btc");
    let feed = connector.start();

    for _ in 0..5 {
        let quote = timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("no quote within timeout")
            .unwrap()
            .unwrap();
        assert_eq!(quote.exchange, "binance");
        assert_eq!(quote.symbol, "ETH-BTC");
        assert!(quote.bid < quote.ask);
    }
    assert_eq!(connector.subscriptions(), ["ETH-BTC"]);

    drop(stream);
    connector.stop();
    feed.await.unwrap();
}

#[tokio::test]
async fn monotonic_times_increase_per_stream() {
    let cancel = CancellationToken::new();
    let connector = synthetic("kraken");
    let mut stream = bridge(&cancel).open(connector.clone() as Arc<dyn ExchangeConnector>, "BTC-USD");
    let feed = connector.start();

    let mut last = Duration::ZERO;
    for _ in 0..10 {
        let quote = timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(quote.monotonic_time > last);
        last = quote.monotonic_time;
    }

    connector.stop();
    feed.await.unwrap();
}

#[tokio::test]
async fn simulated_disconnect_ends_the_stream_with_connection_lost() {
    let cancel = CancellationToken::new();
    let connector = synthetic("coinbase");
    let mut stream = bridge(&cancel).open(connector.clone() as Arc<dyn ExchangeConnector>, "SOL-USD");
    let feed = connector.start();

    timeout(Duration::from_secs(5), stream.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    connector.simulate_disconnect("maintenance");

    let error = first_error(&mut stream).await;
    assert_eq!(
        error,
        IngestionError::ConnectionLost {
            exchange: "coinbase".to_string(),
            symbol: "SOL-USD".to_string(),
            reason: "maintenance".to_string(),
        }
    );
    assert!(stream.next().await.is_none());

    connector.stop();
    feed.await.unwrap();
}

#[tokio::test]
async fn unknown_market_fails_the_subscription() {
    let cancel = CancellationToken::new();
    let connector = synthetic("kraken");
    let mut stream = bridge(&cancel).open(connector as Arc<dyn ExchangeConnector>, "FOO-USD");

    let error = first_error(&mut stream).await;
    assert_eq!(error.kind(), "subscription_failed");
    assert_eq!(error.symbol(), "FOO-USD");
}

#[tokio::test]
async fn stopped_connector_reports_connection_lost() {
    let cancel = CancellationToken::new();
    let connector = synthetic("kraken");
    let feed = connector.start();
    let mut stream = bridge(&cancel).open(connector.clone() as Arc<dyn ExchangeConnector>, "BTC-USD");

    timeout(Duration::from_secs(5), stream.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    connector.stop();
    feed.await.unwrap();

    let error = first_error(&mut stream).await;
    assert_eq!(error.kind(), "connection_lost");
}
