// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Fraud watch example.
//!
//! Demonstrates:
//! 1. Building the HTTP client and query cache from the environment
//! 2. Loading fraud statistics through the cache
//! 3. Polling suspicious redemptions every 10 seconds
//! 4. Printing debounced suspicious-activity alerts
//! 5. Displaying metrics on Ctrl-C
//!
//! # Run
//!
//! ```bash
//! NEXT_PUBLIC_API_URL=https://admin.example.com/api \
//! SYNC_TOKEN_PATH=~/.config/admin/token.json \
//! RUST_LOG=query_sync=debug \
//! cargo run --example fraud_watch
//! ```

use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use query_sync::resources::redemptions::{FraudStats, Redemption};
use query_sync::{
    ActivityMonitor, HttpClient, ListParams, PollingOptions, QueryCache, ResourceQueries, ResourceService,
    SyncConfig,
};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("query_sync=info")))
        .with_target(false)
        .compact()
        .init();

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Client and cache
    // ─────────────────────────────────────────────────────────────────────────
    let config = SyncConfig::from_env()?;
    println!("Watching {}", config.api_url);

    let http = HttpClient::from_config(&config)?;
    let cache = QueryCache::from_config(&config);
    let _gc = cache.spawn_gc(config.gc_interval());
    let redemptions = ResourceQueries::<Redemption>::new(ResourceService::new(http), cache.clone());

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Fraud stats (cached like any other query)
    // ─────────────────────────────────────────────────────────────────────────
    let stats = redemptions
        .custom::<FraudStats>("fraud/stats", &cache.default_options())
        .await;
    match (stats.data(), &stats.error) {
        (Some(stats), _) => println!(
            "{} redemptions, {} flagged, {} high risk",
            stats.total_redemptions, stats.flagged, stats.high_risk
        ),
        (None, Some(error)) => println!("Fraud stats unavailable: {error}"),
        (None, None) => {}
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Poll suspicious redemptions
    // ─────────────────────────────────────────────────────────────────────────
    let params = ListParams::default().limit(100).filter("suspicious", true);
    let service = redemptions.service().clone();
    let monitor = ActivityMonitor::spawn(
        &cache,
        ResourceQueries::<Redemption>::list_key(&params),
        cache.default_options(),
        PollingOptions::fraud_monitoring(),
        config.alert_debounce(),
        move || {
            let service = service.clone();
            let params = params.clone();
            async move { service.suspicious(&params).await }
        },
    );
    let mut alerts = monitor.subscribe();

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Alerts until Ctrl-C
    // ─────────────────────────────────────────────────────────────────────────
    println!("Polling every 10s, Ctrl-C to stop");
    loop {
        tokio::select! {
            alert = alerts.recv() => match alert {
                Ok(alert) => println!("ALERT: {} new suspicious redemption(s): {}", alert.ids.len(), alert.ids.join(", ")),
                Err(RecvError::Lagged(missed)) => println!("Missed {missed} alerts"),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    drop(monitor);

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\nMetrics:");
    for (key, _, _, value) in snapshotter.snapshot().into_vec() {
        let value = match value {
            DebugValue::Counter(v) => v.to_string(),
            DebugValue::Gauge(v) => format!("{:.2}", v.into_inner()),
            DebugValue::Histogram(v) => format!("{} samples", v.len()),
        };
        println!("  {} = {}", key.key().name(), value);
    }

    Ok(())
}
