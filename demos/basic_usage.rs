// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic offline-core usage example.
//!
//! Demonstrates:
//! 1. Opening and starting the service (in memory, scripted network)
//! 2. Routed reads: network first, then cache hits
//! 3. Going offline: cached reads keep working, writes are queued
//! 4. Reconnecting: the queue drains and a conflict is merged
//! 5. Displaying status and metrics
//! 6. Clean shutdown
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! RUST_LOG=offline_core=debug cargo run --example basic_usage
//! ```

use std::sync::Arc;
use std::time::Duration;

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use offline_core::http::{HttpMethod, RequestDescriptor};
use offline_core::transport::Reply;
use offline_core::{OfflineConfig, OfflineService, ScriptedTransport, ServiceState};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("offline_core=info")))
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║           offline-core: Basic Usage Example                   ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Configure and start the service
    // ─────────────────────────────────────────────────────────────────────────
    println!("📦 Configuring offline-core...");
    let config = OfflineConfig {
        // Quick retries so the demo does not sit in backoff
        retry_delays_ms: vec![50, 100],
        warm_urls: vec!["/api/alarms".into()],
        ..Default::default()
    };

    // A real app passes an HttpTransport; the scripted one plays the server
    let server = Arc::new(ScriptedTransport::new());
    server
        .always(
            HttpMethod::Get,
            "/api/alarms",
            Reply::json(200, &json!([{"id": 7, "hour": 6, "minute": 30, "lastModified": 100}])),
        )
        .always(
            HttpMethod::Get,
            "/static/app.js",
            Reply::body(200, "application/javascript", "console.log('ring')"),
        );

    let service = OfflineService::open(config, server.clone()).await?;
    println!("   State: {}", service.state());
    service.start()?;
    assert_eq!(service.state(), ServiceState::Running);
    println!("   ✅ Service running");

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Routed reads
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📖 Reading through the router...");
    for url in ["/static/app.js", "/static/app.js", "/api/alarms", "/api/alarms"] {
        let response = service.handle(RequestDescriptor::get(url)).await;
        println!(
            "   └─ GET {:<16} → {} via {}{}",
            url,
            response.status,
            response.source.label(),
            response.source.tier().map(|t| format!(" ({})", t)).unwrap_or_default()
        );
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Offline
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📴 Going offline...");
    service.set_online(false);

    let alarms = service.handle(RequestDescriptor::get("/api/alarms")).await;
    println!("   └─ GET /api/alarms → {} via {}", alarms.status, alarms.source.label());

    let profile = service.handle(RequestDescriptor::get("/api/profile")).await;
    println!("   └─ GET /api/profile → {} {}", profile.status, String::from_utf8_lossy(&profile.body));

    let edit = RequestDescriptor::new(HttpMethod::Put, "/api/alarms/7")
        .with_json(&json!({"id": 7, "hour": 7, "label": "Gym", "lastModified": 150}));
    let queued = service.handle(edit).await;
    println!("   └─ PUT /api/alarms/7 → {} {}", queued.status, String::from_utf8_lossy(&queued.body));

    let stats = service.queue_stats().await?;
    println!("   📬 Queued mutations: {}", stats.total_queued());

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Reconnect and sync
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔌 Back online (server changed the alarm meanwhile)...");
    server
        .once(
            HttpMethod::Put,
            "/api/alarms/7",
            Reply::json(409, &json!({"id": 7, "hour": 7, "volume": 8, "lastModified": 200})),
        )
        .always(HttpMethod::Put, "/api/alarms/7", Reply::status(204));

    let mut runs = service.subscribe();
    service.set_online(true);
    let run = tokio::time::timeout(Duration::from_secs(5), runs.recv()).await??;
    println!(
        "   └─ Sync run [{}]: succeeded={} failed={} conflicted={} deferred={}",
        run.domain, run.succeeded, run.failed, run.conflicted, run.deferred
    );
    for conflict in &run.conflicts {
        println!("      └─ {} on item {} → {}", conflict.kind.as_str(), conflict.item_id, conflict.resolution.as_str());
    }
    if let Some(sent) = server.sent().last() {
        println!("   └─ Last request body: {}", String::from_utf8_lossy(sent.body.as_deref().unwrap_or_default()));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Status and metrics
    // ─────────────────────────────────────────────────────────────────────────
    let report = service.force_optimize().await?;
    println!(
        "\n🧹 Force optimize: evicted={} freed={}B warmed={}",
        report.evicted_entries, report.freed_bytes, report.warmed
    );

    let status = service.status().await?;
    println!("\n📊 Service Status:");
    println!("   ┌─ State: {} (online: {})", status.state, status.online);
    println!("   ├─ Cache");
    for tier in &status.cache.tiers {
        if tier.entries > 0 {
            println!(
                "   │  └─ {:<10} {} entries, {}/{} bytes, {} hits",
                tier.tier.as_str(),
                tier.entries,
                tier.occupied_bytes,
                tier.budget_bytes,
                tier.hits
            );
        }
    }
    println!("   ├─ Queue: {} pending", status.queue.total_queued());
    println!("   └─ Background tasks: {} spawned, {} failed", status.tasks.spawned, status.tasks.failed);

    println!("\n📈 Raw Metrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Clean shutdown
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🛑 Shutting down...");
    service.shutdown().await;
    println!("   ✅ Shutdown complete! State: {}", service.state());

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Example complete!                          ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    Ok(())
}

/// Print every captured metric, grouped by kind.
fn dump_metrics(snapshotter: &Snapshotter) {
    let mut counters = Vec::new();
    let mut gauges = Vec::new();
    let mut histograms = Vec::new();

    for (composite_key, _, _, value) in snapshotter.snapshot().into_vec() {
        let (_, key) = composite_key.into_parts();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let name = if labels.is_empty() {
            key.name().to_string()
        } else {
            format!("{}{{{}}}", key.name(), labels.join(","))
        };

        match value {
            DebugValue::Counter(v) => counters.push((name, v)),
            DebugValue::Gauge(v) => gauges.push((name, v.into_inner())),
            DebugValue::Histogram(samples) => {
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                histograms.push((name, samples.len(), sum));
            }
        }
    }
    counters.sort();
    gauges.sort_by(|a, b| a.0.cmp(&b.0));
    histograms.sort_by(|a, b| a.0.cmp(&b.0));

    println!("   ┌─ Counters");
    for (name, value) in &counters {
        println!("   │  └─ {} = {}", name, value);
    }
    println!("   ├─ Gauges");
    for (name, value) in &gauges {
        println!("   │  └─ {} = {:.2}", name, value);
    }
    println!("   └─ Histograms");
    for (name, count, sum) in &histograms {
        println!("      └─ {} count={} sum={:.4}", name, count, sum);
    }
}
