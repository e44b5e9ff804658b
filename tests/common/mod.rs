//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use offline_core::{OfflineConfig, OfflineService, ScriptedTransport};

/// Config with millisecond retry pauses and no periodic sync, so tests
/// decide exactly when a drain happens.
pub fn fast_config(data_dir: Option<&Path>) -> OfflineConfig {
    OfflineConfig {
        data_dir: data_dir.map(Path::to_path_buf),
        retry_delays_ms: vec![1, 2, 4],
        network_timeout_ms: 200,
        sync_interval_secs: 0,
        ..Default::default()
    }
}

pub async fn open_service(config: OfflineConfig) -> (OfflineService, Arc<ScriptedTransport>) {
    let transport = Arc::new(ScriptedTransport::new());
    let service = OfflineService::open(config, transport.clone())
        .await
        .expect("service opens");
    (service, transport)
}

/// Opt-in log output: `RUST_LOG=offline_core=debug cargo test -- --nocapture`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
