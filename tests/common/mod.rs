//! Shared utilities for integration tests.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use axum::Router;
use ezchat_server::config::ConfigProvider;
use ezchat_server::lifecycle::Orchestrator;
use tempfile::TempDir;

/// Provider isolated from the real environment: ephemeral loopback port,
/// config searched only in `dir`, plus `env` overrides.
#[allow(dead_code)]
pub fn provider(dir: &Path, env: &[(&str, &str)]) -> ConfigProvider {
    let mut vars: Vec<(String, String)> = vec![
        ("EZCHAT_HTTP_HOST".into(), "127.0.0.1".into()),
        ("EZCHAT_HTTP_PORT".into(), "0".into()),
    ];
    vars.extend(env.iter().map(|(k, v)| (k.to_string(), v.to_string())));
    ConfigProvider::new(None).with_search_dirs([dir]).with_env(vars)
}

/// A fresh orchestrator with its own scratch directory.
#[allow(dead_code)]
pub fn orchestrator(env: &[(&str, &str)]) -> (TempDir, Orchestrator) {
    let dir = tempfile::tempdir().unwrap();
    let orch = Orchestrator::new(provider(dir.path(), env));
    (dir, orch)
}

/// Bootstrap and serve `routes`; returns the bound address.
#[allow(dead_code)]
pub async fn serving(routes: Router) -> (TempDir, Orchestrator, SocketAddr) {
    let (dir, orch) = orchestrator(&[]);
    let mut orch = orch.with_routes(routes);
    orch.bootstrap().await.expect("bootstrap");
    let addr = orch.serve().await.expect("serve");
    (dir, orch, addr)
}

/// Write `content` to `dir/name`.
#[allow(dead_code)]
pub fn write_config(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

/// Client without connection reuse, so each request opens its own connection.
#[allow(dead_code)]
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

/// Route that sleeps for `delay` before answering `"done"`.
#[allow(dead_code)]
pub fn slow_route(delay: Duration) -> Router {
    Router::new().route(
        "/slow",
        axum::routing::get(move || async move {
            tokio::time::sleep(delay).await;
            "done"
        }),
    )
}
