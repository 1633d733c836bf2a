//! Concurrent traffic against a serving orchestrator.

mod common;

use std::time::Duration;

use axum::Router;
use ezchat_server::lifecycle::Phase;

use common::{client, serving};

const WORKERS: usize = 16;
const REQUESTS_PER_WORKER: usize = 25;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_health_under_concurrent_load() {
    let (_dir, mut orch, addr) = serving(Router::new()).await;
    let url = format!("http://{addr}/health");

    let workers: Vec<_> = (0..WORKERS)
        .map(|_| {
            let client = client();
            let url = url.clone();
            tokio::spawn(async move {
                let mut ok = 0;
                for _ in 0..REQUESTS_PER_WORKER {
                    let response = client.get(&url).send().await.unwrap();
                    if response.status() == 200 {
                        ok += 1;
                    }
                }
                ok
            })
        })
        .collect();

    let mut total = 0;
    for worker in workers {
        total += worker.await.unwrap();
    }

    assert_eq!(total, WORKERS * REQUESTS_PER_WORKER);
    orch.shutdown(Duration::from_secs(2)).await.unwrap();
    assert_eq!(orch.phase(), Phase::Stopped);
}
