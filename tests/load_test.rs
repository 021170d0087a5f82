//! Load testing for the security gateway.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bavel_gateway::store::MemoryStore;
use bavel_sdk::SecureClient;
use serde_json::json;

mod common;

use common::{spawn_gateway, start_mock_upstream, test_config, ANALYZE_KEY, HMAC_SECRET};

#[tokio::test]
async fn test_load_performance() {
    let upstream = start_mock_upstream(200, json!({ "success": true })).await;

    // Generous limits; this measures the pipeline, not the limiter.
    let mut config = test_config(Some(&upstream.url));
    config.flood.enabled = false;
    config.rate_limit.ip.max_requests = 10_000;
    config.rate_limit.api_key.max_requests = 10_000;
    config.rate_limit.global.max_requests = 10_000;
    let gw = spawn_gateway(config, Arc::new(MemoryStore::new())).await;

    let concurrency = 20;
    let requests_per_task = 25;
    let total_requests = concurrency * requests_per_task;

    let client = Arc::new(SecureClient::new(&gw.base_url, ANALYZE_KEY, HMAC_SECRET));
    let start = Instant::now();

    let mut tasks = Vec::new();
    for task in 0..concurrency {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            let mut latencies: Vec<Duration> = Vec::new();
            for i in 0..requests_per_task {
                let payload = json!({
                    "action": "analyze",
                    "selectedText": format!("load {task}-{i}"),
                    "userLanguage": "en"
                });
                let req_start = Instant::now();
                if client.send("/analyze", &payload).await.is_ok() {
                    latencies.push(req_start.elapsed());
                }
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for task in tasks {
        all_latencies.extend(task.await.unwrap());
    }

    let duration = start.elapsed();
    let rps = total_requests as f64 / duration.as_secs_f64();

    assert_eq!(all_latencies.len(), total_requests, "every request should be forwarded");
    assert_eq!(upstream.requests().len(), total_requests);

    all_latencies.sort();
    let p50 = all_latencies[all_latencies.len() / 2];
    let p95 = all_latencies[(all_latencies.len() as f64 * 0.95) as usize];
    let p99 = all_latencies[(all_latencies.len() as f64 * 0.99) as usize];

    println!("\n--- Load Test Results ---");
    println!("Total Requests: {}", total_requests);
    println!("Concurrency:    {}", concurrency);
    println!("Total Duration: {:?}", duration);
    println!("Requests/sec:   {:.2}", rps);
    println!("P50 Latency:    {:?}", p50);
    println!("P95 Latency:    {:?}", p95);
    println!("P99 Latency:    {:?}", p99);
    println!("-------------------------\n");
}
