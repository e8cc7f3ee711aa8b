mod telemetry;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde_json::{json, Map};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use telemetry::Telemetry;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const BURST_SIZE: u64 = 50;

/// Sends synthetic device telemetry to the ingestor over HTTP.
#[derive(Debug, Parser)]
#[command(name = "simulator", version)]
struct Args {
    /// Ingestion endpoint
    #[arg(long, env = "INGESTOR_URL", default_value = "http://localhost:8080/telemetry")]
    url: String,

    /// Target messages per second
    #[arg(long, env = "RATE", default_value_t = 100)]
    rate: u64,

    /// Number of simulated devices
    #[arg(long, env = "DEVICES", default_value_t = 10)]
    devices: u64,

    /// Stop after this many messages (0 = run until interrupted)
    #[arg(long, env = "COUNT", default_value_t = 0)]
    count: u64,
}

#[derive(Debug, Default)]
struct Stats {
    created: u64,
    client_errors: u64,
    server_errors: u64,
    transport_errors: u64,
}

impl Stats {
    fn sent(&self) -> u64 {
        self.created + self.client_errors + self.server_errors + self.transport_errors
    }

    fn record(&mut self, status: StatusCode) {
        if status == StatusCode::CREATED {
            self.created += 1;
        } else if status.is_client_error() {
            self.client_errors += 1;
        } else {
            self.server_errors += 1;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    anyhow::ensure!(args.rate > 0, "rate must be greater than zero");
    anyhow::ensure!(args.devices > 0, "devices must be greater than zero");

    info!("Starting telemetry simulator");
    info!(
        "Endpoint: {}, Rate: {} msg/s, Devices: {}",
        args.url, args.rate, args.devices
    );

    let client = Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .context("failed to build HTTP client")?;

    let burst_interval = Duration::from_millis((BURST_SIZE * 1000) / args.rate);
    let mut rng = rand::thread_rng();
    let mut stats = Stats::default();
    let mut counter = 0u64;

    info!("Publishing in bursts of {} messages every {:?}", BURST_SIZE, burst_interval);

    loop {
        let burst_start = Instant::now();

        for _ in 0..BURST_SIZE {
            if args.count > 0 && counter >= args.count {
                break;
            }

            let device_id = format!("dev-{}", counter % args.devices);
            let telemetry = generate_telemetry(&mut rng, device_id);
            counter += 1;

            match client.post(&args.url).json(&telemetry).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status != StatusCode::CREATED {
                        let body = response.text().await.unwrap_or_default();
                        warn!("Ingestor returned {}: {}", status, body);
                    }
                    stats.record(status);
                }
                Err(e) => {
                    stats.transport_errors += 1;
                    error!("Failed to send telemetry: {}", e);
                }
            }
        }

        if stats.sent() % 1000 < BURST_SIZE {
            info!(
                "Sent {} messages (201: {}, 4xx: {}, 5xx: {}, failed: {})",
                stats.sent(),
                stats.created,
                stats.client_errors,
                stats.server_errors,
                stats.transport_errors
            );
        }

        if args.count > 0 && counter >= args.count {
            break;
        }

        let elapsed = burst_start.elapsed();
        if elapsed < burst_interval {
            tokio::time::sleep(burst_interval - elapsed).await;
        } else if elapsed > burst_interval * 2 {
            warn!(
                "Burst took {:?}, target was {:?} - ingestor may be overloaded",
                elapsed, burst_interval
            );
        }
    }

    info!(
        "Done: {} messages (201: {}, 4xx: {}, 5xx: {}, failed: {})",
        stats.sent(),
        stats.created,
        stats.client_errors,
        stats.server_errors,
        stats.transport_errors
    );

    Ok(())
}

fn generate_telemetry(rng: &mut impl Rng, device_id: String) -> Telemetry {
    let temperature: f64 = if rng.gen_bool(0.05) {
        rng.gen_range(-50.0..100.0) // 5% outliers
    } else {
        rng.gen_range(15.0..35.0)
    };
    let humidity: f64 = rng.gen_range(30.0..80.0);
    let battery: f64 = if rng.gen_bool(0.02) {
        rng.gen_range(0.0..20.0) // 2% low battery
    } else {
        rng.gen_range(20.0..100.0)
    };

    let mut metrics = Map::new();
    metrics.insert("temperature".to_string(), json!((temperature * 10.0).round() / 10.0));
    metrics.insert("humidity".to_string(), json!((humidity * 10.0).round() / 10.0));
    metrics.insert("battery".to_string(), json!((battery * 10.0).round() / 10.0));
    metrics.insert("lowBattery".to_string(), json!(battery < 20.0));

    let tags = rng.gen_bool(0.5).then(|| {
        let mut tags = BTreeMap::new();
        tags.insert("site".to_string(), format!("site-{}", rng.gen_range(1..=4)));
        tags
    });

    // A few readings carry their own id, as devices with local storage do.
    let id = rng
        .gen_bool(0.1)
        .then(|| uuid::Uuid::new_v4().simple().to_string());

    Telemetry {
        id,
        device_id,
        timestamp: Utc::now(),
        kind: Some("environment".to_string()),
        source: Some("simulator".to_string()),
        tags,
        metrics,
    }
}
