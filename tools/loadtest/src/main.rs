// Load test tool: generates JSON position fixes around a center point and
// sends them to /position at a configurable rate, reporting the same
// accepted/rejected/rate-limited/queue-full breakdown the server itself
// distinguishes by status code.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use clap::Parser;
use rand::Rng;
use serde::Serialize;

#[derive(Parser)]
#[command(name = "tourist-safety-loadtest")]
#[command(about = "Load test tool for the tourist-safety position ingest endpoint")]
struct Args {
    /// Server base URL
    #[arg(long, default_value = "http://localhost:8080")]
    url: String,

    /// Fixes per second
    #[arg(long, default_value_t = 100)]
    rate: u32,

    /// Duration in seconds
    #[arg(long, default_value_t = 30)]
    duration: u64,

    /// Number of distinct simulated tourists
    #[arg(long, default_value_t = 10)]
    tourists: usize,

    /// Center latitude
    #[arg(long, default_value_t = 28.6139)]
    lat: f64,

    /// Center longitude
    #[arg(long, default_value_t = 77.2090)]
    lon: f64,

    /// Bearer token template; `{id}` is replaced with each tourist's id
    #[arg(long, default_value = "tourist:{id}")]
    token_template: String,
}

#[derive(Serialize)]
struct PositionRequest {
    tourist_id: String,
    display_name: String,
    coordinates: [f64; 2],
    accuracy_m: f64,
    timestamp: chrono::DateTime<Utc>,
}

struct Counters {
    sent: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    rate_limited: AtomicU64,
    unavailable: AtomicU64,
    network_error: AtomicU64,
    latency_sum_us: AtomicU64,
}

impl Counters {
    fn new() -> Self {
        Self {
            sent: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
            unavailable: AtomicU64::new(0),
            network_error: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
        }
    }
}

fn build_fix(rng: &mut impl Rng, tourist_id: &str, lat: f64, lon: f64) -> PositionRequest {
    let jitter = || rng.gen_range(-0.001..0.001);
    PositionRequest {
        tourist_id: tourist_id.to_string(),
        display_name: format!("loadtest-{tourist_id}"),
        coordinates: [lon + jitter(), lat + jitter()],
        accuracy_m: rng.gen_range(1.0..50.0),
        timestamp: Utc::now(),
    }
}

fn main() {
    let args = Args::parse();

    println!("=== Tourist Safety Load Test ===");
    println!("Target:   {}/position", args.url);
    println!("Rate:     {} fix/s", args.rate);
    println!("Duration: {}s", args.duration);
    println!("Tourists: {}", args.tourists);
    println!("Center:   lat={} lon={}", args.lat, args.lon);
    println!();

    let tourist_ids: Vec<String> = (0..args.tourists).map(|i| format!("loadtest-{i}")).collect();

    let health_url = format!("{}/health", args.url);
    match reqwest::blocking::get(&health_url) {
        Ok(r) if r.status().is_success() => println!("Server health: OK"),
        Ok(r) => {
            eprintln!("Server health check failed: {}", r.status());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Cannot reach server: {}", e);
            std::process::exit(1);
        }
    }

    let counters = Arc::new(Counters::new());
    let position_url = format!("{}/position", args.url);

    let interval = Duration::from_micros(1_000_000 / args.rate as u64);
    let deadline = Instant::now() + Duration::from_secs(args.duration);

    println!("\nSending...\n");
    let start = Instant::now();

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap();

    let mut rng = rand::thread_rng();
    let mut tick = 0u64;

    while Instant::now() < deadline {
        let tourist_id = &tourist_ids[(tick as usize) % tourist_ids.len()];
        let fix = build_fix(&mut rng, tourist_id, args.lat, args.lon);
        let token = args.token_template.replace("{id}", tourist_id);

        let req_start = Instant::now();
        counters.sent.fetch_add(1, Ordering::Relaxed);

        match client.post(&position_url).bearer_auth(token).json(&fix).send() {
            Ok(resp) => {
                let lat_us = req_start.elapsed().as_micros() as u64;
                counters.latency_sum_us.fetch_add(lat_us, Ordering::Relaxed);

                match resp.status().as_u16() {
                    200 => {
                        counters.accepted.fetch_add(1, Ordering::Relaxed);
                    }
                    400 | 401 | 403 => {
                        counters.rejected.fetch_add(1, Ordering::Relaxed);
                    }
                    429 => {
                        counters.rate_limited.fetch_add(1, Ordering::Relaxed);
                    }
                    503 => {
                        counters.unavailable.fetch_add(1, Ordering::Relaxed);
                    }
                    other => {
                        counters.rejected.fetch_add(1, Ordering::Relaxed);
                        if tick < 5 {
                            eprintln!("Unexpected status: {other}");
                        }
                    }
                }
            }
            Err(_) => {
                counters.network_error.fetch_add(1, Ordering::Relaxed);
            }
        }

        tick += 1;

        if tick % 500 == 0 {
            let elapsed = start.elapsed().as_secs_f64();
            let sent = counters.sent.load(Ordering::Relaxed);
            println!(
                "  [{:.1}s] sent={} accepted={} rejected={} rate_limited={} unavailable={} err={} ({:.0} fix/s)",
                elapsed,
                sent,
                counters.accepted.load(Ordering::Relaxed),
                counters.rejected.load(Ordering::Relaxed),
                counters.rate_limited.load(Ordering::Relaxed),
                counters.unavailable.load(Ordering::Relaxed),
                counters.network_error.load(Ordering::Relaxed),
                sent as f64 / elapsed,
            );
        }

        let target = Duration::from_micros(tick * interval.as_micros() as u64);
        let actual = start.elapsed();
        if actual < target {
            std::thread::sleep(target - actual);
        }
    }

    let elapsed = start.elapsed();
    let sent = counters.sent.load(Ordering::Relaxed);
    let accepted = counters.accepted.load(Ordering::Relaxed);
    let avg_lat = if sent > 0 { counters.latency_sum_us.load(Ordering::Relaxed) / sent } else { 0 };

    println!("\n=== Results ===");
    println!("Duration:     {:.2}s", elapsed.as_secs_f64());
    println!("Total sent:   {sent}");
    println!("Accepted:     {} ({:.1}%)", accepted, accepted as f64 / sent.max(1) as f64 * 100.0);
    println!("Rejected:     {}", counters.rejected.load(Ordering::Relaxed));
    println!("Rate limited: {}", counters.rate_limited.load(Ordering::Relaxed));
    println!("Unavailable:  {}", counters.unavailable.load(Ordering::Relaxed));
    println!("Net errors:   {}", counters.network_error.load(Ordering::Relaxed));
    println!("Avg latency:  {avg_lat} us");
    println!("Throughput:   {:.1} fix/s", sent as f64 / elapsed.as_secs_f64());
}
