//! Fan-out/fan-in with a deadline
//!
//! Simulates querying several slow backends at once and collecting whatever
//! answers arrive before the deadline. Backends watch the cancellation
//! signal, so a slow one gives up as soon as the deadline passes.

use batch_dispatcher::{CancelSignal, DispatchError, Dispatcher, DispatcherConfig};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
struct Backend {
    name: &'static str,
    latency: Duration,
}

async fn query(backend: Backend, signal: CancelSignal) -> Result<Duration, String> {
    match signal.run_until_cancelled(tokio::time::sleep(backend.latency)).await {
        Some(()) => Ok(backend.latency),
        None => Err(format!("{} gave up", backend.name)),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let backends = vec![
        Backend { name: "inventory", latency: Duration::from_millis(40) },
        Backend { name: "pricing", latency: Duration::from_millis(120) },
        Backend { name: "reviews", latency: Duration::from_millis(900) },
        Backend { name: "shipping", latency: Duration::from_millis(60) },
    ];
    let names: Vec<&str> = backends.iter().map(|b| b.name).collect();

    let config = DispatcherConfig::new()
        .with_limit(backends.len())?
        .with_deadline(Duration::from_millis(300))?
        .with_fail_fast(false);
    let report = Dispatcher::with_config(config)?.map(backends, query).await;

    for completed in &report.results {
        info!(backend = names[completed.index], latency = ?completed.value, "answered");
        println!("{:<12} {:?}", names[completed.index], completed.value);
    }
    for index in report.failed() {
        println!("{:<12} no answer", names[index]);
    }

    match report.error {
        None => println!("all backends answered"),
        Some(DispatchError::Task { index, error }) => {
            println!("first failure: {} ({})", names[index], error)
        }
        Some(err) => println!("batch ended early: {}", err),
    }
    Ok(())
}
