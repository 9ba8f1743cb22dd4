//! Basic usage example for the batch dispatcher
//!
//! Five tasks on two workers: the batch runs in three waves and every result
//! keeps the index it was submitted under.

use batch_dispatcher::{async_trait, CancelSignal, ConsoleReporter, Dispatcher, Task};
use std::time::Duration;

#[derive(Debug)]
enum MathTask {
    Add { a: i32, b: i32 },
    Multiply { a: i32, b: i32 },
}

#[async_trait]
impl Task for MathTask {
    type Output = i32;
    type Error = String;

    async fn run(self, _signal: CancelSignal) -> Result<Self::Output, Self::Error> {
        // Simulate some work
        tokio::time::sleep(Duration::from_millis(100)).await;
        match self {
            MathTask::Add { a, b } => Ok(a + b),
            MathTask::Multiply { a, b } => a
                .checked_mul(b)
                .ok_or_else(|| format!("{} * {} overflows", a, b)),
        }
    }

    fn name(&self) -> String {
        match self {
            MathTask::Add { a, b } => format!("add({}, {})", a, b),
            MathTask::Multiply { a, b } => format!("multiply({}, {})", a, b),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let tasks = vec![
        MathTask::Add { a: 10, b: 20 },
        MathTask::Multiply { a: 3, b: 7 },
        MathTask::Add { a: 5, b: 15 },
        MathTask::Multiply { a: 6, b: 6 },
        MathTask::Add { a: -4, b: 4 },
    ];

    let dispatcher = Dispatcher::new(2)?.with_reporter(ConsoleReporter::with_context("math"));
    let start = std::time::Instant::now();
    let report = dispatcher.run(tasks).await;

    println!("\nExecution completed in {:?}", start.elapsed());
    for completed in &report.results {
        println!("  #{} -> {}", completed.index, completed.value);
    }

    let values = report.into_result()?;
    println!("All values: {:?}", values);
    Ok(())
}
