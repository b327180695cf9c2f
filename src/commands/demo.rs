//! Demo command
//!
//! Runs several sample pipelines concurrently against one `Observability`, so the
//! configured sinks and the aggregate can be inspected afterwards.

use colored::*;
use eyre::{Result, eyre};
use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use pipetrace::{Config, ExecutionContext, Observability};

pub fn run(runs: usize, fail: bool, config: &Config) -> Result<()> {
    let obs = Observability::new(&config.observability);

    println!(
        "{} Running {} pipelines with subscribers: {}",
        "→".blue(),
        runs,
        obs.bus().subscriber_names().join(", ").cyan()
    );

    let outcomes: Vec<(String, Result<()>)> = thread::scope(|scope| {
        let handles: Vec<_> = (0..runs)
            .map(|i| {
                let obs = &obs;
                scope.spawn(move || {
                    let ctx = obs.context(None);
                    let outcome = run_pipeline(&ctx, i, fail);
                    (ctx.run_id().to_string(), outcome)
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|_| ("unknown".to_string(), Err(eyre!("pipeline thread panicked")))))
            .collect()
    });

    // A step timed outside any pipeline gets a run of its own
    let warmup: Result<usize> = obs.run_step(None, "warmup", |_| Ok(runs));
    if let Err(e) = warmup {
        log::warn!("Warmup failed: {}", e);
    }

    println!();
    for (run_id, outcome) in &outcomes {
        match outcome {
            Ok(()) => println!("{} {}", "✓".green(), run_id.cyan()),
            Err(e) => println!("{} {} {}", "✗".red(), run_id.cyan(), e.to_string().dimmed()),
        }

        for (step, stats) in obs.metrics().step_stats(run_id) {
            println!("    {:<10} {:>3}x  mean {:.3}s", step, stats.count, stats.mean);
        }
        let latencies = obs.metrics().get_metric_values(run_id, "latency_ms");
        if !latencies.is_empty() {
            println!("    latency_ms {:?}", latencies);
        }
    }

    if let Some(persistence) = obs.persistence() {
        println!();
        println!("Events written to {}", persistence.output_dir().display().to_string().dimmed());
    }

    Ok(())
}

fn run_pipeline(ctx: &ExecutionContext, index: usize, fail: bool) -> Result<()> {
    let documents: Vec<String> = (0..=index % 3 + 1).map(|n| format!("doc-{}.pdf", n)).collect();

    let loaded = ctx.run_step("load", |_| {
        thread::sleep(Duration::from_millis(10 + 5 * index as u64));
        Ok::<_, eyre::Report>(documents.clone())
    })?;

    // Each document is parsed as a nested run
    let mut sections = BTreeMap::new();
    for doc in &loaded {
        let child = ctx.child(None);
        let parsed = child.run_step("parse", |_| {
            thread::sleep(Duration::from_millis(3));
            Ok::<_, eyre::Report>(vec![doc.clone(); 2])
        })?;
        sections.insert(doc.clone(), parsed.len());
    }

    let embed = ctx.step("embed");
    for (n, doc) in loaded.iter().enumerate() {
        log::debug!("Embedding {}", doc);
        embed.metric("latency_ms", 100.0 + 10.0 * n as f64 + index as f64);
    }
    embed.finish(&sections);

    ctx.run_step("index", |ctx| {
        if fail {
            return Err(eyre!("index backend unavailable"));
        }
        ctx.record_metric("index", "documents", loaded.len() as f64);
        Ok(loaded.len())
    })?;

    Ok(())
}
