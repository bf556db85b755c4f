// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::env;
use std::time::Instant;

use anyhow::{bail, Context};
use serde_json::{json, Map, Value};
use the_cogwheel::circuit::FieldRef;
use the_cogwheel::config::{load_circuit, load_config};
use the_cogwheel::errors::RuntimeError;
use the_cogwheel::evaluator::Evaluator;

const DEFAULT_STEPS: u64 = 10;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: {} <runtime.yaml|runtime.toml> <circuit.yaml> [steps]", args[0]);
        eprintln!("Example: {} configs/multi-device.yaml configs/counter-circuit.yaml 25", args[0]);
        std::process::exit(1);
    }
    let steps = match args.get(3) {
        Some(steps) => steps.parse().with_context(|| format!("invalid step count '{steps}'"))?,
        None => DEFAULT_STEPS,
    };

    let config = load_config(&args[1]).with_context(|| format!("loading {}", args[1]))?;
    let circuit = load_circuit(&args[2]).with_context(|| format!("loading {}", args[2]))?;

    let evaluator = Evaluator::start(
        &circuit,
        &config.topology(),
        config.supervisor_options(),
        config.timeouts(),
    );

    let started = Instant::now();
    evaluator.reset().await.context("reset failed")?;
    evaluator.step_n(steps).await.context("step failed")?;
    let elapsed = started.elapsed();

    let mut fields = Map::new();
    for kernel in circuit.kernels() {
        match evaluator.probe(FieldRef::from(kernel.id)).await {
            Ok(memory) => {
                fields.insert(kernel.name.clone(), json!(memory.read()));
            }
            // Intermediate results share latches and are not kept between steps.
            Err(RuntimeError::FieldNotProbeable(_)) => {}
            Err(e) => bail!("probing '{}' failed: {e}", kernel.name),
        }
    }

    let report = json!({
        "time": evaluator.time().await,
        "elapsed_ms": elapsed.as_millis() as u64,
        "fields": Value::Object(fields),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
