//! streamflow demo driver
//!
//! Usage:
//!   streamflow [--config <path>] [--values <n>] [--json]
//!
//! Builds a counter producer fanned out to a summing consumer and a logging
//! consumer, runs it to quiescence and reports the runtime stats.

use anyhow::{bail, Context, Result};
use std::env;
use std::process::ExitCode;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use streamflow_rs::{datum, NodeContext, NodeMode, Runtime, RuntimeConfig, StreamNode};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

struct Options {
    config: RuntimeConfig,
    values: u64,
    json: bool,
}

fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,streamflow_rs=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:?}");
            ExitCode::FAILURE
        }
    }
}

fn parse_args() -> Result<Options> {
    let mut options = Options {
        config: RuntimeConfig::load_or_default(),
        values: 10,
        json: false,
    };

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let path = args.next().context("--config requires a path")?;
                options.config = RuntimeConfig::load(&path)
                    .with_context(|| format!("loading config {path}"))?;
            }
            "--values" => {
                let raw = args.next().context("--values requires a number")?;
                options.values = raw
                    .parse()
                    .with_context(|| format!("invalid --values {raw:?}"))?;
            }
            "--json" => options.json = true,
            "--help" | "-h" => {
                println!("Usage: streamflow [--config <path>] [--values <n>] [--json]");
                std::process::exit(0);
            }
            other => bail!("unknown argument {other:?}"),
        }
    }
    Ok(options)
}

/// Counter producer state: (emitted so far, limit).
type Counter = (u64, u64);

fn count(ctx: &mut NodeContext<'_>) -> streamflow_rs::Result<()> {
    let next = match ctx.payload_mut::<Counter>()? {
        Some((emitted, limit)) if *emitted < *limit => {
            *emitted += 1;
            Some(*emitted)
        }
        _ => None,
    };
    match next {
        Some(value) => ctx.emit_then(datum(value), count),
        None => ctx.close(),
    }
}

fn run() -> Result<()> {
    let options = parse_args()?;
    tracing::info!("Starting streamflow demo with {} values", options.values);

    let runtime = Runtime::new(options.config);
    let total = Arc::new(AtomicU64::new(0));

    let producer = StreamNode::builder("counter", NodeMode::Producer)
        .payload::<Counter>((0, options.values))
        .on_start(count)
        .build();

    let sum = {
        let total = total.clone();
        StreamNode::builder("sum", NodeMode::Consumer)
            .payload(0u64)
            .on_start(|ctx| {
                let value = ctx.data_as::<u64>().copied().unwrap_or_default();
                if let Some(acc) = ctx.payload_mut::<u64>()? {
                    *acc += value;
                }
                Ok(())
            })
            .on_close(move |ctx| {
                let acc = ctx.payload_mut::<u64>()?.copied().unwrap_or_default();
                total.store(acc, Ordering::SeqCst);
                Ok(())
            })
            .build()
    };

    let log = StreamNode::builder("log", NodeMode::Consumer)
        .on_start(|ctx| {
            tracing::info!("{} received {:?}", ctx.worker(), ctx.data_as::<u64>());
            Ok(())
        })
        .on_close(|ctx| {
            tracing::info!("{} closed", ctx.node().name());
            Ok(())
        })
        .build();

    runtime.connect(&producer, &sum)?;
    runtime.connect(&producer, &log)?;
    runtime.run()?;

    let stats = runtime.stats();
    runtime.shutdown();

    tracing::info!(
        "Sum of 1..={} is {} ({} tasks executed)",
        options.values,
        total.load(Ordering::SeqCst),
        stats.total_executed()
    );
    if options.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    }
    Ok(())
}
