//! `jobwire-bench`: round-trip throughput of an echo service over the
//! in-memory engine.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use jobwire::config::LogFormat;
use jobwire::{
    Client, LoggerOptions, MemoryBroker, MemoryEngine, MethodResult, MethodSet, RpcConfig,
    RpcService, Server,
};
use jobwire_core::Job;
use serde_json::json;
use tracing::{info, warn};

const SERVICE: &str = "bench-echo";

/// Measure RPC round trips through a queue
#[derive(Parser, Debug)]
#[command(name = "jobwire-bench", version, about)]
struct Args {
    /// Number of calls to send
    #[arg(long, default_value_t = 1000)]
    calls: usize,

    /// Jobs processed in parallel by the server, and calls kept in flight
    #[arg(long, default_value_t = 1)]
    concurrency: usize,

    /// Log level (trace, debug, info, warn, error, fatal, silent)
    #[arg(long, env = "JOBWIRE_LOG", default_value = "warn")]
    log_level: String,

    /// Emit logs and the summary as JSON
    #[arg(long)]
    json: bool,
}

struct Echo;

impl Echo {
    async fn echo(self: Arc<Self>, job: Job) -> MethodResult {
        Ok(job.data)
    }
}

impl RpcService for Echo {
    fn name(&self) -> Option<&str> {
        Some(SERVICE)
    }

    fn methods(set: MethodSet<Self>) -> MethodSet<Self> {
        set.method("echo", Self::echo)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let logger_options = LoggerOptions {
        level: args.log_level.clone(),
        format: if args.json {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        },
    };
    jobwire::logging::init(&logger_options)?;

    tokio::select! {
        summary = run(&args, logger_options) => {
            let (calls, elapsed) = summary?;
            report(&args, calls, elapsed);
        }
        _ = tokio::signal::ctrl_c() => warn!("interrupted"),
    }
    Ok(())
}

async fn run(args: &Args, logger_options: LoggerOptions) -> anyhow::Result<(usize, Duration)> {
    let concurrency = args.concurrency.max(1);
    let broker = MemoryBroker::new();
    let engine = Arc::new(MemoryEngine::new(broker));
    let config = RpcConfig {
        logger_options,
        ..RpcConfig::default()
    };

    let mut server = Server::new(engine.clone(), config.clone())?;
    server
        .bind_service(Echo, concurrency, None)
        .await
        .context("binding the echo service")?;
    let mut client = Client::new(engine, config);
    client.bind_service(SERVICE, None)?;
    let client = Arc::new(client);

    info!(calls = args.calls, concurrency, "starting");
    let start = Instant::now();
    let mut callers = Vec::with_capacity(concurrency);
    for caller in 0..concurrency {
        let client = Arc::clone(&client);
        let share = args.calls / concurrency + usize::from(caller < args.calls % concurrency);
        callers.push(tokio::spawn(async move {
            for n in 0..share {
                client
                    .send(SERVICE, "echo", json!({ "caller": caller, "n": n }), None)
                    .await?;
            }
            anyhow::Ok(share)
        }));
    }

    let mut completed = 0;
    for caller in callers {
        completed += caller.await.context("caller task failed")??;
    }
    let elapsed = start.elapsed();

    client.close().await?;
    server.destroy().await?;
    server.close().await?;
    Ok((completed, elapsed))
}

#[allow(clippy::cast_precision_loss)]
fn report(args: &Args, calls: usize, elapsed: Duration) {
    let secs = elapsed.as_secs_f64();
    let per_sec = if secs > 0.0 { calls as f64 / secs } else { 0.0 };
    if args.json {
        println!(
            "{}",
            json!({
                "calls": calls,
                "concurrency": args.concurrency,
                "elapsedMs": elapsed.as_millis(),
                "callsPerSec": per_sec,
            })
        );
    } else {
        println!(
            "{calls} calls in {:.1} ms ({per_sec:.0} calls/s, concurrency {})",
            secs * 1000.0,
            args.concurrency
        );
    }
}
