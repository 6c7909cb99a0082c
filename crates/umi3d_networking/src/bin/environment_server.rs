//! # Environment Server
//!
//! Runs an environment on the tick loop without a real transport attached.
//! Useful to profile the registry and the batcher in isolation.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --release --bin environment_server -- --config umi3d.toml --duration 60
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use std::process::ExitCode;
use std::time::Instant;

use tracing_subscriber::EnvFilter;
use umi3d_networking::{EntityDraft, EnvironmentServer, TickLoop, Umi3dConfig};
use umi3d_shared::constants::PROTOCOL_VERSION;
use umi3d_shared::{keys, EntityCategory, Transform};

struct Options {
    config: Option<String>,
    tick_rate: Option<u32>,
    duration_secs: Option<u64>,
}

fn print_help() {
    println!("UMI3D Environment Server");
    println!();
    println!("Usage: environment_server [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -c, --config <PATH>     TOML configuration file");
    println!("  -t, --tick-rate <HZ>    Override the configured tick rate");
    println!("  -d, --duration <SECS>   Stop after this many seconds (default: infinite)");
    println!("  -h, --help              Print this help");
}

fn parse_args() -> Result<Option<Options>, String> {
    let mut options = Options {
        config: None,
        tick_rate: None,
        duration_secs: None,
    };
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                options.config = Some(args.next().ok_or("--config needs a path")?);
            }
            "--tick-rate" | "-t" => {
                let value = args.next().ok_or("--tick-rate needs a value")?;
                options.tick_rate = Some(value.parse().map_err(|_| format!("invalid tick rate: {value}"))?);
            }
            "--duration" | "-d" => {
                let value = args.next().ok_or("--duration needs a value")?;
                options.duration_secs = Some(value.parse().map_err(|_| format!("invalid duration: {value}"))?);
            }
            "--help" | "-h" => return Ok(None),
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    Ok(Some(options))
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let options = match parse_args() {
        Ok(Some(options)) => options,
        Ok(None) => {
            print_help();
            return ExitCode::SUCCESS;
        }
        Err(message) => {
            eprintln!("{message}");
            print_help();
            return ExitCode::FAILURE;
        }
    };

    let mut config = match &options.config {
        Some(path) => match Umi3dConfig::load(path) {
            Ok(config) => config,
            Err(error) => {
                tracing::error!(%error, "cannot load configuration");
                return ExitCode::FAILURE;
            }
        },
        None => Umi3dConfig::default(),
    };
    if let Some(rate) = options.tick_rate {
        config.server.tick_rate = rate;
    }

    println!("┌─ UMI3D ENVIRONMENT ──────────────────────────────────────────────");
    println!("│ Name:               {}", config.server.name);
    println!("│ Protocol:           {PROTOCOL_VERSION}");
    println!("│ Tick Rate:          {} Hz", config.server.tick_rate);
    println!("│ HTTP / Socket:      {} / {}", config.server.http_port, config.server.socket_port);
    println!("│ Max Users:          {}", config.server.max_users);
    match options.duration_secs {
        Some(secs) => println!("│ Duration:           {secs}s"),
        None => println!("│ Duration:           infinite"),
    }
    println!("└──────────────────────────────────────────────────────────────────");

    let mut tick_loop = TickLoop::from_config(&config.server);
    let (mut server, network) = EnvironmentServer::new(config);

    let scene = server.registry_mut().register(
        EntityDraft::new(EntityCategory::Scene)
            .with_name("scene")
            .with_property(keys::ACTIVE, true)
            .with_transform(Transform::IDENTITY),
    );
    tracing::info!(%scene, "scene root registered");

    let start = Instant::now();
    let stats_interval = u64::from(server.config().server.tick_rate.max(1)) * 5;
    let mut last_stats_tick = 0u64;

    loop {
        if options
            .duration_secs
            .is_some_and(|secs| start.elapsed().as_secs() >= secs)
        {
            break;
        }

        tick_loop.wait_for_next_tick();
        while tick_loop.should_tick() {
            let tick_start = tick_loop.begin_tick();
            server.tick(Instant::now());
            tick_loop.end_tick(tick_start);

            // nothing consumes commands without a transport
            for command in network.commands.try_iter() {
                tracing::trace!(?command, "command discarded");
            }

            let current = tick_loop.tick_count();
            if current - last_stats_tick >= stats_interval {
                last_stats_tick = current;
                let stats = tick_loop.stats();
                tracing::info!(
                    tick = current,
                    users = server.sessions().len(),
                    entities = server.registry().len(),
                    avg_tick_us = stats.avg_tick_us,
                    late_ticks = stats.late_ticks,
                    "server status"
                );
            }
        }
    }

    server.shutdown();
    let stats = tick_loop.stats();
    let batches = server.batcher_stats();
    println!("┌─ SHUTDOWN ───────────────────────────────────────────────────────");
    println!("│ Total Ticks:        {}", stats.total_ticks);
    println!("│ Avg Tick Time:      {} μs", stats.avg_tick_us);
    println!("│ Max Tick Time:      {} μs", stats.max_tick_us);
    println!("│ Late Ticks:         {}", stats.late_ticks);
    println!("│ Transactions:       {}", batches.flushed_transactions);
    println!("│ Dropped:            {}", batches.dropped_transactions);
    println!("└──────────────────────────────────────────────────────────────────");
    ExitCode::SUCCESS
}
