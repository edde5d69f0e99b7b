use std::{
    io::{self, Write},
    time::Instant,
};

use clap::Parser;
use flowtrack::{
    TcpProcessor,
    replay::{self, Trace},
    runtime::{cli::Cli, conf::Conf},
};
use tracing::{Level, debug, info};
use tracing_subscriber::{
    EnvFilter, fmt::Layer, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
};

fn main() -> anyhow::Result<()> {
    let (conf, cli) = Conf::new(Cli::parse())?;
    init_tracing(conf.log_level);

    let trace = Trace::load(&cli.trace)?;
    let processor = TcpProcessor::with_capacity(conf.flow_table_capacity);
    let replay = replay::replay(&processor, &trace, Instant::now());

    let mut out = io::stdout().lock();
    for connection in &replay.connections {
        serde_json::to_writer(&mut out, connection)?;
        writeln!(out)?;
    }
    out.flush()?;

    // one sweep past the last segment shows which flows would age out
    let expired = processor.expire(replay.end + conf.flow.expiry_interval, &conf.flow);
    for flow in &expired {
        debug!(
            event.name = "flow.expired",
            flow.tuple = %flow.tuple,
            tcp.state = %flow.tcp_state,
            flow.age = %humantime::format_duration(flow.age),
            "flow aged out after replay"
        );
    }

    info!(
        event.name = "replay.finished",
        replay.trace = %cli.trace.display(),
        replay.segments = trace.segments.len(),
        replay.connections = replay.connections.len(),
        replay.expired = expired.len(),
        flow_table.remaining = processor.flows().len(),
        "replay finished"
    );

    Ok(())
}

/// Logs go to stderr; stdout carries the JSON reports. `RUST_LOG`, when set,
/// replaces the configured level.
fn init_tracing(log_level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,flowtrack={log_level}")));

    tracing_subscriber::registry()
        .with(filter)
        .with(Layer::new().with_writer(io::stderr))
        .init();

    debug!(
        event.name = "system.tracing_initialized",
        system.log_level = %log_level,
        "internal tracing and logging initialized"
    );
}
