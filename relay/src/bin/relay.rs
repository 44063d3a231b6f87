//! relay: runs the pipeline for a fixed number of operations and prints the
//! per-stage statistics.
//!
//! Ctrl-C (or SIGTERM) stops dispatching and shuts the pipeline down early.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use serde::Serialize;

use relay::{
    CpuConfig, LogSink, Pipeline, PipelineConfig, PipelineStats, ReportSink, Role, Route,
    StdoutSink, Timeout, init_tracing, signals,
};

/// Granularity of the completion wait, so interrupts are noticed promptly.
const WAIT_SLICE: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(name = "relay", about = "Multi-stage request pipeline")]
struct Cli {
    /// Operations to dispatch.
    #[arg(long, default_value_t = 16)]
    ops: usize,

    /// Slots in every buffer.
    #[arg(long, default_value_t = 8)]
    capacity: usize,

    /// Client instances.
    #[arg(long, default_value_t = 1)]
    clients: usize,

    /// Proxy instances.
    #[arg(long, default_value_t = 1)]
    proxies: usize,

    /// Server instances.
    #[arg(long, default_value_t = 1)]
    servers: usize,

    /// Size of the operation id space (defaults to --ops).
    #[arg(long)]
    max_ops: Option<usize>,

    /// Client selection: round-robin, random or fixed:<n>.
    #[arg(long, default_value = "round-robin")]
    route: Route,

    /// Give up waiting for completions after this many seconds.
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Do not pin stage threads to cores.
    #[arg(long)]
    no_pin: bool,

    /// Print statistics as JSON.
    #[arg(long)]
    json: bool,

    /// Log completions instead of printing one line each.
    #[arg(long)]
    quiet: bool,
}

impl Cli {
    fn config(&self) -> PipelineConfig {
        PipelineConfig {
            buffer_capacity: self.capacity,
            max_ops: self.max_ops.unwrap_or(self.ops).max(1),
            clients: self.clients,
            proxies: self.proxies,
            servers: self.servers,
            route: self.route,
            cpu: if self.no_pin {
                CpuConfig::Disabled
            } else {
                CpuConfig::Auto
            },
        }
    }

    /// When to stop waiting for completions.
    fn deadline(&self) -> minstant::Instant {
        minstant::Instant::now() + Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Serialize)]
struct Summary<'a> {
    config: &'a PipelineConfig,
    dispatched: usize,
    interrupted: bool,
    stats: &'a PipelineStats,
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    if let Err(err) = signals::install_interrupt_handler() {
        eprintln!("relay: could not install interrupt handler: {err}");
    }

    let outcome = if cli.quiet {
        run(&cli, LogSink)
    } else {
        run(&cli, StdoutSink)
    };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("relay: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run<S>(cli: &Cli, sink: S) -> Result<(), relay::PipelineError>
where
    S: ReportSink + 'static,
{
    let config = cli.config();
    let pipeline = Pipeline::spawn(config.clone(), sink)?;

    let mut dispatched = 0;
    while dispatched < cli.ops && !signals::interrupt_requested() {
        match pipeline.dispatch() {
            Ok(_) => dispatched += 1,
            Err(err) => {
                eprintln!("relay: dispatch stopped: {err}");
                break;
            }
        }
    }

    let deadline = cli.deadline();
    while !pipeline.wait_for(dispatched, Timeout::Duration(WAIT_SLICE)) {
        if signals::interrupt_requested() {
            break;
        }
        if minstant::Instant::now() >= deadline {
            eprintln!("relay: timed out waiting for completions");
            break;
        }
    }

    let interrupted = signals::interrupt_requested();
    let stats = pipeline.shutdown()?;
    if cli.json {
        let summary = Summary {
            config: &config,
            dispatched,
            interrupted,
            stats: &stats,
        };
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{json}"),
            Err(err) => eprintln!("relay: cannot encode statistics: {err}"),
        }
    } else {
        print_stats(&stats, dispatched, interrupted);
    }
    Ok(())
}

fn print_stats(stats: &PipelineStats, dispatched: usize, interrupted: bool) {
    if interrupted {
        println!("Interrupted, terminating relay. Statistics:");
    } else {
        println!("Terminating relay. Statistics:");
    }
    for role in Role::ALL {
        let label = match role {
            Role::Client => "Client",
            Role::Proxy => "Proxy",
            Role::Server => "Server",
        };
        for (index, processed) in stats.instances(role).iter().enumerate() {
            println!("{label} #{index} processed {processed} operations");
        }
    }
    println!(
        "Completed {} of {} dispatched operations",
        stats.completed, dispatched
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_config_from_arguments() {
        let cli = Cli::try_parse_from([
            "relay", "--ops", "40", "--clients", "3", "--route", "fixed:2", "--no-pin",
        ])
        .unwrap();
        let config = cli.config();
        assert_eq!(config.max_ops, 40);
        assert_eq!(config.clients, 3);
        assert_eq!(config.route, Route::Fixed(2));
        assert_eq!(config.cpu, CpuConfig::Disabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn deadline_is_timeout_from_now() {
        let cli = Cli::try_parse_from(["relay", "--timeout-secs", "5"]).unwrap();
        let before = minstant::Instant::now();
        let deadline = cli.deadline();
        let ahead = deadline.duration_since(before);
        assert!(ahead >= Duration::from_secs(5));
        assert!(ahead < Duration::from_secs(6));
    }

    #[test]
    fn rejects_unknown_route() {
        assert!(Cli::try_parse_from(["relay", "--route", "sideways"]).is_err());
    }
}
