//! packet conveyor simulation for Flowline

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use flowline_queueing::FlowSignal;
use flowline_sim::scenarios::{self, ScenarioReport};
use flowline_sim::{ScenarioConfig, SimulationPresets};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Topology {
    Relay,
    Preemption,
    All,
}

#[derive(Debug, Parser)]
#[command(name = "flow_sim", about = "Run preemptive streaming scenarios")]
struct Args {
    #[arg(value_enum, default_value_t = Topology::All)]
    topology: Topology,

    /// light, heavy, slow or congested
    #[arg(long, default_value = "light", conflicts_with = "config")]
    preset: String,

    /// JSON scenario config; missing fields take the light preset values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Pace simulated time at this multiple of wall-clock speed
    #[arg(long)]
    realtime: Option<f64>,
}

fn print_report(report: &ScenarioReport) {
    println!("{}", format!("\n>>> {}", report.name).bright_green().bold());
    println!("Simulated time: {}", report.sim_time);
    println!("Timer events: {}", report.events);
    println!(
        "Delivered: {} packets, {}",
        report.delivered.len(),
        report.delivered_length()
    );
    println!("Goodput: {:.1} bps", report.goodput_bps());
    println!("Fragments: {}", report.fragments());

    let preemptions = format!("Preemptions: {}", report.preemptions);
    if report.preemptions > 0 {
        println!("{}", preemptions.bright_yellow());
    } else {
        println!("{preemptions}");
    }
    let dropped = format!("Dropped: {}", report.dropped);
    if report.dropped > 0 {
        println!("{}", dropped.bright_red());
    } else {
        println!("{dropped}");
    }

    for signal in [
        FlowSignal::PacketPushedIn,
        FlowSignal::PacketPulledIn,
        FlowSignal::PacketPushedOut,
        FlowSignal::PacketPulledOut,
        FlowSignal::PacketProcessed,
        FlowSignal::PacketDropped,
    ] {
        let count = report.signals.get(&signal).copied().unwrap_or(0);
        println!("  {signal:?}: {count}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if let Some(speed) = args.realtime {
        anyhow::ensure!(speed > 0.0, "--realtime must be positive, got {speed}");
    }

    let config = match &args.config {
        Some(path) => ScenarioConfig::load(path)?,
        None => SimulationPresets::by_name(&args.preset)
            .with_context(|| format!("unknown preset {}", args.preset))?,
    };

    println!("{}", "Flowline Packet Conveyor Simulation".bright_blue().bold());
    println!("{}", "===================================".bright_blue());
    println!("Link: {}", config.server.datarate);
    println!("Duration: {:?}", config.duration);

    let mut built = Vec::new();
    if matches!(args.topology, Topology::Relay | Topology::All) {
        built.push(scenarios::relay(&config)?);
    }
    if matches!(args.topology, Topology::Preemption | Topology::All) {
        built.push(scenarios::preemption(&config)?);
    }

    for scenario in built {
        let report = scenarios::run(scenario, config.duration, args.realtime).await?;
        print_report(&report);
    }

    println!("\n{}", "All simulations complete!".bright_green().bold());
    Ok(())
}
