//! TAS Shell - Interactive tool-assisted speedrun console
//!
//! Runs the deterministic testbed world at the fixed tick rate and feeds
//! it TAS commands read line by line from stdin. Useful for exercising
//! the control layer without a full game server attached.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tas_server::commands;
use tas_server::config::Config;
use tas_server::controller::{TasController, TasMode};
use tas_server::sim::testbed::TestbedSim;
use tas_server::sim::Simulation;
use tas_server::util::time::TICK_DURATION_MICROS;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    info!("Starting TAS shell");
    info!("Type \"help\" for the command list");

    let mut sim = TestbedSim::new(1337, "Testbed");
    sim.connect(0);

    let mut controller = TasController::new(&config);
    controller.set_mode(TasMode::SingleControl);
    controller.set_control_client(Some(0));

    let (line_tx, mut line_rx) = mpsc::channel::<String>(64);
    tokio::spawn(read_stdin_lines(line_tx));

    let mut tick_interval = interval(Duration::from_micros(TICK_DURATION_MICROS));
    tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tick_interval.tick() => {
                // Drain pending command lines between ticks.
                while let Ok(line) = line_rx.try_recv() {
                    handle_line(&mut controller, &mut sim, &line);
                }

                // Speeds above 1.0 run extra simulation steps per interval;
                // the controller's own gate throttles speeds below 1.0.
                let steps = controller.speed().ceil().max(1.0) as u32;
                for _ in 0..steps {
                    if !controller.should_advance_tick() || !controller.on_pre_tick() {
                        continue;
                    }
                    let next_tick = sim.current_tick() + 1;
                    controller.apply_playback_inputs(&mut sim, next_tick);
                    sim.step();
                    controller.on_post_tick(&mut sim);
                }

                for message in sim.drain_broadcasts() {
                    println!("{message}");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    info!("TAS shell shutdown complete");
    Ok(())
}

fn handle_line(controller: &mut TasController, sim: &mut TestbedSim, line: &str) {
    if line.trim().is_empty() {
        return;
    }
    match commands::parse(line).and_then(|command| commands::execute(controller, sim, command)) {
        Ok(response) => println!("{response}"),
        Err(err) => error!(%err, "Command failed"),
    }
}

async fn read_stdin_lines(tx: mpsc::Sender<String>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(line).await.is_err() {
            break;
        }
    }
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}
