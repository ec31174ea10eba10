//! Floor simulator
//!
//! Runs a whole talk group in one process: `FLOOR_SIM_PARTICIPANTS`
//! arbiters share an in-memory hub, and stdin drives their push-to-talk
//! buttons.
//!
//! # Commands
//!
//! - `press <n>` / `release <n>` - push-to-talk button of participant `n`
//! - `crash <n>` - kill participant `n` without releasing
//! - `state` - print every participant's state
//! - `metrics` - print the Prometheus exposition
//! - `quit` - shut down
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing and the Prometheus metrics recorder
//! 3. Spawn one arbiter per participant on a shared `LocalHub`
//! 4. Execute commands until `quit`, end of input, or shutdown signal
//! 5. Cancel and join every arbiter

#![warn(clippy::pedantic)]

use std::sync::Arc;

use anyhow::{bail, Context};
use common::clock::SystemClock;
use common::types::ParticipantId;
use floor_controller::actors::{FloorArbiter, FloorArbiterHandle};
use floor_controller::audio::TracingAudioSession;
use floor_controller::config::Config;
use floor_controller::observability::metrics::init_metrics_recorder;
use floor_controller::ptt::PushToTalk;
use floor_controller::transport::local::LocalHub;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// One line of simulator input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Press(usize),
    Release(usize),
    Crash(usize),
    State,
    Metrics,
    Quit,
}

fn parse_command(line: &str) -> anyhow::Result<Command> {
    let mut words = line.split_whitespace();
    let verb = words.next().context("empty command")?;

    let mut participant = || -> anyhow::Result<usize> {
        words
            .next()
            .context("missing participant number")?
            .parse()
            .context("participant number must be a non-negative integer")
    };

    let command = match verb {
        "press" | "p" => Command::Press(participant()?),
        "release" | "r" => Command::Release(participant()?),
        "crash" => Command::Crash(participant()?),
        "state" | "s" => Command::State,
        "metrics" => Command::Metrics,
        "quit" | "q" | "exit" => Command::Quit,
        other => bail!("unknown command '{other}'"),
    };
    Ok(command)
}

struct SimParticipant {
    handle: FloorArbiterHandle,
    ptt: PushToTalk,
    task: JoinHandle<()>,
    crashed: bool,
}

struct Simulator {
    hub: LocalHub,
    lock_key: String,
    participants: Vec<SimParticipant>,
    metrics: PrometheusHandle,
}

impl Simulator {
    fn spawn(config: &Config, metrics: PrometheusHandle, cancel_token: &CancellationToken) -> Self {
        let hub = LocalHub::new();
        let clock = Arc::new(SystemClock);
        let settings = config.arbiter_settings();

        let participants = (0..config.sim_participants)
            .map(|n| {
                let participant_id = ParticipantId::new(format!("{}-{n}", config.participant_id));
                let (handle, task) = FloorArbiter::spawn(
                    Arc::new(hub.join(participant_id.clone())),
                    Arc::new(TracingAudioSession::new(participant_id)),
                    clock.clone(),
                    settings.clone(),
                    cancel_token.child_token(),
                );
                SimParticipant {
                    ptt: PushToTalk::new(handle.clone()),
                    handle,
                    task,
                    crashed: false,
                }
            })
            .collect();

        Self {
            hub,
            lock_key: settings.lock_key,
            participants,
            metrics,
        }
    }

    fn participant(&self, n: usize) -> anyhow::Result<&SimParticipant> {
        let participant = self
            .participants
            .get(n)
            .with_context(|| format!("no participant {n}"))?;
        if participant.crashed {
            bail!("participant {n} has crashed");
        }
        Ok(participant)
    }

    /// Run one command. Returns `false` on `quit`.
    async fn execute(&mut self, command: Command) -> anyhow::Result<bool> {
        match command {
            Command::Press(n) => {
                let outcome = self.participant(n)?.ptt.press().await?;
                println!("{n}: press -> {outcome:?}");
            }
            Command::Release(n) => {
                let outcome = self.participant(n)?.ptt.release().await?;
                println!("{n}: release -> {outcome:?}");
            }
            Command::Crash(n) => {
                let participant = self.participant(n)?;
                self.hub.disconnect(participant.handle.participant_id());
                participant.task.abort();
                warn!(
                    target: "floor.sim",
                    participant_id = %participant.handle.participant_id(),
                    "Participant crashed"
                );
                if let Some(participant) = self.participants.get_mut(n) {
                    participant.crashed = true;
                }
            }
            Command::State => self.print_state(),
            Command::Metrics => println!("{}", self.metrics.render()),
            Command::Quit => return Ok(false),
        }
        Ok(true)
    }

    fn print_state(&self) {
        for (n, participant) in self.participants.iter().enumerate() {
            let status = if participant.crashed {
                "crashed".to_string()
            } else {
                format!("{} ({})", participant.handle.state(), participant.ptt.state())
            };
            println!("{n}: {} {status}", participant.handle.participant_id());
        }
        let lease = self
            .hub
            .committed_metadata()
            .get(&self.lock_key)
            .map_or_else(|| "none".to_string(), ToString::to_string);
        println!("lease: {lease}, connected: {}", self.hub.connected_count());
    }

    async fn shutdown(self) {
        for participant in &self.participants {
            participant.handle.cancel();
        }
        for participant in self.participants {
            if participant.crashed {
                continue;
            }
            if let Err(e) = participant.task.await {
                error!(
                    target: "floor.sim",
                    participant_id = %participant.handle.participant_id(),
                    error = %e,
                    "Arbiter task failed"
                );
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("floor={}", config.observability.log_level).into());
    if config.observability.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!(target: "floor.sim", config = ?config, "Starting floor simulator");

    let metrics = init_metrics_recorder().map_err(anyhow::Error::msg)?;

    let cancel_token = CancellationToken::new();
    let mut simulator = Simulator::spawn(&config, metrics, &cancel_token);
    simulator.print_state();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => {
                info!(target: "floor.sim", "Shutdown signal received");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let result = match parse_command(&line) {
                    Ok(command) => simulator.execute(command).await,
                    Err(e) => Err(e),
                };
                match result {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => println!("error: {e:#}"),
                }
            }
        }
    }

    cancel_token.cancel();
    simulator.shutdown().await;
    info!(target: "floor.sim", "Floor simulator stopped");
    Ok(())
}

/// Wait for Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
