use std::{
    fs::{self, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use quich_core::{
    ledger::DEFAULT_DECIMALS,
    staking::{accrued_reward, DEFAULT_REWARDS_PER_HOUR},
    Amount, Command, Exchange, Timestamp,
};

//==================== CLI ====================//

#[derive(Parser)]
#[command(name = "quich")]
#[command(version)]
#[command(about = "Replay Quichswap exchange scenarios and preview staking rewards", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log filter used when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every step of a JSON scenario against a fresh exchange
    Replay {
        /// Scenario file: {"steps": [{"at": <unix seconds>, "command": {...}}]}
        scenario: PathBuf,

        /// Write the final exchange snapshot to this file
        #[arg(long)]
        snapshot: Option<PathBuf>,

        /// Append every committed ledger event to this file as JSON lines
        #[arg(long)]
        events: Option<PathBuf>,

        /// Stop at the first failing step
        #[arg(long)]
        strict: bool,
    },

    /// Reward a stake of `amount` earns over `elapsed` seconds
    RewardPreview {
        /// Staked principal in base units
        #[arg(long)]
        amount: Amount,

        /// Seconds since the stake's weighted timestamp
        #[arg(long)]
        elapsed: u64,

        /// Rewards per staked unit per hour, scaled by 10^18
        #[arg(long, default_value_t = DEFAULT_REWARDS_PER_HOUR)]
        rate: Amount,
    },
}

//==================== scenario ====================//

#[derive(Debug, Deserialize)]
struct Scenario {
    #[serde(default)]
    name: Option<String>,
    steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
struct Step {
    at: Timestamp,
    command: Command,
    /// Step is expected to fail; a success is reported as a mismatch.
    #[serde(default)]
    expect_error: bool,
}

fn load_scenario(path: &Path) -> Result<Scenario> {
    let raw = fs::read(path).with_context(|| format!("read scenario {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("parse scenario {}", path.display()))
}

/// Run `steps` in order. Each step executes at the latest timestamp seen so
/// far, so a step listed behind an earlier one never rewinds the clock.
/// Returns the number of steps whose result differed from expectation.
fn replay_steps(exchange: &mut Exchange, steps: Vec<Step>, strict: bool) -> Result<usize> {
    let mut clock: Timestamp = 0;
    let mut mismatches = 0usize;
    for (idx, step) in steps.into_iter().enumerate() {
        if step.at < clock {
            warn!(step = idx, at = step.at, clock, "step runs behind the previous one");
        }
        clock = clock.max(step.at);
        match (exchange.execute(step.command, clock), step.expect_error) {
            (Ok(outcome), false) => println!("#{idx:<4} t={clock:<10} {outcome}"),
            (Err(err), true) => println!("#{idx:<4} t={clock:<10} rejected: {err}"),
            (Ok(outcome), true) => {
                mismatches += 1;
                println!("#{idx:<4} t={clock:<10} UNEXPECTED OK: {outcome}");
                if strict {
                    bail!("step #{idx} was expected to fail");
                }
            }
            (Err(err), false) => {
                mismatches += 1;
                println!("#{idx:<4} t={clock:<10} FAILED: {err}");
                if strict {
                    bail!("step #{idx} failed: {err}");
                }
            }
        }
    }
    Ok(mismatches)
}

fn write_events(exchange: &mut Exchange, path: &Path) -> Result<usize> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open events {}", path.display()))?;
    let mut out = BufWriter::new(file);
    let events = exchange.drain_events();
    for event in &events {
        serde_json::to_writer(&mut out, event).context("encode event")?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(events.len())
}

fn print_ledgers(exchange: &Exchange) -> Result<()> {
    let bank = exchange.bank();
    for asset in bank.assets() {
        let ledger = bank.ledger(asset)?;
        println!(
            "{asset:<12} supply={:<28} decimals={:<3} admins={} root={}",
            ledger.total_supply(),
            ledger.decimals(),
            ledger
                .admins()
                .iter()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(","),
            hex::encode(ledger.state_root())
        );
    }
    Ok(())
}

fn replay_cmd(
    path: &Path,
    snapshot: Option<&Path>,
    events: Option<&Path>,
    strict: bool,
) -> Result<()> {
    let scenario = load_scenario(path)?;
    info!(
        scenario = scenario.name.as_deref().unwrap_or("unnamed"),
        steps = scenario.steps.len(),
        "replay started"
    );

    let mut exchange = Exchange::new();
    let replayed = replay_steps(&mut exchange, scenario.steps, strict);
    // Written even when a strict replay stopped early.
    if let Some(out) = events {
        let written = write_events(&mut exchange, out)?;
        println!("{written} event(s) appended → {}", out.display());
    }
    let mismatches = replayed?;

    print_ledgers(&exchange)?;
    if let Some(out) = snapshot {
        let state = exchange.snapshot().context("snapshot exchange")?;
        let json = serde_json::to_vec_pretty(&state).context("encode snapshot")?;
        fs::write(out, json).with_context(|| format!("write snapshot {}", out.display()))?;
        println!("snapshot written → {}", out.display());
    }

    if mismatches > 0 {
        bail!("{mismatches} step(s) did not match expectations");
    }
    Ok(())
}

//==================== reward preview ====================//

fn reward_preview_cmd(amount: Amount, elapsed: u64, rate: Amount) -> Result<()> {
    let reward = accrued_reward(amount, rate, elapsed)?;
    let unit = 10u128.pow(u32::from(DEFAULT_DECIMALS));
    println!(
        "reward={reward} ({}.{:018} units) for amount={amount} over {elapsed}s at rate={rate}",
        reward / unit,
        reward % unit
    );
    Ok(())
}

//==================== main ====================//

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match cli.command {
        Commands::Replay {
            scenario,
            snapshot,
            events,
            strict,
        } => replay_cmd(&scenario, snapshot.as_deref(), events.as_deref(), strict),
        Commands::RewardPreview {
            amount,
            elapsed,
            rate,
        } => reward_preview_cmd(amount, elapsed, rate),
    }
}
