//! `stakepool` — operator tool for a persisted escrow ledger.
//!
//! Every command loads the ledger from a JSON state file, applies at most one
//! operation, and writes the result back. `--now` pins the clock so a whole
//! lifecycle can be walked through without waiting for the deadline.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use stakepool_core::{
    format_units, parse_units, Beneficiary, Clock, EscrowConfig, EscrowLedger, ExternalContract,
    LedgerSnapshot, ManualClock, Phase, SystemClock, Timestamp, Wallets,
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const STATE_VERSION: u8 = 1;

#[derive(Parser, Debug)]
#[command(name = "stakepool", version, about = "Threshold-gated pooled-funds escrow")]
struct Cli {
    /// Ledger state file.
    #[arg(long, global = true, default_value = "stakepool.json")]
    state: PathBuf,

    /// Pin the clock to this UNIX time instead of the wall clock.
    #[arg(long, global = true)]
    now: Option<Timestamp>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new ledger; the deadline starts counting now.
    Init {
        /// JSON file with `window_secs` and `threshold` (base units).
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        window_secs: Option<u64>,
        /// Threshold in whole units, e.g. "1" or "0.5".
        #[arg(long)]
        threshold: Option<String>,
        #[arg(long, default_value = "external-contract")]
        beneficiary: String,
        /// Overwrite an existing state file.
        #[arg(long)]
        force: bool,
    },
    /// Deposit value for a participant.
    Stake {
        #[arg(long)]
        participant: String,
        /// Amount in whole units.
        #[arg(long)]
        amount: String,
    },
    /// Forward the pool to the beneficiary.
    Execute,
    /// Refund a participant after the deadline.
    Withdraw {
        #[arg(long)]
        participant: String,
    },
    TimeLeft,
    Balance {
        #[arg(long)]
        participant: String,
    },
    Status,
}

/// On-disk form of a ledger and its collaborators.
#[derive(Serialize, Deserialize, Debug)]
struct StateFile {
    version: u8,
    ledger: LedgerSnapshot,
    beneficiary: ExternalContract,
    wallets: Wallets,
}

struct Session {
    ledger: EscrowLedger,
    wallets: Wallets,
}

impl Session {
    fn load(path: &Path, clock: ManualClock) -> Result<Self> {
        let bytes =
            fs::read(path).with_context(|| format!("read state file {}", path.display()))?;
        let state: StateFile = serde_json::from_slice(&bytes)
            .with_context(|| format!("parse state file {}", path.display()))?;
        if state.version != STATE_VERSION {
            bail!(
                "unsupported state version {} (expected {STATE_VERSION})",
                state.version
            );
        }
        let ledger = EscrowLedger::restore(state.ledger, state.beneficiary, clock)
            .with_context(|| format!("restore ledger from {}", path.display()))?;
        Ok(Self {
            ledger,
            wallets: state.wallets,
        })
    }

    fn save(&self, path: &Path) -> Result<()> {
        let beneficiary = self.ledger.beneficiary();
        let state = StateFile {
            version: STATE_VERSION,
            ledger: self.ledger.snapshot(),
            beneficiary: ExternalContract {
                account: beneficiary.account().to_string(),
                completed: beneficiary.completed(),
                held: beneficiary.held(),
            },
            wallets: self.wallets.clone(),
        };
        let json = serde_json::to_vec_pretty(&state)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, path).with_context(|| format!("replace {}", path.display()))?;
        tracing::debug!(
            path = %path.display(),
            root = %state.ledger.state_root_hex(),
            "state saved"
        );
        Ok(())
    }
}

#[derive(Serialize)]
struct Status {
    phase: Phase,
    deadline: Timestamp,
    time_left: u64,
    threshold: String,
    held: String,
    beneficiary: String,
    beneficiary_completed: bool,
    beneficiary_held: String,
    balances: Vec<(String, String)>,
    refunded: Vec<(String, String)>,
    state_root: String,
}

fn load_config(path: Option<&Path>) -> Result<EscrowConfig> {
    match path {
        Some(path) => {
            let bytes =
                fs::read(path).with_context(|| format!("read config {}", path.display()))?;
            serde_json::from_slice(&bytes)
                .with_context(|| format!("parse config {}", path.display()))
        }
        None => Ok(EscrowConfig::default()),
    }
}

fn run(cli: Cli) -> Result<String> {
    let clock = ManualClock::at(cli.now.unwrap_or_else(|| SystemClock.now()));
    let path = cli.state.as_path();

    let output = match &cli.command {
        Command::Init {
            config,
            window_secs,
            threshold,
            beneficiary,
            force,
        } => {
            if path.exists() && !force {
                bail!("{} already exists (use --force to replace it)", path.display());
            }
            let mut config = load_config(config.as_deref())?;
            if let Some(window_secs) = window_secs {
                config.window_secs = *window_secs;
            }
            if let Some(threshold) = threshold {
                config.threshold = parse_units(threshold).context("invalid --threshold")?;
            }
            let beneficiary = ExternalContract::new(beneficiary.as_str());
            let ledger = EscrowLedger::new(&config, beneficiary, clock)
                .context("invalid escrow configuration")?;
            let session = Session {
                ledger,
                wallets: Wallets::new(),
            };
            session.save(path)?;
            format!(
                "ledger created → {} (deadline {}, threshold {})",
                path.display(),
                session.ledger.deadline(),
                format_units(session.ledger.threshold())
            )
        }
        Command::Stake {
            participant,
            amount,
        } => {
            let mut session = Session::load(path, clock)?;
            let amount = parse_units(amount).context("invalid --amount")?;
            let event = session.ledger.deposit(participant, amount)?;
            session.save(path)?;
            format!(
                "staked {} for {} (balance {})",
                format_units(event.amount),
                event.participant,
                format_units(session.ledger.balance_of(participant))
            )
        }
        Command::Execute => {
            let mut session = Session::load(path, clock)?;
            let forwarded = session.ledger.finalize()?;
            session.save(path)?;
            format!(
                "forwarded {} to {}",
                format_units(forwarded),
                session.ledger.beneficiary().account()
            )
        }
        Command::Withdraw { participant } => {
            let mut session = Session::load(path, clock)?;
            let Session { ledger, wallets } = &mut session;
            let refunded = ledger.reclaim(participant, wallets)?;
            session.save(path)?;
            format!("refunded {} to {participant}", format_units(refunded))
        }
        Command::TimeLeft => Session::load(path, clock)?.ledger.time_left().to_string(),
        Command::Balance { participant } => {
            let session = Session::load(path, clock)?;
            format_units(session.ledger.balance_of(participant))
        }
        Command::Status => {
            let session = Session::load(path, clock)?;
            let ledger = &session.ledger;
            let beneficiary = ledger.beneficiary();
            let status = Status {
                phase: ledger.phase(),
                deadline: ledger.deadline(),
                time_left: ledger.time_left(),
                threshold: format_units(ledger.threshold()),
                held: format_units(ledger.held()),
                beneficiary: beneficiary.account().to_string(),
                beneficiary_completed: beneficiary.completed(),
                beneficiary_held: format_units(beneficiary.held()),
                balances: ledger
                    .participants()
                    .map(|(p, a)| (p.to_string(), format_units(a)))
                    .collect(),
                refunded: session
                    .wallets
                    .accounts()
                    .iter()
                    .map(|(p, a)| (p.clone(), format_units(*a)))
                    .collect(),
                state_root: ledger.snapshot().state_root_hex(),
            };
            serde_json::to_string_pretty(&status)?
        }
    };
    Ok(output)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    match run(cli) {
        Ok(output) => println!("{output}"),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(1);
        }
    }
}
