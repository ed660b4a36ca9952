//! Lattice daemon: command-line entry point for the node core.

use anyhow::Context;
use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use lattice_crypto::random_keypair;
use lattice_ledger::genesis::dev_genesis_key;
use lattice_node::{Node, NodeConfig};
use lattice_types::Network;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

/// Exit code for an unrecognized command, so wrappers can fall back to a
/// different front end.
const EXIT_UNKNOWN_COMMAND: u8 = 3;

#[derive(Parser)]
#[command(name = "lattice-daemon", about = "Lattice block-lattice node")]
struct Cli {
    /// Network to join: live, beta, or test.
    #[arg(long, default_value = "live")]
    network: String,

    /// Storage root; defaults to a per-network directory under the home
    /// directory.
    #[arg(long)]
    data_path: Option<PathBuf>,

    /// Override a configuration option, as key=value. Repeatable.
    #[arg(long = "config", value_name = "KEY=VALUE")]
    config_overrides: Vec<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the node (the default when no subcommand is given).
    Daemon,
    /// Generate a key pair and print it.
    KeyCreate,
    /// Print the public key of the development genesis account.
    DevGenesisAccount,
    /// Print the number of blocks in the ledger.
    DebugBlockCount,
    /// Print the number of accounts in the ledger.
    DebugAccountCount,
    /// Dump every account frontier.
    DebugDumpFrontiers,
    /// Print accumulated statistics counters.
    DebugStats,
    /// Trigger a legacy bootstrap attempt and exit once it finishes.
    Bootstrap,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err)
            if matches!(
                err.kind(),
                ErrorKind::InvalidSubcommand | ErrorKind::UnknownArgument
            ) =>
        {
            eprintln!("{err}");
            return ExitCode::from(EXIT_UNKNOWN_COMMAND);
        }
        Err(err) => {
            let _ = err.print();
            return match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let network = Network::from_str_opt(&cli.network)
        .with_context(|| format!("unknown network `{}`", cli.network))?;
    let data_path = match cli.data_path {
        Some(path) => path,
        None => default_data_path(network)?,
    };

    let mut config = load_config(&data_path)?;
    for assignment in &cli.config_overrides {
        config
            .apply_override(assignment)
            .with_context(|| format!("applying --config {assignment}"))?;
    }
    lattice_utils::init_tracing(&config.log_level, config.log_json);

    match cli.command.unwrap_or(Command::Daemon) {
        Command::Daemon => {
            let node = Node::new(network, &data_path, config)?;
            node.start();
            info!(path = %data_path.display(), "daemon running");
            // The socket layer drives the node from here; without one we
            // park until the process is terminated.
            loop {
                std::thread::park();
            }
        }
        Command::KeyCreate => {
            let keys = random_keypair();
            println!("private: {}", hex::encode(keys.private.0));
            println!("account: {}", keys.account());
            Ok(())
        }
        Command::DevGenesisAccount => {
            println!("{}", dev_genesis_key().account());
            Ok(())
        }
        Command::DebugBlockCount => {
            let node = Node::new(network, &data_path, config)?;
            let txn = node.ledger.store.tx_begin_read()?;
            println!("{}", node.ledger.block_count(&txn)?);
            Ok(())
        }
        Command::DebugAccountCount => {
            let node = Node::new(network, &data_path, config)?;
            let txn = node.ledger.store.tx_begin_read()?;
            println!("{}", node.ledger.account_count(&txn)?);
            Ok(())
        }
        Command::DebugDumpFrontiers => {
            let node = Node::new(network, &data_path, config)?;
            let txn = node.ledger.store.tx_begin_read()?;
            for (account, info) in node.ledger.store.accounts.iter(&txn)? {
                println!("{account} {}", info.head);
            }
            Ok(())
        }
        Command::DebugStats => {
            let node = Node::new(network, &data_path, config)?;
            for (stat_type, detail, count) in node.stats.snapshot() {
                println!("{stat_type}.{detail} {count}");
            }
            Ok(())
        }
        Command::Bootstrap => {
            let node = Node::new(network, &data_path, config)?;
            node.start();
            node.bootstrap.bootstrap();
            while node.bootstrap.in_progress() {
                std::thread::sleep(std::time::Duration::from_millis(100));
            }
            node.stop();
            Ok(())
        }
    }
}

fn load_config(data_path: &std::path::Path) -> anyhow::Result<NodeConfig> {
    let config_path = data_path.join("config.toml");
    if config_path.exists() {
        Ok(NodeConfig::from_toml_file(&config_path)?)
    } else {
        Ok(NodeConfig::default())
    }
}

fn default_data_path(network: Network) -> anyhow::Result<PathBuf> {
    let home = std::env::var_os("HOME")
        .map(PathBuf::from)
        .context("HOME is not set and --data_path was not given")?;
    let leaf = match network {
        Network::Live => "Lattice",
        Network::Beta => "LatticeBeta",
        Network::Test => "LatticeTest",
    };
    Ok(home.join(leaf))
}
