use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};

use crate::api;
use crate::blockchain::{Address, Blockchain, StopSignal, Transaction};
use crate::config::{load_config, Config};
use crate::wallet::{validate_address, Wallets};

/// Single-node UTXO ledger
#[derive(Debug, Parser)]
#[command(name = "utxo_chain", version, about)]
pub struct Cli {
    /// Path to a TOML config file (defaults to ./ledger.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Overrides the block store directory from the config
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Get balance for address
    #[command(name = "getbalance")]
    GetBalance {
        #[arg(long)]
        address: String,
    },

    /// Create a blockchain whose genesis reward goes to address
    #[command(name = "createblockchain")]
    CreateBlockchain {
        #[arg(long)]
        address: String,
    },

    /// Print the blocks in the chain
    #[command(name = "printchain")]
    PrintChain,

    /// Send amount from one address to another
    Send {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        amount: u64,
    },

    /// Create a new wallet
    #[command(name = "createwallet")]
    CreateWallet,

    /// List the addresses in the wallet file
    #[command(name = "listaddresses")]
    ListAddresses,

    /// Serve the HTTP API
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
}

/// Loads the config and dispatches the command
pub fn run(cli: Cli) -> Result<()> {
    let mut config = load_config(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(data_dir) = cli.data_dir {
        config.storage.path = data_dir;
    }

    let mut out = std::io::stdout().lock();

    match cli.command {
        Command::GetBalance { address } => get_balance(&config, &address, &mut out),
        Command::CreateBlockchain { address } => create_blockchain(&config, &address, &mut out),
        Command::PrintChain => print_chain(&config, &mut out),
        Command::Send { from, to, amount } => {
            let stop = StopSignal::new();
            let handle = stop.clone();
            ctrlc::set_handler(move || handle.stop()).context("Failed to install Ctrl-C handler")?;
            send(&config, &from, &to, amount, &stop, &mut out)
        }
        Command::CreateWallet => create_wallet(&config, &mut out),
        Command::ListAddresses => list_addresses(&config, &mut out),
        Command::Serve { host, port } => {
            drop(out);
            if let Some(host) = host {
                config.api.host = host;
            }
            if let Some(port) = port {
                config.api.port = port;
            }
            serve(config)
        }
    }
}

/// Warns when `address` is not a wallet address. The ledger accepts any
/// string, so this never fails the command.
fn check_address(address: &str) {
    if !validate_address(address) {
        warn!("{} is not a valid wallet address", address);
    }
}

fn open_chain(config: &Config) -> Result<Blockchain> {
    Blockchain::open(&config.storage.path, &config.consensus.chain_params())
        .context("Failed to open blockchain")
}

pub fn create_blockchain(config: &Config, address: &str, out: &mut impl Write) -> Result<()> {
    check_address(address);
    let chain = Blockchain::initialize(
        &config.storage.path,
        &Address::from(address),
        &config.consensus.chain_params(),
    )
    .context("Failed to create blockchain")?;
    chain.close()?;

    writeln!(out, "Finished")?;
    Ok(())
}

pub fn get_balance(config: &Config, address: &str, out: &mut impl Write) -> Result<()> {
    check_address(address);
    let chain = open_chain(config)?;
    let balance = chain.balance(&Address::from(address))?;
    chain.close()?;

    writeln!(out, "Balance of {}: {}", address, balance)?;
    Ok(())
}

pub fn print_chain(config: &Config, out: &mut impl Write) -> Result<()> {
    let chain = open_chain(config)?;

    for block in chain.iter() {
        let block = block?;
        writeln!(out)?;
        writeln!(out, "Hash: {}", block.hash_hex())?;
        writeln!(out, "Previous Hash: {}", block.prev_hash_hex())?;
        writeln!(out, "Timestamp: {}", block.timestamp)?;
        writeln!(out, "Nonce: {}", block.nonce)?;
        writeln!(out, "PoW: {}", block.verify_seal())?;

        for transaction in &block.transactions {
            writeln!(
                out,
                "  Transaction {}{}",
                transaction.id_hex(),
                if transaction.is_coinbase() { " (coinbase)" } else { "" }
            )?;
            for input in transaction.inputs.iter().filter_map(|input| input.outpoint()) {
                writeln!(out, "    in  {}", input)?;
            }
            for output in &transaction.outputs {
                writeln!(out, "    out {} -> {}", output.value, output.lock)?;
            }
        }
    }

    chain.close()?;
    Ok(())
}

/// Builds and seals a transfer. Raising `stop` abandons the seal and
/// leaves the chain unchanged.
pub fn send(
    config: &Config,
    from: &str,
    to: &str,
    amount: u64,
    stop: &StopSignal,
    out: &mut impl Write,
) -> Result<()> {
    check_address(from);
    check_address(to);
    let mut chain = open_chain(config)?.with_stop_signal(stop.clone());

    let transaction = Transaction::new_transfer(&Address::from(from), &Address::from(to), amount, &chain)?;
    let moved = transaction.total_output();
    let block = chain.add_block(vec![transaction])?;
    let height = chain.height()?;
    chain.close()?;

    info!(
        "Transfer moving {} sealed in block {} at height {}",
        moved,
        block.hash_hex(),
        height
    );
    writeln!(out, "New transaction success!")?;
    Ok(())
}

pub fn create_wallet(config: &Config, out: &mut impl Write) -> Result<()> {
    let mut wallets = Wallets::load(&config.wallet.path)?;
    let address = wallets.add_wallet();
    wallets.save()?;

    writeln!(out, "New address is: {}", address)?;
    Ok(())
}

pub fn list_addresses(config: &Config, out: &mut impl Write) -> Result<()> {
    let wallets = Wallets::load(&config.wallet.path)?;
    for address in wallets.addresses() {
        writeln!(out, "Address: {}", address)?;
    }
    Ok(())
}

fn serve(config: Config) -> Result<()> {
    let chain = open_chain(&config)?;
    actix_web::rt::System::new()
        .block_on(api::run_server(chain, config.wallet, config.api))
        .context("HTTP server failed")
}
