//! CLI for exercising the query API against a dev chain.

use std::path::PathBuf;
use std::time::Instant;

use alloy_primitives::{Address, Bytes, U256};
use clap::{Parser, Subcommand};
use eyre::{eyre, Result, WrapErr};
use evm_query::logging::setup_logging;
use evm_query::{ApiConfig, ApiError, BlockReference, CallMessage, Devnet, DevnetConfig};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "evm-query", about = "Simulate, estimate and submit against a dev chain")]
struct Cli {
    /// JSON config file for the API.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "info")]
    log_level: String,

    #[arg(long)]
    json_logs: bool,

    /// Overrides `evm_timeout_ms` from the config.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Overrides `rpc_gas_cap` from the config.
    #[arg(long)]
    gas_cap: Option<u64>,

    /// Number of funded dev accounts.
    #[arg(long, default_value_t = 10)]
    accounts: usize,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    #[command(subcommand)]
    command: Command,
}

/// Message fields shared by every scenario.
#[derive(Debug, clap::Args)]
struct MessageArgs {
    /// Index of the sending dev account.
    #[arg(long, default_value_t = 0)]
    from: usize,

    /// Recipient. Defaults to dev account 1; pass `--create` for a deployment.
    #[arg(long)]
    to: Option<Address>,

    #[arg(long, conflicts_with = "to")]
    create: bool,

    /// Value in wei.
    #[arg(long)]
    value: Option<U256>,

    /// Hex call data.
    #[arg(long)]
    data: Option<Bytes>,

    #[arg(long)]
    gas: Option<u64>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Execute a message without committing it.
    Call {
        #[command(flatten)]
        message: MessageArgs,
        /// Tag, hex number or block hash.
        #[arg(long, default_value = "latest")]
        block: String,
    },
    /// Estimate the gas a message needs.
    Estimate {
        #[command(flatten)]
        message: MessageArgs,
    },
    /// Sign and submit one or more messages, then seal them into a block.
    Send {
        #[command(flatten)]
        message: MessageArgs,
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.log_level, cli.json_logs);

    let mut config = match &cli.config {
        Some(path) => ApiConfig::from_file(path).wrap_err_with(|| format!("loading {}", path.display()))?,
        None => ApiConfig::default(),
    };
    if let Some(timeout_ms) = cli.timeout_ms {
        config.evm_timeout_ms = timeout_ms;
    }
    if let Some(gas_cap) = cli.gas_cap {
        config.rpc_gas_cap = gas_cap;
    }

    let devnet = Devnet::generate(DevnetConfig {
        num_accounts: cli.accounts,
        seed: cli.seed,
        chain_id: config.chain_id,
        ..Default::default()
    });
    let api = devnet.api(config);
    info!(chain_id = api.chain_id(), head = api.block_number(), "Dev chain ready");

    match cli.command {
        Command::Call { message, block } => {
            let reference: BlockReference = block.parse()?;
            let message = build_message(&devnet, &message)?;
            let start = Instant::now();
            let result = api.call(&message, Some(reference), None).await;
            info!(elapsed = ?start.elapsed(), "Call finished");
            match result {
                Ok(output) => println!("{output}"),
                Err(err) => print_error(&err),
            }
        }
        Command::Estimate { message } => {
            let message = build_message(&devnet, &message)?;
            match api.estimate_gas(&message, None).await {
                Ok(gas) => println!("{gas}"),
                Err(err) => print_error(&err),
            }
        }
        Command::Send { message, count } => {
            let message = build_message(&devnet, &message)?;
            let mut hashes = Vec::with_capacity(count);
            for _ in 0..count {
                hashes.push(api.send_transaction(&message).await?);
            }
            let status = api.txpool_status();
            info!(pending = status.pending, queued = status.queued, "Submitted");

            let sealed = devnet.seal_pending()?;
            info!(number = sealed.number(), hash = %sealed.hash(), "Sealed");
            for hash in hashes {
                let receipt = api
                    .get_transaction_receipt(hash)
                    .ok_or_else(|| eyre!("no receipt for {hash}"))?;
                println!("{}", serde_json::to_string_pretty(&receipt)?);
            }
        }
    }

    api.shutdown();
    Ok(())
}

fn build_message(devnet: &Devnet, args: &MessageArgs) -> Result<CallMessage> {
    let accounts = devnet.addresses();
    let from = *accounts
        .get(args.from)
        .ok_or_else(|| eyre!("account index {} out of range ({} accounts)", args.from, accounts.len()))?;
    let to = match (args.to, args.create) {
        (Some(to), _) => Some(to),
        (None, true) => None,
        (None, false) => Some(*accounts.get(1).unwrap_or(&from)),
    };
    Ok(CallMessage {
        from: Some(from),
        to,
        gas: args.gas,
        value: args.value,
        input: args.data.clone(),
        ..Default::default()
    })
}

fn print_error(err: &ApiError) {
    println!("error {}: {err}", err.code());
    if let Some(data) = err.data() {
        println!("data: {data}");
    }
}
