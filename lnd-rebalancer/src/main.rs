mod channels;
mod io;
mod rebalance;
mod recommend;
#[cfg(test)]
mod testing;
mod util;

use std::fs;
use std::process;

use clap::{Parser, Subcommand};
use hex::DisplayHex;

use lnd_rebalancer_client::client::LndRestClient;
use lnd_rebalancer_client::LightningNode;

use crate::io::history::HistoryStore;
use crate::rebalance::exclusion::EdgeExclusions;
use crate::rebalance::EngineError;
use crate::util::config::{load_config, ArgsConfig, Config};

const HISTORY_DB_FILE: &str = "history.db";

#[derive(Parser)]
#[command(version, about = "Operator tool for rebalancing an LND node's channels")]
struct Cli {
	#[command(flatten)]
	config: ArgsConfig,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand)]
enum Command {
	/// List channels with balances and rebalance history.
	Channels,
	/// Move liquidity out through one channel and back in through another.
	Rebalance {
		/// Amount to move, in satoshis.
		#[arg(short = 'a', long)]
		amount: i64,

		/// Channel to drain.
		#[arg(short = 's', long)]
		src_chan: u64,

		/// Channel to fill.
		#[arg(short = 'd', long)]
		dst_chan: u64,
	},
	/// Pick the best rebalance candidate and print or execute it.
	Recommend {
		/// Execute the recommendation instead of printing it.
		#[arg(long)]
		doit: bool,
	},
	/// Rebalance repeatedly until no candidate remains.
	Autobalance,
}

#[tokio::main]
async fn main() {
	let cli = Cli::parse();

	let config = match load_config(&cli.config) {
		Ok(config) => config,
		Err(e) => {
			eprintln!("Invalid configuration: {}", e);
			process::exit(1);
		},
	};

	if let Err(e) = util::logger::init(config.log_level, config.log_file_path.as_deref()) {
		eprintln!("Failed to set up logging: {}", e);
		process::exit(1);
	}

	let client = match build_client(&config) {
		Ok(client) => client,
		Err(e) => {
			eprintln!("{}", e);
			process::exit(1);
		},
	};

	if let Err(e) = fs::create_dir_all(&config.data_dir) {
		eprintln!("Failed to create data directory {}: {}", config.data_dir.display(), e);
		process::exit(1);
	}
	let history = match HistoryStore::open(&config.data_dir.join(HISTORY_DB_FILE)) {
		Ok(history) => history,
		Err(e) => {
			eprintln!("Failed to open history database: {}", e);
			process::exit(1);
		},
	};

	if let Err(e) = run_command(cli.command, &client, &history, &config).await {
		eprintln!("{}", e);
		process::exit(1);
	}
}

fn build_client(config: &Config) -> Result<LndRestClient, String> {
	let cert = fs::read(&config.tls_cert_path).map_err(|e| {
		format!("Cannot read TLS certificate {}: {}", config.tls_cert_path.display(), e)
	})?;
	let macaroon = fs::read(&config.macaroon_path).map_err(|e| {
		format!("Cannot read macaroon {}: {}", config.macaroon_path.display(), e)
	})?;

	LndRestClient::new(config.rest_address.clone(), macaroon.to_lower_hex_string(), &cert)
		.map_err(|e| format!("Failed to build node client: {}", e))
}

async fn run_command(
	command: Command, node: &dyn LightningNode, history: &HistoryStore, config: &Config,
) -> Result<(), EngineError> {
	match command {
		Command::Channels => channels::list_channels(node, history).await,
		Command::Rebalance { amount, src_chan, dst_chan } => {
			let mut exclusions = EdgeExclusions::new();
			let outcome = rebalance::rebalance(
				node,
				history,
				&mut exclusions,
				&config.rebalance,
				amount,
				src_chan,
				dst_chan,
			)
			.await?;
			println!("{:?}", outcome);
			Ok(())
		},
		Command::Recommend { doit } => {
			let mut exclusions = EdgeExclusions::new();
			recommend::recommend(
				node,
				history,
				&mut exclusions,
				&config.rebalance,
				&config.recommend,
				doit,
			)
			.await
			.map(|_| ())
		},
		Command::Autobalance => {
			let mut exclusions = EdgeExclusions::new();
			tokio::select! {
				result = recommend::autobalance(
					node,
					history,
					&mut exclusions,
					&config.rebalance,
					&config.recommend,
				) => result,
				_ = tokio::signal::ctrl_c() => {
					log::info!("interrupted, exiting");
					Ok(())
				},
			}
		},
	}
}
