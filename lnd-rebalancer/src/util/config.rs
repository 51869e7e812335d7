// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use std::{env, fs, io};

use clap::Args;
use log::LevelFilter;
use serde::Deserialize;

const DEFAULT_REST_ADDRESS: &str = "https://localhost:8080";
const DEFAULT_TLS_CERT_PATH: &str = "~/.lnd/tls.cert";
const DEFAULT_MACAROON_PATH: &str = "~/.lnd/data/chain/bitcoin/mainnet/admin.macaroon";
const DEFAULT_DATA_DIR: &str = "~/.lnd-rebalancer";

const DEFAULT_FINAL_CLTV_DELTA: u32 = 144;
const DEFAULT_FEE_LIMIT_RATE: f64 = 0.0005;

const DEFAULT_MIN_IMBALANCE: i64 = 1000;
const DEFAULT_TRANSFER_AMOUNT: i64 = 10_000;
const DEFAULT_RETRY_INHIBIT_SECS: u64 = 3600;

/// Validated configuration for the tool.
#[derive(Debug, PartialEq)]
pub struct Config {
	pub rest_address: String,
	pub tls_cert_path: PathBuf,
	pub macaroon_path: PathBuf,
	pub data_dir: PathBuf,
	pub log_level: LevelFilter,
	pub log_file_path: Option<PathBuf>,
	pub rebalance: RebalanceConfig,
	pub recommend: RecommendConfig,
}

/// Knobs consumed by the rebalance engine.
#[derive(Debug, Clone, PartialEq)]
pub struct RebalanceConfig {
	/// CLTV delta granted to the final (self-returning) hop.
	pub final_cltv_delta: u32,
	/// Fee ceiling as a fraction of the rebalanced amount.
	pub fee_limit_rate: f64,
}

/// Knobs consumed by the recommender.
#[derive(Debug, Clone, PartialEq)]
pub struct RecommendConfig {
	/// Minimum absolute imbalance before a channel is worth touching.
	pub min_imbalance: i64,
	/// Hard cap on the amount moved per attempt.
	pub transfer_amount: i64,
	/// How long a failed loop stays suppressed.
	pub retry_inhibit: Duration,
	/// When non-empty, only these channels may act as source.
	pub src_chan_target: Vec<u64>,
	/// When non-empty, only these channels may act as destination.
	pub dst_chan_target: Vec<u64>,
	/// Peers never considered on either side of a loop.
	pub peer_node_blacklist: Vec<String>,
}

/// A builder for `Config`.
#[derive(Default)]
struct ConfigBuilder {
	rest_address: Option<String>,
	tls_cert_path: Option<String>,
	macaroon_path: Option<String>,
	data_dir: Option<String>,
	log_level: Option<String>,
	log_file_path: Option<String>,
	final_cltv_delta: Option<u32>,
	fee_limit_rate: Option<f64>,
	min_imbalance: Option<i64>,
	transfer_amount: Option<i64>,
	retry_inhibit_secs: Option<u64>,
	src_chan_target: Option<Vec<u64>>,
	dst_chan_target: Option<Vec<u64>>,
	peer_node_blacklist: Option<Vec<String>>,
}

impl ConfigBuilder {
	fn merge_toml(&mut self, toml: TomlConfig) {
		if let Some(lnd) = toml.lnd {
			self.rest_address = lnd.rest_address.or(self.rest_address.clone());
			self.tls_cert_path = lnd.tls_cert_path.or(self.tls_cert_path.clone());
			self.macaroon_path = lnd.macaroon_path.or(self.macaroon_path.clone());
		}

		if let Some(storage) = toml.storage {
			self.data_dir = storage.dir_path.or(self.data_dir.clone());
		}

		if let Some(log) = toml.log {
			self.log_level = log.level.or(self.log_level.clone());
			self.log_file_path = log.file.or(self.log_file_path.clone());
		}

		if let Some(rebalance) = toml.rebalance {
			self.final_cltv_delta = rebalance.final_cltv_delta.or(self.final_cltv_delta);
			self.fee_limit_rate = rebalance.fee_limit_rate.or(self.fee_limit_rate);
		}

		if let Some(recommend) = toml.recommend {
			self.min_imbalance = recommend.min_imbalance.or(self.min_imbalance);
			self.transfer_amount = recommend.transfer_amount.or(self.transfer_amount);
			self.retry_inhibit_secs = recommend.retry_inhibit_secs.or(self.retry_inhibit_secs);
			self.src_chan_target = recommend.src_chan_target.or(self.src_chan_target.clone());
			self.dst_chan_target = recommend.dst_chan_target.or(self.dst_chan_target.clone());
			self.peer_node_blacklist =
				recommend.peer_node_blacklist.or(self.peer_node_blacklist.clone());
		}
	}

	fn merge_args(&mut self, args: &ArgsConfig) {
		if let Some(rest_address) = &args.rest_address {
			self.rest_address = Some(rest_address.clone());
		}

		if let Some(tls_cert_path) = &args.tls_cert_path {
			self.tls_cert_path = Some(tls_cert_path.clone());
		}

		if let Some(macaroon_path) = &args.macaroon_path {
			self.macaroon_path = Some(macaroon_path.clone());
		}

		if let Some(data_dir) = &args.data_dir {
			self.data_dir = Some(data_dir.clone());
		}

		if let Some(log_level) = &args.log_level {
			self.log_level = Some(log_level.clone());
		}

		if let Some(log_file_path) = &args.log_file {
			self.log_file_path = Some(log_file_path.clone());
		}

		if let Some(final_cltv_delta) = args.final_cltv_delta {
			self.final_cltv_delta = Some(final_cltv_delta);
		}

		if let Some(fee_limit_rate) = args.fee_limit_rate {
			self.fee_limit_rate = Some(fee_limit_rate);
		}

		if let Some(min_imbalance) = args.min_imbalance {
			self.min_imbalance = Some(min_imbalance);
		}

		if let Some(transfer_amount) = args.transfer_amount {
			self.transfer_amount = Some(transfer_amount);
		}

		if let Some(retry_inhibit_secs) = args.retry_inhibit_secs {
			self.retry_inhibit_secs = Some(retry_inhibit_secs);
		}

		if let Some(src_chan_target) = &args.src_chan_target {
			self.src_chan_target = Some(src_chan_target.clone());
		}

		if let Some(dst_chan_target) = &args.dst_chan_target {
			self.dst_chan_target = Some(dst_chan_target.clone());
		}

		if let Some(peer_node_blacklist) = &args.peer_node_blacklist {
			self.peer_node_blacklist = Some(peer_node_blacklist.clone());
		}
	}

	fn build(self) -> io::Result<Config> {
		let log_level = self
			.log_level
			.as_deref()
			.map(|level_str| {
				LevelFilter::from_str(level_str).map_err(|e| {
					io::Error::new(
						io::ErrorKind::InvalidInput,
						format!("Invalid log level configured: {}", e),
					)
				})
			})
			.transpose()?
			.unwrap_or(LevelFilter::Debug);

		let fee_limit_rate = self.fee_limit_rate.unwrap_or(DEFAULT_FEE_LIMIT_RATE);
		if !fee_limit_rate.is_finite() || fee_limit_rate < 0.0 {
			return Err(io::Error::new(
				io::ErrorKind::InvalidInput,
				format!("Invalid fee_limit_rate {}, must be a non-negative number", fee_limit_rate),
			));
		}

		let transfer_amount = self.transfer_amount.unwrap_or(DEFAULT_TRANSFER_AMOUNT);
		if transfer_amount <= 0 {
			return Err(io::Error::new(
				io::ErrorKind::InvalidInput,
				format!("Invalid transfer_amount {}, must be positive", transfer_amount),
			));
		}

		let min_imbalance = self.min_imbalance.unwrap_or(DEFAULT_MIN_IMBALANCE);
		if min_imbalance < 0 {
			return Err(io::Error::new(
				io::ErrorKind::InvalidInput,
				format!("Invalid min_imbalance {}, must be non-negative", min_imbalance),
			));
		}

		Ok(Config {
			rest_address: self.rest_address.unwrap_or_else(|| DEFAULT_REST_ADDRESS.to_string()),
			tls_cert_path: expand_path(
				&self.tls_cert_path.unwrap_or_else(|| DEFAULT_TLS_CERT_PATH.to_string()),
			),
			macaroon_path: expand_path(
				&self.macaroon_path.unwrap_or_else(|| DEFAULT_MACAROON_PATH.to_string()),
			),
			data_dir: expand_path(&self.data_dir.unwrap_or_else(|| DEFAULT_DATA_DIR.to_string())),
			log_level,
			log_file_path: self.log_file_path.map(|path| expand_path(&path)),
			rebalance: RebalanceConfig {
				final_cltv_delta: self.final_cltv_delta.unwrap_or(DEFAULT_FINAL_CLTV_DELTA),
				fee_limit_rate,
			},
			recommend: RecommendConfig {
				min_imbalance,
				transfer_amount,
				retry_inhibit: Duration::from_secs(
					self.retry_inhibit_secs.unwrap_or(DEFAULT_RETRY_INHIBIT_SECS),
				),
				src_chan_target: self.src_chan_target.unwrap_or_default(),
				dst_chan_target: self.dst_chan_target.unwrap_or_default(),
				peer_node_blacklist: self.peer_node_blacklist.unwrap_or_default(),
			},
		})
	}
}

/// Configuration loaded from a TOML file.
#[derive(Deserialize)]
pub struct TomlConfig {
	lnd: Option<LndConfig>,
	storage: Option<StorageConfig>,
	log: Option<LogConfig>,
	rebalance: Option<RebalanceTomlConfig>,
	recommend: Option<RecommendTomlConfig>,
}

#[derive(Deserialize)]
struct LndConfig {
	rest_address: Option<String>,
	tls_cert_path: Option<String>,
	macaroon_path: Option<String>,
}

#[derive(Deserialize)]
struct StorageConfig {
	dir_path: Option<String>,
}

#[derive(Deserialize)]
struct LogConfig {
	level: Option<String>,
	file: Option<String>,
}

#[derive(Deserialize)]
struct RebalanceTomlConfig {
	final_cltv_delta: Option<u32>,
	fee_limit_rate: Option<f64>,
}

#[derive(Deserialize)]
struct RecommendTomlConfig {
	min_imbalance: Option<i64>,
	transfer_amount: Option<i64>,
	retry_inhibit_secs: Option<u64>,
	src_chan_target: Option<Vec<u64>>,
	dst_chan_target: Option<Vec<u64>>,
	peer_node_blacklist: Option<Vec<String>>,
}

#[derive(Args, Debug)]
pub struct ArgsConfig {
	#[arg(
		short = 'C',
		long,
		env = "LND_REBALANCER_CONFIG",
		help = "Path to the configuration file."
	)]
	pub config_file: Option<String>,

	#[arg(
		long,
		env = "LND_REBALANCER_REST_ADDRESS",
		help = "Base URL of the node's REST interface."
	)]
	pub rest_address: Option<String>,

	#[arg(
		long,
		env = "LND_REBALANCER_TLS_CERT_PATH",
		help = "Path to the node's TLS certificate."
	)]
	pub tls_cert_path: Option<String>,

	#[arg(
		long,
		env = "LND_REBALANCER_MACAROON_PATH",
		help = "Path to the macaroon presented to the node."
	)]
	pub macaroon_path: Option<String>,

	#[arg(
		long,
		env = "LND_REBALANCER_DATA_DIR",
		help = "Directory holding the rebalance history database."
	)]
	pub data_dir: Option<String>,

	#[arg(long, env = "LND_REBALANCER_LOG_LEVEL", help = "Log level (off..trace).")]
	pub log_level: Option<String>,

	#[arg(
		long,
		env = "LND_REBALANCER_LOG_FILE",
		help = "Log file path; logs go to stderr when unset."
	)]
	pub log_file: Option<String>,

	#[arg(
		long,
		env = "LND_REBALANCER_FINAL_CLTV_DELTA",
		help = "CLTV delta granted to the final hop of a rebalance route."
	)]
	pub final_cltv_delta: Option<u32>,

	#[arg(
		long,
		env = "LND_REBALANCER_FEE_LIMIT_RATE",
		help = "Fee ceiling as a fraction of the rebalanced amount."
	)]
	pub fee_limit_rate: Option<f64>,

	#[arg(
		long,
		env = "LND_REBALANCER_MIN_IMBALANCE",
		help = "Minimum imbalance (sats) before a channel is considered."
	)]
	pub min_imbalance: Option<i64>,

	#[arg(
		long,
		env = "LND_REBALANCER_TRANSFER_AMOUNT",
		help = "Cap (sats) on the amount moved per rebalance."
	)]
	pub transfer_amount: Option<i64>,

	#[arg(
		long,
		env = "LND_REBALANCER_RETRY_INHIBIT_SECS",
		help = "Seconds a failed loop stays suppressed."
	)]
	pub retry_inhibit_secs: Option<u64>,

	#[arg(
		long,
		env = "LND_REBALANCER_SRC_CHAN_TARGET",
		help = "Restrict loop sources to this channel (repeatable)."
	)]
	pub src_chan_target: Option<Vec<u64>>,

	#[arg(
		long,
		env = "LND_REBALANCER_DST_CHAN_TARGET",
		help = "Restrict loop destinations to this channel (repeatable)."
	)]
	pub dst_chan_target: Option<Vec<u64>>,

	#[arg(
		long,
		env = "LND_REBALANCER_PEER_NODE_BLACKLIST",
		help = "Never loop through this peer (repeatable)."
	)]
	pub peer_node_blacklist: Option<Vec<String>>,
}

pub fn load_config(args: &ArgsConfig) -> io::Result<Config> {
	let mut builder = ConfigBuilder::default();

	if let Some(path) = &args.config_file {
		let content = fs::read_to_string(path).map_err(|e| {
			io::Error::new(e.kind(), format!("Failed to read config file '{}': {}", path, e))
		})?;
		let toml_config: TomlConfig = toml::from_str(&content).map_err(|e| {
			io::Error::new(
				io::ErrorKind::InvalidData,
				format!("Config file contains invalid TOML format: {}", e),
			)
		})?;

		builder.merge_toml(toml_config);
	}

	builder.merge_args(args);

	builder.build()
}

// Expands a leading `~` to the home directory. Windows-style %VAR% expansion
// is not supported.
fn expand_path(path: &str) -> PathBuf {
	if let Some(rest) = path.strip_prefix("~") {
		if let Ok(home) = env::var("HOME") {
			return PathBuf::from(format!("{}{}", home, rest));
		}
	}
	PathBuf::from(path)
}
