// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Candidate selection for rebalancing.
//!
//! A channel qualifies as a source when both it and its peer relationship as
//! a whole are over-funded on our side, and as a destination in the mirrored
//! case; the per-peer aggregation keeps us from shuffling liquidity between
//! two channels of the same peer relationship through the back door.

use std::collections::{HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

use lnd_rebalancer_client::types::{Channel, ChannelFilter};
use lnd_rebalancer_client::LightningNode;

use crate::io::history::HistoryStore;
use crate::rebalance::exclusion::EdgeExclusions;
use crate::rebalance::{rebalance, EngineError};
use crate::util::config::{RebalanceConfig, RecommendConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PotentialLoop {
	pub src_chan: u64,
	pub src_node: String,
	pub dst_chan: u64,
	pub dst_node: String,
	pub amount: i64,
}

fn imbalance(local: i64, remote: i64) -> i64 {
	local - (local + remote) / 2
}

/// Enumerates rebalance candidates from the current channel state, best
/// (largest amount) first.
pub(crate) fn potential_loops(
	channels: &[Channel], config: &RecommendConfig,
) -> Vec<PotentialLoop> {
	let blacklist: HashSet<&str> =
		config.peer_node_blacklist.iter().map(String::as_str).collect();
	let src_targets: HashSet<u64> = config.src_chan_target.iter().copied().collect();
	let dst_targets: HashSet<u64> = config.dst_chan_target.iter().copied().collect();

	// Liquidity we can actually shift is bounded by the whole peer
	// relationship, not a single channel of it.
	let mut peer_balances: HashMap<&str, (i64, i64)> = HashMap::new();
	for channel in channels {
		let entry = peer_balances.entry(channel.remote_pubkey.as_str()).or_insert((0, 0));
		entry.0 += channel.local_balance;
		entry.1 += channel.remote_balance;
	}
	let aggregate_imbalance = |peer: &str| -> i64 {
		let (local, remote) = peer_balances.get(peer).copied().unwrap_or((0, 0));
		imbalance(local, remote)
	};

	let mut loops = Vec::new();
	for src in channels {
		if blacklist.contains(src.remote_pubkey.as_str()) {
			continue;
		}
		if !src_targets.is_empty() && !src_targets.contains(&src.chan_id) {
			continue;
		}

		for dst in channels {
			if blacklist.contains(dst.remote_pubkey.as_str()) {
				continue;
			}
			if !dst_targets.is_empty() && !dst_targets.contains(&dst.chan_id) {
				continue;
			}
			if src.chan_id == dst.chan_id {
				continue;
			}
			if src.remote_pubkey == dst.remote_pubkey {
				continue;
			}

			let src_aggregate = aggregate_imbalance(&src.remote_pubkey);
			if src_aggregate < config.min_imbalance {
				continue;
			}
			let dst_aggregate = aggregate_imbalance(&dst.remote_pubkey);
			if dst_aggregate > -config.min_imbalance {
				continue;
			}

			if imbalance(src.local_balance, src.remote_balance) < config.min_imbalance {
				continue;
			}
			if imbalance(dst.local_balance, dst.remote_balance) > -config.min_imbalance {
				continue;
			}

			let amount = src_aggregate.min(-dst_aggregate);
			if amount <= 0 {
				continue;
			}

			loops.push(PotentialLoop {
				src_chan: src.chan_id,
				src_node: src.remote_pubkey.clone(),
				dst_chan: dst.chan_id,
				dst_node: dst.remote_pubkey.clone(),
				amount,
			});
		}
	}

	loops.sort_by(|a, b| b.amount.cmp(&a.amount));
	loops
}

/// One recommender pass: pick the best candidate that is not suppressed by
/// recent history and either run it (`doit`) or print the equivalent command.
/// Returns false when no candidate remains.
pub(crate) async fn recommend(
	node: &dyn LightningNode, history: &HistoryStore, exclusions: &mut EdgeExclusions,
	rebalance_config: &RebalanceConfig, recommend_config: &RecommendConfig, doit: bool,
) -> Result<bool, EngineError> {
	let channels = node
		.list_channels(ChannelFilter { active_only: true, public_only: true })
		.await
		.map_err(EngineError::Node)?;

	let loops = potential_loops(&channels, recommend_config);
	log::debug!("{} candidate loops", loops.len());

	let horizon = unix_now() - recommend_config.retry_inhibit.as_secs() as i64;
	for candidate in &loops {
		let amount = candidate.amount.min(recommend_config.transfer_amount);
		let suppressed = history
			.recently_failed(
				candidate.src_chan,
				candidate.dst_chan,
				horizon,
				amount,
				rebalance_config.fee_limit_rate,
			)
			.map_err(EngineError::Storage)?;
		if suppressed {
			log::debug!(
				"skipping {} -> {}, failed recently",
				candidate.src_chan,
				candidate.dst_chan
			);
			continue;
		}

		if doit {
			rebalance(
				node,
				history,
				exclusions,
				rebalance_config,
				amount,
				candidate.src_chan,
				candidate.dst_chan,
			)
			.await?;
		} else {
			println!("rebalance -a {} -s {} -d {}", amount, candidate.src_chan, candidate.dst_chan);
		}
		return Ok(true);
	}

	println!("no loops recommended");
	Ok(false)
}

/// Drives the recommender until it finds nothing left to do.
pub(crate) async fn autobalance(
	node: &dyn LightningNode, history: &HistoryStore, exclusions: &mut EdgeExclusions,
	rebalance_config: &RebalanceConfig, recommend_config: &RecommendConfig,
) -> Result<(), EngineError> {
	while recommend(node, history, exclusions, rebalance_config, recommend_config, true).await? {}
	Ok(())
}

fn unix_now() -> i64 {
	SystemTime::now().duration_since(UNIX_EPOCH).expect("Time must be > 1970").as_secs() as i64
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::io::history::{LoopAttempt, LoopOutcome};
	use crate::testing::{channel, edge, fee_policy, free_policy, MockNode};
	use lnd_rebalancer_client::types::{Hop, PaymentResult, Route};

	fn recommend_config() -> RecommendConfig {
		RecommendConfig {
			min_imbalance: 1000,
			transfer_amount: 10_000,
			retry_inhibit: std::time::Duration::from_secs(3600),
			src_chan_target: Vec::new(),
			dst_chan_target: Vec::new(),
			peer_node_blacklist: Vec::new(),
		}
	}

	fn rebalance_config() -> RebalanceConfig {
		RebalanceConfig { final_cltv_delta: 144, fee_limit_rate: 0.0005 }
	}

	#[test]
	fn test_emits_one_loop_for_an_imbalanced_pair() {
		let channels = vec![channel(1, "p1", 900_000, 100_000), channel(2, "p2", 100_000, 900_000)];
		let loops = potential_loops(&channels, &recommend_config());
		assert_eq!(
			loops,
			vec![PotentialLoop {
				src_chan: 1,
				src_node: "p1".to_string(),
				dst_chan: 2,
				dst_node: "p2".to_string(),
				amount: 400_000,
			}]
		);
	}

	#[test]
	fn test_amount_is_the_smaller_side() {
		let channels = vec![channel(1, "p1", 900_000, 100_000), channel(2, "p2", 400_000, 600_000)];
		let loops = potential_loops(&channels, &recommend_config());
		assert_eq!(loops.len(), 1);
		// src surplus 400_000, dst deficit 100_000.
		assert_eq!(loops[0].amount, 100_000);
	}

	#[test]
	fn test_blacklisted_peers_are_skipped() {
		let channels = vec![channel(1, "p1", 900_000, 100_000), channel(2, "p2", 100_000, 900_000)];
		let mut config = recommend_config();
		config.peer_node_blacklist = vec!["p1".to_string()];
		assert!(potential_loops(&channels, &config).is_empty());

		config.peer_node_blacklist = vec!["p2".to_string()];
		assert!(potential_loops(&channels, &config).is_empty());
	}

	#[test]
	fn test_target_lists_restrict_sides() {
		let channels = vec![
			channel(1, "p1", 900_000, 100_000),
			channel(2, "p2", 100_000, 900_000),
			channel(3, "p3", 800_000, 200_000),
		];

		let mut config = recommend_config();
		config.src_chan_target = vec![3];
		let loops = potential_loops(&channels, &config);
		assert_eq!(loops.len(), 1);
		assert_eq!(loops[0].src_chan, 3);

		let mut config = recommend_config();
		config.dst_chan_target = vec![9];
		assert!(potential_loops(&channels, &config).is_empty());
	}

	#[test]
	fn test_same_peer_never_pairs_with_itself() {
		// Both channels hang off p1; per-channel imbalances are opposite,
		// but a loop would just move liquidity within the relationship.
		let channels = vec![channel(1, "p1", 900_000, 100_000), channel(2, "p1", 100_000, 900_000)];
		assert!(potential_loops(&channels, &recommend_config()).is_empty());
	}

	#[test]
	fn test_aggregate_imbalance_vetoes_a_balanced_relationship() {
		// p1's relationship nets out to zero even though channel 1 alone
		// looks over-funded.
		let channels = vec![
			channel(1, "p1", 600_000, 0),
			channel(3, "p1", 0, 600_000),
			channel(2, "p2", 100_000, 900_000),
		];
		assert!(potential_loops(&channels, &recommend_config()).is_empty());
	}

	#[test]
	fn test_candidates_sort_by_amount_descending() {
		let channels = vec![
			channel(1, "p1", 900_000, 100_000),
			channel(2, "p2", 100_000, 900_000),
			channel(3, "p3", 700_000, 300_000),
			channel(4, "p4", 0, 600_000),
		];
		let loops = potential_loops(&channels, &recommend_config());
		let amounts: Vec<i64> = loops.iter().map(|l| l.amount).collect();
		let mut sorted = amounts.clone();
		sorted.sort_by(|a, b| b.cmp(a));
		assert_eq!(amounts, sorted);
		assert_eq!(loops[0].amount, 400_000);
	}

	#[test]
	fn test_balanced_channels_emit_nothing_even_at_zero_threshold() {
		let channels = vec![channel(1, "p1", 500_000, 500_000), channel(2, "p2", 500_000, 500_000)];
		let mut config = recommend_config();
		config.min_imbalance = 0;
		assert!(potential_loops(&channels, &config).is_empty());
	}

	fn scenario_node() -> MockNode {
		let mut node = MockNode::new("our", 700_000);
		node.channels =
			vec![channel(1, "p1", 900_000, 100_000), channel(2, "p2", 100_000, 900_000)];
		node.add_edge(edge(1, "our", "p1", free_policy(), free_policy()));
		node.add_edge(edge(2, "our", "p2", free_policy(), free_policy()));
		node.add_edge(edge(101, "p1", "m", fee_policy(), fee_policy()));
		node.add_edge(edge(102, "m", "p2", fee_policy(), fee_policy()));
		node
	}

	fn interior_route() -> Route {
		Route {
			hops: vec![
				Hop { chan_id: 101, pub_key: "m".to_string(), ..Default::default() },
				Hop { chan_id: 102, pub_key: "p2".to_string(), ..Default::default() },
			],
			..Default::default()
		}
	}

	#[tokio::test]
	async fn test_doit_caps_the_amount_and_records_success() {
		let node = scenario_node();
		node.script_routes(Ok(vec![interior_route()]));
		node.script_send(Ok(PaymentResult::Settled { preimage: [1u8; 32] }));
		let history = HistoryStore::open_in_memory().unwrap();
		let mut exclusions = EdgeExclusions::new();

		let acted = recommend(
			&node,
			&history,
			&mut exclusions,
			&rebalance_config(),
			&recommend_config(),
			true,
		)
		.await
		.unwrap();
		assert!(acted);

		// The 400_000 sat surplus is capped to the configured transfer
		// amount and dispatched at exactly that figure.
		let queries = node.query_log.lock().unwrap();
		assert_eq!(queries.len(), 1);
		assert_eq!(queries[0].amt, 10_000);

		let stats = history.channel_stats(1).unwrap();
		assert_eq!((stats.snd_count, stats.snd_sats), (1, 10_000));
	}

	#[tokio::test]
	async fn test_dry_run_only_prints() {
		let node = scenario_node();
		let history = HistoryStore::open_in_memory().unwrap();
		let mut exclusions = EdgeExclusions::new();

		let acted = recommend(
			&node,
			&history,
			&mut exclusions,
			&rebalance_config(),
			&recommend_config(),
			false,
		)
		.await
		.unwrap();
		assert!(acted);
		assert!(node.query_log.lock().unwrap().is_empty());
		assert!(node.send_log.lock().unwrap().is_empty());
		assert_eq!(history.channel_stats(1).unwrap().snd_count, 0);
	}

	#[tokio::test]
	async fn test_recent_failure_suppresses_the_candidate() {
		let node = scenario_node();
		let history = HistoryStore::open_in_memory().unwrap();
		// A failure 60 seconds ago at a smaller amount and a higher fee
		// ceiling subsumes the would-be attempt.
		history
			.record(&LoopAttempt {
				tstamp: unix_now() - 60,
				src_chan: 1,
				src_node: "p1".to_string(),
				dst_chan: 2,
				dst_node: "p2".to_string(),
				amount: 5000,
				fee_limit_rate: 0.001,
				outcome: LoopOutcome::Failure,
			})
			.unwrap();
		let mut exclusions = EdgeExclusions::new();

		let acted = recommend(
			&node,
			&history,
			&mut exclusions,
			&rebalance_config(),
			&recommend_config(),
			true,
		)
		.await
		.unwrap();
		assert!(!acted);
		assert!(node.query_log.lock().unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_no_channels_means_no_recommendation() {
		let node = MockNode::new("our", 700_000);
		let history = HistoryStore::open_in_memory().unwrap();
		let mut exclusions = EdgeExclusions::new();

		let acted = recommend(
			&node,
			&history,
			&mut exclusions,
			&rebalance_config(),
			&recommend_config(),
			true,
		)
		.await
		.unwrap();
		assert!(!acted);
	}

	#[tokio::test]
	async fn test_autobalance_runs_until_no_candidate_remains() {
		let node = scenario_node();
		// First pass settles; the second finds no route, which writes the
		// failure row that suppresses the candidate on the third pass.
		node.script_routes(Ok(vec![interior_route()]));
		node.script_send(Ok(PaymentResult::Settled { preimage: [1u8; 32] }));
		let history = HistoryStore::open_in_memory().unwrap();
		let mut exclusions = EdgeExclusions::new();

		autobalance(&node, &history, &mut exclusions, &rebalance_config(), &recommend_config())
			.await
			.unwrap();

		assert_eq!(node.query_log.lock().unwrap().len(), 2);
		let stats = history.channel_stats(1).unwrap();
		assert_eq!((stats.snd_count, stats.snd_err_count), (2, 1));
	}
}
