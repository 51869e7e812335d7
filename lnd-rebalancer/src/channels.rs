// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The `channels` listing: every channel with balances, imbalance and
//! attempt history, pending opens appended, totals last.

use lnd_rebalancer_client::types::ChannelFilter;
use lnd_rebalancer_client::LightningNode;

use crate::io::history::HistoryStore;
use crate::rebalance::EngineError;

fn imbalance(local: i64, remote: i64) -> i64 {
	local - (local + remote) / 2
}

pub(crate) async fn list_channels(
	node: &dyn LightningNode, history: &HistoryStore,
) -> Result<(), EngineError> {
	let info = node.get_info().await.map_err(EngineError::Node)?;
	let mut channels =
		node.list_channels(ChannelFilter::default()).await.map_err(EngineError::Node)?;
	channels.sort_by_key(|channel| channel.chan_id);

	// Flg: initiator Local/Remote, Active/Inactive, our policy
	// Disabled/Enabled. Snd and Rcv are attempt counts, ok/err.
	println!(
		"{:<18} {:<3} {:>10} {:>9} {:>9} {:>10} {:>9} {:>9}  {:<66} {}",
		"ChanId", "Flg", "Capacity", "Local", "Remote", "Imbalance", "Snd", "Rcv", "PubKey",
		"Alias"
	);

	let mut sum_capacity = 0i64;
	let mut sum_local = 0i64;
	let mut sum_remote = 0i64;

	for channel in &channels {
		let node_info =
			node.get_node_info(&channel.remote_pubkey).await.map_err(EngineError::Node)?;
		let edge = node.get_chan_info(channel.chan_id).await.map_err(EngineError::Node)?;
		let disabled = edge
			.sending_policy(&channel.remote_pubkey)
			.map(|policy| policy.disabled)
			.unwrap_or(true);
		let stats = history.channel_stats(channel.chan_id).map_err(EngineError::Storage)?;

		println!(
			"{:<18} {}{}{} {:>10} {:>9} {:>9} {:>10} {:>4}/{:<4} {:>4}/{:<4}  {:<66} {}",
			channel.chan_id,
			if channel.initiator { 'L' } else { 'R' },
			if channel.active { 'A' } else { 'I' },
			if disabled { 'D' } else { 'E' },
			channel.capacity,
			channel.local_balance,
			channel.remote_balance,
			imbalance(channel.local_balance, channel.remote_balance),
			stats.snd_count - stats.snd_err_count,
			stats.snd_err_count,
			stats.rcv_count - stats.rcv_err_count,
			stats.rcv_err_count,
			channel.remote_pubkey,
			node_info.alias,
		);

		sum_capacity += channel.capacity;
		sum_local += channel.local_balance;
		sum_remote += channel.remote_balance;
	}

	let pending = node.pending_channels().await.map_err(EngineError::Node)?;
	for channel in &pending {
		let node_info =
			node.get_node_info(&channel.remote_node_pub).await.map_err(EngineError::Node)?;

		println!(
			"{:<18} {:<3} {:>10} {:>9} {:>9} {:>10} {:>9} {:>9}  {:<66} {}",
			"(pending)",
			"ooo",
			channel.capacity,
			channel.local_balance,
			channel.remote_balance,
			imbalance(channel.local_balance, channel.remote_balance),
			"",
			"",
			channel.remote_node_pub,
			node_info.alias,
		);

		sum_capacity += channel.capacity;
		sum_local += channel.local_balance;
		sum_remote += channel.remote_balance;
	}

	println!(
		"{:<18} {:<3} {:>10} {:>9} {:>9} {:>10} {:>9} {:>9}  {:<66} {}",
		channels.len() + pending.len(),
		"",
		sum_capacity,
		sum_local,
		sum_remote,
		imbalance(sum_local, sum_remote),
		"",
		"",
		info.identity_pubkey,
		info.alias,
	);

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{channel, edge, free_policy, MockNode};
	use lnd_rebalancer_client::types::{PendingChannel, RemoteNodeInfo};

	#[tokio::test]
	async fn test_listing_walks_all_channels() {
		let mut node = MockNode::new("our", 700_000);
		node.channels = vec![channel(2, "p2", 100_000, 900_000), channel(1, "p1", 900_000, 100_000)];
		node.add_edge(edge(1, "our", "p1", free_policy(), free_policy()));
		node.add_edge(edge(2, "our", "p2", free_policy(), free_policy()));
		node.node_infos.insert(
			"p1".to_string(),
			RemoteNodeInfo { alias: "peer-one".to_string(), total_capacity: 1, num_channels: 1 },
		);
		node.pending = vec![PendingChannel {
			remote_node_pub: "p3".to_string(),
			capacity: 50_000,
			local_balance: 50_000,
			remote_balance: 0,
		}];
		let history = HistoryStore::open_in_memory().unwrap();

		list_channels(&node, &history).await.unwrap();
	}

	#[tokio::test]
	async fn test_listing_fails_without_edge_data() {
		let mut node = MockNode::new("our", 700_000);
		node.channels = vec![channel(1, "p1", 900_000, 100_000)];
		let history = HistoryStore::open_in_memory().unwrap();

		assert!(list_channels(&node, &history).await.is_err());
	}
}
