// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Domain types for the node facade.
//!
//! These types are separate from the REST wire structs to decouple callers
//! from the gateway's encoding quirks (string integers, base64 bytes). All
//! amounts are in satoshis unless a field name carries the `_msat` suffix;
//! node identities are lowercase hex public keys.

/// The local node, as reported by `get_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalNodeInfo {
	/// Our own public key.
	pub identity_pubkey: String,
	/// Display alias, empty if unset.
	pub alias: String,
	/// The node's current best block height.
	pub block_height: u32,
}

/// One of our own channels, as seen by the local node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
	pub chan_id: u64,
	/// Public key of the peer on the far end.
	pub remote_pubkey: String,
	pub capacity: i64,
	pub local_balance: i64,
	pub remote_balance: i64,
	/// Whether the peer is currently connected and the channel usable.
	pub active: bool,
	/// Whether we funded (and thus pay the commitment fees for) the channel.
	pub initiator: bool,
}

/// A channel still waiting for its funding transaction to confirm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChannel {
	pub remote_node_pub: String,
	pub capacity: i64,
	pub local_balance: i64,
	pub remote_balance: i64,
}

/// Filter for `list_channels`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelFilter {
	pub active_only: bool,
	pub public_only: bool,
}

/// A channel as described by the public graph, with both directed policies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEdge {
	pub channel_id: u64,
	pub capacity: i64,
	pub node1_pub: String,
	pub node2_pub: String,
	/// Forwarding policy advertised by `node1_pub`, if it has one.
	pub node1_policy: Option<RoutingPolicy>,
	/// Forwarding policy advertised by `node2_pub`, if it has one.
	pub node2_policy: Option<RoutingPolicy>,
}

impl ChannelEdge {
	/// Returns the endpoint of this channel that is not `pub_key`.
	pub fn peer_of(&self, pub_key: &str) -> &str {
		if self.node1_pub == pub_key {
			&self.node2_pub
		} else {
			&self.node1_pub
		}
	}

	/// Returns the policy governing a payment forwarded across this channel
	/// *into* `receiver_pub`, i.e. the policy advertised by the opposite
	/// endpoint (the sender owns the outbound direction).
	pub fn sending_policy(&self, receiver_pub: &str) -> Option<&RoutingPolicy> {
		if self.node1_pub == receiver_pub {
			self.node2_policy.as_ref()
		} else {
			self.node1_policy.as_ref()
		}
	}
}

/// One directed forwarding policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingPolicy {
	/// Flat fee in millisatoshis.
	pub fee_base_msat: i64,
	/// Proportional fee in millionths per satoshi forwarded.
	pub fee_rate_milli_msat: i64,
	/// Blocks of expiry slack this hop requires.
	pub time_lock_delta: u32,
	pub disabled: bool,
}

/// A remote node, as reported by `get_node_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteNodeInfo {
	pub alias: String,
	/// Sum of the capacities of the node's public channels.
	pub total_capacity: i64,
	pub num_channels: u32,
}

/// One outbound step along a route. The hop crosses `chan_id` and delivers to
/// `pub_key`; fee and expiry fields are only meaningful once a route has been
/// priced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hop {
	pub chan_id: u64,
	pub chan_capacity: i64,
	pub amt_to_forward: i64,
	pub amt_to_forward_msat: i64,
	pub fee: i64,
	pub fee_msat: i64,
	/// Absolute block height at which this hop's HTLC expires.
	pub expiry: u32,
	/// The node this hop delivers to.
	pub pub_key: String,
}

/// An ordered hop sequence plus totals. Totals are exact sums of the per-hop
/// contributions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Route {
	pub total_time_lock: u32,
	pub total_fees: i64,
	pub total_amt: i64,
	pub total_fees_msat: i64,
	pub total_amt_msat: i64,
	pub hops: Vec<Hop>,
}

/// A directed graph edge, used to exclude known-bad directions from
/// pathfinding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeLocator {
	pub channel_id: u64,
	/// False selects the `node1 -> node2` direction, true the opposite.
	pub direction_reverse: bool,
}

/// Constraints for `query_routes`. Paths run from `source_pub_key` to
/// `pub_key`; nodes and directed edges in the ignore sets are never used.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryRoutesRequest {
	pub pub_key: String,
	pub amt: i64,
	/// Hard fee ceiling in satoshis.
	pub fee_limit_fixed: i64,
	pub source_pub_key: String,
	pub final_cltv_delta: u32,
	pub ignored_edges: Vec<EdgeLocator>,
	pub ignored_nodes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddInvoiceResponse {
	pub payment_hash: [u8; 32],
}

/// Terminal result of a `send_to_route` dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentResult {
	/// The payment settled; the preimage proves it.
	Settled { preimage: [u8; 32] },
	/// A node along the route (or the local node) failed the payment.
	Failed(PaymentFailure),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentFailure {
	/// Index of the node that reported the failure: 0 is the local node,
	/// otherwise the 1-indexed hop whose destination reported.
	pub failure_source_index: u32,
	/// Wire failure code name, for logging.
	pub code: String,
}
