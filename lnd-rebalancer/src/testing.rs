//! A scripted in-memory [`LightningNode`] for tests.
//!
//! Fixtures (channels, edges, node infos) are plain fields; `query_routes`
//! and `send_to_route` pop pre-scripted responses and log the requests they
//! saw so tests can assert on the exact traffic.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use lnd_rebalancer_client::types::{
	AddInvoiceResponse, Channel, ChannelEdge, ChannelFilter, LocalNodeInfo, PaymentResult,
	PendingChannel, QueryRoutesRequest, RemoteNodeInfo, Route, RoutingPolicy,
};
use lnd_rebalancer_client::{LightningNode, NodeClientError, NodeErrorCode};

pub(crate) struct MockNode {
	pub info: LocalNodeInfo,
	pub channels: Vec<Channel>,
	pub pending: Vec<PendingChannel>,
	pub edges: HashMap<u64, ChannelEdge>,
	pub node_infos: HashMap<String, RemoteNodeInfo>,
	pub route_responses: Mutex<VecDeque<Result<Vec<Route>, NodeClientError>>>,
	pub query_log: Mutex<Vec<QueryRoutesRequest>>,
	pub send_responses: Mutex<VecDeque<Result<PaymentResult, NodeClientError>>>,
	pub send_log: Mutex<Vec<([u8; 32], Route)>>,
	pub invoice_log: Mutex<Vec<(String, i64)>>,
}

impl MockNode {
	pub fn new(our_pub: &str, block_height: u32) -> Self {
		MockNode {
			info: LocalNodeInfo {
				identity_pubkey: our_pub.to_string(),
				alias: "test-node".to_string(),
				block_height,
			},
			channels: Vec::new(),
			pending: Vec::new(),
			edges: HashMap::new(),
			node_infos: HashMap::new(),
			route_responses: Mutex::new(VecDeque::new()),
			query_log: Mutex::new(Vec::new()),
			send_responses: Mutex::new(VecDeque::new()),
			send_log: Mutex::new(Vec::new()),
			invoice_log: Mutex::new(Vec::new()),
		}
	}

	pub fn add_edge(&mut self, edge: ChannelEdge) {
		self.edges.insert(edge.channel_id, edge);
	}

	pub fn script_routes(&self, response: Result<Vec<Route>, NodeClientError>) {
		self.route_responses.lock().unwrap().push_back(response);
	}

	pub fn script_send(&self, response: Result<PaymentResult, NodeClientError>) {
		self.send_responses.lock().unwrap().push_back(response);
	}
}

#[async_trait]
impl LightningNode for MockNode {
	async fn get_info(&self) -> Result<LocalNodeInfo, NodeClientError> {
		Ok(self.info.clone())
	}

	async fn list_channels(&self, filter: ChannelFilter) -> Result<Vec<Channel>, NodeClientError> {
		Ok(self
			.channels
			.iter()
			.filter(|channel| !filter.active_only || channel.active)
			.cloned()
			.collect())
	}

	async fn pending_channels(&self) -> Result<Vec<PendingChannel>, NodeClientError> {
		Ok(self.pending.clone())
	}

	async fn get_chan_info(&self, chan_id: u64) -> Result<ChannelEdge, NodeClientError> {
		self.edges.get(&chan_id).cloned().ok_or_else(|| {
			NodeClientError::new(NodeErrorCode::Rpc, format!("unknown channel {}", chan_id))
		})
	}

	async fn get_node_info(&self, pub_key: &str) -> Result<RemoteNodeInfo, NodeClientError> {
		Ok(self.node_infos.get(pub_key).cloned().unwrap_or(RemoteNodeInfo {
			alias: String::new(),
			total_capacity: 0,
			num_channels: 0,
		}))
	}

	async fn query_routes(
		&self, request: QueryRoutesRequest,
	) -> Result<Vec<Route>, NodeClientError> {
		self.query_log.lock().unwrap().push(request);
		self.route_responses.lock().unwrap().pop_front().unwrap_or_else(|| {
			Err(NodeClientError::new(
				NodeErrorCode::NoRoute,
				"unable to find a path to destination",
			))
		})
	}

	async fn add_invoice(
		&self, memo: String, preimage: [u8; 32], value_sat: i64,
	) -> Result<AddInvoiceResponse, NodeClientError> {
		self.invoice_log.lock().unwrap().push((memo, value_sat));
		// Not a real hash; just a deterministic function of the preimage.
		let mut payment_hash = preimage;
		payment_hash.reverse();
		Ok(AddInvoiceResponse { payment_hash })
	}

	async fn send_to_route(
		&self, payment_hash: [u8; 32], route: Route,
	) -> Result<PaymentResult, NodeClientError> {
		self.send_log.lock().unwrap().push((payment_hash, route));
		self.send_responses.lock().unwrap().pop_front().unwrap_or_else(|| {
			Err(NodeClientError::new(NodeErrorCode::Transport, "no scripted send response"))
		})
	}
}

pub(crate) fn free_policy() -> RoutingPolicy {
	RoutingPolicy { fee_base_msat: 0, fee_rate_milli_msat: 0, time_lock_delta: 40, disabled: false }
}

pub(crate) fn fee_policy() -> RoutingPolicy {
	RoutingPolicy {
		fee_base_msat: 1000,
		fee_rate_milli_msat: 1,
		time_lock_delta: 40,
		disabled: false,
	}
}

pub(crate) fn edge(
	channel_id: u64, node1: &str, node2: &str, node1_policy: RoutingPolicy,
	node2_policy: RoutingPolicy,
) -> ChannelEdge {
	ChannelEdge {
		channel_id,
		capacity: 1_000_000,
		node1_pub: node1.to_string(),
		node2_pub: node2.to_string(),
		node1_policy: Some(node1_policy),
		node2_policy: Some(node2_policy),
	}
}

pub(crate) fn channel(chan_id: u64, peer: &str, local: i64, remote: i64) -> Channel {
	Channel {
		chan_id,
		remote_pubkey: peer.to_string(),
		capacity: local + remote,
		local_balance: local,
		remote_balance: remote,
		active: true,
		initiator: true,
	}
}
