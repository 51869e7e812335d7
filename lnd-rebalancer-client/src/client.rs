// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! [`LightningNode`] implementation over LND's REST gateway.
//!
//! Authentication is a hex macaroon in the `Grpc-Metadata-macaroon` header;
//! transport security pins the node's self-signed TLS certificate. The wire
//! structs in this module mirror the gateway's JSON exactly and are converted
//! to the domain types in [`crate::types`] at the edge.

use async_trait::async_trait;
use hex::FromHex;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Certificate, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{NodeClientError, NodeErrorCode};
use crate::serde_utils::{b64_bytes, string_i64, string_u64};
use crate::types::{
	AddInvoiceResponse, Channel, ChannelEdge, ChannelFilter, Hop, LocalNodeInfo, PaymentFailure,
	PaymentResult, PendingChannel, QueryRoutesRequest, RemoteNodeInfo, Route, RoutingPolicy,
};
use crate::LightningNode;

const MACAROON_HEADER: &str = "Grpc-Metadata-macaroon";

pub struct LndRestClient {
	base_url: String,
	client: reqwest::Client,
}

impl LndRestClient {
	/// Creates a client for the gateway at `base_url` (e.g.
	/// `https://localhost:8080`), authenticating with the hex-encoded
	/// macaroon and trusting only the given certificate.
	pub fn new(
		base_url: String, macaroon_hex: String, tls_cert_pem: &[u8],
	) -> Result<Self, NodeClientError> {
		let certificate = Certificate::from_pem(tls_cert_pem).map_err(|e| {
			NodeClientError::new(NodeErrorCode::Transport, format!("invalid TLS certificate: {}", e))
		})?;

		let mut headers = HeaderMap::new();
		let macaroon_value = HeaderValue::from_str(&macaroon_hex).map_err(|e| {
			NodeClientError::new(NodeErrorCode::Rpc, format!("invalid macaroon: {}", e))
		})?;
		headers.insert(MACAROON_HEADER, macaroon_value);

		let client = reqwest::Client::builder()
			.add_root_certificate(certificate)
			.default_headers(headers)
			.build()
			.map_err(|e| {
				NodeClientError::new(
					NodeErrorCode::Transport,
					format!("failed to build http client: {}", e),
				)
			})?;

		Ok(LndRestClient { base_url: base_url.trim_end_matches('/').to_string(), client })
	}

	async fn get<T: DeserializeOwned>(
		&self, path: &str, query: &[(&str, String)],
	) -> Result<T, NodeClientError> {
		let url = format!("{}{}", self.base_url, path);
		let response =
			self.client.get(&url).query(query).send().await.map_err(transport_err)?;
		decode_response(response).await
	}

	async fn post<B: Serialize, T: DeserializeOwned>(
		&self, path: &str, body: &B,
	) -> Result<T, NodeClientError> {
		let url = format!("{}{}", self.base_url, path);
		let response =
			self.client.post(&url).json(body).send().await.map_err(transport_err)?;
		decode_response(response).await
	}
}

fn transport_err(e: reqwest::Error) -> NodeClientError {
	NodeClientError::new(NodeErrorCode::Transport, e.to_string())
}

async fn decode_response<T: DeserializeOwned>(
	response: reqwest::Response,
) -> Result<T, NodeClientError> {
	let status = response.status();
	let bytes = response.bytes().await.map_err(transport_err)?;

	if status.is_success() {
		return serde_json::from_slice(&bytes).map_err(|e| {
			NodeClientError::new(NodeErrorCode::Rpc, format!("malformed response: {}", e))
		});
	}

	Err(error_from_body(status, &bytes))
}

fn error_from_body(status: StatusCode, body: &[u8]) -> NodeClientError {
	let wire: RpcErrorWire = serde_json::from_slice(body).unwrap_or_default();
	let message = if !wire.message.is_empty() {
		wire.message
	} else if !wire.error.is_empty() {
		wire.error
	} else {
		format!("http status {}", status)
	};

	// The gateway reports pathfinding exhaustion as a plain application
	// error; recognize it so callers can distinguish "no route" from an
	// actual RPC failure.
	if message.contains("unable to find a path") {
		NodeClientError::new(NodeErrorCode::NoRoute, message)
	} else {
		NodeClientError::new(NodeErrorCode::Rpc, message)
	}
}

#[async_trait]
impl LightningNode for LndRestClient {
	async fn get_info(&self) -> Result<LocalNodeInfo, NodeClientError> {
		let wire: GetInfoWire = self.get("/v1/getinfo", &[]).await?;
		Ok(LocalNodeInfo {
			identity_pubkey: wire.identity_pubkey,
			alias: wire.alias,
			block_height: wire.block_height,
		})
	}

	async fn list_channels(&self, filter: ChannelFilter) -> Result<Vec<Channel>, NodeClientError> {
		let query = [
			("active_only", filter.active_only.to_string()),
			("public_only", filter.public_only.to_string()),
		];
		let wire: ListChannelsWire = self.get("/v1/channels", &query).await?;
		Ok(wire.channels.into_iter().map(Channel::from).collect())
	}

	async fn pending_channels(&self) -> Result<Vec<PendingChannel>, NodeClientError> {
		let wire: PendingChannelsWire = self.get("/v1/channels/pending", &[]).await?;
		Ok(wire
			.pending_open_channels
			.into_iter()
			.map(|pending| PendingChannel {
				remote_node_pub: pending.channel.remote_node_pub,
				capacity: pending.channel.capacity,
				local_balance: pending.channel.local_balance,
				remote_balance: pending.channel.remote_balance,
			})
			.collect())
	}

	async fn get_chan_info(&self, chan_id: u64) -> Result<ChannelEdge, NodeClientError> {
		let wire: ChannelEdgeWire =
			self.get(&format!("/v1/graph/edge/{}", chan_id), &[]).await?;
		Ok(ChannelEdge::from(wire))
	}

	async fn get_node_info(&self, pub_key: &str) -> Result<RemoteNodeInfo, NodeClientError> {
		let wire: NodeInfoWire = self.get(&format!("/v1/graph/node/{}", pub_key), &[]).await?;
		Ok(RemoteNodeInfo {
			alias: wire.node.map(|n| n.alias).unwrap_or_default(),
			total_capacity: wire.total_capacity,
			num_channels: wire.num_channels,
		})
	}

	async fn query_routes(
		&self, request: QueryRoutesRequest,
	) -> Result<Vec<Route>, NodeClientError> {
		let ignored_nodes = request
			.ignored_nodes
			.iter()
			.map(|pub_key| {
				Vec::<u8>::from_hex(pub_key).map_err(|e| {
					NodeClientError::new(
						NodeErrorCode::Rpc,
						format!("invalid ignored node pubkey {}: {}", pub_key, e),
					)
				})
			})
			.collect::<Result<Vec<_>, _>>()?;

		let wire_request = QueryRoutesWire {
			pub_key: request.pub_key,
			amt: request.amt,
			fee_limit: FeeLimitWire { fixed: request.fee_limit_fixed },
			source_pub_key: request.source_pub_key,
			final_cltv_delta: request.final_cltv_delta,
			ignored_nodes: ignored_nodes
				.into_iter()
				.map(|bytes| B64Bytes { bytes })
				.collect(),
			ignored_edges: request
				.ignored_edges
				.iter()
				.map(|edge| EdgeLocatorWire {
					channel_id: edge.channel_id,
					direction_reverse: edge.direction_reverse,
				})
				.collect(),
		};

		let wire: QueryRoutesResponseWire =
			self.post("/v1/graph/routes", &wire_request).await?;
		Ok(wire.routes.into_iter().map(Route::from).collect())
	}

	async fn add_invoice(
		&self, memo: String, preimage: [u8; 32], value_sat: i64,
	) -> Result<AddInvoiceResponse, NodeClientError> {
		let wire_request =
			InvoiceWire { memo, r_preimage: preimage.to_vec(), value: value_sat };
		let wire: AddInvoiceWire = self.post("/v1/invoices", &wire_request).await?;

		let payment_hash: [u8; 32] = wire.r_hash.try_into().map_err(|hash: Vec<u8>| {
			NodeClientError::new(
				NodeErrorCode::Rpc,
				format!("unexpected payment hash length {}", hash.len()),
			)
		})?;
		Ok(AddInvoiceResponse { payment_hash })
	}

	async fn send_to_route(
		&self, payment_hash: [u8; 32], route: Route,
	) -> Result<PaymentResult, NodeClientError> {
		let wire_request = SendToRouteWire {
			payment_hash: payment_hash.to_vec(),
			route: RouteWire::from(&route),
		};
		let wire: HtlcAttemptWire = self.post("/v2/router/route/send", &wire_request).await?;
		payment_result_from_wire(wire)
	}
}

fn payment_result_from_wire(wire: HtlcAttemptWire) -> Result<PaymentResult, NodeClientError> {
	if let Some(preimage) = wire.preimage.filter(|p| !p.is_empty()) {
		let preimage: [u8; 32] = preimage.try_into().map_err(|p: Vec<u8>| {
			NodeClientError::new(
				NodeErrorCode::Rpc,
				format!("unexpected preimage length {}", p.len()),
			)
		})?;
		return Ok(PaymentResult::Settled { preimage });
	}

	match wire.failure {
		Some(failure) => Ok(PaymentResult::Failed(PaymentFailure {
			failure_source_index: failure.failure_source_index,
			code: failure.code,
		})),
		None => Err(NodeClientError::new(
			NodeErrorCode::Rpc,
			format!("attempt neither settled nor failed (status {})", wire.status),
		)),
	}
}

// --- wire structs ---

#[derive(Debug, Default, Deserialize)]
struct RpcErrorWire {
	#[serde(default)]
	error: String,
	#[serde(default)]
	message: String,
}

#[derive(Debug, Deserialize)]
struct GetInfoWire {
	identity_pubkey: String,
	#[serde(default)]
	alias: String,
	#[serde(default)]
	block_height: u32,
}

#[derive(Debug, Default, Deserialize)]
struct ListChannelsWire {
	#[serde(default)]
	channels: Vec<ChannelWire>,
}

#[derive(Debug, Deserialize)]
struct ChannelWire {
	#[serde(default, with = "string_u64")]
	chan_id: u64,
	remote_pubkey: String,
	#[serde(default, with = "string_i64")]
	capacity: i64,
	#[serde(default, with = "string_i64")]
	local_balance: i64,
	#[serde(default, with = "string_i64")]
	remote_balance: i64,
	#[serde(default)]
	active: bool,
	#[serde(default)]
	initiator: bool,
}

impl From<ChannelWire> for Channel {
	fn from(wire: ChannelWire) -> Self {
		Channel {
			chan_id: wire.chan_id,
			remote_pubkey: wire.remote_pubkey,
			capacity: wire.capacity,
			local_balance: wire.local_balance,
			remote_balance: wire.remote_balance,
			active: wire.active,
			initiator: wire.initiator,
		}
	}
}

#[derive(Debug, Default, Deserialize)]
struct PendingChannelsWire {
	#[serde(default)]
	pending_open_channels: Vec<PendingOpenWire>,
}

#[derive(Debug, Deserialize)]
struct PendingOpenWire {
	channel: PendingChannelWire,
}

#[derive(Debug, Deserialize)]
struct PendingChannelWire {
	remote_node_pub: String,
	#[serde(default, with = "string_i64")]
	capacity: i64,
	#[serde(default, with = "string_i64")]
	local_balance: i64,
	#[serde(default, with = "string_i64")]
	remote_balance: i64,
}

#[derive(Debug, Deserialize)]
struct ChannelEdgeWire {
	#[serde(default, with = "string_u64")]
	channel_id: u64,
	#[serde(default, with = "string_i64")]
	capacity: i64,
	node1_pub: String,
	node2_pub: String,
	#[serde(default)]
	node1_policy: Option<RoutingPolicyWire>,
	#[serde(default)]
	node2_policy: Option<RoutingPolicyWire>,
}

impl From<ChannelEdgeWire> for ChannelEdge {
	fn from(wire: ChannelEdgeWire) -> Self {
		ChannelEdge {
			channel_id: wire.channel_id,
			capacity: wire.capacity,
			node1_pub: wire.node1_pub,
			node2_pub: wire.node2_pub,
			node1_policy: wire.node1_policy.map(RoutingPolicy::from),
			node2_policy: wire.node2_policy.map(RoutingPolicy::from),
		}
	}
}

#[derive(Debug, Deserialize)]
struct RoutingPolicyWire {
	#[serde(default, with = "string_i64")]
	fee_base_msat: i64,
	#[serde(default, with = "string_i64")]
	fee_rate_milli_msat: i64,
	#[serde(default)]
	time_lock_delta: u32,
	#[serde(default)]
	disabled: bool,
}

impl From<RoutingPolicyWire> for RoutingPolicy {
	fn from(wire: RoutingPolicyWire) -> Self {
		RoutingPolicy {
			fee_base_msat: wire.fee_base_msat,
			fee_rate_milli_msat: wire.fee_rate_milli_msat,
			time_lock_delta: wire.time_lock_delta,
			disabled: wire.disabled,
		}
	}
}

#[derive(Debug, Deserialize)]
struct NodeInfoWire {
	#[serde(default)]
	node: Option<LightningNodeWire>,
	#[serde(default)]
	num_channels: u32,
	#[serde(default, with = "string_i64")]
	total_capacity: i64,
}

#[derive(Debug, Deserialize)]
struct LightningNodeWire {
	#[serde(default)]
	alias: String,
}

#[derive(Debug, Serialize)]
struct QueryRoutesWire {
	pub_key: String,
	#[serde(with = "string_i64")]
	amt: i64,
	fee_limit: FeeLimitWire,
	source_pub_key: String,
	final_cltv_delta: u32,
	ignored_nodes: Vec<B64Bytes>,
	ignored_edges: Vec<EdgeLocatorWire>,
}

#[derive(Debug, Serialize)]
struct FeeLimitWire {
	#[serde(with = "string_i64")]
	fixed: i64,
}

#[derive(Debug, Serialize)]
struct EdgeLocatorWire {
	#[serde(with = "string_u64")]
	channel_id: u64,
	direction_reverse: bool,
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
struct B64Bytes {
	#[serde(with = "b64_bytes")]
	bytes: Vec<u8>,
}

#[derive(Debug, Default, Deserialize)]
struct QueryRoutesResponseWire {
	#[serde(default)]
	routes: Vec<RouteWire>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RouteWire {
	#[serde(default)]
	total_time_lock: u32,
	#[serde(default, with = "string_i64")]
	total_fees: i64,
	#[serde(default, with = "string_i64")]
	total_amt: i64,
	#[serde(default, with = "string_i64")]
	total_fees_msat: i64,
	#[serde(default, with = "string_i64")]
	total_amt_msat: i64,
	#[serde(default)]
	hops: Vec<HopWire>,
}

impl From<RouteWire> for Route {
	fn from(wire: RouteWire) -> Self {
		Route {
			total_time_lock: wire.total_time_lock,
			total_fees: wire.total_fees,
			total_amt: wire.total_amt,
			total_fees_msat: wire.total_fees_msat,
			total_amt_msat: wire.total_amt_msat,
			hops: wire.hops.into_iter().map(Hop::from).collect(),
		}
	}
}

impl From<&Route> for RouteWire {
	fn from(route: &Route) -> Self {
		RouteWire {
			total_time_lock: route.total_time_lock,
			total_fees: route.total_fees,
			total_amt: route.total_amt,
			total_fees_msat: route.total_fees_msat,
			total_amt_msat: route.total_amt_msat,
			hops: route.hops.iter().map(HopWire::from).collect(),
		}
	}
}

#[derive(Debug, Serialize, Deserialize)]
struct HopWire {
	#[serde(default, with = "string_u64")]
	chan_id: u64,
	#[serde(default, with = "string_i64")]
	chan_capacity: i64,
	#[serde(default, with = "string_i64")]
	amt_to_forward: i64,
	#[serde(default, with = "string_i64")]
	fee: i64,
	#[serde(default)]
	expiry: u32,
	#[serde(default, with = "string_i64")]
	amt_to_forward_msat: i64,
	#[serde(default, with = "string_i64")]
	fee_msat: i64,
	#[serde(default)]
	pub_key: String,
}

impl From<HopWire> for Hop {
	fn from(wire: HopWire) -> Self {
		Hop {
			chan_id: wire.chan_id,
			chan_capacity: wire.chan_capacity,
			amt_to_forward: wire.amt_to_forward,
			amt_to_forward_msat: wire.amt_to_forward_msat,
			fee: wire.fee,
			fee_msat: wire.fee_msat,
			expiry: wire.expiry,
			pub_key: wire.pub_key,
		}
	}
}

impl From<&Hop> for HopWire {
	fn from(hop: &Hop) -> Self {
		HopWire {
			chan_id: hop.chan_id,
			chan_capacity: hop.chan_capacity,
			amt_to_forward: hop.amt_to_forward,
			fee: hop.fee,
			expiry: hop.expiry,
			amt_to_forward_msat: hop.amt_to_forward_msat,
			fee_msat: hop.fee_msat,
			pub_key: hop.pub_key.clone(),
		}
	}
}

#[derive(Debug, Serialize)]
struct InvoiceWire {
	memo: String,
	#[serde(with = "b64_bytes")]
	r_preimage: Vec<u8>,
	#[serde(with = "string_i64")]
	value: i64,
}

#[derive(Debug, Deserialize)]
struct AddInvoiceWire {
	#[serde(with = "b64_bytes")]
	r_hash: Vec<u8>,
}

#[derive(Debug, Serialize)]
struct SendToRouteWire {
	#[serde(with = "b64_bytes")]
	payment_hash: Vec<u8>,
	route: RouteWire,
}

#[derive(Debug, Deserialize)]
struct HtlcAttemptWire {
	#[serde(default)]
	status: String,
	#[serde(default)]
	failure: Option<HtlcFailureWire>,
	#[serde(default, deserialize_with = "opt_b64")]
	preimage: Option<Vec<u8>>,
}

#[derive(Debug, Deserialize)]
struct HtlcFailureWire {
	#[serde(default)]
	code: String,
	#[serde(default)]
	failure_source_index: u32,
}

fn opt_b64<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
where
	D: serde::Deserializer<'de>,
{
	use base64::engine::general_purpose::STANDARD;
	use base64::Engine as _;
	use serde::de::Error as _;

	let encoded: Option<String> = serde::Deserialize::deserialize(deserializer)?;
	encoded
		.map(|s| STANDARD.decode(s.as_bytes()).map_err(D::Error::custom))
		.transpose()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_channel_wire_decodes_string_integers() {
		let json = r#"{
			"chan_id": "745613989266063360",
			"remote_pubkey": "02aa",
			"capacity": "1000000",
			"local_balance": "900000",
			"remote_balance": "100000",
			"active": true,
			"initiator": false
		}"#;
		let channel: Channel = serde_json::from_str::<ChannelWire>(json).unwrap().into();
		assert_eq!(channel.chan_id, 745613989266063360);
		assert_eq!(channel.capacity, 1_000_000);
		assert_eq!(channel.local_balance, 900_000);
		assert!(channel.active);
		assert!(!channel.initiator);
	}

	#[test]
	fn test_edge_wire_tolerates_missing_policy() {
		let json = r#"{
			"channel_id": "7",
			"capacity": "500000",
			"node1_pub": "02aa",
			"node2_pub": "02bb",
			"node1_policy": {
				"fee_base_msat": "1000",
				"fee_rate_milli_msat": "1",
				"time_lock_delta": 40,
				"disabled": false
			}
		}"#;
		let edge: ChannelEdge = serde_json::from_str::<ChannelEdgeWire>(json).unwrap().into();
		assert_eq!(edge.node1_policy.as_ref().unwrap().fee_base_msat, 1000);
		assert!(edge.node2_policy.is_none());
	}

	#[test]
	fn test_route_wire_round_trip() {
		let route = Route {
			total_time_lock: 700_264,
			total_fees: 2,
			total_amt: 10_002,
			total_fees_msat: 2020,
			total_amt_msat: 10_002_020,
			hops: vec![Hop {
				chan_id: 101,
				chan_capacity: 1_000_000,
				amt_to_forward: 10_001,
				amt_to_forward_msat: 10_001_010,
				fee: 1,
				fee_msat: 1010,
				expiry: 700_184,
				pub_key: "02aa".to_string(),
			}],
		};
		let json = serde_json::to_string(&RouteWire::from(&route)).unwrap();
		let back: Route = serde_json::from_str::<RouteWire>(&json).unwrap().into();
		assert_eq!(back, route);
	}

	#[test]
	fn test_query_routes_request_wire_shape() {
		let wire = QueryRoutesWire {
			pub_key: "02bb".to_string(),
			amt: 10_000,
			fee_limit: FeeLimitWire { fixed: 5 },
			source_pub_key: "02aa".to_string(),
			final_cltv_delta: 144,
			ignored_nodes: vec![B64Bytes { bytes: vec![0xde, 0xad] }],
			ignored_edges: vec![EdgeLocatorWire { channel_id: 101, direction_reverse: true }],
		};
		let json = serde_json::to_value(&wire).unwrap();
		assert_eq!(json["amt"], "10000");
		assert_eq!(json["fee_limit"]["fixed"], "5");
		assert_eq!(json["ignored_nodes"][0], "3q0=");
		assert_eq!(json["ignored_edges"][0]["channel_id"], "101");
		assert_eq!(json["ignored_edges"][0]["direction_reverse"], true);
	}

	#[test]
	fn test_attempt_with_preimage_is_settled() {
		let json = r#"{
			"status": "SUCCEEDED",
			"preimage": "AQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQE="
		}"#;
		let wire: HtlcAttemptWire = serde_json::from_str(json).unwrap();
		match payment_result_from_wire(wire).unwrap() {
			PaymentResult::Settled { preimage } => assert_eq!(preimage, [1u8; 32]),
			other => panic!("expected settled, got {:?}", other),
		}
	}

	#[test]
	fn test_attempt_with_failure_reports_source_index() {
		let json = r#"{
			"status": "FAILED",
			"failure": {
				"code": "TEMPORARY_CHANNEL_FAILURE",
				"failure_source_index": 2
			}
		}"#;
		let wire: HtlcAttemptWire = serde_json::from_str(json).unwrap();
		match payment_result_from_wire(wire).unwrap() {
			PaymentResult::Failed(failure) => {
				assert_eq!(failure.failure_source_index, 2);
				assert_eq!(failure.code, "TEMPORARY_CHANNEL_FAILURE");
			},
			other => panic!("expected failure, got {:?}", other),
		}
	}

	#[test]
	fn test_attempt_without_outcome_is_an_error() {
		let wire: HtlcAttemptWire = serde_json::from_str(r#"{"status": "IN_FLIGHT"}"#).unwrap();
		assert!(payment_result_from_wire(wire).is_err());
	}

	#[test]
	fn test_error_body_mapping() {
		let no_route = error_from_body(
			StatusCode::INTERNAL_SERVER_ERROR,
			br#"{"error": "unable to find a path to destination", "code": 2}"#,
		);
		assert_eq!(no_route.code, NodeErrorCode::NoRoute);

		let rpc = error_from_body(
			StatusCode::INTERNAL_SERVER_ERROR,
			br#"{"message": "invoice already exists"}"#,
		);
		assert_eq!(rpc.code, NodeErrorCode::Rpc);
		assert_eq!(rpc.message, "invoice already exists");

		let opaque = error_from_body(StatusCode::NOT_FOUND, b"not json");
		assert_eq!(opaque.code, NodeErrorCode::Rpc);
	}
}
