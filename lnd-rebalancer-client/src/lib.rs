// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Typed client for an LND node's REST interface.
//!
//! [`LightningNode`] is the facade the rebalancer programs against; tests
//! substitute an in-memory implementation, production uses
//! [`client::LndRestClient`].

pub mod client;
pub mod error;
pub mod serde_utils;
pub mod types;

use async_trait::async_trait;

pub use crate::error::{NodeClientError, NodeErrorCode};
use crate::types::{
	AddInvoiceResponse, Channel, ChannelEdge, ChannelFilter, LocalNodeInfo, PaymentResult,
	PendingChannel, QueryRoutesRequest, RemoteNodeInfo, Route,
};

/// The node operations the rebalancer consumes.
///
/// All calls are awaited sequentially by callers; implementations do not need
/// to support in-flight concurrency, only `Send + Sync` sharing.
#[async_trait]
pub trait LightningNode: Send + Sync {
	async fn get_info(&self) -> Result<LocalNodeInfo, NodeClientError>;

	async fn list_channels(&self, filter: ChannelFilter) -> Result<Vec<Channel>, NodeClientError>;

	async fn pending_channels(&self) -> Result<Vec<PendingChannel>, NodeClientError>;

	async fn get_chan_info(&self, chan_id: u64) -> Result<ChannelEdge, NodeClientError>;

	async fn get_node_info(&self, pub_key: &str) -> Result<RemoteNodeInfo, NodeClientError>;

	/// Returns candidate paths from `request.source_pub_key` to
	/// `request.pub_key`, best first. Fails with
	/// [`NodeErrorCode::NoRoute`] when no path satisfies the constraints.
	async fn query_routes(
		&self, request: QueryRoutesRequest,
	) -> Result<Vec<Route>, NodeClientError>;

	async fn add_invoice(
		&self, memo: String, preimage: [u8; 32], value_sat: i64,
	) -> Result<AddInvoiceResponse, NodeClientError>;

	/// Dispatches a payment along `route`, settling against `payment_hash`.
	/// Returns a single terminal result: settled with a preimage, or a
	/// structured failure naming the reporting node.
	async fn send_to_route(
		&self, payment_hash: [u8; 32], route: Route,
	) -> Result<PaymentResult, NodeClientError>;
}
