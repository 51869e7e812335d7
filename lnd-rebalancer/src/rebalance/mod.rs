// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The rebalance engine.
//!
//! One run moves `amount` sats out through `src_chan` and back in through
//! `dst_chan` via a circular self-payment. The node's pathfinder supplies the
//! interior of the route; the engine splices the local endpoints on, prices
//! the result, dispatches it, and on a localized failure excludes the
//! offending edge and retries. Every run writes exactly one history row.

pub(crate) mod exclusion;
pub(crate) mod pricer;

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hex::DisplayHex;
use rand::Rng;

use lnd_rebalancer_client::types::{
	Hop, PaymentFailure, PaymentResult, QueryRoutesRequest, Route,
};
use lnd_rebalancer_client::{LightningNode, NodeClientError};

use crate::io::history::{HistoryStore, LoopAttempt, LoopOutcome};
use crate::rebalance::exclusion::EdgeExclusions;
use crate::rebalance::pricer::PricingParams;
use crate::util::config::RebalanceConfig;

/// Deadline covering invoice creation plus one dispatch.
const DISPATCH_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub(crate) enum EngineError {
	/// A required node call failed; the attempt cannot continue.
	Node(NodeClientError),
	/// The history store refused a write. Outcomes must not be lost, so this
	/// is fatal.
	Storage(rusqlite::Error),
	/// An internal invariant broke; the process should abort with the
	/// diagnostic.
	Internal(String),
}

impl fmt::Display for EngineError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			EngineError::Node(e) => write!(f, "node error: {}", e),
			EngineError::Storage(e) => write!(f, "history store error: {}", e),
			EngineError::Internal(msg) => write!(f, "internal error: {}", msg),
		}
	}
}

impl std::error::Error for EngineError {}

enum Step {
	/// An edge was excluded; query again.
	Retry,
	Done(LoopOutcome),
}

/// Runs one rebalance and records its outcome. `Ok` covers all recorded
/// terminals (success, no routes, failure); `Err` is reserved for conditions
/// that must abort the run.
pub(crate) async fn rebalance(
	node: &dyn LightningNode, history: &HistoryStore, exclusions: &mut EdgeExclusions,
	config: &RebalanceConfig, amount: i64, src_chan: u64, dst_chan: u64,
) -> Result<LoopOutcome, EngineError> {
	let info = node.get_info().await.map_err(EngineError::Node)?;
	let our_pub = info.identity_pubkey;

	let src_edge = node.get_chan_info(src_chan).await.map_err(EngineError::Node)?;
	let src_pub = src_edge.peer_of(&our_pub).to_string();

	let dst_edge = node.get_chan_info(dst_chan).await.map_err(EngineError::Node)?;
	let dst_pub = dst_edge.peer_of(&our_pub).to_string();

	let fee_limit_fixed = (amount as f64 * config.fee_limit_rate).floor() as i64;
	log::info!(
		"rebalance {} sat: {} ({}) -> {} ({}), fee limit {} sat",
		amount,
		src_chan,
		src_pub,
		dst_chan,
		dst_pub,
		fee_limit_fixed
	);

	let mut attempt = Attempt {
		node,
		exclusions,
		our_pub,
		src_pub: src_pub.clone(),
		dst_pub: dst_pub.clone(),
		src_chan,
		dst_chan,
		src_capacity: src_edge.capacity,
		dst_capacity: dst_edge.capacity,
		amount,
		fee_limit_fixed,
		params: PricingParams {
			amount,
			block_height: info.block_height,
			final_cltv_delta: config.final_cltv_delta,
		},
		payment_hash: None,
	};

	let result = attempt.drive().await;

	let outcome = match &result {
		Ok(outcome) => *outcome,
		Err(_) => LoopOutcome::Failure,
	};
	let row = LoopAttempt {
		tstamp: unix_now(),
		src_chan,
		src_node: src_pub,
		dst_chan,
		dst_node: dst_pub,
		amount,
		fee_limit_rate: config.fee_limit_rate,
		outcome,
	};
	if let Err(e) = history.record(&row) {
		return result.and(Err(EngineError::Storage(e)));
	}
	log::info!("rebalance {} -> {} recorded as {:?}", src_chan, dst_chan, outcome);

	result
}

struct Attempt<'a> {
	node: &'a dyn LightningNode,
	exclusions: &'a mut EdgeExclusions,
	our_pub: String,
	src_pub: String,
	dst_pub: String,
	src_chan: u64,
	dst_chan: u64,
	src_capacity: i64,
	dst_capacity: i64,
	amount: i64,
	fee_limit_fixed: i64,
	params: PricingParams,
	/// Set once; retried routes settle against the same invoice.
	payment_hash: Option<[u8; 32]>,
}

impl Attempt<'_> {
	async fn drive(&mut self) -> Result<LoopOutcome, EngineError> {
		// Each retry adds or tightens an exclusion, so the set of routes the
		// node can return strictly shrinks and the loop terminates.
		loop {
			match self.step().await? {
				Step::Retry => continue,
				Step::Done(outcome) => return Ok(outcome),
			}
		}
	}

	async fn step(&mut self) -> Result<Step, EngineError> {
		let request = QueryRoutesRequest {
			pub_key: self.dst_pub.clone(),
			amt: self.amount,
			fee_limit_fixed: self.fee_limit_fixed,
			source_pub_key: self.src_pub.clone(),
			final_cltv_delta: self.params.final_cltv_delta,
			ignored_edges: self.exclusions.ignored_edges(self.amount),
			ignored_nodes: vec![self.our_pub.clone()],
		};

		let routes = match self.node.query_routes(request).await {
			Ok(routes) => routes,
			Err(e) => {
				log::info!("query routes failed: {}", e);
				return Ok(Step::Done(LoopOutcome::NoRoutes));
			},
		};
		// The node sorts by preference; take the best.
		let Some(interior) = routes.into_iter().next() else {
			log::info!("query routes returned nothing");
			return Ok(Step::Done(LoopOutcome::NoRoutes));
		};

		let mut route = self.splice(interior);
		let policies = pricer::sending_policies(self.node, &route.hops).await?;
		pricer::apply_pricing(&mut route, &policies, &self.params);
		pricer::check_pricing(&route, &policies, &self.params).map_err(EngineError::Internal)?;
		log::debug!(
			"candidate route: {} hops, {} msat fees, total timelock {}",
			route.hops.len(),
			route.total_fees_msat,
			route.total_time_lock
		);

		if route.total_fees_msat / 1000 > self.fee_limit_fixed {
			log::info!(
				"route fees {} msat exceed the {} sat budget",
				route.total_fees_msat,
				self.fee_limit_fixed
			);
			return Ok(Step::Done(LoopOutcome::NoRoutes));
		}

		let payment = match tokio::time::timeout(DISPATCH_TIMEOUT, self.dispatch(route.clone()))
			.await
		{
			Ok(Ok(payment)) => payment,
			Ok(Err(e)) => {
				log::warn!("dispatch failed: {}", e);
				return Ok(Step::Done(LoopOutcome::Failure));
			},
			Err(_) => {
				log::warn!("dispatch timed out after {:?}, outcome unknown", DISPATCH_TIMEOUT);
				return Ok(Step::Done(LoopOutcome::Failure));
			},
		};

		match payment {
			PaymentResult::Settled { preimage } => {
				log::info!("payment settled, preimage {}", preimage.to_lower_hex_string());
				Ok(Step::Done(LoopOutcome::Success))
			},
			PaymentResult::Failed(failure) => self.localize(&route, &failure).await,
		}
	}

	/// Wraps the interior path with the two hops only we know about: out
	/// through the source channel, back in through the destination channel.
	fn splice(&self, interior: Route) -> Route {
		let mut hops = Vec::with_capacity(interior.hops.len() + 2);
		hops.push(Hop {
			chan_id: self.src_chan,
			chan_capacity: self.src_capacity,
			amt_to_forward: self.amount,
			pub_key: self.src_pub.clone(),
			..Default::default()
		});
		hops.extend(interior.hops);
		hops.push(Hop {
			chan_id: self.dst_chan,
			chan_capacity: self.dst_capacity,
			amt_to_forward: self.amount,
			pub_key: self.our_pub.clone(),
			..Default::default()
		});
		Route { hops, ..Default::default() }
	}

	async fn dispatch(&mut self, route: Route) -> Result<PaymentResult, NodeClientError> {
		let payment_hash = match self.payment_hash {
			Some(hash) => hash,
			None => {
				let mut preimage = [0u8; 32];
				rand::thread_rng().fill(&mut preimage);
				let memo =
					format!("rebalance {} {} {}", self.amount, self.src_chan, self.dst_chan);
				let response = self.node.add_invoice(memo, preimage, self.amount).await?;
				log::debug!(
					"invoice added, payment hash {}",
					response.payment_hash.to_lower_hex_string()
				);
				self.payment_hash = Some(response.payment_hash);
				response.payment_hash
			},
		};
		self.node.send_to_route(payment_hash, route).await
	}

	/// Turns a structured payment failure into either an edge exclusion (and
	/// a retry) or a terminal outcome.
	async fn localize(
		&mut self, route: &Route, failure: &PaymentFailure,
	) -> Result<Step, EngineError> {
		let err_ndx = failure.failure_source_index as usize;
		let hops = &route.hops;

		if err_ndx == 0 {
			// Our own node refused the payment; nothing to exclude.
			log::warn!("local node failed the payment: {}", failure.code);
			return Ok(Step::Done(LoopOutcome::Failure));
		}
		if err_ndx >= hops.len() {
			return Err(EngineError::Internal(format!(
				"failure index {} does not name a hop on a {}-hop route",
				err_ndx,
				hops.len()
			)));
		}
		if err_ndx == hops.len() - 1 {
			// The failure sits on the mandatory self-returning hop.
			log::warn!("final hop failed the payment ({}), cannot avoid it", failure.code);
			return Ok(Step::Done(LoopOutcome::Failure));
		}

		let reporting_pub = hops[err_ndx - 1].pub_key.clone();
		let suspect_chan = hops[err_ndx].chan_id;
		let edge = self.node.get_chan_info(suspect_chan).await.map_err(EngineError::Node)?;
		let direction_reverse = edge.node2_pub == reporting_pub;

		log::info!(
			"{} reported by {}: excluding channel {} ({}) at {} sat and above",
			failure.code,
			reporting_pub,
			suspect_chan,
			if direction_reverse { "reverse" } else { "forward" },
			self.amount
		);
		self.exclusions.record_failure(suspect_chan, direction_reverse, self.amount);
		log::debug!("{} directed edges excluded so far", self.exclusions.len());
		Ok(Step::Retry)
	}
}

fn unix_now() -> i64 {
	SystemTime::now().duration_since(UNIX_EPOCH).expect("Time must be > 1970").as_secs() as i64
}
