// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Deterministic fee and expiry computation along a hop sequence.
//!
//! The node's pathfinder returns only the interior of a rebalance route; once
//! the local endpoints are spliced on, every hop's amounts, fees and expiries
//! must be recomputed from the advertised policies. All arithmetic is integer
//! and in millisatoshis; satoshi fields are derived by truncating division.

use lnd_rebalancer_client::types::{Hop, Route, RoutingPolicy};
use lnd_rebalancer_client::LightningNode;

use crate::rebalance::EngineError;

#[derive(Debug, Clone, Copy)]
pub(crate) struct PricingParams {
	/// Amount (sats) delivered to the final hop.
	pub amount: i64,
	pub block_height: u32,
	/// Expiry slack granted to the final hop.
	pub final_cltv_delta: u32,
}

/// Fetches, for every hop, the policy governing the traversal of that hop's
/// channel: the one advertised by the endpoint the payment comes *from*, i.e.
/// the endpoint that is not the hop's destination.
pub(crate) async fn sending_policies(
	node: &dyn LightningNode, hops: &[Hop],
) -> Result<Vec<RoutingPolicy>, EngineError> {
	let mut policies = Vec::with_capacity(hops.len());
	for hop in hops {
		let edge = node.get_chan_info(hop.chan_id).await.map_err(EngineError::Node)?;
		let policy = edge.sending_policy(&hop.pub_key).ok_or_else(|| {
			EngineError::Internal(format!(
				"channel {} advertises no policy toward {}",
				hop.chan_id, hop.pub_key
			))
		})?;
		policies.push(policy.clone());
	}
	Ok(policies)
}

/// Reverse-walks the route, assigning every hop's forward amount, fee and
/// expiry plus the route totals. `policies[ndx]` must be the sending policy
/// of `route.hops[ndx]` as produced by [`sending_policies`].
///
/// Hop `ndx`'s fee is what the node *after* it charges to forward onward, so
/// the walk carries each policy's fee one step backward; the final hop always
/// ends up with fee 0 and expiry `block_height + final_cltv_delta`.
pub(crate) fn apply_pricing(route: &mut Route, policies: &[RoutingPolicy], params: &PricingParams) {
	let last_ndx = route.hops.len().saturating_sub(1);

	let mut sum_delta = params.final_cltv_delta;
	let mut last_delta = 0u32;
	let mut sum_fee_msat = 0i64;
	let mut last_fee_msat = 0i64;
	let mut amt_to_fwd_msat = params.amount * 1000;

	for ndx in (0..route.hops.len()).rev() {
		let hop = &mut route.hops[ndx];
		let policy = &policies[ndx];

		hop.expiry = params.block_height + sum_delta;
		if ndx != last_ndx {
			sum_delta += last_delta;
		}
		last_delta = policy.time_lock_delta;

		hop.fee_msat = last_fee_msat;
		hop.fee = last_fee_msat / 1000;
		hop.amt_to_forward_msat = amt_to_fwd_msat;
		hop.amt_to_forward = amt_to_fwd_msat / 1000;

		amt_to_fwd_msat += last_fee_msat;
		sum_fee_msat += last_fee_msat;
		last_fee_msat = policy.fee_base_msat
			+ (hop.amt_to_forward_msat * policy.fee_rate_milli_msat) / 1_000_000;
	}

	route.total_time_lock = params.block_height + sum_delta;
	route.total_fees_msat = sum_fee_msat;
	route.total_fees = sum_fee_msat / 1000;
	route.total_amt_msat = params.amount * 1000 + sum_fee_msat;
	route.total_amt = route.total_amt_msat / 1000;
}

/// Re-runs the pricing walk and compares every field. A mismatch means some
/// step of route construction disagreed with the policies and must not reach
/// the wire.
pub(crate) fn check_pricing(
	route: &Route, policies: &[RoutingPolicy], params: &PricingParams,
) -> Result<(), String> {
	let mut expected = route.clone();
	apply_pricing(&mut expected, policies, params);

	if expected == *route {
		return Ok(());
	}

	for (ndx, (got, want)) in route.hops.iter().zip(expected.hops.iter()).enumerate() {
		if got != want {
			return Err(format!("hop {} mispriced: got {:?}, want {:?}", ndx, got, want));
		}
	}
	Err(format!(
		"route totals mispriced: got ({}, {}, {}, {}, {}), want ({}, {}, {}, {}, {})",
		route.total_amt,
		route.total_amt_msat,
		route.total_fees,
		route.total_fees_msat,
		route.total_time_lock,
		expected.total_amt,
		expected.total_amt_msat,
		expected.total_fees,
		expected.total_fees_msat,
		expected.total_time_lock,
	))
}
