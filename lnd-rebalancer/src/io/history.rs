// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Durable log of rebalance attempts.
//!
//! Every engine run appends exactly one row; the recommender reads the log
//! back to suppress loops that already failed under conditions at least as
//! favorable. The outcome integers are part of the on-disk format and must
//! never be renumbered.

use std::path::Path;

use rusqlite::{params, Connection};

/// Terminal outcome of one rebalance attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopOutcome {
	Success,
	/// No route survived the constraints, or the cheapest one blew the fee
	/// budget.
	NoRoutes,
	/// Dispatched but failed, or the node became unreachable mid-attempt.
	Failure,
}

impl LoopOutcome {
	// Persisted values; stable across versions.
	pub(crate) fn to_db(self) -> i64 {
		match self {
			LoopOutcome::Success => 0,
			LoopOutcome::NoRoutes => 10,
			LoopOutcome::Failure => 100,
		}
	}
}

/// One recorded attempt.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LoopAttempt {
	/// Unix seconds.
	pub tstamp: i64,
	pub src_chan: u64,
	pub src_node: String,
	pub dst_chan: u64,
	pub dst_node: String,
	pub amount: i64,
	pub fee_limit_rate: f64,
	pub outcome: LoopOutcome,
}

/// Aggregates over all attempts touching one channel.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct ChannelStats {
	pub rcv_count: i64,
	pub rcv_err_count: i64,
	pub rcv_sats: i64,
	pub snd_count: i64,
	pub snd_err_count: i64,
	pub snd_sats: i64,
}

pub(crate) struct HistoryStore {
	conn: Connection,
}

impl HistoryStore {
	/// Opens (creating if needed) the history database at `path`.
	pub(crate) fn open(path: &Path) -> rusqlite::Result<Self> {
		let conn = Connection::open(path)?;
		create_schema(&conn)?;
		Ok(HistoryStore { conn })
	}

	#[cfg(test)]
	pub(crate) fn open_in_memory() -> rusqlite::Result<Self> {
		let conn = Connection::open_in_memory()?;
		create_schema(&conn)?;
		Ok(HistoryStore { conn })
	}

	/// Appends one attempt. The row is durable once this returns.
	pub(crate) fn record(&self, attempt: &LoopAttempt) -> rusqlite::Result<()> {
		self.conn.execute(
			"INSERT INTO loop_attempt (
				tstamp,
				src_chan, src_node,
				dst_chan, dst_node,
				amount,
				fee_limit_rate,
				outcome
			)
			VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
			params![
				attempt.tstamp,
				attempt.src_chan as i64,
				attempt.src_node,
				attempt.dst_chan as i64,
				attempt.dst_node,
				attempt.amount,
				attempt.fee_limit_rate,
				attempt.outcome.to_db(),
			],
		)?;
		Ok(())
	}

	/// Whether this loop already failed recently under conditions at least as
	/// favorable: a non-success at a smaller-or-equal amount with a
	/// greater-or-equal fee ceiling after `since_tstamp` subsumes the attempt
	/// being considered.
	pub(crate) fn recently_failed(
		&self, src_chan: u64, dst_chan: u64, since_tstamp: i64, amount: i64, fee_limit_rate: f64,
	) -> rusqlite::Result<bool> {
		let count: i64 = self.conn.query_row(
			"SELECT COUNT(*) FROM loop_attempt
			WHERE src_chan = ?1
			  AND dst_chan = ?2
			  AND tstamp > ?3
			  AND amount <= ?4
			  AND fee_limit_rate >= ?5
			  AND outcome != 0",
			params![src_chan as i64, dst_chan as i64, since_tstamp, amount, fee_limit_rate],
			|row| row.get(0),
		)?;
		Ok(count > 0)
	}

	/// Aggregates over all attempts where `chan_id` appears as destination
	/// (receive side) or source (send side).
	pub(crate) fn channel_stats(&self, chan_id: u64) -> rusqlite::Result<ChannelStats> {
		let side = |column: &str| -> rusqlite::Result<(i64, i64, i64)> {
			self.conn.query_row(
				&format!(
					"SELECT
						COUNT(*),
						COALESCE(SUM(CASE WHEN outcome != 0 THEN 1 ELSE 0 END), 0),
						COALESCE(SUM(CASE WHEN outcome = 0 THEN amount ELSE 0 END), 0)
					FROM loop_attempt WHERE {} = ?1",
					column
				),
				params![chan_id as i64],
				|row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
			)
		};

		let (rcv_count, rcv_err_count, rcv_sats) = side("dst_chan")?;
		let (snd_count, snd_err_count, snd_sats) = side("src_chan")?;
		Ok(ChannelStats { rcv_count, rcv_err_count, rcv_sats, snd_count, snd_err_count, snd_sats })
	}
}

fn create_schema(conn: &Connection) -> rusqlite::Result<()> {
	conn.execute_batch(
		"CREATE TABLE IF NOT EXISTS loop_attempt (
			id INTEGER PRIMARY KEY,
			tstamp INTEGER,
			src_chan INTEGER,
			src_node TEXT,
			dst_chan INTEGER,
			dst_node TEXT,
			amount INTEGER,
			fee_limit_rate REAL,
			outcome INTEGER
		);
		CREATE INDEX IF NOT EXISTS loop_attempt_tstamp_ndx
			ON loop_attempt(tstamp);
		CREATE INDEX IF NOT EXISTS loop_attempt_src_chan_ndx
			ON loop_attempt(src_chan);
		CREATE INDEX IF NOT EXISTS loop_attempt_src_node_ndx
			ON loop_attempt(src_node);
		CREATE INDEX IF NOT EXISTS loop_attempt_dst_chan_ndx
			ON loop_attempt(dst_chan);
		CREATE INDEX IF NOT EXISTS loop_attempt_dst_node_ndx
			ON loop_attempt(dst_node);",
	)
}
