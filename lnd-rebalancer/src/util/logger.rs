// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

use chrono::SecondsFormat;
use log::{LevelFilter, Log, Metadata, Record};

/// Minimal `log` backend writing timestamped lines to stderr or a file.
struct Logger {
	level: LevelFilter,
	file: Option<Mutex<File>>,
}

impl Log for Logger {
	fn enabled(&self, metadata: &Metadata) -> bool {
		metadata.level() <= self.level
	}

	fn log(&self, record: &Record) {
		if !self.enabled(record.metadata()) {
			return;
		}

		let line = format!(
			"[{}] {:<5} {}: {}\n",
			chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
			record.level(),
			record.target(),
			record.args()
		);

		match &self.file {
			Some(file) => {
				let mut file = file.lock().expect("log file lock poisoned");
				let _ = file.write_all(line.as_bytes());
			},
			None => eprint!("{}", line),
		}
	}

	fn flush(&self) {
		if let Some(file) = &self.file {
			let _ = file.lock().expect("log file lock poisoned").flush();
		}
	}
}

/// Installs the process-wide logger. Must be called once, before anything
/// logs.
pub(crate) fn init(level: LevelFilter, file_path: Option<&Path>) -> io::Result<()> {
	let file = match file_path {
		Some(path) => {
			Some(Mutex::new(OpenOptions::new().create(true).append(true).open(path)?))
		},
		None => None,
	};

	log::set_boxed_logger(Box::new(Logger { level, file }))
		.map_err(|e| io::Error::new(io::ErrorKind::AlreadyExists, e.to_string()))?;
	log::set_max_level(level);
	Ok(())
}
