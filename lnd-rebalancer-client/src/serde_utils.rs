// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Custom serde helpers for LND's REST encoding.
//!
//! The REST gateway renders 64-bit integer fields as JSON strings and byte
//! fields as standard base64. These modules are used via
//! `#[serde(with = "...")]` attributes on the wire structs so the rest of the
//! client only ever sees native integers and byte vectors.

/// Generates a serde `with`-module that maps an integer type to and from its
/// JSON string form, while still accepting a bare number on input.
macro_rules! string_int_module {
	($mod_name:ident, $int_type:ty) => {
		pub mod $mod_name {
			use serde::de::Error as _;
			use serde::{Deserialize, Deserializer, Serializer};

			pub fn serialize<S>(value: &$int_type, serializer: S) -> Result<S::Ok, S::Error>
			where
				S: Serializer,
			{
				serializer.serialize_str(&value.to_string())
			}

			pub fn deserialize<'de, D>(deserializer: D) -> Result<$int_type, D::Error>
			where
				D: Deserializer<'de>,
			{
				#[derive(Deserialize)]
				#[serde(untagged)]
				enum Raw {
					Num($int_type),
					Str(String),
				}

				match Raw::deserialize(deserializer)? {
					Raw::Num(n) => Ok(n),
					Raw::Str(s) => s.parse::<$int_type>().map_err(D::Error::custom),
				}
			}
		}
	};
}

string_int_module!(string_i64, i64);
string_int_module!(string_u64, u64);

/// Byte fields as standard (padded) base64 strings.
pub mod b64_bytes {
	use base64::engine::general_purpose::STANDARD;
	use base64::Engine as _;
	use serde::de::Error as _;
	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&STANDARD.encode(value))
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
	where
		D: Deserializer<'de>,
	{
		let encoded = String::deserialize(deserializer)?;
		STANDARD.decode(encoded.as_bytes()).map_err(D::Error::custom)
	}
}
