use serde::{Deserialize, Deserializer};

/// `version_info` is carried as a decimal string on the wire but is a plain
/// counter in memory. A non-numeric value fails the load.
pub mod version_string {
	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(v: &u64, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&v.to_string())
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
		let s = String::deserialize(deserializer)?;
		s.parse::<u64>().map_err(serde::de::Error::custom)
	}
}

/// Accept a port as either a JSON number or a decimal string.
pub fn lenient_u16<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
	#[derive(Deserialize)]
	#[serde(untagged)]
	enum NumberOrString {
		Number(u16),
		String(String),
	}
	match NumberOrString::deserialize(deserializer)? {
		NumberOrString::Number(n) => Ok(n),
		NumberOrString::String(s) => s.parse::<u16>().map_err(serde::de::Error::custom),
	}
}
